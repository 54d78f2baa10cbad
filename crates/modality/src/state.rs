use std::fmt;
use std::sync::Arc;

use smallvec::SmallVec;

use crate::{ModalEntity, ModalScope};

#[derive(Clone)]
pub(crate) struct ScopedChain {
	pub(crate) scope: ModalScope,
	pub(crate) entities: Arc<[ModalEntity]>,
}

#[derive(Clone)]
struct Chains {
	primary: Arc<[ModalEntity]>,
	/// Non-empty scoped chains, sorted by scope id.
	scoped: Arc<[ScopedChain]>,
	/// Most recently entered entity still open, across all chains.
	top: Option<ModalEntity>,
}

impl Chains {
	fn chain(&self, scope: &ModalScope) -> &[ModalEntity] {
		self.scoped
			.iter()
			.find(|chain| chain.scope == *scope)
			.map(|chain| &*chain.entities)
			.unwrap_or(&[])
	}
}

#[derive(Clone)]
enum Repr {
	Any,
	Chains(Chains),
}

/// Immutable snapshot of the open modal entities.
///
/// States are ordered by [`ModalityState::dominates`]: a state dominates another
/// when, in every chain, it extends the other's entities with entities entered
/// later. States built from chains with no common ancestor are mutually
/// non-dominating.
#[derive(Clone)]
pub struct ModalityState {
	repr: Repr,
}

impl ModalityState {
	/// The state with no modal entity open.
	pub fn non_modal() -> Self {
		Self {
			repr: Repr::Chains(Chains {
				primary: Arc::from(Vec::new()),
				scoped: Arc::from(Vec::new()),
				top: None,
			}),
		}
	}

	/// A state under which deferred work is always eligible.
	pub fn any() -> Self {
		Self { repr: Repr::Any }
	}

	pub(crate) fn from_chains(primary: Vec<ModalEntity>, mut scoped: Vec<ScopedChain>, top: Option<ModalEntity>) -> Self {
		scoped.retain(|chain| !chain.entities.is_empty());
		scoped.sort_by_key(|chain| chain.scope.id());
		Self {
			repr: Repr::Chains(Chains {
				primary: Arc::from(primary),
				scoped: Arc::from(scoped),
				top,
			}),
		}
	}

	/// Returns true for [`ModalityState::any`].
	pub fn is_any(&self) -> bool {
		matches!(self.repr, Repr::Any)
	}

	/// Returns true when no entity is open.
	pub fn is_non_modal(&self) -> bool {
		match &self.repr {
			Repr::Any => false,
			Repr::Chains(chains) => chains.primary.is_empty() && chains.scoped.is_empty(),
		}
	}

	/// Entities open on the primary chain, outermost first.
	pub fn primary(&self) -> &[ModalEntity] {
		match &self.repr {
			Repr::Any => &[],
			Repr::Chains(chains) => &chains.primary,
		}
	}

	/// Entities open on `scope`'s chain, outermost first.
	pub fn scoped(&self, scope: &ModalScope) -> &[ModalEntity] {
		match &self.repr {
			Repr::Any => &[],
			Repr::Chains(chains) => chains.chain(scope),
		}
	}

	/// Most recently entered entity that is still open.
	pub fn top(&self) -> Option<&ModalEntity> {
		match &self.repr {
			Repr::Any => None,
			Repr::Chains(chains) => chains.top.as_ref(),
		}
	}

	/// Total number of open entities across all chains.
	pub fn depth(&self) -> usize {
		match &self.repr {
			Repr::Any => 0,
			Repr::Chains(chains) => chains.primary.len() + chains.scoped.iter().map(|chain| chain.entities.len()).sum::<usize>(),
		}
	}

	/// Returns true if `self` strictly extends `other` in every chain.
	///
	/// [`ModalityState::any`] neither dominates nor is dominated.
	pub fn dominates(&self, other: &Self) -> bool {
		let (Repr::Chains(this), Repr::Chains(that)) = (&self.repr, &other.repr) else {
			return false;
		};
		if self == other {
			return false;
		}
		is_prefix(&that.primary, &this.primary) && that.scoped.iter().all(|chain| is_prefix(&chain.entities, this.chain(&chain.scope)))
	}

	/// Returns true if work tagged with `self` may run while `current` is active.
	///
	/// Work is eligible once `current` has unwound to `self` (or further) on the
	/// primary chain and on every scoped chain `self` was captured in. Scoped
	/// chains `self` knows nothing about do not hold it back. Transparent
	/// entities are ignored on both sides.
	pub fn is_eligible_under(&self, current: &Self) -> bool {
		let (Repr::Chains(task), Repr::Chains(now)) = (&self.repr, &current.repr) else {
			return true;
		};
		is_barrier_prefix(&now.primary, &task.primary)
			&& task.scoped.iter().all(|chain| is_barrier_prefix(now.chain(&chain.scope), &chain.entities))
	}
}

impl Default for ModalityState {
	fn default() -> Self {
		Self::non_modal()
	}
}

impl PartialEq for ModalityState {
	fn eq(&self, other: &Self) -> bool {
		match (&self.repr, &other.repr) {
			(Repr::Any, Repr::Any) => true,
			(Repr::Chains(a), Repr::Chains(b)) => {
				a.primary == b.primary
					&& a.scoped.len() == b.scoped.len()
					&& a.scoped.iter().zip(b.scoped.iter()).all(|(x, y)| x.scope == y.scope && x.entities == y.entities)
			}
			_ => false,
		}
	}
}

impl Eq for ModalityState {}

impl fmt::Debug for ModalityState {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		match &self.repr {
			Repr::Any => f.write_str("ModalityState(any)"),
			Repr::Chains(chains) if chains.primary.is_empty() && chains.scoped.is_empty() => f.write_str("ModalityState(non-modal)"),
			Repr::Chains(chains) => {
				let mut out = f.debug_struct("ModalityState");
				out.field("primary", &chains.primary);
				for chain in chains.scoped.iter() {
					out.field(chain.scope.name(), &chain.entities);
				}
				out.finish()
			}
		}
	}
}

fn is_prefix(prefix: &[ModalEntity], of: &[ModalEntity]) -> bool {
	prefix.len() <= of.len() && prefix.iter().zip(of).all(|(a, b)| a == b)
}

fn is_barrier_prefix(current: &[ModalEntity], task: &[ModalEntity]) -> bool {
	let current: SmallVec<[&ModalEntity; 8]> = current.iter().filter(|entity| !entity.is_transparent()).collect();
	let task: SmallVec<[&ModalEntity; 8]> = task.iter().filter(|entity| !entity.is_transparent()).collect();
	current.len() <= task.len() && current.iter().zip(task.iter()).all(|(a, b)| a == b)
}
