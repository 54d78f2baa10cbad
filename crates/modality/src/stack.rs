use std::sync::Arc;
use std::thread::{self, ThreadId};

use parking_lot::Mutex;

use crate::state::ScopedChain;
use crate::{ModalEntity, ModalScope, ModalityState};

#[derive(Debug, Clone)]
struct Frame {
	/// `None` for the primary chain.
	scope: Option<ModalScope>,
	entity: ModalEntity,
}

#[derive(Debug)]
struct StackState {
	/// Open frames in entry order across all chains.
	frames: Vec<Frame>,
	current: ModalityState,
}

impl StackState {
	fn rebuild(&mut self) {
		let primary = self.frames.iter().filter(|frame| frame.scope.is_none()).map(|frame| frame.entity.clone()).collect();
		let mut scoped: Vec<(ModalScope, Vec<ModalEntity>)> = Vec::new();
		for frame in &self.frames {
			let Some(scope) = &frame.scope else {
				continue;
			};
			match scoped.iter_mut().find(|(existing, _)| existing == scope) {
				Some((_, entities)) => entities.push(frame.entity.clone()),
				None => scoped.push((scope.clone(), vec![frame.entity.clone()])),
			}
		}
		let scoped = scoped
			.into_iter()
			.map(|(scope, entities)| ScopedChain {
				scope,
				entities: Arc::from(entities),
			})
			.collect();
		let top = self.frames.last().map(|frame| frame.entity.clone());
		self.current = ModalityState::from_chains(primary, scoped, top);
	}
}

/// The stack of open modal entities.
///
/// Cloning yields another handle to the same stack. Mutation and
/// [`ModalityStack::current`] are confined to the owner thread.
#[derive(Debug, Clone)]
pub struct ModalityStack {
	owner: ThreadId,
	state: Arc<Mutex<StackState>>,
}

impl Default for ModalityStack {
	fn default() -> Self {
		Self::new()
	}
}

impl ModalityStack {
	/// Creates an empty stack owned by the calling thread.
	pub fn new() -> Self {
		Self::with_owner(thread::current().id())
	}

	/// Creates an empty stack owned by `owner`.
	pub fn with_owner(owner: ThreadId) -> Self {
		Self {
			owner,
			state: Arc::new(Mutex::new(StackState {
				frames: Vec::new(),
				current: ModalityState::non_modal(),
			})),
		}
	}

	/// Returns the owner thread.
	pub fn owner(&self) -> ThreadId {
		self.owner
	}

	/// Returns true when called on the owner thread.
	pub fn is_owner_thread(&self) -> bool {
		thread::current().id() == self.owner
	}

	/// Opens `entity` on the primary chain.
	pub fn enter_modal(&self, entity: &ModalEntity) {
		self.push(None, entity);
	}

	/// Closes the innermost frame for `entity` on the primary chain.
	///
	/// # Panics
	///
	/// Panics if `entity` is not open on the primary chain.
	pub fn leave_modal(&self, entity: &ModalEntity) {
		self.remove(None, entity);
	}

	/// Opens `entity` on the independent chain identified by `scope`.
	pub fn enter_modal_in(&self, scope: &ModalScope, entity: &ModalEntity) {
		self.push(Some(scope), entity);
	}

	/// Closes the innermost frame for `entity` on `scope`'s chain.
	///
	/// # Panics
	///
	/// Panics if `entity` is not open on that chain.
	pub fn leave_modal_in(&self, scope: &ModalScope, entity: &ModalEntity) {
		self.remove(Some(scope), entity);
	}

	/// Closes every frame on `scope`'s chain, returning how many were open.
	pub fn leave_all_in(&self, scope: &ModalScope) -> usize {
		self.assert_owner("leave_all_in");
		let mut state = self.state.lock();
		let before = state.frames.len();
		state.frames.retain(|frame| frame.scope.as_ref() != Some(scope));
		let removed = before - state.frames.len();
		if removed > 0 {
			state.rebuild();
			tracing::debug!(scope = scope.name(), removed, "modality.leave_all");
		}
		removed
	}

	/// Returns the state reflecting every open entity.
	pub fn current(&self) -> ModalityState {
		self.assert_owner("current");
		self.state.lock().current.clone()
	}

	/// Marks the innermost entity of `state` as transparent.
	///
	/// Work captured under any ancestor of that entity stays eligible while it is
	/// open. Returns false when `state` has no entity to mark.
	pub fn mark_transparent(&self, state: &ModalityState) -> bool {
		let Some(top) = state.top() else {
			return false;
		};
		top.set_transparent();
		tracing::debug!(entity = ?top, "modality.mark_transparent");
		true
	}

	/// Returns true while any entity is open.
	pub fn is_in_modal_context(&self) -> bool {
		!self.state.lock().frames.is_empty()
	}

	/// Number of open frames across all chains.
	pub fn depth(&self) -> usize {
		self.state.lock().frames.len()
	}

	fn push(&self, scope: Option<&ModalScope>, entity: &ModalEntity) {
		self.assert_owner("enter_modal");
		let mut state = self.state.lock();
		state.frames.push(Frame {
			scope: scope.cloned(),
			entity: entity.clone(),
		});
		state.rebuild();
		tracing::debug!(entity = ?entity, scope = ?scope, depth = state.frames.len(), "modality.enter");
	}

	fn remove(&self, scope: Option<&ModalScope>, entity: &ModalEntity) {
		self.assert_owner("leave_modal");
		let mut state = self.state.lock();
		let position = state.frames.iter().rposition(|frame| frame.scope.as_ref() == scope && frame.entity == *entity);
		let Some(index) = position else {
			panic!("leave_modal({entity:?}) without a matching enter_modal in {scope:?}");
		};
		let chain_top = state.frames.iter().rposition(|frame| frame.scope.as_ref() == scope);
		if chain_top != Some(index) {
			tracing::debug!(entity = ?entity, scope = ?scope, "modality.leave.out_of_order");
		}
		state.frames.remove(index);
		state.rebuild();
		tracing::debug!(entity = ?entity, scope = ?scope, depth = state.frames.len(), "modality.leave");
	}

	fn assert_owner(&self, operation: &str) {
		assert!(
			self.is_owner_thread(),
			"ModalityStack::{operation} called off the owner thread"
		);
	}
}
