use std::any::{Any, TypeId, type_name};
use std::fmt;
use std::hash::{Hash, Hasher};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

static NEXT_UNIQUE_KEY: AtomicU64 = AtomicU64::new(1);

#[derive(Clone, Copy, PartialEq, Eq, Hash)]
enum Identity {
	Address(usize),
	Unique(u64),
}

/// Identity token under which submissions supersede each other.
///
/// Keys compare by the identity of the object they were made from, never by
/// value. A key made by [`CoalesceKey::of`] holds its referent alive, so the
/// address cannot be handed to an unrelated object while a task keyed by it
/// is live.
#[derive(Clone)]
pub struct CoalesceKey {
	identity: Identity,
	_anchor: Option<Arc<dyn Any + Send + Sync>>,
	type_id: TypeId,
	type_name: &'static str,
	zero_sized: bool,
}

impl CoalesceKey {
	/// Key identifying the allocation behind `value`.
	pub fn of<T: ?Sized + Send + Sync + 'static>(value: &Arc<T>) -> Self {
		Self {
			identity: Identity::Address(Arc::as_ptr(value).cast::<()>() as usize),
			_anchor: Some(Arc::new(Arc::clone(value))),
			type_id: TypeId::of::<T>(),
			type_name: type_name::<T>(),
			zero_sized: std::mem::size_of_val::<T>(value) == 0,
		}
	}

	/// A fresh key equal only to its clones.
	pub fn unique() -> Self {
		Self {
			identity: Identity::Unique(NEXT_UNIQUE_KEY.fetch_add(1, Ordering::Relaxed)),
			_anchor: None,
			type_id: TypeId::of::<Self>(),
			type_name: "unique",
			zero_sized: false,
		}
	}

	pub(crate) fn type_id(&self) -> TypeId {
		self.type_id
	}

	pub(crate) fn is_zero_sized(&self) -> bool {
		self.zero_sized
	}
}

impl PartialEq for CoalesceKey {
	fn eq(&self, other: &Self) -> bool {
		self.identity == other.identity && self.type_id == other.type_id
	}
}

impl Eq for CoalesceKey {}

impl Hash for CoalesceKey {
	fn hash<H: Hasher>(&self, state: &mut H) {
		self.identity.hash(state);
		self.type_id.hash(state);
	}
}

impl fmt::Debug for CoalesceKey {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		match self.identity {
			Identity::Address(address) => write!(f, "CoalesceKey({}@{address:#x})", self.type_name),
			Identity::Unique(id) => write!(f, "CoalesceKey(unique#{id})"),
		}
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn keys_compare_by_identity() {
		let a = Arc::new(String::from("doc"));
		let b = Arc::new(String::from("doc"));
		assert_eq!(CoalesceKey::of(&a), CoalesceKey::of(&Arc::clone(&a)));
		assert_ne!(CoalesceKey::of(&a), CoalesceKey::of(&b));
		assert_ne!(CoalesceKey::unique(), CoalesceKey::unique());
	}

	#[test]
	fn key_keeps_its_referent_alive() {
		let doc = Arc::new(String::from("doc"));
		let weak = Arc::downgrade(&doc);
		let key = CoalesceKey::of(&doc);
		let copy = key.clone();
		drop(doc);

		assert!(weak.upgrade().is_some());
		drop(key);
		assert!(weak.upgrade().is_some());
		drop(copy);
		assert!(weak.upgrade().is_none());
	}

	#[test]
	fn zero_sized_referents_are_flagged() {
		struct Marker;
		assert!(CoalesceKey::of(&Arc::new(Marker)).is_zero_sized());
		assert!(!CoalesceKey::of(&Arc::new(1u8)).is_zero_sized());
	}
}
