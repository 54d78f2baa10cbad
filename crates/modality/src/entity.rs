use std::fmt;
use std::hash::{Hash, Hasher};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

static NEXT_ENTITY_ID: AtomicU64 = AtomicU64::new(1);
static NEXT_SCOPE_ID: AtomicU64 = AtomicU64::new(1);

struct EntityInner {
	id: u64,
	name: String,
	transparent: AtomicBool,
}

/// Opaque identity of something that opens a modal context.
///
/// Equality is identity: two entities are equal only if one is a clone of the
/// other, regardless of name.
#[derive(Clone)]
pub struct ModalEntity {
	inner: Arc<EntityInner>,
}

impl ModalEntity {
	/// Creates a fresh entity. The name is for diagnostics only.
	pub fn new(name: impl Into<String>) -> Self {
		Self {
			inner: Arc::new(EntityInner {
				id: NEXT_ENTITY_ID.fetch_add(1, Ordering::Relaxed),
				name: name.into(),
				transparent: AtomicBool::new(false),
			}),
		}
	}

	/// Returns the diagnostic name.
	pub fn name(&self) -> &str {
		&self.inner.name
	}

	/// Returns the process-unique id.
	pub fn id(&self) -> u64 {
		self.inner.id
	}

	/// Returns true if this entity does not act as a barrier for deferred work.
	pub fn is_transparent(&self) -> bool {
		self.inner.transparent.load(Ordering::Acquire)
	}

	pub(crate) fn set_transparent(&self) {
		self.inner.transparent.store(true, Ordering::Release);
	}
}

impl PartialEq for ModalEntity {
	fn eq(&self, other: &Self) -> bool {
		Arc::ptr_eq(&self.inner, &other.inner)
	}
}

impl Eq for ModalEntity {}

impl Hash for ModalEntity {
	fn hash<H: Hasher>(&self, state: &mut H) {
		self.inner.id.hash(state);
	}
}

impl fmt::Debug for ModalEntity {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		write!(f, "{}#{}", self.inner.name, self.inner.id)?;
		if self.is_transparent() {
			f.write_str("(transparent)")?;
		}
		Ok(())
	}
}

/// Identity of an independent modal chain.
///
/// Entities entered in a scope nest only relative to each other, not relative
/// to the primary chain or other scopes.
#[derive(Clone)]
pub struct ModalScope {
	id: u64,
	name: Arc<str>,
}

impl ModalScope {
	/// Creates a fresh scope.
	pub fn new(name: impl AsRef<str>) -> Self {
		Self {
			id: NEXT_SCOPE_ID.fetch_add(1, Ordering::Relaxed),
			name: Arc::from(name.as_ref()),
		}
	}

	/// Returns the diagnostic name.
	pub fn name(&self) -> &str {
		&self.name
	}

	pub(crate) fn id(&self) -> u64 {
		self.id
	}
}

impl PartialEq for ModalScope {
	fn eq(&self, other: &Self) -> bool {
		self.id == other.id
	}
}

impl Eq for ModalScope {}

impl Hash for ModalScope {
	fn hash<H: Hasher>(&self, state: &mut H) {
		self.id.hash(state);
	}
}

impl fmt::Debug for ModalScope {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		write!(f, "scope:{}#{}", self.name, self.id)
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn entities_compare_by_identity() {
		let a = ModalEntity::new("dialog");
		let b = ModalEntity::new("dialog");
		assert_ne!(a, b);
		assert_eq!(a, a.clone());
	}

	#[test]
	fn transparency_is_shared_by_clones() {
		let entity = ModalEntity::new("progress");
		let clone = entity.clone();
		entity.set_transparent();
		assert!(clone.is_transparent());
	}
}
