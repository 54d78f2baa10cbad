//! Thread-local scopes that alter how the current thread takes access.
//!
//! Each scope is an RAII guard bound to the thread that created it. Scopes nest;
//! the flag stays raised until the outermost guard is dropped.

use std::cell::Cell;
use std::marker::PhantomData;

use tokio_util::sync::CancellationToken;

use crate::AccessError;

thread_local! {
	static IMPATIENT_DEPTH: Cell<usize> = const { Cell::new(0) };
	static NON_CANCELABLE_DEPTH: Cell<usize> = const { Cell::new(0) };
	static WRITE_PROHIBITED_DEPTH: Cell<usize> = const { Cell::new(0) };
}

fn enter(key: &'static std::thread::LocalKey<Cell<usize>>) {
	key.with(|depth| depth.set(depth.get() + 1));
}

fn exit(key: &'static std::thread::LocalKey<Cell<usize>>, what: &str) {
	key.with(|depth| {
		let prev = depth.get();
		debug_assert!(prev > 0, "{what} scope underflow");
		depth.set(prev.saturating_sub(1));
	});
}

fn active(key: &'static std::thread::LocalKey<Cell<usize>>) -> bool {
	key.with(|depth| depth.get() > 0)
}

/// Scope in which blocked read acquisitions fail with [`AccessError::CannotRead`].
#[must_use = "the thread stops being impatient when the scope is dropped"]
pub struct ImpatientReaderScope {
	_thread_bound: PhantomData<*const ()>,
}

impl Drop for ImpatientReaderScope {
	fn drop(&mut self) {
		exit(&IMPATIENT_DEPTH, "impatient reader");
	}
}

/// Scope in which impatience and cancellation are suppressed.
#[must_use = "the section ends when the guard is dropped"]
pub struct NonCancelableSection {
	_thread_bound: PhantomData<*const ()>,
}

impl Drop for NonCancelableSection {
	fn drop(&mut self) {
		exit(&NON_CANCELABLE_DEPTH, "non-cancelable");
	}
}

/// Scope in which starting a write action is a contract violation.
#[must_use = "write actions are allowed again when the scope is dropped"]
pub struct WriteProhibitedScope {
	_thread_bound: PhantomData<*const ()>,
}

impl Drop for WriteProhibitedScope {
	fn drop(&mut self) {
		exit(&WRITE_PROHIBITED_DEPTH, "write prohibition");
	}
}

/// Marks the current thread as an impatient reader until the guard drops.
pub fn impatient_reader() -> ImpatientReaderScope {
	enter(&IMPATIENT_DEPTH);
	ImpatientReaderScope { _thread_bound: PhantomData }
}

/// Enters a non-cancelable section until the guard drops.
pub fn non_cancelable_section() -> NonCancelableSection {
	enter(&NON_CANCELABLE_DEPTH);
	NonCancelableSection { _thread_bound: PhantomData }
}

/// Forbids write actions on the current thread until the guard drops.
pub fn prohibit_write_actions() -> WriteProhibitedScope {
	enter(&WRITE_PROHIBITED_DEPTH);
	WriteProhibitedScope { _thread_bound: PhantomData }
}

/// Returns true if the current thread is inside an impatient-reader scope.
pub fn is_impatient_reader() -> bool {
	active(&IMPATIENT_DEPTH)
}

/// Returns true if the current thread is inside a non-cancelable section.
pub fn is_in_non_cancelable_section() -> bool {
	active(&NON_CANCELABLE_DEPTH)
}

pub(crate) fn write_actions_prohibited() -> bool {
	active(&WRITE_PROHIBITED_DEPTH)
}

/// Impatience only applies outside non-cancelable sections.
pub(crate) fn fails_fast() -> bool {
	is_impatient_reader() && !is_in_non_cancelable_section()
}

/// Cooperative cancellation checkpoint.
///
/// Returns [`AccessError::Cancelled`] when `token` is cancelled, unless the
/// current thread is inside a non-cancelable section.
pub fn check_canceled(token: &CancellationToken) -> Result<(), AccessError> {
	if token.is_cancelled() && !is_in_non_cancelable_section() {
		return Err(AccessError::Cancelled);
	}
	Ok(())
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn scopes_nest_and_unwind() {
		assert!(!is_impatient_reader());
		let outer = impatient_reader();
		let inner = impatient_reader();
		drop(inner);
		assert!(is_impatient_reader());
		drop(outer);
		assert!(!is_impatient_reader());
	}

	#[test]
	fn impatience_is_suppressed_in_non_cancelable_section() {
		let _impatient = impatient_reader();
		assert!(fails_fast());
		let section = non_cancelable_section();
		assert!(!fails_fast());
		drop(section);
		assert!(fails_fast());
	}

	#[test]
	fn check_canceled_respects_non_cancelable_section() {
		let token = CancellationToken::new();
		assert_eq!(check_canceled(&token), Ok(()));
		token.cancel();
		assert_eq!(check_canceled(&token), Err(AccessError::Cancelled));
		let _section = non_cancelable_section();
		assert_eq!(check_canceled(&token), Ok(()));
	}

	#[test]
	fn scopes_are_per_thread() {
		let _impatient = impatient_reader();
		let other = std::thread::spawn(is_impatient_reader).join().unwrap();
		assert!(!other);
		assert!(is_impatient_reader());
	}
}
