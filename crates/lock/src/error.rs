use thiserror::Error;

/// Reasons a read acquisition can fail instead of blocking.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum AccessError {
	/// The thread is an impatient reader and a write action is pending or running.
	#[error("cannot run read action: a write action is pending")]
	CannotRead,
	/// The cancellation token observed while waiting was cancelled.
	#[error("read acquisition cancelled")]
	Cancelled,
}

impl AccessError {
	/// Returns true for the cancellation outcome.
	pub const fn is_cancellation(self) -> bool {
		matches!(self, Self::Cancelled)
	}
}
