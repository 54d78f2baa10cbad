use std::sync::Arc;

use quire_worker::ProgressIndicator;
use tokio_util::sync::CancellationToken;

use crate::ReadError;

pub(crate) type ExpireCondition = Arc<dyn Fn() -> bool + Send + Sync + 'static>;

/// Cancellation view handed to a running computation.
///
/// Long computations should call [`ReadContext::check_canceled`] periodically; a
/// pending write action cancels the attempt so the writer is not held up.
pub struct ReadContext<'a> {
	token: &'a CancellationToken,
	expiry: &'a [ExpireCondition],
	progress: Option<&'a ProgressIndicator>,
	attempt: u32,
}

impl<'a> ReadContext<'a> {
	pub(crate) fn new(token: &'a CancellationToken, expiry: &'a [ExpireCondition], progress: Option<&'a ProgressIndicator>, attempt: u32) -> Self {
		Self {
			token,
			expiry,
			progress,
			attempt,
		}
	}

	/// Returns true once the attempt should stop.
	pub fn is_canceled(&self) -> bool {
		self.token.is_cancelled() || self.expiry.iter().any(|expired| expired())
	}

	/// Returns [`ReadError::Cancelled`] once the attempt should stop.
	pub fn check_canceled(&self) -> Result<(), ReadError> {
		if self.is_canceled() {
			return Err(ReadError::Cancelled);
		}
		Ok(())
	}

	/// Zero-based attempt number; retries after `NotReady` or interruption increment it.
	pub fn attempt(&self) -> u32 {
		self.attempt
	}

	/// Progress indicator mirrored to the one passed to `wrap_progress`, if any.
	pub fn progress(&self) -> Option<&ProgressIndicator> {
		self.progress
	}

	/// Token cancelled together with this attempt.
	pub fn token(&self) -> &CancellationToken {
		self.token
	}
}
