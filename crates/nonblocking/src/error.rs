//! Error types for non-blocking reads.

use std::sync::Arc;

use quire_lock::AccessError;
use thiserror::Error;

/// Outcome of one computation attempt other than success.
#[derive(Debug, Error)]
pub enum ReadError {
	/// The computation's inputs are not ready; the attempt is retried.
	#[error("computation not ready yet")]
	NotReady,

	/// The computation observed cancellation and gave up.
	#[error("computation cancelled")]
	Cancelled,

	/// The computation failed.
	#[error(transparent)]
	Failed(#[from] anyhow::Error),
}

impl From<AccessError> for ReadError {
	fn from(_: AccessError) -> Self {
		Self::Cancelled
	}
}

/// Terminal failure of a scheduled read.
#[derive(Debug, Clone, Error)]
pub enum TaskError {
	/// The task was cancelled, superseded or expired.
	#[error("task cancelled")]
	Cancelled,

	/// The computation returned an error.
	#[error("task failed: {0}")]
	Failed(Arc<anyhow::Error>),

	/// The computation panicked.
	#[error("task panicked: {0}")]
	Panicked(String),

	/// A synchronous run found its constraints unsatisfied while the caller held
	/// read access, so waiting could never succeed.
	#[error("read constraints unsatisfied while holding read access")]
	ConstraintsUnsatisfied,
}

impl TaskError {
	/// Returns true for [`TaskError::Cancelled`].
	pub fn is_cancelled(&self) -> bool {
		matches!(self, Self::Cancelled)
	}
}

/// Submission rejected before any work was scheduled.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ScheduleError {
	/// The coalesce key cannot distinguish unrelated submissions.
	#[error("invalid coalesce key: {0}")]
	InvalidCoalesceKey(&'static str),

	/// Too many tasks are in flight on unbounded executors.
	#[error("more than {limit} non-blocking reads in flight on unbounded executors")]
	TooManyUnboundedTasks {
		/// Configured ceiling.
		limit: usize,
	},
}
