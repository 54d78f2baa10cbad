use std::sync::Arc;
use std::thread;

use quire_modality::ModalityState;
use quire_worker::{Disposable, Executor, ProgressIndicator};
use tokio_util::sync::CancellationToken;

use crate::handle::{CancellableHandle, LiveTask, TaskCore};
use crate::task::{Computation, ReadParts, ReadTask, UiFinish};
use crate::{CoalesceKey, ReadConstraint, ReadContext, ReadError, ReadScheduler, ScheduleError, TaskError};

/// Builder for one non-blocking read, obtained from [`ReadScheduler::non_blocking`].
#[must_use = "a non-blocking read does nothing until it is submitted or executed"]
pub struct NonBlockingRead<T> {
	scheduler: ReadScheduler,
	parts: ReadParts<T>,
	key: Option<CoalesceKey>,
	progress: Option<ProgressIndicator>,
	ui: Option<UiFinish<T>>,
}

impl<T: Send + 'static> NonBlockingRead<T> {
	pub(crate) fn new(scheduler: ReadScheduler, computation: Computation<T>) -> Self {
		Self {
			scheduler,
			parts: ReadParts {
				computation,
				expiry: Vec::new(),
				constraints: Vec::new(),
			},
			key: None,
			progress: None,
			ui: None,
		}
	}

	/// Cancels any live read submitted under the same key when this one is submitted.
	pub fn coalesce_by(mut self, key: CoalesceKey) -> Self {
		self.key = Some(key);
		self
	}

	/// Cancels the read once `expired` returns true at a checkpoint.
	pub fn expire_when(mut self, expired: impl Fn() -> bool + Send + Sync + 'static) -> Self {
		self.parts.expiry.push(Arc::new(expired));
		self
	}

	/// Cancels the read once `disposable` is disposed.
	pub fn expire_with(self, disposable: &Disposable) -> Self {
		let disposable = disposable.clone();
		self.expire_when(move || disposable.is_disposed())
	}

	/// Delays each attempt until `constraint` holds.
	pub fn with_constraint(mut self, constraint: impl ReadConstraint) -> Self {
		self.parts.constraints.push(Arc::new(constraint));
		self
	}

	/// Ties the read to `progress`.
	///
	/// Cancelling `progress` cancels the read. The computation reports through a
	/// wrapper whose updates are mirrored to `progress`.
	pub fn wrap_progress(mut self, progress: &ProgressIndicator) -> Self {
		self.progress = Some(progress.wrap());
		self
	}

	/// Runs `continuation` with the result on the dispatch thread once `modality`
	/// is eligible; the handle completes after it returns.
	pub fn finish_on_ui_thread(mut self, modality: ModalityState, continuation: impl FnOnce(&T) + Send + 'static) -> Self {
		self.ui = Some(UiFinish {
			modality,
			continuation: Box::new(continuation),
		});
		self
	}

	/// Submits to the scheduler's shared pool.
	pub fn submit_pooled(self) -> Result<CancellableHandle<T>, ScheduleError> {
		let executor = self.scheduler.pooled_executor();
		self.submit(executor)
	}

	/// Submits to `executor`.
	///
	/// A live read with the same coalesce key is cancelled before this one is
	/// dispatched.
	pub fn submit(self, executor: Arc<dyn Executor>) -> Result<CancellableHandle<T>, ScheduleError> {
		let shared = Arc::clone(&self.scheduler.shared);
		if let Some(key) = &self.key {
			shared.validate_key(key)?;
		}

		let id = shared.next_task_id();
		let token = self.progress.as_ref().map_or_else(CancellationToken::new, ProgressIndicator::token);
		let core = Arc::new(TaskCore::new(id, token));
		let unbounded = !executor.is_bounded();
		let executor_name = executor.name().to_string();
		let task = Arc::new(ReadTask::new(Arc::clone(&core), Arc::clone(&shared), self.parts, self.progress, self.ui, executor));
		let live: Arc<dyn LiveTask> = task.clone();

		let keyed = self.key.is_some();
		if let Some(previous) = shared.register(Arc::clone(&live), self.key, unbounded)? {
			previous.cancel();
			tracing::debug!(task = id, superseded = previous.id(), "nonblocking.coalesced");
		}
		tracing::debug!(task = id, executor = %executor_name, keyed, "nonblocking.submit");
		task.dispatch();
		Ok(CancellableHandle::new(core, live))
	}

	/// Runs the read on the calling thread.
	///
	/// Runs inline when the caller already holds read access. Constraints are
	/// waited for by sleeping, except while holding read access where waiting
	/// could never succeed. Failures are returned, not logged. The coalesce key
	/// is not used in this mode.
	pub fn execute_synchronously(self) -> Result<T, TaskError> {
		let coordinator = self.scheduler.coordinator();
		let interval = self.scheduler.shared.config.retry_interval();
		let token = self.progress.as_ref().map_or_else(CancellationToken::new, ProgressIndicator::token);
		let parts = &self.parts;
		let mut attempt = 0;

		loop {
			if token.is_cancelled() || parts.is_expired() {
				return Err(TaskError::Cancelled);
			}
			let holds_read = coordinator.is_read_access_allowed();
			if let Some(constraint) = parts.unsatisfied_constraint() {
				if holds_read {
					return Err(TaskError::ConstraintsUnsatisfied);
				}
				tracing::trace!(constraint = constraint.name(), "nonblocking.sync.constraint_wait");
				thread::sleep(interval);
				continue;
			}

			let ticket = if holds_read {
				None
			} else {
				match coordinator.acquire_read_cancellable(&token) {
					Ok(ticket) => Some(ticket),
					Err(_) => return Err(TaskError::Cancelled),
				}
			};
			let context = ReadContext::new(&token, &parts.expiry, self.progress.as_ref(), attempt);
			let result = (parts.computation)(&context);
			drop(ticket);
			attempt += 1;

			match result {
				Ok(value) => {
					if let Some(ui) = self.ui {
						(ui.continuation)(&value);
					}
					return Ok(value);
				}
				Err(ReadError::NotReady) => {
					tracing::trace!(attempt, "nonblocking.sync.retry");
					thread::yield_now();
				}
				Err(ReadError::Cancelled) => return Err(TaskError::Cancelled),
				Err(ReadError::Failed(err)) => return Err(TaskError::Failed(Arc::new(err))),
			}
		}
	}
}
