//! Attempt loop of an asynchronously submitted read.
//!
//! Each attempt runs on the task's executor: check expiry, wait out unsatisfied
//! constraints on a timer, acquire read access, run the computation and then
//! route the outcome. `NotReady` redispatches at once. An attempt cancelled by
//! a pending write action is redispatched once the write has completed.

use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};

use parking_lot::Mutex;
use quire_invoker::LaterTask;
use quire_lock::WriteActionListener;
use quire_modality::ModalityState;
use quire_worker::{Executor, ProgressIndicator, panic_message};
use tokio_util::sync::CancellationToken;

use crate::context::ExpireCondition;
use crate::handle::{LiveTask, TaskCore};
use crate::scheduler::Shared;
use crate::{ReadConstraint, ReadContext, ReadError, TaskError, TaskState};

pub(crate) type Computation<T> = Arc<dyn Fn(&ReadContext<'_>) -> Result<T, ReadError> + Send + Sync + 'static>;

/// Continuation run on the dispatch thread with the computed value.
pub(crate) struct UiFinish<T> {
	pub(crate) modality: ModalityState,
	pub(crate) continuation: Box<dyn FnOnce(&T) + Send + 'static>,
}

/// The parts of a read shared by asynchronous and synchronous execution.
pub(crate) struct ReadParts<T> {
	pub(crate) computation: Computation<T>,
	pub(crate) expiry: Vec<ExpireCondition>,
	pub(crate) constraints: Vec<Arc<dyn ReadConstraint>>,
}

impl<T> ReadParts<T> {
	pub(crate) fn is_expired(&self) -> bool {
		self.expiry.iter().any(|expired| expired())
	}

	pub(crate) fn unsatisfied_constraint(&self) -> Option<&dyn ReadConstraint> {
		self.constraints.iter().find(|constraint| !constraint.is_satisfied()).map(|constraint| &**constraint)
	}
}

enum Attempt<T> {
	Done(T),
	NotReady,
	Interrupted,
	Failed(anyhow::Error),
	Panicked(String),
}

/// Cancels the running attempt as soon as a write action is requested.
struct WriteInterrupt {
	attempt: CancellationToken,
	fired: AtomicBool,
}

impl WriteActionListener for WriteInterrupt {
	fn before_write_action_start(&self, _marker: &'static str) {
		self.fired.store(true, Ordering::Release);
		self.attempt.cancel();
	}
}

pub(crate) struct ReadTask<T> {
	core: Arc<TaskCore<T>>,
	shared: Arc<Shared>,
	parts: ReadParts<T>,
	progress: Option<ProgressIndicator>,
	ui: Mutex<Option<UiFinish<T>>>,
	executor: Arc<dyn Executor>,
	attempts: AtomicU32,
	retired: AtomicBool,
}

impl<T: Send + 'static> ReadTask<T> {
	pub(crate) fn new(
		core: Arc<TaskCore<T>>,
		shared: Arc<Shared>,
		parts: ReadParts<T>,
		progress: Option<ProgressIndicator>,
		ui: Option<UiFinish<T>>,
		executor: Arc<dyn Executor>,
	) -> Self {
		Self {
			core,
			shared,
			parts,
			progress,
			ui: Mutex::new(ui),
			executor,
			attempts: AtomicU32::new(0),
			retired: AtomicBool::new(false),
		}
	}

	/// Hands the next attempt to the executor.
	pub(crate) fn dispatch(self: &Arc<Self>) {
		self.core.advance(TaskState::Queued);
		let task = Arc::clone(self);
		self.executor.execute(Box::new(move || task.attempt()));
	}

	fn attempt(self: Arc<Self>) {
		if self.core.is_done() {
			self.retire();
			return;
		}
		if self.should_stop() {
			self.cancel_now("expired");
			return;
		}
		if let Some(constraint) = self.parts.unsatisfied_constraint() {
			tracing::trace!(task = self.core.id(), constraint = constraint.name(), "nonblocking.constraint.wait");
			let task = Arc::clone(&self);
			drop(quire_worker::spawn_after(self.shared.config.retry_interval(), move || task.dispatch()));
			return;
		}

		self.core.advance(TaskState::Running);
		let attempt = self.attempts.fetch_add(1, Ordering::Relaxed);
		let interrupt = Arc::new(WriteInterrupt {
			attempt: self.core.token().child_token(),
			fired: AtomicBool::new(false),
		});
		let listener: Arc<dyn WriteActionListener> = interrupt.clone();
		self.shared.coordinator.add_write_listener(Arc::clone(&listener));
		let outcome = self.run_attempt(&interrupt.attempt, attempt);
		self.shared.coordinator.remove_write_listener(&listener);

		match outcome {
			Attempt::Done(value) => self.deliver(value),
			Attempt::NotReady => {
				tracing::trace!(task = self.core.id(), attempt, "nonblocking.retry");
				if self.should_stop() {
					self.cancel_now("expired");
				} else {
					self.dispatch();
				}
			}
			Attempt::Interrupted => {
				if self.core.is_done() {
					self.retire();
				} else if self.should_stop() {
					self.cancel_now("cancelled");
				} else if interrupt.fired.load(Ordering::Acquire) {
					tracing::trace!(task = self.core.id(), attempt, "nonblocking.write_interrupt");
					self.core.advance(TaskState::Queued);
					let task = Arc::clone(&self);
					self.shared.coordinator.run_when_write_action_completed(move || task.dispatch());
				} else {
					self.cancel_now("cancelled");
				}
			}
			Attempt::Failed(err) => self.fail(TaskError::Failed(Arc::new(err))),
			Attempt::Panicked(message) => self.fail(TaskError::Panicked(message)),
		}
	}

	fn run_attempt(&self, token: &CancellationToken, attempt: u32) -> Attempt<T> {
		let ticket = match self.shared.coordinator.acquire_read_cancellable(token) {
			Ok(ticket) => ticket,
			Err(_) => return Attempt::Interrupted,
		};
		let context = ReadContext::new(token, &self.parts.expiry, self.progress.as_ref(), attempt);
		let result = panic::catch_unwind(AssertUnwindSafe(|| (self.parts.computation)(&context)));
		drop(ticket);

		match result {
			Ok(Ok(value)) => Attempt::Done(value),
			Ok(Err(ReadError::NotReady)) => Attempt::NotReady,
			Ok(Err(ReadError::Cancelled)) => Attempt::Interrupted,
			Ok(Err(ReadError::Failed(err))) => Attempt::Failed(err),
			Err(payload) => Attempt::Panicked(panic_message(&*payload)),
		}
	}

	fn deliver(self: Arc<Self>, value: T) {
		let ui = self.ui.lock().take();
		let Some(ui) = ui else {
			if self.core.complete(Ok(value)) {
				tracing::trace!(task = self.core.id(), "nonblocking.completed");
			}
			self.retire();
			return;
		};

		let watched = Arc::clone(&self);
		self.shared.invoker.invoke_later_expiring(
			UiCompletion {
				task: Arc::clone(&self),
				value,
				continuation: ui.continuation,
			},
			ui.modality,
			move || watched.core.is_done() || watched.should_stop(),
		);
	}

	fn fail(&self, err: TaskError) {
		if self.core.complete(Err(err.clone())) {
			tracing::error!(task = self.core.id(), error = %err, "nonblocking.task.failed");
			if self.shared.config.strict {
				let message = err.to_string();
				self.shared.invoker.invoke_later(move || rethrow(message), ModalityState::any());
			}
		}
		self.retire();
	}

	fn should_stop(&self) -> bool {
		self.core.token().is_cancelled() || self.parts.is_expired()
	}

	fn cancel_now(&self, reason: &'static str) {
		if self.core.cancel() {
			tracing::debug!(task = self.core.id(), reason, "nonblocking.task.cancelled");
		}
		self.retire();
	}

	fn retire(&self) {
		if !self.retired.swap(true, Ordering::AcqRel) {
			self.shared.retire(self.core.id());
		}
	}
}

impl<T: Send + 'static> LiveTask for ReadTask<T> {
	fn id(&self) -> u64 {
		self.core.id()
	}

	fn cancel(&self) -> bool {
		let cancelled = self.core.cancel();
		self.retire();
		cancelled
	}
}

fn rethrow(message: String) {
	panic!("non-blocking read failed: {message}");
}

struct UiCompletion<T> {
	task: Arc<ReadTask<T>>,
	value: T,
	continuation: Box<dyn FnOnce(&T) + Send + 'static>,
}

impl<T: Send + 'static> LaterTask for UiCompletion<T> {
	fn run(self: Box<Self>) {
		let UiCompletion { task, value, continuation } = *self;
		if task.core.is_done() {
			task.retire();
			return;
		}
		match panic::catch_unwind(AssertUnwindSafe(|| continuation(&value))) {
			Ok(()) => {
				task.core.complete(Ok(value));
				task.retire();
			}
			Err(payload) => {
				task.core.complete(Err(TaskError::Panicked(panic_message(&*payload))));
				task.retire();
				panic::resume_unwind(payload);
			}
		}
	}

	fn expired(self: Box<Self>) {
		self.task.cancel_now("expired");
	}
}
