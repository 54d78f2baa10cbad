use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::{Condvar, Mutex};
use tokio::sync::Notify;
use tokio_util::sync::CancellationToken;

use crate::TaskError;

/// Lifecycle of a scheduled read.
///
/// `Created → Queued → Running → {Completed | Cancelled | Failed}`. An attempt
/// parked on a constraint or a write action goes back to `Queued`. Terminal
/// states never change.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TaskState {
	Created,
	Queued,
	Running,
	Completed,
	Cancelled,
	Failed,
}

impl TaskState {
	pub const fn is_terminal(self) -> bool {
		matches!(self, Self::Completed | Self::Cancelled | Self::Failed)
	}
}

struct Slot<T> {
	state: TaskState,
	outcome: Option<Result<T, TaskError>>,
}

/// Result cell shared between a task and its handles.
pub(crate) struct TaskCore<T> {
	id: u64,
	cancel: CancellationToken,
	slot: Mutex<Slot<T>>,
	done: Condvar,
	finished: Notify,
}

impl<T> TaskCore<T> {
	pub(crate) fn new(id: u64, cancel: CancellationToken) -> Self {
		Self {
			id,
			cancel,
			slot: Mutex::new(Slot {
				state: TaskState::Created,
				outcome: None,
			}),
			done: Condvar::new(),
			finished: Notify::new(),
		}
	}

	pub(crate) fn id(&self) -> u64 {
		self.id
	}

	pub(crate) fn token(&self) -> &CancellationToken {
		&self.cancel
	}

	pub(crate) fn state(&self) -> TaskState {
		self.slot.lock().state
	}

	pub(crate) fn is_done(&self) -> bool {
		self.state().is_terminal()
	}

	/// Moves to a non-terminal state unless the task already finished.
	pub(crate) fn advance(&self, state: TaskState) {
		debug_assert!(!state.is_terminal());
		let mut slot = self.slot.lock();
		if !slot.state.is_terminal() {
			slot.state = state;
		}
	}

	/// Stores the outcome. Returns false if the task had already finished.
	pub(crate) fn complete(&self, outcome: Result<T, TaskError>) -> bool {
		let mut slot = self.slot.lock();
		if slot.state.is_terminal() {
			return false;
		}
		slot.state = match &outcome {
			Ok(_) => TaskState::Completed,
			Err(TaskError::Cancelled) => TaskState::Cancelled,
			Err(_) => TaskState::Failed,
		};
		slot.outcome = Some(outcome);
		drop(slot);
		self.done.notify_all();
		self.finished.notify_waiters();
		true
	}

	pub(crate) fn cancel(&self) -> bool {
		self.cancel.cancel();
		self.complete(Err(TaskError::Cancelled))
	}
}

/// Type-erased view of a live task, as tracked by the scheduler.
pub(crate) trait LiveTask: Send + Sync {
	fn id(&self) -> u64;

	/// Cancels the task and stops tracking it. Returns false if it had already finished.
	fn cancel(&self) -> bool;
}

/// Handle to a submitted read.
///
/// Cloning yields another handle to the same task. Dropping every handle does
/// not cancel the task.
pub struct CancellableHandle<T> {
	core: Arc<TaskCore<T>>,
	task: Arc<dyn LiveTask>,
}

impl<T> Clone for CancellableHandle<T> {
	fn clone(&self) -> Self {
		Self {
			core: Arc::clone(&self.core),
			task: Arc::clone(&self.task),
		}
	}
}

impl<T> fmt::Debug for CancellableHandle<T> {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.debug_struct("CancellableHandle")
			.field("id", &self.core.id)
			.field("state", &self.state())
			.finish()
	}
}

impl<T> CancellableHandle<T> {
	pub(crate) fn new(core: Arc<TaskCore<T>>, task: Arc<dyn LiveTask>) -> Self {
		Self { core, task }
	}

	pub fn id(&self) -> u64 {
		self.core.id
	}

	/// Cancels the task. Returns false if it had already finished.
	pub fn cancel(&self) -> bool {
		self.task.cancel()
	}

	pub fn state(&self) -> TaskState {
		self.core.state()
	}

	pub fn is_done(&self) -> bool {
		self.core.is_done()
	}

	pub fn is_cancelled(&self) -> bool {
		self.state() == TaskState::Cancelled
	}

	/// Blocks until the task finishes or `timeout` passes. Returns true if finished.
	pub fn wait(&self, timeout: Duration) -> bool {
		let mut slot = self.core.slot.lock();
		if !slot.state.is_terminal() {
			let _ = self.core.done.wait_while_for(&mut slot, |slot| !slot.state.is_terminal(), timeout);
		}
		slot.state.is_terminal()
	}

	/// Takes the outcome of a finished task. Returns `None` while running or once taken.
	pub fn take_result(&self) -> Option<Result<T, TaskError>> {
		self.core.slot.lock().outcome.take()
	}

	/// Blocks until the task finishes and returns its outcome.
	///
	/// # Panics
	///
	/// Panics if the outcome was already taken through another handle.
	pub fn join(self) -> Result<T, TaskError> {
		let mut slot = self.core.slot.lock();
		self.core.done.wait_while(&mut slot, |slot| !slot.state.is_terminal());
		slot.outcome
			.take()
			.unwrap_or_else(|| panic!("outcome of task {} already taken", self.core.id))
	}

	/// Resolves once the task reaches a terminal state.
	pub async fn finished(&self) -> TaskState {
		loop {
			let notified = self.core.finished.notified();
			let state = self.state();
			if state.is_terminal() {
				return state;
			}
			notified.await;
		}
	}
}
