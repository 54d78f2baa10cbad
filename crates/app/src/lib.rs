//! Coordinated access to a shared, mutable model.
//!
//! [`Application`] binds a read/write [`Coordinator`], a [`ModalityStack`], the
//! later-invocation queue and the non-blocking [`ReadScheduler`] to one dispatch
//! thread. That thread is the only one allowed to write, to change modality and
//! to run deferred work.

mod config;

use std::fmt;
use std::thread;
use std::time::{Duration, Instant};

pub use config::{ApplicationConfig, ConfigError};
pub use quire_invoker::{FlushReport, LaterInvocator, LaterTask};
pub use quire_lock::{AccessError, Coordinator, CoordinatorConfig, ReadActionListener, WriteActionListener};
pub use quire_modality::{ModalEntity, ModalScope, ModalityStack, ModalityState};
pub use quire_nonblocking::{
	CancellableHandle, CoalesceKey, NonBlockingRead, ReadConstraint, ReadContext, ReadError, ReadScheduler, ScheduleError, SchedulerConfig,
	TaskError, TaskState,
};
pub use quire_worker::{Disposable, Executor, PooledExecutor, ProgressIndicator, SequentialExecutor};

/// The wired-up components for one dispatch thread.
///
/// Cloning yields another handle to the same components.
#[derive(Clone)]
pub struct Application {
	coordinator: Coordinator,
	invoker: LaterInvocator,
	scheduler: ReadScheduler,
	config: ApplicationConfig,
}

impl fmt::Debug for Application {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.debug_struct("Application")
			.field("coordinator", &self.coordinator.id())
			.field("dispatch_thread", &self.invoker.dispatch_thread())
			.field("queued", &self.invoker.len())
			.field("scheduler", &self.scheduler)
			.finish()
	}
}

impl Default for Application {
	fn default() -> Self {
		Self::new()
	}
}

impl Application {
	/// Creates an application whose dispatch thread is the calling thread.
	pub fn new() -> Self {
		Self::with_config(ApplicationConfig::default())
	}

	/// Creates an application with explicit configuration, bound to the calling thread.
	pub fn with_config(config: ApplicationConfig) -> Self {
		let dispatch = thread::current().id();
		let coordinator = Coordinator::with_config(dispatch, config.coordinator.clone());
		let invoker = LaterInvocator::new(ModalityStack::with_owner(dispatch));
		let scheduler = ReadScheduler::with_config(coordinator.clone(), invoker.clone(), config.scheduler.clone());
		tracing::debug!(coordinator = coordinator.id(), ?dispatch, "app.new");
		Self {
			coordinator,
			invoker,
			scheduler,
			config,
		}
	}

	pub fn coordinator(&self) -> &Coordinator {
		&self.coordinator
	}

	pub fn invoker(&self) -> &LaterInvocator {
		&self.invoker
	}

	pub fn modality(&self) -> &ModalityStack {
		self.invoker.modality()
	}

	pub fn scheduler(&self) -> &ReadScheduler {
		&self.scheduler
	}

	pub fn config(&self) -> &ApplicationConfig {
		&self.config
	}

	pub fn is_dispatch_thread(&self) -> bool {
		self.invoker.is_dispatch_thread()
	}

	/// Runs `work` under read access.
	///
	/// Fails with [`AccessError::CannotRead`] for an impatient reader while a
	/// write is pending.
	pub fn run_read_action<R>(&self, work: impl FnOnce() -> R) -> Result<R, AccessError> {
		self.coordinator.run_read_action(work)
	}

	/// Runs `work` under write access.
	///
	/// # Panics
	///
	/// Panics off the dispatch thread or inside a read action.
	pub fn run_write_action<R>(&self, work: impl FnOnce() -> R) -> R {
		self.coordinator.run_write_action(work)
	}

	/// Queues `work` for the dispatch thread.
	///
	/// Without an explicit modality, work queued on the dispatch thread is tagged
	/// with the current modality and work queued elsewhere with the non-modal state.
	pub fn invoke_later(&self, work: impl LaterTask, modality: Option<ModalityState>) -> u64 {
		let modality = modality.unwrap_or_else(|| self.default_modality());
		self.invoker.invoke_later(work, modality)
	}

	/// Like [`Application::invoke_later`], dropping `work` once `expired` holds.
	pub fn invoke_later_expiring(&self, work: impl LaterTask, modality: Option<ModalityState>, expired: impl Fn() -> bool + Send + 'static) -> u64 {
		let modality = modality.unwrap_or_else(|| self.default_modality());
		self.invoker.invoke_later_expiring(work, modality, expired)
	}

	/// Starts building a non-blocking read of `computation`.
	pub fn non_blocking<T, F>(&self, computation: F) -> NonBlockingRead<T>
	where
		T: Send + 'static,
		F: Fn(&ReadContext<'_>) -> Result<T, ReadError> + Send + Sync + 'static,
	{
		self.scheduler.non_blocking(computation)
	}

	pub fn enter_modal(&self, entity: &ModalEntity) {
		self.modality().enter_modal(entity);
	}

	pub fn leave_modal(&self, entity: &ModalEntity) {
		self.modality().leave_modal(entity);
	}

	/// The current modality. Dispatch thread only.
	pub fn current_modality(&self) -> ModalityState {
		self.modality().current()
	}

	/// Runs every eligible queued item. Dispatch thread only.
	pub fn flush(&self) -> FlushReport {
		self.invoker.flush()
	}

	/// Waits up to `timeout` for queued work, then flushes. Dispatch thread only.
	pub fn pump(&self, timeout: Duration) -> FlushReport {
		self.invoker.wait_for_work(timeout);
		self.invoker.flush()
	}

	/// Pumps the queue until `done` holds or `timeout` passes. Returns whether `done` held.
	pub fn pump_until(&self, timeout: Duration, mut done: impl FnMut() -> bool) -> bool {
		let deadline = Instant::now() + timeout;
		loop {
			let report = self.invoker.flush();
			if done() {
				return true;
			}
			let remaining = deadline.saturating_duration_since(Instant::now());
			if remaining.is_zero() {
				return false;
			}
			// Everything queued is ineligible, so wait_for_work would return at once.
			if report.executed == 0 && !self.invoker.is_empty() {
				thread::sleep(remaining.min(Duration::from_millis(1)));
			} else {
				self.invoker.wait_for_work(remaining.min(Duration::from_millis(5)));
			}
		}
	}

	fn default_modality(&self) -> ModalityState {
		if self.is_dispatch_thread() {
			self.current_modality()
		} else {
			ModalityState::non_modal()
		}
	}
}

#[cfg(test)]
mod tests;
