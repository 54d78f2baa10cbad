//! Executors that run submitted jobs off the calling thread.

use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use tokio::sync::mpsc;

use crate::{TaskClass, spawn, spawn_blocking};

/// A unit of work handed to an [`Executor`].
pub type Job = Box<dyn FnOnce() + Send + 'static>;

/// Runs jobs asynchronously.
pub trait Executor: Send + Sync + 'static {
	/// Schedules `job`. Must not run it on the calling thread.
	fn execute(&self, job: Job);

	/// Returns true if the executor caps how many jobs run at once.
	fn is_bounded(&self) -> bool;

	/// Diagnostic name.
	fn name(&self) -> &str;
}

/// Executor backed by the worker runtime's blocking pool.
///
/// Unbounded: every job gets a pool thread.
#[derive(Debug, Clone)]
pub struct PooledExecutor {
	name: Arc<str>,
}

impl PooledExecutor {
	pub fn new(name: impl AsRef<str>) -> Self {
		Self { name: Arc::from(name.as_ref()) }
	}
}

impl Default for PooledExecutor {
	fn default() -> Self {
		Self::new("pooled")
	}
}

impl Executor for PooledExecutor {
	fn execute(&self, job: Job) {
		drop(spawn_blocking(TaskClass::ReadAction, job));
	}

	fn is_bounded(&self) -> bool {
		false
	}

	fn name(&self) -> &str {
		&self.name
	}
}

/// Executor that runs its jobs one at a time, in submission order.
///
/// A lane task receives jobs over a channel and awaits each one on the blocking
/// pool before starting the next. Dropping the executor closes the lane after
/// the queued jobs have run.
pub struct SequentialExecutor {
	name: Arc<str>,
	tx: mpsc::UnboundedSender<Job>,
	queued: Arc<AtomicUsize>,
}

impl fmt::Debug for SequentialExecutor {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.debug_struct("SequentialExecutor")
			.field("name", &self.name)
			.field("queued", &self.queued())
			.finish()
	}
}

impl SequentialExecutor {
	pub fn new(name: impl AsRef<str>) -> Self {
		let name: Arc<str> = Arc::from(name.as_ref());
		let (tx, mut rx) = mpsc::unbounded_channel::<Job>();
		let queued = Arc::new(AtomicUsize::new(0));

		let lane = Arc::clone(&name);
		let remaining = Arc::clone(&queued);
		drop(spawn(TaskClass::Sequential, async move {
			while let Some(job) = rx.recv().await {
				if let Err(err) = spawn_blocking(TaskClass::Sequential, job).await {
					let message = crate::join_error_panic_message(err).unwrap_or_else(|| "<cancelled>".to_string());
					tracing::error!(lane = %lane, error = %message, "worker.sequential.job_failed");
				}
				remaining.fetch_sub(1, Ordering::AcqRel);
			}
			tracing::debug!(lane = %lane, "worker.sequential.closed");
		}));

		Self { name, tx, queued }
	}

	/// Jobs submitted but not yet finished.
	pub fn queued(&self) -> usize {
		self.queued.load(Ordering::Acquire)
	}
}

impl Executor for SequentialExecutor {
	fn execute(&self, job: Job) {
		self.queued.fetch_add(1, Ordering::AcqRel);
		if self.tx.send(job).is_err() {
			self.queued.fetch_sub(1, Ordering::AcqRel);
			tracing::warn!(lane = %self.name, "worker.sequential.rejected");
		}
	}

	fn is_bounded(&self) -> bool {
		true
	}

	fn name(&self) -> &str {
		&self.name
	}
}

#[cfg(test)]
mod tests {
	use std::sync::mpsc as std_mpsc;
	use std::time::Duration;

	use parking_lot::Mutex;

	use super::*;

	#[test]
	fn pooled_executor_runs_jobs_off_thread() {
		let executor = PooledExecutor::default();
		let (tx, rx) = std_mpsc::channel();
		let caller = std::thread::current().id();
		executor.execute(Box::new(move || {
			tx.send(std::thread::current().id()).unwrap();
		}));
		let ran_on = rx.recv_timeout(Duration::from_secs(5)).unwrap();
		assert_ne!(ran_on, caller);
		assert!(!executor.is_bounded());
	}

	#[test]
	fn sequential_executor_preserves_order_without_overlap() {
		let executor = SequentialExecutor::new("lane");
		let log = Arc::new(Mutex::new(Vec::new()));
		let running = Arc::new(AtomicUsize::new(0));
		let (done_tx, done_rx) = std_mpsc::channel();

		for index in 0..8 {
			let log = Arc::clone(&log);
			let running = Arc::clone(&running);
			let done = done_tx.clone();
			executor.execute(Box::new(move || {
				assert_eq!(running.fetch_add(1, Ordering::SeqCst), 0, "jobs overlapped");
				std::thread::sleep(Duration::from_millis(2));
				log.lock().push(index);
				running.fetch_sub(1, Ordering::SeqCst);
				done.send(()).unwrap();
			}));
		}
		for _ in 0..8 {
			done_rx.recv_timeout(Duration::from_secs(5)).unwrap();
		}

		assert_eq!(*log.lock(), (0..8).collect::<Vec<_>>());
		assert!(executor.is_bounded());
	}

	#[test]
	fn sequential_lane_survives_a_panicking_job() {
		fn explode() {
			panic!("lane job");
		}

		let executor = SequentialExecutor::new("lane");
		let (tx, rx) = std_mpsc::channel();
		executor.execute(Box::new(explode));
		executor.execute(Box::new(move || tx.send(()).unwrap()));
		rx.recv_timeout(Duration::from_secs(5)).unwrap();
	}
}
