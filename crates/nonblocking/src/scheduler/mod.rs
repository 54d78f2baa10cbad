//! The non-blocking read scheduler.
//!
//! Tracks every live task for leak auditing, and tasks submitted with a
//! [`CoalesceKey`] by key so a newer submission cancels the older one before it
//! is dispatched.

use std::any::TypeId;
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};
use quire_invoker::LaterInvocator;
use quire_lock::Coordinator;
use quire_worker::{Executor, PooledExecutor};
use rustc_hash::FxHashMap;

use crate::handle::LiveTask;
use crate::{CoalesceKey, NonBlockingRead, ReadContext, ReadError, ScheduleError, SchedulerConfig};

static NEXT_SCHEDULER_ID: AtomicU64 = AtomicU64::new(1);

struct LiveEntry {
	task: Arc<dyn LiveTask>,
	key: Option<CoalesceKey>,
	unbounded: bool,
}

#[derive(Default)]
struct Registry {
	by_key: FxHashMap<CoalesceKey, u64>,
	live: FxHashMap<u64, LiveEntry>,
	unbounded_in_flight: usize,
}

pub(crate) struct Shared {
	id: u64,
	pub(crate) coordinator: Coordinator,
	pub(crate) invoker: LaterInvocator,
	pub(crate) config: SchedulerConfig,
	pub(crate) pooled: Arc<dyn Executor>,
	next_task_id: AtomicU64,
	registry: Mutex<Registry>,
	idle: Condvar,
}

impl Shared {
	pub(crate) fn next_task_id(&self) -> u64 {
		self.next_task_id.fetch_add(1, Ordering::Relaxed)
	}

	pub(crate) fn validate_key(&self, key: &CoalesceKey) -> Result<(), ScheduleError> {
		if key.is_zero_sized() {
			return Err(ScheduleError::InvalidCoalesceKey("zero-sized referents cannot tell submissions apart"));
		}
		if key.type_id() == TypeId::of::<ReadScheduler>() {
			return Err(ScheduleError::InvalidCoalesceKey("the scheduler itself would coalesce every submission"));
		}
		Ok(())
	}

	/// Tracks `task`, returning the same-key predecessor it supersedes.
	///
	/// The caller cancels the predecessor; the registry lock is released first
	/// since cancelling retires the predecessor through [`Shared::retire`].
	pub(crate) fn register(
		&self,
		task: Arc<dyn LiveTask>,
		key: Option<CoalesceKey>,
		unbounded: bool,
	) -> Result<Option<Arc<dyn LiveTask>>, ScheduleError> {
		let mut registry = self.registry.lock();
		if unbounded && registry.unbounded_in_flight >= self.config.max_unbounded_in_flight {
			let limit = self.config.max_unbounded_in_flight;
			tracing::error!(scheduler = self.id, limit, "nonblocking.unbounded_overflow");
			return Err(ScheduleError::TooManyUnboundedTasks { limit });
		}

		let id = task.id();
		let predecessor = key
			.clone()
			.and_then(|key| registry.by_key.insert(key, id))
			.and_then(|previous| registry.live.get(&previous))
			.map(|entry| Arc::clone(&entry.task));
		registry.live.insert(id, LiveEntry { task, key, unbounded });
		if unbounded {
			registry.unbounded_in_flight += 1;
		}
		Ok(predecessor)
	}

	/// Stops tracking task `id`.
	///
	/// The entry and key are dropped after the registry lock is released since
	/// dropping a key may drop the last reference to its referent.
	pub(crate) fn retire(&self, id: u64) {
		let released = {
			let mut registry = self.registry.lock();
			let Some(entry) = registry.live.remove(&id) else {
				return;
			};
			if entry.unbounded {
				registry.unbounded_in_flight -= 1;
			}
			let mapped = match &entry.key {
				Some(key) if registry.by_key.get(key) == Some(&id) => registry.by_key.remove_entry(key),
				_ => None,
			};
			if registry.live.is_empty() {
				self.idle.notify_all();
			}
			(entry, mapped)
		};
		drop(released);
	}
}

/// Schedules read computations off the dispatch thread.
///
/// Cloning yields another handle to the same scheduler.
#[derive(Clone)]
pub struct ReadScheduler {
	pub(crate) shared: Arc<Shared>,
}

impl fmt::Debug for ReadScheduler {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		let registry = self.shared.registry.lock();
		f.debug_struct("ReadScheduler")
			.field("id", &self.shared.id)
			.field("live", &registry.live.len())
			.field("keyed", &registry.by_key.len())
			.field("unbounded_in_flight", &registry.unbounded_in_flight)
			.finish()
	}
}

impl ReadScheduler {
	pub fn new(coordinator: Coordinator, invoker: LaterInvocator) -> Self {
		Self::with_config(coordinator, invoker, SchedulerConfig::default())
	}

	pub fn with_config(coordinator: Coordinator, invoker: LaterInvocator, config: SchedulerConfig) -> Self {
		let id = NEXT_SCHEDULER_ID.fetch_add(1, Ordering::Relaxed);
		tracing::debug!(scheduler = id, strict = config.strict, limit = config.max_unbounded_in_flight, "nonblocking.scheduler.new");
		Self {
			shared: Arc::new(Shared {
				id,
				coordinator,
				invoker,
				config,
				pooled: Arc::new(PooledExecutor::new(format!("nonblocking-{id}"))),
				next_task_id: AtomicU64::new(1),
				registry: Mutex::new(Registry::default()),
				idle: Condvar::new(),
			}),
		}
	}

	/// Starts building a read of `computation`.
	///
	/// The computation may run several times: once per attempt.
	pub fn non_blocking<T, F>(&self, computation: F) -> NonBlockingRead<T>
	where
		T: Send + 'static,
		F: Fn(&ReadContext<'_>) -> Result<T, ReadError> + Send + Sync + 'static,
	{
		NonBlockingRead::new(self.clone(), Arc::new(computation))
	}

	pub fn coordinator(&self) -> &Coordinator {
		&self.shared.coordinator
	}

	pub fn invoker(&self) -> &LaterInvocator {
		&self.shared.invoker
	}

	pub fn config(&self) -> &SchedulerConfig {
		&self.shared.config
	}

	/// The shared unbounded executor used by `submit_pooled`.
	pub fn pooled_executor(&self) -> Arc<dyn Executor> {
		Arc::clone(&self.shared.pooled)
	}

	/// Tasks submitted and not yet finished.
	pub fn live_task_count(&self) -> usize {
		self.shared.registry.lock().live.len()
	}

	/// Cancels every live task, returning how many were cancelled.
	pub fn cancel_all(&self) -> usize {
		let tasks: Vec<_> = self.shared.registry.lock().live.values().map(|entry| Arc::clone(&entry.task)).collect();
		let cancelled = tasks.iter().filter(|task| task.cancel()).count();
		tracing::debug!(scheduler = self.shared.id, cancelled, "nonblocking.cancel_all");
		cancelled
	}

	/// Blocks until no task is live or `timeout` passes. Returns true when idle.
	pub fn wait_for_idle(&self, timeout: Duration) -> bool {
		let deadline = Instant::now() + timeout;
		let mut registry = self.shared.registry.lock();
		while !registry.live.is_empty() {
			if self.shared.idle.wait_until(&mut registry, deadline).timed_out() {
				return registry.live.is_empty();
			}
		}
		true
	}
}
