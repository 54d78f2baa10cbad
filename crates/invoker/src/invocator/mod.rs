//! FIFO later-invocation queue gated by modality.
//!
//! # Flush pass
//!
//! A pass visits items in submission order. Expired items are dropped without
//! running. The first eligible item is removed and run, after which the scan
//! restarts from the head since running it may have changed the modality.
//! Ineligible items stay where they are. Items submitted after the pass began are
//! left for the next pass.
//!
//! The queue lock is never held while user code runs, so tasks may submit more
//! work or flush again from a nested event loop.

use std::collections::VecDeque;
use std::fmt;
use std::sync::Arc;
use std::thread::{self, ThreadId};
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};
use quire_modality::{ModalityStack, ModalityState};

use crate::LaterTask;

type ExpireCondition = Box<dyn Fn() -> bool + Send + 'static>;

struct QueuedInvocation {
	seq: u64,
	task: Box<dyn LaterTask>,
	modality: ModalityState,
	expire: Option<ExpireCondition>,
	submitted_at: Instant,
}

impl QueuedInvocation {
	fn is_expired(&self) -> bool {
		self.expire.as_ref().is_some_and(|expired| expired())
	}
}

#[derive(Default)]
struct Queue {
	next_seq: u64,
	/// Sorted by `seq`.
	items: VecDeque<QueuedInvocation>,
}

impl Queue {
	fn take_first(&mut self, from: u64, before: u64) -> Option<QueuedInvocation> {
		let index = self.items.iter().position(|item| item.seq >= from && item.seq < before)?;
		self.items.remove(index)
	}

	fn reinsert(&mut self, item: QueuedInvocation) {
		let index = self.items.partition_point(|queued| queued.seq < item.seq);
		self.items.insert(index, item);
	}
}

struct Shared {
	modality: ModalityStack,
	queue: Mutex<Queue>,
	submitted: Condvar,
}

/// Outcome of one [`LaterInvocator::flush`] pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FlushReport {
	/// Items that ran.
	pub executed: usize,
	/// Items dropped because their expiry condition held.
	pub expired: usize,
	/// Items still queued when the pass ended.
	pub deferred: usize,
}

/// Queue of work for the dispatch thread.
///
/// The dispatch thread is the owner of the [`ModalityStack`] the queue was built
/// with. Cloning yields another handle to the same queue.
#[derive(Clone)]
pub struct LaterInvocator {
	shared: Arc<Shared>,
}

impl fmt::Debug for LaterInvocator {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		let queue = self.shared.queue.lock();
		f.debug_struct("LaterInvocator")
			.field("dispatch_thread", &self.dispatch_thread())
			.field("queued", &queue.items.len())
			.field("next_seq", &queue.next_seq)
			.finish()
	}
}

impl LaterInvocator {
	/// Creates an empty queue drained on `modality`'s owner thread.
	pub fn new(modality: ModalityStack) -> Self {
		Self {
			shared: Arc::new(Shared {
				modality,
				queue: Mutex::new(Queue::default()),
				submitted: Condvar::new(),
			}),
		}
	}

	/// Returns the thread that drains this queue.
	pub fn dispatch_thread(&self) -> ThreadId {
		self.shared.modality.owner()
	}

	/// Returns true when called on the dispatch thread.
	pub fn is_dispatch_thread(&self) -> bool {
		thread::current().id() == self.dispatch_thread()
	}

	/// Returns the modality stack gating this queue.
	pub fn modality(&self) -> &ModalityStack {
		&self.shared.modality
	}

	/// Queues `task` to run once `modality` is eligible. Returns its sequence number.
	///
	/// Callable from any thread; never blocks on running work.
	pub fn invoke_later(&self, task: impl LaterTask, modality: ModalityState) -> u64 {
		self.enqueue(Box::new(task), modality, None)
	}

	/// Like [`LaterInvocator::invoke_later`], but the item is dropped unrun if
	/// `expired` returns true when the item is reached.
	pub fn invoke_later_expiring(&self, task: impl LaterTask, modality: ModalityState, expired: impl Fn() -> bool + Send + 'static) -> u64 {
		self.enqueue(Box::new(task), modality, Some(Box::new(expired)))
	}

	/// Runs one pass over the queue.
	///
	/// # Panics
	///
	/// Panics off the dispatch thread. A panicking task propagates out of the
	/// pass; items not yet reached stay queued.
	pub fn flush(&self) -> FlushReport {
		self.assert_dispatch_thread("flush");
		let boundary = self.shared.queue.lock().next_seq;
		let mut report = FlushReport::default();
		let mut cursor = 0;

		loop {
			let next = self.shared.queue.lock().take_first(cursor, boundary);
			let Some(item) = next else {
				break;
			};
			let seq = item.seq;
			if item.is_expired() {
				report.expired += 1;
				tracing::trace!(seq, "invoker.expired");
				item.task.expired();
				cursor = seq + 1;
				continue;
			}

			let current = self.shared.modality.current();
			if item.modality.is_eligible_under(&current) {
				report.executed += 1;
				tracing::trace!(seq, waited_us = item.submitted_at.elapsed().as_micros() as u64, "invoker.run");
				item.task.run();
				cursor = 0;
			} else {
				self.shared.queue.lock().reinsert(item);
				cursor = seq + 1;
			}
		}

		report.deferred = self.len();
		if report.executed > 0 || report.expired > 0 {
			tracing::debug!(
				executed = report.executed,
				expired = report.expired,
				deferred = report.deferred,
				"invoker.flush"
			);
		}
		report
	}

	/// Drops every queued item whose expiry condition holds, returning how many.
	pub fn purge_expired(&self) -> usize {
		self.assert_dispatch_thread("purge_expired");
		let items = std::mem::take(&mut self.shared.queue.lock().items);
		let (expired, kept): (Vec<_>, Vec<_>) = items.into_iter().partition(QueuedInvocation::is_expired);

		{
			let mut queue = self.shared.queue.lock();
			for item in kept.into_iter().rev() {
				queue.items.push_front(item);
			}
		}

		let count = expired.len();
		for item in expired {
			item.task.expired();
		}
		if count > 0 {
			tracing::debug!(count, "invoker.purge");
		}
		count
	}

	/// Parks the caller until work is queued or `timeout` passes.
	///
	/// Returns true if the queue is non-empty on return.
	pub fn wait_for_work(&self, timeout: Duration) -> bool {
		let mut queue = self.shared.queue.lock();
		if queue.items.is_empty() {
			let _ = self.shared.submitted.wait_for(&mut queue, timeout);
		}
		!queue.items.is_empty()
	}

	/// Number of queued items.
	pub fn len(&self) -> usize {
		self.shared.queue.lock().items.len()
	}

	/// Returns true when nothing is queued.
	pub fn is_empty(&self) -> bool {
		self.len() == 0
	}

	fn enqueue(&self, task: Box<dyn LaterTask>, modality: ModalityState, expire: Option<ExpireCondition>) -> u64 {
		let mut queue = self.shared.queue.lock();
		let seq = queue.next_seq;
		queue.next_seq += 1;
		queue.items.push_back(QueuedInvocation {
			seq,
			task,
			modality,
			expire,
			submitted_at: Instant::now(),
		});
		drop(queue);
		self.shared.submitted.notify_all();
		tracing::trace!(seq, "invoker.submit");
		seq
	}

	fn assert_dispatch_thread(&self, operation: &str) {
		assert!(
			self.is_dispatch_thread(),
			"LaterInvocator::{operation} called off the dispatch thread"
		);
	}
}
