//! The read/write coordinator.
//!
//! # Policy
//!
//! - **Write preference**: `acquire_write` marks the write pending before it waits
//!   for existing readers. Readers arriving from other threads while a write is
//!   pending or running wait until it has been released.
//! - **Reentrancy**: a thread holding read or write access is always admitted as a
//!   reader again. The write thread may nest write tickets.
//! - **Fairness**: readers released by a finished write are woken together and
//!   admitted in no particular order.

use std::fmt;
use std::marker::PhantomData;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::thread::{self, ThreadId};
use std::time::Instant;

use parking_lot::{Condvar, Mutex, RwLock};
use tokio_util::sync::CancellationToken;

use crate::state::LockState;
use crate::{AccessError, CoordinatorConfig, DEFAULT_WRITE_MARKER, ReadActionListener, WriteActionListener, scope};

type Followup = Box<dyn FnOnce() + Send + 'static>;

static NEXT_COORDINATOR_ID: AtomicU64 = AtomicU64::new(1);

struct Shared {
	id: u64,
	write_thread: ThreadId,
	config: CoordinatorConfig,
	state: Mutex<LockState>,
	/// Signalled when the last read ticket is released.
	readers_drained: Condvar,
	/// Signalled when a top-level write releases.
	write_released: Condvar,
	read_listeners: RwLock<Vec<Arc<dyn ReadActionListener>>>,
	write_listeners: RwLock<Vec<Arc<dyn WriteActionListener>>>,
	/// Listener snapshot taken when the running top-level write started.
	active_write_listeners: Mutex<Vec<Arc<dyn WriteActionListener>>>,
	followups: Mutex<Vec<Followup>>,
}

/// Handle to one exclusive-writer, reentrant-reader coordinator.
///
/// Cloning is cheap; all clones share the same lock state.
#[derive(Clone)]
pub struct Coordinator {
	shared: Arc<Shared>,
}

impl fmt::Debug for Coordinator {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		let state = self.shared.state.lock();
		f.debug_struct("Coordinator")
			.field("id", &self.shared.id)
			.field("write_thread", &self.shared.write_thread)
			.field("writer", &state.writer)
			.field("write_depth", &state.write_depth)
			.field("pending_writes", &state.pending_writes)
			.field("generation", &state.generation)
			.finish()
	}
}

impl Default for Coordinator {
	fn default() -> Self {
		Self::new()
	}
}

/// Shared (read) access held by the current thread.
///
/// Released when dropped. Tickets cannot leave the thread that acquired them.
#[must_use = "read access is released as soon as the ticket is dropped"]
pub struct ReadTicket<'a> {
	coordinator: &'a Coordinator,
	_thread_bound: PhantomData<*const ()>,
}

impl Drop for ReadTicket<'_> {
	fn drop(&mut self) {
		self.coordinator.release_read_access();
	}
}

impl fmt::Debug for ReadTicket<'_> {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.debug_struct("ReadTicket").field("coordinator", &self.coordinator.shared.id).finish()
	}
}

/// Exclusive (write) access held by the designated write thread.
///
/// Released when dropped; nested tickets only decrement the nesting depth.
#[must_use = "write access is released as soon as the ticket is dropped"]
pub struct WriteTicket<'a> {
	coordinator: &'a Coordinator,
	marker: &'static str,
	_thread_bound: PhantomData<*const ()>,
}

impl WriteTicket<'_> {
	/// Returns the marker this ticket was acquired with.
	pub fn marker(&self) -> &'static str {
		self.marker
	}
}

impl Drop for WriteTicket<'_> {
	fn drop(&mut self) {
		self.coordinator.release_write_access();
	}
}

/// Withdraws a write request when acquisition unwinds before the writer is installed.
struct PendingWrite<'a> {
	coordinator: &'a Coordinator,
	marker: &'static str,
	armed: bool,
}

impl Drop for PendingWrite<'_> {
	fn drop(&mut self) {
		if !self.armed {
			return;
		}
		let shared = &self.coordinator.shared;
		shared.state.lock().pending_writes -= 1;
		shared.write_released.notify_all();
		tracing::debug!(coordinator = shared.id, marker = self.marker, "lock.write.withdrawn");
	}
}

impl fmt::Debug for WriteTicket<'_> {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.debug_struct("WriteTicket")
			.field("coordinator", &self.coordinator.shared.id)
			.field("marker", &self.marker)
			.finish()
	}
}

impl Coordinator {
	/// Creates a coordinator whose designated write thread is the calling thread.
	pub fn new() -> Self {
		Self::with_config(thread::current().id(), CoordinatorConfig::default())
	}

	/// Creates a coordinator bound to an explicit write thread.
	pub fn with_write_thread(write_thread: ThreadId) -> Self {
		Self::with_config(write_thread, CoordinatorConfig::default())
	}

	/// Creates a coordinator with explicit configuration.
	pub fn with_config(write_thread: ThreadId, config: CoordinatorConfig) -> Self {
		let id = NEXT_COORDINATOR_ID.fetch_add(1, Ordering::Relaxed);
		tracing::debug!(coordinator = id, ?write_thread, "lock.coordinator.new");
		Self {
			shared: Arc::new(Shared {
				id,
				write_thread,
				config,
				state: Mutex::new(LockState::default()),
				readers_drained: Condvar::new(),
				write_released: Condvar::new(),
				read_listeners: RwLock::new(Vec::new()),
				write_listeners: RwLock::new(Vec::new()),
				active_write_listeners: Mutex::new(Vec::new()),
				followups: Mutex::new(Vec::new()),
			}),
		}
	}

	/// Returns the process-unique id of this coordinator.
	pub fn id(&self) -> u64 {
		self.shared.id
	}

	/// Returns the designated write thread.
	pub fn write_thread(&self) -> ThreadId {
		self.shared.write_thread
	}

	/// Returns true when called on the designated write thread.
	pub fn is_write_thread(&self) -> bool {
		thread::current().id() == self.shared.write_thread
	}

	/// Acquires read access, blocking while a write is pending or running.
	///
	/// Returns immediately when the calling thread already holds read or write
	/// access. Fails with [`AccessError::CannotRead`] instead of blocking when the
	/// thread is an impatient reader outside a non-cancelable section.
	pub fn acquire_read(&self) -> Result<ReadTicket<'_>, AccessError> {
		let me = thread::current().id();
		let mut state = self.shared.state.lock();
		if !state.holds_access(me) && state.blocks_new_readers() {
			if scope::fails_fast() {
				tracing::trace!(coordinator = self.shared.id, "lock.read.impatient");
				return Err(AccessError::CannotRead);
			}
			tracing::trace!(coordinator = self.shared.id, pending = state.pending_writes, "lock.read.wait");
			while state.blocks_new_readers() {
				self.shared.write_released.wait(&mut state);
			}
		}
		state.add_reader(me);
		Ok(self.read_ticket())
	}

	/// Acquires read access without blocking.
	///
	/// Returns `None` whenever a write is pending or in progress, unless the
	/// calling thread already holds access.
	pub fn try_acquire_read(&self) -> Option<ReadTicket<'_>> {
		let me = thread::current().id();
		let mut state = self.shared.state.lock();
		if !state.holds_access(me) && state.blocks_new_readers() {
			return None;
		}
		state.add_reader(me);
		Some(self.read_ticket())
	}

	/// Acquires read access while periodically checking `cancel`.
	///
	/// Spins for a bounded number of attempts, then parks in slices of the
	/// configured poll interval. Inside a non-cancelable section this degrades to
	/// [`Self::acquire_read`].
	pub fn acquire_read_cancellable(&self, cancel: &CancellationToken) -> Result<ReadTicket<'_>, AccessError> {
		if let Some(ticket) = self.try_acquire_read() {
			return Ok(ticket);
		}
		for listener in self.read_listeners() {
			listener.fast_path_acquisition_failed();
		}
		if scope::is_in_non_cancelable_section() {
			return self.acquire_read();
		}
		if scope::fails_fast() {
			tracing::trace!(coordinator = self.shared.id, "lock.read.impatient");
			return Err(AccessError::CannotRead);
		}

		for _ in 0..self.shared.config.read_spin_attempts {
			scope::check_canceled(cancel)?;
			thread::yield_now();
			if let Some(ticket) = self.try_acquire_read() {
				return Ok(ticket);
			}
		}

		let me = thread::current().id();
		let poll = self.shared.config.poll_interval();
		let mut state = self.shared.state.lock();
		loop {
			if state.holds_access(me) || !state.blocks_new_readers() {
				state.add_reader(me);
				return Ok(self.read_ticket());
			}
			if cancel.is_cancelled() {
				tracing::trace!(coordinator = self.shared.id, "lock.read.cancelled");
				return Err(AccessError::Cancelled);
			}
			self.shared.write_released.wait_for(&mut state, poll);
		}
	}

	/// Releases a read ticket explicitly. Equivalent to dropping it.
	pub fn release_read(&self, ticket: ReadTicket<'_>) {
		debug_assert!(Arc::ptr_eq(&ticket.coordinator.shared, &self.shared), "read ticket belongs to another coordinator");
		drop(ticket);
	}

	/// Acquires write access with the default marker.
	///
	/// # Panics
	///
	/// See [`Self::acquire_write_for`].
	pub fn acquire_write(&self) -> WriteTicket<'_> {
		self.acquire_write_for(DEFAULT_WRITE_MARKER)
	}

	/// Acquires write access, recording `marker` for [`Self::has_write_action`].
	///
	/// The write is marked pending before any blocking, so new readers from other
	/// threads queue behind it. Nested calls from the owning thread only increase
	/// the nesting depth.
	///
	/// # Panics
	///
	/// Panics when called off the designated write thread, inside a
	/// write-prohibited scope, or while the thread holds read (but not write)
	/// access.
	pub fn acquire_write_for(&self, marker: &'static str) -> WriteTicket<'_> {
		let me = thread::current().id();
		assert!(
			me == self.shared.write_thread,
			"write action `{marker}` requested off the designated write thread"
		);
		assert!(
			!scope::write_actions_prohibited(),
			"write action `{marker}` started inside a write-prohibited scope"
		);

		{
			let mut state = self.shared.state.lock();
			if state.writer == Some(me) {
				state.write_depth += 1;
				state.markers.push(marker);
				tracing::trace!(coordinator = self.shared.id, marker, depth = state.write_depth, "lock.write.reenter");
				return self.write_ticket(marker);
			}
			assert!(
				state.reads_held_by(me) == 0,
				"write action `{marker}` requested while holding read access"
			);
			state.pending_writes += 1;
		}
		let mut pending = PendingWrite {
			coordinator: self,
			marker,
			armed: true,
		};

		let listeners = self.shared.write_listeners.read().clone();
		for listener in &listeners {
			listener.before_write_action_start(marker);
		}

		let started = Instant::now();
		{
			let mut state = self.shared.state.lock();
			while state.foreign_reads(me) > 0 {
				self.shared.readers_drained.wait(&mut state);
			}
			state.pending_writes -= 1;
			state.writer = Some(me);
			state.write_depth = 1;
			state.markers.push(marker);
			pending.armed = false;
		}
		tracing::trace!(
			coordinator = self.shared.id,
			marker,
			waited_us = started.elapsed().as_micros() as u64,
			"lock.write.acquire"
		);

		// Unwinding out of a listener releases the write through the ticket.
		let ticket = self.write_ticket(marker);
		for listener in &listeners {
			listener.write_action_started(marker);
		}
		*self.shared.active_write_listeners.lock() = listeners;
		ticket
	}

	/// Releases a write ticket explicitly. Equivalent to dropping it.
	pub fn release_write(&self, ticket: WriteTicket<'_>) {
		debug_assert!(Arc::ptr_eq(&ticket.coordinator.shared, &self.shared), "write ticket belongs to another coordinator");
		drop(ticket);
	}

	/// Runs `action` under read access.
	///
	/// Read listeners are notified around the action. Access is released even if
	/// `action` panics.
	pub fn run_read_action<R>(&self, action: impl FnOnce() -> R) -> Result<R, AccessError> {
		let listeners = self.read_listeners();
		for listener in &listeners {
			listener.before_read_action_start();
		}
		let result = self.acquire_read().map(|ticket| {
			for listener in &listeners {
				listener.read_action_started();
			}
			let value = action();
			for listener in &listeners {
				listener.read_action_finished();
			}
			drop(ticket);
			value
		});
		for listener in &listeners {
			listener.after_read_action_finished();
		}
		result
	}

	/// Runs `action` under read access if it can be taken without waiting.
	pub fn try_run_read_action<R>(&self, action: impl FnOnce() -> R) -> Option<R> {
		let listeners = self.read_listeners();
		for listener in &listeners {
			listener.before_read_action_start();
		}
		let result = self.try_acquire_read().map(|ticket| {
			for listener in &listeners {
				listener.read_action_started();
			}
			let value = action();
			for listener in &listeners {
				listener.read_action_finished();
			}
			drop(ticket);
			value
		});
		for listener in &listeners {
			listener.after_read_action_finished();
		}
		result
	}

	/// Runs `action` under write access with the default marker.
	pub fn run_write_action<R>(&self, action: impl FnOnce() -> R) -> R {
		self.run_write_action_for(DEFAULT_WRITE_MARKER, action)
	}

	/// Runs `action` under write access, released even if `action` panics.
	pub fn run_write_action_for<R>(&self, marker: &'static str, action: impl FnOnce() -> R) -> R {
		let _ticket = self.acquire_write_for(marker);
		action()
	}

	/// Runs `action` once no write is pending or running.
	///
	/// Runs inline when nothing is demanded; otherwise `action` is queued and
	/// runs on the write thread right after the top-level write releases.
	pub fn run_when_write_action_completed(&self, action: impl FnOnce() + Send + 'static) {
		if !self.is_write_pending_or_running() {
			action();
			return;
		}
		self.shared.followups.lock().push(Box::new(action));
		if !self.is_write_pending_or_running() {
			self.drain_followups();
		}
	}

	/// Returns true while a write has been requested but not yet granted.
	pub fn is_write_action_pending(&self) -> bool {
		self.shared.state.lock().pending_writes > 0
	}

	/// Returns true while some thread holds write access.
	pub fn is_write_action_in_progress(&self) -> bool {
		self.shared.state.lock().writer.is_some()
	}

	/// Returns true while a write is pending or running, i.e. new readers wait.
	pub fn has_pending_write(&self) -> bool {
		self.is_write_pending_or_running()
	}

	/// Returns true if the calling thread holds read or write access.
	pub fn is_read_access_allowed(&self) -> bool {
		self.shared.state.lock().holds_access(thread::current().id())
	}

	/// Returns true if the calling thread holds write access.
	pub fn is_write_access_allowed(&self) -> bool {
		self.shared.state.lock().writer == Some(thread::current().id())
	}

	/// Returns true if the calling thread holds at least one read ticket.
	pub fn is_read_locked_by_this_thread(&self) -> bool {
		self.shared.state.lock().reads_held_by(thread::current().id()) > 0
	}

	/// Returns the number of completed top-level write actions.
	///
	/// Comparing two readings tells whether a write happened in between.
	pub fn generation(&self) -> u64 {
		self.shared.state.lock().generation
	}

	/// Returns true if a running (possibly nested) write action carries `marker`.
	pub fn has_write_action(&self, marker: &str) -> bool {
		self.shared.state.lock().markers.iter().rev().any(|running| *running == marker)
	}

	/// Registers a read action listener.
	pub fn add_read_listener(&self, listener: Arc<dyn ReadActionListener>) {
		self.shared.read_listeners.write().push(listener);
	}

	/// Removes a previously registered read action listener.
	pub fn remove_read_listener(&self, listener: &Arc<dyn ReadActionListener>) {
		self.shared
			.read_listeners
			.write()
			.retain(|registered| !std::ptr::addr_eq(Arc::as_ptr(registered), Arc::as_ptr(listener)));
	}

	/// Registers a write action listener.
	pub fn add_write_listener(&self, listener: Arc<dyn WriteActionListener>) {
		self.shared.write_listeners.write().push(listener);
	}

	/// Removes a previously registered write action listener.
	pub fn remove_write_listener(&self, listener: &Arc<dyn WriteActionListener>) {
		self.shared
			.write_listeners
			.write()
			.retain(|registered| !std::ptr::addr_eq(Arc::as_ptr(registered), Arc::as_ptr(listener)));
	}

	fn read_ticket(&self) -> ReadTicket<'_> {
		ReadTicket {
			coordinator: self,
			_thread_bound: PhantomData,
		}
	}

	fn write_ticket(&self, marker: &'static str) -> WriteTicket<'_> {
		WriteTicket {
			coordinator: self,
			marker,
			_thread_bound: PhantomData,
		}
	}

	fn read_listeners(&self) -> Vec<Arc<dyn ReadActionListener>> {
		self.shared.read_listeners.read().clone()
	}

	fn is_write_pending_or_running(&self) -> bool {
		self.shared.state.lock().is_write_pending_or_running()
	}

	fn release_read_access(&self) {
		let me = thread::current().id();
		let mut state = self.shared.state.lock();
		if state.remove_reader(me) {
			self.shared.readers_drained.notify_all();
		}
	}

	fn release_write_access(&self) {
		let me = thread::current().id();
		let marker = {
			let mut state = self.shared.state.lock();
			assert!(state.writer == Some(me), "write ticket released by a thread that does not hold write access");
			if state.write_depth > 1 {
				state.write_depth -= 1;
				state.markers.pop();
				return;
			}
			state.markers.first().copied().unwrap_or(DEFAULT_WRITE_MARKER)
		};

		let listeners = std::mem::take(&mut *self.shared.active_write_listeners.lock());
		for listener in &listeners {
			listener.write_action_finished(marker);
		}

		{
			let mut state = self.shared.state.lock();
			state.write_depth = 0;
			state.markers.clear();
			state.writer = None;
			state.generation = state.generation.wrapping_add(1);
		}
		self.shared.write_released.notify_all();
		tracing::trace!(coordinator = self.shared.id, marker, "lock.write.release");

		for listener in &listeners {
			listener.after_write_action_finished(marker);
		}
		self.drain_followups();
	}

	fn drain_followups(&self) {
		if self.is_write_pending_or_running() {
			return;
		}
		let followups = std::mem::take(&mut *self.shared.followups.lock());
		if followups.is_empty() {
			return;
		}
		tracing::trace!(coordinator = self.shared.id, count = followups.len(), "lock.write.followups");
		for followup in followups {
			followup();
		}
	}
}

#[cfg(test)]
mod tests;
