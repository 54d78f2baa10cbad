use std::thread::ThreadId;

use rustc_hash::FxHashMap;
use smallvec::SmallVec;

/// Mutable lock bookkeeping, guarded by the coordinator mutex.
#[derive(Debug, Default)]
pub(crate) struct LockState {
	/// Thread currently holding exclusive access.
	pub(crate) writer: Option<ThreadId>,
	/// Nesting depth of the writer's write tickets.
	pub(crate) write_depth: usize,
	/// Writes requested but not yet granted.
	pub(crate) pending_writes: usize,
	/// Read tickets held per thread.
	readers: FxHashMap<ThreadId, usize>,
	/// Sum of all per-thread read counts.
	total_reads: usize,
	/// Completed top-level write actions.
	pub(crate) generation: u64,
	/// Markers of the running (possibly nested) write actions, innermost last.
	pub(crate) markers: SmallVec<[&'static str; 4]>,
}

impl LockState {
	pub(crate) fn reads_held_by(&self, thread: ThreadId) -> usize {
		self.readers.get(&thread).copied().unwrap_or(0)
	}

	/// Returns true if `thread` may take read access without waiting.
	pub(crate) fn holds_access(&self, thread: ThreadId) -> bool {
		self.writer == Some(thread) || self.reads_held_by(thread) > 0
	}

	/// Returns true while no new reader from another thread may be admitted.
	pub(crate) fn blocks_new_readers(&self) -> bool {
		self.pending_writes > 0 || self.writer.is_some()
	}

	pub(crate) fn is_write_pending_or_running(&self) -> bool {
		self.blocks_new_readers()
	}

	pub(crate) fn add_reader(&mut self, thread: ThreadId) {
		*self.readers.entry(thread).or_insert(0) += 1;
		self.total_reads += 1;
	}

	/// Returns true when no read tickets remain after the release.
	pub(crate) fn remove_reader(&mut self, thread: ThreadId) -> bool {
		let Some(count) = self.readers.get_mut(&thread) else {
			panic!("read ticket released on a thread that holds no read access");
		};
		*count -= 1;
		if *count == 0 {
			self.readers.remove(&thread);
		}
		self.total_reads -= 1;
		self.total_reads == 0
	}

	/// Read tickets held by threads other than `thread`.
	pub(crate) fn foreign_reads(&self, thread: ThreadId) -> usize {
		self.total_reads - self.reads_held_by(thread)
	}
}
