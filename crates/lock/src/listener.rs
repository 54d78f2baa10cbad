/// Observer of read actions started through [`crate::Coordinator::run_read_action`].
///
/// All callbacks run on the reading thread. Default implementations do nothing.
pub trait ReadActionListener: Send + Sync {
	/// Called before read access is requested.
	fn before_read_action_start(&self) {}
	/// Called once read access is held, before the action body runs.
	fn read_action_started(&self) {}
	/// Called after the action body, while read access is still held.
	fn read_action_finished(&self) {}
	/// Called after read access has been released.
	fn after_read_action_finished(&self) {}
	/// Called when a read could not be admitted without waiting.
	fn fast_path_acquisition_failed(&self) {}
}

/// Observer of top-level write actions.
///
/// Callbacks run on the designated write thread. `before_write_action_start`
/// fires after the write has been marked pending and before it waits for
/// readers, so implementations may ask running readers to bail out.
pub trait WriteActionListener: Send + Sync {
	/// Called after the write is marked pending, before waiting for readers.
	fn before_write_action_start(&self, _marker: &'static str) {}
	/// Called once exclusive access is held.
	fn write_action_started(&self, _marker: &'static str) {}
	/// Called while exclusive access is still held, after the action body.
	fn write_action_finished(&self, _marker: &'static str) {}
	/// Called after exclusive access has been released.
	fn after_write_action_finished(&self, _marker: &'static str) {}
}
