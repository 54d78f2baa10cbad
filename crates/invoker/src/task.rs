/// A unit of deferred work.
///
/// Closures implement this trait directly. Implement it by hand to observe the
/// item being dropped because its expiry condition held.
pub trait LaterTask: Send + 'static {
	/// Runs the work on the dispatch thread.
	fn run(self: Box<Self>);

	/// Called instead of [`LaterTask::run`] when the item expired while queued.
	fn expired(self: Box<Self>) {}
}

impl<F> LaterTask for F
where
	F: FnOnce() + Send + 'static,
{
	fn run(self: Box<Self>) {
		(*self)()
	}
}
