use std::future::Future;
use std::sync::OnceLock;
use std::time::Duration;

use tokio::runtime::{Handle, RuntimeFlavor};
use tokio::task::JoinHandle;

use crate::TaskClass;

/// Returns a handle to a multi-threaded runtime.
///
/// The ambient runtime is used when it is multi-threaded. A current-thread
/// runtime cannot make progress while its only thread blocks on a lock, so
/// callers inside one fall back to the shared worker runtime.
pub(crate) fn runtime_handle() -> Handle {
	if let Ok(handle) = Handle::try_current()
		&& handle.runtime_flavor() == RuntimeFlavor::MultiThread
	{
		return handle;
	}

	static GLOBAL_RT: OnceLock<tokio::runtime::Runtime> = OnceLock::new();
	let runtime = GLOBAL_RT.get_or_init(|| {
		tokio::runtime::Builder::new_multi_thread()
			.enable_all()
			.worker_threads(2)
			.thread_name("quire-worker-global")
			.build()
			.expect("failed to build quire-worker global tokio runtime")
	});
	runtime.handle().clone()
}

/// Spawns an async task on the worker runtime.
pub fn spawn<F>(class: TaskClass, fut: F) -> JoinHandle<F::Output>
where
	F: Future + Send + 'static,
	F::Output: Send + 'static,
{
	tracing::trace!(worker_class = class.as_str(), "worker.spawn");
	runtime_handle().spawn(fut)
}

/// Spawns blocking work on the worker runtime's blocking pool.
pub fn spawn_blocking<F, R>(class: TaskClass, f: F) -> JoinHandle<R>
where
	F: FnOnce() -> R + Send + 'static,
	R: Send + 'static,
{
	tracing::trace!(worker_class = class.as_str(), "worker.spawn_blocking");
	runtime_handle().spawn_blocking(f)
}

/// Runs `f` on the blocking pool once `delay` has elapsed.
pub fn spawn_after<F>(delay: Duration, f: F) -> JoinHandle<()>
where
	F: FnOnce() + Send + 'static,
{
	tracing::trace!(worker_class = TaskClass::Timer.as_str(), delay_ms = delay.as_millis() as u64, "worker.spawn_after");
	runtime_handle().spawn(async move {
		tokio::time::sleep(delay).await;
		if let Err(err) = spawn_blocking(TaskClass::Timer, f).await {
			let message = crate::join_error_panic_message(err).unwrap_or_else(|| "<cancelled>".to_string());
			tracing::error!(error = %message, "worker.spawn_after.failed");
		}
	})
}
