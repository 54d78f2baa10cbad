//! Worker runtime primitives.
//!
//! Executors for background jobs on a shared tokio runtime, lifetime handles
//! ([`Disposable`]) and cancellable progress reporting ([`ProgressIndicator`]).

mod class;
/// Job executors.
pub mod executor;
mod panic;
mod progress;
mod spawn;

pub use class::TaskClass;
pub use executor::{Executor, Job, PooledExecutor, SequentialExecutor};
pub use panic::{join_error_panic_message, panic_message};
pub use progress::{Disposable, ProgressIndicator};
pub use spawn::{spawn, spawn_after, spawn_blocking};
