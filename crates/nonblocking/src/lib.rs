//! Background read actions that never block the dispatch thread.
//!
//! A computation submitted through [`ReadScheduler::non_blocking`] runs on an
//! executor under read access. It is retried while it reports
//! [`ReadError::NotReady`] or its constraints are unsatisfied, restarted when a
//! write action needs the lock, cancelled when it expires or is superseded by a
//! submission with the same [`CoalesceKey`], and may hand its result back to the
//! dispatch thread through the later-invocation queue.

mod builder;
mod config;
mod constraint;
mod context;
mod error;
mod handle;
mod key;
mod scheduler;
mod task;

pub use builder::NonBlockingRead;
pub use config::SchedulerConfig;
pub use constraint::ReadConstraint;
pub use context::ReadContext;
pub use error::{ReadError, ScheduleError, TaskError};
pub use handle::{CancellableHandle, TaskState};
pub use key::CoalesceKey;
pub use scheduler::ReadScheduler;
