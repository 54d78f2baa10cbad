//! Deferred work for the dispatch thread.
//!
//! Any thread may hand work to a [`LaterInvocator`]. The dispatch thread drains it
//! with [`LaterInvocator::flush`], running each item only once the modality stack
//! has unwound to the state the item was submitted under.

/// The queue and its flush loop.
pub mod invocator;
/// Work items accepted by the queue.
pub mod task;

pub use invocator::{FlushReport, LaterInvocator};
pub use task::LaterTask;
