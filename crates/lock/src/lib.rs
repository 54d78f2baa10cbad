//! Read/write coordination for a shared, mutable model.
//!
//! A [`Coordinator`] admits any number of concurrent readers or one writer. Writes
//! are confined to a single designated thread, are reentrant on that thread, and
//! take preference over readers: once a write is requested no new reader from
//! another thread is admitted until the write has run.

/// Coordinator configuration.
pub mod config;
/// The coordinator handle and its access tickets.
pub mod coordinator;
/// Error types for read acquisition.
pub mod error;
/// Read and write action listeners.
pub mod listener;
/// Thread-local access scopes (impatient readers, non-cancelable sections).
pub mod scope;
mod state;

pub use config::CoordinatorConfig;
pub use coordinator::{Coordinator, ReadTicket, WriteTicket};
pub use error::AccessError;
pub use listener::{ReadActionListener, WriteActionListener};
pub use scope::{
	ImpatientReaderScope, NonCancelableSection, WriteProhibitedScope, check_canceled, impatient_reader, is_impatient_reader,
	is_in_non_cancelable_section, non_cancelable_section, prohibit_write_actions,
};

/// Marker used for write actions started without an explicit description.
pub const DEFAULT_WRITE_MARKER: &str = "write-action";
