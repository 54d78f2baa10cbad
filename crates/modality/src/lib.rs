//! Modality tracking for deferred work.
//!
//! A [`ModalityStack`] records which modal entities (dialogs, modal progress
//! scopes, nested event loops) are currently open. Capturing
//! [`ModalityStack::current`] yields an immutable [`ModalityState`]; deferred
//! work tagged with a state only runs once the stack has unwound back to it.

/// Modal entity and scope identities.
pub mod entity;
/// The mutable modality stack.
pub mod stack;
/// Immutable modality state tokens.
pub mod state;

pub use entity::{ModalEntity, ModalScope};
pub use stack::ModalityStack;
pub use state::ModalityState;
