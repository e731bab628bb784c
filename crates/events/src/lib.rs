//! Event envelope and catalog for the payment saga.
//!
//! Events are the only channel between saga steps. Every step decodes an
//! [`Event`] from the bus, acts on the kinds it understands, and publishes
//! at most one new event for the next step.

pub mod error;
pub mod event;
pub mod kind;

pub use error::{EventError, Result};
pub use event::{Event, Field};
pub use kind::EventKind;
