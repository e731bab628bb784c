use thiserror::Error;

use crate::{EventKind, Field};

/// Errors produced while decoding or validating events.
#[derive(Debug, Error)]
pub enum EventError {
    /// The payload could not be decoded into an event.
    #[error("unmarshal error: {0}")]
    Malformed(#[from] serde_json::Error),

    /// A field the event kind requires was absent.
    #[error("{kind} event is missing required field `{field}`")]
    MissingField { kind: EventKind, field: Field },
}

/// Result type for event operations.
pub type Result<T> = std::result::Result<T, EventError>;
