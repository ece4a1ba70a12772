use thiserror::Error;
use uuid::Uuid;

use crate::atom::AtomId;
use crate::snapshot::RestoreError;

/// Errors that can occur in the time-travel engine
#[derive(Error, Debug, Clone, PartialEq)]
pub enum TimeTravelError {
    #[error("Snapshot not found: {id}")]
    SnapshotNotFound { id: Uuid },

    #[error("Snapshot is missing required field: {field}")]
    MissingField { field: &'static str },

    #[error("Cannot navigate to index {index}: history length is {len}")]
    NavigationOutOfBounds { index: usize, len: usize },

    #[error("Checkpoint not found: {id}")]
    CheckpointNotFound { id: Uuid },

    #[error("Atom not tracked: {id}")]
    AtomNotTracked { id: AtomId },

    #[error("Invalid configuration for {parameter}: {reason}")]
    InvalidConfig { parameter: String, reason: String },

    #[error("Store operation failed on {atom}: {message}")]
    Store { atom: String, message: String },

    #[error("Restoration failed: {0}")]
    Restore(#[from] RestoreError),

    #[error("Disposal of {component} failed with {} error(s): {}", errors.len(), errors.join("; "))]
    DisposalFailed {
        component: String,
        errors: Vec<String>,
    },

    #[error("Disposal of {component} timed out after {timeout_ms}ms")]
    DisposalTimeout { component: String, timeout_ms: u64 },

    #[error("Component {component} has been disposed")]
    Disposed { component: String },

    #[error("Serialization error: {message}")]
    SerializationError { message: String },

    #[error("Deserialization error: {message}")]
    DeserializationError { message: String },
}

impl From<serde_json::Error> for TimeTravelError {
    #[cold]
    fn from(err: serde_json::Error) -> Self {
        if err.is_data() || err.is_syntax() || err.is_eof() {
            TimeTravelError::DeserializationError {
                message: err.to_string(),
            }
        } else {
            TimeTravelError::SerializationError {
                message: err.to_string(),
            }
        }
    }
}

pub type Result<T> = std::result::Result<T, TimeTravelError>;
