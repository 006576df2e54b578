//! Error types for the transfer library.

use thiserror::Error;

use crate::core::schema::ObjectId;

/// Main error type for transfer operations.
#[derive(Error, Debug)]
pub enum TransferError {
    /// Configuration error (invalid YAML, out-of-range values, etc.)
    #[error("Configuration error: {0}")]
    Config(String),

    /// Two objects in the snapshot share the same (schema, name, kind) identity.
    #[error("Duplicate object in snapshot: {0}")]
    DuplicateObject(ObjectId),

    /// A strongly connected component with no usable break candidate.
    #[error("Unresolvable cycle among {}: no break candidate", format_members(.members))]
    UnresolvableCycle { members: Vec<ObjectId> },

    /// Residual cycle after resolution. Indicates an internal invariant
    /// violation, not bad input.
    #[error("Unplannable graph: {count} objects remain after level extraction")]
    UnplannableGraph { count: usize },

    /// A batch operation failed for a specific object.
    #[error("Batch transfer failed for {object}: {message}")]
    Batch { object: ObjectId, message: String },

    /// The run finished short of full success (failed or skipped objects,
    /// or verification mismatches).
    #[error("Validation failed: {0}")]
    Validation(String),

    /// Error surfaced by a source/target store collaborator.
    #[error("Store error: {0}")]
    Store(String),

    /// The run was cancelled.
    #[error("Transfer cancelled")]
    Cancelled,

    /// IO error (config file operations)
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// YAML serialization/deserialization error
    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    /// JSON serialization/deserialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl TransferError {
    /// Create a Batch error for an object.
    pub fn batch(object: ObjectId, message: impl Into<String>) -> Self {
        TransferError::Batch {
            object,
            message: message.into(),
        }
    }

    /// Create a Store error.
    pub fn store(message: impl Into<String>) -> Self {
        TransferError::Store(message.into())
    }
}

fn format_members(members: &[ObjectId]) -> String {
    members
        .iter()
        .map(|m| m.to_string())
        .collect::<Vec<_>>()
        .join(", ")
}

/// Result type alias for transfer operations.
pub type Result<T> = std::result::Result<T, TransferError>;
