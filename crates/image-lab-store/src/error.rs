//! Error types for image-lab storage.

use image_lab_core::LabError;

/// Result type for storage operations.
pub type Result<T> = std::result::Result<T, StoreError>;

/// Errors that can occur in storage operations.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// Database operation failed.
    #[error("database error: {0}")]
    Database(String),

    /// A stored value could not be decoded.
    #[error("serialization error: {0}")]
    Serialization(String),

    /// Record not found.
    #[error("{entity} not found: {id}")]
    NotFound {
        /// Kind of record.
        entity: &'static str,
        /// Identifier that was looked up.
        id: String,
    },

    /// Insufficient paid credits for a deduction.
    #[error("insufficient credits: balance={balance}, required={required}")]
    InsufficientCredits {
        /// Current paid balance.
        balance: i64,
        /// Required amount.
        required: i64,
    },

    /// Duplicate event (unique event id already recorded).
    #[error("duplicate event: {event_id}")]
    DuplicateEvent {
        /// The event ID that was duplicated.
        event_id: String,
    },

    /// The record exists or is in a state that forbids the change.
    #[error("conflict: {0}")]
    Conflict(String),

    /// The arguments cannot be applied.
    #[error("invalid input: {0}")]
    InvalidInput(String),
}

impl StoreError {
    pub(crate) fn not_found(entity: &'static str, id: impl ToString) -> Self {
        Self::NotFound {
            entity,
            id: id.to_string(),
        }
    }
}

impl From<sqlx::Error> for StoreError {
    fn from(err: sqlx::Error) -> Self {
        match err {
            sqlx::Error::ColumnDecode { .. } | sqlx::Error::Decode(_) => {
                Self::Serialization(err.to_string())
            }
            other => Self::Database(other.to_string()),
        }
    }
}

impl From<LabError> for StoreError {
    fn from(err: LabError) -> Self {
        match err {
            LabError::InvalidTransition { .. } => Self::Conflict(err.to_string()),
            LabError::InsufficientCredits { balance, required } => {
                Self::InsufficientCredits { balance, required }
            }
            LabError::InvalidAmount(msg) => Self::InvalidInput(msg),
            other => Self::Serialization(other.to_string()),
        }
    }
}

/// Whether a sqlx error is a unique-constraint violation.
pub(crate) fn is_unique_violation(err: &sqlx::Error) -> bool {
    matches!(err, sqlx::Error::Database(db_err) if db_err.is_unique_violation())
}
