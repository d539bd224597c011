//! Error types for image-lab.

use crate::ids::IdError;
use crate::transformation::TransformationStatus;

/// Result type for image-lab domain operations.
pub type Result<T> = std::result::Result<T, LabError>;

/// Errors raised by the domain model.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum LabError {
    /// The user cannot pay for the requested operation.
    #[error("insufficient credits: balance={balance}, required={required}")]
    InsufficientCredits {
        /// Current paid credit balance.
        balance: i64,
        /// Credits the operation costs.
        required: i64,
    },

    /// No catalog entry carries this id.
    #[error("unknown enhancement: {id}")]
    UnknownEnhancement {
        /// The requested enhancement id.
        id: String,
    },

    /// A status string did not name a known status.
    #[error("invalid transformation status: {0}")]
    InvalidStatus(String),

    /// A transaction type string did not name a known type.
    #[error("invalid transaction type: {0}")]
    InvalidTransactionType(String),

    /// The transformation cannot move between these statuses.
    #[error("invalid status transition from {from} to {to}")]
    InvalidTransition {
        /// Current status.
        from: TransformationStatus,
        /// Requested status.
        to: TransformationStatus,
    },

    /// A credit amount was zero, negative or otherwise unusable.
    #[error("invalid amount: {0}")]
    InvalidAmount(String),

    /// Invalid identifier.
    #[error("invalid identifier: {0}")]
    InvalidId(#[from] IdError),
}
