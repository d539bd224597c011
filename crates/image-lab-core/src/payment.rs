//! Payments and uploaded images.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::{ImageId, PaymentId, UserId};

/// A payment reported by the payment provider.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Payment {
    /// Payment ID.
    pub id: PaymentId,
    /// Provider event id; unique across payments.
    pub event_id: String,
    /// The paying user.
    pub user_id: UserId,
    /// Paid credits granted by this payment.
    pub credits: i64,
    /// Amount paid in minor currency units.
    pub amount_cents: i64,
    /// ISO currency code.
    pub currency: String,
    /// Provider status.
    pub status: PaymentStatus,
    /// When the payment was recorded.
    pub created_at: DateTime<Utc>,
}

/// Provider-reported payment status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PaymentStatus {
    /// Money was collected; credits are granted.
    Succeeded,
    /// Awaiting settlement.
    Pending,
    /// Payment failed.
    Failed,
    /// Payment was refunded.
    Refunded,
}

impl PaymentStatus {
    /// Stable storage name.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Succeeded => "succeeded",
            Self::Pending => "pending",
            Self::Failed => "failed",
            Self::Refunded => "refunded",
        }
    }

    /// Parse a storage name; unknown names read as `Failed`.
    #[must_use]
    pub fn from_str_lossy(s: &str) -> Self {
        match s {
            "succeeded" => Self::Succeeded,
            "pending" => Self::Pending,
            "refunded" => Self::Refunded,
            _ => Self::Failed,
        }
    }

    /// Whether credits are granted for this status.
    #[must_use]
    pub const fn grants_credits(&self) -> bool {
        matches!(self, Self::Succeeded)
    }
}

/// An uploaded image.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserImage {
    /// Image ID.
    pub id: ImageId,
    /// Owner.
    pub user_id: UserId,
    /// Path relative to the uploads root.
    pub path: String,
    /// File name as uploaded.
    pub original_name: Option<String>,
    /// MIME type.
    pub content_type: String,
    /// Size in bytes.
    pub size_bytes: i64,
    /// When the image was uploaded.
    pub created_at: DateTime<Utc>,
}
