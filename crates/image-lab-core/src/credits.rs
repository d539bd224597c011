//! Credit ledger types.
//!
//! Every balance change is recorded as a [`CreditTransaction`]. The audit
//! trail carries no idempotency: callers that must not charge twice claim a
//! [`TransactionKey`] through a [`DeductionGuard`] first.

use std::collections::HashSet;
use std::fmt;
use std::str::FromStr;
use std::sync::Mutex;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{LabError, Result};
use crate::user::User;
use crate::{TransactionId, TransformationId, UserId};

/// A recorded balance change.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CreditTransaction {
    /// Unique transaction ID (ULID for time-ordering).
    pub id: TransactionId,

    /// The user whose balance was affected.
    pub user_id: UserId,

    /// Paid credits moved. Positive = credit, negative = debit, zero for
    /// free-credit spends.
    pub amount: i64,

    /// Type of transaction.
    pub transaction_type: TransactionType,

    /// Paid balance after this transaction.
    pub balance_after: i64,

    /// Human-readable description.
    pub description: String,

    /// Additional metadata (transformation id, payment event, ...).
    pub metadata: serde_json::Value,

    /// When the transaction was created.
    pub created_at: DateTime<Utc>,
}

impl CreditTransaction {
    fn new(
        user_id: UserId,
        amount: i64,
        transaction_type: TransactionType,
        balance_after: i64,
        description: String,
        metadata: serde_json::Value,
    ) -> Self {
        Self {
            id: TransactionId::generate(),
            user_id,
            amount,
            transaction_type,
            balance_after,
            description,
            metadata,
            created_at: Utc::now(),
        }
    }

    /// Paid credits deducted for a transformation.
    #[must_use]
    pub fn transformation_charge(
        user_id: UserId,
        credits: i64,
        balance_after: i64,
        transformation_id: Option<TransformationId>,
        transformation_type: &str,
    ) -> Self {
        Self::new(
            user_id,
            -credits.abs(),
            TransactionType::Transformation,
            balance_after,
            format!("{transformation_type} transformation"),
            serde_json::json!({
                "transformation_id": transformation_id.map(String::from),
                "transformation_type": transformation_type,
            }),
        )
    }

    /// The monthly free credit spent on a transformation.
    #[must_use]
    pub fn free_credit(
        user_id: UserId,
        balance_after: i64,
        transformation_id: Option<TransformationId>,
        transformation_type: &str,
    ) -> Self {
        Self::new(
            user_id,
            0,
            TransactionType::FreeCredit,
            balance_after,
            format!("Free monthly credit used for {transformation_type} transformation"),
            serde_json::json!({
                "transformation_id": transformation_id.map(String::from),
                "transformation_type": transformation_type,
            }),
        )
    }

    /// Credits bought through the payment provider.
    #[must_use]
    pub fn purchase(user_id: UserId, credits: i64, balance_after: i64, event_id: &str) -> Self {
        Self::new(
            user_id,
            credits,
            TransactionType::Purchase,
            balance_after,
            format!("Purchased {credits} credits"),
            serde_json::json!({ "event_id": event_id }),
        )
    }

    /// Manual change made by an operator or a client-driven deduction.
    #[must_use]
    pub fn adjustment(user_id: UserId, delta: i64, balance_after: i64, reason: String) -> Self {
        Self::new(
            user_id,
            delta,
            TransactionType::Adjustment,
            balance_after,
            reason,
            serde_json::Value::Null,
        )
    }

    /// Attach metadata, replacing what the constructor set.
    #[must_use]
    pub fn with_metadata(mut self, metadata: serde_json::Value) -> Self {
        self.metadata = metadata;
        self
    }
}

/// Type of credit transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransactionType {
    /// Paid credits deducted for a transformation.
    Transformation,
    /// Free monthly credit spent.
    FreeCredit,
    /// Credits bought.
    Purchase,
    /// Operator or client-driven change.
    Adjustment,
}

impl TransactionType {
    /// Stable storage name.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Transformation => "transformation",
            Self::FreeCredit => "free_credit",
            Self::Purchase => "purchase",
            Self::Adjustment => "adjustment",
        }
    }
}

impl FromStr for TransactionType {
    type Err = LabError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "transformation" => Ok(Self::Transformation),
            "free_credit" => Ok(Self::FreeCredit),
            "purchase" => Ok(Self::Purchase),
            "adjustment" => Ok(Self::Adjustment),
            other => Err(LabError::InvalidTransactionType(other.to_string())),
        }
    }
}

/// How a completed transformation is paid for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ChargePlan {
    /// Nothing is deducted.
    Waived {
        /// Why the charge was waived.
        reason: ChargeWaiver,
    },
    /// The monthly free credit covers the whole transformation.
    FreeCredit,
    /// Paid credits are deducted.
    Paid {
        /// Credits to deduct.
        credits: i64,
    },
}

/// Reasons a transformation is not charged.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChargeWaiver {
    /// Test mode bypasses credit checks and deductions.
    TestMode,
    /// The result was simulated and simulated results are free.
    Simulated,
}

impl ChargePlan {
    /// Decide how `user` pays `cost` credits at `now`.
    ///
    /// The free credit is preferred over paid credits and pays for one whole
    /// transformation regardless of its cost.
    ///
    /// # Errors
    ///
    /// Returns [`LabError::InsufficientCredits`] if neither kind of credit
    /// covers the cost, and [`LabError::InvalidAmount`] for a negative cost.
    pub fn decide(user: &User, cost: i64, test_mode: bool, now: DateTime<Utc>) -> Result<Self> {
        if cost < 0 {
            return Err(LabError::InvalidAmount(format!("negative cost {cost}")));
        }
        if test_mode {
            return Ok(Self::Waived {
                reason: ChargeWaiver::TestMode,
            });
        }
        if user.free_credit_check(now).is_available() {
            return Ok(Self::FreeCredit);
        }
        if user.has_sufficient_credits(cost) {
            return Ok(Self::Paid { credits: cost });
        }
        Err(LabError::InsufficientCredits {
            balance: user.paid_credits,
            required: cost,
        })
    }

    /// Whether this plan moves any credit.
    #[must_use]
    pub const fn is_charged(&self) -> bool {
        !matches!(self, Self::Waived { .. })
    }
}

/// Deduplication key of one logical deduction:
/// `imageId-transformationType-timestamp`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TransactionKey(String);

impl TransactionKey {
    /// Build a key from its parts. `timestamp_ms` is the request time in
    /// milliseconds since the Unix epoch.
    #[must_use]
    pub fn new(image_id: &str, transformation_type: &str, timestamp_ms: i64) -> Self {
        Self(format!("{image_id}-{transformation_type}-{timestamp_ms}"))
    }

    /// Build a key stamped with the current time.
    #[must_use]
    pub fn now(image_id: &str, transformation_type: &str) -> Self {
        Self::new(image_id, transformation_type, Utc::now().timestamp_millis())
    }

    /// The key as a string.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for TransactionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// In-memory, per-session guard against deducting twice for one key.
///
/// Keys live as long as the guard; nothing is persisted.
#[derive(Debug, Default)]
pub struct DeductionGuard {
    claimed: Mutex<HashSet<TransactionKey>>,
}

impl DeductionGuard {
    /// Create an empty guard.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Claim `key`. Returns `false` if it was already claimed.
    pub fn try_claim(&self, key: &TransactionKey) -> bool {
        let mut claimed = self
            .claimed
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        claimed.insert(key.clone())
    }

    /// Give a key back, e.g. after the deduction request failed.
    pub fn release(&self, key: &TransactionKey) {
        let mut claimed = self
            .claimed
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        claimed.remove(key);
    }

    /// Whether `key` has been claimed.
    #[must_use]
    pub fn is_claimed(&self, key: &TransactionKey) -> bool {
        self.claimed
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .contains(key)
    }
}
