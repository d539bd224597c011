//! Credit ledger operations used by the handlers.
//!
//! A charge happens in two steps. [`CreditLedger::preflight`] decides how a
//! request will be paid for and rejects it before any external call if the
//! user cannot pay. [`CreditLedger::settle`] applies the decision once the
//! work is done.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;

use image_lab_core::{
    ChargePlan, ChargeWaiver, CreditTransaction, TransformationId, User, UserId,
};
use image_lab_store::{Store, StoreError};

use crate::error::ApiError;

/// What a charge is for.
#[derive(Debug, Clone, Copy)]
pub struct ChargeSubject<'a> {
    /// The transformation being paid for, if there is one.
    pub transformation_id: Option<TransformationId>,
    /// Catalog id or `custom`.
    pub transformation_type: &'a str,
    /// Client transaction key, recorded in the audit metadata.
    pub transaction_key: Option<&'a str>,
}

/// The applied charge.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Settlement {
    /// How the charge was paid.
    pub plan: ChargePlan,
    /// Paid credits taken.
    pub credits_charged: i64,
    /// Paid balance afterwards.
    pub paid_credits: i64,
}

/// Credit state as shown to the user.
#[derive(Debug, Clone, Serialize)]
pub struct CreditSummary {
    /// Paid credit balance.
    pub paid_credits: i64,
    /// Whether the monthly free credit can be spent now.
    pub free_credit_available: bool,
    /// Whether the free credit of the current window is spent.
    pub free_credits_used: bool,
    /// When the free credit was last spent.
    pub last_free_credit: Option<DateTime<Utc>>,
    /// When the next free credit becomes available, if one is not already.
    pub next_free_credit_at: Option<DateTime<Utc>>,
}

/// Ledger facade over the store.
#[derive(Clone)]
pub struct CreditLedger {
    store: Arc<dyn Store>,
}

impl CreditLedger {
    /// Create a ledger.
    #[must_use]
    pub fn new(store: Arc<dyn Store>) -> Self {
        Self { store }
    }

    /// Load a registered user.
    pub async fn require_user(&self, user_id: &UserId) -> Result<User, ApiError> {
        self.store
            .get_user(user_id)
            .await?
            .ok_or_else(|| ApiError::NotFound("User not found".into()))
    }

    /// Run the monthly free-credit check, resetting an elapsed credit.
    pub async fn refresh_free_credit(&self, user_id: &UserId) -> Result<bool, ApiError> {
        match self.store.check_and_reset_monthly_free_credit(user_id).await {
            Ok(available) => Ok(available),
            Err(StoreError::NotFound { .. }) => Err(ApiError::NotFound("User not found".into())),
            Err(e) => Err(e.into()),
        }
    }

    /// Current credit state, after the monthly free-credit check.
    pub async fn summary(&self, user_id: &UserId) -> Result<CreditSummary, ApiError> {
        let available = self.refresh_free_credit(user_id).await?;
        let user = self.require_user(user_id).await?;

        let next_free_credit_at = if available {
            None
        } else {
            user.last_free_credit
                .map(|at| at + User::free_credit_window())
        };

        Ok(CreditSummary {
            paid_credits: user.paid_credits,
            free_credit_available: available,
            free_credits_used: user.free_credits_used,
            last_free_credit: user.last_free_credit,
            next_free_credit_at,
        })
    }

    /// Decide how a request costing `cost` will be paid for.
    ///
    /// Fails with 402 when neither the free credit nor the paid balance
    /// covers it.
    pub async fn preflight(
        &self,
        user_id: &UserId,
        cost: i64,
        test_mode: bool,
    ) -> Result<ChargePlan, ApiError> {
        self.refresh_free_credit(user_id).await?;
        let user = self.require_user(user_id).await?;
        Ok(ChargePlan::decide(&user, cost, test_mode, Utc::now())?)
    }

    /// Apply a charge decision.
    ///
    /// A free credit spent by a concurrent request between preflight and
    /// settlement is replaced by a paid deduction of `cost`.
    pub async fn settle(
        &self,
        user_id: &UserId,
        plan: ChargePlan,
        cost: i64,
        subject: ChargeSubject<'_>,
    ) -> Result<Settlement, ApiError> {
        match plan {
            ChargePlan::Waived { reason } => {
                let user = self.require_user(user_id).await?;
                tracing::info!(
                    user_id = %user_id,
                    reason = ?reason,
                    transformation_type = %subject.transformation_type,
                    "Charge waived"
                );
                Ok(Settlement {
                    plan,
                    credits_charged: 0,
                    paid_credits: user.paid_credits,
                })
            }
            ChargePlan::FreeCredit => {
                let tx = CreditTransaction::free_credit(
                    *user_id,
                    0,
                    subject.transformation_id,
                    subject.transformation_type,
                );
                let tx = with_key(tx, subject);
                if self.store.consume_free_credit(user_id, &tx).await? {
                    let user = self.require_user(user_id).await?;
                    tracing::info!(
                        user_id = %user_id,
                        transformation_type = %subject.transformation_type,
                        "Free monthly credit used"
                    );
                    return Ok(Settlement {
                        plan,
                        credits_charged: 0,
                        paid_credits: user.paid_credits,
                    });
                }
                tracing::warn!(
                    user_id = %user_id,
                    "Free credit was spent concurrently - charging paid credits"
                );
                self.deduct_paid(user_id, cost, subject).await
            }
            ChargePlan::Paid { credits } => self.deduct_paid(user_id, credits, subject).await,
        }
    }

    /// Preflight and settle in one step, for charges with no work between.
    pub async fn charge(
        &self,
        user_id: &UserId,
        cost: i64,
        test_mode: bool,
        subject: ChargeSubject<'_>,
    ) -> Result<Settlement, ApiError> {
        let plan = self.preflight(user_id, cost, test_mode).await?;
        self.settle(user_id, plan, cost, subject).await
    }

    async fn deduct_paid(
        &self,
        user_id: &UserId,
        credits: i64,
        subject: ChargeSubject<'_>,
    ) -> Result<Settlement, ApiError> {
        let plan = ChargePlan::Paid { credits };
        if credits == 0 {
            let user = self.require_user(user_id).await?;
            return Ok(Settlement {
                plan,
                credits_charged: 0,
                paid_credits: user.paid_credits,
            });
        }

        let tx = CreditTransaction::transformation_charge(
            *user_id,
            credits,
            0,
            subject.transformation_id,
            subject.transformation_type,
        );
        let tx = with_key(tx, subject);
        let balance = self.store.deduct_paid_credits(user_id, credits, &tx).await?;

        tracing::info!(
            user_id = %user_id,
            credits = credits,
            balance = balance,
            transformation_type = %subject.transformation_type,
            "Credits deducted"
        );

        Ok(Settlement {
            plan,
            credits_charged: credits,
            paid_credits: balance,
        })
    }
}

/// The waiver applied to a result that was simulated after the plan was made.
#[must_use]
pub const fn simulated_waiver() -> ChargePlan {
    ChargePlan::Waived {
        reason: ChargeWaiver::Simulated,
    }
}

fn with_key(tx: CreditTransaction, subject: ChargeSubject<'_>) -> CreditTransaction {
    let Some(key) = subject.transaction_key else {
        return tx;
    };
    let mut metadata = tx.metadata.clone();
    if let Some(map) = metadata.as_object_mut() {
        map.insert("transaction_key".into(), key.into());
    }
    tx.with_metadata(metadata)
}

#[cfg(test)]
mod tests {
    use chrono::Duration;
    use image_lab_core::TransactionType;
    use image_lab_store::MemoryStore;

    use super::*;

    fn subject() -> ChargeSubject<'static> {
        ChargeSubject {
            transformation_id: None,
            transformation_type: "studio-lighting",
            transaction_key: Some("img-studio-lighting-1"),
        }
    }

    async fn ledger_with(user: User) -> (CreditLedger, Arc<MemoryStore>) {
        let store = Arc::new(MemoryStore::new());
        store.create_user(&user).await.unwrap();
        (CreditLedger::new(store.clone()), store)
    }

    fn spent_user(paid: i64) -> User {
        let mut user = User::new(UserId::generate(), None);
        user.paid_credits = paid;
        user.free_credits_used = true;
        user.last_free_credit = Some(Utc::now() - Duration::days(2));
        user
    }

    #[tokio::test]
    async fn paid_charge_then_test_mode() {
        let user = spent_user(3);
        let (ledger, _store) = ledger_with(user.clone()).await;

        let settled = ledger.charge(&user.id, 2, false, subject()).await.unwrap();
        assert_eq!(settled.credits_charged, 2);
        assert_eq!(settled.paid_credits, 1);

        let settled = ledger.charge(&user.id, 2, true, subject()).await.unwrap();
        assert_eq!(settled.credits_charged, 0);
        assert_eq!(settled.paid_credits, 1);
    }

    #[tokio::test]
    async fn free_credit_pays_whole_request() {
        let mut user = User::new(UserId::generate(), None);
        user.paid_credits = 1;
        let (ledger, store) = ledger_with(user.clone()).await;

        let settled = ledger.charge(&user.id, 5, false, subject()).await.unwrap();
        assert_eq!(settled.plan, ChargePlan::FreeCredit);
        assert_eq!(settled.paid_credits, 1);

        let txs = store.list_transactions(&user.id, 10, 0).await.unwrap();
        assert_eq!(txs.len(), 1);
        assert_eq!(txs[0].transaction_type, TransactionType::FreeCredit);
        assert_eq!(txs[0].metadata["transaction_key"], "img-studio-lighting-1");
    }

    #[tokio::test]
    async fn preflight_rejects_before_work() {
        let user = spent_user(1);
        let (ledger, _store) = ledger_with(user.clone()).await;

        let err = ledger.preflight(&user.id, 2, false).await.unwrap_err();
        assert!(matches!(
            err,
            ApiError::InsufficientCredits {
                balance: 1,
                required: 2
            }
        ));
    }

    #[tokio::test]
    async fn raced_free_credit_falls_back_to_paid() {
        let mut user = User::new(UserId::generate(), None);
        user.paid_credits = 4;
        let (ledger, store) = ledger_with(user.clone()).await;

        let plan = ledger.preflight(&user.id, 3, false).await.unwrap();
        assert_eq!(plan, ChargePlan::FreeCredit);

        store.update_user_credits(&user.id, true, None).await.unwrap();

        let settled = ledger.settle(&user.id, plan, 3, subject()).await.unwrap();
        assert_eq!(settled.plan, ChargePlan::Paid { credits: 3 });
        assert_eq!(settled.paid_credits, 1);
    }

    #[tokio::test]
    async fn summary_reports_next_free_credit() {
        let user = spent_user(7);
        let last = user.last_free_credit.unwrap();
        let (ledger, _store) = ledger_with(user.clone()).await;

        let summary = ledger.summary(&user.id).await.unwrap();
        assert!(!summary.free_credit_available);
        assert_eq!(summary.paid_credits, 7);
        assert_eq!(
            summary.next_free_credit_at,
            Some(last + User::free_credit_window())
        );
    }

    #[tokio::test]
    async fn unknown_user_is_not_found() {
        let ledger = CreditLedger::new(Arc::new(MemoryStore::new()));
        let err = ledger.summary(&UserId::generate()).await.unwrap_err();
        assert!(matches!(err, ApiError::NotFound(_)));
    }
}
