//! Credit balance, deduction and history handlers.

use std::sync::Arc;

use axum::extract::{Query, State};
use axum::Json;
use serde::{Deserialize, Serialize};

use image_lab_core::{ChargePlan, CreditTransaction, CUSTOM_TRANSFORMATION};

use crate::auth::AuthUser;
use crate::error::ApiError;
use crate::handlers::PageQuery;
use crate::ledger::{ChargeSubject, CreditSummary};
use crate::state::AppState;

/// Get the caller's credit state. Runs the monthly free-credit check.
pub async fn get_credits(
    State(state): State<Arc<AppState>>,
    auth: AuthUser,
) -> Result<Json<CreditSummary>, ApiError> {
    Ok(Json(state.ledger.summary(&auth.user_id).await?))
}

/// Deduction request.
#[derive(Debug, Deserialize)]
pub struct DeductRequest {
    /// Cost of the operation being paid for.
    pub amount: i64,
    /// Client transaction key, recorded for auditing.
    pub transaction_key: Option<String>,
    /// Catalog id or `custom`.
    pub transformation_type: Option<String>,
    /// Skip the deduction entirely.
    #[serde(default)]
    pub test_mode: bool,
}

/// Deduction response.
#[derive(Debug, Serialize)]
pub struct DeductResponse {
    /// Paid credits taken.
    pub deducted: i64,
    /// Whether the monthly free credit paid instead.
    pub used_free_credit: bool,
    /// Whether test mode skipped the deduction.
    pub test_mode: bool,
    /// Paid balance afterwards.
    pub paid_credits: i64,
    /// Echo of the client transaction key.
    pub transaction_key: Option<String>,
}

/// Deduct credits for client-side work.
///
/// Applies the same charge rule as transformations: test mode skips,
/// the free credit pays if available, otherwise `amount` paid credits.
pub async fn deduct_credits(
    State(state): State<Arc<AppState>>,
    auth: AuthUser,
    Json(body): Json<DeductRequest>,
) -> Result<Json<DeductResponse>, ApiError> {
    if body.amount <= 0 {
        return Err(ApiError::BadRequest("amount must be positive".into()));
    }
    if body.test_mode && !state.config.test_mode_allowed {
        return Err(ApiError::BadRequest("test mode is not enabled".into()));
    }

    let transformation_type = body
        .transformation_type
        .as_deref()
        .unwrap_or(CUSTOM_TRANSFORMATION);
    let subject = ChargeSubject {
        transformation_id: None,
        transformation_type,
        transaction_key: body.transaction_key.as_deref(),
    };

    let settled = state
        .ledger
        .charge(&auth.user_id, body.amount, body.test_mode, subject)
        .await?;

    Ok(Json(DeductResponse {
        deducted: settled.credits_charged,
        used_free_credit: settled.plan == ChargePlan::FreeCredit,
        test_mode: !settled.plan.is_charged(),
        paid_credits: settled.paid_credits,
        transaction_key: body.transaction_key,
    }))
}

/// Transaction response.
#[derive(Debug, Serialize)]
pub struct TransactionResponse {
    /// Transaction ID.
    pub id: String,
    /// Amount in credits (positive = credit, negative = debit).
    pub amount: i64,
    /// Transaction type.
    pub transaction_type: String,
    /// Balance after this transaction.
    pub balance_after: i64,
    /// Description.
    pub description: String,
    /// Extra context.
    pub metadata: serde_json::Value,
    /// Timestamp.
    pub created_at: String,
}

impl From<&CreditTransaction> for TransactionResponse {
    fn from(tx: &CreditTransaction) -> Self {
        Self {
            id: tx.id.to_string(),
            amount: tx.amount,
            transaction_type: tx.transaction_type.as_str().to_string(),
            balance_after: tx.balance_after,
            description: tx.description.clone(),
            metadata: tx.metadata.clone(),
            created_at: tx.created_at.to_rfc3339(),
        }
    }
}

/// List transactions response.
#[derive(Debug, Serialize)]
pub struct ListTransactionsResponse {
    /// Transactions (newest first).
    pub transactions: Vec<TransactionResponse>,
    /// Whether there are more transactions.
    pub has_more: bool,
}

/// List the caller's credit history.
pub async fn list_transactions(
    State(state): State<Arc<AppState>>,
    auth: AuthUser,
    Query(query): Query<PageQuery>,
) -> Result<Json<ListTransactionsResponse>, ApiError> {
    state.ledger.require_user(&auth.user_id).await?;

    // Fetch one more than requested to determine has_more
    let limit = query.capped_limit();
    let transactions = state
        .store
        .list_transactions(&auth.user_id, limit + 1, query.offset)
        .await?;

    let has_more = transactions.len() > limit;
    let transactions = transactions
        .iter()
        .take(limit)
        .map(TransactionResponse::from)
        .collect();

    Ok(Json(ListTransactionsResponse {
        transactions,
        has_more,
    }))
}

