//! `PostgreSQL` storage implementation.
//!
//! Balance changes are single conditional `UPDATE ... RETURNING` statements,
//! run inside a database transaction together with the audit row they
//! produce. Concurrent deductions therefore cannot overdraw a balance.

use std::collections::HashSet;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::{PgPool, PgPoolOptions, PgRow};
use sqlx::types::Json;
use sqlx::{PgConnection, Row};

use image_lab_core::{
    CreditTransaction, ImageId, Payment, PaymentId, PaymentStatus, ResultMode, Transformation,
    TransformationId, TransformationOutcome, User, UserId, UserImage,
};

use crate::error::{is_unique_violation, Result, StoreError};
use crate::Store;

/// PostgreSQL-backed storage implementation.
#[derive(Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    /// Connect to the database at `url`.
    ///
    /// # Errors
    ///
    /// Returns an error if the pool cannot be created.
    pub async fn connect(url: &str, max_connections: u32) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .connect(url)
            .await?;
        Ok(Self { pool })
    }

    /// Create a store whose connections are opened on first use.
    ///
    /// # Errors
    ///
    /// Returns an error if `url` cannot be parsed.
    pub fn connect_lazy(url: &str, max_connections: u32) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .connect_lazy(url)?;
        Ok(Self { pool })
    }

    /// Wrap an existing pool.
    #[must_use]
    pub fn from_pool(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Apply the embedded migrations.
    ///
    /// # Errors
    ///
    /// Returns an error if a migration fails.
    pub async fn migrate(&self) -> Result<()> {
        sqlx::migrate!("./migrations")
            .run(&self.pool)
            .await
            .map_err(|e| StoreError::Database(e.to_string()))
    }

    /// The underlying pool.
    #[must_use]
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

fn to_limit(n: usize) -> i64 {
    i64::try_from(n).unwrap_or(i64::MAX)
}

fn decode_err(e: impl ToString) -> StoreError {
    StoreError::Serialization(e.to_string())
}

fn user_from_row(row: &PgRow) -> Result<User> {
    Ok(User {
        id: UserId::from_uuid(row.try_get("id")?),
        email: row.try_get("email")?,
        free_credits_used: row.try_get("free_credits_used")?,
        last_free_credit: row.try_get("last_free_credit")?,
        paid_credits: row.try_get("paid_credits")?,
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
    })
}

fn transaction_from_row(row: &PgRow) -> Result<CreditTransaction> {
    let id: String = row.try_get("id")?;
    let transaction_type: String = row.try_get("transaction_type")?;
    Ok(CreditTransaction {
        id: id.parse().map_err(decode_err)?,
        user_id: UserId::from_uuid(row.try_get("user_id")?),
        amount: row.try_get("amount")?,
        transaction_type: transaction_type.parse()?,
        balance_after: row.try_get("balance_after")?,
        description: row.try_get("description")?,
        metadata: row.try_get("metadata")?,
        created_at: row.try_get("created_at")?,
    })
}

fn transformation_from_row(row: &PgRow) -> Result<Transformation> {
    let status: String = row.try_get("status")?;
    let parent_id: Option<uuid::Uuid> = row.try_get("parent_id")?;
    let result_mode: Option<Json<ResultMode>> = row.try_get("result_mode")?;
    Ok(Transformation {
        id: TransformationId::from_uuid(row.try_get("id")?),
        user_id: UserId::from_uuid(row.try_get("user_id")?),
        input_path: row.try_get("input_path")?,
        prompt: row.try_get("prompt")?,
        transformation_type: row.try_get("transformation_type")?,
        status: status.parse()?,
        output_paths: row.try_get("output_paths")?,
        error: row.try_get("error")?,
        edits_used: row.try_get("edits_used")?,
        parent_id: parent_id.map(TransformationId::from_uuid),
        result_mode: result_mode.map(|Json(mode)| mode),
        credits_charged: row.try_get("credits_charged")?,
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
    })
}

fn image_from_row(row: &PgRow) -> Result<UserImage> {
    Ok(UserImage {
        id: ImageId::from_uuid(row.try_get("id")?),
        user_id: UserId::from_uuid(row.try_get("user_id")?),
        path: row.try_get("path")?,
        original_name: row.try_get("original_name")?,
        content_type: row.try_get("content_type")?,
        size_bytes: row.try_get("size_bytes")?,
        created_at: row.try_get("created_at")?,
    })
}

fn payment_from_row(row: &PgRow) -> Result<Payment> {
    let status: String = row.try_get("status")?;
    Ok(Payment {
        id: PaymentId::from_uuid(row.try_get("id")?),
        event_id: row.try_get("event_id")?,
        user_id: UserId::from_uuid(row.try_get("user_id")?),
        credits: row.try_get("credits")?,
        amount_cents: row.try_get("amount_cents")?,
        currency: row.try_get("currency")?,
        status: PaymentStatus::from_str_lossy(&status),
        created_at: row.try_get("created_at")?,
    })
}

/// Write an audit row with the balance the update actually produced.
async fn insert_transaction(
    conn: &mut PgConnection,
    transaction: &CreditTransaction,
    balance_after: i64,
) -> Result<()> {
    sqlx::query(
        r"
        INSERT INTO credit_transactions
            (id, user_id, amount, transaction_type, balance_after, description, metadata, created_at)
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
        ",
    )
    .bind(transaction.id.to_string())
    .bind(*transaction.user_id.as_uuid())
    .bind(transaction.amount)
    .bind(transaction.transaction_type.as_str())
    .bind(balance_after)
    .bind(&transaction.description)
    .bind(&transaction.metadata)
    .bind(transaction.created_at)
    .execute(conn)
    .await?;
    Ok(())
}

async fn current_balance(conn: &mut PgConnection, user_id: &UserId) -> Result<Option<i64>> {
    let balance = sqlx::query_scalar("SELECT paid_credits FROM users WHERE id = $1")
        .bind(*user_id.as_uuid())
        .fetch_optional(conn)
        .await?;
    Ok(balance)
}

async fn lock_transformation(
    conn: &mut PgConnection,
    id: &TransformationId,
) -> Result<Transformation> {
    let row = sqlx::query("SELECT * FROM transformations WHERE id = $1 FOR UPDATE")
        .bind(*id.as_uuid())
        .fetch_optional(conn)
        .await?
        .ok_or_else(|| StoreError::not_found("transformation", id))?;
    transformation_from_row(&row)
}

async fn save_transformation_state(
    conn: &mut PgConnection,
    transformation: &Transformation,
) -> Result<()> {
    sqlx::query(
        r"
        UPDATE transformations
        SET status = $2, output_paths = $3, error = $4, result_mode = $5,
            credits_charged = $6, updated_at = $7
        WHERE id = $1
        ",
    )
    .bind(*transformation.id.as_uuid())
    .bind(transformation.status.as_str())
    .bind(&transformation.output_paths)
    .bind(&transformation.error)
    .bind(transformation.result_mode.clone().map(Json))
    .bind(transformation.credits_charged)
    .bind(transformation.updated_at)
    .execute(conn)
    .await?;
    Ok(())
}

#[async_trait]
impl Store for PgStore {
    async fn ping(&self) -> Result<()> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }

    // =========================================================================
    // Users and credits
    // =========================================================================

    async fn create_user(&self, user: &User) -> Result<()> {
        sqlx::query(
            r"
            INSERT INTO users
                (id, email, free_credits_used, last_free_credit, paid_credits, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            ",
        )
        .bind(*user.id.as_uuid())
        .bind(&user.email)
        .bind(user.free_credits_used)
        .bind(user.last_free_credit)
        .bind(user.paid_credits.max(0))
        .bind(user.created_at)
        .bind(user.updated_at)
        .execute(&self.pool)
        .await
        .map_err(|e| {
            if is_unique_violation(&e) {
                StoreError::Conflict(format!("user {} already exists", user.id))
            } else {
                e.into()
            }
        })?;
        Ok(())
    }

    async fn get_user(&self, user_id: &UserId) -> Result<Option<User>> {
        sqlx::query("SELECT * FROM users WHERE id = $1")
            .bind(*user_id.as_uuid())
            .fetch_optional(&self.pool)
            .await?
            .as_ref()
            .map(user_from_row)
            .transpose()
    }

    async fn check_and_reset_monthly_free_credit(&self, user_id: &UserId) -> Result<bool> {
        let cutoff = Utc::now() - User::free_credit_window();
        let mut tx = self.pool.begin().await?;

        let reset = sqlx::query(
            r"
            UPDATE users
            SET free_credits_used = FALSE, updated_at = NOW()
            WHERE id = $1
              AND free_credits_used
              AND (last_free_credit IS NULL OR last_free_credit <= $2)
            ",
        )
        .bind(*user_id.as_uuid())
        .bind(cutoff)
        .execute(&mut *tx)
        .await?;

        let used: Option<bool> =
            sqlx::query_scalar("SELECT free_credits_used FROM users WHERE id = $1")
                .bind(*user_id.as_uuid())
                .fetch_optional(&mut *tx)
                .await?;
        tx.commit().await?;

        if reset.rows_affected() > 0 {
            tracing::debug!(user_id = %user_id, "monthly free credit reset");
        }
        used.map(|used| !used)
            .ok_or_else(|| StoreError::not_found("user", user_id))
    }

    async fn update_user_credits(
        &self,
        user_id: &UserId,
        used_free_credit: bool,
        paid_credits: Option<i64>,
    ) -> Result<User> {
        let mut tx = self.pool.begin().await?;

        let row = sqlx::query("SELECT * FROM users WHERE id = $1 FOR UPDATE")
            .bind(*user_id.as_uuid())
            .fetch_optional(&mut *tx)
            .await?
            .ok_or_else(|| StoreError::not_found("user", user_id))?;
        let mut user = user_from_row(&row)?;
        let previous = user.paid_credits;
        user.apply_credit_update(used_free_credit, paid_credits, Utc::now());

        sqlx::query(
            r"
            UPDATE users
            SET free_credits_used = $2, last_free_credit = $3, paid_credits = $4, updated_at = $5
            WHERE id = $1
            ",
        )
        .bind(*user.id.as_uuid())
        .bind(user.free_credits_used)
        .bind(user.last_free_credit)
        .bind(user.paid_credits)
        .bind(user.updated_at)
        .execute(&mut *tx)
        .await?;

        if user.paid_credits != previous {
            let delta = user.paid_credits - previous;
            let audit = CreditTransaction::adjustment(
                user.id,
                delta,
                user.paid_credits,
                format!("Balance set to {}", user.paid_credits),
            );
            insert_transaction(&mut tx, &audit, user.paid_credits).await?;
        }
        tx.commit().await?;
        Ok(user)
    }

    async fn consume_free_credit(
        &self,
        user_id: &UserId,
        transaction: &CreditTransaction,
    ) -> Result<bool> {
        let cutoff = Utc::now() - User::free_credit_window();
        let mut tx = self.pool.begin().await?;

        let balance: Option<i64> = sqlx::query_scalar(
            r"
            UPDATE users
            SET free_credits_used = TRUE, last_free_credit = NOW(), updated_at = NOW()
            WHERE id = $1
              AND (NOT free_credits_used OR last_free_credit IS NULL OR last_free_credit <= $2)
            RETURNING paid_credits
            ",
        )
        .bind(*user_id.as_uuid())
        .bind(cutoff)
        .fetch_optional(&mut *tx)
        .await?;

        let Some(balance) = balance else {
            return match current_balance(&mut tx, user_id).await? {
                Some(_) => Ok(false),
                None => Err(StoreError::not_found("user", user_id)),
            };
        };

        insert_transaction(&mut tx, transaction, balance).await?;
        tx.commit().await?;
        Ok(true)
    }

    async fn deduct_paid_credits(
        &self,
        user_id: &UserId,
        amount: i64,
        transaction: &CreditTransaction,
    ) -> Result<i64> {
        if amount <= 0 {
            return Err(StoreError::InvalidInput(format!(
                "deduction must be positive, got {amount}"
            )));
        }
        let mut tx = self.pool.begin().await?;

        let balance: Option<i64> = sqlx::query_scalar(
            r"
            UPDATE users
            SET paid_credits = paid_credits - $2, updated_at = NOW()
            WHERE id = $1 AND paid_credits >= $2
            RETURNING paid_credits
            ",
        )
        .bind(*user_id.as_uuid())
        .bind(amount)
        .fetch_optional(&mut *tx)
        .await?;

        let Some(balance) = balance else {
            return match current_balance(&mut tx, user_id).await? {
                Some(balance) => Err(StoreError::InsufficientCredits {
                    balance,
                    required: amount,
                }),
                None => Err(StoreError::not_found("user", user_id)),
            };
        };

        insert_transaction(&mut tx, transaction, balance).await?;
        tx.commit().await?;
        Ok(balance)
    }

    async fn add_paid_credits(
        &self,
        user_id: &UserId,
        amount: i64,
        transaction: &CreditTransaction,
    ) -> Result<i64> {
        if amount <= 0 {
            return Err(StoreError::InvalidInput(format!(
                "credit grant must be positive, got {amount}"
            )));
        }
        let mut tx = self.pool.begin().await?;

        let balance: i64 = sqlx::query_scalar(
            r"
            UPDATE users
            SET paid_credits = paid_credits + $2, updated_at = NOW()
            WHERE id = $1
            RETURNING paid_credits
            ",
        )
        .bind(*user_id.as_uuid())
        .bind(amount)
        .fetch_optional(&mut *tx)
        .await?
        .ok_or_else(|| StoreError::not_found("user", user_id))?;

        insert_transaction(&mut tx, transaction, balance).await?;
        tx.commit().await?;
        Ok(balance)
    }

    async fn list_transactions(
        &self,
        user_id: &UserId,
        limit: usize,
        offset: usize,
    ) -> Result<Vec<CreditTransaction>> {
        sqlx::query(
            r"
            SELECT * FROM credit_transactions
            WHERE user_id = $1
            ORDER BY id DESC
            LIMIT $2 OFFSET $3
            ",
        )
        .bind(*user_id.as_uuid())
        .bind(to_limit(limit))
        .bind(to_limit(offset))
        .fetch_all(&self.pool)
        .await?
        .iter()
        .map(transaction_from_row)
        .collect()
    }

    // =========================================================================
    // Transformations
    // =========================================================================

    async fn create_transformation(&self, transformation: &Transformation) -> Result<()> {
        sqlx::query(
            r"
            INSERT INTO transformations
                (id, user_id, input_path, prompt, transformation_type, status, output_paths,
                 error, edits_used, parent_id, result_mode, credits_charged, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14)
            ",
        )
        .bind(*transformation.id.as_uuid())
        .bind(*transformation.user_id.as_uuid())
        .bind(&transformation.input_path)
        .bind(&transformation.prompt)
        .bind(&transformation.transformation_type)
        .bind(transformation.status.as_str())
        .bind(&transformation.output_paths)
        .bind(&transformation.error)
        .bind(transformation.edits_used)
        .bind(transformation.parent_id.map(|id| *id.as_uuid()))
        .bind(transformation.result_mode.clone().map(Json))
        .bind(transformation.credits_charged)
        .bind(transformation.created_at)
        .bind(transformation.updated_at)
        .execute(&self.pool)
        .await
        .map_err(|e| {
            if is_unique_violation(&e) {
                StoreError::Conflict(format!("transformation {} already exists", transformation.id))
            } else {
                e.into()
            }
        })?;
        Ok(())
    }

    async fn get_transformation(&self, id: &TransformationId) -> Result<Option<Transformation>> {
        sqlx::query("SELECT * FROM transformations WHERE id = $1")
            .bind(*id.as_uuid())
            .fetch_optional(&self.pool)
            .await?
            .as_ref()
            .map(transformation_from_row)
            .transpose()
    }

    async fn list_transformations_by_user(
        &self,
        user_id: &UserId,
        limit: usize,
        offset: usize,
    ) -> Result<Vec<Transformation>> {
        sqlx::query(
            r"
            SELECT * FROM transformations
            WHERE user_id = $1
            ORDER BY created_at DESC, id
            LIMIT $2 OFFSET $3
            ",
        )
        .bind(*user_id.as_uuid())
        .bind(to_limit(limit))
        .bind(to_limit(offset))
        .fetch_all(&self.pool)
        .await?
        .iter()
        .map(transformation_from_row)
        .collect()
    }

    async fn start_transformation(&self, id: &TransformationId) -> Result<Transformation> {
        let mut tx = self.pool.begin().await?;
        let mut transformation = lock_transformation(&mut tx, id).await?;
        transformation.start(Utc::now())?;
        save_transformation_state(&mut tx, &transformation).await?;
        tx.commit().await?;
        Ok(transformation)
    }

    async fn finish_transformation(
        &self,
        id: &TransformationId,
        outcome: TransformationOutcome,
    ) -> Result<Transformation> {
        let mut tx = self.pool.begin().await?;
        let mut transformation = lock_transformation(&mut tx, id).await?;
        transformation.finish(outcome, Utc::now())?;
        save_transformation_state(&mut tx, &transformation).await?;
        tx.commit().await?;
        Ok(transformation)
    }

    async fn increment_edits(&self, id: &TransformationId) -> Result<i32> {
        sqlx::query_scalar(
            r"
            UPDATE transformations
            SET edits_used = edits_used + 1, updated_at = NOW()
            WHERE id = $1
            RETURNING edits_used
            ",
        )
        .bind(*id.as_uuid())
        .fetch_optional(&self.pool)
        .await?
        .ok_or_else(|| StoreError::not_found("transformation", id))
    }

    async fn list_transformations_created_before(
        &self,
        cutoff: DateTime<Utc>,
        limit: usize,
    ) -> Result<Vec<Transformation>> {
        sqlx::query(
            r"
            SELECT * FROM transformations
            WHERE created_at < $1
            ORDER BY created_at
            LIMIT $2
            ",
        )
        .bind(cutoff)
        .bind(to_limit(limit))
        .fetch_all(&self.pool)
        .await?
        .iter()
        .map(transformation_from_row)
        .collect()
    }

    async fn delete_transformation(&self, id: &TransformationId) -> Result<()> {
        let result = sqlx::query("DELETE FROM transformations WHERE id = $1")
            .bind(*id.as_uuid())
            .execute(&self.pool)
            .await?;
        if result.rows_affected() == 0 {
            return Err(StoreError::not_found("transformation", id));
        }
        Ok(())
    }

    // =========================================================================
    // Uploaded images
    // =========================================================================

    async fn put_user_image(&self, image: &UserImage) -> Result<()> {
        sqlx::query(
            r"
            INSERT INTO user_images
                (id, user_id, path, original_name, content_type, size_bytes, created_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            ",
        )
        .bind(*image.id.as_uuid())
        .bind(*image.user_id.as_uuid())
        .bind(&image.path)
        .bind(&image.original_name)
        .bind(&image.content_type)
        .bind(image.size_bytes)
        .bind(image.created_at)
        .execute(&self.pool)
        .await
        .map_err(|e| {
            if is_unique_violation(&e) {
                StoreError::Conflict(format!("image path {} already recorded", image.path))
            } else {
                e.into()
            }
        })?;
        Ok(())
    }

    async fn list_user_images_created_before(
        &self,
        cutoff: DateTime<Utc>,
        limit: usize,
    ) -> Result<Vec<UserImage>> {
        sqlx::query(
            r"
            SELECT * FROM user_images
            WHERE created_at < $1
            ORDER BY created_at
            LIMIT $2
            ",
        )
        .bind(cutoff)
        .bind(to_limit(limit))
        .fetch_all(&self.pool)
        .await?
        .iter()
        .map(image_from_row)
        .collect()
    }

    async fn delete_user_image(&self, id: &ImageId) -> Result<()> {
        let result = sqlx::query("DELETE FROM user_images WHERE id = $1")
            .bind(*id.as_uuid())
            .execute(&self.pool)
            .await?;
        if result.rows_affected() == 0 {
            return Err(StoreError::not_found("image", id));
        }
        Ok(())
    }

    async fn referenced_paths(&self) -> Result<HashSet<String>> {
        let paths: Vec<String> = sqlx::query_scalar(
            r"
            SELECT path FROM user_images
            UNION
            SELECT input_path FROM transformations
            UNION
            SELECT unnest(output_paths) FROM transformations
            ",
        )
        .fetch_all(&self.pool)
        .await?;
        Ok(paths.into_iter().collect())
    }

    // =========================================================================
    // Payments
    // =========================================================================

    async fn record_payment(&self, payment: &Payment) -> Result<i64> {
        let mut tx = self.pool.begin().await?;

        let balance: i64 =
            sqlx::query_scalar("SELECT paid_credits FROM users WHERE id = $1 FOR UPDATE")
                .bind(*payment.user_id.as_uuid())
                .fetch_optional(&mut *tx)
                .await?
                .ok_or_else(|| StoreError::not_found("user", payment.user_id))?;

        sqlx::query(
            r"
            INSERT INTO payments
                (id, event_id, user_id, credits, amount_cents, currency, status, created_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            ",
        )
        .bind(*payment.id.as_uuid())
        .bind(&payment.event_id)
        .bind(*payment.user_id.as_uuid())
        .bind(payment.credits)
        .bind(payment.amount_cents)
        .bind(&payment.currency)
        .bind(payment.status.as_str())
        .bind(payment.created_at)
        .execute(&mut *tx)
        .await
        .map_err(|e| {
            if is_unique_violation(&e) {
                StoreError::DuplicateEvent {
                    event_id: payment.event_id.clone(),
                }
            } else {
                e.into()
            }
        })?;

        if !payment.status.grants_credits() || payment.credits <= 0 {
            tx.commit().await?;
            return Ok(balance);
        }

        let balance: i64 = sqlx::query_scalar(
            r"
            UPDATE users
            SET paid_credits = paid_credits + $2, updated_at = NOW()
            WHERE id = $1
            RETURNING paid_credits
            ",
        )
        .bind(*payment.user_id.as_uuid())
        .bind(payment.credits)
        .fetch_one(&mut *tx)
        .await?;

        let audit =
            CreditTransaction::purchase(payment.user_id, payment.credits, balance, &payment.event_id);
        insert_transaction(&mut tx, &audit, balance).await?;
        tx.commit().await?;
        Ok(balance)
    }

    async fn list_payments(&self, user_id: &UserId, limit: usize) -> Result<Vec<Payment>> {
        sqlx::query(
            r"
            SELECT * FROM payments
            WHERE user_id = $1
            ORDER BY created_at DESC
            LIMIT $2
            ",
        )
        .bind(*user_id.as_uuid())
        .bind(to_limit(limit))
        .fetch_all(&self.pool)
        .await?
        .iter()
        .map(payment_from_row)
        .collect()
    }
}
