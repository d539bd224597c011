//! Storage layer for image-lab.
//!
//! This crate persists users, their credit ledger, uploaded images,
//! transformations and payments.
//!
//! # Backends
//!
//! - [`PgStore`]: PostgreSQL via `sqlx`, with embedded migrations. Every
//!   balance change is one conditional statement inside a database
//!   transaction that also writes the audit row.
//! - [`MemoryStore`]: a mutex-guarded in-process store for development and
//!   tests.
//!
//! # Example
//!
//! ```no_run
//! use image_lab_core::{User, UserId};
//! use image_lab_store::{MemoryStore, Store};
//!
//! # async fn example() -> image_lab_store::Result<()> {
//! let store = MemoryStore::new();
//! let user = User::new(UserId::generate(), None);
//! store.create_user(&user).await?;
//! assert!(store.check_and_reset_monthly_free_credit(&user.id).await?);
//! # Ok(())
//! # }
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]

pub mod error;
pub mod memory;
pub mod postgres;

use std::collections::HashSet;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

pub use error::{Result, StoreError};
pub use memory::MemoryStore;
pub use postgres::PgStore;

use image_lab_core::{
    CreditTransaction, ImageId, Payment, Transformation, TransformationId, TransformationOutcome,
    User, UserId, UserImage,
};

/// The storage trait defining all database operations.
///
/// Ledger operations take a prepared [`CreditTransaction`]; its
/// `balance_after` is replaced with the balance the update actually produced
/// before the row is written.
#[async_trait]
pub trait Store: Send + Sync {
    /// Check that the backend can serve queries.
    ///
    /// # Errors
    ///
    /// Returns an error if the backend is unreachable.
    async fn ping(&self) -> Result<()>;

    // =========================================================================
    // Users and credits
    // =========================================================================

    /// Insert a new user.
    ///
    /// # Errors
    ///
    /// Returns `StoreError::Conflict` if the user already exists.
    async fn create_user(&self, user: &User) -> Result<()>;

    /// Get a user by ID.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    async fn get_user(&self, user_id: &UserId) -> Result<Option<User>>;

    /// Report whether the monthly free credit is available, clearing the
    /// used flag when the 30-day window has elapsed.
    ///
    /// # Errors
    ///
    /// Returns `StoreError::NotFound` if the user doesn't exist.
    async fn check_and_reset_monthly_free_credit(&self, user_id: &UserId) -> Result<bool>;

    /// Set the paid balance to an absolute value (clamped at zero; `None`
    /// keeps it) and, if `used_free_credit`, mark the free credit as spent now.
    ///
    /// # Errors
    ///
    /// Returns `StoreError::NotFound` if the user doesn't exist.
    async fn update_user_credits(
        &self,
        user_id: &UserId,
        used_free_credit: bool,
        paid_credits: Option<i64>,
    ) -> Result<User>;

    /// Spend the free credit if it is available. Returns whether it was spent.
    ///
    /// # Errors
    ///
    /// Returns `StoreError::NotFound` if the user doesn't exist.
    async fn consume_free_credit(
        &self,
        user_id: &UserId,
        transaction: &CreditTransaction,
    ) -> Result<bool>;

    /// Atomically deduct `amount` paid credits. Returns the new balance.
    ///
    /// # Errors
    ///
    /// - `StoreError::NotFound` if the user doesn't exist.
    /// - `StoreError::InsufficientCredits` if the balance is below `amount`.
    /// - `StoreError::InvalidInput` if `amount` is not positive.
    async fn deduct_paid_credits(
        &self,
        user_id: &UserId,
        amount: i64,
        transaction: &CreditTransaction,
    ) -> Result<i64>;

    /// Atomically add `amount` paid credits. Returns the new balance.
    ///
    /// # Errors
    ///
    /// - `StoreError::NotFound` if the user doesn't exist.
    /// - `StoreError::InvalidInput` if `amount` is not positive.
    async fn add_paid_credits(
        &self,
        user_id: &UserId,
        amount: i64,
        transaction: &CreditTransaction,
    ) -> Result<i64>;

    /// List a user's credit transactions, newest first.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    async fn list_transactions(
        &self,
        user_id: &UserId,
        limit: usize,
        offset: usize,
    ) -> Result<Vec<CreditTransaction>>;

    // =========================================================================
    // Transformations
    // =========================================================================

    /// Insert a new transformation.
    ///
    /// # Errors
    ///
    /// Returns `StoreError::Conflict` if the ID is taken.
    async fn create_transformation(&self, transformation: &Transformation) -> Result<()>;

    /// Get a transformation by ID.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    async fn get_transformation(&self, id: &TransformationId) -> Result<Option<Transformation>>;

    /// List a user's transformations, newest first.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    async fn list_transformations_by_user(
        &self,
        user_id: &UserId,
        limit: usize,
        offset: usize,
    ) -> Result<Vec<Transformation>>;

    /// Move a pending transformation to processing.
    ///
    /// # Errors
    ///
    /// - `StoreError::NotFound` if it doesn't exist.
    /// - `StoreError::Conflict` if it is not pending.
    async fn start_transformation(&self, id: &TransformationId) -> Result<Transformation>;

    /// Apply the terminal outcome. Succeeds at most once per transformation.
    ///
    /// # Errors
    ///
    /// - `StoreError::NotFound` if it doesn't exist.
    /// - `StoreError::Conflict` if it is already terminal.
    async fn finish_transformation(
        &self,
        id: &TransformationId,
        outcome: TransformationOutcome,
    ) -> Result<Transformation>;

    /// Increment the edit counter. Returns the new count.
    ///
    /// # Errors
    ///
    /// Returns `StoreError::NotFound` if it doesn't exist.
    async fn increment_edits(&self, id: &TransformationId) -> Result<i32>;

    /// Transformations created before `cutoff`, oldest first.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    async fn list_transformations_created_before(
        &self,
        cutoff: DateTime<Utc>,
        limit: usize,
    ) -> Result<Vec<Transformation>>;

    /// Delete a transformation row.
    ///
    /// # Errors
    ///
    /// Returns `StoreError::NotFound` if it doesn't exist.
    async fn delete_transformation(&self, id: &TransformationId) -> Result<()>;

    // =========================================================================
    // Uploaded images
    // =========================================================================

    /// Record an uploaded image.
    ///
    /// # Errors
    ///
    /// Returns `StoreError::Conflict` if the path is already recorded.
    async fn put_user_image(&self, image: &UserImage) -> Result<()>;

    /// Uploaded images created before `cutoff`, oldest first.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    async fn list_user_images_created_before(
        &self,
        cutoff: DateTime<Utc>,
        limit: usize,
    ) -> Result<Vec<UserImage>>;

    /// Delete an uploaded image row.
    ///
    /// # Errors
    ///
    /// Returns `StoreError::NotFound` if it doesn't exist.
    async fn delete_user_image(&self, id: &ImageId) -> Result<()>;

    /// Every file path referenced by an image or transformation row.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    async fn referenced_paths(&self) -> Result<HashSet<String>>;

    // =========================================================================
    // Payments
    // =========================================================================

    /// Record a payment and, if its status grants credits, add them to the
    /// paid balance in the same transaction. Returns the resulting balance.
    ///
    /// # Errors
    ///
    /// - `StoreError::DuplicateEvent` if the event id was already recorded.
    /// - `StoreError::NotFound` if the user doesn't exist.
    async fn record_payment(&self, payment: &Payment) -> Result<i64>;

    /// List a user's payments, newest first.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    async fn list_payments(&self, user_id: &UserId, limit: usize) -> Result<Vec<Payment>>;
}
