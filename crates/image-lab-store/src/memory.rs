//! In-memory storage implementation.
//!
//! Used when no database is configured and by the test suites. All state
//! lives behind one mutex, so every operation is atomic.

use std::collections::{HashMap, HashSet};
use std::sync::{Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use image_lab_core::{
    CreditTransaction, ImageId, Payment, Transformation, TransformationId, TransformationOutcome,
    User, UserId, UserImage,
};

use crate::error::{Result, StoreError};
use crate::Store;

#[derive(Default)]
struct Inner {
    users: HashMap<UserId, User>,
    transactions: Vec<CreditTransaction>,
    transformations: HashMap<TransformationId, Transformation>,
    images: HashMap<ImageId, UserImage>,
    payments: Vec<Payment>,
}

impl Inner {
    fn user_mut(&mut self, user_id: &UserId) -> Result<&mut User> {
        self.users
            .get_mut(user_id)
            .ok_or_else(|| StoreError::not_found("user", user_id))
    }

    fn transformation_mut(&mut self, id: &TransformationId) -> Result<&mut Transformation> {
        self.transformations
            .get_mut(id)
            .ok_or_else(|| StoreError::not_found("transformation", id))
    }

    fn push_transaction(&mut self, transaction: &CreditTransaction, balance_after: i64) {
        let mut transaction = transaction.clone();
        transaction.balance_after = balance_after;
        self.transactions.push(transaction);
    }
}

/// In-process storage backed by hash maps.
#[derive(Default)]
pub struct MemoryStore {
    inner: Mutex<Inner>,
}

impl MemoryStore {
    /// Create an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

fn page<T: Clone>(items: Vec<&T>, limit: usize, offset: usize) -> Vec<T> {
    items.into_iter().skip(offset).take(limit).cloned().collect()
}

#[async_trait]
impl Store for MemoryStore {
    async fn ping(&self) -> Result<()> {
        Ok(())
    }

    async fn create_user(&self, user: &User) -> Result<()> {
        let mut inner = self.lock();
        if inner.users.contains_key(&user.id) {
            return Err(StoreError::Conflict(format!("user {} already exists", user.id)));
        }
        let mut user = user.clone();
        user.paid_credits = user.paid_credits.max(0);
        inner.users.insert(user.id, user);
        Ok(())
    }

    async fn get_user(&self, user_id: &UserId) -> Result<Option<User>> {
        Ok(self.lock().users.get(user_id).cloned())
    }

    async fn check_and_reset_monthly_free_credit(&self, user_id: &UserId) -> Result<bool> {
        let mut inner = self.lock();
        let user = inner.user_mut(user_id)?;
        Ok(user.check_and_reset_free_credit(Utc::now()))
    }

    async fn update_user_credits(
        &self,
        user_id: &UserId,
        used_free_credit: bool,
        paid_credits: Option<i64>,
    ) -> Result<User> {
        let mut inner = self.lock();
        let user = inner.user_mut(user_id)?;
        let previous = user.paid_credits;
        user.apply_credit_update(used_free_credit, paid_credits, Utc::now());
        let user = user.clone();

        if user.paid_credits != previous {
            let audit = CreditTransaction::adjustment(
                user.id,
                user.paid_credits - previous,
                user.paid_credits,
                format!("Balance set to {}", user.paid_credits),
            );
            inner.push_transaction(&audit, user.paid_credits);
        }
        Ok(user)
    }

    async fn consume_free_credit(
        &self,
        user_id: &UserId,
        transaction: &CreditTransaction,
    ) -> Result<bool> {
        let mut inner = self.lock();
        let user = inner.user_mut(user_id)?;
        if !user.consume_free_credit(Utc::now()) {
            return Ok(false);
        }
        let balance = user.paid_credits;
        inner.push_transaction(transaction, balance);
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
        let mut inner = self.lock();
        let user = inner.user_mut(user_id)?;
        if !user.has_sufficient_credits(amount) {
            return Err(StoreError::InsufficientCredits {
                balance: user.paid_credits,
                required: amount,
            });
        }
        user.paid_credits -= amount;
        user.updated_at = Utc::now();
        let balance = user.paid_credits;
        inner.push_transaction(transaction, balance);
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
        let mut inner = self.lock();
        let user = inner.user_mut(user_id)?;
        user.paid_credits += amount;
        user.updated_at = Utc::now();
        let balance = user.paid_credits;
        inner.push_transaction(transaction, balance);
        Ok(balance)
    }

    async fn list_transactions(
        &self,
        user_id: &UserId,
        limit: usize,
        offset: usize,
    ) -> Result<Vec<CreditTransaction>> {
        let inner = self.lock();
        // Insertion order is chronological; ids within one millisecond are not.
        let matching: Vec<&CreditTransaction> = inner
            .transactions
            .iter()
            .rev()
            .filter(|t| t.user_id == *user_id)
            .collect();
        Ok(page(matching, limit, offset))
    }

    async fn create_transformation(&self, transformation: &Transformation) -> Result<()> {
        let mut inner = self.lock();
        if inner.transformations.contains_key(&transformation.id) {
            return Err(StoreError::Conflict(format!(
                "transformation {} already exists",
                transformation.id
            )));
        }
        inner
            .transformations
            .insert(transformation.id, transformation.clone());
        Ok(())
    }

    async fn get_transformation(&self, id: &TransformationId) -> Result<Option<Transformation>> {
        Ok(self.lock().transformations.get(id).cloned())
    }

    async fn list_transformations_by_user(
        &self,
        user_id: &UserId,
        limit: usize,
        offset: usize,
    ) -> Result<Vec<Transformation>> {
        let inner = self.lock();
        let mut matching: Vec<&Transformation> = inner
            .transformations
            .values()
            .filter(|t| t.user_id == *user_id)
            .collect();
        matching.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(page(matching, limit, offset))
    }

    async fn start_transformation(&self, id: &TransformationId) -> Result<Transformation> {
        let mut inner = self.lock();
        let transformation = inner.transformation_mut(id)?;
        transformation.start(Utc::now())?;
        Ok(transformation.clone())
    }

    async fn finish_transformation(
        &self,
        id: &TransformationId,
        outcome: TransformationOutcome,
    ) -> Result<Transformation> {
        let mut inner = self.lock();
        let transformation = inner.transformation_mut(id)?;
        transformation.finish(outcome, Utc::now())?;
        Ok(transformation.clone())
    }

    async fn increment_edits(&self, id: &TransformationId) -> Result<i32> {
        let mut inner = self.lock();
        let transformation = inner.transformation_mut(id)?;
        transformation.edits_used += 1;
        transformation.updated_at = Utc::now();
        Ok(transformation.edits_used)
    }

    async fn list_transformations_created_before(
        &self,
        cutoff: DateTime<Utc>,
        limit: usize,
    ) -> Result<Vec<Transformation>> {
        let inner = self.lock();
        let mut matching: Vec<&Transformation> = inner
            .transformations
            .values()
            .filter(|t| t.created_at < cutoff)
            .collect();
        matching.sort_by_key(|t| t.created_at);
        Ok(page(matching, limit, 0))
    }

    async fn delete_transformation(&self, id: &TransformationId) -> Result<()> {
        let mut inner = self.lock();
        inner
            .transformations
            .remove(id)
            .ok_or_else(|| StoreError::not_found("transformation", id))?;
        for child in inner.transformations.values_mut() {
            if child.parent_id == Some(*id) {
                child.parent_id = None;
            }
        }
        Ok(())
    }

    async fn put_user_image(&self, image: &UserImage) -> Result<()> {
        let mut inner = self.lock();
        if inner.images.values().any(|i| i.path == image.path) {
            return Err(StoreError::Conflict(format!(
                "image path {} already recorded",
                image.path
            )));
        }
        inner.images.insert(image.id, image.clone());
        Ok(())
    }

    async fn list_user_images_created_before(
        &self,
        cutoff: DateTime<Utc>,
        limit: usize,
    ) -> Result<Vec<UserImage>> {
        let inner = self.lock();
        let mut matching: Vec<&UserImage> = inner
            .images
            .values()
            .filter(|i| i.created_at < cutoff)
            .collect();
        matching.sort_by_key(|i| i.created_at);
        Ok(page(matching, limit, 0))
    }

    async fn delete_user_image(&self, id: &ImageId) -> Result<()> {
        self.lock()
            .images
            .remove(id)
            .map(|_| ())
            .ok_or_else(|| StoreError::not_found("image", id))
    }

    async fn referenced_paths(&self) -> Result<HashSet<String>> {
        let inner = self.lock();
        let images = inner.images.values().map(|i| i.path.clone());
        let transformations = inner.transformations.values().flat_map(|t| {
            std::iter::once(t.input_path.clone()).chain(t.output_paths.iter().cloned())
        });
        Ok(images.chain(transformations).collect())
    }

    async fn record_payment(&self, payment: &Payment) -> Result<i64> {
        let mut inner = self.lock();
        if !inner.users.contains_key(&payment.user_id) {
            return Err(StoreError::not_found("user", payment.user_id));
        }
        if inner.payments.iter().any(|p| p.event_id == payment.event_id) {
            return Err(StoreError::DuplicateEvent {
                event_id: payment.event_id.clone(),
            });
        }
        let user = inner.user_mut(&payment.user_id)?;
        if !payment.status.grants_credits() || payment.credits <= 0 {
            let balance = user.paid_credits;
            inner.payments.push(payment.clone());
            return Ok(balance);
        }

        user.paid_credits += payment.credits;
        user.updated_at = Utc::now();
        let balance = user.paid_credits;
        let audit =
            CreditTransaction::purchase(payment.user_id, payment.credits, balance, &payment.event_id);
        inner.push_transaction(&audit, balance);
        inner.payments.push(payment.clone());
        Ok(balance)
    }

    async fn list_payments(&self, user_id: &UserId, limit: usize) -> Result<Vec<Payment>> {
        let inner = self.lock();
        let mut matching: Vec<&Payment> = inner
            .payments
            .iter()
            .filter(|p| p.user_id == *user_id)
            .collect();
        matching.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(page(matching, limit, 0))
    }
}
