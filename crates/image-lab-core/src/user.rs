//! User credit state.
//!
//! A user holds two kinds of credit: one free credit per rolling
//! [`FREE_CREDIT_WINDOW_DAYS`] window, and a balance of paid credits.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use crate::UserId;

/// Length of the rolling free-credit window in days.
pub const FREE_CREDIT_WINDOW_DAYS: i64 = 30;

/// A user record as far as the credit ledger is concerned.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
    /// The user ID.
    pub id: UserId,

    /// Contact email, if the user registered one.
    pub email: Option<String>,

    /// Whether the free credit of the current window has been consumed.
    pub free_credits_used: bool,

    /// When the free credit was last consumed.
    pub last_free_credit: Option<DateTime<Utc>>,

    /// Paid credit balance, never negative.
    pub paid_credits: i64,

    /// When the user was created.
    pub created_at: DateTime<Utc>,

    /// When the user was last updated.
    pub updated_at: DateTime<Utc>,
}

/// Outcome of evaluating the free-credit rule at a point in time.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FreeCreditCheck {
    /// The user has not consumed a free credit in the current window.
    Available,
    /// The window has elapsed; the used flag must be cleared.
    AvailableAfterReset,
    /// The free credit was consumed less than a window ago.
    Unavailable,
}

impl FreeCreditCheck {
    /// Whether a free credit can be spent.
    #[must_use]
    pub const fn is_available(self) -> bool {
        !matches!(self, Self::Unavailable)
    }
}

impl User {
    /// Create a user with no paid credits and an unused free credit.
    #[must_use]
    pub fn new(id: UserId, email: Option<String>) -> Self {
        let now = Utc::now();
        Self {
            id,
            email,
            free_credits_used: false,
            last_free_credit: None,
            paid_credits: 0,
            created_at: now,
            updated_at: now,
        }
    }

    /// The rolling free-credit window.
    #[must_use]
    pub fn free_credit_window() -> Duration {
        Duration::days(FREE_CREDIT_WINDOW_DAYS)
    }

    /// Evaluate the free-credit rule at `now` without mutating.
    ///
    /// A used credit whose timestamp is missing counts as elapsed.
    #[must_use]
    pub fn free_credit_check(&self, now: DateTime<Utc>) -> FreeCreditCheck {
        if !self.free_credits_used {
            return FreeCreditCheck::Available;
        }
        match self.last_free_credit {
            Some(at) if now - at < Self::free_credit_window() => FreeCreditCheck::Unavailable,
            _ => FreeCreditCheck::AvailableAfterReset,
        }
    }

    /// Apply the monthly reset and report availability.
    ///
    /// Both "never used" and "reset now" return `true`.
    pub fn check_and_reset_free_credit(&mut self, now: DateTime<Utc>) -> bool {
        let check = self.free_credit_check(now);
        if check == FreeCreditCheck::AvailableAfterReset {
            self.free_credits_used = false;
            self.updated_at = now;
        }
        check.is_available()
    }

    /// Spend the free credit if one is available. Returns whether it was spent.
    pub fn consume_free_credit(&mut self, now: DateTime<Utc>) -> bool {
        if !self.free_credit_check(now).is_available() {
            return false;
        }
        self.free_credits_used = true;
        self.last_free_credit = Some(now);
        self.updated_at = now;
        true
    }

    /// Overwrite the credit state.
    ///
    /// `paid_credits` is an absolute value, clamped at zero; `None` leaves the
    /// balance unchanged. `used_free_credit` marks the free credit as spent now.
    pub fn apply_credit_update(
        &mut self,
        used_free_credit: bool,
        paid_credits: Option<i64>,
        now: DateTime<Utc>,
    ) {
        if let Some(paid) = paid_credits {
            self.paid_credits = paid.max(0);
        }
        if used_free_credit {
            self.free_credits_used = true;
            self.last_free_credit = Some(now);
        }
        self.updated_at = now;
    }

    /// Check if the paid balance covers `amount`.
    #[must_use]
    pub fn has_sufficient_credits(&self, amount: i64) -> bool {
        self.paid_credits >= amount
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn user_who_spent_free_credit(days_ago: i64, now: DateTime<Utc>) -> User {
        let mut user = User::new(UserId::generate(), None);
        user.free_credits_used = true;
        user.last_free_credit = Some(now - Duration::days(days_ago));
        user
    }

    #[test]
    fn new_user_has_free_credit() {
        let mut user = User::new(UserId::generate(), Some("a@example.com".into()));
        assert_eq!(user.paid_credits, 0);
        assert!(user.check_and_reset_free_credit(Utc::now()));
        assert!(!user.free_credits_used);
    }

    #[test]
    fn free_credit_within_window_is_unavailable() {
        let now = Utc::now();
        let mut user = user_who_spent_free_credit(10, now);
        assert!(!user.check_and_reset_free_credit(now));
        assert!(user.free_credits_used);
    }

    #[test]
    fn free_credit_resets_after_window() {
        let now = Utc::now();
        let mut user = user_who_spent_free_credit(FREE_CREDIT_WINDOW_DAYS, now);
        assert_eq!(user.free_credit_check(now), FreeCreditCheck::AvailableAfterReset);
        assert!(user.check_and_reset_free_credit(now));
        assert!(!user.free_credits_used);
    }

    #[test]
    fn used_flag_without_timestamp_counts_as_elapsed() {
        let mut user = User::new(UserId::generate(), None);
        user.free_credits_used = true;
        assert!(user.check_and_reset_free_credit(Utc::now()));
    }

    #[test]
    fn consuming_free_credit_twice_fails() {
        let now = Utc::now();
        let mut user = User::new(UserId::generate(), None);
        assert!(user.consume_free_credit(now));
        assert_eq!(user.last_free_credit, Some(now));
        assert!(!user.consume_free_credit(now + Duration::days(29)));
        assert!(user.consume_free_credit(now + Duration::days(30)));
    }

    #[test]
    fn credit_update_sets_absolute_value_and_clamps() {
        let now = Utc::now();
        let mut user = User::new(UserId::generate(), None);
        user.apply_credit_update(false, Some(7), now);
        assert_eq!(user.paid_credits, 7);
        assert!(!user.free_credits_used);

        user.apply_credit_update(true, Some(-3), now);
        assert_eq!(user.paid_credits, 0);
        assert!(user.free_credits_used);
        assert_eq!(user.last_free_credit, Some(now));

        user.apply_credit_update(false, None, now);
        assert_eq!(user.paid_credits, 0);
    }
}
