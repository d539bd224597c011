//! API handlers.

pub mod admin;
pub mod catalog;
pub mod config;
pub mod credits;
pub mod health;
pub mod prompts;
pub mod transformations;
pub mod uploads;
pub mod users;
pub mod webhooks;

use serde::Deserialize;

/// Pagination query parameters.
#[derive(Debug, Deserialize)]
pub struct PageQuery {
    /// Maximum number of items to return (default: 50, at most 100).
    #[serde(default = "default_limit")]
    pub limit: usize,
    /// Offset for pagination (default: 0).
    #[serde(default)]
    pub offset: usize,
}

impl PageQuery {
    /// The limit, capped at 100.
    #[must_use]
    pub fn capped_limit(&self) -> usize {
        self.limit.min(100)
    }
}

fn default_limit() -> usize {
    50
}
