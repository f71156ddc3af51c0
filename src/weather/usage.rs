//! Monthly count of weather API requests, for the admin statistics.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::error::DatabaseError;
use crate::store::UserStore;

/// Counter key for the month containing `at`, e.g. `2026.10`.
pub fn month_key(at: DateTime<Utc>) -> String {
    at.format("%Y.%m").to_string()
}

/// Requests spent in one month against the quota.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct UsageSnapshot {
    pub month: String,
    pub requests: i64,
    pub quota: u64,
    /// `requests / quota`, rounded to a whole percent.
    pub percent: u64,
}

impl UsageSnapshot {
    pub fn new(month: String, requests: i64, quota: u64) -> Self {
        let percent = if quota == 0 {
            0
        } else {
            (requests.max(0) as f64 * 100.0 / quota as f64).round() as u64
        };
        Self {
            month,
            requests,
            quota,
            percent,
        }
    }
}

/// Handle that counts requests in the store.
#[derive(Clone)]
pub struct ApiUsage {
    store: Arc<dyn UserStore>,
    quota: u64,
}

impl ApiUsage {
    pub fn new(store: Arc<dyn UserStore>, quota: u64) -> Self {
        Self { store, quota }
    }

    /// Count one request in the current month. A store failure is logged;
    /// it never blocks the request itself.
    pub async fn record(&self) {
        let month = month_key(Utc::now());
        if let Err(e) = self.store.increase_api_counter(&month).await {
            tracing::warn!(%month, "Failed to count weather API request: {e}");
        }
    }

    /// Usage for the current month.
    pub async fn current(&self) -> Result<UsageSnapshot, DatabaseError> {
        self.for_month(month_key(Utc::now())).await
    }

    pub async fn for_month(&self, month: String) -> Result<UsageSnapshot, DatabaseError> {
        let requests = self.store.get_api_counter_value(&month).await?;
        Ok(UsageSnapshot::new(month, requests, self.quota))
    }
}
