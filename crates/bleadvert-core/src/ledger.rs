//! Visit analytics sink.
//!
//! Records, per (event, beacon, user), when the user first came near the beacon
//! and the longest continuous visit. First visits are append-if-absent;
//! durations are update-if-greater.

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use utoipa::ToSchema;

use crate::store::StoreResult;

/// Analytics key. Users are keyed by id, never by display name.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize, ToSchema)]
pub struct VisitKey {
    /// Event title, the analytics partition.
    pub event_title: String,
    /// Beacon hardware address.
    pub beacon_address: String,
    /// User id.
    pub user_id: String,
}

impl VisitKey {
    /// Build a key.
    #[must_use]
    pub fn new(
        event_title: impl Into<String>,
        beacon_address: impl Into<String>,
        user_id: impl Into<String>,
    ) -> Self {
        Self {
            event_title: event_title.into(),
            beacon_address: beacon_address.into(),
            user_id: user_id.into(),
        }
    }
}

/// Analytics sink for beacon visits.
#[async_trait]
pub trait VisitLedger: Send + Sync {
    /// Record the first visit. Returns `false` if one was already recorded.
    async fn record_first_visit(&self, key: &VisitKey, at: DateTime<Utc>) -> StoreResult<bool>;

    /// Record a visit duration, keeping the maximum. Returns `true` if the
    /// stored value changed.
    async fn record_visit_duration(&self, key: &VisitKey, duration_ms: u64) -> StoreResult<bool>;

    /// Longest recorded visit, if any.
    async fn visit_duration(&self, key: &VisitKey) -> StoreResult<Option<u64>>;

    /// Recorded first visit, if any.
    async fn first_visit(&self, key: &VisitKey) -> StoreResult<Option<DateTime<Utc>>>;
}

/// In-memory [`VisitLedger`].
#[derive(Debug, Default)]
pub struct MemoryLedger {
    first_visits: Mutex<HashMap<VisitKey, DateTime<Utc>>>,
    durations: Mutex<HashMap<VisitKey, u64>>,
}

impl MemoryLedger {
    /// Create an empty ledger.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl VisitLedger for MemoryLedger {
    async fn record_first_visit(&self, key: &VisitKey, at: DateTime<Utc>) -> StoreResult<bool> {
        let mut first_visits = self.first_visits.lock().await;
        if first_visits.contains_key(key) {
            return Ok(false);
        }
        first_visits.insert(key.clone(), at);
        Ok(true)
    }

    async fn record_visit_duration(&self, key: &VisitKey, duration_ms: u64) -> StoreResult<bool> {
        let mut durations = self.durations.lock().await;
        match durations.get_mut(key) {
            Some(existing) if *existing >= duration_ms => Ok(false),
            Some(existing) => {
                *existing = duration_ms;
                Ok(true)
            }
            None => {
                durations.insert(key.clone(), duration_ms);
                Ok(true)
            }
        }
    }

    async fn visit_duration(&self, key: &VisitKey) -> StoreResult<Option<u64>> {
        Ok(self.durations.lock().await.get(key).copied())
    }

    async fn first_visit(&self, key: &VisitKey) -> StoreResult<Option<DateTime<Utc>>> {
        Ok(self.first_visits.lock().await.get(key).copied())
    }
}
