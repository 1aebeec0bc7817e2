//! Beacon and event catalog.
//!
//! Beacons and events are owned by admin tooling. The core only reads them: it
//! loads the catalog once, picks the event whose window contains "now", and
//! resolves a user's scan history against it.

use std::path::Path;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::config::is_valid_mac_address;
use crate::error::{BleAdvertError, Result};
use crate::types::{Beacon, Event};

/// Read-only snapshot of beacons and events.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Catalog {
    /// Every placed beacon.
    pub beacons: Vec<Beacon>,
    /// Every event, active or not.
    pub events: Vec<Event>,
}

impl Catalog {
    /// Load a catalog from a JSON file. A missing file yields an empty catalog.
    ///
    /// # Errors
    ///
    /// Returns an error if the file exists but cannot be read or parsed, or
    /// holds an invalid beacon address.
    pub async fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = match tokio::fs::read_to_string(path).await {
            Ok(content) => content,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                tracing::warn!(
                    path = %path.display(),
                    "Catalog not found, starting with no beacons"
                );
                return Ok(Self::default());
            }
            Err(err) => return Err(err.into()),
        };
        let catalog: Self = serde_json::from_str(&content)
            .map_err(|e| BleAdvertError::CatalogParseError(format!("{}: {e}", path.display())))?;
        catalog.validate()?;
        tracing::info!(
            beacons = catalog.beacons.len(),
            events = catalog.events.len(),
            "Loaded catalog"
        );
        Ok(catalog)
    }

    /// Check every beacon address.
    ///
    /// # Errors
    ///
    /// Returns [`BleAdvertError::InvalidBeaconAddress`] for the first bad one.
    pub fn validate(&self) -> Result<()> {
        if let Some(beacon) = self
            .beacons
            .iter()
            .find(|b| !is_valid_mac_address(&b.address))
        {
            return Err(BleAdvertError::InvalidBeaconAddress(beacon.address.clone()));
        }
        Ok(())
    }

    /// The event whose window contains `now`. With overlapping windows the
    /// latest declared one wins.
    #[must_use]
    pub fn active_event(&self, now: DateTime<Utc>) -> Option<&Event> {
        self.events.iter().rev().find(|e| e.is_active_at(now))
    }

    /// Events whose window has closed.
    #[must_use]
    pub fn expired_events(&self, now: DateTime<Utc>) -> Vec<&Event> {
        self.events.iter().filter(|e| e.is_expired_at(now)).collect()
    }

    /// Look up an event by id.
    #[must_use]
    pub fn event(&self, id: &str) -> Option<&Event> {
        self.events.iter().find(|e| e.id == id)
    }

    /// Expired events among `event_ids`, in catalog order. This is the
    /// user-facing scan history.
    #[must_use]
    pub fn history(&self, event_ids: &[String], now: DateTime<Utc>) -> Vec<&Event> {
        self.events
            .iter()
            .filter(|e| e.is_expired_at(now) && event_ids.contains(&e.id))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};

    fn event(id: &str, start: DateTime<Utc>, days: i64) -> Event {
        Event {
            id: id.to_string(),
            title: id.to_uppercase(),
            start,
            end: start + Duration::days(days),
            ..Event::default()
        }
    }

    fn catalog() -> Catalog {
        let base = Utc.with_ymd_and_hms(2025, 3, 1, 0, 0, 0).unwrap();
        Catalog {
            beacons: vec![Beacon {
                address: "AA:BB:CC:DD:EE:01".into(),
                ..Beacon::default()
            }],
            events: vec![
                event("old", base - Duration::days(10), 5),
                event("now", base, 7),
                event("later", base + Duration::days(30), 7),
            ],
        }
    }

    #[test]
    fn test_active_event_by_window() {
        let catalog = catalog();
        let now = Utc.with_ymd_and_hms(2025, 3, 3, 12, 0, 0).unwrap();
        assert_eq!(catalog.active_event(now).map(|e| e.id.as_str()), Some("now"));

        let gap = Utc.with_ymd_and_hms(2025, 3, 20, 0, 0, 0).unwrap();
        assert!(catalog.active_event(gap).is_none());
        assert_eq!(catalog.expired_events(gap).len(), 2);
    }

    #[test]
    fn test_history_only_lists_expired_scanned_events() {
        let catalog = catalog();
        let now = Utc.with_ymd_and_hms(2025, 3, 3, 12, 0, 0).unwrap();
        let ids = vec!["old".to_string(), "now".to_string()];
        let history: Vec<&str> = catalog.history(&ids, now).iter().map(|e| e.id.as_str()).collect();
        assert_eq!(history, vec!["old"]);
    }

    #[tokio::test]
    async fn test_load_rejects_bad_address() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("catalog.json");
        tokio::fs::write(&path, r#"{"beacons": [{"address": "None"}]}"#)
            .await
            .unwrap();
        assert!(matches!(
            Catalog::load(&path).await,
            Err(BleAdvertError::InvalidBeaconAddress(_))
        ));
    }

    #[tokio::test]
    async fn test_load_parses_beacons_and_events() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("catalog.json");
        let written = catalog();
        tokio::fs::write(&path, serde_json::to_string(&written).unwrap())
            .await
            .unwrap();

        let loaded = Catalog::load(&path).await.unwrap();
        assert_eq!(loaded.beacons, written.beacons);
        assert_eq!(loaded.events.len(), 3);
    }

    #[tokio::test]
    async fn test_load_missing_file_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        let catalog = Catalog::load(dir.path().join("absent.json")).await.unwrap();
        assert!(catalog.beacons.is_empty());
    }
}
