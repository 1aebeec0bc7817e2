//! JSON file backends for the progress store and the visit ledger.
//!
//! Layout under the data directory:
//!
//! ```text
//! users/<user>.json                  info document + one progress document per event
//! analysis/<event title>/<addr>.json first visits and longest visits per user
//! ```
//!
//! A user's documents share one file so a scan commit is a single atomic
//! rename. Path components are percent-encoded.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use chrono_tz::Tz;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;

use crate::ledger::{VisitKey, VisitLedger};
use crate::store::{
    info_path, progress_path, ProgressStore, ScanCommit, StoreError, StoreResult, Versioned,
};
use crate::types::{UserEventProgress, UserInfo};

/// Format used for human readable first-visit timestamps.
const VISIT_TIME_FORMAT: &str = "%d/%m/%Y %H:%M:%S";

/// Default data directory.
///
/// On Linux: `/var/lib/bleadvert/`
/// Elsewhere: the platform data directory.
#[must_use]
pub fn default_data_dir() -> PathBuf {
    #[cfg(target_os = "linux")]
    {
        PathBuf::from("/var/lib/bleadvert")
    }
    #[cfg(not(target_os = "linux"))]
    {
        directories::ProjectDirs::from("", "", "bleadvert")
            .map_or_else(|| PathBuf::from("./data"), |dirs| dirs.data_dir().to_path_buf())
    }
}

/// Encode `raw` so it is safe as a single path component.
fn path_component(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    for byte in raw.bytes() {
        if byte.is_ascii_alphanumeric() || matches!(byte, b'-' | b'_' | b'.') {
            out.push(char::from(byte));
        } else {
            out.push_str(&format!("%{byte:02X}"));
        }
    }
    if out.is_empty() || out.chars().all(|c| c == '.') {
        out = format!("%{}", out.len());
    }
    out
}

async fn read_json<T: DeserializeOwned + Default>(path: &Path) -> StoreResult<T> {
    match tokio::fs::read_to_string(path).await {
        Ok(content) => serde_json::from_str(&content).map_err(|source| StoreError::Corrupt {
            path: path.display().to_string(),
            source,
        }),
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(T::default()),
        Err(source) => Err(StoreError::Io {
            path: path.display().to_string(),
            source,
        }),
    }
}

/// Write via a sibling temp file and rename, so readers never see a torn file.
async fn write_json_atomic<T: Serialize + Sync>(path: &Path, value: &T) -> StoreResult<()> {
    let io_err = |source| StoreError::Io {
        path: path.display().to_string(),
        source,
    };
    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent).await.map_err(io_err)?;
    }
    let content = serde_json::to_string_pretty(value).map_err(|source| StoreError::Corrupt {
        path: path.display().to_string(),
        source,
    })?;
    let tmp = path.with_extension("json.tmp");
    tokio::fs::write(&tmp, content).await.map_err(io_err)?;
    tokio::fs::rename(&tmp, path).await.map_err(io_err)?;
    Ok(())
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
struct StoredDocument<T> {
    version: u64,
    document: T,
}

impl<T: Clone> StoredDocument<T> {
    fn versioned(&self) -> Versioned<T> {
        Versioned {
            value: self.document.clone(),
            version: self.version,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
struct UserFile {
    info: StoredDocument<UserInfo>,
    events: BTreeMap<String, StoredDocument<UserEventProgress>>,
}

/// [`ProgressStore`] persisting one JSON file per user.
#[derive(Debug)]
pub struct JsonFileStore {
    data_dir: PathBuf,
    write_lock: Mutex<()>,
}

impl JsonFileStore {
    /// Create a store rooted at `data_dir`.
    pub fn new(data_dir: impl Into<PathBuf>) -> Self {
        Self {
            data_dir: data_dir.into(),
            write_lock: Mutex::new(()),
        }
    }

    fn user_path(&self, user_id: &str) -> PathBuf {
        self.data_dir
            .join("users")
            .join(format!("{}.json", path_component(user_id)))
    }

    async fn load_user(&self, user_id: &str) -> StoreResult<UserFile> {
        read_json(&self.user_path(user_id)).await
    }
}

#[async_trait]
impl ProgressStore for JsonFileStore {
    async fn read_progress(
        &self,
        user_id: &str,
        event_id: &str,
    ) -> StoreResult<Versioned<UserEventProgress>> {
        let file = self.load_user(user_id).await?;
        Ok(file
            .events
            .get(event_id)
            .map(StoredDocument::versioned)
            .unwrap_or_default())
    }

    async fn read_user_info(&self, user_id: &str) -> StoreResult<Versioned<UserInfo>> {
        Ok(self.load_user(user_id).await?.info.versioned())
    }

    async fn commit(&self, commit: ScanCommit) -> StoreResult<()> {
        let _guard = self.write_lock.lock().await;
        let mut file = self.load_user(&commit.user_id).await?;

        let progress_version = file.events.get(&commit.event_id).map_or(0, |d| d.version);
        if progress_version != commit.progress_version {
            return Err(StoreError::Conflict {
                document: progress_path(&commit.user_id, &commit.event_id),
            });
        }
        if file.info.version != commit.info_version {
            return Err(StoreError::Conflict {
                document: info_path(&commit.user_id),
            });
        }

        file.events.insert(
            commit.event_id.clone(),
            StoredDocument {
                version: progress_version + 1,
                document: commit.progress,
            },
        );
        file.info = StoredDocument {
            version: file.info.version + 1,
            document: commit.info,
        };

        write_json_atomic(&self.user_path(&commit.user_id), &file).await?;
        tracing::debug!(user_id = %commit.user_id, event_id = %commit.event_id, "Committed scan documents");
        Ok(())
    }

    async fn list_progress(&self, user_id: &str) -> StoreResult<Vec<String>> {
        let file = self.load_user(user_id).await?;
        Ok(file
            .events
            .into_iter()
            .filter(|(_, doc)| !doc.document.is_empty())
            .map(|(event_id, _)| event_id)
            .collect())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct FirstVisitEntry {
    at: DateTime<Utc>,
    local_time: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
struct BeaconAnalytics {
    first_visits: BTreeMap<String, FirstVisitEntry>,
    visit_durations_ms: BTreeMap<String, u64>,
}

/// [`VisitLedger`] persisting one JSON file per (event, beacon).
#[derive(Debug)]
pub struct JsonFileLedger {
    data_dir: PathBuf,
    timezone: Tz,
    write_lock: Mutex<()>,
}

impl JsonFileLedger {
    /// Create a ledger rooted at `data_dir`, rendering local times in `timezone`.
    pub fn new(data_dir: impl Into<PathBuf>, timezone: Tz) -> Self {
        Self {
            data_dir: data_dir.into(),
            timezone,
            write_lock: Mutex::new(()),
        }
    }

    fn analytics_path(&self, key: &VisitKey) -> PathBuf {
        self.data_dir
            .join("analysis")
            .join(path_component(&key.event_title))
            .join(format!("{}.json", path_component(&key.beacon_address)))
    }
}

#[async_trait]
impl VisitLedger for JsonFileLedger {
    async fn record_first_visit(&self, key: &VisitKey, at: DateTime<Utc>) -> StoreResult<bool> {
        let _guard = self.write_lock.lock().await;
        let path = self.analytics_path(key);
        let mut analytics: BeaconAnalytics = read_json(&path).await?;
        if analytics.first_visits.contains_key(&key.user_id) {
            return Ok(false);
        }
        let local_time = at.with_timezone(&self.timezone).format(VISIT_TIME_FORMAT).to_string();
        analytics
            .first_visits
            .insert(key.user_id.clone(), FirstVisitEntry { at, local_time });
        write_json_atomic(&path, &analytics).await?;
        Ok(true)
    }

    async fn record_visit_duration(&self, key: &VisitKey, duration_ms: u64) -> StoreResult<bool> {
        let _guard = self.write_lock.lock().await;
        let path = self.analytics_path(key);
        let mut analytics: BeaconAnalytics = read_json(&path).await?;
        let existing = analytics.visit_durations_ms.get(&key.user_id).copied();
        if existing.is_some_and(|existing| existing >= duration_ms) {
            return Ok(false);
        }
        analytics
            .visit_durations_ms
            .insert(key.user_id.clone(), duration_ms);
        write_json_atomic(&path, &analytics).await?;
        Ok(true)
    }

    async fn visit_duration(&self, key: &VisitKey) -> StoreResult<Option<u64>> {
        let analytics: BeaconAnalytics = read_json(&self.analytics_path(key)).await?;
        Ok(analytics.visit_durations_ms.get(&key.user_id).copied())
    }

    async fn first_visit(&self, key: &VisitKey) -> StoreResult<Option<DateTime<Utc>>> {
        let analytics: BeaconAnalytics = read_json(&self.analytics_path(key)).await?;
        Ok(analytics.first_visits.get(&key.user_id).map(|entry| entry.at))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{run_transaction, TxDecision};
    use crate::types::BeaconIdentity;
    use chrono::TimeZone;

    #[test]
    fn test_path_component_encoding() {
        assert_eq!(path_component("user-1"), "user-1");
        assert_eq!(path_component("AA:BB"), "AA%3ABB");
        assert_eq!(path_component("../etc"), "..%2Fetc");
        assert_eq!(path_component(".."), "%2");
        assert_eq!(path_component("Summer Expo"), "Summer%20Expo");
    }

    #[tokio::test]
    async fn test_file_store_persists_across_instances() {
        let dir = tempfile::tempdir().unwrap();
        let store = JsonFileStore::new(dir.path());

        run_transaction(&store, "u1", "e1", 5, |progress, info| {
            let mut progress = progress.clone();
            let mut info = info.clone();
            progress.scans += 1;
            progress
                .scanned_beacon_addresses
                .push(BeaconIdentity::new("AA:BB:CC:DD:EE:01", "https://a"));
            info.scans += 1;
            TxDecision::Commit {
                progress,
                info,
                value: (),
            }
        })
        .await
        .unwrap();

        let reopened = JsonFileStore::new(dir.path());
        let progress = reopened.read_progress("u1", "e1").await.unwrap();
        assert_eq!(progress.version, 1);
        assert_eq!(progress.value.scans, 1);
        assert_eq!(reopened.read_user_info("u1").await.unwrap().value.scans, 1);
        assert_eq!(reopened.list_progress("u1").await.unwrap(), vec!["e1".to_string()]);
    }

    #[tokio::test]
    async fn test_file_store_rejects_stale_version() {
        let dir = tempfile::tempdir().unwrap();
        let store = JsonFileStore::new(dir.path());
        let commit = ScanCommit {
            user_id: "u1".into(),
            event_id: "e1".into(),
            progress_version: 0,
            progress: UserEventProgress::default(),
            info_version: 0,
            info: UserInfo::default(),
        };
        store.commit(commit.clone()).await.unwrap();
        assert!(store.commit(commit).await.unwrap_err().is_conflict());
    }

    #[tokio::test]
    async fn test_corrupt_document_is_reported() {
        let dir = tempfile::tempdir().unwrap();
        let users = dir.path().join("users");
        std::fs::create_dir_all(&users).unwrap();
        std::fs::write(users.join("u1.json"), "not json").unwrap();

        let store = JsonFileStore::new(dir.path());
        let err = store.read_user_info("u1").await.unwrap_err();
        assert!(matches!(err, StoreError::Corrupt { .. }));
    }

    #[tokio::test]
    async fn test_file_ledger_semantics() {
        let dir = tempfile::tempdir().unwrap();
        let ledger = JsonFileLedger::new(dir.path(), chrono_tz::Europe::Zagreb);
        let key = VisitKey::new("Summer Expo", "AA:BB:CC:DD:EE:01", "u1");
        let at = Utc.with_ymd_and_hms(2025, 7, 1, 10, 0, 0).unwrap();

        assert!(ledger.record_first_visit(&key, at).await.unwrap());
        assert!(!ledger.record_first_visit(&key, Utc::now()).await.unwrap());
        assert_eq!(ledger.first_visit(&key).await.unwrap(), Some(at));

        assert!(ledger.record_visit_duration(&key, 6000).await.unwrap());
        assert!(!ledger.record_visit_duration(&key, 1000).await.unwrap());
        assert_eq!(ledger.visit_duration(&key).await.unwrap(), Some(6000));

        let raw = std::fs::read_to_string(ledger.analytics_path(&key)).unwrap();
        assert!(raw.contains("01/07/2025 12:00:00"));
    }
}
