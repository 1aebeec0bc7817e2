//! Transactional progress store.
//!
//! The store holds two kinds of documents per user: the global [`UserInfo`]
//! document and one [`UserEventProgress`] document per event. Reads return the
//! document together with its version; [`ProgressStore::commit`] writes both
//! documents at once and only succeeds if neither changed since it was read.
//! [`run_transaction`] wraps this into an optimistic read-modify-write loop.

use std::collections::HashMap;

use async_trait::async_trait;
use thiserror::Error;
use tokio::sync::Mutex;

use crate::types::{UserEventProgress, UserInfo};

/// Errors raised by a [`ProgressStore`].
#[derive(Debug, Error)]
pub enum StoreError {
    /// A document changed between read and commit.
    #[error("write conflict on {document}")]
    Conflict {
        /// Path of the document that changed.
        document: String,
    },

    /// Every transaction attempt hit a conflict.
    #[error("transaction aborted after {attempts} conflicting attempts")]
    RetriesExhausted {
        /// Attempts made.
        attempts: u32,
    },

    /// A document could not be read or written.
    #[error("failed to access {path}: {source}")]
    Io {
        /// Document path.
        path: String,
        /// Underlying error.
        source: std::io::Error,
    },

    /// A document exists but is not valid JSON for its schema.
    #[error("corrupt document {path}: {source}")]
    Corrupt {
        /// Document path.
        path: String,
        /// Decode error.
        source: serde_json::Error,
    },
}

impl StoreError {
    /// Whether the error is an optimistic concurrency conflict.
    #[must_use]
    pub const fn is_conflict(&self) -> bool {
        matches!(self, Self::Conflict { .. })
    }
}

/// Result alias for store operations.
pub type StoreResult<T> = std::result::Result<T, StoreError>;

/// A document together with the version it was read at.
///
/// Version `0` means the document does not exist yet.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Versioned<T> {
    /// The decoded document, or its default when absent.
    pub value: T,
    /// Version observed at read time.
    pub version: u64,
}

/// Both documents written by a scan, with the versions they were read at.
#[derive(Debug, Clone)]
pub struct ScanCommit {
    /// Owner of both documents.
    pub user_id: String,
    /// Event the progress document belongs to.
    pub event_id: String,
    /// Version the progress document was read at.
    pub progress_version: u64,
    /// New progress document.
    pub progress: UserEventProgress,
    /// Version the info document was read at.
    pub info_version: u64,
    /// New info document.
    pub info: UserInfo,
}

/// Document store with conditional writes.
#[async_trait]
pub trait ProgressStore: Send + Sync {
    /// Read the progress document for (user, event).
    async fn read_progress(
        &self,
        user_id: &str,
        event_id: &str,
    ) -> StoreResult<Versioned<UserEventProgress>>;

    /// Read the global info document for a user.
    async fn read_user_info(&self, user_id: &str) -> StoreResult<Versioned<UserInfo>>;

    /// Atomically write both documents of `commit`.
    ///
    /// Fails with [`StoreError::Conflict`] and writes nothing if either
    /// document moved past the version recorded in `commit`.
    async fn commit(&self, commit: ScanCommit) -> StoreResult<()>;

    /// Event ids the user has a non-empty progress document for.
    async fn list_progress(&self, user_id: &str) -> StoreResult<Vec<String>>;
}

/// Outcome of a transaction body.
#[derive(Debug)]
pub enum TxDecision<T> {
    /// Commit these documents and return the value.
    Commit {
        /// Progress document to write.
        progress: UserEventProgress,
        /// Info document to write.
        info: UserInfo,
        /// Value handed back to the caller.
        value: T,
    },
    /// Nothing to write; return the value.
    Abort(T),
}

/// Run `body` as an optimistic read-modify-write transaction over the
/// progress and info documents of (user, event).
///
/// `body` is re-run from fresh reads after every conflict, up to
/// `max_attempts` times. It must be a pure function of its inputs.
///
/// # Errors
///
/// Returns [`StoreError::RetriesExhausted`] when every attempt conflicted, or
/// any non-conflict store error immediately.
pub async fn run_transaction<S, F, T>(
    store: &S,
    user_id: &str,
    event_id: &str,
    max_attempts: u32,
    mut body: F,
) -> StoreResult<T>
where
    S: ProgressStore + ?Sized,
    F: FnMut(&UserEventProgress, &UserInfo) -> TxDecision<T> + Send,
    T: Send,
{
    let attempts = max_attempts.max(1);
    for attempt in 1..=attempts {
        let progress = store.read_progress(user_id, event_id).await?;
        let info = store.read_user_info(user_id).await?;

        match body(&progress.value, &info.value) {
            TxDecision::Abort(value) => return Ok(value),
            TxDecision::Commit {
                progress: new_progress,
                info: new_info,
                value,
            } => {
                let commit = ScanCommit {
                    user_id: user_id.to_string(),
                    event_id: event_id.to_string(),
                    progress_version: progress.version,
                    progress: new_progress,
                    info_version: info.version,
                    info: new_info,
                };
                match store.commit(commit).await {
                    Ok(()) => return Ok(value),
                    Err(err) if err.is_conflict() => {
                        tracing::debug!(user_id, event_id, attempt, error = %err, "Transaction conflict, retrying");
                    }
                    Err(err) => return Err(err),
                }
            }
        }
    }
    Err(StoreError::RetriesExhausted { attempts })
}

/// Path of a progress document, used in errors and logs.
#[must_use]
pub fn progress_path(user_id: &str, event_id: &str) -> String {
    format!("users/{user_id}/eventRewards/{event_id}")
}

/// Path of a user info document, used in errors and logs.
#[must_use]
pub fn info_path(user_id: &str) -> String {
    format!("users/{user_id}/info/generalInfo")
}

#[derive(Debug, Default)]
struct MemoryDocuments {
    progress: HashMap<(String, String), Versioned<UserEventProgress>>,
    info: HashMap<String, Versioned<UserInfo>>,
}

/// In-memory [`ProgressStore`].
#[derive(Debug, Default)]
pub struct MemoryStore {
    documents: Mutex<MemoryDocuments>,
}

impl MemoryStore {
    /// Create an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ProgressStore for MemoryStore {
    async fn read_progress(
        &self,
        user_id: &str,
        event_id: &str,
    ) -> StoreResult<Versioned<UserEventProgress>> {
        let documents = self.documents.lock().await;
        Ok(documents
            .progress
            .get(&(user_id.to_string(), event_id.to_string()))
            .cloned()
            .unwrap_or_default())
    }

    async fn read_user_info(&self, user_id: &str) -> StoreResult<Versioned<UserInfo>> {
        let documents = self.documents.lock().await;
        Ok(documents.info.get(user_id).cloned().unwrap_or_default())
    }

    async fn commit(&self, commit: ScanCommit) -> StoreResult<()> {
        let mut documents = self.documents.lock().await;
        let key = (commit.user_id.clone(), commit.event_id.clone());

        let progress_version = documents.progress.get(&key).map_or(0, |d| d.version);
        if progress_version != commit.progress_version {
            return Err(StoreError::Conflict {
                document: progress_path(&commit.user_id, &commit.event_id),
            });
        }
        let info_version = documents.info.get(&commit.user_id).map_or(0, |d| d.version);
        if info_version != commit.info_version {
            return Err(StoreError::Conflict {
                document: info_path(&commit.user_id),
            });
        }

        documents.progress.insert(
            key,
            Versioned {
                value: commit.progress,
                version: progress_version + 1,
            },
        );
        documents.info.insert(
            commit.user_id,
            Versioned {
                value: commit.info,
                version: info_version + 1,
            },
        );
        Ok(())
    }

    async fn list_progress(&self, user_id: &str) -> StoreResult<Vec<String>> {
        let documents = self.documents.lock().await;
        let mut ids: Vec<String> = documents
            .progress
            .iter()
            .filter(|((user, _), doc)| user == user_id && !doc.value.is_empty())
            .map(|((_, event), _)| event.clone())
            .collect();
        ids.sort();
        Ok(ids)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::BeaconIdentity;

    fn bump(progress: &UserEventProgress, info: &UserInfo) -> TxDecision<u32> {
        let mut progress = progress.clone();
        let mut info = info.clone();
        progress.scans += 1;
        info.scans += 1;
        let value = progress.scans;
        TxDecision::Commit {
            progress,
            info,
            value,
        }
    }

    #[tokio::test]
    async fn test_absent_documents_read_as_default() {
        let store = MemoryStore::new();
        let progress = store.read_progress("u1", "e1").await.unwrap();
        assert_eq!(progress.version, 0);
        assert!(progress.value.is_empty());
        assert!(store.list_progress("u1").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_transaction_commits_both_documents() {
        let store = MemoryStore::new();
        let scans = run_transaction(&store, "u1", "e1", 5, bump).await.unwrap();
        assert_eq!(scans, 1);

        let progress = store.read_progress("u1", "e1").await.unwrap();
        let info = store.read_user_info("u1").await.unwrap();
        assert_eq!(progress.version, 1);
        assert_eq!(info.value.scans, 1);
        assert_eq!(store.list_progress("u1").await.unwrap(), vec!["e1".to_string()]);
    }

    #[tokio::test]
    async fn test_stale_commit_is_rejected_without_partial_write() {
        let store = MemoryStore::new();
        run_transaction(&store, "u1", "e1", 5, bump).await.unwrap();

        let stale = ScanCommit {
            user_id: "u1".into(),
            event_id: "e1".into(),
            progress_version: 1,
            progress: UserEventProgress {
                scans: 42,
                unlocked_rewards: Vec::new(),
                scanned_beacon_addresses: vec![BeaconIdentity::new("A", "")],
            },
            info_version: 0,
            info: UserInfo::default(),
        };
        let err = store.commit(stale).await.unwrap_err();
        assert!(err.is_conflict());

        let progress = store.read_progress("u1", "e1").await.unwrap();
        assert_eq!(progress.value.scans, 1);
    }

    #[tokio::test]
    async fn test_abort_writes_nothing() {
        let store = MemoryStore::new();
        let value = run_transaction(&store, "u1", "e1", 5, |_, _| TxDecision::Abort(7))
            .await
            .unwrap();
        assert_eq!(value, 7);
        assert_eq!(store.read_user_info("u1").await.unwrap().version, 0);
    }

    /// Store whose first `conflicts` commits fail.
    struct FlakyStore {
        inner: MemoryStore,
        conflicts: Mutex<u32>,
    }

    #[async_trait]
    impl ProgressStore for FlakyStore {
        async fn read_progress(
            &self,
            user_id: &str,
            event_id: &str,
        ) -> StoreResult<Versioned<UserEventProgress>> {
            self.inner.read_progress(user_id, event_id).await
        }

        async fn read_user_info(&self, user_id: &str) -> StoreResult<Versioned<UserInfo>> {
            self.inner.read_user_info(user_id).await
        }

        async fn commit(&self, commit: ScanCommit) -> StoreResult<()> {
            let mut remaining = self.conflicts.lock().await;
            if *remaining > 0 {
                *remaining -= 1;
                return Err(StoreError::Conflict {
                    document: progress_path(&commit.user_id, &commit.event_id),
                });
            }
            drop(remaining);
            self.inner.commit(commit).await
        }

        async fn list_progress(&self, user_id: &str) -> StoreResult<Vec<String>> {
            self.inner.list_progress(user_id).await
        }
    }

    #[tokio::test]
    async fn test_conflicts_are_retried_then_surfaced() {
        let store = FlakyStore {
            inner: MemoryStore::new(),
            conflicts: Mutex::new(2),
        };
        let scans = run_transaction(&store, "u1", "e1", 3, bump).await.unwrap();
        assert_eq!(scans, 1);

        *store.conflicts.lock().await = 10;
        let err = run_transaction(&store, "u1", "e1", 3, bump).await.unwrap_err();
        assert!(matches!(err, StoreError::RetriesExhausted { attempts: 3 }));
        assert_eq!(store.read_progress("u1", "e1").await.unwrap().value.scans, 1);
    }
}
