//! Scan recording and reward unlocking.
//!
//! A scan credits a beacon to a user at most once per event. Crediting bumps
//! the event and global scan counters and unlocks every reward whose threshold
//! is now met, all in one transaction over the user's progress and info
//! documents.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use crate::error::Result;
use crate::store::{run_transaction, ProgressStore, TxDecision};
use crate::types::{Beacon, Event, Reward, User, UserEventProgress, UserInfo};

/// What a call to [`ScanRewardCoordinator::record_scan`] changed.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct ScanOutcome {
    /// Whether the scan was credited; `false` for a beacon already credited.
    pub scans_recorded: bool,

    /// Rewards newly added to the user's global reward list.
    pub rewards_unlocked: Vec<Reward>,
}

/// Records scans against a [`ProgressStore`].
#[derive(Clone)]
pub struct ScanRewardCoordinator {
    store: Arc<dyn ProgressStore>,
    transaction_attempts: u32,
}

impl std::fmt::Debug for ScanRewardCoordinator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ScanRewardCoordinator")
            .field("transaction_attempts", &self.transaction_attempts)
            .finish_non_exhaustive()
    }
}

impl ScanRewardCoordinator {
    /// Create a coordinator; conflicting transactions are retried up to
    /// `transaction_attempts` times by the store's transaction loop.
    #[must_use]
    pub fn new(store: Arc<dyn ProgressStore>, transaction_attempts: u32) -> Self {
        Self {
            store,
            transaction_attempts,
        }
    }

    /// The backing store.
    #[must_use]
    pub fn store(&self) -> &Arc<dyn ProgressStore> {
        &self.store
    }

    /// Credit `beacon` to `user` in `event`.
    ///
    /// # Errors
    ///
    /// Returns the store failure when the transaction cannot commit. Nothing is
    /// written in that case.
    pub async fn record_scan(
        &self,
        event: &Event,
        beacon: &Beacon,
        user: &User,
    ) -> Result<ScanOutcome> {
        let outcome = run_transaction(
            self.store.as_ref(),
            &user.id,
            &event.id,
            self.transaction_attempts,
            |progress, info| apply_scan(progress, info, event, beacon),
        )
        .await?;

        if outcome.scans_recorded {
            tracing::info!(
                user_id = %user.id,
                event_id = %event.id,
                beacon = %beacon.address,
                unlocked = outcome.rewards_unlocked.len(),
                "Scan recorded"
            );
        } else {
            tracing::debug!(
                user_id = %user.id,
                event_id = %event.id,
                beacon = %beacon.address,
                "Beacon already credited"
            );
        }
        Ok(outcome)
    }
}

/// Transaction body for one scan. Pure: the same inputs always produce the
/// same decision.
#[must_use]
pub fn apply_scan(
    progress: &UserEventProgress,
    info: &UserInfo,
    event: &Event,
    beacon: &Beacon,
) -> TxDecision<ScanOutcome> {
    let identity = beacon.identity();
    if progress.has_scanned(&identity) {
        return TxDecision::Abort(ScanOutcome::default());
    }

    let mut progress = progress.clone();
    let mut info = info.clone();
    progress.scans = progress.scans.saturating_add(1);
    progress.scanned_beacon_addresses.push(identity);
    info.scans = info.scans.saturating_add(1);

    let mut rewards_unlocked = Vec::new();
    for reward in &event.rewards {
        if progress.scans < reward.required_scans || progress.unlocked_rewards.contains(reward) {
            continue;
        }
        progress.unlocked_rewards.push(reward.clone());
        if !info.rewards.contains(reward) {
            info.rewards.push(reward.clone());
            rewards_unlocked.push(reward.clone());
        }
    }

    TxDecision::Commit {
        progress,
        info,
        value: ScanOutcome {
            scans_recorded: true,
            rewards_unlocked,
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;

    fn reward(title: &str, required_scans: u32) -> Reward {
        Reward {
            title: title.to_string(),
            required_scans,
            ..Reward::default()
        }
    }

    fn event() -> Event {
        Event {
            id: "expo".into(),
            title: "Expo".into(),
            rewards: vec![reward("r1", 1), reward("r2", 3)],
            ..Event::default()
        }
    }

    fn beacon(address: &str) -> Beacon {
        Beacon {
            address: address.into(),
            url: "https://example.com".into(),
            ..Beacon::default()
        }
    }

    fn user() -> User {
        User {
            id: "u1".into(),
            name: "Ada".into(),
            is_admin: false,
        }
    }

    fn coordinator() -> (Arc<MemoryStore>, ScanRewardCoordinator) {
        let store = Arc::new(MemoryStore::new());
        let coordinator = ScanRewardCoordinator::new(store.clone(), 5);
        (store, coordinator)
    }

    #[tokio::test]
    async fn test_same_beacon_is_credited_once() {
        let (store, coordinator) = coordinator();
        let first = coordinator.record_scan(&event(), &beacon("A"), &user()).await.unwrap();
        assert!(first.scans_recorded);

        let second = coordinator.record_scan(&event(), &beacon("A"), &user()).await.unwrap();
        assert_eq!(second, ScanOutcome::default());

        let progress = store.read_progress("u1", "expo").await.unwrap().value;
        assert_eq!(progress.scans, 1);
        assert_eq!(progress.scanned_beacon_addresses.len(), 1);
        assert_eq!(store.read_user_info("u1").await.unwrap().value.scans, 1);
    }

    #[tokio::test]
    async fn test_rewards_unlock_by_threshold() {
        let (store, coordinator) = coordinator();
        let (event, user) = (event(), user());

        let one = coordinator.record_scan(&event, &beacon("A"), &user).await.unwrap();
        assert_eq!(one.rewards_unlocked, vec![reward("r1", 1)]);

        let two = coordinator.record_scan(&event, &beacon("B"), &user).await.unwrap();
        assert!(two.scans_recorded);
        assert!(two.rewards_unlocked.is_empty());

        let three = coordinator.record_scan(&event, &beacon("C"), &user).await.unwrap();
        assert_eq!(three.rewards_unlocked, vec![reward("r2", 3)]);

        let progress = store.read_progress("u1", "expo").await.unwrap().value;
        assert_eq!(progress.unlocked_rewards, vec![reward("r1", 1), reward("r2", 3)]);
    }

    #[tokio::test]
    async fn test_identity_includes_url() {
        let (_, coordinator) = coordinator();
        let mut moved = beacon("A");
        coordinator.record_scan(&event(), &moved, &user()).await.unwrap();
        moved.url = "https://example.com/other".into();
        let outcome = coordinator.record_scan(&event(), &moved, &user()).await.unwrap();
        assert!(outcome.scans_recorded);
    }

    #[test]
    fn test_rewards_already_in_global_list_are_not_notified() {
        let info = UserInfo {
            scans: 7,
            rewards: vec![reward("r1", 1)],
        };
        let decision = apply_scan(&UserEventProgress::default(), &info, &event(), &beacon("A"));
        let TxDecision::Commit { progress, info, value } = decision else {
            panic!("expected commit");
        };
        assert_eq!(progress.unlocked_rewards, vec![reward("r1", 1)]);
        assert_eq!(info.rewards, vec![reward("r1", 1)]);
        assert_eq!(info.scans, 8);
        assert!(value.scans_recorded);
        assert!(value.rewards_unlocked.is_empty());
    }

    #[test]
    fn test_already_scanned_aborts() {
        let progress = UserEventProgress {
            scans: 1,
            unlocked_rewards: vec![],
            scanned_beacon_addresses: vec![beacon("A").identity()],
        };
        let decision = apply_scan(&progress, &UserInfo::default(), &event(), &beacon("A"));
        assert!(matches!(decision, TxDecision::Abort(ref o) if !o.scans_recorded));
    }
}
