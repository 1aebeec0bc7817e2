//! Scanning session orchestration.
//!
//! A session binds one user to one event. While it runs, a polling task drains
//! incoming RSSI samples into its [`SignalSampler`], asks the
//! [`ProximityTracker`] for the closest beacon, and drives the [`DwellTimer`].
//! Scan recording and ledger writes are spawned off the polling task; stopping
//! the session waits for all of them.
//!
//! Observers follow the session through `watch` channels (closest beacon,
//! scanning flag) and a `broadcast` channel of unlocked rewards. These outlive
//! individual sessions.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::{broadcast, mpsc, watch};
use tokio::task::{JoinHandle, JoinSet};
use tokio::time::MissedTickBehavior;
use utoipa::ToSchema;

use crate::config::{DwellConfig, ScannerConfig};
use crate::coordinator::ScanRewardCoordinator;
use crate::dwell::{DwellFired, DwellRecord, DwellTimer};
use crate::eddystone::parse_eddystone_url;
use crate::ledger::{VisitKey, VisitLedger};
use crate::sampler::SignalSampler;
use crate::tracker::{ClosestBeacon, ProximityTracker};
use crate::types::{Beacon, BeaconSample, Event, Reward, User};

/// Capacity of the reward notification channel.
const REWARD_CHANNEL_CAPACITY: usize = 64;

/// Session lifecycle errors.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum SessionError {
    /// `start` was called while a session is running.
    #[error("a scanning session is already running")]
    AlreadyRunning,

    /// The operation needs a running session.
    #[error("no scanning session is running")]
    NotRunning,
}

/// Who is scanning, and for which event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct SessionContext {
    /// The scanning user.
    pub user: User,
    /// The event scans are credited to.
    pub event: Event,
}

impl SessionContext {
    /// Build a context.
    #[must_use]
    pub const fn new(user: User, event: Event) -> Self {
        Self { user, event }
    }

    fn visit_key(&self, beacon: &Beacon) -> VisitKey {
        VisitKey::new(&self.event.title, &beacon.address, &self.user.id)
    }
}

/// One-shot notification for a reward newly added to a user's reward list.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct RewardUnlocked {
    /// User the reward went to.
    pub user_id: String,
    /// Event the reward belongs to.
    pub event_id: String,
    /// Beacon whose scan unlocked it.
    pub beacon_address: String,
    /// The reward.
    pub reward: Reward,
}

/// Counters returned when a session stops.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct SessionSummary {
    /// Samples drained into the sampler.
    pub samples: u64,
    /// Closest-beacon changes observed.
    pub transitions: u64,
    /// Dwell thresholds crossed.
    pub scans_fired: u64,
    /// Visits long enough to be reported to the ledger.
    pub visits_reported: u64,
}

struct RunningSession {
    context: SessionContext,
    samples_tx: mpsc::UnboundedSender<BeaconSample>,
    stop_tx: watch::Sender<bool>,
    handle: JoinHandle<SessionSummary>,
}

/// Owns at most one running session and the channels observers subscribe to.
pub struct ScanningSession {
    scanner: ScannerConfig,
    dwell: DwellConfig,
    coordinator: ScanRewardCoordinator,
    ledger: Arc<dyn VisitLedger>,
    closest_tx: watch::Sender<ClosestBeacon>,
    scanning_tx: watch::Sender<bool>,
    rewards_tx: broadcast::Sender<RewardUnlocked>,
    running: Option<RunningSession>,
}

impl std::fmt::Debug for ScanningSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ScanningSession")
            .field("scanner", &self.scanner)
            .field("dwell", &self.dwell)
            .field("context", &self.context())
            .finish_non_exhaustive()
    }
}

impl ScanningSession {
    /// Create an idle session manager.
    #[must_use]
    pub fn new(
        scanner: ScannerConfig,
        dwell: DwellConfig,
        coordinator: ScanRewardCoordinator,
        ledger: Arc<dyn VisitLedger>,
    ) -> Self {
        let (closest_tx, _) = watch::channel(ClosestBeacon::none());
        let (scanning_tx, _) = watch::channel(false);
        let (rewards_tx, _) = broadcast::channel(REWARD_CHANNEL_CAPACITY);
        Self {
            scanner,
            dwell,
            coordinator,
            ledger,
            closest_tx,
            scanning_tx,
            rewards_tx,
            running: None,
        }
    }

    /// Start scanning `beacons` for `context`.
    ///
    /// # Errors
    ///
    /// Returns [`SessionError::AlreadyRunning`] if a session is running.
    pub fn start(
        &mut self,
        context: SessionContext,
        beacons: Vec<Beacon>,
    ) -> Result<(), SessionError> {
        if self.running.is_some() {
            return Err(SessionError::AlreadyRunning);
        }

        let (samples_tx, samples_rx) = mpsc::unbounded_channel();
        let (stop_tx, stop_rx) = watch::channel(false);
        let worker = SessionWorker {
            context: Arc::new(context.clone()),
            poll_interval: Duration::from_millis(self.scanner.poll_interval_ms.max(1)),
            sampler: SignalSampler::new(&self.scanner),
            dwell: self.dwell.clone(),
            beacons,
            coordinator: self.coordinator.clone(),
            ledger: Arc::clone(&self.ledger),
            closest_tx: self.closest_tx.clone(),
            rewards_tx: self.rewards_tx.clone(),
            summary: SessionSummary::default(),
        };

        tracing::info!(
            user_id = %context.user.id,
            event_id = %context.event.id,
            beacons = worker.beacons.len(),
            "Scanning session started"
        );
        let handle = tokio::spawn(worker.run(samples_rx, stop_rx));
        self.running = Some(RunningSession {
            context,
            samples_tx,
            stop_tx,
            handle,
        });
        self.scanning_tx.send_replace(true);
        Ok(())
    }

    /// Stop the running session. Returns once the in-flight dwell has been
    /// flushed and every pending scan and ledger write has finished.
    ///
    /// # Errors
    ///
    /// Returns [`SessionError::NotRunning`] if no session is running.
    pub async fn stop(&mut self) -> Result<SessionSummary, SessionError> {
        let running = self.running.take().ok_or(SessionError::NotRunning)?;
        let _ = running.stop_tx.send(true);
        let summary = match running.handle.await {
            Ok(summary) => summary,
            Err(err) => {
                tracing::error!(error = %err, "Scanning session task failed");
                SessionSummary::default()
            }
        };
        self.closest_tx.send_replace(ClosestBeacon::none());
        self.scanning_tx.send_replace(false);
        tracing::info!(
            user_id = %running.context.user.id,
            event_id = %running.context.event.id,
            samples = summary.samples,
            scans_fired = summary.scans_fired,
            visits_reported = summary.visits_reported,
            "Scanning session stopped"
        );
        Ok(summary)
    }

    /// Queue a sample for the running session.
    ///
    /// # Errors
    ///
    /// Returns [`SessionError::NotRunning`] if no session is running.
    pub fn ingest(&self, sample: BeaconSample) -> Result<(), SessionError> {
        let running = self.running.as_ref().ok_or(SessionError::NotRunning)?;
        running
            .samples_tx
            .send(sample)
            .map_err(|_| SessionError::NotRunning)
    }

    /// Sender feeding the running session, for long-lived sample sources.
    #[must_use]
    pub fn sample_sender(&self) -> Option<mpsc::UnboundedSender<BeaconSample>> {
        self.running.as_ref().map(|r| r.samples_tx.clone())
    }

    /// Context of the running session.
    #[must_use]
    pub fn context(&self) -> Option<&SessionContext> {
        self.running.as_ref().map(|r| &r.context)
    }

    /// Whether a session is running.
    #[must_use]
    pub fn is_scanning(&self) -> bool {
        *self.scanning_tx.borrow()
    }

    /// Latest closest beacon.
    #[must_use]
    pub fn current_closest(&self) -> ClosestBeacon {
        self.closest_tx.borrow().clone()
    }

    /// Follow the closest beacon.
    #[must_use]
    pub fn closest(&self) -> watch::Receiver<ClosestBeacon> {
        self.closest_tx.subscribe()
    }

    /// Follow the scanning flag.
    #[must_use]
    pub fn scanning(&self) -> watch::Receiver<bool> {
        self.scanning_tx.subscribe()
    }

    /// Receive reward notifications from now on.
    #[must_use]
    pub fn subscribe_rewards(&self) -> broadcast::Receiver<RewardUnlocked> {
        self.rewards_tx.subscribe()
    }
}

/// State owned by the polling task.
struct SessionWorker {
    context: Arc<SessionContext>,
    poll_interval: Duration,
    sampler: SignalSampler,
    dwell: DwellConfig,
    beacons: Vec<Beacon>,
    coordinator: ScanRewardCoordinator,
    ledger: Arc<dyn VisitLedger>,
    closest_tx: watch::Sender<ClosestBeacon>,
    rewards_tx: broadcast::Sender<RewardUnlocked>,
    summary: SessionSummary,
}

impl SessionWorker {
    async fn run(
        mut self,
        mut samples_rx: mpsc::UnboundedReceiver<BeaconSample>,
        mut stop_rx: watch::Receiver<bool>,
    ) -> SessionSummary {
        let mut tracker = ProximityTracker::new();
        let (fired_tx, mut fired_rx) = mpsc::unbounded_channel();
        let mut timer = DwellTimer::new(self.dwell.clone(), fired_tx);
        let mut pending = JoinSet::new();

        let mut interval = tokio::time::interval(self.poll_interval);
        interval.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                biased;
                // A dropped sender also stops the loop.
                _ = stop_rx.changed() => break,
                Some(fired) = fired_rx.recv() => {
                    // Samples queued before the threshold tick decide whether it still counts.
                    self.poll(&mut samples_rx, &mut tracker, &mut timer, &mut pending).await;
                    self.accept_fired(fired, tracker.current(), &mut pending);
                }
                _ = interval.tick() => {
                    self.poll(&mut samples_rx, &mut tracker, &mut timer, &mut pending).await;
                }
                Some(joined) = pending.join_next(), if !pending.is_empty() => log_join(joined),
            }
        }

        if let Some(record) = timer.cancel().await {
            self.report_visit(record, &mut pending);
        }
        while let Ok(fired) = fired_rx.try_recv() {
            self.accept_fired(fired, tracker.current(), &mut pending);
        }
        while let Some(joined) = pending.join_next().await {
            log_join(joined);
        }
        self.summary
    }

    /// Drain samples, select the closest beacon and restart dwell timing on
    /// a change.
    async fn poll(
        &mut self,
        samples_rx: &mut mpsc::UnboundedReceiver<BeaconSample>,
        tracker: &mut ProximityTracker,
        timer: &mut DwellTimer,
        pending: &mut JoinSet<()>,
    ) {
        self.drain_samples(samples_rx);
        let Some(transition) = tracker.tick(&self.beacons, &self.sampler) else {
            self.publish(tracker.current());
            return;
        };
        self.summary.transitions += 1;
        self.publish(&transition.current);

        if let Some(record) = timer.cancel().await {
            self.report_visit(record, pending);
        }
        if let Some(beacon) = transition.current.beacon {
            self.record_first_visit(&beacon, pending);
            let _ = timer.start(beacon).await;
        }
    }

    /// A dwell fire counts only while its beacon is still the closest one.
    /// The scan is credited under the beacon's current identity, which may
    /// have gained a URL since the dwell began.
    fn accept_fired(
        &mut self,
        fired: DwellFired,
        current: &ClosestBeacon,
        pending: &mut JoinSet<()>,
    ) {
        match &current.beacon {
            Some(beacon) if beacon.address == fired.beacon.address => {
                self.record_scan(beacon.clone(), pending);
            }
            _ => tracing::debug!(
                beacon = %fired.beacon.address,
                elapsed_ms = fired.elapsed_ms,
                "Dwell fire superseded by a beacon change"
            ),
        }
    }

    fn drain_samples(&mut self, samples_rx: &mut mpsc::UnboundedReceiver<BeaconSample>) {
        while let Ok(sample) = samples_rx.try_recv() {
            let url = sample.service_data.as_deref().and_then(parse_eddystone_url);
            let Some(beacon) = self
                .beacons
                .iter_mut()
                .find(|b| b.address.eq_ignore_ascii_case(&sample.address))
            else {
                continue;
            };
            if beacon.url.is_empty() {
                if let Some(url) = url {
                    beacon.url = url;
                }
            }
            self.sampler.sample(&beacon.address, sample.rssi);
            self.summary.samples += 1;
        }
    }

    fn publish(&self, closest: &ClosestBeacon) {
        self.closest_tx.send_if_modified(|value| {
            if *value == *closest {
                false
            } else {
                value.clone_from(closest);
                true
            }
        });
    }

    fn record_scan(&mut self, beacon: Beacon, pending: &mut JoinSet<()>) {
        self.summary.scans_fired += 1;
        let coordinator = self.coordinator.clone();
        let context = Arc::clone(&self.context);
        let rewards_tx = self.rewards_tx.clone();
        pending.spawn(async move {
            match coordinator
                .record_scan(&context.event, &beacon, &context.user)
                .await
            {
                Ok(outcome) => {
                    for reward in outcome.rewards_unlocked {
                        // No subscribers is fine.
                        let _ = rewards_tx.send(RewardUnlocked {
                            user_id: context.user.id.clone(),
                            event_id: context.event.id.clone(),
                            beacon_address: beacon.address.clone(),
                            reward,
                        });
                    }
                }
                Err(err) => tracing::warn!(
                    user_id = %context.user.id,
                    event_id = %context.event.id,
                    beacon = %beacon.address,
                    error = %err,
                    "Failed to record scan"
                ),
            }
        });
    }

    fn record_first_visit(&self, beacon: &Beacon, pending: &mut JoinSet<()>) {
        let key = self.context.visit_key(beacon);
        let ledger = Arc::clone(&self.ledger);
        let at = Utc::now();
        pending.spawn(async move {
            if let Err(err) = ledger.record_first_visit(&key, at).await {
                tracing::warn!(
                    beacon = %key.beacon_address,
                    error = %err,
                    "Failed to record first visit"
                );
            }
        });
    }

    fn report_visit(&mut self, record: DwellRecord, pending: &mut JoinSet<()>) {
        self.summary.visits_reported += 1;
        let key = self.context.visit_key(&record.beacon);
        let ledger = Arc::clone(&self.ledger);
        pending.spawn(async move {
            match ledger.record_visit_duration(&key, record.duration_ms).await {
                Ok(updated) => tracing::debug!(
                    beacon = %key.beacon_address,
                    duration_ms = record.duration_ms,
                    updated,
                    "Visit reported"
                ),
                Err(err) => tracing::warn!(
                    beacon = %key.beacon_address,
                    duration_ms = record.duration_ms,
                    error = %err,
                    "Failed to report visit"
                ),
            }
        });
    }
}

fn log_join(joined: Result<(), tokio::task::JoinError>) {
    if let Err(err) = joined {
        tracing::warn!(error = %err, "Session background task failed");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ledger::MemoryLedger;
    use crate::store::MemoryStore;

    fn session() -> ScanningSession {
        let coordinator = ScanRewardCoordinator::new(Arc::new(MemoryStore::new()), 5);
        ScanningSession::new(
            ScannerConfig::default(),
            DwellConfig::default(),
            coordinator,
            Arc::new(MemoryLedger::new()),
        )
    }

    fn context() -> SessionContext {
        SessionContext::new(
            User {
                id: "u1".into(),
                ..User::default()
            },
            Event {
                id: "expo".into(),
                title: "Expo".into(),
                ..Event::default()
            },
        )
    }

    #[tokio::test(start_paused = true)]
    async fn test_lifecycle_errors() {
        let mut session = session();
        assert_eq!(session.stop().await, Err(SessionError::NotRunning));
        assert_eq!(
            session.ingest(BeaconSample::now("AA:BB:CC:DD:EE:01", -60)),
            Err(SessionError::NotRunning)
        );

        session.start(context(), Vec::new()).unwrap();
        assert!(session.is_scanning());
        assert_eq!(
            session.start(context(), Vec::new()),
            Err(SessionError::AlreadyRunning)
        );

        session.stop().await.unwrap();
        assert!(!session.is_scanning());
        assert!(session.context().is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_eddystone_url_fills_missing_beacon_url() {
        let mut session = session();
        let beacon = Beacon {
            address: "AA:BB:CC:DD:EE:01".into(),
            ..Beacon::default()
        };
        session.start(context(), vec![beacon]).unwrap();

        let mut frame = vec![0x10, 0x00, 0x03];
        frame.extend_from_slice(b"example");
        frame.push(0x07);
        let mut sample = BeaconSample::now("AA:BB:CC:DD:EE:01", -59);
        sample.service_data = Some(frame);
        session.ingest(sample).unwrap();

        tokio::time::sleep(Duration::from_millis(100)).await;
        let closest = session.current_closest();
        assert_eq!(
            closest.beacon.map(|b| b.url),
            Some("https://example.com".to_string())
        );
        session.stop().await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_unknown_addresses_are_ignored() {
        let mut session = session();
        session.start(context(), Vec::new()).unwrap();
        session.ingest(BeaconSample::now("11:22:33:44:55:66", -40)).unwrap();
        tokio::time::sleep(Duration::from_millis(100)).await;
        let summary = session.stop().await.unwrap();
        assert_eq!(summary.samples, 0);
        assert!(session.current_closest().is_none());
    }
}
