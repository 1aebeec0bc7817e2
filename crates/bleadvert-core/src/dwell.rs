//! Dwell time accumulation.
//!
//! [`DwellSession`] is the pure state machine: it counts time spent at one
//! beacon, fires once when the scan threshold is crossed, and yields a
//! [`DwellRecord`] when it is flushed. [`DwellTimer`] drives a session from a
//! cancellable tokio task that ticks at a fixed interval; that task is the only
//! writer of the accumulated time.

use std::time::Duration;

use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};

use crate::config::DwellConfig;
use crate::types::Beacon;

/// Phase of a [`DwellSession`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DwellState {
    /// No beacon is being timed.
    Idle,
    /// Time is accumulating below the scan threshold.
    Accumulating,
    /// The threshold was crossed; time keeps accumulating.
    Fired,
}

/// Emitted once per session when the scan threshold is crossed.
#[derive(Debug, Clone, PartialEq)]
pub struct DwellFired {
    /// Beacon the user dwelt at.
    pub beacon: Beacon,
    /// Accumulated time at the moment of firing.
    pub elapsed_ms: u64,
}

/// Time spent at a beacon, produced when a session is flushed.
#[derive(Debug, Clone, PartialEq)]
pub struct DwellRecord {
    /// Beacon the time was spent at.
    pub beacon: Beacon,
    /// Total accumulated time.
    pub duration_ms: u64,
    /// Whether the session fired.
    pub fired: bool,
}

/// Dwell state machine for one beacon at a time.
#[derive(Debug, Clone)]
pub struct DwellSession {
    scan_threshold_ms: u64,
    min_reportable_ms: u64,
    beacon: Option<Beacon>,
    elapsed_ms: u64,
    fired: bool,
}

impl DwellSession {
    /// Create an idle session.
    #[must_use]
    pub const fn new(config: &DwellConfig) -> Self {
        Self {
            scan_threshold_ms: config.scan_threshold_ms,
            min_reportable_ms: config.min_reportable_ms,
            beacon: None,
            elapsed_ms: 0,
            fired: false,
        }
    }

    /// Current phase.
    #[must_use]
    pub const fn state(&self) -> DwellState {
        match (&self.beacon, self.fired) {
            (None, _) => DwellState::Idle,
            (Some(_), false) => DwellState::Accumulating,
            (Some(_), true) => DwellState::Fired,
        }
    }

    /// Beacon being timed.
    #[must_use]
    pub const fn beacon(&self) -> Option<&Beacon> {
        self.beacon.as_ref()
    }

    /// Accumulated time.
    #[must_use]
    pub const fn elapsed_ms(&self) -> u64 {
        self.elapsed_ms
    }

    /// Start timing `beacon` from zero. Any previous session is discarded
    /// unreported; flush it first to keep it.
    pub fn begin(&mut self, beacon: Beacon) {
        self.beacon = Some(beacon);
        self.elapsed_ms = 0;
        self.fired = false;
    }

    /// Add `step_ms` of dwell time. Returns the fire event the first time the
    /// total reaches the scan threshold.
    pub fn advance(&mut self, step_ms: u64) -> Option<DwellFired> {
        let beacon = self.beacon.as_ref()?;
        self.elapsed_ms = self.elapsed_ms.saturating_add(step_ms);
        if self.fired || self.elapsed_ms < self.scan_threshold_ms {
            return None;
        }
        self.fired = true;
        Some(DwellFired {
            beacon: beacon.clone(),
            elapsed_ms: self.elapsed_ms,
        })
    }

    /// Return to idle. Yields the record when enough time was accumulated to
    /// be worth reporting.
    pub fn flush(&mut self) -> Option<DwellRecord> {
        let beacon = self.beacon.take()?;
        let duration_ms = std::mem::take(&mut self.elapsed_ms);
        let fired = std::mem::take(&mut self.fired);
        (duration_ms >= self.min_reportable_ms).then_some(DwellRecord {
            beacon,
            duration_ms,
            fired,
        })
    }
}

struct ActiveDwell {
    beacon: Beacon,
    stop: watch::Sender<bool>,
    handle: JoinHandle<Option<DwellRecord>>,
}

/// Runs at most one [`DwellSession`] on a background tick task.
///
/// Fire events are sent on the channel given to [`DwellTimer::new`]; flushed
/// records are returned from [`DwellTimer::cancel`].
pub struct DwellTimer {
    config: DwellConfig,
    fired_tx: mpsc::UnboundedSender<DwellFired>,
    active: Option<ActiveDwell>,
}

impl std::fmt::Debug for DwellTimer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DwellTimer")
            .field("config", &self.config)
            .field("beacon", &self.beacon().map(|b| b.address.as_str()))
            .finish_non_exhaustive()
    }
}

impl DwellTimer {
    /// Create an idle timer.
    #[must_use]
    pub fn new(config: DwellConfig, fired_tx: mpsc::UnboundedSender<DwellFired>) -> Self {
        Self {
            config,
            fired_tx,
            active: None,
        }
    }

    /// Beacon currently being timed.
    #[must_use]
    pub fn beacon(&self) -> Option<&Beacon> {
        self.active.as_ref().map(|a| &a.beacon)
    }

    /// Whether a tick task is alive.
    #[must_use]
    pub const fn is_running(&self) -> bool {
        self.active.is_some()
    }

    /// Start timing `beacon`. A running session is cancelled first and its
    /// record returned.
    pub async fn start(&mut self, beacon: Beacon) -> Option<DwellRecord> {
        let previous = self.cancel().await;

        let mut session = DwellSession::new(&self.config);
        session.begin(beacon.clone());
        let (stop, stop_rx) = watch::channel(false);
        let tick = Duration::from_millis(self.config.tick_interval_ms.max(1));
        let handle = tokio::spawn(run_ticks(session, tick, stop_rx, self.fired_tx.clone()));

        tracing::debug!(beacon = %beacon.address, "Dwell timer started");
        self.active = Some(ActiveDwell {
            beacon,
            stop,
            handle,
        });
        previous
    }

    /// Stop the tick task and flush its session. A no-op on an idle timer.
    pub async fn cancel(&mut self) -> Option<DwellRecord> {
        let active = self.active.take()?;
        let _ = active.stop.send(true);
        match active.handle.await {
            Ok(record) => {
                tracing::debug!(
                    beacon = %active.beacon.address,
                    reported_ms = ?record.as_ref().map(|r| r.duration_ms),
                    "Dwell timer cancelled"
                );
                record
            }
            Err(err) => {
                tracing::warn!(beacon = %active.beacon.address, error = %err, "Dwell task failed");
                None
            }
        }
    }
}

async fn run_ticks(
    mut session: DwellSession,
    tick: Duration,
    mut stop: watch::Receiver<bool>,
    fired_tx: mpsc::UnboundedSender<DwellFired>,
) -> Option<DwellRecord> {
    let step_ms = u64::try_from(tick.as_millis()).unwrap_or(u64::MAX);
    let mut interval = tokio::time::interval_at(Instant::now() + tick, tick);
    interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            biased;
            // A dropped sender also stops the task.
            _ = stop.changed() => break,
            _ = interval.tick() => {
                if let Some(fired) = session.advance(step_ms) {
                    tracing::info!(
                        beacon = %fired.beacon.address,
                        elapsed_ms = fired.elapsed_ms,
                        "Dwell threshold reached"
                    );
                    if fired_tx.send(fired).is_err() {
                        tracing::debug!("Dwell fire receiver dropped");
                    }
                }
            }
        }
    }
    session.flush()
}
