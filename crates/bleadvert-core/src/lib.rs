//! # bleadvert-core
//!
//! Core logic for the bleadvert beacon proximity system.
//!
//! This crate provides:
//! - RSSI smoothing and closest-beacon selection
//! - Dwell timing with at-most-once scan recording per session
//! - Idempotent, transactional reward unlocking
//! - Visit analytics and JSON file persistence
//!
//! ## Architecture
//!
//! Samples flow through the pipeline in this order:
//!
//! - [`sampler`] - RSSI to distance estimation over a bounded window
//! - [`tracker`] - closest eligible beacon and transition detection
//! - [`dwell`] - dwell time accumulation on a cancellable tick task
//! - [`coordinator`] - scan recording and reward unlocking
//! - [`session`] - the polling loop tying the above together
//!
//! Supporting modules:
//!
//! - [`store`] / [`ledger`] - progress store and visit ledger traits, in-memory backends
//! - [`storage`] - JSON file backends
//! - [`catalog`] - beacon and event catalog
//! - [`eddystone`] - Eddystone-URL decoding
//! - [`config`] - configuration loading, saving, and validation
//! - [`error`] - unified error types for the crate
//! - [`types`] - shared types and OpenAPI schemas

#![forbid(unsafe_code)]
#![warn(clippy::all, clippy::pedantic, clippy::nursery)]
#![warn(missing_docs)]

#[cfg(feature = "bluetooth")]
pub mod bluetooth;
pub mod catalog;
pub mod config;
pub mod coordinator;
pub mod dwell;
pub mod eddystone;
pub mod error;
pub mod ledger;
pub mod sampler;
pub mod session;
pub mod storage;
pub mod store;
pub mod tracker;
pub mod types;

// Re-export primary types for convenience
#[cfg(feature = "bluetooth")]
pub use bluetooth::{BluetoothError, BluetoothResult, BluetoothScanner};
pub use catalog::Catalog;
pub use config::{
    default_config_path, is_valid_mac_address, is_valid_timezone_format, Config, ConfigError,
    ConfigResult, DwellConfig, ScannerConfig, ServerConfig, StorageConfig, SystemConfig,
};
pub use coordinator::{apply_scan, ScanOutcome, ScanRewardCoordinator};
pub use dwell::{DwellFired, DwellRecord, DwellSession, DwellState, DwellTimer};
pub use eddystone::{parse_eddystone_url, EDDYSTONE_SERVICE_UUID};
pub use error::{BleAdvertError, Result};
pub use ledger::{MemoryLedger, VisitKey, VisitLedger};
pub use sampler::{SignalSampler, UNREACHABLE_DISTANCE};
pub use session::{RewardUnlocked, ScanningSession, SessionContext, SessionError, SessionSummary};
pub use storage::{default_data_dir, JsonFileLedger, JsonFileStore};
pub use store::{
    run_transaction, MemoryStore, ProgressStore, StoreError, StoreResult, TxDecision, Versioned,
};
pub use tracker::{ClosestBeacon, ProximityTracker, Transition};
pub use types::{
    Beacon, BeaconIdentity, BeaconSample, Event, Position, Reward, User, UserEventProgress,
    UserInfo, DEFAULT_MAX_ADVERTISEMENT_DISTANCE,
};
