//! Application state shared across handlers.

use std::sync::Arc;

use bleadvert_core::{
    Catalog, Config, JsonFileLedger, JsonFileStore, MemoryLedger, MemoryStore, ProgressStore,
    ScanRewardCoordinator, ScanningSession, VisitLedger,
};
use tokio::sync::RwLock;

/// Shared handle to [`AppState`].
pub type SharedState = Arc<RwLock<AppState>>;

/// Everything the handlers need.
pub struct AppState {
    /// Loaded configuration.
    pub config: Config,

    /// Beacons and events.
    pub catalog: Catalog,

    /// Progress documents, read directly by the progress endpoints.
    pub store: Arc<dyn ProgressStore>,

    /// Scanning session and its observers.
    pub session: ScanningSession,

    /// BlueZ discovery feeding the running session.
    #[cfg(feature = "bluetooth")]
    pub scanner: Option<bleadvert_core::BluetoothScanner>,
}

impl AppState {
    /// Assemble state from explicit backends.
    #[must_use]
    pub fn new(
        config: Config,
        catalog: Catalog,
        store: Arc<dyn ProgressStore>,
        ledger: Arc<dyn VisitLedger>,
    ) -> Self {
        let coordinator =
            ScanRewardCoordinator::new(Arc::clone(&store), config.storage.transaction_attempts);
        let session = ScanningSession::new(
            config.scanner.clone(),
            config.dwell.clone(),
            coordinator,
            ledger,
        );
        Self {
            config,
            catalog,
            store,
            session,
            #[cfg(feature = "bluetooth")]
            scanner: None,
        }
    }

    /// State backed by JSON files under the configured data directory.
    ///
    /// # Errors
    ///
    /// Returns an error if the catalog exists but cannot be loaded.
    pub async fn from_config(config: Config) -> anyhow::Result<Self> {
        let catalog = Catalog::load(config.catalog_path()).await?;
        let data_dir = config.storage.resolved_data_dir();
        let store = Arc::new(JsonFileStore::new(&data_dir));
        let ledger = Arc::new(JsonFileLedger::new(&data_dir, config.system.tz()));
        tracing::info!(data_dir = %data_dir.display(), "Using JSON file storage");
        Ok(Self::new(config, catalog, store, ledger))
    }

    /// State backed by in-memory stores.
    #[must_use]
    pub fn in_memory(config: Config, catalog: Catalog) -> Self {
        Self::new(
            config,
            catalog,
            Arc::new(MemoryStore::new()),
            Arc::new(MemoryLedger::new()),
        )
    }

    /// Wrap into the shared handle used by the router.
    #[must_use]
    pub fn into_shared(self) -> SharedState {
        Arc::new(RwLock::new(self))
    }
}
