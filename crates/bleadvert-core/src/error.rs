//! Unified error types for the bleadvert core library.
//!
//! [`BleAdvertError`] covers every failure mode the core surfaces to callers.
//! Modules keep their own narrower error types ([`ConfigError`],
//! [`StoreError`], [`SessionError`]) and convert into this one.
//!
//! Numeric faults in signal processing are never errors: they degrade to the
//! unreachable distance sentinel instead.
//!
//! # Example
//!
//! ```rust
//! use bleadvert_core::error::{BleAdvertError, Result};
//!
//! fn require_event(active: Option<&str>) -> Result<&str> {
//!     active.ok_or(BleAdvertError::NoActiveEvent)
//! }
//! ```
//!
//! [`ConfigError`]: crate::config::ConfigError
//! [`StoreError`]: crate::store::StoreError
//! [`SessionError`]: crate::session::SessionError

use std::path::PathBuf;
use thiserror::Error;

/// The unified error type for all bleadvert operations.
#[derive(Debug, Error)]
pub enum BleAdvertError {
    // =========================================================================
    // BLUETOOTH ERRORS
    // =========================================================================
    /// No Bluetooth adapter was found on this system.
    #[error(
        "No Bluetooth adapter found. Ensure Bluetooth hardware is present and drivers are loaded."
    )]
    BluetoothAdapterNotFound,

    /// Bluetooth discovery failed.
    #[error("Bluetooth scan failed: {0}")]
    BluetoothScanFailed(String),

    // =========================================================================
    // CATALOG ERRORS
    // =========================================================================
    /// A beacon address is not in `XX:XX:XX:XX:XX:XX` form.
    #[error("Invalid beacon address: '{0}'. Expected format XX:XX:XX:XX:XX:XX.")]
    InvalidBeaconAddress(String),

    /// The beacon/event catalog could not be parsed.
    #[error("Failed to parse catalog: {0}")]
    CatalogParseError(String),

    // =========================================================================
    // SESSION ERRORS
    // =========================================================================
    /// No event window contains the current time.
    #[error("No active event. Scanning requires an event whose window contains the current time.")]
    NoActiveEvent,

    /// A scanning session is already running.
    #[error("A scanning session is already active")]
    SessionAlreadyActive,

    /// No scanning session is running.
    #[error("No scanning session is active")]
    SessionNotActive,

    // =========================================================================
    // CONFIGURATION ERRORS
    // =========================================================================
    /// The configuration file was not found at the expected path.
    #[error("Configuration file not found at: {}", .0.display())]
    ConfigNotFound(PathBuf),

    /// The configuration file exists but could not be parsed.
    #[error("Failed to parse configuration: {0}")]
    ConfigParseError(String),

    /// The configuration was parsed but contains invalid values.
    #[error("Configuration validation failed: {0}")]
    ConfigValidationError(String),

    // =========================================================================
    // PERSISTENCE & I/O ERRORS
    // =========================================================================
    /// A transaction kept conflicting with concurrent writers.
    #[error("Transaction conflict: {0}")]
    TransactionConflict(String),

    /// An error occurred while persisting or reading documents.
    #[error("Persistence error: {0}")]
    PersistenceError(String),

    /// A low-level I/O error occurred.
    #[error("I/O error: {0}")]
    IoError(#[from] std::io::Error),
}

/// A specialized [`Result`] type for bleadvert operations.
pub type Result<T> = std::result::Result<T, BleAdvertError>;

impl BleAdvertError {
    /// Returns `true` if this error is related to Bluetooth operations.
    #[inline]
    #[must_use]
    pub const fn is_bluetooth_error(&self) -> bool {
        matches!(
            self,
            Self::BluetoothAdapterNotFound | Self::BluetoothScanFailed(_)
        )
    }

    /// Returns `true` if this error is related to configuration.
    #[inline]
    #[must_use]
    pub const fn is_config_error(&self) -> bool {
        matches!(
            self,
            Self::ConfigNotFound(_) | Self::ConfigParseError(_) | Self::ConfigValidationError(_)
        )
    }

    /// Returns `true` if this error came from the progress store or ledger.
    #[inline]
    #[must_use]
    pub const fn is_store_error(&self) -> bool {
        matches!(
            self,
            Self::TransactionConflict(_) | Self::PersistenceError(_) | Self::IoError(_)
        )
    }

    /// Returns `true` if this error is about session lifecycle.
    #[inline]
    #[must_use]
    pub const fn is_session_error(&self) -> bool {
        matches!(
            self,
            Self::NoActiveEvent | Self::SessionAlreadyActive | Self::SessionNotActive
        )
    }

    /// Returns `true` if retrying later is likely to succeed without user
    /// intervention.
    #[inline]
    #[must_use]
    pub const fn is_recoverable(&self) -> bool {
        matches!(
            self,
            Self::TransactionConflict(_) | Self::BluetoothScanFailed(_)
        )
    }

    /// Returns an HTTP-appropriate status code for this error.
    #[inline]
    #[must_use]
    pub const fn http_status_code(&self) -> u16 {
        match self {
            Self::InvalidBeaconAddress(_) => 400,
            Self::ConfigNotFound(_) => 404,
            Self::NoActiveEvent
            | Self::SessionAlreadyActive
            | Self::SessionNotActive
            | Self::TransactionConflict(_) => 409,
            Self::CatalogParseError(_) | Self::ConfigParseError(_) | Self::ConfigValidationError(_) => {
                422
            }
            Self::PersistenceError(_) | Self::IoError(_) => 500,
            Self::BluetoothAdapterNotFound | Self::BluetoothScanFailed(_) => 503,
        }
    }

    /// Returns a machine-readable error code for API responses.
    #[inline]
    #[must_use]
    pub const fn error_code(&self) -> &'static str {
        match self {
            Self::BluetoothAdapterNotFound => "BLUETOOTH_ADAPTER_NOT_FOUND",
            Self::BluetoothScanFailed(_) => "BLUETOOTH_SCAN_FAILED",
            Self::InvalidBeaconAddress(_) => "INVALID_BEACON_ADDRESS",
            Self::CatalogParseError(_) => "CATALOG_PARSE_ERROR",
            Self::NoActiveEvent => "NO_ACTIVE_EVENT",
            Self::SessionAlreadyActive => "SESSION_ALREADY_ACTIVE",
            Self::SessionNotActive => "SESSION_NOT_ACTIVE",
            Self::ConfigNotFound(_) => "CONFIG_NOT_FOUND",
            Self::ConfigParseError(_) => "CONFIG_PARSE_ERROR",
            Self::ConfigValidationError(_) => "CONFIG_VALIDATION_ERROR",
            Self::TransactionConflict(_) => "TRANSACTION_CONFLICT",
            Self::PersistenceError(_) => "PERSISTENCE_ERROR",
            Self::IoError(_) => "IO_ERROR",
        }
    }
}

// =============================================================================
// CONVERSIONS FROM MODULE-SPECIFIC ERRORS
// =============================================================================

impl From<crate::config::ConfigError> for BleAdvertError {
    fn from(err: crate::config::ConfigError) -> Self {
        use crate::config::ConfigError;
        match err {
            ConfigError::NotFound(path) => Self::ConfigNotFound(path.into()),
            ConfigError::WriteError { path, source } => {
                Self::PersistenceError(format!("Failed to write {path}: {source}"))
            }
            ConfigError::ParseError(e) => Self::ConfigParseError(e.to_string()),
            ConfigError::SerializeError(e) => Self::ConfigParseError(e.to_string()),
            ConfigError::ValidationError { field, message } => {
                Self::ConfigValidationError(format!("{field}: {message}"))
            }
            ConfigError::MultipleValidationErrors(errors) => {
                let messages: Vec<String> = errors.iter().map(ToString::to_string).collect();
                Self::ConfigValidationError(messages.join("; "))
            }
        }
    }
}

impl From<crate::store::StoreError> for BleAdvertError {
    fn from(err: crate::store::StoreError) -> Self {
        use crate::store::StoreError;
        match err {
            StoreError::Conflict { .. } | StoreError::RetriesExhausted { .. } => {
                Self::TransactionConflict(err.to_string())
            }
            StoreError::Io { .. } | StoreError::Corrupt { .. } => {
                Self::PersistenceError(err.to_string())
            }
        }
    }
}

impl From<crate::session::SessionError> for BleAdvertError {
    fn from(err: crate::session::SessionError) -> Self {
        use crate::session::SessionError;
        match err {
            SessionError::AlreadyRunning => Self::SessionAlreadyActive,
            SessionError::NotRunning => Self::SessionNotActive,
        }
    }
}

#[cfg(feature = "bluetooth")]
impl From<crate::bluetooth::BluetoothError> for BleAdvertError {
    fn from(err: crate::bluetooth::BluetoothError) -> Self {
        use crate::bluetooth::BluetoothError;
        match err {
            BluetoothError::AdapterNotFound => Self::BluetoothAdapterNotFound,
            BluetoothError::SessionInitFailed { message }
            | BluetoothError::DiscoveryFailed { message } => Self::BluetoothScanFailed(message),
        }
    }
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ConfigError;
    use crate::store::StoreError;
    use std::io::{Error as IoErr, ErrorKind};

    #[test]
    fn test_error_classification() {
        assert!(BleAdvertError::BluetoothAdapterNotFound.is_bluetooth_error());
        assert!(BleAdvertError::ConfigParseError("x".into()).is_config_error());
        assert!(BleAdvertError::TransactionConflict("x".into()).is_store_error());
        assert!(BleAdvertError::NoActiveEvent.is_session_error());
        assert!(!BleAdvertError::NoActiveEvent.is_store_error());
    }

    #[test]
    fn test_recoverable_errors() {
        assert!(BleAdvertError::TransactionConflict("busy".into()).is_recoverable());
        assert!(!BleAdvertError::PersistenceError("disk".into()).is_recoverable());
    }

    #[test]
    fn test_http_status_codes() {
        assert_eq!(
            BleAdvertError::InvalidBeaconAddress("x".into()).http_status_code(),
            400
        );
        assert_eq!(BleAdvertError::SessionAlreadyActive.http_status_code(), 409);
        assert_eq!(
            BleAdvertError::PersistenceError("x".into()).http_status_code(),
            500
        );
        assert_eq!(
            BleAdvertError::BluetoothAdapterNotFound.http_status_code(),
            503
        );
    }

    #[test]
    fn test_store_error_conversion() {
        let err: BleAdvertError = StoreError::RetriesExhausted { attempts: 5 }.into();
        assert!(matches!(err, BleAdvertError::TransactionConflict(_)));
        assert_eq!(err.error_code(), "TRANSACTION_CONFLICT");

        let err: BleAdvertError = StoreError::Io {
            path: "users/u1.json".into(),
            source: IoErr::new(ErrorKind::PermissionDenied, "denied"),
        }
        .into();
        assert!(matches!(err, BleAdvertError::PersistenceError(_)));
    }

    #[test]
    fn test_config_error_conversion() {
        let err: BleAdvertError = ConfigError::ValidationError {
            field: "scanner.sample_window",
            message: "must be between 1 and 32".into(),
        }
        .into();
        assert!(err.to_string().contains("scanner.sample_window"));
    }

    #[test]
    fn test_from_io_error() {
        let err: BleAdvertError = IoErr::new(ErrorKind::NotFound, "file not found").into();
        assert!(matches!(err, BleAdvertError::IoError(_)));
    }

    #[test]
    fn test_error_is_send_and_sync() {
        fn assert_send<T: Send>() {}
        fn assert_sync<T: Sync>() {}

        assert_send::<BleAdvertError>();
        assert_sync::<BleAdvertError>();
    }
}
