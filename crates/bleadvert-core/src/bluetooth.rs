//! BlueZ sample source.
//!
//! Runs LE discovery on the default adapter and forwards every RSSI update as
//! a [`BeaconSample`], together with any Eddystone service data the device
//! advertised. Only available with the `bluetooth` feature on Linux.

use bluer::{Adapter, AdapterEvent, Address, DiscoveryFilter, DiscoveryTransport, Session};
use futures::StreamExt;
use thiserror::Error;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::eddystone::EDDYSTONE_SERVICE_UUID;
use crate::types::BeaconSample;

/// Bluetooth failures.
#[derive(Debug, Error)]
pub enum BluetoothError {
    /// No adapter is present or powered.
    #[error("no Bluetooth adapter found")]
    AdapterNotFound,

    /// The BlueZ session could not be opened.
    #[error("failed to open BlueZ session: {message}")]
    SessionInitFailed {
        /// Error detail.
        message: String,
    },

    /// Discovery could not be started.
    #[error("discovery failed: {message}")]
    DiscoveryFailed {
        /// Error detail.
        message: String,
    },
}

/// Result alias for Bluetooth operations.
pub type BluetoothResult<T> = std::result::Result<T, BluetoothError>;

/// Handle to a running discovery task.
#[derive(Debug)]
pub struct BluetoothScanner {
    adapter_name: String,
    handle: JoinHandle<()>,
}

impl BluetoothScanner {
    /// Power the default adapter and forward discovered samples to `samples`.
    ///
    /// Discovery stops when `samples` is closed or [`Self::stop`] is called.
    ///
    /// # Errors
    ///
    /// Returns an error if BlueZ is unreachable, no adapter exists, or
    /// discovery cannot be started.
    pub async fn start(samples: mpsc::UnboundedSender<BeaconSample>) -> BluetoothResult<Self> {
        let session = Session::new()
            .await
            .map_err(|e| BluetoothError::SessionInitFailed {
                message: e.to_string(),
            })?;
        let adapter = session
            .default_adapter()
            .await
            .map_err(|_| BluetoothError::AdapterNotFound)?;
        adapter
            .set_powered(true)
            .await
            .map_err(|_| BluetoothError::AdapterNotFound)?;
        adapter
            .set_discovery_filter(DiscoveryFilter {
                transport: DiscoveryTransport::Le,
                duplicate_data: true,
                ..DiscoveryFilter::default()
            })
            .await
            .map_err(discovery_failed)?;

        let events = adapter
            .discover_devices_with_changes()
            .await
            .map_err(discovery_failed)?;
        let adapter_name = adapter.name().to_string();
        tracing::info!(adapter = %adapter_name, "Bluetooth discovery started");

        let handle = tokio::spawn(async move {
            // The session must outlive the discovery stream.
            let _session = session;
            futures::pin_mut!(events);
            while let Some(event) = events.next().await {
                let AdapterEvent::DeviceAdded(address) = event else {
                    continue;
                };
                match read_sample(&adapter, address).await {
                    Ok(Some(sample)) => {
                        if samples.send(sample).is_err() {
                            break;
                        }
                    }
                    Ok(None) => {}
                    Err(err) => {
                        tracing::debug!(address = %format_address(address), error = %err, "Skipping device");
                    }
                }
            }
            tracing::info!("Bluetooth discovery stopped");
        });

        Ok(Self {
            adapter_name,
            handle,
        })
    }

    /// Name of the adapter in use, e.g. `hci0`.
    #[must_use]
    pub fn adapter_name(&self) -> &str {
        &self.adapter_name
    }

    /// Stop discovery.
    pub fn stop(self) {
        self.handle.abort();
    }
}

fn discovery_failed(err: bluer::Error) -> BluetoothError {
    BluetoothError::DiscoveryFailed {
        message: err.to_string(),
    }
}

async fn read_sample(adapter: &Adapter, address: Address) -> bluer::Result<Option<BeaconSample>> {
    let device = adapter.device(address)?;
    let Some(rssi) = device.rssi().await? else {
        return Ok(None);
    };
    let mut sample = BeaconSample::now(format_address(address), rssi);
    sample.service_data = device
        .service_data()
        .await?
        .and_then(|mut data| data.remove(&EDDYSTONE_SERVICE_UUID));
    Ok(Some(sample))
}

/// `XX:XX:XX:XX:XX:XX` in upper case, the form beacon addresses are stored in.
fn format_address(address: Address) -> String {
    let [a, b, c, d, e, f] = address.0;
    format!("{a:02X}:{b:02X}:{c:02X}:{d:02X}:{e:02X}:{f:02X}")
}
