/*!
 * Bluetooth Host Abstraction
 * Everything BlueShooth needs from the OS Bluetooth stack, keyed by address
 */

pub mod bluez;
pub mod simulated;

use async_trait::async_trait;
use thiserror::Error;
use tokio::sync::mpsc;

pub use bluez::BluezHost;
pub use simulated::SimulatedHost;

#[derive(Debug, Error)]
pub enum BluetoothError {
    #[error("device {0} is not known to the Bluetooth stack")]
    DeviceUnavailable(String),

    #[error("Bluetooth stack rejected request for {address}: {reason}")]
    Rejected { address: String, reason: String },

    #[error("Bluetooth bus error: {0}")]
    Bus(String),
}

/// A paired device record exactly as the OS reports it. Either field may be
/// missing or empty.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PairedDevice {
    pub address: Option<String>,
    pub name: Option<String>,
}

/// The OS reported that a device finished connecting.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectionEvent {
    pub address: String,
}

/// Live subscription to connection events.
///
/// Dropping it releases whatever registration the host made to produce the
/// events.
pub struct ConnectionEvents {
    rx: mpsc::UnboundedReceiver<ConnectionEvent>,
    _registration: Box<dyn Send + Sync>,
}

impl ConnectionEvents {
    pub fn new(
        rx: mpsc::UnboundedReceiver<ConnectionEvent>,
        registration: impl Send + Sync + 'static,
    ) -> Self {
        Self {
            rx,
            _registration: Box::new(registration),
        }
    }

    /// Next event, or `None` once the host stops producing them.
    pub async fn recv(&mut self) -> Option<ConnectionEvent> {
        self.rx.recv().await
    }
}

#[async_trait]
pub trait BluetoothHost: Send + Sync {
    /// All devices currently paired with this host.
    async fn paired_devices(&self) -> Result<Vec<PairedDevice>, BluetoothError>;

    /// Live connection state, never cached.
    async fn is_connected(&self, address: &str) -> Result<bool, BluetoothError>;

    async fn open_connection(&self, address: &str) -> Result<(), BluetoothError>;

    async fn close_connection(&self, address: &str) -> Result<(), BluetoothError>;

    /// Subscribe to "device connected" notifications.
    async fn watch_connections(&self) -> Result<ConnectionEvents, BluetoothError>;
}
