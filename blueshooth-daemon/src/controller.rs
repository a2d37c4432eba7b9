/*!
 * Connection Controller
 * User-driven connect/disconnect with idempotent no-ops and notifications
 */

use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use thiserror::Error;

use crate::bluetooth::{BluetoothError, BluetoothHost};
use crate::device::Device;
use crate::notify::{Notification, Notifier};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Transition {
    /// The OS call went through and the device changed state.
    Changed,
    /// The device was already in the requested state; no OS call was made.
    AlreadyInState,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Connect,
    Disconnect,
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Direction::Connect => write!(f, "connect"),
            Direction::Disconnect => write!(f, "disconnect"),
        }
    }
}

#[derive(Debug, Error)]
#[error("failed to {direction} {name} ({address}): {source}")]
pub struct ConnectionFailed {
    pub direction: Direction,
    pub address: String,
    pub name: String,
    #[source]
    pub source: BluetoothError,
}

pub struct ConnectionController {
    host: Arc<dyn BluetoothHost>,
    notifier: Arc<dyn Notifier>,
}

impl ConnectionController {
    pub fn new(host: Arc<dyn BluetoothHost>, notifier: Arc<dyn Notifier>) -> Self {
        Self { host, notifier }
    }

    pub async fn connect(&self, device: &Device) -> Result<Transition, ConnectionFailed> {
        self.transition(device, Direction::Connect).await
    }

    pub async fn disconnect(&self, device: &Device) -> Result<Transition, ConnectionFailed> {
        self.transition(device, Direction::Disconnect).await
    }

    async fn transition(
        &self,
        device: &Device,
        direction: Direction,
    ) -> Result<Transition, ConnectionFailed> {
        let want_connected = direction == Direction::Connect;

        let result = match self.host.is_connected(&device.address).await {
            Ok(connected) if connected == want_connected => {
                tracing::debug!(
                    "{} ({}) already {}ed, nothing to do",
                    device.name,
                    device.address,
                    direction
                );
                return Ok(Transition::AlreadyInState);
            }
            Ok(_) => {
                tracing::info!("Requesting {} for {} ({})", direction, device.name, device.address);
                match direction {
                    Direction::Connect => self.host.open_connection(&device.address).await,
                    Direction::Disconnect => self.host.close_connection(&device.address).await,
                }
            }
            Err(e) => Err(e),
        };

        match result {
            Ok(()) => {
                let body = match direction {
                    Direction::Connect => format!("Connected to {}", device.name),
                    Direction::Disconnect => format!("Disconnected from {}", device.name),
                };
                self.notifier.notify(Notification::new(body));
                Ok(Transition::Changed)
            }
            Err(source) => {
                let failure = ConnectionFailed {
                    direction,
                    address: device.address.clone(),
                    name: device.name.clone(),
                    source,
                };
                tracing::warn!("{}", failure);

                let body = match direction {
                    Direction::Connect => format!("Failed to connect to {}", device.name),
                    Direction::Disconnect => format!("Failed to disconnect from {}", device.name),
                };
                self.notifier.notify(Notification::new(body));
                Err(failure)
            }
        }
    }
}
