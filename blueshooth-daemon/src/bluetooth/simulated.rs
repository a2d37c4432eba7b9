/*!
 * Simulated Bluetooth Host
 * In-memory stack with call counters and failure injection
 */

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};
use tokio::sync::mpsc;

use super::{BluetoothError, BluetoothHost, ConnectionEvent, ConnectionEvents, PairedDevice};

#[derive(Debug, Clone)]
struct SimDevice {
    record: PairedDevice,
    connected: bool,
}

#[derive(Default)]
struct SimState {
    devices: Vec<SimDevice>,
    open_calls: HashMap<String, usize>,
    close_calls: HashMap<String, usize>,
    // Remaining failures to inject per address
    failing_opens: HashMap<String, usize>,
    failing_closes: HashMap<String, usize>,
    subscribers: Vec<mpsc::UnboundedSender<ConnectionEvent>>,
}

/// Host used when no real Bluetooth stack is available, and by the tests.
#[derive(Default)]
pub struct SimulatedHost {
    state: Mutex<SimState>,
}

impl SimulatedHost {
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> MutexGuard<'_, SimState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Pair a well-formed device.
    pub fn add_device(&self, address: &str, name: &str) {
        self.add_record(PairedDevice {
            address: Some(address.to_string()),
            name: Some(name.to_string()),
        });
    }

    /// Pair a raw record, which may be missing its address or name.
    pub fn add_record(&self, record: PairedDevice) {
        self.state().devices.push(SimDevice {
            record,
            connected: false,
        });
    }

    pub fn set_connected(&self, address: &str, connected: bool) {
        let mut state = self.state();
        if let Some(device) = find_mut(&mut state.devices, address) {
            device.connected = connected;
        }
    }

    pub fn connected(&self, address: &str) -> bool {
        let mut state = self.state();
        find_mut(&mut state.devices, address)
            .map(|d| d.connected)
            .unwrap_or(false)
    }

    /// Simulate the device connecting on its own and notify subscribers.
    pub fn fire_connected(&self, address: &str) {
        let mut state = self.state();
        if let Some(device) = find_mut(&mut state.devices, address) {
            device.connected = true;
        }

        let event = ConnectionEvent {
            address: address.to_string(),
        };
        state
            .subscribers
            .retain(|tx| tx.send(event.clone()).is_ok());
    }

    pub fn fail_next_opens(&self, address: &str, count: usize) {
        self.state().failing_opens.insert(address.to_string(), count);
    }

    pub fn fail_next_closes(&self, address: &str, count: usize) {
        self.state().failing_closes.insert(address.to_string(), count);
    }

    pub fn open_calls(&self, address: &str) -> usize {
        self.state().open_calls.get(address).copied().unwrap_or(0)
    }

    pub fn close_calls(&self, address: &str) -> usize {
        self.state().close_calls.get(address).copied().unwrap_or(0)
    }

    /// Number of live subscriptions.
    pub fn subscriber_count(&self) -> usize {
        let mut state = self.state();
        state.subscribers.retain(|tx| !tx.is_closed());
        state.subscribers.len()
    }
}

fn find_mut<'a>(devices: &'a mut [SimDevice], address: &str) -> Option<&'a mut SimDevice> {
    devices
        .iter_mut()
        .find(|d| d.record.address.as_deref() == Some(address))
}

fn take_failure(failures: &mut HashMap<String, usize>, address: &str) -> bool {
    match failures.get_mut(address) {
        Some(remaining) if *remaining > 0 => {
            *remaining -= 1;
            true
        }
        _ => false,
    }
}

#[async_trait]
impl BluetoothHost for SimulatedHost {
    async fn paired_devices(&self) -> Result<Vec<PairedDevice>, BluetoothError> {
        Ok(self.state().devices.iter().map(|d| d.record.clone()).collect())
    }

    async fn is_connected(&self, address: &str) -> Result<bool, BluetoothError> {
        let mut state = self.state();
        find_mut(&mut state.devices, address)
            .map(|d| d.connected)
            .ok_or_else(|| BluetoothError::DeviceUnavailable(address.to_string()))
    }

    async fn open_connection(&self, address: &str) -> Result<(), BluetoothError> {
        let mut state = self.state();
        *state.open_calls.entry(address.to_string()).or_default() += 1;

        if take_failure(&mut state.failing_opens, address) {
            return Err(BluetoothError::Rejected {
                address: address.to_string(),
                reason: "simulated open failure".to_string(),
            });
        }

        let device = find_mut(&mut state.devices, address)
            .ok_or_else(|| BluetoothError::DeviceUnavailable(address.to_string()))?;
        device.connected = true;
        Ok(())
    }

    async fn close_connection(&self, address: &str) -> Result<(), BluetoothError> {
        let mut state = self.state();
        *state.close_calls.entry(address.to_string()).or_default() += 1;

        if take_failure(&mut state.failing_closes, address) {
            return Err(BluetoothError::Rejected {
                address: address.to_string(),
                reason: "simulated close failure".to_string(),
            });
        }

        let device = find_mut(&mut state.devices, address)
            .ok_or_else(|| BluetoothError::DeviceUnavailable(address.to_string()))?;
        device.connected = false;
        Ok(())
    }

    async fn watch_connections(&self) -> Result<ConnectionEvents, BluetoothError> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.state().subscribers.push(tx);
        // Dropping the receiver closes the channel, which is all the
        // unregistering the simulated stack needs.
        Ok(ConnectionEvents::new(rx, ()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const ADDR: &str = "AA:BB:CC:DD:EE:FF";

    #[tokio::test]
    async fn open_and_close_track_state_and_calls() {
        let host = SimulatedHost::new();
        host.add_device(ADDR, "Headphones");

        host.open_connection(ADDR).await.unwrap();
        assert!(host.is_connected(ADDR).await.unwrap());
        host.close_connection(ADDR).await.unwrap();
        assert!(!host.is_connected(ADDR).await.unwrap());

        assert_eq!(host.open_calls(ADDR), 1);
        assert_eq!(host.close_calls(ADDR), 1);
    }

    #[tokio::test]
    async fn injected_failures_run_out() {
        let host = SimulatedHost::new();
        host.add_device(ADDR, "Headphones");
        host.set_connected(ADDR, true);
        host.fail_next_closes(ADDR, 1);

        assert!(host.close_connection(ADDR).await.is_err());
        assert!(host.connected(ADDR));
        assert!(host.close_connection(ADDR).await.is_ok());
        assert!(!host.connected(ADDR));
    }

    #[tokio::test]
    async fn unknown_device_is_unavailable() {
        let host = SimulatedHost::new();
        assert!(matches!(
            host.is_connected(ADDR).await,
            Err(BluetoothError::DeviceUnavailable(_))
        ));
    }

    #[tokio::test]
    async fn dropped_subscription_is_pruned() {
        let host = SimulatedHost::new();
        host.add_device(ADDR, "Headphones");

        let mut events = host.watch_connections().await.unwrap();
        assert_eq!(host.subscriber_count(), 1);

        host.fire_connected(ADDR);
        assert_eq!(
            events.recv().await,
            Some(ConnectionEvent {
                address: ADDR.to_string()
            })
        );

        drop(events);
        assert_eq!(host.subscriber_count(), 0);
    }
}
