/*!
 * Device Registry
 * Fresh paired-device snapshots from the Bluetooth host
 */

use std::sync::Arc;

use crate::bluetooth::{BluetoothError, BluetoothHost};
use crate::device::Device;

pub struct DeviceRegistry {
    host: Arc<dyn BluetoothHost>,
}

impl DeviceRegistry {
    pub fn new(host: Arc<dyn BluetoothHost>) -> Self {
        Self { host }
    }

    /// Every paired device with both an address and a name, in host order.
    /// Queried on each call; nothing is cached.
    pub async fn list_paired_devices(&self) -> Result<Vec<Device>, BluetoothError> {
        let records = self.host.paired_devices().await?;
        let total = records.len();

        let devices: Vec<Device> = records
            .into_iter()
            .filter_map(|record| {
                let address = record.address.filter(|a| !a.is_empty())?;
                let name = record.name.filter(|n| !n.is_empty())?;
                Some(Device::new(address, name))
            })
            .collect();

        if devices.len() < total {
            tracing::debug!(
                "Skipped {} paired device(s) without address or name",
                total - devices.len()
            );
        }

        Ok(devices)
    }

    /// Look up a single paired device by address.
    pub async fn find(&self, address: &str) -> Result<Option<Device>, BluetoothError> {
        Ok(self
            .list_paired_devices()
            .await?
            .into_iter()
            .find(|d| d.address.eq_ignore_ascii_case(address)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bluetooth::{PairedDevice, SimulatedHost};

    #[tokio::test]
    async fn skips_devices_missing_name_or_address() {
        let host = Arc::new(SimulatedHost::new());
        host.add_device("AA:BB:CC:DD:EE:FF", "Headphones");
        host.add_record(PairedDevice {
            address: Some("11:22:33:44:55:66".to_string()),
            name: None,
        });
        host.add_device("66:55:44:33:22:11", "Keyboard");

        let registry = DeviceRegistry::new(host);
        let devices = registry.list_paired_devices().await.unwrap();

        assert_eq!(devices.len(), 2);
        assert_eq!(devices[0].name, "Headphones");
        assert_eq!(devices[1].name, "Keyboard");
    }

    #[tokio::test]
    async fn empty_strings_count_as_missing() {
        let host = Arc::new(SimulatedHost::new());
        host.add_device("", "Nameless Address");
        host.add_device("AA:BB:CC:DD:EE:FF", "");

        let registry = DeviceRegistry::new(host);
        assert!(registry.list_paired_devices().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn reflects_host_changes_between_calls() {
        let host = Arc::new(SimulatedHost::new());
        let registry = DeviceRegistry::new(host.clone());
        assert!(registry.list_paired_devices().await.unwrap().is_empty());

        host.add_device("AA:BB:CC:DD:EE:FF", "Headphones");
        assert_eq!(registry.list_paired_devices().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn find_matches_address_case_insensitively() {
        let host = Arc::new(SimulatedHost::new());
        host.add_device("AA:BB:CC:DD:EE:FF", "Headphones");
        let registry = DeviceRegistry::new(host);

        let found = registry.find("aa:bb:cc:dd:ee:ff").await.unwrap();
        assert_eq!(found.map(|d| d.name), Some("Headphones".to_string()));
        assert!(registry.find("11:22:33:44:55:66").await.unwrap().is_none());
    }
}
