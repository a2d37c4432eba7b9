/*!
 * Paired Device Value
 * Address-keyed identity, no live OS handle attached
 */

use serde::{Deserialize, Serialize};
use std::hash::{Hash, Hasher};

/// A paired Bluetooth device as seen on the last registry refresh.
///
/// Equality and hashing only look at `address`; two snapshots of the same
/// device with different names are the same device.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Device {
    pub address: String,
    pub name: String,
}

impl Device {
    pub fn new(address: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            address: address.into(),
            name: name.into(),
        }
    }
}

impl PartialEq for Device {
    fn eq(&self, other: &Self) -> bool {
        self.address == other.address
    }
}

impl Eq for Device {}

impl Hash for Device {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.address.hash(state);
    }
}

/// Device plus its live state, as handed to the presentation layer.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DeviceStatus {
    pub address: String,
    pub name: String,
    pub connected: bool,
    pub blocked: bool,
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn identity_ignores_name() {
        let a = Device::new("AA:BB:CC:DD:EE:FF", "Headphones");
        let b = Device::new("AA:BB:CC:DD:EE:FF", "Renamed Headphones");
        assert_eq!(a, b);

        let mut set = HashSet::new();
        set.insert(a);
        assert!(!set.insert(b));
    }

    #[test]
    fn different_addresses_differ() {
        let a = Device::new("AA:BB:CC:DD:EE:FF", "Keyboard");
        let b = Device::new("11:22:33:44:55:66", "Keyboard");
        assert_ne!(a, b);
    }
}
