/*!
 * BlueZ Bluetooth Host
 * Paired devices, connect/disconnect and connection events via org.bluez on D-Bus
 */

use async_trait::async_trait;
use dbus::arg::{prop_cast, PropMap};
use dbus::channel::Token;
use dbus::message::MatchRule;
use dbus::nonblock::stdintf::org_freedesktop_dbus::{ObjectManager, Properties};
use dbus::nonblock::{MsgMatch, Proxy, SyncConnection};
use dbus::{Message, Path};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;

use super::{BluetoothError, BluetoothHost, ConnectionEvent, ConnectionEvents, PairedDevice};

const BLUEZ_SERVICE: &str = "org.bluez";
const DEVICE_INTERFACE: &str = "org.bluez.Device1";

type ManagedObjects = HashMap<Path<'static>, HashMap<String, PropMap>>;

pub struct BluezHost {
    conn: Arc<SyncConnection>,
    adapter: Option<String>,
    timeout: Duration,
}

impl BluezHost {
    /// Connect to the system bus. `adapter` limits the host to one
    /// controller, e.g. `hci0`.
    pub async fn new(adapter: Option<String>, timeout: Duration) -> Result<Self, BluetoothError> {
        let (resource, conn) = dbus_tokio::connection::new_system_sync().map_err(bus_error)?;

        // The resource future drives the connection; it only returns on loss
        tokio::spawn(async move {
            let err = resource.await;
            tracing::error!("Lost connection to system D-Bus: {}", err);
        });

        tracing::info!(
            "Connected to BlueZ on the system bus (adapter: {})",
            adapter.as_deref().unwrap_or("any")
        );

        Ok(Self {
            conn,
            adapter,
            timeout,
        })
    }

    fn proxy<'a>(&'a self, path: Path<'a>) -> Proxy<'a, Arc<SyncConnection>> {
        Proxy::new(BLUEZ_SERVICE, path, self.timeout, self.conn.clone())
    }

    fn on_adapter(&self, path: &Path<'_>) -> bool {
        match &self.adapter {
            Some(adapter) => path.starts_with(&format!("/org/bluez/{}/", adapter)),
            None => true,
        }
    }

    async fn managed_objects(&self) -> Result<ManagedObjects, BluetoothError> {
        self.proxy(Path::from("/"))
            .get_managed_objects()
            .await
            .map_err(bus_error)
    }

    /// Object path of the device with `address`, looked up fresh each call.
    async fn device_path(&self, address: &str) -> Result<Path<'static>, BluetoothError> {
        let objects = self.managed_objects().await?;

        objects
            .into_iter()
            .filter(|(path, _)| self.on_adapter(path))
            .find_map(|(path, interfaces)| {
                let props = interfaces.get(DEVICE_INTERFACE)?;
                let found: &String = prop_cast(props, "Address")?;
                found.eq_ignore_ascii_case(address).then_some(path)
            })
            .ok_or_else(|| BluetoothError::DeviceUnavailable(address.to_string()))
    }

    async fn device_call(&self, address: &str, method: &str) -> Result<(), BluetoothError> {
        let path = self.device_path(address).await?;
        tracing::debug!("Calling {}.{} on {}", DEVICE_INTERFACE, method, path);

        let reply: Result<(), dbus::Error> = self
            .proxy(path)
            .method_call(DEVICE_INTERFACE, method, ())
            .await;

        reply.map_err(|e| BluetoothError::Rejected {
            address: address.to_string(),
            reason: e.message().unwrap_or("no reason given").to_string(),
        })
    }
}

/// Keeps the signal match alive and removes it from the bus on drop.
struct SignalRegistration {
    conn: Arc<SyncConnection>,
    token: Token,
    _msg_match: MsgMatch,
}

impl Drop for SignalRegistration {
    fn drop(&mut self) {
        let conn = self.conn.clone();
        let token = self.token;
        if let Ok(handle) = tokio::runtime::Handle::try_current() {
            handle.spawn(async move {
                if let Err(e) = conn.remove_match(token).await {
                    tracing::warn!("Failed to remove BlueZ signal match: {}", e);
                }
            });
        }
    }
}

#[async_trait]
impl BluetoothHost for BluezHost {
    async fn paired_devices(&self) -> Result<Vec<PairedDevice>, BluetoothError> {
        let objects = self.managed_objects().await?;

        let devices = objects
            .iter()
            .filter(|(path, _)| self.on_adapter(path))
            .filter_map(|(_, interfaces)| interfaces.get(DEVICE_INTERFACE))
            .filter(|props| prop_cast::<bool>(props, "Paired").copied().unwrap_or(false))
            .map(|props| PairedDevice {
                address: prop_cast::<String>(props, "Address").cloned(),
                // Alias falls back to Name inside BlueZ, prefer it when present
                name: prop_cast::<String>(props, "Alias")
                    .or_else(|| prop_cast::<String>(props, "Name"))
                    .cloned(),
            })
            .collect();

        Ok(devices)
    }

    async fn is_connected(&self, address: &str) -> Result<bool, BluetoothError> {
        let path = self.device_path(address).await?;
        self.proxy(path)
            .get::<bool>(DEVICE_INTERFACE, "Connected")
            .await
            .map_err(bus_error)
    }

    async fn open_connection(&self, address: &str) -> Result<(), BluetoothError> {
        self.device_call(address, "Connect").await
    }

    async fn close_connection(&self, address: &str) -> Result<(), BluetoothError> {
        self.device_call(address, "Disconnect").await
    }

    async fn watch_connections(&self) -> Result<ConnectionEvents, BluetoothError> {
        let rule = MatchRule::new_signal("org.freedesktop.DBus.Properties", "PropertiesChanged")
            .with_sender(BLUEZ_SERVICE);

        let (tx, rx) = mpsc::unbounded_channel();
        let adapter = self.adapter.clone();

        let msg_match = self
            .conn
            .add_match(rule)
            .await
            .map_err(bus_error)?
            .cb(
                move |msg: Message, (interface, changed, _): (String, PropMap, Vec<String>)| {
                    if interface != DEVICE_INTERFACE {
                        return true;
                    }
                    if !prop_cast::<bool>(&changed, "Connected").copied().unwrap_or(false) {
                        return true;
                    }
                    let Some(path) = msg.path() else {
                        return true;
                    };
                    if let Some(adapter) = &adapter {
                        if !path.starts_with(&format!("/org/bluez/{}/", adapter)) {
                            return true;
                        }
                    }
                    match address_from_path(&path) {
                        Some(address) => tx.send(ConnectionEvent { address }).is_ok(),
                        None => true,
                    }
                },
            );

        tracing::debug!("Subscribed to BlueZ connection events");

        let registration = SignalRegistration {
            conn: self.conn.clone(),
            token: msg_match.token(),
            _msg_match: msg_match,
        };
        Ok(ConnectionEvents::new(rx, registration))
    }
}

fn bus_error(e: dbus::Error) -> BluetoothError {
    BluetoothError::Bus(e.message().unwrap_or("unknown D-Bus error").to_string())
}

/// `/org/bluez/hci0/dev_AA_BB_CC_DD_EE_FF` -> `AA:BB:CC:DD:EE:FF`
fn address_from_path(path: &str) -> Option<String> {
    let last = path.rsplit('/').next()?;
    let raw = last.strip_prefix("dev_")?;
    let octets: Vec<&str> = raw.split('_').collect();

    let well_formed = octets.len() == 6
        && octets
            .iter()
            .all(|o| o.len() == 2 && o.chars().all(|c| c.is_ascii_hexdigit()));

    well_formed.then(|| octets.join(":"))
}
