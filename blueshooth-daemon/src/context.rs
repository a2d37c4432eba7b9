/*!
 * Application Context
 * One object wiring host, policy, registry, controller and notifications
 */

use anyhow::{Context, Result};
use std::sync::Arc;
use thiserror::Error;

use crate::bluetooth::{BluetoothError, BluetoothHost, BluezHost, SimulatedHost};
use crate::config::{Backend, DaemonConfig};
use crate::controller::{ConnectionController, ConnectionFailed, Transition};
use crate::device::{Device, DeviceStatus};
use crate::enforcer::{Enforcer, EnforcerHandle, EnforcerSettings};
use crate::notify::{DesktopNotifier, LogNotifier, Notification, NotificationLog, Notifier};
use crate::policy::{AutoConnectPolicy, PolicyError};
use crate::registry::DeviceRegistry;
use crate::storage::{JsonFileStore, KeyValueStore};

#[derive(Debug, Error)]
pub enum AppError {
    #[error("no paired device with address {0}")]
    UnknownDevice(String),

    #[error(transparent)]
    Bluetooth(#[from] BluetoothError),

    #[error(transparent)]
    Connection(#[from] ConnectionFailed),

    #[error(transparent)]
    Policy(#[from] PolicyError),
}

pub struct App {
    host: Arc<dyn BluetoothHost>,
    registry: Arc<DeviceRegistry>,
    policy: Arc<AutoConnectPolicy>,
    controller: ConnectionController,
    notifications: Arc<NotificationLog>,
    enforcer_settings: EnforcerSettings,
    disconnect_on_block: bool,
}

impl App {
    /// Build everything the daemon needs from its configuration.
    pub async fn from_config(config: &DaemonConfig) -> Result<Self> {
        let host: Arc<dyn BluetoothHost> = match config.bluetooth.backend {
            Backend::Bluez => Arc::new(
                BluezHost::new(
                    config.bluetooth.adapter.clone(),
                    config.bluetooth.call_timeout(),
                )
                .await
                .context("Failed to reach BlueZ on the system bus")?,
            ),
            Backend::Simulated => {
                tracing::warn!("Using the simulated Bluetooth backend");
                let host = SimulatedHost::new();
                for device in &config.bluetooth.simulated_devices {
                    host.add_device(&device.address, &device.name);
                }
                Arc::new(host)
            }
        };

        let sink: Arc<dyn Notifier> = if config.notifications.desktop {
            match DesktopNotifier::connect() {
                Ok(desktop) => Arc::new(desktop),
                Err(e) => {
                    tracing::warn!("Desktop notifications unavailable, logging instead: {}", e);
                    Arc::new(LogNotifier)
                }
            }
        } else {
            Arc::new(LogNotifier)
        };
        let notifications = Arc::new(NotificationLog::new(
            Some(sink),
            config.notifications.history,
        ));

        tracing::info!("Auto-connect policy stored at {}", config.state_path.display());
        let store: Arc<dyn KeyValueStore> = Arc::new(JsonFileStore::new(&config.state_path));

        let mut app = Self::new(host, store, notifications, config.enforcer.settings());
        app.disconnect_on_block = config.enforcer.disconnect_on_block;
        Ok(app)
    }

    pub fn new(
        host: Arc<dyn BluetoothHost>,
        store: Arc<dyn KeyValueStore>,
        notifications: Arc<NotificationLog>,
        enforcer_settings: EnforcerSettings,
    ) -> Self {
        let notifier: Arc<dyn Notifier> = notifications.clone();
        Self {
            registry: Arc::new(DeviceRegistry::new(host.clone())),
            policy: Arc::new(AutoConnectPolicy::load(store)),
            controller: ConnectionController::new(host.clone(), notifier),
            host,
            notifications,
            enforcer_settings,
            disconnect_on_block: true,
        }
    }

    pub fn set_disconnect_on_block(&mut self, enabled: bool) {
        self.disconnect_on_block = enabled;
    }

    pub fn policy(&self) -> &AutoConnectPolicy {
        &self.policy
    }

    /// Subscribe the enforcer to connection events. The caller owns the
    /// returned handle and shuts it down on exit.
    pub async fn start_enforcer(&self) -> Result<EnforcerHandle, BluetoothError> {
        Enforcer::new(
            self.host.clone(),
            self.registry.clone(),
            self.policy.clone(),
            self.notifications.clone(),
            self.enforcer_settings,
        )
        .start()
        .await
    }

    /// Paired devices with their live connection and policy state.
    pub async fn devices(&self) -> Result<Vec<DeviceStatus>, AppError> {
        let devices = self.registry.list_paired_devices().await?;
        let mut statuses = Vec::with_capacity(devices.len());

        for device in devices {
            let connected = match self.host.is_connected(&device.address).await {
                Ok(connected) => connected,
                Err(e) => {
                    tracing::debug!("State query for {} failed: {}", device.address, e);
                    false
                }
            };
            let blocked = self.policy.is_blocked(&device.address).await;
            statuses.push(DeviceStatus {
                address: device.address,
                name: device.name,
                connected,
                blocked,
            });
        }

        Ok(statuses)
    }

    pub async fn connect(&self, address: &str) -> Result<(Device, Transition), AppError> {
        let device = self.resolve(address).await?;
        let transition = self.controller.connect(&device).await?;
        Ok((device, transition))
    }

    pub async fn disconnect(&self, address: &str) -> Result<(Device, Transition), AppError> {
        let device = self.resolve(address).await?;
        let transition = self.controller.disconnect(&device).await?;
        Ok((device, transition))
    }

    /// Returns the canonical address and the resulting blocked state.
    ///
    /// A connected device is disconnected when it becomes blocked, even if
    /// the new policy could not be saved.
    pub async fn set_blocked(
        &self,
        address: &str,
        blocked: bool,
    ) -> Result<(String, bool), AppError> {
        let device = match self.resolve(address).await {
            Err(AppError::UnknownDevice(_)) if !blocked => return self.forget(address).await,
            other => other?,
        };
        let saved = self.policy.set_blocked(&device.address, blocked).await;
        if blocked {
            self.drop_blocked_connection(&device).await;
        }
        saved?;
        Ok((device.address, blocked))
    }

    pub async fn toggle_block(&self, address: &str) -> Result<(String, bool), AppError> {
        let device = match self.resolve(address).await {
            Err(AppError::UnknownDevice(_)) => return self.forget(address).await,
            other => other?,
        };
        let saved = self.policy.toggle(&device.address).await;
        let blocked = match &saved {
            Ok(blocked) => *blocked,
            Err(_) => self.policy.is_blocked(&device.address).await,
        };
        if blocked {
            self.drop_blocked_connection(&device).await;
        }
        saved?;
        Ok((device.address, blocked))
    }

    pub fn notifications(&self) -> Vec<Notification> {
        self.notifications.history()
    }

    async fn resolve(&self, address: &str) -> Result<Device, AppError> {
        self.registry
            .find(address)
            .await?
            .ok_or_else(|| AppError::UnknownDevice(address.to_string()))
    }

    // Addresses of devices no longer paired can only leave the blocked set
    async fn forget(&self, address: &str) -> Result<(String, bool), AppError> {
        let stale = self
            .policy
            .blocked()
            .await
            .into_iter()
            .find(|blocked| blocked.eq_ignore_ascii_case(address))
            .ok_or_else(|| AppError::UnknownDevice(address.to_string()))?;

        tracing::info!("Unblocking {}, which is no longer paired", stale);
        self.policy.set_blocked(&stale, false).await?;
        Ok((stale, false))
    }

    // Blocking a device that is connected right now also ends that connection
    async fn drop_blocked_connection(&self, device: &Device) {
        if !self.disconnect_on_block {
            return;
        }
        match self.host.is_connected(&device.address).await {
            Ok(true) => {
                tracing::info!("Disconnecting {} after blocking auto-connect", device.address);
                if let Err(e) = self.host.close_connection(&device.address).await {
                    tracing::warn!("Could not disconnect newly blocked {}: {}", device.address, e);
                }
            }
            Ok(false) => {}
            Err(e) => tracing::debug!("State query for {} failed: {}", device.address, e),
        }
    }
}
