/*!
 * Auto-Connect Enforcer
 * Forces blocked devices back off whenever the OS reports them connected
 */

use std::sync::Arc;
use std::time::Duration;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;

use crate::bluetooth::{BluetoothError, BluetoothHost, ConnectionEvent};
use crate::notify::{Notification, Notifier};
use crate::policy::AutoConnectPolicy;
use crate::registry::DeviceRegistry;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EnforcerSettings {
    /// Wait after the connect event before the first close attempt. The
    /// stack may not accept a close until the link has settled.
    pub settle_delay: Duration,
    pub max_attempts: u32,
    pub retry_backoff: Duration,
}

impl Default for EnforcerSettings {
    fn default() -> Self {
        Self {
            settle_delay: Duration::from_millis(500),
            max_attempts: 3,
            retry_backoff: Duration::from_millis(500),
        }
    }
}

pub struct Enforcer {
    host: Arc<dyn BluetoothHost>,
    registry: Arc<DeviceRegistry>,
    policy: Arc<AutoConnectPolicy>,
    notifier: Arc<dyn Notifier>,
    settings: EnforcerSettings,
}

/// Owned by whoever started the enforcer. Dropping it also stops the event
/// loop, just without waiting for it to finish.
pub struct EnforcerHandle {
    stop: Option<oneshot::Sender<()>>,
    task: JoinHandle<()>,
}

impl EnforcerHandle {
    /// Stop handling events and release the OS subscription. Disconnects
    /// already scheduled are left running as detached tasks; they finish only
    /// if the runtime outlives their settle delay, and are dropped with it
    /// when the daemon exits.
    pub async fn shutdown(mut self) {
        if let Some(stop) = self.stop.take() {
            let _ = stop.send(());
        }
        if let Err(e) = self.task.await {
            tracing::error!("Enforcer task ended abnormally: {}", e);
        }
        tracing::info!("Auto-connect enforcer stopped");
    }
}

impl Enforcer {
    pub fn new(
        host: Arc<dyn BluetoothHost>,
        registry: Arc<DeviceRegistry>,
        policy: Arc<AutoConnectPolicy>,
        notifier: Arc<dyn Notifier>,
        settings: EnforcerSettings,
    ) -> Self {
        Self {
            host,
            registry,
            policy,
            notifier,
            settings,
        }
    }

    /// Subscribe to connection events and start enforcing.
    pub async fn start(self) -> Result<EnforcerHandle, BluetoothError> {
        let mut events = self.host.watch_connections().await?;
        let (stop_tx, mut stop_rx) = oneshot::channel();
        let enforcer = Arc::new(self);

        let task = tokio::spawn(async move {
            tracing::info!("Auto-connect enforcer running");
            loop {
                tokio::select! {
                    // Fires on shutdown() and when the handle is dropped
                    _ = &mut stop_rx => break,
                    event = events.recv() => match event {
                        Some(event) => enforcer.handle(event).await,
                        None => {
                            tracing::warn!("Bluetooth host closed the connection event stream");
                            break;
                        }
                    },
                }
            }
            // `events` drops here, which unsubscribes
        });

        Ok(EnforcerHandle {
            stop: Some(stop_tx),
            task,
        })
    }

    async fn handle(self: &Arc<Self>, event: ConnectionEvent) {
        if !self.policy.is_blocked(&event.address).await {
            tracing::debug!("{} connected, auto-connect allowed", event.address);
            return;
        }

        tracing::info!(
            "{} connected but auto-connect is blocked, disconnecting in {:?}",
            event.address,
            self.settings.settle_delay
        );

        // Not cancelled by later user actions; the close goes out regardless
        let enforcer = Arc::clone(self);
        tokio::spawn(async move {
            tokio::time::sleep(enforcer.settings.settle_delay).await;
            enforcer.force_disconnect(&event.address).await;
        });
    }

    async fn force_disconnect(&self, address: &str) {
        let attempts = self.settings.max_attempts.max(1);

        for attempt in 1..=attempts {
            match self.host.close_connection(address).await {
                Ok(()) => {
                    let name = self.device_name(address).await;
                    tracing::info!("Blocked auto-connect for {} ({})", name, address);
                    self.notifier
                        .notify(Notification::new(format!("Blocked auto-connect for {}", name)));
                    return;
                }
                Err(e) if attempt < attempts => {
                    tracing::warn!(
                        "Disconnect attempt {}/{} for {} failed: {}, retrying in {:?}",
                        attempt,
                        attempts,
                        address,
                        e,
                        self.settings.retry_backoff
                    );
                    tokio::time::sleep(self.settings.retry_backoff).await;
                }
                Err(e) => {
                    tracing::error!(
                        "Giving up on blocking {} after {} attempts: {}",
                        address,
                        attempts,
                        e
                    );
                }
            }
        }
    }

    async fn device_name(&self, address: &str) -> String {
        match self.registry.find(address).await {
            Ok(Some(device)) => device.name,
            Ok(None) => "device".to_string(),
            Err(e) => {
                tracing::debug!("Name lookup for {} failed: {}", address, e);
                "device".to_string()
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bluetooth::SimulatedHost;
    use crate::notify::NotificationLog;
    use crate::storage::MemoryStore;

    const ADDR: &str = "AA:BB:CC:DD:EE:FF";

    struct Fixture {
        host: Arc<SimulatedHost>,
        policy: Arc<AutoConnectPolicy>,
        log: Arc<NotificationLog>,
    }

    fn fixture() -> Fixture {
        let host = Arc::new(SimulatedHost::new());
        host.add_device(ADDR, "Headphones");
        Fixture {
            host,
            policy: Arc::new(AutoConnectPolicy::load(Arc::new(MemoryStore::new()))),
            log: Arc::new(NotificationLog::new(None, 16)),
        }
    }

    async fn start(f: &Fixture, settings: EnforcerSettings) -> EnforcerHandle {
        let registry = Arc::new(DeviceRegistry::new(f.host.clone()));
        Enforcer::new(
            f.host.clone(),
            registry,
            f.policy.clone(),
            f.log.clone(),
            settings,
        )
        .start()
        .await
        .unwrap()
    }

    #[tokio::test(start_paused = true)]
    async fn close_waits_for_settle_delay() {
        let f = fixture();
        f.policy.set_blocked(ADDR, true).await.unwrap();
        let handle = start(&f, EnforcerSettings::default()).await;

        f.host.fire_connected(ADDR);
        tokio::time::sleep(Duration::from_millis(400)).await;
        assert_eq!(f.host.close_calls(ADDR), 0);

        tokio::time::sleep(Duration::from_millis(200)).await;
        assert_eq!(f.host.close_calls(ADDR), 1);

        handle.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn retries_until_close_succeeds() {
        let f = fixture();
        f.policy.set_blocked(ADDR, true).await.unwrap();
        f.host.fail_next_closes(ADDR, 2);
        let handle = start(&f, EnforcerSettings::default()).await;

        f.host.fire_connected(ADDR);
        tokio::time::sleep(Duration::from_secs(3)).await;

        assert_eq!(f.host.close_calls(ADDR), 3);
        assert!(!f.host.connected(ADDR));
        assert_eq!(f.log.history().len(), 1);

        handle.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn gives_up_after_max_attempts_without_notifying() {
        let f = fixture();
        f.policy.set_blocked(ADDR, true).await.unwrap();
        f.host.fail_next_closes(ADDR, 10);
        let handle = start(&f, EnforcerSettings::default()).await;

        f.host.fire_connected(ADDR);
        tokio::time::sleep(Duration::from_secs(10)).await;

        assert_eq!(f.host.close_calls(ADDR), 3);
        assert!(f.host.connected(ADDR));
        assert!(f.log.history().is_empty());

        handle.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn unknown_device_is_named_generically() {
        let f = fixture();
        f.host.add_record(crate::bluetooth::PairedDevice {
            address: Some("11:22:33:44:55:66".to_string()),
            name: None,
        });
        f.policy.set_blocked("11:22:33:44:55:66", true).await.unwrap();
        let handle = start(&f, EnforcerSettings::default()).await;

        f.host.fire_connected("11:22:33:44:55:66");
        tokio::time::sleep(Duration::from_secs(1)).await;

        let history = f.log.history();
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].body, "Blocked auto-connect for device");

        handle.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn shutdown_releases_subscription() {
        let f = fixture();
        f.policy.set_blocked(ADDR, true).await.unwrap();
        let handle = start(&f, EnforcerSettings::default()).await;
        assert_eq!(f.host.subscriber_count(), 1);

        handle.shutdown().await;
        assert_eq!(f.host.subscriber_count(), 0);

        f.host.fire_connected(ADDR);
        tokio::time::sleep(Duration::from_secs(1)).await;
        assert_eq!(f.host.close_calls(ADDR), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn scheduled_close_outlives_shutdown_while_runtime_runs() {
        let f = fixture();
        f.policy.set_blocked(ADDR, true).await.unwrap();
        let handle = start(&f, EnforcerSettings::default()).await;

        f.host.fire_connected(ADDR);
        tokio::time::sleep(Duration::from_millis(100)).await;
        handle.shutdown().await;
        assert_eq!(f.host.close_calls(ADDR), 0);

        tokio::time::sleep(Duration::from_secs(1)).await;
        assert_eq!(f.host.close_calls(ADDR), 1);
        assert!(!f.host.connected(ADDR));
    }
}
