/*!
 * User Notifications
 * Fire-and-forget alerts, desktop delivery over the session bus
 */

use chrono::{DateTime, Local};
use dbus::arg::PropMap;
use dbus::nonblock::{Proxy, SyncConnection};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Duration;

pub const APP_NAME: &str = "BlueShooth";

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Notification {
    pub title: String,
    pub body: String,
    pub timestamp: DateTime<Local>,
}

impl Notification {
    pub fn new(body: impl Into<String>) -> Self {
        Self {
            title: APP_NAME.to_string(),
            body: body.into(),
            timestamp: Local::now(),
        }
    }
}

/// Delivery is best effort; callers never learn whether it arrived.
pub trait Notifier: Send + Sync {
    fn notify(&self, notification: Notification);
}

pub struct LogNotifier;

impl Notifier for LogNotifier {
    fn notify(&self, notification: Notification) {
        tracing::info!("[{}] {}", notification.title, notification.body);
    }
}

/// Sends notifications through `org.freedesktop.Notifications`.
pub struct DesktopNotifier {
    conn: Arc<SyncConnection>,
}

impl DesktopNotifier {
    pub fn connect() -> Result<Self, dbus::Error> {
        let (resource, conn) = dbus_tokio::connection::new_session_sync()?;

        tokio::spawn(async move {
            let err = resource.await;
            tracing::warn!("Lost connection to session D-Bus: {}", err);
        });

        Ok(Self { conn })
    }
}

impl Notifier for DesktopNotifier {
    fn notify(&self, notification: Notification) {
        let conn = self.conn.clone();

        tokio::spawn(async move {
            let proxy = Proxy::new(
                "org.freedesktop.Notifications",
                "/org/freedesktop/Notifications",
                Duration::from_secs(5),
                conn,
            );

            let reply: Result<(u32,), dbus::Error> = proxy
                .method_call(
                    "org.freedesktop.Notifications",
                    "Notify",
                    (
                        APP_NAME,
                        0u32,
                        "bluetooth",
                        notification.title.as_str(),
                        notification.body.as_str(),
                        Vec::<String>::new(),
                        PropMap::new(),
                        -1i32,
                    ),
                )
                .await;

            if let Err(e) = reply {
                tracing::warn!("Desktop notification not delivered: {}", e);
            }
        });
    }
}

/// Keeps the most recent notifications and forwards each one to an
/// optional inner notifier.
pub struct NotificationLog {
    inner: Option<Arc<dyn Notifier>>,
    history: Mutex<VecDeque<Notification>>,
    capacity: usize,
}

impl NotificationLog {
    pub fn new(inner: Option<Arc<dyn Notifier>>, capacity: usize) -> Self {
        Self {
            inner,
            history: Mutex::new(VecDeque::with_capacity(capacity)),
            capacity,
        }
    }

    /// Oldest first.
    pub fn history(&self) -> Vec<Notification> {
        let history = self.history.lock().unwrap_or_else(|p| p.into_inner());
        history.iter().cloned().collect()
    }
}

impl Notifier for NotificationLog {
    fn notify(&self, notification: Notification) {
        if self.capacity > 0 {
            let mut history = self.history.lock().unwrap_or_else(|p| p.into_inner());
            while history.len() >= self.capacity {
                history.pop_front();
            }
            history.push_back(notification.clone());
        }

        if let Some(inner) = &self.inner {
            inner.notify(notification);
        }
    }
}
