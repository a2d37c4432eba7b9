/*!
 * Auto-Connect Policy
 * Persistent set of device addresses that must never auto-reconnect
 */

use std::collections::BTreeSet;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::RwLock;
use tokio::task::JoinError;

use crate::storage::{KeyValueStore, StorageError};

/// Storage key holding the blocked address set.
pub const BLOCKED_KEY: &str = "blocked_auto_connect";

#[derive(Debug, Error)]
pub enum PolicyError {
    #[error("policy storage unavailable: {0}")]
    PersistenceUnavailable(#[from] StorageError),

    #[error("policy save did not complete: {0}")]
    SaveAborted(#[from] JoinError),
}

pub struct AutoConnectPolicy {
    store: Arc<dyn KeyValueStore>,
    blocked: RwLock<BTreeSet<String>>,
}

impl AutoConnectPolicy {
    /// Read the persisted set once. Unreadable state counts as empty.
    pub fn load(store: Arc<dyn KeyValueStore>) -> Self {
        let blocked = match store.get_set(BLOCKED_KEY) {
            Ok(Some(set)) => set,
            Ok(None) => BTreeSet::new(),
            Err(e) => {
                tracing::warn!("Could not load auto-connect policy, starting empty: {}", e);
                BTreeSet::new()
            }
        };

        tracing::info!("Loaded {} blocked device(s)", blocked.len());

        Self {
            store,
            blocked: RwLock::new(blocked),
        }
    }

    pub async fn is_blocked(&self, address: &str) -> bool {
        self.blocked.read().await.contains(address)
    }

    /// Sorted snapshot of every blocked address.
    pub async fn blocked(&self) -> Vec<String> {
        self.blocked.read().await.iter().cloned().collect()
    }

    /// Insert or remove `address` and persist the full set.
    ///
    /// Returns whether membership changed. The in-memory set is updated even
    /// when persisting fails; the error tells the caller the change will not
    /// survive a restart.
    pub async fn set_blocked(&self, address: &str, blocked: bool) -> Result<bool, PolicyError> {
        // Hold the write lock through the save so saves land in mutation order
        let mut set = self.blocked.write().await;
        self.apply(&mut set, address, blocked).await
    }

    /// Flip the blocked state of `address`, returning the new state.
    pub async fn toggle(&self, address: &str) -> Result<bool, PolicyError> {
        let mut set = self.blocked.write().await;
        let blocked = !set.contains(address);
        self.apply(&mut set, address, blocked).await?;
        Ok(blocked)
    }

    async fn apply(
        &self,
        set: &mut BTreeSet<String>,
        address: &str,
        blocked: bool,
    ) -> Result<bool, PolicyError> {
        let changed = if blocked {
            set.insert(address.to_string())
        } else {
            set.remove(address)
        };

        tracing::info!(
            "Auto-connect for {} {}",
            address,
            if blocked { "blocked" } else { "allowed" }
        );

        // Disk I/O stays off the runtime workers; the write lock is held until it lands
        let store = self.store.clone();
        let snapshot = set.clone();
        let saved = tokio::task::spawn_blocking(move || store.put_set(BLOCKED_KEY, &snapshot))
            .await
            .map_err(PolicyError::from)
            .and_then(|result| result.map_err(PolicyError::from));

        if let Err(e) = saved {
            tracing::warn!("Failed to persist auto-connect policy: {}", e);
            return Err(e);
        }

        Ok(changed)
    }
}
