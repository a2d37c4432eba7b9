use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

use crate::enforcer::EnforcerSettings;

#[derive(Debug, Error, PartialEq)]
pub enum ConfigError {
    #[error("enforcer.max_attempts must be at least 1")]
    NoAttempts,

    #[error("notifications.history must be at least 1")]
    NoHistory,
}

#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
#[serde(default)]
pub struct DaemonConfig {
    pub socket_path: PathBuf,
    pub state_path: PathBuf,
    pub bluetooth: BluetoothConfig,
    pub enforcer: EnforcerConfig,
    pub notifications: NotificationConfig,
}

#[derive(Debug, Clone, Copy, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Backend {
    Bluez,
    Simulated,
}

#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
#[serde(default)]
pub struct BluetoothConfig {
    pub backend: Backend,
    pub adapter: Option<String>,
    pub call_timeout_secs: u64,
    pub simulated_devices: Vec<SimulatedDevice>,
}

#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
pub struct SimulatedDevice {
    pub address: String,
    pub name: String,
}

#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
#[serde(default)]
pub struct EnforcerConfig {
    pub settle_delay_ms: u64,
    pub max_attempts: u32,
    pub retry_backoff_ms: u64,
    pub disconnect_on_block: bool,
}

#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
#[serde(default)]
pub struct NotificationConfig {
    pub desktop: bool,
    pub history: usize,
}

impl Default for DaemonConfig {
    fn default() -> Self {
        Self {
            socket_path: default_socket_path(),
            state_path: default_state_path(),
            bluetooth: BluetoothConfig::default(),
            enforcer: EnforcerConfig::default(),
            notifications: NotificationConfig::default(),
        }
    }
}

impl Default for BluetoothConfig {
    fn default() -> Self {
        Self {
            backend: Backend::Bluez,
            adapter: None,
            call_timeout_secs: 10,
            simulated_devices: Vec::new(),
        }
    }
}

impl Default for EnforcerConfig {
    fn default() -> Self {
        let settings = EnforcerSettings::default();
        Self {
            settle_delay_ms: settings.settle_delay.as_millis() as u64,
            max_attempts: settings.max_attempts,
            retry_backoff_ms: settings.retry_backoff.as_millis() as u64,
            disconnect_on_block: true,
        }
    }
}

impl Default for NotificationConfig {
    fn default() -> Self {
        Self {
            desktop: true,
            history: 32,
        }
    }
}

impl EnforcerConfig {
    pub fn settings(&self) -> EnforcerSettings {
        EnforcerSettings {
            settle_delay: Duration::from_millis(self.settle_delay_ms),
            max_attempts: self.max_attempts,
            retry_backoff: Duration::from_millis(self.retry_backoff_ms),
        }
    }
}

impl BluetoothConfig {
    pub fn call_timeout(&self) -> Duration {
        Duration::from_secs(self.call_timeout_secs)
    }
}

impl DaemonConfig {
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let config = match fs::read_to_string(path) {
            Ok(content) => toml::from_str(&content)
                .with_context(|| format!("Invalid config file {}", path.display()))?,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                // Create default config if not found
                let config = Self::default();
                if let Some(parent) = path.parent() {
                    let _ = fs::create_dir_all(parent);
                }
                if let Err(e) = fs::write(path, toml::to_string_pretty(&config)?) {
                    tracing::warn!("Could not write default config to {}: {}", path.display(), e);
                }
                config
            }
            Err(e) => {
                return Err(e)
                    .with_context(|| format!("Cannot read config file {}", path.display()));
            }
        };

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.enforcer.max_attempts == 0 {
            return Err(ConfigError::NoAttempts);
        }
        if self.notifications.history == 0 {
            return Err(ConfigError::NoHistory);
        }
        Ok(())
    }
}

pub fn default_config_path() -> PathBuf {
    dirs::config_dir()
        .unwrap_or_else(|| PathBuf::from("/etc"))
        .join("blueshooth")
        .join("blueshoothd.toml")
}

pub fn default_socket_path() -> PathBuf {
    dirs::runtime_dir()
        .unwrap_or_else(|| PathBuf::from(format!("/run/user/{}", nix::unistd::getuid())))
        .join("blueshooth.sock")
}

pub fn default_state_path() -> PathBuf {
    dirs::state_dir()
        .or_else(|| dirs::home_dir().map(|home| home.join(".local").join("state")))
        .unwrap_or_else(|| PathBuf::from("."))
        .join("blueshooth")
        .join("state.json")
}
