/*!
 * BlueShooth Daemon Client
 * JSON IPC communication with blueshoothd
 */

use anyhow::{Context, Result};
use chrono::{DateTime, Local};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::UnixStream;

#[derive(Debug, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type")]
pub enum Request {
    Ping,
    ListDevices,
    Connect { address: String },
    Disconnect { address: String },
    SetBlocked { address: String, blocked: bool },
    ToggleBlocked { address: String },
    Notifications,
}

#[derive(Debug, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type")]
pub enum Response {
    Pong { version: String },
    Devices { devices: Vec<DeviceStatus> },
    Success { message: String },
    Blocked { address: String, blocked: bool },
    Notifications { notifications: Vec<Notification> },
    Error { message: String },
}

#[derive(Debug, Serialize, Deserialize, PartialEq)]
pub struct DeviceStatus {
    pub address: String,
    pub name: String,
    pub connected: bool,
    pub blocked: bool,
}

#[derive(Debug, Serialize, Deserialize, PartialEq)]
pub struct Notification {
    pub title: String,
    pub body: String,
    pub timestamp: DateTime<Local>,
}

pub struct BlueShoothClient {
    socket_path: PathBuf,
}

impl BlueShoothClient {
    pub fn new(socket_path: PathBuf) -> Self {
        Self { socket_path }
    }

    pub fn socket_path(&self) -> &Path {
        &self.socket_path
    }

    pub async fn send_request(&self, request: Request) -> Result<Response> {
        let stream = UnixStream::connect(&self.socket_path)
            .await
            .with_context(|| {
                format!(
                    "Cannot reach blueshoothd at {} (is it running?)",
                    self.socket_path.display()
                )
            })?;
        let (reader, mut writer) = stream.into_split();

        let request_json = serde_json::to_string(&request)?;
        writer.write_all(request_json.as_bytes()).await?;
        writer.write_all(b"\n").await?;

        // One request, one response line
        let mut line = String::new();
        BufReader::new(reader).read_line(&mut line).await?;

        let response: Response = serde_json::from_str(line.trim())
            .with_context(|| format!("Unexpected reply from daemon: {}", line.trim()))?;

        Ok(response)
    }
}
