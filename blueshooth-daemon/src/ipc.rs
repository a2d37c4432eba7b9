/*!
 * IPC Server for BlueShooth Daemon
 * JSON-lines protocol over Unix socket
 */

use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::{UnixListener, UnixStream};
use tokio::sync::Notify;

use crate::context::App;
use crate::controller::Transition;
use crate::device::DeviceStatus;
use crate::notify::Notification;

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
    Shutdown,
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

pub struct IpcServer {
    listener: UnixListener,
    app: Arc<App>,
    shutdown: Arc<Notify>,
}

impl IpcServer {
    /// Bind `path`, replacing a stale socket file left by a previous run.
    pub fn bind(path: &Path, app: Arc<App>) -> Result<Self> {
        if path.exists() {
            std::fs::remove_file(path)?;
        }
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let listener = UnixListener::bind(path)?;
        Ok(Self {
            listener,
            app,
            shutdown: Arc::new(Notify::new()),
        })
    }

    /// Serve clients until a `Shutdown` request arrives.
    pub async fn run(self) -> Result<()> {
        tracing::info!("IPC server listening for connections...");

        loop {
            tokio::select! {
                _ = self.shutdown.notified() => {
                    tracing::info!("Shutdown requested over IPC");
                    return Ok(());
                }
                accepted = self.listener.accept() => match accepted {
                    Ok((stream, _)) => {
                        tracing::debug!("New client connected");
                        let app = self.app.clone();
                        let shutdown = self.shutdown.clone();

                        tokio::spawn(async move {
                            if let Err(e) = handle_client(stream, &app, &shutdown).await {
                                tracing::error!("Client error: {}", e);
                            }
                        });
                    }
                    Err(e) => {
                        tracing::error!("Failed to accept connection: {}", e);
                    }
                },
            }
        }
    }
}

async fn handle_client(stream: UnixStream, app: &App, shutdown: &Notify) -> Result<()> {
    let (reader, mut writer) = stream.into_split();
    let mut reader = BufReader::new(reader);
    let mut line = String::new();

    while reader.read_line(&mut line).await? > 0 {
        let request = line.trim();
        if request.is_empty() {
            line.clear();
            continue;
        }
        tracing::debug!("Received request: {}", request);

        let (response, stop) = match serde_json::from_str::<Request>(request) {
            Ok(Request::Shutdown) => (
                Response::Success {
                    message: "Shutting down".to_string(),
                },
                true,
            ),
            Ok(request) => (dispatch(app, request).await, false),
            Err(e) => (
                Response::Error {
                    message: format!("Malformed request: {}", e),
                },
                false,
            ),
        };

        let mut payload = serde_json::to_string(&response)?;
        payload.push('\n');
        writer.write_all(payload.as_bytes()).await?;

        if stop {
            // notify_one stores a permit if the accept loop is not waiting yet
            shutdown.notify_one();
            break;
        }

        line.clear();
    }

    Ok(())
}

pub async fn dispatch(app: &App, request: Request) -> Response {
    let result = match request {
        Request::Ping => Ok(Response::Pong {
            version: env!("CARGO_PKG_VERSION").to_string(),
        }),
        Request::ListDevices => app
            .devices()
            .await
            .map(|devices| Response::Devices { devices }),
        Request::Connect { address } => app.connect(&address).await.map(|(device, t)| {
            Response::Success {
                message: match t {
                    Transition::Changed => format!("Connected to {}", device.name),
                    Transition::AlreadyInState => format!("{} is already connected", device.name),
                },
            }
        }),
        Request::Disconnect { address } => app.disconnect(&address).await.map(|(device, t)| {
            Response::Success {
                message: match t {
                    Transition::Changed => format!("Disconnected from {}", device.name),
                    Transition::AlreadyInState => {
                        format!("{} is already disconnected", device.name)
                    }
                },
            }
        }),
        Request::SetBlocked { address, blocked } => app
            .set_blocked(&address, blocked)
            .await
            .map(|(address, blocked)| Response::Blocked { address, blocked }),
        Request::ToggleBlocked { address } => app
            .toggle_block(&address)
            .await
            .map(|(address, blocked)| Response::Blocked { address, blocked }),
        Request::Notifications => Ok(Response::Notifications {
            notifications: app.notifications(),
        }),
        Request::Shutdown => Ok(Response::Success {
            message: "Shutting down".to_string(),
        }),
    };

    result.unwrap_or_else(|e| Response::Error {
        message: e.to_string(),
    })
}
