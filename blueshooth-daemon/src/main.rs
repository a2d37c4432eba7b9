/*!
 * BlueShooth Daemon
 * Bluetooth auto-connect guard without the status-bar bloat
 * Onyx Digital Intelligence Development LLC
 */

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::UnixStream;
use tokio::signal::unix::{signal, SignalKind};
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use blueshooth::config::{default_config_path, DaemonConfig};
use blueshooth::ipc::{IpcServer, Request, Response};
use blueshooth::App;

#[derive(Parser)]
#[command(name = "blueshoothd")]
#[command(about = "BlueShooth Bluetooth auto-connect guard daemon")]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,

    /// Configuration file path
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Enable debug logging
    #[arg(short, long)]
    debug: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the daemon
    Run,
    /// Check daemon status
    Status,
    /// Stop the daemon
    Stop,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Initialize logging, RUST_LOG wins over --debug
    let log_level = if cli.debug { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("blueshooth={0},blueshoothd={0}", log_level)));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    // Load configuration
    let config_path = cli.config.unwrap_or_else(default_config_path);
    let config = DaemonConfig::load(&config_path)
        .with_context(|| format!("Failed to load {}", config_path.display()))?;

    match cli.command.unwrap_or(Commands::Run) {
        Commands::Run => run_daemon(config).await,
        Commands::Status => check_status(&config.socket_path).await,
        Commands::Stop => stop_daemon(&config.socket_path).await,
    }
}

async fn run_daemon(config: DaemonConfig) -> Result<()> {
    info!("BlueShooth daemon starting...");

    let app = Arc::new(App::from_config(&config).await?);
    let enforcer = app
        .start_enforcer()
        .await
        .context("Failed to subscribe to Bluetooth connection events")?;

    let server = IpcServer::bind(&config.socket_path, app.clone())
        .with_context(|| format!("Failed to bind {}", config.socket_path.display()))?;
    info!("BlueShooth daemon ready on socket: {}", config.socket_path.display());

    let mut sigterm = signal(SignalKind::terminate())?;
    let result = tokio::select! {
        result = server.run() => result,
        _ = tokio::signal::ctrl_c() => {
            info!("Interrupted");
            Ok(())
        }
        _ = sigterm.recv() => {
            info!("Terminated");
            Ok(())
        }
    };

    enforcer.shutdown().await;
    if let Err(e) = std::fs::remove_file(&config.socket_path) {
        error!("Failed to remove socket {}: {}", config.socket_path.display(), e);
    }

    info!("BlueShooth daemon stopped");
    result
}

async fn request(socket_path: &Path, request: &Request) -> Result<Response> {
    let stream = UnixStream::connect(socket_path)
        .await
        .with_context(|| format!("Daemon not reachable at {}", socket_path.display()))?;
    let (reader, mut writer) = stream.into_split();

    let mut payload = serde_json::to_string(request)?;
    payload.push('\n');
    writer.write_all(payload.as_bytes()).await?;

    let mut line = String::new();
    BufReader::new(reader).read_line(&mut line).await?;
    Ok(serde_json::from_str(line.trim())?)
}

async fn check_status(socket_path: &Path) -> Result<()> {
    match request(socket_path, &Request::Ping).await? {
        Response::Pong { version } => {
            println!("BlueShooth daemon {} running on {}", version, socket_path.display());
            Ok(())
        }
        other => bail!("Unexpected response: {:?}", other),
    }
}

async fn stop_daemon(socket_path: &Path) -> Result<()> {
    match request(socket_path, &Request::Shutdown).await? {
        Response::Success { message } => {
            println!("{}", message);
            Ok(())
        }
        other => bail!("Unexpected response: {:?}", other),
    }
}
