/*!
 * BlueShooth Control
 * List paired devices, connect, disconnect and block auto-connect
 * Onyx Digital Intelligence Development LLC
 */

use anyhow::{bail, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;

mod client;

use client::{BlueShoothClient, Request, Response};

#[derive(Parser)]
#[command(name = "blueshooth")]
#[command(about = "BlueShooth Bluetooth auto-connect control")]
struct Cli {
    /// Daemon socket path
    #[arg(short, long)]
    socket: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// List paired devices with connection and auto-connect state
    List,
    /// Connect a paired device
    Connect { address: String },
    /// Disconnect a paired device
    Disconnect { address: String },
    /// Block auto-connect for a device
    Block { address: String },
    /// Allow auto-connect for a device again
    Unblock { address: String },
    /// Flip the auto-connect block for a device
    Toggle { address: String },
    /// Show recent notifications
    Notifications,
    /// Check that the daemon is running
    Ping,
}

fn default_socket_path() -> PathBuf {
    dirs::runtime_dir()
        .unwrap_or_else(|| PathBuf::from(format!("/run/user/{}", nix::unistd::getuid())))
        .join("blueshooth.sock")
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let client = BlueShoothClient::new(cli.socket.unwrap_or_else(default_socket_path));

    let request = match cli.command {
        Commands::List => Request::ListDevices,
        Commands::Connect { address } => Request::Connect { address },
        Commands::Disconnect { address } => Request::Disconnect { address },
        Commands::Block { address } => Request::SetBlocked {
            address,
            blocked: true,
        },
        Commands::Unblock { address } => Request::SetBlocked {
            address,
            blocked: false,
        },
        Commands::Toggle { address } => Request::ToggleBlocked { address },
        Commands::Notifications => Request::Notifications,
        Commands::Ping => Request::Ping,
    };

    match client.send_request(request).await? {
        Response::Pong { version } => {
            println!(
                "blueshoothd {} running on {}",
                version,
                client.socket_path().display()
            );
        }
        Response::Devices { devices } => {
            if devices.is_empty() {
                println!("No paired devices found");
            }
            for device in devices {
                let status = if device.connected { "●" } else { "○" };
                let auto = if device.blocked {
                    "auto-connect: blocked"
                } else {
                    "auto-connect: allowed"
                };
                println!("{} {}  {}  ({})", status, device.address, device.name, auto);
            }
        }
        Response::Success { message } => println!("{}", message),
        Response::Blocked { address, blocked } => {
            if blocked {
                println!("Auto-connect blocked for {}", address);
            } else {
                println!("Auto-connect allowed for {}", address);
            }
        }
        Response::Notifications { notifications } => {
            if notifications.is_empty() {
                println!("No notifications yet");
            }
            for n in notifications {
                println!("{}  {}", n.timestamp.format("%Y-%m-%d %H:%M:%S"), n.body);
            }
        }
        Response::Error { message } => bail!(message),
    }

    Ok(())
}
