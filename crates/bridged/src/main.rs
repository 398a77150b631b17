//! tinbridge daemon
//!
//! Attaches tin USB devices (1687:3257) as they appear on the bus and
//! exposes each one as a numbered Unix socket node. Bytes written to a
//! node socket go out the device's bulk-out endpoint; bulk-in packets
//! come back over the same connection.

mod config;
mod logging;
mod sockets;

use anyhow::{Context, Result};
use clap::Parser;
use config::DaemonConfig;
use driver::{NodeTable, TinDriver};
use hostusb::{list_devices, spawn_watcher};
use logging::setup_logging;
use sockets::SocketRegistrar;
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::Ordering;
use tokio::signal;
use tracing::{error, info};

#[derive(Parser, Debug)]
#[command(name = "tinbridged")]
#[command(
    author,
    version,
    about = "tinbridge daemon - bridge tin USB devices onto local sockets"
)]
#[command(long_about = "
Attaches tin USB devices (vendor 1687, product 3257) and exposes each one
as a Unix socket node named after its minor number, e.g. tin48.sock.

EXAMPLES:
    # Run with default config
    tinbridged

    # Run with custom config
    tinbridged --config /path/to/tinbridged.toml

    # List matching USB devices without starting the daemon
    tinbridged --list-devices

    # Put the node sockets somewhere specific
    tinbridged --socket-dir /run/tinbridge

    # Run with debug logging
    tinbridged --log-level debug

CONFIGURATION:
    The daemon looks for configuration files in the following order:
    1. Path specified with --config
    2. ~/.config/tinbridge/tinbridged.toml
    3. /etc/tinbridge/tinbridged.toml
    4. Built-in defaults

For more information, visit: https://github.com/tinbridge/tinbridge
")]
struct Args {
    /// Path to configuration file
    #[arg(short, long, value_name = "PATH")]
    config: Option<String>,

    /// Save default configuration to default location and exit
    #[arg(long)]
    save_config: bool,

    /// List matching USB devices and exit
    #[arg(long)]
    list_devices: bool,

    /// Directory for node sockets (overrides config)
    #[arg(long, value_name = "DIR")]
    socket_dir: Option<String>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(short, long, value_name = "LEVEL")]
    log_level: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Handle --save-config flag early (before loading config)
    if args.save_config {
        let config = DaemonConfig::default();
        let path = DaemonConfig::default_path();
        config.save(&path).context("Failed to save configuration")?;
        println!("Configuration saved to: {}", path.display());
        return Ok(());
    }

    // Load configuration first (to get log level from config if not specified)
    let config = if let Some(ref path) = args.config {
        let path = PathBuf::from(shellexpand::tilde(path).as_ref());
        DaemonConfig::load(Some(path)).context("Failed to load configuration")?
    } else {
        DaemonConfig::load_or_default()
    };

    // Use CLI log level if specified, otherwise use config value
    let log_level = args.log_level.as_deref().unwrap_or(&config.daemon.log_level);

    setup_logging(log_level).context("Failed to setup logging")?;

    info!("tinbridged v{}", env!("CARGO_PKG_VERSION"));
    info!("Log level: {}", log_level);

    if args.list_devices {
        return list_devices_mode();
    }

    let socket_dir = match args.socket_dir {
        Some(ref dir) => PathBuf::from(shellexpand::tilde(dir).as_ref()),
        None => config.daemon.socket_dir.clone(),
    };

    let table = Arc::new(NodeTable::new(config.node.node_class()));
    let registrar = SocketRegistrar::new(table, socket_dir.clone())
        .context("Failed to set up the socket directory")?;
    let driver = TinDriver::new(registrar);

    // Bus events and blocking transfers live on a dedicated thread; the
    // runtime only ever sees the sockets.
    let (watch_handle, watch_running) =
        spawn_watcher(driver).context("Failed to start watching the bus")?;

    info!("Node sockets will appear under {}", socket_dir.display());
    info!("Press Ctrl+C to shutdown");

    match signal::ctrl_c().await {
        Ok(()) => {
            info!("Received Ctrl+C, shutting down gracefully...");
        }
        Err(e) => {
            error!("Error waiting for Ctrl+C: {}", e);
        }
    }

    // The watch loop detaches every remaining device on its way out.
    watch_running.store(false, Ordering::SeqCst);
    if watch_handle.join().is_err() {
        error!("USB watch thread panicked");
    }

    info!("Daemon shutdown complete");
    Ok(())
}

/// List matching USB devices and exit
fn list_devices_mode() -> Result<()> {
    info!("Listing tin devices...");

    let devices = list_devices().context("Failed to enumerate USB devices")?;

    if devices.is_empty() {
        println!("No tin devices found.");
    } else {
        println!("Found {} tin device(s):\n", devices.len());
        for device in devices {
            println!(
                "  {:04x}:{:04x} - {}",
                device.vendor_id,
                device.product_id,
                device.product.as_deref().unwrap_or("Unknown Product")
            );
            println!(
                "      Bus {:03} Device {:03}",
                device.bus_number, device.address
            );
            println!();
        }
    }

    Ok(())
}
