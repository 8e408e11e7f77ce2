//! f710d Daemon
//!
//! Polls a Logitech F710 game controller over libusb and publishes its
//! buttons, triggers and sticks as read-only nodes on D-Bus.

use std::path::PathBuf;

use clap::Parser;
use tokio::time::{interval, Duration};
use tracing::{error, info, warn, Level};
use tracing_subscriber::FmtSubscriber;

use f710d::{
    config::Config,
    dbus::{init_dbus_service, DBUS_NAME},
    nodes::{FieldKind, NodeTable, NodeValue, FIELDS},
    poll::PollLoop,
    store::{Snapshot, StateStore},
    usb::{default_backend, ConnectionManager, RusbBackend},
};

/// How often the snapshot logger checks for changes
const SNAPSHOT_LOG_INTERVAL_MS: u64 = 100;

/// f710d - Logitech F710 controller provider
#[derive(Parser, Debug)]
#[command(name = "f710d")]
#[command(version, about, long_about = None)]
struct Args {
    /// Configuration file path (defaults to ~/.config/f710d/config.json)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,

    /// List matching USB controllers and exit
    #[arg(long)]
    list_devices: bool,

    /// Do not register on D-Bus, log controller changes instead
    #[arg(long)]
    no_dbus: bool,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    // Initialize logging
    let level = if args.verbose { Level::DEBUG } else { Level::INFO };
    let subscriber = FmtSubscriber::builder()
        .with_max_level(level)
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    info!("f710d starting...");

    let config = load_config(args.config.as_deref());

    // Handle --list-devices flag
    if args.list_devices {
        list_controllers(&config);
        return Ok(());
    }

    let store = StateStore::new();
    let nodes = NodeTable::new(&config.address_root, store.clone());

    // Without libusb the poll loop parks and the nodes stay at the safe state
    let manager = ConnectionManager::from_config(default_backend(), &config);
    PollLoop::from_config(manager, store.clone(), &config).spawn()?;

    let _dbus_connection = if args.no_dbus {
        info!("D-Bus disabled, logging controller changes");
        None
    } else {
        match init_dbus_service(nodes).await {
            Ok(conn) => {
                info!(name = DBUS_NAME, "D-Bus service initialized successfully");
                Some(conn)
            }
            Err(e) => {
                error!("Failed to initialize D-Bus service: {}", e);
                return Err(e.into());
            }
        }
    };

    let wait_logger = async {
        if args.no_dbus {
            log_snapshots(store).await
        } else {
            std::future::pending().await
        }
    };

    tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            info!("Shutdown signal received, exiting...");
        }
        _ = wait_logger => {}
    }

    Ok(())
}

/// Load the configuration, falling back to defaults on any error
fn load_config(path: Option<&std::path::Path>) -> Config {
    let loaded = match path {
        Some(path) => Config::load(path),
        None => Config::load_default(),
    };

    match loaded {
        Ok(config) => config,
        Err(e) => {
            warn!("Failed to load config, using defaults: {}", e);
            Config::default()
        }
    }
}

/// List every USB device matching the configured controller IDs
fn list_controllers(config: &Config) {
    println!("Scanning for F710 controllers...\n");

    let backend = match RusbBackend::new() {
        Ok(backend) => backend,
        Err(e) => {
            println!("Cannot scan: {}", e);
            return;
        }
    };

    let devices = match backend.list_devices(&config.devices) {
        Ok(devices) => devices,
        Err(e) => {
            println!("Cannot scan: {}", e);
            return;
        }
    };

    if devices.is_empty() {
        println!("No F710 controller found.");
        println!("\nTroubleshooting:");
        println!("  - Ensure the USB receiver is plugged in");
        println!("  - Set the mode switch on the controller to X (XInput)");
        println!("  - Check that udev rules grant access to the device");
        return;
    }

    println!("Found {} controller(s):\n", devices.len());

    for (i, device) in devices.iter().enumerate() {
        let wired_marker = if device.id.is_wired() { " [switch to XInput]" } else { "" };
        println!("{}. {}{}", i + 1, device.id, wired_marker);
        println!("   Bus:     {:03}", device.bus);
        println!("   Address: {:03}", device.address);
        println!();
    }
}

/// Log every snapshot change until the process exits
async fn log_snapshots(store: StateStore) {
    let mut ticker = interval(Duration::from_millis(SNAPSHOT_LOG_INTERVAL_MS));
    let mut last: Option<Snapshot> = None;

    loop {
        ticker.tick().await;
        let snapshot = store.snapshot();
        if last.as_ref() == Some(&snapshot) {
            continue;
        }

        info!(
            connected = snapshot.connected,
            pressed = ?pressed_fields(&snapshot),
            left_x = snapshot.state.left_x,
            left_y = snapshot.state.left_y,
            right_x = snapshot.state.right_x,
            right_y = snapshot.state.right_y,
            "Controller state"
        );
        last = Some(snapshot);
    }
}

/// Names of the button fields currently pressed
fn pressed_fields(snapshot: &Snapshot) -> Vec<&'static str> {
    FIELDS
        .iter()
        .filter(|f| f.kind == FieldKind::Bool8 && f.name != "controller-connected")
        .filter(|f| (f.get)(snapshot) == NodeValue::Bool(true))
        .map(|f| f.name)
        .collect()
}
