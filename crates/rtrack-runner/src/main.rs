//! rtrack - headless rocket locator tracker.
//!
//! Connects to a receiver exposed through a serial-to-TCP bridge, keeps the
//! link up, and logs decoded prelaunch and telemetry messages.

mod bridge;

use std::path::PathBuf;

use anyhow::{bail, Context, Result};
use clap::Parser;
use rtrack_link::{FlightSnapshot, LinkStatus, TcpTransport, Tracker, TrackerConfig};
use rtrack_protocol::HeaderScan;
use tokio::sync::mpsc;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use bridge::BridgeAdapter;

#[derive(Parser, Debug)]
#[command(name = "rtrack")]
#[command(about = "Track a rocket locator through its ground receiver", long_about = None)]
struct Cli {
    /// YAML configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Receiver bridge address (host:port); overrides device.address
    #[arg(short, long)]
    address: Option<String>,

    /// Receiver name shown in logs; overrides device.name
    #[arg(long)]
    device_name: Option<String>,

    /// Only look for a header at the start of a read
    #[arg(long)]
    anchored_framing: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_target(false)
        .init();

    let cli = Cli::parse();
    let config = load_config(&cli)?;
    let Some(address) = config.device.address.clone() else {
        bail!("no receiver address; pass --address or set device.address in the config");
    };

    rtrack_metrics::describe_metrics();

    info!("Tracking receiver at {}", address);
    info!("  Framing: {:?}", config.framing.header_scan);
    info!("  Ack timeout: {:?}", config.commands.ack_timeout());

    let (stop_tx, mut stop_rx) = mpsc::unbounded_channel();
    ctrlc::set_handler(move || {
        let _ = stop_tx.send(());
    })
    .context("installing Ctrl-C handler")?;

    let tracker = Tracker::spawn(config, BridgeAdapter, TcpTransport);
    let mut status = tracker.subscribe_status();
    let mut snapshot = tracker.subscribe_snapshot();

    loop {
        tokio::select! {
            _ = stop_rx.recv() => {
                info!("Interrupted, shutting down");
                break;
            }

            changed = status.changed() => {
                if changed.is_err() {
                    warn!("Tracker stopped unexpectedly");
                    break;
                }
                report_status(&status.borrow_and_update());
            }

            changed = snapshot.changed() => {
                if changed.is_err() {
                    break;
                }
                report_snapshot(&snapshot.borrow_and_update());
            }
        }
    }

    tracker.shutdown().await;
    Ok(())
}

fn load_config(cli: &Cli) -> Result<TrackerConfig> {
    let mut config = match &cli.config {
        Some(path) => TrackerConfig::from_path(path)
            .with_context(|| format!("loading config from {}", path.display()))?,
        None => TrackerConfig::default(),
    };
    if let Some(address) = &cli.address {
        config.device.address = Some(address.clone());
    }
    if let Some(name) = &cli.device_name {
        config.device.name = Some(name.clone());
    }
    if cli.anchored_framing {
        config.framing.header_scan = HeaderScan::Anchored;
    }
    Ok(config)
}

fn report_status(status: &LinkStatus) {
    match &status.device {
        Some(device) => info!("Link {} ({})", status.phase, device),
        None => info!("Link {}", status.phase),
    }
}

fn report_snapshot(snapshot: &FlightSnapshot) {
    if let Some(telemetry) = &snapshot.telemetry {
        info!(
            "{} | {:.6}, {:.6} | AGL {}",
            telemetry.flight_state,
            telemetry.gps.latitude,
            telemetry.gps.longitude,
            telemetry
                .latest_agl()
                .map_or_else(|| "-".to_string(), |agl| format!("{agl:.1}")),
        );
    } else if let Some(prelaunch) = &snapshot.prelaunch {
        info!(
            "Prelaunch | {} sats | AGL {:.1} | {:?} | battery {:.2} V | alt {} accel {} ch1 {} ch2 {}",
            prelaunch.gps.satellites,
            prelaunch.agl,
            prelaunch.orientation(),
            prelaunch.battery_volts,
            ok(prelaunch.status.altimeter_ok),
            ok(prelaunch.status.accelerometer_ok),
            armed(prelaunch.status.channel_1_armed),
            armed(prelaunch.status.channel_2_armed),
        );
    }
}

fn ok(flag: bool) -> &'static str {
    if flag {
        "ok"
    } else {
        "FAULT"
    }
}

fn armed(flag: bool) -> &'static str {
    if flag {
        "armed"
    } else {
        "open"
    }
}
