//! camlink - Main Application
//!
//! Keeps every configured camera linked, streams location fixes to them and
//! forwards remote commands typed on stdin.
//!
//! Usage: camlink [--config PATH] [--simulate]
//! (the config path can also come from `CAMLINK_CONFIG`)
//!
//! stdin commands:
//!   fix <lat> <lon>                  publish a location fix (also "<lat>,<lon>")
//!   cmd <address> <command> [hold]   tap (or start holding) a remote command
//!   release <address> <command>      end a held command
//!   forget <address>                 drop a camera
//!   status                           show every camera's state
//!   journal                          show recent log lines
//!   quit

use anyhow::{Context, Result};
use camlink_rs::camera::types::LocationFix;
use camlink_rs::config::{CONFIG_ENV, DEFAULT_CONFIG_PATH};
use camlink_rs::{
    BtleplugTransport, CameraEvent, CameraManager, Config, GattTransport, JsonSettingsStore, LocationFeed,
    MockTransport, RemoteCommand, Trigger,
};
use clap::Parser;
use chrono::Utc;
use log::{info, warn};
use std::path::PathBuf;
use std::sync::Arc;
use std::thread;
use tokio::io::{AsyncBufReadExt, BufReader};

/// Keep cameras linked, stream location fixes to them and forward remote commands.
#[derive(Parser, Debug)]
#[command(name = "camlink", version, about, long_about = None)]
struct Cli {
    /// TOML configuration file
    #[arg(long, short, env = CONFIG_ENV, default_value = DEFAULT_CONFIG_PATH)]
    config: PathBuf,

    /// Run against a simulated transport where every configured camera advertises
    #[arg(long)]
    simulate: bool,
}

fn parse_fix(text: &str) -> Option<LocationFix> {
    let mut parts = text.split(|c: char| c == ',' || c.is_whitespace()).filter(|p| !p.is_empty());
    let latitude = parts.next()?.parse().ok()?;
    let longitude = parts.next()?.parse().ok()?;
    Some(LocationFix::new(latitude, longitude, Utc::now()))
}

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let args = Cli::parse();
    let config = Config::load(&args.config).context("Failed to load configuration")?;

    println!("=== camlink ===");
    println!();
    println!("Cameras: {}", config.cameras.len());
    println!("Type 'fix <lat> <lon>', 'cmd <address> <command>', 'status', 'journal' or 'quit'");
    println!();

    let store = Arc::new(JsonSettingsStore::load(&config.settings.store_path));
    let transport: Arc<dyn GattTransport> = if args.simulate {
        info!("Running against the simulated transport");
        let mock = MockTransport::new();
        for camera in &config.cameras {
            mock.set_advertising(&camera.address, true);
        }
        Arc::new(mock)
    } else {
        Arc::new(BtleplugTransport::new().await.context("Failed to open Bluetooth adapter")?)
    };

    let feed = LocationFeed::new();
    if let Some(location) = &config.location {
        feed.publish(location.fix());
    }

    let mut manager = CameraManager::new(transport, store, feed.clone(), config.manager_options());
    manager.start();

    for camera in &config.cameras {
        manager.connect_with_settings(camera.address.clone(), camera.name.clone(), camera.settings.clone())?;
    }

    // Print events on a separate thread
    let events = manager.events();
    thread::spawn(move || {
        for event in events.iter() {
            match event {
                CameraEvent::Status { detail, .. } => println!("● {}", detail),
                CameraEvent::RemoteControlDisabled { address } => {
                    println!("✗ {}: shutter failed, enable remote control on the camera", address)
                }
                CameraEvent::HandshakeAbandoned { address, stage } => {
                    println!("✗ {}: handshake abandoned at {:?}, retrying later", address, stage)
                }
                CameraEvent::Removed { address } => println!("- {} forgotten", address),
            }
        }
    });

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    while let Some(line) = lines.next_line().await? {
        let line = line.trim();
        let words: Vec<&str> = line.split_whitespace().collect();

        match words.as_slice() {
            [] => {}
            ["quit"] | ["exit"] => break,
            ["status"] => {
                for (address, state) in manager.snapshot().await? {
                    println!("{}: {:?}", address, state);
                }
            }
            ["journal"] => {
                for entry in manager.journal().lines().iter().take(20) {
                    println!("{}", entry);
                }
            }
            ["forget", address] => {
                if let Err(e) = manager.forget(*address).await {
                    warn!("{}", e);
                }
            }
            ["cmd", address, command, rest @ ..] => {
                let command: RemoteCommand = match command.parse() {
                    Ok(command) => command,
                    Err(e) => {
                        warn!("{}", e);
                        continue;
                    }
                };
                let trigger = if rest.first() == Some(&"hold") { Trigger::Hold } else { Trigger::Tap };
                if let Err(e) = manager.send_command(*address, command, trigger).await {
                    warn!("{}", e);
                }
            }
            ["release", address, command] => match command.parse::<RemoteCommand>() {
                Ok(command) => {
                    if let Err(e) = manager.release_command(*address, command).await {
                        warn!("{}", e);
                    }
                }
                Err(e) => warn!("{}", e),
            },
            ["fix", rest @ ..] => match parse_fix(&rest.join(" ")) {
                Some(fix) => feed.publish(fix),
                None => warn!("Expected: fix <lat> <lon>"),
            },
            _ => match parse_fix(line) {
                Some(fix) => feed.publish(fix),
                None => warn!("Unknown input: {}", line),
            },
        }
    }

    println!("Shutting down...");
    manager.stop().await;
    Ok(())
}
