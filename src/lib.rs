//! camlink-rs: GPS sync and remote control for BLE cameras
//!
//! This library keeps GATT links to cameras alive, streams the host's
//! location to them and writes remote-control commands on request.

pub mod camera;
pub mod config;
pub mod link;
pub mod manager;
pub mod transport;

// Re-export commonly used items
pub use camera::{
    CameraSettings, ConnectionStatus, ConnectionStrategy, DeviceAddress, JsonSettingsStore, LocationFix,
    MemorySettingsStore, RemoteCommand, SettingsStore, Trigger, ZoneOffsets,
};
pub use config::Config;
pub use link::{CommandError, ConnectionState, Journal, LinkError, LocationFeed};
pub use manager::{CameraEvent, CameraManager, ManagerOptions};
pub use transport::{BtleplugTransport, GattTransport, MockTransport};
