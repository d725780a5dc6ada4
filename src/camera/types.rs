//! Camera type definitions
//!
//! This module defines the basic data types used throughout the crate:
//! device identity, per-camera settings, location fixes and the status
//! values reported to the outside world.

use chrono::{DateTime, TimeZone, Utc};
use chrono_tz::{OffsetComponents, Tz};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Stable transport address identifying a camera (e.g. "AA:BB:CC:DD:EE:FF")
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DeviceAddress(String);

impl DeviceAddress {
    pub fn new(address: impl Into<String>) -> Self {
        Self(address.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for DeviceAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for DeviceAddress {
    fn from(address: &str) -> Self {
        Self::new(address)
    }
}

impl From<String> for DeviceAddress {
    fn from(address: String) -> Self {
        Self(address)
    }
}

/// How the core finds and (re)connects a camera
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionStrategy {
    /// Address-filtered scan; a scan hit triggers a one-shot GATT connect
    #[default]
    ScanTriggered,

    /// One auto-reconnecting GATT session left open by the transport
    PersistentGatt,
}

/// Scanner duty cycle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScanMode {
    LowPower,
    LowLatency,
}

/// Per-camera preferences (owned by the settings store)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CameraSettings {
    #[serde(default)]
    pub connection_strategy: ConnectionStrategy,

    /// Favor low-latency scanning shortly after a disconnect
    #[serde(default)]
    pub quick_connect_enabled: bool,

    /// Quick connect window length; 0 keeps scanning fast forever
    #[serde(default = "default_quick_connect_minutes")]
    pub quick_connect_minutes: u32,

    /// Wrap a full shutter press with a half press (focus before firing)
    #[serde(default = "default_true")]
    pub enable_half_press: bool,
}

fn default_quick_connect_minutes() -> u32 { 5 }
fn default_true() -> bool { true }

impl Default for CameraSettings {
    fn default() -> Self {
        Self {
            connection_strategy: ConnectionStrategy::default(),
            quick_connect_enabled: false,
            quick_connect_minutes: default_quick_connect_minutes(),
            enable_half_press: true,
        }
    }
}

/// One position sample from the location provider
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct LocationFix {
    /// Degrees, positive north
    pub latitude: f64,

    /// Degrees, positive east
    pub longitude: f64,

    /// When the fix was taken
    pub timestamp: DateTime<Utc>,
}

impl LocationFix {
    pub fn new(latitude: f64, longitude: f64, timestamp: DateTime<Utc>) -> Self {
        Self { latitude, longitude, timestamp }
    }
}

/// Host timezone split into its standard offset and the DST shift on top of it
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ZoneOffsets {
    /// Standard offset from UTC, DST excluded
    pub raw_offset_minutes: i32,

    /// Additional DST shift (0 when DST is not in effect)
    #[serde(default)]
    pub dst_offset_minutes: i32,
}

impl ZoneOffsets {
    pub fn new(raw_offset_minutes: i32, dst_offset_minutes: i32) -> Self {
        Self { raw_offset_minutes, dst_offset_minutes }
    }

    /// Offsets of a named timezone at an instant
    pub fn at(tz: Tz, instant: DateTime<Utc>) -> Self {
        let offset = tz.offset_from_utc_datetime(&instant.naive_utc());
        Self::new(
            offset.base_utc_offset().num_minutes() as i32,
            offset.dst_offset().num_minutes() as i32,
        )
    }

    /// Offsets of the host's timezone now.
    ///
    /// Falls back to the combined offset without a DST split when the host
    /// zone has no IANA name.
    pub fn local() -> Self {
        match iana_time_zone::get_timezone().ok().and_then(|name| name.parse::<Tz>().ok()) {
            Some(tz) => Self::at(tz, Utc::now()),
            None => Self::new(chrono::Local::now().offset().local_minus_utc() / 60, 0),
        }
    }

    pub fn dst_active(&self) -> bool {
        self.dst_offset_minutes != 0
    }
}

/// Connection status surfaced to the UI collaborator
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConnectionStatus {
    Disconnected,
    Connecting,
    Bonding,
    Streaming,
    Error,
}

impl fmt::Display for ConnectionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ConnectionStatus::Disconnected => "disconnected",
            ConnectionStatus::Connecting => "connecting",
            ConnectionStatus::Bonding => "bonding",
            ConnectionStatus::Streaming => "streaming",
            ConnectionStatus::Error => "error",
        };
        f.write_str(name)
    }
}
