//! Configuration loading and validation
//!
//! The daemon reads a TOML file with link tunables (`[settings]`), an
//! optional fixed timezone (`[clock]`), an optional fixed location fix
//! (`[location]`) and the cameras to register (`[[cameras]]`).

use chrono::Utc;
use log::{debug, info};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

use crate::camera::constants::*;
use crate::camera::types::{CameraSettings, DeviceAddress, LocationFix, ZoneOffsets};
use crate::link::state::{HandshakePolicy, LinkTimings, RetryPolicy};
use crate::manager::ManagerOptions;

/// Environment variable naming the config file
pub const CONFIG_ENV: &str = "CAMLINK_CONFIG";

/// Config file used when nothing else is given
pub const DEFAULT_CONFIG_PATH: &str = "configs/default.toml";

/// Largest timezone offset accepted, in minutes
const MAX_ZONE_OFFSET_MINUTES: i32 = 14 * 60;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to parse config file: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

/// Main configuration structure
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub settings: Settings,

    /// Fixed timezone; the host's local offset when absent
    #[serde(default)]
    pub clock: Option<ClockConfig>,

    /// Fix published at startup
    #[serde(default)]
    pub location: Option<LocationConfig>,

    #[serde(default)]
    pub cameras: Vec<CameraEntry>,
}

/// Link tunables
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Settings {
    /// Handshake write retries per stage
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,

    /// Linear backoff unit
    #[serde(default = "default_retry_base_ms")]
    pub retry_base_ms: u64,

    /// Delay before rediscovery after a transport failure or an abandoned handshake
    #[serde(default = "default_rescan_delay_ms")]
    pub rescan_delay_ms: u64,

    /// Delay before rediscovery after a scanner failure
    #[serde(default = "default_scan_retry_delay_ms")]
    pub scan_retry_delay_ms: u64,

    #[serde(default = "default_location_interval_ms")]
    pub location_interval_ms: u64,

    #[serde(default = "default_stream_start_delay_ms")]
    pub stream_start_delay_ms: u64,

    /// Delay between press and release of a tapped command
    #[serde(default = "default_release_delay_ms")]
    pub release_delay_ms: u64,

    #[serde(default = "default_mtu")]
    pub mtu: u16,

    #[serde(default = "default_journal_capacity")]
    pub journal_capacity: usize,

    /// JSON file holding per-camera settings and disconnect times
    #[serde(default = "default_store_path")]
    pub store_path: PathBuf,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            max_retries: default_max_retries(),
            retry_base_ms: default_retry_base_ms(),
            rescan_delay_ms: default_rescan_delay_ms(),
            scan_retry_delay_ms: default_scan_retry_delay_ms(),
            location_interval_ms: default_location_interval_ms(),
            stream_start_delay_ms: default_stream_start_delay_ms(),
            release_delay_ms: default_release_delay_ms(),
            mtu: default_mtu(),
            journal_capacity: default_journal_capacity(),
            store_path: default_store_path(),
        }
    }
}

fn default_max_retries() -> u32 { DEFAULT_MAX_RETRIES }
fn default_retry_base_ms() -> u64 { DEFAULT_RETRY_BASE_MS }
fn default_rescan_delay_ms() -> u64 { DEFAULT_RESCAN_DELAY_MS }
fn default_scan_retry_delay_ms() -> u64 { DEFAULT_SCAN_RETRY_DELAY_MS }
fn default_location_interval_ms() -> u64 { DEFAULT_LOCATION_INTERVAL_MS }
fn default_stream_start_delay_ms() -> u64 { DEFAULT_STREAM_START_DELAY_MS }
fn default_release_delay_ms() -> u64 { DEFAULT_RELEASE_DELAY_MS }
fn default_mtu() -> u16 { DEFAULT_MTU }
fn default_journal_capacity() -> usize { DEFAULT_JOURNAL_CAPACITY }
fn default_store_path() -> PathBuf { PathBuf::from("camlink_cameras.json") }

/// Fixed timezone offsets
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClockConfig {
    pub raw_offset_minutes: i32,

    #[serde(default)]
    pub dst_offset_minutes: i32,
}

/// Fixed location
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct LocationConfig {
    pub latitude: f64,
    pub longitude: f64,
}

impl LocationConfig {
    /// Fix stamped with the current time
    pub fn fix(&self) -> LocationFix {
        LocationFix::new(self.latitude, self.longitude, Utc::now())
    }
}

/// One camera to register
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CameraEntry {
    pub address: DeviceAddress,

    #[serde(default)]
    pub name: Option<String>,

    #[serde(flatten)]
    pub settings: CameraSettings,
}

impl Config {
    /// Load configuration from a TOML file
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let path_ref = path.as_ref();
        info!("Loading configuration from: {}", path_ref.display());

        let content = std::fs::read_to_string(path_ref)?;
        let config = Self::parse(&content)?;

        info!("✓ Config parsed successfully");
        debug!("  - Cameras: {}", config.cameras.len());
        debug!("  - Max retries: {}", config.settings.max_retries);
        debug!("  - Store: {}", config.settings.store_path.display());

        Ok(config)
    }

    /// Parse and validate TOML text
    pub fn parse(content: &str) -> Result<Self, ConfigError> {
        let config: Config = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<(), ConfigError> {
        let s = &self.settings;

        if s.max_retries == 0 {
            return Err(ConfigError::Invalid("max_retries must be at least 1".into()));
        }

        let delays = [
            ("retry_base_ms", s.retry_base_ms),
            ("rescan_delay_ms", s.rescan_delay_ms),
            ("scan_retry_delay_ms", s.scan_retry_delay_ms),
            ("location_interval_ms", s.location_interval_ms),
            ("stream_start_delay_ms", s.stream_start_delay_ms),
            ("release_delay_ms", s.release_delay_ms),
        ];
        for (name, value) in delays {
            if value == 0 {
                return Err(ConfigError::Invalid(format!("{} must be positive", name)));
            }
        }

        if !(MIN_MTU..=DEFAULT_MTU).contains(&s.mtu) {
            return Err(ConfigError::Invalid(format!(
                "mtu must be between {} and {}",
                MIN_MTU, DEFAULT_MTU
            )));
        }

        if s.journal_capacity == 0 {
            return Err(ConfigError::Invalid("journal_capacity must be positive".into()));
        }

        if let Some(clock) = &self.clock {
            for (name, value) in [
                ("raw_offset_minutes", clock.raw_offset_minutes),
                ("dst_offset_minutes", clock.dst_offset_minutes),
            ] {
                if value.abs() > MAX_ZONE_OFFSET_MINUTES {
                    return Err(ConfigError::Invalid(format!("{} must be within +/-14h", name)));
                }
            }
        }

        if let Some(location) = &self.location {
            if !(-90.0..=90.0).contains(&location.latitude) || !(-180.0..=180.0).contains(&location.longitude) {
                return Err(ConfigError::Invalid("location is out of range".into()));
            }
        }

        let mut seen = HashSet::new();
        for camera in &self.cameras {
            if camera.address.as_str().trim().is_empty() {
                return Err(ConfigError::Invalid("Camera address must not be empty".into()));
            }
            if !seen.insert(camera.address.as_str().to_ascii_uppercase()) {
                return Err(ConfigError::Invalid(format!("Duplicate camera address '{}'", camera.address)));
            }
        }

        Ok(())
    }

    pub fn zone(&self) -> Option<ZoneOffsets> {
        self.clock
            .map(|clock| ZoneOffsets::new(clock.raw_offset_minutes, clock.dst_offset_minutes))
    }

    pub fn handshake_policy(&self) -> HandshakePolicy {
        HandshakePolicy::uniform(RetryPolicy::new(
            self.settings.max_retries,
            Duration::from_millis(self.settings.retry_base_ms),
        ))
    }

    pub fn link_timings(&self) -> LinkTimings {
        let s = &self.settings;
        LinkTimings {
            rescan_delay: Duration::from_millis(s.rescan_delay_ms),
            scan_retry_delay: Duration::from_millis(s.scan_retry_delay_ms),
            stream_start_delay: Duration::from_millis(s.stream_start_delay_ms),
            location_interval: Duration::from_millis(s.location_interval_ms),
            mtu: s.mtu,
        }
    }

    pub fn manager_options(&self) -> ManagerOptions {
        ManagerOptions {
            handshake: self.handshake_policy(),
            timings: self.link_timings(),
            release_delay: Duration::from_millis(self.settings.release_delay_ms),
            zone: self.zone(),
            journal_capacity: self.settings.journal_capacity,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::camera::types::ConnectionStrategy;

    const FULL: &str = r#"
        [settings]
        max_retries = 5
        retry_base_ms = 250
        mtu = 247
        store_path = "cams.json"

        [clock]
        raw_offset_minutes = 540

        [location]
        latitude = 35.6895
        longitude = 139.6917

        [[cameras]]
        address = "AA:BB:CC:DD:EE:FF"
        name = "A7 IV"
        connection_strategy = "persistent_gatt"
        quick_connect_enabled = true
        quick_connect_minutes = 0

        [[cameras]]
        address = "11:22:33:44:55:66"
    "#;

    #[test]
    fn test_default_settings() {
        let settings = Settings::default();
        assert_eq!(settings.max_retries, 3);
        assert_eq!(settings.retry_base_ms, 500);
        assert_eq!(settings.location_interval_ms, 10_000);
        assert_eq!(settings.mtu, 517);
        assert_eq!(settings.journal_capacity, 200);
    }

    #[test]
    fn test_parse_full_config() {
        let config = Config::parse(FULL).unwrap();

        assert_eq!(config.settings.max_retries, 5);
        assert_eq!(config.settings.rescan_delay_ms, 5_000);
        assert_eq!(config.zone(), Some(ZoneOffsets::new(540, 0)));
        assert_eq!(config.location.map(|l| l.latitude), Some(35.6895));

        assert_eq!(config.cameras.len(), 2);
        let first = &config.cameras[0];
        assert_eq!(first.name.as_deref(), Some("A7 IV"));
        assert_eq!(first.settings.connection_strategy, ConnectionStrategy::PersistentGatt);
        assert_eq!(first.settings.quick_connect_minutes, 0);
        assert!(first.settings.enable_half_press);

        let second = &config.cameras[1];
        assert_eq!(second.settings, CameraSettings::default());
    }

    #[test]
    fn test_options_conversion() {
        let config = Config::parse(FULL).unwrap();
        let options = config.manager_options();

        assert_eq!(options.handshake.enable.max_retries, 5);
        assert_eq!(options.handshake.lock.base_delay, Duration::from_millis(250));
        assert_eq!(options.timings.mtu, 247);
        assert_eq!(options.release_delay, Duration::from_millis(200));
        assert_eq!(options.zone, Some(ZoneOffsets::new(540, 0)));
    }

    #[test]
    fn test_empty_config_is_valid() {
        let config = Config::parse("").unwrap();
        assert!(config.cameras.is_empty());
        assert_eq!(config.zone(), None);
        assert_eq!(config.settings, Settings::default());
    }

    #[test]
    fn test_invalid_settings() {
        let mut config = Config::default();
        config.settings.max_retries = 0;
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.settings.location_interval_ms = 0;
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.settings.mtu = 600;
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.clock = Some(ClockConfig { raw_offset_minutes: -15 * 60, dst_offset_minutes: 0 });
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_duplicate_cameras_rejected() {
        let text = r#"
            [[cameras]]
            address = "aa:bb:cc:dd:ee:ff"

            [[cameras]]
            address = "AA:BB:CC:DD:EE:FF"
        "#;
        assert!(matches!(Config::parse(text), Err(ConfigError::Invalid(_))));
    }

    #[test]
    fn test_parse_error() {
        assert!(matches!(Config::parse("[settings]\nmax_retries = \"three\""), Err(ConfigError::Parse(_))));
    }
}
