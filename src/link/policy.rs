//! Scan policy
//!
//! Decides how a camera is looked for: which connection strategy applies and,
//! for address-filtered scanning, whether the quick-connect window currently
//! calls for low-latency scanning and how long that window has left.

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use std::time::Duration;

use crate::camera::types::{CameraSettings, ConnectionStrategy, ScanMode};

/// How to run the next discovery phase of one camera
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DiscoveryPlan {
    pub strategy: ConnectionStrategy,

    /// Scan duty cycle (meaningful for `ScanTriggered` only)
    pub scan_mode: ScanMode,

    /// Time left in a bounded low-latency window; the expiry timer is armed for it
    pub quick_connect_remaining: Option<Duration>,
}

/// Stateless policy over settings + last disconnect time
#[derive(Debug, Clone, Copy, Default)]
pub struct ScanPolicyEngine;

impl ScanPolicyEngine {
    pub fn new() -> Self {
        Self
    }

    /// End of the quick-connect window, if the settings bound one and the camera has disconnected before
    pub fn quick_connect_deadline(
        &self,
        settings: &CameraSettings,
        last_disconnect: Option<DateTime<Utc>>,
    ) -> Option<DateTime<Utc>> {
        if settings.connection_strategy != ConnectionStrategy::ScanTriggered
            || !settings.quick_connect_enabled
            || settings.quick_connect_minutes == 0
        {
            return None;
        }
        last_disconnect.map(|at| at + ChronoDuration::minutes(i64::from(settings.quick_connect_minutes)))
    }

    /// Scan mode right now
    pub fn scan_mode(
        &self,
        settings: &CameraSettings,
        last_disconnect: Option<DateTime<Utc>>,
        now: DateTime<Utc>,
    ) -> ScanMode {
        if !settings.quick_connect_enabled {
            return ScanMode::LowPower;
        }
        if settings.quick_connect_minutes == 0 {
            return ScanMode::LowLatency;
        }
        match last_disconnect {
            Some(at) if now - at < ChronoDuration::minutes(i64::from(settings.quick_connect_minutes)) => {
                ScanMode::LowLatency
            }
            _ => ScanMode::LowPower,
        }
    }

    /// Full plan for the next discovery phase
    pub fn plan(
        &self,
        settings: &CameraSettings,
        last_disconnect: Option<DateTime<Utc>>,
        now: DateTime<Utc>,
    ) -> DiscoveryPlan {
        if settings.connection_strategy == ConnectionStrategy::PersistentGatt {
            return DiscoveryPlan {
                strategy: ConnectionStrategy::PersistentGatt,
                scan_mode: ScanMode::LowPower,
                quick_connect_remaining: None,
            };
        }

        let scan_mode = self.scan_mode(settings, last_disconnect, now);
        let window = ChronoDuration::minutes(i64::from(settings.quick_connect_minutes));
        let quick_connect_remaining = match (scan_mode, self.quick_connect_deadline(settings, last_disconnect)) {
            (ScanMode::LowLatency, Some(deadline)) => (deadline - now).min(window).to_std().ok(),
            _ => None,
        };

        DiscoveryPlan {
            strategy: ConnectionStrategy::ScanTriggered,
            scan_mode,
            quick_connect_remaining,
        }
    }
}
