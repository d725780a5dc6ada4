//! Remote control commands
//!
//! Each command maps to a fixed press code and, for buttons the camera treats
//! as held, a release code. Codes are written verbatim to the command
//! characteristic.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// A remote-control button
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RemoteCommand {
    FullShutter,
    HalfShutter,
    C1,
    AfOn,
    Record,
    ZoomTele,
    ZoomWide,
    FocusNear,
    FocusFar,
    /// Harmless status poke used to check the command channel is accepted
    Probe,
}

/// How the user triggered a command
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Trigger {
    /// Discrete tap: release follows after a short fixed delay
    Tap,
    /// Drag/hold gesture: release is written when the gesture ends
    Hold,
}

impl RemoteCommand {
    pub const ALL: [RemoteCommand; 10] = [
        RemoteCommand::FullShutter,
        RemoteCommand::HalfShutter,
        RemoteCommand::C1,
        RemoteCommand::AfOn,
        RemoteCommand::Record,
        RemoteCommand::ZoomTele,
        RemoteCommand::ZoomWide,
        RemoteCommand::FocusNear,
        RemoteCommand::FocusFar,
        RemoteCommand::Probe,
    ];

    /// Bytes written when the button goes down
    pub fn press(&self) -> &'static [u8] {
        match self {
            RemoteCommand::FullShutter => &[0x01, 0x09],
            RemoteCommand::HalfShutter => &[0x01, 0x07],
            RemoteCommand::C1 => &[0x01, 0x21],
            RemoteCommand::AfOn => &[0x01, 0x15],
            RemoteCommand::Record => &[0x01, 0x0F],
            RemoteCommand::ZoomTele => &[0x02, 0x6D, 0x20],
            RemoteCommand::ZoomWide => &[0x02, 0x6B, 0x20],
            RemoteCommand::FocusNear => &[0x02, 0x47, 0x20],
            RemoteCommand::FocusFar => &[0x02, 0x45, 0x20],
            RemoteCommand::Probe => &[0x01, 0x05],
        }
    }

    /// Bytes written when the button comes back up, if the camera expects it
    pub fn release(&self) -> Option<&'static [u8]> {
        match self {
            RemoteCommand::FullShutter => Some(&[0x01, 0x08]),
            RemoteCommand::HalfShutter => Some(&[0x01, 0x06]),
            RemoteCommand::C1 => Some(&[0x01, 0x20]),
            RemoteCommand::AfOn => Some(&[0x01, 0x14]),
            RemoteCommand::Record => Some(&[0x01, 0x0E]),
            RemoteCommand::ZoomTele => Some(&[0x02, 0x6C, 0x00]),
            RemoteCommand::ZoomWide => Some(&[0x02, 0x6A, 0x00]),
            RemoteCommand::FocusNear => Some(&[0x02, 0x46, 0x00]),
            RemoteCommand::FocusFar => Some(&[0x02, 0x44, 0x00]),
            RemoteCommand::Probe => None,
        }
    }

    pub fn has_release(&self) -> bool {
        self.release().is_some()
    }

    /// Shutter-type commands surface "remote control disabled" to the user
    pub fn is_shutter(&self) -> bool {
        matches!(self, RemoteCommand::FullShutter | RemoteCommand::HalfShutter)
    }

    pub fn name(&self) -> &'static str {
        match self {
            RemoteCommand::FullShutter => "FULL_SHUTTER",
            RemoteCommand::HalfShutter => "HALF_SHUTTER",
            RemoteCommand::C1 => "C1",
            RemoteCommand::AfOn => "AF_ON",
            RemoteCommand::Record => "RECORD",
            RemoteCommand::ZoomTele => "ZOOM_TELE",
            RemoteCommand::ZoomWide => "ZOOM_WIDE",
            RemoteCommand::FocusNear => "FOCUS_NEAR",
            RemoteCommand::FocusFar => "FOCUS_FAR",
            RemoteCommand::Probe => "PROBE",
        }
    }
}

impl fmt::Display for RemoteCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("Unknown remote command: {0}")]
pub struct UnknownCommand(pub String);

impl FromStr for RemoteCommand {
    type Err = UnknownCommand;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let wanted = s.trim().to_ascii_uppercase().replace(['-', ' '], "_");
        RemoteCommand::ALL
            .iter()
            .copied()
            .find(|command| command.name() == wanted)
            .ok_or_else(|| UnknownCommand(s.to_string()))
    }
}
