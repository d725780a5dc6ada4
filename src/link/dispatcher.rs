//! Remote command dispatch
//!
//! Turns a command intent into the ordered press and release writes. A
//! FULL_SHUTTER is wrapped in a HALF_SHUTTER press/release when the camera's
//! settings ask for it, so the camera focuses before it fires.

use std::time::Duration;
use thiserror::Error;

use crate::camera::command::{RemoteCommand, Trigger};
use crate::camera::types::{CameraSettings, DeviceAddress};
use crate::link::state::ConnectionState;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CommandError {
    #[error("Unknown camera {0}")]
    UnknownDevice(DeviceAddress),

    #[error("Camera {address} is not streaming (state: {state:?})")]
    NotStreaming { address: DeviceAddress, state: ConnectionState },

    #[error("{0} has no release sequence")]
    NoReleaseSequence(RemoteCommand),

    #[error("Camera manager is not running")]
    ManagerStopped,
}

/// Ordered writes for one command
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandPlan {
    pub command: RemoteCommand,

    /// Commands whose press bytes are written now, in order
    pub press: Vec<RemoteCommand>,

    /// Commands whose release bytes are written later, in order
    pub release: Vec<RemoteCommand>,

    /// When to write the release (taps only); None for holds and fire-and-forget commands
    pub release_after: Option<Duration>,
}

impl CommandPlan {
    /// Payloads of the press half
    pub fn press_frames(&self) -> Vec<&'static [u8]> {
        self.press.iter().map(|c| c.press()).collect()
    }

    /// Payloads of the release half
    pub fn release_frames(&self) -> Vec<&'static [u8]> {
        self.release.iter().filter_map(|c| c.release()).collect()
    }
}

/// Plans command writes for streaming cameras
#[derive(Debug, Clone, Copy)]
pub struct CommandDispatcher {
    release_delay: Duration,
}

impl CommandDispatcher {
    pub fn new(release_delay: Duration) -> Self {
        Self { release_delay }
    }

    pub fn release_delay(&self) -> Duration {
        self.release_delay
    }

    fn ensure_streaming(address: &DeviceAddress, state: ConnectionState) -> Result<(), CommandError> {
        if state == ConnectionState::Streaming {
            Ok(())
        } else {
            Err(CommandError::NotStreaming { address: address.clone(), state })
        }
    }

    fn wrapped(command: RemoteCommand, settings: &CameraSettings) -> bool {
        command == RemoteCommand::FullShutter && settings.enable_half_press
    }

    /// Plan a command issued by a tap or the start of a hold
    pub fn plan(
        &self,
        address: &DeviceAddress,
        command: RemoteCommand,
        trigger: Trigger,
        settings: &CameraSettings,
        state: ConnectionState,
    ) -> Result<CommandPlan, CommandError> {
        Self::ensure_streaming(address, state)?;

        let (press, release) = if Self::wrapped(command, settings) {
            (
                vec![RemoteCommand::HalfShutter, RemoteCommand::FullShutter],
                vec![RemoteCommand::FullShutter, RemoteCommand::HalfShutter],
            )
        } else if command.has_release() {
            (vec![command], vec![command])
        } else {
            (vec![command], Vec::new())
        };

        let release_after = match trigger {
            Trigger::Tap if !release.is_empty() => Some(self.release_delay),
            _ => None,
        };

        Ok(CommandPlan { command, press, release, release_after })
    }

    /// Release writes for the end of a hold
    pub fn release(
        &self,
        address: &DeviceAddress,
        command: RemoteCommand,
        settings: &CameraSettings,
        state: ConnectionState,
    ) -> Result<Vec<RemoteCommand>, CommandError> {
        if !command.has_release() {
            return Err(CommandError::NoReleaseSequence(command));
        }
        Self::ensure_streaming(address, state)?;

        if Self::wrapped(command, settings) {
            Ok(vec![RemoteCommand::FullShutter, RemoteCommand::HalfShutter])
        } else {
            Ok(vec![command])
        }
    }
}

impl Default for CommandDispatcher {
    fn default() -> Self {
        Self::new(Duration::from_millis(crate::camera::constants::DEFAULT_RELEASE_DELAY_MS))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cam() -> DeviceAddress {
        DeviceAddress::from("AA:BB:CC:DD:EE:FF")
    }

    fn no_half_press() -> CameraSettings {
        CameraSettings { enable_half_press: false, ..CameraSettings::default() }
    }

    #[test]
    fn test_tap_schedules_release() {
        let dispatcher = CommandDispatcher::new(Duration::from_millis(200));
        let plan = dispatcher
            .plan(&cam(), RemoteCommand::Record, Trigger::Tap, &no_half_press(), ConnectionState::Streaming)
            .unwrap();

        assert_eq!(plan.press_frames(), vec![&[0x01, 0x0F][..]]);
        assert_eq!(plan.release_frames(), vec![&[0x01, 0x0E][..]]);
        assert_eq!(plan.release_after, Some(Duration::from_millis(200)));
    }

    #[test]
    fn test_hold_leaves_release_to_caller() {
        let dispatcher = CommandDispatcher::default();
        let plan = dispatcher
            .plan(&cam(), RemoteCommand::ZoomTele, Trigger::Hold, &no_half_press(), ConnectionState::Streaming)
            .unwrap();

        assert_eq!(plan.press_frames(), vec![&[0x02, 0x6D, 0x20][..]]);
        assert_eq!(plan.release_after, None);

        let release = dispatcher
            .release(&cam(), RemoteCommand::ZoomTele, &no_half_press(), ConnectionState::Streaming)
            .unwrap();
        assert_eq!(release, vec![RemoteCommand::ZoomTele]);
    }

    #[test]
    fn test_probe_is_fire_and_forget() {
        let dispatcher = CommandDispatcher::default();
        let plan = dispatcher
            .plan(&cam(), RemoteCommand::Probe, Trigger::Tap, &CameraSettings::default(), ConnectionState::Streaming)
            .unwrap();

        assert!(plan.release.is_empty());
        assert_eq!(plan.release_after, None);
        assert_eq!(
            dispatcher.release(&cam(), RemoteCommand::Probe, &CameraSettings::default(), ConnectionState::Streaming),
            Err(CommandError::NoReleaseSequence(RemoteCommand::Probe))
        );
    }

    #[test]
    fn test_full_shutter_wrapped_in_half_press() {
        let dispatcher = CommandDispatcher::default();
        let plan = dispatcher
            .plan(
                &cam(),
                RemoteCommand::FullShutter,
                Trigger::Tap,
                &CameraSettings::default(),
                ConnectionState::Streaming,
            )
            .unwrap();

        assert_eq!(plan.press_frames(), vec![&[0x01, 0x07][..], &[0x01, 0x09][..]]);
        assert_eq!(plan.release_frames(), vec![&[0x01, 0x08][..], &[0x01, 0x06][..]]);
    }

    #[test]
    fn test_full_shutter_without_half_press() {
        let dispatcher = CommandDispatcher::default();
        let plan = dispatcher
            .plan(&cam(), RemoteCommand::FullShutter, Trigger::Tap, &no_half_press(), ConnectionState::Streaming)
            .unwrap();
        assert_eq!(plan.press, vec![RemoteCommand::FullShutter]);
    }

    #[test]
    fn test_rejected_unless_streaming() {
        let dispatcher = CommandDispatcher::default();
        for state in [ConnectionState::Idle, ConnectionState::Scanning, ConnectionState::EnablingUpdates] {
            let result =
                dispatcher.plan(&cam(), RemoteCommand::C1, Trigger::Tap, &CameraSettings::default(), state);
            assert_eq!(result, Err(CommandError::NotStreaming { address: cam(), state }));
        }
    }
}
