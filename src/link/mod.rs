//! Per-device link core
//!
//! This module provides everything that drives one camera from discovery to
//! streaming:
//! - Connection state machine and retry policy
//! - Scan policy (strategy and quick-connect window)
//! - Cancelable timers
//! - Connection registry
//! - Location streaming and remote command dispatch
//! - Log journal

pub mod dispatcher;
pub mod journal;
pub mod policy;
pub mod registry;
pub mod state;
pub mod streamer;
pub mod timer;

// Re-export commonly used items
pub use dispatcher::{CommandDispatcher, CommandError, CommandPlan};
pub use journal::{Journal, LogLine};
pub use policy::{DiscoveryPlan, ScanPolicyEngine};
pub use registry::{CameraConnection, ConnectionRegistry, RegistryError};
pub use state::{
    ConnectionState, ConnectionStateMachine, Effect, HandshakePolicy, HandshakeStage, LinkEvent, LinkTimings,
    RetryPolicy,
};
pub use streamer::{LocationFeed, LocationStreamer};
pub use timer::{TimerFired, TimerHandle, TimerKind, TimerSet};

use thiserror::Error;

/// Conditions surfaced to the user of a link; everything else recovers locally
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum LinkError {
    #[error("Handshake abandoned: {stage:?} write kept failing")]
    HandshakeExhausted { stage: HandshakeStage },

    #[error("Shutter failed: remote control is disabled on the camera")]
    RemoteControlDisabled,
}
