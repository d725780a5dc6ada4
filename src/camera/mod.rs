//! Camera protocol support
//!
//! This module provides the protocol-level pieces of the camera link:
//! - BLE UUIDs and fixed payloads
//! - Location/time-sync frame encoding and write classification
//! - Remote control command codes
//! - Per-camera settings storage

pub mod constants;
pub mod types;
pub mod codec;
pub mod command;
pub mod settings_store;

// Re-export commonly used items
pub use codec::{FailureReason, GattStatus, WriteOutcome, WriteTarget};
pub use command::{RemoteCommand, Trigger};
pub use settings_store::{JsonSettingsStore, MemorySettingsStore, SettingsStore, StoreError};
pub use types::*;
