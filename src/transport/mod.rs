//! Transport abstraction for GATT links
//!
//! This module provides the interface the core uses to reach cameras. The
//! core never talks to a BLE stack directly: it submits operations through a
//! per-device `DeviceWorker` to a `GattTransport`, and receives unsolicited
//! events (scan hits, scanner failures, link drops) through the attached sink.

pub mod btle;
pub mod mock;
pub mod worker;

pub use btle::BtleplugTransport;
pub use mock::{MockOp, MockTransport};
pub use worker::{DeviceWorker, OpCompletion, OpResult, TransportOp};

use async_trait::async_trait;
use thiserror::Error;
use tokio::sync::mpsc::UnboundedSender;
use uuid::Uuid;

use crate::camera::codec::GattStatus;
use crate::camera::types::{DeviceAddress, ScanMode};

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("No Bluetooth adapters found")]
    NoAdapter,

    #[error("Device {0} not found")]
    DeviceNotFound(DeviceAddress),

    #[error("Device {0} is not connected")]
    NotConnected(DeviceAddress),

    #[error("Characteristic {0} not found")]
    CharacteristicMissing(Uuid),

    #[error("Bonding failed: {0}")]
    Bonding(String),

    #[error("Operation cancelled")]
    Cancelled,

    #[error("Bluetooth error: {0}")]
    Btle(#[from] ::btleplug::Error),
}

/// Result of a successful connect
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConnectInfo {
    /// Whether the device was already bonded when the link came up
    pub bonded: bool,
}

/// Unsolicited transport events
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportEvent {
    /// An address-filtered scan saw the device
    ScanHit(DeviceAddress),

    /// The scanner gave up on a running scan
    ScanFailed { address: DeviceAddress, reason: String },

    /// The link dropped without us asking
    Disconnected(DeviceAddress),
}

/// A GATT-capable transport provider
///
/// Every operation completes asynchronously; the core serializes operations
/// per device, so an implementation never sees two concurrent calls for the
/// same address.
#[async_trait]
pub trait GattTransport: Send + Sync + 'static {
    /// Install the sink unsolicited events are pushed to
    fn attach(&self, events: UnboundedSender<TransportEvent>);

    /// Start (or restart with a new mode) a scan filtered to one address
    async fn start_scan(&self, address: &DeviceAddress, mode: ScanMode) -> Result<(), TransportError>;

    /// Stop the scan filtered to one address
    async fn stop_scan(&self, address: &DeviceAddress) -> Result<(), TransportError>;

    /// Open a GATT link; with `auto_reconnect` the transport keeps trying until it succeeds
    async fn connect(&self, address: &DeviceAddress, auto_reconnect: bool) -> Result<ConnectInfo, TransportError>;

    /// Close the GATT link (no `Disconnected` event is emitted for it)
    async fn disconnect(&self, address: &DeviceAddress) -> Result<(), TransportError>;

    /// Pair with the device; resolves once bonding finished
    async fn create_bond(&self, address: &DeviceAddress) -> Result<(), TransportError>;

    /// Request a larger MTU; resolves with the MTU in effect
    async fn request_mtu(&self, address: &DeviceAddress, mtu: u16) -> Result<u16, TransportError>;

    /// Discover services and characteristics
    async fn discover_services(&self, address: &DeviceAddress) -> Result<(), TransportError>;

    /// Acknowledged write; resolves with the GATT status of the completion
    async fn write(
        &self,
        address: &DeviceAddress,
        characteristic: Uuid,
        payload: &[u8],
    ) -> Result<GattStatus, TransportError>;
}
