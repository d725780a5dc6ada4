//! Mock transport for testing.
//!
//! This transport records every operation instead of talking to a BLE stack,
//! and lets a test script the camera side: scan hits, link drops, bonding,
//! reachability and the GATT status of each write. Useful for exercising the
//! manager and the state machine without hardware.

use async_trait::async_trait;
use log::info;
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;
use tokio::sync::mpsc::UnboundedSender;
use tokio::time::Instant;
use uuid::Uuid;

use crate::camera::codec::GattStatus;
use crate::camera::types::{DeviceAddress, ScanMode};
use crate::transport::{ConnectInfo, GattTransport, TransportError, TransportEvent};

/// One recorded operation
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MockOp {
    StartScan { address: DeviceAddress, mode: ScanMode },
    StopScan { address: DeviceAddress },
    Connect { address: DeviceAddress, auto_reconnect: bool },
    Disconnect { address: DeviceAddress },
    CreateBond { address: DeviceAddress },
    RequestMtu { address: DeviceAddress, mtu: u16 },
    DiscoverServices { address: DeviceAddress },
    Write { address: DeviceAddress, characteristic: Uuid, payload: Vec<u8>, status: GattStatus },
}

impl MockOp {
    pub fn address(&self) -> &DeviceAddress {
        match self {
            MockOp::StartScan { address, .. }
            | MockOp::StopScan { address }
            | MockOp::Connect { address, .. }
            | MockOp::Disconnect { address }
            | MockOp::CreateBond { address }
            | MockOp::RequestMtu { address, .. }
            | MockOp::DiscoverServices { address }
            | MockOp::Write { address, .. } => address,
        }
    }
}

#[derive(Debug, Default)]
struct MockState {
    events: Option<UnboundedSender<TransportEvent>>,
    ops: Vec<(Instant, MockOp)>,
    advertising: HashSet<DeviceAddress>,
    unreachable: HashSet<DeviceAddress>,
    bonded: HashSet<DeviceAddress>,
    bond_failures: HashSet<DeviceAddress>,
    live: HashMap<DeviceAddress, u32>,
    max_live: HashMap<DeviceAddress, u32>,
    scripted: HashMap<Uuid, VecDeque<GattStatus>>,
    sticky: HashMap<Uuid, GattStatus>,
}

impl MockState {
    fn record(&mut self, op: MockOp) {
        self.ops.push((Instant::now(), op));
    }

    fn emit(&self, event: TransportEvent) {
        if let Some(events) = &self.events {
            let _ = events.send(event);
        }
    }
}

/// Scriptable in-memory transport
#[derive(Debug, Default)]
pub struct MockTransport {
    state: Mutex<MockState>,
}

impl MockTransport {
    /// Create a new mock transport.
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> MutexGuard<'_, MockState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    // ------------------------------------------------------------------
    // Scripting the camera side
    // ------------------------------------------------------------------

    /// The device answers every scan started for it with an immediate hit
    pub fn set_advertising(&self, address: &DeviceAddress, advertising: bool) {
        let mut state = self.state();
        if advertising {
            state.advertising.insert(address.clone());
        } else {
            state.advertising.remove(address);
        }
    }

    /// Deliver one scan hit now
    pub fn advertise(&self, address: &DeviceAddress) {
        info!("[MOCK BLE] advertisement from {}", address);
        self.state().emit(TransportEvent::ScanHit(address.clone()));
    }

    /// Report a scanner failure for a device
    pub fn fail_scan(&self, address: &DeviceAddress, reason: &str) {
        self.state().emit(TransportEvent::ScanFailed {
            address: address.clone(),
            reason: reason.to_string(),
        });
    }

    /// Drop the link from the camera side
    pub fn drop_link(&self, address: &DeviceAddress) {
        info!("[MOCK BLE] link to {} dropped", address);
        let mut state = self.state();
        if let Some(live) = state.live.get_mut(address) {
            *live = live.saturating_sub(1);
        }
        state.emit(TransportEvent::Disconnected(address.clone()));
    }

    /// Unreachable devices fail one-shot connects; auto-reconnect connects wait
    pub fn set_reachable(&self, address: &DeviceAddress, reachable: bool) {
        let mut state = self.state();
        if reachable {
            state.unreachable.remove(address);
        } else {
            state.unreachable.insert(address.clone());
        }
    }

    pub fn set_bonded(&self, address: &DeviceAddress, bonded: bool) {
        let mut state = self.state();
        if bonded {
            state.bonded.insert(address.clone());
        } else {
            state.bonded.remove(address);
        }
    }

    /// Make `create_bond` fail for a device
    pub fn fail_bonding(&self, address: &DeviceAddress) {
        self.state().bond_failures.insert(address.clone());
    }

    /// Queue statuses returned by the next writes to a characteristic
    pub fn script_writes(&self, characteristic: Uuid, statuses: impl IntoIterator<Item = GattStatus>) {
        self.state().scripted.entry(characteristic).or_default().extend(statuses);
    }

    /// Return this status for every write to a characteristic (after scripted ones)
    pub fn fail_writes(&self, characteristic: Uuid, status: GattStatus) {
        self.state().sticky.insert(characteristic, status);
    }

    pub fn clear_write_failures(&self, characteristic: Uuid) {
        let mut state = self.state();
        state.sticky.remove(&characteristic);
        state.scripted.remove(&characteristic);
    }

    // ------------------------------------------------------------------
    // Inspection
    // ------------------------------------------------------------------

    pub fn ops(&self) -> Vec<MockOp> {
        self.state().ops.iter().map(|(_, op)| op.clone()).collect()
    }

    pub fn timed_ops(&self) -> Vec<(Instant, MockOp)> {
        self.state().ops.clone()
    }

    pub fn ops_for(&self, address: &DeviceAddress) -> Vec<MockOp> {
        self.ops().into_iter().filter(|op| op.address() == address).collect()
    }

    /// Payloads written to a characteristic of a device, in order
    pub fn writes(&self, address: &DeviceAddress, characteristic: Uuid) -> Vec<Vec<u8>> {
        self.ops_for(address)
            .into_iter()
            .filter_map(|op| match op {
                MockOp::Write { characteristic: c, payload, .. } if c == characteristic => Some(payload),
                _ => None,
            })
            .collect()
    }

    pub fn count(&self, predicate: impl Fn(&MockOp) -> bool) -> usize {
        self.state().ops.iter().filter(|(_, op)| predicate(op)).count()
    }

    pub fn live_sessions(&self, address: &DeviceAddress) -> u32 {
        self.state().live.get(address).copied().unwrap_or(0)
    }

    /// Highest number of simultaneously live sessions ever seen for a device
    pub fn max_live_sessions(&self, address: &DeviceAddress) -> u32 {
        self.state().max_live.get(address).copied().unwrap_or(0)
    }

    pub fn clear_ops(&self) {
        self.state().ops.clear();
    }
}

#[async_trait]
impl GattTransport for MockTransport {
    fn attach(&self, events: UnboundedSender<TransportEvent>) {
        self.state().events = Some(events);
    }

    async fn start_scan(&self, address: &DeviceAddress, mode: ScanMode) -> Result<(), TransportError> {
        info!("[MOCK BLE] start scan for {} ({:?})", address, mode);
        let mut state = self.state();
        state.record(MockOp::StartScan { address: address.clone(), mode });
        if state.advertising.contains(address) {
            state.emit(TransportEvent::ScanHit(address.clone()));
        }
        Ok(())
    }

    async fn stop_scan(&self, address: &DeviceAddress) -> Result<(), TransportError> {
        info!("[MOCK BLE] stop scan for {}", address);
        self.state().record(MockOp::StopScan { address: address.clone() });
        Ok(())
    }

    async fn connect(&self, address: &DeviceAddress, auto_reconnect: bool) -> Result<ConnectInfo, TransportError> {
        info!("[MOCK BLE] connect {} (auto_reconnect: {})", address, auto_reconnect);
        self.state().record(MockOp::Connect { address: address.clone(), auto_reconnect });

        loop {
            {
                let mut state = self.state();
                if !state.unreachable.contains(address) {
                    let live = state.live.entry(address.clone()).or_insert(0);
                    *live += 1;
                    let live = *live;
                    let max = state.max_live.entry(address.clone()).or_insert(0);
                    *max = (*max).max(live);
                    return Ok(ConnectInfo { bonded: state.bonded.contains(address) });
                }
            }
            if !auto_reconnect {
                return Err(TransportError::DeviceNotFound(address.clone()));
            }
            tokio::time::sleep(Duration::from_secs(1)).await;
        }
    }

    async fn disconnect(&self, address: &DeviceAddress) -> Result<(), TransportError> {
        info!("[MOCK BLE] disconnect {}", address);
        let mut state = self.state();
        state.record(MockOp::Disconnect { address: address.clone() });
        if let Some(live) = state.live.get_mut(address) {
            *live = live.saturating_sub(1);
        }
        Ok(())
    }

    async fn create_bond(&self, address: &DeviceAddress) -> Result<(), TransportError> {
        info!("[MOCK BLE] bond {}", address);
        let mut state = self.state();
        state.record(MockOp::CreateBond { address: address.clone() });
        if state.bond_failures.contains(address) {
            return Err(TransportError::Bonding("rejected by device".into()));
        }
        state.bonded.insert(address.clone());
        Ok(())
    }

    async fn request_mtu(&self, address: &DeviceAddress, mtu: u16) -> Result<u16, TransportError> {
        self.state().record(MockOp::RequestMtu { address: address.clone(), mtu });
        Ok(mtu)
    }

    async fn discover_services(&self, address: &DeviceAddress) -> Result<(), TransportError> {
        self.state().record(MockOp::DiscoverServices { address: address.clone() });
        Ok(())
    }

    async fn write(
        &self,
        address: &DeviceAddress,
        characteristic: Uuid,
        payload: &[u8],
    ) -> Result<GattStatus, TransportError> {
        let mut state = self.state();
        let status = match state.scripted.get_mut(&characteristic).and_then(|queue| queue.pop_front()) {
            Some(status) => status,
            None => state.sticky.get(&characteristic).copied().unwrap_or(GattStatus::SUCCESS),
        };
        info!("[MOCK BLE] write {:02X?} to {} -> {}", payload, characteristic, status);
        state.record(MockOp::Write {
            address: address.clone(),
            characteristic,
            payload: payload.to_vec(),
            status,
        });
        Ok(status)
    }
}
