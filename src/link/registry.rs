//! Connection registry
//!
//! The registry owns one `CameraConnection` per known camera, keyed by device
//! address. A connection exclusively owns its GATT session, its timers and
//! its operation worker; removing it from the registry drops all three.

use chrono::{DateTime, Utc};
use log::debug;
use std::collections::HashMap;
use thiserror::Error;
use tokio_util::sync::CancellationToken;

use crate::camera::command::RemoteCommand;
use crate::camera::types::{CameraSettings, DeviceAddress};
use crate::link::policy::ScanPolicyEngine;
use crate::link::state::{ConnectionState, ConnectionStateMachine};
use crate::link::timer::TimerSet;
use crate::transport::{DeviceWorker, TransportOp};

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RegistryError {
    #[error("Camera {0} is already registered")]
    Duplicate(DeviceAddress),

    #[error("Camera {0} already has an open session")]
    SessionOpen(DeviceAddress),
}

/// A GATT link (or a pending attempt at one)
#[derive(Debug)]
struct GattSession {
    /// Epoch the session was opened under
    opened_at: u64,
    cancel: CancellationToken,
}

/// Everything the core tracks for one camera
#[derive(Debug)]
pub struct CameraConnection {
    pub address: DeviceAddress,
    pub name: Option<String>,
    pub settings: CameraSettings,
    pub machine: ConnectionStateMachine,
    pub last_disconnect_at: Option<DateTime<Utc>>,
    pub timers: TimerSet,
    /// Release writes waiting on a tap's release timer, by serial
    pub pending_releases: HashMap<u64, Vec<RemoteCommand>>,
    quick_connect_deadline: Option<DateTime<Utc>>,
    session: Option<GattSession>,
    epoch: u64,
    release_serial: u64,
    worker: DeviceWorker,
}

impl CameraConnection {
    pub fn new(
        address: DeviceAddress,
        name: Option<String>,
        settings: CameraSettings,
        last_disconnect_at: Option<DateTime<Utc>>,
        machine: ConnectionStateMachine,
        timers: TimerSet,
        worker: DeviceWorker,
    ) -> Self {
        let mut connection = Self {
            address,
            name,
            settings,
            machine,
            last_disconnect_at,
            timers,
            pending_releases: HashMap::new(),
            quick_connect_deadline: None,
            session: None,
            epoch: 0,
            release_serial: 0,
            worker,
        };
        connection.refresh_deadline(&ScanPolicyEngine::new());
        connection
    }

    pub fn state(&self) -> ConnectionState {
        self.machine.state()
    }

    pub fn label(&self) -> &str {
        self.name.as_deref().unwrap_or_else(|| self.address.as_str())
    }

    /// Epoch completions must carry to be accepted
    pub fn epoch(&self) -> u64 {
        self.epoch
    }

    pub fn has_session(&self) -> bool {
        self.session.is_some()
    }

    pub fn quick_connect_deadline(&self) -> Option<DateTime<Utc>> {
        self.quick_connect_deadline
    }

    /// Recompute the quick-connect deadline after settings or the disconnect time changed
    pub fn refresh_deadline(&mut self, policy: &ScanPolicyEngine) {
        self.quick_connect_deadline = policy.quick_connect_deadline(&self.settings, self.last_disconnect_at);
    }

    pub fn update_settings(&mut self, settings: CameraSettings, policy: &ScanPolicyEngine) {
        self.settings = settings;
        self.refresh_deadline(policy);
    }

    pub fn record_disconnect(&mut self, at: DateTime<Utc>, policy: &ScanPolicyEngine) {
        self.last_disconnect_at = Some(at);
        self.refresh_deadline(policy);
    }

    /// Queue an operation under the current epoch
    pub fn submit(&self, op: TransportOp) {
        self.worker.submit(self.epoch, op);
    }

    /// Open a session; the previous one must have been closed
    pub fn open_session(&mut self, auto_reconnect: bool) -> Result<u64, RegistryError> {
        if self.session.is_some() {
            return Err(RegistryError::SessionOpen(self.address.clone()));
        }

        self.epoch += 1;
        let cancel = CancellationToken::new();
        debug!("[{}] open session (epoch {})", self.address, self.epoch);
        self.worker.submit(
            self.epoch,
            TransportOp::Connect { auto_reconnect, cancel: cancel.clone() },
        );
        self.session = Some(GattSession { opened_at: self.epoch, cancel });
        Ok(self.epoch)
    }

    /// Close the session if there is one; completions of it become stale
    pub fn close_session(&mut self) -> bool {
        let Some(session) = self.session.take() else {
            return false;
        };

        session.cancel.cancel();
        self.epoch += 1;
        debug!("[{}] close session (epoch {} -> {})", self.address, session.opened_at, self.epoch);
        self.worker.submit(self.epoch, TransportOp::Disconnect);
        true
    }

    /// Next serial for a tap's release timer
    pub fn next_release_serial(&mut self) -> u64 {
        self.release_serial += 1;
        self.release_serial
    }

    /// Cancel every timer and forget pending releases
    pub fn clear_timers(&mut self) {
        self.timers.cancel_all();
        self.pending_releases.clear();
    }
}

/// Ownership table of all known cameras
#[derive(Debug, Default)]
pub struct ConnectionRegistry {
    connections: HashMap<DeviceAddress, CameraConnection>,
}

impl ConnectionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, connection: CameraConnection) -> Result<(), RegistryError> {
        if self.connections.contains_key(&connection.address) {
            return Err(RegistryError::Duplicate(connection.address.clone()));
        }
        self.connections.insert(connection.address.clone(), connection);
        Ok(())
    }

    pub fn get(&self, address: &DeviceAddress) -> Option<&CameraConnection> {
        self.connections.get(address)
    }

    pub fn get_mut(&mut self, address: &DeviceAddress) -> Option<&mut CameraConnection> {
        self.connections.get_mut(address)
    }

    pub fn contains(&self, address: &DeviceAddress) -> bool {
        self.connections.contains_key(address)
    }

    pub fn remove(&mut self, address: &DeviceAddress) -> Option<CameraConnection> {
        self.connections.remove(address)
    }

    /// Registered addresses, sorted
    pub fn addresses(&self) -> Vec<DeviceAddress> {
        let mut addresses: Vec<_> = self.connections.keys().cloned().collect();
        addresses.sort();
        addresses
    }

    pub fn iter(&self) -> impl Iterator<Item = &CameraConnection> {
        self.connections.values()
    }

    pub fn len(&self) -> usize {
        self.connections.len()
    }

    pub fn is_empty(&self) -> bool {
        self.connections.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::link::state::{HandshakePolicy, LinkTimings, RetryPolicy};
    use crate::transport::{MockOp, MockTransport, OpCompletion, OpResult};
    use std::sync::Arc;
    use std::time::Duration;
    use tokio::sync::mpsc;

    fn connection(
        address: &DeviceAddress,
        transport: Arc<MockTransport>,
    ) -> (CameraConnection, mpsc::UnboundedReceiver<OpCompletion>) {
        let (done_tx, done_rx) = mpsc::unbounded_channel();
        let (timer_tx, _timer_rx) = mpsc::unbounded_channel();
        let machine = ConnectionStateMachine::new(
            HandshakePolicy::uniform(RetryPolicy::new(3, Duration::from_millis(500))),
            LinkTimings {
                rescan_delay: Duration::from_secs(5),
                scan_retry_delay: Duration::from_secs(10),
                stream_start_delay: Duration::from_secs(1),
                location_interval: Duration::from_secs(10),
                mtu: 517,
            },
        );
        let connection = CameraConnection::new(
            address.clone(),
            Some("A7 IV".into()),
            CameraSettings::default(),
            None,
            machine,
            TimerSet::new(address.clone(), timer_tx),
            DeviceWorker::spawn(address.clone(), transport, done_tx),
        );
        (connection, done_rx)
    }

    #[tokio::test]
    async fn test_one_session_at_a_time() {
        let transport = Arc::new(MockTransport::new());
        let address = DeviceAddress::from("AA:BB:CC:DD:EE:FF");
        let (mut conn, mut done) = connection(&address, transport.clone());

        let first = conn.open_session(false).unwrap();
        assert_eq!(conn.open_session(false), Err(RegistryError::SessionOpen(address.clone())));

        assert!(conn.close_session());
        assert!(!conn.close_session());
        let second = conn.open_session(false).unwrap();
        assert!(second > first);

        // connect, disconnect, connect
        let mut epochs = Vec::new();
        for _ in 0..3 {
            epochs.push(done.recv().await.unwrap().epoch);
        }
        assert_eq!(epochs, vec![first, first + 1, second]);
        assert_eq!(transport.live_sessions(&address), 1);
        assert_eq!(transport.max_live_sessions(&address), 1);
    }

    #[tokio::test]
    async fn test_close_cancels_pending_connect() {
        let transport = Arc::new(MockTransport::new());
        let address = DeviceAddress::from("AA:BB:CC:DD:EE:FF");
        transport.set_reachable(&address, false);
        let (mut conn, mut done) = connection(&address, transport.clone());

        conn.open_session(true).unwrap();
        conn.close_session();

        let completion = done.recv().await.unwrap();
        assert!(matches!(completion.result, OpResult::Connected(Err(_))));
        assert!(matches!(done.recv().await.unwrap().result, OpResult::Disconnected));
        assert_eq!(transport.max_live_sessions(&address), 0);
    }

    #[tokio::test]
    async fn test_registry_rejects_duplicates() {
        let transport = Arc::new(MockTransport::new());
        let address = DeviceAddress::from("AA:BB:CC:DD:EE:FF");
        let mut registry = ConnectionRegistry::new();

        registry.insert(connection(&address, transport.clone()).0).unwrap();
        let duplicate = registry.insert(connection(&address, transport.clone()).0);
        assert_eq!(duplicate, Err(RegistryError::Duplicate(address.clone())));

        registry.insert(connection(&DeviceAddress::from("11:22"), transport).0).unwrap();
        assert_eq!(registry.len(), 2);
        assert_eq!(registry.addresses()[0], DeviceAddress::from("11:22"));
        assert_eq!(registry.get(&address).map(|c| c.label()), Some("A7 IV"));

        assert!(registry.remove(&address).is_some());
        assert!(!registry.contains(&address));
    }

    #[tokio::test]
    async fn test_deadline_follows_settings() {
        let transport = Arc::new(MockTransport::new());
        let address = DeviceAddress::from("AA:BB:CC:DD:EE:FF");
        let (mut conn, _done) = connection(&address, transport);
        let policy = ScanPolicyEngine::new();
        let at = Utc::now();

        conn.record_disconnect(at, &policy);
        assert_eq!(conn.quick_connect_deadline(), None);

        let quick = CameraSettings { quick_connect_enabled: true, quick_connect_minutes: 5, ..conn.settings.clone() };
        conn.update_settings(quick, &policy);
        assert_eq!(conn.quick_connect_deadline(), Some(at + chrono::Duration::minutes(5)));
    }

    #[tokio::test]
    async fn test_submit_uses_current_epoch() {
        let transport = Arc::new(MockTransport::new());
        let address = DeviceAddress::from("AA:BB:CC:DD:EE:FF");
        let (conn, mut done) = connection(&address, transport.clone());

        conn.submit(TransportOp::StopScan);
        let completion = done.recv().await.unwrap();
        assert_eq!(completion.epoch, conn.epoch());
        assert_eq!(transport.ops(), vec![MockOp::StopScan { address }]);
    }
}
