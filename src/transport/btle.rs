//! btleplug-backed transport
//!
//! Wraps the first Bluetooth adapter of the host. One adapter-wide scan is
//! shared by all cameras: it runs while at least one camera wants to be
//! scanned for, and the event pump turns advertisements of registered
//! addresses into scan hits. If the adapter's event stream ends, every pending
//! scan is reported as failed and the pump subscribes again. Pairing and MTU
//! are negotiated by the OS on the platforms btleplug supports, so links are
//! reported as bonded and MTU requests are accepted as-is.

use async_trait::async_trait;
use btleplug::api::{Central, CentralEvent, Manager as _, Peripheral as _, PeripheralProperties, ScanFilter, WriteType};
use btleplug::platform::{Adapter, Manager, Peripheral, PeripheralId};
use futures::stream::StreamExt;
use log::{debug, info, warn};
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::sync::mpsc::UnboundedSender;
use tokio::task::JoinHandle;
use uuid::Uuid;

use crate::camera::codec::GattStatus;
use crate::camera::constants::{
    COMMAND_CHARACTERISTIC_UUID, ENABLE_CHARACTERISTIC_UUID, LOCATION_CHARACTERISTIC_UUID,
    LOCATION_SERVICE_UUID, LOCK_CHARACTERISTIC_UUID, REMOTE_SERVICE_UUID, TIME_CHARACTERISTIC_UUID,
    TIME_SERVICE_UUID,
};
use crate::camera::types::{DeviceAddress, ScanMode};
use crate::transport::{ConnectInfo, GattTransport, TransportError, TransportEvent};

/// Delay between connect attempts of an auto-reconnecting session
const RECONNECT_INTERVAL: Duration = Duration::from_secs(2);

/// Delay before subscribing to adapter events again after the stream ended
const EVENT_STREAM_RETRY: Duration = Duration::from_secs(1);

/// (service, characteristic) pairs a camera must expose before the handshake can start
const REQUIRED_CHARACTERISTICS: [(Uuid, Uuid); 5] = [
    (LOCATION_SERVICE_UUID, LOCK_CHARACTERISTIC_UUID),
    (LOCATION_SERVICE_UUID, ENABLE_CHARACTERISTIC_UUID),
    (LOCATION_SERVICE_UUID, LOCATION_CHARACTERISTIC_UUID),
    (TIME_SERVICE_UUID, TIME_CHARACTERISTIC_UUID),
    (REMOTE_SERVICE_UUID, COMMAND_CHARACTERISTIC_UUID),
];

#[derive(Default)]
struct BtleState {
    events: Option<UnboundedSender<TransportEvent>>,
    /// Addresses currently scanned for (upper-case)
    scans: HashMap<String, ScanMode>,
    scanning: bool,
    peripherals: HashMap<DeviceAddress, Peripheral>,
    /// Disconnects we asked for; their `DeviceDisconnected` is not reported
    expected_disconnects: HashSet<String>,
}

/// Transport over the host's first BLE adapter
pub struct BtleplugTransport {
    adapter: Adapter,
    state: Arc<Mutex<BtleState>>,
    pump: JoinHandle<()>,
}

fn key(address: &DeviceAddress) -> String {
    address.as_str().to_ascii_uppercase()
}

fn lock(state: &Mutex<BtleState>) -> MutexGuard<'_, BtleState> {
    state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

impl BtleplugTransport {
    /// Open the first adapter and start pumping its events
    pub async fn new() -> Result<Self, TransportError> {
        let manager = Manager::new().await?;
        let adapter = manager
            .adapters()
            .await?
            .into_iter()
            .next()
            .ok_or(TransportError::NoAdapter)?;

        match adapter.adapter_info().await {
            Ok(info) => info!("Using Bluetooth adapter: {}", info),
            Err(e) => debug!("Adapter info unavailable: {}", e),
        }

        let state = Arc::new(Mutex::new(BtleState::default()));
        let mut events = adapter.events().await?;
        let pump_adapter = adapter.clone();
        let pump_state = Arc::clone(&state);

        let pump = tokio::spawn(async move {
            loop {
                while let Some(event) = events.next().await {
                    match event {
                        CentralEvent::DeviceDiscovered(id)
                        | CentralEvent::DeviceUpdated(id)
                        | CentralEvent::ManufacturerDataAdvertisement { id, .. } => {
                            if let Some(address) = address_of(&pump_adapter, &id).await {
                                let state = lock(&pump_state);
                                if state.scans.contains_key(&address) {
                                    debug!("Scan hit: {}", address);
                                    if let Some(sink) = &state.events {
                                        let _ = sink.send(TransportEvent::ScanHit(DeviceAddress::new(address)));
                                    }
                                }
                            }
                        }
                        CentralEvent::DeviceDisconnected(id) => {
                            if let Some(address) = address_of(&pump_adapter, &id).await {
                                let mut state = lock(&pump_state);
                                if state.expected_disconnects.remove(&address) {
                                    continue;
                                }
                                state.peripherals.remove(&DeviceAddress::new(address.clone()));
                                if let Some(sink) = &state.events {
                                    let _ = sink.send(TransportEvent::Disconnected(DeviceAddress::new(address)));
                                }
                            }
                        }
                        _ => {}
                    }
                }

                warn!("Bluetooth adapter event stream ended");
                fail_scans(&pump_state, "adapter event stream ended");
                tokio::time::sleep(EVENT_STREAM_RETRY).await;
                match pump_adapter.events().await {
                    Ok(stream) => events = stream,
                    Err(e) => warn!("Failed to resubscribe to adapter events: {}", e),
                }
            }
        });

        Ok(Self { adapter, state, pump })
    }

    async fn find_peripheral(&self, address: &DeviceAddress) -> Result<Peripheral, TransportError> {
        if let Some(peripheral) = lock(&self.state).peripherals.get(address) {
            return Ok(peripheral.clone());
        }

        let wanted = key(address);
        for peripheral in self.adapter.peripherals().await? {
            if peripheral.address().to_string().to_ascii_uppercase() == wanted {
                return Ok(peripheral);
            }
        }
        Err(TransportError::DeviceNotFound(address.clone()))
    }

    fn connected(&self, address: &DeviceAddress) -> Result<Peripheral, TransportError> {
        lock(&self.state)
            .peripherals
            .get(address)
            .cloned()
            .ok_or_else(|| TransportError::NotConnected(address.clone()))
    }

    async fn sync_adapter_scan(&self) -> Result<(), TransportError> {
        let (wanted, running) = {
            let state = lock(&self.state);
            (!state.scans.is_empty(), state.scanning)
        };

        if wanted && !running {
            self.adapter.start_scan(ScanFilter::default()).await?;
            lock(&self.state).scanning = true;
            debug!("Adapter scan started");
        } else if !wanted && running {
            self.adapter.stop_scan().await?;
            lock(&self.state).scanning = false;
            debug!("Adapter scan stopped");
        }
        Ok(())
    }
}

impl Drop for BtleplugTransport {
    fn drop(&mut self) {
        self.pump.abort();
    }
}

/// Drop every pending scan and tell the core each one failed
fn fail_scans(state: &Mutex<BtleState>, reason: &str) {
    let mut state = lock(state);
    state.scanning = false;
    let failed: Vec<String> = state.scans.drain().map(|(address, _)| address).collect();
    if let Some(sink) = &state.events {
        for address in failed {
            let _ = sink.send(TransportEvent::ScanFailed {
                address: DeviceAddress::new(address),
                reason: reason.to_string(),
            });
        }
    }
}

/// A cached peripheral counts as seen only while the adapter reports a signal for it
fn recently_heard(properties: Option<&PeripheralProperties>) -> bool {
    properties.is_some_and(|p| p.rssi.is_some())
}

/// First required (service, characteristic) pair missing from a discovered set
fn missing_characteristic(found: &HashSet<(Uuid, Uuid)>) -> Option<Uuid> {
    REQUIRED_CHARACTERISTICS
        .iter()
        .find(|pair| !found.contains(pair))
        .map(|(_, characteristic)| *characteristic)
}

/// ATT error code carried in a backend error message, when the backend reports one
fn att_status(message: &str) -> Option<GattStatus> {
    let lower = message.to_ascii_lowercase();
    let start = ["att error", "protocol error"].iter().find_map(|marker| lower.find(marker))?;
    let hex = lower[start..].split("0x").nth(1)?;
    let digits: String = hex.chars().take_while(|c| c.is_ascii_hexdigit()).take(2).collect();
    u8::from_str_radix(&digits, 16).ok().map(GattStatus).filter(|status| !status.is_success())
}

async fn address_of(adapter: &Adapter, id: &PeripheralId) -> Option<String> {
    let peripheral = adapter.peripheral(id).await.ok()?;
    Some(peripheral.address().to_string().to_ascii_uppercase())
}

#[async_trait]
impl GattTransport for BtleplugTransport {
    fn attach(&self, events: UnboundedSender<TransportEvent>) {
        lock(&self.state).events = Some(events);
    }

    async fn start_scan(&self, address: &DeviceAddress, mode: ScanMode) -> Result<(), TransportError> {
        // btleplug has no duty-cycle control; the mode only matters on platforms that expose one
        debug!("Scanning for {} ({:?})", address, mode);
        lock(&self.state).scans.insert(key(address), mode);
        if let Err(e) = self.sync_adapter_scan().await {
            lock(&self.state).scans.remove(&key(address));
            return Err(e);
        }

        // Already-known peripherals do not advertise a "discovered" event again,
        // but a stale cache entry (e.g. a paired camera that is off) has no RSSI
        if let Ok(peripheral) = self.find_peripheral(address).await {
            if recently_heard(peripheral.properties().await.ok().flatten().as_ref()) {
                if let Some(sink) = &lock(&self.state).events {
                    let _ = sink.send(TransportEvent::ScanHit(address.clone()));
                }
            }
        }
        Ok(())
    }

    async fn stop_scan(&self, address: &DeviceAddress) -> Result<(), TransportError> {
        lock(&self.state).scans.remove(&key(address));
        self.sync_adapter_scan().await
    }

    async fn connect(&self, address: &DeviceAddress, auto_reconnect: bool) -> Result<ConnectInfo, TransportError> {
        loop {
            let attempt = async {
                let peripheral = self.find_peripheral(address).await?;
                if !peripheral.is_connected().await? {
                    peripheral.connect().await?;
                }
                Ok::<_, TransportError>(peripheral)
            };

            match attempt.await {
                Ok(peripheral) => {
                    info!("✓ Connected to {}", address);
                    lock(&self.state).peripherals.insert(address.clone(), peripheral);
                    return Ok(ConnectInfo { bonded: true });
                }
                Err(e) if auto_reconnect => {
                    debug!("Connect to {} failed ({}), retrying in {:?}", address, e, RECONNECT_INTERVAL);
                    tokio::time::sleep(RECONNECT_INTERVAL).await;
                }
                Err(e) => return Err(e),
            }
        }
    }

    async fn disconnect(&self, address: &DeviceAddress) -> Result<(), TransportError> {
        let peripheral = {
            let mut state = lock(&self.state);
            let peripheral = state.peripherals.remove(address);
            if peripheral.is_some() {
                state.expected_disconnects.insert(key(address));
            }
            peripheral
        };

        if let Some(peripheral) = peripheral {
            info!("Disconnecting from {}...", address);
            peripheral.disconnect().await?;
        }
        Ok(())
    }

    async fn create_bond(&self, address: &DeviceAddress) -> Result<(), TransportError> {
        debug!("Bonding with {} is handled by the OS", address);
        Ok(())
    }

    async fn request_mtu(&self, address: &DeviceAddress, mtu: u16) -> Result<u16, TransportError> {
        debug!("MTU for {} is negotiated by the OS (requested {})", address, mtu);
        Ok(mtu)
    }

    async fn discover_services(&self, address: &DeviceAddress) -> Result<(), TransportError> {
        let peripheral = self.connected(address)?;
        info!("Discovering services of {}...", address);
        peripheral.discover_services().await?;

        let found: HashSet<(Uuid, Uuid)> =
            peripheral.characteristics().iter().map(|c| (c.service_uuid, c.uuid)).collect();
        if let Some(uuid) = missing_characteristic(&found) {
            return Err(TransportError::CharacteristicMissing(uuid));
        }
        debug!("Found all camera characteristics on {}", address);
        Ok(())
    }

    /// btleplug reports a rejected write as an error rather than a status. The
    /// ATT code is recovered from the error text where the backend includes it
    /// (BlueZ does); otherwise the write fails and the core sees a generic error.
    async fn write(
        &self,
        address: &DeviceAddress,
        characteristic: Uuid,
        payload: &[u8],
    ) -> Result<GattStatus, TransportError> {
        let peripheral = self.connected(address)?;
        let target = peripheral
            .characteristics()
            .into_iter()
            .find(|c| c.uuid == characteristic)
            .ok_or(TransportError::CharacteristicMissing(characteristic))?;

        match peripheral.write(&target, payload, WriteType::WithResponse).await {
            Ok(()) => Ok(GattStatus::SUCCESS),
            Err(e) => match att_status(&e.to_string()) {
                Some(status) => {
                    debug!("Write to {} on {} rejected with {}", characteristic, address, status);
                    Ok(status)
                }
                None => Err(e.into()),
            },
        }
    }
}
