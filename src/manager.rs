//! High-level camera manager
//!
//! This module provides the public entry points (`connect`, `forget`,
//! `send_command`, `settings_changed`) and the event loop behind them. The
//! loop is the only place connection state changes: manager commands, timer
//! firings, transport completions and transport events are all serialized
//! through one `tokio::select!`, fed to the per-device state machine, and the
//! returned effects are executed here.

use chrono::Utc;
use crossbeam_channel::{bounded, Receiver, Sender, TrySendError};
use log::{debug, info, trace, warn};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};
use tokio::sync::oneshot;
use tokio::task::JoinHandle;

use crate::camera::codec::{
    classify_write, encode_enable, encode_lock, encode_time_sync, FailureReason, WriteOutcome, WriteTarget,
};
use crate::camera::command::{RemoteCommand, Trigger};
use crate::camera::settings_store::SettingsStore;
use crate::camera::types::{CameraSettings, ConnectionStatus, DeviceAddress, ZoneOffsets};
use crate::link::dispatcher::{CommandDispatcher, CommandError};
use crate::link::journal::Journal;
use crate::link::policy::ScanPolicyEngine;
use crate::link::registry::{CameraConnection, ConnectionRegistry};
use crate::link::state::{
    ConnectionState, ConnectionStateMachine, Effect, HandshakePolicy, HandshakeStage, LinkEvent, LinkTimings,
    RetryPolicy,
};
use crate::link::streamer::{LocationFeed, LocationStreamer};
use crate::link::timer::{TimerFired, TimerKind, TimerSet};
use crate::link::LinkError;
use crate::transport::{DeviceWorker, GattTransport, OpCompletion, OpResult, TransportError, TransportEvent, TransportOp};

/// Events surfaced to the UI side
#[derive(Debug, Clone, PartialEq)]
pub enum CameraEvent {
    /// Connection status changed
    Status {
        address: DeviceAddress,
        status: ConnectionStatus,
        detail: String,
    },

    /// A shutter write was refused because remote control is off on the camera
    RemoteControlDisabled { address: DeviceAddress },

    /// Handshake writes kept failing; the camera goes back to discovery
    HandshakeAbandoned { address: DeviceAddress, stage: HandshakeStage },

    /// The camera was forgotten
    Removed { address: DeviceAddress },
}

/// Tunables of the manager and the links it drives
#[derive(Debug, Clone, PartialEq)]
pub struct ManagerOptions {
    pub handshake: HandshakePolicy,
    pub timings: LinkTimings,
    pub release_delay: Duration,
    /// Fixed zone for time sync and location frames; None follows the host
    pub zone: Option<ZoneOffsets>,
    pub journal_capacity: usize,
}

impl Default for ManagerOptions {
    fn default() -> Self {
        use crate::camera::constants::*;

        Self {
            handshake: HandshakePolicy::uniform(RetryPolicy::new(
                DEFAULT_MAX_RETRIES,
                Duration::from_millis(DEFAULT_RETRY_BASE_MS),
            )),
            timings: LinkTimings {
                rescan_delay: Duration::from_millis(DEFAULT_RESCAN_DELAY_MS),
                scan_retry_delay: Duration::from_millis(DEFAULT_SCAN_RETRY_DELAY_MS),
                stream_start_delay: Duration::from_millis(DEFAULT_STREAM_START_DELAY_MS),
                location_interval: Duration::from_millis(DEFAULT_LOCATION_INTERVAL_MS),
                mtu: DEFAULT_MTU,
            },
            release_delay: Duration::from_millis(DEFAULT_RELEASE_DELAY_MS),
            zone: None,
            journal_capacity: DEFAULT_JOURNAL_CAPACITY,
        }
    }
}

enum ManagerCommand {
    Connect {
        address: DeviceAddress,
        name: Option<String>,
        settings: Option<CameraSettings>,
    },
    Forget {
        address: DeviceAddress,
        reply: oneshot::Sender<Result<(), CommandError>>,
    },
    Send {
        address: DeviceAddress,
        command: RemoteCommand,
        trigger: Trigger,
        reply: oneshot::Sender<Result<(), CommandError>>,
    },
    Release {
        address: DeviceAddress,
        command: RemoteCommand,
        reply: oneshot::Sender<Result<(), CommandError>>,
    },
    SettingsChanged {
        address: DeviceAddress,
    },
    Snapshot {
        reply: oneshot::Sender<Vec<(DeviceAddress, ConnectionState)>>,
    },
    Stop {
        reply: oneshot::Sender<()>,
    },
}

/// Manager for camera links
pub struct CameraManager {
    transport: Arc<dyn GattTransport>,
    store: Arc<dyn SettingsStore>,
    feed: LocationFeed,
    options: ManagerOptions,
    journal: Journal,
    event_sender: Sender<CameraEvent>,
    event_receiver: Receiver<CameraEvent>,
    commands: Option<UnboundedSender<ManagerCommand>>,
    /// Running flag
    running: Arc<AtomicBool>,
    task: Option<JoinHandle<()>>,
}

impl CameraManager {
    /// Create a new manager; nothing runs until `start`
    pub fn new(
        transport: Arc<dyn GattTransport>,
        store: Arc<dyn SettingsStore>,
        feed: LocationFeed,
        options: ManagerOptions,
    ) -> Self {
        let (event_sender, event_receiver) = bounded(256);
        let journal = Journal::new(options.journal_capacity);

        Self {
            transport,
            store,
            feed,
            options,
            journal,
            event_sender,
            event_receiver,
            commands: None,
            running: Arc::new(AtomicBool::new(false)),
            task: None,
        }
    }

    /// Spawn the event loop on the current tokio runtime
    pub fn start(&mut self) {
        if self.running.load(Ordering::SeqCst) {
            warn!("Camera manager is already running");
            return;
        }

        let (command_tx, command_rx) = mpsc::unbounded_channel();
        let (timer_tx, timer_rx) = mpsc::unbounded_channel();
        let (completion_tx, completion_rx) = mpsc::unbounded_channel();
        let (transport_tx, transport_rx) = mpsc::unbounded_channel();
        self.transport.attach(transport_tx);

        let event_loop = EventLoop {
            registry: ConnectionRegistry::new(),
            transport: Arc::clone(&self.transport),
            store: Arc::clone(&self.store),
            policy: ScanPolicyEngine::new(),
            streamer: LocationStreamer::new(self.feed.clone(), self.options.zone),
            dispatcher: CommandDispatcher::new(self.options.release_delay),
            journal: self.journal.clone(),
            events: self.event_sender.clone(),
            handshake: self.options.handshake,
            timings: self.options.timings,
            timer_tx,
            completion_tx,
        };

        self.running.store(true, Ordering::SeqCst);
        let running = Arc::clone(&self.running);
        self.task = Some(tokio::spawn(async move {
            event_loop.run(command_rx, timer_rx, completion_rx, transport_rx).await;
            running.store(false, Ordering::SeqCst);
        }));
        self.commands = Some(command_tx);

        info!("✓ Camera manager started");
    }

    fn send(&self, command: ManagerCommand) -> Result<(), CommandError> {
        self.commands
            .as_ref()
            .ok_or(CommandError::ManagerStopped)?
            .send(command)
            .map_err(|_| CommandError::ManagerStopped)
    }

    async fn request<T>(
        &self,
        build: impl FnOnce(oneshot::Sender<T>) -> ManagerCommand,
    ) -> Result<T, CommandError> {
        let (reply, response) = oneshot::channel();
        self.send(build(reply))?;
        response.await.map_err(|_| CommandError::ManagerStopped)
    }

    /// Register a camera (settings from the store) and start looking for it
    pub fn connect(&self, address: impl Into<DeviceAddress>, name: Option<String>) -> Result<(), CommandError> {
        self.send(ManagerCommand::Connect { address: address.into(), name, settings: None })
    }

    /// Register a camera with explicit settings, which are written to the store
    pub fn connect_with_settings(
        &self,
        address: impl Into<DeviceAddress>,
        name: Option<String>,
        settings: CameraSettings,
    ) -> Result<(), CommandError> {
        self.send(ManagerCommand::Connect { address: address.into(), name, settings: Some(settings) })
    }

    /// Stop scanning for a camera, close its link and drop it
    pub async fn forget(&self, address: impl Into<DeviceAddress>) -> Result<(), CommandError> {
        let address = address.into();
        self.request(|reply| ManagerCommand::Forget { address, reply }).await?
    }

    /// Write a remote command to a streaming camera
    pub async fn send_command(
        &self,
        address: impl Into<DeviceAddress>,
        command: RemoteCommand,
        trigger: Trigger,
    ) -> Result<(), CommandError> {
        let address = address.into();
        self.request(|reply| ManagerCommand::Send { address, command, trigger, reply }).await?
    }

    /// End a held command
    pub async fn release_command(
        &self,
        address: impl Into<DeviceAddress>,
        command: RemoteCommand,
    ) -> Result<(), CommandError> {
        let address = address.into();
        self.request(|reply| ManagerCommand::Release { address, command, reply }).await?
    }

    /// Re-read a camera's settings from the store
    pub fn settings_changed(&self, address: impl Into<DeviceAddress>) -> Result<(), CommandError> {
        self.send(ManagerCommand::SettingsChanged { address: address.into() })
    }

    /// Write new settings to the store and apply them
    pub fn update_settings(
        &self,
        address: impl Into<DeviceAddress>,
        settings: CameraSettings,
    ) -> Result<(), CommandError> {
        let address = address.into();
        if let Err(e) = self.store.update_settings(&address, settings) {
            self.journal.warn(&address, format!("Failed to store settings: {}", e));
        }
        self.settings_changed(address)
    }

    /// State of every registered camera, sorted by address
    pub async fn snapshot(&self) -> Result<Vec<(DeviceAddress, ConnectionState)>, CommandError> {
        self.request(|reply| ManagerCommand::Snapshot { reply }).await
    }

    /// Get a receiver for camera events
    pub fn events(&self) -> Receiver<CameraEvent> {
        self.event_receiver.clone()
    }

    pub fn journal(&self) -> Journal {
        self.journal.clone()
    }

    pub fn location_feed(&self) -> &LocationFeed {
        &self.feed
    }

    /// Tear every link down and stop the event loop
    pub async fn stop(&mut self) {
        if let Ok(()) = self.request(|reply| ManagerCommand::Stop { reply }).await {
            info!("Camera manager stopped");
        }
        self.commands = None;
        if let Some(task) = self.task.take() {
            let _ = task.await;
        }
        self.running.store(false, Ordering::SeqCst);
    }

    /// Check if manager is running
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }
}

impl Drop for CameraManager {
    fn drop(&mut self) {
        // Closing the command channel lets the loop tear down on its own
        self.commands = None;
    }
}

struct EventLoop {
    registry: ConnectionRegistry,
    transport: Arc<dyn GattTransport>,
    store: Arc<dyn SettingsStore>,
    policy: ScanPolicyEngine,
    streamer: LocationStreamer,
    dispatcher: CommandDispatcher,
    journal: Journal,
    events: Sender<CameraEvent>,
    handshake: HandshakePolicy,
    timings: LinkTimings,
    timer_tx: UnboundedSender<TimerFired>,
    completion_tx: UnboundedSender<OpCompletion>,
}

impl EventLoop {
    async fn run(
        mut self,
        mut commands: UnboundedReceiver<ManagerCommand>,
        mut timers: UnboundedReceiver<TimerFired>,
        mut completions: UnboundedReceiver<OpCompletion>,
        mut transport_events: UnboundedReceiver<TransportEvent>,
    ) {
        debug!("Event loop started");
        loop {
            tokio::select! {
                command = commands.recv() => match command {
                    Some(ManagerCommand::Stop { reply }) => {
                        self.shutdown().await;
                        let _ = reply.send(());
                        break;
                    }
                    Some(command) => self.on_command(command).await,
                    None => {
                        self.shutdown().await;
                        break;
                    }
                },
                Some(fired) = timers.recv() => self.on_timer(fired),
                Some(completion) = completions.recv() => self.on_completion(completion),
                Some(event) = transport_events.recv() => self.on_transport_event(event),
            }
        }
        debug!("Event loop stopped");
    }

    fn emit(&self, event: CameraEvent) {
        if let Err(TrySendError::Full(event)) = self.events.try_send(event) {
            debug!("Event queue full, dropping {:?}", event);
        }
    }

    // ------------------------------------------------------------------
    // Manager commands
    // ------------------------------------------------------------------

    async fn on_command(&mut self, command: ManagerCommand) {
        match command {
            ManagerCommand::Connect { address, name, settings } => self.register(address, name, settings),
            ManagerCommand::Forget { address, reply } => {
                let result = self.forget(&address).await;
                let _ = reply.send(result);
            }
            ManagerCommand::Send { address, command, trigger, reply } => {
                let result = self.send_command(&address, command, trigger);
                if let Err(e) = &result {
                    self.journal.warn(&address, format!("Rejected {}: {}", command, e));
                }
                let _ = reply.send(result);
            }
            ManagerCommand::Release { address, command, reply } => {
                let result = self.release_command(&address, command);
                if let Err(e) = &result {
                    self.journal.warn(&address, format!("Rejected release of {}: {}", command, e));
                }
                let _ = reply.send(result);
            }
            ManagerCommand::SettingsChanged { address } => self.settings_changed(&address),
            ManagerCommand::Snapshot { reply } => {
                let snapshot = self
                    .registry
                    .addresses()
                    .into_iter()
                    .filter_map(|address| {
                        let state = self.registry.get(&address)?.state();
                        Some((address, state))
                    })
                    .collect();
                let _ = reply.send(snapshot);
            }
            // Handled by the loop itself
            ManagerCommand::Stop { .. } => {}
        }
    }

    fn register(&mut self, address: DeviceAddress, name: Option<String>, settings: Option<CameraSettings>) {
        if self.registry.contains(&address) {
            self.journal.debug(&address, "Already registered");
            return;
        }

        let settings = match settings {
            Some(settings) => {
                if let Err(e) = self.store.update_settings(&address, settings.clone()) {
                    self.journal.warn(&address, format!("Failed to store settings: {}", e));
                }
                settings
            }
            None => self.store.settings(&address).unwrap_or_default(),
        };

        let connection = CameraConnection::new(
            address.clone(),
            name,
            settings,
            self.store.last_disconnect(&address),
            ConnectionStateMachine::new(self.handshake, self.timings),
            TimerSet::new(address.clone(), self.timer_tx.clone()),
            DeviceWorker::spawn(address.clone(), Arc::clone(&self.transport), self.completion_tx.clone()),
        );
        self.journal.info(&address, format!("Registered {}", connection.label()));

        let plan = self
            .policy
            .plan(&connection.settings, connection.last_disconnect_at, Utc::now());
        if let Err(e) = self.registry.insert(connection) {
            self.journal.warn(&address, e.to_string());
            return;
        }
        self.dispatch(&address, LinkEvent::BeginDiscovery(plan));
    }

    async fn forget(&mut self, address: &DeviceAddress) -> Result<(), CommandError> {
        let mut connection = self
            .registry
            .remove(address)
            .ok_or_else(|| CommandError::UnknownDevice(address.clone()))?;

        connection.clear_timers();
        let had_session = connection.close_session();
        // Pending worker ops are aborted; the teardown below runs directly
        drop(connection);

        if let Err(e) = self.transport.stop_scan(address).await {
            debug!("[{}] stop scan failed: {}", address, e);
        }
        if had_session {
            if let Err(e) = self.transport.disconnect(address).await {
                debug!("[{}] disconnect failed: {}", address, e);
            }
        }
        if let Err(e) = self.store.forget(address) {
            self.journal.warn(address, format!("Failed to forget stored settings: {}", e));
        }

        self.journal.info(address, "Forgotten");
        self.emit(CameraEvent::Removed { address: address.clone() });
        Ok(())
    }

    async fn shutdown(&mut self) {
        for address in self.registry.addresses() {
            let Some(mut connection) = self.registry.remove(&address) else {
                continue;
            };
            connection.clear_timers();
            let had_session = connection.close_session();
            drop(connection);

            let _ = self.transport.stop_scan(&address).await;
            if had_session {
                let _ = self.transport.disconnect(&address).await;
            }
            debug!("[{}] torn down", address);
        }
    }

    fn send_command(
        &mut self,
        address: &DeviceAddress,
        command: RemoteCommand,
        trigger: Trigger,
    ) -> Result<(), CommandError> {
        let connection = self
            .registry
            .get_mut(address)
            .ok_or_else(|| CommandError::UnknownDevice(address.clone()))?;
        let plan = self
            .dispatcher
            .plan(address, command, trigger, &connection.settings, connection.state())?;

        for press in &plan.press {
            connection.submit(TransportOp::Write {
                target: WriteTarget::Command,
                payload: press.press().to_vec(),
                command: Some(*press),
            });
        }
        self.journal.info(address, format!("Press {} ({:?})", command, trigger));

        if let Some(after) = plan.release_after {
            let serial = connection.next_release_serial();
            connection.pending_releases.insert(serial, plan.release);
            connection.timers.arm(TimerKind::Release { command, serial }, after);
        }
        Ok(())
    }

    fn release_command(&mut self, address: &DeviceAddress, command: RemoteCommand) -> Result<(), CommandError> {
        let connection = self
            .registry
            .get(address)
            .ok_or_else(|| CommandError::UnknownDevice(address.clone()))?;
        let release = self
            .dispatcher
            .release(address, command, &connection.settings, connection.state())?;

        self.write_releases(address, &release);
        Ok(())
    }

    fn write_releases(&self, address: &DeviceAddress, commands: &[RemoteCommand]) {
        let Some(connection) = self.registry.get(address) else {
            return;
        };
        for command in commands {
            if let Some(payload) = command.release() {
                connection.submit(TransportOp::Write {
                    target: WriteTarget::Command,
                    payload: payload.to_vec(),
                    command: Some(*command),
                });
            }
        }
        if let Some(first) = commands.first() {
            self.journal.info(address, format!("Release {}", first));
        }
    }

    fn settings_changed(&mut self, address: &DeviceAddress) {
        let Some(connection) = self.registry.get_mut(address) else {
            warn!("Settings changed for unknown camera {}", address);
            return;
        };
        let settings = self.store.settings(address).unwrap_or_else(|| connection.settings.clone());
        connection.update_settings(settings, &self.policy);
        self.journal.debug(address, "Settings changed");
        self.dispatch(address, LinkEvent::SettingsChanged);
    }

    // ------------------------------------------------------------------
    // Timers, completions, transport events
    // ------------------------------------------------------------------

    fn on_timer(&mut self, fired: TimerFired) {
        let Some(connection) = self.registry.get_mut(&fired.address) else {
            return;
        };
        if !connection.timers.take_fired(&fired) {
            trace!("[{}] stale timer {:?}", fired.address, fired.kind);
            return;
        }

        let event = match fired.kind {
            TimerKind::QuickConnectExpiry => {
                self.journal.info(&fired.address, "Quick connect window closed");
                LinkEvent::QuickConnectExpired
            }
            TimerKind::Retry(stage) => LinkEvent::RetryDue(stage),
            TimerKind::StreamStart => LinkEvent::StreamStartDue,
            TimerKind::LocationPush => LinkEvent::LocationPushDue,
            TimerKind::Rescan => LinkEvent::RescanDue,
            TimerKind::Release { serial, .. } => {
                // Written whether or not the press succeeded
                let release = connection.pending_releases.remove(&serial).unwrap_or_default();
                self.write_releases(&fired.address, &release);
                return;
            }
        };
        self.dispatch(&fired.address, event);
    }

    fn on_completion(&mut self, completion: OpCompletion) {
        let OpCompletion { address, epoch, result } = completion;
        let Some(connection) = self.registry.get(&address) else {
            return;
        };
        if epoch != connection.epoch() {
            trace!("[{}] stale completion (epoch {}): {:?}", address, epoch, result);
            return;
        }

        let event = match result {
            OpResult::ScanStarted(Ok(())) | OpResult::ScanStopped | OpResult::Disconnected => None,
            OpResult::ScanStarted(Err(e)) => {
                self.journal.warn(&address, format!("Scan failed: {}", e));
                Some(LinkEvent::ScanFailed(e.to_string()))
            }
            OpResult::Connected(Ok(info)) => {
                self.journal.info(&address, format!("Connected (bonded: {})", info.bonded));
                Some(LinkEvent::Connected { bonded: info.bonded })
            }
            OpResult::Connected(Err(TransportError::Cancelled)) => None,
            OpResult::Connected(Err(e)) => {
                self.journal.warn(&address, format!("Connect failed: {}", e));
                Some(LinkEvent::ConnectFailed(e.to_string()))
            }
            OpResult::Bonded(Ok(())) => {
                self.journal.info(&address, "Bonded");
                Some(LinkEvent::BondStateChanged { bonded: true })
            }
            OpResult::Bonded(Err(e)) => {
                self.journal.warn(&address, format!("Bonding failed: {}", e));
                Some(LinkEvent::BondFailed(e.to_string()))
            }
            OpResult::MtuNegotiated(Ok(mtu)) => {
                self.journal.debug(&address, format!("MTU {}", mtu));
                Some(LinkEvent::MtuNegotiated(Some(mtu)))
            }
            OpResult::MtuNegotiated(Err(e)) => {
                self.journal.debug(&address, format!("MTU request refused: {}", e));
                Some(LinkEvent::MtuNegotiated(None))
            }
            OpResult::ServicesDiscovered(Ok(())) => Some(LinkEvent::ServicesDiscovered),
            OpResult::ServicesDiscovered(Err(e)) => {
                self.journal.warn(&address, format!("Service discovery failed: {}", e));
                Some(LinkEvent::DiscoveryFailed(e.to_string()))
            }
            OpResult::Written { target, command, status } => {
                let mut outcome = classify_write(target, status);
                if outcome == WriteOutcome::NonRetryableFailure(FailureReason::RemoteControlDisabled)
                    && !command.is_some_and(|c| c.is_shutter())
                {
                    outcome = WriteOutcome::NonRetryableFailure(FailureReason::Rejected(status));
                }

                let what = match command {
                    Some(command) => format!("{:?} {}", target, command),
                    None => format!("{:?}", target),
                };
                match outcome {
                    WriteOutcome::Success => self.journal.debug(&address, format!("Wrote {}", what)),
                    _ => self.journal.warn(&address, format!("Write {} failed: {}", what, status)),
                }
                Some(LinkEvent::WriteCompleted { target, outcome })
            }
        };

        if let Some(event) = event {
            self.dispatch(&address, event);
        }
    }

    fn on_transport_event(&mut self, event: TransportEvent) {
        match event {
            TransportEvent::ScanHit(address) => self.dispatch(&address, LinkEvent::ScanHit),
            TransportEvent::ScanFailed { address, reason } => {
                if self.registry.contains(&address) {
                    self.journal.warn(&address, format!("Scan failed: {}", reason));
                }
                self.dispatch(&address, LinkEvent::ScanFailed(reason));
            }
            TransportEvent::Disconnected(address) => {
                if self.registry.contains(&address) {
                    self.journal.info(&address, "Link lost");
                }
                self.dispatch(&address, LinkEvent::Disconnected);
            }
        }
    }

    // ------------------------------------------------------------------
    // State machine driving
    // ------------------------------------------------------------------

    /// Feed an event to a camera's state machine and run the effects, including follow-up events
    fn dispatch(&mut self, address: &DeviceAddress, event: LinkEvent) {
        let mut queue = VecDeque::from([event]);

        while let Some(event) = queue.pop_front() {
            let Some(connection) = self.registry.get_mut(address) else {
                return;
            };
            let before = connection.state();
            trace!("[{}] {:?} in {:?}", address, event, before);
            let effects = connection.machine.handle(event);
            let after = connection.state();
            if before != after {
                self.journal.debug(address, format!("{:?} -> {:?}", before, after));
            }

            queue.extend(self.execute_all(address, effects));
        }
    }

    fn execute_all(&mut self, address: &DeviceAddress, effects: Vec<Effect>) -> Vec<LinkEvent> {
        effects
            .into_iter()
            .filter_map(|effect| self.execute(address, effect))
            .collect()
    }

    fn execute(&mut self, address: &DeviceAddress, effect: Effect) -> Option<LinkEvent> {
        let connection = self.registry.get_mut(address)?;

        match effect {
            Effect::StartScan(mode) => {
                self.journal.info(address, format!("Scanning ({:?})", mode));
                connection.submit(TransportOp::StartScan(mode));
            }
            Effect::StopScan => connection.submit(TransportOp::StopScan),
            Effect::OpenSession { auto_reconnect } => {
                if let Err(e) = connection.open_session(auto_reconnect) {
                    self.journal.warn(address, e.to_string());
                }
            }
            Effect::CloseSession => {
                connection.close_session();
            }
            Effect::CreateBond => {
                self.journal.info(address, "Bonding");
                connection.submit(TransportOp::CreateBond);
            }
            Effect::RequestMtu(mtu) => connection.submit(TransportOp::RequestMtu(mtu)),
            Effect::DiscoverServices => connection.submit(TransportOp::DiscoverServices),
            Effect::Write(target) => {
                let payload = match target {
                    WriteTarget::Lock => encode_lock(),
                    WriteTarget::Enable => encode_enable(),
                    WriteTarget::TimeSync => encode_time_sync(Utc::now(), self.streamer.zone()).to_vec(),
                    WriteTarget::Location | WriteTarget::Command => {
                        warn!("[{}] unexpected bare write to {:?}", address, target);
                        return None;
                    }
                };
                connection.submit(TransportOp::Write { target, payload, command: None });
            }
            Effect::PushLocation => match self.streamer.next_frame() {
                Some(frame) => connection.submit(TransportOp::Write {
                    target: WriteTarget::Location,
                    payload: frame.to_vec(),
                    command: None,
                }),
                None => self.journal.debug(address, "No location fix yet, skipping push"),
            },
            Effect::Arm(kind, after) => connection.timers.arm(kind, after),
            Effect::Cancel(kind) => {
                connection.timers.cancel(kind);
            }
            Effect::CancelAllTimers => connection.clear_timers(),
            Effect::RecordDisconnect => {
                let now = Utc::now();
                connection.record_disconnect(now, &self.policy);
                if let Err(e) = self.store.record_disconnect(address, now) {
                    self.journal.warn(address, format!("Failed to store disconnect time: {}", e));
                }
            }
            Effect::RequestDiscovery => {
                let plan = self.policy.plan(&connection.settings, connection.last_disconnect_at, Utc::now());
                return Some(LinkEvent::BeginDiscovery(plan));
            }
            Effect::Status(status) => {
                let detail = format!("{} is {}", connection.label(), status);
                self.journal.info(address, format!("Status: {}", status));
                self.emit(CameraEvent::Status { address: address.clone(), status, detail });
            }
            Effect::Surface(error) => {
                self.journal.warn(address, error.to_string());
                let event = match error {
                    LinkError::HandshakeExhausted { stage } => {
                        CameraEvent::HandshakeAbandoned { address: address.clone(), stage }
                    }
                    LinkError::RemoteControlDisabled => {
                        CameraEvent::RemoteControlDisabled { address: address.clone() }
                    }
                };
                self.emit(event);
            }
        }
        None
    }
}
