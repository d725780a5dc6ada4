//! Per-device connection state machine
//!
//! `ConnectionStateMachine::handle` is a transition function: it takes one
//! `LinkEvent`, updates the state and returns the `Effect`s the event loop has
//! to carry out (transport calls, timers, status reports). It never touches
//! the transport or the clock itself, which keeps every transition testable
//! without a BLE stack.

use std::time::Duration;

use crate::camera::codec::{FailureReason, WriteOutcome, WriteTarget};
use crate::camera::types::{ConnectionStatus, ConnectionStrategy, ScanMode};
use crate::link::policy::DiscoveryPlan;
use crate::link::timer::TimerKind;
use crate::link::LinkError;

/// Where a device is in its lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Idle,
    Scanning,
    AwaitingGatt,
    Connecting,
    Bonding,
    NegotiatingMtu,
    DiscoveringServices,
    LockingEndpoint,
    EnablingUpdates,
    SyncingTime,
    Streaming,
    Disconnected,
}

impl ConnectionState {
    /// Status reported to the UI for this state
    pub fn status(&self) -> ConnectionStatus {
        match self {
            ConnectionState::Idle
            | ConnectionState::Scanning
            | ConnectionState::AwaitingGatt
            | ConnectionState::Disconnected => ConnectionStatus::Disconnected,
            ConnectionState::Bonding => ConnectionStatus::Bonding,
            ConnectionState::Streaming => ConnectionStatus::Streaming,
            _ => ConnectionStatus::Connecting,
        }
    }

    /// No GATT link is up (one may be pending in `AwaitingGatt`)
    pub fn is_idle(&self) -> bool {
        matches!(
            self,
            ConnectionState::Idle
                | ConnectionState::Scanning
                | ConnectionState::AwaitingGatt
                | ConnectionState::Disconnected
        )
    }
}

/// Handshake writes that are retried on failure
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HandshakeStage {
    Lock,
    Enable,
}

impl HandshakeStage {
    pub fn target(&self) -> WriteTarget {
        match self {
            HandshakeStage::Lock => WriteTarget::Lock,
            HandshakeStage::Enable => WriteTarget::Enable,
        }
    }

    fn state(&self) -> ConnectionState {
        match self {
            HandshakeStage::Lock => ConnectionState::LockingEndpoint,
            HandshakeStage::Enable => ConnectionState::EnablingUpdates,
        }
    }
}

/// Linear backoff: the `n`th consecutive failure waits `n x base_delay` before
/// the next write, and failure number `max_retries` exhausts the stage
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub base_delay: Duration,
}

impl RetryPolicy {
    pub fn new(max_retries: u32, base_delay: Duration) -> Self {
        Self { max_retries, base_delay }
    }

    /// Delay after `failures` consecutive failures, None once the stage is exhausted
    pub fn delay_for(&self, failures: u32) -> Option<Duration> {
        if failures == 0 || failures >= self.max_retries {
            return None;
        }
        Some(self.base_delay * failures)
    }
}

/// Retry policies per handshake stage
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HandshakePolicy {
    pub lock: RetryPolicy,
    pub enable: RetryPolicy,
}

impl HandshakePolicy {
    pub fn uniform(policy: RetryPolicy) -> Self {
        Self { lock: policy, enable: policy }
    }

    pub fn for_stage(&self, stage: HandshakeStage) -> &RetryPolicy {
        match stage {
            HandshakeStage::Lock => &self.lock,
            HandshakeStage::Enable => &self.enable,
        }
    }
}

/// Fixed delays the state machine schedules
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LinkTimings {
    pub rescan_delay: Duration,
    pub scan_retry_delay: Duration,
    pub stream_start_delay: Duration,
    pub location_interval: Duration,
    pub mtu: u16,
}

/// Inputs to the state machine
#[derive(Debug, Clone, PartialEq)]
pub enum LinkEvent {
    /// Start looking for the device as planned by the scan policy
    BeginDiscovery(DiscoveryPlan),
    ScanHit,
    ScanFailed(String),
    QuickConnectExpired,
    Connected { bonded: bool },
    ConnectFailed(String),
    BondStateChanged { bonded: bool },
    BondFailed(String),
    /// MTU request finished (None if the adapter refused)
    MtuNegotiated(Option<u16>),
    ServicesDiscovered,
    DiscoveryFailed(String),
    WriteCompleted { target: WriteTarget, outcome: WriteOutcome },
    RetryDue(HandshakeStage),
    StreamStartDue,
    LocationPushDue,
    RescanDue,
    Disconnected,
    SettingsChanged,
}

/// Work the event loop performs on behalf of the state machine
#[derive(Debug, Clone, PartialEq)]
pub enum Effect {
    StartScan(ScanMode),
    StopScan,
    OpenSession { auto_reconnect: bool },
    CloseSession,
    CreateBond,
    RequestMtu(u16),
    DiscoverServices,
    /// Encode and write a handshake or time-sync frame
    Write(WriteTarget),
    /// Encode the latest fix and write it (skipped when there is none)
    PushLocation,
    Arm(TimerKind, Duration),
    Cancel(TimerKind),
    CancelAllTimers,
    RecordDisconnect,
    /// Ask the scan policy for a plan and feed it back as `BeginDiscovery`
    RequestDiscovery,
    Status(ConnectionStatus),
    Surface(LinkError),
}

/// The state machine of one camera
#[derive(Debug, Clone)]
pub struct ConnectionStateMachine {
    state: ConnectionState,
    strategy: ConnectionStrategy,
    bonded: bool,
    stage: Option<HandshakeStage>,
    write_retry_count: u32,
    reported: ConnectionStatus,
    policy: HandshakePolicy,
    timings: LinkTimings,
}

impl ConnectionStateMachine {
    pub fn new(policy: HandshakePolicy, timings: LinkTimings) -> Self {
        Self {
            state: ConnectionState::Idle,
            strategy: ConnectionStrategy::default(),
            bonded: false,
            stage: None,
            write_retry_count: 0,
            reported: ConnectionStatus::Disconnected,
            policy,
            timings,
        }
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    pub fn strategy(&self) -> ConnectionStrategy {
        self.strategy
    }

    pub fn is_bonded(&self) -> bool {
        self.bonded
    }

    pub fn write_retry_count(&self) -> u32 {
        self.write_retry_count
    }

    pub fn is_streaming(&self) -> bool {
        self.state == ConnectionState::Streaming
    }

    /// Apply one event and return the effects to execute, in order
    pub fn handle(&mut self, event: LinkEvent) -> Vec<Effect> {
        let mut effects = Vec::new();

        match event {
            LinkEvent::BeginDiscovery(plan) => self.begin_discovery(plan, &mut effects),

            LinkEvent::ScanHit => {
                // Redundant hits while a connect is underway are dropped
                if self.state == ConnectionState::Scanning {
                    effects.push(Effect::StopScan);
                    effects.push(Effect::OpenSession { auto_reconnect: false });
                    self.enter(ConnectionState::Connecting, &mut effects);
                }
            }

            LinkEvent::ScanFailed(_) => {
                if self.state == ConnectionState::Scanning {
                    effects.push(Effect::Cancel(TimerKind::QuickConnectExpiry));
                    effects.push(Effect::Arm(TimerKind::Rescan, self.timings.scan_retry_delay));
                    self.enter(ConnectionState::Idle, &mut effects);
                }
            }

            LinkEvent::QuickConnectExpired => {
                // An in-progress connection attempt is left alone
                if self.state == ConnectionState::Scanning {
                    effects.push(Effect::StopScan);
                    effects.push(Effect::StartScan(ScanMode::LowPower));
                }
            }

            LinkEvent::Connected { bonded } => {
                if matches!(self.state, ConnectionState::Connecting | ConnectionState::AwaitingGatt) {
                    self.bonded = bonded;
                    self.enter(ConnectionState::Connecting, &mut effects);
                    self.after_connect(&mut effects);
                }
            }

            LinkEvent::ConnectFailed(_) => {
                if matches!(self.state, ConnectionState::Connecting | ConnectionState::AwaitingGatt) {
                    self.transport_failure(&mut effects);
                }
            }

            LinkEvent::BondStateChanged { bonded } => {
                self.bonded = bonded;
                if bonded && self.state == ConnectionState::Bonding {
                    effects.push(Effect::DiscoverServices);
                    self.enter(ConnectionState::DiscoveringServices, &mut effects);
                }
            }

            LinkEvent::BondFailed(_) => {
                if self.state == ConnectionState::Bonding {
                    self.transport_failure(&mut effects);
                }
            }

            LinkEvent::MtuNegotiated(_) => {
                if self.state == ConnectionState::NegotiatingMtu {
                    effects.push(Effect::DiscoverServices);
                    self.enter(ConnectionState::DiscoveringServices, &mut effects);
                }
            }

            LinkEvent::ServicesDiscovered => {
                if self.state == ConnectionState::DiscoveringServices {
                    self.begin_stage(HandshakeStage::Lock, &mut effects);
                }
            }

            LinkEvent::DiscoveryFailed(_) => {
                if self.state == ConnectionState::DiscoveringServices {
                    self.transport_failure(&mut effects);
                }
            }

            LinkEvent::WriteCompleted { target, outcome } => self.write_completed(target, outcome, &mut effects),

            LinkEvent::RetryDue(stage) => {
                if self.stage == Some(stage) && self.state == stage.state() {
                    effects.push(Effect::Write(stage.target()));
                }
            }

            LinkEvent::StreamStartDue => {
                if matches!(self.state, ConnectionState::SyncingTime | ConnectionState::Streaming) {
                    self.enter(ConnectionState::Streaming, &mut effects);
                    effects.push(Effect::PushLocation);
                    effects.push(Effect::Arm(TimerKind::LocationPush, self.timings.location_interval));
                }
            }

            LinkEvent::LocationPushDue => {
                if self.state == ConnectionState::Streaming {
                    effects.push(Effect::PushLocation);
                    effects.push(Effect::Arm(TimerKind::LocationPush, self.timings.location_interval));
                }
            }

            LinkEvent::RescanDue => {
                if self.state == ConnectionState::Idle {
                    effects.push(Effect::RequestDiscovery);
                }
            }

            LinkEvent::Disconnected => {
                if !self.state.is_idle() {
                    effects.push(Effect::CancelAllTimers);
                    effects.push(Effect::CloseSession);
                    effects.push(Effect::RecordDisconnect);
                    self.reset_stage();
                    self.enter(ConnectionState::Disconnected, &mut effects);
                    effects.push(Effect::RequestDiscovery);
                }
            }

            LinkEvent::SettingsChanged => {
                // Busy links pick the new settings up on their next disconnect
                if self.state.is_idle() {
                    match self.state {
                        ConnectionState::Scanning => {
                            effects.push(Effect::StopScan);
                            effects.push(Effect::Cancel(TimerKind::QuickConnectExpiry));
                        }
                        ConnectionState::AwaitingGatt => effects.push(Effect::CloseSession),
                        _ => effects.push(Effect::Cancel(TimerKind::Rescan)),
                    }
                    self.enter(ConnectionState::Idle, &mut effects);
                    effects.push(Effect::RequestDiscovery);
                }
            }
        }

        effects
    }

    fn begin_discovery(&mut self, plan: DiscoveryPlan, effects: &mut Vec<Effect>) {
        if !self.state.is_idle() {
            return;
        }

        self.strategy = plan.strategy;
        match plan.strategy {
            ConnectionStrategy::ScanTriggered => {
                effects.push(Effect::StartScan(plan.scan_mode));
                match plan.quick_connect_remaining {
                    Some(remaining) => effects.push(Effect::Arm(TimerKind::QuickConnectExpiry, remaining)),
                    None => effects.push(Effect::Cancel(TimerKind::QuickConnectExpiry)),
                }
                self.enter(ConnectionState::Scanning, effects);
            }
            ConnectionStrategy::PersistentGatt => {
                effects.push(Effect::Cancel(TimerKind::QuickConnectExpiry));
                effects.push(Effect::OpenSession { auto_reconnect: true });
                self.enter(ConnectionState::AwaitingGatt, effects);
            }
        }
    }

    fn after_connect(&mut self, effects: &mut Vec<Effect>) {
        match self.strategy {
            ConnectionStrategy::PersistentGatt => {
                if self.bonded {
                    effects.push(Effect::DiscoverServices);
                    self.enter(ConnectionState::DiscoveringServices, effects);
                } else {
                    effects.push(Effect::CreateBond);
                    self.enter(ConnectionState::Bonding, effects);
                }
            }
            ConnectionStrategy::ScanTriggered => {
                effects.push(Effect::RequestMtu(self.timings.mtu));
                if self.bonded {
                    // The MTU result is ignored once discovery is underway
                    effects.push(Effect::DiscoverServices);
                    self.enter(ConnectionState::DiscoveringServices, effects);
                } else {
                    self.enter(ConnectionState::NegotiatingMtu, effects);
                }
            }
        }
    }

    fn begin_stage(&mut self, stage: HandshakeStage, effects: &mut Vec<Effect>) {
        self.stage = Some(stage);
        self.write_retry_count = 0;
        effects.push(Effect::Write(stage.target()));
        self.enter(stage.state(), effects);
    }

    fn reset_stage(&mut self) {
        self.stage = None;
        self.write_retry_count = 0;
    }

    fn write_completed(&mut self, target: WriteTarget, outcome: WriteOutcome, effects: &mut Vec<Effect>) {
        match target {
            WriteTarget::Lock | WriteTarget::Enable => {
                let stage = if target == WriteTarget::Lock { HandshakeStage::Lock } else { HandshakeStage::Enable };
                if self.stage != Some(stage) || self.state != stage.state() {
                    return;
                }

                if outcome == WriteOutcome::Success {
                    match stage {
                        HandshakeStage::Lock => self.begin_stage(HandshakeStage::Enable, effects),
                        HandshakeStage::Enable => self.start_streaming(effects),
                    }
                } else {
                    self.stage_failed(stage, effects);
                }
            }

            WriteTarget::TimeSync => {
                // Success or not, time sync never holds streaming back
                if self.state == ConnectionState::SyncingTime {
                    self.enter(ConnectionState::Streaming, effects);
                }
            }

            WriteTarget::Command => {
                if outcome == WriteOutcome::NonRetryableFailure(FailureReason::RemoteControlDisabled) {
                    effects.push(Effect::Surface(LinkError::RemoteControlDisabled));
                }
            }

            WriteTarget::Location => {}
        }
    }

    fn start_streaming(&mut self, effects: &mut Vec<Effect>) {
        self.reset_stage();
        // Firmware drops the first frame after enabling, this one compensates
        effects.push(Effect::PushLocation);
        effects.push(Effect::Arm(TimerKind::StreamStart, self.timings.stream_start_delay));
        effects.push(Effect::Write(WriteTarget::TimeSync));
        self.enter(ConnectionState::SyncingTime, effects);
    }

    fn stage_failed(&mut self, stage: HandshakeStage, effects: &mut Vec<Effect>) {
        let failures = self.write_retry_count + 1;
        match self.policy.for_stage(stage).delay_for(failures) {
            Some(delay) => {
                self.write_retry_count = failures;
                effects.push(Effect::Arm(TimerKind::Retry(stage), delay));
            }
            None => self.abandon(stage, effects),
        }
    }

    fn abandon(&mut self, stage: HandshakeStage, effects: &mut Vec<Effect>) {
        self.reset_stage();
        effects.push(Effect::CancelAllTimers);
        effects.push(Effect::CloseSession);
        effects.push(Effect::Surface(LinkError::HandshakeExhausted { stage }));
        self.report(ConnectionStatus::Error, effects);
        self.state = ConnectionState::Idle;
        effects.push(Effect::Arm(TimerKind::Rescan, self.timings.rescan_delay));
    }

    fn transport_failure(&mut self, effects: &mut Vec<Effect>) {
        self.reset_stage();
        effects.push(Effect::CancelAllTimers);
        effects.push(Effect::CloseSession);
        self.enter(ConnectionState::Idle, effects);
        effects.push(Effect::Arm(TimerKind::Rescan, self.timings.rescan_delay));
    }

    fn enter(&mut self, state: ConnectionState, effects: &mut Vec<Effect>) {
        if self.stage.is_some() && Some(state) != self.stage.map(|s| s.state()) {
            self.reset_stage();
        }
        self.state = state;
        self.report(state.status(), effects);
    }

    fn report(&mut self, status: ConnectionStatus, effects: &mut Vec<Effect>) {
        if self.reported != status {
            self.reported = status;
            effects.push(Effect::Status(status));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::camera::codec::GattStatus;

    fn timings() -> LinkTimings {
        LinkTimings {
            rescan_delay: Duration::from_secs(5),
            scan_retry_delay: Duration::from_secs(10),
            stream_start_delay: Duration::from_secs(1),
            location_interval: Duration::from_secs(10),
            mtu: 517,
        }
    }

    fn machine() -> ConnectionStateMachine {
        ConnectionStateMachine::new(
            HandshakePolicy::uniform(RetryPolicy::new(3, Duration::from_millis(500))),
            timings(),
        )
    }

    fn scan_plan() -> DiscoveryPlan {
        DiscoveryPlan {
            strategy: ConnectionStrategy::ScanTriggered,
            scan_mode: ScanMode::LowPower,
            quick_connect_remaining: None,
        }
    }

    fn persistent_plan() -> DiscoveryPlan {
        DiscoveryPlan {
            strategy: ConnectionStrategy::PersistentGatt,
            scan_mode: ScanMode::LowPower,
            quick_connect_remaining: None,
        }
    }

    fn ok(target: WriteTarget) -> LinkEvent {
        LinkEvent::WriteCompleted { target, outcome: WriteOutcome::Success }
    }

    fn failed(target: WriteTarget) -> LinkEvent {
        LinkEvent::WriteCompleted { target, outcome: WriteOutcome::RetryableFailure(GattStatus::ERROR) }
    }

    /// Drive a scan-triggered machine up to the enable stage
    fn to_enabling(sm: &mut ConnectionStateMachine) {
        sm.handle(LinkEvent::BeginDiscovery(scan_plan()));
        sm.handle(LinkEvent::ScanHit);
        sm.handle(LinkEvent::Connected { bonded: false });
        sm.handle(LinkEvent::MtuNegotiated(Some(517)));
        sm.handle(LinkEvent::ServicesDiscovered);
        sm.handle(ok(WriteTarget::Lock));
        assert_eq!(sm.state(), ConnectionState::EnablingUpdates);
    }

    #[test]
    fn test_retry_policy_delays() {
        let policy = RetryPolicy::new(3, Duration::from_millis(500));
        assert_eq!(policy.delay_for(0), None);
        assert_eq!(policy.delay_for(1), Some(Duration::from_millis(500)));
        assert_eq!(policy.delay_for(2), Some(Duration::from_millis(1000)));
        assert_eq!(policy.delay_for(3), None);
        assert_eq!(policy.delay_for(4), None);

        // A budget of one gives up on the first failure
        assert_eq!(RetryPolicy::new(1, Duration::from_millis(500)).delay_for(1), None);
    }

    #[test]
    fn test_scan_triggered_handshake() {
        let mut sm = machine();

        let effects = sm.handle(LinkEvent::BeginDiscovery(scan_plan()));
        assert_eq!(
            effects,
            vec![Effect::StartScan(ScanMode::LowPower), Effect::Cancel(TimerKind::QuickConnectExpiry)]
        );
        assert_eq!(sm.state(), ConnectionState::Scanning);

        let effects = sm.handle(LinkEvent::ScanHit);
        assert_eq!(
            effects,
            vec![
                Effect::StopScan,
                Effect::OpenSession { auto_reconnect: false },
                Effect::Status(ConnectionStatus::Connecting),
            ]
        );

        let effects = sm.handle(LinkEvent::Connected { bonded: false });
        assert_eq!(effects, vec![Effect::RequestMtu(517)]);
        assert_eq!(sm.state(), ConnectionState::NegotiatingMtu);

        let effects = sm.handle(LinkEvent::MtuNegotiated(Some(247)));
        assert_eq!(effects, vec![Effect::DiscoverServices]);

        let effects = sm.handle(LinkEvent::ServicesDiscovered);
        assert_eq!(effects, vec![Effect::Write(WriteTarget::Lock)]);
        assert_eq!(sm.state(), ConnectionState::LockingEndpoint);

        let effects = sm.handle(ok(WriteTarget::Lock));
        assert_eq!(effects, vec![Effect::Write(WriteTarget::Enable)]);

        let effects = sm.handle(ok(WriteTarget::Enable));
        assert_eq!(
            effects,
            vec![
                Effect::PushLocation,
                Effect::Arm(TimerKind::StreamStart, Duration::from_secs(1)),
                Effect::Write(WriteTarget::TimeSync),
            ]
        );
        assert_eq!(sm.state(), ConnectionState::SyncingTime);

        let effects = sm.handle(ok(WriteTarget::TimeSync));
        assert_eq!(effects, vec![Effect::Status(ConnectionStatus::Streaming)]);
        assert!(sm.is_streaming());

        let effects = sm.handle(LinkEvent::StreamStartDue);
        assert_eq!(
            effects,
            vec![Effect::PushLocation, Effect::Arm(TimerKind::LocationPush, Duration::from_secs(10))]
        );
    }

    #[test]
    fn test_bonded_scan_triggered_skips_mtu_wait() {
        let mut sm = machine();
        sm.handle(LinkEvent::BeginDiscovery(scan_plan()));
        sm.handle(LinkEvent::ScanHit);

        let effects = sm.handle(LinkEvent::Connected { bonded: true });
        assert_eq!(effects, vec![Effect::RequestMtu(517), Effect::DiscoverServices]);
        assert_eq!(sm.state(), ConnectionState::DiscoveringServices);

        // Late MTU result is ignored
        assert!(sm.handle(LinkEvent::MtuNegotiated(Some(517))).is_empty());
    }

    #[test]
    fn test_persistent_gatt_bonds_before_discovery() {
        let mut sm = machine();

        let effects = sm.handle(LinkEvent::BeginDiscovery(persistent_plan()));
        assert_eq!(
            effects,
            vec![
                Effect::Cancel(TimerKind::QuickConnectExpiry),
                Effect::OpenSession { auto_reconnect: true },
            ]
        );
        assert_eq!(sm.state(), ConnectionState::AwaitingGatt);

        let effects = sm.handle(LinkEvent::Connected { bonded: false });
        assert_eq!(
            effects,
            vec![
                Effect::Status(ConnectionStatus::Connecting),
                Effect::CreateBond,
                Effect::Status(ConnectionStatus::Bonding),
            ]
        );

        // Discovery does not start before bonding completes
        assert!(sm.handle(LinkEvent::ServicesDiscovered).is_empty());

        let effects = sm.handle(LinkEvent::BondStateChanged { bonded: true });
        assert_eq!(effects, vec![Effect::DiscoverServices, Effect::Status(ConnectionStatus::Connecting)]);
        assert!(sm.is_bonded());
    }

    #[test]
    fn test_persistent_gatt_already_bonded() {
        let mut sm = machine();
        sm.handle(LinkEvent::BeginDiscovery(persistent_plan()));
        let effects = sm.handle(LinkEvent::Connected { bonded: true });
        assert!(effects.contains(&Effect::DiscoverServices));
        assert!(!effects.contains(&Effect::CreateBond));
    }

    #[test]
    fn test_duplicate_scan_hits_are_ignored() {
        let mut sm = machine();
        sm.handle(LinkEvent::BeginDiscovery(scan_plan()));
        assert!(!sm.handle(LinkEvent::ScanHit).is_empty());
        assert!(sm.handle(LinkEvent::ScanHit).is_empty());
        assert!(sm.handle(LinkEvent::ScanHit).is_empty());
    }

    #[test]
    fn test_enable_retries_then_abandons() {
        let mut sm = machine();
        to_enabling(&mut sm);

        let mut retries = Vec::new();
        for attempt in 1..=2u32 {
            let effects = sm.handle(failed(WriteTarget::Enable));
            assert_eq!(
                effects,
                vec![Effect::Arm(
                    TimerKind::Retry(HandshakeStage::Enable),
                    Duration::from_millis(500) * attempt
                )]
            );
            assert_eq!(sm.write_retry_count(), attempt);
            retries.push(effects);

            let effects = sm.handle(LinkEvent::RetryDue(HandshakeStage::Enable));
            assert_eq!(effects, vec![Effect::Write(WriteTarget::Enable)]);
        }
        assert_eq!(retries.len(), 2);

        // Third consecutive failure exhausts the stage, no further write
        let effects = sm.handle(failed(WriteTarget::Enable));
        assert_eq!(
            effects,
            vec![
                Effect::CancelAllTimers,
                Effect::CloseSession,
                Effect::Surface(LinkError::HandshakeExhausted { stage: HandshakeStage::Enable }),
                Effect::Status(ConnectionStatus::Error),
                Effect::Arm(TimerKind::Rescan, Duration::from_secs(5)),
            ]
        );
        assert_eq!(sm.state(), ConnectionState::Idle);
        assert_eq!(sm.write_retry_count(), 0);

        // A stale retry cannot resurrect the handshake
        assert!(sm.handle(LinkEvent::RetryDue(HandshakeStage::Enable)).is_empty());

        let effects = sm.handle(LinkEvent::RescanDue);
        assert_eq!(effects, vec![Effect::RequestDiscovery]);
    }

    #[test]
    fn test_retry_count_resets_on_stage_change() {
        let mut sm = machine();
        sm.handle(LinkEvent::BeginDiscovery(scan_plan()));
        sm.handle(LinkEvent::ScanHit);
        sm.handle(LinkEvent::Connected { bonded: true });
        sm.handle(LinkEvent::ServicesDiscovered);

        sm.handle(failed(WriteTarget::Lock));
        sm.handle(LinkEvent::RetryDue(HandshakeStage::Lock));
        sm.handle(failed(WriteTarget::Lock));
        assert_eq!(sm.write_retry_count(), 2);

        sm.handle(LinkEvent::RetryDue(HandshakeStage::Lock));
        sm.handle(ok(WriteTarget::Lock));
        assert_eq!(sm.state(), ConnectionState::EnablingUpdates);
        assert_eq!(sm.write_retry_count(), 0);

        // Enable gets its own full budget
        let effects = sm.handle(failed(WriteTarget::Enable));
        assert_eq!(
            effects,
            vec![Effect::Arm(TimerKind::Retry(HandshakeStage::Enable), Duration::from_millis(500))]
        );
    }

    #[test]
    fn test_time_sync_failure_still_streams() {
        let mut sm = machine();
        to_enabling(&mut sm);
        sm.handle(ok(WriteTarget::Enable));

        let effects = sm.handle(LinkEvent::WriteCompleted {
            target: WriteTarget::TimeSync,
            outcome: WriteOutcome::NonRetryableFailure(FailureReason::Rejected(GattStatus::ERROR)),
        });
        assert_eq!(effects, vec![Effect::Status(ConnectionStatus::Streaming)]);
    }

    #[test]
    fn test_stream_start_before_time_sync_result() {
        let mut sm = machine();
        to_enabling(&mut sm);
        sm.handle(ok(WriteTarget::Enable));

        let effects = sm.handle(LinkEvent::StreamStartDue);
        assert_eq!(effects[0], Effect::Status(ConnectionStatus::Streaming));
        assert!(sm.is_streaming());

        // Time sync completing later changes nothing
        assert!(sm.handle(ok(WriteTarget::TimeSync)).is_empty());
    }

    #[test]
    fn test_disconnect_tears_down() {
        let mut sm = machine();
        to_enabling(&mut sm);

        let effects = sm.handle(LinkEvent::Disconnected);
        assert_eq!(
            effects,
            vec![
                Effect::CancelAllTimers,
                Effect::CloseSession,
                Effect::RecordDisconnect,
                Effect::Status(ConnectionStatus::Disconnected),
                Effect::RequestDiscovery,
            ]
        );
        assert_eq!(sm.state(), ConnectionState::Disconnected);

        // Discovery resumes from Disconnected
        sm.handle(LinkEvent::BeginDiscovery(scan_plan()));
        assert_eq!(sm.state(), ConnectionState::Scanning);
    }

    #[test]
    fn test_disconnect_while_scanning_is_ignored() {
        let mut sm = machine();
        sm.handle(LinkEvent::BeginDiscovery(scan_plan()));
        assert!(sm.handle(LinkEvent::Disconnected).is_empty());
    }

    #[test]
    fn test_quick_connect_expiry() {
        let mut sm = machine();
        sm.handle(LinkEvent::BeginDiscovery(DiscoveryPlan {
            strategy: ConnectionStrategy::ScanTriggered,
            scan_mode: ScanMode::LowLatency,
            quick_connect_remaining: Some(Duration::from_secs(60)),
        }));

        let effects = sm.handle(LinkEvent::QuickConnectExpired);
        assert_eq!(effects, vec![Effect::StopScan, Effect::StartScan(ScanMode::LowPower)]);

        // Expiry during a connection attempt does nothing
        sm.handle(LinkEvent::ScanHit);
        assert!(sm.handle(LinkEvent::QuickConnectExpired).is_empty());
        assert_eq!(sm.state(), ConnectionState::Connecting);
    }

    #[test]
    fn test_connect_failure_schedules_rescan() {
        let mut sm = machine();
        sm.handle(LinkEvent::BeginDiscovery(scan_plan()));
        sm.handle(LinkEvent::ScanHit);

        let effects = sm.handle(LinkEvent::ConnectFailed("timeout".into()));
        assert_eq!(
            effects,
            vec![
                Effect::CancelAllTimers,
                Effect::CloseSession,
                Effect::Status(ConnectionStatus::Disconnected),
                Effect::Arm(TimerKind::Rescan, Duration::from_secs(5)),
            ]
        );
        assert_eq!(sm.state(), ConnectionState::Idle);
    }

    #[test]
    fn test_scan_failure_retries_later() {
        let mut sm = machine();
        sm.handle(LinkEvent::BeginDiscovery(scan_plan()));

        let effects = sm.handle(LinkEvent::ScanFailed("scanner busy".into()));
        assert_eq!(
            effects,
            vec![
                Effect::Cancel(TimerKind::QuickConnectExpiry),
                Effect::Arm(TimerKind::Rescan, Duration::from_secs(10)),
            ]
        );
        assert_eq!(sm.state(), ConnectionState::Idle);
    }

    #[test]
    fn test_settings_change_while_scanning_resets_scan() {
        let mut sm = machine();
        sm.handle(LinkEvent::BeginDiscovery(scan_plan()));

        let effects = sm.handle(LinkEvent::SettingsChanged);
        assert_eq!(
            effects,
            vec![
                Effect::StopScan,
                Effect::Cancel(TimerKind::QuickConnectExpiry),
                Effect::RequestDiscovery,
            ]
        );
    }

    #[test]
    fn test_settings_change_while_connected_is_deferred() {
        let mut sm = machine();
        to_enabling(&mut sm);
        assert!(sm.handle(LinkEvent::SettingsChanged).is_empty());
        assert_eq!(sm.state(), ConnectionState::EnablingUpdates);
    }

    #[test]
    fn test_remote_control_disabled_is_surfaced() {
        let mut sm = machine();
        let effects = sm.handle(LinkEvent::WriteCompleted {
            target: WriteTarget::Command,
            outcome: WriteOutcome::NonRetryableFailure(FailureReason::RemoteControlDisabled),
        });
        assert_eq!(effects, vec![Effect::Surface(LinkError::RemoteControlDisabled)]);
    }
}
