//! Cancelable per-device timers
//!
//! A timer is a spawned sleep that posts a `TimerFired` back into the event
//! loop. The `TimerHandle` aborts the sleep when dropped, so clearing a
//! connection's `TimerSet` cancels everything it had pending. A firing that
//! was already queued when its handle was dropped is recognized as stale by
//! its id.

use log::trace;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tokio::sync::mpsc::UnboundedSender;
use tokio::task::AbortHandle;

use crate::camera::command::RemoteCommand;
use crate::camera::types::DeviceAddress;
use crate::link::state::HandshakeStage;

static NEXT_TIMER_ID: AtomicU64 = AtomicU64::new(1);

/// What a timer is for
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TimerKind {
    /// End of the low-latency scanning window
    QuickConnectExpiry,
    /// Backoff before re-sending a handshake write
    Retry(HandshakeStage),
    /// Start of the recurring location pushes
    StreamStart,
    /// Next recurring location push
    LocationPush,
    /// Release half of a tapped command
    Release { command: RemoteCommand, serial: u64 },
    /// Restart discovery after a failure
    Rescan,
}

/// Posted to the event loop when a timer elapses
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TimerFired {
    pub address: DeviceAddress,
    pub kind: TimerKind,
    pub id: u64,
}

/// Owned handle to a pending timer; dropping it cancels the timer
#[derive(Debug)]
pub struct TimerHandle {
    id: u64,
    abort: AbortHandle,
}

impl TimerHandle {
    /// Spawn a timer on the current tokio runtime
    pub fn spawn(
        address: DeviceAddress,
        kind: TimerKind,
        after: Duration,
        sink: UnboundedSender<TimerFired>,
    ) -> Self {
        let id = NEXT_TIMER_ID.fetch_add(1, Ordering::Relaxed);
        let task = tokio::spawn(async move {
            tokio::time::sleep(after).await;
            let _ = sink.send(TimerFired { address, kind, id });
        });

        Self { id, abort: task.abort_handle() }
    }

    pub fn id(&self) -> u64 {
        self.id
    }
}

impl Drop for TimerHandle {
    fn drop(&mut self) {
        self.abort.abort();
    }
}

/// The pending timers of one connection
#[derive(Debug)]
pub struct TimerSet {
    address: DeviceAddress,
    sink: UnboundedSender<TimerFired>,
    pending: HashMap<TimerKind, TimerHandle>,
}

impl TimerSet {
    pub fn new(address: DeviceAddress, sink: UnboundedSender<TimerFired>) -> Self {
        Self { address, sink, pending: HashMap::new() }
    }

    /// Arm a timer, replacing (and cancelling) any pending timer of the same kind
    pub fn arm(&mut self, kind: TimerKind, after: Duration) {
        trace!("[{}] arm {:?} in {:?}", self.address, kind, after);
        let handle = TimerHandle::spawn(self.address.clone(), kind, after, self.sink.clone());
        self.pending.insert(kind, handle);
    }

    /// Cancel one timer
    pub fn cancel(&mut self, kind: TimerKind) -> bool {
        self.pending.remove(&kind).is_some()
    }

    /// Cancel every pending timer
    pub fn cancel_all(&mut self) {
        if !self.pending.is_empty() {
            trace!("[{}] cancel {} timers", self.address, self.pending.len());
        }
        self.pending.clear();
    }

    /// Accept a firing if it belongs to the currently armed timer of its kind.
    ///
    /// The entry is consumed, so each arm fires at most once.
    pub fn take_fired(&mut self, fired: &TimerFired) -> bool {
        match self.pending.get(&fired.kind) {
            Some(handle) if handle.id() == fired.id => {
                self.pending.remove(&fired.kind);
                true
            }
            _ => false,
        }
    }

    pub fn is_armed(&self, kind: TimerKind) -> bool {
        self.pending.contains_key(&kind)
    }

    pub fn len(&self) -> usize {
        self.pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }
}
