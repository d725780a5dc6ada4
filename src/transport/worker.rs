//! Per-device operation worker
//!
//! Every transport operation for one camera runs on that camera's worker
//! task, strictly in submission order. A close therefore always lands before
//! the next open, and a release write always lands after its press. Each
//! completion is posted back to the event loop tagged with the session epoch
//! it was submitted under, so results of a torn-down session can be dropped.

use log::{debug, trace};
use std::sync::Arc;
use tokio::sync::mpsc::{self, UnboundedSender};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::camera::codec::{GattStatus, WriteTarget};
use crate::camera::command::RemoteCommand;
use crate::camera::types::{DeviceAddress, ScanMode};
use crate::transport::{ConnectInfo, GattTransport, TransportError};

/// An operation submitted to a device worker
#[derive(Debug)]
pub enum TransportOp {
    StartScan(ScanMode),
    StopScan,
    Connect { auto_reconnect: bool, cancel: CancellationToken },
    Disconnect,
    CreateBond,
    RequestMtu(u16),
    DiscoverServices,
    Write {
        target: WriteTarget,
        payload: Vec<u8>,
        /// Command this write belongs to, for reporting
        command: Option<RemoteCommand>,
    },
}

/// Outcome of an operation
#[derive(Debug)]
pub enum OpResult {
    ScanStarted(Result<(), TransportError>),
    ScanStopped,
    Connected(Result<ConnectInfo, TransportError>),
    Disconnected,
    Bonded(Result<(), TransportError>),
    MtuNegotiated(Result<u16, TransportError>),
    ServicesDiscovered(Result<(), TransportError>),
    Written {
        target: WriteTarget,
        command: Option<RemoteCommand>,
        status: GattStatus,
    },
}

/// Completion posted back to the event loop
#[derive(Debug)]
pub struct OpCompletion {
    pub address: DeviceAddress,
    pub epoch: u64,
    pub result: OpResult,
}

/// Handle to the worker task of one device; dropping it stops the task
#[derive(Debug)]
pub struct DeviceWorker {
    ops: UnboundedSender<(u64, TransportOp)>,
    task: JoinHandle<()>,
}

impl DeviceWorker {
    pub fn spawn(
        address: DeviceAddress,
        transport: Arc<dyn GattTransport>,
        completions: UnboundedSender<OpCompletion>,
    ) -> Self {
        let (ops, mut rx) = mpsc::unbounded_channel::<(u64, TransportOp)>();

        let task = tokio::spawn(async move {
            debug!("[{}] worker started", address);
            while let Some((epoch, op)) = rx.recv().await {
                trace!("[{}] epoch {} -> {:?}", address, epoch, op);
                let result = run_op(transport.as_ref(), &address, op).await;
                if completions.send(OpCompletion { address: address.clone(), epoch, result }).is_err() {
                    break;
                }
            }
            debug!("[{}] worker stopped", address);
        });

        Self { ops, task }
    }

    /// Queue an operation under a session epoch
    pub fn submit(&self, epoch: u64, op: TransportOp) {
        let _ = self.ops.send((epoch, op));
    }
}

impl Drop for DeviceWorker {
    fn drop(&mut self) {
        self.task.abort();
    }
}

async fn run_op(transport: &dyn GattTransport, address: &DeviceAddress, op: TransportOp) -> OpResult {
    match op {
        TransportOp::StartScan(mode) => OpResult::ScanStarted(transport.start_scan(address, mode).await),
        TransportOp::StopScan => {
            if let Err(e) = transport.stop_scan(address).await {
                debug!("[{}] stop scan failed: {}", address, e);
            }
            OpResult::ScanStopped
        }
        TransportOp::Connect { auto_reconnect, cancel } => {
            let result = tokio::select! {
                biased;
                _ = cancel.cancelled() => Err(TransportError::Cancelled),
                result = transport.connect(address, auto_reconnect) => result,
            };
            OpResult::Connected(result)
        }
        TransportOp::Disconnect => {
            if let Err(e) = transport.disconnect(address).await {
                debug!("[{}] disconnect failed: {}", address, e);
            }
            OpResult::Disconnected
        }
        TransportOp::CreateBond => OpResult::Bonded(transport.create_bond(address).await),
        TransportOp::RequestMtu(mtu) => OpResult::MtuNegotiated(transport.request_mtu(address, mtu).await),
        TransportOp::DiscoverServices => OpResult::ServicesDiscovered(transport.discover_services(address).await),
        TransportOp::Write { target, payload, command } => {
            let status = match transport.write(address, target.characteristic(), &payload).await {
                Ok(status) => status,
                Err(e) => {
                    debug!("[{}] write to {:?} failed: {}", address, target, e);
                    GattStatus::ERROR
                }
            };
            OpResult::Written { target, command, status }
        }
    }
}
