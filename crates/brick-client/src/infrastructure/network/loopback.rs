//! In-memory [`Transport`] for tests.
//!
//! Nothing leaves the process.  Outbound calls are recorded so a test can
//! assert on them, and inbound traffic is injected by the test through the
//! `inject_*` helpers.  Payload buffers are drawn from a small pool and
//! counted, so a test can prove every delivered message came back through
//! [`Transport::recycle`].
//!
//! A fresh loopback already has an open queue, so tests may inject before
//! calling `start`.  After `shutdown` (or `close`) the next `start` opens a new
//! queue.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use tokio::sync::mpsc;
use tracing::trace;

use crate::infrastructure::network::transport::{
    DeliveryMethod, InboundKind, InboundMessage, InboundReceiver, Transport, TransportError,
    TransportStatus,
};

/// Outbound connected-channel datagram captured by the loopback.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SentPacket {
    pub payload: Vec<u8>,
    pub method: DeliveryMethod,
}

/// Outbound connectionless datagram captured by the loopback.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SentUnconnected {
    pub payload: Vec<u8>,
    pub recipient: SocketAddr,
}

/// A connection request captured by the loopback.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectRequest {
    pub endpoint: SocketAddr,
    pub hail: Option<Vec<u8>>,
}

#[derive(Debug, Default)]
struct Outbound {
    connects: Vec<ConnectRequest>,
    sent: Vec<SentPacket>,
    unconnected: Vec<SentUnconnected>,
    denials: Vec<String>,
    shutdowns: Vec<String>,
}

#[derive(Debug)]
pub struct LoopbackTransport {
    tx: Mutex<Option<mpsc::UnboundedSender<InboundMessage>>>,
    rx: Mutex<Option<InboundReceiver>>,
    outbound: Mutex<Outbound>,
    pool: Mutex<Vec<Vec<u8>>>,
    approvals: AtomicUsize,
    injected: AtomicUsize,
    recycled: AtomicUsize,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

impl LoopbackTransport {
    pub fn new() -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        Self {
            tx: Mutex::new(Some(tx)),
            rx: Mutex::new(Some(rx)),
            outbound: Mutex::new(Outbound::default()),
            pool: Mutex::new(Vec::new()),
            approvals: AtomicUsize::new(0),
            injected: AtomicUsize::new(0),
            recycled: AtomicUsize::new(0),
        }
    }

    // ── Inbound injection ────────────────────────────────────────────────────

    /// Queues `msg` for the dispatch loop.  Returns `false` once closed.
    pub fn inject(&self, msg: InboundMessage) -> bool {
        match lock(&self.tx).as_ref() {
            Some(tx) => {
                let delivered = tx.send(msg).is_ok();
                if delivered {
                    self.injected.fetch_add(1, Ordering::SeqCst);
                }
                delivered
            }
            None => false,
        }
    }

    /// Queues connected-channel data, copied into a pooled buffer.
    pub fn inject_data(&self, bytes: &[u8]) -> bool {
        let payload = self.pooled(bytes);
        self.inject(InboundMessage::new(InboundKind::Data, None, payload))
    }

    /// Queues connectionless data from `sender`.
    pub fn inject_unconnected(&self, sender: SocketAddr, bytes: &[u8]) -> bool {
        let payload = self.pooled(bytes);
        self.inject(InboundMessage::new(InboundKind::UnconnectedData, Some(sender), payload))
    }

    /// Queues a status change.  `hail` is the server's acceptance data.
    pub fn inject_status(&self, status: TransportStatus, reason: &str, hail: Option<Vec<u8>>) -> bool {
        self.inject(InboundMessage::status_changed(status, reason, None, hail))
    }

    pub fn inject_latency(&self, round_trip: Duration) -> bool {
        self.inject(InboundMessage::latency_updated(round_trip, None))
    }

    /// Closes the inbound queue.  The dispatch loop ends once it has drained
    /// what was already queued.
    pub fn close(&self) {
        lock(&self.tx).take();
    }

    fn pooled(&self, bytes: &[u8]) -> Vec<u8> {
        let mut buf = lock(&self.pool).pop().unwrap_or_default();
        buf.clear();
        buf.extend_from_slice(bytes);
        buf
    }

    // ── Outbound inspection ──────────────────────────────────────────────────

    pub fn connects(&self) -> Vec<ConnectRequest> {
        lock(&self.outbound).connects.clone()
    }

    pub fn sent(&self) -> Vec<SentPacket> {
        lock(&self.outbound).sent.clone()
    }

    pub fn sent_unconnected(&self) -> Vec<SentUnconnected> {
        lock(&self.outbound).unconnected.clone()
    }

    pub fn approvals(&self) -> usize {
        self.approvals.load(Ordering::SeqCst)
    }

    pub fn denials(&self) -> Vec<String> {
        lock(&self.outbound).denials.clone()
    }

    /// Reasons passed to `shutdown`, one per call.
    pub fn shutdowns(&self) -> Vec<String> {
        lock(&self.outbound).shutdowns.clone()
    }

    /// Messages successfully queued so far.
    pub fn injected(&self) -> usize {
        self.injected.load(Ordering::SeqCst)
    }

    /// Messages returned through `recycle` so far.
    pub fn recycled(&self) -> usize {
        self.recycled.load(Ordering::SeqCst)
    }

    /// Buffers currently sitting in the pool.
    pub fn pooled_buffers(&self) -> usize {
        lock(&self.pool).len()
    }
}

impl Default for LoopbackTransport {
    fn default() -> Self {
        Self::new()
    }
}

impl Transport for LoopbackTransport {
    fn start(&self) -> Result<InboundReceiver, TransportError> {
        if let Some(rx) = lock(&self.rx).take() {
            return Ok(rx);
        }
        let mut tx = lock(&self.tx);
        if tx.is_some() {
            return Err(TransportError::AlreadyStarted);
        }
        let (new_tx, rx) = mpsc::unbounded_channel();
        *tx = Some(new_tx);
        trace!("loopback session reopened");
        Ok(rx)
    }

    fn connect(&self, endpoint: SocketAddr, hail: Option<Vec<u8>>) -> Result<(), TransportError> {
        if lock(&self.tx).is_none() {
            return Err(TransportError::NotStarted);
        }
        lock(&self.outbound).connects.push(ConnectRequest { endpoint, hail });
        Ok(())
    }

    fn approve(&self) -> Result<(), TransportError> {
        self.approvals.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn deny(&self, reason: &str) -> Result<(), TransportError> {
        lock(&self.outbound).denials.push(reason.to_string());
        Ok(())
    }

    fn shutdown(&self, reason: &str) -> Result<(), TransportError> {
        lock(&self.outbound).shutdowns.push(reason.to_string());
        self.close();
        Ok(())
    }

    fn send(&self, payload: Vec<u8>, method: DeliveryMethod) -> Result<(), TransportError> {
        trace!(len = payload.len(), ?method, "loopback send");
        lock(&self.outbound).sent.push(SentPacket { payload, method });
        Ok(())
    }

    fn send_unconnected(&self, payload: Vec<u8>, recipient: SocketAddr) -> Result<(), TransportError> {
        lock(&self.outbound)
            .unconnected
            .push(SentUnconnected { payload, recipient });
        Ok(())
    }

    fn recycle(&self, message: InboundMessage) {
        self.recycled.fetch_add(1, Ordering::SeqCst);
        lock(&self.pool).push(message.payload);
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
