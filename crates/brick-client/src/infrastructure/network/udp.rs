//! UDP [`Transport`] over a tokio `UdpSocket`.
//!
//! Every datagram starts with a one-byte envelope tag that tells the peer how
//! to treat the rest:
//!
//! ```text
//! 0x01 Connect          client → server  [hail...]
//! 0x02 ApprovalRequest  server → client  []
//! 0x03 Approve          client → server  []
//! 0x04 Deny             client → server  [reason:str]
//! 0x05 Accept           server → client  [hail...]
//! 0x06 Disconnect       both             [reason:str]
//! 0x07 Data             both             [message...]
//! 0x08 Unconnected      both             [message...]
//! 0x09 Ping             both             [seq:u32]
//! 0x0A Pong             both             [seq:u32]
//! ```
//!
//! A background task owns the socket for one session.  It reads datagrams,
//! tracks the connection phase, replies to pings, measures round-trip time with
//! its own pings, and gives up on a connection attempt after the configured
//! timeout.  Outbound calls never touch the socket: they push the datagram onto
//! an outbound queue that the task writes out in order.
//!
//! [`Transport::shutdown`] drops the outbound sender.  The task flushes what is
//! still queued, sees the queue close, and exits, which closes the inbound
//! queue behind it.
//!
//! Delivery methods are accepted for API compatibility; every datagram is sent
//! once with no retransmission.

use std::net::SocketAddr;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use brick_core::protocol::wire::{write_string, WireReader};
use tokio::net::UdpSocket;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, trace, warn};

use crate::infrastructure::network::transport::{
    DeliveryMethod, InboundKind, InboundMessage, InboundReceiver, Transport, TransportError,
    TransportStatus,
};

/// Largest datagram the receive task accepts.
const MAX_DATAGRAM: usize = 64 * 1024;

/// Upper bound on idle buffers kept for reuse.
const MAX_POOLED_BUFFERS: usize = 64;

/// How often the background task checks timeouts and ping schedule.
const TICK: Duration = Duration::from_millis(50);

/// A datagram waiting for the background task, with its destination.
type Outgoing = (Vec<u8>, SocketAddr);

// ── Envelope ──────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
enum Packet {
    Connect = 0x01,
    ApprovalRequest = 0x02,
    Approve = 0x03,
    Deny = 0x04,
    Accept = 0x05,
    Disconnect = 0x06,
    Data = 0x07,
    Unconnected = 0x08,
    Ping = 0x09,
    Pong = 0x0A,
}

impl TryFrom<u8> for Packet {
    type Error = ();

    fn try_from(value: u8) -> Result<Self, ()> {
        match value {
            0x01 => Ok(Packet::Connect),
            0x02 => Ok(Packet::ApprovalRequest),
            0x03 => Ok(Packet::Approve),
            0x04 => Ok(Packet::Deny),
            0x05 => Ok(Packet::Accept),
            0x06 => Ok(Packet::Disconnect),
            0x07 => Ok(Packet::Data),
            0x08 => Ok(Packet::Unconnected),
            0x09 => Ok(Packet::Ping),
            0x0A => Ok(Packet::Pong),
            _ => Err(()),
        }
    }
}

fn envelope(packet: Packet, body: &[u8]) -> Vec<u8> {
    let mut buf = Vec::with_capacity(1 + body.len());
    buf.push(packet as u8);
    buf.extend_from_slice(body);
    buf
}

fn reason_body(reason: &str) -> Vec<u8> {
    let mut body = Vec::with_capacity(2 + reason.len());
    if write_string(&mut body, "reason", reason).is_err() {
        body.clear();
        let _ = write_string(&mut body, "reason", "");
    }
    body
}

fn read_reason(body: &[u8]) -> String {
    WireReader::new(body).read_string().unwrap_or_default()
}

// ── Settings ──────────────────────────────────────────────────────────────────

/// Timing knobs for [`UdpTransport`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UdpSettings {
    /// How long to wait for `Accept` before reporting status `None`.
    pub connect_timeout: Duration,
    /// Interval between latency pings while connected.
    pub ping_interval: Duration,
}

impl Default for UdpSettings {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_secs(5),
            ping_interval: Duration::from_secs(1),
        }
    }
}

// ── Connection phase ──────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    Idle,
    Connecting { since: Instant },
    AwaitingApproval { since: Instant },
    Connected,
}

#[derive(Debug)]
struct Peer {
    addr: Option<SocketAddr>,
    phase: Phase,
    ping_seq: u32,
    ping_sent: Option<(u32, Instant)>,
    last_ping: Instant,
}

#[derive(Debug)]
struct Shared {
    socket: UdpSocket,
    settings: UdpSettings,
    peer: Mutex<Peer>,
    pool: Mutex<Vec<Vec<u8>>>,
    /// Present while a session is open.
    outbound: Mutex<Option<mpsc::UnboundedSender<Outgoing>>>,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

impl Shared {
    /// Queues `datagram` for the background task.
    fn send_to(&self, datagram: Vec<u8>, target: SocketAddr) -> Result<(), TransportError> {
        let outbound = lock(&self.outbound);
        let tx = outbound.as_ref().ok_or(TransportError::NotStarted)?;
        tx.send((datagram, target))
            .map_err(|_| TransportError::NotStarted)
    }

    fn pooled(&self, bytes: &[u8]) -> Vec<u8> {
        let mut buf = lock(&self.pool).pop().unwrap_or_default();
        buf.clear();
        buf.extend_from_slice(bytes);
        buf
    }

    /// Handles one datagram.  Returns the inbound messages to queue.
    fn on_datagram(&self, datagram: &[u8], from: SocketAddr) -> Vec<InboundMessage> {
        let Some((&tag, body)) = datagram.split_first() else {
            return Vec::new();
        };
        let Ok(packet) = Packet::try_from(tag) else {
            return vec![diagnostic(
                InboundKind::Warning,
                format!("unknown envelope 0x{tag:02X} from {from}"),
                from,
            )];
        };

        // Connectionless traffic is accepted from anyone; the dispatch loop
        // checks the sender.
        if packet == Packet::Unconnected {
            return vec![InboundMessage::new(
                InboundKind::UnconnectedData,
                Some(from),
                self.pooled(body),
            )];
        }

        let mut peer = lock(&self.peer);
        if peer.addr != Some(from) || peer.phase == Phase::Idle {
            return vec![diagnostic(
                InboundKind::Debug,
                format!("ignoring {packet:?} from {from}: not the connected peer"),
                from,
            )];
        }

        match (packet, peer.phase) {
            (Packet::ApprovalRequest, Phase::Connecting { since }) => {
                peer.phase = Phase::AwaitingApproval { since };
                vec![InboundMessage::status_changed(
                    TransportStatus::RespondedAwaitingApproval,
                    "",
                    Some(from),
                    None,
                )]
            }
            (Packet::Accept, Phase::Connecting { .. } | Phase::AwaitingApproval { .. }) => {
                peer.phase = Phase::Connected;
                peer.last_ping = Instant::now();
                vec![InboundMessage::status_changed(
                    TransportStatus::Connected,
                    "",
                    Some(from),
                    Some(body.to_vec()),
                )]
            }
            (Packet::Disconnect, _) => {
                peer.phase = Phase::Idle;
                peer.ping_sent = None;
                vec![InboundMessage::status_changed(
                    TransportStatus::Disconnected,
                    &read_reason(body),
                    Some(from),
                    None,
                )]
            }
            (Packet::Data, Phase::Connected) => {
                vec![InboundMessage::new(InboundKind::Data, Some(from), self.pooled(body))]
            }
            (Packet::Ping, _) => {
                if let Err(e) = self.send_to(envelope(Packet::Pong, body), from) {
                    debug!("failed to answer ping: {e}");
                }
                Vec::new()
            }
            (Packet::Pong, Phase::Connected) => {
                let seq = WireReader::new(body).read_u32().ok();
                match peer.ping_sent {
                    Some((expected, sent_at)) if Some(expected) == seq => {
                        peer.ping_sent = None;
                        vec![InboundMessage::latency_updated(sent_at.elapsed(), Some(from))]
                    }
                    _ => Vec::new(),
                }
            }
            (packet, phase) => vec![diagnostic(
                InboundKind::Debug,
                format!("ignoring {packet:?} while {phase:?}"),
                from,
            )],
        }
    }

    /// Periodic housekeeping: connect timeout and latency pings.
    fn on_tick(&self) -> Vec<InboundMessage> {
        let mut peer = lock(&self.peer);
        match peer.phase {
            Phase::Connecting { since } | Phase::AwaitingApproval { since }
                if since.elapsed() >= self.settings.connect_timeout =>
            {
                info!(peer = ?peer.addr, "connection attempt timed out");
                peer.phase = Phase::Idle;
                vec![InboundMessage::status_changed(
                    TransportStatus::None,
                    "",
                    peer.addr,
                    None,
                )]
            }
            Phase::Connected if peer.last_ping.elapsed() >= self.settings.ping_interval => {
                let Some(addr) = peer.addr else {
                    return Vec::new();
                };
                peer.ping_seq = peer.ping_seq.wrapping_add(1);
                let seq = peer.ping_seq;
                peer.last_ping = Instant::now();
                match self.send_to(envelope(Packet::Ping, &seq.to_be_bytes()), addr) {
                    Ok(()) => peer.ping_sent = Some((seq, Instant::now())),
                    Err(e) => debug!("failed to send ping: {e}"),
                }
                Vec::new()
            }
            _ => Vec::new(),
        }
    }
}

fn diagnostic(kind: InboundKind, text: String, from: SocketAddr) -> InboundMessage {
    InboundMessage::new(kind, Some(from), text.into_bytes())
}

// ── Transport ─────────────────────────────────────────────────────────────────

/// Datagram transport over UDP.
#[derive(Debug)]
pub struct UdpTransport {
    shared: Arc<Shared>,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl UdpTransport {
    /// Binds a socket on `addr`.
    ///
    /// # Errors
    ///
    /// Returns [`TransportError::Io`] if the bind fails.
    pub async fn bind(addr: SocketAddr, settings: UdpSettings) -> Result<Self, TransportError> {
        let socket = UdpSocket::bind(addr).await?;
        info!(local = %socket.local_addr()?, "UDP transport bound");
        Ok(Self {
            shared: Arc::new(Shared {
                socket,
                settings,
                peer: Mutex::new(Peer {
                    addr: None,
                    phase: Phase::Idle,
                    ping_seq: 0,
                    ping_sent: None,
                    last_ping: Instant::now(),
                }),
                pool: Mutex::new(Vec::new()),
                outbound: Mutex::new(None),
            }),
            task: Mutex::new(None),
        })
    }

    /// Address the socket is bound to.
    ///
    /// # Errors
    ///
    /// Returns [`TransportError::Io`] if the OS cannot report it.
    pub fn local_addr(&self) -> Result<SocketAddr, TransportError> {
        Ok(self.shared.socket.local_addr()?)
    }

    fn peer_addr(&self) -> Result<SocketAddr, TransportError> {
        lock(&self.shared.peer).addr.ok_or(TransportError::NotConnected)
    }
}

impl Drop for UdpTransport {
    fn drop(&mut self) {
        lock(&self.shared.outbound).take();
        if let Some(task) = lock(&self.task).take() {
            task.abort();
        }
    }
}

async fn receive_loop(
    shared: Arc<Shared>,
    tx: mpsc::UnboundedSender<InboundMessage>,
    mut outbound: mpsc::UnboundedReceiver<Outgoing>,
) {
    let mut buf = vec![0u8; MAX_DATAGRAM];
    let mut ticker = tokio::time::interval(TICK);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

    loop {
        let inbound = tokio::select! {
            received = shared.socket.recv_from(&mut buf) => match received {
                Ok((len, from)) => {
                    trace!(len, %from, "datagram received");
                    shared.on_datagram(&buf[..len], from)
                }
                // Some platforms surface ICMP errors from earlier sends here.
                Err(e) => vec![InboundMessage::new(
                    InboundKind::Error,
                    None,
                    format!("socket receive failed: {e}").into_bytes(),
                )],
            },
            outgoing = outbound.recv() => match outgoing {
                Some((datagram, target)) => {
                    if let Err(e) = shared.socket.send_to(&datagram, target).await {
                        warn!(%target, len = datagram.len(), "datagram send failed: {e}");
                    }
                    continue;
                }
                None => {
                    debug!("outbound queue closed; stopping receive task");
                    return;
                }
            },
            _ = ticker.tick() => shared.on_tick(),
        };

        for message in inbound {
            if tx.send(message).is_err() {
                debug!("inbound queue closed; stopping receive task");
                return;
            }
        }
    }
}

impl Transport for UdpTransport {
    fn start(&self) -> Result<InboundReceiver, TransportError> {
        let mut outbound = lock(&self.shared.outbound);
        if outbound.is_some() {
            return Err(TransportError::AlreadyStarted);
        }
        let runtime = tokio::runtime::Handle::try_current().map_err(|_| TransportError::NoRuntime)?;
        let (inbound_tx, inbound_rx) = mpsc::unbounded_channel();
        let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();
        *outbound = Some(outbound_tx);
        drop(outbound);

        // A task from an earlier session exits on its own once it has flushed.
        let handle = runtime.spawn(receive_loop(Arc::clone(&self.shared), inbound_tx, outbound_rx));
        *lock(&self.task) = Some(handle);
        debug!("UDP transport session started");
        Ok(inbound_rx)
    }

    fn connect(&self, endpoint: SocketAddr, hail: Option<Vec<u8>>) -> Result<(), TransportError> {
        if lock(&self.shared.outbound).is_none() {
            return Err(TransportError::NotStarted);
        }
        {
            let mut peer = lock(&self.shared.peer);
            peer.addr = Some(endpoint);
            peer.phase = Phase::Connecting {
                since: Instant::now(),
            };
            peer.ping_sent = None;
        }
        debug!(%endpoint, "sending connect request");
        self.shared
            .send_to(envelope(Packet::Connect, hail.as_deref().unwrap_or_default()), endpoint)
    }

    fn approve(&self) -> Result<(), TransportError> {
        let addr = self.peer_addr()?;
        self.shared.send_to(envelope(Packet::Approve, &[]), addr)
    }

    fn deny(&self, reason: &str) -> Result<(), TransportError> {
        let addr = self.peer_addr()?;
        lock(&self.shared.peer).phase = Phase::Idle;
        self.shared
            .send_to(envelope(Packet::Deny, &reason_body(reason)), addr)
    }

    fn shutdown(&self, reason: &str) -> Result<(), TransportError> {
        let notify = {
            let mut peer = lock(&self.shared.peer);
            let active = peer.phase != Phase::Idle;
            peer.phase = Phase::Idle;
            peer.ping_sent = None;
            peer.addr.filter(|_| active)
        };
        if let Some(addr) = notify {
            if let Err(e) = self
                .shared
                .send_to(envelope(Packet::Disconnect, &reason_body(reason)), addr)
            {
                debug!("could not notify peer of shutdown: {e}");
            }
        }
        if lock(&self.shared.outbound).take().is_some() {
            info!(reason, "UDP transport session closed");
        }
        Ok(())
    }

    fn send(&self, payload: Vec<u8>, method: DeliveryMethod) -> Result<(), TransportError> {
        let addr = {
            let peer = lock(&self.shared.peer);
            match (peer.phase, peer.addr) {
                (Phase::Connected, Some(addr)) => addr,
                _ => return Err(TransportError::NotConnected),
            }
        };
        trace!(len = payload.len(), ?method, %addr, "sending data");
        self.shared.send_to(envelope(Packet::Data, &payload), addr)
    }

    fn send_unconnected(&self, payload: Vec<u8>, recipient: SocketAddr) -> Result<(), TransportError> {
        trace!(len = payload.len(), %recipient, "sending unconnected");
        self.shared
            .send_to(envelope(Packet::Unconnected, &payload), recipient)
    }

    fn recycle(&self, message: InboundMessage) {
        let mut pool = lock(&self.shared.pool);
        if pool.len() < MAX_POOLED_BUFFERS {
            pool.push(message.payload);
        }
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
