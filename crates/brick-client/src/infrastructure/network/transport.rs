//! Datagram transport abstraction.
//!
//! The network manager never touches sockets directly.  It talks to a
//! [`Transport`], which owns the socket, frames datagrams, tracks the remote
//! connection, and queues everything it receives as [`InboundMessage`]s.
//!
//! Two implementations ship with the crate:
//!
//! - [`super::udp::UdpTransport`] – the real thing, over a tokio `UdpSocket`.
//! - [`super::loopback::LoopbackTransport`] – in-memory, for tests.
//!
//! # Status payload format
//!
//! `StatusChanged` messages carry `[status:u8][reason_len:u16][reason utf8]`.
//! `ConnectionLatencyUpdated` messages carry the round-trip time in seconds as
//! a big-endian `f32`.  [`InboundMessage::status`] and
//! [`InboundMessage::latency`] read them back.
//!
//! # Sessions
//!
//! [`Transport::start`] opens a session and hands out its inbound queue.
//! [`Transport::shutdown`] ends it: the queue closes once the messages already
//! in it have been taken, so a consumer looping on `recv()` sees `None` and
//! stops.  A later `start` opens a fresh session with a fresh queue.

use std::net::SocketAddr;
use std::time::Duration;

use brick_core::protocol::wire::{write_f32, write_string, write_u8, WireReader};
use brick_core::protocol::ProtocolError;
use thiserror::Error;
use tokio::sync::mpsc;

/// Errors raised by a transport implementation.
#[derive(Debug, Error)]
pub enum TransportError {
    /// Underlying socket failure.
    #[error("transport I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// `start` was called while a session is already open.
    #[error("transport already started")]
    AlreadyStarted,

    /// An operation that needs an open session was called before `start` or
    /// after `shutdown`.
    #[error("transport not started")]
    NotStarted,

    /// `start` needs a tokio runtime to host the receive task.
    #[error("no tokio runtime available to start the transport")]
    NoRuntime,

    /// A connected-channel operation was attempted with no remote peer.
    #[error("no remote connection")]
    NotConnected,
}

/// Transport-level category of an inbound message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum InboundKind {
    /// The connection status changed.  See [`TransportStatus`].
    StatusChanged,
    /// A new round-trip time was measured.
    ConnectionLatencyUpdated,
    /// Application data from the connected peer.
    Data,
    /// Application data from a peer with no connection (e.g. the auth service).
    UnconnectedData,
    VerboseDebug,
    Debug,
    Warning,
    Error,
}

/// Connection status values carried by [`InboundKind::StatusChanged`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum TransportStatus {
    /// The connection attempt failed before any response.
    None = 0,
    Connected = 1,
    Disconnected = 2,
    /// The remote answered and is waiting for this side to approve.
    RespondedAwaitingApproval = 3,
}

impl TryFrom<u8> for TransportStatus {
    type Error = ();

    fn try_from(value: u8) -> Result<Self, ()> {
        match value {
            0 => Ok(TransportStatus::None),
            1 => Ok(TransportStatus::Connected),
            2 => Ok(TransportStatus::Disconnected),
            3 => Ok(TransportStatus::RespondedAwaitingApproval),
            _ => Err(()),
        }
    }
}

/// Delivery guarantee requested for an outbound datagram.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum DeliveryMethod {
    Unreliable,
    UnreliableSequenced,
    #[default]
    ReliableUnordered,
    ReliableSequenced,
    ReliableOrdered,
}

/// One inbound record, borrowed from the transport's pool.
///
/// Every message taken off an [`InboundReceiver`] must be handed back through
/// [`Transport::recycle`] exactly once.
#[derive(Debug, Clone, PartialEq)]
pub struct InboundMessage {
    pub kind: InboundKind,
    /// Remote address, when the transport knows it.
    pub sender: Option<SocketAddr>,
    pub payload: Vec<u8>,
    /// Data the remote attached to its connection acceptance.  Only set on
    /// `StatusChanged` messages reporting [`TransportStatus::Connected`].
    pub remote_hail: Option<Vec<u8>>,
}

impl InboundMessage {
    pub fn new(kind: InboundKind, sender: Option<SocketAddr>, payload: Vec<u8>) -> Self {
        Self {
            kind,
            sender,
            payload,
            remote_hail: None,
        }
    }

    /// Builds a `StatusChanged` message with its encoded payload.
    pub fn status_changed(
        status: TransportStatus,
        reason: &str,
        sender: Option<SocketAddr>,
        remote_hail: Option<Vec<u8>>,
    ) -> Self {
        Self {
            kind: InboundKind::StatusChanged,
            sender,
            payload: encode_status(status, reason),
            remote_hail,
        }
    }

    /// Builds a `ConnectionLatencyUpdated` message.
    pub fn latency_updated(round_trip: Duration, sender: Option<SocketAddr>) -> Self {
        let mut payload = Vec::with_capacity(4);
        write_f32(&mut payload, round_trip.as_secs_f32());
        Self::new(InboundKind::ConnectionLatencyUpdated, sender, payload)
    }

    /// Decodes a `StatusChanged` payload.
    pub fn status(&self) -> Result<(TransportStatus, String), ProtocolError> {
        let mut r = WireReader::new(&self.payload);
        let byte = r.read_u8()?;
        let status = TransportStatus::try_from(byte)
            .map_err(|_| ProtocolError::MalformedPayload(format!("unknown transport status: {byte}")))?;
        // Older peers send the bare status byte.
        let reason = if r.remaining() == 0 {
            String::new()
        } else {
            r.read_string()?
        };
        r.finish()?;
        Ok((status, reason))
    }

    /// Decodes a `ConnectionLatencyUpdated` payload.
    pub fn latency(&self) -> Result<Duration, ProtocolError> {
        let mut r = WireReader::new(&self.payload);
        let seconds = r.read_f32()?;
        r.finish()?;
        Duration::try_from_secs_f32(seconds)
            .map_err(|e| ProtocolError::MalformedPayload(format!("invalid latency {seconds}: {e}")))
    }
}

fn encode_status(status: TransportStatus, reason: &str) -> Vec<u8> {
    let mut payload = Vec::with_capacity(3 + reason.len());
    write_u8(&mut payload, status as u8);
    if write_string(&mut payload, "status.reason", reason).is_err() {
        // An oversized reason is dropped rather than truncated mid-character.
        payload.truncate(1);
        let _ = write_string(&mut payload, "status.reason", "");
    }
    payload
}

/// Receiving half of the transport's inbound queue.
///
/// Handed out once by [`Transport::start`]; whoever holds it is the only
/// consumer of that transport's traffic.
pub type InboundReceiver = mpsc::UnboundedReceiver<InboundMessage>;

/// A datagram transport with connection tracking and an inbound queue.
///
/// All methods are non-blocking and may be called from any thread.
pub trait Transport: Send + Sync + 'static {
    /// Opens a session and returns its inbound queue.
    ///
    /// # Errors
    ///
    /// Returns [`TransportError::AlreadyStarted`] while a session is open.
    fn start(&self) -> Result<InboundReceiver, TransportError>;

    /// Begins connecting to `endpoint`, sending `hail` with the request.
    fn connect(&self, endpoint: SocketAddr, hail: Option<Vec<u8>>) -> Result<(), TransportError>;

    /// Approves a connection that reported `RespondedAwaitingApproval`.
    fn approve(&self) -> Result<(), TransportError>;

    /// Rejects a connection that reported `RespondedAwaitingApproval`.
    fn deny(&self, reason: &str) -> Result<(), TransportError>;

    /// Ends the session.
    ///
    /// Notifies the remote with `reason` if a connection is up, then closes the
    /// inbound queue behind whatever is already queued.  Calling it with no
    /// open session does nothing.
    fn shutdown(&self, reason: &str) -> Result<(), TransportError>;

    /// Queues `payload` on the connected channel.
    fn send(&self, payload: Vec<u8>, method: DeliveryMethod) -> Result<(), TransportError>;

    /// Queues `payload` to `recipient` outside any connection.
    fn send_unconnected(&self, payload: Vec<u8>, recipient: SocketAddr) -> Result<(), TransportError>;

    /// Returns a consumed inbound message to the pool.
    fn recycle(&self, message: InboundMessage);
}

// ── Tests ─────────────────────────────────────────────────────────────────────
