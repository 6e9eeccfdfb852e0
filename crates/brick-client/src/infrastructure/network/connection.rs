//! Connection state machine.
//!
//! Turns transport status notifications into the semantic `connect` and
//! `disconnect` events on the bus, and owns the per-message gate that makes an
//! explicit [`Connection::disconnect`] safe to call while the dispatch loop is
//! mid-message.
//!
//! ```text
//!                    connect
//!  Disconnected ─────────────────► Connecting
//!       ▲                             │  RespondedAwaitingApproval
//!       │                             ▼
//!       │  Disconnected / None   AwaitingApproval
//!       │  / rejected / bad           │
//!       │  handshake                  │  Connected (+ Init handshake)
//!       └──────────────────────── Connected ◄┘
//! ```
//!
//! An explicit disconnect is valid from every state and forces
//! `Disconnected`; it publishes a `disconnect` event only if the state was not
//! already `Disconnected`, so calling it twice yields one event.
//!
//! Every path back to `Disconnected` also shuts the transport session down.
//! That closes the inbound queue, which in turn ends the dispatch loop, so a
//! `Connection` serves exactly one session.

use std::net::SocketAddr;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread::{self, ThreadId};

use brick_core::protocol::codec::decode_as;
use brick_core::protocol::messages::{InitMessage, MessageContext};
use brick_core::protocol::ProtocolError;
use tracing::{debug, info, warn};

use crate::application::events::{ConnectEvent, DisconnectEvent, EventBus, LatencyUpdatedEvent};
use crate::infrastructure::network::transport::{InboundMessage, Transport, TransportStatus};
use crate::infrastructure::network::NetworkError;

/// Reason published when the transport gives up before the server answers.
pub const CONNECT_FAILED_REASON: &str = "Error connecting to the server.";

/// Reason used when the acceptance handshake is missing or undecodable.
pub const INVALID_HANDSHAKE_REASON: &str = "Invalid handshake.";

/// Logical state of the connection to a game server.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    AwaitingApproval,
    Connected,
}

/// Decides whether to approve a server that answered a connection request.
#[cfg_attr(test, mockall::automock)]
pub trait ApprovalPolicy: Send + Sync {
    /// Returns `Err(reason)` to deny the connection.
    fn review(&self, remote: Option<SocketAddr>) -> Result<(), String>;
}

/// Approves every server.  The default policy.
#[derive(Debug, Default, Clone, Copy)]
pub struct AlwaysApprove;

impl ApprovalPolicy for AlwaysApprove {
    fn review(&self, _remote: Option<SocketAddr>) -> Result<(), String> {
        Ok(())
    }
}

/// State plus the publication gate for a single transport session.
pub struct Connection<T: Transport> {
    transport: Arc<T>,
    bus: Arc<EventBus>,
    policy: Box<dyn ApprovalPolicy>,
    state: Mutex<ConnectionState>,
    /// Held for the whole processing of one inbound message, and by
    /// `disconnect`.
    gate: Mutex<()>,
    /// Thread currently holding `gate`, so a handler that calls
    /// `disconnect` from inside a pass does not lock it a second time.
    gate_owner: Mutex<Option<ThreadId>>,
}

/// Proof that the caller holds the gate.  Released on drop.
pub struct GatePass<'a> {
    owner: Option<&'a Mutex<Option<ThreadId>>>,
    _guard: Option<MutexGuard<'a, ()>>,
}

impl Drop for GatePass<'_> {
    fn drop(&mut self) {
        // Runs before `_guard` is dropped, so the owner is cleared while the
        // gate is still held.
        if let Some(owner) = self.owner {
            *lock(owner) = None;
        }
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

impl<T: Transport> Connection<T> {
    pub fn new(transport: Arc<T>, bus: Arc<EventBus>, policy: Box<dyn ApprovalPolicy>) -> Self {
        Self {
            transport,
            bus,
            policy,
            state: Mutex::new(ConnectionState::Disconnected),
            gate: Mutex::new(()),
            gate_owner: Mutex::new(None),
        }
    }

    pub fn state(&self) -> ConnectionState {
        *lock(&self.state)
    }

    pub fn is_connected(&self) -> bool {
        self.state() == ConnectionState::Connected
    }

    /// Acquires the per-message gate, or a no-op pass if this thread already
    /// holds it.
    pub fn enter(&self) -> GatePass<'_> {
        let me = thread::current().id();
        if *lock(&self.gate_owner) == Some(me) {
            return GatePass {
                owner: None,
                _guard: None,
            };
        }
        let guard = lock(&self.gate);
        *lock(&self.gate_owner) = Some(me);
        GatePass {
            owner: Some(&self.gate_owner),
            _guard: Some(guard),
        }
    }

    // ── Application-initiated transitions ────────────────────────────────────

    /// Disconnected → Connecting, then asks the transport to connect.
    ///
    /// # Errors
    ///
    /// Returns [`NetworkError::InvalidState`] unless currently disconnected,
    /// and [`NetworkError::Transport`] if the transport refuses; the state is
    /// left `Disconnected` in that case.
    pub fn connect(&self, endpoint: SocketAddr, hail: Option<Vec<u8>>) -> Result<(), NetworkError> {
        {
            let mut state = lock(&self.state);
            if *state != ConnectionState::Disconnected {
                return Err(NetworkError::InvalidState(*state));
            }
            *state = ConnectionState::Connecting;
        }
        info!(%endpoint, "connecting to game server");
        if let Err(e) = self.transport.connect(endpoint, hail) {
            self.set_state(ConnectionState::Disconnected);
            return Err(e.into());
        }
        Ok(())
    }

    /// Closes the connection from this side and ends the session.
    ///
    /// Valid in every state.  Once this returns, no further game events are
    /// published for the session; if the state was not already
    /// `Disconnected`, exactly one `disconnect` event has been published.
    pub fn disconnect(&self, reason: &str) {
        let _pass = self.enter();
        self.end_session(reason);
        let previous = self.replace_state(ConnectionState::Disconnected);
        if previous != ConnectionState::Disconnected {
            info!(reason, "disconnected");
            self.publish_disconnect(reason);
        }
    }

    // ── Transport-initiated transitions (called under the gate) ──────────────

    /// Applies a `StatusChanged` notification.
    pub fn handle_status(&self, msg: &InboundMessage) {
        let (status, reason) = match msg.status() {
            Ok(decoded) => decoded,
            Err(e) => {
                warn!("discarding malformed status message: {e}");
                return;
            }
        };
        let current = self.state();
        debug!(?current, ?status, "transport status changed");

        match (current, status) {
            (ConnectionState::Connecting, TransportStatus::RespondedAwaitingApproval) => {
                self.set_state(ConnectionState::AwaitingApproval);
                self.review(msg.sender);
            }
            (
                ConnectionState::Connecting | ConnectionState::AwaitingApproval,
                TransportStatus::Connected,
            ) => match read_handshake(msg.remote_hail.as_deref()) {
                Ok(handshake) => {
                    self.set_state(ConnectionState::Connected);
                    info!(
                        server = %handshake.server_name,
                        version = %handshake.version,
                        "connected to game server"
                    );
                    self.bus.network.game.connect.invoke(&ConnectEvent { handshake });
                }
                Err(e) => {
                    warn!("invalid handshake from server: {e}");
                    self.abort(INVALID_HANDSHAKE_REASON);
                }
            },
            (ConnectionState::Connecting | ConnectionState::AwaitingApproval, TransportStatus::None) => {
                self.set_state(ConnectionState::Disconnected);
                info!("connection attempt failed");
                self.end_session(CONNECT_FAILED_REASON);
                self.publish_disconnect(CONNECT_FAILED_REASON);
            }
            (state, TransportStatus::Disconnected) if state != ConnectionState::Disconnected => {
                self.set_state(ConnectionState::Disconnected);
                info!(reason = %reason, "disconnected by transport");
                self.end_session(&reason);
                self.publish_disconnect(&reason);
            }
            (state, status) => {
                debug!(?state, ?status, "ignoring status with no transition");
            }
        }
    }

    /// Applies a `ConnectionLatencyUpdated` notification.
    pub fn handle_latency(&self, msg: &InboundMessage) {
        if !self.is_connected() {
            debug!("ignoring latency update while not connected");
            return;
        }
        match msg.latency() {
            Ok(round_trip) => self
                .bus
                .network
                .game
                .latency_updated
                .invoke(&LatencyUpdatedEvent { round_trip }),
            Err(e) => warn!("discarding malformed latency message: {e}"),
        }
    }

    fn review(&self, remote: Option<SocketAddr>) {
        match self.policy.review(remote) {
            Ok(()) => {
                debug!(?remote, "approving connection");
                if let Err(e) = self.transport.approve() {
                    warn!("transport approve failed: {e}");
                }
            }
            Err(reason) => {
                info!(?remote, reason = %reason, "denying connection");
                if let Err(e) = self.transport.deny(&reason) {
                    warn!("transport deny failed: {e}");
                }
                self.set_state(ConnectionState::Disconnected);
                self.end_session(&reason);
                self.publish_disconnect(&reason);
            }
        }
    }

    fn abort(&self, reason: &str) {
        self.set_state(ConnectionState::Disconnected);
        self.end_session(reason);
        self.publish_disconnect(reason);
    }

    fn end_session(&self, reason: &str) {
        if let Err(e) = self.transport.shutdown(reason) {
            warn!("transport shutdown failed: {e}");
        }
    }

    fn publish_disconnect(&self, reason: &str) {
        self.bus.network.game.disconnect.invoke(&DisconnectEvent {
            reason: reason.to_string(),
        });
    }

    fn set_state(&self, next: ConnectionState) {
        *lock(&self.state) = next;
    }

    fn replace_state(&self, next: ConnectionState) -> ConnectionState {
        std::mem::replace(&mut *lock(&self.state), next)
    }
}

/// Reads the `Init` handshake from the acceptance data.  The leading byte is
/// the message tag and is skipped.
fn read_handshake(hail: Option<&[u8]>) -> Result<InitMessage, ProtocolError> {
    let hail = hail.ok_or(ProtocolError::InsufficientData {
        needed: 1,
        available: 0,
    })?;
    let (_, body) = hail.split_first().ok_or(ProtocolError::InsufficientData {
        needed: 1,
        available: 0,
    })?;
    decode_as::<InitMessage>(body, MessageContext::Client)
}

// ── Tests ─────────────────────────────────────────────────────────────────────
