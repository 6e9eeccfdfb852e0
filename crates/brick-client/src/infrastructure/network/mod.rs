//! Network infrastructure for the client application.
//!
//! Owns the connection to the game server and the connectionless channel to
//! the auth service, and publishes everything that arrives on the
//! [`EventBus`].
//!
//! Architecture:
//! - A [`Transport`] owns the socket and queues inbound traffic.
//! - [`NetworkManager`] is the outbound surface: `connect`, `send`,
//!   `send_to_auth`, `disconnect`.
//! - [`DispatchLoop`] is the single consumer of the inbound queue.  It is
//!   returned by [`NetworkManager::init`] and must be spawned by the caller.
//! - [`connection::Connection`] holds the state machine shared by both.
//!
//! A manager and its loop serve one transport session.  When the connection
//! returns to `Disconnected` the session is shut down and the loop returns;
//! to connect again, build a new manager on the same transport.

pub mod connection;
pub mod dispatch;
pub mod loopback;
pub mod transport;
pub mod udp;

use std::net::SocketAddr;
use std::sync::Arc;

use brick_core::protocol::codec::{encode_message, ProtocolError};
use brick_core::protocol::messages::Message;
use thiserror::Error;
use tracing::{debug, info};

use crate::application::events::EventBus;
pub use connection::{AlwaysApprove, ApprovalPolicy, ConnectionState};
use connection::Connection;
pub use dispatch::DispatchLoop;
pub use transport::{DeliveryMethod, InboundKind, InboundMessage, Transport, TransportError, TransportStatus};

/// Errors that can occur in the client network layer.
#[derive(Debug, Error)]
pub enum NetworkError {
    /// A connected-channel send was attempted before the server accepted.
    #[error("not connected to a game server")]
    NotConnected,

    /// `connect` was called while a connection was already in progress or up.
    #[error("cannot connect while {0:?}")]
    InvalidState(ConnectionState),

    /// The auth service host name could not be resolved.
    #[error("failed to resolve auth service address {address}: {source}")]
    Resolve {
        address: String,
        #[source]
        source: std::io::Error,
    },

    /// The auth service host name resolved to no addresses.
    #[error("auth service address {0} resolved to nothing")]
    NoAddress(String),

    #[error(transparent)]
    Transport(#[from] TransportError),

    #[error(transparent)]
    Protocol(#[from] ProtocolError),
}

/// Outbound surface of the network layer.
pub struct NetworkManager<T: Transport> {
    transport: Arc<T>,
    connection: Arc<Connection<T>>,
    auth_endpoint: SocketAddr,
}

impl<T: Transport> NetworkManager<T> {
    /// Starts `transport`, resolves the auth service address, and builds the
    /// manager together with its dispatch loop.
    ///
    /// The loop is returned unstarted; call [`DispatchLoop::spawn`] on it.
    ///
    /// # Errors
    ///
    /// Returns [`NetworkError::Resolve`] or [`NetworkError::NoAddress`] if
    /// `auth_address` does not resolve, and [`NetworkError::Transport`] if the
    /// transport was already started.
    pub async fn init(
        transport: Arc<T>,
        bus: Arc<EventBus>,
        auth_address: &str,
        policy: Box<dyn ApprovalPolicy>,
    ) -> Result<(Self, DispatchLoop<T>), NetworkError> {
        let auth_endpoint = tokio::net::lookup_host(auth_address)
            .await
            .map_err(|source| NetworkError::Resolve {
                address: auth_address.to_string(),
                source,
            })?
            .next()
            .ok_or_else(|| NetworkError::NoAddress(auth_address.to_string()))?;
        debug!(auth_address, %auth_endpoint, "resolved auth service");
        Self::with_auth_endpoint(transport, bus, auth_endpoint, policy)
    }

    /// Like [`NetworkManager::init`] with an already-resolved auth endpoint.
    ///
    /// # Errors
    ///
    /// Returns [`NetworkError::Transport`] if the transport was already started.
    pub fn with_auth_endpoint(
        transport: Arc<T>,
        bus: Arc<EventBus>,
        auth_endpoint: SocketAddr,
        policy: Box<dyn ApprovalPolicy>,
    ) -> Result<(Self, DispatchLoop<T>), NetworkError> {
        let inbound = transport.start()?;
        let connection = Arc::new(Connection::new(Arc::clone(&transport), Arc::clone(&bus), policy));
        let dispatch = DispatchLoop::new(
            inbound,
            Arc::clone(&transport),
            Arc::clone(&connection),
            bus,
            auth_endpoint,
        );
        info!(%auth_endpoint, "network initialised");
        Ok((
            Self {
                transport,
                connection,
                auth_endpoint,
            },
            dispatch,
        ))
    }

    pub fn state(&self) -> ConnectionState {
        self.connection.state()
    }

    pub fn auth_endpoint(&self) -> SocketAddr {
        self.auth_endpoint
    }

    /// Begins connecting to a game server with no hail data.
    ///
    /// # Errors
    ///
    /// Returns [`NetworkError::InvalidState`] unless disconnected, and
    /// [`NetworkError::Transport`] once this manager's session has ended.
    pub fn connect(&self, endpoint: SocketAddr) -> Result<(), NetworkError> {
        self.connection.connect(endpoint, None)
    }

    /// Begins connecting to a game server, sending `hail` with the request.
    ///
    /// # Errors
    ///
    /// Returns [`NetworkError::Protocol`] if `hail` cannot be encoded, and
    /// [`NetworkError::InvalidState`] unless disconnected.
    pub fn connect_with_hail(&self, endpoint: SocketAddr, hail: &Message) -> Result<(), NetworkError> {
        let bytes = encode_message(hail)?;
        self.connection.connect(endpoint, Some(bytes))
    }

    /// Closes the connection and ends the session, which stops the dispatch
    /// loop.  Safe in any state; see [`connection::Connection::disconnect`].
    pub fn disconnect(&self, reason: &str) {
        self.connection.disconnect(reason);
    }

    /// Sends `msg` to the game server with the default delivery method.
    ///
    /// # Errors
    ///
    /// Returns [`NetworkError::NotConnected`] unless connected.
    pub fn send(&self, msg: &Message) -> Result<(), NetworkError> {
        self.send_with(msg, DeliveryMethod::default())
    }

    /// Sends `msg` to the game server.
    ///
    /// # Errors
    ///
    /// Returns [`NetworkError::NotConnected`] unless connected,
    /// [`NetworkError::Protocol`] if `msg` cannot be encoded, and
    /// [`NetworkError::Transport`] if the transport rejects it.
    pub fn send_with(&self, msg: &Message, method: DeliveryMethod) -> Result<(), NetworkError> {
        if !self.connection.is_connected() {
            return Err(NetworkError::NotConnected);
        }
        let bytes = encode_message(msg)?;
        self.transport.send(bytes, method)?;
        Ok(())
    }

    /// Sends `msg` to the auth service outside any connection.
    ///
    /// # Errors
    ///
    /// Returns [`NetworkError::Protocol`] if `msg` cannot be encoded and
    /// [`NetworkError::Transport`] if the transport rejects it.
    pub fn send_to_auth(&self, msg: &Message) -> Result<(), NetworkError> {
        let bytes = encode_message(msg)?;
        self.transport.send_unconnected(bytes, self.auth_endpoint)?;
        Ok(())
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
