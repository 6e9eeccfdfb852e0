//! Inbound dispatch loop.
//!
//! A single task that owns the transport's inbound queue.  It suspends until
//! at least one message is queued, then drains the queue synchronously in
//! arrival order, classifying each message and publishing the result on the
//! event bus.
//!
//! # Per-message guarantees
//!
//! - The connection gate is held while a message is processed, so an explicit
//!   disconnect from another thread waits for the current message to finish.
//! - The message goes back to the transport through [`Transport::recycle`]
//!   exactly once, whether processing succeeds, fails to decode, or a
//!   subscriber panics.  A [`Recycle`] guard does this on drop.
//! - Decode failures and subscriber panics are logged and never end the loop.
//!
//! Only one loop can exist per transport session: the loop owns the
//! [`InboundReceiver`], and `Transport::start` hands that out once per
//! session.  The loop returns when the session is shut down, which happens on
//! every transition back to `Disconnected`.

use std::any::Any;
use std::net::SocketAddr;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;

use brick_core::protocol::codec::decode_message;
use brick_core::protocol::messages::{Decoded, Message, MessageContext};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, trace, warn};

use crate::application::events::EventBus;
use crate::infrastructure::network::connection::Connection;
use crate::infrastructure::network::transport::{
    InboundKind, InboundMessage, InboundReceiver, Transport,
};

/// Returns the wrapped message to the transport when dropped.
struct Recycle<'a, T: Transport> {
    transport: &'a T,
    message: Option<InboundMessage>,
}

impl<T: Transport> Drop for Recycle<'_, T> {
    fn drop(&mut self) {
        if let Some(message) = self.message.take() {
            self.transport.recycle(message);
        }
    }
}

/// The inbound dispatch loop for one transport session.
pub struct DispatchLoop<T: Transport> {
    inbound: InboundReceiver,
    transport: Arc<T>,
    connection: Arc<Connection<T>>,
    bus: Arc<EventBus>,
    auth_endpoint: SocketAddr,
}

impl<T: Transport> DispatchLoop<T> {
    pub(crate) fn new(
        inbound: InboundReceiver,
        transport: Arc<T>,
        connection: Arc<Connection<T>>,
        bus: Arc<EventBus>,
        auth_endpoint: SocketAddr,
    ) -> Self {
        Self {
            inbound,
            transport,
            connection,
            bus,
            auth_endpoint,
        }
    }

    /// Spawns [`DispatchLoop::run`] on the current tokio runtime.
    pub fn spawn(self) -> JoinHandle<()> {
        tokio::spawn(self.run())
    }

    /// Runs until the transport closes its inbound queue.
    pub async fn run(mut self) {
        info!(auth = %self.auth_endpoint, "dispatch loop started");
        while let Some(first) = self.inbound.recv().await {
            self.drain(first);
        }
        info!("dispatch loop stopped: inbound queue closed");
    }

    /// Processes `first` and everything queued behind it without yielding.
    fn drain(&mut self, first: InboundMessage) {
        let mut processed = 0usize;
        let mut next = Some(first);
        while let Some(message) = next {
            self.process(message);
            processed += 1;
            next = self.inbound.try_recv().ok();
        }
        trace!(processed, "drain pass complete");
    }

    fn process(&self, message: InboundMessage) {
        let guard = Recycle {
            transport: &*self.transport,
            message: Some(message),
        };
        let _pass = self.connection.enter();
        if let Some(message) = guard.message.as_ref() {
            let outcome = panic::catch_unwind(AssertUnwindSafe(|| self.classify(message)));
            if let Err(payload) = outcome {
                error!(
                    kind = ?message.kind,
                    "event handler panicked: {}",
                    panic_message(payload.as_ref())
                );
            }
        }
    }

    fn classify(&self, message: &InboundMessage) {
        match message.kind {
            InboundKind::StatusChanged => self.connection.handle_status(message),
            InboundKind::ConnectionLatencyUpdated => self.connection.handle_latency(message),
            InboundKind::Data => self.handle_data(message),
            InboundKind::UnconnectedData => self.handle_unconnected(message),
            InboundKind::VerboseDebug => trace!("transport: {}", diagnostic_text(message)),
            InboundKind::Debug => debug!("transport: {}", diagnostic_text(message)),
            InboundKind::Warning => warn!("transport: {}", diagnostic_text(message)),
            InboundKind::Error => error!("transport: {}", diagnostic_text(message)),
        }
    }

    fn handle_data(&self, message: &InboundMessage) {
        if !self.connection.is_connected() {
            debug!(state = ?self.connection.state(), "discarding data received while not connected");
            return;
        }
        let decoded = match decode_message(&message.payload, MessageContext::Client) {
            Ok(decoded) => decoded,
            Err(e) => {
                warn!(len = message.payload.len(), "discarding undecodable data message: {e}");
                return;
            }
        };
        trace!(msg_type = ?decoded.message_type(), "dispatching data message");

        let game = &self.bus.network.game;
        let (context, decoded) = decoded.into_parts();
        match decoded {
            Message::Init(m) => game.init.invoke(&Decoded::new(context, m)),
            Message::Banner(m) => game.banner.invoke(&Decoded::new(context, m)),
            Message::PlayerJoin(m) => game.player_join.invoke(&Decoded::new(context, m)),
            Message::BlockPlace(m) => game.block_place.invoke(&Decoded::new(context, m)),
            Message::Chat(m) => game.chat.invoke(&Decoded::new(context, m)),
            other => debug!(msg_type = ?other.message_type(), "no client-side event for data message"),
        }
    }

    fn handle_unconnected(&self, message: &InboundMessage) {
        if !message
            .sender
            .is_some_and(|sender| same_endpoint(sender, self.auth_endpoint))
        {
            trace!(sender = ?message.sender, "dropping unconnected message from unknown sender");
            return;
        }
        let decoded = match decode_message(&message.payload, MessageContext::Client) {
            Ok(decoded) if decoded.message_type().is_unconnected() => decoded,
            Ok(decoded) => {
                debug!(
                    msg_type = ?decoded.message_type(),
                    "discarding connected-channel message type from auth service"
                );
                return;
            }
            Err(e) => {
                warn!("discarding undecodable message from auth service: {e}");
                return;
            }
        };

        let auth = &self.bus.network.auth;
        let (context, decoded) = decoded.into_parts();
        match decoded {
            Message::AuthInit(m) => auth.init.invoke(&Decoded::new(context, m)),
            Message::FailedLogin(m) => auth.failed_login.invoke(&Decoded::new(context, m)),
            Message::Verified(m) => auth.verified.invoke(&Decoded::new(context, m)),
            other => debug!(
                msg_type = ?other.message_type(),
                "discarding unexpected message type from auth service"
            ),
        }
    }
}

/// Address equality that treats an IPv4-mapped IPv6 address as the IPv4
/// address it wraps.  Dual-stack sockets report IPv4 peers in mapped form.
fn same_endpoint(a: SocketAddr, b: SocketAddr) -> bool {
    a.port() == b.port() && a.ip().to_canonical() == b.ip().to_canonical()
}

fn diagnostic_text(message: &InboundMessage) -> std::borrow::Cow<'_, str> {
    String::from_utf8_lossy(&message.payload)
}

fn panic_message(payload: &(dyn Any + Send)) -> &str {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.as_str()
    } else {
        "<non-string panic payload>"
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
