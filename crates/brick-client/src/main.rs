//! Bricklayer client entry point.
//!
//! A headless client that logs in, joins the configured game server, and
//! logs lobby and room traffic until Ctrl-C.
//!
//! # Architecture
//!
//! ```text
//! main()
//!  └─ load_config()              -- ~/.config/bricklayer/config.toml
//!  └─ UdpTransport::bind()
//!  └─ NetworkManager::init()     -- resolves the auth service
//!       └─ DispatchLoop::spawn() -- publishes onto the EventBus
//!  └─ control loop
//!       ├─ auth/init         -> connect to game server with PublicKey hail
//!       ├─ auth/failed_login -> exit
//!       ├─ game/connect      -> request the lobby banner
//!       ├─ game/disconnect   -> exit
//!       └─ Ctrl-C            -> exit
//!  └─ disconnect("Exited game.") -- ends the session; the dispatch loop returns
//! ```
//!
//! The password is read from the `BRICK_PASSWORD` environment variable so it
//! never lands in the config file.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};
use tracing_subscriber::EnvFilter;

use brick_client::application::events::{ConnectEvent, DisconnectEvent, EventBus};
use brick_client::infrastructure::network::udp::UdpTransport;
use brick_client::infrastructure::network::{AlwaysApprove, NetworkManager, Transport};
use brick_client::infrastructure::storage::config::{load_config, ClientConfig};
use brick_core::protocol::messages::{
    AuthInitMessage, AuthLoginMessage, Decoded, InitMessage, Message, MessageType,
    PublicKeyMessage, RequestMessage, Version,
};

/// Reason sent to the server when the user quits.
const EXIT_REASON: &str = "Exited game.";

/// How long to wait for the dispatch loop to drain after the session ends.
const DISPATCH_DRAIN_TIMEOUT: Duration = Duration::from_secs(1);

/// Events forwarded from bus handlers (dispatch task) to the control loop.
#[derive(Debug)]
enum ControlEvent {
    LoggedIn(AuthInitMessage),
    LoginFailed(String),
    Connected(Box<InitMessage>),
    Disconnected(String),
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let (config, config_error) = match load_config() {
        Ok(config) => (config, None),
        Err(e) => (ClientConfig::default(), Some(e)),
    };

    // Initialise structured logging.  `RUST_LOG` wins over the config file.
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(&config.client.log_level)),
        )
        .init();

    if let Some(e) = config_error {
        warn!("could not load config, using defaults: {e}");
    }
    info!("Bricklayer client starting");

    // ── Transport and network manager ─────────────────────────────────────────
    let bind: SocketAddr = config
        .network
        .bind_address
        .parse()
        .with_context(|| format!("invalid bind_address {:?}", config.network.bind_address))?;
    let transport = Arc::new(UdpTransport::bind(bind, config.network.udp_settings()).await?);
    let bus = Arc::new(EventBus::new());

    let (net, dispatch) = NetworkManager::init(
        Arc::clone(&transport),
        Arc::clone(&bus),
        &config.network.auth_address,
        Box::new(AlwaysApprove),
    )
    .await?;
    let dispatch_task = dispatch.spawn();

    // ── Subscribers ───────────────────────────────────────────────────────────
    subscribe_logging(&bus);
    let mut control_rx = subscribe_control(&bus);

    // ── Login ─────────────────────────────────────────────────────────────────
    let password = std::env::var("BRICK_PASSWORD").unwrap_or_default();
    if password.is_empty() {
        warn!("BRICK_PASSWORD is not set; logging in with an empty password");
    }
    net.send_to_auth(&Message::AuthLogin(AuthLoginMessage {
        version: client_version(),
        username: config.client.username.clone(),
        password,
    }))?;
    info!(username = %config.client.username, auth = %net.auth_endpoint(), "login sent");

    // ── Control loop ──────────────────────────────────────────────────────────
    loop {
        tokio::select! {
            event = control_rx.recv() => {
                let Some(event) = event else { break };
                match event {
                    ControlEvent::LoggedIn(auth) => {
                        info!(username = %auth.username, uid = %auth.uid, "logged in");
                        // A repeated auth/init while already connecting is not fatal.
                        if let Err(e) = join_game(&net, &config.network.server_address, auth).await {
                            warn!("not joining game server: {e:#}");
                        }
                    }
                    ControlEvent::LoginFailed(reason) => {
                        error!("login failed: {reason}");
                        break;
                    }
                    ControlEvent::Connected(handshake) => {
                        info!(
                            server = %handshake.server_name,
                            online = handshake.online,
                            rooms = handshake.rooms.len(),
                            "joined lobby"
                        );
                        for room in &handshake.rooms {
                            info!(
                                "  {} ({} online, {} plays, rated {:.1})",
                                room.name, room.online, room.plays, room.rating
                            );
                        }
                        if let Err(e) = net.send(&Message::Request(RequestMessage {
                            requested: MessageType::Banner,
                        })) {
                            warn!("banner request not sent: {e}");
                        }
                    }
                    ControlEvent::Disconnected(reason) => {
                        info!("disconnected: {reason}");
                        break;
                    }
                }
            }
            _ = tokio::signal::ctrl_c() => {
                info!("shutdown signal received");
                break;
            }
        }
    }

    // Idempotent: after a remote disconnect this only confirms the session is closed.
    net.disconnect(EXIT_REASON);
    match tokio::time::timeout(DISPATCH_DRAIN_TIMEOUT, dispatch_task).await {
        Ok(Ok(())) => debug!("dispatch loop finished"),
        Ok(Err(e)) => warn!("dispatch task failed: {e}"),
        Err(_) => warn!("dispatch loop did not finish in time"),
    }
    info!("Bricklayer client stopped");
    Ok(())
}

/// Version reported to the auth service.
fn client_version() -> Version {
    env!("CARGO_PKG_VERSION").parse().unwrap_or_default()
}

/// Resolves the game server and starts connecting with a `PublicKey` hail.
async fn join_game<T: Transport>(
    net: &NetworkManager<T>,
    server_address: &str,
    auth: AuthInitMessage,
) -> anyhow::Result<SocketAddr> {
    let server = resolve(server_address).await?;
    let hail = Message::PublicKey(PublicKeyMessage {
        username: auth.username,
        uid: auth.uid,
        public_key: auth.public_key,
    });
    net.connect_with_hail(server, &hail)
        .with_context(|| format!("connect to {server} refused"))?;
    Ok(server)
}

async fn resolve(address: &str) -> anyhow::Result<SocketAddr> {
    tokio::net::lookup_host(address)
        .await
        .with_context(|| format!("failed to resolve {address}"))?
        .next()
        .with_context(|| format!("{address} resolved to no addresses"))
}

/// Logs game traffic.  Stands in for the UI and world subscribers.
fn subscribe_logging(bus: &EventBus) {
    let game = &bus.network.game;
    game.player_join.add_handler(|m| {
        info!(id = m.player.id, "{} joined", m.player.username);
    });
    game.chat.add_handler(|m| match m.sender {
        Some(id) => info!("[chat] #{id}: {}", m.message),
        None => info!("[chat] {}", m.message),
    });
    game.block_place.add_handler(|m| {
        debug!(x = m.position.x, y = m.position.y, layer = ?m.layer, block = m.block.0, "block placed");
    });
    game.banner.add_handler(|m| {
        info!(bytes = m.banner.len(), "lobby banner received");
    });
    game.init.add_handler(|m| {
        info!(rooms = m.rooms.len(), online = m.online, "lobby refreshed");
    });
    game.latency_updated.add_handler(|e| {
        debug!(rtt_ms = e.round_trip.as_secs_f64() * 1000.0, "latency");
    });
    bus.network.auth.verified.add_handler(|m| {
        debug!(verified = m.verified, "session verification result");
    });
}

/// Forwards the events the control loop acts on over a channel, since
/// handlers run on the dispatch task.
fn subscribe_control(bus: &EventBus) -> mpsc::UnboundedReceiver<ControlEvent> {
    let (tx, rx) = mpsc::unbounded_channel();

    let tx_auth = tx.clone();
    bus.network.auth.init.add_handler(move |m: &Decoded<AuthInitMessage>| {
        let _ = tx_auth.send(ControlEvent::LoggedIn(m.message().clone()));
    });
    let tx_failed = tx.clone();
    bus.network.auth.failed_login.add_handler(move |m| {
        let _ = tx_failed.send(ControlEvent::LoginFailed(m.error_message.clone()));
    });
    let tx_connect = tx.clone();
    bus.network.game.connect.add_handler(move |e: &ConnectEvent| {
        let _ = tx_connect.send(ControlEvent::Connected(Box::new(e.handshake.clone())));
    });
    bus.network.game.disconnect.add_handler(move |e: &DisconnectEvent| {
        let _ = tx.send(ControlEvent::Disconnected(e.reason.clone()));
    });

    rx
}

// ── Tests ─────────────────────────────────────────────────────────────────────
