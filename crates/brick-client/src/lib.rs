//! brick-client library entry point.
//!
//! Re-exports all public modules so that integration tests in `tests/`
//! and the binary entry point in `main.rs` share the same module tree.
//!
//! # What does brick-client do? (for beginners)
//!
//! This crate is the network half of a Bricklayer game client.  It knows
//! nothing about drawing or game rules; it turns datagrams into typed events
//! and typed messages into datagrams.
//!
//! 1. The client logs in to the **auth service** with connectionless
//!    datagrams and receives an `AuthInit` reply with its keys.
//! 2. It connects to a **game server**, sending its public key as hail data.
//!    The server answers the acceptance with an `Init` handshake describing
//!    the lobby.
//! 3. A dispatch loop then decodes everything the server sends (player
//!    joins, block placements, chat) and publishes each message on the
//!    [`application::events::EventBus`], where UI and world code subscribe.
//! 4. The application sends its own messages through
//!    [`infrastructure::network::NetworkManager`].

/// Application layer: the event bus shared by every subscriber.
pub mod application;

/// Infrastructure layer: transports, connection state, dispatch, and config.
pub mod infrastructure;
