//! # brick-core
//!
//! Shared library for the Bricklayer network layer, containing the binary
//! message protocol and the records that travel inside it.
//!
//! This crate has zero dependencies on sockets, threads, or async runtimes.
//! Everything here is a pure function of its inputs, which is what lets the
//! codec be fuzzed with truncated buffers and benchmarked in isolation.
//!
//! # Architecture overview (for beginners)
//!
//! Bricklayer is a multiplayer block-building game.  A client talks to two
//! kinds of remote peer:
//!
//! - the **auth service**, with connectionless datagrams, to log in and obtain
//!   a key pair;
//! - a **game server**, over an established connection, to receive the lobby,
//!   player joins, block placements and chat.
//!
//! This crate (`brick-core`) defines how those conversations look on the wire:
//!
//! - **`protocol`** – Every message is one datagram: a one-byte
//!   [`MessageType`] tag followed by a big-endian payload.  [`encode_message`]
//!   and [`decode_message`] convert between bytes and the typed [`Message`]
//!   enum; decoding yields a [`Decoded`] that remembers its [`MessageContext`].
//!
//! - **`domain`** – Plain records embedded in messages: players, lobby rooms,
//!   tile coordinates and block ids.
//!
//! The connection state machine, dispatch loop and event bus live in
//! `brick-client`, which depends on this crate.

pub mod domain;
pub mod protocol;

// Re-export the most-used types at the crate root so callers can write
// `brick_core::Message` instead of `brick_core::protocol::messages::Message`.
pub use domain::lobby::RoomSummary;
pub use domain::player::{PlayerId, PlayerRecord};
pub use domain::world::{BlockTypeId, Layer, TilePosition};
pub use protocol::codec::{decode_message, encode_message, ProtocolError};
pub use protocol::messages::{Decoded, Message, MessageContext, MessageType, Version};
