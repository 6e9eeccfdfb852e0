//! Shared records that travel inside protocol messages.
//!
//! These types describe *what* the server tells the client about (players,
//! rooms, blocks) but carry no world-simulation logic: tile storage, collision,
//! and rendering live in the game client proper and consume these records
//! through the event bus.
//!
//! Nothing in this module knows about bytes on the wire.  The codec in
//! [`crate::protocol::codec`] owns the field order for each record.

pub mod lobby;
pub mod player;
pub mod world;
