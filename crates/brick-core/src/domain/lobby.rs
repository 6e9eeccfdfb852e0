//! Lobby listing data sent as part of the server's `Init` handshake.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// One entry in the lobby's room list.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RoomSummary {
    pub uuid: Uuid,
    pub name: String,
    pub description: String,
    /// Players currently in the room.
    pub online: i32,
    /// Total number of times the room has been joined.
    pub plays: i32,
    /// Average user rating, 0.0 – 5.0.
    pub rating: f64,
}
