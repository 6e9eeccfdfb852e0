//! Player identity as broadcast by the game server.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Per-room player identifier assigned by the server.
///
/// IDs are only unique within one room and are reused after a player leaves.
pub type PlayerId = u8;

/// A player as announced in a `PlayerJoin` broadcast.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlayerRecord {
    /// Room-local id used by subsequent messages (chat, movement).
    pub id: PlayerId,
    /// Account UUID issued by the auth service.
    pub uuid: Uuid,
    /// Display name.
    pub username: String,
    /// Tint hue in degrees used when drawing the player's smiley.
    pub hue: i32,
}
