//! All Bricklayer protocol message types.
//!
//! Every message on the wire is a single transport datagram of the form
//! `[msg_type:1][payload]`.  The transport provides framing, so payloads carry
//! no outer length prefix; each message is self-describing only through its
//! [`MessageType`] tag.
//!
//! Messages fall into two channels:
//!
//! - **Unconnected** (auth service): `AuthLogin`, `AuthInit`, `FailedLogin`,
//!   `Verified`.  Exchanged without an established connection.
//! - **Connected** (game server): everything else.  `PublicKey` is sent as the
//!   connection's hail data and `Init` comes back in the acceptance handshake.

use std::fmt;
use std::ops::Deref;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::domain::lobby::RoomSummary;
use crate::domain::player::{PlayerId, PlayerRecord};
use crate::domain::world::{BlockTypeId, Layer, TilePosition};

// ── Message type codes ────────────────────────────────────────────────────────

/// All message type codes.  The ordinal is the leading byte of every message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u8)]
pub enum MessageType {
    // Auth service (unconnected)
    AuthLogin = 0,
    AuthInit = 1,
    FailedLogin = 2,
    Verified = 3,
    // Game server (connected)
    PublicKey = 4,
    Init = 5,
    Request = 6,
    Banner = 7,
    PlayerJoin = 8,
    BlockPlace = 9,
    Chat = 10,
}

impl MessageType {
    /// Every message type, in tag order.
    ///
    /// Used by the registry tests to prove each tag has an encoder and a decoder.
    pub const ALL: [MessageType; 11] = [
        MessageType::AuthLogin,
        MessageType::AuthInit,
        MessageType::FailedLogin,
        MessageType::Verified,
        MessageType::PublicKey,
        MessageType::Init,
        MessageType::Request,
        MessageType::Banner,
        MessageType::PlayerJoin,
        MessageType::BlockPlace,
        MessageType::Chat,
    ];

    /// Whether this type is exchanged with the auth service outside a connection.
    pub fn is_unconnected(self) -> bool {
        matches!(
            self,
            MessageType::AuthLogin
                | MessageType::AuthInit
                | MessageType::FailedLogin
                | MessageType::Verified
        )
    }
}

impl TryFrom<u8> for MessageType {
    type Error = ();

    fn try_from(value: u8) -> Result<Self, ()> {
        MessageType::ALL.get(value as usize).copied().ok_or(())
    }
}

// ── Decode context ────────────────────────────────────────────────────────────

/// Which side of the connection decoded a message.
///
/// Some message types have an asymmetric shape: a server-originated `Chat`
/// carries the sender's id, a client-originated one does not.  Decoders use
/// this tag to pick the right layout.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum MessageContext {
    /// Decoded by the client, i.e. the message came from a server.
    Client,
    /// Decoded by a server, i.e. the message came from a client.
    Server,
}

/// A decoded message together with the context it was decoded in.
///
/// The context is fixed when the decoder builds the value and cannot be
/// changed afterwards.  `Decoded<M>` derefs to `M`, so subscribers can read
/// payload fields directly (`chat.sender`, `init.rooms`).
#[derive(Debug, Clone, PartialEq)]
pub struct Decoded<M = Message> {
    context: MessageContext,
    inner: M,
}

impl<M> Decoded<M> {
    pub fn new(context: MessageContext, message: M) -> Self {
        Self {
            context,
            inner: message,
        }
    }

    /// Which side decoded this message.
    pub fn context(&self) -> MessageContext {
        self.context
    }

    pub fn message(&self) -> &M {
        &self.inner
    }

    pub fn into_message(self) -> M {
        self.inner
    }

    pub fn into_parts(self) -> (MessageContext, M) {
        (self.context, self.inner)
    }
}

impl<M> Deref for Decoded<M> {
    type Target = M;

    fn deref(&self) -> &M {
        &self.inner
    }
}

// ── Version ───────────────────────────────────────────────────────────────────

/// Four-part build version (major.minor.build.revision).
///
/// Field order is significant: the derived `Ord` compares major first, then
/// minor, build and revision, which is the compatibility key the auth service
/// uses to decide whether a client must update.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize, Deserialize)]
pub struct Version {
    pub major: i32,
    pub minor: i32,
    pub build: i32,
    pub revision: i32,
}

impl Version {
    pub const fn new(major: i32, minor: i32, build: i32, revision: i32) -> Self {
        Self {
            major,
            minor,
            build,
            revision,
        }
    }
}

impl fmt::Display for Version {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}.{}.{}", self.major, self.minor, self.build, self.revision)
    }
}

impl FromStr for Version {
    type Err = String;

    /// Parses `"1.2.3.4"`.  Missing trailing components default to 0, so
    /// `"1.2"` parses as `1.2.0.0`.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut parts = [0i32; 4];
        let mut count = 0;
        for (i, piece) in s.trim().split('.').enumerate() {
            if i >= 4 {
                return Err(format!("too many version components in {s:?}"));
            }
            parts[i] = piece
                .parse()
                .map_err(|e| format!("invalid version component {piece:?}: {e}"))?;
            count += 1;
        }
        if count == 0 {
            return Err("empty version".to_string());
        }
        Ok(Version::new(parts[0], parts[1], parts[2], parts[3]))
    }
}

// ── Auth service messages ─────────────────────────────────────────────────────

/// AUTH_LOGIN (0): client → auth.  Credentials plus the client build version.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthLoginMessage {
    pub version: Version,
    pub username: String,
    pub password: String,
}

/// AUTH_INIT (1): auth → client.  Issued after a successful login.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthInitMessage {
    pub username: String,
    pub uid: Uuid,
    pub private_key: Vec<u8>,
    pub public_key: Vec<u8>,
}

/// FAILED_LOGIN (2): auth → client.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FailedLoginMessage {
    pub error_message: String,
}

/// VERIFIED (3): auth → client.  Result of a game-server session verification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct VerifiedMessage {
    pub verified: bool,
}

// ── Game server messages ──────────────────────────────────────────────────────

/// PUBLIC_KEY (4): client → game server, sent as the connection hail.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PublicKeyMessage {
    pub username: String,
    pub uid: Uuid,
    pub public_key: Vec<u8>,
}

/// INIT (5): game server → client.  Sent in the acceptance handshake and on
/// request to refresh the lobby.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InitMessage {
    pub version: Version,
    pub server_name: String,
    pub description: String,
    /// Lobby intro text; may contain `$variables` expanded by the UI.
    pub intro: String,
    pub online: i32,
    pub rooms: Vec<RoomSummary>,
}

/// REQUEST (6): client → game server.  Asks the server to (re)send a message
/// of the given type, e.g. `Init` or `Banner`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RequestMessage {
    pub requested: MessageType,
}

/// BANNER (7): game server → client.  Encoded lobby banner image.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BannerMessage {
    pub banner: Vec<u8>,
}

/// PLAYER_JOIN (8): game server → client broadcast.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlayerJoinMessage {
    pub player: PlayerRecord,
}

/// BLOCK_PLACE (9): both directions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockPlaceMessage {
    pub position: TilePosition,
    pub layer: Layer,
    pub block: BlockTypeId,
}

/// CHAT (10): both directions.
///
/// `sender` is present only on server-originated chat; the server stamps the
/// id of the player who spoke.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub sender: Option<PlayerId>,
    pub message: String,
}

// ── Top-level message enum ────────────────────────────────────────────────────

/// Any Bricklayer protocol message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Message {
    AuthLogin(AuthLoginMessage),
    AuthInit(AuthInitMessage),
    FailedLogin(FailedLoginMessage),
    Verified(VerifiedMessage),
    PublicKey(PublicKeyMessage),
    Init(InitMessage),
    Request(RequestMessage),
    Banner(BannerMessage),
    PlayerJoin(PlayerJoinMessage),
    BlockPlace(BlockPlaceMessage),
    Chat(ChatMessage),
}

impl Message {
    /// Returns the [`MessageType`] code for this message.
    pub fn message_type(&self) -> MessageType {
        match self {
            Message::AuthLogin(_) => MessageType::AuthLogin,
            Message::AuthInit(_) => MessageType::AuthInit,
            Message::FailedLogin(_) => MessageType::FailedLogin,
            Message::Verified(_) => MessageType::Verified,
            Message::PublicKey(_) => MessageType::PublicKey,
            Message::Init(_) => MessageType::Init,
            Message::Request(_) => MessageType::Request,
            Message::Banner(_) => MessageType::Banner,
            Message::PlayerJoin(_) => MessageType::PlayerJoin,
            Message::BlockPlace(_) => MessageType::BlockPlace,
            Message::Chat(_) => MessageType::Chat,
        }
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
