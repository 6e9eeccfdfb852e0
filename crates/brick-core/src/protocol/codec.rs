//! Binary codec for encoding and decoding Bricklayer protocol messages.
//!
//! Wire format:
//! ```text
//! [msg_type:1][payload:N]
//! ```
//! The transport frames each datagram, so there is no length header.  Field
//! layouts per message are documented on each [`Payload`] impl below; the
//! primitive encodings live in [`crate::protocol::wire`].
//!
//! # Registry
//!
//! The mapping from tag byte to decoder is the exhaustive `match` in
//! [`decode_payload`].  Adding a variant to [`MessageType`] without a decoder
//! is a compile error, and `test_every_message_type_has_encoder_and_decoder`
//! checks the reverse direction.

use thiserror::Error;
use tracing::trace;

use crate::domain::lobby::RoomSummary;
use crate::domain::player::PlayerRecord;
use crate::domain::world::{BlockTypeId, Layer, TilePosition};
use crate::protocol::messages::{
    AuthInitMessage, AuthLoginMessage, BannerMessage, BlockPlaceMessage, ChatMessage, Decoded,
    FailedLoginMessage, InitMessage, Message, MessageContext, MessageType, PlayerJoinMessage,
    PublicKeyMessage, RequestMessage, VerifiedMessage,
};
use crate::protocol::wire::{
    write_blob, write_bool, write_f64, write_i32, write_string, write_u16, write_u8, write_uuid,
    write_version, WireReader,
};

/// Errors that can occur during message encoding or decoding.
#[derive(Debug, Error, PartialEq)]
pub enum ProtocolError {
    /// The buffer ended before a field could be read.
    #[error("insufficient data: need at least {needed} bytes, got {available}")]
    InsufficientData { needed: usize, available: usize },

    /// The message type byte is not a recognized value.
    #[error("unknown message type: 0x{0:02X}")]
    UnknownMessageType(u8),

    /// The payload could not be parsed (field value out of range, UTF-8 error, etc.).
    #[error("malformed payload: {0}")]
    MalformedPayload(String),

    /// The payload decoded successfully but bytes were left over.
    #[error("{extra} trailing byte(s) after payload")]
    TrailingBytes { extra: usize },

    /// A variable-length field does not fit its length prefix.
    #[error("field {field} is {len} bytes, maximum is {max}")]
    FieldTooLong {
        field: &'static str,
        len: usize,
        max: usize,
    },
}

/// Encode/decode capability implemented by every message payload.
///
/// `encode` writes the fields only; [`encode_message`] writes
/// `MESSAGE_TYPE` as the tag byte in front of them.  `decode` must consume exactly the bytes `encode`
/// produced for the same `context`.
pub trait Payload: Sized {
    /// The tag this payload travels under.
    const MESSAGE_TYPE: MessageType;

    /// Appends this payload's fields to `buf`.
    fn encode(&self, buf: &mut Vec<u8>) -> Result<(), ProtocolError>;

    /// Reads this payload's fields from `r`.
    fn decode(r: &mut WireReader<'_>, context: MessageContext) -> Result<Self, ProtocolError>;
}

// ── Public API ────────────────────────────────────────────────────────────────

/// Encodes a [`Message`] into a byte vector including the leading tag byte.
///
/// # Errors
///
/// Returns [`ProtocolError::FieldTooLong`] if a string or blob field exceeds
/// its length prefix.
///
/// # Examples
///
/// ```rust
/// use brick_core::protocol::{decode_message, encode_message};
/// use brick_core::protocol::messages::{Message, MessageContext, VerifiedMessage};
///
/// let msg = Message::Verified(VerifiedMessage { verified: true });
/// let bytes = encode_message(&msg).unwrap();
/// assert_eq!(bytes, vec![3, 1]);
/// let decoded = decode_message(&bytes, MessageContext::Client).unwrap();
/// assert_eq!(decoded.message(), &msg);
/// ```
pub fn encode_message(msg: &Message) -> Result<Vec<u8>, ProtocolError> {
    let mut buf = Vec::with_capacity(32);
    match msg {
        Message::AuthLogin(m) => encode_tagged(m, &mut buf)?,
        Message::AuthInit(m) => encode_tagged(m, &mut buf)?,
        Message::FailedLogin(m) => encode_tagged(m, &mut buf)?,
        Message::Verified(m) => encode_tagged(m, &mut buf)?,
        Message::PublicKey(m) => encode_tagged(m, &mut buf)?,
        Message::Init(m) => encode_tagged(m, &mut buf)?,
        Message::Request(m) => encode_tagged(m, &mut buf)?,
        Message::Banner(m) => encode_tagged(m, &mut buf)?,
        Message::PlayerJoin(m) => encode_tagged(m, &mut buf)?,
        Message::BlockPlace(m) => encode_tagged(m, &mut buf)?,
        Message::Chat(m) => encode_tagged(m, &mut buf)?,
    }
    Ok(buf)
}

fn encode_tagged<P: Payload>(payload: &P, buf: &mut Vec<u8>) -> Result<(), ProtocolError> {
    buf.push(P::MESSAGE_TYPE as u8);
    payload.encode(buf)
}

/// Decodes one [`Message`] from a complete datagram.
///
/// The result carries `context`, so later consumers know which side decoded it.
///
/// # Errors
///
/// Returns [`ProtocolError::UnknownMessageType`] if the tag has no decoder,
/// and any payload error from [`decode_payload`].
///
/// # Examples
///
/// ```rust
/// use brick_core::protocol::{decode_message, ProtocolError};
/// use brick_core::protocol::messages::MessageContext;
///
/// let err = decode_message(&[0xEE], MessageContext::Client).unwrap_err();
/// assert_eq!(err, ProtocolError::UnknownMessageType(0xEE));
/// ```
pub fn decode_message(bytes: &[u8], context: MessageContext) -> Result<Decoded, ProtocolError> {
    let (&tag, payload) = bytes.split_first().ok_or(ProtocolError::InsufficientData {
        needed: 1,
        available: 0,
    })?;
    let msg_type = read_message_type(tag)?;
    trace!(?msg_type, len = payload.len(), ?context, "decoding message");
    decode_payload(msg_type, payload, context)
}

/// Decodes a payload whose tag has already been consumed.
///
/// Used for the connection handshake, where the transport's acceptance data
/// carries an `Init` body after a discarded leading byte.
///
/// # Errors
///
/// Returns [`ProtocolError`] if the payload is truncated, malformed, or has
/// trailing bytes.
pub fn decode_payload(
    msg_type: MessageType,
    payload: &[u8],
    context: MessageContext,
) -> Result<Decoded, ProtocolError> {
    let mut r = WireReader::new(payload);
    let msg = match msg_type {
        MessageType::AuthLogin => Message::AuthLogin(AuthLoginMessage::decode(&mut r, context)?),
        MessageType::AuthInit => Message::AuthInit(AuthInitMessage::decode(&mut r, context)?),
        MessageType::FailedLogin => {
            Message::FailedLogin(FailedLoginMessage::decode(&mut r, context)?)
        }
        MessageType::Verified => Message::Verified(VerifiedMessage::decode(&mut r, context)?),
        MessageType::PublicKey => Message::PublicKey(PublicKeyMessage::decode(&mut r, context)?),
        MessageType::Init => Message::Init(InitMessage::decode(&mut r, context)?),
        MessageType::Request => Message::Request(RequestMessage::decode(&mut r, context)?),
        MessageType::Banner => Message::Banner(BannerMessage::decode(&mut r, context)?),
        MessageType::PlayerJoin => {
            Message::PlayerJoin(PlayerJoinMessage::decode(&mut r, context)?)
        }
        MessageType::BlockPlace => {
            Message::BlockPlace(BlockPlaceMessage::decode(&mut r, context)?)
        }
        MessageType::Chat => Message::Chat(ChatMessage::decode(&mut r, context)?),
    };
    r.finish()?;
    Ok(Decoded::new(context, msg))
}

/// Decodes a single payload type directly, without going through [`Message`].
///
/// # Errors
///
/// Same as [`decode_payload`].
pub fn decode_as<P: Payload>(payload: &[u8], context: MessageContext) -> Result<P, ProtocolError> {
    trace!(msg_type = ?P::MESSAGE_TYPE, len = payload.len(), ?context, "decoding payload");
    let mut r = WireReader::new(payload);
    let msg = P::decode(&mut r, context)?;
    r.finish()?;
    Ok(msg)
}

fn read_message_type(tag: u8) -> Result<MessageType, ProtocolError> {
    MessageType::try_from(tag).map_err(|_| ProtocolError::UnknownMessageType(tag))
}

// ── Auth service payloads ─────────────────────────────────────────────────────

/// `[version:4×i32][username:str][password:str]`
impl Payload for AuthLoginMessage {
    const MESSAGE_TYPE: MessageType = MessageType::AuthLogin;

    fn encode(&self, buf: &mut Vec<u8>) -> Result<(), ProtocolError> {
        write_version(buf, &self.version);
        write_string(buf, "AuthLogin.username", &self.username)?;
        write_string(buf, "AuthLogin.password", &self.password)
    }

    fn decode(r: &mut WireReader<'_>, _: MessageContext) -> Result<Self, ProtocolError> {
        Ok(Self {
            version: r.read_version()?,
            username: r.read_string()?,
            password: r.read_string()?,
        })
    }
}

/// `[username:str][uid:16][private_key:blob][public_key:blob]`
impl Payload for AuthInitMessage {
    const MESSAGE_TYPE: MessageType = MessageType::AuthInit;

    fn encode(&self, buf: &mut Vec<u8>) -> Result<(), ProtocolError> {
        write_string(buf, "AuthInit.username", &self.username)?;
        write_uuid(buf, &self.uid);
        write_blob(buf, "AuthInit.private_key", &self.private_key)?;
        write_blob(buf, "AuthInit.public_key", &self.public_key)
    }

    fn decode(r: &mut WireReader<'_>, _: MessageContext) -> Result<Self, ProtocolError> {
        Ok(Self {
            username: r.read_string()?,
            uid: r.read_uuid()?,
            private_key: r.read_blob()?,
            public_key: r.read_blob()?,
        })
    }
}

/// `[error_message:str]`
impl Payload for FailedLoginMessage {
    const MESSAGE_TYPE: MessageType = MessageType::FailedLogin;

    fn encode(&self, buf: &mut Vec<u8>) -> Result<(), ProtocolError> {
        write_string(buf, "FailedLogin.error_message", &self.error_message)
    }

    fn decode(r: &mut WireReader<'_>, _: MessageContext) -> Result<Self, ProtocolError> {
        Ok(Self {
            error_message: r.read_string()?,
        })
    }
}

/// `[verified:bool]`
impl Payload for VerifiedMessage {
    const MESSAGE_TYPE: MessageType = MessageType::Verified;

    fn encode(&self, buf: &mut Vec<u8>) -> Result<(), ProtocolError> {
        write_bool(buf, self.verified);
        Ok(())
    }

    fn decode(r: &mut WireReader<'_>, _: MessageContext) -> Result<Self, ProtocolError> {
        Ok(Self {
            verified: r.read_bool()?,
        })
    }
}

// ── Game server payloads ──────────────────────────────────────────────────────

/// `[username:str][uid:16][public_key:blob]`
impl Payload for PublicKeyMessage {
    const MESSAGE_TYPE: MessageType = MessageType::PublicKey;

    fn encode(&self, buf: &mut Vec<u8>) -> Result<(), ProtocolError> {
        write_string(buf, "PublicKey.username", &self.username)?;
        write_uuid(buf, &self.uid);
        write_blob(buf, "PublicKey.public_key", &self.public_key)
    }

    fn decode(r: &mut WireReader<'_>, _: MessageContext) -> Result<Self, ProtocolError> {
        Ok(Self {
            username: r.read_string()?,
            uid: r.read_uuid()?,
            public_key: r.read_blob()?,
        })
    }
}

/// `[version:4×i32][server_name:str][description:str][intro:str][online:i32]
///  [room_count:u16][room × room_count]`
///
/// Each room: `[uuid:16][name:str][description:str][online:i32][plays:i32][rating:f64]`
impl Payload for InitMessage {
    const MESSAGE_TYPE: MessageType = MessageType::Init;

    fn encode(&self, buf: &mut Vec<u8>) -> Result<(), ProtocolError> {
        write_version(buf, &self.version);
        write_string(buf, "Init.server_name", &self.server_name)?;
        write_string(buf, "Init.description", &self.description)?;
        write_string(buf, "Init.intro", &self.intro)?;
        write_i32(buf, self.online);
        let count = u16::try_from(self.rooms.len()).map_err(|_| ProtocolError::FieldTooLong {
            field: "Init.rooms",
            len: self.rooms.len(),
            max: u16::MAX as usize,
        })?;
        write_u16(buf, count);
        for room in &self.rooms {
            encode_room(buf, room)?;
        }
        Ok(())
    }

    fn decode(r: &mut WireReader<'_>, _: MessageContext) -> Result<Self, ProtocolError> {
        let version = r.read_version()?;
        let server_name = r.read_string()?;
        let description = r.read_string()?;
        let intro = r.read_string()?;
        let online = r.read_i32()?;
        let count = r.read_u16()? as usize;
        // Cap the pre-allocation by what the buffer could possibly hold so a
        // forged count cannot force a huge allocation.
        const MIN_ROOM_SIZE: usize = 16 + 2 + 2 + 4 + 4 + 8;
        let mut rooms = Vec::with_capacity(count.min(r.remaining() / MIN_ROOM_SIZE));
        for _ in 0..count {
            rooms.push(decode_room(r)?);
        }
        Ok(Self {
            version,
            server_name,
            description,
            intro,
            online,
            rooms,
        })
    }
}

fn encode_room(buf: &mut Vec<u8>, room: &RoomSummary) -> Result<(), ProtocolError> {
    write_uuid(buf, &room.uuid);
    write_string(buf, "RoomSummary.name", &room.name)?;
    write_string(buf, "RoomSummary.description", &room.description)?;
    write_i32(buf, room.online);
    write_i32(buf, room.plays);
    write_f64(buf, room.rating);
    Ok(())
}

fn decode_room(r: &mut WireReader<'_>) -> Result<RoomSummary, ProtocolError> {
    Ok(RoomSummary {
        uuid: r.read_uuid()?,
        name: r.read_string()?,
        description: r.read_string()?,
        online: r.read_i32()?,
        plays: r.read_i32()?,
        rating: r.read_f64()?,
    })
}

/// `[requested:u8]`
impl Payload for RequestMessage {
    const MESSAGE_TYPE: MessageType = MessageType::Request;

    fn encode(&self, buf: &mut Vec<u8>) -> Result<(), ProtocolError> {
        write_u8(buf, self.requested as u8);
        Ok(())
    }

    fn decode(r: &mut WireReader<'_>, _: MessageContext) -> Result<Self, ProtocolError> {
        let tag = r.read_u8()?;
        let requested = MessageType::try_from(tag).map_err(|_| {
            ProtocolError::MalformedPayload(format!("request for unknown message type: {tag}"))
        })?;
        Ok(Self { requested })
    }
}

/// `[banner:blob]`
impl Payload for BannerMessage {
    const MESSAGE_TYPE: MessageType = MessageType::Banner;

    fn encode(&self, buf: &mut Vec<u8>) -> Result<(), ProtocolError> {
        write_blob(buf, "Banner.banner", &self.banner)
    }

    fn decode(r: &mut WireReader<'_>, _: MessageContext) -> Result<Self, ProtocolError> {
        Ok(Self {
            banner: r.read_blob()?,
        })
    }
}

/// `[id:u8][uuid:16][username:str][hue:i32]`
impl Payload for PlayerJoinMessage {
    const MESSAGE_TYPE: MessageType = MessageType::PlayerJoin;

    fn encode(&self, buf: &mut Vec<u8>) -> Result<(), ProtocolError> {
        encode_player(buf, &self.player)
    }

    fn decode(r: &mut WireReader<'_>, _: MessageContext) -> Result<Self, ProtocolError> {
        Ok(Self {
            player: decode_player(r)?,
        })
    }
}

fn encode_player(buf: &mut Vec<u8>, player: &PlayerRecord) -> Result<(), ProtocolError> {
    write_u8(buf, player.id);
    write_uuid(buf, &player.uuid);
    write_string(buf, "PlayerRecord.username", &player.username)?;
    write_i32(buf, player.hue);
    Ok(())
}

fn decode_player(r: &mut WireReader<'_>) -> Result<PlayerRecord, ProtocolError> {
    Ok(PlayerRecord {
        id: r.read_u8()?,
        uuid: r.read_uuid()?,
        username: r.read_string()?,
        hue: r.read_i32()?,
    })
}

/// `[x:u16][y:u16][foreground:bool][block:u16]`
impl Payload for BlockPlaceMessage {
    const MESSAGE_TYPE: MessageType = MessageType::BlockPlace;

    fn encode(&self, buf: &mut Vec<u8>) -> Result<(), ProtocolError> {
        write_u16(buf, self.position.x);
        write_u16(buf, self.position.y);
        write_bool(buf, self.layer.is_foreground());
        write_u16(buf, self.block.0);
        Ok(())
    }

    fn decode(r: &mut WireReader<'_>, _: MessageContext) -> Result<Self, ProtocolError> {
        let x = r.read_u16()?;
        let y = r.read_u16()?;
        let layer = Layer::from_foreground(r.read_bool()?);
        let block = BlockTypeId(r.read_u16()?);
        Ok(Self {
            position: TilePosition::new(x, y),
            layer,
            block,
        })
    }
}

/// Server → client: `[sender:u8][message:str]`.  Client → server: `[message:str]`.
///
/// Encoding writes the sender byte iff `sender` is set; decoding reads it iff
/// the decoding side is the client.
impl Payload for ChatMessage {
    const MESSAGE_TYPE: MessageType = MessageType::Chat;

    fn encode(&self, buf: &mut Vec<u8>) -> Result<(), ProtocolError> {
        if let Some(sender) = self.sender {
            write_u8(buf, sender);
        }
        write_string(buf, "Chat.message", &self.message)
    }

    fn decode(r: &mut WireReader<'_>, context: MessageContext) -> Result<Self, ProtocolError> {
        let sender = match context {
            MessageContext::Client => Some(r.read_u8()?),
            MessageContext::Server => None,
        };
        Ok(Self {
            sender,
            message: r.read_string()?,
        })
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::messages::Version;
    use uuid::Uuid;

    fn round_trip(msg: &Message, context: MessageContext) -> Message {
        let encoded = encode_message(msg).expect("encode failed");
        decode_message(&encoded, context)
            .expect("decode failed")
            .into_message()
    }

    fn sample(ty: MessageType) -> (Message, MessageContext) {
        let msg = match ty {
            MessageType::AuthLogin => Message::AuthLogin(AuthLoginMessage {
                version: Version::new(0, 1, 0, 0),
                username: "pyratron".to_string(),
                password: "hunter2".to_string(),
            }),
            MessageType::AuthInit => Message::AuthInit(AuthInitMessage {
                username: "pyratron".to_string(),
                uid: Uuid::from_u128(7),
                private_key: vec![1, 2, 3],
                public_key: vec![4, 5, 6, 7],
            }),
            MessageType::FailedLogin => Message::FailedLogin(FailedLoginMessage {
                error_message: "Invalid username or password.".to_string(),
            }),
            MessageType::Verified => Message::Verified(VerifiedMessage { verified: true }),
            MessageType::PublicKey => Message::PublicKey(PublicKeyMessage {
                username: "pyratron".to_string(),
                uid: Uuid::from_u128(7),
                public_key: vec![4, 5, 6, 7],
            }),
            MessageType::Init => Message::Init(InitMessage {
                version: Version::new(1, 2, 3, 4),
                server_name: "Bricklayer".to_string(),
                description: "A test server".to_string(),
                intro: "Welcome $name".to_string(),
                online: 3,
                rooms: vec![RoomSummary {
                    uuid: Uuid::from_u128(42),
                    name: "Castle".to_string(),
                    description: String::new(),
                    online: 2,
                    plays: 150,
                    rating: 4.5,
                }],
            }),
            MessageType::Request => Message::Request(RequestMessage {
                requested: MessageType::Banner,
            }),
            MessageType::Banner => Message::Banner(BannerMessage {
                banner: vec![0x89, b'P', b'N', b'G'],
            }),
            MessageType::PlayerJoin => Message::PlayerJoin(PlayerJoinMessage {
                player: PlayerRecord {
                    id: 3,
                    uuid: Uuid::from_u128(9),
                    username: "guest".to_string(),
                    hue: 210,
                },
            }),
            MessageType::BlockPlace => Message::BlockPlace(BlockPlaceMessage {
                position: TilePosition::new(12, 34),
                layer: Layer::Background,
                block: BlockTypeId(5),
            }),
            MessageType::Chat => Message::Chat(ChatMessage {
                sender: Some(3),
                message: "hello".to_string(),
            }),
        };
        (msg, MessageContext::Client)
    }

    // ── Registry ─────────────────────────────────────────────────────────────

    #[test]
    fn test_every_message_type_has_encoder_and_decoder() {
        for ty in MessageType::ALL {
            let (msg, ctx) = sample(ty);
            assert_eq!(msg.message_type(), ty);
            let bytes = encode_message(&msg).unwrap();
            assert_eq!(bytes[0], ty as u8, "leading byte must be the tag");
            assert_eq!(decode_message(&bytes, ctx).unwrap().message(), &msg, "{ty:?}");
        }
    }

    // ── Field layouts ────────────────────────────────────────────────────────

    #[test]
    fn test_block_place_layout_is_fixed() {
        let msg = Message::BlockPlace(BlockPlaceMessage {
            position: TilePosition::new(0x0102, 0x0304),
            layer: Layer::Foreground,
            block: BlockTypeId(0x0506),
        });
        let bytes = encode_message(&msg).unwrap();
        assert_eq!(bytes, vec![9, 0x01, 0x02, 0x03, 0x04, 0x01, 0x05, 0x06]);
    }

    #[test]
    fn test_block_place_max_coordinates_round_trip() {
        let msg = Message::BlockPlace(BlockPlaceMessage {
            position: TilePosition::new(u16::MAX, u16::MAX),
            layer: Layer::Foreground,
            block: BlockTypeId(u16::MAX),
        });
        assert_eq!(round_trip(&msg, MessageContext::Server), msg);
    }

    #[test]
    fn test_auth_login_starts_with_four_version_integers() {
        let msg = Message::AuthLogin(AuthLoginMessage {
            version: Version::new(1, 2, 3, 4),
            username: String::new(),
            password: String::new(),
        });
        let bytes = encode_message(&msg).unwrap();
        assert_eq!(bytes.len(), 1 + 16 + 2 + 2);
        assert_eq!(&bytes[1..5], &1i32.to_be_bytes());
        assert_eq!(&bytes[13..17], &4i32.to_be_bytes());
    }

    // ── Context-dependent decode ─────────────────────────────────────────────

    #[test]
    fn test_chat_from_client_decodes_without_sender_on_server() {
        let msg = Message::Chat(ChatMessage {
            sender: None,
            message: "hi all".to_string(),
        });
        assert_eq!(round_trip(&msg, MessageContext::Server), msg);
    }

    #[test]
    fn test_chat_from_server_decodes_with_sender_on_client() {
        let msg = Message::Chat(ChatMessage {
            sender: Some(17),
            message: String::new(),
        });
        assert_eq!(round_trip(&msg, MessageContext::Client), msg);
    }

    #[test]
    fn test_chat_decoded_in_wrong_context_is_an_error() {
        // A client-originated chat (no sender byte) read as if it came from the server.
        let bytes = encode_message(&Message::Chat(ChatMessage {
            sender: None,
            message: "x".to_string(),
        }))
        .unwrap();
        assert!(decode_message(&bytes, MessageContext::Client).is_err());
    }

    // ── Error conditions ─────────────────────────────────────────────────────

    #[test]
    fn test_decode_empty_bytes_returns_insufficient_data() {
        let result = decode_message(&[], MessageContext::Client);
        assert!(matches!(result, Err(ProtocolError::InsufficientData { .. })));
    }

    #[test]
    fn test_decode_unknown_message_type_returns_error() {
        let result = decode_message(&[0xFF, 0x00], MessageContext::Client);
        assert_eq!(result, Err(ProtocolError::UnknownMessageType(0xFF)));
    }

    #[test]
    fn test_decode_trailing_bytes_returns_error() {
        let mut bytes = encode_message(&Message::Verified(VerifiedMessage { verified: false })).unwrap();
        bytes.push(0xAA);
        assert_eq!(
            decode_message(&bytes, MessageContext::Client),
            Err(ProtocolError::TrailingBytes { extra: 1 })
        );
    }

    #[test]
    fn test_request_for_unknown_type_is_malformed() {
        let result = decode_message(&[MessageType::Request as u8, 0xEE], MessageContext::Server);
        assert!(matches!(result, Err(ProtocolError::MalformedPayload(_))));
    }

    #[test]
    fn test_init_with_forged_room_count_fails_cleanly() {
        let mut bytes = encode_message(&sample(MessageType::Init).0).unwrap();
        // Overwrite the room count (u16) that precedes the single room entry.
        let room_len = 16 + 2 + "Castle".len() + 2 + 4 + 4 + 8;
        let count_at = bytes.len() - room_len - 2;
        bytes[count_at..count_at + 2].copy_from_slice(&u16::MAX.to_be_bytes());
        assert!(matches!(
            decode_message(&bytes, MessageContext::Client),
            Err(ProtocolError::InsufficientData { .. })
        ));
    }

    #[test]
    fn test_payload_tag_matches_message_type() {
        for ty in MessageType::ALL {
            let (msg, _) = sample(ty);
            let tag = match &msg {
                Message::AuthLogin(_) => AuthLoginMessage::MESSAGE_TYPE,
                Message::AuthInit(_) => AuthInitMessage::MESSAGE_TYPE,
                Message::FailedLogin(_) => FailedLoginMessage::MESSAGE_TYPE,
                Message::Verified(_) => VerifiedMessage::MESSAGE_TYPE,
                Message::PublicKey(_) => PublicKeyMessage::MESSAGE_TYPE,
                Message::Init(_) => InitMessage::MESSAGE_TYPE,
                Message::Request(_) => RequestMessage::MESSAGE_TYPE,
                Message::Banner(_) => BannerMessage::MESSAGE_TYPE,
                Message::PlayerJoin(_) => PlayerJoinMessage::MESSAGE_TYPE,
                Message::BlockPlace(_) => BlockPlaceMessage::MESSAGE_TYPE,
                Message::Chat(_) => ChatMessage::MESSAGE_TYPE,
            };
            assert_eq!(tag, msg.message_type());
        }
    }

    #[test]
    fn test_decoded_message_records_decode_context() {
        // Arrange
        let bytes = encode_message(&Message::Chat(ChatMessage {
            sender: None,
            message: "gg".to_string(),
        }))
        .unwrap();

        // Act
        let decoded = decode_message(&bytes, MessageContext::Server).unwrap();

        // Assert
        assert_eq!(decoded.context(), MessageContext::Server);
        assert_eq!(decoded.message_type(), MessageType::Chat);
    }

    #[test]
    fn test_decode_as_reads_handshake_body() {
        let (msg, _) = sample(MessageType::Init);
        let bytes = encode_message(&msg).unwrap();
        let init: InitMessage = decode_as(&bytes[1..], MessageContext::Client).unwrap();
        assert_eq!(Message::Init(init), msg);
    }
}
