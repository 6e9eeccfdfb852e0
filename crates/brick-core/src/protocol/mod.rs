//! Protocol module containing message types, wire primitives, and the binary codec.

pub mod codec;
pub mod messages;
pub mod wire;

pub use codec::{decode_as, decode_message, decode_payload, encode_message, Payload, ProtocolError};
pub use messages::*;
