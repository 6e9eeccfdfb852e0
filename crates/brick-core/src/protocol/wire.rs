//! Primitive field encoding shared by every message payload.
//!
//! All multi-byte integers are big-endian and fixed width.  Variable-length
//! fields carry their own length prefix:
//!
//! ```text
//! string : [len:u16][utf8 bytes]
//! blob   : [len:u32][raw bytes]
//! uuid   : [16 raw bytes]
//! version: [major:i32][minor:i32][build:i32][revision:i32]
//! bool   : [0x00 | 0x01]   (any nonzero byte decodes as true)
//! ```
//!
//! The transport delivers one message per datagram, so messages themselves
//! have no outer length prefix.  A [`WireReader`] therefore tracks how much of
//! the datagram has been consumed, and [`WireReader::finish`] rejects any
//! bytes left over once a payload has been fully decoded.

use uuid::Uuid;

use crate::protocol::codec::ProtocolError;
use crate::protocol::messages::Version;

// ── Writers ───────────────────────────────────────────────────────────────────

/// Appends a single byte.
pub fn write_u8(buf: &mut Vec<u8>, value: u8) {
    buf.push(value);
}

/// Appends a boolean as one byte (`0x01` / `0x00`).
pub fn write_bool(buf: &mut Vec<u8>, value: bool) {
    buf.push(if value { 0x01 } else { 0x00 });
}

pub fn write_u16(buf: &mut Vec<u8>, value: u16) {
    buf.extend_from_slice(&value.to_be_bytes());
}

pub fn write_i32(buf: &mut Vec<u8>, value: i32) {
    buf.extend_from_slice(&value.to_be_bytes());
}

pub fn write_f32(buf: &mut Vec<u8>, value: f32) {
    buf.extend_from_slice(&value.to_be_bytes());
}

pub fn write_f64(buf: &mut Vec<u8>, value: f64) {
    buf.extend_from_slice(&value.to_be_bytes());
}

pub fn write_uuid(buf: &mut Vec<u8>, value: &Uuid) {
    buf.extend_from_slice(value.as_bytes());
}

/// Appends the four version components in order: major, minor, build, revision.
pub fn write_version(buf: &mut Vec<u8>, version: &Version) {
    write_i32(buf, version.major);
    write_i32(buf, version.minor);
    write_i32(buf, version.build);
    write_i32(buf, version.revision);
}

/// Writes a 2-byte length prefix followed by the UTF-8 string bytes.
///
/// # Errors
///
/// Returns [`ProtocolError::FieldTooLong`] if the string does not fit in a
/// `u16` length prefix.  Strings are never silently truncated.
pub fn write_string(buf: &mut Vec<u8>, field: &'static str, value: &str) -> Result<(), ProtocolError> {
    let bytes = value.as_bytes();
    let len = u16::try_from(bytes.len()).map_err(|_| ProtocolError::FieldTooLong {
        field,
        len: bytes.len(),
        max: u16::MAX as usize,
    })?;
    write_u16(buf, len);
    buf.extend_from_slice(bytes);
    Ok(())
}

/// Writes a 4-byte length prefix followed by the raw bytes.
///
/// # Errors
///
/// Returns [`ProtocolError::FieldTooLong`] if the blob exceeds `u32::MAX` bytes.
pub fn write_blob(buf: &mut Vec<u8>, field: &'static str, value: &[u8]) -> Result<(), ProtocolError> {
    let len = u32::try_from(value.len()).map_err(|_| ProtocolError::FieldTooLong {
        field,
        len: value.len(),
        max: u32::MAX as usize,
    })?;
    buf.extend_from_slice(&len.to_be_bytes());
    buf.extend_from_slice(value);
    Ok(())
}

// ── Reader ────────────────────────────────────────────────────────────────────

/// Cursor over an inbound message body.
///
/// Every read checks the remaining length first and fails with
/// [`ProtocolError::InsufficientData`] instead of panicking, so a truncated
/// datagram can never crash the dispatch loop.
#[derive(Debug, Clone)]
pub struct WireReader<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> WireReader<'a> {
    /// Creates a reader positioned at the start of `buf`.
    pub fn new(buf: &'a [u8]) -> Self {
        Self { buf, pos: 0 }
    }

    /// Number of bytes not yet consumed.
    pub fn remaining(&self) -> usize {
        self.buf.len() - self.pos
    }

    fn take(&mut self, n: usize) -> Result<&'a [u8], ProtocolError> {
        if self.remaining() < n {
            return Err(ProtocolError::InsufficientData {
                needed: self.pos + n,
                available: self.buf.len(),
            });
        }
        let slice = &self.buf[self.pos..self.pos + n];
        self.pos += n;
        Ok(slice)
    }

    fn take_array<const N: usize>(&mut self) -> Result<[u8; N], ProtocolError> {
        let mut out = [0u8; N];
        out.copy_from_slice(self.take(N)?);
        Ok(out)
    }

    pub fn read_u8(&mut self) -> Result<u8, ProtocolError> {
        Ok(self.take(1)?[0])
    }

    pub fn read_bool(&mut self) -> Result<bool, ProtocolError> {
        Ok(self.read_u8()? != 0)
    }

    pub fn read_u16(&mut self) -> Result<u16, ProtocolError> {
        Ok(u16::from_be_bytes(self.take_array()?))
    }

    pub fn read_u32(&mut self) -> Result<u32, ProtocolError> {
        Ok(u32::from_be_bytes(self.take_array()?))
    }

    pub fn read_i32(&mut self) -> Result<i32, ProtocolError> {
        Ok(i32::from_be_bytes(self.take_array()?))
    }

    pub fn read_f32(&mut self) -> Result<f32, ProtocolError> {
        Ok(f32::from_be_bytes(self.take_array()?))
    }

    pub fn read_f64(&mut self) -> Result<f64, ProtocolError> {
        Ok(f64::from_be_bytes(self.take_array()?))
    }

    pub fn read_uuid(&mut self) -> Result<Uuid, ProtocolError> {
        Ok(Uuid::from_bytes(self.take_array()?))
    }

    pub fn read_version(&mut self) -> Result<Version, ProtocolError> {
        Ok(Version {
            major: self.read_i32()?,
            minor: self.read_i32()?,
            build: self.read_i32()?,
            revision: self.read_i32()?,
        })
    }

    /// Reads a 2-byte length prefix and then that many UTF-8 bytes.
    pub fn read_string(&mut self) -> Result<String, ProtocolError> {
        let len = self.read_u16()? as usize;
        let start = self.pos;
        let bytes = self.take(len)?;
        std::str::from_utf8(bytes)
            .map(str::to_owned)
            .map_err(|e| ProtocolError::MalformedPayload(format!("invalid UTF-8 at offset {start}: {e}")))
    }

    /// Reads a 4-byte length prefix and then that many raw bytes.
    pub fn read_blob(&mut self) -> Result<Vec<u8>, ProtocolError> {
        let len = self.read_u32()? as usize;
        Ok(self.take(len)?.to_vec())
    }

    /// Asserts that the whole buffer has been consumed.
    ///
    /// # Errors
    ///
    /// Returns [`ProtocolError::TrailingBytes`] if unread bytes remain.
    pub fn finish(self) -> Result<(), ProtocolError> {
        match self.remaining() {
            0 => Ok(()),
            extra => Err(ProtocolError::TrailingBytes { extra }),
        }
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
