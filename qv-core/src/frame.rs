//! Handshake and acknowledgement frames.
//!
//! Peers open every connection with one pipe-delimited text frame:
//!
//! ```text
//! 1111REGO|<id>|<version>|<reserved>     desktop registers under <id>
//! 1111CONN|<id>|<reserved>|<reserved>    web client asks for desktop <id>
//! ```
//!
//! The relay answers with binary frames carrying an 8- or 12-byte header
//! followed by the echoed identifier:
//!
//! ```text
//! REGO ack:      'R' 'E' 'G' 'O' len 0 0 0                  id
//! CONN ack:      '1' '1' '1' '1' 'C' 'O' 'N' 'N' len 0 0 0  id
//! CONN failure:  '1' '1' '1' '1' 'C' 'O' 'N' 'N' 0 0 0 0    "FAILTRAIN"
//! ```
//!
//! Everything here is pure: parsing never fails (a bad frame yields
//! [`Handshake::Invalid`]) and encoding cannot fail once a
//! [`RendezvousId`] exists.

use std::fmt;

use thiserror::Error;

use crate::error::RelayError;

// ── Constants ────────────────────────────────────────────────────

/// Shortest input the handshake parser will look at.
pub const MIN_HANDSHAKE_LEN: usize = 8;

/// Number of `|`-separated fields in every handshake frame.
pub const HANDSHAKE_FIELDS: usize = 4;

/// Prefix of a desktop registration request.
pub const REGO_PREFIX: &[u8] = b"1111REGO";

/// Prefix of a web client connect request.
pub const CONN_PREFIX: &[u8] = b"1111CONN";

/// The only desktop client version the relay accepts.
pub const SUPPORTED_VERSION: &str = "2";

/// Text notice sent to desktops running an unsupported version.
pub const VERSION_NOTICE: &str = "TXTMSG:Please update the QuickView app from the website.";

/// Trailer of the CONN failure frame.
pub const CONN_FAILURE_TRAILER: &[u8] = b"FAILTRAIN";

/// Largest inbound message accepted from a peer, in bytes.
pub const MAX_MESSAGE_SIZE: usize = 128_000;

/// Identifiers are echoed with a one-byte length.
pub const MAX_ID_LEN: usize = u8::MAX as usize;

// ── RendezvousId ─────────────────────────────────────────────────

/// Opaque identifier a desktop advertises and a web client asks for.
///
/// Guaranteed to fit the one-byte length field of the acknowledgement
/// frames.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RendezvousId(String);

impl RendezvousId {
    pub fn new(id: impl Into<String>) -> Result<Self, RelayError> {
        let id = id.into();
        if id.len() > MAX_ID_LEN {
            return Err(RelayError::IdTooLong {
                len: id.len(),
                max: MAX_ID_LEN,
            });
        }
        Ok(Self(id))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn as_bytes(&self) -> &[u8] {
        self.0.as_bytes()
    }

    /// Length as carried on the wire.
    pub fn wire_len(&self) -> u8 {
        // Bounded by MAX_ID_LEN at construction.
        self.0.len() as u8
    }
}

impl fmt::Display for RendezvousId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

// ── Handshake ────────────────────────────────────────────────────

/// Why a handshake frame was rejected.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum InvalidHandshake {
    #[error("frame too short: {0} bytes")]
    TooShort(usize),

    #[error("expected 4 fields, got {0}")]
    FieldCount(usize),

    #[error("field is not valid utf-8")]
    Encoding,

    #[error("identifier too long: {0} bytes")]
    IdTooLong(usize),
}

/// A parsed inbound handshake frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Handshake {
    /// `1111REGO|id|version|_`
    Register { id: RendezvousId, version: String },
    /// `1111CONN|id|_|_`
    Connect { id: RendezvousId },
    /// Long enough, but neither prefix. Ignored by the endpoint.
    Unrecognized,
    /// Fatal for the connection.
    Invalid(InvalidHandshake),
}

/// Interpret one inbound message received before the endpoint registered.
pub fn parse_handshake(message: &[u8]) -> Handshake {
    if message.len() < MIN_HANDSHAKE_LEN {
        return Handshake::Invalid(InvalidHandshake::TooShort(message.len()));
    }

    let is_rego = message.starts_with(REGO_PREFIX);
    if !is_rego && !message.starts_with(CONN_PREFIX) {
        return Handshake::Unrecognized;
    }

    let fields: Vec<&[u8]> = message.split(|&b| b == b'|').collect();
    if fields.len() != HANDSHAKE_FIELDS {
        return Handshake::Invalid(InvalidHandshake::FieldCount(fields.len()));
    }

    let id = match field_to_id(fields[1]) {
        Ok(id) => id,
        Err(reason) => return Handshake::Invalid(reason),
    };

    if is_rego {
        match std::str::from_utf8(fields[2]) {
            Ok(version) => Handshake::Register {
                id,
                version: version.to_string(),
            },
            Err(_) => Handshake::Invalid(InvalidHandshake::Encoding),
        }
    } else {
        Handshake::Connect { id }
    }
}

fn field_to_id(field: &[u8]) -> Result<RendezvousId, InvalidHandshake> {
    let id = std::str::from_utf8(field).map_err(|_| InvalidHandshake::Encoding)?;
    RendezvousId::new(id).map_err(|_| InvalidHandshake::IdTooLong(field.len()))
}

// ── Acknowledgements ─────────────────────────────────────────────

/// Registration acknowledgement sent to a desktop.
pub fn rego_ack(id: &RendezvousId) -> Vec<u8> {
    let mut frame = Vec::with_capacity(8 + id.as_bytes().len());
    frame.extend_from_slice(b"REGO");
    frame.extend_from_slice(&[id.wire_len(), 0, 0, 0]);
    frame.extend_from_slice(id.as_bytes());
    frame
}

/// Pairing acknowledgement sent to a web client.
pub fn conn_ack(id: &RendezvousId) -> Vec<u8> {
    let mut frame = Vec::with_capacity(12 + id.as_bytes().len());
    frame.extend_from_slice(CONN_PREFIX);
    frame.extend_from_slice(&[id.wire_len(), 0, 0, 0]);
    frame.extend_from_slice(id.as_bytes());
    frame
}

/// Pairing failure sent to a web client just before it is disconnected.
pub fn conn_failure() -> Vec<u8> {
    let mut frame = Vec::with_capacity(12 + CONN_FAILURE_TRAILER.len());
    frame.extend_from_slice(CONN_PREFIX);
    frame.extend_from_slice(&[0, 0, 0, 0]);
    frame.extend_from_slice(CONN_FAILURE_TRAILER);
    frame
}

// ── Tests ────────────────────────────────────────────────────────
