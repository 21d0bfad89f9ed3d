//! Wire Protocol for the Exchange Feed
//!
//! Fixed 2-byte requests and fixed 17-byte response records.
//! All integer fields are big-endian.

use serde::{Deserialize, Serialize};

/// Request size in bytes (call type + resend target)
pub const REQUEST_SIZE: usize = 2;

/// Total record size in bytes
/// 4+1+4+4+4 = 17 bytes
pub const RECORD_SIZE: usize = 17;

/// Width of the right-padded symbol field
pub const SYMBOL_WIDTH: usize = 4;

/// Largest sequence number the 1-byte resend field can carry
pub const MAX_RESEND_TARGET: i32 = u8::MAX as i32;

/// Request call types (byte 0 of a request)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum CallType {
    /// Stream every record the exchange holds, then close
    StreamAll = 1,
    /// Resend a single record by sequence number, then close
    ResendOne = 2,
}

/// One decoded feed record (17 bytes on the wire)
///
/// Layout (big-endian):
/// ```text
/// Offset  Size  Field
/// 0       4     symbol (ASCII, right-padded)
/// 4       1     buy/sell indicator (ASCII)
/// 5       4     quantity (i32)
/// 9       4     price (i32)
/// 13      4     packet sequence (i32, >= 1)
/// Total: 17 bytes
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Record {
    pub symbol: String,
    #[serde(rename = "buysellindicator")]
    pub indicator: char,
    pub quantity: i32,
    pub price: i32,
    #[serde(rename = "packetSequence")]
    pub sequence: i32,
}

impl Record {
    pub fn new(
        symbol: impl Into<String>,
        indicator: char,
        quantity: i32,
        price: i32,
        sequence: i32,
    ) -> Self {
        Self {
            symbol: symbol.into(),
            indicator,
            quantity,
            price,
            sequence,
        }
    }

    /// Serialize to wire bytes.
    ///
    /// Symbols longer than [`SYMBOL_WIDTH`] are cut; shorter ones are
    /// space-padded. Non-ASCII indicators are written as `?`.
    pub fn to_bytes(&self) -> [u8; RECORD_SIZE] {
        let mut buf = [b' '; RECORD_SIZE];
        for (slot, byte) in buf[..SYMBOL_WIDTH].iter_mut().zip(self.symbol.bytes()) {
            *slot = byte;
        }
        buf[4] = if self.indicator.is_ascii() {
            self.indicator as u8
        } else {
            b'?'
        };
        buf[5..9].copy_from_slice(&self.quantity.to_be_bytes());
        buf[9..13].copy_from_slice(&self.price.to_be_bytes());
        buf[13..17].copy_from_slice(&self.sequence.to_be_bytes());
        buf
    }

    /// Decode one record from exactly [`RECORD_SIZE`] bytes.
    pub fn try_from_slice(buf: &[u8]) -> Result<Self, WireError> {
        if buf.len() != RECORD_SIZE {
            return Err(WireError::InvalidSize(buf.len()));
        }

        if let Some(offset) = buf[..5].iter().position(|b| !b.is_ascii()) {
            return Err(WireError::NonAscii { offset });
        }

        let symbol = std::str::from_utf8(&buf[..SYMBOL_WIDTH])
            .map_err(|_| WireError::NonAscii { offset: 0 })?
            .trim_end_matches([' ', '\0'])
            .to_string();

        let sequence = read_i32(buf, 13);
        if sequence < 1 {
            return Err(WireError::InvalidSequence(sequence));
        }

        Ok(Self {
            symbol,
            indicator: buf[4] as char,
            quantity: read_i32(buf, 5),
            price: read_i32(buf, 9),
            sequence,
        })
    }
}

#[inline]
fn read_i32(buf: &[u8], at: usize) -> i32 {
    i32::from_be_bytes([buf[at], buf[at + 1], buf[at + 2], buf[at + 3]])
}

/// Encode a request.
///
/// `resend_seq` is ignored for [`CallType::StreamAll`]. For
/// [`CallType::ResendOne`] it must lie in `0..=MAX_RESEND_TARGET`; larger
/// values are truncated to their low byte, which is what the exchange
/// itself expects from older clients.
pub fn encode_request(call: CallType, resend_seq: i32) -> [u8; REQUEST_SIZE] {
    match call {
        CallType::StreamAll => [CallType::StreamAll as u8, 0],
        CallType::ResendOne => [CallType::ResendOne as u8, resend_seq as u8],
    }
}

/// Decode a record from a frame; thin alias used by the frame reader.
#[inline]
pub fn decode_record(buf: &[u8]) -> Result<Record, WireError> {
    Record::try_from_slice(buf)
}

/// Errors during wire protocol parsing
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WireError {
    InvalidSize(usize),
    NonAscii { offset: usize },
    InvalidSequence(i32),
}

impl std::fmt::Display for WireError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::InvalidSize(s) => {
                write!(f, "invalid record size: {} (expected {})", s, RECORD_SIZE)
            }
            Self::NonAscii { offset } => write!(f, "non-ASCII byte at offset {}", offset),
            Self::InvalidSequence(seq) => {
                write!(f, "invalid sequence number: {} (must be >= 1)", seq)
            }
        }
    }
}

impl std::error::Error for WireError {}
