//! Codec for the register bridge wire format.
//!
//! Outbound (bridge → client):
//! ```text
//! [b0][b1][b2][b3][b0][b1][b2][b3]...
//! ```
//! Raw 4-byte register snapshots, back to back, with no delimiter, sequence
//! number or timestamp.  The bytes are forwarded exactly as read from memory.
//!
//! Inbound (client → bridge):
//! ```text
//! "17"  →  0x31 0x37  →  17
//! ```
//! ASCII decimal digits with no sign, terminator or length prefix.  Each
//! receive is decoded on its own and written to the write register in the
//! configured [`ByteOrder`].

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Width of the register in bytes.
pub const REGISTER_WIDTH: usize = 4;

/// One raw register word.
pub type RegisterBytes = [u8; REGISTER_WIDTH];

/// Errors produced while decoding register words or inbound commands.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum DecodeError {
    /// The inbound command contained no bytes.
    #[error("empty command")]
    Empty,

    /// A byte that is not an ASCII digit was found.
    #[error("non-digit byte 0x{byte:02X} at position {position}")]
    NonDigit { byte: u8, position: usize },

    /// The decimal value does not fit into the 32-bit register.
    #[error("value of {digits} digits overflows a 4-byte register")]
    Overflow { digits: usize },

    /// A register word of the wrong size was supplied.
    #[error("register word must be 4 bytes, got {actual}")]
    WrongLength { actual: usize },
}

/// Byte order used to interpret the register word as an integer.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ByteOrder {
    /// Most significant byte first (`00 00 00 2A` is 42).
    #[default]
    Big,
    /// Least significant byte first (`2A 00 00 00` is 42).
    Little,
    /// Whatever the host CPU uses.
    Native,
}

/// Converts between register words and integers in one fixed byte order.
///
/// `decode_register` and `encode_for_write` are exact inverses, so a value
/// written through the write path reads back unchanged.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RegisterCodec {
    order: ByteOrder,
}

impl RegisterCodec {
    pub fn new(order: ByteOrder) -> Self {
        Self { order }
    }

    pub fn byte_order(&self) -> ByteOrder {
        self.order
    }

    /// Interprets exactly [`REGISTER_WIDTH`] bytes as an unsigned word.
    ///
    /// # Errors
    ///
    /// Returns [`DecodeError::WrongLength`] for any other slice length.
    ///
    /// # Examples
    ///
    /// ```rust
    /// use regbridge_core::protocol::codec::{ByteOrder, RegisterCodec};
    ///
    /// let codec = RegisterCodec::new(ByteOrder::Big);
    /// assert_eq!(codec.decode_register(&[0, 0, 0, 0x2A]).unwrap(), 42);
    /// ```
    pub fn decode_register(&self, bytes: &[u8]) -> Result<u32, DecodeError> {
        let word: RegisterBytes = bytes
            .try_into()
            .map_err(|_| DecodeError::WrongLength {
                actual: bytes.len(),
            })?;
        Ok(match self.order {
            ByteOrder::Big => u32::from_be_bytes(word),
            ByteOrder::Little => u32::from_le_bytes(word),
            ByteOrder::Native => u32::from_ne_bytes(word),
        })
    }

    /// Encodes `value` into the bytes stored at the write register.
    pub fn encode_for_write(&self, value: u32) -> RegisterBytes {
        match self.order {
            ByteOrder::Big => value.to_be_bytes(),
            ByteOrder::Little => value.to_le_bytes(),
            ByteOrder::Native => value.to_ne_bytes(),
        }
    }
}

/// Produces the outbound bytes for one register snapshot.
///
/// The sender forwards memory verbatim, so this is the identity.
#[inline]
pub fn encode_for_stream(raw: RegisterBytes) -> RegisterBytes {
    raw
}

/// Parses a client command made of ASCII decimal digits.
///
/// The result is the sum of each digit weighted by ten to the power of its
/// distance from the end of the sequence.
///
/// # Errors
///
/// - [`DecodeError::Empty`] for an empty slice.
/// - [`DecodeError::NonDigit`] for the first byte outside `b'0'..=b'9'`.
/// - [`DecodeError::Overflow`] when the value exceeds `u32::MAX`.
///
/// # Examples
///
/// ```rust
/// use regbridge_core::protocol::codec::{parse_inbound_digits, DecodeError};
///
/// assert_eq!(parse_inbound_digits(b"17"), Ok(17));
/// assert!(matches!(
///     parse_inbound_digits(b"1x"),
///     Err(DecodeError::NonDigit { byte: b'x', position: 1 })
/// ));
/// ```
pub fn parse_inbound_digits(bytes: &[u8]) -> Result<u32, DecodeError> {
    if bytes.is_empty() {
        return Err(DecodeError::Empty);
    }

    bytes
        .iter()
        .enumerate()
        .try_fold(0u32, |acc, (position, &byte)| {
            if !byte.is_ascii_digit() {
                return Err(DecodeError::NonDigit { byte, position });
            }
            acc.checked_mul(10)
                .and_then(|v| v.checked_add(u32::from(byte - b'0')))
                .ok_or(DecodeError::Overflow {
                    digits: bytes.len(),
                })
        })
}

// ── Tests ─────────────────────────────────────────────────────────────────────
