//! Protocol module containing the register wire codec.

pub mod codec;

pub use codec::{
    encode_for_stream, parse_inbound_digits, ByteOrder, DecodeError, RegisterBytes, RegisterCodec,
    REGISTER_WIDTH,
};
