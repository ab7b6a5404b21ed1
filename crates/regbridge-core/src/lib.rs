//! # regbridge-core
//!
//! Shared library for regbridge containing the memory-mapped register window
//! and the codec that turns register contents into wire bytes (and inbound
//! client bytes into register values).
//!
//! This crate has no dependencies on sockets or async runtimes; the bridge
//! binary (`regbridge`) layers the TCP server on top of it.
//!
//! # Architecture overview
//!
//! - **`memory`** – The [`MemoryWindow`]: a fixed-size mapped view of a
//!   memory-backed file (e.g. `/dev/mem`) with bounds-checked volatile reads
//!   and synchronous writes.  Sessions reach it through the [`RegisterStore`]
//!   trait so that an in-memory double can stand in during tests.
//!
//! - **`protocol`** – The [`RegisterCodec`]: decoding the 4-byte register
//!   word, encoding integers for the write path, and parsing the ASCII digit
//!   commands that clients send.

pub mod memory;
pub mod protocol;

// Re-export the most-used types at the crate root so callers can write
// `regbridge_core::MemoryWindow` instead of `regbridge_core::memory::window::MemoryWindow`.
pub use memory::{
    AccessError, AccessPolicy, BoundsError, InMemoryRegisters, MappingError, MemoryWindow,
    RegisterOffsets, RegisterStore, WindowOptions,
};
pub use protocol::codec::{
    encode_for_stream, parse_inbound_digits, ByteOrder, DecodeError, RegisterBytes, RegisterCodec,
    REGISTER_WIDTH,
};
