//! Application layer for regbridge.
//!
//! Knows *what* a session does with the register, but not *how* bytes reach
//! the socket:
//!
//! - Sampling the read register for the outbound stream
//! - Decoding an inbound command and storing it at the write register
//!
//! Socket handling and task spawning live in the infrastructure layer.

pub mod register_service;

pub use register_service::{CommandError, RegisterService};
