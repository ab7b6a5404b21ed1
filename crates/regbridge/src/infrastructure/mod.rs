//! Infrastructure layer for regbridge.
//!
//! Handles all I/O:
//!
//! - Binding the TCP listener and accepting client connections
//! - Running the sender and listener tasks of each session
//! - Reading the TOML configuration file
//! - Observing the shutdown token
//!
//! Register semantics (what a command means, what is streamed) belong to the
//! application layer; configuration types belong to the domain layer.

pub mod config_file;
pub mod session;
pub mod tcp_server;

// Re-export the primary entry points so `main.rs` can call them concisely.
pub use config_file::{load_config, render_config, ConfigFileError};
pub use session::{ConnectionSession, SessionReport};
pub use tcp_server::{run_server, BridgeServer};
