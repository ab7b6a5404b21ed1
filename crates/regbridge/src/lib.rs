//! regbridge library crate.
//!
//! This crate exposes one memory-mapped hardware register to TCP clients: each
//! client receives a continuous stream of the register's raw 4-byte value and
//! may send ASCII digit commands that are written back to a second register.
//!
//! # Architecture (clean architecture)
//!
//! ```text
//! TCP client (raw 4-byte frames out, ASCII digits in)
//!         ↕
//! [regbridge]
//!   ├── domain/           Pure types: BridgeConfig, session state machine
//!   ├── application/      RegisterService: sample / apply command
//!   └── infrastructure/
//!         ├── tcp_server/  Accept loop (tokio)
//!         ├── session/     Sender + listener tasks per connection
//!         └── config_file/ TOML configuration loading
//!         ↕
//! [regbridge-core] MemoryWindow (mmap of /dev/mem)
//! ```
//!
//! # Layer rules
//!
//! - `domain` performs no I/O and knows nothing of tokio.
//! - `application` depends on `domain` and `regbridge-core` only.
//! - `infrastructure` depends on all other layers plus `tokio`.

/// Domain layer: configuration and session lifecycle types (no I/O).
pub mod domain;

/// Application layer: register read/write use cases.
pub mod application;

/// Infrastructure layer: TCP server, session tasks, config file loading.
pub mod infrastructure;
