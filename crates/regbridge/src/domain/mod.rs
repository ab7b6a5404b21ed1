//! Domain layer for regbridge.
//!
//! Pure types with no dependencies on sockets, files or async runtimes:
//!
//! - Configuration structures and their validation
//! - The per-session lifecycle state machine and loop outcomes
//! - Classification of connection failures

pub mod config;
pub mod session;

pub use config::{BridgeConfig, ConfigError, DeviceConfig, StreamConfig};
pub use session::{
    ConnectionError, LoopExit, LoopKind, SessionLifecycle, SessionSettings, SessionState,
};
