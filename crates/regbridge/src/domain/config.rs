//! Bridge configuration types.
//!
//! [`BridgeConfig`] is the single source of truth for all runtime settings.
//! Every field has a default, so an empty TOML file (or no file at all) yields
//! a working configuration for the reference board:
//!
//! ```toml
//! bind_addr = "127.0.0.1:30001"
//! log_level = "info"
//!
//! [device]
//! path = "/dev/mem"
//! base_address = 255
//! window_length = 8
//! read_offset = 0
//! write_offset = 4
//! access_policy = "exclusive"
//! sync_writes = true
//!
//! [stream]
//! interval_ms = 10
//! recv_buffer_size = 16
//! byte_order = "big"
//! ```
//!
//! The infrastructure layer is responsible for populating the struct from a
//! file, CLI args or environment variables; this module only describes and
//! validates it.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use regbridge_core::{
    AccessPolicy, BoundsError, ByteOrder, RegisterCodec, RegisterOffsets, WindowOptions,
};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// A configuration value that cannot work at run time.
#[derive(Debug, Error, PartialEq)]
pub enum ConfigError {
    #[error("device.window_length must be greater than zero")]
    EmptyWindow,

    /// A register offset does not leave room for a full register word.
    #[error("register offset outside the memory window: {0}")]
    Offsets(#[from] BoundsError),

    #[error("stream.interval_ms must be greater than zero")]
    ZeroInterval,

    #[error("stream.recv_buffer_size must be greater than zero")]
    ZeroReceiveBuffer,

    #[error("stream.max_samples must be greater than zero when set")]
    ZeroMaxSamples,
}

/// All runtime configuration for the bridge.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BridgeConfig {
    /// Address the TCP listener binds to.
    #[serde(default = "default_bind_addr")]
    pub bind_addr: SocketAddr,

    /// `tracing` level used when `RUST_LOG` is not set.
    #[serde(default = "default_log_level")]
    pub log_level: String,

    #[serde(default)]
    pub device: DeviceConfig,

    #[serde(default)]
    pub stream: StreamConfig,
}

/// Where the register window lives and how it is accessed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeviceConfig {
    /// Memory-backed file to map.
    #[serde(default = "default_device_path")]
    pub path: PathBuf,
    /// Offset in `path` at which the window begins.
    #[serde(default = "default_base_address")]
    pub base_address: u64,
    /// Size of the window in bytes.
    #[serde(default = "default_window_length")]
    pub window_length: usize,
    /// Offset (inside the window) of the streamed register.
    #[serde(default = "default_read_offset")]
    pub read_offset: usize,
    /// Offset (inside the window) that client commands are written to.
    #[serde(default = "default_write_offset")]
    pub write_offset: usize,
    #[serde(default)]
    pub access_policy: AccessPolicy,
    /// Flush every register write to the device before acknowledging it.
    #[serde(default = "default_true")]
    pub sync_writes: bool,
}

/// Per-session streaming behaviour.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StreamConfig {
    /// Delay between two register snapshots sent to a client.
    #[serde(default = "default_interval_ms")]
    pub interval_ms: u64,
    /// Maximum number of bytes taken from the socket per inbound command.
    #[serde(default = "default_recv_buffer_size")]
    pub recv_buffer_size: usize,
    /// Close the stream after this many snapshots.  Unlimited when absent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_samples: Option<u64>,
    /// Byte order of integers written to the write register.
    #[serde(default)]
    pub byte_order: ByteOrder,
}

// ── Default helpers ───────────────────────────────────────────────────────────

fn default_bind_addr() -> SocketAddr {
    SocketAddr::from(([127, 0, 0, 1], 30001))
}
fn default_log_level() -> String {
    "info".to_string()
}
fn default_device_path() -> PathBuf {
    PathBuf::from("/dev/mem")
}
fn default_base_address() -> u64 {
    0xFF
}
fn default_window_length() -> usize {
    8
}
fn default_read_offset() -> usize {
    0
}
fn default_write_offset() -> usize {
    4
}
fn default_true() -> bool {
    true
}
fn default_interval_ms() -> u64 {
    10
}
fn default_recv_buffer_size() -> usize {
    16
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            bind_addr: default_bind_addr(),
            log_level: default_log_level(),
            device: DeviceConfig::default(),
            stream: StreamConfig::default(),
        }
    }
}

impl Default for DeviceConfig {
    fn default() -> Self {
        Self {
            path: default_device_path(),
            base_address: default_base_address(),
            window_length: default_window_length(),
            read_offset: default_read_offset(),
            write_offset: default_write_offset(),
            access_policy: AccessPolicy::default(),
            sync_writes: default_true(),
        }
    }
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            interval_ms: default_interval_ms(),
            recv_buffer_size: default_recv_buffer_size(),
            max_samples: None,
            byte_order: ByteOrder::default(),
        }
    }
}

impl BridgeConfig {
    /// Rejects settings that would fail at run time.
    ///
    /// # Errors
    ///
    /// Returns the first [`ConfigError`] found.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.device.window_length == 0 {
            return Err(ConfigError::EmptyWindow);
        }
        self.device.offsets().validate(self.device.window_length)?;
        if self.stream.interval_ms == 0 {
            return Err(ConfigError::ZeroInterval);
        }
        if self.stream.recv_buffer_size == 0 {
            return Err(ConfigError::ZeroReceiveBuffer);
        }
        if self.stream.max_samples == Some(0) {
            return Err(ConfigError::ZeroMaxSamples);
        }
        Ok(())
    }
}

impl DeviceConfig {
    pub fn offsets(&self) -> RegisterOffsets {
        RegisterOffsets::new(self.read_offset, self.write_offset)
    }

    pub fn window_options(&self) -> WindowOptions {
        WindowOptions {
            policy: self.access_policy,
            sync_writes: self.sync_writes,
        }
    }
}

impl StreamConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_millis(self.interval_ms)
    }

    pub fn codec(&self) -> RegisterCodec {
        RegisterCodec::new(self.byte_order)
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
