//! regbridge: register-streaming TCP bridge, entry point.
//!
//! Maps a small window of a memory-backed file (by default `/dev/mem`),
//! streams the 4-byte register at the read offset to every connected client
//! and writes each ASCII number a client sends into the register at the write
//! offset.
//!
//! # Usage
//!
//! ```text
//! regbridge [OPTIONS]
//!
//! Options:
//!   --config <PATH>          TOML configuration file
//!   --bind <ADDR>            Listener address [default: 127.0.0.1:30001]
//!   --device <PATH>          Memory-backed file to map [default: /dev/mem]
//!   --base-address <ADDR>    Window start, decimal or 0x hex [default: 0xFF]
//!   --window-length <BYTES>  Window size [default: 8]
//!   --read-offset <BYTES>    Streamed register [default: 0]
//!   --write-offset <BYTES>   Command register [default: 4]
//!   --interval-ms <MS>       Delay between snapshots [default: 10]
//!   --max-samples <N>        Close each stream after N snapshots
//!   --byte-order <ORDER>     big | little | native [default: big]
//!   --unsynchronized         Let sessions access the window concurrently
//!   --no-sync-writes         Skip the flush after each register write
//!   --print-config           Print the effective configuration and exit
//! ```
//!
//! Settings are resolved as built-in defaults, then the TOML file, then
//! command-line flags (each flag also reads a `REGBRIDGE_*` variable).
//!
//! # Architecture overview
//!
//! ```text
//! TCP clients  (raw 4-byte snapshots out, ASCII digits in)
//!       ↕
//! regbridge  ← this process
//!   domain/          BridgeConfig, session state machine
//!   application/     RegisterService (sample / apply_command)
//!   infrastructure/  accept loop, session tasks, TOML loader
//!       ↕
//! regbridge-core::MemoryWindow  (mmap of the device file)
//! ```

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use regbridge_core::{AccessPolicy, ByteOrder, MemoryWindow, RegisterStore};
use tokio_util::sync::CancellationToken;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use regbridge::domain::BridgeConfig;
use regbridge::infrastructure::{load_config, render_config, run_server};

// ── CLI argument definitions ──────────────────────────────────────────────────

/// Register-streaming TCP bridge.
///
/// Flags left unset keep the value from the configuration file, or the
/// built-in default when no file is given.
#[derive(Debug, Parser)]
#[command(
    name = "regbridge",
    about = "Streams a memory-mapped register over TCP and writes client values back",
    version
)]
struct Cli {
    /// TOML configuration file.
    #[arg(long, env = "REGBRIDGE_CONFIG")]
    config: Option<PathBuf>,

    /// Address the TCP listener binds to.
    #[arg(long, env = "REGBRIDGE_BIND")]
    bind: Option<SocketAddr>,

    /// Memory-backed file holding the registers.
    #[arg(long, env = "REGBRIDGE_DEVICE")]
    device: Option<PathBuf>,

    /// Offset in the device file where the window starts (decimal or `0x` hex).
    #[arg(long, env = "REGBRIDGE_BASE_ADDRESS", value_parser = parse_address)]
    base_address: Option<u64>,

    /// Size of the mapped window in bytes.
    #[arg(long, env = "REGBRIDGE_WINDOW_LENGTH")]
    window_length: Option<usize>,

    /// Offset inside the window of the register streamed to clients.
    #[arg(long, env = "REGBRIDGE_READ_OFFSET")]
    read_offset: Option<usize>,

    /// Offset inside the window that client values are written to.
    #[arg(long, env = "REGBRIDGE_WRITE_OFFSET")]
    write_offset: Option<usize>,

    /// Delay between two register snapshots, in milliseconds.
    #[arg(long, env = "REGBRIDGE_INTERVAL_MS")]
    interval_ms: Option<u64>,

    /// Close each client stream after this many snapshots.
    #[arg(long, env = "REGBRIDGE_MAX_SAMPLES")]
    max_samples: Option<u64>,

    /// Byte order used to store client values: big, little or native.
    #[arg(long, env = "REGBRIDGE_BYTE_ORDER", value_parser = parse_byte_order)]
    byte_order: Option<ByteOrder>,

    /// Do not serialize register accesses between sessions.
    #[arg(long)]
    unsynchronized: bool,

    /// Do not flush each register write to the device.
    #[arg(long)]
    no_sync_writes: bool,

    /// Print the effective configuration as TOML and exit.
    #[arg(long)]
    print_config: bool,
}

impl Cli {
    /// Loads the configuration file (if any) and applies the flags on top.
    ///
    /// # Errors
    ///
    /// Returns an error if the configuration file cannot be read or parsed.
    fn into_bridge_config(self) -> anyhow::Result<BridgeConfig> {
        let mut config = match &self.config {
            Some(path) => load_config(path)?,
            None => BridgeConfig::default(),
        };

        if let Some(bind) = self.bind {
            config.bind_addr = bind;
        }
        if let Some(device) = self.device {
            config.device.path = device;
        }
        if let Some(base) = self.base_address {
            config.device.base_address = base;
        }
        if let Some(length) = self.window_length {
            config.device.window_length = length;
        }
        if let Some(offset) = self.read_offset {
            config.device.read_offset = offset;
        }
        if let Some(offset) = self.write_offset {
            config.device.write_offset = offset;
        }
        if self.unsynchronized {
            config.device.access_policy = AccessPolicy::Unsynchronized;
        }
        if self.no_sync_writes {
            config.device.sync_writes = false;
        }
        if let Some(ms) = self.interval_ms {
            config.stream.interval_ms = ms;
        }
        if self.max_samples.is_some() {
            config.stream.max_samples = self.max_samples;
        }
        if let Some(order) = self.byte_order {
            config.stream.byte_order = order;
        }

        Ok(config)
    }
}

/// Parses a decimal or `0x`-prefixed hexadecimal address.
fn parse_address(s: &str) -> Result<u64, String> {
    let parsed = match s.strip_prefix("0x").or_else(|| s.strip_prefix("0X")) {
        Some(hex) => u64::from_str_radix(hex, 16),
        None => s.parse(),
    };
    parsed.map_err(|e| format!("invalid address '{s}': {e}"))
}

fn parse_byte_order(s: &str) -> Result<ByteOrder, String> {
    match s.to_ascii_lowercase().as_str() {
        "big" => Ok(ByteOrder::Big),
        "little" => Ok(ByteOrder::Little),
        "native" => Ok(ByteOrder::Native),
        other => Err(format!("unknown byte order '{other}' (expected big, little or native)")),
    }
}

// ── Entry point ───────────────────────────────────────────────────────────────

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let print_config = cli.print_config;
    let config = cli.into_bridge_config()?;

    if print_config {
        print!("{}", render_config(&config)?);
        return Ok(());
    }

    // `RUST_LOG` wins over the configured level.
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(&config.log_level)),
        )
        .init();

    config.validate().context("invalid configuration")?;

    info!(
        "regbridge starting: bind={}, device={}",
        config.bind_addr,
        config.device.path.display()
    );

    let window = Arc::new(
        MemoryWindow::open_with(
            &config.device.path,
            config.device.window_length,
            config.device.base_address,
            config.device.window_options(),
        )
        .with_context(|| format!("cannot open memory window on {}", config.device.path.display()))?,
    );
    let options = window.options();
    info!(
        "register window {} @ {:#x}: {} bytes, {:?} access, sync_writes={}",
        window.path().display(),
        window.base_offset(),
        window.len(),
        options.policy,
        options.sync_writes
    );

    // ── Graceful shutdown ─────────────────────────────────────────────────────
    let shutdown = CancellationToken::new();
    tokio::spawn({
        let shutdown = shutdown.clone();
        async move {
            match tokio::signal::ctrl_c().await {
                Ok(()) => {
                    info!("received Ctrl+C, shutting down");
                    shutdown.cancel();
                }
                Err(e) => error!("failed to listen for Ctrl+C signal: {e}"),
            }
        }
    });

    let store: Arc<dyn RegisterStore> = window.clone();
    let result = run_server(config, store, shutdown).await;

    window.close();
    info!("regbridge stopped; released {}", window.path().display());
    result
}

// ── Tests ─────────────────────────────────────────────────────────────────────
