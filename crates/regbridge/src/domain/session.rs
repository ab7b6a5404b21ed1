//! Session lifecycle types.
//!
//! A session serves one client connection with two loops running side by
//! side: the *sender* (register → socket) and the *listener* (socket →
//! register).  The session is over once both loops have exited:
//!
//! ```text
//!            sender exits            listener exits
//! Active ──────────────────► SenderDone ──────────────────► Closed
//!    │                                                         ▲
//!    │ listener exits                        sender exits      │
//!    └─────────────────────► ListenerDone ─────────────────────┘
//! ```

use std::fmt;
use std::io;
use std::time::Duration;

use regbridge_core::{RegisterCodec, RegisterOffsets};
use thiserror::Error;

use super::config::BridgeConfig;

// ── Settings ──────────────────────────────────────────────────────────────────

/// Everything a session needs to know, resolved once from [`BridgeConfig`]
/// and shared by every session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionSettings {
    pub offsets: RegisterOffsets,
    pub codec: RegisterCodec,
    /// Delay between two register snapshots.
    pub interval: Duration,
    /// Maximum bytes per inbound command.
    pub recv_buffer_size: usize,
    /// Snapshot limit per connection; `None` streams until disconnect.
    pub max_samples: Option<u64>,
}

impl SessionSettings {
    pub fn from_config(config: &BridgeConfig) -> Self {
        Self {
            offsets: config.device.offsets(),
            codec: config.stream.codec(),
            interval: config.stream.interval(),
            recv_buffer_size: config.stream.recv_buffer_size,
            max_samples: config.stream.max_samples,
        }
    }
}

impl Default for SessionSettings {
    fn default() -> Self {
        Self::from_config(&BridgeConfig::default())
    }
}

// ── State machine ─────────────────────────────────────────────────────────────

/// Which of the two session loops.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoopKind {
    Sender,
    Listener,
}

impl fmt::Display for LoopKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LoopKind::Sender => f.write_str("sender"),
            LoopKind::Listener => f.write_str("listener"),
        }
    }
}

/// Lifecycle state of a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// Both loops running.
    Active,
    /// The sender has exited; the listener is still running.
    SenderDone,
    /// The listener has exited; the sender is still running.
    ListenerDone,
    /// Both loops have exited and the connection is closed.
    Closed,
}

impl SessionState {
    /// The state after `kind` has exited.
    ///
    /// Reporting the same loop twice leaves the state unchanged.
    pub fn on_loop_exit(self, kind: LoopKind) -> SessionState {
        match (self, kind) {
            (SessionState::Active, LoopKind::Sender) => SessionState::SenderDone,
            (SessionState::Active, LoopKind::Listener) => SessionState::ListenerDone,
            (SessionState::SenderDone, LoopKind::Listener)
            | (SessionState::ListenerDone, LoopKind::Sender) => SessionState::Closed,
            (state, _) => state,
        }
    }

    pub fn is_closed(self) -> bool {
        self == SessionState::Closed
    }
}

/// Tracks the state of one session and how each loop ended.
#[derive(Debug)]
pub struct SessionLifecycle {
    state: SessionState,
    sender_exit: Option<LoopExit>,
    listener_exit: Option<LoopExit>,
}

impl Default for SessionLifecycle {
    fn default() -> Self {
        Self::new()
    }
}

impl SessionLifecycle {
    pub fn new() -> Self {
        Self {
            state: SessionState::Active,
            sender_exit: None,
            listener_exit: None,
        }
    }

    /// Records that `kind` exited with `exit` and returns the new state.
    ///
    /// Only the first exit of each loop is kept.
    pub fn record_exit(&mut self, kind: LoopKind, exit: LoopExit) -> SessionState {
        let slot = match kind {
            LoopKind::Sender => &mut self.sender_exit,
            LoopKind::Listener => &mut self.listener_exit,
        };
        if slot.is_none() {
            *slot = Some(exit);
        }
        self.state = self.state.on_loop_exit(kind);
        self.state
    }

    /// Consumes the lifecycle, returning the final state and both loop exits.
    pub fn into_parts(self) -> (SessionState, Option<LoopExit>, Option<LoopExit>) {
        (self.state, self.sender_exit, self.listener_exit)
    }
}

// ── Loop outcomes ─────────────────────────────────────────────────────────────

/// Why a connection stopped carrying data.
#[derive(Debug, Error)]
pub enum ConnectionError {
    /// The peer performed an orderly shutdown (zero-length read).
    #[error("peer closed the connection")]
    PeerClosed,

    #[error("connection reset by peer")]
    Reset,

    #[error("broken pipe")]
    BrokenPipe,

    #[error("connection I/O error: {0}")]
    Io(#[source] io::Error),
}

impl ConnectionError {
    /// Classifies a socket error so the log line names the actual cause.
    pub fn from_io(err: io::Error) -> Self {
        match err.kind() {
            io::ErrorKind::ConnectionReset | io::ErrorKind::ConnectionAborted => {
                ConnectionError::Reset
            }
            io::ErrorKind::BrokenPipe => ConnectionError::BrokenPipe,
            io::ErrorKind::UnexpectedEof => ConnectionError::PeerClosed,
            _ => ConnectionError::Io(err),
        }
    }
}

/// How one session loop ended.
#[derive(Debug)]
pub enum LoopExit {
    /// Teardown was requested (by the other loop or by server shutdown).
    Cancelled,
    /// The sender delivered its configured number of snapshots.
    Completed { samples: u64 },
    /// The socket failed or was closed by the peer.
    Connection(ConnectionError),
    /// The register store failed; the session cannot continue.
    Fault(String),
}

impl fmt::Display for LoopExit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LoopExit::Cancelled => f.write_str("cancelled"),
            LoopExit::Completed { samples } => write!(f, "completed after {samples} samples"),
            LoopExit::Connection(e) => write!(f, "{e}"),
            LoopExit::Fault(msg) => write!(f, "register fault: {msg}"),
        }
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
