//! TCP server: listener setup and the accept loop.
//!
//! The accept loop never blocks on a session: it accepts a connection, spawns
//! a [`ConnectionSession`] task for it and goes straight back to `accept`.
//! One misbehaving client therefore never delays the others, and a client
//! that disconnects never affects the listener.
//!
//! Shutdown is driven by a [`CancellationToken`].  Each session runs on a
//! child token, so cancelling the root stops the accept loop and every live
//! session, while a session ending on its own leaves the root untouched.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use regbridge_core::RegisterStore;
use tokio::net::{TcpListener, TcpSocket};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

use crate::application::RegisterService;
use crate::domain::{BridgeConfig, LoopExit, SessionSettings};
use crate::infrastructure::session::{ConnectionSession, SessionReport};

/// Pending connections queued by the kernel before `accept`.
const LISTEN_BACKLOG: u32 = 128;

/// Pause after a failed `accept` before trying again.
const ACCEPT_BACKOFF: Duration = Duration::from_millis(100);

/// A bound listener plus everything its sessions share.
pub struct BridgeServer {
    listener: TcpListener,
    service: Arc<RegisterService>,
    settings: SessionSettings,
}

impl BridgeServer {
    /// Validates `config` against `store` and binds the listener on
    /// `config.bind_addr` with `SO_REUSEADDR`.
    ///
    /// # Errors
    ///
    /// Returns an error if the configuration is invalid, a register offset
    /// falls outside `store`, or the address cannot be bound.
    pub fn bind(config: &BridgeConfig, store: Arc<dyn RegisterStore>) -> anyhow::Result<Self> {
        config.validate().context("invalid configuration")?;

        let settings = SessionSettings::from_config(config);
        settings
            .offsets
            .validate(store.len())
            .context("register offsets do not fit the memory window")?;

        let listener = bind_listener(config.bind_addr)
            .with_context(|| format!("failed to bind listener on {}", config.bind_addr))?;

        let service = Arc::new(RegisterService::new(store, settings.offsets, settings.codec));

        Ok(Self {
            listener,
            service,
            settings,
        })
    }

    /// The address the listener is actually bound to.
    ///
    /// # Errors
    ///
    /// Returns an error if the socket address cannot be queried.
    pub fn local_addr(&self) -> std::io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    /// Accepts connections until `shutdown` is cancelled, then waits for the
    /// live sessions to wind down.
    pub async fn serve(self, shutdown: CancellationToken) {
        let addr = self
            .local_addr()
            .map(|a| a.to_string())
            .unwrap_or_else(|_| "<unknown>".to_string());
        info!("regbridge listening on {addr}");

        let mut sessions: JoinSet<SessionReport> = JoinSet::new();

        loop {
            tokio::select! {
                biased;
                _ = shutdown.cancelled() => {
                    info!("shutdown requested; stopping accept loop");
                    break;
                }
                Some(joined) = sessions.join_next(), if !sessions.is_empty() => {
                    log_session_end(joined);
                }
                accepted = self.listener.accept() => match accepted {
                    Ok((stream, peer_addr)) => {
                        let session = ConnectionSession::new(
                            stream,
                            peer_addr,
                            Arc::clone(&self.service),
                            self.settings,
                        );
                        info!("accepted connection from {peer_addr} (session {})", session.id());
                        sessions.spawn(session.run(shutdown.clone()));
                    }
                    // Transient (e.g. out of file descriptors); keep serving.
                    Err(e) => {
                        error!("accept error: {e}; retrying in {ACCEPT_BACKOFF:?}");
                        if !backoff_after_accept_error(&shutdown).await {
                            info!("shutdown requested; stopping accept loop");
                            break;
                        }
                    }
                },
            }
        }

        drop(self.listener);
        while let Some(joined) = sessions.join_next().await {
            log_session_end(joined);
        }
        info!("all sessions closed");
    }
}

/// Binds `addr` and starts serving until `shutdown` is cancelled.
///
/// # Errors
///
/// Returns an error if [`BridgeServer::bind`] fails.
pub async fn run_server(
    config: BridgeConfig,
    store: Arc<dyn RegisterStore>,
    shutdown: CancellationToken,
) -> anyhow::Result<()> {
    let server = BridgeServer::bind(&config, store)?;
    server.serve(shutdown).await;
    Ok(())
}

fn bind_listener(addr: SocketAddr) -> std::io::Result<TcpListener> {
    let socket = if addr.is_ipv4() {
        TcpSocket::new_v4()?
    } else {
        TcpSocket::new_v6()?
    };
    #[cfg(unix)]
    socket.set_reuseaddr(true)?;
    socket.bind(addr)?;
    socket.listen(LISTEN_BACKLOG)
}

/// Waits [`ACCEPT_BACKOFF`] so a persistent accept failure cannot spin.
/// Returns `false` if `shutdown` fired while waiting.
async fn backoff_after_accept_error(shutdown: &CancellationToken) -> bool {
    tokio::select! {
        biased;
        _ = shutdown.cancelled() => false,
        _ = tokio::time::sleep(ACCEPT_BACKOFF) => true,
    }
}

fn log_session_end(joined: Result<SessionReport, tokio::task::JoinError>) {
    match joined {
        Ok(report) => debug!(
            "session {} ({}) finished: sender {}, listener {}",
            report.id,
            report.peer_addr,
            describe(report.sender_exit.as_ref()),
            describe(report.listener_exit.as_ref()),
        ),
        Err(e) => error!("session task failed: {e}"),
    }
}

fn describe(exit: Option<&LoopExit>) -> String {
    exit.map_or_else(|| "unknown".to_string(), ToString::to_string)
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use regbridge_core::InMemoryRegisters;

    fn loopback_config() -> BridgeConfig {
        BridgeConfig {
            bind_addr: "127.0.0.1:0".parse().unwrap(),
            ..BridgeConfig::default()
        }
    }

    #[tokio::test]
    async fn test_bind_reports_ephemeral_port() {
        let store = Arc::new(InMemoryRegisters::new(8));

        let server = BridgeServer::bind(&loopback_config(), store).unwrap();

        assert_ne!(server.local_addr().unwrap().port(), 0);
    }

    #[tokio::test]
    async fn test_bind_rejects_offsets_outside_store() {
        // Arrange: the config says 8 bytes but the store only has 4
        let store = Arc::new(InMemoryRegisters::new(4));

        // Act
        let result = BridgeServer::bind(&loopback_config(), store);

        // Assert
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn test_bind_rejects_invalid_config() {
        let mut config = loopback_config();
        config.stream.interval_ms = 0;

        let result = BridgeServer::bind(&config, Arc::new(InMemoryRegisters::new(8)));

        assert!(result.is_err());
    }

    #[tokio::test]
    async fn test_serve_returns_after_cancellation() {
        // Arrange
        let server =
            BridgeServer::bind(&loopback_config(), Arc::new(InMemoryRegisters::new(8))).unwrap();
        let shutdown = CancellationToken::new();

        // Act
        shutdown.cancel();
        let finished =
            tokio::time::timeout(std::time::Duration::from_secs(1), server.serve(shutdown)).await;

        // Assert
        assert!(finished.is_ok());
    }

    #[tokio::test]
    async fn test_accept_error_backoff_waits_before_retry() {
        let shutdown = CancellationToken::new();
        let started = tokio::time::Instant::now();

        let retry = backoff_after_accept_error(&shutdown).await;

        assert!(retry);
        assert!(started.elapsed() >= ACCEPT_BACKOFF);
    }

    #[tokio::test]
    async fn test_accept_error_backoff_ends_on_shutdown() {
        let shutdown = CancellationToken::new();
        shutdown.cancel();

        let retry = backoff_after_accept_error(&shutdown).await;

        assert!(!retry);
    }
}
