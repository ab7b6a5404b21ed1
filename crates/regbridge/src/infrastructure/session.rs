//! Per-connection session: the sender and listener tasks.
//!
//! Each accepted connection is split into its read and write halves and
//! served by two concurrent Tokio tasks:
//!
//! - **Sender**: every tick, reads the read register and writes the raw
//!   4 bytes to the socket.
//! - **Listener**: reads up to `recv_buffer_size` bytes, decodes them as an
//!   ASCII number and writes the value to the write register.
//!
//! The two tasks never talk to each other directly; they share only the
//! register store and a per-session teardown token.  Whichever loop ends
//! first cancels the token so the other one stops too.  The session is over
//! once both have exited, at which point both socket halves are dropped and
//! the connection is closed.
//!
//! Register access can block (the window mutex, the synchronous flush after
//! a write), so both loops run it on Tokio's blocking pool and never on an
//! async worker.

use std::net::SocketAddr;
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::task;
use tokio::time::{interval, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::application::{CommandError, RegisterService};
use crate::domain::session::{
    ConnectionError, LoopExit, LoopKind, SessionLifecycle, SessionSettings, SessionState,
};

/// Outcome of a finished session.
#[derive(Debug)]
pub struct SessionReport {
    pub id: Uuid,
    pub peer_addr: SocketAddr,
    /// Always [`SessionState::Closed`] once `run` has returned.
    pub state: SessionState,
    pub sender_exit: Option<LoopExit>,
    pub listener_exit: Option<LoopExit>,
}

/// One accepted client connection.
pub struct ConnectionSession {
    id: Uuid,
    peer_addr: SocketAddr,
    stream: TcpStream,
    service: Arc<RegisterService>,
    settings: SessionSettings,
}

/// State shared by the two loops of one session.
struct SessionShared {
    label: String,
    teardown: CancellationToken,
    lifecycle: Mutex<SessionLifecycle>,
}

impl SessionShared {
    /// Requests teardown of the whole session.  Safe to call from either
    /// loop, any number of times.
    fn close(&self) {
        self.teardown.cancel();
    }

    /// Records the exit of one loop, logs its cause and tears the session down.
    fn finish(&self, kind: LoopKind, exit: LoopExit) {
        let label = &self.label;
        match &exit {
            LoopExit::Cancelled => debug!("{label}: {kind} stopped"),
            LoopExit::Completed { .. } => info!("{label}: {kind} {exit}"),
            LoopExit::Connection(ConnectionError::PeerClosed) => {
                info!("{label}: {kind} ended, peer closed the connection")
            }
            LoopExit::Connection(e) => warn!("{label}: {kind} ended: {e}"),
            LoopExit::Fault(_) => error!("{label}: {kind} ended: {exit}"),
        }

        let state = self.lifecycle.lock().record_exit(kind, exit);
        debug!("{label}: state {state:?}");
        self.close();
    }
}

impl ConnectionSession {
    pub fn new(
        stream: TcpStream,
        peer_addr: SocketAddr,
        service: Arc<RegisterService>,
        settings: SessionSettings,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            peer_addr,
            stream,
            service,
            settings,
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    /// Runs both loops until they have exited, then closes the connection.
    ///
    /// Cancelling `shutdown` stops the session; ending the session never
    /// cancels `shutdown`.
    pub async fn run(self, shutdown: CancellationToken) -> SessionReport {
        let ConnectionSession {
            id,
            peer_addr,
            stream,
            service,
            settings,
        } = self;

        let label = format!("session {id} ({peer_addr})");
        // Frames are 4 bytes; Nagle would batch them into bursts.
        if let Err(e) = stream.set_nodelay(true) {
            debug!("{label}: could not set TCP_NODELAY: {e}");
        }
        let (mut reader, mut writer) = stream.into_split();

        let shared = Arc::new(SessionShared {
            label,
            teardown: shutdown.child_token(),
            lifecycle: Mutex::new(SessionLifecycle::new()),
        });
        info!("{}: started", shared.label);

        let sender_task = tokio::spawn({
            let shared = Arc::clone(&shared);
            let service = Arc::clone(&service);
            async move {
                let exit = sender_loop(&mut writer, &service, &settings, &shared.teardown).await;
                // Best effort: the peer may already be gone.
                let _ = writer.shutdown().await;
                shared.finish(LoopKind::Sender, exit);
            }
        });

        let listener_task = tokio::spawn({
            let shared = Arc::clone(&shared);
            async move {
                let exit = listener_loop(
                    &mut reader,
                    &service,
                    &settings,
                    &shared.teardown,
                    &shared.label,
                )
                .await;
                shared.finish(LoopKind::Listener, exit);
            }
        });

        let (sender_result, listener_result) = tokio::join!(sender_task, listener_task);
        if let Err(e) = sender_result {
            shared.finish(LoopKind::Sender, LoopExit::Fault(format!("task failed: {e}")));
        }
        if let Err(e) = listener_result {
            shared.finish(LoopKind::Listener, LoopExit::Fault(format!("task failed: {e}")));
        }

        let lifecycle = std::mem::take(&mut *shared.lifecycle.lock());
        let (state, sender_exit, listener_exit) = lifecycle.into_parts();
        info!("{}: closed", shared.label);

        SessionReport {
            id,
            peer_addr,
            state,
            sender_exit,
            listener_exit,
        }
    }
}

// ── Loops ─────────────────────────────────────────────────────────────────────

/// Streams register snapshots to `writer` until cancelled, the write fails,
/// or `max_samples` snapshots have been sent.
///
/// The first snapshot goes out immediately; later ones follow every
/// `settings.interval`.
pub async fn sender_loop<W>(
    writer: &mut W,
    service: &Arc<RegisterService>,
    settings: &SessionSettings,
    teardown: &CancellationToken,
) -> LoopExit
where
    W: AsyncWrite + Unpin,
{
    let mut ticker = interval(settings.interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    let mut sent: u64 = 0;

    loop {
        if settings.max_samples.is_some_and(|limit| sent >= limit) {
            return LoopExit::Completed { samples: sent };
        }

        tokio::select! {
            biased;
            _ = teardown.cancelled() => return LoopExit::Cancelled,
            _ = ticker.tick() => {}
        }

        let sampled = {
            let service = Arc::clone(service);
            task::spawn_blocking(move || service.sample()).await
        };
        let frame = match sampled {
            Ok(Ok(frame)) => frame,
            Ok(Err(e)) => return LoopExit::Fault(e.to_string()),
            Err(e) => return LoopExit::Fault(format!("register read task failed: {e}")),
        };

        let written = tokio::select! {
            biased;
            _ = teardown.cancelled() => return LoopExit::Cancelled,
            result = writer.write_all(&frame) => result,
        };
        if let Err(e) = written {
            return LoopExit::Connection(ConnectionError::from_io(e));
        }
        sent += 1;
    }
}

/// Applies every command read from `reader` to the write register until
/// cancelled, the peer closes, or the read fails.
///
/// Malformed commands are logged and dropped; the loop keeps going.
pub async fn listener_loop<R>(
    reader: &mut R,
    service: &Arc<RegisterService>,
    settings: &SessionSettings,
    teardown: &CancellationToken,
    label: &str,
) -> LoopExit
where
    R: AsyncRead + Unpin,
{
    let mut buf = vec![0u8; settings.recv_buffer_size];

    loop {
        let read = tokio::select! {
            biased;
            _ = teardown.cancelled() => return LoopExit::Cancelled,
            result = reader.read(&mut buf) => result,
        };

        let n = match read {
            Ok(0) => return LoopExit::Connection(ConnectionError::PeerClosed),
            Ok(n) => n,
            Err(e) => return LoopExit::Connection(ConnectionError::from_io(e)),
        };

        let applied = {
            let service = Arc::clone(service);
            let command = buf[..n].to_vec();
            task::spawn_blocking(move || service.apply_command(&command)).await
        };
        match applied {
            Ok(Ok(value)) => debug!(
                "{label}: wrote {value} at offset {}",
                service.offsets().write_offset
            ),
            Ok(Err(CommandError::Decode(e))) => warn!("{label}: discarding command: {e}"),
            Ok(Err(CommandError::Access(e))) => return LoopExit::Fault(e.to_string()),
            Err(e) => return LoopExit::Fault(format!("register write task failed: {e}")),
        }
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use std::io;
    use std::time::Duration;

    use regbridge_core::{
        AccessError, ByteOrder, InMemoryRegisters, RegisterCodec, RegisterOffsets, RegisterStore,
    };
    use tokio::net::TcpListener;
    use tokio::time::{sleep, timeout, Instant};
    use tokio_test::io::Builder;

    fn settings() -> SessionSettings {
        SessionSettings {
            offsets: RegisterOffsets::new(0, 4),
            codec: RegisterCodec::new(ByteOrder::Big),
            interval: Duration::from_millis(1),
            recv_buffer_size: 16,
            max_samples: None,
        }
    }

    fn service(store: Arc<dyn RegisterStore>) -> Arc<RegisterService> {
        let s = settings();
        Arc::new(RegisterService::new(store, s.offsets, s.codec))
    }

    /// Wraps a store so every write stalls, like a slow synchronous flush.
    struct SlowStore {
        inner: InMemoryRegisters,
        delay: Duration,
    }

    impl RegisterStore for SlowStore {
        fn read_at(&self, offset: usize, size: usize) -> Result<Vec<u8>, AccessError> {
            self.inner.read_at(offset, size)
        }

        fn write_at(&self, offset: usize, bytes: &[u8]) -> Result<(), AccessError> {
            std::thread::sleep(self.delay);
            self.inner.write_at(offset, bytes)
        }

        fn len(&self) -> usize {
            self.inner.len()
        }
    }

    // ── Sender ────────────────────────────────────────────────────────────────

    #[tokio::test]
    async fn test_sender_streams_raw_register_bytes_until_limit() {
        // Arrange: register holds 42, limit of two snapshots
        let store = Arc::new(InMemoryRegisters::from_bytes(vec![0, 0, 0, 42, 0, 0, 0, 0]));
        let mut writer = Builder::new().write(&[0, 0, 0, 42]).write(&[0, 0, 0, 42]).build();
        let settings = SessionSettings {
            max_samples: Some(2),
            ..settings()
        };

        // Act
        let exit = sender_loop(
            &mut writer,
            &service(store),
            &settings,
            &CancellationToken::new(),
        )
        .await;

        // Assert
        assert!(matches!(exit, LoopExit::Completed { samples: 2 }));
    }

    #[tokio::test]
    async fn test_sender_reports_broken_pipe() {
        let store = Arc::new(InMemoryRegisters::new(8));
        let mut writer = Builder::new()
            .write_error(io::Error::from(io::ErrorKind::BrokenPipe))
            .build();

        let exit = sender_loop(
            &mut writer,
            &service(store),
            &settings(),
            &CancellationToken::new(),
        )
        .await;

        assert!(matches!(
            exit,
            LoopExit::Connection(ConnectionError::BrokenPipe)
        ));
    }

    #[tokio::test]
    async fn test_sender_stops_when_cancelled() {
        let store = Arc::new(InMemoryRegisters::new(8));
        let mut writer = Builder::new().build();
        let teardown = CancellationToken::new();
        teardown.cancel();

        let exit = sender_loop(&mut writer, &service(store), &settings(), &teardown).await;

        assert!(matches!(exit, LoopExit::Cancelled));
    }

    #[tokio::test]
    async fn test_sender_faults_when_register_unreadable() {
        let store = Arc::new(InMemoryRegisters::failing(8));
        let mut writer = Builder::new().build();

        let exit = sender_loop(
            &mut writer,
            &service(store),
            &settings(),
            &CancellationToken::new(),
        )
        .await;

        assert!(matches!(exit, LoopExit::Fault(_)));
    }

    // ── Listener ──────────────────────────────────────────────────────────────

    #[tokio::test]
    async fn test_listener_writes_command_then_reports_peer_close() {
        // Arrange: one command, then EOF
        let store = Arc::new(InMemoryRegisters::new(8));
        let mut reader = Builder::new().read(b"17").build();

        // Act
        let exit = listener_loop(
            &mut reader,
            &service(store.clone()),
            &settings(),
            &CancellationToken::new(),
            "test",
        )
        .await;

        // Assert
        assert!(matches!(
            exit,
            LoopExit::Connection(ConnectionError::PeerClosed)
        ));
        assert_eq!(&store.snapshot()[4..], &[0, 0, 0, 17]);
    }

    #[tokio::test]
    async fn test_listener_discards_malformed_command_and_continues() {
        // Arrange: a bad command followed by a good one
        let store = Arc::new(InMemoryRegisters::new(8));
        let mut reader = Builder::new().read(b"4x2").read(b"99").build();

        // Act
        listener_loop(
            &mut reader,
            &service(store.clone()),
            &settings(),
            &CancellationToken::new(),
            "test",
        )
        .await;

        // Assert: only the valid command reached the register
        let writes = store.writes.lock().unwrap().clone();
        assert_eq!(writes, vec![(4, vec![0, 0, 0, 99])]);
    }

    #[tokio::test]
    async fn test_listener_reports_connection_reset() {
        let store = Arc::new(InMemoryRegisters::new(8));
        let mut reader = Builder::new()
            .read_error(io::Error::from(io::ErrorKind::ConnectionReset))
            .build();

        let exit = listener_loop(
            &mut reader,
            &service(store),
            &settings(),
            &CancellationToken::new(),
            "test",
        )
        .await;

        assert!(matches!(exit, LoopExit::Connection(ConnectionError::Reset)));
    }

    #[tokio::test]
    async fn test_listener_faults_when_register_unwritable() {
        let store = Arc::new(InMemoryRegisters::failing(8));
        let mut reader = Builder::new().read(b"5").build();

        let exit = listener_loop(
            &mut reader,
            &service(store),
            &settings(),
            &CancellationToken::new(),
            "test",
        )
        .await;

        assert!(matches!(exit, LoopExit::Fault(_)));
    }

    #[tokio::test]
    async fn test_listener_splits_commands_at_buffer_size() {
        // Arrange: a 2-byte receive buffer turns "1234" into "12" and "34"
        let store = Arc::new(InMemoryRegisters::new(8));
        let mut reader = Builder::new().read(b"1234").build();
        let settings = SessionSettings {
            recv_buffer_size: 2,
            ..settings()
        };

        // Act
        listener_loop(
            &mut reader,
            &service(store.clone()),
            &settings,
            &CancellationToken::new(),
            "test",
        )
        .await;

        // Assert
        let writes = store.writes.lock().unwrap().clone();
        assert_eq!(writes, vec![(4, vec![0, 0, 0, 12]), (4, vec![0, 0, 0, 34])]);
    }

    #[tokio::test(flavor = "current_thread")]
    async fn test_slow_register_write_does_not_stall_runtime() {
        // Arrange: a single-threaded runtime, a store whose writes take 300 ms
        // and a heartbeat task that should keep ticking every 2 ms
        let store = Arc::new(SlowStore {
            inner: InMemoryRegisters::new(8),
            delay: Duration::from_millis(300),
        });
        let mut reader = Builder::new().read(b"17").build();
        let stop = CancellationToken::new();
        let heartbeat = tokio::spawn({
            let stop = stop.clone();
            async move {
                let mut worst = Duration::ZERO;
                let mut last = Instant::now();
                while !stop.is_cancelled() {
                    sleep(Duration::from_millis(2)).await;
                    let now = Instant::now();
                    worst = worst.max(now - last);
                    last = now;
                }
                worst
            }
        });

        // Act
        let exit = listener_loop(
            &mut reader,
            &service(Arc::clone(&store) as Arc<dyn RegisterStore>),
            &settings(),
            &CancellationToken::new(),
            "test",
        )
        .await;
        stop.cancel();
        let worst = heartbeat.await.unwrap();

        // Assert: the write landed and the heartbeat never waited on it
        assert!(matches!(
            exit,
            LoopExit::Connection(ConnectionError::PeerClosed)
        ));
        assert_eq!(&store.inner.snapshot()[4..], &[0, 0, 0, 17]);
        assert!(worst < Duration::from_millis(150), "runtime stalled for {worst:?}");
    }

    // ── Whole session ─────────────────────────────────────────────────────────

    #[tokio::test]
    async fn test_peer_close_ends_both_loops_and_closes_session() {
        // Arrange: a real loopback connection served by one session
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let mut client = TcpStream::connect(listener.local_addr().unwrap())
            .await
            .unwrap();
        let (stream, peer_addr) = listener.accept().await.unwrap();
        let store = Arc::new(InMemoryRegisters::from_bytes(vec![0, 0, 0, 9, 0, 0, 0, 0]));
        let session = ConnectionSession::new(stream, peer_addr, service(store), settings());
        let id = session.id();
        let running = tokio::spawn(session.run(CancellationToken::new()));

        let mut frame = [0u8; 4];
        client.read_exact(&mut frame).await.unwrap();
        assert_eq!(frame, [0, 0, 0, 9]);

        // Act: the client finishes sending (orderly FIN)
        client.shutdown().await.unwrap();
        let report = timeout(Duration::from_secs(2), running)
            .await
            .expect("session did not end")
            .unwrap();

        // Assert
        assert_eq!(report.id, id);
        assert_eq!(report.peer_addr, peer_addr);
        assert_eq!(report.state, SessionState::Closed);
        assert!(matches!(
            report.listener_exit,
            Some(LoopExit::Connection(ConnectionError::PeerClosed))
        ));
        assert!(matches!(report.sender_exit, Some(LoopExit::Cancelled)));
    }

    #[tokio::test]
    async fn test_shutdown_token_cancels_both_loops() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let _client = TcpStream::connect(listener.local_addr().unwrap())
            .await
            .unwrap();
        let (stream, peer_addr) = listener.accept().await.unwrap();
        let session = ConnectionSession::new(
            stream,
            peer_addr,
            service(Arc::new(InMemoryRegisters::new(8))),
            settings(),
        );
        let shutdown = CancellationToken::new();
        let running = tokio::spawn(session.run(shutdown.clone()));

        shutdown.cancel();
        let report = timeout(Duration::from_secs(2), running)
            .await
            .expect("session did not end")
            .unwrap();

        assert!(report.state.is_closed());
        assert!(matches!(report.sender_exit, Some(LoopExit::Cancelled)));
        assert!(matches!(report.listener_exit, Some(LoopExit::Cancelled)));
    }
}
