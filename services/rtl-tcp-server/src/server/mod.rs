//! rtl-tcp streaming server
//!
//! Three threads cooperate once a client is connected:
//! 1. The device's read thread calls [`SdrTcpServer::feed`], which copies
//!    samples into a stage-0 pool buffer and relays it to stage 1
//! 2. The serving thread (`rtltcp-server`) drains stage 1 to the socket and
//!    recycles the buffer
//! 3. The command thread (`rtltcp-commands`) reads 5-byte records and hands
//!    them to the registered [`ClientCallbacks`]
//!
//! Shutdown is cooperative. Workers poll the state with relaxed reads on
//! every loop turn (all blocking calls time out after about a second) and
//! every transition is made under the state mutex after re-checking the
//! current state. Cleanup back to `Uninitialized` is idempotent, so
//! whichever thread gets there first releases the sockets and pool.

mod commands;
mod state;

pub use state::{ServerState, StreamStats};

use std::io::{self, ErrorKind, Write};
use std::net::{IpAddr, Shutdown, SocketAddr, TcpListener, TcpStream};
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread::{self, JoinHandle};
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, error, info, trace, warn};

use crate::pool::{BufferPool, ElementKind};
use crate::protocol::{CommandRecord, DongleInfo, DONGLE_INFO_LEN};

/// Buffers in flight between the device thread and the socket
pub const POOL_MAX_ELEMENTS: usize = 5;

/// Stage 0 = ready to fill, stage 1 = ready to send
pub const RELAY_STAGES: usize = 2;

/// Back-off for `feed` while no client is attached
pub const FEED_BACKOFF: Duration = Duration::from_millis(500);

/// Read/write timeout on the client socket
pub const SOCKET_TIMEOUT: Duration = Duration::from_secs(1);

/// Sleep between accept attempts on the non-blocking listener
pub const ACCEPT_POLL_INTERVAL: Duration = Duration::from_millis(50);

/// Server errors
#[derive(Debug, Error)]
pub enum ServerError {
    #[error("operation not valid in state {0}")]
    WrongState(ServerState),

    #[error("invalid bind address '{0}'")]
    InvalidAddress(String),

    #[error("failed to listen on {addr}: {source}")]
    Bind {
        addr: SocketAddr,
        #[source]
        source: io::Error,
    },

    #[error("failed to configure listener: {0}")]
    Socket(#[source] io::Error),

    #[error("failed to spawn {name} thread: {source}")]
    Thread {
        name: &'static str,
        #[source]
        source: io::Error,
    },
}

/// Outcome of [`SdrTcpServer::feed`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FeedStatus {
    /// Samples are queued for the client
    Queued,
    /// No buffer freed up in time, this chunk was discarded
    Dropped,
    /// Listening but no client yet; the call backed off before returning
    NoClient,
    /// Server is not running; stop feeding until the socket is reopened
    Closed,
}

/// Hooks invoked from the server's worker threads
pub trait ClientCallbacks: Send + Sync {
    /// A complete command record arrived (command thread)
    fn on_command(&self, command: CommandRecord);

    /// The server shut down; called exactly once per `serve_client_async`
    fn on_closed(&self);
}

/// Resources owned by the state machine
#[derive(Default)]
struct Inner {
    listener: Option<TcpListener>,
    client: Option<TcpStream>,
    pool: Option<Arc<BufferPool>>,
    callbacks: Option<Arc<dyn ClientCallbacks>>,
}

pub(crate) struct Shared {
    /// Mirror of the state for lock-free fast-path checks only
    state: AtomicU8,
    inner: Mutex<Inner>,
    supervisor: Mutex<Option<JoinHandle<()>>>,
    stats: StreamStats,
}

impl Shared {
    /// Racy read, good enough to leave a loop early. Never act on it
    /// without re-checking under the lock.
    fn state(&self) -> ServerState {
        ServerState::from_u8(self.state.load(Ordering::Acquire))
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Store a new state; the guard proves the caller holds the lock
    fn set_state(&self, _guard: &MutexGuard<'_, Inner>, next: ServerState) {
        let prev = ServerState::from_u8(self.state.swap(next as u8, Ordering::AcqRel));
        if prev != next {
            info!("Server state {} -> {}", prev, next);
        }
    }

    /// Ask every worker to unwind (no-op once cleaned up)
    fn request_stop(&self) {
        let guard = self.lock();
        if self.state() != ServerState::Uninitialized {
            self.set_state(&guard, ServerState::NeedsStopping);
        }
    }

    fn cleanup(&self) {
        let mut guard = self.lock();
        self.cleanup_locked(&mut guard);
    }

    /// Single release point for sockets and pool
    fn cleanup_locked(&self, guard: &mut MutexGuard<'_, Inner>) {
        let from = self.state();
        if from == ServerState::Uninitialized {
            return;
        }
        self.set_state(guard, ServerState::Uninitialized);
        info!("Closing server from state {}", from);

        if let Some(pool) = guard.pool.take() {
            let leaked = pool.teardown();
            self.stats.record_leaks(leaked);
        }
        if let Some(client) = guard.client.take() {
            let _ = client.shutdown(Shutdown::Both);
        }
        guard.listener = None;
    }
}

/// Handle to the server; clones share the same state machine
#[derive(Clone)]
pub struct SdrTcpServer {
    shared: Arc<Shared>,
}

impl Default for SdrTcpServer {
    fn default() -> Self {
        Self::new()
    }
}

impl SdrTcpServer {
    pub fn new() -> Self {
        Self {
            shared: Arc::new(Shared {
                state: AtomicU8::new(ServerState::Uninitialized as u8),
                inner: Mutex::new(Inner::default()),
                supervisor: Mutex::new(None),
                stats: StreamStats::default(),
            }),
        }
    }

    pub fn state(&self) -> ServerState {
        self.shared.state()
    }

    pub fn stats(&self) -> &StreamStats {
        &self.shared.stats
    }

    /// Buffers currently allocated by the pool (0 when not initialized)
    pub fn buffered_elements(&self) -> usize {
        self.shared.lock().pool.as_ref().map(|p| p.elements()).unwrap_or(0)
    }

    /// Local address of the listening socket, if open
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.shared
            .lock()
            .listener
            .as_ref()
            .and_then(|l| l.local_addr().ok())
    }

    /// Build the buffer pool, stage the dongle-info header as the very first
    /// buffer and start listening.
    ///
    /// Only valid from `Uninitialized`; any failure cleans everything up.
    pub fn open_socket(&self, address: &str, port: u16, info: DongleInfo) -> Result<(), ServerError> {
        let result = self.try_open_socket(address, port, info);
        if let Err(e) = &result {
            warn!("Closing server after failed open: {}", e);
            self.shared.cleanup();
        }
        result
    }

    fn try_open_socket(&self, address: &str, port: u16, info: DongleInfo) -> Result<(), ServerError> {
        {
            let mut guard = self.shared.lock();
            let state = self.shared.state();
            if state != ServerState::Uninitialized {
                return Err(ServerError::WrongState(state));
            }

            let mut pool = BufferPool::new(POOL_MAX_ELEMENTS, ElementKind::UShort);
            pool.configure_stages(RELAY_STAGES);

            match pool.acquire(0, true) {
                Some(mut buffer) => {
                    let staged = buffer.fill_from_bytes(&info.to_bytes());
                    if staged != DONGLE_INFO_LEN {
                        warn!("Dongle info header staged short: {} of {} bytes", staged, DONGLE_INFO_LEN);
                    }
                    pool.release(0, buffer);
                }
                None => warn!("No pool buffer for the dongle info header"),
            }

            guard.pool = Some(Arc::new(pool));
            self.shared.set_state(&guard, ServerState::Initialized);
        }

        let ip: IpAddr = address
            .trim()
            .parse()
            .map_err(|_| ServerError::InvalidAddress(address.to_string()))?;
        let addr = SocketAddr::new(ip, port);

        let listener = TcpListener::bind(addr).map_err(|source| ServerError::Bind { addr, source })?;
        listener.set_nonblocking(true).map_err(ServerError::Socket)?;

        let mut guard = self.shared.lock();
        let state = self.shared.state();
        if state != ServerState::Initialized {
            return Err(ServerError::WrongState(state));
        }
        let bound = listener.local_addr().unwrap_or(addr);
        guard.listener = Some(listener);
        self.shared.set_state(&guard, ServerState::SocketOpen);
        info!("Listening on {}", bound);
        Ok(())
    }

    /// Accept one client and serve it on background threads.
    ///
    /// `on_command` may still fire after `stop_serving` returns.
    /// `on_closed` fires exactly once, from a worker thread unless the
    /// server was in the wrong state to start.
    pub fn serve_client_async(&self, callbacks: Arc<dyn ClientCallbacks>) -> Result<(), ServerError> {
        {
            let mut guard = self.shared.lock();
            let state = self.shared.state();
            if state != ServerState::SocketOpen {
                warn!("serve_client_async called in state {}", state);
                self.shared.cleanup_locked(&mut guard);
                drop(guard);
                callbacks.on_closed();
                return Err(ServerError::WrongState(state));
            }
            guard.callbacks = Some(callbacks.clone());
            self.shared.set_state(&guard, ServerState::ClientOpenAsyncStarted);
        }

        let shared = self.shared.clone();
        let spawned = thread::Builder::new()
            .name("rtltcp-server".to_string())
            .spawn(move || run_supervisor(shared));

        match spawned {
            Ok(handle) => {
                *self
                    .shared
                    .supervisor
                    .lock()
                    .unwrap_or_else(PoisonError::into_inner) = Some(handle);
                Ok(())
            }
            Err(source) => {
                error!("Failed to spawn server thread: {}", source);
                self.shared.cleanup();
                callbacks.on_closed();
                Err(ServerError::Thread {
                    name: "rtltcp-server",
                    source,
                })
            }
        }
    }

    /// Request shutdown without waiting for the workers.
    ///
    /// Before serving has started this cleans up synchronously.
    pub fn stop_serving(&self) {
        let mut guard = self.shared.lock();
        let state = self.shared.state();
        if state == ServerState::Uninitialized {
            info!("Stop requested but server already stopped");
        } else if state < ServerState::ClientOpenAsyncStarted {
            info!("Stop requested, closing now");
            self.shared.cleanup_locked(&mut guard);
        } else {
            info!("Stop requested, signalling workers");
            self.shared.set_state(&guard, ServerState::NeedsStopping);
        }
    }

    /// Queue samples for the connected client (device read thread).
    pub fn feed(&self, bytes: &[u8]) -> FeedStatus {
        let fast = self.shared.state();
        if fast.is_waiting_for_client() {
            thread::sleep(FEED_BACKOFF);
            return FeedStatus::NoClient;
        }
        if fast != ServerState::ClientServing {
            return FeedStatus::Closed;
        }

        let guard = self.shared.lock();
        let state = self.shared.state();
        if state != ServerState::ClientServing {
            drop(guard);
            if state.is_waiting_for_client() {
                thread::sleep(FEED_BACKOFF);
                return FeedStatus::NoClient;
            }
            return FeedStatus::Closed;
        }

        let Some(pool) = guard.pool.as_ref() else {
            return FeedStatus::Closed;
        };
        match pool.acquire(0, true) {
            Some(mut buffer) => {
                buffer.fill_from_bytes(bytes);
                pool.release(0, buffer);
                self.shared.stats.record_queued();
                FeedStatus::Queued
            }
            None => {
                self.shared.stats.record_dropped();
                trace!("No free buffer, dropped {} bytes", bytes.len());
                FeedStatus::Dropped
            }
        }
    }

    /// Wait for the supervisor thread (and so `on_closed`) to finish
    pub fn join(&self) {
        let handle = self
            .shared
            .supervisor
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(handle) = handle {
            if handle.thread().id() == thread::current().id() {
                return;
            }
            if handle.join().is_err() {
                error!("Server thread panicked");
            }
        }
    }
}

pub(crate) fn is_retryable(kind: ErrorKind) -> bool {
    matches!(
        kind,
        ErrorKind::WouldBlock | ErrorKind::TimedOut | ErrorKind::Interrupted
    )
}

/// Accept-then-serve sequence, always ends with cleanup + `on_closed`
fn run_supervisor(shared: Arc<Shared>) {
    let (callbacks, pool) = {
        let guard = shared.lock();
        (guard.callbacks.clone(), guard.pool.clone())
    };

    info!("Waiting for client...");
    if let (Some(stream), Some(pool)) = (wait_for_client(&shared), pool) {
        serve_connected_client(&shared, stream, pool, callbacks.clone());
    }

    info!("Server shutting down");
    shared.cleanup();

    if let Some(callbacks) = callbacks {
        callbacks.on_closed();
    }
    info!(
        "Server thread stopped. Sent: {} bytes | Queued: {} | Dropped: {} | Commands: {}",
        shared.stats.get_sent(),
        shared.stats.get_queued(),
        shared.stats.get_dropped(),
        shared.stats.get_commands()
    );
}

/// Poll the non-blocking listener until a client connects or the state moves
fn wait_for_client(shared: &Arc<Shared>) -> Option<TcpStream> {
    let listener = {
        let guard = shared.lock();
        guard.listener.as_ref().and_then(|l| l.try_clone().ok())
    }?;

    while shared.state() == ServerState::ClientOpenAsyncStarted {
        match listener.accept() {
            Ok((stream, peer)) => {
                if let Err(e) = configure_client(&stream) {
                    warn!("Failed to configure client socket for {}: {}", peer, e);
                    return None;
                }
                let registered = stream.try_clone().ok();

                let mut guard = shared.lock();
                if shared.state() != ServerState::ClientOpenAsyncStarted {
                    return None;
                }
                guard.client = registered;
                shared.set_state(&guard, ServerState::ClientOpen);
                shared.stats.record_client();
                info!("Client connected from {}", peer);
                return Some(stream);
            }
            Err(e) if is_retryable(e.kind()) => thread::sleep(ACCEPT_POLL_INTERVAL),
            Err(e) => {
                warn!("Failed to accept client: {}", e);
                return None;
            }
        }
    }
    None
}

fn configure_client(stream: &TcpStream) -> io::Result<()> {
    stream.set_nonblocking(false)?;
    stream.set_read_timeout(Some(SOCKET_TIMEOUT))?;
    stream.set_write_timeout(Some(SOCKET_TIMEOUT))?;
    stream.set_nodelay(true)?;
    Ok(())
}

fn serve_connected_client(
    shared: &Arc<Shared>,
    stream: TcpStream,
    pool: Arc<BufferPool>,
    callbacks: Option<Arc<dyn ClientCallbacks>>,
) {
    let reader = match stream.try_clone() {
        Ok(r) => r,
        Err(e) => {
            warn!("Failed to clone client socket: {}", e);
            shared.request_stop();
            return;
        }
    };

    {
        let guard = shared.lock();
        if shared.state() != ServerState::ClientOpen {
            return;
        }
        shared.set_state(&guard, ServerState::ClientServing);
    }

    let command_thread = callbacks.and_then(|callbacks| {
        let shared = shared.clone();
        thread::Builder::new()
            .name("rtltcp-commands".to_string())
            .spawn(move || commands::run_command_listener(shared, reader, callbacks))
            .map_err(|e| {
                error!("Failed to spawn command thread: {}", e);
                e
            })
            .ok()
    });
    if command_thread.is_none() {
        shared.request_stop();
    }

    serve_client(shared, stream, &pool);

    debug!("Waiting for command thread to exit");
    if let Some(handle) = command_thread {
        if handle.join().is_err() {
            error!("Command thread panicked");
        }
    }
}

/// Drain stage 1 to the socket until the state leaves `ClientServing`
fn serve_client(shared: &Shared, mut stream: TcpStream, pool: &BufferPool) {
    let mut scratch: Vec<u8> = Vec::new();

    while shared.state() == ServerState::ClientServing {
        let Some(buffer) = pool.acquire(1, true) else {
            continue;
        };

        scratch.clear();
        buffer.write_le_bytes(&mut scratch);
        let result = write_while_serving(shared, &mut stream, &scratch);
        pool.release(1, buffer);

        match result {
            Ok(sent) => {
                shared.stats.record_sent(sent);
                trace!("Sent {} bytes", sent);
            }
            Err(e) => {
                info!("Cannot send to client: {}", e);
                break;
            }
        }
    }

    shared.request_stop();
}

/// Write the whole slice, retrying timeouts while still serving.
/// Returns the bytes written (short only when a stop was requested).
fn write_while_serving(shared: &Shared, stream: &mut TcpStream, data: &[u8]) -> io::Result<usize> {
    let mut sent = 0usize;
    while sent < data.len() {
        if shared.state() != ServerState::ClientServing {
            break;
        }
        match stream.write(&data[sent..]) {
            Ok(0) => return Err(io::Error::from(ErrorKind::WriteZero)),
            Ok(n) => sent += n,
            Err(e) if is_retryable(e.kind()) => continue,
            Err(e) => return Err(e),
        }
    }
    Ok(sent)
}
