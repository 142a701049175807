//! # TCP Transport
//!
//! tokio-backed TCP server and client endpoints.
//!
//! Each endpoint owns a small multi-threaded tokio runtime. Reader tasks push
//! received chunks onto an unbounded mpsc channel as [`Bytes`]; the owning world
//! drains that channel through `poll`, so framing and dispatch never leave the
//! world's thread. Writes go through a per-connection channel to a writer task.
//!
//! Both [`Channel`]s map onto the one TCP stream.
//!
//! `start` / `connect` must not be called from inside another tokio runtime.

use super::{Channel, ClientEvent, ClientTransport, ServerEvent, ServerTransport};
use crate::config::DEFAULT_READ_CHUNK_SIZE;
use crate::error::{constants, ProtocolError, Result};
use crate::server::connection::ConnectionId;
use bytes::{Bytes, BytesMut};
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::{TcpListener, TcpStream};
use tokio::runtime::{Builder, Runtime};
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, instrument, warn};

const RUNTIME_SHUTDOWN_TIMEOUT: Duration = Duration::from_millis(250);

fn build_runtime(threads: usize) -> Result<Runtime> {
    let runtime = Builder::new_multi_thread()
        .worker_threads(threads)
        .thread_name("net-session-io")
        .enable_all()
        .build()?;
    Ok(runtime)
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Forward queued writes to the socket until the sender side is dropped.
async fn write_loop(mut writer: OwnedWriteHalf, mut outgoing: UnboundedReceiver<Bytes>) {
    while let Some(bytes) = outgoing.recv().await {
        if let Err(e) = writer.write_all(&bytes).await {
            debug!(error = %e, "Write failed");
            return;
        }
    }
    let _ = writer.shutdown().await;
}

/// Read chunks until EOF or error, handing each one to `deliver`.
async fn read_loop<F>(mut reader: OwnedReadHalf, chunk_size: usize, mut deliver: F)
where
    F: FnMut(Bytes) -> bool,
{
    let mut buffer = BytesMut::with_capacity(chunk_size);
    loop {
        buffer.reserve(chunk_size);
        match reader.read_buf(&mut buffer).await {
            Ok(0) => return,
            Ok(_) => {
                if !deliver(buffer.split().freeze()) {
                    return;
                }
            }
            Err(e) => {
                debug!(error = %e, "Read failed");
                return;
            }
        }
    }
}

struct Peer {
    address: String,
    writer: UnboundedSender<Bytes>,
    reader: JoinHandle<()>,
}

struct Shared {
    peers: Mutex<HashMap<ConnectionId, Peer>>,
    next_connection: AtomicU32,
}

/// TCP listener feeding a [`NetworkServer`](crate::server::NetworkServer)
pub struct TcpServerTransport {
    address: String,
    read_chunk_size: usize,
    runtime: Option<Runtime>,
    local_addr: Option<SocketAddr>,
    accept_task: Option<JoinHandle<()>>,
    shared: Arc<Shared>,
    events_tx: UnboundedSender<ServerEvent>,
    events_rx: UnboundedReceiver<ServerEvent>,
}

impl TcpServerTransport {
    /// Listener for `address` (e.g. `"127.0.0.1:0"` for an ephemeral port)
    pub fn new(address: impl Into<String>) -> Self {
        Self::with_read_chunk_size(address, DEFAULT_READ_CHUNK_SIZE)
    }

    pub fn with_read_chunk_size(address: impl Into<String>, read_chunk_size: usize) -> Self {
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        Self {
            address: address.into(),
            read_chunk_size: read_chunk_size.max(1),
            runtime: None,
            local_addr: None,
            accept_task: None,
            shared: Arc::new(Shared {
                peers: Mutex::new(HashMap::new()),
                next_connection: AtomicU32::new(1),
            }),
            events_tx,
            events_rx,
        }
    }

    /// Bound address once started
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.local_addr
    }
}

async fn accept_loop(
    listener: TcpListener,
    shared: Arc<Shared>,
    events: UnboundedSender<ServerEvent>,
    read_chunk_size: usize,
) {
    loop {
        let (stream, remote) = match listener.accept().await {
            Ok(accepted) => accepted,
            Err(e) => {
                error!(error = %e, "Error accepting connection");
                continue;
            }
        };
        if let Err(e) = stream.set_nodelay(true) {
            debug!(error = %e, "Failed to disable Nagle");
        }

        let id = ConnectionId(shared.next_connection.fetch_add(1, Ordering::Relaxed));
        let (reader, writer) = stream.into_split();
        let (writer_tx, writer_rx) = mpsc::unbounded_channel();
        tokio::spawn(write_loop(writer, writer_rx));

        // The peer is registered before its reader can report anything.
        {
            let mut peers = lock(&shared.peers);
            if events.send(ServerEvent::Connected(id)).is_err() {
                return;
            }
            let reader = {
                let shared = Arc::clone(&shared);
                let events = events.clone();
                tokio::spawn(async move {
                    read_loop(reader, read_chunk_size, |chunk| {
                        events.send(ServerEvent::Data(id, chunk)).is_ok()
                    })
                    .await;
                    if lock(&shared.peers).remove(&id).is_some() {
                        let _ = events.send(ServerEvent::Disconnected(id));
                    }
                })
            };
            peers.insert(
                id,
                Peer {
                    address: remote.to_string(),
                    writer: writer_tx,
                    reader,
                },
            );
        }
        debug!(connection = %id, remote = %remote, "Accepted connection");
    }
}

impl ServerTransport for TcpServerTransport {
    #[instrument(skip(self), fields(address = %self.address))]
    fn start(&mut self) -> Result<()> {
        if self.runtime.is_some() {
            return Ok(());
        }

        let runtime = build_runtime(2)?;
        let listener = runtime.block_on(TcpListener::bind(&self.address))?;
        let local_addr = listener.local_addr()?;

        self.accept_task = Some(runtime.spawn(accept_loop(
            listener,
            Arc::clone(&self.shared),
            self.events_tx.clone(),
            self.read_chunk_size,
        )));
        self.local_addr = Some(local_addr);
        self.runtime = Some(runtime);
        info!(local_addr = %local_addr, "Listening");
        Ok(())
    }

    fn is_active(&self) -> bool {
        self.runtime.is_some()
    }

    fn send(&mut self, connection: ConnectionId, bytes: &[u8], _channel: Channel) -> bool {
        lock(&self.shared.peers)
            .get(&connection)
            .is_some_and(|peer| peer.writer.send(Bytes::copy_from_slice(bytes)).is_ok())
    }

    /// Queued writes are flushed before the socket closes.
    fn disconnect(&mut self, connection: ConnectionId) -> bool {
        match lock(&self.shared.peers).remove(&connection) {
            Some(peer) => {
                peer.reader.abort();
                debug!(connection = %connection, "Closing connection");
                true
            }
            None => false,
        }
    }

    fn address(&self, connection: ConnectionId) -> Option<String> {
        lock(&self.shared.peers)
            .get(&connection)
            .map(|peer| peer.address.clone())
    }

    fn stop(&mut self) {
        let Some(runtime) = self.runtime.take() else {
            return;
        };
        if let Some(task) = self.accept_task.take() {
            task.abort();
        }
        for (_, peer) in lock(&self.shared.peers).drain() {
            peer.reader.abort();
        }
        runtime.shutdown_timeout(RUNTIME_SHUTDOWN_TIMEOUT);
        while self.events_rx.try_recv().is_ok() {}
        self.local_addr = None;
        info!("Listener stopped");
    }

    fn poll(&mut self) -> Option<ServerEvent> {
        self.events_rx.try_recv().ok()
    }
}

impl Drop for TcpServerTransport {
    fn drop(&mut self) {
        self.stop();
    }
}

struct Session {
    task: JoinHandle<()>,
    writer: UnboundedSender<Bytes>,
    connected: Arc<AtomicBool>,
    events: UnboundedReceiver<ClientEvent>,
}

/// TCP connection feeding a [`NetworkClient`](crate::client::NetworkClient)
pub struct TcpClientTransport {
    read_chunk_size: usize,
    runtime: Runtime,
    session: Option<Session>,
}

impl TcpClientTransport {
    pub fn new() -> Result<Self> {
        Self::with_read_chunk_size(DEFAULT_READ_CHUNK_SIZE)
    }

    pub fn with_read_chunk_size(read_chunk_size: usize) -> Result<Self> {
        Ok(Self {
            read_chunk_size: read_chunk_size.max(1),
            runtime: build_runtime(1)?,
            session: None,
        })
    }
}

async fn run_session(
    address: String,
    outgoing: UnboundedReceiver<Bytes>,
    events: UnboundedSender<ClientEvent>,
    connected: Arc<AtomicBool>,
    read_chunk_size: usize,
) {
    let stream = match TcpStream::connect(&address).await {
        Ok(stream) => stream,
        Err(e) => {
            warn!(address = %address, error = %e, "Connect failed");
            let _ = events.send(ClientEvent::Disconnected);
            return;
        }
    };
    if let Err(e) = stream.set_nodelay(true) {
        debug!(error = %e, "Failed to disable Nagle");
    }

    let (reader, writer) = stream.into_split();
    let writer_task = tokio::spawn(write_loop(writer, outgoing));
    connected.store(true, Ordering::Release);
    if events.send(ClientEvent::Connected).is_err() {
        return;
    }

    read_loop(reader, read_chunk_size, |chunk| {
        events.send(ClientEvent::Data(chunk)).is_ok()
    })
    .await;

    connected.store(false, Ordering::Release);
    writer_task.abort();
    let _ = events.send(ClientEvent::Disconnected);
}

impl ClientTransport for TcpClientTransport {
    #[instrument(skip(self))]
    fn connect(&mut self, address: &str) -> Result<()> {
        if self.session.is_some() {
            return Err(ProtocolError::TransportError(
                constants::ERR_SESSION_OPEN.into(),
            ));
        }

        let (writer, outgoing) = mpsc::unbounded_channel();
        let (events_tx, events) = mpsc::unbounded_channel();
        let connected = Arc::new(AtomicBool::new(false));
        let task = self.runtime.spawn(run_session(
            address.to_string(),
            outgoing,
            events_tx,
            Arc::clone(&connected),
            self.read_chunk_size,
        ));

        self.session = Some(Session {
            task,
            writer,
            connected,
            events,
        });
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.session
            .as_ref()
            .is_some_and(|s| s.connected.load(Ordering::Acquire))
    }

    fn send(&mut self, bytes: &[u8], _channel: Channel) -> bool {
        match &self.session {
            Some(session) if session.connected.load(Ordering::Acquire) => session
                .writer
                .send(Bytes::copy_from_slice(bytes))
                .is_ok(),
            _ => false,
        }
    }

    /// Queued writes are flushed before the socket closes.
    fn disconnect(&mut self) {
        if let Some(session) = self.session.take() {
            session.task.abort();
            debug!("Session closed locally");
        }
    }

    fn poll(&mut self) -> Option<ClientEvent> {
        let session = self.session.as_mut()?;
        let event = session.events.try_recv().ok()?;
        if event == ClientEvent::Disconnected {
            self.session = None;
        }
        Some(event)
    }
}

impl Drop for TcpClientTransport {
    fn drop(&mut self) {
        self.disconnect();
    }
}
