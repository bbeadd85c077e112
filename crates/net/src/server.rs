//! TCP server hosting the room directory
//!
//! Each connection gets a reader loop and a writer task. Requests are applied
//! to the shared [`RoomDirectory`] one at a time under a write lock, and the
//! resulting messages are queued to every recipient's writer without waiting.
//! A peer whose queue is full has stopped reading and is disconnected.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::io::WriteHalf;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{broadcast, mpsc, Notify, RwLock};
use tracing::{debug, error, info, warn};

use crate::directory::{ConnId, Outbound, RoomDirectory};
use crate::error::{Error, Result};
use crate::frame::{write_frame, FrameReader};
use crate::protocol::{ClientMessage, ServerMessage};

/// Per-connection outbound queue depth
const PEER_QUEUE: usize = 64;

/// Server tuning
#[derive(Debug, Clone)]
pub struct ServerOptions {
    pub addr: SocketAddr,
    /// How long a room may sit with no connections before it expires
    pub room_ttl: Duration,
    pub sweep_interval: Duration,
}

impl ServerOptions {
    pub fn new(addr: SocketAddr) -> Self {
        Self {
            addr,
            room_ttl: Duration::from_secs(24 * 60 * 60),
            sweep_interval: Duration::from_secs(60),
        }
    }
}

/// A connected client's outbound queue
struct Peer {
    tx: mpsc::Sender<ServerMessage>,
    /// Wakes the connection's reader loop to drop it
    kick: Arc<Notify>,
}

/// Server state shared across tasks
struct ServerState {
    directory: RoomDirectory,
    peers: HashMap<ConnId, Peer>,
    next_conn: ConnId,
}

/// Room server handle
pub struct Server {
    addr: SocketAddr,
    state: Arc<RwLock<ServerState>>,
    shutdown_tx: broadcast::Sender<()>,
}

impl Server {
    /// Bind and start serving. Port 0 picks a free port.
    pub async fn start(options: ServerOptions) -> Result<Self> {
        let listener = TcpListener::bind(options.addr).await?;
        let bound_addr = listener.local_addr()?;

        info!(addr = %bound_addr, "Server started");

        let (shutdown_tx, _) = broadcast::channel(1);

        let state = Arc::new(RwLock::new(ServerState {
            directory: RoomDirectory::new(),
            peers: HashMap::new(),
            next_conn: 1,
        }));

        tokio::spawn(accept_loop(
            listener,
            state.clone(),
            shutdown_tx.subscribe(),
        ));

        tokio::spawn(sweeper_task(
            state.clone(),
            options.room_ttl,
            options.sweep_interval,
            shutdown_tx.subscribe(),
        ));

        Ok(Server {
            addr: bound_addr,
            state,
            shutdown_tx,
        })
    }

    /// Get the server's bound address
    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    /// Number of live rooms
    pub async fn room_count(&self) -> usize {
        self.state.read().await.directory.room_count()
    }

    /// Number of open connections
    pub async fn connection_count(&self) -> usize {
        self.state.read().await.peers.len()
    }

    /// Stop accepting connections and stop the sweeper
    pub fn shutdown(&self) {
        let _ = self.shutdown_tx.send(());
        info!("Server shutdown initiated");
    }
}

/// Accept incoming connections
async fn accept_loop(
    listener: TcpListener,
    state: Arc<RwLock<ServerState>>,
    mut shutdown_rx: broadcast::Receiver<()>,
) {
    loop {
        tokio::select! {
            result = listener.accept() => {
                match result {
                    Ok((stream, addr)) => {
                        debug!(addr = %addr, "New connection");
                        tokio::spawn(handle_connection(stream, addr, state.clone()));
                    }
                    Err(e) => {
                        error!(error = %e, "Accept failed");
                    }
                }
            }
            _ = shutdown_rx.recv() => {
                info!("Accept loop shutting down");
                break;
            }
        }
    }
}

/// Handle a single client connection
async fn handle_connection(stream: TcpStream, addr: SocketAddr, state: Arc<RwLock<ServerState>>) {
    let (reader, writer) = tokio::io::split(stream);
    let mut reader = FrameReader::new(reader);
    let (msg_tx, msg_rx) = mpsc::channel(PEER_QUEUE);
    let kick = Arc::new(Notify::new());

    let conn = {
        let mut s = state.write().await;
        let conn = s.next_conn;
        s.next_conn += 1;
        s.peers.insert(
            conn,
            Peer {
                tx: msg_tx.clone(),
                kick: kick.clone(),
            },
        );
        conn
    };
    info!(addr = %addr, conn, "Client connected");

    let writer_handle = tokio::spawn(writer_task(writer, msg_rx));

    loop {
        tokio::select! {
            result = reader.read_frame::<ClientMessage>() => match result {
                Ok(msg) => handle_message(conn, msg, &state).await,
                Err(Error::Protocol(reason)) => {
                    // The frame was consumed whole, so the stream is still aligned
                    warn!(conn, %reason, "Bad request");
                    if msg_tx.try_send(ServerMessage::error(reason)).is_err() {
                        break;
                    }
                }
                Err(Error::ConnectionClosed) => {
                    debug!(conn, "Connection closed");
                    break;
                }
                Err(e) => {
                    warn!(conn, error = %e, "Read error");
                    break;
                }
            },

            _ = kick.notified() => {
                warn!(conn, "Peer stopped reading, dropping it");
                break;
            }
        }
    }

    {
        let mut s = state.write().await;
        s.peers.remove(&conn);
        s.directory.disconnect(conn, Utc::now());
    }
    writer_handle.abort();

    info!(conn, "Client disconnected");
}

/// Apply a request and queue whatever it produced. Queuing happens under the
/// same lock, so every peer sees events in directory order.
async fn handle_message(conn: ConnId, msg: ClientMessage, state: &Arc<RwLock<ServerState>>) {
    let mut s = state.write().await;
    let outbound = s.directory.handle(conn, msg, Utc::now());
    deliver(outbound, &s.peers);
}

/// Queue messages without waiting. A full queue means the peer's writer is
/// stuck, so the peer is kicked instead of stalling every other room.
fn deliver(outbound: Vec<Outbound>, peers: &HashMap<ConnId, Peer>) {
    for Outbound { recipients, message } in outbound {
        for conn in recipients {
            let Some(peer) = peers.get(&conn) else {
                debug!(conn, "Recipient already gone");
                continue;
            };
            match peer.tx.try_send(message.clone()) {
                Ok(()) => {}
                Err(mpsc::error::TrySendError::Full(_)) => {
                    warn!(conn, "Outbound queue full");
                    peer.kick.notify_one();
                }
                Err(mpsc::error::TrySendError::Closed(_)) => {
                    debug!(conn, "Failed to queue message for peer");
                }
            }
        }
    }
}

/// Writer task - sends messages to the client
async fn writer_task(mut writer: WriteHalf<TcpStream>, mut rx: mpsc::Receiver<ServerMessage>) {
    while let Some(msg) = rx.recv().await {
        if let Err(e) = write_frame(&mut writer, &msg).await {
            debug!(error = %e, "Write failed");
            break;
        }
    }
}

/// Sweeper task - expires rooms nobody has been connected to for `ttl`
async fn sweeper_task(
    state: Arc<RwLock<ServerState>>,
    ttl: Duration,
    interval: Duration,
    mut shutdown_rx: broadcast::Receiver<()>,
) {
    loop {
        tokio::select! {
            _ = tokio::time::sleep(interval) => {
                let expired = state.write().await.directory.expire_idle(Utc::now(), ttl);
                if !expired.is_empty() {
                    info!(count = expired.len(), "Expired idle rooms");
                }
            }
            _ = shutdown_rx.recv() => {
                debug!("Sweeper task shutting down");
                break;
            }
        }
    }
}
