//! Socket server: one reader and one writer task per connection

use gatepass_api::{Command, ErrorCode, ErrorInfo, Event, Request, Response};
use gatepass_util::ClientId;
use serde::Serialize;
use std::collections::HashMap;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::unix::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::{UnixListener, UnixStream};
use tokio::sync::{broadcast, mpsc, Mutex, RwLock};
use tracing::{debug, error, info, warn};

use crate::{IpcError, IpcResult};

/// Buffered events per connection before a slow subscriber starts lagging
const EVENT_BUFFER: usize = 100;

/// What the server knows about a connected peer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PeerInfo {
    pub uid: Option<u32>,
    /// Root or the daemon's own user. Only trusted peers may assert an actor.
    pub trusted: bool,
}

impl PeerInfo {
    pub fn from_uid(uid: Option<u32>) -> Self {
        let trusted = match uid {
            Some(0) => true,
            Some(u) => u == nix::unistd::getuid().as_raw(),
            None => false,
        };
        Self { uid, trusted }
    }
}

/// Message from a connection to the dispatcher
pub enum ServerMessage {
    Request {
        client_id: ClientId,
        peer: PeerInfo,
        request: Request,
    },
    ClientConnected {
        client_id: ClientId,
        peer: PeerInfo,
    },
    ClientDisconnected {
        client_id: ClientId,
    },
}

type Clients = Arc<RwLock<HashMap<ClientId, mpsc::UnboundedSender<String>>>>;

/// Unix socket server speaking NDJSON
pub struct IpcServer {
    socket_path: PathBuf,
    listener: Option<UnixListener>,
    clients: Clients,
    event_tx: broadcast::Sender<Event>,
    message_tx: mpsc::UnboundedSender<ServerMessage>,
    message_rx: Arc<Mutex<Option<mpsc::UnboundedReceiver<ServerMessage>>>>,
}

impl IpcServer {
    pub fn new(socket_path: impl AsRef<Path>) -> Self {
        let (event_tx, _) = broadcast::channel(EVENT_BUFFER);
        let (message_tx, message_rx) = mpsc::unbounded_channel();

        Self {
            socket_path: socket_path.as_ref().to_path_buf(),
            listener: None,
            clients: Arc::new(RwLock::new(HashMap::new())),
            event_tx,
            message_tx,
            message_rx: Arc::new(Mutex::new(Some(message_rx))),
        }
    }

    /// Bind the socket, replacing a stale one left by a previous run
    pub async fn start(&mut self) -> IpcResult<()> {
        if let Some(dir) = self.socket_path.parent() {
            std::fs::create_dir_all(dir)?;
        }
        if self.socket_path.exists() {
            std::fs::remove_file(&self.socket_path)?;
        }

        let listener = UnixListener::bind(&self.socket_path)?;
        std::fs::set_permissions(&self.socket_path, std::fs::Permissions::from_mode(0o660))?;

        info!(path = %self.socket_path.display(), "Listening for clients");
        self.listener = Some(listener);
        Ok(())
    }

    /// The dispatcher's end of the message channel. Can be taken once.
    pub async fn take_message_receiver(&self) -> Option<mpsc::UnboundedReceiver<ServerMessage>> {
        self.message_rx.lock().await.take()
    }

    /// Accept connections until the task is dropped
    pub async fn run(&self) -> IpcResult<()> {
        let Some(listener) = self.listener.as_ref() else {
            return Err(IpcError::ServerError("Server not started".into()));
        };

        loop {
            let stream = match listener.accept().await {
                Ok((stream, _)) => stream,
                Err(e) => {
                    error!(error = %e, "Accept failed");
                    continue;
                }
            };

            let client_id = ClientId::new();
            let peer = PeerInfo::from_uid(get_peer_uid(&stream));
            info!(
                client_id = %client_id,
                uid = ?peer.uid,
                trusted = peer.trusted,
                "Client connected"
            );

            self.attach(stream, client_id, peer).await;
        }
    }

    async fn attach(&self, stream: UnixStream, client_id: ClientId, peer: PeerInfo) {
        let (read_half, write_half) = stream.into_split();
        let (response_tx, response_rx) = mpsc::unbounded_channel();
        let subscribed = Arc::new(AtomicBool::new(false));

        self.clients
            .write()
            .await
            .insert(client_id, response_tx.clone());
        let _ = self
            .message_tx
            .send(ServerMessage::ClientConnected { client_id, peer });

        tokio::spawn(read_requests(
            read_half,
            Connection {
                client_id,
                peer,
                subscribed: subscribed.clone(),
                clients: self.clients.clone(),
                message_tx: self.message_tx.clone(),
            },
            response_tx,
        ));

        let events = self.event_tx.subscribe();
        let message_tx = self.message_tx.clone();
        tokio::spawn(async move {
            write_frames(write_half, client_id, subscribed, response_rx, events).await;
            let _ = message_tx.send(ServerMessage::ClientDisconnected { client_id });
        });
    }

    /// Queue a response for one client. Unknown clients are ignored.
    pub async fn send_response(&self, client_id: &ClientId, response: Response) -> IpcResult<()> {
        let json = serde_json::to_string(&response)?;

        match self.clients.read().await.get(client_id) {
            Some(tx) => tx.send(json).map_err(|_| IpcError::ConnectionClosed),
            None => Ok(()),
        }
    }

    /// Send an event to every subscribed client
    pub fn broadcast_event(&self, event: Event) {
        let _ = self.event_tx.send(event);
    }

    pub async fn client_count(&self) -> usize {
        self.clients.read().await.len()
    }

    /// Remove the socket file
    pub fn shutdown(&self) {
        if self.socket_path.exists() {
            let _ = std::fs::remove_file(&self.socket_path);
        }
    }
}

impl Drop for IpcServer {
    fn drop(&mut self) {
        self.shutdown();
    }
}

/// Reader-side state of one connection
struct Connection {
    client_id: ClientId,
    peer: PeerInfo,
    subscribed: Arc<AtomicBool>,
    clients: Clients,
    message_tx: mpsc::UnboundedSender<ServerMessage>,
}

impl Connection {
    fn accept_line(&self, line: &str) -> Result<(), Response> {
        let request: Request = serde_json::from_str(line).map_err(|e| {
            warn!(client_id = %self.client_id, error = %e, "Invalid request");
            // No request id to correlate with
            Response::error(0, ErrorInfo::new(ErrorCode::InvalidRequest, e.to_string()))
        })?;

        match request.command {
            Command::SubscribeEvents => self.subscribed.store(true, Ordering::SeqCst),
            Command::UnsubscribeEvents => self.subscribed.store(false, Ordering::SeqCst),
            _ => {}
        }

        let _ = self.message_tx.send(ServerMessage::Request {
            client_id: self.client_id,
            peer: self.peer,
            request,
        });
        Ok(())
    }
}

async fn read_requests(
    read_half: OwnedReadHalf,
    conn: Connection,
    response_tx: mpsc::UnboundedSender<String>,
) {
    let mut reader = BufReader::new(read_half);
    let mut line = String::new();

    loop {
        line.clear();
        match reader.read_line(&mut line).await {
            Ok(0) => {
                debug!(client_id = %conn.client_id, "Client closed the connection");
                break;
            }
            Ok(_) => {
                let trimmed = line.trim();
                if trimmed.is_empty() {
                    continue;
                }
                if let Err(reply) = conn.accept_line(trimmed)
                    && let Ok(json) = serde_json::to_string(&reply)
                {
                    let _ = response_tx.send(json);
                }
            }
            Err(e) => {
                debug!(client_id = %conn.client_id, error = %e, "Read error");
                break;
            }
        }
    }

    // Last sender gone: the writer drains and exits
    conn.clients.write().await.remove(&conn.client_id);
}

async fn write_frames(
    mut writer: OwnedWriteHalf,
    client_id: ClientId,
    subscribed: Arc<AtomicBool>,
    mut responses: mpsc::UnboundedReceiver<String>,
    mut events: broadcast::Receiver<Event>,
) {
    loop {
        let frame = tokio::select! {
            response = responses.recv() => match response {
                Some(json) => json,
                None => break,
            },
            event = events.recv() => match event {
                Ok(event) if subscribed.load(Ordering::SeqCst) => match to_frame(&event) {
                    Some(json) => json,
                    None => continue,
                },
                Ok(_) => continue,
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    warn!(client_id = %client_id, skipped, "Subscriber lagging; events dropped");
                    continue;
                }
                Err(broadcast::error::RecvError::Closed) => break,
            },
        };

        if let Err(e) = write_line(&mut writer, frame).await {
            debug!(client_id = %client_id, error = %e, "Write error");
            break;
        }
    }
}

fn to_frame<T: Serialize>(value: &T) -> Option<String> {
    serde_json::to_string(value).ok()
}

async fn write_line(writer: &mut OwnedWriteHalf, mut frame: String) -> std::io::Result<()> {
    frame.push('\n');
    writer.write_all(frame.as_bytes()).await
}

/// Uid of the process on the other end of the socket
fn get_peer_uid(stream: &UnixStream) -> Option<u32> {
    use std::os::unix::io::AsFd;

    nix::sys::socket::getsockopt(&stream.as_fd(), nix::sys::socket::sockopt::PeerCredentials)
        .ok()
        .map(|cred| cred.uid())
}
