//! Unix domain socket server for IPC
//!
//! Provides request-response communication and push notifications of
//! dispatch events to subscribed clients.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::unix::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::{UnixListener, UnixStream};
use tokio::sync::{broadcast, mpsc, Mutex, RwLock};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::events::DispatchEvent;
use crate::executor::{CommandExecutor, DispatchRequest, Trigger};
use crate::gesture::SessionControl;
use crate::history::CommandHistory;

use super::protocol::{DaemonStatus, Notification, Request, Response, DEFAULT_HISTORY_LIMIT};

/// Largest accepted message body
const MAX_MESSAGE_LEN: usize = 1024 * 1024;

/// Channels and collaborators the server acts through
pub struct ServerLinks {
    /// Dispatch queue shared with the gesture pipeline
    pub queue_tx: mpsc::Sender<DispatchRequest>,
    /// Camera session control
    pub control_tx: mpsc::Sender<SessionControl>,
    /// Used for inspection and retargeting; actions go through the queue
    pub executor: Arc<dyn CommandExecutor>,
    /// Source of notifications for subscribed clients
    pub event_tx: broadcast::Sender<DispatchEvent>,
}

/// IPC Server handling client connections
pub struct Server {
    socket_path: PathBuf,
    listener: Option<UnixListener>,
    shared: Arc<Shared>,
    shutdown_tx: broadcast::Sender<()>,
}

/// State shared with client handlers
struct Shared {
    state: RwLock<ServerState>,
    links: ServerLinks,
}

struct ServerState {
    status: DaemonStatus,
    start_time: std::time::Instant,
    history: CommandHistory,
}

impl Server {
    /// Create a new IPC server
    pub fn new(socket_path: &Path, links: ServerLinks, history_limit: usize) -> Result<Self> {
        // Ensure parent directory exists
        if let Some(parent) = socket_path.parent() {
            std::fs::create_dir_all(parent).context("failed to create socket directory")?;
        }

        // Remove stale socket if it exists
        if socket_path.exists() {
            std::fs::remove_file(socket_path).context("failed to remove stale socket")?;
        }

        let listener = UnixListener::bind(socket_path).context("failed to bind Unix socket")?;

        // Set socket permissions to owner-only (0600)
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            std::fs::set_permissions(socket_path, std::fs::Permissions::from_mode(0o600))?;
        }

        let (shutdown_tx, _) = broadcast::channel(1);

        let shared = Arc::new(Shared {
            state: RwLock::new(ServerState {
                status: DaemonStatus::default(),
                start_time: std::time::Instant::now(),
                history: CommandHistory::new(history_limit),
            }),
            links,
        });

        info!(?socket_path, "IPC server listening");

        Ok(Self {
            socket_path: socket_path.to_owned(),
            listener: Some(listener),
            shared,
            shutdown_tx,
        })
    }

    /// Fold a dispatch event into the status snapshot and history
    pub async fn apply_event(&self, event: &DispatchEvent) {
        let mut state = self.shared.state.write().await;

        match event {
            DispatchEvent::SessionStarted => {
                state.status.camera_active = true;
                state.status.stable_count = 0;
            }
            DispatchEvent::SessionEnded => {
                state.status.camera_active = false;
                state.status.stable_count = 0;
            }
            DispatchEvent::StableCountChanged { count } => {
                state.status.stable_count = *count;
            }
            DispatchEvent::CommandQueued { .. } => {}
            DispatchEvent::CommandCompleted { record } => {
                state.status.commands_run += 1;
                if !record.success {
                    state.status.commands_failed += 1;
                }
                state.status.last_action = Some(record.action);
                state.history.push(record.clone());
            }
        }
    }

    /// Run the server, accepting connections
    pub async fn run(&self) -> Result<()> {
        let listener = self.listener.as_ref().context("server not initialized")?;

        loop {
            match listener.accept().await {
                Ok((stream, _addr)) => {
                    debug!("client connected");
                    let shared = Arc::clone(&self.shared);
                    let mut shutdown_rx = self.shutdown_tx.subscribe();

                    tokio::spawn(async move {
                        tokio::select! {
                            result = Self::handle_client(stream, shared) => {
                                if let Err(e) = result {
                                    warn!(?e, "client handler error");
                                }
                            }
                            _ = shutdown_rx.recv() => {
                                debug!("client handler shutting down");
                            }
                        }
                    });
                }
                Err(e) => {
                    error!(?e, "accept error");
                }
            }
        }
    }

    /// Handle a single client connection
    async fn handle_client(stream: UnixStream, shared: Arc<Shared>) -> Result<()> {
        let (mut reader, writer) = stream.into_split();
        let writer = Arc::new(Mutex::new(writer));
        let mut forwarder: Option<JoinHandle<()>> = None;

        let result = Self::serve_requests(&mut reader, &writer, &shared, &mut forwarder).await;

        if let Some(task) = forwarder {
            task.abort();
        }
        result
    }

    async fn serve_requests(
        reader: &mut OwnedReadHalf,
        writer: &Arc<Mutex<OwnedWriteHalf>>,
        shared: &Arc<Shared>,
        forwarder: &mut Option<JoinHandle<()>>,
    ) -> Result<()> {
        let mut len_buf = [0u8; 4];

        loop {
            // Read message length (4-byte little-endian)
            match reader.read_exact(&mut len_buf).await {
                Ok(_) => {}
                Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => {
                    debug!("client disconnected");
                    return Ok(());
                }
                Err(e) => return Err(e.into()),
            }

            let len = u32::from_le_bytes(len_buf) as usize;
            if len > MAX_MESSAGE_LEN {
                warn!(len, "message too large, disconnecting");
                return Ok(());
            }

            // Read message body
            let mut msg_buf = vec![0u8; len];
            reader.read_exact(&mut msg_buf).await?;

            let response = match serde_json::from_slice::<Request>(&msg_buf) {
                Ok(request) => {
                    debug!(?request, "received request");
                    let (response, subscribe) = Self::process_request(request, shared).await;
                    if subscribe && forwarder.is_none() {
                        *forwarder = Some(Self::spawn_forwarder(shared, Arc::clone(writer)));
                        debug!("client subscribed to notifications");
                    }
                    response
                }
                Err(e) => {
                    warn!(error = %e, "malformed request");
                    Response::error("bad_request", e.to_string())
                }
            };

            let mut writer = writer.lock().await;
            Self::send_message(&mut writer, &response).await?;
        }
    }

    /// Forward dispatch events to one subscribed client
    fn spawn_forwarder(shared: &Arc<Shared>, writer: Arc<Mutex<OwnedWriteHalf>>) -> JoinHandle<()> {
        let mut event_rx = shared.links.event_tx.subscribe();

        tokio::spawn(async move {
            loop {
                match event_rx.recv().await {
                    Ok(event) => {
                        let note = Notification::Event { event };
                        let mut writer = writer.lock().await;
                        if let Err(e) = Self::send_message(&mut writer, &note).await {
                            debug!(?e, "subscriber gone");
                            break;
                        }
                    }
                    Err(broadcast::error::RecvError::Lagged(n)) => {
                        warn!(skipped = n, "subscriber lagged");
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        })
    }

    /// Send a length-prefixed JSON message
    async fn send_message<T: serde::Serialize>(stream: &mut OwnedWriteHalf, msg: &T) -> Result<()> {
        let msg_bytes = serde_json::to_vec(msg)?;
        let msg_len = (msg_bytes.len() as u32).to_le_bytes();

        stream.write_all(&msg_len).await?;
        stream.write_all(&msg_bytes).await?;

        Ok(())
    }

    /// Process a request and return a response
    /// Returns (Response, should_subscribe)
    async fn process_request(request: Request, shared: &Shared) -> (Response, bool) {
        match request {
            Request::Ping => (Response::Pong, false),

            Request::GetStatus => {
                let mut state = shared.state.write().await;
                state.status.uptime_secs = state.start_time.elapsed().as_secs();
                (Response::Status(state.status.clone()), false)
            }

            Request::Subscribe => (Response::Subscribed, true),

            Request::Execute { action } => {
                let request = DispatchRequest {
                    action,
                    trigger: Trigger::Manual,
                };
                match shared.links.queue_tx.try_send(request) {
                    Ok(()) => {
                        info!(%action, "manual command queued");
                        let _ = shared.links.event_tx.send(DispatchEvent::CommandQueued {
                            action,
                            trigger: Trigger::Manual,
                        });
                        (Response::Queued { action }, false)
                    }
                    Err(mpsc::error::TrySendError::Full(_)) => (
                        Response::error("queue_full", "dispatch queue is full, try again"),
                        false,
                    ),
                    Err(mpsc::error::TrySendError::Closed(_)) => (
                        Response::error("unavailable", "command worker is not running"),
                        false,
                    ),
                }
            }

            Request::SetCamera { active } => {
                let control = if active {
                    SessionControl::Activate
                } else {
                    SessionControl::Deactivate
                };
                match shared.links.control_tx.send(control).await {
                    Ok(()) => (Response::CameraSet { active }, false),
                    Err(_) => (
                        Response::error("unavailable", "gesture pipeline is not running"),
                        false,
                    ),
                }
            }

            Request::History { limit } => {
                let state = shared.state.read().await;
                let entries = state.history.recent(limit.unwrap_or(DEFAULT_HISTORY_LIMIT));
                (Response::History { entries }, false)
            }

            Request::ClearHistory => {
                shared.state.write().await.history.clear();
                info!("command history cleared");
                (Response::HistoryCleared, false)
            }

            Request::ContainerStatus => {
                let info = shared.links.executor.container_info().await;
                (Response::Container(info), false)
            }

            Request::SetContainer { name, image } => {
                let name = name.map(|n| n.trim().to_string());
                let image = image.map(|i| i.trim().to_string());

                if name.is_none() && image.is_none() {
                    return (
                        Response::error("bad_request", "set_container needs a name or an image"),
                        false,
                    );
                }
                if name.iter().chain(image.iter()).any(|v| v.is_empty()) {
                    return (
                        Response::error("bad_request", "container name and image must not be empty"),
                        false,
                    );
                }

                let settings = shared.links.executor.set_container(name, image).await;
                (
                    Response::ContainerSet {
                        name: settings.name,
                        image: settings.image,
                    },
                    false,
                )
            }
        }
    }

    /// Gracefully shutdown the server
    pub async fn shutdown(&self) {
        let _ = self.shutdown_tx.send(());

        // Remove socket file
        if self.socket_path.exists() {
            if let Err(e) = std::fs::remove_file(&self.socket_path) {
                warn!(?e, "failed to remove socket file");
            }
        }

        info!("IPC server shutdown complete");
    }
}
