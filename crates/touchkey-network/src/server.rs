//! Unix socket server broadcasting the presence signal.
//!
//! Every client receives the current state as soon as it connects and then
//! one line per aggregate change:
//!
//! ```text
//! StateBus ──subscribe──┬──> client 1   U2F_0\n U2F_1\n U2F_0\n ...
//!                       ├──> client 2
//!                       └──> client N
//! ```
//!
//! The server never reads meaningful input. Bytes sent by a client are
//! discarded, and a client that shuts down its write side keeps receiving
//! lines. A failed write drops only the client it was for.
//!
//! # Example Usage
//!
//! ```no_run
//! use touchkey_core::SocketSource;
//! use touchkey_network::{BroadcastServer, ServerConfig};
//! use touchkey_state::StateBus;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let bus = StateBus::new();
//! let config = ServerConfig {
//!     source: SocketSource::Path("/run/user/1000/touchkey.socket".into()),
//!     max_connections: 64,
//! };
//!
//! let server = BroadcastServer::bind(config, bus)?;
//! server.run(async { let _ = tokio::signal::ctrl_c().await; }).await?;
//! # Ok(())
//! # }
//! ```

use std::fs;
use std::future::Future;
use std::io;
use std::os::unix::fs::{FileTypeExt, PermissionsExt};
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use futures::SinkExt;
use thiserror::Error;
use tokio::io::AsyncReadExt;
use tokio::net::{UnixListener, UnixStream};
use tokio::sync::broadcast::error::RecvError;
use tokio::task::JoinSet;
use tokio_util::codec::FramedWrite;
use tracing::{Instrument, debug, error, info, info_span, warn};
use touchkey_core::{PresenceState, SocketConfig, SocketSource};
use touchkey_protocol::PresenceCodec;
use touchkey_state::StateBus;

/// Permissions of a socket file the server creates.
const SOCKET_MODE: u32 = 0o600;

const INPUT_BUFFER_SIZE: usize = 256;

/// Configuration for the broadcast server
///
/// # Example
///
/// ```
/// use touchkey_core::SocketSource;
/// use touchkey_network::ServerConfig;
///
/// let config = ServerConfig {
///     source: SocketSource::Activation,
///     max_connections: 16,
/// };
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerConfig {
    /// Where the listening socket comes from
    pub source: SocketSource,

    /// Maximum number of simultaneous clients
    pub max_connections: usize,
}

impl ServerConfig {
    /// Build a server configuration from the `[socket]` section, using
    /// `default_path` when no path is configured.
    pub fn from_socket_config(config: &SocketConfig, default_path: impl Into<PathBuf>) -> Self {
        Self {
            source: config
                .path
                .clone()
                .unwrap_or_else(|| SocketSource::Path(default_path.into())),
            max_connections: config.max_connections,
        }
    }
}

/// Metadata of one connected client, used for log fields.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConnectionInfo {
    /// Server-local connection number
    pub id: u64,

    /// When the connection was accepted
    pub connected_at: DateTime<Utc>,
}

impl ConnectionInfo {
    pub fn new(id: u64) -> Self {
        Self {
            id,
            connected_at: Utc::now(),
        }
    }

    /// How long the connection has been open
    pub fn uptime(&self) -> chrono::Duration {
        Utc::now() - self.connected_at
    }
}

/// Errors that can occur while setting up or running the server
#[derive(Debug, Error)]
pub enum ServerError {
    /// The socket path could not be bound
    #[error("Failed to bind {}: {source}", path.display())]
    BindFailed {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    /// Socket activation was requested but no listener was inherited
    #[error("Socket activation unavailable: {0}")]
    ActivationUnavailable(String),

    /// Low-level I/O error
    #[error("IO error: {0}")]
    Io(#[from] io::Error),
}

/// Removes the socket file the server created when dropped.
#[derive(Debug)]
struct SocketFile(PathBuf);

impl Drop for SocketFile {
    fn drop(&mut self) {
        match fs::remove_file(&self.0) {
            Ok(()) => debug!(path = %self.0.display(), "removed socket file"),
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(e) => warn!(path = %self.0.display(), error = %e, "failed to remove socket file"),
        }
    }
}

/// Broadcast server for the presence line protocol
///
/// # Connection Lifecycle
///
/// 1. Bind with `bind()` (path or inherited descriptor)
/// 2. `run()` accepts clients until the shutdown future resolves
/// 3. Each client gets the current line, then every change
/// 4. On shutdown all clients are closed and a bound socket file is removed
pub struct BroadcastServer {
    listener: UnixListener,
    socket_file: Option<SocketFile>,
    config: ServerConfig,
    bus: StateBus,
}

impl BroadcastServer {
    /// Create the listening socket.
    ///
    /// For a path, a stale socket file left by a previous run is removed
    /// first and the new file is restricted to its owner. For activation,
    /// the first inherited descriptor is used and no file is ever created
    /// or removed.
    ///
    /// # Errors
    ///
    /// - `BindFailed` if the path is in use by a live server, is not a
    ///   socket, or cannot be bound
    /// - `ActivationUnavailable` if no listener was inherited
    pub fn bind(config: ServerConfig, bus: StateBus) -> Result<Self, ServerError> {
        let (listener, socket_file) = match &config.source {
            SocketSource::Path(path) => {
                let listener = bind_path(path)?;
                (listener, Some(SocketFile(path.clone())))
            }
            SocketSource::Activation => (take_activated()?, None),
        };

        info!(
            socket = %config.source,
            max_connections = config.max_connections,
            "listening for clients"
        );

        Ok(Self {
            listener,
            socket_file,
            config,
            bus,
        })
    }

    /// Path of the socket file this server created, if any.
    pub fn socket_path(&self) -> Option<&Path> {
        self.socket_file.as_ref().map(|file| file.0.as_path())
    }

    pub fn config(&self) -> &ServerConfig {
        &self.config
    }

    /// Accept clients until `shutdown` resolves.
    ///
    /// # Errors
    ///
    /// Returns an error only if the listener itself fails. Per-client
    /// failures are logged and drop that client.
    pub async fn run(self, shutdown: impl Future<Output = ()>) -> Result<(), ServerError> {
        let Self {
            listener,
            socket_file,
            config,
            bus,
        } = self;

        let mut clients = JoinSet::new();
        let mut next_id: u64 = 0;
        tokio::pin!(shutdown);

        let result = loop {
            tokio::select! {
                () = &mut shutdown => break Ok(()),
                accepted = listener.accept() => {
                    let stream = match accepted {
                        Ok((stream, _)) => stream,
                        Err(e) if is_transient(&e) => {
                            warn!(error = %e, "accept failed");
                            continue;
                        }
                        Err(e) => {
                            error!(error = %e, "listener failed");
                            break Err(ServerError::Io(e));
                        }
                    };

                    if clients.len() >= config.max_connections {
                        warn!(
                            max_connections = config.max_connections,
                            "connection rejected: maximum connections reached"
                        );
                        drop(stream);
                        continue;
                    }

                    next_id += 1;
                    let info = ConnectionInfo::new(next_id);
                    let span = info_span!("client", connection_id = info.id);
                    clients.spawn(serve_client(stream, info, bus.clone()).instrument(span));
                    debug!(connection_id = info.id, clients = clients.len(), "client connected");
                }
                Some(_) = clients.join_next(), if !clients.is_empty() => {}
            }
        };

        clients.shutdown().await;
        drop(socket_file);
        info!("server stopped");
        result
    }
}

fn bind_path(path: &Path) -> Result<UnixListener, ServerError> {
    let bind_failed = |source| ServerError::BindFailed {
        path: path.to_path_buf(),
        source,
    };

    remove_stale_socket(path).map_err(bind_failed)?;
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent).map_err(bind_failed)?;
    }

    let listener = UnixListener::bind(path).map_err(bind_failed)?;
    fs::set_permissions(path, fs::Permissions::from_mode(SOCKET_MODE)).map_err(bind_failed)?;
    Ok(listener)
}

/// Remove a socket file nobody is listening on.
fn remove_stale_socket(path: &Path) -> io::Result<()> {
    let metadata = match fs::symlink_metadata(path) {
        Ok(metadata) => metadata,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(()),
        Err(e) => return Err(e),
    };

    if !metadata.file_type().is_socket() {
        return Err(io::Error::new(
            io::ErrorKind::AlreadyExists,
            "path exists and is not a socket",
        ));
    }

    if std::os::unix::net::UnixStream::connect(path).is_ok() {
        return Err(io::Error::new(
            io::ErrorKind::AddrInUse,
            "another server is listening on this socket",
        ));
    }

    debug!(path = %path.display(), "removing stale socket file");
    fs::remove_file(path)
}

fn take_activated() -> Result<UnixListener, ServerError> {
    let mut fds = listenfd::ListenFd::from_env();
    let listener = fds
        .take_unix_listener(0)
        .map_err(|e| ServerError::ActivationUnavailable(e.to_string()))?
        .ok_or_else(|| {
            ServerError::ActivationUnavailable("no listening socket inherited".to_string())
        })?;
    listener.set_nonblocking(true)?;
    Ok(UnixListener::from_std(listener)?)
}

fn is_transient(error: &io::Error) -> bool {
    matches!(
        error.kind(),
        io::ErrorKind::ConnectionAborted | io::ErrorKind::ConnectionReset | io::ErrorKind::Interrupted
    )
}

/// Forward presence lines to one client until it goes away.
async fn serve_client(stream: UnixStream, info: ConnectionInfo, bus: StateBus) {
    let (mut read_half, write_half) = stream.into_split();
    let mut lines = FramedWrite::new(write_half, PresenceCodec::new());

    let (mut last_sent, mut changes) = bus.subscribe();
    if let Err(e) = lines.send(last_sent).await {
        debug!(error = %e, "initial write failed");
        return;
    }

    // Input is drained and dropped. A half-closed client stays subscribed
    // until a write to it fails.
    let mut input = [0u8; INPUT_BUFFER_SIZE];
    let mut reading = true;

    loop {
        let state: PresenceState = tokio::select! {
            read = read_half.read(&mut input), if reading => {
                match read {
                    Ok(0) => {
                        debug!("client closed its write side");
                        reading = false;
                    }
                    Ok(_) => {}
                    Err(e) => {
                        debug!(error = %e, "read failed, ignoring input");
                        reading = false;
                    }
                }
                continue;
            }
            change = changes.recv() => match change {
                Ok(state) => state,
                Err(RecvError::Lagged(skipped)) => {
                    warn!(skipped, "client lagging, resynchronising");
                    let (current, fresh) = bus.subscribe();
                    changes = fresh;
                    current
                }
                Err(RecvError::Closed) => break,
            },
        };

        if state == last_sent {
            continue;
        }
        if let Err(e) = lines.send(state).await {
            debug!(error = %e, "write failed, dropping client");
            break;
        }
        last_sent = state;
    }

    debug!(uptime_ms = info.uptime().num_milliseconds(), "client disconnected");
}

#[cfg(test)]
mod tests {
    use super::*;
    use touchkey_core::constants::DEFAULT_MAX_CONNECTIONS;

    #[test]
    fn test_config_uses_default_path_when_unset() {
        let socket = SocketConfig::default();
        let config = ServerConfig::from_socket_config(&socket, "/tmp/touchkey.socket");
        assert_eq!(
            config.source,
            SocketSource::Path(PathBuf::from("/tmp/touchkey.socket"))
        );
        assert_eq!(config.max_connections, DEFAULT_MAX_CONNECTIONS);
    }

    #[test]
    fn test_config_keeps_activation() {
        let socket = SocketConfig {
            path: Some(SocketSource::Activation),
            max_connections: 3,
        };
        let config = ServerConfig::from_socket_config(&socket, "/unused");
        assert_eq!(config.source, SocketSource::Activation);
        assert_eq!(config.max_connections, 3);
    }

    #[test]
    fn test_connection_uptime_is_non_negative() {
        let info = ConnectionInfo::new(7);
        assert_eq!(info.id, 7);
        assert!(info.uptime() >= chrono::Duration::zero());
    }

    #[test]
    fn test_stale_socket_is_removed() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("stale.socket");
        drop(std::os::unix::net::UnixListener::bind(&path).unwrap());
        assert!(path.exists());

        remove_stale_socket(&path).unwrap();
        assert!(!path.exists());
    }

    #[test]
    fn test_regular_file_is_not_removed() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("notes.txt");
        fs::write(&path, "keep me").unwrap();

        assert!(remove_stale_socket(&path).is_err());
        assert!(path.exists());
    }

    #[test]
    fn test_missing_path_is_fine() {
        let dir = tempfile::tempdir().unwrap();
        assert!(remove_stale_socket(&dir.path().join("absent")).is_ok());
    }
}
