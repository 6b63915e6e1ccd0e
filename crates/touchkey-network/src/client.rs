//! Client for the presence line protocol.
//!
//! Connects to a running daemon's socket and yields every state line it
//! sends. Used by `touchkey watch` and by integration tests.
//!
//! # Example Usage
//!
//! ```no_run
//! use touchkey_network::{PresenceClient, PresenceClientConfig};
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let mut client = PresenceClient::new(PresenceClientConfig {
//!     socket_path: "/run/user/1000/touchkey.socket".into(),
//!     ..Default::default()
//! });
//! client.connect().await?;
//!
//! loop {
//!     let state = client.recv().await?;
//!     println!("touch needed: {}", state.needs_touch());
//! }
//! # }
//! ```
//!
//! # Design Principles
//!
//! - **No automatic reconnect**: caller decides retry strategy
//! - **Strict decoding**: unknown lines are protocol errors

use futures::StreamExt;
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;
use tokio::io::AsyncWriteExt;
use tokio::net::UnixStream;
use tokio_util::codec::Framed;
use tracing::{debug, info, trace, warn};
use touchkey_core::PresenceState;
use touchkey_core::constants::DEFAULT_SOCKET_NAME;
use touchkey_protocol::PresenceCodec;

/// Configuration for the presence client
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PresenceClientConfig {
    /// Socket to connect to
    pub socket_path: PathBuf,

    /// Timeout for establishing the connection
    pub connect_timeout: Duration,
}

impl Default for PresenceClientConfig {
    fn default() -> Self {
        Self {
            socket_path: PathBuf::from(DEFAULT_SOCKET_NAME),
            connect_timeout: Duration::from_millis(3000),
        }
    }
}

/// Errors that can occur during client operations
#[derive(Debug, Error)]
pub enum ClientError {
    /// Client is not connected
    #[error("Not connected to server")]
    NotConnected,

    /// Connection attempt timed out
    #[error("Connection timeout after {0}ms")]
    ConnectionTimeout(u64),

    /// Read operation timed out
    #[error("Read timeout after {0}ms")]
    ReadTimeout(u64),

    /// The server closed the connection
    #[error("Connection lost: {0}")]
    ConnectionLost(String),

    /// The server sent something other than a presence line
    #[error("Protocol error: {0}")]
    Protocol(#[from] touchkey_core::Error),

    /// Low-level I/O error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Client receiving presence lines from the daemon
pub struct PresenceClient {
    socket_path: PathBuf,
    framed: Option<Framed<UnixStream, PresenceCodec>>,
    connect_timeout: Duration,
}

impl PresenceClient {
    /// Create a client. Call `connect()` before receiving.
    ///
    /// ```
    /// use touchkey_network::{PresenceClient, PresenceClientConfig};
    ///
    /// let client = PresenceClient::new(PresenceClientConfig::default());
    /// assert!(!client.is_connected());
    /// ```
    pub fn new(config: PresenceClientConfig) -> Self {
        Self {
            socket_path: config.socket_path,
            framed: None,
            connect_timeout: config.connect_timeout,
        }
    }

    /// Connect to the configured socket.
    ///
    /// # Errors
    ///
    /// Returns `ConnectionTimeout` or the underlying I/O error (for example
    /// when no daemon is listening).
    pub async fn connect(&mut self) -> Result<(), ClientError> {
        debug!(socket = %self.socket_path.display(), "connecting");

        let stream =
            match tokio::time::timeout(self.connect_timeout, UnixStream::connect(&self.socket_path))
                .await
            {
                Ok(Ok(stream)) => stream,
                Ok(Err(e)) => return Err(e.into()),
                Err(_) => {
                    warn!(
                        "Connection timeout after {}ms",
                        self.connect_timeout.as_millis()
                    );
                    return Err(ClientError::ConnectionTimeout(
                        self.connect_timeout.as_millis() as u64,
                    ));
                }
            };

        info!(socket = %self.socket_path.display(), "connected");
        self.framed = Some(Framed::new(stream, PresenceCodec::new()));
        Ok(())
    }

    /// Wait for the next state line.
    ///
    /// The first line after connecting is the current state.
    ///
    /// # Errors
    ///
    /// - `NotConnected` before `connect()`
    /// - `ConnectionLost` when the server closes the socket
    /// - `Protocol` for an unknown or overlong line
    pub async fn recv(&mut self) -> Result<PresenceState, ClientError> {
        let framed = self.framed.as_mut().ok_or(ClientError::NotConnected)?;

        match framed.next().await {
            Some(Ok(state)) => {
                trace!(%state, "received");
                Ok(state)
            }
            Some(Err(e)) => Err(ClientError::Protocol(e)),
            None => {
                self.framed = None;
                Err(ClientError::ConnectionLost(
                    "Server closed connection".to_string(),
                ))
            }
        }
    }

    /// Like `recv()`, giving up after `timeout`.
    pub async fn recv_timeout(&mut self, timeout: Duration) -> Result<PresenceState, ClientError> {
        tokio::time::timeout(timeout, self.recv())
            .await
            .unwrap_or(Err(ClientError::ReadTimeout(timeout.as_millis() as u64)))
    }

    pub fn is_connected(&self) -> bool {
        self.framed.is_some()
    }

    /// Close the connection. Idempotent.
    pub async fn close(&mut self) -> Result<(), ClientError> {
        if let Some(framed) = self.framed.take() {
            let mut stream = framed.into_inner();
            let shutdown_timeout = Duration::from_millis(500);
            match tokio::time::timeout(shutdown_timeout, stream.shutdown()).await {
                Ok(Ok(())) => debug!("connection closed"),
                Ok(Err(e)) => warn!("Error during shutdown: {}", e),
                Err(_) => warn!(
                    "Shutdown timeout during close ({}ms)",
                    shutdown_timeout.as_millis()
                ),
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_client_not_connected_initially() {
        let client = PresenceClient::new(PresenceClientConfig::default());
        assert!(!client.is_connected());
    }

    #[tokio::test]
    async fn test_recv_without_connect() {
        let mut client = PresenceClient::new(PresenceClientConfig::default());
        let result = client.recv().await;
        assert!(matches!(result, Err(ClientError::NotConnected)));
    }

    #[tokio::test]
    async fn test_connect_to_missing_socket() {
        let dir = tempfile::tempdir().unwrap();
        let mut client = PresenceClient::new(PresenceClientConfig {
            socket_path: dir.path().join("absent.socket"),
            connect_timeout: Duration::from_millis(200),
        });

        assert!(matches!(client.connect().await, Err(ClientError::Io(_))));
        assert!(!client.is_connected());
    }

    #[tokio::test]
    async fn test_multiple_close_calls() {
        let mut client = PresenceClient::new(PresenceClientConfig::default());
        client.close().await.unwrap();
        client.close().await.unwrap();
    }

    #[tokio::test]
    async fn test_unknown_line_is_protocol_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bogus.socket");
        let listener = tokio::net::UnixListener::bind(&path).unwrap();

        let server = tokio::spawn(async move {
            let (mut stream, _) = listener.accept().await.unwrap();
            stream.write_all(b"HELLO\n").await.unwrap();
        });

        let mut client = PresenceClient::new(PresenceClientConfig {
            socket_path: path,
            ..Default::default()
        });
        client.connect().await.unwrap();

        assert!(matches!(client.recv().await, Err(ClientError::Protocol(_))));
        server.await.unwrap();
    }
}
