//! Integration tests for BroadcastServer
//!
//! Each test runs a server on a socket inside its own temporary directory.

use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use std::time::Duration;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::UnixStream;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio::time::timeout;
use touchkey_core::{PresenceState, SocketSource};
use touchkey_network::{
    BroadcastServer, ClientError, PresenceClient, PresenceClientConfig, ServerConfig, ServerError,
};
use touchkey_state::StateBus;

const WAIT: Duration = Duration::from_secs(2);

struct RunningServer {
    path: PathBuf,
    bus: StateBus,
    stop: oneshot::Sender<()>,
    task: JoinHandle<Result<(), ServerError>>,
    _dir: tempfile::TempDir,
}

impl RunningServer {
    async fn stop(self) -> PathBuf {
        let _ = self.stop.send(());
        timeout(WAIT, self.task)
            .await
            .expect("server did not stop")
            .unwrap()
            .unwrap();
        self.path
    }
}

fn start(max_connections: usize) -> RunningServer {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("touchkey.socket");
    let bus = StateBus::new();

    let server = BroadcastServer::bind(
        ServerConfig {
            source: SocketSource::Path(path.clone()),
            max_connections,
        },
        bus.clone(),
    )
    .unwrap();

    let (stop, stopped) = oneshot::channel::<()>();
    let task = tokio::spawn(server.run(async {
        let _ = stopped.await;
    }));

    RunningServer {
        path,
        bus,
        stop,
        task,
        _dir: dir,
    }
}

async fn client(path: &Path) -> PresenceClient {
    let mut client = PresenceClient::new(PresenceClientConfig {
        socket_path: path.to_path_buf(),
        connect_timeout: WAIT,
    });
    client.connect().await.unwrap();
    client
}

async fn read_exact_line(stream: &mut UnixStream) -> Vec<u8> {
    let mut line = vec![0u8; 6];
    timeout(WAIT, stream.read_exact(&mut line))
        .await
        .expect("no line")
        .unwrap();
    line
}

#[tokio::test]
async fn test_client_receives_current_state_on_connect() {
    let server = start(8);
    server.bus.publish(PresenceState::NeedsTouch);

    let mut stream = UnixStream::connect(&server.path).await.unwrap();
    assert_eq!(read_exact_line(&mut stream).await, b"U2F_1\n");

    server.stop().await;
}

#[tokio::test]
async fn test_changes_are_broadcast_byte_exact() {
    let server = start(8);

    let mut stream = UnixStream::connect(&server.path).await.unwrap();
    assert_eq!(read_exact_line(&mut stream).await, b"U2F_0\n");

    server.bus.publish(PresenceState::NeedsTouch);
    assert_eq!(read_exact_line(&mut stream).await, b"U2F_1\n");

    server.bus.publish(PresenceState::Idle);
    assert_eq!(read_exact_line(&mut stream).await, b"U2F_0\n");

    server.stop().await;
}

#[tokio::test]
async fn test_every_client_sees_every_change() {
    let server = start(8);

    let mut clients = Vec::new();
    for _ in 0..3 {
        let mut c = client(&server.path).await;
        assert_eq!(c.recv_timeout(WAIT).await.unwrap(), PresenceState::Idle);
        clients.push(c);
    }

    server.bus.publish(PresenceState::NeedsTouch);
    for c in &mut clients {
        assert_eq!(c.recv_timeout(WAIT).await.unwrap(), PresenceState::NeedsTouch);
    }

    server.stop().await;
}

#[tokio::test]
async fn test_client_input_is_ignored() {
    let server = start(8);

    let mut stream = UnixStream::connect(&server.path).await.unwrap();
    assert_eq!(read_exact_line(&mut stream).await, b"U2F_0\n");

    stream.write_all(b"anything at all\n\x00\xff").await.unwrap();
    server.bus.publish(PresenceState::NeedsTouch);
    assert_eq!(read_exact_line(&mut stream).await, b"U2F_1\n");

    server.stop().await;
}

#[tokio::test]
async fn test_half_closed_client_keeps_receiving() {
    let server = start(8);

    let mut stream = UnixStream::connect(&server.path).await.unwrap();
    assert_eq!(read_exact_line(&mut stream).await, b"U2F_0\n");

    stream.shutdown().await.unwrap();
    server.bus.publish(PresenceState::NeedsTouch);
    assert_eq!(read_exact_line(&mut stream).await, b"U2F_1\n");

    server.bus.publish(PresenceState::Idle);
    assert_eq!(read_exact_line(&mut stream).await, b"U2F_0\n");

    server.stop().await;
}

#[tokio::test]
async fn test_disconnected_client_does_not_affect_others() {
    let server = start(8);

    let mut leaving = client(&server.path).await;
    let mut staying = client(&server.path).await;
    leaving.recv_timeout(WAIT).await.unwrap();
    staying.recv_timeout(WAIT).await.unwrap();

    leaving.close().await.unwrap();
    drop(leaving);

    server.bus.publish(PresenceState::NeedsTouch);
    assert_eq!(
        staying.recv_timeout(WAIT).await.unwrap(),
        PresenceState::NeedsTouch
    );

    server.stop().await;
}

#[tokio::test]
async fn test_connections_over_limit_are_closed() {
    let server = start(1);

    let mut first = client(&server.path).await;
    assert_eq!(first.recv_timeout(WAIT).await.unwrap(), PresenceState::Idle);

    let mut second = client(&server.path).await;
    assert!(matches!(
        second.recv_timeout(WAIT).await,
        Err(ClientError::ConnectionLost(_))
    ));

    server.stop().await;
}

#[tokio::test]
async fn test_socket_file_lifecycle() {
    let server = start(8);

    let mode = std::fs::metadata(&server.path).unwrap().permissions().mode();
    assert_eq!(mode & 0o777, 0o600);

    let path = server.stop().await;
    assert!(!path.exists());
}

#[tokio::test]
async fn test_clients_see_eof_on_shutdown() {
    let server = start(8);
    let mut c = client(&server.path).await;
    c.recv_timeout(WAIT).await.unwrap();

    server.stop().await;
    assert!(matches!(
        c.recv_timeout(WAIT).await,
        Err(ClientError::ConnectionLost(_))
    ));
}

#[tokio::test]
async fn test_stale_socket_is_replaced() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("touchkey.socket");
    drop(std::os::unix::net::UnixListener::bind(&path).unwrap());

    let server = BroadcastServer::bind(
        ServerConfig {
            source: SocketSource::Path(path.clone()),
            max_connections: 8,
        },
        StateBus::new(),
    )
    .unwrap();
    assert_eq!(server.socket_path(), Some(path.as_path()));
}

#[tokio::test]
async fn test_live_socket_is_not_stolen() {
    let server = start(8);

    let result = BroadcastServer::bind(
        ServerConfig {
            source: SocketSource::Path(server.path.clone()),
            max_connections: 8,
        },
        StateBus::new(),
    );
    assert!(matches!(result, Err(ServerError::BindFailed { .. })));

    let path = server.stop().await;
    assert!(!path.exists());
}

#[tokio::test]
async fn test_activation_without_inherited_socket_fails() {
    let result = BroadcastServer::bind(
        ServerConfig {
            source: SocketSource::Activation,
            max_connections: 8,
        },
        StateBus::new(),
    );
    assert!(matches!(result, Err(ServerError::ActivationUnavailable(_))));
}
