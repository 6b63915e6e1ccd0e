//! Integration tests for PresenceCodec with Tokio streams.

use futures::{SinkExt, StreamExt};
use tokio::io::{AsyncWriteExt, DuplexStream};
use tokio_util::codec::{FramedRead, FramedWrite};
use touchkey_core::{Error, PresenceState};
use touchkey_protocol::PresenceCodec;

fn create_pipe(
    buffer_size: usize,
) -> (
    FramedWrite<DuplexStream, PresenceCodec>,
    FramedRead<DuplexStream, PresenceCodec>,
) {
    let (writer, reader) = tokio::io::duplex(buffer_size);
    (
        FramedWrite::new(writer, PresenceCodec::new()),
        FramedRead::new(reader, PresenceCodec::new()),
    )
}

#[tokio::test]
async fn test_states_arrive_in_order() {
    let (mut tx, mut rx) = create_pipe(64);

    tx.send(PresenceState::Idle).await.unwrap();
    tx.send(PresenceState::NeedsTouch).await.unwrap();
    tx.send(PresenceState::Idle).await.unwrap();

    assert_eq!(rx.next().await.unwrap().unwrap(), PresenceState::Idle);
    assert_eq!(rx.next().await.unwrap().unwrap(), PresenceState::NeedsTouch);
    assert_eq!(rx.next().await.unwrap().unwrap(), PresenceState::Idle);
}

#[tokio::test]
async fn test_stream_ends_on_close() {
    let (mut tx, mut rx) = create_pipe(64);

    tx.send(PresenceState::NeedsTouch).await.unwrap();
    drop(tx);

    assert_eq!(rx.next().await.unwrap().unwrap(), PresenceState::NeedsTouch);
    assert!(rx.next().await.is_none());
}

#[tokio::test]
async fn test_line_split_across_writes() {
    let (mut writer, reader) = tokio::io::duplex(64);
    let mut rx = FramedRead::new(reader, PresenceCodec::new());

    writer.write_all(b"U2F").await.unwrap();
    writer.flush().await.unwrap();
    writer.write_all(b"_1\n").await.unwrap();

    assert_eq!(rx.next().await.unwrap().unwrap(), PresenceState::NeedsTouch);
}

#[tokio::test]
async fn test_garbage_line_is_an_error() {
    let (mut writer, reader) = tokio::io::duplex(64);
    let mut rx = FramedRead::new(reader, PresenceCodec::new());

    writer.write_all(b"U2F_9\n").await.unwrap();

    assert!(matches!(
        rx.next().await,
        Some(Err(Error::UnknownLine(_)))
    ));
}
