#![cfg(unix)]

use serde_json::{json, Value};
use session_core::protocol::{Action, PeerMessage, Role};
use session_core::{
    AeadKeyProvider, EncryptedDurableStore, MemoryDurableStore, MemoryKeyStore,
    SessionStorageEngine, SessionSyncChannel,
};
use session_service::server::SyncServer;
use std::os::unix::fs::PermissionsExt;
use std::path::Path;
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader, Lines};
use tokio::net::unix::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::UnixStream;

struct Client {
    lines: Lines<BufReader<OwnedReadHalf>>,
    writer: OwnedWriteHalf,
}

impl Client {
    async fn connect(path: &Path) -> Self {
        let stream = UnixStream::connect(path).await.unwrap();
        let (read, writer) = stream.into_split();
        Self {
            lines: BufReader::new(read).lines(),
            writer,
        }
    }

    async fn next(&mut self) -> PeerMessage {
        let line = self.lines.next_line().await.unwrap().unwrap();
        PeerMessage::from_line(&line).unwrap()
    }

    async fn send_raw(&mut self, line: &str) {
        self.writer.write_all(line.as_bytes()).await.unwrap();
        self.writer.write_all(b"\n").await.unwrap();
    }

    async fn request(&mut self, action: Action, key: &str, data: Option<Value>) -> PeerMessage {
        let msg = PeerMessage::request(action, key, data, Role::Foreground);
        self.send_raw(&msg.to_line().unwrap()).await;
        loop {
            let reply = self.next().await;
            if reply.id == msg.id {
                return reply;
            }
        }
    }
}

fn start(dir: &Path) -> (Arc<SessionSyncChannel>, std::path::PathBuf) {
    let engine = SessionStorageEngine::new(
        EncryptedDurableStore::new(Arc::new(MemoryDurableStore::new())),
        Arc::new(MemoryKeyStore::new()),
        Arc::new(AeadKeyProvider::new()),
    );
    let channel = Arc::new(SessionSyncChannel::new(Arc::new(engine)));
    let path = dir.join("sessiond.sock");
    let server = Arc::new(SyncServer::new(channel.clone(), path.clone()));
    let listener = server.bind().unwrap();
    server.spawn(listener);
    (channel, path)
}

#[tokio::test]
async fn socket_is_owner_only() {
    let dir = tempfile::tempdir().unwrap();
    let (_channel, path) = start(dir.path());
    let mode = std::fs::metadata(&path).unwrap().permissions().mode();
    assert_eq!(mode & 0o777, 0o600);
}

#[tokio::test]
async fn requests_round_trip_over_socket() {
    let dir = tempfile::tempdir().unwrap();
    let (channel, path) = start(dir.path());
    channel.engine().save("seed", json!(1)).await.unwrap();

    let mut client = Client::connect(&path).await;
    let init = client.next().await;
    assert_eq!(init.action, Action::Initialization);
    assert_eq!(init.originator, Role::Background);
    assert_eq!(init.data, Some(json!(["seed"])));

    let saved = client.request(Action::Save, "k", Some(json!({"x": 1}))).await;
    assert_eq!(saved.action, Action::Save);
    assert!(saved.error.is_none());

    let got = client.request(Action::Get, "k", None).await;
    assert_eq!(got.data, Some(json!({"x": 1})));

    let has = client.request(Action::Has, "nope", None).await;
    assert_eq!(has.data, Some(json!(false)));
}

#[tokio::test]
async fn updates_fan_out_to_other_connections() {
    let dir = tempfile::tempdir().unwrap();
    let (_channel, path) = start(dir.path());

    let mut a = Client::connect(&path).await;
    let mut b = Client::connect(&path).await;
    a.next().await;
    b.next().await;

    a.request(Action::Remove, "gone", None).await;
    let update = b.next().await;
    assert_eq!(update.action, Action::SubjectUpdate);
    assert_eq!(update.key.as_deref(), Some("gone"));
    assert_eq!(
        update.data,
        Some(json!({"key": "gone", "updateType": "remove"}))
    );
}

#[tokio::test]
async fn bad_lines_do_not_drop_connection() {
    let dir = tempfile::tempdir().unwrap();
    let (channel, path) = start(dir.path());

    let mut client = Client::connect(&path).await;
    client.next().await;
    client.send_raw("not json").await;
    client
        .send_raw(r#"{"action":"get","key":"k","originator":"foreground"}"#)
        .await;

    let got = client.request(Action::Get, "k", None).await;
    assert_eq!(got.action, Action::Get);
    assert_eq!(channel.peer_count(), 1);

    drop(client);
    for _ in 0..50 {
        if channel.peer_count() == 0 {
            break;
        }
        tokio::time::sleep(std::time::Duration::from_millis(10)).await;
    }
    assert_eq!(channel.peer_count(), 0);
}
