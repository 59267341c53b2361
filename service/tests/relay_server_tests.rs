//
// Copyright 2017-2026 Hans W. Uhlig. All Rights Reserved.
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//      http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.
//


//! End-to-end tests driving a running RelayServer over real sockets

use async_trait::async_trait;
use chatrelay_protocol::consts::{NAME_CLEAR, NAME_DUPLICATED};
use chatrelay_protocol::{Message, parse_bridge_greeting};
use chatrelay_service::{
    CallbackSubscriber, ConnectionId, NoopHandler, RelayConnection, RelayServer, ServerConfig,
    ServerHandler, SessionId,
};
use futures::{SinkExt, StreamExt};
use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader, Lines};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::{TcpStream, UdpSocket};
use tokio::sync::mpsc;
use tokio::time::{sleep, timeout};
use tokio_tungstenite::tungstenite::Message as WsMessage;

/// A raw TCP client speaking the relay protocol
struct Peer {
    lines: Lines<BufReader<OwnedReadHalf>>,
    writer: OwnedWriteHalf,
}

impl Peer {
    async fn connect(address: SocketAddr) -> Self {
        let (read, writer) = TcpStream::connect(address).await.unwrap().into_split();
        Self {
            lines: BufReader::new(read).lines(),
            writer,
        }
    }

    async fn registered(server: &RelayServer, uuid: &str, name: &str) -> Self {
        let mut peer = Self::connect(server.relay_address()).await;
        peer.send(&Message::register(uuid, name).to_string()).await;
        let registry = server.registry();
        let id = SessionId::from(uuid);
        wait_until(|| registry.contains_uuid(&id)).await;
        peer
    }

    async fn send(&mut self, frame: &str) {
        self.writer
            .write_all(format!("{frame}\n").as_bytes())
            .await
            .unwrap();
    }

    /// Next line, or `None` on EOF or after two seconds of silence
    async fn recv(&mut self) -> Option<String> {
        timeout(Duration::from_secs(2), self.lines.next_line())
            .await
            .ok()?
            .ok()?
    }

    async fn assert_silent(&mut self) {
        assert!(
            timeout(Duration::from_millis(200), self.lines.next_line())
                .await
                .is_err(),
            "peer received an unexpected frame"
        );
    }
}

async fn wait_until(mut condition: impl FnMut() -> bool) {
    timeout(Duration::from_secs(3), async {
        while !condition() {
            sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("condition not reached in time");
}

async fn started(config: ServerConfig) -> RelayServer {
    let server = RelayServer::new(config).await.unwrap();
    server.start(Arc::new(NoopHandler)).await.unwrap();
    server
}

fn subscribe(server: &RelayServer) -> mpsc::UnboundedReceiver<String> {
    let (tx, rx) = mpsc::unbounded_channel();
    server
        .distributor()
        .register_subscriber(Arc::new(CallbackSubscriber::new(move |line: &str| {
            let _ = tx.send(line.to_string());
        })));
    rx
}

async fn next_line(lines: &mut mpsc::UnboundedReceiver<String>) -> String {
    timeout(Duration::from_secs(2), lines.recv())
        .await
        .unwrap()
        .unwrap()
}

#[tokio::test]
async fn test_register_and_broadcast() {
    let server = started(ServerConfig::ephemeral()).await;
    let mut display = subscribe(&server);

    let mut alice = Peer::registered(&server, "u1", "Alice").await;
    assert_eq!(next_line(&mut display).await, "Client: u1 (Alice) Connected.");
    let mut bob = Peer::registered(&server, "u2", "Bob").await;
    let mut carol = Peer::registered(&server, "u3", "Carol").await;

    alice.send(&Message::incoming("u1", "hi").to_string()).await;

    let expected = Message::incoming("Alice", "hi").to_string();
    assert_eq!(bob.recv().await.as_deref(), Some(expected.as_str()));
    assert_eq!(carol.recv().await.as_deref(), Some(expected.as_str()));
    alice.assert_silent().await;

    server.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_private_and_unknown_target() {
    let server = started(ServerConfig::ephemeral()).await;
    let mut alice = Peer::registered(&server, "u1", "Alice").await;
    let mut bob = Peer::registered(&server, "u2", "Bob").await;
    let mut carol = Peer::registered(&server, "u3", "Carol").await;

    alice.send(&Message::incoming("u1", "@Bob#hello").to_string()).await;
    assert_eq!(
        bob.recv().await,
        Some(Message::private("Alice", "Bob", "hello").to_string())
    );
    carol.assert_silent().await;

    alice.send(&Message::incoming("u1", "@Ghost#hi").to_string()).await;
    assert_eq!(
        alice.recv().await,
        Some(Message::server_notice("Invalid username: Ghost").to_string())
    );
    bob.assert_silent().await;
    carol.assert_silent().await;

    server.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_duplicate_name_is_rejected_then_retried() {
    let server = started(ServerConfig::ephemeral()).await;
    let _alice = Peer::registered(&server, "u1", "Alice").await;

    let mut second = Peer::connect(server.relay_address()).await;
    second.send(&Message::register("u2", "Alice").to_string()).await;
    assert_eq!(second.recv().await.as_deref(), Some(NAME_DUPLICATED));
    assert_eq!(server.registry().len(), 1);

    // The connection stays open for another attempt.
    second.send(&Message::register("u2", "Alicia").to_string()).await;
    let registry = server.registry();
    wait_until(|| registry.contains_name("Alicia")).await;

    server.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_logoff_removes_session() {
    let server = started(ServerConfig::ephemeral()).await;
    let mut display = subscribe(&server);
    let mut alice = Peer::registered(&server, "u1", "Alice").await;
    assert_eq!(next_line(&mut display).await, "Client: u1 (Alice) Connected.");

    alice.send(&Message::logoff("u1").to_string()).await;
    assert_eq!(next_line(&mut display).await, "Client: u1 Disconnected.");
    assert_eq!(alice.recv().await, None);

    let registry = server.registry();
    assert!(!registry.contains_uuid(&SessionId::from("u1")));
    assert_eq!(registry.find_by_name("Alice"), None);
    let manager = server.manager();
    wait_until(|| manager.connection_count() == 0).await;

    server.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_hangup_removes_session() {
    let server = started(ServerConfig::ephemeral()).await;
    let mut display = subscribe(&server);
    let alice = Peer::registered(&server, "u1", "Alice").await;
    assert_eq!(next_line(&mut display).await, "Client: u1 (Alice) Connected.");

    drop(alice);
    assert_eq!(next_line(&mut display).await, "Client: u1 Disconnected.");
    let registry = server.registry();
    wait_until(|| registry.is_empty()).await;

    server.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_duplicate_name_query() {
    let server = started(ServerConfig::ephemeral()).await;
    let _alice = Peer::registered(&server, "u1", "Alice").await;

    let socket = UdpSocket::bind("127.0.0.1:0").await.unwrap();
    let mut buffer = [0u8; 64];
    for (name, expected) in [("Alice", NAME_DUPLICATED), ("Bob", NAME_CLEAR)] {
        let query = Message::username_query(name).to_string();
        socket
            .send_to(query.as_bytes(), server.query_address())
            .await
            .unwrap();
        let (length, _) = timeout(Duration::from_secs(2), socket.recv_from(&mut buffer))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(std::str::from_utf8(&buffer[..length]).unwrap(), expected);
    }

    server.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_silent_session_is_reaped() {
    let config = ServerConfig::ephemeral()
        .with_heartbeat_interval(Duration::from_millis(50))
        .with_liveness_threshold(Duration::from_millis(400));
    let server = started(config).await;
    let mut alice = Peer::registered(&server, "u1", "Alice").await;
    let mut bob = Peer::registered(&server, "u2", "Bob").await;

    let registry = server.registry();
    let alice_id = SessionId::from("u1");
    for _ in 0..60 {
        bob.send(&Message::keep_alive("u2").to_string()).await;
        if !registry.contains_uuid(&alice_id) {
            break;
        }
        sleep(Duration::from_millis(50)).await;
    }
    assert!(!registry.contains_uuid(&alice_id));
    assert!(registry.contains_uuid(&SessionId::from("u2")));

    let notice = Message::server_notice("LOST connection to Alice").to_string();
    assert_eq!(bob.recv().await, Some(notice));

    // The reaped connection is closed, after any notice it was still sent.
    while alice.recv().await.is_some() {}
    assert_eq!(server.metrics().snapshot().sessions_reaped, 1);

    server.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_bridge_peer_joins_conversation() {
    let server = started(ServerConfig::ephemeral()).await;
    let mut alice = Peer::registered(&server, "u1", "Alice").await;

    let url = format!("ws://{}", server.bridge_address().unwrap());
    let (mut socket, _) = tokio_tungstenite::connect_async(url).await.unwrap();
    let greeting = match timeout(Duration::from_secs(2), socket.next()).await {
        Ok(Some(Ok(WsMessage::Text(text)))) => text.as_str().to_string(),
        other => panic!("unexpected greeting: {other:?}"),
    };
    let id = parse_bridge_greeting(&greeting).unwrap().to_string();

    socket
        .send(WsMessage::Text(Message::register(&id, "Carol").to_string().into()))
        .await
        .unwrap();
    let registry = server.registry();
    wait_until(|| registry.contains_name("Carol")).await;
    assert_eq!(server.bridge_peer_count(), 1);

    // The reserved name is unavailable to TCP clients.
    let mut impostor = Peer::connect(server.relay_address()).await;
    impostor.send(&Message::register("u9", "Carol").to_string()).await;
    assert_eq!(impostor.recv().await.as_deref(), Some(NAME_DUPLICATED));

    alice.send(&Message::incoming("u1", "hello web").to_string()).await;
    match timeout(Duration::from_secs(2), socket.next()).await {
        Ok(Some(Ok(WsMessage::Text(text)))) => assert_eq!(text.as_str(), "Alice: hello web"),
        other => panic!("unexpected frame: {other:?}"),
    }

    socket
        .send(WsMessage::Text(Message::incoming(&id, "hello tcp").to_string().into()))
        .await
        .unwrap();
    assert_eq!(
        alice.recv().await,
        Some(Message::incoming("Carol", "hello tcp").to_string())
    );

    // TCP clients reach bridge nicknames through the relay's peer directory.
    alice.send(&Message::incoming("u1", "@Carol#psst").to_string()).await;
    let expected = Message::private("Alice", "Carol", "psst").to_string();
    match timeout(Duration::from_secs(2), socket.next()).await {
        Ok(Some(Ok(WsMessage::Text(text)))) => assert_eq!(text.as_str(), expected),
        other => panic!("unexpected frame: {other:?}"),
    }
    alice.assert_silent().await;

    drop(socket);
    wait_until(|| !registry.contains_name("Carol")).await;

    server.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_notices_and_disconnect_all() {
    let server = started(ServerConfig::ephemeral()).await;
    let mut alice = Peer::registered(&server, "u1", "Alice").await;
    let mut bob = Peer::registered(&server, "u2", "Bob").await;

    let result = server
        .send_notice("maintenance soon", Some(&SessionId::from("u2")))
        .await
        .unwrap();
    assert!(result.all_succeeded());
    assert_eq!(
        bob.recv().await,
        Some(Message::server_notice("maintenance soon").to_string())
    );
    alice.assert_silent().await;

    assert_eq!(server.disconnect_all().await, 2);
    let farewell = Message::logoff("SERVER").to_string();
    for peer in [&mut alice, &mut bob] {
        assert_eq!(peer.recv().await.as_deref(), Some(farewell.as_str()));
        assert_eq!(peer.recv().await, None);
    }
    assert!(server.registry().is_empty());

    server.shutdown().await.unwrap();
}

#[derive(Default)]
struct CountingHandler {
    connected: AtomicUsize,
    registered: AtomicUsize,
    disconnected: AtomicUsize,
}

#[async_trait]
impl ServerHandler for CountingHandler {
    async fn on_connect(&self, _id: ConnectionId, _conn: &RelayConnection) {
        self.connected.fetch_add(1, Ordering::SeqCst);
    }

    async fn on_register(&self, _id: ConnectionId, _session: &SessionId, _name: &str) {
        self.registered.fetch_add(1, Ordering::SeqCst);
    }

    async fn on_disconnect(&self, _id: ConnectionId, _conn: &RelayConnection) {
        self.disconnected.fetch_add(1, Ordering::SeqCst);
    }
}

#[tokio::test]
async fn test_handler_observes_lifecycle() {
    let server = RelayServer::new(ServerConfig::ephemeral()).await.unwrap();
    let handler = Arc::new(CountingHandler::default());
    server.start(handler.clone()).await.unwrap();

    let alice = Peer::registered(&server, "u1", "Alice").await;
    wait_until(|| handler.registered.load(Ordering::SeqCst) == 1).await;
    assert_eq!(handler.connected.load(Ordering::SeqCst), 1);

    drop(alice);
    wait_until(|| handler.disconnected.load(Ordering::SeqCst) == 1).await;

    server.shutdown().await.unwrap();
}
