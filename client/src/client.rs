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


//! Relay client implementation

use crate::handler::ServerFrame;
use crate::{ClientConfig, ClientError, ClientHandler, Result};
use chatrelay_protocol::consts::NAME_CLEAR;
use chatrelay_protocol::{Message, RelayCodec};
use futures_util::{SinkExt, StreamExt};
use std::sync::Arc;
use std::sync::atomic::{AtomicU8, Ordering};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::{TcpStream, UdpSocket};
use tokio::sync::Mutex;
use tokio::time::timeout;
use tokio_util::codec::{FramedRead, FramedWrite};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Connection state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ConnectionState {
    /// Not connected
    Disconnected = 0,
    /// Connected and registered (or waiting for a name answer)
    Connected = 1,
    /// Shutting down
    ShuttingDown = 2,
}

impl ConnectionState {
    fn from_u8(value: u8) -> Self {
        match value {
            1 => ConnectionState::Connected,
            2 => ConnectionState::ShuttingDown,
            _ => ConnectionState::Disconnected,
        }
    }
}

/// Ask the server whether `name` is already in use
///
/// Sends one USERNAME_QUERY datagram to the query port and waits for the
/// answer. Returns `true` if the name is taken.
pub async fn check_name_duplicates(config: &ClientConfig, name: &str) -> Result<bool> {
    let socket = UdpSocket::bind("0.0.0.0:0").await?;
    socket.connect(config.query_address()).await?;
    socket
        .send(Message::username_query(name).to_string().as_bytes())
        .await?;

    let mut buffer = vec![0u8; config.max_frame_length];
    let length = timeout(config.query_timeout, socket.recv(&mut buffer))
        .await
        .map_err(|_| ClientError::QueryTimeout)??;
    let reply = String::from_utf8_lossy(&buffer[..length]);
    debug!(name, reply = %reply, "Duplicate-name answer");
    Ok(!reply.starts_with(NAME_CLEAR))
}

/// A connected relay client
///
/// Cloning is cheap; every clone drives the same connection.
#[derive(Clone)]
pub struct RelayClient {
    inner: Arc<ClientInner>,
}

struct ClientInner {
    config: ClientConfig,
    uuid: String,
    name: String,
    state: AtomicU8,
    writer: Mutex<FramedWrite<OwnedWriteHalf, RelayCodec>>,
    cancel: CancellationToken,
}

impl RelayClient {
    /// Connect to the relay and register as `name`
    ///
    /// A fresh session id is generated. The server does not acknowledge a
    /// successful registration; a refused name is reported through
    /// [`ClientHandler::on_name_rejected`].
    pub async fn connect(
        config: ClientConfig,
        name: impl Into<String>,
        handler: Arc<dyn ClientHandler>,
    ) -> Result<Self> {
        config.validate()?;
        let name = name.into();
        let address = config.address();
        info!(address, "Connecting to relay");

        let stream = match timeout(config.connect_timeout, TcpStream::connect(&address)).await {
            Ok(Ok(stream)) => stream,
            Ok(Err(e)) => return Err(e.into()),
            Err(_) => return Err(ClientError::ConnectionTimeout),
        };
        stream.set_nodelay(true)?;
        let (read, write) = stream.into_split();
        let codec = RelayCodec::with_max_length(config.max_frame_length);
        let reader = FramedRead::new(read, codec.clone());

        let client = Self {
            inner: Arc::new(ClientInner {
                uuid: uuid::Uuid::new_v4().to_string(),
                name,
                state: AtomicU8::new(ConnectionState::Connected as u8),
                writer: Mutex::new(FramedWrite::new(write, codec)),
                cancel: CancellationToken::new(),
                config,
            }),
        };

        client
            .send_frame(&Message::register(client.uuid(), client.name()).to_string())
            .await?;
        info!(uuid = client.uuid(), name = client.name(), "Registered with relay");
        handler.on_connect(&client).await;

        tokio::spawn(client.clone().read_loop(reader, handler));
        tokio::spawn(client.clone().keep_alive_loop());
        Ok(client)
    }

    /// Session id sent with every frame
    pub fn uuid(&self) -> &str {
        &self.inner.uuid
    }

    /// Display name requested at connect
    pub fn name(&self) -> &str {
        &self.inner.name
    }

    /// Get the client configuration
    pub fn config(&self) -> &ClientConfig {
        &self.inner.config
    }

    /// Current connection state
    pub fn state(&self) -> ConnectionState {
        ConnectionState::from_u8(self.inner.state.load(Ordering::Acquire))
    }

    /// Whether the connection is still open
    pub fn is_connected(&self) -> bool {
        self.state() == ConnectionState::Connected
    }

    /// Send chat text
    ///
    /// Text of the form `@name#payload` is delivered privately to `name`.
    pub async fn send_message(&self, text: &str) -> Result<()> {
        self.send_frame(&Message::incoming(self.uuid(), text).to_string())
            .await
    }

    /// Send a private message to `target`
    pub async fn send_private(&self, target: &str, text: &str) -> Result<()> {
        self.send_message(&format!("@{target}#{text}")).await
    }

    /// Ask the server to dump its session table to its log
    pub async fn send_debug(&self) -> Result<()> {
        self.send_frame(&Message::Debug.to_string()).await
    }

    /// Log off and close the connection
    pub async fn disconnect(&self) -> Result<()> {
        if !self.is_connected() {
            return Err(ClientError::NotConnected);
        }
        let logoff = Message::logoff(self.uuid()).to_string();
        self.close(Some(&logoff)).await;
        Ok(())
    }

    /// Close the connection without telling the server
    pub async fn disconnect_without_notification(&self) {
        self.close(None).await;
    }

    async fn close(&self, farewell: Option<&str>) {
        let previous = self
            .inner
            .state
            .swap(ConnectionState::ShuttingDown as u8, Ordering::AcqRel);
        if ConnectionState::from_u8(previous) == ConnectionState::Disconnected {
            self.set_state(ConnectionState::Disconnected);
            return;
        }
        self.inner.cancel.cancel();

        let mut writer = self.inner.writer.lock().await;
        if let Some(frame) = farewell {
            if let Err(e) = writer.send(frame).await {
                warn!(error = %e, "Failed to send logoff");
            }
        }
        if let Err(e) = SinkExt::<&str>::close(&mut *writer).await {
            debug!(error = %e, "Error while closing writer");
        }
        drop(writer);
        self.set_state(ConnectionState::Disconnected);
    }

    fn set_state(&self, state: ConnectionState) {
        self.inner.state.store(state as u8, Ordering::Release);
    }

    async fn send_frame(&self, frame: &str) -> Result<()> {
        let mut writer = self.inner.writer.lock().await;
        // Checked under the lock so nothing follows a logoff.
        if self.inner.cancel.is_cancelled() {
            return Err(ClientError::NotConnected);
        }
        writer.send(frame).await?;
        Ok(())
    }

    async fn read_loop(
        self,
        mut reader: FramedRead<OwnedReadHalf, RelayCodec>,
        handler: Arc<dyn ClientHandler>,
    ) {
        loop {
            let frame = tokio::select! {
                _ = self.inner.cancel.cancelled() => break,
                frame = reader.next() => frame,
            };
            match frame {
                Some(Ok(raw)) => {
                    let frame = ServerFrame::parse(&raw);
                    if let Some(line) = frame.render() {
                        handler.on_line(&self, &line).await;
                    }
                    match frame {
                        ServerFrame::Logoff => {
                            info!("Server closed the connection");
                            break;
                        }
                        ServerFrame::NameDuplicated => {
                            warn!(name = self.name(), "Name rejected by server");
                            handler.on_name_rejected(&self).await;
                        }
                        _ => {}
                    }
                }
                Some(Err(e)) => {
                    error!(error = %e, "Read from relay failed");
                    handler.on_error(&self, e.into()).await;
                    break;
                }
                None => {
                    info!("Relay closed the connection");
                    break;
                }
            }
        }

        self.disconnect_without_notification().await;
        handler.on_disconnect(&self).await;
    }

    async fn keep_alive_loop(self) {
        let ping = Message::keep_alive(self.uuid()).to_string();
        loop {
            if let Err(e) = self.send_frame(&ping).await {
                debug!(error = %e, "Keep-alive stopped");
                break;
            }
            tokio::select! {
                _ = self.inner.cancel.cancelled() => break,
                _ = tokio::time::sleep(self.inner.config.keep_alive_interval) => {}
            }
        }
    }
}

impl std::fmt::Debug for RelayClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RelayClient")
            .field("uuid", &self.inner.uuid)
            .field("name", &self.inner.name)
            .field("state", &self.state())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::CallbackHandler;
    use chatrelay_protocol::consts::NAME_DUPLICATED;
    use std::time::Duration;
    use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
    use tokio::net::TcpListener;
    use tokio::sync::mpsc;

    async fn fake_server() -> (TcpListener, ClientConfig) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let config = ClientConfig::new("127.0.0.1", port)
            .with_keep_alive_interval(Duration::from_millis(50));
        (listener, config)
    }

    fn line_handler() -> (Arc<CallbackHandler>, mpsc::UnboundedReceiver<String>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let handler = CallbackHandler {
            on_line: Some(Box::new(move |_client: &RelayClient, line: &str| {
                let _ = tx.send(line.to_string());
            })),
            ..Default::default()
        };
        (Arc::new(handler), rx)
    }

    #[tokio::test]
    async fn test_connect_sends_register_then_keep_alive() {
        let (listener, config) = fake_server().await;
        let (handler, _lines) = line_handler();
        let client = RelayClient::connect(config, "Alice", handler).await.unwrap();

        let (socket, _) = listener.accept().await.unwrap();
        let mut frames = BufReader::new(socket).lines();
        let register = frames.next_line().await.unwrap().unwrap();
        assert_eq!(register, Message::register(client.uuid(), "Alice").to_string());

        let ping = frames.next_line().await.unwrap().unwrap();
        assert_eq!(ping, Message::keep_alive(client.uuid()).to_string());
        let again = frames.next_line().await.unwrap().unwrap();
        assert_eq!(again, ping);
    }

    #[tokio::test]
    async fn test_incoming_frames_are_rendered() {
        let (listener, config) = fake_server().await;
        let (handler, mut lines) = line_handler();
        let _client = RelayClient::connect(config, "Bob", handler).await.unwrap();

        let (mut socket, _) = listener.accept().await.unwrap();
        let frame = format!("{}\n", Message::incoming("Alice", "hello"));
        socket.write_all(frame.as_bytes()).await.unwrap();

        let line = timeout(Duration::from_secs(2), lines.recv()).await.unwrap();
        assert_eq!(line.as_deref(), Some("Alice: hello"));
    }

    #[tokio::test]
    async fn test_server_logoff_disconnects() {
        let (listener, config) = fake_server().await;
        let (tx, mut disconnected) = mpsc::unbounded_channel();
        let handler = CallbackHandler {
            on_disconnect: Some(Box::new(move |_client: &RelayClient, ()| {
                let _ = tx.send(());
            })),
            ..Default::default()
        };
        let client = RelayClient::connect(config, "Bob", Arc::new(handler))
            .await
            .unwrap();

        let (mut socket, _) = listener.accept().await.unwrap();
        let frame = format!("{}\n", Message::logoff("SERVER"));
        socket.write_all(frame.as_bytes()).await.unwrap();

        timeout(Duration::from_secs(2), disconnected.recv())
            .await
            .unwrap();
        assert_eq!(client.state(), ConnectionState::Disconnected);
        assert!(matches!(
            client.send_message("late").await,
            Err(ClientError::NotConnected)
        ));
    }

    #[tokio::test]
    async fn test_name_rejection_is_reported() {
        let (listener, config) = fake_server().await;
        let (tx, mut rejected) = mpsc::unbounded_channel();
        let handler = CallbackHandler {
            on_name_rejected: Some(Box::new(move |client: &RelayClient, ()| {
                let _ = tx.send(client.name().to_string());
            })),
            ..Default::default()
        };
        let client = RelayClient::connect(config, "Alice", Arc::new(handler))
            .await
            .unwrap();

        let (mut socket, _) = listener.accept().await.unwrap();
        socket
            .write_all(format!("{NAME_DUPLICATED}\n").as_bytes())
            .await
            .unwrap();

        let name = timeout(Duration::from_secs(2), rejected.recv())
            .await
            .unwrap();
        assert_eq!(name.as_deref(), Some("Alice"));
        assert!(client.is_connected());
    }

    #[tokio::test]
    async fn test_disconnect_sends_logoff() {
        let (listener, config) = fake_server().await;
        let (handler, _lines) = line_handler();
        let client = RelayClient::connect(config, "Alice", handler).await.unwrap();
        let (socket, _) = listener.accept().await.unwrap();

        client.disconnect().await.unwrap();
        assert!(!client.is_connected());

        let mut frames = BufReader::new(socket).lines();
        let logoff = Message::logoff(client.uuid()).to_string();
        let mut seen = Vec::new();
        while let Ok(Some(frame)) = frames.next_line().await {
            seen.push(frame);
        }
        assert_eq!(seen.last(), Some(&logoff));
    }

    #[tokio::test]
    async fn test_connect_refused() {
        let (listener, config) = fake_server().await;
        drop(listener);
        let (handler, _lines) = line_handler();
        let result = RelayClient::connect(config, "Alice", handler).await;
        assert!(matches!(result, Err(ClientError::Io(_))));
    }

    #[tokio::test]
    async fn test_query_timeout() {
        let silent = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let config = ClientConfig::new("127.0.0.1", 1)
            .with_query_port(silent.local_addr().unwrap().port())
            .with_query_timeout(Duration::from_millis(100));
        assert!(matches!(
            check_name_duplicates(&config, "Alice").await,
            Err(ClientError::QueryTimeout)
        ));
    }
}
