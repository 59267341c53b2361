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


//! WebSocket bridge onto the relay
//!
//! Browser peers connect over WebSocket and speak the same text protocol as
//! TCP clients, one message per text frame. A peer is greeted with a fresh
//! id (`<WS><<id>>`) and may then reserve a nickname with a REGISTER. Peers
//! never become registry sessions: they hold a name reservation, receive
//! traffic through their own bounded outbound queue and see everything
//! published to the [`MessageDistributor`](crate::MessageDistributor).
//!
//! A peer whose queue is full is evicted. Its reservation is released and
//! its connection is closed.

use crate::arbiter::answer;
use crate::{PeerDirectory, Relay, RelayError, Result, SessionId, Subscriber};
use async_trait::async_trait;
use chatrelay_protocol::consts::NAME_DUPLICATED;
use chatrelay_protocol::{ChatText, Message, bridge_greeting, display_line, display_speaker};
use dashmap::DashMap;
use futures_util::{SinkExt, StreamExt};
use metrics::{counter, gauge};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tokio::task::JoinHandle;
use tokio_tungstenite::accept_async;
use tokio_tungstenite::tungstenite::Message as WsMessage;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

/// How long a departing peer's writer may flush its queue
const FLUSH_TIMEOUT: Duration = Duration::from_secs(1);

/// What the peer loop should do after a frame was handled
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PeerAction {
    /// Keep reading
    Continue,
    /// The peer logged off
    Close,
}

struct BridgePeer {
    nickname: Option<String>,
    outbound: mpsc::Sender<String>,
    closed: CancellationToken,
}

/// Shared state of every connected bridge peer
pub struct BridgeHub {
    relay: Arc<Relay>,
    peers: DashMap<SessionId, BridgePeer>,
    queue_capacity: usize,
}

impl BridgeHub {
    /// Create an empty hub routing through `relay`
    ///
    /// The hub becomes the relay's peer directory, so private messages from
    /// TCP clients reach bridge nicknames. Each peer may have at most
    /// `queue_capacity` frames waiting to be written.
    pub fn new(relay: Arc<Relay>, queue_capacity: usize) -> Arc<Self> {
        let hub = Arc::new(Self {
            relay,
            peers: DashMap::new(),
            queue_capacity: queue_capacity.max(1),
        });
        let directory: Arc<dyn PeerDirectory> = hub.clone();
        if !hub.relay.set_peer_directory(&directory) {
            warn!("Relay already routes to another peer directory");
        }
        hub
    }

    /// Add a peer and queue its id greeting
    ///
    /// The returned receiver yields every frame destined for the peer.
    /// `closed` is cancelled when the peer is detached or evicted.
    pub fn attach(&self, id: SessionId, closed: CancellationToken) -> mpsc::Receiver<String> {
        let (outbound, receiver) = mpsc::channel(self.queue_capacity);
        let _ = outbound.try_send(bridge_greeting(id.as_str()));
        self.peers.insert(
            id,
            BridgePeer {
                nickname: None,
                outbound,
                closed,
            },
        );
        gauge!("chatrelay.bridge.peers").set(self.peers.len() as f64);
        receiver
    }

    /// Remove a peer and release its nickname
    ///
    /// Dropping the peer's queue ends its writer.
    pub fn detach(&self, id: &SessionId) {
        let Some((_, peer)) = self.peers.remove(id) else {
            return;
        };
        if let Some(nickname) = peer.nickname {
            self.relay.registry().release_reservation(&nickname);
        }
        peer.closed.cancel();
        gauge!("chatrelay.bridge.peers").set(self.peers.len() as f64);
        debug!(peer_id = %id, "Bridge peer detached");
    }

    /// Number of connected peers
    pub fn peer_count(&self) -> usize {
        self.peers.len()
    }

    /// Nickname reserved by a peer, if any
    pub fn nickname(&self, id: &SessionId) -> Option<String> {
        self.peers.get(id).and_then(|peer| peer.nickname.clone())
    }

    /// Handle one text frame from peer `id`
    pub async fn handle_text(&self, id: &SessionId, text: &str) -> PeerAction {
        counter!("chatrelay.bridge.frames.received").increment(1);
        let message = match Message::parse(text) {
            Ok(message) => message,
            Err(e) => {
                debug!(peer_id = %id, error = %e, "Ignoring malformed bridge frame");
                return PeerAction::Continue;
            }
        };

        match message {
            Message::Register { name, .. } => self.register(id, &name),
            Message::Incoming { uuid, text } if uuid == id.as_str() => {
                match self.nickname(id) {
                    Some(nickname) => self.route(id, &nickname, &text).await,
                    None => debug!(peer_id = %id, "Ignoring message from unnamed peer"),
                }
            }
            Message::Incoming { .. } => {
                warn!(peer_id = %id, "Bridge frame names another sender");
            }
            Message::UsernameQuery { .. } => {
                if let Some(reply) = answer(self.relay.registry(), text) {
                    self.send_to(id, reply.to_string());
                }
            }
            Message::Logoff { uuid } if uuid == id.as_str() => return PeerAction::Close,
            other => debug!(peer_id = %id, kind = %other.kind(), "Ignoring bridge frame"),
        }
        PeerAction::Continue
    }

    fn register(&self, id: &SessionId, name: &str) {
        if self.nickname(id).is_some() {
            debug!(peer_id = %id, "Peer already holds a nickname");
            return;
        }
        if !self.relay.registry().reserve_name(name) {
            info!(peer_id = %id, name, "Bridge nickname taken");
            self.send_to(id, NAME_DUPLICATED.to_string());
            return;
        }
        match self.peers.get_mut(id) {
            Some(mut peer) => {
                peer.nickname = Some(name.to_string());
                info!(peer_id = %id, name, "Bridge peer named");
            }
            // Detached while reserving.
            None => {
                self.relay.registry().release_reservation(name);
            }
        }
    }

    async fn route(&self, id: &SessionId, nickname: &str, text: &str) {
        match ChatText::parse(text) {
            ChatText::Private { target, payload } => {
                match self.relay.send_private(nickname, target, payload).await {
                    Ok(true) => {}
                    Ok(false) => {
                        let notice = format!("Invalid username: {target}");
                        self.send_to(id, Message::server_notice(notice).to_string());
                    }
                    Err(e) => {
                        warn!(
                            peer_id = %id,
                            target,
                            error = %e,
                            "Failed to deliver private message"
                        );
                    }
                }
            }
            ChatText::Broadcast(text) => {
                let frame = Message::incoming(nickname, text).to_string();
                let result = self.relay.broadcast(&frame, None).await;
                if !result.all_succeeded() {
                    debug!(failed = result.failed, "Bridge broadcast partially failed");
                }
                self.relay.publish(display_line(nickname, text));
            }
        }
    }

    fn find_by_nickname(&self, nickname: &str) -> Option<SessionId> {
        self.peers
            .iter()
            .find(|entry| entry.nickname.as_deref() == Some(nickname))
            .map(|entry| entry.key().clone())
    }

    /// Queue a frame for one peer, evicting it if its queue is full
    fn send_to(&self, id: &SessionId, frame: String) -> bool {
        let sent = match self.peers.get(id) {
            Some(peer) => peer.outbound.try_send(frame),
            None => return false,
        };
        match sent {
            Ok(()) => true,
            Err(TrySendError::Full(_)) => {
                self.evict(id);
                false
            }
            Err(TrySendError::Closed(_)) => false,
        }
    }

    fn evict(&self, id: &SessionId) {
        warn!(peer_id = %id, "Bridge peer queue full, evicting");
        counter!("chatrelay.bridge.peers.evicted").increment(1);
        self.detach(id);
    }

    /// Queue a display line for every peer except its speaker
    ///
    /// Returns the number of peers the line was queued for. Peers whose
    /// queue is full are evicted.
    pub fn forward_line(&self, line: &str) -> usize {
        let speaker = display_speaker(line);
        let mut forwarded = 0;
        let mut stalled = Vec::new();
        for peer in self.peers.iter() {
            if peer.key().as_str() == speaker || peer.nickname.as_deref() == Some(speaker) {
                continue;
            }
            match peer.outbound.try_send(line.to_string()) {
                Ok(()) => forwarded += 1,
                Err(TrySendError::Full(_)) => stalled.push(peer.key().clone()),
                Err(TrySendError::Closed(_)) => {}
            }
        }
        for id in stalled {
            self.evict(&id);
        }
        forwarded
    }
}

impl PeerDirectory for BridgeHub {
    fn deliver_to(&self, name: &str, frame: &str) -> bool {
        match self.find_by_nickname(name) {
            Some(id) => self.send_to(&id, frame.to_string()),
            None => false,
        }
    }
}

#[async_trait]
impl Subscriber for BridgeHub {
    async fn on_line(&self, line: &str) -> Result<()> {
        self.forward_line(line);
        Ok(())
    }
}

impl std::fmt::Debug for BridgeHub {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BridgeHub")
            .field("peers", &self.peers.len())
            .field("queue_capacity", &self.queue_capacity)
            .finish()
    }
}

/// WebSocket accept loop feeding a [`BridgeHub`]
pub struct BridgeServer {
    listener: TcpListener,
    address: SocketAddr,
    hub: Arc<BridgeHub>,
}

impl BridgeServer {
    /// Bind the WebSocket endpoint
    pub async fn bind(
        address: SocketAddr,
        relay: Arc<Relay>,
        queue_capacity: usize,
    ) -> Result<Self> {
        let listener = TcpListener::bind(address).await?;
        let address = listener.local_addr()?;
        info!(address = %address, "Bridge bound");
        Ok(Self {
            listener,
            address,
            hub: BridgeHub::new(relay, queue_capacity),
        })
    }

    /// Actual bound address
    pub fn local_addr(&self) -> SocketAddr {
        self.address
    }

    /// The peer hub
    pub fn hub(&self) -> &Arc<BridgeHub> {
        &self.hub
    }

    /// Accept peers on their own task until `cancel` fires
    pub fn spawn(self, cancel: CancellationToken) -> JoinHandle<()> {
        tokio::spawn(self.run(cancel))
    }

    async fn run(self, cancel: CancellationToken) {
        let distributor = self.hub.relay.distributor().clone();
        let subscription = distributor.register_subscriber(self.hub.clone());

        loop {
            let accepted = tokio::select! {
                _ = cancel.cancelled() => break,
                accepted = self.listener.accept() => accepted,
            };
            match accepted {
                Ok((stream, peer_addr)) => {
                    let hub = self.hub.clone();
                    let cancel = cancel.child_token();
                    tokio::spawn(async move {
                        if let Err(e) = serve_peer(hub, stream, peer_addr, cancel).await {
                            debug!(peer = %peer_addr, error = %e, "Bridge peer ended with error");
                        }
                    });
                }
                Err(e) => {
                    warn!(error = %e, "Failed to accept bridge peer");
                    tokio::time::sleep(Duration::from_millis(100)).await;
                }
            }
        }

        distributor.unregister_subscriber(subscription);
        info!("Bridge stopped");
    }
}

impl std::fmt::Debug for BridgeServer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BridgeServer")
            .field("address", &self.address)
            .field("peers", &self.hub.peer_count())
            .finish()
    }
}

#[instrument(skip(hub, stream, cancel))]
async fn serve_peer(
    hub: Arc<BridgeHub>,
    stream: TcpStream,
    peer_addr: SocketAddr,
    cancel: CancellationToken,
) -> Result<()> {
    let socket = accept_async(stream).await?;
    let (mut sink, mut frames) = socket.split();
    let id = SessionId::random();
    let mut outbound = hub.attach(id.clone(), cancel.clone());
    counter!("chatrelay.bridge.peers.accepted").increment(1);
    info!(peer_id = %id, "Bridge peer connected");

    let mut writer = tokio::spawn(async move {
        while let Some(text) = outbound.recv().await {
            if sink.send(WsMessage::Text(text.into())).await.is_err() {
                break;
            }
        }
        let _ = sink.close().await;
    });
    let mut writer_done = false;

    let mut outcome = Ok(());
    loop {
        let frame = tokio::select! {
            _ = cancel.cancelled() => break,
            _ = &mut writer, if !writer_done => {
                writer_done = true;
                break;
            }
            frame = frames.next() => frame,
        };
        match frame {
            Some(Ok(WsMessage::Text(text))) => {
                if hub.handle_text(&id, text.as_str()).await == PeerAction::Close {
                    break;
                }
            }
            Some(Ok(WsMessage::Close(_))) | None => break,
            Some(Ok(_)) => {}
            Some(Err(e)) => {
                outcome = Err(RelayError::from(e));
                break;
            }
        }
    }

    hub.detach(&id);
    if !writer_done {
        let flushed = tokio::time::timeout(FLUSH_TIMEOUT, &mut writer).await;
        if flushed.is_err() {
            writer.abort();
        }
    }
    info!(peer_id = %id, "Bridge peer disconnected");
    outcome
}
