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


//! Session-state handling and routing
//!
//! [`Relay`] turns one decoded frame from a connection into registry
//! changes, writes to other sessions and display lines for the
//! distributor. It is shared by every connection worker, the heartbeat
//! reaper and the bridge.

use crate::{
    ConnectionId, ConnectionState, MessageDistributor, RelayError, Result, ServerMetrics, Session,
    SessionId, SessionRegistry, Transport,
};
use chatrelay_protocol::consts::{NAME_DUPLICATED, SERVER_SENDER};
use chatrelay_protocol::{ChatText, Message, display_line};
use metrics::counter;
use std::sync::{Arc, OnceLock, Weak};
use std::time::Duration;
use tokio::time::timeout;
use tracing::{debug, info, warn};

/// Result of a broadcast operation
#[derive(Debug, Clone, Default)]
pub struct BroadcastResult {
    /// Total number of sessions attempted
    pub total: usize,
    /// Number of successful sends
    pub succeeded: usize,
    /// Number of failed sends
    pub failed: usize,
    /// Errors that occurred (session and error message)
    pub errors: Vec<(SessionId, String)>,
}

impl BroadcastResult {
    /// Check if all sends succeeded
    pub fn all_succeeded(&self) -> bool {
        self.failed == 0
    }

}

/// Recipients that share the name space but are not registry sessions
///
/// The WebSocket bridge implements this so TCP clients can reach its peers
/// by nickname.
pub trait PeerDirectory: Send + Sync + 'static {
    /// Queue `frame` for the peer using `name`
    ///
    /// Returns `false` if no such peer exists or it could not take the frame.
    fn deliver_to(&self, name: &str, frame: &str) -> bool;
}

/// Display line for a completed registration
pub fn connected_line(id: &SessionId, name: &str) -> String {
    format!("Client: {id} ({name}) Connected.")
}

/// Display line for a session that went away
pub fn disconnected_line(id: &SessionId) -> String {
    format!("Client: {id} Disconnected.")
}

/// Routing core shared by every transport
pub struct Relay {
    registry: Arc<SessionRegistry>,
    distributor: Arc<MessageDistributor>,
    metrics: Arc<ServerMetrics>,
    write_timeout: Duration,
    peers: OnceLock<Weak<dyn PeerDirectory>>,
}

impl Relay {
    /// Create a relay over shared state
    pub fn new(
        registry: Arc<SessionRegistry>,
        distributor: Arc<MessageDistributor>,
        metrics: Arc<ServerMetrics>,
        write_timeout: Duration,
    ) -> Self {
        Self {
            registry,
            distributor,
            metrics,
            write_timeout,
            peers: OnceLock::new(),
        }
    }

    /// Let private messages fall back to `directory` for unknown names
    ///
    /// Only the first directory is kept; returns `false` if one was already set.
    pub fn set_peer_directory(&self, directory: &Arc<dyn PeerDirectory>) -> bool {
        self.peers.set(Arc::downgrade(directory)).is_ok()
    }

    /// The session registry
    pub fn registry(&self) -> &Arc<SessionRegistry> {
        &self.registry
    }

    /// The message distributor
    pub fn distributor(&self) -> &Arc<MessageDistributor> {
        &self.distributor
    }

    /// Publish a line, logging instead of failing when the distributor stopped
    pub fn publish(&self, line: impl Into<String>) {
        if let Err(e) = self.distributor.publish(line) {
            debug!(error = %e, "Dropping display line");
        }
    }

    /// Handle one frame received on `origin` while in `state`
    pub async fn dispatch(
        &self,
        origin: &Arc<dyn Transport>,
        state: ConnectionState,
        raw: &str,
    ) -> ConnectionState {
        self.metrics.frame_received();
        let message = match Message::parse(raw) {
            Ok(message) => message,
            Err(e) => {
                self.metrics.malformed_frame();
                counter!("chatrelay.frames.malformed").increment(1);
                debug!(
                    connection_id = %origin.connection_id(),
                    error = %e,
                    "Ignoring malformed frame"
                );
                return state;
            }
        };

        match state {
            ConnectionState::Accepted | ConnectionState::AwaitingRegister => {
                self.dispatch_unregistered(origin, message).await
            }
            ConnectionState::Active => self.dispatch_active(origin, message).await,
            ConnectionState::Closed => state,
        }
    }

    async fn dispatch_unregistered(
        &self,
        origin: &Arc<dyn Transport>,
        message: Message,
    ) -> ConnectionState {
        let Message::Register { uuid, name } = message else {
            debug!(
                connection_id = %origin.connection_id(),
                kind = %message.kind(),
                "Ignoring message before registration"
            );
            return ConnectionState::AwaitingRegister;
        };

        let id = SessionId::new(uuid);
        if self.registry.register(id.clone(), &name, origin.clone()) {
            self.metrics.session_registered();
            self.publish(connected_line(&id, &name));
            ConnectionState::Active
        } else {
            self.metrics.registration_rejected();
            info!(session_id = %id, name, "Registration rejected, name or id taken");
            if let Err(e) = self.write(origin, NAME_DUPLICATED).await {
                warn!(
                    connection_id = %origin.connection_id(),
                    error = %e,
                    "Failed to reject registration"
                );
            }
            ConnectionState::AwaitingRegister
        }
    }

    async fn dispatch_active(
        &self,
        origin: &Arc<dyn Transport>,
        message: Message,
    ) -> ConnectionState {
        let active = ConnectionState::Active;
        match message {
            Message::Incoming { uuid, text } => {
                let id = SessionId::new(uuid);
                if let Some(sender) = self.owned_session(origin, &id) {
                    self.route(&sender, &text).await;
                }
                active
            }
            // Any connection may end any session; only its own ending closes it.
            Message::Logoff { uuid } => {
                let id = SessionId::new(uuid);
                let own = |session: &Session| {
                    session.transport().connection_id() == origin.connection_id()
                };
                match self.disconnect(&id).await {
                    Ok(session) if own(&session) => ConnectionState::Closed,
                    Ok(session) => {
                        info!(
                            connection_id = %origin.connection_id(),
                            session_id = %session.id(),
                            "Session logged off by another connection"
                        );
                        active
                    }
                    Err(_) => {
                        debug!(session_id = %id, "Logoff for unknown session");
                        active
                    }
                }
            }
            Message::Debug => {
                info!(sessions = ?self.registry.snapshot(), "Registry snapshot");
                active
            }
            Message::KeepAlive { uuid } => {
                let id = SessionId::new(uuid);
                if !self.registry.touch_liveness(&id, crate::types::epoch_millis()) {
                    debug!(session_id = %id, "Keep-alive for unknown session");
                }
                active
            }
            other => {
                debug!(kind = %other.kind(), "Ignoring message on active connection");
                active
            }
        }
    }

    /// The session `id`, provided it is bound to `origin`
    fn owned_session(&self, origin: &Arc<dyn Transport>, id: &SessionId) -> Option<Session> {
        let session = self.registry.lookup(id)?;
        if session.transport().connection_id() == origin.connection_id() {
            Some(session)
        } else {
            warn!(
                connection_id = %origin.connection_id(),
                session_id = %id,
                "Frame names a session owned by another connection"
            );
            None
        }
    }

    /// Route chat text from a registered sender
    ///
    /// Broadcasts are published as `Name: text`; private messages stay
    /// between sender and target.
    async fn route(&self, sender: &Session, text: &str) {
        match ChatText::parse(text) {
            ChatText::Private { target, payload } => {
                match self.send_private(sender.name(), target, payload).await {
                    Ok(true) => {}
                    Ok(false) => self.notify_invalid_username(sender.transport(), target).await,
                    Err(e) => {
                        warn!(target, error = %e, "Failed to deliver private message");
                    }
                }
            }
            ChatText::Broadcast(text) => {
                let frame = Message::incoming(sender.name(), text).to_string();
                let result = self.broadcast(&frame, Some(sender.id())).await;
                if !result.all_succeeded() {
                    debug!(failed = result.failed, "Broadcast partially failed");
                }
                self.publish(display_line(sender.name(), text));
            }
        }
    }

    /// Deliver a private message to whoever uses the name `target`
    ///
    /// Registry sessions are tried first, then the peer directory. Returns
    /// `Ok(false)` if nobody has that name.
    pub async fn send_private(&self, sender: &str, target: &str, payload: &str) -> Result<bool> {
        let frame = Message::private(sender, target, payload).to_string();
        let session = self
            .registry
            .find_by_name(target)
            .and_then(|id| self.registry.lookup(&id));

        let delivered = match session {
            Some(session) => {
                self.write(session.transport(), &frame).await?;
                true
            }
            None => self
                .peers
                .get()
                .and_then(Weak::upgrade)
                .is_some_and(|peers| peers.deliver_to(target, &frame)),
        };
        if delivered {
            counter!("chatrelay.messages.private").increment(1);
        }
        Ok(delivered)
    }

    /// Tell a sender its private-message target does not exist
    pub async fn notify_invalid_username(&self, sender: &Arc<dyn Transport>, target: &str) {
        let notice = Message::server_notice(format!("Invalid username: {target}")).to_string();
        if let Err(e) = self.write(sender, &notice).await {
            warn!(connection_id = %sender.connection_id(), error = %e, "Failed to send notice");
        }
    }

    /// Write `frame` to every registered session except `except`
    ///
    /// Delivery is best-effort: a failed or timed out write is recorded in
    /// the result and does not affect the other sessions.
    pub async fn broadcast(&self, frame: &str, except: Option<&SessionId>) -> BroadcastResult {
        let targets: Vec<Session> = self
            .registry
            .snapshot()
            .into_iter()
            .filter(|session| Some(session.id()) != except)
            .collect();

        let sends = targets.iter().map(|session| async move {
            (session.id().clone(), self.write(session.transport(), frame).await)
        });
        let results = futures_util::future::join_all(sends).await;

        let mut result = BroadcastResult {
            total: results.len(),
            ..Default::default()
        };
        for (id, outcome) in results {
            match outcome {
                Ok(()) => result.succeeded += 1,
                Err(e) => {
                    warn!(session_id = %id, error = %e, "Broadcast write failed");
                    result.failed += 1;
                    result.errors.push((id, e.to_string()));
                }
            }
        }
        counter!("chatrelay.messages.broadcast").increment(1);
        result
    }

    /// Send a server notice to one session, or to every session
    pub async fn send_notice(
        &self,
        text: &str,
        target: Option<&SessionId>,
    ) -> Result<BroadcastResult> {
        let frame = Message::server_notice(text).to_string();
        match target {
            None => Ok(self.broadcast(&frame, None).await),
            Some(id) => {
                let session = self
                    .registry
                    .lookup(id)
                    .ok_or_else(|| RelayError::SessionNotFound(id.clone()))?;
                self.write(session.transport(), &frame).await?;
                Ok(BroadcastResult {
                    total: 1,
                    succeeded: 1,
                    ..Default::default()
                })
            }
        }
    }

    /// Close a session's transport and remove it from the registry
    pub async fn disconnect(&self, id: &SessionId) -> Result<Session> {
        let session = self
            .registry
            .delete(id)
            .ok_or_else(|| RelayError::SessionNotFound(id.clone()))?;
        session.transport().close().await;
        self.metrics.session_closed();
        self.publish(disconnected_line(id));
        Ok(session)
    }

    /// Remove the session bound to a connection whose read side failed
    pub fn connection_lost(&self, connection: ConnectionId) -> Option<Session> {
        let id = self.registry.find_by_connection(connection)?;
        let session = self.registry.delete(&id)?;
        self.metrics.session_closed();
        info!(
            connection_id = %connection,
            session_id = %id,
            "Session lost with its connection"
        );
        self.publish(disconnected_line(&id));
        Some(session)
    }

    /// Tell every session the server is going away, close them, clear the registry
    pub async fn disconnect_all(&self) -> usize {
        let farewell = Message::logoff(SERVER_SENDER).to_string();
        let sessions = self.registry.clear();
        let closes = sessions.iter().map(|session| {
            let farewell = farewell.as_str();
            async move {
                if let Err(e) = self.write(session.transport(), farewell).await {
                    debug!(session_id = %session.id(), error = %e, "Farewell not delivered");
                }
                session.transport().close().await;
            }
        });
        futures_util::future::join_all(closes).await;
        info!(count = sessions.len(), "Disconnected all sessions");
        sessions.len()
    }

    async fn write(&self, transport: &Arc<dyn Transport>, frame: &str) -> Result<()> {
        match timeout(self.write_timeout, transport.send_text(frame)).await {
            Ok(Ok(())) => {
                self.metrics.frame_sent();
                Ok(())
            }
            Ok(Err(e)) => {
                self.metrics.send_failure();
                Err(e)
            }
            Err(_) => {
                self.metrics.send_failure();
                Err(RelayError::Timeout)
            }
        }
    }
}

impl std::fmt::Debug for Relay {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Relay")
            .field("sessions", &self.registry.len())
            .field("write_timeout", &self.write_timeout)
            .finish()
    }
}
