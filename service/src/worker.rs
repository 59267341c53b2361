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


//! Connection worker implementation
//!
//! The ConnectionWorker drives a single relay connection:
//! - one outstanding read at a time, so frames are handled in order
//! - the register/active/closed state machine
//! - control messages from the manager
//! - session cleanup when the connection ends

use crate::{
    ConnectionId, ConnectionState, Relay, RelayConnection, RelayError, RelayReader, Result,
    ServerHandler, Transport,
};
use std::sync::Arc;
use std::sync::atomic::{AtomicU8, Ordering};
use std::time::Duration;
use tokio::select;
use tokio::sync::mpsc;
use tokio::time::timeout;
use tracing::{debug, warn};

/// Control messages for the worker
#[derive(Debug)]
pub enum ControlMessage {
    /// Close the connection
    Close,
    /// Write a raw frame to the connection
    Send(String),
}

/// Worker configuration
#[derive(Debug, Clone)]
pub struct WorkerConfig {
    /// Write timeout (max time for send operations)
    pub write_timeout: Duration,
    /// Control channel buffer size
    pub control_buffer_size: usize,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            write_timeout: Duration::from_secs(10),
            control_buffer_size: 100,
        }
    }
}

/// Connection worker that manages a single connection's lifecycle
pub struct ConnectionWorker {
    id: ConnectionId,
    connection: RelayConnection,
    transport: Arc<dyn Transport>,
    reader: RelayReader,
    relay: Arc<Relay>,
    handler: Arc<dyn ServerHandler>,
    config: WorkerConfig,
    state: Arc<AtomicU8>,
    control_rx: mpsc::Receiver<ControlMessage>,
}

impl ConnectionWorker {
    /// Create a new connection worker
    pub fn new(
        connection: RelayConnection,
        reader: RelayReader,
        relay: Arc<Relay>,
        handler: Arc<dyn ServerHandler>,
        config: WorkerConfig,
        state: Arc<AtomicU8>,
    ) -> (Self, mpsc::Sender<ControlMessage>) {
        let (control_tx, control_rx) = mpsc::channel(config.control_buffer_size);
        let transport: Arc<dyn Transport> = Arc::new(connection.clone());

        let worker = Self {
            id: connection.id(),
            connection,
            transport,
            reader,
            relay,
            handler,
            config,
            state,
            control_rx,
        };

        (worker, control_tx)
    }

    /// Get the current state
    pub fn state(&self) -> ConnectionState {
        ConnectionState::from_u8(self.state.load(Ordering::Acquire))
    }

    fn set_state(&self, new_state: ConnectionState) {
        self.state.store(new_state.as_u8(), Ordering::Release);
    }

    /// Run the worker until the connection closes
    pub async fn run(mut self) {
        self.set_state(ConnectionState::AwaitingRegister);
        self.handler.on_connect(self.id, &self.connection).await;

        if let Err(e) = self.event_loop().await {
            debug!(connection_id = %self.id, error = %e, "Connection failed");
            self.handler.on_error(self.id, &self.connection, e).await;
        }

        self.cleanup().await;
    }

    async fn event_loop(&mut self) -> Result<()> {
        // Cancelled when the session is ended from elsewhere, e.g. a logoff
        // sent by another connection or the reaper.
        let closed = self.connection.closed_token();
        loop {
            select! {
                _ = closed.cancelled() => return Ok(()),

                frame = self.reader.next() => {
                    match frame? {
                        Some(raw) => {
                            if self.handle_frame(&raw).await.is_terminal() {
                                return Ok(());
                            }
                        }
                        None => return Ok(()),
                    }
                }

                msg = self.control_rx.recv() => {
                    match msg {
                        Some(ControlMessage::Send(frame)) => {
                            let write = self.connection.send_text(&frame);
                            match timeout(self.config.write_timeout, write).await {
                                Ok(Ok(())) => {}
                                Ok(Err(e)) => return Err(e),
                                Err(_) => return Err(RelayError::Timeout),
                            }
                        }
                        Some(ControlMessage::Close) | None => return Ok(()),
                    }
                }
            }
        }
    }

    async fn handle_frame(&self, raw: &str) -> ConnectionState {
        let before = self.state();
        let after = self.relay.dispatch(&self.transport, before, raw).await;
        self.set_state(after);

        if before != ConnectionState::Active && after == ConnectionState::Active {
            let registry = self.relay.registry();
            if let Some(session) = registry.find_by_connection(self.id) {
                let name = registry.name_of(&session).unwrap_or_default();
                self.handler.on_register(self.id, &session, &name).await;
            }
        }
        after
    }

    async fn cleanup(&mut self) {
        if let Some(session) = self.relay.connection_lost(self.id) {
            warn!(
                connection_id = %self.id,
                session_id = %session.id(),
                "Connection ended without logoff"
            );
        }
        self.connection.close().await;
        self.handler.on_disconnect(self.id, &self.connection).await;
        while self.control_rx.try_recv().is_ok() {}
        self.set_state(ConnectionState::Closed);
    }
}

impl std::fmt::Debug for ConnectionWorker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionWorker")
            .field("id", &self.id)
            .field("state", &self.state())
            .finish()
    }
}
