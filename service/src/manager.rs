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


//! Connection manager implementation
//!
//! The ConnectionManager is responsible for:
//! - Assigning connection ids and wrapping accepted sockets
//! - Spawning and tracking connection workers
//! - Per-connection control (send, close)
//! - Aborting every worker on shutdown

use crate::{
    ConnectionId, ConnectionInfo, ConnectionState, ConnectionWorker, ControlMessage, Relay,
    RelayConnection, RelayError, Result, ServerHandler, ServerMetrics, Transport, WorkerConfig,
};
use dashmap::DashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU8, AtomicU64, Ordering};
use std::time::{Duration, Instant};
use tokio::net::TcpStream;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::debug;

/// Managed connection entry
struct ManagedConnection {
    connection: RelayConnection,
    control_tx: mpsc::Sender<ControlMessage>,
    worker_handle: JoinHandle<()>,
    state: Arc<AtomicU8>,
}

impl ManagedConnection {
    fn state(&self) -> ConnectionState {
        ConnectionState::from_u8(self.state.load(Ordering::Acquire))
    }

    fn info(&self) -> ConnectionInfo {
        ConnectionInfo {
            id: self.connection.id(),
            state: self.state(),
            peer_addr: self.connection.peer_addr(),
            created_at: self.connection.created_at(),
            frames_sent: self.connection.frames_sent(),
            frames_received: self.connection.frames_received(),
        }
    }
}

/// Connection manager
pub struct ConnectionManager {
    connections: Arc<DashMap<ConnectionId, ManagedConnection>>,
    next_id: AtomicU64,
    relay: Arc<Relay>,
    metrics: Arc<ServerMetrics>,
    worker_config: WorkerConfig,
    max_frame_length: usize,
}

impl ConnectionManager {
    /// Create a new connection manager
    pub fn new(
        relay: Arc<Relay>,
        metrics: Arc<ServerMetrics>,
        worker_config: WorkerConfig,
        max_frame_length: usize,
    ) -> Self {
        Self {
            connections: Arc::new(DashMap::new()),
            next_id: AtomicU64::new(1),
            relay,
            metrics,
            worker_config,
            max_frame_length,
        }
    }

    fn next_connection_id(&self) -> ConnectionId {
        ConnectionId::new(self.next_id.fetch_add(1, Ordering::SeqCst))
    }

    /// Adopt an accepted socket
    ///
    /// This wraps the socket, spawns a worker task for it and tracks it
    /// until the worker finishes.
    pub fn add_connection(
        &self,
        socket: TcpStream,
        handler: Arc<dyn ServerHandler>,
    ) -> Result<ConnectionId> {
        let id = self.next_connection_id();
        let (connection, reader) = RelayConnection::wrap(socket, id, self.max_frame_length)?;

        let state = Arc::new(AtomicU8::new(ConnectionState::Accepted.as_u8()));
        let (worker, control_tx) = ConnectionWorker::new(
            connection.clone(),
            reader,
            self.relay.clone(),
            handler,
            self.worker_config.clone(),
            state.clone(),
        );

        // The worker may only start once its entry is in the map, or a fast
        // hangup would remove the entry before it was inserted.
        let (ready_tx, ready_rx) = oneshot::channel::<()>();
        let connections = self.connections.clone();
        let metrics = self.metrics.clone();
        let worker_handle = tokio::spawn(async move {
            if ready_rx.await.is_err() {
                return;
            }
            let start = Instant::now();
            worker.run().await;

            connections.remove(&id);
            metrics.connection_closed(start.elapsed());
        });

        self.connections.insert(
            id,
            ManagedConnection {
                connection,
                control_tx,
                worker_handle,
                state,
            },
        );
        self.metrics.connection_opened();
        let _ = ready_tx.send(());

        Ok(id)
    }

    /// Close a connection and wait for its worker to finish
    pub async fn remove_connection(&self, id: ConnectionId) -> Result<()> {
        let (control_tx, handle) = match self.connections.remove(&id) {
            Some((_, managed)) => (managed.control_tx, managed.worker_handle),
            None => return Err(RelayError::Other(format!("Connection {id} not found"))),
        };
        let _ = control_tx.send(ControlMessage::Close).await;
        let _ = tokio::time::timeout(Duration::from_secs(5), handle).await;
        Ok(())
    }

    /// Queue a raw frame for one connection
    pub async fn send_to_connection(
        &self,
        id: ConnectionId,
        frame: impl Into<String>,
    ) -> Result<()> {
        let control_tx = self
            .connections
            .get(&id)
            .map(|managed| managed.control_tx.clone())
            .ok_or_else(|| RelayError::Other(format!("Connection {id} not found")))?;
        control_tx
            .send(ControlMessage::Send(frame.into()))
            .await
            .map_err(|_| RelayError::ConnectionClosed)
    }

    /// Get connection info
    pub fn get_connection_info(&self, id: ConnectionId) -> Option<ConnectionInfo> {
        self.connections.get(&id).map(|entry| entry.info())
    }

    /// Get all connection IDs
    pub fn get_connection_ids(&self) -> Vec<ConnectionId> {
        self.connections.iter().map(|entry| *entry.key()).collect()
    }

    /// Get the number of open connections
    pub fn connection_count(&self) -> usize {
        self.connections.len()
    }

    /// Abort every worker without draining
    pub async fn shutdown(&self) {
        let ids = self.get_connection_ids();
        for id in ids {
            if let Some((_, managed)) = self.connections.remove(&id) {
                managed.worker_handle.abort();
                managed.connection.close().await;
                self.metrics.connection_closed(managed.connection.created_at().elapsed());
            }
        }
        debug!("All connection workers aborted");
    }
}

impl std::fmt::Debug for ConnectionManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionManager")
            .field("connection_count", &self.connection_count())
            .field("next_id", &self.next_id.load(Ordering::Relaxed))
            .finish()
    }
}
