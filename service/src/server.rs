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


//! Relay server
//!
//! The RelayServer is the main entry point of the service. It binds every
//! endpoint, owns the shared state and runs the accept loop, the
//! duplicate-name arbiter, the heartbeat reaper and the bridge.

use crate::{
    BridgeHub, BridgeServer, BroadcastResult, ConnectionManager, DuplicateNameArbiter,
    HeartbeatReaper, MessageDistributor, Relay, RelayError, Result, ServerConfig, ServerHandler,
    ServerMetrics, ServerSnapshot, SessionId, SessionRegistry, WorkerConfig,
};
use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};
use tokio::net::TcpListener;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Chat relay server
///
/// # Example
///
/// ```no_run
/// use chatrelay_service::{NoopHandler, RelayServer, ServerConfig};
/// use std::sync::Arc;
///
/// #[tokio::main]
/// async fn main() -> Result<(), Box<dyn std::error::Error>> {
///     let server = RelayServer::new(ServerConfig::default()).await?;
///     server.start(Arc::new(NoopHandler)).await?;
///
///     tokio::signal::ctrl_c().await?;
///     server.shutdown().await?;
///     Ok(())
/// }
/// ```
pub struct RelayServer {
    config: ServerConfig,
    registry: Arc<SessionRegistry>,
    distributor: Arc<MessageDistributor>,
    relay: Arc<Relay>,
    manager: Arc<ConnectionManager>,
    metrics: Arc<ServerMetrics>,
    /// Endpoints bound by `new`, handed to their tasks by `start`
    endpoints: Mutex<Option<Endpoints>>,
    bridge_hub: Option<Arc<BridgeHub>>,
    relay_address: SocketAddr,
    query_address: SocketAddr,
    bridge_address: Option<SocketAddr>,
    started_at: Instant,
    running: AtomicBool,
    cancel: CancellationToken,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

struct Endpoints {
    listener: TcpListener,
    arbiter: DuplicateNameArbiter,
    bridge: Option<BridgeServer>,
}

impl RelayServer {
    /// Create a server with the given configuration
    ///
    /// This validates the configuration and binds every endpoint but does
    /// not start serving. Call `start()` to begin accepting connections.
    pub async fn new(config: ServerConfig) -> Result<Self> {
        config.validate()?;

        let cancel = CancellationToken::new();
        let metrics = Arc::new(ServerMetrics::new());
        let registry = Arc::new(SessionRegistry::new());
        let distributor = Arc::new(MessageDistributor::new(cancel.child_token()));
        let relay = Arc::new(Relay::new(
            registry.clone(),
            distributor.clone(),
            metrics.clone(),
            config.write_timeout,
        ));

        let worker_config = WorkerConfig {
            write_timeout: config.write_timeout,
            control_buffer_size: 100,
        };
        let manager = Arc::new(ConnectionManager::new(
            relay.clone(),
            metrics.clone(),
            worker_config,
            config.max_frame_length,
        ));

        let listener = TcpListener::bind(config.relay_address).await?;
        let relay_address = listener.local_addr()?;
        let arbiter = DuplicateNameArbiter::bind(
            config.query_address,
            registry.clone(),
            metrics.clone(),
            config.rebind_backoff,
        )
        .await?;
        let query_address = arbiter.local_addr();
        let bridge = match config.bridge_address {
            Some(address) => {
                let capacity = config.bridge_queue_capacity;
                Some(BridgeServer::bind(address, relay.clone(), capacity).await?)
            }
            None => None,
        };
        let bridge_address = bridge.as_ref().map(BridgeServer::local_addr);
        let bridge_hub = bridge.as_ref().map(|bridge| bridge.hub().clone());

        info!(
            relay = %relay_address,
            query = %query_address,
            bridge = ?bridge_address,
            "Relay server bound"
        );

        Ok(Self {
            config,
            registry,
            distributor,
            relay,
            manager,
            metrics,
            endpoints: Mutex::new(Some(Endpoints {
                listener,
                arbiter,
                bridge,
            })),
            bridge_hub,
            relay_address,
            query_address,
            bridge_address,
            started_at: Instant::now(),
            running: AtomicBool::new(false),
            cancel,
            tasks: Mutex::new(Vec::new()),
        })
    }

    /// Start serving with the given handler
    ///
    /// This spawns the accept loop, the arbiter, the reaper and the bridge.
    /// A server that was shut down cannot be started again.
    pub async fn start(&self, handler: Arc<dyn ServerHandler>) -> Result<()> {
        if self.running.swap(true, Ordering::SeqCst) {
            return Err(RelayError::ServerAlreadyRunning);
        }
        let Some(endpoints) = self.endpoints.lock().await.take() else {
            self.running.store(false, Ordering::SeqCst);
            return Err(RelayError::Other("Server was already shut down".to_string()));
        };

        info!(relay = %self.relay_address, "Starting relay server");

        let mut tasks = self.tasks.lock().await;
        tasks.push(self.spawn_accept_loop(endpoints.listener, handler));
        tasks.push(endpoints.arbiter.spawn(self.cancel.child_token()));
        tasks.push(
            HeartbeatReaper::new(
                self.relay.clone(),
                self.metrics.clone(),
                self.config.heartbeat_interval,
                self.config.liveness_threshold,
            )
            .spawn(self.cancel.child_token()),
        );
        if let Some(bridge) = endpoints.bridge {
            tasks.push(bridge.spawn(self.cancel.child_token()));
        }
        Ok(())
    }

    fn spawn_accept_loop(
        &self,
        listener: TcpListener,
        handler: Arc<dyn ServerHandler>,
    ) -> JoinHandle<()> {
        let manager = self.manager.clone();
        let metrics = self.metrics.clone();
        let max_connections = self.config.max_connections;
        let cancel = self.cancel.child_token();

        tokio::spawn(async move {
            loop {
                let accepted = tokio::select! {
                    _ = cancel.cancelled() => break,
                    accepted = listener.accept() => accepted,
                };

                match accepted {
                    Ok((socket, peer_addr)) => {
                        debug!(peer = %peer_addr, "Accepted connection");

                        if manager.connection_count() >= max_connections {
                            warn!(
                                limit = max_connections,
                                peer = %peer_addr,
                                "Connection limit reached, rejecting connection"
                            );
                            metrics.connection_error();
                            drop(socket);
                            continue;
                        }

                        match manager.add_connection(socket, handler.clone()) {
                            Ok(id) => {
                                info!(
                                    connection_id = %id,
                                    peer = %peer_addr,
                                    "Connection established"
                                );
                            }
                            Err(e) => {
                                error!(peer = %peer_addr, error = %e, "Failed to add connection");
                                metrics.connection_error();
                            }
                        }
                    }
                    Err(e) => {
                        error!(error = %e, "Failed to accept connection");
                        metrics.connection_error();

                        // Back off on errors to avoid tight loop
                        tokio::time::sleep(Duration::from_millis(100)).await;
                    }
                }
            }

            info!("Accept loop terminated");
        })
    }

    /// Stop the server
    ///
    /// Stops accepting, cancels the background tasks, aborts every
    /// connection worker without draining and clears the registry.
    pub async fn shutdown(&self) -> Result<()> {
        if !self.running.swap(false, Ordering::SeqCst) {
            return Err(RelayError::ServerNotRunning);
        }

        info!("Shutting down relay server");
        self.cancel.cancel();

        for handle in self.tasks.lock().await.drain(..) {
            let _ = tokio::time::timeout(Duration::from_secs(5), handle).await;
        }

        self.manager.shutdown().await;
        let dropped = self.registry.clear();
        debug!(sessions = dropped.len(), "Registry cleared");

        info!("Relay server shutdown complete");
        Ok(())
    }

    /// Say goodbye to every session and close it
    ///
    /// Returns the number of sessions disconnected.
    pub async fn disconnect_all(&self) -> usize {
        self.relay.disconnect_all().await
    }

    /// Send a server notice to one session, or to every session
    pub async fn send_notice(
        &self,
        text: &str,
        target: Option<&SessionId>,
    ) -> Result<BroadcastResult> {
        self.relay.send_notice(text, target).await
    }

    /// Check if the server is running
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Bound TCP relay address
    pub fn relay_address(&self) -> SocketAddr {
        self.relay_address
    }

    /// Bound UDP query address
    pub fn query_address(&self) -> SocketAddr {
        self.query_address
    }

    /// Bound WebSocket bridge address, if the bridge is enabled
    pub fn bridge_address(&self) -> Option<SocketAddr> {
        self.bridge_address
    }

    /// Number of connected bridge peers
    pub fn bridge_peer_count(&self) -> usize {
        self.bridge_hub.as_ref().map_or(0, |hub| hub.peer_count())
    }

    /// Get a snapshot of the server state
    pub fn snapshot(&self) -> ServerSnapshot {
        ServerSnapshot {
            open_connections: self.manager.connection_count(),
            registered_sessions: self.registry.len(),
            total_connections: self.metrics.total_connections(),
            relay_address: self.relay_address,
            query_address: self.query_address,
            bridge_address: self.bridge_address,
            uptime: self.started_at.elapsed(),
        }
    }

    /// Get the server metrics
    pub fn metrics(&self) -> Arc<ServerMetrics> {
        self.metrics.clone()
    }

    /// Get the session registry
    pub fn registry(&self) -> Arc<SessionRegistry> {
        self.registry.clone()
    }

    /// Get the message distributor
    pub fn distributor(&self) -> Arc<MessageDistributor> {
        self.distributor.clone()
    }

    /// Get the routing core
    pub fn relay(&self) -> Arc<Relay> {
        self.relay.clone()
    }

    /// Get the connection manager
    pub fn manager(&self) -> Arc<ConnectionManager> {
        self.manager.clone()
    }

    /// Get the server configuration
    pub fn config(&self) -> &ServerConfig {
        &self.config
    }
}

impl std::fmt::Debug for RelayServer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RelayServer")
            .field("relay_address", &self.relay_address)
            .field("running", &self.is_running())
            .field("sessions", &self.registry.len())
            .field("uptime", &self.started_at.elapsed())
            .finish()
    }
}

impl Drop for RelayServer {
    fn drop(&mut self) {
        if self.running.load(Ordering::SeqCst) {
            warn!("RelayServer dropped while still running");
            self.running.store(false, Ordering::SeqCst);
            self.cancel.cancel();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::NoopHandler;

    #[tokio::test]
    async fn test_server_lifecycle() {
        let server = RelayServer::new(ServerConfig::ephemeral()).await.unwrap();
        assert!(!server.is_running());

        server.start(Arc::new(NoopHandler)).await.unwrap();
        assert!(server.is_running());
        assert!(server.distributor().is_running());

        server.shutdown().await.unwrap();
        assert!(!server.is_running());
        assert!(!server.distributor().is_running());
    }

    #[tokio::test]
    async fn test_server_snapshot() {
        let server = RelayServer::new(ServerConfig::ephemeral()).await.unwrap();
        let snapshot = server.snapshot();

        assert_eq!(snapshot.open_connections, 0);
        assert_eq!(snapshot.registered_sessions, 0);
        assert_eq!(snapshot.total_connections, 0);
        assert_eq!(snapshot.relay_address, server.relay_address());
        assert_ne!(snapshot.relay_address.port(), 0);
        assert!(snapshot.bridge_address.is_some());
    }

    #[tokio::test]
    async fn test_server_double_start() {
        let server = RelayServer::new(ServerConfig::ephemeral()).await.unwrap();
        server.start(Arc::new(NoopHandler)).await.unwrap();

        let result = server.start(Arc::new(NoopHandler)).await;
        assert!(matches!(result, Err(RelayError::ServerAlreadyRunning)));

        server.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn test_server_shutdown_when_stopped() {
        let server = RelayServer::new(ServerConfig::ephemeral()).await.unwrap();
        assert!(matches!(
            server.shutdown().await,
            Err(RelayError::ServerNotRunning)
        ));
    }

    #[tokio::test]
    async fn test_server_cannot_restart() {
        let server = RelayServer::new(ServerConfig::ephemeral()).await.unwrap();
        server.start(Arc::new(NoopHandler)).await.unwrap();
        server.shutdown().await.unwrap();

        assert!(server.start(Arc::new(NoopHandler)).await.is_err());
        assert!(!server.is_running());
    }

    #[tokio::test]
    async fn test_server_rejects_invalid_config() {
        let config = ServerConfig::ephemeral().with_max_connections(0);
        assert!(matches!(
            RelayServer::new(config).await,
            Err(RelayError::InvalidConfig(_))
        ));
    }

    #[tokio::test]
    async fn test_server_without_bridge() {
        let server = RelayServer::new(ServerConfig::ephemeral().without_bridge())
            .await
            .unwrap();
        assert_eq!(server.bridge_address(), None);
        assert_eq!(server.bridge_peer_count(), 0);
    }
}
