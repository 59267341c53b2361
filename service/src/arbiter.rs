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


//! Duplicate-name arbiter
//!
//! A UDP side channel answering "is this name taken" before a client
//! commits to a name over TCP. Each request is one USERNAME_QUERY datagram
//! and each answer one sentinel datagram.

use crate::{Result, ServerMetrics, SessionRegistry};
use chatrelay_protocol::consts::{MAX_FRAME_LENGTH, NAME_CLEAR, NAME_DUPLICATED};
use chatrelay_protocol::Message;
use metrics::counter;
use std::io;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::UdpSocket;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Compute the reply to one query datagram
///
/// Returns `None` for anything that is not a well-formed USERNAME_QUERY.
pub fn answer(registry: &SessionRegistry, request: &str) -> Option<&'static str> {
    match Message::parse(request.trim_end_matches(['\r', '\n'])) {
        Ok(Message::UsernameQuery { name }) if registry.contains_name(&name) => {
            Some(NAME_DUPLICATED)
        }
        Ok(Message::UsernameQuery { .. }) => Some(NAME_CLEAR),
        _ => None,
    }
}

/// Errors after which the socket is dropped and bound again
fn is_fatal(e: &io::Error) -> bool {
    matches!(
        e.kind(),
        io::ErrorKind::NotConnected
            | io::ErrorKind::BrokenPipe
            | io::ErrorKind::AddrNotAvailable
            | io::ErrorKind::PermissionDenied
            | io::ErrorKind::Unsupported
    )
}

/// UDP request/response loop over the session registry
pub struct DuplicateNameArbiter {
    socket: UdpSocket,
    address: SocketAddr,
    registry: Arc<SessionRegistry>,
    metrics: Arc<ServerMetrics>,
    backoff: Duration,
}

impl DuplicateNameArbiter {
    /// Bind the query endpoint
    pub async fn bind(
        address: SocketAddr,
        registry: Arc<SessionRegistry>,
        metrics: Arc<ServerMetrics>,
        backoff: Duration,
    ) -> Result<Self> {
        let socket = UdpSocket::bind(address).await?;
        let address = socket.local_addr()?;
        info!(address = %address, "Duplicate-name arbiter bound");
        Ok(Self {
            socket,
            address,
            registry,
            metrics,
            backoff,
        })
    }

    /// Actual bound address
    pub fn local_addr(&self) -> SocketAddr {
        self.address
    }

    /// Run the loop on its own task until `cancel` fires
    pub fn spawn(self, cancel: CancellationToken) -> JoinHandle<()> {
        tokio::spawn(self.run(cancel))
    }

    async fn run(mut self, cancel: CancellationToken) {
        let mut buffer = vec![0u8; MAX_FRAME_LENGTH];
        loop {
            let received = tokio::select! {
                _ = cancel.cancelled() => break,
                received = self.socket.recv_from(&mut buffer) => received,
            };

            match received {
                Ok((length, peer)) => {
                    let request = String::from_utf8_lossy(&buffer[..length]);
                    let Some(reply) = answer(&self.registry, &request) else {
                        debug!(peer = %peer, "Ignoring non-query datagram");
                        continue;
                    };
                    self.metrics.query_answered();
                    counter!("chatrelay.queries.answered").increment(1);
                    debug!(peer = %peer, reply, "Answering duplicate-name query");
                    if let Err(e) = self.socket.send_to(reply.as_bytes(), peer).await {
                        warn!(peer = %peer, error = %e, "Failed to answer query");
                    }
                }
                Err(e) if is_fatal(&e) => {
                    error!(error = %e, "Query endpoint unusable, re-binding");
                    match self.rebind(&cancel).await {
                        Some(socket) => self.socket = socket,
                        None => break,
                    }
                }
                Err(e) => {
                    warn!(error = %e, "Transient error on query endpoint");
                }
            }
        }
        info!("Duplicate-name arbiter stopped");
    }

    /// Bind a fresh socket on the same address, retrying until cancelled
    async fn rebind(&self, cancel: &CancellationToken) -> Option<UdpSocket> {
        loop {
            tokio::select! {
                _ = cancel.cancelled() => return None,
                _ = tokio::time::sleep(self.backoff) => {}
            }
            match UdpSocket::bind(self.address).await {
                Ok(socket) => {
                    info!(address = %self.address, "Query endpoint re-bound");
                    return Some(socket);
                }
                Err(e) => warn!(address = %self.address, error = %e, "Re-bind failed"),
            }
        }
    }
}

impl std::fmt::Debug for DuplicateNameArbiter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DuplicateNameArbiter")
            .field("address", &self.address)
            .finish()
    }
}
