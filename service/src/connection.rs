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


//! Relay connection implementation

use crate::{ConnectionId, RelayError, Result};
use async_trait::async_trait;
use chatrelay_protocol::RelayCodec;
use futures_util::{SinkExt, StreamExt};
use metrics::{counter, gauge, histogram};
use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;
use tokio::net::TcpStream;
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::sync::Mutex;
use tokio_util::codec::{FramedRead, FramedWrite};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, trace};

/// Write side of a session, as seen by the registry and the relay.
///
/// Implementations must be cheap to share; the relay holds them behind an
/// `Arc` and writes to them from many tasks.
#[async_trait]
pub trait Transport: Send + Sync + 'static {
    /// Connection this transport writes to
    fn connection_id(&self) -> ConnectionId;

    /// Remote address, when the transport has one
    fn remote_addr(&self) -> Option<SocketAddr> {
        None
    }

    /// Write one frame to the peer
    async fn send_text(&self, frame: &str) -> Result<()>;

    /// Close the transport. Closing twice is a no-op.
    async fn close(&self);

    /// Whether `close` has been called
    fn is_closed(&self) -> bool;
}

/// The write half of an accepted relay socket.
///
/// Cloning is cheap and every clone shares the same writer. The matching
/// [`RelayReader`] is owned by the connection worker.
#[derive(Clone)]
pub struct RelayConnection {
    writer: Arc<Mutex<FramedWrite<OwnedWriteHalf, RelayCodec>>>,
    id: ConnectionId,
    peer_addr: SocketAddr,
    created_at: Instant,
    closed: CancellationToken,
    frames_sent: Arc<AtomicU64>,
    frames_received: Arc<AtomicU64>,
}

/// The read half of an accepted relay socket
pub struct RelayReader {
    reader: FramedRead<OwnedReadHalf, RelayCodec>,
    id: ConnectionId,
    closed: CancellationToken,
    frames_received: Arc<AtomicU64>,
}

impl RelayConnection {
    /// Split a TCP stream into a shared writer and an exclusive reader
    #[instrument(skip(socket), fields(connection_id = %id))]
    pub fn wrap(
        socket: TcpStream,
        id: ConnectionId,
        max_frame_length: usize,
    ) -> Result<(Self, RelayReader)> {
        let peer_addr = socket.peer_addr()?;
        socket.set_nodelay(true)?;

        info!(peer_addr = %peer_addr, "Creating new relay connection");

        counter!("chatrelay.connections.total").increment(1);
        gauge!("chatrelay.connections.active").increment(1.0);

        let (read_half, write_half) = socket.into_split();
        let closed = CancellationToken::new();
        let frames_received = Arc::new(AtomicU64::new(0));

        let connection = Self {
            writer: Arc::new(Mutex::new(FramedWrite::new(
                write_half,
                RelayCodec::with_max_length(max_frame_length),
            ))),
            id,
            peer_addr,
            created_at: Instant::now(),
            closed: closed.clone(),
            frames_sent: Arc::new(AtomicU64::new(0)),
            frames_received: frames_received.clone(),
        };
        let reader = RelayReader {
            reader: FramedRead::new(read_half, RelayCodec::with_max_length(max_frame_length)),
            id,
            closed,
            frames_received,
        };

        Ok((connection, reader))
    }

    /// Get the connection ID
    pub fn id(&self) -> ConnectionId {
        self.id
    }

    /// Get the peer address
    pub fn peer_addr(&self) -> SocketAddr {
        self.peer_addr
    }

    /// Get when the connection was accepted
    pub fn created_at(&self) -> Instant {
        self.created_at
    }

    /// Get frames sent
    pub fn frames_sent(&self) -> u64 {
        self.frames_sent.load(Ordering::Relaxed)
    }

    /// Get frames received
    pub fn frames_received(&self) -> u64 {
        self.frames_received.load(Ordering::Relaxed)
    }

    /// Token cancelled when the connection is closed
    pub fn closed_token(&self) -> CancellationToken {
        self.closed.clone()
    }
}

#[async_trait]
impl Transport for RelayConnection {
    fn connection_id(&self) -> ConnectionId {
        self.id
    }

    fn remote_addr(&self) -> Option<SocketAddr> {
        Some(self.peer_addr)
    }

    #[instrument(skip(self, frame), fields(connection_id = %self.id))]
    async fn send_text(&self, frame: &str) -> Result<()> {
        if self.closed.is_cancelled() {
            return Err(RelayError::ConnectionClosed);
        }
        trace!("Sending frame");
        let start = Instant::now();

        match self.writer.lock().await.send(frame).await {
            Ok(()) => {
                self.frames_sent.fetch_add(1, Ordering::Relaxed);
                counter!("chatrelay.frames.sent").increment(1);
                histogram!("chatrelay.frame.send_duration").record(start.elapsed().as_secs_f64());
                Ok(())
            }
            Err(e) => {
                counter!("chatrelay.errors.send").increment(1);
                error!(error = %e, "Failed to send frame");
                Err(e.into())
            }
        }
    }

    #[instrument(skip(self), fields(connection_id = %self.id))]
    async fn close(&self) {
        if self.closed.is_cancelled() {
            return;
        }
        self.closed.cancel();
        gauge!("chatrelay.connections.active").decrement(1.0);
        let mut writer = self.writer.lock().await;
        if let Err(e) = SinkExt::<&str>::close(&mut *writer).await {
            debug!(error = %e, "Error shutting down write half");
        }
        debug!("Connection closed");
    }

    fn is_closed(&self) -> bool {
        self.closed.is_cancelled()
    }
}

impl RelayReader {
    /// Receive the next frame
    ///
    /// Returns `Ok(None)` when the peer closed the stream or the connection
    /// was closed locally.
    #[instrument(skip(self), fields(connection_id = %self.id))]
    pub async fn next(&mut self) -> Result<Option<String>> {
        let frame = tokio::select! {
            frame = self.reader.next() => frame,
            _ = self.closed.cancelled() => return Ok(None),
        };
        match frame {
            Some(Ok(frame)) => {
                self.frames_received.fetch_add(1, Ordering::Relaxed);
                counter!("chatrelay.frames.received").increment(1);
                trace!(length = frame.len(), "Frame received");
                Ok(Some(frame))
            }
            Some(Err(e)) => {
                counter!("chatrelay.errors.receive").increment(1);
                error!(error = %e, "Error receiving frame");
                Err(e.into())
            }
            None => {
                debug!("Connection stream ended");
                Ok(None)
            }
        }
    }

    /// Over-long frames dropped by the codec so far
    pub fn discarded_frames(&self) -> u64 {
        self.reader.decoder().discarded_frames()
    }
}

impl std::fmt::Debug for RelayConnection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RelayConnection")
            .field("id", &self.id)
            .field("peer_addr", &self.peer_addr)
            .field("closed", &self.is_closed())
            .finish()
    }
}

impl std::fmt::Debug for RelayReader {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RelayReader").field("id", &self.id).finish()
    }
}
