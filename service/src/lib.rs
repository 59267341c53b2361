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


//! Chat Relay Service
//!
//! This crate provides the server side of the chat relay: a TCP relay
//! speaking the line protocol of `chatrelay-protocol`, a UDP endpoint
//! answering duplicate-name queries, a WebSocket bridge for browser peers
//! and a heartbeat reaper evicting silent sessions.
//!
//! # Architecture
//!
//! ```text
//! RelayServer
//!     ↓
//! ConnectionManager ─── DuplicateNameArbiter (UDP)
//!     ↓                 HeartbeatReaper
//! ConnectionWorker      BridgeServer (WebSocket)
//!     ↓                     ↓
//! Relay ──→ SessionRegistry, MessageDistributor ──→ Subscribers
//! ```
//!
//! Every transport funnels into the [`Relay`], which owns routing. Display
//! lines describing what happened are pushed through the
//! [`MessageDistributor`] to every registered [`Subscriber`].
//!
//! # Example
//!
//! ```no_run
//! use chatrelay_service::{CallbackSubscriber, NoopHandler, RelayServer, ServerConfig};
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let server = RelayServer::new(ServerConfig::default()).await?;
//!     server
//!         .distributor()
//!         .register_subscriber(Arc::new(CallbackSubscriber::new(|line: &str| {
//!             println!("{line}");
//!         })));
//!     server.start(Arc::new(NoopHandler)).await?;
//!     tokio::signal::ctrl_c().await?;
//!     server.shutdown().await?;
//!     Ok(())
//! }
//! ```

mod arbiter;
mod bridge;
mod config;
mod connection;
mod distributor;
mod error;
mod handler;
mod manager;
mod metrics;
mod reaper;
mod registry;
mod relay;
mod server;
mod types;
mod worker;

pub use arbiter::{DuplicateNameArbiter, answer};
pub use bridge::{BridgeHub, BridgeServer, PeerAction};
pub use config::ServerConfig;
pub use connection::{RelayConnection, RelayReader, Transport};
pub use distributor::{CallbackSubscriber, MessageDistributor, Subscriber, SubscriberId};
pub use error::{RelayError, Result};
pub use handler::{NoopHandler, ServerHandler};
pub use manager::ConnectionManager;
pub use metrics::{MetricsSnapshot, ServerMetrics};
pub use reaper::HeartbeatReaper;
pub use registry::{Session, SessionRegistry};
pub use relay::{
    BroadcastResult, PeerDirectory, Relay, connected_line, disconnected_line,
};
pub use server::RelayServer;
pub use types::{
    ConnectionId, ConnectionInfo, ConnectionState, ServerSnapshot, SessionId, epoch_millis,
};
pub use worker::{ConnectionWorker, ControlMessage, WorkerConfig};
