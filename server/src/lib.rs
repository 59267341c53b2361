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


//! # Chat Relay Server
//!
//! Headless daemon around [`RelayServer`]. Configuration comes from
//! [`ServerConfig::default`] with `CHATRELAY_*` environment overrides (see
//! [`settings`]); relayed lines are printed to standard output and
//! connection events are logged through `tracing`.
//!
//! ```no_run
//! use chatrelay_server::{console_subscriber, run, settings};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = settings::config_from_env()?;
//!     run(config, console_subscriber(), async {
//!         let _ = tokio::signal::ctrl_c().await;
//!     })
//!     .await?;
//!     Ok(())
//! }
//! ```

mod console;
pub mod settings;

pub use console::{LoggingHandler, console_subscriber};

use chatrelay_service::{RelayServer, Result, ServerConfig, Subscriber};
use std::future::Future;
use std::sync::Arc;
use tracing::info;

/// Bind every endpoint, attach `console` to the distributor and start serving
pub async fn launch(config: ServerConfig, console: Arc<dyn Subscriber>) -> Result<RelayServer> {
    let server = RelayServer::new(config).await?;
    server.distributor().register_subscriber(console);
    server.start(Arc::new(LoggingHandler)).await?;

    info!(
        relay = %server.relay_address(),
        query = %server.query_address(),
        bridge = ?server.bridge_address(),
        "Chat relay running"
    );
    Ok(server)
}

/// Serve until `shutdown` completes, then stop gracefully
pub async fn run(
    config: ServerConfig,
    console: Arc<dyn Subscriber>,
    shutdown: impl Future<Output = ()>,
) -> Result<()> {
    let server = launch(config, console).await?;
    shutdown.await;

    info!(snapshot = %server.snapshot(), "Shutting down");
    server.shutdown().await
}
