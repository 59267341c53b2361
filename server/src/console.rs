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


//! Console output for the headless server

use async_trait::async_trait;
use chatrelay_service::{
    CallbackSubscriber, ConnectionId, RelayConnection, RelayError, ServerHandler, SessionId,
    Subscriber,
};
use std::sync::Arc;
use tracing::{info, warn};

/// Subscriber printing every relayed line to standard output
pub fn console_subscriber() -> Arc<dyn Subscriber> {
    Arc::new(CallbackSubscriber::new(|line: &str| println!("{line}")))
}

/// Handler logging connection lifecycle events
#[derive(Debug, Default, Clone, Copy)]
pub struct LoggingHandler;

#[async_trait]
impl ServerHandler for LoggingHandler {
    async fn on_connect(&self, id: ConnectionId, conn: &RelayConnection) {
        info!(connection_id = %id, peer = %conn.peer_addr(), "Client connected");
    }

    async fn on_register(&self, id: ConnectionId, session: &SessionId, name: &str) {
        info!(connection_id = %id, session_id = %session, name, "Client registered");
    }

    async fn on_error(&self, id: ConnectionId, _conn: &RelayConnection, error: RelayError) {
        warn!(connection_id = %id, error = %error, "Connection error");
    }

    async fn on_disconnect(&self, id: ConnectionId, conn: &RelayConnection) {
        info!(connection_id = %id, peer = %conn.peer_addr(), "Client disconnected");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tracing_test::traced_test;

    #[traced_test]
    #[tokio::test]
    async fn test_register_is_logged() {
        LoggingHandler
            .on_register(ConnectionId::new(7), &SessionId::new("u7"), "Alice")
            .await;
        assert!(logs_contain("Client registered"));
        assert!(logs_contain("conn-7"));
        assert!(logs_contain("Alice"));
    }
}
