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


//! Handler trait for observing relay connections

use crate::{ConnectionId, RelayConnection, RelayError, SessionId};
use async_trait::async_trait;

/// Server event handler trait
///
/// Implement this trait to observe connection lifecycle events. Routing is
/// done by the relay itself; handlers only watch. All methods have default
/// implementations that do nothing.
///
/// # Example
///
/// ```no_run
/// use chatrelay_service::{ConnectionId, RelayConnection, ServerHandler, SessionId};
/// use async_trait::async_trait;
///
/// struct Audit;
///
/// #[async_trait]
/// impl ServerHandler for Audit {
///     async fn on_register(&self, id: ConnectionId, session: &SessionId, name: &str) {
///         println!("{id} registered {session} as {name}");
///     }
/// }
/// ```
#[async_trait]
pub trait ServerHandler: Send + Sync + 'static {
    /// Called when a connection is accepted, before the first read
    async fn on_connect(&self, _id: ConnectionId, _conn: &RelayConnection) {}

    /// Called when a connection completes registration
    async fn on_register(&self, _id: ConnectionId, _session: &SessionId, _name: &str) {}

    /// Called when reading from a connection fails
    ///
    /// The connection will be closed after this method returns.
    async fn on_error(&self, _id: ConnectionId, _conn: &RelayConnection, _error: RelayError) {}

    /// Called when a connection is closed, by logoff, the peer or the server
    async fn on_disconnect(&self, _id: ConnectionId, _conn: &RelayConnection) {}
}

/// Handler that ignores every event
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopHandler;

#[async_trait]
impl ServerHandler for NoopHandler {}
