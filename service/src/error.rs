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


//! Error types for the relay service

use crate::types::SessionId;
use chatrelay_protocol::ProtocolError;
use thiserror::Error;
use tokio_tungstenite::tungstenite;

/// Result type for operations
pub type Result<T> = std::result::Result<T, RelayError>;

/// Relay service error types
#[derive(Debug, Error)]
pub enum RelayError {
    /// I/O error from a socket
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Protocol error from the frame codec or tokenizer
    #[error("Protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    /// WebSocket error from the bridge transport
    #[error("WebSocket error: {0}")]
    WebSocket(#[from] tungstenite::Error),

    /// Session with the given ID was not found
    #[error("Session {0} not found")]
    SessionNotFound(SessionId),

    /// Connection has been closed
    #[error("Connection closed")]
    ConnectionClosed,

    /// Operation timed out
    #[error("Operation timed out")]
    Timeout,

    /// Server is not running
    #[error("Server not running")]
    ServerNotRunning,

    /// Server was started twice
    #[error("Server already running")]
    ServerAlreadyRunning,

    /// The message distributor worker has stopped
    #[error("Message distributor stopped")]
    DistributorStopped,

    /// Configuration failed validation
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// Generic error with a message
    #[error("{0}")]
    Other(String),
}

impl RelayError {
    /// Check if the error is recoverable
    ///
    /// Recoverable errors are those that don't indicate a fatal condition
    /// and where retrying the operation might succeed.
    pub fn is_recoverable(&self) -> bool {
        match self {
            RelayError::Timeout | RelayError::ConnectionClosed | RelayError::Io(_) => true,
            RelayError::Protocol(e) => e.is_recoverable(),
            _ => false,
        }
    }

    /// Check if the error is a connection error
    pub fn is_connection_error(&self) -> bool {
        matches!(
            self,
            RelayError::SessionNotFound(_)
                | RelayError::ConnectionClosed
                | RelayError::Io(_)
                | RelayError::WebSocket(_)
        )
    }

    /// Check if the error came from the wire protocol
    pub fn is_protocol_error(&self) -> bool {
        matches!(self, RelayError::Protocol(_))
    }
}
