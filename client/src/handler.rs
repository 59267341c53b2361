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


//! Client event handler traits and server frame rendering

use crate::{ClientError, RelayClient};
use async_trait::async_trait;
use chatrelay_protocol::consts::NAME_DUPLICATED;
use chatrelay_protocol::{Message, display_line};

/// Text shown when the server ends the session
pub const SERVER_CLOSED_LINE: &str = "Server closed the connection.";

/// A frame received from the server, as far as a client cares
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ServerFrame {
    /// Chat text from another user, or a notice from the server
    Chat {
        /// Display name of the sender, `A -> B` for private messages
        sender: String,
        /// Message text
        text: String,
    },
    /// The server ended the session
    Logoff,
    /// The requested name is already in use
    NameDuplicated,
    /// Anything else
    Other,
}

impl ServerFrame {
    /// Classify one frame
    pub fn parse(frame: &str) -> Self {
        if frame.trim_end() == NAME_DUPLICATED.trim_end() {
            return ServerFrame::NameDuplicated;
        }
        match Message::parse(frame) {
            Ok(Message::Incoming { uuid, text }) => ServerFrame::Chat { sender: uuid, text },
            Ok(Message::Logoff { .. }) => ServerFrame::Logoff,
            _ => ServerFrame::Other,
        }
    }

    /// The line a user interface shows for this frame, if any
    pub fn render(&self) -> Option<String> {
        match self {
            ServerFrame::Chat { sender, text } => Some(display_line(sender, text)),
            ServerFrame::Logoff => Some(SERVER_CLOSED_LINE.to_string()),
            ServerFrame::NameDuplicated | ServerFrame::Other => None,
        }
    }
}

/// Client event handler trait
///
/// Implement this trait to handle events from the relay client.
/// All methods are async and have default implementations that do nothing.
///
/// # Example
///
/// ```no_run
/// use chatrelay_client::{ClientHandler, RelayClient};
/// use async_trait::async_trait;
///
/// struct Printer;
///
/// #[async_trait]
/// impl ClientHandler for Printer {
///     async fn on_line(&self, _client: &RelayClient, line: &str) {
///         println!("{line}");
///     }
/// }
/// ```
#[async_trait]
pub trait ClientHandler: Send + Sync + 'static {
    /// Called once the greeting was sent
    async fn on_connect(&self, _client: &RelayClient) {}

    /// Called with every displayable line
    ///
    /// Chat arrives as `sender: text`; a server logoff as
    /// [`SERVER_CLOSED_LINE`].
    async fn on_line(&self, _client: &RelayClient, _line: &str) {}

    /// Called when the server refuses the chosen name
    async fn on_name_rejected(&self, _client: &RelayClient) {}

    /// Called when reading from the server fails
    async fn on_error(&self, _client: &RelayClient, _error: ClientError) {}

    /// Called when the connection is closed, by either side
    async fn on_disconnect(&self, _client: &RelayClient) {}
}

type Callback<A> = Box<dyn Fn(&RelayClient, A) + Send + Sync + 'static>;

/// Callback-based handler implementation
///
/// This provides a flexible way to implement handlers using closures instead
/// of implementing the `ClientHandler` trait.
///
/// # Example
///
/// ```no_run
/// use chatrelay_client::{CallbackHandler, RelayClient};
/// use std::sync::Arc;
///
/// let handler = Arc::new(CallbackHandler {
///     on_line: Some(Box::new(|_client: &RelayClient, line: &str| println!("{line}"))),
///     ..Default::default()
/// });
/// ```
#[derive(Default)]
pub struct CallbackHandler {
    /// Called once the greeting was sent
    pub on_connect: Option<Callback<()>>,

    /// Called on every displayable line
    pub on_line: Option<Box<dyn Fn(&RelayClient, &str) + Send + Sync + 'static>>,

    /// Called when the name is refused
    pub on_name_rejected: Option<Callback<()>>,

    /// Called on error
    pub on_error: Option<Callback<ClientError>>,

    /// Called on disconnection
    pub on_disconnect: Option<Callback<()>>,
}

#[async_trait]
impl ClientHandler for CallbackHandler {
    async fn on_connect(&self, client: &RelayClient) {
        if let Some(ref f) = self.on_connect {
            f(client, ());
        }
    }

    async fn on_line(&self, client: &RelayClient, line: &str) {
        if let Some(ref f) = self.on_line {
            f(client, line);
        }
    }

    async fn on_name_rejected(&self, client: &RelayClient) {
        if let Some(ref f) = self.on_name_rejected {
            f(client, ());
        }
    }

    async fn on_error(&self, client: &RelayClient, error: ClientError) {
        if let Some(ref f) = self.on_error {
            f(client, error);
        }
    }

    async fn on_disconnect(&self, client: &RelayClient) {
        if let Some(ref f) = self.on_disconnect {
            f(client, ());
        }
    }
}
