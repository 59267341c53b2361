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

//! Typed relay messages and text helpers.

use crate::consts;
use crate::kind::{
    split_incoming, split_keep_alive, split_logoff, split_query, split_register,
};
use crate::{MessageKind, ProtocolResult};
use std::fmt;

/// A parsed relay protocol message.
///
/// `Display` renders the exact wire form, so a well-formed message survives
/// a format/parse round trip unchanged.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Message {
    /// `<< CONNECT >>uuid>>>>>name<< CONNECT >>`
    Register {
        /// Session id chosen by the client
        uuid: String,
        /// Requested display name
        name: String,
    },
    /// `<< DISCONNECT >>uuid`
    Logoff {
        /// Session to log off
        uuid: String,
    },
    /// `<< MESSAGE >>> <<<<uuid>>>>> << MESSAGE >>text`
    Incoming {
        /// Sender slot; a session id on input, a display name on relay
        uuid: String,
        /// Message text
        text: String,
    },
    /// `/// DEBUG ///`
    Debug,
    /// `<<< DUP ? >>> name`
    UsernameQuery {
        /// Name being queried
        name: String,
    },
    /// `<< KEEP ALIVE >>uuid<< KEEP ALIVE >>`
    KeepAlive {
        /// Session sending the ping
        uuid: String,
    },
    /// Anything else, kept verbatim
    Unknown(String),
}

impl Message {
    /// Parse a raw message.
    ///
    /// Classification never fails; a classified message missing a required
    /// delimiter or field yields [`crate::ProtocolError::Malformed`].
    pub fn parse(raw: &str) -> ProtocolResult<Message> {
        let message = match MessageKind::classify(raw) {
            MessageKind::Register => {
                let (uuid, name) = split_register(raw)?;
                Message::Register {
                    uuid: uuid.to_string(),
                    name: name.to_string(),
                }
            }
            MessageKind::Logoff => Message::Logoff {
                uuid: split_logoff(raw)?.to_string(),
            },
            MessageKind::IncomingMessage => {
                let (uuid, text) = split_incoming(raw)?;
                Message::Incoming {
                    uuid: uuid.to_string(),
                    text: text.to_string(),
                }
            }
            MessageKind::Debug => Message::Debug,
            MessageKind::UsernameQuery => Message::UsernameQuery {
                name: split_query(raw)?.to_string(),
            },
            MessageKind::KeepAlive => Message::KeepAlive {
                uuid: split_keep_alive(raw)?.to_string(),
            },
            MessageKind::Unknown => Message::Unknown(raw.to_string()),
        };
        Ok(message)
    }

    pub fn register(uuid: impl Into<String>, name: impl Into<String>) -> Self {
        Message::Register {
            uuid: uuid.into(),
            name: name.into(),
        }
    }

    pub fn logoff(uuid: impl Into<String>) -> Self {
        Message::Logoff { uuid: uuid.into() }
    }

    pub fn incoming(uuid: impl Into<String>, text: impl Into<String>) -> Self {
        Message::Incoming {
            uuid: uuid.into(),
            text: text.into(),
        }
    }

    pub fn keep_alive(uuid: impl Into<String>) -> Self {
        Message::KeepAlive { uuid: uuid.into() }
    }

    pub fn username_query(name: impl Into<String>) -> Self {
        Message::UsernameQuery { name: name.into() }
    }

    /// A chat message sent on behalf of the server.
    pub fn server_notice(text: impl Into<String>) -> Self {
        Message::incoming(consts::SERVER_SENDER, text)
    }

    /// A private chat message as delivered to its target.
    ///
    /// The sender slot carries `sender -> target`.
    pub fn private(sender: &str, target: &str, payload: impl Into<String>) -> Self {
        Message::incoming(format!("{sender}{}{target}", consts::PRIVATE_ARROW), payload)
    }

    /// The kind of this message
    pub fn kind(&self) -> MessageKind {
        match self {
            Message::Register { .. } => MessageKind::Register,
            Message::Logoff { .. } => MessageKind::Logoff,
            Message::Incoming { .. } => MessageKind::IncomingMessage,
            Message::Debug => MessageKind::Debug,
            Message::UsernameQuery { .. } => MessageKind::UsernameQuery,
            Message::KeepAlive { .. } => MessageKind::KeepAlive,
            Message::Unknown(_) => MessageKind::Unknown,
        }
    }
}

impl fmt::Display for Message {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Message::Register { uuid, name } => write!(
                f,
                "{}{uuid}{}{name}{}",
                consts::CONNECT_LEFT,
                consts::CONNECT_MIDDLE,
                consts::CONNECT_RIGHT
            ),
            Message::Logoff { uuid } => write!(f, "{}{uuid}", consts::DISCONNECT),
            Message::Incoming { uuid, text } => write!(
                f,
                "{}{uuid}{}{}{text}",
                consts::MESSAGE_LEFT,
                consts::MESSAGE_MIDDLE,
                consts::MESSAGE_RIGHT
            ),
            Message::Debug => f.write_str(consts::DEBUG_SIGNAL),
            Message::UsernameQuery { name } => write!(f, "{}{name}", consts::DUP_QUERY_HEADER),
            Message::KeepAlive { uuid } => write!(
                f,
                "{}{uuid}{}",
                consts::KEEP_ALIVE_HEADER,
                consts::KEEP_ALIVE_TAIL
            ),
            Message::Unknown(raw) => f.write_str(raw),
        }
    }
}

/// Addressing of chat text.
///
/// Text of the form `@name#payload` is a private message to `name`;
/// anything else is broadcast.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChatText<'a> {
    /// Deliver `payload` to `target` only
    Private {
        /// Display name of the recipient
        target: &'a str,
        /// Text to deliver
        payload: &'a str,
    },
    /// Deliver to everyone except the sender
    Broadcast(&'a str),
}

impl<'a> ChatText<'a> {
    pub fn parse(text: &'a str) -> Self {
        text.strip_prefix(consts::PRIVATE_PREFIX)
            .and_then(|rest| rest.split_once(consts::PRIVATE_SEPARATOR))
            .filter(|(target, _)| !target.is_empty())
            .map(|(target, payload)| ChatText::Private { target, payload })
            .unwrap_or(ChatText::Broadcast(text))
    }

    /// The text that will actually be delivered
    pub fn payload(&self) -> &'a str {
        match self {
            ChatText::Private { payload, .. } => payload,
            ChatText::Broadcast(text) => text,
        }
    }
}

/// Format a line for display: `name: text`.
pub fn display_line(name: &str, text: &str) -> String {
    format!("{name}{}{text}", consts::DISPLAY_SEPARATOR)
}

/// The speaker of a display line, i.e. everything before the first `:`,
/// with surrounding whitespace trimmed.
pub fn display_speaker(line: &str) -> &str {
    line.split(':').next().unwrap_or(line).trim()
}

/// The greeting a bridge peer receives right after connecting.
pub fn bridge_greeting(id: &str) -> String {
    format!(
        "{}{id}{}",
        consts::BRIDGE_GREETING_HEADER,
        consts::BRIDGE_GREETING_TAIL
    )
}

/// Extract the assigned id from a bridge greeting.
pub fn parse_bridge_greeting(frame: &str) -> Option<&str> {
    frame
        .strip_prefix(consts::BRIDGE_GREETING_HEADER)?
        .strip_suffix(consts::BRIDGE_GREETING_TAIL)
        .filter(|id| !id.is_empty())
}
