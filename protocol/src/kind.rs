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

//! Message classification and tokenization.

use crate::consts;
use crate::{ProtocolError, ProtocolResult};
use std::collections::BTreeMap;
use std::fmt;

/// Field name of a session id.
pub const FIELD_UUID: &str = "uuid";
/// Field name of a display name in a registration.
pub const FIELD_NAME: &str = "name";
/// Field name of the text of a chat message.
pub const FIELD_MESSAGE_TEXT: &str = "messageText";
/// Field name of the queried name in a duplicate-name query.
pub const FIELD_USERNAME: &str = "username";

/// The kind of a raw protocol message.
///
/// Every raw string maps to exactly one kind; see [`MessageKind::classify`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MessageKind {
    /// Registration greet carrying a session id and a display name
    Register,
    /// Logoff request for a session id
    Logoff,
    /// Chat message from a session id
    IncomingMessage,
    /// Debug dump request
    Debug,
    /// Duplicate-name query
    UsernameQuery,
    /// Liveness ping for a session id
    KeepAlive,
    /// Anything that does not start with a known header
    Unknown,
}

impl MessageKind {
    /// Kinds in classification priority order. The first matching header wins.
    const PRIORITY: [MessageKind; 6] = [
        MessageKind::Register,
        MessageKind::Logoff,
        MessageKind::IncomingMessage,
        MessageKind::Debug,
        MessageKind::UsernameQuery,
        MessageKind::KeepAlive,
    ];

    /// The literal header identifying this kind, if it has one.
    pub fn header(self) -> Option<&'static str> {
        match self {
            MessageKind::Register => Some(consts::CONNECT_LEFT),
            MessageKind::Logoff => Some(consts::DISCONNECT),
            MessageKind::IncomingMessage => Some(consts::MESSAGE_LEFT),
            MessageKind::Debug => Some(consts::DEBUG_SIGNAL),
            MessageKind::UsernameQuery => Some(consts::DUP_QUERY_HEADER),
            MessageKind::KeepAlive => Some(consts::KEEP_ALIVE_HEADER),
            MessageKind::Unknown => None,
        }
    }

    /// Classify a raw message by its header.
    ///
    /// Never fails: input that matches no header is [`MessageKind::Unknown`].
    pub fn classify(raw: &str) -> MessageKind {
        Self::PRIORITY
            .into_iter()
            .find(|kind| kind.header().is_some_and(|header| raw.starts_with(header)))
            .unwrap_or(MessageKind::Unknown)
    }

    /// Extract the named fields of a raw message of this kind.
    ///
    /// Returns [`ProtocolError::Malformed`] when the message does not start
    /// with this kind's header, or when a required delimiter or field is
    /// missing.
    pub fn tokenize(self, raw: &str) -> ProtocolResult<Fields> {
        let mut fields = Fields::default();
        match self {
            MessageKind::Register => {
                let (uuid, name) = split_register(raw)?;
                fields.insert(FIELD_UUID, uuid);
                fields.insert(FIELD_NAME, name);
            }
            MessageKind::Logoff => {
                fields.insert(FIELD_UUID, split_logoff(raw)?);
            }
            MessageKind::IncomingMessage => {
                let (uuid, text) = split_incoming(raw)?;
                fields.insert(FIELD_UUID, uuid);
                fields.insert(FIELD_MESSAGE_TEXT, text);
            }
            MessageKind::Debug => {
                strip_header(self, raw)?;
            }
            MessageKind::UsernameQuery => {
                fields.insert(FIELD_USERNAME, split_query(raw)?);
            }
            MessageKind::KeepAlive => {
                fields.insert(FIELD_UUID, split_keep_alive(raw)?);
            }
            MessageKind::Unknown => {}
        }
        Ok(fields)
    }
}

impl fmt::Display for MessageKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            MessageKind::Register => "REGISTER",
            MessageKind::Logoff => "LOGOFF",
            MessageKind::IncomingMessage => "INCOMING_MESSAGE",
            MessageKind::Debug => "DEBUG",
            MessageKind::UsernameQuery => "USERNAME_QUERY",
            MessageKind::KeepAlive => "KEEP_ALIVE",
            MessageKind::Unknown => "UNKNOWN",
        };
        f.write_str(name)
    }
}

/// Named fields extracted from a raw message.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Fields(BTreeMap<&'static str, String>);

impl Fields {
    fn insert(&mut self, key: &'static str, value: &str) {
        self.0.insert(key, value.to_string());
    }

    /// Get a field by name
    pub fn get(&self, key: &str) -> Option<&str> {
        self.0.get(key).map(String::as_str)
    }

    /// Field names present in this map
    pub fn keys(&self) -> impl Iterator<Item = &'static str> + '_ {
        self.0.keys().copied()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

fn strip_header(kind: MessageKind, raw: &str) -> ProtocolResult<&str> {
    kind.header()
        .and_then(|header| raw.strip_prefix(header))
        .ok_or_else(|| ProtocolError::malformed(kind, "missing header"))
}

fn non_empty<'a>(
    kind: MessageKind,
    value: &'a str,
    reason: &'static str,
) -> ProtocolResult<&'a str> {
    if value.is_empty() {
        Err(ProtocolError::malformed(kind, reason))
    } else {
        Ok(value)
    }
}

pub(crate) fn split_register(raw: &str) -> ProtocolResult<(&str, &str)> {
    let kind = MessageKind::Register;
    let body = strip_header(kind, raw)?;
    let body = body.strip_suffix(consts::CONNECT_RIGHT).unwrap_or(body);
    let (uuid, name) = body
        .split_once(consts::CONNECT_MIDDLE)
        .ok_or_else(|| ProtocolError::malformed(kind, "missing name delimiter"))?;
    Ok((
        non_empty(kind, uuid, "empty uuid")?,
        non_empty(kind, name, "empty name")?,
    ))
}

pub(crate) fn split_logoff(raw: &str) -> ProtocolResult<&str> {
    let kind = MessageKind::Logoff;
    non_empty(kind, strip_header(kind, raw)?, "empty uuid")
}

pub(crate) fn split_incoming(raw: &str) -> ProtocolResult<(&str, &str)> {
    let kind = MessageKind::IncomingMessage;
    let body = strip_header(kind, raw)?;
    let (uuid, rest) = body
        .split_once(consts::MESSAGE_MIDDLE)
        .ok_or_else(|| ProtocolError::malformed(kind, "missing text delimiter"))?;
    let text = rest.strip_prefix(consts::MESSAGE_RIGHT).unwrap_or(rest);
    Ok((non_empty(kind, uuid, "empty uuid")?, text))
}

pub(crate) fn split_query(raw: &str) -> ProtocolResult<&str> {
    let kind = MessageKind::UsernameQuery;
    non_empty(kind, strip_header(kind, raw)?, "empty username")
}

pub(crate) fn split_keep_alive(raw: &str) -> ProtocolResult<&str> {
    let kind = MessageKind::KeepAlive;
    let body = strip_header(kind, raw)?;
    let uuid = body.strip_suffix(consts::KEEP_ALIVE_TAIL).unwrap_or(body);
    non_empty(kind, uuid, "empty uuid")
}
