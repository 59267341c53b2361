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


//! Environment overrides for the server configuration
//!
//! | Variable | Meaning |
//! |---|---|
//! | `CHATRELAY_RELAY_ADDR` | TCP relay address |
//! | `CHATRELAY_QUERY_ADDR` | UDP duplicate-name query address |
//! | `CHATRELAY_BRIDGE_ADDR` | WebSocket bridge address, `off` disables it |
//! | `CHATRELAY_MAX_CONNECTIONS` | Concurrent TCP connection limit |
//! | `CHATRELAY_MAX_FRAME_LENGTH` | Frame length limit in bytes |
//! | `CHATRELAY_HEARTBEAT_MS` | Reaper interval in milliseconds |
//! | `CHATRELAY_LIVENESS_MS` | Liveness threshold in milliseconds |
//! | `CHATRELAY_BRIDGE_QUEUE` | Frames queued per bridge peer before eviction |

use chatrelay_service::{RelayError, Result, ServerConfig};
use std::net::SocketAddr;
use std::str::FromStr;
use std::time::Duration;

pub const RELAY_ADDR: &str = "CHATRELAY_RELAY_ADDR";
pub const QUERY_ADDR: &str = "CHATRELAY_QUERY_ADDR";
pub const BRIDGE_ADDR: &str = "CHATRELAY_BRIDGE_ADDR";
pub const MAX_CONNECTIONS: &str = "CHATRELAY_MAX_CONNECTIONS";
pub const MAX_FRAME_LENGTH: &str = "CHATRELAY_MAX_FRAME_LENGTH";
pub const HEARTBEAT_MS: &str = "CHATRELAY_HEARTBEAT_MS";
pub const LIVENESS_MS: &str = "CHATRELAY_LIVENESS_MS";
pub const BRIDGE_QUEUE: &str = "CHATRELAY_BRIDGE_QUEUE";

/// Build the configuration from the process environment
pub fn config_from_env() -> Result<ServerConfig> {
    config_from_lookup(|key| std::env::var(key).ok())
}

/// Build the configuration from an arbitrary variable lookup
///
/// Unset variables keep their [`ServerConfig::default`] values. The result
/// is validated before it is returned.
pub fn config_from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<ServerConfig> {
    let mut config = ServerConfig::default();

    if let Some(address) = parsed::<SocketAddr>(&lookup, RELAY_ADDR)? {
        config.relay_address = address;
    }
    if let Some(address) = parsed::<SocketAddr>(&lookup, QUERY_ADDR)? {
        config.query_address = address;
    }
    match lookup(BRIDGE_ADDR).as_deref().map(str::trim) {
        Some(value) if value.eq_ignore_ascii_case("off") => config = config.without_bridge(),
        Some(value) => {
            config.bridge_address = Some(parse_value(BRIDGE_ADDR, value)?);
        }
        None => {}
    }
    if let Some(max) = parsed(&lookup, MAX_CONNECTIONS)? {
        config.max_connections = max;
    }
    if let Some(length) = parsed(&lookup, MAX_FRAME_LENGTH)? {
        config.max_frame_length = length;
    }
    if let Some(millis) = parsed(&lookup, HEARTBEAT_MS)? {
        config.heartbeat_interval = Duration::from_millis(millis);
    }
    if let Some(millis) = parsed(&lookup, LIVENESS_MS)? {
        config.liveness_threshold = Duration::from_millis(millis);
    }
    if let Some(capacity) = parsed(&lookup, BRIDGE_QUEUE)? {
        config.bridge_queue_capacity = capacity;
    }

    config.validate()?;
    Ok(config)
}

fn parsed<T: FromStr>(lookup: &impl Fn(&str) -> Option<String>, key: &str) -> Result<Option<T>> {
    lookup(key)
        .map(|value| parse_value(key, value.trim()))
        .transpose()
}

fn parse_value<T: FromStr>(key: &str, value: &str) -> Result<T> {
    value
        .parse()
        .map_err(|_| RelayError::InvalidConfig(format!("{key}: cannot parse {value:?}")))
}
