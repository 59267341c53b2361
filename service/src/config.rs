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


//! Server configuration

use crate::{RelayError, Result};
use chatrelay_protocol::consts::{
    DEFAULT_BRIDGE_PORT, DEFAULT_QUERY_PORT, DEFAULT_RELAY_PORT, MAX_FRAME_LENGTH,
};
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::time::Duration;

/// Relay server configuration
///
/// This structure contains all configuration options for the relay, the
/// duplicate-name query endpoint, the WebSocket bridge and the heartbeat
/// reaper. Use the builder pattern methods to customize the configuration.
///
/// # Example
///
/// ```
/// use chatrelay_service::ServerConfig;
/// use std::time::Duration;
///
/// let config = ServerConfig::default()
///     .with_max_connections(500)
///     .with_liveness_threshold(Duration::from_secs(60))
///     .without_bridge();
/// assert!(config.validate().is_ok());
/// ```
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Address the TCP relay listens on
    pub relay_address: SocketAddr,

    /// Address the UDP duplicate-name service listens on
    pub query_address: SocketAddr,

    /// Address the WebSocket bridge listens on (`None` disables the bridge)
    pub bridge_address: Option<SocketAddr>,

    /// Maximum number of concurrent TCP connections
    pub max_connections: usize,

    /// Maximum length of a single frame in bytes
    pub max_frame_length: usize,

    /// Timeout for a single write to a peer
    ///
    /// A peer that cannot accept a frame within this duration is skipped.
    pub write_timeout: Duration,

    /// Delay between two passes of the heartbeat reaper
    pub heartbeat_interval: Duration,

    /// Age of the last liveness mark after which a session is evicted
    pub liveness_threshold: Duration,

    /// Delay before the query endpoint is re-bound after a fatal socket error
    pub rebind_backoff: Duration,

    /// Number of frames queued for one WebSocket peer before it is evicted
    pub bridge_queue_capacity: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        let any = IpAddr::V4(Ipv4Addr::UNSPECIFIED);
        Self {
            relay_address: SocketAddr::new(any, DEFAULT_RELAY_PORT),
            query_address: SocketAddr::new(any, DEFAULT_QUERY_PORT),
            bridge_address: Some(SocketAddr::new(any, DEFAULT_BRIDGE_PORT)),
            max_connections: 1000,
            max_frame_length: MAX_FRAME_LENGTH,
            write_timeout: Duration::from_secs(10),
            heartbeat_interval: Duration::from_secs(5),
            liveness_threshold: Duration::from_secs(30),
            rebind_backoff: Duration::from_millis(500),
            bridge_queue_capacity: 100,
        }
    }
}

impl ServerConfig {
    /// Create a new configuration with the given relay address
    ///
    /// All other settings will use their default values.
    pub fn new(relay_address: SocketAddr) -> Self {
        Self {
            relay_address,
            ..Default::default()
        }
    }

    /// Configuration binding every endpoint to an ephemeral loopback port
    pub fn ephemeral() -> Self {
        let local = SocketAddr::new(IpAddr::V4(Ipv4Addr::LOCALHOST), 0);
        Self {
            relay_address: local,
            query_address: local,
            bridge_address: Some(local),
            ..Default::default()
        }
    }

    /// Set the duplicate-name query address
    pub fn with_query_address(mut self, address: SocketAddr) -> Self {
        self.query_address = address;
        self
    }

    /// Set the WebSocket bridge address
    pub fn with_bridge_address(mut self, address: SocketAddr) -> Self {
        self.bridge_address = Some(address);
        self
    }

    /// Disable the WebSocket bridge
    pub fn without_bridge(mut self) -> Self {
        self.bridge_address = None;
        self
    }

    /// Set the maximum number of concurrent connections
    pub fn with_max_connections(mut self, max: usize) -> Self {
        self.max_connections = max;
        self
    }

    /// Set the maximum frame length
    pub fn with_max_frame_length(mut self, length: usize) -> Self {
        self.max_frame_length = length;
        self
    }

    /// Set the write timeout duration
    pub fn with_write_timeout(mut self, timeout: Duration) -> Self {
        self.write_timeout = timeout;
        self
    }

    /// Set the delay between reaper passes
    pub fn with_heartbeat_interval(mut self, interval: Duration) -> Self {
        self.heartbeat_interval = interval;
        self
    }

    /// Set the liveness threshold
    pub fn with_liveness_threshold(mut self, threshold: Duration) -> Self {
        self.liveness_threshold = threshold;
        self
    }

    /// Set the query endpoint re-bind back-off
    pub fn with_rebind_backoff(mut self, backoff: Duration) -> Self {
        self.rebind_backoff = backoff;
        self
    }

    /// Set the per-peer outbound queue capacity of the bridge
    pub fn with_bridge_queue_capacity(mut self, capacity: usize) -> Self {
        self.bridge_queue_capacity = capacity;
        self
    }

    /// Validate the configuration
    ///
    /// Returns [`RelayError::InvalidConfig`] if the configuration is invalid.
    pub fn validate(&self) -> Result<()> {
        if self.max_connections == 0 {
            return Err(invalid("max_connections must be greater than 0"));
        }

        if self.max_frame_length == 0 {
            return Err(invalid("max_frame_length must be greater than 0"));
        }

        if self.write_timeout.is_zero() {
            return Err(invalid("write_timeout must be greater than 0"));
        }

        if self.heartbeat_interval.is_zero() {
            return Err(invalid("heartbeat_interval must be greater than 0"));
        }

        if self.liveness_threshold.is_zero() {
            return Err(invalid("liveness_threshold must be greater than 0"));
        }

        if self.bridge_queue_capacity == 0 {
            return Err(invalid("bridge_queue_capacity must be greater than 0"));
        }

        let fixed_port = |address: &SocketAddr| address.port() != 0;
        if fixed_port(&self.relay_address)
            && self.bridge_address.as_ref() == Some(&self.relay_address)
        {
            return Err(invalid("relay and bridge cannot share an address"));
        }

        Ok(())
    }
}

fn invalid(reason: &str) -> RelayError {
    RelayError::InvalidConfig(reason.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = ServerConfig::default();
        assert_eq!(config.relay_address.port(), 10240);
        assert_eq!(config.query_address.port(), 10241);
        assert_eq!(config.bridge_address.map(|a| a.port()), Some(8090));
        assert_eq!(config.max_frame_length, 1024);
        assert_eq!(config.liveness_threshold, Duration::from_secs(30));
        assert_eq!(config.bridge_queue_capacity, 100);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_builder_pattern() {
        let config = ServerConfig::ephemeral()
            .with_max_connections(500)
            .with_heartbeat_interval(Duration::from_millis(50))
            .without_bridge();

        assert_eq!(config.max_connections, 500);
        assert_eq!(config.heartbeat_interval, Duration::from_millis(50));
        assert_eq!(config.relay_address.port(), 0);
        assert!(config.bridge_address.is_none());
    }

    #[test]
    fn test_validation() {
        let mut config = ServerConfig::default();
        assert!(config.validate().is_ok());

        config.max_connections = 0;
        assert!(matches!(
            config.validate(),
            Err(RelayError::InvalidConfig(_))
        ));

        config.max_connections = 10;
        config.liveness_threshold = Duration::ZERO;
        assert!(config.validate().is_err());

        let unbounded = ServerConfig::default().with_bridge_queue_capacity(0);
        assert!(unbounded.validate().is_err());

        let relay_address = ServerConfig::default().relay_address;
        let shared = ServerConfig::default().with_bridge_address(relay_address);
        assert!(shared.validate().is_err());
    }
}
