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


//! Client configuration

use crate::{ClientError, Result};
use chatrelay_protocol::consts::{DEFAULT_QUERY_PORT, DEFAULT_RELAY_PORT, MAX_FRAME_LENGTH};
use std::time::Duration;

/// Relay client configuration
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Server hostname or IP address
    pub host: String,

    /// Server relay (TCP) port
    pub port: u16,

    /// Server duplicate-name query (UDP) port
    pub query_port: u16,

    /// Connection timeout
    pub connect_timeout: Duration,

    /// How long to wait for a duplicate-name answer
    pub query_timeout: Duration,

    /// Delay between keep-alive pings
    pub keep_alive_interval: Duration,

    /// Maximum length of a single frame in bytes
    pub max_frame_length: usize,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            host: "localhost".to_string(),
            port: DEFAULT_RELAY_PORT,
            query_port: DEFAULT_QUERY_PORT,
            connect_timeout: Duration::from_secs(10),
            query_timeout: Duration::from_secs(3),
            keep_alive_interval: Duration::from_secs(3),
            max_frame_length: MAX_FRAME_LENGTH,
        }
    }
}

impl ClientConfig {
    /// Create a new client configuration with the given host and relay port
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
            ..Default::default()
        }
    }

    /// Set the duplicate-name query port
    pub fn with_query_port(mut self, port: u16) -> Self {
        self.query_port = port;
        self
    }

    /// Set the connection timeout
    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    /// Set the duplicate-name query timeout
    pub fn with_query_timeout(mut self, timeout: Duration) -> Self {
        self.query_timeout = timeout;
        self
    }

    /// Set the keep-alive interval
    pub fn with_keep_alive_interval(mut self, interval: Duration) -> Self {
        self.keep_alive_interval = interval;
        self
    }

    /// Set the maximum frame length
    pub fn with_max_frame_length(mut self, length: usize) -> Self {
        self.max_frame_length = length;
        self
    }

    /// Get the relay address as a string
    pub fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// Get the duplicate-name query address as a string
    pub fn query_address(&self) -> String {
        format!("{}:{}", self.host, self.query_port)
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<()> {
        if self.host.is_empty() {
            return Err(ClientError::InvalidConfig("host must not be empty".into()));
        }
        if self.keep_alive_interval.is_zero() {
            return Err(ClientError::InvalidConfig(
                "keep_alive_interval must be greater than 0".into(),
            ));
        }
        if self.max_frame_length == 0 {
            return Err(ClientError::InvalidConfig(
                "max_frame_length must be greater than 0".into(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = ClientConfig::default();
        assert_eq!(config.address(), "localhost:10240");
        assert_eq!(config.query_address(), "localhost:10241");
        assert_eq!(config.keep_alive_interval, Duration::from_secs(3));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_builder_pattern() {
        let config = ClientConfig::new("10.0.0.5", 9000)
            .with_query_port(9001)
            .with_connect_timeout(Duration::from_secs(2))
            .with_query_timeout(Duration::from_millis(500))
            .with_keep_alive_interval(Duration::from_secs(1));

        assert_eq!(config.address(), "10.0.0.5:9000");
        assert_eq!(config.query_address(), "10.0.0.5:9001");
        assert_eq!(config.connect_timeout, Duration::from_secs(2));
        assert_eq!(config.query_timeout, Duration::from_millis(500));
        assert_eq!(config.keep_alive_interval, Duration::from_secs(1));
    }

    #[test]
    fn test_validation() {
        assert!(ClientConfig::new("", 1).validate().is_err());
        assert!(
            ClientConfig::default()
                .with_keep_alive_interval(Duration::ZERO)
                .validate()
                .is_err()
        );
        assert!(
            ClientConfig::default()
                .with_max_frame_length(0)
                .validate()
                .is_err()
        );
    }
}
