//! Client configuration.
//!
//! Plain structs with defaults; every field can be overridden from JSON
//! (missing fields keep their default).

use std::time::Duration;

use serde::{Deserialize, Serialize};

use redline_core::DEFAULT_HISTORY_LIMIT;

/// Transport-level settings for one document connection.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TransportConfig {
    /// WebSocket endpoint of the analysis service
    pub url: String,
    /// Maximum unacknowledged non-priority requests
    pub max_in_flight: usize,
    /// Keep-alive ping interval in seconds
    pub keepalive_interval_secs: u64,
    /// Consecutive unanswered pings before the socket is considered stuck
    pub max_missed_pings: u32,
    /// Socket open timeout in seconds
    pub connect_timeout_secs: u64,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            url: "ws://127.0.0.1:9091/check".to_string(),
            max_in_flight: 1,
            keepalive_interval_secs: 30,
            max_missed_pings: 3,
            connect_timeout_secs: 10,
        }
    }
}

impl TransportConfig {
    pub fn with_url(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            ..Self::default()
        }
    }

    pub fn keepalive_interval(&self) -> Duration {
        Duration::from_secs(self.keepalive_interval_secs.max(1))
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs.max(1))
    }
}

/// Settings for a check session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CheckConfig {
    /// Label used in log records for this document
    pub document_label: String,
    /// Client identity sent in the handshake
    pub client_name: String,
    pub client_version: String,
    /// Language variant requested from the service
    pub dialect: String,
    /// Revision history entries kept for rebasing
    pub history_limit: usize,
    pub transport: TransportConfig,
}

impl Default for CheckConfig {
    fn default() -> Self {
        Self {
            document_label: "untitled".to_string(),
            client_name: "redline".to_string(),
            client_version: env!("CARGO_PKG_VERSION").to_string(),
            dialect: "american".to_string(),
            history_limit: DEFAULT_HISTORY_LIMIT,
            transport: TransportConfig::default(),
        }
    }
}

impl CheckConfig {
    /// Parse from JSON, filling unspecified fields with defaults.
    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(json)
    }
}
