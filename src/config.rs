// Client configuration.
// Logging is on by default in debug builds and reduced to warnings in release.

use std::collections::BTreeSet;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;
use crate::peer::call::CallTimings;
use crate::peer::types::ServerConfig;

#[cfg(debug_assertions)]
pub const LOGGING_ENABLED: bool = true;

#[cfg(not(debug_assertions))]
pub const LOGGING_ENABLED: bool = false;

/// Interests the matching server knows about
pub const INTERESTS: [&str; 8] = [
    "Music",
    "Movies",
    "Sports",
    "Gaming",
    "Travel",
    "Food",
    "Technology",
    "Art",
];

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(default)]
pub struct LoggingConfig {
    pub enabled: bool,
    pub filter: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            filter: "info".into(),
        }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(default)]
pub struct ClientConfig {
    pub server_url: String,
    pub ice_servers: Vec<ServerConfig>,
    pub interests: BTreeSet<String>,
    pub ring_timeout_secs: Option<u64>,
    pub grace_period_secs: u64,
    pub logging: LoggingConfig,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            server_url: "ws://127.0.0.1:4000".into(),
            ice_servers: default_ice_servers(),
            interests: BTreeSet::new(),
            ring_timeout_secs: None,
            grace_period_secs: 10,
            logging: LoggingConfig::default(),
        }
    }
}

pub fn default_ice_servers() -> Vec<ServerConfig> {
    vec![
        ServerConfig {
            id: "default-stun".into(),
            r#type: "stun".into(),
            url: "stun:stun.l.google.com:19302".into(),
            username: None,
            credential: None,
        },
        ServerConfig {
            id: "default-stun-1".into(),
            r#type: "stun".into(),
            url: "stun:stun1.l.google.com:19302".into(),
            username: None,
            credential: None,
        },
    ]
}

impl ClientConfig {
    /// Reads a JSON config file; missing fields take their defaults.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let raw = std::fs::read_to_string(path)?;
        let config: ClientConfig = serde_json::from_str(&raw)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        for server in &self.ice_servers {
            if server.url.is_empty() {
                return Err(ConfigError::InvalidIceServer {
                    id: server.id.clone(),
                    reason: "url cannot be empty",
                });
            }
            if server.r#type == "turn" && (server.username.is_none() || server.credential.is_none())
            {
                return Err(ConfigError::InvalidIceServer {
                    id: server.id.clone(),
                    reason: "TURN servers require username and credential",
                });
            }
        }
        Ok(())
    }

    pub fn call_timings(&self) -> CallTimings {
        CallTimings {
            ring_timeout_secs: self.ring_timeout_secs,
            grace_period_secs: self.grace_period_secs,
        }
    }
}
