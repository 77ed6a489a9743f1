//! Link settings shared by the hub and its agents.
//!
//! Settings come from a JSON file; every key is optional and missing keys
//! keep their defaults. Environment variables override the file:
//!
//! | variable | field |
//! |---|---|
//! | `RELAY_LINK_HOST` | `api_host` |
//! | `RELAY_LINK_PORT` | `api_port` |
//! | `RELAY_LINK_PASSWORD` | `api_password` |
//! | `RELAY_LINK_CHANNEL_ID` | `channel_id` |
//!
//! An empty host means `localhost` for an agent and every interface for the
//! hub.

use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{LinkError, Result};

/// Environment variable overriding `api_host`.
pub const ENV_HOST: &str = "RELAY_LINK_HOST";
/// Environment variable overriding `api_port`.
pub const ENV_PORT: &str = "RELAY_LINK_PORT";
/// Environment variable overriding `api_password`.
pub const ENV_PASSWORD: &str = "RELAY_LINK_PASSWORD";
/// Environment variable overriding `channel_id`.
pub const ENV_CHANNEL_ID: &str = "RELAY_LINK_CHANNEL_ID";

/// Address, secret and default channel of a link.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LinkSettings {
    /// Hub host name or IP; empty for the default.
    pub api_host: String,
    /// Hub TCP port; 0 means unconfigured.
    pub api_port: u16,
    /// Shared secret sent in `login`.
    pub api_password: String,
    /// Channel an agent relays to, if it uses a single one.
    pub channel_id: Option<u64>,
}

impl LinkSettings {
    /// Load settings from `path`, then apply environment overrides.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let contents = fs::read_to_string(path)
            .map_err(|e| LinkError::Config(format!("read {}: {}", path.display(), e)))?;
        let mut settings = Self::from_json(&contents)?;
        settings.apply_overrides(|key| std::env::var(key).ok())?;
        Ok(settings)
    }

    /// Parse settings from a JSON document.
    pub fn from_json(contents: &str) -> Result<Self> {
        serde_json::from_str(contents)
            .map_err(|e| LinkError::Config(format!("parse link settings: {}", e)))
    }

    /// Apply overrides from `lookup`, keyed by the `RELAY_LINK_*` names.
    ///
    /// Empty values are ignored.
    pub fn apply_overrides<F>(&mut self, lookup: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        let lookup = |key: &str| lookup(key).filter(|value| !value.is_empty());

        if let Some(host) = lookup(ENV_HOST) {
            self.api_host = host;
        }
        if let Some(port) = lookup(ENV_PORT) {
            self.api_port = port
                .parse()
                .map_err(|e| LinkError::Config(format!("parse {}: {}", ENV_PORT, e)))?;
        }
        if let Some(password) = lookup(ENV_PASSWORD) {
            self.api_password = password;
        }
        if let Some(channel) = lookup(ENV_CHANNEL_ID) {
            let channel: u64 = channel
                .parse()
                .map_err(|e| LinkError::Config(format!("parse {}: {}", ENV_CHANNEL_ID, e)))?;
            self.channel_id = Some(channel).filter(|id| *id != 0);
        }
        Ok(())
    }

    /// Whether an agent can connect with these settings.
    pub fn is_valid_for_client(&self) -> bool {
        self.api_port > 0 && !self.api_password.is_empty()
    }

    /// Whether a hub can listen with these settings.
    pub fn is_valid_for_server(&self) -> bool {
        self.api_port > 0 && !self.api_password.is_empty()
    }

    /// `host:port` an agent connects to.
    pub fn client_address(&self) -> String {
        let host = if self.api_host.is_empty() {
            "localhost"
        } else {
            &self.api_host
        };
        format!("{}:{}", host, self.api_port)
    }

    /// `host:port` a hub binds to.
    pub fn server_address(&self) -> String {
        let host = if self.api_host.is_empty() {
            "0.0.0.0"
        } else {
            &self.api_host
        };
        format!("{}:{}", host, self.api_port)
    }
}
