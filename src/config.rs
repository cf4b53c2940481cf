//! Client configuration.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use url::Url;

use crate::error::ConfigError;
use crate::model::Color;
use crate::protocol::Identity;
use crate::rules::MovePolicy;

pub const ENV_SERVER_URL: &str = "PARCHIS_SERVER_URL";
pub const ENV_NAME: &str = "PARCHIS_NAME";
pub const ENV_COLOR: &str = "PARCHIS_COLOR";
pub const ENV_ACCOUNT_ID: &str = "PARCHIS_ACCOUNT_ID";

#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq)]
pub struct ClientConfig {
    /// Websocket address of the match server, e.g. `ws://127.0.0.1:8001`.
    pub server_url: String,
    /// Display name announced on connect.
    pub name: String,
    /// Preferred color; the server may assign another.
    #[serde(default)]
    pub color: Option<Color>,
    /// Account id of a logged-in player.
    #[serde(default)]
    pub account_id: Option<i64>,
    /// Pause between showing a doubles roll and the automatic release-all.
    #[serde(default = "default_auto_release_delay_ms")]
    pub auto_release_delay_ms: u64,
    #[serde(default)]
    pub move_policy: MovePolicy,
}

fn default_auto_release_delay_ms() -> u64 {
    500
}

impl ClientConfig {
    pub fn new(server_url: impl Into<String>, name: impl Into<String>) -> Self {
        ClientConfig {
            server_url: server_url.into(),
            name: name.into(),
            color: None,
            account_id: None,
            auto_release_delay_ms: default_auto_release_delay_ms(),
            move_policy: MovePolicy::default(),
        }
    }

    pub fn from_json_str(raw: &str) -> Result<Self, ConfigError> {
        let cfg: ClientConfig = serde_json::from_str(raw)?;
        cfg.validate()?;
        Ok(cfg)
    }

    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Builds a config from a key lookup using the `PARCHIS_*` names.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let server_url = lookup(ENV_SERVER_URL).ok_or(ConfigError::Missing(ENV_SERVER_URL))?;
        let name = lookup(ENV_NAME).ok_or(ConfigError::Missing(ENV_NAME))?;
        let mut cfg = ClientConfig::new(server_url, name);
        if let Some(raw) = lookup(ENV_COLOR).filter(|c| !c.trim().is_empty()) {
            cfg.color = Some(Color::from_wire(&raw).ok_or(ConfigError::UnknownColor(raw))?);
        }
        if let Some(raw) = lookup(ENV_ACCOUNT_ID).filter(|id| !id.trim().is_empty()) {
            cfg.account_id = Some(raw.trim().parse().map_err(|_| ConfigError::InvalidAccountId(raw.clone()))?);
        }
        cfg.validate()?;
        Ok(cfg)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        self.url()?;
        if self.name.trim().is_empty() {
            return Err(ConfigError::Missing("name"));
        }
        Ok(())
    }

    pub fn url(&self) -> Result<Url, ConfigError> {
        Ok(Url::parse(&self.server_url)?)
    }

    pub fn identity(&self) -> Identity {
        Identity { name: self.name.clone(), color: self.color, account_id: self.account_id }
    }

    pub fn auto_release_delay(&self) -> Duration {
        Duration::from_millis(self.auto_release_delay_ms)
    }
}
