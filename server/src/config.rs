use std::path::Path;

use serde::Deserialize;
use tracing::info;

/// Top-level server configuration, loaded from garrison.toml.
#[derive(Debug, Deserialize, Default)]
#[serde(default)]
pub struct ServerConfig {
    pub server: ServerSection,
    pub database: DatabaseSection,
    pub chat: ChatSection,
}

#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct ServerSection {
    pub listen_address: String,
}

impl Default for ServerSection {
    fn default() -> Self {
        Self {
            listen_address: "0.0.0.0:8080".into(),
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct DatabaseSection {
    pub url: String,
}

impl Default for DatabaseSection {
    fn default() -> Self {
        Self {
            url: "sqlite:garrison.db?mode=rwc".into(),
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct ChatSection {
    /// The mandatory home channel every user stays a member of.
    pub home_channel: String,
}

impl Default for ChatSection {
    fn default() -> Self {
        Self {
            home_channel: "Garrison".into(),
        }
    }
}

impl ServerConfig {
    /// Load configuration from a TOML file, falling back to defaults when
    /// the file does not exist.
    pub fn load(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let path = path.as_ref();
        if !path.exists() {
            info!("no config file at {}, using defaults", path.display());
            return Ok(Self::default());
        }
        let text = std::fs::read_to_string(path)?;
        let config = toml::from_str(&text)?;
        info!("loaded config from {}", path.display());
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = ServerConfig::default();
        assert_eq!(config.server.listen_address, "0.0.0.0:8080");
        assert_eq!(config.chat.home_channel, "Garrison");
    }

    #[test]
    fn test_partial_toml_fills_defaults() {
        let config: ServerConfig = toml::from_str(
            r#"
            [chat]
            home_channel = "Lobby"
            "#,
        )
        .unwrap();
        assert_eq!(config.chat.home_channel, "Lobby");
        assert_eq!(config.database.url, "sqlite:garrison.db?mode=rwc");
    }
}
