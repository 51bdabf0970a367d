//! Client Configuration
//!
//! Stored as TOML in `$XDG_CONFIG_HOME/storefront-chat/chat.toml`:
//!
//! ```toml
//! [chat.channel]
//! url = "wss://chat.storefront.example/ws"
//! reconnect_attempts = 5
//!
//! [chat.api]
//! base_url = "https://api.storefront.example/chat"
//!
//! [auth]
//! token = "..."
//! ```

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use storefront_chat_sync::ChatConfig;

/// Environment variable holding the bearer token
pub const TOKEN_ENV_VAR: &str = "STOREFRONT_CHAT_TOKEN";

const CONFIG_FILE: &str = "chat.toml";

/// CLI configuration file
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// Sync core settings
    #[serde(default)]
    pub chat: ChatConfig,

    /// Credentials
    #[serde(default)]
    pub auth: AuthConfig,
}

/// Credential settings
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AuthConfig {
    /// Bearer token used when `STOREFRONT_CHAT_TOKEN` is unset
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub token: Option<String>,
}

impl Config {
    /// Default configuration file location
    pub fn default_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from(".config"))
            .join("storefront-chat")
            .join(CONFIG_FILE)
    }

    /// Load configuration from `path`, or from the default location
    ///
    /// A missing file yields the defaults, which are written back so the user
    /// has something to edit.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let path = path.map(Path::to_path_buf).unwrap_or_else(Self::default_path);

        if path.exists() {
            let contents = fs::read_to_string(&path)
                .with_context(|| format!("Failed to read config file {}", path.display()))?;
            let config: Config = toml::from_str(&contents)
                .with_context(|| format!("Failed to parse config file {}", path.display()))?;
            Ok(config)
        } else {
            let config = Config::default();
            config.save(&path)?;
            tracing::info!("Created default configuration at {}", path.display());
            Ok(config)
        }
    }

    /// Write the configuration as TOML
    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).context("Failed to create config directory")?;
        }

        let contents = toml::to_string_pretty(self).context("Failed to serialize config")?;
        fs::write(path, contents).context("Failed to write config file")?;

        Ok(())
    }

    /// Bearer token: environment first, then the config file
    pub fn token(&self) -> Option<String> {
        std::env::var(TOKEN_ENV_VAR)
            .ok()
            .or_else(|| self.auth.token.clone())
            .filter(|token| !token.trim().is_empty())
    }
}
