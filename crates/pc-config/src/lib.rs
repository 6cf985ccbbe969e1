//! Platform CLI Configuration
//!
//! TOML-based configuration with environment variable override support.
//! Covers the authorization server coordinates, the local callback listener
//! and the token store trust level.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use thiserror::Error;

mod loader;

pub use loader::ConfigLoader;

/// Token store trust levels accepted in `token_store.level`.
pub const TOKEN_STORE_LEVELS: &[&str] = &["auto", "secure", "file", "memory", "null"];

/// Configuration error types
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    ReadError(#[from] std::io::Error),

    #[error("Failed to parse TOML: {0}")]
    ParseError(#[from] toml::de::Error),

    #[error("Invalid configuration: {0}")]
    ValidationError(String),
}

/// Root application configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub auth: AuthConfig,
    pub callback: CallbackConfig,
    pub token_store: TokenStoreConfig,
}

/// Authorization server settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AuthConfig {
    /// Platform base URL; OIDC endpoints live under `{base_url}/auth/realms/{realm}`
    pub base_url: String,
    pub realm: String,
    /// Public client used for interactive logins
    pub client_id: String,
    pub scope: String,
    /// Seconds before access-token expiry at which a silent refresh is attempted
    pub refresh_threshold_secs: u64,
    /// How long an interactive login may wait for the browser callback
    pub login_timeout_secs: u64,
    /// Resolve endpoints from the realm's discovery document instead of the fixed layout
    pub use_discovery: bool,
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:8080".to_string(),
            realm: "platform".to_string(),
            client_id: "pc-cli".to_string(),
            scope: "openid".to_string(),
            refresh_threshold_secs: 60,
            login_timeout_secs: 300,
            use_discovery: false,
        }
    }
}

/// Local listener receiving the browser redirect
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CallbackConfig {
    pub host: String,
    /// 0 picks an ephemeral port
    pub port: u16,
}

impl Default for CallbackConfig {
    fn default() -> Self {
        Self {
            host: "localhost".to_string(),
            port: 0,
        }
    }
}

/// Token persistence settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TokenStoreConfig {
    /// auto, secure, file, memory or null
    pub level: String,
    /// Directory for store files; empty means `~/.pc`
    pub dir: String,
    /// Key material for the `file` level; empty means the built-in key
    pub file_key: String,
}

impl Default for TokenStoreConfig {
    fn default() -> Self {
        Self {
            level: "auto".to_string(),
            dir: String::new(),
            file_key: String::new(),
        }
    }
}

impl TokenStoreConfig {
    /// Resolved store directory
    pub fn resolved_dir(&self) -> Option<PathBuf> {
        if self.dir.trim().is_empty() {
            pc_common::pc_home()
        } else {
            Some(PathBuf::from(&self.dir))
        }
    }

    /// Configured key material for the file store, if any
    pub fn file_key(&self) -> Option<&str> {
        let key = self.file_key.trim();
        (!key.is_empty()).then_some(key)
    }
}

impl AppConfig {
    /// Load configuration from a TOML file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        let config: AppConfig = toml::from_str(&content)?;
        Ok(config)
    }

    /// Load configuration with environment variable override
    pub fn load() -> Result<Self, ConfigError> {
        ConfigLoader::new().load()
    }

    /// Check values that would otherwise fail later with a less useful message
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.auth.base_url.trim().is_empty() {
            return Err(ConfigError::ValidationError("auth.base_url must not be empty".to_string()));
        }
        if !self.auth.base_url.starts_with("http://") && !self.auth.base_url.starts_with("https://") {
            return Err(ConfigError::ValidationError(format!(
                "auth.base_url must be an http(s) URL, got '{}'",
                self.auth.base_url
            )));
        }
        if self.auth.realm.trim().is_empty() {
            return Err(ConfigError::ValidationError("auth.realm must not be empty".to_string()));
        }
        if self.auth.client_id.trim().is_empty() {
            return Err(ConfigError::ValidationError("auth.client_id must not be empty".to_string()));
        }
        if self.auth.login_timeout_secs == 0 {
            return Err(ConfigError::ValidationError("auth.login_timeout_secs must be positive".to_string()));
        }
        let level = self.token_store.level.to_ascii_lowercase();
        if !TOKEN_STORE_LEVELS.contains(&level.as_str()) {
            return Err(ConfigError::ValidationError(format!(
                "token_store.level must be one of {}, got '{}'",
                TOKEN_STORE_LEVELS.join(", "),
                self.token_store.level
            )));
        }
        Ok(())
    }

    /// Generate an example TOML configuration
    pub fn example_toml() -> String {
        r#"# Platform CLI Configuration
# Environment variables (PC_*) override these settings

[auth]
base_url = "http://localhost:8080"
realm = "platform"
client_id = "pc-cli"
scope = "openid"
refresh_threshold_secs = 60
login_timeout_secs = 300
use_discovery = false

[callback]
host = "localhost"
port = 0  # 0 = ephemeral

[token_store]
level = "auto"  # auto, secure, file, memory, null
dir = ""        # default ~/.pc
file_key = ""   # default built-in key
"#
        .to_string()
    }
}
