//! Configuration loader with file and environment variable support

use crate::{AppConfig, ConfigError};
use std::env;
use std::path::PathBuf;
use tracing::{debug, info};

/// Config file names searched in the working directory
const CONFIG_PATHS: &[&str] = &["pc.toml", "./config/pc.toml"];

/// Config file name inside `~/.pc`
const HOME_CONFIG_FILE: &str = "config.toml";

/// Configuration loader
pub struct ConfigLoader {
    config_path: Option<PathBuf>,
}

impl ConfigLoader {
    /// Create a new configuration loader
    pub fn new() -> Self {
        Self { config_path: None }
    }

    /// Create a loader with a specific config file path
    pub fn with_path<P: Into<PathBuf>>(path: P) -> Self {
        Self {
            config_path: Some(path.into()),
        }
    }

    /// Load configuration from file (if found) with environment variable overrides
    pub fn load(&self) -> Result<AppConfig, ConfigError> {
        self.load_with(|key| env::var(key).ok())
    }

    /// Same as [`load`](Self::load) with an explicit variable lookup
    pub fn load_with<F>(&self, lookup: F) -> Result<AppConfig, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = AppConfig::default();

        if let Some(path) = self.find_config_file(&lookup)? {
            info!(?path, "Loading configuration from file");
            config = AppConfig::from_file(&path)?;
        }

        apply_overrides(&mut config, &lookup);
        config.validate()?;

        Ok(config)
    }

    /// Find the configuration file to use
    fn find_config_file<F>(&self, lookup: &F) -> Result<Option<PathBuf>, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        // An explicit path that does not exist is a user error, not a fallthrough
        if let Some(path) = &self.config_path {
            if path.exists() {
                return Ok(Some(path.clone()));
            }
            return Err(ConfigError::ValidationError(format!(
                "config file {} does not exist",
                path.display()
            )));
        }

        if let Some(path) = lookup("PC_CONFIG") {
            let path = PathBuf::from(path);
            if path.exists() {
                return Ok(Some(path));
            }
            debug!(?path, "PC_CONFIG points to a missing file, ignoring");
        }

        for path in CONFIG_PATHS {
            let path = PathBuf::from(path);
            if path.exists() {
                return Ok(Some(path));
            }
        }

        if let Some(home) = pc_common::pc_home() {
            let path = home.join(HOME_CONFIG_FILE);
            if path.exists() {
                return Ok(Some(path));
            }
        }

        Ok(None)
    }
}

impl Default for ConfigLoader {
    fn default() -> Self {
        Self::new()
    }
}

/// Apply environment variable overrides
fn apply_overrides<F>(config: &mut AppConfig, lookup: &F)
where
    F: Fn(&str) -> Option<String>,
{
    // Auth
    if let Some(val) = lookup("PC_BASE_URL") {
        config.auth.base_url = val.trim_end_matches('/').to_string();
    }
    if let Some(val) = lookup("PC_REALM") {
        config.auth.realm = val;
    }
    if let Some(val) = lookup("PC_CLIENT_ID") {
        config.auth.client_id = val;
    }
    if let Some(val) = lookup("PC_SCOPE") {
        config.auth.scope = val;
    }
    if let Some(val) = lookup("PC_REFRESH_THRESHOLD_SECS") {
        if let Ok(secs) = val.parse() {
            config.auth.refresh_threshold_secs = secs;
        }
    }
    if let Some(val) = lookup("PC_LOGIN_TIMEOUT_SECS") {
        if let Ok(secs) = val.parse() {
            config.auth.login_timeout_secs = secs;
        }
    }
    if let Some(val) = lookup("PC_USE_DISCOVERY") {
        config.auth.use_discovery = val.parse().unwrap_or(false);
    }

    // Callback listener
    if let Some(val) = lookup("PC_CALLBACK_HOST") {
        config.callback.host = val;
    }
    if let Some(val) = lookup("PC_CALLBACK_PORT") {
        if let Ok(port) = val.parse() {
            config.callback.port = port;
        }
    }

    // Token store
    if let Some(val) = lookup("PC_TOKEN_STORE") {
        config.token_store.level = val.to_ascii_lowercase();
    }
    if let Some(val) = lookup("PC_TOKEN_STORE_DIR") {
        config.token_store.dir = val;
    }
    if let Some(val) = lookup("PC_TOKEN_STORE_KEY") {
        config.token_store.file_key = val;
    }
}
