//! Settings for one authenticator instance

use pc_config::AppConfig;
use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

use crate::endpoints::EndpointOverrides;

/// Where a service account's private key comes from
#[derive(Clone, PartialEq, Eq)]
pub enum PrivateKeySource {
    /// PEM text
    Inline(String),
    /// Path to a PEM file
    Path(PathBuf),
}

impl fmt::Debug for PrivateKeySource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PrivateKeySource::Inline(_) => f.write_str("Inline(<redacted>)"),
            PrivateKeySource::Path(path) => f.debug_tuple("Path").field(path).finish(),
        }
    }
}

/// Credential material presented to the authorization server
#[derive(Clone, Default, PartialEq, Eq)]
pub enum Credential {
    /// Interactive browser login
    #[default]
    None,
    Secret(String),
    PrivateKey(PrivateKeySource),
}

impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Credential::None => f.write_str("None"),
            Credential::Secret(_) => f.write_str("Secret(<redacted>)"),
            Credential::PrivateKey(source) => f.debug_tuple("PrivateKey").field(source).finish(),
        }
    }
}

/// Immutable settings for building an authenticator
#[derive(Debug, Clone)]
pub struct AuthParams {
    pub base_url: String,
    pub realm: String,
    pub client_id: String,
    pub scope: String,
    pub credential: Credential,
    /// Use the authorization code flow with a client secret
    pub interactive: bool,
    pub callback_host: String,
    /// 0 picks an ephemeral port
    pub callback_port: u16,
    /// Refresh when the access token expires within this window
    pub refresh_threshold: Duration,
    pub login_timeout: Duration,
    pub endpoints: EndpointOverrides,
    pub use_discovery: bool,
}

impl AuthParams {
    pub fn new(base_url: impl Into<String>, realm: impl Into<String>, client_id: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            realm: realm.into(),
            client_id: client_id.into(),
            scope: "openid".to_string(),
            credential: Credential::None,
            interactive: false,
            callback_host: "localhost".to_string(),
            callback_port: 0,
            refresh_threshold: Duration::from_secs(60),
            login_timeout: Duration::from_secs(300),
            endpoints: EndpointOverrides::default(),
            use_discovery: false,
        }
    }

    pub fn from_config(config: &AppConfig) -> Self {
        Self {
            scope: config.auth.scope.clone(),
            callback_host: config.callback.host.clone(),
            callback_port: config.callback.port,
            refresh_threshold: Duration::from_secs(config.auth.refresh_threshold_secs),
            login_timeout: Duration::from_secs(config.auth.login_timeout_secs),
            use_discovery: config.auth.use_discovery,
            ..Self::new(&config.auth.base_url, &config.auth.realm, &config.auth.client_id)
        }
    }

    pub fn with_credential(mut self, credential: Credential) -> Self {
        self.credential = credential;
        self
    }

    pub fn with_interactive(mut self, interactive: bool) -> Self {
        self.interactive = interactive;
        self
    }

    pub fn with_callback(mut self, host: impl Into<String>, port: u16) -> Self {
        self.callback_host = host.into();
        self.callback_port = port;
        self
    }

    pub fn with_login_timeout(mut self, timeout: Duration) -> Self {
        self.login_timeout = timeout;
        self
    }

    pub fn with_refresh_threshold(mut self, threshold: Duration) -> Self {
        self.refresh_threshold = threshold;
        self
    }

    pub fn with_endpoints(mut self, endpoints: EndpointOverrides) -> Self {
        self.endpoints = endpoints;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_config() {
        let mut config = AppConfig::default();
        config.auth.base_url = "https://platform.example.com/".to_string();
        config.auth.login_timeout_secs = 30;
        config.callback.port = 8910;

        let params = AuthParams::from_config(&config);
        assert_eq!(params.base_url, "https://platform.example.com");
        assert_eq!(params.login_timeout, Duration::from_secs(30));
        assert_eq!(params.callback_port, 8910);
        assert_eq!(params.credential, Credential::None);
    }

    #[test]
    fn test_debug_hides_secret() {
        let params = AuthParams::new("https://p", "r", "c").with_credential(Credential::Secret("hunter2".into()));
        assert!(!format!("{params:?}").contains("hunter2"));
    }
}
