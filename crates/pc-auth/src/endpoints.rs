//! OIDC endpoint resolution for a platform base URL and realm

use serde::Deserialize;
use tracing::info;

use crate::error::{AuthError, Result};

/// OIDC provider discovery document
#[derive(Debug, Clone, Deserialize)]
pub struct OidcDiscovery {
    pub issuer: String,
    pub authorization_endpoint: String,
    pub token_endpoint: String,
    pub userinfo_endpoint: Option<String>,
    pub jwks_uri: String,
    pub end_session_endpoint: Option<String>,
    #[serde(default)]
    pub grant_types_supported: Option<Vec<String>>,
    #[serde(default)]
    pub code_challenge_methods_supported: Option<Vec<String>>,
}

/// Per-endpoint replacements for the conventional layout
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EndpointOverrides {
    pub authorization: Option<String>,
    pub token: Option<String>,
    pub userinfo: Option<String>,
    pub certs: Option<String>,
    pub logout: Option<String>,
}

impl EndpointOverrides {
    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }

    /// Overrides taken from a discovery document
    pub fn from_discovery(discovery: &OidcDiscovery) -> Self {
        Self {
            authorization: Some(discovery.authorization_endpoint.clone()),
            token: Some(discovery.token_endpoint.clone()),
            userinfo: discovery.userinfo_endpoint.clone(),
            certs: Some(discovery.jwks_uri.clone()),
            logout: discovery.end_session_endpoint.clone(),
        }
    }
}

/// Resolved endpoint URLs for one realm
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Endpoints {
    pub authorization: String,
    pub token: String,
    pub userinfo: String,
    pub certs: String,
    pub logout: String,
    pub discovery: String,
}

impl Endpoints {
    /// `{base}/auth/realms/{realm}/protocol/openid-connect/*`
    pub fn resolve(base_url: &str, realm: &str) -> Self {
        let realm_url = format!(
            "{}/auth/realms/{}",
            base_url.trim_end_matches('/'),
            urlencoding::encode(realm)
        );
        let protocol = format!("{realm_url}/protocol/openid-connect");
        Self {
            authorization: format!("{protocol}/auth"),
            token: format!("{protocol}/token"),
            userinfo: format!("{protocol}/userinfo"),
            certs: format!("{protocol}/certs"),
            logout: format!("{protocol}/logout"),
            discovery: format!("{realm_url}/.well-known/openid-configuration"),
        }
    }

    pub fn with_overrides(mut self, overrides: &EndpointOverrides) -> Self {
        if let Some(url) = &overrides.authorization {
            self.authorization = url.clone();
        }
        if let Some(url) = &overrides.token {
            self.token = url.clone();
        }
        if let Some(url) = &overrides.userinfo {
            self.userinfo = url.clone();
        }
        if let Some(url) = &overrides.certs {
            self.certs = url.clone();
        }
        if let Some(url) = &overrides.logout {
            self.logout = url.clone();
        }
        self
    }
}

/// Fetch the realm's discovery document
pub async fn discover(http: &reqwest::Client, base_url: &str, realm: &str) -> Result<OidcDiscovery> {
    let discovery_url = Endpoints::resolve(base_url, realm).discovery;

    info!("Fetching OIDC discovery document from {}", discovery_url);

    let response = http.get(&discovery_url).send().await?;
    if !response.status().is_success() {
        return Err(AuthError::RequestFailed {
            status: Some(response.status().as_u16()),
            message: format!("Failed to fetch OIDC discovery from {discovery_url}"),
        });
    }

    response
        .json()
        .await
        .map_err(|e| AuthError::request_failed(format!("Failed to parse OIDC discovery: {e}")))
}
