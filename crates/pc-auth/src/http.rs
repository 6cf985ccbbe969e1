//! Token, userinfo and logout endpoint calls

use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine};
use chrono::{DateTime, Duration, TimeZone, Utc};
use pc_token_store::UserInfo;
use serde::Deserialize;
use std::time::Duration as StdDuration;
use tracing::debug;

use crate::error::{AuthError, Result};

const REQUEST_TIMEOUT: StdDuration = StdDuration::from_secs(30);

/// Lifetime assumed when the server gives none and the token is opaque
const DEFAULT_ACCESS_LIFETIME_SECS: i64 = 300;

/// OAuth token endpoint response
#[derive(Debug, Clone, Deserialize)]
pub struct TokenResponse {
    pub access_token: String,
    #[serde(default)]
    pub token_type: Option<String>,
    #[serde(default)]
    pub expires_in: Option<i64>,
    #[serde(default)]
    pub refresh_token: Option<String>,
    /// Keycloak extension; 0 means the refresh token does not expire
    #[serde(default)]
    pub refresh_expires_in: Option<i64>,
    #[serde(default)]
    pub id_token: Option<String>,
    #[serde(default)]
    pub scope: Option<String>,
}

impl TokenResponse {
    pub fn access_expires_at(&self, now: DateTime<Utc>) -> DateTime<Utc> {
        match self.expires_in {
            Some(secs) => now + Duration::seconds(secs),
            None => jwt_expiry(&self.access_token)
                .unwrap_or_else(|| now + Duration::seconds(DEFAULT_ACCESS_LIFETIME_SECS)),
        }
    }

    pub fn refresh_expires_at(&self, now: DateTime<Utc>) -> Option<DateTime<Utc>> {
        match self.refresh_expires_in {
            Some(secs) if secs > 0 => Some(now + Duration::seconds(secs)),
            _ => None,
        }
    }
}

/// OAuth error body
#[derive(Debug, Deserialize)]
struct ErrorResponse {
    error: String,
    #[serde(default)]
    error_description: Option<String>,
}

/// Userinfo endpoint claims used to name the account
#[derive(Debug, Clone, Deserialize)]
pub struct UserInfoResponse {
    pub sub: Option<String>,
    pub preferred_username: Option<String>,
    pub email: Option<String>,
    pub name: Option<String>,
}

impl UserInfoResponse {
    /// Preferred username, then email, then `fallback`
    pub fn account_name(&self, fallback: &str) -> String {
        self.preferred_username
            .clone()
            .or_else(|| self.email.clone())
            .unwrap_or_else(|| fallback.to_string())
    }
}

impl From<UserInfoResponse> for UserInfo {
    fn from(info: UserInfoResponse) -> Self {
        UserInfo {
            subject: info.sub,
            username: info.preferred_username,
            email: info.email,
            name: info.name,
        }
    }
}

/// `exp` claim of a JWT access token, without verifying the signature
fn jwt_expiry(token: &str) -> Option<DateTime<Utc>> {
    let payload = token.split('.').nth(1)?;
    let bytes = URL_SAFE_NO_PAD.decode(payload.trim_end_matches('=')).ok()?;
    let claims: serde_json::Value = serde_json::from_slice(&bytes).ok()?;
    let exp = claims.get("exp")?.as_i64()?;
    Utc.timestamp_opt(exp, 0).single()
}

/// Shared HTTP client for the authorization server
#[derive(Debug, Clone)]
pub struct TokenClient {
    http: reqwest::Client,
}

impl Default for TokenClient {
    fn default() -> Self {
        Self::new()
    }
}

impl TokenClient {
    pub fn new() -> Self {
        let http = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .unwrap_or_else(|_| reqwest::Client::new());
        Self { http }
    }

    pub fn http(&self) -> &reqwest::Client {
        &self.http
    }

    /// POST a grant to the token endpoint
    pub async fn request_token(&self, endpoint: &str, params: &[(&str, &str)]) -> Result<TokenResponse> {
        let grant_type = params
            .iter()
            .find(|(k, _)| *k == "grant_type")
            .map(|(_, v)| *v)
            .unwrap_or("");
        debug!(endpoint, grant_type, "Requesting token");

        let response = self.http.post(endpoint).form(params).send().await?;
        let status = response.status();

        if status.is_success() {
            return response
                .json()
                .await
                .map_err(|e| AuthError::auth_failed(format!("Failed to parse token response: {e}")));
        }

        let body = response.text().await.unwrap_or_default();
        match serde_json::from_str::<ErrorResponse>(&body) {
            Ok(err) if status.is_client_error() => Err(AuthError::AuthFailed {
                message: match err.error_description {
                    Some(description) => format!("{}: {}", err.error, description),
                    None => err.error.clone(),
                },
                oauth_error: Some(err.error),
            }),
            _ if status.is_client_error() => Err(AuthError::auth_failed(format!(
                "Token endpoint returned {status}"
            ))),
            _ => Err(AuthError::RequestFailed {
                status: Some(status.as_u16()),
                message: format!("Token endpoint returned {status}"),
            }),
        }
    }

    /// GET the userinfo endpoint with the access token
    pub async fn userinfo(&self, endpoint: &str, access_token: &str) -> Result<UserInfoResponse> {
        let response = self
            .http
            .get(endpoint)
            .bearer_auth(access_token)
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(AuthError::auth_failed(format!(
                "Userinfo request failed: {}",
                response.status()
            )));
        }

        response
            .json()
            .await
            .map_err(|e| AuthError::auth_failed(format!("Failed to parse userinfo: {e}")))
    }

    /// POST to the logout endpoint to end the server session
    pub async fn logout(&self, endpoint: &str, params: &[(&str, &str)]) -> Result<()> {
        let response = self.http.post(endpoint).form(params).send().await?;
        if !response.status().is_success() {
            return Err(AuthError::RequestFailed {
                status: Some(response.status().as_u16()),
                message: format!("Logout endpoint returned {}", response.status()),
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_expiry_from_expires_in() {
        let now = Utc::now();
        let response: TokenResponse =
            serde_json::from_str(r#"{"access_token":"opaque","expires_in":120,"refresh_expires_in":0}"#).unwrap();
        assert_eq!(response.access_expires_at(now), now + Duration::seconds(120));
        assert_eq!(response.refresh_expires_at(now), None);
    }

    #[test]
    fn test_expiry_from_jwt_claim() {
        let payload = URL_SAFE_NO_PAD.encode(r#"{"exp":4102444800}"#);
        let token = format!("eyJhbGciOiJSUzI1NiJ9.{payload}.sig");
        let response: TokenResponse =
            serde_json::from_str(&format!(r#"{{"access_token":"{token}"}}"#)).unwrap();
        assert_eq!(response.access_expires_at(Utc::now()).timestamp(), 4102444800);
    }

    #[test]
    fn test_opaque_token_without_expiry_uses_default() {
        let now = Utc::now();
        let response: TokenResponse = serde_json::from_str(r#"{"access_token":"opaque"}"#).unwrap();
        assert_eq!(
            response.access_expires_at(now),
            now + Duration::seconds(DEFAULT_ACCESS_LIFETIME_SECS)
        );
    }

    #[test]
    fn test_account_name_preference() {
        let info = UserInfoResponse {
            sub: Some("123".into()),
            preferred_username: None,
            email: Some("dev@example.com".into()),
            name: None,
        };
        assert_eq!(info.account_name("client"), "dev@example.com");

        let bare = UserInfoResponse {
            sub: None,
            preferred_username: None,
            email: None,
            name: None,
        };
        assert_eq!(bare.account_name("client"), "client");
    }
}
