//! Credential strategies
//!
//! One variant per credential type:
//! - `Pkce`: interactive browser login with a PKCE-bound authorization code
//! - `ClientSecret`: shared secret, client credentials or (optionally) interactive
//! - `SignedJwt`: RSA-signed client assertion, never interactive
//!
//! Every variant computes a stable identity hash at construction, exchanges
//! codes or client credentials for a [`TokenRecord`], refreshes it and
//! revokes it.

mod client_secret;
mod pkce;
mod signed_jwt;

pub use client_secret::ClientSecretAuthenticator;
pub use pkce::PkceAuthenticator;
pub use signed_jwt::SignedJwtAuthenticator;

use chrono::{DateTime, Utc};
use pc_token_store::{AuthenticatorKind, TokenRecord};
use sha2::{Digest, Sha256};
use tracing::{debug, info};

use crate::endpoints::{EndpointOverrides, Endpoints};
use crate::error::{AuthError, Result};
use crate::http::{TokenClient, TokenResponse, UserInfoResponse};
use crate::params::{AuthParams, Credential, PrivateKeySource};

/// Hex SHA-256 over the account coordinates and the credential material
pub fn identity_hash(
    base_url: &str,
    realm: &str,
    client_id: &str,
    kind: AuthenticatorKind,
    material: Option<&str>,
) -> String {
    let mut hasher = Sha256::new();
    for part in [
        base_url.trim_end_matches('/'),
        realm,
        client_id,
        kind.as_str(),
        material.unwrap_or(""),
    ] {
        hasher.update(part.as_bytes());
        hasher.update([0u8]);
    }
    hex::encode(hasher.finalize())
}

/// State shared by every variant
#[derive(Debug, Clone)]
pub(crate) struct AuthContext {
    pub base_url: String,
    pub realm: String,
    pub client_id: String,
    pub scope: String,
    pub endpoints: Endpoints,
    pub client: TokenClient,
    pub identity_hash: String,
}

impl AuthContext {
    fn new(params: &AuthParams, client: TokenClient, kind: AuthenticatorKind, material: Option<&str>) -> Self {
        let base_url = params.base_url.trim_end_matches('/').to_string();
        Self {
            identity_hash: identity_hash(&base_url, &params.realm, &params.client_id, kind, material),
            endpoints: Endpoints::resolve(&base_url, &params.realm).with_overrides(&params.endpoints),
            base_url,
            realm: params.realm.clone(),
            client_id: params.client_id.clone(),
            scope: params.scope.clone(),
            client,
        }
    }

    /// Authorization endpoint URL with the standard code-flow parameters
    fn authorization_url(&self, state: &str, redirect_uri: &str, extra: &[(&str, &str)]) -> String {
        let mut url = format!(
            "{}?response_type=code&client_id={}&redirect_uri={}&scope={}&state={}",
            self.endpoints.authorization,
            urlencoding::encode(&self.client_id),
            urlencoding::encode(redirect_uri),
            urlencoding::encode(&self.scope),
            urlencoding::encode(state),
        );
        for (key, value) in extra {
            url.push_str(&format!("&{}={}", key, urlencoding::encode(value)));
        }
        url
    }
}

/// Browser URL for an interactive login
#[derive(Debug, Clone)]
pub struct AuthorizationRequest {
    pub url: String,
    pub redirect_uri: String,
    /// PKCE verifier to present with the code
    pub code_verifier: Option<String>,
}

/// What is traded at the token endpoint
#[derive(Debug, Clone)]
pub enum ExchangeInput {
    AuthorizationCode {
        code: String,
        redirect_uri: String,
        code_verifier: Option<String>,
    },
    ClientCredentials,
}

/// Credential strategy for one account
#[derive(Debug)]
pub enum Authenticator {
    Pkce(PkceAuthenticator),
    ClientSecret(ClientSecretAuthenticator),
    SignedJwt(SignedJwtAuthenticator),
}

impl Authenticator {
    /// Select the variant from the credential: private key, then secret, then PKCE.
    ///
    /// Validation happens here and never touches the network.
    pub fn new(params: &AuthParams, client: TokenClient) -> Result<Self> {
        if params.base_url.trim().is_empty() {
            return Err(AuthError::MissingRequiredParameter("base_url".to_string()));
        }
        if params.realm.trim().is_empty() {
            return Err(AuthError::MissingRequiredParameter("realm".to_string()));
        }
        if params.client_id.trim().is_empty() {
            return Err(AuthError::MissingRequiredParameter("client_id".to_string()));
        }

        let authenticator = match &params.credential {
            Credential::PrivateKey(source) => {
                if params.interactive {
                    return Err(AuthError::InvalidArgument(
                        "private key service accounts cannot log in interactively".to_string(),
                    ));
                }
                Authenticator::SignedJwt(SignedJwtAuthenticator::new(params, source, client)?)
            }
            Credential::Secret(secret) => {
                Authenticator::ClientSecret(ClientSecretAuthenticator::new(params, secret, client)?)
            }
            Credential::None => Authenticator::Pkce(PkceAuthenticator::new(params, client)),
        };

        debug!(
            kind = %authenticator.kind(),
            interactive = authenticator.is_interactive(),
            client_id = %params.client_id,
            "Created authenticator"
        );
        Ok(authenticator)
    }

    /// Rebuild the authenticator that produced a stored record
    pub fn from_record(record: &TokenRecord, defaults: &AuthParams, client: TokenClient) -> Result<Self> {
        let stored = || {
            record.credential.clone().ok_or_else(|| {
                AuthError::MissingRequiredParameter(format!("stored credential for account '{}'", record.name))
            })
        };
        let credential = match record.authenticator {
            AuthenticatorKind::Pkce => Credential::None,
            AuthenticatorKind::ClientSecret => Credential::Secret(stored()?),
            AuthenticatorKind::SignedJwt => Credential::PrivateKey(PrivateKeySource::Inline(stored()?)),
        };

        // Endpoint overrides only apply to the realm they were configured for
        let same_realm = defaults.base_url.trim_end_matches('/') == record.base_url.trim_end_matches('/')
            && defaults.realm == record.realm;

        let params = AuthParams {
            base_url: record.base_url.clone(),
            realm: record.realm.clone(),
            client_id: record.client_id.clone(),
            credential,
            interactive: record.interactive,
            endpoints: if same_realm {
                defaults.endpoints.clone()
            } else {
                EndpointOverrides::default()
            },
            ..defaults.clone()
        };
        Self::new(&params, client)
    }

    fn context(&self) -> &AuthContext {
        match self {
            Authenticator::Pkce(a) => &a.context,
            Authenticator::ClientSecret(a) => &a.context,
            Authenticator::SignedJwt(a) => &a.context,
        }
    }

    pub fn kind(&self) -> AuthenticatorKind {
        match self {
            Authenticator::Pkce(_) => AuthenticatorKind::Pkce,
            Authenticator::ClientSecret(_) => AuthenticatorKind::ClientSecret,
            Authenticator::SignedJwt(_) => AuthenticatorKind::SignedJwt,
        }
    }

    pub fn identity_hash(&self) -> &str {
        &self.context().identity_hash
    }

    pub fn is_interactive(&self) -> bool {
        match self {
            Authenticator::Pkce(_) => true,
            Authenticator::ClientSecret(a) => a.interactive,
            Authenticator::SignedJwt(_) => false,
        }
    }

    pub fn endpoints(&self) -> &Endpoints {
        &self.context().endpoints
    }

    pub fn client_id(&self) -> &str {
        &self.context().client_id
    }

    /// Browser URL for `request_id`, which doubles as the OAuth `state`
    pub fn authorization_request(&self, request_id: &str, redirect_uri: &str) -> Result<AuthorizationRequest> {
        match self {
            Authenticator::Pkce(a) => Ok(a.authorization_request(request_id, redirect_uri)),
            Authenticator::ClientSecret(a) if a.interactive => Ok(AuthorizationRequest {
                url: a.context.authorization_url(request_id, redirect_uri, &[]),
                redirect_uri: redirect_uri.to_string(),
                code_verifier: None,
            }),
            _ => Err(AuthError::InvalidArgument(format!(
                "{} authenticator does not support browser login",
                self.kind()
            ))),
        }
    }

    /// Client authentication parameters for token and logout requests
    fn client_auth(&self) -> Result<Vec<(&'static str, String)>> {
        let ctx = self.context();
        let mut params = vec![("client_id", ctx.client_id.clone())];
        match self {
            Authenticator::Pkce(_) => {}
            Authenticator::ClientSecret(a) => params.push(("client_secret", a.secret().to_string())),
            Authenticator::SignedJwt(a) => {
                params.push(("client_assertion_type", signed_jwt::CLIENT_ASSERTION_TYPE.to_string()));
                params.push(("client_assertion", a.assertion()?));
            }
        }
        Ok(params)
    }

    /// Material a later process needs to rebuild this authenticator
    fn stored_credential(&self) -> Option<String> {
        match self {
            Authenticator::Pkce(_) => None,
            Authenticator::ClientSecret(a) => Some(a.secret().to_string()),
            Authenticator::SignedJwt(a) => Some(a.pem().to_string()),
        }
    }

    /// Trade a code or client credentials for tokens, then name the account from userinfo
    pub async fn exchange(&self, input: ExchangeInput) -> Result<TokenRecord> {
        let ctx = self.context();
        let mut params: Vec<(&'static str, String)> = match input {
            ExchangeInput::AuthorizationCode {
                code,
                redirect_uri,
                code_verifier,
            } => {
                if !self.is_interactive() {
                    return Err(AuthError::InvalidArgument(format!(
                        "{} authenticator does not accept authorization codes",
                        self.kind()
                    )));
                }
                let mut params = vec![
                    ("grant_type", "authorization_code".to_string()),
                    ("code", code),
                    ("redirect_uri", redirect_uri),
                ];
                match code_verifier {
                    Some(verifier) => params.push(("code_verifier", verifier)),
                    None if matches!(self, Authenticator::Pkce(_)) => {
                        return Err(AuthError::MissingRequiredParameter("code_verifier".to_string()))
                    }
                    None => {}
                }
                params
            }
            ExchangeInput::ClientCredentials => {
                if self.is_interactive() {
                    return Err(AuthError::InvalidArgument(
                        "interactive logins must complete through the browser".to_string(),
                    ));
                }
                vec![
                    ("grant_type", "client_credentials".to_string()),
                    ("scope", ctx.scope.clone()),
                ]
            }
        };
        params.extend(self.client_auth()?);

        let response = ctx
            .client
            .request_token(&ctx.endpoints.token, &as_pairs(&params))
            .await?;
        let userinfo = ctx
            .client
            .userinfo(&ctx.endpoints.userinfo, &response.access_token)
            .await?;

        let record = self.new_record(response, userinfo, Utc::now());
        info!(account = %record.name, kind = %record.authenticator, "Authenticated");
        Ok(record)
    }

    fn new_record(&self, response: TokenResponse, userinfo: UserInfoResponse, now: DateTime<Utc>) -> TokenRecord {
        let ctx = self.context();
        TokenRecord {
            hash: ctx.identity_hash.clone(),
            base_url: ctx.base_url.clone(),
            realm: ctx.realm.clone(),
            client_id: ctx.client_id.clone(),
            name: userinfo.account_name(&ctx.client_id),
            authenticator: self.kind(),
            interactive: self.is_interactive(),
            credential: self.stored_credential(),
            access_expires_at: response.access_expires_at(now),
            refresh_expires_at: response.refresh_expires_at(now),
            access_token: response.access_token,
            refresh_token: response.refresh_token,
            id_token: response.id_token,
            user: userinfo.into(),
            created_at: now,
            updated_at: now,
        }
    }

    /// Renew the access token with the record's refresh token
    pub async fn refresh(&self, record: &TokenRecord) -> Result<TokenRecord> {
        let now = Utc::now();
        let refresh_token = match record.refresh_token.as_deref() {
            Some(token) if record.has_usable_refresh_token(now) => token,
            _ => return Err(AuthError::TokenExpired),
        };

        let ctx = self.context();
        let mut params = vec![
            ("grant_type", "refresh_token".to_string()),
            ("refresh_token", refresh_token.to_string()),
        ];
        params.extend(self.client_auth()?);

        let response = match ctx
            .client
            .request_token(&ctx.endpoints.token, &as_pairs(&params))
            .await
        {
            Ok(response) => response,
            Err(AuthError::AuthFailed {
                oauth_error: Some(ref code),
                ..
            }) if code == "invalid_grant" => return Err(AuthError::SessionInvalidated),
            Err(e) => return Err(e),
        };

        debug!(account = %record.name, "Refreshed access token");
        Ok(apply_refresh(record, response, now))
    }

    /// End the server-side session; callers treat failure as non-fatal
    pub async fn revoke(&self, record: &TokenRecord) -> Result<()> {
        let Some(refresh_token) = record.refresh_token.as_deref() else {
            return Ok(());
        };
        let ctx = self.context();
        let mut params = vec![("refresh_token", refresh_token.to_string())];
        params.extend(self.client_auth()?);
        ctx.client.logout(&ctx.endpoints.logout, &as_pairs(&params)).await
    }
}

fn as_pairs<'a>(params: &'a [(&'static str, String)]) -> Vec<(&'static str, &'a str)> {
    params.iter().map(|(k, v)| (*k, v.as_str())).collect()
}

/// New tokens over an existing record; a refresh token the server did not rotate is kept
fn apply_refresh(record: &TokenRecord, response: TokenResponse, now: DateTime<Utc>) -> TokenRecord {
    let mut updated = record.clone();
    updated.access_expires_at = response.access_expires_at(now);
    if response.refresh_token.is_some() || response.refresh_expires_in.is_some() {
        updated.refresh_expires_at = response.refresh_expires_at(now);
    }
    updated.access_token = response.access_token;
    if let Some(token) = response.refresh_token {
        updated.refresh_token = Some(token);
    }
    if let Some(token) = response.id_token {
        updated.id_token = Some(token);
    }
    updated.updated_at = now;
    updated
}

/// URL-safe random string from `len` random bytes
pub(crate) fn random_token(len: usize) -> String {
    use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine};
    use rand::Rng;

    let mut bytes = vec![0u8; len];
    rand::rng().fill(&mut bytes[..]);
    URL_SAFE_NO_PAD.encode(bytes)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn params() -> AuthParams {
        AuthParams::new("https://platform.example.com", "acme", "pc-cli")
    }

    #[test]
    fn test_identity_hash_is_stable_and_material_sensitive() {
        let a = identity_hash("https://p/", "r", "c", AuthenticatorKind::ClientSecret, Some("s1"));
        let b = identity_hash("https://p", "r", "c", AuthenticatorKind::ClientSecret, Some("s1"));
        let c = identity_hash("https://p", "r", "c", AuthenticatorKind::ClientSecret, Some("s2"));
        assert_eq!(a, b);
        assert_ne!(a, c);
        assert_eq!(a.len(), 64);
    }

    #[test]
    fn test_selection_by_credential() {
        let pkce = Authenticator::new(&params(), TokenClient::new()).unwrap();
        assert_eq!(pkce.kind(), AuthenticatorKind::Pkce);
        assert!(pkce.is_interactive());

        let secret = Authenticator::new(
            &params().with_credential(Credential::Secret("s3cret".into())),
            TokenClient::new(),
        )
        .unwrap();
        assert_eq!(secret.kind(), AuthenticatorKind::ClientSecret);
        assert!(!secret.is_interactive());

        let interactive = Authenticator::new(
            &params()
                .with_credential(Credential::Secret("s3cret".into()))
                .with_interactive(true),
            TokenClient::new(),
        )
        .unwrap();
        assert!(interactive.is_interactive());
    }

    #[test]
    fn test_same_material_same_hash() {
        let p = params().with_credential(Credential::Secret("s3cret".into()));
        let a = Authenticator::new(&p, TokenClient::new()).unwrap();
        let b = Authenticator::new(&p, TokenClient::new()).unwrap();
        assert_eq!(a.identity_hash(), b.identity_hash());

        let pkce = Authenticator::new(&params(), TokenClient::new()).unwrap();
        assert_ne!(a.identity_hash(), pkce.identity_hash());
    }

    #[test]
    fn test_missing_client_id_is_rejected() {
        let err = Authenticator::new(&AuthParams::new("https://p", "r", " "), TokenClient::new()).unwrap_err();
        assert_eq!(err.code(), "MISSING_REQUIRED_PARAMETER");
    }

    #[test]
    fn test_non_interactive_has_no_authorization_request() {
        let secret = Authenticator::new(
            &params().with_credential(Credential::Secret("s3cret".into())),
            TokenClient::new(),
        )
        .unwrap();
        let err = secret
            .authorization_request("id", "http://127.0.0.1:1/callback/id")
            .unwrap_err();
        assert_eq!(err.code(), "INVALID_ARGUMENT");
    }

    #[test]
    fn test_interactive_client_secret_url_has_no_challenge() {
        let auth = Authenticator::new(
            &params()
                .with_credential(Credential::Secret("s3cret".into()))
                .with_interactive(true),
            TokenClient::new(),
        )
        .unwrap();
        let request = auth
            .authorization_request("req-1", "http://127.0.0.1:5000/callback/req-1")
            .unwrap();
        assert!(request.url.contains("state=req-1"));
        assert!(!request.url.contains("code_challenge"));
        assert!(!request.url.contains("s3cret"));
        assert!(request.code_verifier.is_none());
    }

    #[test]
    fn test_apply_refresh_keeps_unrotated_refresh_token() {
        let now = Utc::now();
        let record = TokenRecord {
            hash: "h".into(),
            base_url: "https://p".into(),
            realm: "r".into(),
            client_id: "c".into(),
            name: "alice".into(),
            authenticator: AuthenticatorKind::Pkce,
            interactive: true,
            credential: None,
            access_token: "old".into(),
            refresh_token: Some("rt-1".into()),
            id_token: None,
            access_expires_at: now,
            refresh_expires_at: Some(now + chrono::Duration::hours(1)),
            user: Default::default(),
            created_at: now,
            updated_at: now,
        };
        let response: TokenResponse =
            serde_json::from_str(r#"{"access_token":"new","expires_in":300}"#).unwrap();

        let updated = apply_refresh(&record, response, now);
        assert_eq!(updated.access_token, "new");
        assert_eq!(updated.refresh_token.as_deref(), Some("rt-1"));
        assert_eq!(updated.refresh_expires_at, record.refresh_expires_at);
        assert_eq!(updated.created_at, record.created_at);
    }

    #[test]
    fn test_random_token_is_unique() {
        let a = random_token(32);
        let b = random_token(32);
        assert_ne!(a, b);
        assert_eq!(a.len(), 43);
    }
}
