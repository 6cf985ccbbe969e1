//! Account orchestration: login, logout, lookup and refresh
//!
//! `AuthService` owns the token store and the callback server. Interactive
//! logins return a [`PendingLoginHandle`] immediately; everything else
//! completes before returning.

use chrono::Utc;
use parking_lot::Mutex;
use pc_config::AppConfig;
use pc_token_store::{AccountSelector, StoreOptions, TokenRecord, TokenStore};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::oneshot;
use tracing::{debug, info, warn};

use crate::account::Account;
use crate::authenticator::{Authenticator, ExchangeInput};
use crate::endpoints::{discover, EndpointOverrides};
use crate::error::{AuthError, Result};
use crate::http::TokenClient;
use crate::params::{AuthParams, Credential, PrivateKeySource};
use crate::server::CallbackServer;

/// Per-login overrides of the configured defaults
#[derive(Debug, Clone, Default)]
pub struct LoginOptions {
    pub base_url: Option<String>,
    pub realm: Option<String>,
    pub client_id: Option<String>,
    pub secret: Option<String>,
    pub private_key: Option<PrivateKeySource>,
    /// Use the browser flow for a client secret
    pub interactive: bool,
}

#[derive(Debug, Clone, Default)]
pub struct ListOptions {
    /// Only accounts for this platform
    pub base_url: Option<String>,
}

/// Result of [`AuthService::login`]
#[derive(Debug)]
pub enum Login {
    /// Waiting for the browser to reach the callback server
    Pending(PendingLoginHandle),
    Complete(Account),
}

impl Login {
    /// Wait for a pending login; a complete one is returned as-is
    pub async fn into_account(self) -> Result<Account> {
        match self {
            Login::Pending(handle) => handle.wait().await,
            Login::Complete(account) => Ok(account),
        }
    }
}

/// Cancels one pending login from anywhere, e.g. a Ctrl-C handler
#[derive(Clone)]
pub struct LoginCanceller {
    server: CallbackServer,
    request_id: String,
}

impl LoginCanceller {
    /// Returns false if the login already settled
    pub fn cancel(&self) -> bool {
        self.server.cancel(&self.request_id)
    }
}

impl std::fmt::Debug for LoginCanceller {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LoginCanceller").finish_non_exhaustive()
    }
}

/// An interactive login waiting for its callback
#[derive(Debug)]
pub struct PendingLoginHandle {
    /// Open this in the browser
    pub url: String,
    pub request_id: String,
    canceller: LoginCanceller,
    result: oneshot::Receiver<Result<Account>>,
}

impl PendingLoginHandle {
    pub fn cancel(&self) -> bool {
        self.canceller.cancel()
    }

    pub fn canceller(&self) -> LoginCanceller {
        self.canceller.clone()
    }

    /// Resolves once the account has been stored, or with the login's error
    pub async fn wait(self) -> Result<Account> {
        self.result.await.map_err(|_| AuthError::ServerStopped)?
    }
}

pub struct AuthService {
    params: AuthParams,
    store: Arc<TokenStore>,
    server: CallbackServer,
    client: TokenClient,
    /// Discovery documents already fetched, keyed by (base URL, realm)
    discovered: Mutex<HashMap<(String, String), EndpointOverrides>>,
}

impl AuthService {
    pub fn new(params: AuthParams, store: TokenStore) -> Self {
        let server = CallbackServer::new(params.callback_host.clone(), params.callback_port);
        Self {
            params,
            store: Arc::new(store),
            server,
            client: TokenClient::new(),
            discovered: Mutex::new(HashMap::new()),
        }
    }

    /// Open the configured token store and build the service around it
    pub async fn from_config(config: &AppConfig) -> Result<Self> {
        let options = StoreOptions {
            dir: config.token_store.resolved_dir(),
            file_key: config.token_store.file_key().map(str::to_string),
            ..StoreOptions::default()
        };
        let store = TokenStore::open_str(&config.token_store.level, &options).await?;
        Ok(Self::new(AuthParams::from_config(config), store))
    }

    pub fn params(&self) -> &AuthParams {
        &self.params
    }

    pub fn store(&self) -> &TokenStore {
        &self.store
    }

    pub fn server(&self) -> &CallbackServer {
        &self.server
    }

    /// Start a login. Credential selection: private key, then secret, then browser.
    pub async fn login(&self, options: LoginOptions) -> Result<Login> {
        let mut params = self.params.clone();
        if let Some(base_url) = options.base_url {
            params.base_url = base_url.trim_end_matches('/').to_string();
        }
        if let Some(realm) = options.realm {
            params.realm = realm;
        }
        if let Some(client_id) = options.client_id {
            params.client_id = client_id;
        }
        params.credential = match (options.private_key, options.secret) {
            (Some(key), _) => Credential::PrivateKey(key),
            (None, Some(secret)) => Credential::Secret(secret),
            (None, None) => Credential::None,
        };
        params.interactive = options.interactive;
        params.endpoints = self.configured_overrides(&params.base_url, &params.realm);

        // Validate offline before any discovery request
        let mut authenticator = Authenticator::new(&params, self.client.clone())?;
        if self.params.use_discovery {
            params.endpoints = self.resolve_overrides(&params.base_url, &params.realm).await?;
            authenticator = Authenticator::new(&params, self.client.clone())?;
        }

        if !authenticator.is_interactive() {
            let record = authenticator.exchange(ExchangeInput::ClientCredentials).await?;
            self.store.set(record.clone()).await?;
            return Ok(Login::Complete(record.into()));
        }

        let started = self
            .server
            .begin_login(Arc::new(authenticator), params.login_timeout)?;
        info!(request_id = %started.request_id, "Waiting for browser login");

        let (sender, result) = oneshot::channel();
        let store = self.store.clone();
        let receiver = started.receiver;
        tokio::spawn(async move {
            let outcome = match receiver.await {
                Ok(Ok(record)) => match store.set(record.clone()).await {
                    Ok(()) => Ok(Account::from(record)),
                    Err(e) => Err(e.into()),
                },
                Ok(Err(e)) => Err(e),
                Err(_) => Err(AuthError::ServerStopped),
            };
            let _ = sender.send(outcome);
        });

        Ok(Login::Pending(PendingLoginHandle {
            url: started.url,
            canceller: LoginCanceller {
                server: self.server.clone(),
                request_id: started.request_id.clone(),
            },
            request_id: started.request_id,
            result,
        }))
    }

    /// Revoke and forget the selected accounts, returning what was removed.
    ///
    /// An undecryptable store is reset when every account is selected.
    pub async fn logout(&self, selector: &AccountSelector, base_url: Option<&str>) -> Result<Vec<Account>> {
        let records = match self.store.list().await {
            Ok(records) => records,
            Err(e) if e.is_bad_key() && *selector == AccountSelector::All => {
                warn!(error = %e, "Token store unreadable, resetting it");
                self.store.reset().await?;
                return Ok(Vec::new());
            }
            Err(e) => return Err(e.into()),
        };

        for record in records
            .iter()
            .filter(|r| selector.matches(r) && r.matches_base_url(base_url))
        {
            let revoked = match self.authenticator_for(record).await {
                Ok(authenticator) => authenticator.revoke(record).await,
                Err(e) => Err(e),
            };
            if let Err(e) = revoked {
                debug!(account = %record.name, error = %e, "Session revoke failed, removing locally");
            }
        }

        let removed = self.store.delete(selector, base_url).await?;
        info!(count = removed.len(), "Logged out");
        Ok(removed.into_iter().map(Account::from).collect())
    }

    /// Look up one account by name or identity hash, renewing it if due
    pub async fn find(&self, name_or_hash: &str) -> Result<Option<Account>> {
        let Some(record) = self
            .store
            .list()
            .await?
            .into_iter()
            .find(|r| r.matches(name_or_hash))
        else {
            return Ok(None);
        };
        Ok(self.renew_if_due(record).await?.map(Account::from))
    }

    /// Every stored account, renewing those close to expiry
    pub async fn list(&self, options: ListOptions) -> Result<Vec<Account>> {
        let records = self.store.list().await?;
        let mut accounts = Vec::with_capacity(records.len());
        for record in records
            .into_iter()
            .filter(|r| r.matches_base_url(options.base_url.as_deref()))
        {
            if let Some(record) = self.renew_if_due(record).await? {
                accounts.push(Account::from(record));
            }
        }
        Ok(accounts)
    }

    /// Renew one account now, regardless of its expiry
    pub async fn refresh(&self, name_or_hash: &str) -> Result<Account> {
        let record = self
            .store
            .list()
            .await?
            .into_iter()
            .find(|r| r.matches(name_or_hash))
            .ok_or_else(|| AuthError::InvalidArgument(format!("no stored account matches '{name_or_hash}'")))?;

        match self.renew(&record).await {
            Ok(updated) => {
                self.store.set(updated.clone()).await?;
                Ok(updated.into())
            }
            Err(e) => {
                if e.is_session_over() {
                    self.forget(&record).await?;
                }
                Err(e)
            }
        }
    }

    /// Stop the callback server, rejecting pending logins
    pub fn shutdown(&self) {
        self.server.stop(true);
    }

    async fn renew_if_due(&self, record: TokenRecord) -> Result<Option<TokenRecord>> {
        let now = Utc::now();
        let threshold = chrono::Duration::from_std(self.params.refresh_threshold).unwrap_or(chrono::Duration::zero());
        if !record.expires_within(now, threshold) {
            return Ok(Some(record));
        }
        // Nothing to renew with; the purge rule drops it once the access token expires
        if !record.has_usable_refresh_token(now) && !record.can_reauthenticate() {
            return Ok(Some(record));
        }

        match self.renew(&record).await {
            Ok(updated) => {
                self.store.set(updated.clone()).await?;
                Ok(Some(updated))
            }
            Err(e) if e.is_session_over() => {
                warn!(account = %record.name, code = e.code(), "Session ended, removing stored account");
                self.forget(&record).await?;
                Ok(None)
            }
            Err(e) => {
                warn!(account = %record.name, error = %e, "Token refresh failed, using stored token");
                Ok(Some(record))
            }
        }
    }

    /// Refresh token first; service accounts fall back to a new client-credentials exchange
    async fn renew(&self, record: &TokenRecord) -> Result<TokenRecord> {
        let authenticator = self.authenticator_for(record).await?;

        if record.has_usable_refresh_token(Utc::now()) {
            match authenticator.refresh(record).await {
                Err(e) if e.is_session_over() && record.can_reauthenticate() => {
                    debug!(account = %record.name, "Refresh token rejected, re-authenticating");
                }
                other => return other,
            }
        }

        if record.can_reauthenticate() {
            let mut fresh = authenticator.exchange(ExchangeInput::ClientCredentials).await?;
            fresh.created_at = record.created_at;
            return Ok(fresh);
        }

        Err(AuthError::TokenExpired)
    }

    async fn forget(&self, record: &TokenRecord) -> Result<()> {
        self.store
            .delete(&AccountSelector::Names(vec![record.hash.clone()]), None)
            .await?;
        Ok(())
    }

    async fn authenticator_for(&self, record: &TokenRecord) -> Result<Authenticator> {
        let defaults = AuthParams {
            base_url: record.base_url.clone(),
            realm: record.realm.clone(),
            endpoints: self.resolve_overrides(&record.base_url, &record.realm).await?,
            ..self.params.clone()
        };
        Authenticator::from_record(record, &defaults, self.client.clone())
    }

    /// Configured overrides apply only to the configured realm
    fn configured_overrides(&self, base_url: &str, realm: &str) -> EndpointOverrides {
        let same_realm = self.params.base_url.trim_end_matches('/') == base_url.trim_end_matches('/')
            && self.params.realm == realm;
        if same_realm {
            self.params.endpoints.clone()
        } else {
            EndpointOverrides::default()
        }
    }

    /// Configured overrides, filled in from discovery when enabled
    async fn resolve_overrides(&self, base_url: &str, realm: &str) -> Result<EndpointOverrides> {
        let configured = self.configured_overrides(base_url, realm);
        if !self.params.use_discovery {
            return Ok(configured);
        }

        let key = (base_url.trim_end_matches('/').to_string(), realm.to_string());
        let cached = self.discovered.lock().get(&key).cloned();
        let discovered = match cached {
            Some(overrides) => overrides,
            None => {
                let document = discover(self.client.http(), base_url, realm).await?;
                let overrides = EndpointOverrides::from_discovery(&document);
                self.discovered.lock().insert(key, overrides.clone());
                overrides
            }
        };

        Ok(EndpointOverrides {
            authorization: configured.authorization.or(discovered.authorization),
            token: configured.token.or(discovered.token),
            userinfo: configured.userinfo.or(discovered.userinfo),
            certs: configured.certs.or(discovered.certs),
            logout: configured.logout.or(discovered.logout),
        })
    }
}

impl Drop for AuthService {
    fn drop(&mut self) {
        self.server.stop(true);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn service() -> AuthService {
        let params = AuthParams::new("http://127.0.0.1:1", "acme", "pc-cli").with_callback("127.0.0.1", 0);
        AuthService::new(params, TokenStore::Memory(Default::default()))
    }

    #[tokio::test]
    async fn test_find_on_empty_store() {
        assert!(service().find("alice").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_refresh_unknown_account() {
        let err = service().refresh("nobody").await.unwrap_err();
        assert_eq!(err.code(), "INVALID_ARGUMENT");
    }

    #[tokio::test]
    async fn test_interactive_private_key_rejected_offline() {
        let err = service()
            .login(LoginOptions {
                private_key: Some(PrivateKeySource::Inline("not a key".into())),
                interactive: true,
                ..Default::default()
            })
            .await
            .unwrap_err();
        assert_eq!(err.code(), "INVALID_ARGUMENT");
    }

    #[tokio::test]
    async fn test_empty_secret_rejected_offline() {
        let err = service()
            .login(LoginOptions {
                secret: Some(String::new()),
                ..Default::default()
            })
            .await
            .unwrap_err();
        assert_eq!(err.code(), "MISSING_REQUIRED_PARAMETER");
    }

    #[tokio::test]
    async fn test_pending_login_cancel() {
        let service = service();
        let Login::Pending(handle) = service.login(LoginOptions::default()).await.unwrap() else {
            panic!("browser login should be pending");
        };
        assert!(handle.url.contains("code_challenge="));
        assert!(service.server().is_running());

        assert!(handle.cancel());
        assert!(!handle.cancel());
        assert!(matches!(handle.wait().await, Err(AuthError::Cancelled)));
        assert!(!service.server().is_running());
    }

    #[tokio::test]
    async fn test_shutdown_rejects_pending_logins() {
        let service = service();
        let login = service.login(LoginOptions::default()).await.unwrap();
        service.shutdown();
        assert!(matches!(login.into_account().await, Err(AuthError::ServerStopped)));
    }
}
