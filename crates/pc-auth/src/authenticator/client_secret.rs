//! Shared-secret client authentication

use pc_token_store::AuthenticatorKind;
use std::fmt;

use super::AuthContext;
use crate::error::{AuthError, Result};
use crate::http::TokenClient;
use crate::params::AuthParams;

/// Confidential client presenting `client_secret`.
///
/// Uses `client_credentials` unless built as interactive, in which case the
/// browser flow is used and the secret accompanies the code exchange.
pub struct ClientSecretAuthenticator {
    pub(crate) context: AuthContext,
    secret: String,
    pub(crate) interactive: bool,
}

impl fmt::Debug for ClientSecretAuthenticator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ClientSecretAuthenticator")
            .field("context", &self.context)
            .field("interactive", &self.interactive)
            .finish_non_exhaustive()
    }
}

impl ClientSecretAuthenticator {
    pub(crate) fn new(params: &AuthParams, secret: &str, client: TokenClient) -> Result<Self> {
        if secret.trim().is_empty() {
            return Err(AuthError::MissingRequiredParameter("client secret".to_string()));
        }
        Ok(Self {
            context: AuthContext::new(params, client, AuthenticatorKind::ClientSecret, Some(secret)),
            secret: secret.to_string(),
            interactive: params.interactive,
        })
    }

    pub(crate) fn secret(&self) -> &str {
        &self.secret
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_secret_rejected() {
        let params = AuthParams::new("https://p", "r", "svc");
        for secret in ["", "   "] {
            let err = ClientSecretAuthenticator::new(&params, secret, TokenClient::new()).unwrap_err();
            assert!(matches!(err, AuthError::MissingRequiredParameter(_)));
        }
    }

    #[test]
    fn test_debug_omits_secret() {
        let params = AuthParams::new("https://p", "r", "svc");
        let auth = ClientSecretAuthenticator::new(&params, "hunter2", TokenClient::new()).unwrap();
        assert!(!format!("{auth:?}").contains("hunter2"));
    }
}
