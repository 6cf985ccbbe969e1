//! Authorization code flow with Proof Key for Code Exchange (S256)

use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine};
use pc_token_store::AuthenticatorKind;
use sha2::{Digest, Sha256};

use super::{random_token, AuthContext, AuthorizationRequest};
use crate::http::TokenClient;
use crate::params::AuthParams;

/// Interactive login for a public client; holds no secret
#[derive(Debug)]
pub struct PkceAuthenticator {
    pub(crate) context: AuthContext,
}

impl PkceAuthenticator {
    pub(crate) fn new(params: &AuthParams, client: TokenClient) -> Self {
        Self {
            context: AuthContext::new(params, client, AuthenticatorKind::Pkce, None),
        }
    }

    /// Each request gets its own verifier
    pub(crate) fn authorization_request(&self, state: &str, redirect_uri: &str) -> AuthorizationRequest {
        let code_verifier = generate_code_verifier();
        let challenge = code_challenge(&code_verifier);
        let url = self.context.authorization_url(
            state,
            redirect_uri,
            &[("code_challenge", challenge.as_str()), ("code_challenge_method", "S256")],
        );
        AuthorizationRequest {
            url,
            redirect_uri: redirect_uri.to_string(),
            code_verifier: Some(code_verifier),
        }
    }
}

fn generate_code_verifier() -> String {
    random_token(32)
}

pub(crate) fn code_challenge(verifier: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(verifier.as_bytes());
    URL_SAFE_NO_PAD.encode(hasher.finalize())
}
