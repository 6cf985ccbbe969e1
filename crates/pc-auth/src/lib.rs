//! Platform CLI Authentication
//!
//! Establishes and keeps identity against the platform's OIDC server:
//! - Interactive browser login (authorization code + PKCE, or client secret)
//! - Service accounts via client secret or RSA-signed client assertion
//! - A local callback server correlating browser redirects with pending logins
//! - Transparent refresh and purge of stored accounts
//!
//! [`AuthService`] is the entry point; tokens are persisted through
//! [`pc_token_store::TokenStore`].

pub mod account;
pub mod authenticator;
pub mod endpoints;
pub mod error;
pub mod http;
pub mod params;
pub mod server;
pub mod service;

pub use account::Account;
pub use authenticator::{identity_hash, AuthorizationRequest, Authenticator, ExchangeInput};
pub use endpoints::{discover, EndpointOverrides, Endpoints, OidcDiscovery};
pub use error::{AuthError, Result};
pub use http::{TokenClient, TokenResponse};
pub use params::{AuthParams, Credential, PrivateKeySource};
pub use server::{CallbackServer, LoginOutcome, StartedLogin};
pub use service::{AuthService, ListOptions, Login, LoginCanceller, LoginOptions, PendingLoginHandle};

pub use pc_token_store::{AccountSelector, AuthenticatorKind, StoreLevel, TokenRecord, TokenStore};
