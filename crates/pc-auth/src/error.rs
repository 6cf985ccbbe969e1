//! Authentication error types

use pc_token_store::StoreError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum AuthError {
    /// The server rejected the credentials or returned an unusable identity
    #[error("Authentication failed: {message}")]
    AuthFailed {
        message: String,
        /// OAuth `error` code from the token endpoint, if any
        oauth_error: Option<String>,
    },

    #[error("Login was not completed within {secs} seconds")]
    AuthTimeout { secs: u64 },

    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("Missing required parameter: {0}")]
    MissingRequiredParameter(String),

    #[error("Authorization callback did not include a code")]
    MissingAuthCode,

    #[error("Session expired. Run `pc login` again.")]
    TokenExpired,

    #[error("Session was invalidated by the server. Run `pc login` again.")]
    SessionInvalidated,

    #[error("{0}")]
    SecureStoreUnavailable(String),

    #[error("Organization switch failed: {0}")]
    OrgSwitchFailed(String),

    #[error("Request failed: {message}")]
    RequestFailed { status: Option<u16>, message: String },

    #[error("Could not deliver the authorization code to the waiting login: {0}")]
    SendAuthCodeFailed(String),

    #[error("Failed to start callback server on {addr}: {message}")]
    CallbackServer { addr: String, message: String },

    #[error("Login callback server stopped")]
    ServerStopped,

    #[error("Login cancelled")]
    Cancelled,

    #[error(transparent)]
    Store(StoreError),
}

impl AuthError {
    pub fn auth_failed(message: impl Into<String>) -> Self {
        Self::AuthFailed {
            message: message.into(),
            oauth_error: None,
        }
    }

    pub fn request_failed(message: impl Into<String>) -> Self {
        Self::RequestFailed {
            status: None,
            message: message.into(),
        }
    }

    /// Stable code for scripting and telemetry
    pub fn code(&self) -> &'static str {
        match self {
            AuthError::AuthFailed { .. } => "AUTH_FAILED",
            AuthError::AuthTimeout { .. } => "AUTH_TIMEOUT",
            AuthError::InvalidArgument(_) => "INVALID_ARGUMENT",
            AuthError::MissingRequiredParameter(_) => "MISSING_REQUIRED_PARAMETER",
            AuthError::MissingAuthCode => "MISSING_AUTH_CODE",
            AuthError::TokenExpired => "TOKEN_EXPIRED",
            AuthError::SessionInvalidated => "SESSION_INVALIDATED",
            AuthError::SecureStoreUnavailable(_) => "SECURE_STORE_UNAVAILABLE",
            AuthError::OrgSwitchFailed(_) => "ORG_SWITCH_FAILED",
            AuthError::RequestFailed { .. } => "REQUEST_FAILED",
            AuthError::SendAuthCodeFailed(_) => "SEND_AUTH_CODE_FAILED",
            AuthError::CallbackServer { .. } => "CALLBACK_SERVER_FAILED",
            AuthError::ServerStopped => "SERVER_STOPPED",
            AuthError::Cancelled => "CANCELLED",
            AuthError::Store(_) => "STORE_ERROR",
        }
    }

    /// The stored session can no longer be renewed and should be forgotten
    pub fn is_session_over(&self) -> bool {
        matches!(self, AuthError::TokenExpired | AuthError::SessionInvalidated)
    }
}

impl From<StoreError> for AuthError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::SecureStoreUnavailable { .. } => AuthError::SecureStoreUnavailable(err.to_string()),
            other => AuthError::Store(other),
        }
    }
}

impl From<reqwest::Error> for AuthError {
    fn from(err: reqwest::Error) -> Self {
        AuthError::RequestFailed {
            status: err.status().map(|s| s.as_u16()),
            message: err.to_string(),
        }
    }
}

pub type Result<T> = std::result::Result<T, AuthError>;
