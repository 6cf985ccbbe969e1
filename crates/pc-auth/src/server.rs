//! Local HTTP listener receiving browser redirects for interactive logins
//!
//! The listener starts with the first pending login and stops when the last
//! one settles. Each login is keyed by an unguessable request id embedded in
//! its redirect URI (`/callback/{id}`). A login settles exactly once: the
//! callback, its timeout, a cancel and a forced stop all go through
//! [`CallbackServer::settle`], which removes the entry under the lock before
//! delivering the outcome.

use axum::{
    extract::{Path, Query, State},
    http::{StatusCode, Uri},
    response::{Html, IntoResponse, Response},
    routing::get,
    Router,
};
use parking_lot::Mutex;
use pc_token_store::TokenRecord;
use std::collections::HashMap;
use std::net::{SocketAddr, TcpListener as StdTcpListener};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::authenticator::{random_token, Authenticator, ExchangeInput};
use crate::error::{AuthError, Result};

/// Final result of one interactive login
pub type LoginOutcome = std::result::Result<TokenRecord, AuthError>;

const REQUEST_ID_BYTES: usize = 32;

const SUCCESS_PAGE: &str = r#"<!DOCTYPE html>
<html>
<head><meta charset="utf-8"><title>Login complete</title></head>
<body style="font-family: sans-serif; text-align: center; margin-top: 4em;">
<h2>You are logged in.</h2>
<p>You can close this window and return to the terminal.</p>
</body>
</html>
"#;

struct PendingLogin {
    authenticator: Arc<Authenticator>,
    redirect_uri: String,
    code_verifier: Option<String>,
    sender: oneshot::Sender<LoginOutcome>,
    timeout: Option<JoinHandle<()>>,
    /// A callback is being exchanged; later callbacks are refused
    exchanging: bool,
}

struct Running {
    addr: SocketAddr,
    shutdown: oneshot::Sender<()>,
}

impl Running {
    fn stop(self) {
        let _ = self.shutdown.send(());
        info!(addr = %self.addr, "Callback server stopping");
    }
}

#[derive(Default)]
struct ServerState {
    running: Option<Running>,
    pending: HashMap<String, PendingLogin>,
}

struct Inner {
    host: String,
    port: u16,
    state: Mutex<ServerState>,
}

/// A login registered with the server and waiting for its callback
#[derive(Debug)]
pub struct StartedLogin {
    pub request_id: String,
    /// Authorization URL to open in the browser
    pub url: String,
    pub redirect_uri: String,
    pub receiver: oneshot::Receiver<LoginOutcome>,
}

/// Callback listener shared by all interactive logins of one `AuthService`
#[derive(Clone)]
pub struct CallbackServer {
    inner: Arc<Inner>,
}

enum CallbackAction {
    Unknown,
    Rejected(AuthError),
    Exchange {
        authenticator: Arc<Authenticator>,
        input: ExchangeInput,
    },
}

impl CallbackServer {
    /// Port 0 binds an ephemeral port when the server starts
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            inner: Arc::new(Inner {
                host: host.into(),
                port,
                state: Mutex::new(ServerState::default()),
            }),
        }
    }

    pub fn is_running(&self) -> bool {
        self.inner.state.lock().running.is_some()
    }

    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.inner.state.lock().running.as_ref().map(|r| r.addr)
    }

    pub fn pending_count(&self) -> usize {
        self.inner.state.lock().pending.len()
    }

    fn redirect_host(&self) -> String {
        if self.inner.host.contains(':') {
            format!("[{}]", self.inner.host)
        } else {
            self.inner.host.clone()
        }
    }

    fn start_locked(&self, state: &mut ServerState) -> Result<SocketAddr> {
        if let Some(running) = &state.running {
            return Ok(running.addr);
        }

        let bind_err = |e: std::io::Error| AuthError::CallbackServer {
            addr: format!("{}:{}", self.inner.host, self.inner.port),
            message: e.to_string(),
        };
        let std_listener = StdTcpListener::bind((self.inner.host.as_str(), self.inner.port)).map_err(bind_err)?;
        std_listener.set_nonblocking(true).map_err(bind_err)?;
        let listener = tokio::net::TcpListener::from_std(std_listener).map_err(bind_err)?;
        let addr = listener.local_addr().map_err(bind_err)?;

        let (shutdown_tx, shutdown_rx) = oneshot::channel::<()>();
        let app = self.router();
        tokio::spawn(async move {
            let result = axum::serve(listener, app)
                .with_graceful_shutdown(async move {
                    let _ = shutdown_rx.await;
                })
                .await;
            if let Err(e) = result {
                warn!(error = %e, "Callback server error");
            }
            debug!(%addr, "Callback server stopped");
        });

        info!(%addr, "Callback server listening");
        state.running = Some(Running {
            addr,
            shutdown: shutdown_tx,
        });
        Ok(addr)
    }

    fn router(&self) -> Router {
        Router::new()
            .route("/callback", get(callback_without_id))
            .route("/callback/{id}", get(handle_callback))
            .fallback(fallback)
            .with_state(self.clone())
    }

    /// Start the listener if needed and register a login for `authenticator`.
    ///
    /// The login is rejected with `AUTH_TIMEOUT` if no callback settles it
    /// within `timeout`.
    pub fn begin_login(&self, authenticator: Arc<Authenticator>, timeout: Duration) -> Result<StartedLogin> {
        let mut state = self.inner.state.lock();
        let addr = self.start_locked(&mut state)?;

        let request_id = loop {
            let id = random_token(REQUEST_ID_BYTES);
            if !state.pending.contains_key(&id) {
                break id;
            }
        };
        let redirect_uri = format!("http://{}:{}/callback/{}", self.redirect_host(), addr.port(), request_id);

        let request = match authenticator.authorization_request(&request_id, &redirect_uri) {
            Ok(request) => request,
            Err(e) => {
                if state.pending.is_empty() {
                    if let Some(running) = state.running.take() {
                        running.stop();
                    }
                }
                return Err(e);
            }
        };

        let (sender, receiver) = oneshot::channel();
        // Spawned under the lock so the timer cannot fire before the entry exists
        let timeout_task = {
            let server = self.clone();
            let id = request_id.clone();
            tokio::spawn(async move {
                tokio::time::sleep(timeout).await;
                server.settle(
                    &id,
                    Err(AuthError::AuthTimeout {
                        secs: timeout.as_secs(),
                    }),
                );
            })
        };

        state.pending.insert(
            request_id.clone(),
            PendingLogin {
                authenticator,
                redirect_uri: redirect_uri.clone(),
                code_verifier: request.code_verifier,
                sender,
                timeout: Some(timeout_task),
                exchanging: false,
            },
        );
        debug!(pending = state.pending.len(), "Registered pending login");

        Ok(StartedLogin {
            request_id,
            url: request.url,
            redirect_uri,
            receiver,
        })
    }

    /// Deliver the outcome of login `id` if it is still pending.
    ///
    /// Returns false when the login already settled. Stops the listener once
    /// nothing is pending.
    pub fn settle(&self, id: &str, outcome: LoginOutcome) -> bool {
        let (pending, running) = {
            let mut state = self.inner.state.lock();
            let Some(pending) = state.pending.remove(id) else {
                return false;
            };
            let running = if state.pending.is_empty() {
                state.running.take()
            } else {
                None
            };
            (pending, running)
        };

        if let Some(timeout) = pending.timeout {
            timeout.abort();
        }
        match &outcome {
            Ok(record) => info!(account = %record.name, "Interactive login completed"),
            Err(e) => debug!(code = e.code(), "Interactive login ended: {}", e),
        }
        let _ = pending.sender.send(outcome);

        if let Some(running) = running {
            running.stop();
        }
        true
    }

    /// Reject login `id` with `CANCELLED`
    pub fn cancel(&self, id: &str) -> bool {
        self.settle(id, Err(AuthError::Cancelled))
    }

    /// Close the listener.
    ///
    /// With `force`, every pending login is rejected with `SERVER_STOPPED`;
    /// without it, nothing happens while logins are pending. Returns whether
    /// the server is now stopped.
    pub fn stop(&self, force: bool) -> bool {
        let (drained, running) = {
            let mut state = self.inner.state.lock();
            if !force && !state.pending.is_empty() {
                return false;
            }
            let drained: Vec<PendingLogin> = state.pending.drain().map(|(_, p)| p).collect();
            (drained, state.running.take())
        };

        if !drained.is_empty() {
            debug!(count = drained.len(), "Rejecting pending logins");
        }
        for pending in drained {
            if let Some(timeout) = pending.timeout {
                timeout.abort();
            }
            let _ = pending.sender.send(Err(AuthError::ServerStopped));
        }
        if let Some(running) = running {
            running.stop();
        }
        true
    }

    fn begin_exchange(&self, id: &str, params: &HashMap<String, String>) -> CallbackAction {
        let mut state = self.inner.state.lock();
        let Some(pending) = state.pending.get_mut(id) else {
            return CallbackAction::Unknown;
        };
        if pending.exchanging {
            return CallbackAction::Unknown;
        }

        if let Some(error) = params.get("error") {
            let message = match params.get("error_description") {
                Some(description) => format!("{error}: {description}"),
                None => error.clone(),
            };
            return CallbackAction::Rejected(AuthError::AuthFailed {
                message,
                oauth_error: Some(error.clone()),
            });
        }
        if let Some(returned_state) = params.get("state") {
            if returned_state != id {
                return CallbackAction::Rejected(AuthError::auth_failed("state parameter does not match the login"));
            }
        }
        let Some(code) = params.get("code").filter(|c| !c.is_empty()) else {
            return CallbackAction::Rejected(AuthError::MissingAuthCode);
        };

        pending.exchanging = true;
        CallbackAction::Exchange {
            authenticator: pending.authenticator.clone(),
            input: ExchangeInput::AuthorizationCode {
                code: code.clone(),
                redirect_uri: pending.redirect_uri.clone(),
                code_verifier: pending.code_verifier.clone(),
            },
        }
    }
}

fn bad_request(message: &str) -> Response {
    (StatusCode::BAD_REQUEST, message.to_string()).into_response()
}

async fn handle_callback(
    State(server): State<CallbackServer>,
    Path(id): Path<String>,
    Query(params): Query<HashMap<String, String>>,
) -> Response {
    match server.begin_exchange(&id, &params) {
        CallbackAction::Unknown => {
            debug!("Callback for unknown or completed login");
            bad_request("Unknown or expired login request")
        }
        CallbackAction::Rejected(error) => {
            let message = error.to_string();
            server.settle(&id, Err(error));
            bad_request(&message)
        }
        CallbackAction::Exchange { authenticator, input } => {
            // Detached so a dropped browser connection cannot strand the login
            let exchange = {
                let server = server.clone();
                let id = id.clone();
                tokio::spawn(async move {
                    match authenticator.exchange(input).await {
                        Ok(record) => {
                            if server.settle(&id, Ok(record)) {
                                Ok(())
                            } else {
                                Err(AuthError::SendAuthCodeFailed("login is no longer pending".to_string()).to_string())
                            }
                        }
                        Err(error) => {
                            let message = error.to_string();
                            server.settle(&id, Err(error));
                            Err(message)
                        }
                    }
                })
            };

            match exchange.await {
                Ok(Ok(())) => (StatusCode::OK, Html(SUCCESS_PAGE)).into_response(),
                Ok(Err(message)) => bad_request(&message),
                Err(e) => {
                    let error = AuthError::SendAuthCodeFailed(e.to_string());
                    let message = error.to_string();
                    server.settle(&id, Err(error));
                    bad_request(&message)
                }
            }
        }
    }
}

async fn callback_without_id() -> Response {
    bad_request("Missing login request id")
}

async fn fallback(uri: Uri) -> Response {
    if uri.path().starts_with("/callback/") {
        bad_request("Malformed callback path")
    } else {
        (StatusCode::NOT_FOUND, "Not found").into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::http::TokenClient;
    use crate::params::{AuthParams, Credential};

    fn pkce() -> Arc<Authenticator> {
        let params = AuthParams::new("http://127.0.0.1:1", "acme", "pc-cli");
        Arc::new(Authenticator::new(&params, TokenClient::new()).unwrap())
    }

    #[tokio::test]
    async fn test_server_lifecycle_follows_pending_logins() {
        let server = CallbackServer::new("127.0.0.1", 0);
        assert!(!server.is_running());

        let first = server.begin_login(pkce(), Duration::from_secs(60)).unwrap();
        let second = server.begin_login(pkce(), Duration::from_secs(60)).unwrap();
        assert!(server.is_running());
        assert_eq!(server.pending_count(), 2);
        assert_ne!(first.request_id, second.request_id);

        let addr = server.local_addr().unwrap();
        assert_eq!(
            first.redirect_uri,
            format!("http://127.0.0.1:{}/callback/{}", addr.port(), first.request_id)
        );

        assert!(server.cancel(&first.request_id));
        assert!(server.is_running());
        assert!(!server.cancel(&first.request_id));

        assert!(server.cancel(&second.request_id));
        assert!(!server.is_running());

        assert!(matches!(first.receiver.await.unwrap(), Err(AuthError::Cancelled)));
        assert!(matches!(second.receiver.await.unwrap(), Err(AuthError::Cancelled)));
    }

    #[tokio::test]
    async fn test_non_interactive_authenticator_cannot_begin_login() {
        let server = CallbackServer::new("127.0.0.1", 0);
        let params = AuthParams::new("http://127.0.0.1:1", "acme", "svc")
            .with_credential(Credential::Secret("s3cret".into()));
        let auth = Arc::new(Authenticator::new(&params, TokenClient::new()).unwrap());

        let err = server.begin_login(auth, Duration::from_secs(60)).unwrap_err();
        assert_eq!(err.code(), "INVALID_ARGUMENT");
        assert!(!server.is_running());
    }

    #[tokio::test]
    async fn test_timeout_rejects_and_stops() {
        let server = CallbackServer::new("127.0.0.1", 0);
        let login = server.begin_login(pkce(), Duration::from_millis(50)).unwrap();

        let outcome = login.receiver.await.unwrap();
        assert!(matches!(outcome, Err(AuthError::AuthTimeout { .. })));
        assert_eq!(server.pending_count(), 0);
        assert!(!server.is_running());
    }

    #[tokio::test]
    async fn test_stop_without_force_waits_for_pending() {
        let server = CallbackServer::new("127.0.0.1", 0);
        let login = server.begin_login(pkce(), Duration::from_secs(60)).unwrap();

        assert!(!server.stop(false));
        assert!(server.is_running());

        assert!(server.stop(true));
        assert!(!server.is_running());
        assert!(matches!(login.receiver.await.unwrap(), Err(AuthError::ServerStopped)));
    }

    #[tokio::test]
    async fn test_settle_is_at_most_once() {
        let server = CallbackServer::new("127.0.0.1", 0);
        let login = server.begin_login(pkce(), Duration::from_secs(60)).unwrap();

        assert!(server.settle(&login.request_id, Err(AuthError::MissingAuthCode)));
        assert!(!server.settle(&login.request_id, Err(AuthError::Cancelled)));
        assert!(matches!(login.receiver.await.unwrap(), Err(AuthError::MissingAuthCode)));
    }
}
