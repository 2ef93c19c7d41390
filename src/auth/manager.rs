use futures::future::{BoxFuture, FutureExt, WeakShared};
use reqwest::Client;
use serde_json::json;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::{Mutex, RwLock};

use super::claims::{decode_access_token, AccessClaims};
use super::navigator::Navigator;
use super::refresh;
use super::state::SessionState;
use super::store::SessionStore;
use super::types::{
    LoginField, LoginResponse, PersistedSession, RegisterRequest, RegisterResponse, Role,
    SignupForm, User,
};
use super::validation::validate_signup;
use crate::config::Config;
use crate::error::{error_message_from_body, read_error_message, Result, SessionError};

/// Message the register endpoint answers with on success
const SIGNUP_SUCCESS_MESSAGE: &str = "User has been registered";

const SIGNUP_FAILED_MESSAGE: &str = "Signup failed. Please try again.";

type PendingRefresh = BoxFuture<'static, Result<String>>;

/// Session manager
/// Owns the authenticated session: login, signup, refresh, logout and expiry checks.
///
/// Cheap to clone; every clone shares the same session. Create one per process
/// and hand clones to whatever needs the session.
#[derive(Clone)]
pub struct SessionManager {
    inner: Arc<Inner>,
}

struct Inner {
    /// HTTP client for the auth endpoints
    client: Client,

    config: Config,

    /// Durable storage for the session record
    store: Arc<dyn SessionStore>,

    /// Redirect target for logout and terminal failures
    navigator: Arc<dyn Navigator>,

    /// Current session
    state: RwLock<SessionState>,

    /// Refresh currently running, shared by every caller that asks meanwhile.
    /// Held weakly so that dropping every waiter cancels it.
    refresh_inflight: Mutex<Option<WeakShared<PendingRefresh>>>,

    /// Bumped under the state write lock whenever the session is cleared
    generation: AtomicU64,
}

impl SessionManager {
    /// Create the manager and hydrate it from `store`.
    ///
    /// An unreadable or undecodable stored record is discarded and the
    /// session starts empty.
    pub fn new(
        config: Config,
        store: Arc<dyn SessionStore>,
        navigator: Arc<dyn Navigator>,
    ) -> Result<Self> {
        let client = Client::builder()
            .connect_timeout(std::time::Duration::from_secs(config.http_connect_timeout))
            .timeout(std::time::Duration::from_secs(config.http_request_timeout))
            .build()?;

        let state = hydrate(store.as_ref());

        Ok(Self {
            inner: Arc::new(Inner {
                client,
                config,
                store,
                navigator,
                state: RwLock::new(state),
                refresh_inflight: Mutex::new(None),
                generation: AtomicU64::new(0),
            }),
        })
    }

    /// Startup check of the hydrated session; an expired one is signed out
    pub async fn initialize(&self) -> bool {
        let valid = self.validate_token().await;
        tracing::info!(authenticated = valid, "Session initialized");
        valid
    }

    /// Sign in with an identifier (email or username) and password
    pub async fn login(&self, identifier: &str, secret: &str) -> Result<User> {
        if identifier.trim().is_empty() || secret.is_empty() {
            let what = match self.inner.config.login_field {
                LoginField::Email => "Email",
                LoginField::Username => "Username",
            };
            return self
                .fail(SessionError::Validation(format!(
                    "{} and password are required",
                    what
                )))
                .await;
        }

        let generation = self.begin().await;
        tracing::info!(identifier = %identifier, "Logging in");

        let (record, user) = match self.inner.exchange_credentials(identifier, secret).await {
            Ok(outcome) => outcome,
            Err(e) => {
                tracing::warn!(error = %e, "Login failed");
                return self.fail(e).await;
            }
        };

        let mut state = self.inner.state.write().await;
        if !self.inner.is_current(generation) {
            tracing::info!("Signed out while logging in, discarding login result");
            return Err(SessionError::SessionExpired(
                "signed out before login completed".to_string(),
            ));
        }

        if let Err(e) = self.inner.store.save(&record) {
            tracing::error!(error = %format!("{:#}", e), "Failed to persist session");
            let err = SessionError::from(e);
            state.loading = false;
            state.error = Some(err.to_string());
            return Err(err);
        }

        state.apply(record);
        state.loading = false;
        state.error = None;

        tracing::info!(user_id = user.id, role = %user.role, "Login successful");

        Ok(user)
    }

    /// Register a student account.
    ///
    /// Does not sign in; on success `signup_succeeded` is set and the caller
    /// is expected to route to login.
    pub async fn signup(&self, form: &SignupForm) -> Result<()> {
        self.inner.state.write().await.signup_succeeded = false;

        if let Err(e) = validate_signup(form) {
            return self.fail(e).await;
        }

        self.begin().await;
        tracing::info!(email = %form.email, "Registering account");

        match self.inner.register(form).await {
            Ok(()) => {
                let mut state = self.inner.state.write().await;
                state.loading = false;
                state.signup_succeeded = true;
                tracing::info!(email = %form.email, "Registration accepted");
                Ok(())
            }
            Err(e) => {
                tracing::warn!(error = %e, "Registration rejected");
                self.fail(e).await
            }
        }
    }

    /// Exchange the refresh token for a new access token.
    ///
    /// At most one refresh runs at a time: callers arriving while one is in
    /// flight wait for it and receive the same result. A rejected or missing
    /// refresh token ends the session and redirects to login.
    pub async fn refresh(&self) -> Result<String> {
        let pending = {
            let mut slot = self.inner.refresh_inflight.lock().await;
            if let Some(pending) = slot.as_ref().and_then(WeakShared::upgrade) {
                tracing::debug!("Joining in-flight token refresh");
                pending
            } else {
                let inner = Arc::clone(&self.inner);
                let pending = async move {
                    let result = inner.run_refresh().await;
                    inner.refresh_inflight.lock().await.take();
                    result
                }
                .boxed()
                .shared();
                *slot = pending.downgrade();
                pending
            }
        };

        pending.await
    }

    /// Token to retry with after the server rejected `rejected`.
    ///
    /// Returns the current token without a network call when it already
    /// differs from the rejected one; otherwise refreshes.
    pub async fn refresh_if_stale(&self, rejected: Option<&str>) -> Result<String> {
        {
            let state = self.inner.state.read().await;
            if let Some(current) = state.access_token.as_deref() {
                if Some(current) != rejected && state.is_authenticated() {
                    tracing::debug!("Access token already renewed, skipping refresh");
                    return Ok(current.to_string());
                }
            }
        }

        self.refresh().await
    }

    /// Sign out.
    ///
    /// Local state and storage are cleared and the home route is shown before
    /// the server is told; a failing server call is only logged.
    pub async fn logout(&self) {
        let (access_token, refresh_token) = {
            let state = self.inner.state.read().await;
            (state.access_token.clone(), state.refresh_token.clone())
        };

        self.inner.clear_local().await;
        self.inner.state.write().await.error = None;
        tracing::info!("Logged out");

        self.inner.navigator.navigate(&self.inner.config.routes.home);

        if let Some(refresh_token) = refresh_token {
            let url = self.inner.config.url(&self.inner.config.endpoints.logout);
            if let Err(e) = refresh::notify_logout(
                &self.inner.client,
                &url,
                access_token.as_deref(),
                &refresh_token,
            )
            .await
            {
                tracing::warn!(error = %e, "Server-side logout failed, ignoring");
            }
        }
    }

    /// Whether the access token exists and is unexpired.
    ///
    /// A token that is present but no longer valid signs the session out.
    pub async fn validate_token(&self) -> bool {
        let (has_token, valid) = {
            let state = self.inner.state.read().await;
            (state.access_token.is_some(), state.is_authenticated())
        };

        if has_token && !valid {
            tracing::info!("Access token expired, signing out");
            self.logout().await;
        }

        valid
    }

    /// Replace the stored profile (and with it the role)
    pub async fn update_profile(&self, user: User) -> Result<()> {
        let mut state = self.inner.state.write().await;
        state.role = Some(user.role);
        state.user = Some(user);

        if let Some(record) = state.to_persisted() {
            if let Err(e) = self.inner.store.save(&record) {
                let err = SessionError::from(e);
                state.error = Some(err.to_string());
                return Err(err);
            }
        }
        Ok(())
    }

    /// Snapshot of the whole session
    pub async fn state(&self) -> SessionState {
        self.inner.state.read().await.clone()
    }

    pub async fn access_token(&self) -> Option<String> {
        self.inner.state.read().await.access_token.clone()
    }

    pub async fn is_authenticated(&self) -> bool {
        self.inner.state.read().await.is_authenticated()
    }

    pub async fn role(&self) -> Option<Role> {
        self.inner.state.read().await.role
    }

    pub async fn user(&self) -> Option<User> {
        self.inner.state.read().await.user.clone()
    }

    /// Latest error message, for display
    pub async fn error(&self) -> Option<String> {
        self.inner.state.read().await.error.clone()
    }

    pub async fn is_loading(&self) -> bool {
        self.inner.state.read().await.loading
    }

    pub fn config(&self) -> &Config {
        &self.inner.config
    }

    /// Redirect through the session's navigator
    pub fn navigate(&self, path: &str) {
        self.inner.navigator.navigate(path);
    }

    /// Mark the session busy and return the generation the work started in
    async fn begin(&self) -> u64 {
        let mut state = self.inner.state.write().await;
        state.loading = true;
        state.error = None;
        self.inner.generation.load(Ordering::SeqCst)
    }

    /// Record `err` on the session and return it
    async fn fail<T>(&self, err: SessionError) -> Result<T> {
        let mut state = self.inner.state.write().await;
        state.loading = false;
        state.error = Some(err.to_string());
        Err(err)
    }
}

impl Inner {
    async fn exchange_credentials(
        &self,
        identifier: &str,
        secret: &str,
    ) -> Result<(PersistedSession, User)> {
        let url = self.config.url(&self.config.endpoints.login);
        let mut body = serde_json::Map::new();
        body.insert(
            self.config.login_field.key().to_string(),
            json!(identifier.trim()),
        );
        body.insert("password".to_string(), json!(secret));

        let response = self.client.post(&url).json(&body).send().await?;

        let status = response.status();
        if !status.is_success() {
            let message = read_error_message(response).await;
            return Err(if status.is_client_error() {
                SessionError::Credentials(if message.is_empty() {
                    format!("Invalid {} or password", self.config.login_field.key())
                } else {
                    message
                })
            } else {
                SessionError::Api {
                    status: status.as_u16(),
                    message,
                }
            });
        }

        let login: LoginResponse = response.json().await?;
        let claims = decode_unexpired(&login.access_token)?;

        let record = PersistedSession {
            access_token: login.access_token,
            refresh_token: login.refresh_token,
            claims,
            role: Some(login.user.role),
            user: Some(login.user.clone()),
        };
        Ok((record, login.user))
    }

    async fn register(&self, form: &SignupForm) -> Result<()> {
        let url = self.config.url(&self.config.endpoints.register);
        let email = form.email.trim().to_lowercase();
        let request = RegisterRequest {
            first_name: form.first_name.trim(),
            last_name: form.last_name.trim(),
            email: &email,
            password: &form.password,
            role: Role::Student,
        };

        let response = self.client.post(&url).json(&request).send().await?;

        let status = response.status();
        if status.is_server_error() {
            let message = read_error_message(response).await;
            return Err(SessionError::Api {
                status: status.as_u16(),
                message,
            });
        }

        let body = response.text().await?;
        let parsed: Option<RegisterResponse> = serde_json::from_str(&body).ok();

        match parsed {
            Some(reply) if status.is_success() => match (&reply.message, &reply.error) {
                (serde_json::Value::String(m), _) if m == SIGNUP_SUCCESS_MESSAGE => Ok(()),
                (serde_json::Value::Null, None) => Ok(()),
                _ => Err(SessionError::Credentials(rejection_message(&reply))),
            },
            Some(reply) => Err(SessionError::Credentials(rejection_message(&reply))),
            None if status.is_success() => Ok(()),
            None => {
                let message = error_message_from_body(&body);
                Err(SessionError::Credentials(if message.is_empty() {
                    SIGNUP_FAILED_MESSAGE.to_string()
                } else {
                    message
                }))
            }
        }
    }

    async fn run_refresh(&self) -> Result<String> {
        let (refresh_token, generation) = {
            let mut state = self.state.write().await;
            state.loading = true;
            state.error = None;
            (
                state.refresh_token.clone(),
                self.generation.load(Ordering::SeqCst),
            )
        };

        let Some(refresh_token) = refresh_token else {
            return self
                .terminate("no refresh token available".to_string())
                .await;
        };

        tracing::info!("Refreshing access token...");

        let url = self.config.url(&self.config.endpoints.refresh);
        let outcome = match refresh::request_refresh(&self.client, &url, &refresh_token).await {
            Ok(data) => decode_unexpired(&data.access_token).map(|claims| (data, claims)),
            Err(e) => Err(e),
        };

        if !self.is_current(generation) {
            tracing::info!("Signed out while refreshing, discarding refresh result");
            return Err(SessionError::SessionExpired(
                "signed out during token refresh".to_string(),
            ));
        }

        match outcome {
            Ok((data, claims)) => {
                let mut state = self.state.write().await;
                if !self.is_current(generation) {
                    return Err(SessionError::SessionExpired(
                        "signed out during token refresh".to_string(),
                    ));
                }
                let record = PersistedSession {
                    access_token: data.access_token,
                    refresh_token: data.refresh_token.or(Some(refresh_token)),
                    claims,
                    role: state.role,
                    user: state.user.clone(),
                };

                if let Err(e) = self.store.save(&record) {
                    tracing::warn!(
                        error = %format!("{:#}", e),
                        "Failed to persist refreshed session, keeping it in memory"
                    );
                }

                let access_token = record.access_token.clone();
                let expires_at = record.claims.expires_at();
                state.apply(record);
                state.loading = false;

                tracing::info!(
                    expires_at = ?expires_at.map(|t| t.to_rfc3339()),
                    "Access token refreshed"
                );
                Ok(access_token)
            }
            Err(SessionError::SessionExpired(reason)) | Err(SessionError::MalformedToken(reason)) => {
                self.terminate(reason).await
            }
            Err(e) => {
                tracing::warn!(error = %e, "Token refresh failed, session kept");
                let mut state = self.state.write().await;
                state.loading = false;
                state.error = Some(e.to_string());
                Err(e)
            }
        }
    }

    /// End the session after an unrecoverable refresh failure
    async fn terminate<T>(&self, reason: String) -> Result<T> {
        tracing::error!(reason = %reason, "Session cannot be renewed, signing out");

        let err = SessionError::SessionExpired(reason);
        self.clear_local().await;
        self.state.write().await.error = Some(err.to_string());
        self.navigator.navigate(&self.config.routes.login);

        Err(err)
    }

    /// Whether no clear happened since `generation` was read
    fn is_current(&self, generation: u64) -> bool {
        self.generation.load(Ordering::SeqCst) == generation
    }

    /// Clear memory and storage; storage failures are logged
    async fn clear_local(&self) {
        {
            let mut state = self.state.write().await;
            state.clear_credentials();
            self.generation.fetch_add(1, Ordering::SeqCst);
        }
        if let Err(e) = self.store.clear() {
            tracing::warn!(error = %format!("{:#}", e), "Failed to clear stored session");
        }
    }
}

fn hydrate(store: &dyn SessionStore) -> SessionState {
    let record = match store.load() {
        Ok(Some(record)) => record,
        Ok(None) => return SessionState::default(),
        Err(e) => {
            tracing::warn!(error = %format!("{:#}", e), "Discarding unreadable stored session");
            discard(store);
            return SessionState::default();
        }
    };

    match decode_access_token(&record.access_token) {
        Ok(claims) => {
            tracing::debug!(user_id = claims.user_id, "Restored stored session");
            SessionState::from_persisted(PersistedSession { claims, ..record })
        }
        Err(e) => {
            tracing::warn!(error = %e, "Discarding stored session with bad token");
            discard(store);
            SessionState::default()
        }
    }
}

/// Decode a freshly issued token, rejecting one that is already expired
fn decode_unexpired(token: &str) -> Result<AccessClaims> {
    let claims = decode_access_token(token)?;
    if claims.is_expired() {
        return Err(SessionError::MalformedToken(
            "access token is already expired".to_string(),
        ));
    }
    Ok(claims)
}

fn discard(store: &dyn SessionStore) {
    if let Err(e) = store.clear() {
        tracing::warn!(error = %format!("{:#}", e), "Failed to clear stored session");
    }
}

fn rejection_message(reply: &RegisterResponse) -> String {
    match (&reply.message, &reply.error) {
        (serde_json::Value::String(m), _) if !m.is_empty() => m.clone(),
        (serde_json::Value::Null, Some(error)) => error.clone(),
        (serde_json::Value::Null, None) => SIGNUP_FAILED_MESSAGE.to_string(),
        (other, _) => other.to_string(),
    }
}
