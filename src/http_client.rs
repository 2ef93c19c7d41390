use reqwest::{Client, Method, Response};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::time::Duration;

use crate::auth::{SessionManager, User};
use crate::error::{read_error_message, Result, SessionError};

/// HTTP client for the campus API with bearer injection and retry logic
pub struct ApiClient {
    /// Shared HTTP client with connection pooling
    client: Client,

    /// Session supplying and renewing the bearer token
    session: SessionManager,

    /// Maximum number of retries for 429, 5xx and network errors
    max_retries: u32,

    /// Base delay for exponential backoff (milliseconds)
    base_delay_ms: u64,
}

impl ApiClient {
    /// Create a new API client bound to `session`
    pub fn new(session: SessionManager) -> Result<Self> {
        let config = session.config();
        let client = Client::builder()
            .connect_timeout(Duration::from_secs(config.http_connect_timeout))
            .timeout(Duration::from_secs(config.http_request_timeout))
            .build()?;

        Ok(Self {
            client,
            max_retries: config.http_max_retries,
            base_delay_ms: config.http_retry_base_delay_ms,
            session,
        })
    }

    /// GET a path and decode the JSON body
    pub async fn get<T: DeserializeOwned>(&self, path: &str) -> Result<T> {
        let response = self.send(Method::GET, path, None).await?;
        Ok(response.json().await?)
    }

    /// POST a JSON body and decode the JSON reply
    pub async fn post<B, T>(&self, path: &str, body: &B) -> Result<T>
    where
        B: Serialize + ?Sized,
        T: DeserializeOwned,
    {
        let body = serde_json::to_value(body)
            .map_err(|e| SessionError::Transport(format!("failed to encode request body: {}", e)))?;
        let response = self.send(Method::POST, path, Some(&body)).await?;
        Ok(response.json().await?)
    }

    /// DELETE a path, ignoring any reply body
    pub async fn delete(&self, path: &str) -> Result<()> {
        self.send(Method::DELETE, path, None).await?;
        Ok(())
    }

    /// Fetch the signed-in user's profile and store it on the session
    pub async fn current_user(&self) -> Result<User> {
        let path = self.session.config().endpoints.current_user.clone();
        let user: User = self.get(&path).await?;
        self.session.update_profile(user.clone()).await?;
        Ok(user)
    }

    /// Execute a request with the session's bearer token.
    ///
    /// Automatically handles:
    /// - 401: refreshes the token once and retries; the caller never sees a
    ///   401 that a refresh could fix
    /// - 403: returned as `Forbidden`, left to routing
    /// - 429, 5xx and network errors: exponential backoff
    pub async fn send(
        &self,
        method: Method,
        path: &str,
        body: Option<&serde_json::Value>,
    ) -> Result<Response> {
        let url = self.session.config().url(path);
        let mut token = self.session.access_token().await;
        let mut attempt = 0;
        let mut refreshed = false;

        loop {
            let mut request = self.client.request(method.clone(), &url);
            if let Some(ref t) = token {
                request = request.bearer_auth(t);
            }
            if let Some(body) = body {
                request = request.json(body);
            }

            tracing::debug!(
                method = %method,
                url = %url,
                attempt = attempt + 1,
                "Sending HTTP request"
            );

            match request.send().await {
                Ok(response) => {
                    let status = response.status();

                    if status.is_success() {
                        tracing::debug!(status = %status, "Request successful");
                        return Ok(response);
                    }

                    match status.as_u16() {
                        401 if !refreshed => {
                            tracing::warn!(url = %url, "Received 401, refreshing token and retrying...");
                            token = Some(self.session.refresh_if_stale(token.as_deref()).await?);
                            refreshed = true;
                            continue;
                        }

                        401 => {
                            tracing::error!(url = %url, "Still unauthorized after token refresh");
                            return Err(SessionError::Unauthorized);
                        }

                        403 => {
                            let message = read_error_message(response).await;
                            tracing::warn!(url = %url, error = %message, "Access denied");
                            return Err(SessionError::Forbidden(message));
                        }

                        429 | 500..=599 if attempt < self.max_retries => {
                            let delay = self.calculate_backoff_delay(attempt);
                            tracing::warn!(
                                "Received {}, retrying after {}ms (attempt {}/{})",
                                status,
                                delay,
                                attempt + 1,
                                self.max_retries
                            );
                            tokio::time::sleep(Duration::from_millis(delay)).await;
                            attempt += 1;
                            continue;
                        }

                        _ => {}
                    }

                    let message = read_error_message(response).await;
                    tracing::error!(
                        status = status.as_u16(),
                        url = %url,
                        response_body = %message,
                        attempt = attempt + 1,
                        "HTTP request failed with error response"
                    );
                    return Err(SessionError::Api {
                        status: status.as_u16(),
                        message,
                    });
                }

                Err(e) => {
                    let error_kind = if e.is_timeout() {
                        "timeout"
                    } else if e.is_connect() {
                        "connection_failed"
                    } else if e.is_decode() {
                        "decode_error"
                    } else {
                        "request_error"
                    };

                    if attempt < self.max_retries {
                        let delay = self.calculate_backoff_delay(attempt);
                        tracing::warn!(
                            error_kind = error_kind,
                            error = %e,
                            "Request failed, retrying after {}ms (attempt {}/{})",
                            delay,
                            attempt + 1,
                            self.max_retries
                        );
                        tokio::time::sleep(Duration::from_millis(delay)).await;
                        attempt += 1;
                        continue;
                    }

                    tracing::error!(
                        error_kind = error_kind,
                        error = %e,
                        url = %url,
                        total_attempts = attempt + 1,
                        "HTTP request failed after all retries"
                    );
                    return Err(e.into());
                }
            }
        }
    }

    /// Exponential backoff: base_delay * 2^attempt
    fn calculate_backoff_delay(&self, attempt: u32) -> u64 {
        self.base_delay_ms.saturating_mul(2_u64.saturating_pow(attempt))
    }

    pub fn session(&self) -> &SessionManager {
        &self.session
    }
}
