// Error handling module
// Defines the session error taxonomy surfaced to forms, guards and the CLI

use thiserror::Error;

/// Errors produced by session operations and authenticated requests.
///
/// Cloneable so that a single refresh outcome can be handed to every caller
/// that was waiting on it.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum SessionError {
    /// Client-side form validation failed; nothing was sent
    #[error("{0}")]
    Validation(String),

    /// The server rejected the supplied credentials or signup data
    #[error("{0}")]
    Credentials(String),

    /// Network unreachable, timeout, or unreadable response
    #[error("Network error: {0}")]
    Transport(String),

    /// The server answered 401 and no refresh could recover it
    #[error("Unauthorized - token may be expired")]
    Unauthorized,

    /// The server answered 403
    #[error("Access denied: {0}")]
    Forbidden(String),

    /// The access token could not be decoded or failed the claims schema
    #[error("Malformed token: {0}")]
    MalformedToken(String),

    /// Refresh failed terminally; the session has been cleared
    #[error("Session expired: {0}")]
    SessionExpired(String),

    /// Any other non-success status from the API
    #[error("Server error: {status} - {message}")]
    Api { status: u16, message: String },

    /// Durable session storage failed
    #[error("Storage error: {0}")]
    Storage(String),
}

impl SessionError {
    /// Whether this error ended the session
    pub fn is_terminal(&self) -> bool {
        matches!(self, SessionError::SessionExpired(_))
    }
}

impl From<reqwest::Error> for SessionError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_decode() {
            SessionError::Transport(format!("invalid response body: {}", err))
        } else {
            SessionError::Transport(err.to_string())
        }
    }
}

impl From<anyhow::Error> for SessionError {
    fn from(err: anyhow::Error) -> Self {
        SessionError::Storage(format!("{:#}", err))
    }
}

/// Result type alias for session operations
pub type Result<T> = std::result::Result<T, SessionError>;

/// Maximum length for error response bodies in error messages
const MAX_ERROR_BODY_LENGTH: usize = 500;

/// Human message from an error response body.
///
/// Prefers the `error` field, then `detail`, then the raw body truncated.
/// Returns an empty string for an empty body.
pub fn error_message_from_body(body: &str) -> String {
    if let Ok(value) = serde_json::from_str::<serde_json::Value>(body) {
        for field in ["error", "detail"] {
            if let Some(message) = value.get(field).and_then(|v| v.as_str()) {
                return message.to_string();
            }
        }
    }
    truncate_body(body.trim())
}

/// Read and consume an error response, returning its human message
pub async fn read_error_message(response: reqwest::Response) -> String {
    let body = response.text().await.unwrap_or_default();
    error_message_from_body(&body)
}

fn truncate_body(body: &str) -> String {
    if body.len() <= MAX_ERROR_BODY_LENGTH {
        return body.to_string();
    }
    let mut end = MAX_ERROR_BODY_LENGTH;
    while !body.is_char_boundary(end) {
        end -= 1;
    }
    format!("{}... (truncated, {} total bytes)", &body[..end], body.len())
}
