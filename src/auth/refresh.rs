// Token refresh and revocation calls

use reqwest::Client;

use super::types::{RefreshRequest, RefreshResponse};
use crate::error::{read_error_message, Result, SessionError};

/// Exchange a refresh token for a new access token.
///
/// A 4xx answer means the refresh token is gone for good and comes back as
/// `SessionExpired`. Server and network failures keep their own variants.
pub async fn request_refresh(
    client: &Client,
    url: &str,
    refresh_token: &str,
) -> Result<RefreshResponse> {
    tracing::debug!(url = %url, "Sending token refresh request");

    let response = client
        .post(url)
        .json(&RefreshRequest { refresh_token })
        .send()
        .await?;

    let status = response.status();
    if !status.is_success() {
        let message = read_error_message(response).await;
        tracing::warn!(status = status.as_u16(), error = %message, "Token refresh rejected");

        return Err(if status.is_client_error() {
            let reason = if message.is_empty() {
                format!("refresh rejected with status {}", status.as_u16())
            } else {
                message
            };
            SessionError::SessionExpired(reason)
        } else {
            SessionError::Api {
                status: status.as_u16(),
                message,
            }
        });
    }

    let data: RefreshResponse = response.json().await?;
    if data.access_token.is_empty() {
        return Err(SessionError::MalformedToken(
            "refresh response does not contain an access token".to_string(),
        ));
    }

    Ok(data)
}

/// Tell the server to revoke the refresh token
pub async fn notify_logout(
    client: &Client,
    url: &str,
    access_token: Option<&str>,
    refresh_token: &str,
) -> Result<()> {
    let mut request = client.post(url).json(&RefreshRequest { refresh_token });
    if let Some(token) = access_token {
        request = request.bearer_auth(token);
    }

    let response = request.send().await?;
    let status = response.status();
    if !status.is_success() {
        let message = read_error_message(response).await;
        return Err(SessionError::Api {
            status: status.as_u16(),
            message,
        });
    }

    Ok(())
}
