//! OAuth token exchange and refresh
//!
//! Both operations POST a form to the token endpoint with different grant
//! types:
//! 1. `authorization_code` when a sign-in callback completes
//! 2. `refresh_token` when the scheduler renews an expiring access token

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::endpoints::AuthEndpoints;
use crate::error::{Error, Result};

/// Response from the token endpoint for both exchange and refresh.
///
/// `expires_in` is a delta in seconds from the response time. The caller
/// turns it into an absolute timestamp with its own clock.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct TokenResponse {
    pub access_token: String,
    pub refresh_token: String,
    pub expires_in: u64,
    #[serde(default)]
    pub token_type: Option<String>,
}

impl TokenResponse {
    /// Absolute expiry in unix milliseconds, given the time the response arrived.
    pub fn expires_at_millis(&self, now_millis: i64) -> i64 {
        now_millis.saturating_add((self.expires_in as i64).saturating_mul(1000))
    }
}

/// Exchange an authorization code (plus the attempt's verifier) for tokens.
pub async fn exchange_code(
    client: &reqwest::Client,
    endpoints: &AuthEndpoints,
    code: &str,
    verifier: &str,
) -> Result<TokenResponse> {
    let response = client
        .post(&endpoints.token_url)
        .form(&[
            ("grant_type", "authorization_code"),
            ("client_id", endpoints.client_id.as_str()),
            ("code_verifier", verifier),
            ("code", code),
            ("redirect_uri", endpoints.redirect_uri.as_str()),
        ])
        .send()
        .await
        .map_err(|e| Error::Http(format!("token exchange request failed: {e}")))?;

    let status = response.status();
    if !status.is_success() {
        let body = response
            .text()
            .await
            .unwrap_or_else(|_| String::from("<no body>"));
        return Err(Error::TokenExchange(format!(
            "token endpoint returned {status}: {body}"
        )));
    }

    debug!("authorization code exchanged");
    response
        .json::<TokenResponse>()
        .await
        .map_err(|e| Error::TokenExchange(format!("invalid token response: {e}")))
}

/// Trade a refresh token for a new access token.
///
/// Frontier rotates refresh tokens, so callers must persist the returned
/// `refresh_token` along with the new access token.
pub async fn refresh_token(
    client: &reqwest::Client,
    endpoints: &AuthEndpoints,
    refresh: &str,
) -> Result<TokenResponse> {
    let response = client
        .post(&endpoints.token_url)
        .form(&[
            ("grant_type", "refresh_token"),
            ("client_id", endpoints.client_id.as_str()),
            ("refresh_token", refresh),
        ])
        .send()
        .await
        .map_err(|e| Error::Http(format!("token refresh request failed: {e}")))?;

    let status = response.status();
    if !status.is_success() {
        let body = response
            .text()
            .await
            .unwrap_or_else(|_| String::from("<no body>"));

        // 401/403 means the refresh token is revoked or invalid
        if status.as_u16() == 401 || status.as_u16() == 403 {
            return Err(Error::InvalidCredentials(format!(
                "refresh token rejected ({status}): {body}"
            )));
        }

        return Err(Error::TokenExchange(format!(
            "token refresh returned {status}: {body}"
        )));
    }

    response
        .json::<TokenResponse>()
        .await
        .map_err(|e| Error::TokenExchange(format!("invalid refresh response: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::extract::Form;
    use axum::http::StatusCode;
    use axum::response::IntoResponse;
    use std::collections::HashMap;

    /// Mock token endpoint: accepts code "good-code" with verifier "good-verifier"
    /// and refresh token "rt_good"; 401 for "rt_revoked"; 500 otherwise.
    async fn start_token_server() -> String {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let url = format!("http://{}", listener.local_addr().unwrap());
        let app = axum::Router::new().route(
            "/token",
            axum::routing::post(|Form(form): Form<HashMap<String, String>>| async move {
                let grant = form.get("grant_type").map(String::as_str);
                match grant {
                    Some("authorization_code")
                        if form.get("code").map(String::as_str) == Some("good-code")
                            && form.get("code_verifier").map(String::as_str)
                                == Some("good-verifier") =>
                    {
                        axum::Json(serde_json::json!({
                            "access_token": "at_1",
                            "refresh_token": "rt_1",
                            "expires_in": 600,
                            "token_type": "Bearer",
                        }))
                        .into_response()
                    }
                    Some("authorization_code") => {
                        (StatusCode::BAD_REQUEST, "invalid_grant").into_response()
                    }
                    Some("refresh_token") => match form.get("refresh_token").map(String::as_str) {
                        Some("rt_good") => axum::Json(serde_json::json!({
                            "access_token": "at_2",
                            "refresh_token": "rt_2",
                            "expires_in": 14400,
                        }))
                        .into_response(),
                        Some("rt_revoked") => {
                            (StatusCode::UNAUTHORIZED, "revoked").into_response()
                        }
                        _ => (StatusCode::INTERNAL_SERVER_ERROR, "boom").into_response(),
                    },
                    _ => StatusCode::BAD_REQUEST.into_response(),
                }
            }),
        );
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        url
    }

    fn endpoints(base: &str) -> AuthEndpoints {
        AuthEndpoints::frontier("client", "http://localhost/callback").with_auth_server(base)
    }

    #[test]
    fn token_response_deserializes_without_token_type() {
        let json = r#"{"access_token":"at_abc","refresh_token":"rt_def","expires_in":3600}"#;
        let token: TokenResponse = serde_json::from_str(json).unwrap();
        assert_eq!(token.access_token, "at_abc");
        assert_eq!(token.refresh_token, "rt_def");
        assert_eq!(token.expires_in, 3600);
        assert!(token.token_type.is_none());
    }

    #[test]
    fn expires_at_is_absolute_millis() {
        let token = TokenResponse {
            access_token: "a".into(),
            refresh_token: "r".into(),
            expires_in: 600,
            token_type: None,
        };
        assert_eq!(token.expires_at_millis(1_000), 601_000);
    }

    #[tokio::test]
    async fn exchange_succeeds_with_matching_verifier() {
        let base = start_token_server().await;
        let client = reqwest::Client::new();
        let token = exchange_code(&client, &endpoints(&base), "good-code", "good-verifier")
            .await
            .unwrap();
        assert_eq!(token.access_token, "at_1");
        assert_eq!(token.expires_in, 600);
    }

    #[tokio::test]
    async fn exchange_fails_with_wrong_verifier() {
        let base = start_token_server().await;
        let client = reqwest::Client::new();
        let result = exchange_code(&client, &endpoints(&base), "good-code", "other").await;
        assert!(matches!(result, Err(Error::TokenExchange(_))));
    }

    #[tokio::test]
    async fn refresh_rotates_tokens() {
        let base = start_token_server().await;
        let client = reqwest::Client::new();
        let token = refresh_token(&client, &endpoints(&base), "rt_good").await.unwrap();
        assert_eq!(token.access_token, "at_2");
        assert_eq!(token.refresh_token, "rt_2");
    }

    #[tokio::test]
    async fn refresh_classifies_revoked_token() {
        let base = start_token_server().await;
        let client = reqwest::Client::new();
        let revoked = refresh_token(&client, &endpoints(&base), "rt_revoked").await;
        assert!(matches!(revoked, Err(Error::InvalidCredentials(_))));

        let transient = refresh_token(&client, &endpoints(&base), "rt_other").await;
        assert!(matches!(transient, Err(Error::TokenExchange(_))));
    }

    #[tokio::test]
    async fn unreachable_endpoint_is_http_error() {
        let client = reqwest::Client::new();
        let result = refresh_token(&client, &endpoints("http://127.0.0.1:1"), "rt").await;
        assert!(matches!(result, Err(Error::Http(_))));
    }
}
