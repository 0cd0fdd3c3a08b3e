//! Endpoint description for one OAuth client registration

use crate::constants::{AUTHORIZE_ENDPOINT, DECODE_ENDPOINT, SCOPES, TOKEN_ENDPOINT};

/// Everything needed to talk to the authorization server on behalf of this
/// service's client registration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthEndpoints {
    pub client_id: String,
    pub authorize_url: String,
    pub token_url: String,
    pub decode_url: String,
    /// Where the authorization server sends the browser back to
    pub redirect_uri: String,
    pub scope: String,
}

impl AuthEndpoints {
    /// Public Frontier endpoints for the given client registration.
    pub fn frontier(client_id: impl Into<String>, redirect_uri: impl Into<String>) -> Self {
        Self {
            client_id: client_id.into(),
            authorize_url: AUTHORIZE_ENDPOINT.to_owned(),
            token_url: TOKEN_ENDPOINT.to_owned(),
            decode_url: DECODE_ENDPOINT.to_owned(),
            redirect_uri: redirect_uri.into(),
            scope: SCOPES.to_owned(),
        }
    }

    /// Point token and decode endpoints at a different server root.
    ///
    /// Test helper for mock servers; the authorize URL follows too.
    pub fn with_auth_server(mut self, base_url: &str) -> Self {
        let base = base_url.trim_end_matches('/');
        self.authorize_url = format!("{base}/auth");
        self.token_url = format!("{base}/token");
        self.decode_url = format!("{base}/decode");
        self
    }
}
