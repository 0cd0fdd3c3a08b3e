//! PKCE (Proof Key for Code Exchange) per RFC 7636
//!
//! The verifier stays server-side for the lifetime of one sign-in attempt
//! and is sent with the code exchange; the S256 challenge travels in the
//! authorization URL so the server can bind the code to this attempt.

use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use rand::RngExt;
use sha2::{Digest, Sha256};
use url::Url;

use crate::constants::{AUDIENCE, CHALLENGE_METHOD};
use crate::endpoints::AuthEndpoints;
use crate::error::{Error, Result};

/// Number of random bytes behind a code verifier.
pub const VERIFIER_BYTES: usize = 32;

/// Generate a cryptographically random PKCE code verifier.
///
/// 32 random bytes, URL-safe base64 without padding (43 characters, the
/// RFC 7636 minimum length).
pub fn generate_verifier() -> String {
    random_url_safe::<VERIFIER_BYTES>()
}

/// Generate an opaque `state` value identifying one sign-in attempt.
pub fn generate_state() -> String {
    random_url_safe::<16>()
}

fn random_url_safe<const N: usize>() -> String {
    let mut bytes = [0u8; N];
    rand::rng().fill(&mut bytes);
    URL_SAFE_NO_PAD.encode(bytes)
}

/// `challenge = BASE64URL(SHA256(verifier))`, no padding.
pub fn compute_challenge(verifier: &str) -> String {
    let hash = Sha256::digest(verifier.as_bytes());
    URL_SAFE_NO_PAD.encode(hash)
}

/// Server-side check the authorization server performs at exchange time.
pub fn verify_challenge(verifier: &str, challenge: &str) -> bool {
    compute_challenge(verifier) == challenge
}

/// Build the authorization URL the browser is redirected to.
pub fn build_authorization_url(
    endpoints: &AuthEndpoints,
    state: &str,
    challenge: &str,
) -> Result<String> {
    let mut url = Url::parse(&endpoints.authorize_url)
        .map_err(|e| Error::InvalidUrl(format!("{}: {e}", endpoints.authorize_url)))?;
    url.query_pairs_mut()
        .append_pair("audience", AUDIENCE)
        .append_pair("scope", &endpoints.scope)
        .append_pair("response_type", "code")
        .append_pair("client_id", &endpoints.client_id)
        .append_pair("code_challenge", challenge)
        .append_pair("code_challenge_method", CHALLENGE_METHOD)
        .append_pair("state", state)
        .append_pair("redirect_uri", &endpoints.redirect_uri);
    Ok(url.into())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn endpoints() -> AuthEndpoints {
        AuthEndpoints::frontier("client-abc", "https://auth.example.com/callback")
    }

    #[test]
    fn verifier_is_43_url_safe_chars() {
        let verifier = generate_verifier();
        assert_eq!(verifier.len(), 43);
        assert!(
            verifier
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_'),
            "verifier must be URL-safe base64 (no padding): {verifier}"
        );
        assert_eq!(URL_SAFE_NO_PAD.decode(&verifier).unwrap().len(), 32);
    }

    #[test]
    fn verifiers_and_states_are_unique() {
        assert_ne!(generate_verifier(), generate_verifier());
        assert_ne!(generate_state(), generate_state());
    }

    #[test]
    fn challenge_is_deterministic() {
        let verifier = generate_verifier();
        assert_eq!(compute_challenge(&verifier), compute_challenge(&verifier));
    }

    #[test]
    fn challenge_matches_known_value() {
        // SHA256("hello") base64url-encoded without padding
        assert_eq!(
            compute_challenge("hello"),
            "LPJNul-wow4m6DsqxbninhsWHlwfp0JecwQzYpOLmCQ"
        );
    }

    #[test]
    fn verification_accepts_same_verifier_only() {
        let verifier = generate_verifier();
        let challenge = compute_challenge(&verifier);
        assert!(verify_challenge(&verifier, &challenge));
        assert!(!verify_challenge(&generate_verifier(), &challenge));
    }

    #[test]
    fn authorization_url_contains_required_params() {
        let challenge = compute_challenge("test-verifier");
        let url = build_authorization_url(&endpoints(), "state-123", &challenge).unwrap();
        let parsed = Url::parse(&url).unwrap();
        let pairs: std::collections::HashMap<_, _> = parsed.query_pairs().into_owned().collect();

        assert!(url.starts_with("https://auth.frontierstore.net/auth?"));
        assert_eq!(pairs["client_id"], "client-abc");
        assert_eq!(pairs["response_type"], "code");
        assert_eq!(pairs["code_challenge"], challenge);
        assert_eq!(pairs["code_challenge_method"], "S256");
        assert_eq!(pairs["state"], "state-123");
        assert_eq!(pairs["scope"], "auth capi");
        assert_eq!(pairs["audience"], "all");
        assert_eq!(pairs["redirect_uri"], "https://auth.example.com/callback");
    }

    #[test]
    fn authorization_url_rejects_garbage_endpoint() {
        let mut endpoints = endpoints();
        endpoints.authorize_url = "not a url".into();
        assert!(matches!(
            build_authorization_url(&endpoints, "s", "c"),
            Err(Error::InvalidUrl(_))
        ));
    }
}
