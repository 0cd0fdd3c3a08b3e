//! Frontier OAuth client library
//!
//! Provides PKCE generation, authorization-code exchange, refresh-token
//! grants and account identity lookup against the Frontier authorization
//! server. Standalone: no dependency on the store or the HTTP service.
//!
//! Sign-in flow:
//! 1. Service calls `pkce::generate_verifier()` + `pkce::compute_challenge()`
//! 2. User authorizes via `pkce::build_authorization_url()`
//! 3. Callback calls `token::exchange_code()` with the authorization code
//! 4. `identity::decode_account()` resolves the account the tokens belong to
//! 5. Background scheduler calls `token::refresh_token()` before expiry

pub mod constants;
pub mod endpoints;
pub mod error;
pub mod identity;
pub mod pkce;
pub mod token;

pub use endpoints::AuthEndpoints;
pub use error::{Error, Result};
pub use identity::{AccountIdentity, decode_account};
pub use pkce::{
    build_authorization_url, compute_challenge, generate_state, generate_verifier,
    verify_challenge,
};
pub use token::{TokenResponse, exchange_code, refresh_token};
