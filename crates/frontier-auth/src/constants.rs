//! Frontier OAuth defaults
//!
//! Public endpoints of the Frontier authorization server and companion API.
//! None of these are secrets; every one can be overridden through
//! configuration (the test suites point them at local mock servers).

/// Authorization endpoint the user's browser is redirected to
pub const AUTHORIZE_ENDPOINT: &str = "https://auth.frontierstore.net/auth";

/// Token endpoint for code exchange and refresh grants
pub const TOKEN_ENDPOINT: &str = "https://auth.frontierstore.net/token";

/// Returns the identity behind an access token
pub const DECODE_ENDPOINT: &str = "https://auth.frontierstore.net/decode";

/// Companion API (CAPI) base URL
pub const API_BASE_URL: &str = "https://companion.orerve.net";

/// Scopes requested at sign-in. `capi` grants companion API access.
pub const SCOPES: &str = "auth capi";

/// Frontier requires an explicit audience on the authorization request
pub const AUDIENCE: &str = "all";

/// PKCE challenge method; only S256 is supported
pub const CHALLENGE_METHOD: &str = "S256";
