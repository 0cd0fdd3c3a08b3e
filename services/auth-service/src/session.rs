//! Session credential issuer/verifier
//!
//! The credential is an HS256 JWT `{sub, iat, exp}` carried in the `auth.jwt`
//! cookie. A companion `auth.jwt.sig` cookie holds an HMAC-SHA256 over
//! `auth.jwt=<value>` keyed with the session secret, so a cookie edited in the
//! browser fails before the JWT is even parsed. Expiry is checked against the
//! injected `Clock`, not the JWT library's wall clock.
//!
//! Every failure collapses to `ApiError::Unauthorized`; the distinct causes
//! only reach the debug log.

use std::sync::Arc;
use std::time::Duration;

use axum::http::header::{COOKIE, SET_COOKIE};
use axum::http::{HeaderMap, HeaderValue};
use axum::response::Response;
use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use common::{Clock, Secret};
use hmac::digest::InvalidLength;
use hmac::{Hmac, Mac};
use jsonwebtoken::{Algorithm, DecodingKey, EncodingKey, Header, Validation, decode, encode};
use serde::{Deserialize, Serialize};
use sha2::Sha256;
use tracing::warn;

use crate::error::ApiError;

pub const JWT_COOKIE: &str = "auth.jwt";
pub const SIGNATURE_COOKIE: &str = "auth.jwt.sig";

type HmacSha256 = Hmac<Sha256>;

#[derive(Debug, Serialize, Deserialize)]
struct Claims {
    sub: String,
    iat: i64,
    exp: i64,
}

/// Why a credential was rejected. Never shown to callers.
#[derive(Debug, thiserror::Error)]
pub enum CredentialError {
    #[error("credential cookie missing")]
    Missing,
    #[error("cookie signature missing or invalid")]
    BadSignature,
    #[error("credential rejected: {0}")]
    Invalid(#[from] jsonwebtoken::errors::Error),
    #[error("credential expired")]
    Expired,
}

/// Cookie attributes shared by every `Set-Cookie` this service writes.
#[derive(Debug, Clone)]
pub struct CookieSettings {
    pub domain: String,
    pub secure: bool,
}

pub struct CredentialIssuer {
    encoding: EncodingKey,
    decoding: DecodingKey,
    validation: Validation,
    cookie_mac: HmacSha256,
    max_age: Duration,
    cookies: CookieSettings,
    clock: Arc<dyn Clock>,
}

impl CredentialIssuer {
    pub fn new(
        jwt_secret: &Secret<String>,
        cookie_key: &Secret<String>,
        max_age: Duration,
        cookies: CookieSettings,
        clock: Arc<dyn Clock>,
    ) -> Result<Self, InvalidLength> {
        let mut validation = Validation::new(Algorithm::HS256);
        validation.validate_exp = false;
        validation.validate_aud = false;
        validation.set_required_spec_claims(&["exp", "sub"]);
        Ok(Self {
            encoding: EncodingKey::from_secret(jwt_secret.as_bytes()),
            decoding: DecodingKey::from_secret(jwt_secret.as_bytes()),
            validation,
            cookie_mac: HmacSha256::new_from_slice(cookie_key.as_bytes())?,
            max_age,
            cookies,
            clock,
        })
    }

    /// Sign a credential for `account_id` valid for the configured max age.
    pub fn issue(&self, account_id: &str) -> Result<String, CredentialError> {
        let iat = self.clock.now_secs();
        let claims = Claims {
            sub: account_id.to_owned(),
            iat,
            exp: iat + self.max_age.as_secs() as i64,
        };
        Ok(encode(&Header::new(Algorithm::HS256), &claims, &self.encoding)?)
    }

    /// Check signature and expiry, yielding the account identifier.
    pub fn verify(&self, token: &str) -> Result<String, CredentialError> {
        let claims = decode::<Claims>(token, &self.decoding, &self.validation)?.claims;
        if claims.exp <= self.clock.now_secs() {
            return Err(CredentialError::Expired);
        }
        Ok(claims.sub)
    }

    /// Resolve the account behind the request's credential cookies.
    pub fn authenticate(&self, headers: &HeaderMap) -> Result<String, ApiError> {
        self.authenticate_inner(headers)
            .map_err(|e| ApiError::unauthorized(e.to_string()))
    }

    fn authenticate_inner(&self, headers: &HeaderMap) -> Result<String, CredentialError> {
        let token = cookie_value(headers, JWT_COOKIE).ok_or(CredentialError::Missing)?;
        let signature =
            cookie_value(headers, SIGNATURE_COOKIE).ok_or(CredentialError::BadSignature)?;
        if !self.signature_matches(JWT_COOKIE, token, signature) {
            return Err(CredentialError::BadSignature);
        }
        self.verify(token)
    }

    /// `Set-Cookie` values carrying a fresh credential for the account.
    pub fn session_cookies(&self, account_id: &str) -> Result<[HeaderValue; 2], ApiError> {
        let token = self
            .issue(account_id)
            .map_err(|e| ApiError::internal(&e))?;
        let signature = self.sign(JWT_COOKIE, &token);
        let max_age = self.max_age.as_secs();
        Ok([
            self.header(JWT_COOKIE, &token, max_age)?,
            self.header(SIGNATURE_COOKIE, &signature, max_age)?,
        ])
    }

    /// `Set-Cookie` values that delete both credential cookies.
    pub fn cleared_cookies(&self) -> Result<[HeaderValue; 2], ApiError> {
        Ok([
            self.header(JWT_COOKIE, "", 0)?,
            self.header(SIGNATURE_COOKIE, "", 0)?,
        ])
    }

    /// Sliding window: attach a re-issued credential to a successful response.
    pub fn refresh_on(&self, mut response: Response, account_id: &str) -> Response {
        match self.session_cookies(account_id) {
            Ok(cookies) => append_cookies(&mut response, cookies),
            Err(e) => warn!(account_id, error = %e, "failed to re-issue credential"),
        }
        response
    }

    fn header(&self, name: &str, value: &str, max_age: u64) -> Result<HeaderValue, ApiError> {
        let mut cookie = format!(
            "{name}={value}; Path=/; Domain={}; Max-Age={max_age}; HttpOnly; SameSite=Lax",
            self.cookies.domain
        );
        if self.cookies.secure {
            cookie.push_str("; Secure");
        }
        HeaderValue::from_str(&cookie).map_err(|e| ApiError::internal(&e))
    }

    fn mac(&self, name: &str, value: &str) -> HmacSha256 {
        let mut mac = self.cookie_mac.clone();
        mac.update(name.as_bytes());
        mac.update(b"=");
        mac.update(value.as_bytes());
        mac
    }

    fn sign(&self, name: &str, value: &str) -> String {
        URL_SAFE_NO_PAD.encode(self.mac(name, value).finalize().into_bytes())
    }

    fn signature_matches(&self, name: &str, value: &str, signature: &str) -> bool {
        match URL_SAFE_NO_PAD.decode(signature) {
            Ok(raw) => self.mac(name, value).verify_slice(&raw).is_ok(),
            Err(_) => false,
        }
    }
}

pub fn append_cookies(response: &mut Response, cookies: [HeaderValue; 2]) {
    for cookie in cookies {
        response.headers_mut().append(SET_COOKIE, cookie);
    }
}

/// First non-empty value of `name` across all `Cookie` headers.
fn cookie_value<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers
        .get_all(COOKIE)
        .iter()
        .filter_map(|value| value.to_str().ok())
        .flat_map(|raw| raw.split(';'))
        .filter_map(|pair| pair.trim().split_once('='))
        .find(|(key, value)| key.trim() == name && !value.is_empty())
        .map(|(_, value)| value.trim())
}

#[cfg(test)]
mod tests {
    use super::*;
    use common::ManualClock;

    const NOW: i64 = 1_700_000_000_000;
    const THIRTY_DAYS: Duration = Duration::from_secs(60 * 60 * 24 * 30);

    fn issuer(clock: Arc<ManualClock>, secure: bool) -> CredentialIssuer {
        CredentialIssuer::new(
            &Secret::from("jwt-secret"),
            &Secret::from("cookie-secret"),
            THIRTY_DAYS,
            CookieSettings {
                domain: ".example.test".into(),
                secure,
            },
            clock,
        )
        .unwrap()
    }

    /// Turn `Set-Cookie` values into the `Cookie` header a browser would send.
    fn cookie_header(cookies: &[HeaderValue]) -> HeaderValue {
        let pairs: Vec<&str> = cookies
            .iter()
            .filter_map(|c| c.to_str().ok())
            .filter_map(|c| c.split(';').next())
            .collect();
        HeaderValue::from_str(&pairs.join("; ")).unwrap()
    }

    fn headers_with(cookie: HeaderValue) -> HeaderMap {
        let mut headers = HeaderMap::new();
        headers.insert(COOKIE, cookie);
        headers
    }

    #[test]
    fn issued_credential_verifies_to_account() {
        let issuer = issuer(Arc::new(ManualClock::new(NOW)), true);
        let token = issuer.issue("A1").unwrap();
        assert_eq!(issuer.verify(&token).unwrap(), "A1");
    }

    #[test]
    fn credential_signed_with_other_key_is_rejected() {
        let clock = Arc::new(ManualClock::new(NOW));
        let other = CredentialIssuer::new(
            &Secret::from("another-secret"),
            &Secret::from("cookie-secret"),
            THIRTY_DAYS,
            CookieSettings {
                domain: ".example.test".into(),
                secure: true,
            },
            clock.clone(),
        )
        .unwrap();
        let token = other.issue("A1").unwrap();
        assert!(matches!(
            issuer(clock, true).verify(&token),
            Err(CredentialError::Invalid(_))
        ));
    }

    #[test]
    fn credential_expires_after_max_age() {
        let clock = Arc::new(ManualClock::new(NOW));
        let issuer = issuer(clock.clone(), true);
        let token = issuer.issue("A1").unwrap();

        clock.advance(THIRTY_DAYS - Duration::from_secs(1));
        assert!(issuer.verify(&token).is_ok());
        clock.advance(Duration::from_secs(1));
        assert!(matches!(issuer.verify(&token), Err(CredentialError::Expired)));
    }

    #[test]
    fn authenticate_round_trips_through_cookies() {
        let issuer = issuer(Arc::new(ManualClock::new(NOW)), true);
        let cookies = issuer.session_cookies("A1").unwrap();
        let headers = headers_with(cookie_header(&cookies));
        assert_eq!(issuer.authenticate(&headers).unwrap(), "A1");
    }

    #[test]
    fn tampered_jwt_cookie_is_unauthorized() {
        let issuer = issuer(Arc::new(ManualClock::new(NOW)), true);
        let forged = issuer.issue("A2").unwrap();
        let [_, signature] = issuer.session_cookies("A1").unwrap();
        let signature = signature.to_str().unwrap().split(';').next().unwrap().to_owned();

        // Valid JWT for another account paired with A1's cookie signature
        let headers = headers_with(
            HeaderValue::from_str(&format!("{JWT_COOKIE}={forged}; {signature}")).unwrap(),
        );
        assert!(matches!(
            issuer.authenticate(&headers),
            Err(ApiError::Unauthorized(_))
        ));
    }

    #[test]
    fn missing_or_garbage_cookies_are_unauthorized() {
        let issuer = issuer(Arc::new(ManualClock::new(NOW)), true);
        for cookie in [
            "",
            "other=1",
            "auth.jwt=abc",
            "auth.jwt=abc; auth.jwt.sig=!!notbase64",
            "auth.jwt=; auth.jwt.sig=",
        ] {
            let headers = headers_with(HeaderValue::from_str(cookie).unwrap());
            assert!(
                matches!(issuer.authenticate(&headers), Err(ApiError::Unauthorized(_))),
                "cookie {cookie:?} must be rejected"
            );
        }
        assert!(issuer.authenticate(&HeaderMap::new()).is_err());
    }

    #[test]
    fn session_cookie_attributes() {
        let issuer = issuer(Arc::new(ManualClock::new(NOW)), true);
        for cookie in issuer.session_cookies("A1").unwrap() {
            let cookie = cookie.to_str().unwrap();
            assert!(cookie.contains("HttpOnly"));
            assert!(cookie.contains("Domain=.example.test"));
            assert!(cookie.contains("Max-Age=2592000"));
            assert!(cookie.contains("Secure"));
        }

        let dev = self::issuer(Arc::new(ManualClock::new(NOW)), false);
        let [jwt, _] = dev.session_cookies("A1").unwrap();
        assert!(!jwt.to_str().unwrap().contains("Secure"));
    }

    #[test]
    fn cleared_cookies_expire_immediately() {
        let issuer = issuer(Arc::new(ManualClock::new(NOW)), true);
        let [jwt, sig] = issuer.cleared_cookies().unwrap();
        assert!(jwt.to_str().unwrap().starts_with("auth.jwt=;"));
        assert!(sig.to_str().unwrap().starts_with("auth.jwt.sig=;"));
        assert!(jwt.to_str().unwrap().contains("Max-Age=0"));
    }

    #[test]
    fn cookie_value_scans_all_headers() {
        let mut headers = HeaderMap::new();
        headers.append(COOKIE, HeaderValue::from_static("theme=dark"));
        headers.append(COOKIE, HeaderValue::from_static("auth.jwt=xyz; lang=en"));
        assert_eq!(cookie_value(&headers, JWT_COOKIE), Some("xyz"));
        assert_eq!(cookie_value(&headers, SIGNATURE_COOKIE), None);
    }
}
