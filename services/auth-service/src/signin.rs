//! PKCE sign-in flow
//!
//! Pure state machine: receives events, returns (new_state, action). The
//! route handlers below execute the I/O implied by each action.
//!
//! `Init → Authorizing → Callback → Authenticated`, or `→ Error` from any
//! state. Pending attempts live in memory keyed by the OAuth `state` value
//! and are consumed on first use.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use axum::extract::{Query, State};
use axum::http::header::LOCATION;
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use common::Clock;
use frontier_auth::{
    AuthEndpoints, build_authorization_url, compute_challenge, decode_account, exchange_code,
    generate_state, generate_verifier,
};
use serde::Deserialize;
use token_store::Session;
use tokio::sync::Mutex;
use tracing::{error, info, warn};

use crate::AppState;
use crate::config::Redirects;
use crate::session::append_cookies;

/// Pending attempts older than this are discarded.
pub const ATTEMPT_TTL: Duration = Duration::from_secs(10 * 60);

/// Upper bound on in-flight attempts. When full, the oldest is evicted.
pub const MAX_PENDING_ATTEMPTS: usize = 4096;

#[derive(Debug, Clone, PartialEq, Eq)]
#[allow(dead_code)]
pub enum SignInState {
    Init,
    /// Browser sent to the authorization server; verifier held until callback
    Authorizing { verifier: String },
    /// Code received, exchange in progress
    Callback { code: String, verifier: String },
    Authenticated { account_id: String },
    /// Terminal for the attempt. Never retried.
    Error { reason: String },
}

impl SignInState {
    fn name(&self) -> &'static str {
        match self {
            SignInState::Init => "init",
            SignInState::Authorizing { .. } => "authorizing",
            SignInState::Callback { .. } => "callback",
            SignInState::Authenticated { .. } => "authenticated",
            SignInState::Error { .. } => "error",
        }
    }
}

#[derive(Debug)]
pub enum SignInEvent {
    Begin { verifier: String },
    CallbackReceived {
        code: Option<String>,
        error: Option<String>,
    },
    /// Tokens exchanged and the session written
    SessionStored { account_id: String },
    Failed { reason: String },
}

#[derive(Debug, PartialEq, Eq)]
pub enum SignInAction {
    RedirectToAuthorize,
    ExchangeCode { code: String, verifier: String },
    IssueCredential { account_id: String },
    RedirectToError,
}

pub fn handle_event(state: SignInState, event: SignInEvent) -> (SignInState, SignInAction) {
    match (state, event) {
        (SignInState::Init, SignInEvent::Begin { verifier }) => (
            SignInState::Authorizing { verifier },
            SignInAction::RedirectToAuthorize,
        ),

        (SignInState::Authorizing { .. }, SignInEvent::CallbackReceived { error: Some(e), .. }) => {
            failed(format!("authorization denied: {e}"))
        }

        (
            SignInState::Authorizing { verifier },
            SignInEvent::CallbackReceived {
                code: Some(code),
                error: None,
            },
        ) if !code.is_empty() => (
            SignInState::Callback {
                code: code.clone(),
                verifier: verifier.clone(),
            },
            SignInAction::ExchangeCode { code, verifier },
        ),

        (SignInState::Authorizing { .. }, SignInEvent::CallbackReceived { .. }) => {
            failed("callback without authorization code".into())
        }

        // Expired, reused or forged state: no verifier was found for it
        (SignInState::Init, SignInEvent::CallbackReceived { .. }) => {
            failed("no pending sign-in attempt".into())
        }

        (SignInState::Callback { .. }, SignInEvent::SessionStored { account_id }) => (
            SignInState::Authenticated {
                account_id: account_id.clone(),
            },
            SignInAction::IssueCredential { account_id },
        ),

        (_, SignInEvent::Failed { reason }) => failed(reason),

        (state, _) => failed(format!("unexpected event in state {}", state.name())),
    }
}

fn failed(reason: String) -> (SignInState, SignInAction) {
    (SignInState::Error { reason }, SignInAction::RedirectToError)
}

struct PendingAttempt {
    verifier: String,
    created_at: i64,
}

/// In-flight sign-in attempts keyed by OAuth `state`.
pub struct SignInAttempts {
    pending: Mutex<HashMap<String, PendingAttempt>>,
    capacity: usize,
    clock: Arc<dyn Clock>,
}

impl SignInAttempts {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self::with_capacity(clock, MAX_PENDING_ATTEMPTS)
    }

    pub fn with_capacity(clock: Arc<dyn Clock>, capacity: usize) -> Self {
        Self {
            pending: Mutex::new(HashMap::new()),
            capacity: capacity.max(1),
            clock,
        }
    }

    fn expired(&self, attempt: &PendingAttempt, now: i64) -> bool {
        now - attempt.created_at >= ATTEMPT_TTL.as_millis() as i64
    }

    pub async fn begin(&self, state: String, verifier: String) {
        let now = self.clock.now_millis();
        let mut pending = self.pending.lock().await;
        pending.retain(|_, attempt| !self.expired(attempt, now));
        if pending.len() >= self.capacity {
            let oldest = pending
                .iter()
                .min_by_key(|(_, attempt)| attempt.created_at)
                .map(|(key, _)| key.clone());
            if let Some(oldest) = oldest {
                pending.remove(&oldest);
                warn!(capacity = self.capacity, "pending sign-in attempts full, evicted oldest");
            }
        }
        pending.insert(
            state,
            PendingAttempt {
                verifier,
                created_at: now,
            },
        );
    }

    /// Remove the attempt and return its verifier if it has not expired.
    pub async fn take(&self, state: &str) -> Option<String> {
        let now = self.clock.now_millis();
        let attempt = self.pending.lock().await.remove(state)?;
        (!self.expired(&attempt, now)).then_some(attempt.verifier)
    }

    #[cfg(test)]
    pub async fn len(&self) -> usize {
        self.pending.lock().await.len()
    }
}

/// Everything the sign-in routes need besides the stores.
pub struct SignInFlow {
    pub client: reqwest::Client,
    pub endpoints: Arc<AuthEndpoints>,
    pub attempts: SignInAttempts,
    pub redirects: Redirects,
}

/// `302 Found` to `location`.
pub fn found(location: &str) -> Response {
    (StatusCode::FOUND, [(LOCATION, location.to_owned())]).into_response()
}

/// GET /signin
pub async fn signin(State(state): State<AppState>) -> Response {
    let flow = &state.signin;
    let (next, _) = handle_event(
        SignInState::Init,
        SignInEvent::Begin {
            verifier: generate_verifier(),
        },
    );
    let SignInState::Authorizing { verifier } = next else {
        return found(&flow.redirects.error);
    };

    let attempt = generate_state();
    let challenge = compute_challenge(&verifier);
    match build_authorization_url(&flow.endpoints, &attempt, &challenge) {
        Ok(url) => {
            flow.attempts.begin(attempt, verifier).await;
            found(&url)
        }
        Err(e) => {
            error!(error = %e, "failed to build authorization URL");
            found(&flow.redirects.error)
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct CallbackParams {
    code: Option<String>,
    state: Option<String>,
    error: Option<String>,
}

/// GET /callback
pub async fn callback(
    State(state): State<AppState>,
    Query(params): Query<CallbackParams>,
) -> Response {
    let flow = &state.signin;
    let current = match params.state.as_deref() {
        Some(attempt) => match flow.attempts.take(attempt).await {
            Some(verifier) => SignInState::Authorizing { verifier },
            None => SignInState::Init,
        },
        None => SignInState::Init,
    };

    let (mut current, mut action) = handle_event(
        current,
        SignInEvent::CallbackReceived {
            code: params.code,
            error: params.error,
        },
    );

    loop {
        match action {
            SignInAction::ExchangeCode { code, verifier } => {
                let event = match complete_sign_in(&state, &code, &verifier).await {
                    Ok(account_id) => SignInEvent::SessionStored { account_id },
                    Err(reason) => SignInEvent::Failed { reason },
                };
                (current, action) = handle_event(current, event);
            }
            SignInAction::IssueCredential { account_id } => {
                return match state.credentials.session_cookies(&account_id) {
                    Ok(cookies) => {
                        info!(account_id, "signed in");
                        let mut response = found(&flow.redirects.signed_in);
                        append_cookies(&mut response, cookies);
                        response
                    }
                    Err(e) => {
                        error!(account_id, error = %e, "failed to issue credential");
                        found(&flow.redirects.error)
                    }
                };
            }
            SignInAction::RedirectToError | SignInAction::RedirectToAuthorize => break,
        }
    }

    if let SignInState::Error { reason } = &current {
        warn!(reason, "sign-in failed");
    }
    found(&flow.redirects.error)
}

/// Exchange the code, resolve the account and write its session.
async fn complete_sign_in(state: &AppState, code: &str, verifier: &str) -> Result<String, String> {
    let flow = &state.signin;
    let tokens = exchange_code(&flow.client, &flow.endpoints, code, verifier)
        .await
        .map_err(|e| e.to_string())?;
    let identity = decode_account(&flow.client, &flow.endpoints, &tokens.access_token)
        .await
        .map_err(|e| e.to_string())?;

    let now = state.clock.now_millis();
    let session = Session::new(
        identity.account_id.clone(),
        tokens.access_token.clone(),
        tokens.refresh_token.clone(),
        tokens.expires_at_millis(now),
        now,
    );
    state
        .sessions
        .upsert(&session)
        .await
        .map_err(|e| format!("failed to store session: {e}"))?;
    Ok(identity.account_id)
}

/// GET|POST /signout
pub async fn signout(State(state): State<AppState>, headers: HeaderMap) -> Response {
    if let Ok(account_id) = state.credentials.authenticate(&headers) {
        if let Err(e) = state.sessions.delete(&account_id).await {
            warn!(account_id, error = %e, "failed to delete session");
        }
        if let Err(e) = state.proxy.purge(&account_id).await {
            warn!(account_id, error = %e, "failed to purge cache");
        }
        info!(account_id, "signed out");
    }

    let mut response = found(&state.signin.redirects.signed_out);
    match state.credentials.cleared_cookies() {
        Ok(cookies) => append_cookies(&mut response, cookies),
        Err(e) => warn!(error = %e, "failed to build cleared cookies"),
    }
    response
}
