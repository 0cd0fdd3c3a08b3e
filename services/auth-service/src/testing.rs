//! Shared test harness: a mock Frontier server and a fully wired `AppState`.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use axum::body::Body;
use axum::extract::{Form, Path, State};
use axum::http::header::{AUTHORIZATION, CONTENT_TYPE, LOCATION, SET_COOKIE};
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use common::{Clock, ManualClock, Secret};
use frontier_auth::{AuthEndpoints, verify_challenge};
use metrics_exporter_prometheus::PrometheusBuilder;
use tempfile::TempDir;
use token_store::{CacheStore, Database, DatabaseOptions, Freshness, Session, SessionStore};

use crate::config::{Environment, Redirects};
use crate::proxy::UpstreamProxy;
use crate::session::{CookieSettings, CredentialIssuer};
use crate::signin::{SignInAttempts, SignInFlow};
use crate::{AppState, build_router};

pub(crate) const NOW: i64 = 1_700_000_000_000;

/// Frontier auth server and companion API in one in-process server.
pub(crate) struct MockFrontier {
    pub url: String,
    /// Companion API requests that reached the resource handlers
    pub api_calls: Arc<AtomicUsize>,
    approvals: Arc<Mutex<HashMap<String, String>>>,
}

#[derive(Clone)]
struct MockState {
    api_calls: Arc<AtomicUsize>,
    approvals: Arc<Mutex<HashMap<String, String>>>,
}

impl MockFrontier {
    pub async fn start() -> Self {
        let state = MockState {
            api_calls: Arc::new(AtomicUsize::new(0)),
            approvals: Arc::new(Mutex::new(HashMap::new())),
        };
        let app = Router::new()
            .route("/token", post(token))
            .route("/decode", get(decode))
            .route("/journal/{year}/{month}/{day}", get(journal_day))
            .route("/{resource}", get(resource))
            .with_state(state.clone());

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let url = format!("http://{}", listener.local_addr().unwrap());
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        Self {
            url,
            api_calls: state.api_calls,
            approvals: state.approvals,
        }
    }

    /// Simulate the user consenting: `code` becomes redeemable with the
    /// verifier behind `challenge`.
    pub fn approve(&self, code: &str, challenge: &str) {
        self.approvals
            .lock()
            .unwrap()
            .insert(code.to_owned(), challenge.to_owned());
    }
}

fn bearer(headers: &HeaderMap) -> String {
    headers
        .get(AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .unwrap_or_default()
        .to_owned()
}

fn tokens(access: &str, refresh: &str, expires_in: u64) -> Response {
    Json(serde_json::json!({
        "access_token": access,
        "refresh_token": refresh,
        "expires_in": expires_in,
        "token_type": "Bearer",
    }))
    .into_response()
}

async fn token(State(state): State<MockState>, Form(form): Form<HashMap<String, String>>) -> Response {
    let field = |k: &str| form.get(k).map(String::as_str).unwrap_or_default();
    match field("grant_type") {
        "authorization_code" => {
            let challenge = state.approvals.lock().unwrap().remove(field("code"));
            match challenge {
                Some(challenge) if verify_challenge(field("code_verifier"), &challenge) => {
                    tokens("T1", "R1", 600)
                }
                _ => (
                    StatusCode::BAD_REQUEST,
                    Json(serde_json::json!({ "error": "invalid_grant" })),
                )
                    .into_response(),
            }
        }
        "refresh_token" if field("refresh_token") == "R1" => tokens("T2", "R2", 14_400),
        _ => StatusCode::UNAUTHORIZED.into_response(),
    }
}

async fn decode(headers: HeaderMap) -> Response {
    match bearer(&headers).as_str() {
        "T1" | "T2" => Json(serde_json::json!({ "usr": { "customer_id": "A1" } })).into_response(),
        _ => StatusCode::UNAUTHORIZED.into_response(),
    }
}

async fn resource(
    State(state): State<MockState>,
    Path(resource): Path<String>,
    headers: HeaderMap,
) -> Response {
    if !matches!(bearer(&headers).as_str(), "T1" | "T2") {
        return StatusCode::UNAUTHORIZED.into_response();
    }
    let call = state.api_calls.fetch_add(1, Ordering::SeqCst) + 1;
    match resource.as_str() {
        "journal" => (
            [(CONTENT_TYPE, "text/plain")],
            "{\"event\":\"Fileheader\"}\n",
        )
            .into_response(),
        "visitedstars" => (
            [(CONTENT_TYPE, "application/octet-stream")],
            vec![0x1f_u8, 0x8b, 0x08, 0x00, 0x00, 0x00],
        )
            .into_response(),
        "fleetcarrier" => StatusCode::NOT_FOUND.into_response(),
        "shipyard" => {
            tokio::time::sleep(Duration::from_millis(300)).await;
            Json(serde_json::json!({ "resource": "shipyard", "call": call })).into_response()
        }
        other => Json(serde_json::json!({
            "resource": other,
            "token": bearer(&headers),
            "call": call,
        }))
        .into_response(),
    }
}

async fn journal_day(
    State(state): State<MockState>,
    Path((year, month, day)): Path<(String, String, String)>,
    headers: HeaderMap,
) -> Response {
    if !matches!(bearer(&headers).as_str(), "T1" | "T2") {
        return StatusCode::UNAUTHORIZED.into_response();
    }
    state.api_calls.fetch_add(1, Ordering::SeqCst);
    format!("journal {year}-{month}-{day}").into_response()
}

/// `AppState` over a temp database, a `ManualClock` and a `MockFrontier`.
pub(crate) struct TestApp {
    pub state: AppState,
    pub clock: Arc<ManualClock>,
    pub upstream: MockFrontier,
    _dir: TempDir,
}

impl TestApp {
    pub async fn new() -> Self {
        Self::with_environment(Environment::Production).await
    }

    pub async fn with_environment(environment: Environment) -> Self {
        let dir = tempfile::tempdir().unwrap();
        let upstream = MockFrontier::start().await;
        let clock = Arc::new(ManualClock::new(NOW));
        let dyn_clock: Arc<dyn Clock> = clock.clone();

        let db = Arc::new(
            Database::open(&dir.path().join("auth.db"), DatabaseOptions::default())
                .await
                .unwrap(),
        );
        let sessions = SessionStore::new(db.clone(), dyn_clock.clone());
        let cache = CacheStore::new(db, dyn_clock.clone());
        let client = reqwest::Client::new();

        let endpoints = AuthEndpoints::frontier("test-client", "https://auth.example.test/callback")
            .with_auth_server(&upstream.url);
        let credentials = CredentialIssuer::new(
            &Secret::from("test-jwt-secret"),
            &Secret::from("test-session-secret"),
            Duration::from_secs(60 * 60 * 24 * 30),
            CookieSettings {
                domain: ".example.test".into(),
                secure: environment.is_production(),
            },
            dyn_clock.clone(),
        )
        .unwrap();

        let state = AppState {
            environment,
            clock: dyn_clock.clone(),
            sessions: sessions.clone(),
            credentials: Arc::new(credentials),
            signin: Arc::new(SignInFlow {
                client: client.clone(),
                endpoints: Arc::new(endpoints),
                attempts: SignInAttempts::new(dyn_clock),
                redirects: Redirects {
                    signed_in: "https://www.example.test/auth/signed-in".into(),
                    signed_out: "https://www.example.test/auth/signed-out".into(),
                    error: "https://www.example.test/auth/error".into(),
                },
            }),
            proxy: Arc::new(UpstreamProxy::new(
                client,
                upstream.url.clone(),
                sessions,
                cache,
                Freshness::Always,
            )),
            prometheus: PrometheusBuilder::new().build_recorder().handle(),
            started_at: Instant::now(),
        };

        Self {
            state,
            clock,
            upstream,
            _dir: dir,
        }
    }

    pub fn router(&self) -> Router {
        build_router(self.state.clone(), 1000)
    }

    /// Store a session whose access token expires ten minutes from now.
    pub async fn store_session(&self, account_id: &str, access_token: &str) {
        let now = self.clock.now_millis();
        let session = Session::new(account_id, access_token, "R1", now + 600_000, now);
        self.state.sessions.upsert(&session).await.unwrap();
    }

    /// Store a session and return the `Cookie` header of a valid credential.
    pub async fn sign_in(&self, account_id: &str) -> String {
        self.store_session(account_id, "T1").await;
        self.credential(account_id)
    }

    /// `Cookie` header carrying a credential for the account.
    pub fn credential(&self, account_id: &str) -> String {
        self.state
            .credentials
            .session_cookies(account_id)
            .unwrap()
            .iter()
            .filter_map(|c| c.to_str().ok())
            .filter_map(|c| c.split(';').next())
            .collect::<Vec<_>>()
            .join("; ")
    }
}

pub(crate) async fn body_bytes(response: Response) -> Vec<u8> {
    axum::body::to_bytes(response.into_body(), 1024 * 1024)
        .await
        .unwrap()
        .to_vec()
}

pub(crate) async fn body_string(response: Response) -> String {
    String::from_utf8(body_bytes(response).await).unwrap()
}

pub(crate) async fn body_json(response: Response) -> serde_json::Value {
    serde_json::from_slice(&body_bytes(response).await).unwrap()
}

pub(crate) fn location(response: &Response) -> String {
    response
        .headers()
        .get(LOCATION)
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default()
        .to_owned()
}

pub(crate) fn set_cookies(response: &Response) -> Vec<String> {
    response
        .headers()
        .get_all(SET_COOKIE)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .map(str::to_owned)
        .collect()
}

pub(crate) fn get_request(uri: &str, cookie: Option<&str>) -> axum::http::Request<Body> {
    let mut builder = axum::http::Request::get(uri);
    if let Some(cookie) = cookie {
        builder = builder.header("cookie", cookie);
    }
    builder.body(Body::empty()).unwrap()
}
