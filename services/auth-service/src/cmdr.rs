//! `/cmdr` routes: companion API resources for the signed-in account
//!
//! The resource name is checked before the credential, so an unsupported
//! resource is a 404 even without a session. Every successful response
//! carries a re-issued credential (sliding expiry).

use axum::Json;
use axum::extract::{Path, State};
use axum::http::HeaderMap;
use axum::response::{IntoResponse, Response};
use tracing::info;

use crate::AppState;
use crate::error::ApiError;
use crate::proxy::{JournalDate, Payload, Resource};

/// GET /cmdr
pub async fn profile(State(state): State<AppState>, headers: HeaderMap) -> Result<Response, ApiError> {
    serve(&state, &headers, Resource::Profile).await
}

/// GET /cmdr/{resource}
pub async fn resource(
    State(state): State<AppState>,
    Path(resource): Path<String>,
    headers: HeaderMap,
) -> Result<Response, ApiError> {
    let resource: Resource = resource.parse()?;
    serve(&state, &headers, resource).await
}

async fn serve(state: &AppState, headers: &HeaderMap, resource: Resource) -> Result<Response, ApiError> {
    let account_id = state.credentials.authenticate(headers)?;
    let payload = state.proxy.fetch(&account_id, resource).await?;
    Ok(state
        .credentials
        .refresh_on(Payload(payload).into_response(), &account_id))
}

/// GET /cmdr/journal/{year}/{month}/{day}
pub async fn journal_day(
    State(state): State<AppState>,
    Path((year, month, day)): Path<(String, String, String)>,
    headers: HeaderMap,
) -> Result<Response, ApiError> {
    let date = JournalDate::parse(&year, &month, &day)?;
    let account_id = state.credentials.authenticate(&headers)?;
    let payload = state.proxy.fetch_journal_day(&account_id, &date).await?;
    Ok(state
        .credentials
        .refresh_on(Payload(payload).into_response(), &account_id))
}

/// POST /cmdr/delete
pub async fn purge(State(state): State<AppState>, headers: HeaderMap) -> Result<Response, ApiError> {
    let account_id = state.credentials.authenticate(&headers)?;
    let removed = state.proxy.purge(&account_id).await?;
    info!(account_id, removed, "cache purged");
    let response = Json(serde_json::json!({ "success": true })).into_response();
    Ok(state.credentials.refresh_on(response, &account_id))
}

/// Any other method on /cmdr/delete: `delete` is not a readable resource.
pub async fn purge_not_readable() -> ApiError {
    ApiError::NotSupported("delete".into())
}
