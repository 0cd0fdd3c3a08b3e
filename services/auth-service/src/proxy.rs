//! Upstream proxy and response cache
//!
//! Serves companion API resources for an account: a fresh cache entry wins,
//! otherwise the stored access token is used to fetch from upstream and the
//! response is cached when its resource allows it. The proxy never refreshes
//! tokens itself; a missing token is `Unauthorized`.

use std::fmt;
use std::str::FromStr;

use axum::http::StatusCode;
use axum::http::header::CONTENT_TYPE;
use axum::response::{IntoResponse, Response};
use token_store::{CacheStore, CachedPayload, Freshness, SessionStore};
use tracing::{debug, error, instrument, warn};

use crate::error::ApiError;
use crate::metrics;

pub const JSON_CONTENT_TYPE: &str = "application/json; charset=utf-8";
pub const TEXT_CONTENT_TYPE: &str = "text/plain; charset=utf-8";
pub const GZIP_CONTENT_TYPE: &str = "application/gzip";

/// How an upstream body is interpreted and stored.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PayloadKind {
    /// Parsed as JSON before it is served or cached
    Json,
    Text,
    /// Passed through as `application/gzip`, never cached
    Binary,
}

impl PayloadKind {
    fn content_type(self) -> &'static str {
        match self {
            PayloadKind::Json => JSON_CONTENT_TYPE,
            PayloadKind::Text => TEXT_CONTENT_TYPE,
            PayloadKind::Binary => GZIP_CONTENT_TYPE,
        }
    }
}

/// The companion API resources this service exposes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Resource {
    Profile,
    Market,
    Shipyard,
    CommunityGoals,
    Journal,
    FleetCarrier,
    VisitedStars,
}

impl Resource {
    pub const ALL: [Resource; 7] = [
        Resource::Profile,
        Resource::Market,
        Resource::Shipyard,
        Resource::CommunityGoals,
        Resource::Journal,
        Resource::FleetCarrier,
        Resource::VisitedStars,
    ];

    /// Path segment on both this service and the upstream API.
    pub fn name(self) -> &'static str {
        match self {
            Resource::Profile => "profile",
            Resource::Market => "market",
            Resource::Shipyard => "shipyard",
            Resource::CommunityGoals => "communitygoals",
            Resource::Journal => "journal",
            Resource::FleetCarrier => "fleetcarrier",
            Resource::VisitedStars => "visitedstars",
        }
    }

    pub fn kind(self) -> PayloadKind {
        match self {
            Resource::Journal => PayloadKind::Text,
            Resource::VisitedStars => PayloadKind::Binary,
            _ => PayloadKind::Json,
        }
    }

    /// Binary payloads are too large to keep.
    pub fn is_cacheable(self) -> bool {
        self.kind() != PayloadKind::Binary
    }
}

impl fmt::Display for Resource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for Resource {
    type Err = ApiError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Resource::ALL
            .into_iter()
            .find(|r| r.name() == s)
            .ok_or_else(|| ApiError::NotSupported(s.to_owned()))
    }
}

/// A journal day, each part digits only.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JournalDate {
    year: String,
    month: String,
    day: String,
}

impl JournalDate {
    pub fn parse(year: &str, month: &str, day: &str) -> Result<Self, ApiError> {
        let valid = |part: &str, max_len: usize| {
            !part.is_empty() && part.len() <= max_len && part.bytes().all(|b| b.is_ascii_digit())
        };
        if valid(year, 4) && valid(month, 2) && valid(day, 2) {
            Ok(Self {
                year: year.to_owned(),
                month: month.to_owned(),
                day: day.to_owned(),
            })
        } else {
            Err(ApiError::NotSupported(format!("journal/{year}/{month}/{day}")))
        }
    }

    fn path(&self) -> String {
        format!("journal/{}/{}/{}", self.year, self.month, self.day)
    }
}

/// A payload ready to be written as a response body.
pub struct Payload(pub CachedPayload);

impl IntoResponse for Payload {
    fn into_response(self) -> Response {
        let CachedPayload { content_type, body } = self.0;
        (StatusCode::OK, [(CONTENT_TYPE, content_type)], body).into_response()
    }
}

pub struct UpstreamProxy {
    client: reqwest::Client,
    api_base_url: String,
    sessions: SessionStore,
    cache: CacheStore,
    freshness: Freshness,
}

impl UpstreamProxy {
    pub fn new(
        client: reqwest::Client,
        api_base_url: impl Into<String>,
        sessions: SessionStore,
        cache: CacheStore,
        freshness: Freshness,
    ) -> Self {
        Self {
            client,
            api_base_url: api_base_url.into().trim_end_matches('/').to_owned(),
            sessions,
            cache,
            freshness,
        }
    }

    #[cfg(test)]
    pub fn cache(&self) -> &CacheStore {
        &self.cache
    }

    /// Serve `resource` for the account, from cache when fresh.
    #[instrument(skip_all, fields(account_id = %account_id, resource = %resource))]
    pub async fn fetch(&self, account_id: &str, resource: Resource) -> Result<CachedPayload, ApiError> {
        if resource.is_cacheable() {
            let cached = self
                .cache
                .get(account_id, resource.name(), self.freshness)
                .await?;
            metrics::record_cache_lookup(resource.name(), cached.is_some());
            if let Some(payload) = cached {
                debug!("cache hit");
                return Ok(payload);
            }
        }

        let payload = self
            .fetch_upstream(account_id, resource.name(), resource.kind())
            .await?;

        if resource.is_cacheable() {
            // The response is still served if the write fails
            if let Err(e) = self.cache.set(account_id, resource.name(), &payload).await {
                warn!(error = %e, "failed to cache upstream response");
            }
        }
        Ok(payload)
    }

    /// A specific journal day. Always fetched, never cached.
    #[instrument(skip_all, fields(account_id = %account_id))]
    pub async fn fetch_journal_day(
        &self,
        account_id: &str,
        date: &JournalDate,
    ) -> Result<CachedPayload, ApiError> {
        self.fetch_upstream(account_id, &date.path(), PayloadKind::Text)
            .await
    }

    /// Drop every cached entry for the account.
    pub async fn purge(&self, account_id: &str) -> Result<u64, ApiError> {
        Ok(self.cache.delete_all(account_id).await?)
    }

    async fn fetch_upstream(
        &self,
        account_id: &str,
        path: &str,
        kind: PayloadKind,
    ) -> Result<CachedPayload, ApiError> {
        let access_token = self
            .sessions
            .access_token(account_id)
            .await?
            .ok_or_else(|| ApiError::unauthorized("no access token stored for account"))?;

        let url = format!("{}/{path}", self.api_base_url);
        let response = self
            .client
            .get(&url)
            .bearer_auth(access_token.expose())
            .send()
            .await
            .map_err(transport_error)?;

        let status = response.status();
        if !status.is_success() {
            warn!(status = status.as_u16(), path, "upstream returned error status");
            metrics::record_upstream_error("status");
            return Err(ApiError::Upstream { status });
        }

        let body = response.bytes().await.map_err(transport_error)?;
        match kind {
            PayloadKind::Json => {
                if let Err(e) = serde_json::from_slice::<serde::de::IgnoredAny>(&body) {
                    metrics::record_upstream_error("invalid_body");
                    return Err(ApiError::internal(&e));
                }
            }
            PayloadKind::Text => {
                if let Err(e) = std::str::from_utf8(&body) {
                    metrics::record_upstream_error("invalid_body");
                    return Err(ApiError::internal(&e));
                }
            }
            PayloadKind::Binary => {}
        }
        Ok(CachedPayload::new(kind.content_type(), body.to_vec()))
    }
}

/// No usable upstream response: 504 on timeout, otherwise 502.
fn transport_error(e: reqwest::Error) -> ApiError {
    if e.is_timeout() {
        error!(error = %e, "upstream timeout");
        metrics::record_upstream_error("timeout");
        ApiError::Upstream {
            status: StatusCode::GATEWAY_TIMEOUT,
        }
    } else {
        error!(error = %e, "upstream request failed");
        metrics::record_upstream_error("connection");
        ApiError::Upstream {
            status: StatusCode::BAD_GATEWAY,
        }
    }
}
