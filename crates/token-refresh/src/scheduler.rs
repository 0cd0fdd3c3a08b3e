//! Refresh pass and the periodic task that drives it
//!
//! A pass reads the sessions due inside the horizon from the read pool, then
//! writes each refreshed pair back with one `update_fields` call. It holds no
//! lock across the upstream request, so request handlers writing the same
//! store are never blocked by a slow token endpoint.

use std::sync::Arc;
use std::time::Duration;

use common::Clock;
use frontier_auth::AuthEndpoints;
use token_store::{Session, SessionStore, SessionUpdate};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

use crate::error::Result;

/// Counts from one pass.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct RefreshReport {
    /// Sessions found inside the horizon
    pub examined: usize,
    pub refreshed: usize,
    pub failed: usize,
    /// Signed out between the scan and the write
    pub skipped: usize,
}

enum Outcome {
    Refreshed,
    Failed,
    Skipped,
}

impl Outcome {
    fn label(&self) -> &'static str {
        match self {
            Outcome::Refreshed => "refreshed",
            Outcome::Failed => "failed",
            Outcome::Skipped => "skipped",
        }
    }
}

/// Renews access tokens that expire within `horizon` of now.
pub struct RefreshScheduler {
    sessions: SessionStore,
    client: reqwest::Client,
    endpoints: Arc<AuthEndpoints>,
    clock: Arc<dyn Clock>,
    horizon: Duration,
}

impl RefreshScheduler {
    pub fn new(
        sessions: SessionStore,
        client: reqwest::Client,
        endpoints: Arc<AuthEndpoints>,
        clock: Arc<dyn Clock>,
        horizon: Duration,
    ) -> Self {
        Self {
            sessions,
            client,
            endpoints,
            clock,
            horizon,
        }
    }

    /// Run one pass over every session due inside the horizon.
    ///
    /// Only a failed scan is an error. Sessions outside the horizon are never
    /// read back or written.
    pub async fn run_pass(&self) -> Result<RefreshReport> {
        let cutoff = self
            .clock
            .now_millis()
            .saturating_add(self.horizon.as_millis() as i64);
        let due = self.sessions.expiring_before(cutoff).await?;

        let mut report = RefreshReport {
            examined: due.len(),
            ..RefreshReport::default()
        };

        for session in &due {
            let outcome = self.refresh_session(session).await;
            metrics::counter!("token_refresh_total", "outcome" => outcome.label()).increment(1);
            match outcome {
                Outcome::Refreshed => report.refreshed += 1,
                Outcome::Failed => report.failed += 1,
                Outcome::Skipped => report.skipped += 1,
            }
        }

        info!(
            examined = report.examined,
            refreshed = report.refreshed,
            failed = report.failed,
            skipped = report.skipped,
            "refresh pass complete"
        );
        Ok(report)
    }

    async fn refresh_session(&self, session: &Session) -> Outcome {
        let account_id = session.account_id.as_str();
        debug!(
            account_id,
            expires_at = session.access_token_expires_at,
            "access token inside refresh horizon"
        );

        let token = match frontier_auth::refresh_token(
            &self.client,
            &self.endpoints,
            session.refresh_token.expose(),
        )
        .await
        {
            Ok(token) => token,
            Err(frontier_auth::Error::InvalidCredentials(msg)) => {
                warn!(account_id, error = %msg, "refresh token revoked, keeping session until sign-out");
                return Outcome::Failed;
            }
            Err(e) => {
                warn!(account_id, error = %e, "token refresh failed, will retry next pass");
                return Outcome::Failed;
            }
        };

        let expires_at = token.expires_at_millis(self.clock.now_millis());
        let update = SessionUpdate::refreshed(token.access_token, token.refresh_token, expires_at);
        match self.sessions.update_fields(account_id, update).await {
            Ok(true) => {
                info!(account_id, expires_at, "access token refreshed");
                Outcome::Refreshed
            }
            Ok(false) => {
                debug!(account_id, "session removed during refresh, discarding tokens");
                Outcome::Skipped
            }
            Err(e) => {
                warn!(account_id, error = %e, "failed to persist refreshed token");
                Outcome::Failed
            }
        }
    }
}

/// Spawn the periodic refresh task.
///
/// The first pass runs immediately so sessions that expired while the service
/// was down are renewed at startup, then every `interval` after that. A failed
/// pass is logged and the next tick tries again.
pub fn spawn_refresh_task(scheduler: Arc<RefreshScheduler>, interval: Duration) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            ticker.tick().await;
            if let Err(e) = scheduler.run_pass().await {
                warn!(error = %e, "refresh pass aborted");
            }
        }
    })
}
