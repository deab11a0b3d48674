//! Capture pipeline
//!
//! ```text
//! admit ──▶ open session ──▶ navigate ──▶ probe ──▶ render ──▶ close session
//!                 │                                              ▲
//!                 └──────────── any failure / cancellation ──────┘
//! ```
//!
//! A session that was opened is always closed before `run` returns, on every
//! path. Nothing is retried.

use crate::browser::{
    Artifact, BrowserSession, CaptureFormat, CloseOutcome, Credentials, ExecutableCache,
    PageCapture, PageNavigator, ReadinessProber, RenderPlan,
};
use crate::config::ServiceConfig;
use crate::error::{Error, Result};
use crate::handlers::status::CaptureStats;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{OwnedSemaphorePermit, Semaphore, TryAcquireError};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};
use url::Url;

/// One validated capture request
#[derive(Debug, Clone)]
pub struct CaptureRequest {
    /// Absolute URL of the page to load
    pub target_url: Url,
    /// CSS selector of the region to capture
    pub selector: String,
    /// Requested artifact format
    pub format: CaptureFormat,
    /// Credentials for the target page
    pub credentials: Option<Credentials>,
}

/// Runs captures. Cheap to clone; clones share the admission limit, the
/// executable cache and the statistics.
#[derive(Debug, Clone)]
pub struct CapturePipeline {
    config: Arc<ServiceConfig>,
    stats: Arc<CaptureStats>,
    executables: Option<Arc<ExecutableCache>>,
    slots: Option<Arc<Semaphore>>,
}

impl CapturePipeline {
    /// Create a pipeline for `config`
    pub fn new(config: Arc<ServiceConfig>, stats: Arc<CaptureStats>) -> Self {
        let executables = config
            .browser_cache_dir
            .as_ref()
            .map(|dir| Arc::new(ExecutableCache::new(dir.clone())));
        let slots = (config.max_sessions > 0).then(|| Arc::new(Semaphore::new(config.max_sessions)));
        Self {
            config,
            stats,
            executables,
            slots,
        }
    }

    /// Shared configuration
    pub fn config(&self) -> &ServiceConfig {
        &self.config
    }

    /// Shared statistics
    pub fn stats(&self) -> &Arc<CaptureStats> {
        &self.stats
    }

    /// Take a capture slot without waiting. `Ok(None)` when unlimited.
    pub fn try_admit(&self) -> Result<Option<OwnedSemaphorePermit>> {
        let Some(slots) = &self.slots else {
            return Ok(None);
        };
        match Arc::clone(slots).try_acquire_owned() {
            Ok(permit) => Ok(Some(permit)),
            Err(TryAcquireError::NoPermits) | Err(TryAcquireError::Closed) => Err(Error::Busy {
                limit: self.config.max_sessions,
            }),
        }
    }

    /// Run one capture end to end.
    ///
    /// Cancelling `cancel` aborts the current phase; the session is still
    /// closed before this returns.
    #[instrument(skip_all, fields(url = %request.target_url, selector = %request.selector, format = ?request.format))]
    pub async fn run(&self, request: CaptureRequest, cancel: CancellationToken) -> Result<Artifact> {
        let _permit = self.try_admit()?;

        if let Some(deadline) = self.config.request_deadline() {
            debug!(deadline_ms = deadline.as_millis() as u64, "Capture admitted");
        }

        let executable = self.resolve_executable().await?;

        // Launch is not raced against cancellation: a half-started process
        // would have no owner to reap it.
        let mut session =
            BrowserSession::open(&self.config.browser, executable.as_deref()).await?;
        let tally = SessionTally::opened(&self.stats);

        let outcome = if cancel.is_cancelled() {
            Err(Error::Cancelled)
        } else {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => Err(Error::Cancelled),
                result = self.drive(&session, &request) => result,
            }
        };

        if let Err(e) = &outcome {
            warn!(phase = e.phase(), error = %e, "Capture failed; closing session");
        }

        match session.close().await {
            CloseOutcome::Killed => warn!(session = %session.id(), "Browser had to be killed"),
            CloseOutcome::Closed | CloseOutcome::AlreadyClosed => {}
        }
        drop(tally);

        outcome
    }

    async fn drive(&self, session: &BrowserSession, request: &CaptureRequest) -> Result<Artifact> {
        let config = &self.config;

        PageNavigator::goto(
            session,
            &request.target_url,
            request.credentials.as_ref(),
            &config.navigation,
        )
        .await?;

        let plan = RenderPlan::select(
            request.format,
            config.render.pdf_mode,
            &request.selector,
            config.defaults.selector.as_deref(),
        );
        let descendant = config
            .readiness
            .require_descendant
            .as_deref()
            .filter(|_| plan.needs_descendant());

        let target =
            ReadinessProber::wait_for(session, &request.selector, descendant, &config.readiness)
                .await?;

        let render_limit = Duration::from_millis(config.render.timeout_ms);
        let artifact = tokio::time::timeout(render_limit, PageCapture::render(session, &target, plan))
            .await
            .map_err(|_| {
                Error::render(format!("capture timed out after {}ms", config.render.timeout_ms))
            })??;

        info!(?plan, bytes = artifact.len(), "Capture complete");
        Ok(artifact)
    }

    async fn resolve_executable(&self) -> Result<Option<PathBuf>> {
        let (Some(cache), Some(source)) = (&self.executables, &self.config.browser.chrome_path)
        else {
            return Ok(None);
        };
        cache
            .resolve(source)
            .await
            .map(Some)
            .map_err(|e| Error::Launch(format!("cannot cache browser executable: {e}")))
    }
}

/// Counts a session as open until dropped, including on unwind
struct SessionTally<'a> {
    stats: &'a CaptureStats,
}

impl<'a> SessionTally<'a> {
    fn opened(stats: &'a CaptureStats) -> Self {
        stats.record_session_opened();
        Self { stats }
    }
}

impl Drop for SessionTally<'_> {
    fn drop(&mut self) {
        self.stats.record_session_closed();
    }
}
