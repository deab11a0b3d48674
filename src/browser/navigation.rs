//! Page navigation functionality
//!
//! This module drives a session's page to a target URL and blocks until the
//! configured readiness signal fires. Navigation is never retried: a failed
//! load is reported once and the caller decides what to do.

use crate::browser::BrowserSession;
use crate::error::{Error, NavigationError, Result};
use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use chromiumoxide::cdp::browser_protocol::network::{
    EnableParams as NetworkEnableParams, EventLoadingFailed, EventLoadingFinished,
    EventRequestWillBeSent, EventResponseReceived, Headers, SetExtraHttpHeadersParams,
};
use chromiumoxide::cdp::browser_protocol::page::{
    EventDomContentEventFired, EventLoadEventFired, NavigateParams,
};
use chromiumoxide::Page;
use futures::stream::{self, BoxStream, StreamExt};
use std::collections::HashSet;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, info, instrument};
use url::Url;

/// Longest URL accepted for navigation
pub const MAX_URL_LEN: usize = 2048;

/// Options for page navigation
#[derive(Debug, Clone)]
pub struct NavigationOptions {
    /// Timeout in milliseconds for the whole navigation; 0 means unbounded (default: 30000)
    pub timeout_ms: u64,
    /// Wait until condition (default: networkidle2)
    pub wait_until: WaitUntil,
    /// Quiet period required by the network-idle conditions (default: 500)
    pub idle_ms: u64,
}

impl Default for NavigationOptions {
    fn default() -> Self {
        Self {
            timeout_ms: 30000,
            wait_until: WaitUntil::NetworkIdle2,
            idle_ms: 500,
        }
    }
}

impl NavigationOptions {
    /// Navigation bound, `None` when unbounded
    pub fn timeout(&self) -> Option<Duration> {
        (self.timeout_ms > 0).then(|| Duration::from_millis(self.timeout_ms))
    }
}

/// Condition to wait for after navigation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, clap::ValueEnum)]
pub enum WaitUntil {
    /// Wait until load event fires
    #[value(name = "load")]
    Load,
    /// Wait until DOMContentLoaded event fires
    #[value(name = "domcontentloaded")]
    DomContentLoaded,
    /// Wait until network is idle (0 requests in flight for the idle period)
    #[value(name = "networkidle0")]
    NetworkIdle0,
    /// Wait until network is idle (at most 2 requests in flight for the idle period)
    #[default]
    #[value(name = "networkidle2")]
    NetworkIdle2,
}

impl WaitUntil {
    /// In-flight request threshold for the network-idle conditions
    pub fn inflight_threshold(self) -> Option<usize> {
        match self {
            WaitUntil::NetworkIdle0 => Some(0),
            WaitUntil::NetworkIdle2 => Some(2),
            WaitUntil::Load | WaitUntil::DomContentLoaded => None,
        }
    }
}

/// Basic-auth credentials for the target page
#[derive(Clone, PartialEq, Eq)]
pub struct Credentials {
    /// User name
    pub username: String,
    /// Password
    pub password: String,
}

impl Credentials {
    /// Create credentials
    pub fn new<U: Into<String>, P: Into<String>>(username: U, password: P) -> Self {
        Self {
            username: username.into(),
            password: password.into(),
        }
    }

    /// Value of the `Authorization` header
    pub fn authorization_header(&self) -> String {
        let token = BASE64.encode(format!("{}:{}", self.username, self.password));
        format!("Basic {token}")
    }
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credentials")
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .finish()
    }
}

/// Result of a navigation operation
#[derive(Debug)]
pub struct NavigationOutcome {
    /// HTTP status of the main document, when the browser reported one
    pub status: Option<u16>,
    /// Navigation duration in milliseconds
    pub duration_ms: u64,
}

/// URL validation utilities
pub struct UrlValidator;

impl UrlValidator {
    /// Parse and validate a URL for navigation
    pub fn validate(url: &str) -> std::result::Result<Url, String> {
        if url.is_empty() {
            return Err("URL cannot be empty".to_string());
        }

        if url.len() > MAX_URL_LEN {
            return Err(format!(
                "URL exceeds maximum length of {MAX_URL_LEN} characters"
            ));
        }

        let parsed = Url::parse(url).map_err(|e| format!("URL is not absolute ({e}): {url}"))?;

        match parsed.scheme() {
            "http" | "https" | "file" => Ok(parsed),
            other => Err(format!(
                "URL must use http, https or file, not {other}: {url}"
            )),
        }
    }
}

/// Tracks requests in flight and when the network last went quiet.
///
/// The network counts as idle once no more than `threshold` requests have
/// been outstanding for a full quiet period.
#[derive(Debug)]
pub struct InflightTracker {
    threshold: usize,
    inflight: HashSet<String>,
    quiet_since: Option<Instant>,
}

impl InflightTracker {
    /// Create a tracker that starts out quiet at `now`
    pub fn new(threshold: usize, now: Instant) -> Self {
        Self {
            threshold,
            inflight: HashSet::new(),
            quiet_since: Some(now),
        }
    }

    /// A request was issued. Redirects reuse the id and count once.
    pub fn started(&mut self, request_id: String, now: Instant) {
        self.inflight.insert(request_id);
        self.update(now);
    }

    /// A request finished or failed
    pub fn finished(&mut self, request_id: &str, now: Instant) {
        self.inflight.remove(request_id);
        self.update(now);
    }

    /// Requests currently outstanding
    pub fn inflight(&self) -> usize {
        self.inflight.len()
    }

    /// Instant the current quiet period started, if quiet
    pub fn quiet_since(&self) -> Option<Instant> {
        self.quiet_since
    }

    /// Whether the network has been quiet for at least `idle`
    pub fn is_idle(&self, idle: Duration, now: Instant) -> bool {
        self.quiet_since
            .map(|since| now.duration_since(since) >= idle)
            .unwrap_or(false)
    }

    fn update(&mut self, now: Instant) {
        if self.inflight.len() > self.threshold {
            self.quiet_since = None;
        } else if self.quiet_since.is_none() {
            self.quiet_since = Some(now);
        }
    }
}

/// Page lifecycle and network events that drive readiness
#[derive(Debug)]
enum PageSignal {
    DomContentLoaded,
    Load,
    RequestStarted(String),
    RequestDone(String),
    Response { request_id: String, status: u16 },
}

/// Page navigator
pub struct PageNavigator;

impl PageNavigator {
    /// Navigate the session's page to `url` and wait for readiness.
    ///
    /// With credentials, an `Authorization` header is installed first and
    /// rides along on every later request of the session.
    #[instrument(skip(session, credentials, opts), fields(session = %session.id(), wait_until = ?opts.wait_until))]
    pub async fn goto(
        session: &BrowserSession,
        url: &Url,
        credentials: Option<&Credentials>,
        opts: &NavigationOptions,
    ) -> Result<NavigationOutcome> {
        let start = std::time::Instant::now();
        let page = session.page();

        if let Some(credentials) = credentials {
            Self::authenticate(page, credentials).await?;
        }

        info!("Navigating to: {}", url);

        let work = Self::navigate_once(page, url, opts);
        let status = match opts.timeout() {
            Some(limit) => tokio::time::timeout(limit, work)
                .await
                .map_err(|_| NavigationError::Timeout(opts.timeout_ms))??,
            None => work.await?,
        };

        if let Some(code @ (401 | 407)) = status {
            let reason = if credentials.is_some() {
                "credentials were rejected"
            } else {
                "page requires authentication but no credentials are configured"
            };
            return Err(Error::Auth(format!("{url} answered {code}: {reason}")));
        }

        let duration_ms = start.elapsed().as_millis() as u64;
        debug!(?status, duration_ms, "Navigation complete");
        Ok(NavigationOutcome {
            status,
            duration_ms,
        })
    }

    /// Install basic-auth credentials on the page
    async fn authenticate(page: &Page, credentials: &Credentials) -> Result<()> {
        debug!(username = %credentials.username, "Installing credentials");
        let headers = Headers::new(serde_json::json!({
            "Authorization": credentials.authorization_header(),
        }));
        page.execute(SetExtraHttpHeadersParams::new(headers))
            .await
            .map_err(|e| Error::Auth(format!("cannot install credentials: {e}")))?;
        Ok(())
    }

    /// Issue the navigation and wait for the readiness condition.
    /// Returns the main document's HTTP status.
    async fn navigate_once(
        page: &Page,
        url: &Url,
        opts: &NavigationOptions,
    ) -> Result<Option<u16>> {
        page.execute(NetworkEnableParams::default())
            .await
            .map_err(|e| NavigationError::Transport(e.to_string()))?;

        // Subscribe before navigating so no early event is missed
        let mut signals = Self::subscribe(page).await?;

        let navigated = page
            .execute(NavigateParams::new(url.as_str()))
            .await
            .map_err(|e| NavigationError::Transport(e.to_string()))?;
        if let Some(error_text) = navigated.result.error_text.clone() {
            return Err(NavigationError::Transport(error_text).into());
        }
        let main_request = navigated
            .result
            .loader_id
            .as_ref()
            .map(|id| id.inner().clone());

        let idle = Duration::from_millis(opts.idle_ms);
        let mut tracker = opts
            .wait_until
            .inflight_threshold()
            .map(|threshold| InflightTracker::new(threshold, Instant::now()));
        let mut load_fired = false;
        let mut status = None;

        loop {
            if load_fired {
                match &tracker {
                    Some(t) if !t.is_idle(idle, Instant::now()) => {}
                    _ => break,
                }
            }

            // Wake up when the current quiet period would complete
            let wake = tracker
                .as_ref()
                .filter(|_| load_fired)
                .and_then(InflightTracker::quiet_since)
                .map(|since| since + idle);

            let signal = tokio::select! {
                signal = signals.next() => signal,
                _ = sleep_until_opt(wake) => continue,
            };

            let Some(signal) = signal else {
                return Err(
                    NavigationError::Transport("browser connection lost".to_string()).into(),
                );
            };

            let now = Instant::now();
            match signal {
                PageSignal::DomContentLoaded => {
                    if opts.wait_until == WaitUntil::DomContentLoaded {
                        break;
                    }
                }
                PageSignal::Load => load_fired = true,
                PageSignal::RequestStarted(id) => {
                    if let Some(t) = tracker.as_mut() {
                        t.started(id, now);
                    }
                }
                PageSignal::RequestDone(id) => {
                    if let Some(t) = tracker.as_mut() {
                        t.finished(&id, now);
                    }
                }
                PageSignal::Response { request_id, status: code } => {
                    if main_request.as_deref() == Some(request_id.as_str()) {
                        status = Some(code);
                    }
                }
            }
        }

        if status.is_none() {
            debug!("Main document status was not observed");
        }
        Ok(status)
    }

    async fn subscribe(page: &Page) -> Result<BoxStream<'static, PageSignal>> {
        let cdp = |e: chromiumoxide::error::CdpError| NavigationError::Transport(e.to_string());

        let dom = page
            .event_listener::<EventDomContentEventFired>()
            .await
            .map_err(cdp)?
            .map(|_| PageSignal::DomContentLoaded);
        let load = page
            .event_listener::<EventLoadEventFired>()
            .await
            .map_err(cdp)?
            .map(|_| PageSignal::Load);
        let sent = page
            .event_listener::<EventRequestWillBeSent>()
            .await
            .map_err(cdp)?
            .map(|e| PageSignal::RequestStarted(e.request_id.inner().clone()));
        let finished = page
            .event_listener::<EventLoadingFinished>()
            .await
            .map_err(cdp)?
            .map(|e| PageSignal::RequestDone(e.request_id.inner().clone()));
        let failed = page
            .event_listener::<EventLoadingFailed>()
            .await
            .map_err(cdp)?
            .map(|e| PageSignal::RequestDone(e.request_id.inner().clone()));
        let responses = page
            .event_listener::<EventResponseReceived>()
            .await
            .map_err(cdp)?
            .map(|e| PageSignal::Response {
                request_id: e.request_id.inner().clone(),
                status: u16::try_from(e.response.status).unwrap_or_default(),
            });

        Ok(stream::select_all([
            dom.boxed(),
            load.boxed(),
            sent.boxed(),
            finished.boxed(),
            failed.boxed(),
            responses.boxed(),
        ])
        .boxed())
    }
}

async fn sleep_until_opt(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}
