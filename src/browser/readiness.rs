//! Readiness probing
//!
//! Dynamic widgets (maps, charts) often insert their container before the
//! rendering surface inside it has mounted. The prober polls the live DOM
//! until the container exists and, when asked, until a required descendant
//! exists too.

use crate::browser::BrowserSession;
use crate::error::{Error, Result};
use chromiumoxide::element::Element;
use chromiumoxide::error::CdpError;
use chromiumoxide::Page;
use std::marker::PhantomData;
use std::time::Duration;
use tokio::time::MissedTickBehavior;
use tracing::{debug, instrument, warn};

/// Options for readiness probing
#[derive(Debug, Clone)]
pub struct ReadinessOptions {
    /// Upper bound for the whole probe in milliseconds (default: 10000)
    pub timeout_ms: u64,
    /// Delay between DOM queries in milliseconds (default: 100)
    pub poll_interval_ms: u64,
    /// Descendant selector required inside the target for raster captures
    pub require_descendant: Option<String>,
}

impl Default for ReadinessOptions {
    fn default() -> Self {
        Self {
            timeout_ms: 10_000,
            poll_interval_ms: 100,
            require_descendant: None,
        }
    }
}

/// A DOM node located on a live page.
///
/// Borrows the session it was found in, so it cannot outlive the browser.
pub struct ResolvedTarget<'s> {
    element: Element,
    selector: String,
    polls: u32,
    _session: PhantomData<&'s BrowserSession>,
}

impl std::fmt::Debug for ResolvedTarget<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResolvedTarget")
            .field("selector", &self.selector)
            .field("polls", &self.polls)
            .finish()
    }
}

impl ResolvedTarget<'_> {
    /// The underlying chromiumoxide element
    pub fn element(&self) -> &Element {
        &self.element
    }

    /// Selector the element was resolved from
    pub fn selector(&self) -> &str {
        &self.selector
    }

    /// Number of DOM queries it took to find the element
    pub fn polls(&self) -> u32 {
        self.polls
    }
}

/// How a failed DOM query should be treated
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum QueryFailure {
    /// Nothing matches yet; keep polling
    Absent,
    /// The selector does not parse
    InvalidSelector(String),
    /// The browser connection broke; polling cannot succeed
    Broken(String),
}

impl QueryFailure {
    /// Classify a chromiumoxide error raised by `find_element`.
    ///
    /// A query without a match surfaces as a protocol error on node id 0,
    /// so protocol errors count as absent unless Chrome says the selector
    /// itself is malformed.
    pub fn classify(err: &CdpError) -> Self {
        match err {
            CdpError::Chrome(e) if is_syntax_error(&e.message) => {
                QueryFailure::InvalidSelector(e.message.clone())
            }
            CdpError::Chrome(_)
            | CdpError::ChromeMessage(_)
            | CdpError::NotFound
            | CdpError::FrameNotFound(_)
            | CdpError::JavascriptException(_) => QueryFailure::Absent,
            other => QueryFailure::Broken(other.to_string()),
        }
    }
}

fn is_syntax_error(message: &str) -> bool {
    let message = message.to_ascii_lowercase();
    message.contains("not a valid selector")
        || message.contains("error while querying")
        || message.contains("syntaxerror")
}

/// Readiness prober
pub struct ReadinessProber;

impl ReadinessProber {
    /// Wait until `selector` (and `descendant`, when given) exist on the page.
    ///
    /// Fails with [`Error::NotFound`] once `timeout_ms` has elapsed. A
    /// malformed selector is a [`Error::BadRequest`] on the first poll; a
    /// broken browser connection ends the probe as [`Error::Render`].
    #[instrument(skip(session, opts), fields(session = %session.id(), timeout_ms = opts.timeout_ms))]
    pub async fn wait_for<'s>(
        session: &'s BrowserSession,
        selector: &str,
        descendant: Option<&str>,
        opts: &ReadinessOptions,
    ) -> Result<ResolvedTarget<'s>> {
        let page = session.page();
        let interval = Duration::from_millis(opts.poll_interval_ms.max(1));
        let limit = Duration::from_millis(opts.timeout_ms);

        let poll = async {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            let mut polls = 0u32;
            loop {
                ticker.tick().await;
                polls += 1;
                if let Some(element) = Self::probe_once(page, selector, descendant).await? {
                    return Ok::<_, Error>((element, polls));
                }
            }
        };

        match tokio::time::timeout(limit, poll).await {
            Ok(Err(e)) => {
                warn!(error = %e, "Probe aborted");
                Err(e)
            }
            Ok(Ok((element, polls))) => {
                debug!(polls, "Target is ready");
                Ok(ResolvedTarget {
                    element,
                    selector: selector.to_string(),
                    polls,
                    _session: PhantomData,
                })
            }
            Err(_) => {
                warn!(?descendant, "Target did not appear in time");
                Err(Error::not_found(selector))
            }
        }
    }

    async fn probe_once(
        page: &Page,
        selector: &str,
        descendant: Option<&str>,
    ) -> Result<Option<Element>> {
        let element = match page.find_element(selector).await {
            Ok(element) => element,
            Err(e) => {
                return match QueryFailure::classify(&e) {
                    QueryFailure::Absent => Ok(None),
                    QueryFailure::InvalidSelector(detail) => Err(Error::bad_request(format!(
                        "Invalid selector \"{selector}\": {detail}"
                    ))),
                    QueryFailure::Broken(detail) => {
                        Err(Error::render(format!("browser lost while probing: {detail}")))
                    }
                };
            }
        };

        let Some(inner) = descendant else {
            return Ok(Some(element));
        };
        match element.find_element(inner).await {
            Ok(_) => Ok(Some(element)),
            Err(e) => match QueryFailure::classify(&e) {
                QueryFailure::Absent => Ok(None),
                // The descendant comes from configuration, not from the caller
                QueryFailure::InvalidSelector(detail) => Err(Error::render(format!(
                    "configured descendant selector \"{inner}\" is invalid: {detail}"
                ))),
                QueryFailure::Broken(detail) => {
                    Err(Error::render(format!("browser lost while probing: {detail}")))
                }
            },
        }
    }
}
