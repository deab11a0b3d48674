//! Browser session lifecycle
//!
//! A [`BrowserSession`] owns exactly one Chromium process and one page for
//! the lifetime of a single capture. It is never pooled or shared.

use crate::error::{Error, Result};
use chromiumoxide::browser::{Browser, BrowserConfig as CdpBrowserConfig};
use chromiumoxide::handler::viewport::Viewport;
use chromiumoxide::Page;
use futures::StreamExt;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tempfile::TempDir;
use tokio::task::JoinHandle;
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

/// Flags that adapt Chromium to a constrained container: no setuid/namespace
/// sandbox, no GPU, no reliance on a large `/dev/shm`.
pub const DEFAULT_ARGS: [&str; 4] = [
    "--no-sandbox",
    "--disable-setuid-sandbox",
    "--disable-gpu",
    "--disable-dev-shm-usage",
];

/// Configuration for browser launch
#[derive(Debug, Clone)]
pub struct BrowserConfig {
    /// Run in headless mode (default: true)
    pub headless: bool,
    /// Browser window width (default: 1920)
    pub width: u32,
    /// Browser window height (default: 1080)
    pub height: u32,
    /// Path to Chrome/Chromium executable (None = auto-detect)
    pub chrome_path: Option<PathBuf>,
    /// Command-line flags passed to the browser (default: [`DEFAULT_ARGS`])
    pub args: Vec<String>,
    /// Upper bound for process start + CDP connection, in milliseconds
    pub launch_timeout_ms: u64,
    /// How long to wait for a graceful exit before killing, in milliseconds
    pub close_timeout_ms: u64,
}

impl Default for BrowserConfig {
    fn default() -> Self {
        Self {
            headless: true,
            width: 1920,
            height: 1080,
            chrome_path: None,
            args: DEFAULT_ARGS.iter().map(|a| a.to_string()).collect(),
            launch_timeout_ms: 20_000,
            close_timeout_ms: 5_000,
        }
    }
}

impl BrowserConfig {
    /// Create a new config builder
    pub fn builder() -> BrowserConfigBuilder {
        BrowserConfigBuilder::default()
    }
}

/// Builder for BrowserConfig
#[derive(Default)]
pub struct BrowserConfigBuilder {
    config: BrowserConfig,
}

impl BrowserConfigBuilder {
    /// Set headless mode
    pub fn headless(mut self, headless: bool) -> Self {
        self.config.headless = headless;
        self
    }

    /// Set viewport dimensions
    pub fn viewport(mut self, width: u32, height: u32) -> Self {
        self.config.width = width;
        self.config.height = height;
        self
    }

    /// Set Chrome path
    pub fn chrome_path<P: Into<PathBuf>>(mut self, path: P) -> Self {
        self.config.chrome_path = Some(path.into());
        self
    }

    /// Replace the whole flag set
    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.config.args = args.into_iter().map(Into::into).collect();
        self
    }

    /// Add one more flag
    pub fn arg<S: Into<String>>(mut self, arg: S) -> Self {
        self.config.args.push(arg.into());
        self
    }

    /// Set launch timeout
    pub fn launch_timeout_ms(mut self, ms: u64) -> Self {
        self.config.launch_timeout_ms = ms;
        self
    }

    /// Set close timeout
    pub fn close_timeout_ms(mut self, ms: u64) -> Self {
        self.config.close_timeout_ms = ms;
        self
    }

    /// Build the config
    pub fn build(self) -> BrowserConfig {
        self.config
    }
}

/// How a session ended when [`BrowserSession::close`] was called
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CloseOutcome {
    /// The browser exited after the CDP close command
    Closed,
    /// The browser did not exit in time and was killed
    Killed,
    /// An earlier call already tore the session down
    AlreadyClosed,
}

/// One browser process plus one page, owned by a single request
pub struct BrowserSession {
    id: Uuid,
    browser: Option<Browser>,
    handler: Option<JoinHandle<()>>,
    page: Page,
    profile: Option<TempDir>,
    close_timeout: Duration,
}

impl std::fmt::Debug for BrowserSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BrowserSession")
            .field("id", &self.id)
            .field("open", &self.is_open())
            .finish()
    }
}

impl BrowserSession {
    /// Launch a browser and open a blank page.
    ///
    /// `executable` overrides `config.chrome_path`; with neither set,
    /// chromiumoxide looks for an installed Chrome/Chromium itself. Any
    /// failure here is a launch error and is never retried.
    #[instrument(skip_all, fields(headless = config.headless))]
    pub async fn open(config: &BrowserConfig, executable: Option<&Path>) -> Result<Self> {
        let id = Uuid::new_v4();
        let profile = tempfile::Builder::new()
            .prefix("snapshot-profile-")
            .tempdir()
            .map_err(|e| Error::Launch(format!("cannot create profile directory: {e}")))?;

        let mut builder = CdpBrowserConfig::builder()
            .viewport(Viewport {
                width: config.width,
                height: config.height,
                device_scale_factor: None,
                emulating_mobile: false,
                is_landscape: true,
                has_touch: false,
            })
            .window_size(config.width, config.height)
            .user_data_dir(profile.path())
            .launch_timeout(Duration::from_millis(config.launch_timeout_ms));

        if !config.headless {
            builder = builder.with_head();
        }

        if let Some(path) = executable.or(config.chrome_path.as_deref()) {
            builder = builder.chrome_executable(path);
        }

        for arg in &config.args {
            builder = builder.arg(arg);
        }

        let cdp_config = builder.build().map_err(Error::Launch)?;

        info!(session = %id, "Launching browser");
        let launch = Browser::launch(cdp_config);
        let (browser, mut handler) =
            tokio::time::timeout(Duration::from_millis(config.launch_timeout_ms), launch)
                .await
                .map_err(|_| {
                    Error::Launch(format!(
                        "browser did not start within {}ms",
                        config.launch_timeout_ms
                    ))
                })?
                .map_err(|e| Error::Launch(e.to_string()))?;

        let handler_task = tokio::spawn(async move {
            // Handler errors are per-message; stopping here would sever the page
            while let Some(event) = handler.next().await {
                if let Err(e) = event {
                    debug!(error = %e, "Browser handler event error");
                }
            }
            debug!("Browser handler finished");
        });

        let close_timeout = Duration::from_millis(config.close_timeout_ms);
        let page = match browser.new_page("about:blank").await {
            Ok(page) => page,
            Err(e) => {
                shutdown(browser, Some(handler_task), close_timeout, id).await;
                return Err(Error::Launch(format!("failed to create page: {e}")));
            }
        };

        info!(session = %id, "Browser session open");

        Ok(Self {
            id,
            browser: Some(browser),
            handler: Some(handler_task),
            page,
            profile: Some(profile),
            close_timeout,
        })
    }

    /// Session id used in logs
    pub fn id(&self) -> Uuid {
        self.id
    }

    /// The page owned by this session
    pub fn page(&self) -> &Page {
        &self.page
    }

    /// Whether [`close`](Self::close) has not run yet
    pub fn is_open(&self) -> bool {
        self.browser.is_some()
    }

    /// Tear the session down. Safe to call any number of times; only the
    /// first call does work. Teardown problems are logged, never returned.
    #[instrument(skip(self), fields(session = %self.id))]
    pub async fn close(&mut self) -> CloseOutcome {
        let Some(browser) = self.browser.take() else {
            return CloseOutcome::AlreadyClosed;
        };
        let outcome = shutdown(browser, self.handler.take(), self.close_timeout, self.id).await;

        // Profile directory goes only after the process is gone
        if let Some(profile) = self.profile.take() {
            if let Err(e) = profile.close() {
                warn!(error = %e, "Failed to remove browser profile directory");
            }
        }

        outcome
    }
}

impl Drop for BrowserSession {
    fn drop(&mut self) {
        if let Some(browser) = self.browser.take() {
            // chromiumoxide kills a still-running child when the Browser drops
            warn!(session = %self.id, "Session dropped without close; killing browser");
            drop(browser);
        }
        if let Some(handler) = self.handler.take() {
            handler.abort();
        }
    }
}

async fn shutdown(
    mut browser: Browser,
    handler: Option<JoinHandle<()>>,
    timeout: Duration,
    id: Uuid,
) -> CloseOutcome {
    if let Err(e) = browser.close().await {
        warn!(session = %id, error = %e, "CDP close failed; waiting for exit anyway");
    }

    let outcome = match tokio::time::timeout(timeout, browser.wait()).await {
        Ok(Ok(_)) => CloseOutcome::Closed,
        Ok(Err(e)) => {
            warn!(session = %id, error = %e, "Waiting for browser exit failed; killing");
            kill(&mut browser, id).await
        }
        Err(_) => {
            warn!(session = %id, timeout_ms = timeout.as_millis() as u64, "Browser did not exit; killing");
            kill(&mut browser, id).await
        }
    };

    if let Some(handler) = handler {
        handler.abort();
    }
    info!(session = %id, ?outcome, "Browser session closed");
    outcome
}

async fn kill(browser: &mut Browser, id: Uuid) -> CloseOutcome {
    if let Some(Err(e)) = browser.kill().await {
        warn!(session = %id, error = %e, "Killing browser failed");
    }
    let _ = browser.wait().await;
    CloseOutcome::Killed
}
