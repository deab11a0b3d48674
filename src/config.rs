//! Service configuration
//!
//! Command-line flags and environment variables are read once at startup
//! into [`ServiceConfig`], which is then shared by reference with every
//! request. Nothing reads the environment mid-request.

use crate::browser::{
    session::DEFAULT_ARGS, BrowserConfig, Credentials, NavigationOptions, PdfMode,
    ReadinessOptions, RenderOptions, UrlValidator, WaitUntil,
};
use clap::Parser;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;
use url::Url;

/// Configuration errors raised at startup
#[derive(Error, Debug)]
pub enum ConfigError {
    /// The default target URL is unusable
    #[error("Invalid default URL: {0}")]
    DefaultUrl(String),

    /// The default selector is blank
    #[error("Default selector must not be blank")]
    BlankSelector,

    /// Host/port do not form a socket address
    #[error("Invalid listen address {0}")]
    ListenAddr(String),
}

/// Snapshot server command line
#[derive(Parser, Debug, Clone)]
#[command(name = "snapshot-server")]
#[command(version)]
#[command(about = "Capture a DOM region as PNG or a page as PDF over HTTP")]
pub struct Args {
    /// Port to listen on
    #[arg(short, long, env = "PORT", default_value_t = 3000)]
    pub port: u16,

    /// Host to bind to
    #[arg(short = 'H', long, env = "BIND_HOST", default_value = "0.0.0.0")]
    pub host: String,

    /// Target URL used when a request has no `url` parameter
    #[arg(long, env = "DEFAULT_URL")]
    pub default_url: Option<String>,

    /// CSS selector used when a request has no `selector` parameter
    #[arg(long, env = "DEFAULT_SELECTOR")]
    pub default_selector: Option<String>,

    /// Path to Chrome/Chromium executable (auto-detected when absent)
    #[arg(long, env = "CHROME_PATH")]
    pub chrome_path: Option<PathBuf>,

    /// Copy the browser executable here once and launch the copy
    #[arg(long, env = "BROWSER_CACHE_DIR", requires = "chrome_path")]
    pub browser_cache_dir: Option<PathBuf>,

    /// Browser flags; replaces the default container-friendly set
    #[arg(long = "browser-arg", env = "BROWSER_ARGS", value_delimiter = ',', allow_hyphen_values = true)]
    pub browser_args: Vec<String>,

    /// Run the browser with a visible window
    #[arg(long)]
    pub headful: bool,

    /// Basic-auth user for the target page
    #[arg(long, env = "BASIC_AUTH_USER")]
    pub basic_auth_user: Option<String>,

    /// Basic-auth password for the target page
    #[arg(long, env = "BASIC_AUTH_PASSWORD", hide_env_values = true)]
    pub basic_auth_password: Option<String>,

    /// Navigation readiness condition
    #[arg(long, env = "WAIT_UNTIL", value_enum, default_value_t = WaitUntil::NetworkIdle2)]
    pub wait_until: WaitUntil,

    /// Navigation timeout in milliseconds, 0 for none
    #[arg(long, env = "NAVIGATION_TIMEOUT_MS", default_value_t = 30_000)]
    pub navigation_timeout_ms: u64,

    /// How long the target may take to appear after navigation, in milliseconds
    #[arg(long, env = "READINESS_TIMEOUT_MS", default_value_t = 10_000)]
    pub readiness_timeout_ms: u64,

    /// Render phase timeout in milliseconds
    #[arg(long, env = "RENDER_TIMEOUT_MS", default_value_t = 30_000)]
    pub render_timeout_ms: u64,

    /// Descendant that must exist inside the target before a raster capture (e.g. `canvas`)
    #[arg(long, env = "REQUIRE_DESCENDANT")]
    pub require_descendant: Option<String>,

    /// What `format=pdf` renders
    #[arg(long, env = "PDF_MODE", value_enum, default_value_t = PdfMode::Page)]
    pub pdf_mode: PdfMode,

    /// Concurrent capture limit, 0 for unlimited
    #[arg(long, env = "MAX_SESSIONS", default_value_t = 0)]
    pub max_sessions: usize,

    /// Directory served under /static
    #[arg(long, env = "STATIC_DIR", default_value = "static")]
    pub static_dir: PathBuf,

    /// Enable verbose logging
    #[arg(short, long)]
    pub verbose: bool,
}

/// Fallbacks applied to requests that omit parameters
#[derive(Debug, Clone, Default)]
pub struct CaptureDefaults {
    /// Default target URL
    pub url: Option<Url>,
    /// Default CSS selector
    pub selector: Option<String>,
}

/// Everything the service needs, resolved once at startup
#[derive(Debug, Clone)]
pub struct ServiceConfig {
    /// Address to listen on
    pub listen: SocketAddr,
    /// Request fallbacks
    pub defaults: CaptureDefaults,
    /// Browser launch settings
    pub browser: BrowserConfig,
    /// Where to cache a copy of the browser executable
    pub browser_cache_dir: Option<PathBuf>,
    /// Credentials for the target page
    pub credentials: Option<Credentials>,
    /// Navigation policy
    pub navigation: NavigationOptions,
    /// Readiness policy
    pub readiness: ReadinessOptions,
    /// Render policy
    pub render: RenderOptions,
    /// Concurrent capture limit, 0 for unlimited
    pub max_sessions: usize,
    /// Directory served under /static
    pub static_dir: PathBuf,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            listen: SocketAddr::from(([0, 0, 0, 0], 3000)),
            defaults: CaptureDefaults::default(),
            browser: BrowserConfig::default(),
            browser_cache_dir: None,
            credentials: None,
            navigation: NavigationOptions::default(),
            readiness: ReadinessOptions::default(),
            render: RenderOptions::default(),
            max_sessions: 0,
            static_dir: PathBuf::from("static"),
        }
    }
}

impl ServiceConfig {
    /// Upper bound on one capture's latency: launch + navigation +
    /// readiness + render. `None` when navigation is unbounded.
    pub fn request_deadline(&self) -> Option<Duration> {
        let navigation = self.navigation.timeout()?;
        Some(
            Duration::from_millis(self.browser.launch_timeout_ms)
                + navigation
                + Duration::from_millis(self.readiness.timeout_ms)
                + Duration::from_millis(self.render.timeout_ms),
        )
    }
}

impl TryFrom<Args> for ServiceConfig {
    type Error = ConfigError;

    fn try_from(args: Args) -> Result<Self, Self::Error> {
        let listen = format!("{}:{}", args.host, args.port);
        let listen: SocketAddr = listen
            .parse()
            .map_err(|_| ConfigError::ListenAddr(listen.clone()))?;

        let url = args
            .default_url
            .filter(|u| !u.trim().is_empty())
            .map(|u| UrlValidator::validate(u.trim()))
            .transpose()
            .map_err(ConfigError::DefaultUrl)?;

        let selector = match args.default_selector {
            Some(s) if s.trim().is_empty() => return Err(ConfigError::BlankSelector),
            Some(s) => Some(s.trim().to_string()),
            None => None,
        };

        let credentials = args
            .basic_auth_user
            .filter(|u| !u.is_empty())
            .map(|user| Credentials::new(user, args.basic_auth_password.unwrap_or_default()));

        let mut browser = BrowserConfig::builder().headless(!args.headful);
        if let Some(path) = args.chrome_path {
            browser = browser.chrome_path(path);
        }
        let browser = if args.browser_args.is_empty() {
            browser.args(DEFAULT_ARGS)
        } else {
            browser.args(args.browser_args)
        };

        Ok(Self {
            listen,
            defaults: CaptureDefaults { url, selector },
            browser: browser.build(),
            browser_cache_dir: args.browser_cache_dir,
            credentials,
            navigation: NavigationOptions {
                timeout_ms: args.navigation_timeout_ms,
                wait_until: args.wait_until,
                ..Default::default()
            },
            readiness: ReadinessOptions {
                timeout_ms: args.readiness_timeout_ms,
                require_descendant: args.require_descendant.filter(|d| !d.trim().is_empty()),
                ..Default::default()
            },
            render: RenderOptions {
                pdf_mode: args.pdf_mode,
                timeout_ms: args.render_timeout_ms,
            },
            max_sessions: args.max_sessions,
            static_dir: args.static_dir,
        })
    }
}
