//! Browser automation module
//!
//! This module drives one headless Chromium per capture through
//! ChromiumOxide: session lifecycle, navigation, readiness probing and
//! capture.

pub mod capture;
pub mod executable;
pub mod navigation;
pub mod readiness;
pub mod session;

pub use capture::{
    Artifact, CaptureFormat, PageCapture, PdfMode, RenderOptions, RenderPlan,
};
pub use executable::ExecutableCache;
pub use navigation::{
    Credentials, NavigationOptions, NavigationOutcome, PageNavigator, UrlValidator, WaitUntil,
};
pub use readiness::{ReadinessOptions, ReadinessProber, ResolvedTarget};
pub use session::{BrowserConfig, BrowserSession, CloseOutcome};
