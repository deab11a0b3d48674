//! Error types for the snapshot server
//!
//! Every failure of the capture pipeline is one variant of [`Error`]. The
//! variants map one-to-one onto HTTP statuses so the responder never has to
//! inspect error strings.

use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use thiserror::Error;

/// The main error type for capture operations
#[derive(Error, Debug)]
pub enum Error {
    /// Missing or invalid request input; the browser is never involved
    #[error("Bad request: {0}")]
    BadRequest(String),

    /// The browser process could not be started
    #[error("Failed to launch browser: {0}")]
    Launch(String),

    /// Credential negotiation with the target page was rejected
    #[error("Authentication failed: {0}")]
    Auth(String),

    /// Navigation errors
    #[error("Navigation error: {0}")]
    Navigation(#[from] NavigationError),

    /// The target never appeared on the loaded page
    #[error("Element with selector \"{selector}\" not found")]
    NotFound {
        /// Selector that was probed
        selector: String,
    },

    /// The capture step failed after the target was resolved
    #[error("Render failed: {0}")]
    Render(String),

    /// All capture slots are taken
    #[error("Too many concurrent captures (limit {limit})")]
    Busy {
        /// Configured session limit
        limit: usize,
    },

    /// The client went away before the capture completed
    #[error("Capture cancelled")]
    Cancelled,
}

/// Navigation errors
#[derive(Error, Debug)]
pub enum NavigationError {
    /// Navigation timeout
    #[error("Navigation timed out after {0}ms")]
    Timeout(u64),

    /// DNS, connection or TLS failure
    #[error("Transport failure: {0}")]
    Transport(String),
}

/// Result type alias for capture operations
pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    /// Create a bad request error from a string
    pub fn bad_request<S: Into<String>>(msg: S) -> Self {
        Error::BadRequest(msg.into())
    }

    /// Create a render error from a string
    pub fn render<S: Into<String>>(msg: S) -> Self {
        Error::Render(msg.into())
    }

    /// Create a not-found error for a selector
    pub fn not_found<S: Into<String>>(selector: S) -> Self {
        Error::NotFound {
            selector: selector.into(),
        }
    }

    /// Pipeline phase that produced this error, for logs
    pub fn phase(&self) -> &'static str {
        match self {
            Error::BadRequest(_) => "validate",
            Error::Busy { .. } => "admit",
            Error::Launch(_) => "launch",
            Error::Auth(_) => "authenticate",
            Error::Navigation(_) => "navigate",
            Error::NotFound { .. } => "probe",
            Error::Render(_) => "render",
            Error::Cancelled => "cancelled",
        }
    }

    /// HTTP status reported to the caller
    pub fn status_code(&self) -> StatusCode {
        match self {
            Error::BadRequest(_) => StatusCode::BAD_REQUEST,
            Error::NotFound { .. } => StatusCode::NOT_FOUND,
            Error::Busy { .. } => StatusCode::SERVICE_UNAVAILABLE,
            // 499 is nginx's "client closed request"; nobody is listening anyway
            Error::Cancelled => {
                StatusCode::from_u16(499).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR)
            }
            Error::Launch(_) | Error::Auth(_) | Error::Navigation(_) | Error::Render(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }
}

/// Convert chromiumoxide errors raised while rendering
impl From<chromiumoxide::error::CdpError> for Error {
    fn from(err: chromiumoxide::error::CdpError) -> Self {
        Error::Render(err.to_string())
    }
}

impl IntoResponse for Error {
    fn into_response(self) -> Response {
        let body = match &self {
            Error::BadRequest(msg) => msg.clone(),
            other => format!("Screenshot failed: {other}"),
        };
        (
            self.status_code(),
            [(header::CONTENT_TYPE, "text/plain; charset=utf-8")],
            body,
        )
            .into_response()
    }
}
