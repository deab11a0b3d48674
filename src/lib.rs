//! Snapshot Server - DOM region capture over HTTP
//!
//! This crate runs a small HTTP service that opens a headless Chromium per
//! request, loads a page, waits for a CSS-selected element to become ready
//! and answers with a PNG of that element or a PDF of the page.
//!
//! # Architecture
//!
//! ```text
//! HTTP ──▶ handlers::screenshot ──▶ CapturePipeline ──▶ BrowserSession (CDP)
//!                  │                       │
//!                  ▼                       ▼
//!            ┌──────────┐    navigate ─▶ probe ─▶ render
//!            │  Error   │                          │
//!            └────┬─────┘                          ▼
//!                 ▼                          PNG / PDF Artifact
//!           text/plain 4xx/5xx
//! ```
//!
//! # Quick Start
//!
//! ```rust,no_run
//! use snapshot_server::{router, AppState, ServiceConfig};
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = ServiceConfig::default();
//!     let listener = tokio::net::TcpListener::bind(config.listen).await?;
//!     let app = router(Arc::new(AppState::new(config)));
//!     axum::serve(listener, app).await?;
//!     Ok(())
//! }
//! ```

#![warn(missing_docs)]
#![warn(rustdoc::missing_crate_level_docs)]

pub mod browser;
pub mod config;
pub mod error;
pub mod handlers;
pub mod pipeline;

// Re-exports for convenience
pub use browser::{Artifact, BrowserSession, CaptureFormat};
pub use config::{Args, ServiceConfig};
pub use error::{Error, Result};
pub use handlers::{router, AppState};
pub use pipeline::{CapturePipeline, CaptureRequest};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Library name
pub const NAME: &str = env!("CARGO_PKG_NAME");
