//! HTTP surface
//!
//! | Route | Handler |
//! |---|---|
//! | `GET /` | usage hint |
//! | `GET /healthz` | [`status::health_handler`] |
//! | `GET /status` | [`status::status_handler`] |
//! | `GET /screenshot`, `GET /api/screenshot` | [`screenshot::screenshot_handler`] |
//! | `GET /static/*` | files from the configured static directory |

pub mod screenshot;
pub mod status;

use std::sync::Arc;

use axum::response::Html;
use axum::routing::get;
use axum::Router;
use tower_http::services::ServeDir;
use tower_http::trace::TraceLayer;

use crate::config::ServiceConfig;
use crate::pipeline::CapturePipeline;
use status::CaptureStats;

/// Landing page body for `GET /`
pub const USAGE_HTML: &str =
    "<h2>Use /screenshot?url=URL&selector=CSS_SELECTOR to get an image</h2>";

/// State shared by every handler
#[derive(Debug, Clone)]
pub struct AppState {
    /// Startup configuration
    pub config: Arc<ServiceConfig>,
    /// Capture pipeline, owns the statistics
    pub pipeline: CapturePipeline,
}

impl AppState {
    /// Build state with fresh statistics
    pub fn new(config: ServiceConfig) -> Self {
        let config = Arc::new(config);
        let pipeline = CapturePipeline::new(Arc::clone(&config), Arc::new(CaptureStats::new()));
        Self { config, pipeline }
    }

    /// Shared statistics
    pub fn stats(&self) -> &Arc<CaptureStats> {
        self.pipeline.stats()
    }
}

/// Build the application router
pub fn router(state: Arc<AppState>) -> Router {
    let static_files = ServeDir::new(&state.config.static_dir);

    Router::new()
        .route("/", get(index_handler))
        .route("/healthz", get(status::health_handler))
        .route("/status", get(status::status_handler))
        .route("/screenshot", get(screenshot::screenshot_handler))
        .route("/api/screenshot", get(screenshot::screenshot_handler))
        .nest_service("/static", static_files)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

async fn index_handler() -> Html<&'static str> {
    Html(USAGE_HTML)
}
