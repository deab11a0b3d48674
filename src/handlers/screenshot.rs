//! Capture endpoint
//!
//! `GET /screenshot?url=URL&selector=CSS_SELECTOR[&format=png|pdf]`
//!
//! Query values are validated before any browser is started. The capture
//! itself runs on its own task; if the client disconnects, the handler
//! future is dropped, the drop guard cancels the token and the pipeline
//! tears its session down.

use std::sync::Arc;
use std::time::Instant;

use axum::extract::{Query, State};
use axum::http::header;
use axum::response::{IntoResponse, Response};
use serde::Deserialize;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, info_span, Instrument};
use uuid::Uuid;

use crate::browser::{Artifact, CaptureFormat, UrlValidator};
use crate::config::{CaptureDefaults, ServiceConfig};
use crate::error::{Error, Result};
use crate::handlers::AppState;
use crate::pipeline::CaptureRequest;

/// Raw query parameters. Empty values count as absent.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ScreenshotQuery {
    /// Page to load
    pub url: Option<String>,
    /// CSS selector of the region
    pub selector: Option<String>,
    /// `png` (default) or `pdf`
    pub format: Option<String>,
}

fn present(value: Option<&str>) -> Option<&str> {
    value.map(str::trim).filter(|v| !v.is_empty())
}

impl ScreenshotQuery {
    /// Validate the query and fill gaps from `defaults`.
    ///
    /// A missing parameter with no default is a [`Error::BadRequest`]
    /// naming every such parameter.
    pub fn into_request(self, defaults: &CaptureDefaults) -> Result<CaptureRequest> {
        let url = present(self.url.as_deref());
        let selector = present(self.selector.as_deref());

        let mut missing = Vec::new();
        if url.is_none() && defaults.url.is_none() {
            missing.push("\u{201c}url\u{201d}");
        }
        if selector.is_none() && defaults.selector.is_none() {
            missing.push("\u{201c}selector\u{201d}");
        }
        if !missing.is_empty() {
            let noun = if missing.len() == 1 { "parameter" } else { "parameters" };
            return Err(Error::bad_request(format!(
                "Missing {} {noun}",
                missing.join(" and ")
            )));
        }

        let target_url = match url {
            Some(raw) => UrlValidator::validate(raw).map_err(Error::bad_request)?,
            None => defaults.url.clone().ok_or_else(|| Error::bad_request("Missing url"))?,
        };
        let selector = match selector {
            Some(s) => s.to_string(),
            None => defaults
                .selector
                .clone()
                .ok_or_else(|| Error::bad_request("Missing selector"))?,
        };
        let format = match present(self.format.as_deref()) {
            Some(raw) => raw.parse::<CaptureFormat>().map_err(Error::bad_request)?,
            None => CaptureFormat::default(),
        };

        Ok(CaptureRequest {
            target_url,
            selector,
            format,
            credentials: None,
        })
    }
}

/// Build a validated request, attaching the configured credentials
pub fn build_request(query: ScreenshotQuery, config: &ServiceConfig) -> Result<CaptureRequest> {
    let mut request = query.into_request(&config.defaults)?;
    request.credentials = config.credentials.clone();
    Ok(request)
}

/// Capture handler.
///
/// # Route
/// `GET /screenshot`, `GET /api/screenshot`
pub async fn screenshot_handler(
    State(state): State<Arc<AppState>>,
    Query(query): Query<ScreenshotQuery>,
) -> Response {
    let request_id = Uuid::new_v4();
    let span = info_span!("capture", %request_id);
    let started = Instant::now();

    let request = match build_request(query, &state.config) {
        Ok(request) => request,
        Err(e) => {
            let _enter = span.enter();
            info!(error = %e, "Rejected capture request");
            return e.into_response();
        }
    };

    let url = request.target_url.to_string();
    let selector = request.selector.clone();

    let cancel = CancellationToken::new();
    let _guard = cancel.clone().drop_guard();

    let pipeline = state.pipeline.clone();
    let task = tokio::spawn(
        async move { pipeline.run(request, cancel).await }.instrument(span.clone()),
    );

    let outcome = match task.await {
        Ok(outcome) => outcome,
        Err(join) => Err(Error::render(format!("capture task failed: {join}"))),
    };

    let stats = state.stats();
    stats.record_latency(started.elapsed());

    let _enter = span.enter();
    match outcome {
        Ok(artifact) => {
            stats.record_capture(artifact.format);
            info!(
                %url,
                %selector,
                bytes = artifact.len(),
                elapsed_ms = started.elapsed().as_millis() as u64,
                "Capture served"
            );
            artifact_response(artifact)
        }
        Err(e) => {
            stats.record_error();
            error!(%url, %selector, phase = e.phase(), error = %e, "Capture failed");
            e.into_response()
        }
    }
}

/// Successful capture response
pub fn artifact_response(artifact: Artifact) -> Response {
    let disposition = format!(
        "inline; filename=\"capture.{}\"",
        artifact.format.extension()
    );
    (
        [
            (header::CONTENT_TYPE, artifact.mime_type().to_string()),
            (header::CONTENT_LENGTH, artifact.len().to_string()),
            (header::CACHE_CONTROL, "no-store".to_string()),
            (header::CONTENT_DISPOSITION, disposition),
        ],
        artifact.data,
    )
        .into_response()
}
