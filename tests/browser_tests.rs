//! Browser module tests
//!
//! The first group checks configuration and types without a browser.
//! Tests marked `#[ignore]` drive a real Chrome/Chromium against a page
//! served from this process; run them with `cargo test -- --ignored`.

use std::sync::Arc;
use std::time::{Duration, Instant};

use axum::http::{header, HeaderMap, StatusCode};
use axum::response::{Html, IntoResponse};
use axum::routing::get;
use axum::Router;
use futures::future::join_all;
use pretty_assertions::assert_eq;
use snapshot_server::browser::capture::png_dimensions;
use snapshot_server::browser::{
    BrowserConfig, BrowserSession, CaptureFormat, Credentials, NavigationOptions, PageNavigator,
    PdfMode, ReadinessOptions, ReadinessProber, WaitUntil,
};
use snapshot_server::error::NavigationError;
use snapshot_server::handlers::status::CaptureStats;
use snapshot_server::{CapturePipeline, CaptureRequest, Error, ServiceConfig};
use tokio_util::sync::CancellationToken;
use url::Url;

#[test]
fn test_browser_config_default() {
    let config = BrowserConfig::default();
    assert!(config.headless);
    assert_eq!(config.width, 1920);
    assert_eq!(config.height, 1080);
    assert!(config.chrome_path.is_none());
    assert!(config.args.iter().any(|a| a == "--no-sandbox"));
    assert!(config.args.iter().any(|a| a == "--disable-setuid-sandbox"));
}

#[test]
fn test_browser_config_builder() {
    let config = BrowserConfig::builder()
        .headless(false)
        .viewport(1280, 720)
        .args(["--no-sandbox"])
        .arg("--no-first-run")
        .launch_timeout_ms(1000)
        .build();

    assert!(!config.headless);
    assert_eq!(config.width, 1280);
    assert_eq!(config.height, 720);
    assert_eq!(config.args, vec!["--no-sandbox", "--no-first-run"]);
    assert_eq!(config.launch_timeout_ms, 1000);
}

#[test]
fn test_capture_format_serialization() {
    for (format, expected) in [(CaptureFormat::Png, "\"png\""), (CaptureFormat::Pdf, "\"pdf\"")] {
        assert_eq!(serde_json::to_string(&format).unwrap(), expected);
    }
}

#[test]
fn test_navigation_defaults() {
    let opts = NavigationOptions::default();
    assert_eq!(opts.wait_until, WaitUntil::NetworkIdle2);
    assert_eq!(opts.timeout_ms, 30_000);
}

// ============================================================================
// Real browser
// ============================================================================

/// Map container whose canvas mounts a little after load
const MAP_PAGE: &str = r#"<!doctype html>
<html><body style="margin:0">
<div id="mapColumns" style="width:320px;height:200px;background:#2a6"></div>
<script>
setTimeout(function () {
  var c = document.createElement('canvas');
  c.width = 320; c.height = 200;
  document.getElementById('mapColumns').appendChild(c);
}, 300);
</script>
</body></html>"#;

/// Page whose image takes `ASSET_DELAY` to arrive
const SLOW_ASSET_PAGE: &str = r#"<!doctype html>
<html><body><div id="mapColumns"><img src="/asset.png"></div></body></html>"#;

const ASSET_DELAY: Duration = Duration::from_millis(1500);

/// 1x1 transparent PNG
const PIXEL_PNG: &[u8] = &[
    0x89, 0x50, 0x4e, 0x47, 0x0d, 0x0a, 0x1a, 0x0a, 0x00, 0x00, 0x00, 0x0d, 0x49, 0x48, 0x44,
    0x52, 0x00, 0x00, 0x00, 0x01, 0x00, 0x00, 0x00, 0x01, 0x08, 0x06, 0x00, 0x00, 0x00, 0x1f,
    0x15, 0xc4, 0x89, 0x00, 0x00, 0x00, 0x0d, 0x49, 0x44, 0x41, 0x54, 0x78, 0x9c, 0x63, 0x00,
    0x01, 0x00, 0x00, 0x05, 0x00, 0x01, 0x0d, 0x0a, 0x2d, 0xb4, 0x00, 0x00, 0x00, 0x00, 0x49,
    0x45, 0x4e, 0x44, 0xae, 0x42, 0x60, 0x82,
];

fn viewer() -> Credentials {
    Credentials::new("viewer", "secret")
}

async fn protected(headers: HeaderMap) -> impl IntoResponse {
    let expected = viewer().authorization_header();
    match headers.get(header::AUTHORIZATION) {
        Some(value) if value.as_bytes() == expected.as_bytes() => {
            (StatusCode::OK, Html(MAP_PAGE)).into_response()
        }
        _ => (StatusCode::UNAUTHORIZED, "login required").into_response(),
    }
}

/// Serves the fixture pages and returns the base URL
async fn serve_fixture() -> Url {
    let app = Router::new()
        .route("/map", get(|| async { Html(MAP_PAGE) }))
        .route("/slow-asset", get(|| async { Html(SLOW_ASSET_PAGE) }))
        .route(
            "/asset.png",
            get(|| async {
                tokio::time::sleep(ASSET_DELAY).await;
                ([(header::CONTENT_TYPE, "image/png")], PIXEL_PNG)
            }),
        )
        .route(
            "/hang",
            get(|| async {
                tokio::time::sleep(Duration::from_secs(30)).await;
                Html("too late")
            }),
        )
        .route("/protected", get(protected));
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    Url::parse(&format!("http://{addr}/")).unwrap()
}

async fn serve_map() -> Url {
    serve_fixture().await.join("map").unwrap()
}

fn pipeline(config: ServiceConfig) -> CapturePipeline {
    CapturePipeline::new(Arc::new(config), Arc::new(CaptureStats::new()))
}

fn request(url: Url, selector: &str, format: CaptureFormat) -> CaptureRequest {
    CaptureRequest {
        target_url: url,
        selector: selector.to_string(),
        format,
        credentials: None,
    }
}

#[tokio::test]
#[ignore = "requires Chrome/Chromium"]
async fn test_png_matches_element_size() {
    let url = serve_map().await;
    let mut config = ServiceConfig::default();
    config.readiness.require_descendant = Some("canvas".to_string());
    let p = pipeline(config);

    let artifact = p
        .run(request(url, "#mapColumns", CaptureFormat::Png), CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(artifact.format, CaptureFormat::Png);
    let (width, height) = png_dimensions(&artifact.data).unwrap();
    assert_eq!((width, height), (320, 200));
    assert_eq!(p.stats().sessions_opened(), p.stats().sessions_closed());
}

#[tokio::test]
#[ignore = "requires Chrome/Chromium"]
async fn test_pdf_page_export() {
    let url = serve_map().await;
    let p = pipeline(ServiceConfig::default());

    let artifact = p
        .run(request(url, "#mapColumns", CaptureFormat::Pdf), CancellationToken::new())
        .await
        .unwrap();

    assert!(artifact.data.starts_with(b"%PDF"));
    assert_eq!(p.stats().active_sessions(), 0);
}

#[tokio::test]
#[ignore = "requires Chrome/Chromium"]
async fn test_pdf_region_export() {
    let url = serve_map().await;
    let mut config = ServiceConfig::default();
    config.render.pdf_mode = PdfMode::Region;
    let p = pipeline(config);

    let artifact = p
        .run(request(url, "#mapColumns", CaptureFormat::Pdf), CancellationToken::new())
        .await
        .unwrap();

    assert!(artifact.data.starts_with(b"%PDF"));
    assert_eq!(artifact.width, Some(320));
    assert_eq!(artifact.height, Some(200));
}

#[tokio::test]
#[ignore = "requires Chrome/Chromium"]
async fn test_missing_selector_is_not_found() {
    let url = serve_map().await;
    let mut config = ServiceConfig::default();
    config.readiness.timeout_ms = 1_000;
    let p = pipeline(config);

    let err = p
        .run(request(url, "#doesNotExist", CaptureFormat::Png), CancellationToken::new())
        .await
        .unwrap_err();

    assert!(matches!(err, Error::NotFound { .. }), "got {err:?}");
    assert!(err.to_string().contains("#doesNotExist"));
    assert_eq!(p.stats().sessions_opened(), 1);
    assert_eq!(p.stats().sessions_closed(), 1);
}

#[tokio::test]
#[ignore = "requires Chrome/Chromium"]
async fn test_unreachable_host_is_navigation_error() {
    let p = pipeline(ServiceConfig::default());
    let url = Url::parse("http://127.0.0.1:9/").unwrap();

    let err = p
        .run(request(url, "#mapColumns", CaptureFormat::Png), CancellationToken::new())
        .await
        .unwrap_err();

    assert!(matches!(err, Error::Navigation(_)), "got {err:?}");
    assert_eq!(p.stats().active_sessions(), 0);
}

#[tokio::test]
#[ignore = "requires Chrome/Chromium"]
async fn test_cancellation_closes_session() {
    let url = serve_map().await;
    let mut config = ServiceConfig::default();
    config.readiness.timeout_ms = 30_000;
    let p = pipeline(config);

    let cancel = CancellationToken::new();
    let trigger = cancel.clone();
    tokio::spawn(async move {
        tokio::time::sleep(std::time::Duration::from_millis(1500)).await;
        trigger.cancel();
    });

    let err = p
        .run(request(url, "#neverThere", CaptureFormat::Png), cancel)
        .await
        .unwrap_err();

    assert!(matches!(err, Error::Cancelled), "got {err:?}");
    assert_eq!(p.stats().active_sessions(), 0);
}

#[tokio::test]
#[ignore = "requires Chrome/Chromium"]
async fn test_session_phases_directly() {
    let url = serve_map().await;
    let mut session = BrowserSession::open(&BrowserConfig::default(), None)
        .await
        .unwrap();

    let outcome = PageNavigator::goto(&session, &url, None, &NavigationOptions::default())
        .await
        .unwrap();
    assert_eq!(outcome.status, Some(200));

    let target = ReadinessProber::wait_for(
        &session,
        "#mapColumns",
        Some("canvas"),
        &ReadinessOptions::default(),
    )
    .await
    .unwrap();
    assert_eq!(target.selector(), "#mapColumns");
    assert!(target.polls() >= 1);
    drop(target);

    session.close().await;
    assert!(!session.is_open());
}

#[tokio::test]
#[ignore = "requires Chrome/Chromium"]
async fn test_navigation_timeout() {
    let base = serve_fixture().await;
    let mut config = ServiceConfig::default();
    config.navigation.timeout_ms = 1_000;
    let p = pipeline(config);

    let started = Instant::now();
    let err = p
        .run(
            request(base.join("hang").unwrap(), "#mapColumns", CaptureFormat::Png),
            CancellationToken::new(),
        )
        .await
        .unwrap_err();

    assert!(
        matches!(err, Error::Navigation(NavigationError::Timeout(1_000))),
        "got {err:?}"
    );
    assert!(started.elapsed() < Duration::from_secs(20));
    assert_eq!(p.stats().active_sessions(), 0);
}

#[tokio::test]
#[ignore = "requires Chrome/Chromium"]
async fn test_unauthorized_without_credentials() {
    let base = serve_fixture().await;
    let p = pipeline(ServiceConfig::default());

    let err = p
        .run(
            request(base.join("protected").unwrap(), "#mapColumns", CaptureFormat::Png),
            CancellationToken::new(),
        )
        .await
        .unwrap_err();

    match &err {
        Error::Auth(detail) => assert!(detail.contains("401"), "{detail}"),
        other => panic!("expected auth error, got {other:?}"),
    }
    assert_eq!(p.stats().active_sessions(), 0);
}

#[tokio::test]
#[ignore = "requires Chrome/Chromium"]
async fn test_rejected_credentials() {
    let base = serve_fixture().await;
    let p = pipeline(ServiceConfig::default());
    let mut req = request(base.join("protected").unwrap(), "#mapColumns", CaptureFormat::Png);
    req.credentials = Some(Credentials::new("viewer", "wrong"));

    let err = p.run(req, CancellationToken::new()).await.unwrap_err();

    match &err {
        Error::Auth(detail) => assert!(detail.contains("rejected"), "{detail}"),
        other => panic!("expected auth error, got {other:?}"),
    }
}

#[tokio::test]
#[ignore = "requires Chrome/Chromium"]
async fn test_accepted_credentials() {
    let base = serve_fixture().await;
    let p = pipeline(ServiceConfig::default());
    let mut req = request(base.join("protected").unwrap(), "#mapColumns", CaptureFormat::Png);
    req.credentials = Some(viewer());

    let artifact = p.run(req, CancellationToken::new()).await.unwrap();
    assert_eq!(png_dimensions(&artifact.data).unwrap(), (320, 200));
}

async fn navigation_time(url: &Url, wait_until: WaitUntil) -> u64 {
    let mut session = BrowserSession::open(&BrowserConfig::default(), None)
        .await
        .unwrap();
    let opts = NavigationOptions {
        wait_until,
        ..Default::default()
    };
    let outcome = PageNavigator::goto(&session, url, None, &opts).await.unwrap();
    assert_eq!(outcome.status, Some(200));
    session.close().await;
    outcome.duration_ms
}

#[tokio::test]
#[ignore = "requires Chrome/Chromium"]
async fn test_dom_content_loaded_does_not_wait_for_images() {
    let url = serve_fixture().await.join("slow-asset").unwrap();
    let elapsed = navigation_time(&url, WaitUntil::DomContentLoaded).await;
    assert!(elapsed < ASSET_DELAY.as_millis() as u64, "took {elapsed}ms");
}

#[tokio::test]
#[ignore = "requires Chrome/Chromium"]
async fn test_load_waits_for_images() {
    let url = serve_fixture().await.join("slow-asset").unwrap();
    let elapsed = navigation_time(&url, WaitUntil::Load).await;
    assert!(elapsed >= ASSET_DELAY.as_millis() as u64 - 100, "took {elapsed}ms");
}

#[tokio::test]
#[ignore = "requires Chrome/Chromium"]
async fn test_network_idle0_waits_for_quiet_network() {
    let url = serve_fixture().await.join("slow-asset").unwrap();
    let idle = NavigationOptions::default().idle_ms;
    let elapsed = navigation_time(&url, WaitUntil::NetworkIdle0).await;
    assert!(
        elapsed >= ASSET_DELAY.as_millis() as u64 + idle - 100,
        "took {elapsed}ms"
    );
}

#[tokio::test]
#[ignore = "requires Chrome/Chromium"]
async fn test_render_timeout() {
    let url = serve_map().await;
    let mut config = ServiceConfig::default();
    config.render.timeout_ms = 0;
    let p = pipeline(config);

    let err = p
        .run(request(url, "#mapColumns", CaptureFormat::Png), CancellationToken::new())
        .await
        .unwrap_err();

    match &err {
        Error::Render(detail) => assert!(detail.contains("timed out"), "{detail}"),
        other => panic!("expected render error, got {other:?}"),
    }
    assert_eq!(p.stats().active_sessions(), 0);
}

#[tokio::test]
#[ignore = "requires Chrome/Chromium"]
async fn test_invalid_selector_fails_fast() {
    let url = serve_map().await;
    let p = pipeline(ServiceConfig::default());

    let started = Instant::now();
    let err = p
        .run(request(url, "##bad[", CaptureFormat::Png), CancellationToken::new())
        .await
        .unwrap_err();

    assert!(matches!(err, Error::BadRequest(_)), "got {err:?}");
    let readiness = Duration::from_millis(ReadinessOptions::default().timeout_ms);
    assert!(started.elapsed() < readiness);
    assert_eq!(p.stats().active_sessions(), 0);
}

#[tokio::test]
#[ignore = "requires Chrome/Chromium"]
async fn test_concurrent_captures_leave_no_sessions() {
    let url = serve_map().await;
    let mut config = ServiceConfig::default();
    config.readiness.timeout_ms = 1_000;
    let p = pipeline(config);

    let runs = (0..4).map(|i| {
        let selector = if i % 2 == 0 { "#mapColumns" } else { "#absent" };
        p.run(
            request(url.clone(), selector, CaptureFormat::Png),
            CancellationToken::new(),
        )
    });
    let results = join_all(runs).await;

    assert_eq!(results.iter().filter(|r| r.is_ok()).count(), 2);
    assert!(results
        .iter()
        .filter_map(|r| r.as_ref().err())
        .all(|e| matches!(e, Error::NotFound { .. })));
    assert_eq!(p.stats().sessions_opened(), 4);
    assert_eq!(p.stats().sessions_closed(), 4);
}
