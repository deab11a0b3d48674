//! Page capture functionality
//!
//! Raster captures are clipped to the target element. Document captures
//! either print the whole page (A4, backgrounds on) or wrap the element's
//! raster into a one-page PDF of the same pixel size.

use crate::browser::{BrowserSession, ResolvedTarget};
use crate::error::{Error, Result};
use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use chromiumoxide::cdp::browser_protocol::page::{CaptureScreenshotFormat, PrintToPdfParams};
use image::ImageFormat;
use serde::{Deserialize, Serialize};
use std::io::Cursor;
use std::str::FromStr;
use tracing::{debug, info, instrument};

/// A4 paper width in inches
pub const A4_WIDTH_IN: f64 = 8.27;

/// A4 paper height in inches
pub const A4_HEIGHT_IN: f64 = 11.69;

/// CSS pixels per inch, used to size region documents
pub const CSS_PX_PER_IN: f64 = 96.0;

/// Format for captures
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum CaptureFormat {
    /// PNG raster of the target element
    #[default]
    Png,
    /// PDF document
    Pdf,
}

impl CaptureFormat {
    /// MIME type of artifacts in this format
    pub fn mime_type(self) -> &'static str {
        match self {
            CaptureFormat::Png => "image/png",
            CaptureFormat::Pdf => "application/pdf",
        }
    }

    /// File extension
    pub fn extension(self) -> &'static str {
        match self {
            CaptureFormat::Png => "png",
            CaptureFormat::Pdf => "pdf",
        }
    }
}

impl FromStr for CaptureFormat {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "png" | "raster" => Ok(CaptureFormat::Png),
            "pdf" | "document" => Ok(CaptureFormat::Pdf),
            other => Err(format!(
                "Unsupported format \"{other}\" (expected png or pdf)"
            )),
        }
    }
}

/// What a `format=pdf` request produces
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, clap::ValueEnum)]
pub enum PdfMode {
    /// Whole page on A4, selector only gates readiness
    #[default]
    Page,
    /// Target element only, one page sized to its raster
    Region,
    /// Region when the selector differs from the configured default, page otherwise
    Auto,
}

/// Concrete capture to perform for one request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RenderPlan {
    /// Element screenshot
    Raster,
    /// Whole page, paginated
    PageDocument,
    /// Element screenshot wrapped in a single-page PDF
    RegionDocument,
}

impl RenderPlan {
    /// Decide the capture for a request
    pub fn select(
        format: CaptureFormat,
        mode: PdfMode,
        selector: &str,
        default_selector: Option<&str>,
    ) -> Self {
        match (format, mode) {
            (CaptureFormat::Png, _) => RenderPlan::Raster,
            (CaptureFormat::Pdf, PdfMode::Page) => RenderPlan::PageDocument,
            (CaptureFormat::Pdf, PdfMode::Region) => RenderPlan::RegionDocument,
            (CaptureFormat::Pdf, PdfMode::Auto) => {
                if default_selector == Some(selector) {
                    RenderPlan::PageDocument
                } else {
                    RenderPlan::RegionDocument
                }
            }
        }
    }

    /// Format of the artifact this plan produces
    pub fn format(self) -> CaptureFormat {
        match self {
            RenderPlan::Raster => CaptureFormat::Png,
            RenderPlan::PageDocument | RenderPlan::RegionDocument => CaptureFormat::Pdf,
        }
    }

    /// Whether readiness must also wait for the configured descendant
    pub fn needs_descendant(self) -> bool {
        matches!(self, RenderPlan::Raster | RenderPlan::RegionDocument)
    }
}

/// Options for the render phase
#[derive(Debug, Clone)]
pub struct RenderOptions {
    /// How `format=pdf` is rendered (default: page)
    pub pdf_mode: PdfMode,
    /// Upper bound for the render phase in milliseconds (default: 30000)
    pub timeout_ms: u64,
}

impl Default for RenderOptions {
    fn default() -> Self {
        Self {
            pdf_mode: PdfMode::Page,
            timeout_ms: 30_000,
        }
    }
}

/// Captured bytes plus what the responder needs to describe them
#[derive(Debug, Clone)]
pub struct Artifact {
    /// The captured data
    pub data: Vec<u8>,
    /// The format of the capture
    pub format: CaptureFormat,
    /// Pixel width of the raster the artifact was made from
    pub width: Option<u32>,
    /// Pixel height of the raster the artifact was made from
    pub height: Option<u32>,
}

impl Artifact {
    /// Get appropriate MIME type
    pub fn mime_type(&self) -> &'static str {
        self.format.mime_type()
    }

    /// Size in bytes
    pub fn len(&self) -> usize {
        self.data.len()
    }

    /// Whether the artifact has no bytes
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }
}

/// Read the pixel size from an encoded PNG
pub fn png_dimensions(data: &[u8]) -> Result<(u32, u32)> {
    image::io::Reader::with_format(Cursor::new(data), ImageFormat::Png)
        .into_dimensions()
        .map_err(|e| Error::render(format!("screenshot is not a valid PNG: {e}")))
}

/// HTML page holding a raster at its native size, printed as one PDF page
fn region_document_html(png: &[u8], width: u32, height: u32) -> String {
    format!(
        "<!DOCTYPE html><html><head><style>\
         @page {{ size: {width}px {height}px; margin: 0; }}\
         html, body {{ margin: 0; padding: 0; }}\
         img {{ display: block; width: {width}px; height: {height}px; }}\
         </style></head><body><img src=\"data:image/png;base64,{data}\"></body></html>",
        data = BASE64.encode(png),
    )
}

/// Page capture functionality
pub struct PageCapture;

impl PageCapture {
    /// Produce the artifact for `plan`
    #[instrument(skip(session, target), fields(session = %session.id(), selector = target.selector()))]
    pub async fn render(
        session: &BrowserSession,
        target: &ResolvedTarget<'_>,
        plan: RenderPlan,
    ) -> Result<Artifact> {
        let artifact = match plan {
            RenderPlan::Raster => Self::element_png(target).await?,
            RenderPlan::PageDocument => Self::page_pdf(session).await?,
            RenderPlan::RegionDocument => {
                let raster = Self::element_png(target).await?;
                Self::region_pdf(session, raster).await?
            }
        };

        if artifact.is_empty() {
            return Err(Error::render("browser returned an empty capture"));
        }
        Ok(artifact)
    }

    /// Screenshot exactly the target's bounding box
    async fn element_png(target: &ResolvedTarget<'_>) -> Result<Artifact> {
        info!("Capturing element");

        let data = target
            .element()
            .screenshot(CaptureScreenshotFormat::Png)
            .await
            .map_err(|e| Error::render(format!("element screenshot failed: {e}")))?;

        let (width, height) = png_dimensions(&data)?;
        if width == 0 || height == 0 {
            return Err(Error::render(format!(
                "element \"{}\" has an empty bounding box",
                target.selector()
            )));
        }
        debug!(bytes = data.len(), width, height, "Element screenshot captured");

        Ok(Artifact {
            data,
            format: CaptureFormat::Png,
            width: Some(width),
            height: Some(height),
        })
    }

    /// Print the whole page on A4 with backgrounds
    async fn page_pdf(session: &BrowserSession) -> Result<Artifact> {
        info!("Generating page PDF");

        let params = PrintToPdfParams::builder()
            .print_background(true)
            .paper_width(A4_WIDTH_IN)
            .paper_height(A4_HEIGHT_IN)
            .build();

        let data = session
            .page()
            .pdf(params)
            .await
            .map_err(|e| Error::render(format!("PDF generation failed: {e}")))?;
        debug!(bytes = data.len(), "PDF generated");

        Ok(Artifact {
            data,
            format: CaptureFormat::Pdf,
            width: None,
            height: None,
        })
    }

    /// Wrap a raster into a single PDF page of the same size.
    ///
    /// Replaces the page content; nothing else may use the page afterwards.
    async fn region_pdf(session: &BrowserSession, raster: Artifact) -> Result<Artifact> {
        let (width, height) = match (raster.width, raster.height) {
            (Some(w), Some(h)) => (w, h),
            _ => png_dimensions(&raster.data)?,
        };
        info!(width, height, "Generating region PDF");

        let page = session.page();
        page.set_content(region_document_html(&raster.data, width, height))
            .await
            .map_err(|e| Error::render(format!("cannot load raster for printing: {e}")))?;
        page.evaluate("document.images[0].decode().then(() => true)")
            .await
            .map_err(|e| Error::render(format!("raster did not decode: {e}")))?;

        let params = PrintToPdfParams::builder()
            .print_background(true)
            .paper_width(width as f64 / CSS_PX_PER_IN)
            .paper_height(height as f64 / CSS_PX_PER_IN)
            .margin_top(0.0)
            .margin_bottom(0.0)
            .margin_left(0.0)
            .margin_right(0.0)
            .page_ranges("1")
            .prefer_css_page_size(true)
            .build();

        let data = page
            .pdf(params)
            .await
            .map_err(|e| Error::render(format!("PDF generation failed: {e}")))?;
        debug!(bytes = data.len(), "Region PDF generated");

        Ok(Artifact {
            data,
            format: CaptureFormat::Pdf,
            width: Some(width),
            height: Some(height),
        })
    }
}
