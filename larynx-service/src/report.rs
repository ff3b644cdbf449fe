//! Report assembly.
//!
//! An assembled report is a fresh PDF: page 1 is the captured summary view,
//! followed by every page of the source report document rasterized in order.
//! The source document is only read, never modified.

pub mod layout;
pub mod rasterize;
pub mod snapshot;
pub mod summary;
pub mod writer;

pub use layout::{PageSpec, fit_to_page};
pub use rasterize::{PdfiumBackend, RasterBackend, RasterSettings, render_document_pages};
pub use snapshot::ChromiumSnapshotter;
pub use summary::{InlineImage, SummaryView};

use bytes::Bytes;
use futures::future::BoxFuture;
use image::DynamicImage;
use tracing::{debug, info};

use crate::config::ReportConfig;
use crate::error::ReportError;
use writer::{EncodedPage, PageSink, ReportWriter, encode_jpeg};

/// Output page geometry and raster settings for one assembly run
#[derive(Debug, Clone, Copy)]
pub struct ReportLayout {
    pub page: PageSpec,
    pub snapshot_dpi: f64,
    pub raster: RasterSettings,
}

impl From<&ReportConfig> for ReportLayout {
    fn from(config: &ReportConfig) -> Self {
        Self {
            page: PageSpec {
                width_mm: config.page_width_mm,
                height_mm: config.page_height_mm,
                margin_mm: config.margin_mm,
            },
            snapshot_dpi: config.snapshot_dpi,
            raster: RasterSettings {
                scale: config.render_scale,
                jpeg_quality: config.jpeg_quality,
            },
        }
    }
}

/// A finished report
#[derive(Debug, Clone)]
pub struct AssembledReport {
    pub bytes: Vec<u8>,
    pub page_count: usize,
}

/// Build the report from a captured summary view and the source document.
///
/// The result has exactly one more page than `source_pdf`. Any failure
/// aborts the whole run; no partial document is returned.
pub fn assemble_report(
    snapshot: &DynamicImage,
    source_pdf: &[u8],
    backend: &dyn RasterBackend,
    layout: &ReportLayout,
) -> Result<AssembledReport, ReportError> {
    let mut writer = ReportWriter::new(layout.page);

    let (width_px, height_px) = (snapshot.width(), snapshot.height());
    let placement = fit_to_page(width_px, height_px, layout.snapshot_dpi, &layout.page)?;
    debug!(width_px, height_px, ?placement, "Placing summary snapshot");
    writer.push_page(EncodedPage {
        jpeg: encode_jpeg(snapshot, layout.raster.jpeg_quality)?,
        width_px,
        height_px,
        placement,
    })?;

    let source_pages =
        render_document_pages(backend, source_pdf, &mut writer, layout.raster, &layout.page)?;

    let page_count = writer.page_count();
    let bytes = writer.finish()?;
    info!(
        source_pages,
        page_count,
        bytes = bytes.len(),
        "Assembled report"
    );

    Ok(AssembledReport { bytes, page_count })
}

/// Produces an assembled report from a summary view and source document
pub trait ReportRenderer: Send + Sync {
    fn render(
        &self,
        view: SummaryView,
        source_pdf: Bytes,
        layout: ReportLayout,
    ) -> BoxFuture<'_, Result<AssembledReport, ReportError>>;
}

/// Captures the view with headless Chrome and rasterizes the source with PDFium
pub struct HeadlessRenderer {
    snapshotter: ChromiumSnapshotter,
}

impl HeadlessRenderer {
    pub fn new(snapshotter: ChromiumSnapshotter) -> Self {
        Self { snapshotter }
    }
}

impl ReportRenderer for HeadlessRenderer {
    fn render(
        &self,
        view: SummaryView,
        source_pdf: Bytes,
        layout: ReportLayout,
    ) -> BoxFuture<'_, Result<AssembledReport, ReportError>> {
        Box::pin(async move {
            let snapshot = self.snapshotter.capture(&view.render_snapshot_html()).await?;

            // PDFium is synchronous and CPU-bound
            tokio::task::spawn_blocking(move || {
                let backend = PdfiumBackend::new()?;
                assemble_report(&snapshot, &source_pdf, &backend, &layout)
            })
            .await
            .map_err(|e| ReportError::Task {
                message: e.to_string(),
            })?
        })
    }
}
