//! Rasterization of existing PDF documents.
//!
//! Pages are rendered strictly one after another: each page's bitmap is
//! encoded and handed to the sink before the next page is rendered, so only
//! one raster buffer is alive at a time.

use image::DynamicImage;
use pdfium_render::prelude::*;
use tracing::debug;

use super::layout::{PageSpec, fit_to_page};
use super::writer::{EncodedPage, PageSink, encode_jpeg};
use crate::error::ReportError;

/// Fixed raster settings for source document pages
#[derive(Debug, Clone, Copy)]
pub struct RasterSettings {
    /// Magnification relative to 72 px/inch.
    pub scale: f32,
    pub jpeg_quality: u8,
}

impl RasterSettings {
    pub fn dpi(&self) -> f64 {
        72.0 * self.scale as f64
    }
}

/// Opens paginated documents for rendering
pub trait RasterBackend {
    fn open<'a>(&'a self, bytes: &'a [u8]) -> Result<Box<dyn RasterDocument + 'a>, ReportError>;
}

/// An opened document whose pages can be rendered one at a time
pub trait RasterDocument {
    fn page_count(&self) -> usize;

    /// Render the zero-based page `index` at `scale`.
    fn render_page(&self, index: usize, scale: f32) -> Result<DynamicImage, ReportError>;
}

/// Render every page of `bytes` into `sink`, in order.
///
/// Returns the number of pages appended. An unreadable document fails before
/// anything reaches the sink.
pub fn render_document_pages(
    backend: &dyn RasterBackend,
    bytes: &[u8],
    sink: &mut dyn PageSink,
    settings: RasterSettings,
    page: &PageSpec,
) -> Result<usize, ReportError> {
    let document = backend.open(bytes)?;
    let page_count = document.page_count();
    debug!(page_count, scale = settings.scale, "Rasterizing source document");

    for index in 0..page_count {
        let raster = document.render_page(index, settings.scale)?;
        let (width_px, height_px) = (raster.width(), raster.height());
        let placement = fit_to_page(width_px, height_px, settings.dpi(), page)?;
        let jpeg = encode_jpeg(&raster, settings.jpeg_quality)?;
        drop(raster);

        sink.push_page(EncodedPage {
            jpeg,
            width_px,
            height_px,
            placement,
        })?;
    }

    Ok(page_count)
}

/// Create a new Pdfium instance (dynamically linked).
///
/// Searches for libpdfium in:
/// 1. Current directory (./libpdfium.so)
/// 2. vendor/pdfium/lib/
/// 3. System library paths
pub fn create_pdfium() -> Result<Pdfium, ReportError> {
    let bindings = Pdfium::bind_to_library(Pdfium::pdfium_platform_library_name_at_path("./"))
        .or_else(|_| {
            Pdfium::bind_to_library(Pdfium::pdfium_platform_library_name_at_path(
                "./vendor/pdfium/lib/",
            ))
        })
        .or_else(|_| Pdfium::bind_to_system_library())
        .map_err(|e| ReportError::RendererUnavailable {
            message: format!("Failed to load PDFium library: {:?}", e),
        })?;

    Ok(Pdfium::new(bindings))
}

/// PDFium-backed renderer
pub struct PdfiumBackend {
    pdfium: Pdfium,
}

impl PdfiumBackend {
    pub fn new() -> Result<Self, ReportError> {
        Ok(Self {
            pdfium: create_pdfium()?,
        })
    }
}

impl RasterBackend for PdfiumBackend {
    fn open<'a>(&'a self, bytes: &'a [u8]) -> Result<Box<dyn RasterDocument + 'a>, ReportError> {
        let document = self
            .pdfium
            .load_pdf_from_byte_slice(bytes, None)
            .map_err(|e| ReportError::DocumentOpen {
                message: format!("{:?}", e),
            })?;
        Ok(Box::new(PdfiumDocument { document }))
    }
}

struct PdfiumDocument<'a> {
    document: PdfDocument<'a>,
}

impl RasterDocument for PdfiumDocument<'_> {
    fn page_count(&self) -> usize {
        self.document.pages().len() as usize
    }

    fn render_page(&self, index: usize, scale: f32) -> Result<DynamicImage, ReportError> {
        let page_error = |e: PdfiumError| ReportError::PageRender {
            page: index + 1,
            message: format!("{:?}", e),
        };

        let page = self.document.pages().get(index as u16).map_err(page_error)?;
        let config = PdfRenderConfig::new().scale_page_by_factor(scale);
        let bitmap = page.render_with_config(&config).map_err(page_error)?;

        // Use pdfium-render's built-in conversion which handles color format correctly
        Ok(bitmap.as_image())
    }
}
