//! Page fit calculation.
//!
//! All lengths are millimetres measured from the top-left corner of the page.

use serde::Serialize;

use crate::error::ReportError;

const MM_PER_INCH: f64 = 25.4;

/// Fixed output page geometry
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PageSpec {
    pub width_mm: f64,
    pub height_mm: f64,
    pub margin_mm: f64,
}

impl PageSpec {
    pub const A4: PageSpec = PageSpec {
        width_mm: 210.0,
        height_mm: 297.0,
        margin_mm: 10.0,
    };

    pub fn printable_width(&self) -> f64 {
        self.width_mm - 2.0 * self.margin_mm
    }

    pub fn printable_height(&self) -> f64 {
        self.height_mm - 2.0 * self.margin_mm
    }
}

/// Placement of content on a page
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct PageBox {
    pub x: f64,
    pub y: f64,
    pub width: f64,
    pub height: f64,
}

/// Largest centered, aspect-preserving box for a raster on `page`.
///
/// `dpi` converts pixels to physical size before scaling; the raster is
/// scaled up or down as needed to touch the printable area on one axis.
pub fn fit_to_page(
    width_px: u32,
    height_px: u32,
    dpi: f64,
    page: &PageSpec,
) -> Result<PageBox, ReportError> {
    if width_px == 0 || height_px == 0 {
        return Err(ReportError::Layout {
            message: format!("raster has no area ({}x{} px)", width_px, height_px),
        });
    }
    if !(dpi > 0.0) {
        return Err(ReportError::Layout {
            message: format!("resolution must be positive, got {}", dpi),
        });
    }
    let (available_width, available_height) = (page.printable_width(), page.printable_height());
    if !(available_width > 0.0 && available_height > 0.0) {
        return Err(ReportError::Layout {
            message: format!("margin of {} mm leaves no printable area", page.margin_mm),
        });
    }

    let width_mm = width_px as f64 / dpi * MM_PER_INCH;
    let height_mm = height_px as f64 / dpi * MM_PER_INCH;

    let scale = (available_width / width_mm).min(available_height / height_mm);
    let width = (width_mm * scale).min(available_width);
    let height = (height_mm * scale).min(available_height);

    Ok(PageBox {
        x: (page.width_mm - width) / 2.0,
        y: (page.height_mm - height) / 2.0,
        width,
        height,
    })
}
