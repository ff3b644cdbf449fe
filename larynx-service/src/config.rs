//! Service configuration.
//!
//! Loaded once at startup from an optional `config` file layered under
//! `LARYNX__*` environment variables. Every field has a default so the
//! service starts against a local FHIR sandbox without any configuration.

mod loader;

pub use loader::load_config;

use serde::Deserialize;
use std::time::Duration;

use crate::error::{ServiceError, ServiceResult};
use crate::report::PageSpec;

/// Top-level service configuration
#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    #[serde(default = "default_server")]
    pub server: ServerConfig,

    #[serde(default = "default_fhir")]
    pub fhir: FhirConfig,

    #[serde(default = "default_catalog")]
    pub catalog: CatalogConfig,

    #[serde(default = "default_report")]
    pub report: ReportConfig,

    #[serde(default)]
    pub browser: BrowserConfig,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            server: default_server(),
            fhir: default_fhir(),
            catalog: default_catalog(),
            report: default_report(),
            browser: BrowserConfig::default(),
        }
    }
}

impl AppConfig {
    /// Reject settings that would make report layout impossible.
    pub fn validate(&self) -> ServiceResult<()> {
        self.report.validate()
    }
}

/// HTTP server configuration
#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,

    #[serde(default = "default_port")]
    pub port: u16,
}

/// FHIR server connection and catalog search settings
#[derive(Debug, Clone, Deserialize)]
pub struct FhirConfig {
    #[serde(default = "default_fhir_base_url")]
    pub base_url: String,

    /// Access token obtained by the front end's SMART launch, if the server requires one.
    #[serde(default)]
    pub bearer_token: Option<String>,

    #[serde(default = "default_fhir_timeout_secs")]
    pub timeout_secs: u64,

    /// Category coding used to find the demo cases.
    #[serde(default = "default_category_system")]
    pub category_system: String,

    #[serde(default = "default_category_code")]
    pub category_code: String,

    /// Only the first page of the search result is read.
    #[serde(default = "default_page_size")]
    pub page_size: u32,
}

impl FhirConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

/// Identifier systems naming the semantic fields of a catalog record
#[derive(Debug, Clone, Deserialize)]
pub struct CatalogConfig {
    #[serde(default = "default_model_system")]
    pub model_system: String,

    #[serde(default = "default_image_label_system")]
    pub image_label_system: String,

    #[serde(default = "default_raw_binary_system")]
    pub raw_binary_system: String,
}

/// Report page geometry and raster settings
#[derive(Debug, Clone, Deserialize)]
pub struct ReportConfig {
    #[serde(default = "default_page_width_mm")]
    pub page_width_mm: f64,

    #[serde(default = "default_page_height_mm")]
    pub page_height_mm: f64,

    #[serde(default = "default_margin_mm")]
    pub margin_mm: f64,

    /// Device pixels per inch assumed for the summary view snapshot.
    #[serde(default = "default_snapshot_dpi")]
    pub snapshot_dpi: f64,

    /// Magnification applied when rasterizing source document pages (1.0 = 72 px/inch).
    #[serde(default = "default_render_scale")]
    pub render_scale: f32,

    #[serde(default = "default_jpeg_quality")]
    pub jpeg_quality: u8,
}

impl ReportConfig {
    pub fn validate(&self) -> ServiceResult<()> {
        let invalid = |message: String| Err(ServiceError::Config { message });

        if self.page_width_mm <= 0.0 || self.page_height_mm <= 0.0 {
            return invalid(format!(
                "page size must be positive, got {}x{} mm",
                self.page_width_mm, self.page_height_mm
            ));
        }
        if self.margin_mm < 0.0
            || self.page_width_mm - 2.0 * self.margin_mm <= 0.0
            || self.page_height_mm - 2.0 * self.margin_mm <= 0.0
        {
            return invalid(format!(
                "margin of {} mm leaves no printable area",
                self.margin_mm
            ));
        }
        if self.snapshot_dpi <= 0.0 || self.render_scale <= 0.0 {
            return invalid("snapshot_dpi and render_scale must be positive".to_string());
        }
        if self.jpeg_quality == 0 || self.jpeg_quality > 100 {
            return invalid(format!(
                "jpeg_quality must be within 1..=100, got {}",
                self.jpeg_quality
            ));
        }
        Ok(())
    }
}

/// Headless browser used to capture the summary view
#[derive(Debug, Clone, Deserialize)]
pub struct BrowserConfig {
    /// Optional path to Chrome/Chromium executable (uses system default if not set)
    #[serde(default)]
    pub chrome_path: Option<String>,

    #[serde(default = "default_window_width")]
    pub window_width: u32,

    #[serde(default = "default_window_height")]
    pub window_height: u32,
}

impl Default for BrowserConfig {
    fn default() -> Self {
        Self {
            chrome_path: None,
            window_width: default_window_width(),
            window_height: default_window_height(),
        }
    }
}

// ==================== Default Value Functions ====================

fn default_server() -> ServerConfig {
    ServerConfig {
        host: default_host(),
        port: default_port(),
    }
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    8080
}

fn default_fhir() -> FhirConfig {
    FhirConfig {
        base_url: default_fhir_base_url(),
        bearer_token: None,
        timeout_secs: default_fhir_timeout_secs(),
        category_system: default_category_system(),
        category_code: default_category_code(),
        page_size: default_page_size(),
    }
}

fn default_fhir_base_url() -> String {
    "http://localhost:8081/fhir".to_string()
}

fn default_fhir_timeout_secs() -> u64 {
    30
}

fn default_category_system() -> String {
    "http://example.org/fhir/CodeSystem/larynx-demo".to_string()
}

fn default_category_code() -> String {
    "larynx-demo-case".to_string()
}

fn default_page_size() -> u32 {
    100
}

fn default_catalog() -> CatalogConfig {
    CatalogConfig {
        model_system: default_model_system(),
        image_label_system: default_image_label_system(),
        raw_binary_system: default_raw_binary_system(),
    }
}

fn default_model_system() -> String {
    "http://example.org/fhir/larynx/model".to_string()
}

fn default_image_label_system() -> String {
    "http://example.org/fhir/larynx/image-label".to_string()
}

fn default_raw_binary_system() -> String {
    "http://example.org/fhir/larynx/raw-binary".to_string()
}

fn default_report() -> ReportConfig {
    ReportConfig {
        page_width_mm: default_page_width_mm(),
        page_height_mm: default_page_height_mm(),
        margin_mm: default_margin_mm(),
        snapshot_dpi: default_snapshot_dpi(),
        render_scale: default_render_scale(),
        jpeg_quality: default_jpeg_quality(),
    }
}

// A4 portrait
fn default_page_width_mm() -> f64 {
    PageSpec::A4.width_mm
}

fn default_page_height_mm() -> f64 {
    PageSpec::A4.height_mm
}

fn default_margin_mm() -> f64 {
    PageSpec::A4.margin_mm
}

fn default_snapshot_dpi() -> f64 {
    96.0
}

fn default_render_scale() -> f32 {
    2.0
}

fn default_jpeg_quality() -> u8 {
    92
}

fn default_window_width() -> u32 {
    1240
}

fn default_window_height() -> u32 {
    1754
}
