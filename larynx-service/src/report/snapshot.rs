//! Summary view capture.
//!
//! Uses chromiumoxide to load the snapshot markup into a headless
//! Chrome/Chromium tab and take a full-page PNG screenshot.

use std::time::{Duration, Instant};

use chromiumoxide::browser::{Browser, BrowserConfig};
use chromiumoxide::cdp::browser_protocol::page::CaptureScreenshotFormat;
use chromiumoxide::cdp::browser_protocol::target::CreateTargetParams;
use chromiumoxide::page::ScreenshotParams;
use futures::StreamExt;
use image::DynamicImage;
use tracing::debug;

use crate::config::BrowserConfig as BrowserSettings;
use crate::error::ReportError;

const READY_TIMEOUT: Duration = Duration::from_secs(15);

/// Captures HTML markup as a raster image with a headless browser
#[derive(Debug, Clone)]
pub struct ChromiumSnapshotter {
    settings: BrowserSettings,
}

impl ChromiumSnapshotter {
    pub fn new(settings: BrowserSettings) -> Self {
        Self { settings }
    }

    /// Render `html` and return the full-page screenshot.
    pub async fn capture(&self, html: &str) -> Result<DynamicImage, ReportError> {
        let mut builder = BrowserConfig::builder()
            .window_size(self.settings.window_width, self.settings.window_height)
            .arg("--headless")
            .arg("--disable-gpu")
            .arg("--no-sandbox")
            .arg("--disable-dev-shm-usage");

        if let Some(path) = &self.settings.chrome_path {
            builder = builder.chrome_executable(path);
        }

        let config = builder.build().map_err(|e| ReportError::Snapshot {
            message: format!("invalid browser configuration: {}", e),
        })?;

        let (mut browser, mut handler) =
            Browser::launch(config)
                .await
                .map_err(|e| ReportError::Snapshot {
                    message: format!("failed to launch browser: {}", e),
                })?;

        // Spawn handler task to process browser events
        let handle = tokio::spawn(async move {
            while let Some(h) = handler.next().await {
                if h.is_err() {
                    break;
                }
            }
        });

        let result = self.render_and_capture(&browser, html).await;

        // Cleanup: close browser and stop the handler
        let _ = browser.close().await;
        handle.abort();

        let png = result?;
        debug!(bytes = png.len(), "Captured summary view");
        image::load_from_memory(&png).map_err(ReportError::from)
    }

    async fn render_and_capture(
        &self,
        browser: &Browser,
        html: &str,
    ) -> Result<Vec<u8>, ReportError> {
        let snapshot_error = |e: chromiumoxide::error::CdpError| ReportError::Snapshot {
            message: e.to_string(),
        };

        let page = browser
            .new_page(CreateTargetParams::new("about:blank"))
            .await
            .map_err(snapshot_error)?;
        page.set_content(html).await.map_err(snapshot_error)?;
        wait_until_loaded(&page).await;

        page.screenshot(
            ScreenshotParams::builder()
                .format(CaptureScreenshotFormat::Png)
                .full_page(true)
                .omit_background(false)
                .build(),
        )
        .await
        .map_err(snapshot_error)
    }
}

/// Poll until the document and all of its images have finished loading.
///
/// Gives up silently after a timeout; the screenshot then shows whatever
/// has rendered so far.
async fn wait_until_loaded(page: &chromiumoxide::Page) {
    let start = Instant::now();

    while start.elapsed() < READY_TIMEOUT {
        let result = page
            .evaluate(
                r#"
                (() => document.readyState === 'complete'
                    && Array.from(document.images).every(img => img.complete))()
            "#,
            )
            .await;

        if let Ok(val) = result
            && let Ok(true) = val.into_value::<bool>()
        {
            return;
        }

        tokio::time::sleep(Duration::from_millis(100)).await;
    }

    debug!("Summary view did not finish loading before capture");
}
