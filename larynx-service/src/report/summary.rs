//! Summary view markup.
//!
//! The summary view is what the front end shows once a result is displayed:
//! exam metadata, the fetched images, the analysis table and an embedded
//! preview frame for the report document. The same markup is captured as
//! page 1 of the assembled report.

use std::fmt::Write as _;
use std::sync::LazyLock;

use base64::Engine;
use bytes::Bytes;
use html_escape::{encode_double_quoted_attribute, encode_text};
use regex::Regex;

use crate::analysis::AnalysisResult;
use crate::service::ExamMetadata;

/// Text shown in place of embedded frames when the view is captured.
pub const FRAME_PLACEHOLDER: &str = "[Report document preview omitted; see the following pages]";

static FRAME_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?is)<iframe\b[^>]*?/>|<iframe\b[^>]*>.*?</iframe\s*>|<iframe\b[^>]*>")
        .expect("frame pattern is valid")
});

/// An image embedded in the view as a data URI
#[derive(Debug, Clone)]
pub struct InlineImage {
    pub content_type: String,
    pub data: Bytes,
}

impl InlineImage {
    fn data_uri(&self) -> String {
        format!(
            "data:{};base64,{}",
            self.content_type,
            base64::engine::general_purpose::STANDARD.encode(&self.data)
        )
    }
}

/// Everything the summary view displays for one shown result
#[derive(Debug, Clone)]
pub struct SummaryView {
    pub metadata: ExamMetadata,
    pub model: String,
    pub image_label: String,
    pub analysis: Option<AnalysisResult>,
    pub raw_image: Option<InlineImage>,
    pub summary_image: Option<InlineImage>,
    /// Source of the report preview frame, when a report document is held.
    pub report_frame_src: Option<String>,
}

impl SummaryView {
    /// Render the live view as a standalone HTML document.
    pub fn render_html(&self) -> String {
        let mut html = String::with_capacity(4096);
        html.push_str(
            "<!DOCTYPE html>\n<html lang=\"en\">\n<head>\n<meta charset=\"utf-8\">\n\
             <title>Laryngeal image summary</title>\n<style>\n",
        );
        html.push_str(STYLE);
        html.push_str("</style>\n</head>\n<body>\n<main id=\"summary\">\n");
        html.push_str("<h1>Laryngeal image summary</h1>\n");

        self.render_metadata(&mut html);
        self.render_images(&mut html);
        self.render_analysis(&mut html);

        if let Some(src) = &self.report_frame_src {
            let _ = write!(
                html,
                "<section class=\"report\">\n<h2>Report document</h2>\n\
                 <iframe src=\"{}\" title=\"Report document\"></iframe>\n</section>\n",
                encode_double_quoted_attribute(src)
            );
        }

        html.push_str("</main>\n</body>\n</html>\n");
        html
    }

    /// Markup ready for rasterization: embedded frames replaced with text.
    pub fn render_snapshot_html(&self) -> String {
        prepare_for_snapshot(&self.render_html())
    }

    fn render_metadata(&self, html: &mut String) {
        let meta = &self.metadata;
        let rows = [
            ("Patient ID", meta.patient_id.as_str()),
            ("Patient name", meta.patient_name.as_str()),
            ("Sex", meta.patient_sex.as_str()),
            ("Age", meta.patient_age.as_str()),
            ("Exam date", meta.exam_date.as_str()),
            ("Model", self.model.as_str()),
            ("Image", self.image_label.as_str()),
        ];

        html.push_str("<section class=\"meta\">\n<table>\n");
        for (label, value) in rows {
            let _ = writeln!(
                html,
                "<tr><th>{}</th><td>{}</td></tr>",
                label,
                encode_text(value)
            );
        }
        html.push_str("</table>\n</section>\n");
    }

    fn render_images(&self, html: &mut String) {
        html.push_str("<section class=\"images\">\n");
        for (caption, image) in [
            ("Original image", &self.raw_image),
            ("Summary image", &self.summary_image),
        ] {
            html.push_str("<figure>\n");
            match image {
                Some(image) => {
                    let _ = writeln!(
                        html,
                        "<img src=\"{}\" alt=\"{}\">",
                        image.data_uri(),
                        caption
                    );
                }
                None => {
                    html.push_str("<p class=\"missing\">Not available</p>\n");
                }
            }
            let _ = writeln!(html, "<figcaption>{}</figcaption>\n</figure>", caption);
        }
        html.push_str("</section>\n");
    }

    fn render_analysis(&self, html: &mut String) {
        let Some(analysis) = &self.analysis else {
            return;
        };
        let _ = writeln!(
            html,
            "<section class=\"analysis\">\n<h2>Analysis ({})</h2>\n<table>",
            encode_text(&analysis.model)
        );
        for (name, value) in &analysis.parameters {
            let _ = writeln!(
                html,
                "<tr><th>{}</th><td>{}</td></tr>",
                encode_text(name),
                value
            );
        }
        html.push_str("</table>\n</section>\n");
    }
}

/// Replace every `<iframe>` element with a textual placeholder.
///
/// Embedded frames cannot be captured reliably by a page screenshot.
pub fn prepare_for_snapshot(html: &str) -> String {
    let placeholder = format!(
        "<div class=\"frame-placeholder\">{}</div>",
        encode_text(FRAME_PLACEHOLDER)
    );
    FRAME_PATTERN
        .replace_all(html, placeholder.as_str())
        .into_owned()
}

const STYLE: &str = "\
body { font-family: sans-serif; margin: 24px; color: #222; background: #fff; }
h1 { font-size: 22px; margin: 0 0 16px; }
h2 { font-size: 16px; margin: 16px 0 8px; }
table { border-collapse: collapse; }
th, td { text-align: left; padding: 4px 12px 4px 0; font-size: 13px; }
.images { display: flex; gap: 16px; }
figure { margin: 0; flex: 1; }
figure img { max-width: 100%; }
figcaption { font-size: 12px; color: #555; }
.missing, .frame-placeholder { padding: 24px; border: 1px dashed #999; color: #555; }
iframe { width: 100%; height: 480px; border: 1px solid #ccc; }
";
