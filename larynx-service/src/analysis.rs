//! Demo image analysis.
//!
//! Stands in for the hospital AI endpoint. The values are fixed placeholders
//! with no medical meaning.

use serde::Serialize;

/// Result of analysing one selected image
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct AnalysisResult {
    pub model: String,
    /// Parameter name to value, in presentation order.
    pub parameters: Vec<(String, f64)>,
}

const DEMO_PARAMETERS: &[(&str, f64)] = &[
    ("Glottic gap area (demo)", 12.3),
    ("Symmetry index (demo)", 0.91),
    ("Vocal fold length (demo)", 1.8),
];

/// Run the demo analysis for a selected model.
pub fn run_demo_analysis(model: &str) -> AnalysisResult {
    AnalysisResult {
        model: model.to_string(),
        parameters: DEMO_PARAMETERS
            .iter()
            .map(|(name, value)| (name.to_string(), *value))
            .collect(),
    }
}
