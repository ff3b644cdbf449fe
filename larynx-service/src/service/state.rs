//! State structures for the larynx service.
//!
//! A [`Session`] is the explicit context for one front-end session: its
//! catalog index, the shown selection and the handles it owns.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::analysis::AnalysisResult;
use crate::catalog::{CatalogEntry, CatalogIndex};
use crate::handles::{Handle, HandleTracker, ResourceClass};
use crate::report::{InlineImage, SummaryView};

/// Exam metadata entered on the selection form
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ExamMetadata {
    /// Used verbatim as the FHIR `Patient.id`.
    pub patient_id: String,
    #[serde(default)]
    pub patient_name: String,
    #[serde(default)]
    pub patient_sex: String,
    #[serde(default)]
    pub patient_age: String,
    #[serde(default)]
    pub exam_date: String,
}

/// Which screen the session is on
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionPhase {
    Selecting,
    ResultShown,
}

/// Outcome of fetching one artifact of a selection
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum ArtifactStatus {
    Loaded {
        url: String,
        content_type: String,
        size: usize,
    },
    /// The resource exists but carries no data.
    Missing,
    Failed {
        message: String,
    },
    /// The catalog entry does not reference this artifact.
    NotAvailable,
}

impl ArtifactStatus {
    pub fn loaded(handle: &Handle) -> Self {
        ArtifactStatus::Loaded {
            url: handle.url(),
            content_type: handle.content_type.clone(),
            size: handle.size,
        }
    }

    #[cfg(test)]
    pub fn is_loaded(&self) -> bool {
        matches!(self, ArtifactStatus::Loaded { .. })
    }
}

/// Per-artifact status of the shown selection
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ArtifactReport {
    pub raw_image: ArtifactStatus,
    pub summary_image: ArtifactStatus,
    pub report_document: ArtifactStatus,
}

/// The submitted selection
#[derive(Debug, Clone, Serialize)]
pub struct ShownResult {
    pub entry: CatalogEntry,
    pub metadata: ExamMetadata,
    pub analysis: AnalysisResult,
    pub artifacts: ArtifactReport,
}

/// One front-end session (in-memory only)
#[derive(Debug)]
pub struct Session {
    pub id: Uuid,
    pub index: CatalogIndex,
    pub phase: SessionPhase,
    pub result: Option<ShownResult>,
    pub handles: HandleTracker,
    /// Incremented on every submit; fetches tagged with an older value are stale.
    pub generation: u64,
    pub cancel: CancellationToken,
    pub created_at: DateTime<Utc>,
}

impl Session {
    pub fn new(id: Uuid, index: CatalogIndex, handles: HandleTracker) -> Self {
        Self {
            id,
            index,
            phase: SessionPhase::Selecting,
            result: None,
            handles,
            generation: 0,
            cancel: CancellationToken::new(),
            created_at: Utc::now(),
        }
    }

    /// Start a new selection: cancel in-flight fetches of the previous one.
    ///
    /// Returns the new generation and the token its fetches should observe.
    pub fn begin_selection(&mut self) -> (u64, CancellationToken) {
        self.cancel.cancel();
        self.cancel = CancellationToken::new();
        self.generation += 1;
        (self.generation, self.cancel.clone())
    }

    /// Summary view of the shown result, with images inlined from held handles.
    pub fn summary_view(&self) -> Option<SummaryView> {
        let result = self.result.as_ref()?;
        let inline = |class: ResourceClass| {
            let handle = self.handles.get(class)?;
            Some(InlineImage {
                content_type: handle.content_type.clone(),
                data: self.handles.data(class)?,
            })
        };

        Some(SummaryView {
            metadata: result.metadata.clone(),
            model: result.entry.model.clone(),
            image_label: result.entry.image_label.clone(),
            analysis: Some(result.analysis.clone()),
            raw_image: inline(ResourceClass::RawImage),
            summary_image: inline(ResourceClass::SummaryImage),
            report_frame_src: self
                .handles
                .get(ResourceClass::ReportDocument)
                .map(Handle::url),
        })
    }

    pub fn report_enabled(&self) -> bool {
        self.phase == SessionPhase::ResultShown
            && self.handles.get(ResourceClass::ReportDocument).is_some()
    }

    pub fn observation_enabled(&self) -> bool {
        self.phase == SessionPhase::ResultShown
            && self
                .result
                .as_ref()
                .is_some_and(|result| result.entry.raw_binary_id.is_some())
    }
}
