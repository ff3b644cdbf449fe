//! Demo-case catalog indexing.
//!
//! Turns the flat list of `DocumentReference` records returned by the
//! catalog search into a two-level lookup: model → image label → entry.
//!
//! Two dedup rules apply and intentionally differ:
//! - across records, the first record for a `(model, image_label)` pair wins;
//! - within one record, the last attachment of a given class wins.

use std::collections::{BTreeMap, BTreeSet};

use serde::Serialize;
use tracing::debug;

use crate::config::CatalogConfig;
use crate::fhir::{Attachment, CatalogRecord};

/// One indexed demo case
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CatalogEntry {
    pub model: String,
    pub image_label: String,
    pub raw_binary_id: Option<String>,
    pub summary_image_id: Option<String>,
    pub report_doc_id: Option<String>,
}

/// Kind of content attachment on a catalog record
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AttachmentClass {
    SummaryImage,
    ReportDocument,
}

/// Outcome of building an index, for status reporting
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CatalogStatus {
    /// The search returned no records at all.
    #[serde(rename = "catalog_empty")]
    Empty,
    /// Records were returned but none had both a model and an image label.
    #[serde(rename = "catalog_malformed")]
    Malformed,
    Ready,
}

impl CatalogStatus {
    pub fn message(&self) -> &'static str {
        match self {
            CatalogStatus::Empty => "No demo cases found on the FHIR server.",
            CatalogStatus::Malformed => {
                "Demo cases were found but none carry a model and image label."
            }
            CatalogStatus::Ready => "Catalog loaded. Select a model and image.",
        }
    }
}

/// Model → image label → entry
#[derive(Debug, Clone, Default)]
pub struct CatalogIndex {
    entries: BTreeMap<String, BTreeMap<String, CatalogEntry>>,
    models: BTreeSet<String>,
    record_count: usize,
}

impl CatalogIndex {
    /// Build the index from one page of catalog records.
    pub fn build(records: &[CatalogRecord], systems: &CatalogConfig) -> Self {
        let mut index = CatalogIndex {
            record_count: records.len(),
            ..Default::default()
        };

        for (position, record) in records.iter().enumerate() {
            let Some(entry) = index_entry(record, systems) else {
                debug!(
                    position,
                    record_id = record.id.as_deref().unwrap_or("-"),
                    "Skipping catalog record without model or image label"
                );
                continue;
            };

            index.models.insert(entry.model.clone());

            let labels = index.entries.entry(entry.model.clone()).or_default();
            if labels.contains_key(&entry.image_label) {
                debug!(
                    position,
                    model = %entry.model,
                    image_label = %entry.image_label,
                    "Dropping duplicate catalog entry"
                );
                continue;
            }
            labels.insert(entry.image_label.clone(), entry);
        }

        index
    }

    pub fn status(&self) -> CatalogStatus {
        if self.record_count == 0 {
            CatalogStatus::Empty
        } else if self.is_empty() {
            CatalogStatus::Malformed
        } else {
            CatalogStatus::Ready
        }
    }

    /// Distinct models observed, sorted.
    pub fn models(&self) -> Vec<String> {
        self.models.iter().cloned().collect()
    }

    /// Image labels for a model, sorted. Unknown models yield an empty list.
    pub fn image_labels(&self, model: &str) -> Vec<String> {
        self.entries
            .get(model)
            .map(|labels| labels.keys().cloned().collect())
            .unwrap_or_default()
    }

    pub fn get(&self, model: &str, image_label: &str) -> Option<&CatalogEntry> {
        self.entries.get(model)?.get(image_label)
    }

    pub fn len(&self) -> usize {
        self.entries.values().map(BTreeMap::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Value of the first identifier whose system equals `system` exactly.
pub fn extract_identifier<'a>(record: &'a CatalogRecord, system: &str) -> Option<&'a str> {
    record
        .identifier
        .iter()
        .find(|identifier| identifier.system.as_deref() == Some(system))
        .and_then(|identifier| identifier.value.as_deref())
}

/// Classify an attachment by a case-sensitive substring test on its content type.
pub fn classify_content_type(content_type: &str) -> Option<AttachmentClass> {
    if content_type.contains("png") {
        Some(AttachmentClass::SummaryImage)
    } else if content_type.contains("pdf") {
        Some(AttachmentClass::ReportDocument)
    } else {
        None
    }
}

/// Final path segment of an attachment URL, used as the binary id.
pub fn binary_id_from_url(url: &str) -> Option<&str> {
    url.trim_end_matches('/')
        .rsplit('/')
        .next()
        .filter(|segment| !segment.is_empty())
}

fn classify_attachment(attachment: &Attachment) -> Option<(AttachmentClass, &str)> {
    let class = classify_content_type(attachment.content_type.as_deref()?)?;
    let id = binary_id_from_url(attachment.url.as_deref()?)?;
    Some((class, id))
}

fn index_entry(record: &CatalogRecord, systems: &CatalogConfig) -> Option<CatalogEntry> {
    let model = extract_identifier(record, &systems.model_system)?;
    let image_label = extract_identifier(record, &systems.image_label_system)?;

    let mut entry = CatalogEntry {
        model: model.to_string(),
        image_label: image_label.to_string(),
        raw_binary_id: extract_identifier(record, &systems.raw_binary_system).map(str::to_string),
        summary_image_id: None,
        report_doc_id: None,
    };

    for attachment in record.content.iter().filter_map(|c| c.attachment.as_ref()) {
        match classify_attachment(attachment) {
            Some((AttachmentClass::SummaryImage, id)) => {
                entry.summary_image_id = Some(id.to_string())
            }
            Some((AttachmentClass::ReportDocument, id)) => {
                entry.report_doc_id = Some(id.to_string())
            }
            None => {}
        }
    }

    Some(entry)
}
