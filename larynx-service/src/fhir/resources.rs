//! FHIR resource shapes as returned by the server.
//!
//! Fields the service does not read are ignored on deserialization.

use serde::{Deserialize, Serialize};

/// Search result bundle
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Bundle<T> {
    #[serde(default = "Vec::new")]
    pub entry: Vec<BundleEntry<T>>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct BundleEntry<T> {
    pub resource: Option<T>,
}

impl<T> Bundle<T> {
    /// Resources carried by the bundle, skipping entries without one.
    pub fn into_resources(self) -> Vec<T> {
        self.entry
            .into_iter()
            .filter_map(|entry| entry.resource)
            .collect()
    }
}

/// A catalog record: one demo case as a `DocumentReference`
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CatalogRecord {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,

    #[serde(default)]
    pub identifier: Vec<Identifier>,

    #[serde(default)]
    pub content: Vec<Content>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Identifier {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub system: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Content {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub attachment: Option<Attachment>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Attachment {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content_type: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
}

/// `Binary` resource in its JSON representation
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BinaryResource {
    #[serde(default)]
    pub content_type: Option<String>,

    /// Base64-encoded payload; absent when the server holds no content.
    #[serde(default)]
    pub data: Option<String>,
}

/// Minimal view of a created resource, used to read back the assigned id
#[derive(Debug, Clone, Deserialize)]
pub struct CreatedResource {
    pub id: Option<String>,
}
