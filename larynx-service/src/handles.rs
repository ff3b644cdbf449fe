//! Ephemeral resource handles.
//!
//! Fetched images, the report document and the assembled output are handed
//! to the front end as URLs under `/api/blobs/{id}`. The bytes live in a
//! process-wide [`BlobStore`]; each session owns a [`HandleTracker`] that
//! keeps at most one live handle per [`ResourceClass`] and revokes the old
//! blob whenever a new one is installed.

use std::collections::HashMap;
use std::sync::Arc;

use bytes::Bytes;
use dashmap::DashMap;
use serde::Serialize;
use strum::{Display, EnumIter, IntoEnumIterator};
use tracing::debug;
use uuid::Uuid;

/// The kinds of resource a session can hold a handle for
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display, EnumIter, Serialize)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum ResourceClass {
    RawImage,
    SummaryImage,
    ReportDocument,
    AssembledReport,
}

impl ResourceClass {
    /// Content type assumed when the server does not declare one.
    pub fn default_content_type(&self) -> &'static str {
        match self {
            ResourceClass::RawImage => "image/bmp",
            ResourceClass::SummaryImage => "image/png",
            ResourceClass::ReportDocument | ResourceClass::AssembledReport => "application/pdf",
        }
    }
}

/// Stored bytes behind a handle
#[derive(Debug, Clone)]
pub struct Blob {
    pub content_type: String,
    pub data: Bytes,
}

/// Process-wide store of live blobs, addressed by handle id
#[derive(Debug, Clone, Default)]
pub struct BlobStore {
    blobs: Arc<DashMap<Uuid, Blob>>,
}

impl BlobStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn insert(&self, blob: Blob) -> Uuid {
        let id = Uuid::new_v4();
        self.blobs.insert(id, blob);
        id
    }

    fn remove(&self, id: &Uuid) -> bool {
        self.blobs.remove(id).is_some()
    }

    pub fn get(&self, id: &Uuid) -> Option<Blob> {
        self.blobs.get(id).map(|blob| blob.clone())
    }

    pub fn len(&self) -> usize {
        self.blobs.len()
    }

    #[cfg(test)]
    pub fn is_empty(&self) -> bool {
        self.blobs.is_empty()
    }
}

/// A live, externally addressable handle
#[derive(Debug, Clone, Serialize)]
pub struct Handle {
    pub id: Uuid,
    pub class: ResourceClass,
    pub content_type: String,
    pub size: usize,
}

impl Handle {
    pub fn url(&self) -> String {
        format!("/api/blobs/{}", self.id)
    }
}

/// Per-session owner of at most one handle per resource class
#[derive(Debug)]
pub struct HandleTracker {
    store: BlobStore,
    held: HashMap<ResourceClass, Handle>,
}

impl HandleTracker {
    pub fn new(store: BlobStore) -> Self {
        Self {
            store,
            held: HashMap::new(),
        }
    }

    /// Install a new handle for `class`, revoking the previous one first.
    pub fn install(&mut self, class: ResourceClass, content_type: String, data: Bytes) -> Handle {
        self.release(class);

        let size = data.len();
        let id = self.store.insert(Blob {
            content_type: content_type.clone(),
            data,
        });
        let handle = Handle {
            id,
            class,
            content_type,
            size,
        };
        debug!(
            class = %class,
            handle_id = %id,
            size,
            live = self.store.len(),
            "Installed resource handle"
        );
        self.held.insert(class, handle.clone());
        handle
    }

    /// Revoke the handle held for `class`, if any.
    pub fn release(&mut self, class: ResourceClass) {
        if let Some(previous) = self.held.remove(&class) {
            self.store.remove(&previous.id);
            debug!(class = %class, handle_id = %previous.id, "Released resource handle");
        }
    }

    /// Revoke every held handle.
    pub fn release_all(&mut self) {
        for class in ResourceClass::iter() {
            self.release(class);
        }
    }

    pub fn get(&self, class: ResourceClass) -> Option<&Handle> {
        self.held.get(&class)
    }

    /// Bytes behind the handle held for `class`.
    pub fn data(&self, class: ResourceClass) -> Option<Bytes> {
        let handle = self.held.get(&class)?;
        self.store.get(&handle.id).map(|blob| blob.data)
    }
}

impl Drop for HandleTracker {
    fn drop(&mut self) {
        self.release_all();
    }
}
