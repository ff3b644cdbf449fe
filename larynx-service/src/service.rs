mod state;

pub use state::{
    ArtifactReport, ArtifactStatus, ExamMetadata, Session, SessionPhase, ShownResult,
};

use bytes::Bytes;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use metrics::counter;
use serde::Serialize;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::analysis::run_demo_analysis;
use crate::catalog::{CatalogEntry, CatalogIndex, CatalogStatus};
use crate::config::AppConfig;
use crate::error::{ServiceError, ServiceResult, format_error_chain_ref};
use crate::fhir::{FetchedBinary, FhirClient, build_observation};
use crate::handles::{Blob, BlobStore, Handle, HandleTracker, ResourceClass};
use crate::report::{ChromiumSnapshotter, HeadlessRenderer, ReportLayout, ReportRenderer};

/// Catalog state returned when a session is created or reloaded
#[derive(Debug, Clone, Serialize)]
pub struct CatalogSummary {
    pub session_id: Uuid,
    pub status: CatalogStatus,
    pub message: &'static str,
    pub models: Vec<String>,
}

/// Everything the front end needs to redraw a session
#[derive(Debug, Clone, Serialize)]
pub struct SessionView {
    pub session_id: Uuid,
    pub created_at: DateTime<Utc>,
    pub phase: SessionPhase,
    pub result: Option<ShownResult>,
    pub assembled_report_url: Option<String>,
    pub report_enabled: bool,
    pub observation_enabled: bool,
}

/// Link to a freshly assembled report
#[derive(Debug, Clone, Serialize)]
pub struct ReportLink {
    pub url: String,
    pub page_count: usize,
}

/// Outcome of fetching one artifact, before it is applied to a session
#[derive(Debug)]
pub(crate) enum Fetched {
    Loaded(FetchedBinary),
    Missing,
    Failed(String),
    NotAvailable,
}

/// Main service coordinator
pub struct LarynxService {
    pub config: Arc<AppConfig>,
    fhir: FhirClient,
    blobs: BlobStore,
    sessions: Arc<DashMap<Uuid, Arc<Mutex<Session>>>>,
    renderer: Arc<dyn ReportRenderer>,
}

impl LarynxService {
    /// Create a new service instance
    pub fn new(config: Arc<AppConfig>) -> ServiceResult<Self> {
        let renderer = Arc::new(HeadlessRenderer::new(ChromiumSnapshotter::new(
            config.browser.clone(),
        )));
        Self::with_renderer(config, renderer)
    }

    /// Create a service with a specific report renderer
    pub fn with_renderer(
        config: Arc<AppConfig>,
        renderer: Arc<dyn ReportRenderer>,
    ) -> ServiceResult<Self> {
        info!("Initializing larynx service");

        let fhir = FhirClient::new(config.fhir.clone())?;
        info!(url = %fhir.base_url(), "FHIR client initialized");

        Ok(Self {
            config,
            fhir,
            blobs: BlobStore::new(),
            sessions: Arc::new(DashMap::new()),
            renderer,
        })
    }

    // ==================== Sessions ====================

    /// Search the catalog and open a session over the resulting index.
    ///
    /// An empty or malformed catalog still yields a session; only a failed
    /// search is an error.
    pub async fn create_session(&self) -> ServiceResult<CatalogSummary> {
        let index = self.load_index().await?;
        let session_id = Uuid::new_v4();
        let summary = catalog_summary(session_id, &index);

        let session = Session::new(session_id, index, HandleTracker::new(self.blobs.clone()));
        self.sessions
            .insert(session_id, Arc::new(Mutex::new(session)));
        counter!("larynx_sessions_created_total").increment(1);

        info!(
            session_id = %session_id,
            status = ?summary.status,
            models = summary.models.len(),
            "Session created"
        );
        Ok(summary)
    }

    /// Release every handle held by the session and forget it.
    pub async fn close_session(&self, session_id: &Uuid) -> ServiceResult<()> {
        let (_, session) =
            self.sessions
                .remove(session_id)
                .ok_or_else(|| ServiceError::SessionNotFound {
                    session_id: session_id.to_string(),
                })?;

        let mut session = session.lock().await;
        session.cancel.cancel();
        session.handles.release_all();
        info!(session_id = %session_id, "Session closed");
        Ok(())
    }

    pub async fn session_view(&self, session_id: &Uuid) -> ServiceResult<SessionView> {
        let session = self.session(session_id)?;
        let session = session.lock().await;

        Ok(SessionView {
            session_id: session.id,
            created_at: session.created_at,
            phase: session.phase,
            result: session.result.clone(),
            assembled_report_url: session
                .handles
                .get(ResourceClass::AssembledReport)
                .map(Handle::url),
            report_enabled: session.report_enabled(),
            observation_enabled: session.observation_enabled(),
        })
    }

    pub fn session_count(&self) -> usize {
        self.sessions.len()
    }

    fn session(&self, session_id: &Uuid) -> ServiceResult<Arc<Mutex<Session>>> {
        self.sessions
            .get(session_id)
            .map(|entry| entry.value().clone())
            .ok_or_else(|| ServiceError::SessionNotFound {
                session_id: session_id.to_string(),
            })
    }

    // ==================== Catalog ====================

    async fn load_index(&self) -> ServiceResult<CatalogIndex> {
        let records = self.fhir.search_catalog().await?;
        let index = CatalogIndex::build(&records, &self.config.catalog);
        debug!(
            records = records.len(),
            entries = index.len(),
            "Catalog index built"
        );
        Ok(index)
    }

    /// Rebuild the session's index from a fresh catalog search.
    pub async fn reload_catalog(&self, session_id: &Uuid) -> ServiceResult<CatalogSummary> {
        let session = self.session(session_id)?;
        let index = self.load_index().await?;

        let mut session = session.lock().await;
        let summary = catalog_summary(session.id, &index);
        session.index = index;
        info!(
            session_id = %session_id,
            status = ?summary.status,
            models = summary.models.len(),
            "Catalog reloaded"
        );
        Ok(summary)
    }

    pub async fn list_models(&self, session_id: &Uuid) -> ServiceResult<Vec<String>> {
        let session = self.session(session_id)?;
        let session = session.lock().await;
        Ok(session.index.models())
    }

    pub async fn list_image_labels(
        &self,
        session_id: &Uuid,
        model: &str,
    ) -> ServiceResult<Vec<String>> {
        let session = self.session(session_id)?;
        let session = session.lock().await;
        Ok(session.index.image_labels(model))
    }

    // ==================== Selection ====================

    /// Fetch the artifacts of a selection, run the analysis and show the result.
    ///
    /// A newer submit on the same session cancels this one; its results are
    /// never applied.
    pub async fn submit(
        &self,
        session_id: &Uuid,
        metadata: ExamMetadata,
        model: &str,
        image_label: &str,
    ) -> ServiceResult<ShownResult> {
        let session = self.session(session_id)?;

        let (entry, generation, cancel) = {
            let mut session = session.lock().await;
            let entry = session
                .index
                .get(model, image_label)
                .cloned()
                .ok_or_else(|| ServiceError::SelectionNotFound {
                    model: model.to_string(),
                    image_label: image_label.to_string(),
                })?;
            let (generation, cancel) = session.begin_selection();
            (entry, generation, cancel)
        };

        info!(
            session_id = %session_id,
            model = %entry.model,
            image_label = %entry.image_label,
            generation,
            "Selection submitted"
        );

        let fetches = async {
            tokio::join!(
                self.fetch_artifact(ResourceClass::RawImage, entry.raw_binary_id.as_deref()),
                self.fetch_artifact(
                    ResourceClass::SummaryImage,
                    entry.summary_image_id.as_deref()
                ),
                self.fetch_artifact(ResourceClass::ReportDocument, entry.report_doc_id.as_deref()),
            )
        };

        let (raw, summary, report) = tokio::select! {
            _ = cancel.cancelled() => {
                debug!(session_id = %session_id, generation, "Selection cancelled during fetch");
                return Err(superseded(&entry));
            }
            fetched = fetches => fetched,
        };

        let mut session = session.lock().await;
        apply_selection(
            &mut session,
            generation,
            entry,
            metadata,
            [
                (ResourceClass::RawImage, raw),
                (ResourceClass::SummaryImage, summary),
                (ResourceClass::ReportDocument, report),
            ],
        )
    }

    async fn fetch_artifact(&self, class: ResourceClass, binary_id: Option<&str>) -> Fetched {
        let Some(binary_id) = binary_id else {
            return Fetched::NotAvailable;
        };

        match self.fhir.fetch_binary(binary_id).await {
            Ok(Some(binary)) => {
                debug!(class = %class, binary_id, size = binary.data.len(), "Fetched artifact");
                Fetched::Loaded(binary)
            }
            Ok(None) => {
                warn!(class = %class, binary_id, "Artifact has no data");
                Fetched::Missing
            }
            Err(e) => {
                let message = format_error_chain_ref(&e);
                warn!(class = %class, binary_id, error = %message, "Artifact fetch failed");
                counter!("larynx_fetch_failures_total", "class" => class.to_string())
                    .increment(1);
                Fetched::Failed(message)
            }
        }
    }

    /// Return to the selection screen. Held handles are kept.
    pub async fn back(&self, session_id: &Uuid) -> ServiceResult<SessionPhase> {
        let session = self.session(session_id)?;
        let mut session = session.lock().await;
        session.phase = SessionPhase::Selecting;
        debug!(session_id = %session_id, "Returned to selection");
        Ok(session.phase)
    }

    // ==================== Report ====================

    /// Assemble the report for the shown result.
    ///
    /// The previous assembled report stays available until a new one has been
    /// produced; a failed run leaves it untouched.
    pub async fn generate_report(&self, session_id: &Uuid) -> ServiceResult<ReportLink> {
        let session = self.session(session_id)?;
        let mut session = session.lock().await;

        if session.phase != SessionPhase::ResultShown {
            return Err(ServiceError::ReportPrecondition {
                message: "Submit a selection before generating a report.".to_string(),
            });
        }
        let Some(source_pdf) = session.handles.data(ResourceClass::ReportDocument) else {
            return Err(ServiceError::ReportPrecondition {
                message: "No report document is available for the selected image.".to_string(),
            });
        };
        let Some(view) = session.summary_view() else {
            return Err(ServiceError::ReportPrecondition {
                message: "No result is shown.".to_string(),
            });
        };

        let layout = ReportLayout::from(&self.config.report);
        let report = match self.renderer.render(view, source_pdf, layout).await {
            Ok(report) => report,
            Err(e) => {
                counter!("larynx_report_failures_total").increment(1);
                warn!(
                    session_id = %session_id,
                    error = %format_error_chain_ref(&e),
                    "Report generation failed"
                );
                return Err(e.into());
            }
        };

        let handle = session.handles.install(
            ResourceClass::AssembledReport,
            ResourceClass::AssembledReport
                .default_content_type()
                .to_string(),
            Bytes::from(report.bytes),
        );
        counter!("larynx_reports_assembled_total").increment(1);
        info!(
            session_id = %session_id,
            page_count = report.page_count,
            handle_id = %handle.id,
            "Report ready"
        );

        Ok(ReportLink {
            url: handle.url(),
            page_count: report.page_count,
        })
    }

    // ==================== Observation ====================

    /// Write the demo analysis back to the FHIR server as an `Observation`.
    pub async fn save_observation(&self, session_id: &Uuid) -> ServiceResult<String> {
        let session = self.session(session_id)?;
        let session = session.lock().await;

        let result = match (&session.phase, &session.result) {
            (SessionPhase::ResultShown, Some(result)) => result,
            _ => {
                return Err(ServiceError::ObservationPrecondition {
                    message: "No result to save. Submit a selection first.".to_string(),
                });
            }
        };
        let Some(raw_binary_id) = result.entry.raw_binary_id.as_deref() else {
            return Err(ServiceError::ObservationPrecondition {
                message: "The selected image has no raw binary to reference.".to_string(),
            });
        };

        let observation = build_observation(&result.metadata, &result.analysis, raw_binary_id);
        let observation_id = self.fhir.create("Observation", &observation).await?;

        info!(
            session_id = %session_id,
            observation_id = %observation_id,
            "Observation created"
        );
        Ok(observation_id)
    }

    // ==================== Blobs ====================

    pub fn get_blob(&self, handle_id: &Uuid) -> ServiceResult<Blob> {
        self.blobs
            .get(handle_id)
            .ok_or_else(|| ServiceError::BlobNotFound {
                handle_id: handle_id.to_string(),
            })
    }
}

fn catalog_summary(session_id: Uuid, index: &CatalogIndex) -> CatalogSummary {
    let status = index.status();
    CatalogSummary {
        session_id,
        status,
        message: status.message(),
        models: index.models(),
    }
}

fn superseded(entry: &CatalogEntry) -> ServiceError {
    ServiceError::SelectionSuperseded {
        model: entry.model.clone(),
        image_label: entry.image_label.clone(),
    }
}

/// Apply fetched artifacts to the session if `generation` is still current.
pub(crate) fn apply_selection(
    session: &mut Session,
    generation: u64,
    entry: CatalogEntry,
    metadata: ExamMetadata,
    fetched: [(ResourceClass, Fetched); 3],
) -> ServiceResult<ShownResult> {
    if session.generation != generation {
        debug!(
            session_id = %session.id,
            stale = generation,
            current = session.generation,
            "Discarding stale fetch results"
        );
        return Err(superseded(&entry));
    }

    let [raw_image, summary_image, report_document] = fetched.map(|(class, outcome)| {
        match outcome {
            Fetched::Loaded(binary) => {
                let content_type = binary
                    .content_type
                    .unwrap_or_else(|| class.default_content_type().to_string());
                let handle = session
                    .handles
                    .install(class, content_type, Bytes::from(binary.data));
                ArtifactStatus::loaded(&handle)
            }
            other => {
                // Never show an artifact left over from the previous selection
                session.handles.release(class);
                match other {
                    Fetched::Missing => ArtifactStatus::Missing,
                    Fetched::Failed(message) => ArtifactStatus::Failed { message },
                    _ => ArtifactStatus::NotAvailable,
                }
            }
        }
    });
    // The assembled report belongs to the previous selection.
    session.handles.release(ResourceClass::AssembledReport);

    let result = ShownResult {
        analysis: run_demo_analysis(&entry.model),
        entry,
        metadata,
        artifacts: ArtifactReport {
            raw_image,
            summary_image,
            report_document,
        },
    };
    session.result = Some(result.clone());
    session.phase = SessionPhase::ResultShown;
    Ok(result)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::report::rasterize::tests::blank_pdf;
    use crate::report::tests::FixedSnapshotRenderer;
    use axum::extract::{Path, State};
    use axum::http::StatusCode;
    use axum::routing::{get, post};
    use axum::{Json, Router};
    use base64::Engine;
    use serde_json::{Value, json};
    use std::collections::HashMap;
    use std::sync::Mutex as StdMutex;
    use std::time::Duration;

    const MODEL_SYSTEM: &str = "http://example.org/fhir/larynx/model";
    const LABEL_SYSTEM: &str = "http://example.org/fhir/larynx/image-label";
    const RAW_SYSTEM: &str = "http://example.org/fhir/larynx/raw-binary";

    /// In-process FHIR server serving fixed records and binaries.
    #[derive(Default)]
    struct FhirStub {
        records: Vec<Value>,
        binaries: HashMap<String, Value>,
        /// Response delay per binary id.
        delays: HashMap<String, Duration>,
        created: StdMutex<Vec<(String, Value)>>,
    }

    async fn search_handler(State(stub): State<Arc<FhirStub>>) -> Json<Value> {
        let entries: Vec<Value> = stub
            .records
            .iter()
            .map(|record| json!({ "resource": record }))
            .collect();
        Json(json!({ "resourceType": "Bundle", "entry": entries }))
    }

    async fn binary_handler(
        State(stub): State<Arc<FhirStub>>,
        Path(id): Path<String>,
    ) -> Result<Json<Value>, StatusCode> {
        if let Some(delay) = stub.delays.get(&id) {
            tokio::time::sleep(*delay).await;
        }
        stub.binaries
            .get(&id)
            .cloned()
            .map(Json)
            .ok_or(StatusCode::NOT_FOUND)
    }

    async fn create_handler(
        State(stub): State<Arc<FhirStub>>,
        headers: axum::http::HeaderMap,
        body: String,
    ) -> (StatusCode, Json<Value>) {
        let content_type = headers
            .get(axum::http::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .unwrap_or_default()
            .to_string();
        let resource: Value = serde_json::from_str(&body).unwrap();
        stub.created.lock().unwrap().push((content_type, resource));
        (StatusCode::CREATED, Json(json!({ "resourceType": "Observation", "id": "obs-1" })))
    }

    async fn spawn_stub(stub: Arc<FhirStub>) -> String {
        let app = Router::new()
            .route("/fhir/DocumentReference", get(search_handler))
            .route("/fhir/Binary/{id}", get(binary_handler))
            .route("/fhir/Observation", post(create_handler))
            .with_state(stub);
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        format!("http://{}/fhir", addr)
    }

    fn record(model: &str, label: &str, raw: Option<&str>, attachments: &[(&str, &str)]) -> Value {
        let mut identifier = vec![
            json!({ "system": MODEL_SYSTEM, "value": model }),
            json!({ "system": LABEL_SYSTEM, "value": label }),
        ];
        if let Some(raw) = raw {
            identifier.push(json!({ "system": RAW_SYSTEM, "value": raw }));
        }
        let content: Vec<Value> = attachments
            .iter()
            .map(|(content_type, url)| {
                json!({ "attachment": { "contentType": content_type, "url": url } })
            })
            .collect();
        json!({
            "resourceType": "DocumentReference",
            "identifier": identifier,
            "content": content,
        })
    }

    fn binary(content_type: Option<&str>, data: &[u8]) -> Value {
        let mut value = json!({
            "resourceType": "Binary",
            "data": base64::engine::general_purpose::STANDARD.encode(data),
        });
        if let Some(content_type) = content_type {
            value["contentType"] = json!(content_type);
        }
        value
    }

    fn demo_stub() -> FhirStub {
        let mut binaries = HashMap::new();
        binaries.insert("raw-1".to_string(), binary(None, b"BM-raw"));
        binaries.insert("sum-1".to_string(), binary(Some("image/png"), b"png-bytes"));
        binaries.insert("doc-1".to_string(), binary(Some("application/pdf"), &blank_pdf(2)));
        binaries.insert("empty".to_string(), json!({ "resourceType": "Binary" }));

        FhirStub {
            records: vec![
                record(
                    "ModelA",
                    "Img1",
                    Some("raw-1"),
                    &[("image/png", "Binary/sum-1"), ("application/pdf", "Binary/doc-1")],
                ),
                record("ModelA", "Img2", None, &[("image/png", "Binary/empty")]),
                record("ModelB", "Img9", Some("gone"), &[]),
            ],
            binaries,
            ..Default::default()
        }
    }

    async fn service_with(stub: FhirStub) -> (LarynxService, Arc<FhirStub>) {
        let stub = Arc::new(stub);
        let base_url = spawn_stub(stub.clone()).await;

        let mut config = AppConfig::default();
        config.fhir.base_url = base_url;
        config.fhir.timeout_secs = 5;

        let service =
            LarynxService::with_renderer(Arc::new(config), Arc::new(FixedSnapshotRenderer))
                .unwrap();
        (service, stub)
    }

    fn metadata() -> ExamMetadata {
        ExamMetadata {
            patient_id: "p-1".to_string(),
            patient_name: "Test Patient".to_string(),
            patient_sex: "F".to_string(),
            patient_age: "54".to_string(),
            exam_date: "2024-05-02".to_string(),
        }
    }

    #[tokio::test]
    async fn test_create_session_lists_sorted_models() {
        let (service, _) = service_with(demo_stub()).await;
        let created = service.create_session().await.unwrap();

        assert_eq!(created.status, CatalogStatus::Ready);
        assert_eq!(created.models, vec!["ModelA", "ModelB"]);
        assert_eq!(
            service
                .list_image_labels(&created.session_id, "ModelA")
                .await
                .unwrap(),
            vec!["Img1", "Img2"]
        );
        assert!(
            service
                .list_image_labels(&created.session_id, "Nope")
                .await
                .unwrap()
                .is_empty()
        );
    }

    #[tokio::test]
    async fn test_empty_catalog_still_creates_session() {
        let (service, _) = service_with(FhirStub::default()).await;
        let created = service.create_session().await.unwrap();

        assert_eq!(created.status, CatalogStatus::Empty);
        assert!(created.models.is_empty());
        assert_eq!(service.session_count(), 1);
    }

    #[tokio::test]
    async fn test_submit_installs_handles_and_shows_result() {
        let (service, _) = service_with(demo_stub()).await;
        let session_id = service.create_session().await.unwrap().session_id;

        let result = service
            .submit(&session_id, metadata(), "ModelA", "Img1")
            .await
            .unwrap();

        let ArtifactStatus::Loaded { url, content_type, .. } = &result.artifacts.raw_image else {
            panic!("raw image not loaded: {:?}", result.artifacts.raw_image);
        };
        assert_eq!(content_type, "image/bmp");
        let handle_id: Uuid = url.trim_start_matches("/api/blobs/").parse().unwrap();
        assert_eq!(
            service.get_blob(&handle_id).unwrap().data,
            Bytes::from_static(b"BM-raw")
        );
        assert!(result.artifacts.summary_image.is_loaded());
        assert!(result.artifacts.report_document.is_loaded());
        assert_eq!(result.analysis.parameters.len(), 3);

        let view = service.session_view(&session_id).await.unwrap();
        assert_eq!(view.phase, SessionPhase::ResultShown);
        assert!(view.report_enabled);
        assert!(view.observation_enabled);
    }

    #[tokio::test]
    async fn test_artifact_failures_are_independent() {
        let (service, _) = service_with(demo_stub()).await;
        let session_id = service.create_session().await.unwrap().session_id;

        let result = service
            .submit(&session_id, metadata(), "ModelA", "Img2")
            .await
            .unwrap();
        assert_eq!(result.artifacts.raw_image, ArtifactStatus::NotAvailable);
        assert_eq!(result.artifacts.summary_image, ArtifactStatus::Missing);
        assert_eq!(result.artifacts.report_document, ArtifactStatus::NotAvailable);

        let result = service
            .submit(&session_id, metadata(), "ModelB", "Img9")
            .await
            .unwrap();
        assert!(matches!(
            result.artifacts.raw_image,
            ArtifactStatus::Failed { .. }
        ));
        assert_eq!(result.artifacts.summary_image, ArtifactStatus::NotAvailable);
    }

    #[tokio::test]
    async fn test_unknown_selection_is_rejected() {
        let (service, _) = service_with(demo_stub()).await;
        let session_id = service.create_session().await.unwrap().session_id;

        let err = service
            .submit(&session_id, metadata(), "ModelA", "Missing")
            .await
            .unwrap_err();
        assert!(matches!(err, ServiceError::SelectionNotFound { .. }));
    }

    #[tokio::test]
    async fn test_new_selection_revokes_previous_handles() {
        let (service, _) = service_with(demo_stub()).await;
        let session_id = service.create_session().await.unwrap().session_id;

        service
            .submit(&session_id, metadata(), "ModelA", "Img1")
            .await
            .unwrap();
        assert_eq!(service.blobs.len(), 3);

        service
            .submit(&session_id, metadata(), "ModelA", "Img2")
            .await
            .unwrap();
        assert!(service.blobs.is_empty());
    }

    #[tokio::test]
    async fn test_report_refused_without_document() {
        let (service, _) = service_with(demo_stub()).await;
        let session_id = service.create_session().await.unwrap().session_id;

        let err = service.generate_report(&session_id).await.unwrap_err();
        assert!(matches!(err, ServiceError::ReportPrecondition { .. }));

        service
            .submit(&session_id, metadata(), "ModelA", "Img2")
            .await
            .unwrap();
        let err = service.generate_report(&session_id).await.unwrap_err();
        assert!(matches!(err, ServiceError::ReportPrecondition { .. }));

        let view = service.session_view(&session_id).await.unwrap();
        assert!(view.assembled_report_url.is_none());
        assert!(service.blobs.is_empty());
    }

    #[tokio::test]
    async fn test_report_has_snapshot_plus_document_pages() {
        let (service, _) = service_with(demo_stub()).await;
        let session_id = service.create_session().await.unwrap().session_id;
        service
            .submit(&session_id, metadata(), "ModelA", "Img1")
            .await
            .unwrap();

        let first = service.generate_report(&session_id).await.unwrap();
        assert_eq!(first.page_count, 3);

        let second = service.generate_report(&session_id).await.unwrap();
        assert_ne!(first.url, second.url);

        let first_id: Uuid = first.url.trim_start_matches("/api/blobs/").parse().unwrap();
        let second_id: Uuid = second.url.trim_start_matches("/api/blobs/").parse().unwrap();
        assert!(service.get_blob(&first_id).is_err());
        let blob = service.get_blob(&second_id).unwrap();
        assert_eq!(blob.content_type, "application/pdf");
        assert!(blob.data.starts_with(b"%PDF"));
    }

    #[tokio::test]
    async fn test_failed_report_keeps_previous_output() {
        let (service, _) = service_with(demo_stub()).await;
        let session_id = service.create_session().await.unwrap().session_id;
        service
            .submit(&session_id, metadata(), "ModelA", "Img1")
            .await
            .unwrap();
        let first = service.generate_report(&session_id).await.unwrap();

        // Corrupt the held report document
        {
            let session = service.session(&session_id).unwrap();
            let mut session = session.lock().await;
            session.handles.install(
                ResourceClass::ReportDocument,
                "application/pdf".to_string(),
                Bytes::from_static(b"not a pdf"),
            );
        }

        let err = service.generate_report(&session_id).await.unwrap_err();
        assert!(matches!(
            err,
            ServiceError::Report(crate::error::ReportError::DocumentOpen { .. })
        ));

        let view = service.session_view(&session_id).await.unwrap();
        assert_eq!(view.assembled_report_url, Some(first.url));
    }

    #[tokio::test]
    async fn test_back_keeps_handles_but_disables_report() {
        let (service, _) = service_with(demo_stub()).await;
        let session_id = service.create_session().await.unwrap().session_id;
        service
            .submit(&session_id, metadata(), "ModelA", "Img1")
            .await
            .unwrap();

        assert_eq!(
            service.back(&session_id).await.unwrap(),
            SessionPhase::Selecting
        );
        assert_eq!(service.blobs.len(), 3);
        let err = service.generate_report(&session_id).await.unwrap_err();
        assert!(matches!(err, ServiceError::ReportPrecondition { .. }));
    }

    #[tokio::test]
    async fn test_stale_results_are_discarded() {
        let (service, _) = service_with(demo_stub()).await;
        let session_id = service.create_session().await.unwrap().session_id;
        let session = service.session(&session_id).unwrap();
        let mut session = session.lock().await;

        let (stale, stale_token) = session.begin_selection();
        let (_current, _) = session.begin_selection();
        assert!(stale_token.is_cancelled());

        let entry = session.index.get("ModelA", "Img1").cloned().unwrap();
        let err = apply_selection(
            &mut session,
            stale,
            entry,
            metadata(),
            [
                (
                    ResourceClass::RawImage,
                    Fetched::Loaded(FetchedBinary {
                        content_type: None,
                        data: b"BM".to_vec(),
                    }),
                ),
                (ResourceClass::SummaryImage, Fetched::NotAvailable),
                (ResourceClass::ReportDocument, Fetched::NotAvailable),
            ],
        )
        .unwrap_err();

        assert!(matches!(err, ServiceError::SelectionSuperseded { .. }));
        assert!(session.result.is_none());
        assert_eq!(session.phase, SessionPhase::Selecting);
        assert!(service.blobs.is_empty());
    }

    #[tokio::test]
    async fn test_newer_submit_cancels_slow_fetch() {
        let mut binaries = HashMap::new();
        binaries.insert("raw-slow".to_string(), binary(None, b"BM-slow"));
        binaries.insert("raw-fast".to_string(), binary(None, b"BM-fast"));
        let stub = FhirStub {
            records: vec![
                record("ModelC", "Slow", Some("raw-slow"), &[]),
                record("ModelC", "Fast", Some("raw-fast"), &[]),
            ],
            binaries,
            delays: HashMap::from([("raw-slow".to_string(), Duration::from_secs(3))]),
            ..Default::default()
        };
        let (service, _) = service_with(stub).await;
        let session_id = service.create_session().await.unwrap().session_id;

        let started = std::time::Instant::now();
        let (slow, fast) = tokio::join!(
            service.submit(&session_id, metadata(), "ModelC", "Slow"),
            async {
                // Wait until the slow selection is in flight.
                loop {
                    let generation = service.session(&session_id).unwrap().lock().await.generation;
                    if generation == 1 {
                        break;
                    }
                    tokio::time::sleep(Duration::from_millis(10)).await;
                }
                service
                    .submit(&session_id, metadata(), "ModelC", "Fast")
                    .await
            }
        );

        assert!(matches!(
            slow.unwrap_err(),
            ServiceError::SelectionSuperseded { image_label, .. } if image_label == "Slow"
        ));
        let fast = fast.unwrap();
        assert_eq!(fast.entry.image_label, "Fast");
        assert!(started.elapsed() < Duration::from_secs(3));

        let view = service.session_view(&session_id).await.unwrap();
        assert_eq!(view.phase, SessionPhase::ResultShown);
        assert_eq!(
            view.result.as_ref().map(|r| r.entry.image_label.as_str()),
            Some("Fast")
        );
        assert_eq!(service.blobs.len(), 1);
    }

    #[tokio::test]
    async fn test_save_observation_posts_resource() {
        let (service, stub) = service_with(demo_stub()).await;
        let session_id = service.create_session().await.unwrap().session_id;

        let err = service.save_observation(&session_id).await.unwrap_err();
        assert!(matches!(err, ServiceError::ObservationPrecondition { .. }));

        service
            .submit(&session_id, metadata(), "ModelA", "Img1")
            .await
            .unwrap();
        let id = service.save_observation(&session_id).await.unwrap();
        assert_eq!(id, "obs-1");

        let created = stub.created.lock().unwrap();
        assert_eq!(created.len(), 1);
        let (content_type, resource) = &created[0];
        assert_eq!(content_type, "application/fhir+json");
        assert_eq!(resource["resourceType"], "Observation");
        assert_eq!(resource["subject"]["reference"], "Patient/p-1");
        assert_eq!(resource["derivedFrom"][0]["reference"], "Binary/raw-1");
    }

    #[tokio::test]
    async fn test_observation_refused_without_raw_binary() {
        let (service, _) = service_with(demo_stub()).await;
        let session_id = service.create_session().await.unwrap().session_id;
        service
            .submit(&session_id, metadata(), "ModelA", "Img2")
            .await
            .unwrap();

        let err = service.save_observation(&session_id).await.unwrap_err();
        assert!(matches!(err, ServiceError::ObservationPrecondition { .. }));
    }

    #[tokio::test]
    async fn test_close_session_releases_everything() {
        let (service, _) = service_with(demo_stub()).await;
        let session_id = service.create_session().await.unwrap().session_id;
        service
            .submit(&session_id, metadata(), "ModelA", "Img1")
            .await
            .unwrap();
        assert!(!service.blobs.is_empty());

        service.close_session(&session_id).await.unwrap();
        assert!(service.blobs.is_empty());
        assert_eq!(service.session_count(), 0);
        assert!(matches!(
            service.close_session(&session_id).await,
            Err(ServiceError::SessionNotFound { .. })
        ));
    }
}
