use crate::{
    engine::Engine,
    extract::{decode_upload, AutoExtractor, ExtractError, TextExtractor, UniqueNames},
    matching::{
        validate_threshold, Document, DocumentId, ErrorKind, ExcludedDocument, JobCatalog,
        MatchError, MatchOrchestrator, MatchOutcome,
    },
};
use anyhow::Context;
use axum::{
    extract::{rejection::JsonRejection, DefaultBodyLimit, State},
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::{fmt::Debug, sync::Arc};
use tokio::signal;

#[derive(Clone)]
pub struct SharedState {
    orchestrator: Arc<MatchOrchestrator>,
    catalog: Arc<JobCatalog>,
    extractor: Arc<dyn TextExtractor>,
    default_threshold: f32,
    model: String,
}

impl SharedState {
    pub fn new(engine: &Engine) -> Self {
        Self {
            orchestrator: engine.orchestrator().clone(),
            catalog: engine.catalog().clone(),
            extractor: Arc::new(AutoExtractor),
            default_threshold: engine.config().matching.default_threshold,
            model: engine.provider().name().to_string(),
        }
    }

    /// Threshold from the request, or the configured default when absent.
    fn threshold(&self, requested: Option<f32>) -> Result<f32, MatchError> {
        match requested {
            Some(threshold) => validate_threshold(threshold),
            None => Ok(self.default_threshold),
        }
    }
}

pub fn router(state: SharedState, body_limit_bytes: usize) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/match-jobs", post(match_jobs))
        .route("/api/match", post(match_jobs))
        .route("/match-candidates", post(match_candidates))
        .route("/api/find_candidates", post(match_candidates))
        .layer(DefaultBodyLimit::max(body_limit_bytes))
        .layer(
            tower_http::trace::TraceLayer::new_for_http()
                .make_span_with(
                    tower_http::trace::DefaultMakeSpan::new().level(tracing::Level::INFO),
                )
                .on_response(
                    tower_http::trace::DefaultOnResponse::new().level(tracing::Level::INFO),
                ),
        )
        .with_state(state)
}

pub async fn serve(engine: Engine) -> anyhow::Result<()> {
    let server = engine.config().server.clone();
    if engine.catalog().snapshot().is_empty() {
        log::warn!("job catalog is empty, job matching will return EMPTY_CORPUS");
    }
    let app = router(SharedState::new(&engine), server.body_limit_mb * 1024 * 1024);

    let listener = tokio::net::TcpListener::bind(&server.listen)
        .await
        .with_context(|| format!("failed to bind {}", server.listen))?;
    log::info!("listening on {}", server.listen);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    // keep embeddings computed while serving for the next start
    if let Err(err) = engine.save_vectors() {
        log::error!("{err:#}");
    }
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(err) = signal::ctrl_c().await {
            log::error!("failed to install Ctrl+C handler: {err}");
            std::future::pending::<()>().await;
        }
    };

    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(err) => {
                log::error!("failed to install signal handler: {err}");
                std::future::pending::<()>().await;
            }
        }
    };

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
    log::warn!("shutting down");
}

#[derive(Debug)]
pub struct HttpError {
    status: StatusCode,
    error: MatchError,
}

fn status_for(kind: ErrorKind) -> StatusCode {
    match kind {
        ErrorKind::InvalidRequest
        | ErrorKind::InvalidThreshold
        | ErrorKind::InvalidFallbackSize
        | ErrorKind::EmptyQueryDocument => StatusCode::BAD_REQUEST,
        ErrorKind::DocumentUnreadable | ErrorKind::DegenerateEmbedding => {
            StatusCode::UNPROCESSABLE_ENTITY
        }
        ErrorKind::EmbeddingTimeout => StatusCode::GATEWAY_TIMEOUT,
        ErrorKind::ProviderUnavailable => StatusCode::SERVICE_UNAVAILABLE,
        ErrorKind::EmptyCorpus => StatusCode::NOT_FOUND,
        ErrorKind::DimensionMismatch => StatusCode::INTERNAL_SERVER_ERROR,
        // client closed request
        ErrorKind::Cancelled => {
            StatusCode::from_u16(499).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR)
        }
    }
}

impl IntoResponse for HttpError {
    fn into_response(self) -> axum::response::Response {
        let error = self.error;
        if self.status.is_server_error() {
            log::error!("{error:?}");
        } else {
            log::debug!("{error}");
        }

        let body = json!({
            "error": error.to_string(),
            "kind": error.kind(),
            "document": error.document(),
            "skipped": error.excluded(),
        });
        (self.status, Json(body)).into_response()
    }
}

impl<E> From<E> for HttpError
where
    E: Into<MatchError>,
{
    fn from(err: E) -> Self {
        let error = err.into();
        Self {
            status: status_for(error.kind()),
            error,
        }
    }
}

/// JSON body that failed to parse, keeping axum's status (400, 413, 415, 422).
fn rejected(rejection: JsonRejection) -> HttpError {
    HttpError {
        status: rejection.status(),
        error: MatchError::InvalidRequest(rejection.body_text()),
    }
}

fn unreadable(document: &str, err: ExtractError) -> MatchError {
    MatchError::DocumentUnreadable {
        document: DocumentId::from(document),
        reason: err.to_string(),
    }
}

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    model: String,
    jobs: usize,
    jobs_embedded: usize,
    catalog_version: u64,
}

async fn health(State(state): State<SharedState>) -> Json<HealthResponse> {
    let snapshot = state.catalog.snapshot();
    Json(HealthResponse {
        status: "ok",
        model: state.model.clone(),
        jobs: snapshot.len(),
        jobs_embedded: snapshot.len() - snapshot.pending().count(),
        catalog_version: snapshot.version(),
    })
}

#[derive(Deserialize)]
pub struct MatchJobsRequest {
    /// base64 file content, optionally a data URI
    pub resume: String,
    pub threshold: Option<f32>,
    pub fallback_size: Option<usize>,
}

impl Debug for MatchJobsRequest {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MatchJobsRequest")
            .field("resume", &format_args!("<{} bytes>", self.resume.len()))
            .field("threshold", &self.threshold)
            .field("fallback_size", &self.fallback_size)
            .finish()
    }
}

#[derive(Debug, Serialize)]
pub struct JobMatch {
    pub job_id: DocumentId,
    pub title: Option<String>,
    pub description: String,
    pub similarity: f32,
    pub rank: usize,
}

#[derive(Debug, Serialize)]
pub struct MatchJobsResponse {
    pub results: Vec<JobMatch>,
    pub used_fallback: bool,
    pub skipped: Vec<ExcludedDocument>,
    pub query_truncated: bool,
}

impl From<MatchOutcome> for MatchJobsResponse {
    fn from(outcome: MatchOutcome) -> Self {
        let results = outcome
            .iter()
            .map(|(result, doc)| JobMatch {
                job_id: result.document_id.clone(),
                title: doc.metadata.title.clone(),
                description: doc.raw_text.clone(),
                similarity: result.score,
                rank: result.rank,
            })
            .collect();

        Self {
            results,
            used_fallback: outcome.response.used_fallback,
            skipped: outcome.excluded,
            query_truncated: outcome.query_truncated,
        }
    }
}

const RESUME_UPLOAD: &str = "resume";

async fn match_jobs(
    State(state): State<SharedState>,
    payload: Result<Json<MatchJobsRequest>, JsonRejection>,
) -> Result<Json<MatchJobsResponse>, HttpError> {
    let Json(payload) = payload.map_err(rejected)?;
    log::debug!("{payload:?}");
    let threshold = state.threshold(payload.threshold)?;

    let bytes = decode_upload(&payload.resume).map_err(|e| unreadable(RESUME_UPLOAD, e))?;
    let extractor = state.extractor.clone();
    let text = tokio::task::spawn_blocking(move || extractor.extract_text(&bytes))
        .await
        .map_err(|e| MatchError::DocumentUnreadable {
            document: DocumentId::from(RESUME_UPLOAD),
            reason: e.to_string(),
        })?
        .map_err(|e| unreadable(RESUME_UPLOAD, e))?;

    let outcome = state
        .orchestrator
        .match_jobs(
            Document::resume(RESUME_UPLOAD, text),
            threshold,
            payload.fallback_size,
        )
        .await?;

    Ok(Json(outcome.into()))
}

#[derive(Debug, Deserialize)]
pub struct ResumeUpload {
    pub filename: String,
    /// base64 file content, optionally a data URI
    pub content: String,
}

#[derive(Deserialize)]
pub struct MatchCandidatesRequest {
    pub job_description: String,
    pub resumes_data: Vec<ResumeUpload>,
    pub threshold: Option<f32>,
    pub fallback_size: Option<usize>,
}

impl Debug for MatchCandidatesRequest {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let names: Vec<&str> = self.resumes_data.iter().map(|r| r.filename.as_str()).collect();
        f.debug_struct("MatchCandidatesRequest")
            .field("job_description", &format_args!("<{} chars>", self.job_description.len()))
            .field("resumes", &names)
            .field("threshold", &self.threshold)
            .field("fallback_size", &self.fallback_size)
            .finish()
    }
}

#[derive(Debug, Serialize)]
pub struct CandidateMatch {
    pub filename: String,
    pub similarity: f32,
    pub rank: usize,
}

#[derive(Debug, Serialize)]
pub struct MatchCandidatesResponse {
    pub results: Vec<CandidateMatch>,
    pub used_fallback: bool,
    pub skipped: Vec<ExcludedDocument>,
    pub query_truncated: bool,
}

impl MatchCandidatesResponse {
    /// `skipped` lists uploads that never reached matching.
    pub fn new(outcome: MatchOutcome, mut skipped: Vec<ExcludedDocument>) -> Self {
        let results = outcome
            .iter()
            .map(|(result, doc)| CandidateMatch {
                filename: doc
                    .metadata
                    .filename
                    .clone()
                    .unwrap_or_else(|| result.document_id.to_string()),
                similarity: result.score,
                rank: result.rank,
            })
            .collect();
        skipped.extend(outcome.excluded);

        Self {
            results,
            used_fallback: outcome.response.used_fallback,
            skipped,
            query_truncated: outcome.query_truncated,
        }
    }
}

/// Decode and extract every upload, giving repeated filenames distinct ids.
/// Unreadable files are reported instead of failing the batch.
pub fn read_uploads(
    uploads: Vec<ResumeUpload>,
    extractor: &dyn TextExtractor,
) -> (Vec<Document>, Vec<ExcludedDocument>) {
    let mut names = UniqueNames::new();
    let mut documents = Vec::with_capacity(uploads.len());
    let mut skipped = Vec::new();

    for upload in uploads {
        let filename = names.claim(&upload.filename);
        let text = decode_upload(&upload.content).and_then(|bytes| extractor.extract_text(&bytes));
        match text {
            Ok(text) => documents.push(Document::resume(filename, text)),
            Err(err) => {
                log::warn!("skipping {filename}: {err}");
                skipped.extend(unreadable(&filename, err).into_excluded());
            }
        }
    }

    (documents, skipped)
}

async fn match_candidates(
    State(state): State<SharedState>,
    payload: Result<Json<MatchCandidatesRequest>, JsonRejection>,
) -> Result<Json<MatchCandidatesResponse>, HttpError> {
    let Json(payload) = payload.map_err(rejected)?;
    log::debug!("{payload:?}");
    let threshold = state.threshold(payload.threshold)?;

    let job = Document::job("job_description", None, payload.job_description);
    if job.normalized_text.is_empty() {
        return Err(MatchError::EmptyQueryDocument.into());
    }

    let extractor = state.extractor.clone();
    let uploads = payload.resumes_data;
    let (resumes, skipped) =
        tokio::task::spawn_blocking(move || read_uploads(uploads, &*extractor))
            .await
            .map_err(|e| MatchError::DocumentUnreadable {
                document: DocumentId::from("resumes_data"),
                reason: e.to_string(),
            })?;

    let outcome = match state
        .orchestrator
        .match_candidates(job, resumes, threshold, payload.fallback_size)
        .await
    {
        Ok(outcome) => outcome,
        Err(err) => return Err(err.with_skipped(skipped).into()),
    };

    Ok(Json(MatchCandidatesResponse::new(outcome, skipped)))
}
