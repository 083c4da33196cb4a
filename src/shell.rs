//! Interactive shell for the synthesizer.
//!
//! The shell is a compact Axum application:
//!
//! - `GET /` – Settings sidebar, business-question field, and the idle hint.
//! - `POST /generate` – Form submission; runs the pipeline and renders the executive summary.
//! - `POST /api/summaries` – JSON variant of `/generate`; unset parameters use the defaults.
//! - `GET /api/status` – Whether a run is in flight.
//! - `POST /api/cancel` – Abort the in-flight run. Cached chunks are kept.
//! - `POST /api/cache/clear` – Forget every cached chunk list.
//! - `GET /metrics` – Pipeline counters.
//!
//! Only one run executes at a time; a request arriving during a run gets a busy notice (409).
//! Runs execute on their own task so that cancelling, or a client disconnecting, aborts the
//! outstanding model requests without leaving the shell stuck in the running state.

mod html;

pub use html::{Controls, IDLE_HINT, PAGE_TITLE, Panel, escape_html, render_markdown, render_page};

use crate::metrics::MetricsSnapshot;
use crate::processing::{ParameterError, PipelineError, RunOutcome, RunParameters, SynthesisApi};
use axum::{
    Form, Json, Router,
    extract::State,
    http::StatusCode,
    response::{Html, IntoResponse, Response},
    routing::{get, post},
};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::path::PathBuf;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Instant;
use tokio::task::AbortHandle;

/// Static settings of the shell.
#[derive(Debug, Clone, PartialEq)]
pub struct ShellSettings {
    /// Directory the PDFs are read from.
    pub data_dir: PathBuf,
    /// Initial temperature control value.
    pub temperature: f32,
    /// Initial chunk-size control value.
    pub chunk_size: usize,
    /// Initial chunk-overlap control value.
    pub chunk_overlap: usize,
}

impl ShellSettings {
    fn controls(&self, question: String) -> Controls {
        Controls {
            question,
            temperature: self.temperature,
            chunk_size: self.chunk_size,
            chunk_overlap: self.chunk_overlap,
            data_dir: self.data_dir.display().to_string(),
        }
    }
}

/// Router state shared by every handler.
struct ShellState<S> {
    service: Arc<S>,
    settings: ShellSettings,
    runs: Arc<RunSlot>,
}

impl<S> Clone for ShellState<S> {
    fn clone(&self) -> Self {
        Self {
            service: Arc::clone(&self.service),
            settings: self.settings.clone(),
            runs: Arc::clone(&self.runs),
        }
    }
}

/// Build the HTTP router exposing the page and the JSON API.
pub fn create_router<S>(service: Arc<S>, settings: ShellSettings) -> Router
where
    S: SynthesisApi + 'static,
{
    let state = ShellState {
        service,
        settings,
        runs: Arc::new(RunSlot::default()),
    };
    Router::new()
        .route("/", get(index::<S>))
        .route("/generate", post(generate::<S>))
        .route("/api/summaries", post(create_summary::<S>))
        .route("/api/status", get(status::<S>))
        .route("/api/cancel", post(cancel::<S>))
        .route("/api/cache/clear", post(clear_cache::<S>))
        .route("/metrics", get(get_metrics::<S>))
        .with_state(state)
}

#[derive(Default)]
struct RunSlot {
    active: Mutex<Option<ActiveRun>>,
}

struct ActiveRun {
    id: u64,
    abort: AbortHandle,
    started_at: Instant,
}

impl RunSlot {
    fn lock(&self) -> std::sync::MutexGuard<'_, Option<ActiveRun>> {
        self.active.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Clears the slot when the request finishes, aborting the run if it is still going.
struct RunGuard {
    slot: Arc<RunSlot>,
    id: u64,
}

impl Drop for RunGuard {
    fn drop(&mut self) {
        let mut active = self.slot.lock();
        if active.as_ref().is_some_and(|run| run.id == self.id)
            && let Some(run) = active.take()
        {
            run.abort.abort();
        }
    }
}

/// Run the pipeline on its own task, rejecting the request when another run is in flight.
async fn execute_run<S>(
    state: &ShellState<S>,
    params: RunParameters,
) -> Result<RunOutcome, PipelineError>
where
    S: SynthesisApi + 'static,
{
    static NEXT_RUN: std::sync::atomic::AtomicU64 = std::sync::atomic::AtomicU64::new(1);

    let (handle, guard) = {
        let mut active = state.runs.lock();
        if active.is_some() {
            return Err(PipelineError::Busy);
        }
        let id = NEXT_RUN.fetch_add(1, std::sync::atomic::Ordering::Relaxed);
        let service = Arc::clone(&state.service);
        let directory = state.settings.data_dir.clone();
        let handle = tokio::spawn(async move { service.run(&directory, &params).await });
        *active = Some(ActiveRun {
            id,
            abort: handle.abort_handle(),
            started_at: Instant::now(),
        });
        let guard = RunGuard {
            slot: Arc::clone(&state.runs),
            id,
        };
        (handle, guard)
    };

    let result = match handle.await {
        Ok(result) => result,
        Err(error) if error.is_cancelled() => Err(PipelineError::Cancelled),
        Err(error) => {
            tracing::error!(error = %error, "Run task panicked");
            Err(PipelineError::Internal(panic_message(error.into_panic())))
        }
    };
    drop(guard);
    result
}

fn panic_message(payload: Box<dyn std::any::Any + Send>) -> String {
    match payload.downcast::<String>() {
        Ok(message) => *message,
        Err(payload) => payload
            .downcast_ref::<&str>()
            .map_or_else(|| "unknown panic".to_string(), |message| message.to_string()),
    }
}

async fn index<S>(State(state): State<ShellState<S>>) -> Html<String>
where
    S: SynthesisApi,
{
    Html(render_page(&state.settings.controls(String::new()), &Panel::Idle))
}

/// Form fields posted by the page.
#[derive(Debug, Deserialize)]
struct GenerateForm {
    #[serde(default)]
    question: String,
    temperature: f32,
    chunk_size: usize,
    chunk_overlap: usize,
}

async fn generate<S>(
    State(state): State<ShellState<S>>,
    Form(form): Form<GenerateForm>,
) -> Response
where
    S: SynthesisApi + 'static,
{
    let controls = Controls {
        question: form.question.clone(),
        temperature: form.temperature,
        chunk_size: form.chunk_size,
        chunk_overlap: form.chunk_overlap,
        data_dir: state.settings.data_dir.display().to_string(),
    };
    if form.question.trim().is_empty() {
        return Html(render_page(&controls, &Panel::Idle)).into_response();
    }

    let outcome = match RunParameters::new(
        form.question,
        form.temperature,
        form.chunk_size,
        form.chunk_overlap,
    ) {
        Ok(params) => execute_run(&state, params).await,
        Err(error) => Err(PipelineError::from(error)),
    };

    match outcome {
        Ok(outcome) => Html(render_page(&controls, &Panel::Outcome(outcome))).into_response(),
        Err(error) => {
            let panel = Panel::Notice {
                kind: error.kind(),
                message: error.to_string(),
            };
            (status_for(&error), Html(render_page(&controls, &panel))).into_response()
        }
    }
}

/// Request body for `POST /api/summaries`.
#[derive(Debug, Deserialize)]
struct SummaryRequest {
    question: String,
    #[serde(default)]
    temperature: Option<f32>,
    #[serde(default)]
    chunk_size: Option<usize>,
    #[serde(default)]
    chunk_overlap: Option<usize>,
}

async fn create_summary<S>(
    State(state): State<ShellState<S>>,
    Json(request): Json<SummaryRequest>,
) -> Result<Json<RunOutcome>, AppError>
where
    S: SynthesisApi + 'static,
{
    let params = RunParameters::new(
        request.question,
        request.temperature.unwrap_or(state.settings.temperature),
        request.chunk_size.unwrap_or(state.settings.chunk_size),
        request.chunk_overlap.unwrap_or(state.settings.chunk_overlap),
    )?;
    if params.question().is_empty() {
        return Err(PipelineError::MissingQuestion.into());
    }
    let outcome = execute_run(&state, params).await?;
    tracing::info!(
        run_id = %outcome.run_id,
        chunks = outcome.chunk_count,
        documents = outcome.document_count,
        "Summary request completed"
    );
    Ok(Json(outcome))
}

/// Response body for `GET /api/status`.
#[derive(Debug, Serialize)]
struct StatusResponse {
    state: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    elapsed_ms: Option<u64>,
}

async fn status<S>(State(state): State<ShellState<S>>) -> Json<StatusResponse>
where
    S: SynthesisApi,
{
    let active = state.runs.lock();
    Json(match active.as_ref() {
        Some(run) => StatusResponse {
            state: "running",
            elapsed_ms: Some(run.started_at.elapsed().as_millis() as u64),
        },
        None => StatusResponse {
            state: "idle",
            elapsed_ms: None,
        },
    })
}

async fn cancel<S>(State(state): State<ShellState<S>>) -> Json<serde_json::Value>
where
    S: SynthesisApi,
{
    let active = state.runs.lock();
    let cancelled = match active.as_ref() {
        Some(run) => {
            run.abort.abort();
            tracing::info!("Run cancellation requested");
            true
        }
        None => false,
    };
    Json(json!({ "cancelled": cancelled }))
}

async fn clear_cache<S>(State(state): State<ShellState<S>>) -> Json<serde_json::Value>
where
    S: SynthesisApi,
{
    let cleared = state.service.clear_cache();
    Json(json!({ "cleared": cleared }))
}

async fn get_metrics<S>(State(state): State<ShellState<S>>) -> Json<MetricsSnapshot>
where
    S: SynthesisApi,
{
    Json(state.service.metrics_snapshot())
}

/// HTTP status of each pipeline failure.
pub fn status_for(error: &PipelineError) -> StatusCode {
    match error {
        PipelineError::Configuration(_) | PipelineError::Chunking(_) => {
            StatusCode::UNPROCESSABLE_ENTITY
        }
        PipelineError::MissingQuestion => StatusCode::BAD_REQUEST,
        PipelineError::Load(_) => StatusCode::INTERNAL_SERVER_ERROR,
        PipelineError::Backend { .. } => StatusCode::BAD_GATEWAY,
        PipelineError::Timeout { .. } => StatusCode::GATEWAY_TIMEOUT,
        PipelineError::Cancelled => StatusCode::SERVICE_UNAVAILABLE,
        PipelineError::Busy => StatusCode::CONFLICT,
        PipelineError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

struct AppError(PipelineError);

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let body = json!({
            "error": self.0.kind(),
            "message": self.0.to_string(),
        });
        (status_for(&self.0), Json(body)).into_response()
    }
}

impl From<PipelineError> for AppError {
    fn from(inner: PipelineError) -> Self {
        Self(inner)
    }
}

impl From<ParameterError> for AppError {
    fn from(inner: ParameterError) -> Self {
        Self(PipelineError::Configuration(inner))
    }
}
