//! Axum route handlers for batches, records, and the live event stream.

use std::convert::Infallible;

use axum::{
    extract::{Path, State},
    http::{header, StatusCode},
    response::{
        sse::{Event, KeepAlive, Sse},
        IntoResponse,
    },
    Json,
};
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tokio_stream::wrappers::{errors::BroadcastStreamRecvError, BroadcastStream, UnboundedReceiverStream};
use tokio_stream::{Stream, StreamExt};
use tracing::{info, warn};

use crate::errors::AppError;
use crate::generation::prompts::{Level, PromptContext};
use crate::records::orchestrator::{self, BatchItem};
use crate::records::store::{ProgressUpdate, Record};
use crate::settings;
use crate::state::AppState;

/// Shown in place of a regenerated remark when the backend call failed.
pub const REGENERATION_FAILED_MESSAGE: &str = "내용을 다시 생성하는 중 오류가 발생했습니다.";
/// Shown in place of a rationale when the backend call failed.
pub const REASONING_FAILED_MESSAGE: &str = "근거를 생성하는 중 오류가 발생했습니다.";
pub const EMPTY_BATCH_MESSAGE: &str = "처리할 학생 자료가 없습니다.";

// ────────────────────────────────────────────────────────────────────────────
// Request / Response types
// ────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
pub struct CreateBatchRequest {
    pub items: Vec<BatchItem>,
    #[serde(default)]
    pub context: Option<PromptContext>,
}

#[derive(Debug, Serialize)]
pub struct BatchAccepted {
    pub total: usize,
}

#[derive(Debug, Serialize)]
pub struct RecordView {
    pub id: String,
    #[serde(flatten)]
    pub record: Record,
}

impl RecordView {
    fn new(id: &str, record: &Record) -> Self {
        Self {
            id: id.to_string(),
            record: record.clone(),
        }
    }
}

#[derive(Debug, Serialize)]
pub struct RecordListResponse {
    pub records: Vec<RecordView>,
    pub progress: Option<ProgressUpdate>,
}

#[derive(Debug, Deserialize)]
pub struct EditRequest {
    pub content: String,
}

#[derive(Debug, Serialize)]
pub struct RemoveResponse {
    pub removed: String,
    /// True when that was the last record.
    pub empty: bool,
}

#[derive(Debug, Deserialize)]
pub struct RegenerateRequest {
    pub level: Level,
}

#[derive(Debug, Serialize)]
pub struct RegenerateResponse {
    pub id: String,
    pub level: Level,
    pub content: String,
}

#[derive(Debug, Serialize)]
pub struct ReasoningResponse {
    pub id: String,
    pub original_content: String,
    pub reasoning: String,
}

// ────────────────────────────────────────────────────────────────────────────
// Batches
// ────────────────────────────────────────────────────────────────────────────

/// Accepts a batch and runs it on a spawned task. Callers follow progress
/// through `/api/v1/events` or by polling `/api/v1/records`.
pub async fn start_batch(
    state: &AppState,
    items: Vec<BatchItem>,
    context: Option<PromptContext>,
) -> Result<(StatusCode, Json<BatchAccepted>), AppError> {
    if items.is_empty() {
        return Err(AppError::Validation(EMPTY_BATCH_MESSAGE.to_string()));
    }
    let context = match context {
        Some(context) => context,
        None => settings::load(state.form_state.as_ref()).await?,
    };

    let total = items.len();
    let store = state.store.clone();
    let generator = state.generator.clone();
    tokio::spawn(async move {
        orchestrator::process_batch(&store, generator.as_ref(), &context, items).await;
    });

    info!("Accepted batch of {total} records");
    Ok((StatusCode::ACCEPTED, Json(BatchAccepted { total })))
}

/// POST /api/v1/batches
pub async fn handle_create_batch(
    State(state): State<AppState>,
    Json(req): Json<CreateBatchRequest>,
) -> Result<(StatusCode, Json<BatchAccepted>), AppError> {
    start_batch(&state, req.items, req.context).await
}

// ────────────────────────────────────────────────────────────────────────────
// Records
// ────────────────────────────────────────────────────────────────────────────

/// GET /api/v1/records
pub async fn handle_list_records(State(state): State<AppState>) -> Json<RecordListResponse> {
    let store = state.store.lock().await;
    Json(RecordListResponse {
        records: store
            .entries()
            .map(|(id, record)| RecordView::new(id, record))
            .collect(),
        progress: store.progress(),
    })
}

/// GET /api/v1/records/export
/// One `id<TAB>content` line per generated record, ready to paste into a sheet.
pub async fn handle_export_records(State(state): State<AppState>) -> impl IntoResponse {
    let tsv = state.store.lock().await.export_tsv();
    (
        [(header::CONTENT_TYPE, "text/tab-separated-values; charset=utf-8")],
        tsv,
    )
}

/// DELETE /api/v1/records
pub async fn handle_reset_records(State(state): State<AppState>) -> StatusCode {
    let mut store = state.store.lock().await;
    let dropped = store.len();
    store.clear();
    info!("Result store reset; {dropped} records dropped");
    StatusCode::NO_CONTENT
}

/// GET /api/v1/records/:id
pub async fn handle_get_record(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<RecordView>, AppError> {
    let store = state.store.lock().await;
    let record = store
        .get(&id)
        .ok_or_else(|| AppError::NotFound(format!("Record {id} not found")))?;
    Ok(Json(RecordView::new(&id, record)))
}

/// PUT /api/v1/records/:id
pub async fn handle_edit_record(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(req): Json<EditRequest>,
) -> Result<Json<RecordView>, AppError> {
    let record = state.store.lock().await.edit(&id, &req.content)?;
    Ok(Json(RecordView::new(&id, &record)))
}

/// DELETE /api/v1/records/:id
pub async fn handle_delete_record(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<RemoveResponse>, AppError> {
    let mut store = state.store.lock().await;
    store
        .remove(&id)
        .ok_or_else(|| AppError::NotFound(format!("Record {id} not found")))?;
    Ok(Json(RemoveResponse {
        removed: id,
        empty: store.is_empty(),
    }))
}

/// POST /api/v1/records/:id/regenerate
pub async fn handle_regenerate_record(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(req): Json<RegenerateRequest>,
) -> Result<Json<RegenerateResponse>, AppError> {
    let context = settings::load(state.form_state.as_ref()).await?;
    let content = orchestrator::regenerate(
        &state.store,
        state.generator.as_ref(),
        &context,
        &id,
        req.level,
    )
    .await
    .map_err(|e| surface_backend_failure(e, REGENERATION_FAILED_MESSAGE))?;

    Ok(Json(RegenerateResponse {
        id,
        level: req.level,
        content,
    }))
}

/// GET /api/v1/records/:id/reasoning
pub async fn handle_get_reasoning(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<ReasoningResponse>, AppError> {
    let original_content = state
        .store
        .lock()
        .await
        .get(&id)
        .map(|r| r.original_content.clone())
        .ok_or_else(|| AppError::NotFound(format!("Record {id} not found")))?;

    let reasoning = orchestrator::get_reasoning(&state.store, state.generator.as_ref(), &id)
        .await
        .map_err(|e| surface_backend_failure(e, REASONING_FAILED_MESSAGE))?;

    Ok(Json(ReasoningResponse {
        id,
        original_content,
        reasoning,
    }))
}

/// Backend failures reach the user as one fixed sentence; the detail is
/// already logged by the orchestrator.
fn surface_backend_failure(err: AppError, message: &str) -> AppError {
    match err {
        AppError::Generation(_) => AppError::Upstream(message.to_string()),
        other => other,
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Events
// ────────────────────────────────────────────────────────────────────────────

/// GET /api/v1/events
/// Server-sent events, one JSON `StoreEvent` per message.
pub async fn handle_events(
    State(state): State<AppState>,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    let stream = BroadcastStream::new(state.events.subscribe()).filter_map(|message| match message {
        Ok(event) => Event::default().json_data(&event).ok().map(Ok),
        Err(BroadcastStreamRecvError::Lagged(skipped)) => {
            warn!("Event subscriber lagged; {skipped} events skipped");
            None
        }
    });
    Sse::new(stream).keep_alive(KeepAlive::default())
}

/// GET /api/v1/records/:id/events
/// Events for one record only. The stream ends when the record is removed
/// or the store is cleared; a client that disconnects is unsubscribed on the
/// next event or subscription for that record.
pub async fn handle_record_events(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Sse<impl Stream<Item = Result<Event, Infallible>>>, AppError> {
    let (sender, receiver) = mpsc::unbounded_channel();
    {
        let mut store = state.store.lock().await;
        if store.get(&id).is_none() {
            return Err(AppError::NotFound(format!("Record {id} not found")));
        }
        store.watch(&id, sender);
    }

    let stream = UnboundedReceiverStream::new(receiver)
        .filter_map(|event| Event::default().json_data(&event).ok().map(Ok));
    Ok(Sse::new(stream).keep_alive(KeepAlive::default()))
}
