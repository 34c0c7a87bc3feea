//! Axum route handlers for uploads and the spreadsheet template.

use axum::{
    extract::{multipart::Field, Multipart, Query, State},
    http::{header, StatusCode},
    response::IntoResponse,
    Json,
};
use bytes::Bytes;
use serde::Deserialize;

use crate::errors::AppError;
use crate::generation::prompts::PromptContext;
use crate::ingest::spreadsheet::{self, TEMPLATE_FILE_STEM};
use crate::ingest::{extract, record_id_from_filename};
use crate::records::handlers::{start_batch, BatchAccepted};
use crate::records::orchestrator::BatchItem;
use crate::state::AppState;

/// Multipart field that may carry a JSON `PromptContext` alongside the files.
const CONTEXT_FIELD: &str = "context";

const XLSX_CONTENT_TYPE: &str =
    "application/vnd.openxmlformats-officedocument.spreadsheetml.sheet";

/// An uploaded file part.
struct Upload {
    file_name: String,
    bytes: Bytes,
}

/// Splits a multipart body into file parts and the optional context field.
async fn read_multipart(
    mut multipart: Multipart,
) -> Result<(Vec<Upload>, Option<PromptContext>), AppError> {
    let mut uploads = Vec::new();
    let mut context = None;

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| AppError::Validation(format!("Invalid multipart body: {e}")))?
    {
        if field.name() == Some(CONTEXT_FIELD) {
            let text = field_bytes(field).await?;
            context = Some(serde_json::from_slice(&text).map_err(|e| {
                AppError::Validation(format!("Invalid context field: {e}"))
            })?);
            continue;
        }

        let Some(file_name) = field.file_name().map(str::to_string) else {
            continue;
        };
        uploads.push(Upload {
            file_name,
            bytes: field_bytes(field).await?,
        });
    }

    Ok((uploads, context))
}

async fn field_bytes(field: Field<'_>) -> Result<Bytes, AppError> {
    field
        .bytes()
        .await
        .map_err(|e| AppError::Validation(format!("Could not read upload: {e}")))
}

/// POST /api/v1/batches/spreadsheet
/// One `file` part; the first sheet becomes the batch.
pub async fn handle_spreadsheet_upload(
    State(state): State<AppState>,
    multipart: Multipart,
) -> Result<(StatusCode, Json<BatchAccepted>), AppError> {
    let (uploads, context) = read_multipart(multipart).await?;
    let upload = uploads
        .into_iter()
        .next()
        .ok_or_else(|| AppError::Validation("No spreadsheet file was uploaded".to_string()))?;

    let items = spreadsheet::parse_rows(&upload.file_name, &upload.bytes)?;
    start_batch(&state, items, context).await
}

/// POST /api/v1/batches/files
/// One part per student file; the record id comes from the file name.
/// Every file is extracted before the batch starts, so a broken file
/// rejects the whole upload without any backend call.
pub async fn handle_files_upload(
    State(state): State<AppState>,
    multipart: Multipart,
) -> Result<(StatusCode, Json<BatchAccepted>), AppError> {
    let (uploads, context) = read_multipart(multipart).await?;

    let mut items = Vec::with_capacity(uploads.len());
    for upload in uploads {
        let content = extract(&upload.file_name, upload.bytes).await?;
        items.push(BatchItem {
            id: record_id_from_filename(&upload.file_name),
            content: content.trim().to_string(),
        });
    }

    start_batch(&state, items, context).await
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TemplateFormat {
    #[default]
    Xlsx,
    Csv,
}

#[derive(Debug, Deserialize)]
pub struct TemplateQuery {
    #[serde(default)]
    pub format: TemplateFormat,
}

/// GET /api/v1/batches/template?format=xlsx|csv
pub async fn handle_download_template(
    Query(query): Query<TemplateQuery>,
) -> Result<impl IntoResponse, AppError> {
    let (bytes, content_type, extension) = match query.format {
        TemplateFormat::Xlsx => (spreadsheet::template_xlsx()?, XLSX_CONTENT_TYPE, "xlsx"),
        TemplateFormat::Csv => (spreadsheet::template_csv()?, "text/csv; charset=utf-8", "csv"),
    };
    let disposition = format!(
        "attachment; filename=\"template.{extension}\"; filename*=UTF-8''{}.{extension}",
        percent_encode(TEMPLATE_FILE_STEM)
    );

    Ok((
        [
            (header::CONTENT_TYPE, content_type.to_string()),
            (header::CONTENT_DISPOSITION, disposition),
        ],
        bytes,
    ))
}

/// RFC 5987 encoding for the non-ASCII download name.
fn percent_encode(value: &str) -> String {
    value
        .bytes()
        .map(|b| match b {
            b'A'..=b'Z' | b'a'..=b'z' | b'0'..=b'9' | b'-' | b'.' | b'_' | b'~' => {
                (b as char).to_string()
            }
            _ => format!("%{b:02X}"),
        })
        .collect()
}
