//! Generation proxy: `POST {prompt}` → `{result}` | `{error}`.
//!
//! Keeps the API key on the server. Error bodies are the flat `{"error": msg}`
//! shape the browser-side client and `ProxyGenerator` expect, not the nested
//! `AppError` shape used by the rest of the API.

use axum::{
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use bytes::Bytes;
use serde::Deserialize;
use serde_json::json;
use tracing::error;

use crate::generation::MISSING_KEY_MESSAGE;
use crate::llm_client::LlmError;
use crate::state::AppState;

pub const INTERNAL_ERROR_MESSAGE: &str = "서버 내부 오류가 발생했습니다.";
pub const MISSING_PROMPT_MESSAGE: &str = "요청 본문에 prompt가 필요합니다.";

#[derive(Debug, Deserialize)]
struct GenerateRequest {
    prompt: Option<String>,
}

fn error_response(status: StatusCode, message: impl Into<String>) -> Response {
    (status, Json(json!({ "error": message.into() }))).into_response()
}

/// POST /api/generate
pub async fn handle_generate(State(state): State<AppState>, body: Bytes) -> Response {
    if !state.llm.has_api_key() {
        return error_response(StatusCode::INTERNAL_SERVER_ERROR, MISSING_KEY_MESSAGE);
    }

    let request: GenerateRequest = match serde_json::from_slice(&body) {
        Ok(request) => request,
        Err(e) => {
            error!("Proxy request body is not valid JSON: {e}");
            return error_response(StatusCode::INTERNAL_SERVER_ERROR, INTERNAL_ERROR_MESSAGE);
        }
    };
    let Some(prompt) = request.prompt.filter(|p| !p.is_empty()) else {
        return error_response(StatusCode::BAD_REQUEST, MISSING_PROMPT_MESSAGE);
    };

    match state.llm.call(&prompt).await {
        Ok(chat) => Json(json!({ "result": chat.text() })).into_response(),
        Err(LlmError::Api { status, message }) => {
            error!("Chat-completion API error: status={status}, message={message}");
            let status = StatusCode::from_u16(status).unwrap_or(StatusCode::BAD_GATEWAY);
            error_response(status, format!("OpenAI API 요청 실패: {message}"))
        }
        Err(e) => {
            error!("Proxy call failed: {e:?}");
            error_response(StatusCode::INTERNAL_SERVER_ERROR, INTERNAL_ERROR_MESSAGE)
        }
    }
}

/// Any method other than POST on the proxy path.
pub async fn method_not_allowed() -> Response {
    error_response(StatusCode::METHOD_NOT_ALLOWED, "Method Not Allowed")
}
