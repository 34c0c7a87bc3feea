//! Generative Client — `generate(prompt) -> text` behind a trait.
//!
//! Two backends: `ProxyGenerator` talks to the `{prompt}` → `{result}` proxy
//! contract over HTTP, and `LlmClient` calls the chat-completion API in-process.
//! `AppState` holds an `Arc<dyn Generator>` picked at startup from config.

pub mod prompts;

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, warn};

use crate::llm_client::{LlmClient, LlmError};

/// Shown when the backend answered 2xx but produced no text.
pub const EMPTY_RESULT_MESSAGE: &str = "결과를 생성하지 못했습니다.";
/// Shown when a non-2xx proxy response carried no `error` message.
pub const REQUEST_FAILED_MESSAGE: &str = "API 요청에 실패했습니다.";
/// Shown for transport failures; the underlying cause is only logged.
pub const NETWORK_ERROR_MESSAGE: &str = "네트워크 오류로 생성에 실패했습니다.";
/// Shown when the backend reply could not be read; the cause is only logged.
pub const UNEXPECTED_ERROR_MESSAGE: &str = "예상치 못한 오류로 생성에 실패했습니다.";
pub const MISSING_KEY_MESSAGE: &str = "API 키가 서버에 설정되지 않았습니다.";

#[derive(Debug, Error)]
pub enum GenerationError {
    /// Rejected before any backend call.
    #[error("요청 본문에 prompt가 필요합니다.")]
    EmptyPrompt,

    /// Non-2xx or malformed response; `message` is the backend's own text.
    #[error("{message}")]
    Backend { status: u16, message: String },

    #[error("{}", NETWORK_ERROR_MESSAGE)]
    Network(String),

    #[error("{}", UNEXPECTED_ERROR_MESSAGE)]
    Unexpected(String),
}

#[async_trait]
pub trait Generator: Send + Sync {
    async fn generate(&self, prompt: &str) -> Result<String, GenerationError>;
}

fn ensure_prompt(prompt: &str) -> Result<(), GenerationError> {
    if prompt.trim().is_empty() {
        return Err(GenerationError::EmptyPrompt);
    }
    Ok(())
}

/// Trims backend text, substituting the fixed message when there is none.
fn finish_result(text: Option<&str>) -> String {
    match text.map(str::trim) {
        Some(t) if !t.is_empty() => t.to_string(),
        _ => EMPTY_RESULT_MESSAGE.to_string(),
    }
}

// ────────────────────────────────────────────────────────────────────────────
// ProxyGenerator
// ────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Serialize)]
struct ProxyRequest<'a> {
    prompt: &'a str,
}

#[derive(Debug, Deserialize)]
struct ProxySuccess {
    result: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ProxyFailure {
    error: Option<String>,
}

/// Calls a proxy that accepts `POST {prompt}` and answers `{result}` or `{error}`.
#[derive(Clone)]
pub struct ProxyGenerator {
    client: Client,
    url: String,
}

impl ProxyGenerator {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            client: Client::new(),
            url: url.into(),
        }
    }
}

#[async_trait]
impl Generator for ProxyGenerator {
    async fn generate(&self, prompt: &str) -> Result<String, GenerationError> {
        ensure_prompt(prompt)?;

        let response = self
            .client
            .post(&self.url)
            .json(&ProxyRequest { prompt })
            .send()
            .await
            .map_err(|e| GenerationError::Network(e.to_string()))?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| GenerationError::Network(e.to_string()))?;

        if !status.is_success() {
            return Err(GenerationError::Backend {
                status: status.as_u16(),
                message: proxy_error_message(&body),
            });
        }

        debug!("Proxy call succeeded: status={status}, bytes={}", body.len());
        let success: ProxySuccess =
            serde_json::from_str(&body).map_err(|e| GenerationError::Backend {
                status: status.as_u16(),
                message: format!("{REQUEST_FAILED_MESSAGE} ({e})"),
            })?;
        Ok(finish_result(success.result.as_deref()))
    }
}

fn proxy_error_message(body: &str) -> String {
    serde_json::from_str::<ProxyFailure>(body)
        .ok()
        .and_then(|f| f.error)
        .filter(|m| !m.is_empty())
        .unwrap_or_else(|| REQUEST_FAILED_MESSAGE.to_string())
}

// ────────────────────────────────────────────────────────────────────────────
// In-process backend
// ────────────────────────────────────────────────────────────────────────────

/// Maps chat-completion failures onto the same messages the proxy would return.
impl From<LlmError> for GenerationError {
    fn from(err: LlmError) -> Self {
        match err {
            LlmError::MissingApiKey => GenerationError::Backend {
                status: 500,
                message: MISSING_KEY_MESSAGE.to_string(),
            },
            LlmError::Api { status, message } => GenerationError::Backend {
                status,
                message: format!("OpenAI API 요청 실패: {message}"),
            },
            LlmError::Http(e) if e.is_decode() => {
                warn!("Unreadable chat-completion response: {e}");
                GenerationError::Unexpected(e.to_string())
            }
            LlmError::Http(e) => GenerationError::Network(e.to_string()),
        }
    }
}

#[async_trait]
impl Generator for LlmClient {
    async fn generate(&self, prompt: &str) -> Result<String, GenerationError> {
        ensure_prompt(prompt)?;
        let response = self.call(prompt).await?;
        Ok(finish_result(response.text()))
    }
}

#[cfg(test)]
pub mod testing {
    //! Scripted in-memory generator shared by the orchestrator and handler tests.

    use std::collections::VecDeque;
    use std::sync::Mutex;

    use super::*;

    /// Replays queued outcomes in order; once the queue is empty it echoes a
    /// fixed success so long batches need not script every item.
    #[derive(Default)]
    pub struct ScriptedGenerator {
        outcomes: Mutex<VecDeque<Result<String, GenerationError>>>,
        prompts: Mutex<Vec<String>>,
    }

    impl ScriptedGenerator {
        pub fn new(outcomes: Vec<Result<String, GenerationError>>) -> Self {
            Self {
                outcomes: Mutex::new(outcomes.into()),
                prompts: Mutex::new(Vec::new()),
            }
        }

        pub fn calls(&self) -> usize {
            self.prompts.lock().unwrap().len()
        }

        pub fn prompts(&self) -> Vec<String> {
            self.prompts.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl Generator for ScriptedGenerator {
        async fn generate(&self, prompt: &str) -> Result<String, GenerationError> {
            ensure_prompt(prompt)?;
            self.prompts.lock().unwrap().push(prompt.to_string());
            self.outcomes
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or_else(|| Ok("수업에 성실히 참여함.".to_string()))
        }
    }

    pub fn backend_error(message: &str) -> GenerationError {
        GenerationError::Backend {
            status: 500,
            message: message.to_string(),
        }
    }
}
