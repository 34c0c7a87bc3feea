//! Batch Orchestrator — sequential per-record generation over a batch.
//!
//! Flow per item: upsert record → build prompt (level 중) → generate →
//! store content or error → report progress. One backend request is in
//! flight at a time, so progress and generation order match input order.
//! A failed item never aborts the batch and is never retried.

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::errors::AppError;
use crate::generation::prompts::{build_prompt, build_reasoning_prompt, Level, PromptContext};
use crate::generation::Generator;
use crate::records::store::{ReasoningLookup, SharedStore};

/// Returned instead of a rationale for a row that has no remark yet.
pub const NOTHING_TO_EXPLAIN_MESSAGE: &str = "생성된 특기사항이 없어 근거를 만들 수 없습니다.";

/// One `(id, content)` pair from an upload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchItem {
    pub id: String,
    pub content: String,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct BatchSummary {
    pub total: usize,
    pub succeeded: usize,
    pub failed: usize,
    /// Items whose results arrived after a reset or a newer batch.
    pub discarded: usize,
}

/// Runs a whole batch against a freshly cleared store.
///
/// If the store is reset (or another batch begins) while this one is in
/// flight, the late result is dropped and the remaining items are skipped.
pub async fn process_batch(
    store: &SharedStore,
    generator: &dyn Generator,
    context: &PromptContext,
    items: Vec<BatchItem>,
) -> BatchSummary {
    let total = items.len();
    let epoch = store.lock().await.begin_batch(total);
    info!("Batch started: {total} records");

    let mut summary = BatchSummary {
        total,
        ..Default::default()
    };

    for (index, item) in items.into_iter().enumerate() {
        let ticket = match store.lock().await.upsert(epoch, &item.id, item.content.clone()) {
            Ok(ticket) => ticket,
            Err(_) => {
                summary.discarded += total - index;
                warn!(
                    "Batch superseded after {index}/{total} records; skipping the remaining {}",
                    summary.discarded
                );
                return summary;
            }
        };

        let prompt = build_prompt(&item.content, Level::Middle, context);
        let outcome = generator.generate(&prompt).await;

        let mut guard = store.lock().await;
        let applied = match outcome {
            Ok(text) => guard
                .complete_generation(&ticket, text)
                .map(|()| summary.succeeded += 1),
            Err(e) => {
                warn!("Generation failed for record {}: {e:?}", item.id);
                guard
                    .fail_generation(&ticket, e.to_string())
                    .map(|()| summary.failed += 1)
            }
        };
        if let Err(e) = applied {
            warn!("Discarding result: {e}");
            summary.discarded += 1;
        }
        guard.record_progress(epoch, index + 1, total);
    }

    info!(
        "Batch finished: {} succeeded, {} failed, {} discarded of {}",
        summary.succeeded, summary.failed, summary.discarded, summary.total
    );
    summary
}

/// Regenerates one record at `level` from its stored original content.
///
/// On failure the record's content and level stay as they were.
pub async fn regenerate(
    store: &SharedStore,
    generator: &dyn Generator,
    context: &PromptContext,
    id: &str,
    level: Level,
) -> Result<String, AppError> {
    let (ticket, original_content) = store.lock().await.begin_regeneration(id)?;

    let prompt = build_prompt(&original_content, level, context);
    match generator.generate(&prompt).await {
        Ok(text) => {
            let content = text.trim().to_string();
            store
                .lock()
                .await
                .apply_regeneration(&ticket, level, content.clone())?;
            info!("Regenerated record {id} at level {level}");
            Ok(content)
        }
        Err(e) => {
            warn!("Regeneration failed for record {id}: {e:?}");
            store
                .lock()
                .await
                .report_regeneration_failure(&ticket, e.to_string());
            Err(AppError::Generation(e))
        }
    }
}

/// Returns the cached rationale for a record, generating it on first request.
///
/// Failures are not cached, so a later call tries again.
pub async fn get_reasoning(
    store: &SharedStore,
    generator: &dyn Generator,
    id: &str,
) -> Result<String, AppError> {
    let lookup = store.lock().await.reasoning_lookup(id)?;
    let (ticket, original_content, content) = match lookup {
        ReasoningLookup::Cached(reasoning) => return Ok(reasoning),
        ReasoningLookup::NotGenerated => {
            return Err(AppError::Validation(NOTHING_TO_EXPLAIN_MESSAGE.to_string()))
        }
        ReasoningLookup::Missing {
            ticket,
            original_content,
            content,
        } => (ticket, original_content, content),
    };

    let prompt = build_reasoning_prompt(&original_content, &content);
    let reasoning = generator.generate(&prompt).await.map_err(|e| {
        warn!("Reasoning failed for record {id}: {e:?}");
        AppError::Generation(e)
    })?;

    if let Err(e) = store
        .lock()
        .await
        .cache_reasoning(&ticket, reasoning.clone())
    {
        warn!("Not caching reasoning: {e}");
    }
    Ok(reasoning)
}
