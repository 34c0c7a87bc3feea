//! Saved form state: the prompt context last entered in the form.
//!
//! One JSON value under the key `formData`. Redis when `REDIS_URL` is set,
//! process memory otherwise.

pub mod handlers;

use async_trait::async_trait;
use redis::AsyncCommands;
use thiserror::Error;
use tokio::sync::RwLock;
use tracing::warn;

use crate::generation::prompts::PromptContext;

pub const FORM_STATE_KEY: &str = "formData";

#[derive(Debug, Error)]
pub enum SettingsError {
    #[error("Redis error: {0}")]
    Redis(#[from] redis::RedisError),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Raw key-value access to the saved form state.
#[async_trait]
pub trait FormStateStore: Send + Sync {
    async fn load_raw(&self) -> Result<Option<String>, SettingsError>;
    async fn save_raw(&self, value: String) -> Result<(), SettingsError>;
}

#[derive(Default)]
pub struct MemoryFormStateStore {
    value: RwLock<Option<String>>,
}

#[async_trait]
impl FormStateStore for MemoryFormStateStore {
    async fn load_raw(&self) -> Result<Option<String>, SettingsError> {
        Ok(self.value.read().await.clone())
    }

    async fn save_raw(&self, value: String) -> Result<(), SettingsError> {
        *self.value.write().await = Some(value);
        Ok(())
    }
}

pub struct RedisFormStateStore {
    client: redis::Client,
}

impl RedisFormStateStore {
    pub fn open(url: &str) -> Result<Self, SettingsError> {
        Ok(Self {
            client: redis::Client::open(url)?,
        })
    }
}

#[async_trait]
impl FormStateStore for RedisFormStateStore {
    async fn load_raw(&self) -> Result<Option<String>, SettingsError> {
        let mut conn = self.client.get_multiplexed_async_connection().await?;
        let value: Option<String> = conn.get(FORM_STATE_KEY).await?;
        Ok(value)
    }

    async fn save_raw(&self, value: String) -> Result<(), SettingsError> {
        let mut conn = self.client.get_multiplexed_async_connection().await?;
        conn.set::<_, _, ()>(FORM_STATE_KEY, value).await?;
        Ok(())
    }
}

/// Restores the saved context. Nothing saved, or a value that no longer
/// parses, yields the defaults.
pub async fn load(store: &dyn FormStateStore) -> Result<PromptContext, SettingsError> {
    let Some(raw) = store.load_raw().await? else {
        return Ok(PromptContext::default());
    };
    Ok(serde_json::from_str(&raw).unwrap_or_else(|e| {
        warn!("Discarding unreadable saved form state: {e}");
        PromptContext::default()
    }))
}

pub async fn save(store: &dyn FormStateStore, context: &PromptContext) -> Result<(), SettingsError> {
    store.save_raw(serde_json::to_string(context)?).await
}
