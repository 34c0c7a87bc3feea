use std::sync::Arc;

use tokio::sync::broadcast;
use tracing::debug;

use crate::generation::Generator;
use crate::llm_client::LlmClient;
use crate::records::store::{ResultStore, SharedStore, StoreEvent};
use crate::settings::FormStateStore;

/// Buffered events per SSE subscriber before it starts lagging.
const EVENT_CHANNEL_CAPACITY: usize = 1024;

/// Shared application state injected into all route handlers via Axum extractors.
#[derive(Clone)]
pub struct AppState {
    pub store: SharedStore,
    /// Backend used for batch generation, regeneration, and rationales.
    pub generator: Arc<dyn Generator>,
    /// Chat-completion client behind the `/api/generate` proxy endpoint.
    pub llm: LlmClient,
    pub form_state: Arc<dyn FormStateStore>,
    /// Every store event, fanned out to `/api/v1/events` subscribers.
    pub events: broadcast::Sender<StoreEvent>,
}

impl AppState {
    /// Builds the state around a fresh result store whose events are
    /// forwarded to the broadcast channel.
    pub fn new(
        generator: Arc<dyn Generator>,
        llm: LlmClient,
        form_state: Arc<dyn FormStateStore>,
    ) -> Self {
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);

        let mut store = ResultStore::new();
        let sender = events.clone();
        store.watch_all(Arc::new(move |event: &StoreEvent| {
            if sender.send(event.clone()).is_err() {
                debug!("No subscribers for store event");
            }
        }));

        Self {
            store: store.shared(),
            generator,
            llm,
            form_state,
            events,
        }
    }
}

#[cfg(test)]
impl AppState {
    pub fn for_tests(generator: Arc<dyn Generator>) -> Self {
        Self::new(
            generator,
            LlmClient::new(None),
            Arc::new(crate::settings::MemoryFormStateStore::default()),
        )
    }

    pub fn with_llm(mut self, llm: LlmClient) -> Self {
        self.llm = llm;
        self
    }
}
