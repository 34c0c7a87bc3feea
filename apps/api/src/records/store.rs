//! Result Store — the single source of truth for generated records.
//!
//! An owned, insertion-ordered `id -> Record` map. Every asynchronous write
//! carries a `Ticket` (store epoch + record version); a write whose ticket no
//! longer matches is rejected as stale instead of clobbering newer state.
//!
//! Mutations notify observers synchronously: store-wide listeners see every
//! event, per-record watchers (channel senders) only the events of their
//! record. A watcher whose receiver is gone is dropped.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;
use thiserror::Error;
use tokio::sync::{mpsc, Mutex};

use crate::generation::prompts::Level;

/// The store as shared between handlers and spawned batch tasks.
/// The lock is never held across a backend call.
pub type SharedStore = Arc<Mutex<ResultStore>>;

pub type Listener = Arc<dyn Fn(&StoreEvent) + Send + Sync>;

/// Per-record subscriber. Dropped as soon as its receiving end is gone.
pub type RecordWatcher = mpsc::UnboundedSender<StoreEvent>;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum StoreError {
    #[error("Record {0} not found")]
    NotFound(String),

    #[error("Record {0} changed or was removed while the request was in flight")]
    Stale(String),
}

/// One student's unit of work.
#[derive(Debug, Clone, Serialize)]
pub struct Record {
    pub original_content: String,
    pub content: String,
    pub reasoning: Option<String>,
    pub level: Level,
    /// Visible error text when the batch generation for this record failed.
    pub error: Option<String>,
    pub version: u64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Record {
    fn new(original_content: String, version: u64) -> Self {
        let now = Utc::now();
        Self {
            original_content,
            content: String::new(),
            reasoning: None,
            level: Level::default(),
            error: None,
            version,
            created_at: now,
            updated_at: now,
        }
    }

    fn touch(&mut self) {
        self.updated_at = Utc::now();
    }
}

/// `(processed, total)` plus the rounded percentage shown to the user.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ProgressUpdate {
    pub processed: usize,
    pub total: usize,
    pub percentage: u8,
}

impl ProgressUpdate {
    pub fn new(processed: usize, total: usize) -> Self {
        let percentage = if total == 0 {
            0
        } else {
            ((processed as f64 / total as f64) * 100.0).round() as u8
        };
        Self {
            processed,
            total,
            percentage,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum StoreEvent {
    BatchStarted { total: usize },
    RowReady { id: String, content: String },
    RowFailed { id: String, message: String },
    Progress(ProgressUpdate),
    ContentChanged { id: String, content: String, level: Level },
    RegenerationFailed { id: String, message: String },
    Removed { id: String },
    /// The last record was removed; result and progress regions should hide.
    Emptied,
    Cleared,
}

impl StoreEvent {
    pub fn record_id(&self) -> Option<&str> {
        match self {
            StoreEvent::RowReady { id, .. }
            | StoreEvent::RowFailed { id, .. }
            | StoreEvent::ContentChanged { id, .. }
            | StoreEvent::RegenerationFailed { id, .. }
            | StoreEvent::Removed { id } => Some(id),
            _ => None,
        }
    }
}

/// Proof that a write targets the record state it was dispatched against.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Ticket {
    id: String,
    epoch: u64,
    version: u64,
}

/// Result of asking the store for a record's rationale.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReasoningLookup {
    Cached(String),
    /// Still pending, or its generation failed: there is no remark to explain.
    NotGenerated,
    Missing {
        ticket: Ticket,
        original_content: String,
        content: String,
    },
}

#[derive(Default)]
pub struct ResultStore {
    records: HashMap<String, Record>,
    order: Vec<String>,
    /// Advanced by every clear; tickets from an older epoch are stale.
    epoch: u64,
    progress: Option<ProgressUpdate>,
    listeners: Vec<Listener>,
    record_watchers: HashMap<String, Vec<RecordWatcher>>,
}

impl ResultStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn shared(self) -> SharedStore {
        Arc::new(Mutex::new(self))
    }

    // ── observers ──────────────────────────────────────────────────────────

    pub fn watch_all(&mut self, listener: Listener) {
        self.listeners.push(listener);
    }

    /// Subscribes to one record's events. The watcher is dropped when the
    /// record is removed, the store is cleared, or its receiver goes away.
    pub fn watch(&mut self, id: &str, watcher: RecordWatcher) {
        let watchers = self.record_watchers.entry(id.to_string()).or_default();
        watchers.retain(|w| !w.is_closed());
        watchers.push(watcher);
    }

    #[cfg(test)]
    pub fn watcher_count(&self, id: &str) -> usize {
        self.record_watchers.get(id).map_or(0, Vec::len)
    }

    fn emit(&mut self, event: StoreEvent) {
        for listener in &self.listeners {
            listener(&event);
        }
        if let Some(watchers) = event
            .record_id()
            .and_then(|id| self.record_watchers.get_mut(id))
        {
            watchers.retain(|w| w.send(event.clone()).is_ok());
        }
    }

    // ── plain map operations ───────────────────────────────────────────────

    pub fn get(&self, id: &str) -> Option<&Record> {
        self.records.get(id)
    }

    /// All records in insertion (processing) order.
    pub fn entries(&self) -> impl Iterator<Item = (&str, &Record)> {
        self.order
            .iter()
            .filter_map(|id| self.records.get(id).map(|r| (id.as_str(), r)))
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn progress(&self) -> Option<ProgressUpdate> {
        self.progress
    }

    /// Creates (or overwrites) a record for the batch running in `epoch`.
    /// An overwritten record keeps its position.
    pub fn upsert(
        &mut self,
        epoch: u64,
        id: &str,
        original_content: String,
    ) -> Result<Ticket, StoreError> {
        if epoch != self.epoch {
            return Err(StoreError::Stale(id.to_string()));
        }
        let version = match self.records.get(id) {
            Some(existing) => existing.version + 1,
            None => {
                self.order.push(id.to_string());
                0
            }
        };
        self.records
            .insert(id.to_string(), Record::new(original_content, version));
        Ok(Ticket {
            id: id.to_string(),
            epoch,
            version,
        })
    }

    pub fn remove(&mut self, id: &str) -> Option<Record> {
        let record = self.records.remove(id)?;
        self.order.retain(|existing| existing != id);
        self.emit(StoreEvent::Removed { id: id.to_string() });
        self.record_watchers.remove(id);
        if self.records.is_empty() {
            self.progress = None;
            self.emit(StoreEvent::Emptied);
        }
        Some(record)
    }

    /// Drops every record and the progress state. In-flight tickets become stale.
    pub fn clear(&mut self) {
        self.records.clear();
        self.order.clear();
        self.record_watchers.clear();
        self.progress = None;
        self.epoch += 1;
        self.emit(StoreEvent::Cleared);
    }

    /// Clears the store for a new batch and returns the batch's epoch.
    pub fn begin_batch(&mut self, total: usize) -> u64 {
        self.clear();
        self.progress = Some(ProgressUpdate::new(0, total));
        self.emit(StoreEvent::BatchStarted { total });
        self.epoch
    }

    pub fn record_progress(
        &mut self,
        epoch: u64,
        processed: usize,
        total: usize,
    ) -> Option<ProgressUpdate> {
        if epoch != self.epoch {
            return None;
        }
        let update = ProgressUpdate::new(processed, total);
        self.progress = Some(update);
        self.emit(StoreEvent::Progress(update));
        Some(update)
    }

    // ── ticketed writes ────────────────────────────────────────────────────

    fn checked_mut(&mut self, ticket: &Ticket) -> Result<&mut Record, StoreError> {
        if ticket.epoch != self.epoch {
            return Err(StoreError::Stale(ticket.id.clone()));
        }
        match self.records.get_mut(&ticket.id) {
            Some(record) if record.version == ticket.version => Ok(record),
            _ => Err(StoreError::Stale(ticket.id.clone())),
        }
    }

    pub fn complete_generation(&mut self, ticket: &Ticket, content: String) -> Result<(), StoreError> {
        let record = self.checked_mut(ticket)?;
        record.content = content.clone();
        record.error = None;
        record.reasoning = None;
        record.version += 1;
        record.touch();
        self.emit(StoreEvent::RowReady {
            id: ticket.id.clone(),
            content,
        });
        Ok(())
    }

    /// Marks the record as failed. Its content is left as it was.
    pub fn fail_generation(&mut self, ticket: &Ticket, message: String) -> Result<(), StoreError> {
        let record = self.checked_mut(ticket)?;
        record.error = Some(message.clone());
        record.touch();
        self.emit(StoreEvent::RowFailed {
            id: ticket.id.clone(),
            message,
        });
        Ok(())
    }

    /// Dispatches a regeneration: advances the record's version so older
    /// in-flight writes lose, and hands back the original text to generate from.
    pub fn begin_regeneration(&mut self, id: &str) -> Result<(Ticket, String), StoreError> {
        let epoch = self.epoch;
        let record = self
            .records
            .get_mut(id)
            .ok_or_else(|| StoreError::NotFound(id.to_string()))?;
        record.version += 1;
        Ok((
            Ticket {
                id: id.to_string(),
                epoch,
                version: record.version,
            },
            record.original_content.clone(),
        ))
    }

    pub fn apply_regeneration(
        &mut self,
        ticket: &Ticket,
        level: Level,
        content: String,
    ) -> Result<(), StoreError> {
        let record = self.checked_mut(ticket)?;
        record.content = content.clone();
        record.level = level;
        record.error = None;
        record.reasoning = None;
        record.version += 1;
        record.touch();
        self.emit(StoreEvent::ContentChanged {
            id: ticket.id.clone(),
            content,
            level,
        });
        Ok(())
    }

    /// Surfaces a regeneration failure on its record only; no state changes.
    pub fn report_regeneration_failure(&mut self, ticket: &Ticket, message: String) {
        if ticket.epoch == self.epoch && self.records.contains_key(&ticket.id) {
            self.emit(StoreEvent::RegenerationFailed {
                id: ticket.id.clone(),
                message,
            });
        }
    }

    /// Manual edit. The content is trimmed; any cached rationale is dropped.
    pub fn edit(&mut self, id: &str, content: &str) -> Result<Record, StoreError> {
        let record = self
            .records
            .get_mut(id)
            .ok_or_else(|| StoreError::NotFound(id.to_string()))?;
        record.content = content.trim().to_string();
        record.reasoning = None;
        record.error = None;
        record.version += 1;
        record.touch();
        let snapshot = record.clone();
        self.emit(StoreEvent::ContentChanged {
            id: id.to_string(),
            content: snapshot.content.clone(),
            level: snapshot.level,
        });
        Ok(snapshot)
    }

    pub fn reasoning_lookup(&self, id: &str) -> Result<ReasoningLookup, StoreError> {
        let record = self
            .records
            .get(id)
            .ok_or_else(|| StoreError::NotFound(id.to_string()))?;
        if record.content.is_empty() || record.error.is_some() {
            return Ok(ReasoningLookup::NotGenerated);
        }
        Ok(match &record.reasoning {
            Some(reasoning) => ReasoningLookup::Cached(reasoning.clone()),
            None => ReasoningLookup::Missing {
                ticket: Ticket {
                    id: id.to_string(),
                    epoch: self.epoch,
                    version: record.version,
                },
                original_content: record.original_content.clone(),
                content: record.content.clone(),
            },
        })
    }

    pub fn cache_reasoning(&mut self, ticket: &Ticket, reasoning: String) -> Result<(), StoreError> {
        let record = self.checked_mut(ticket)?;
        record.reasoning = Some(reasoning);
        Ok(())
    }

    /// `id<TAB>content` per line in insertion order, skipping failed rows
    /// that never produced content.
    pub fn export_tsv(&self) -> String {
        self.entries()
            .filter(|(_, r)| !(r.error.is_some() && r.content.is_empty()))
            .map(|(id, r)| format!("{id}\t{}\n", r.content))
            .collect()
    }
}
