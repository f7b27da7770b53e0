//! Incident store abstractions and in-memory backend.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use thiserror::Error;
use tokio::sync::RwLock;

mod sqlite;

pub use pulse_types::StoredRecord;
pub use sqlite::SqliteIncidentStore;

/// Result type for incident store operations.
pub type StoreResult<T> = Result<T, StoreError>;

/// Errors returned by store implementations.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error(
        "stale write for incident '{incident_id}': stored last_update {stored} is newer than {incoming}"
    )]
    StaleRecord {
        incident_id: String,
        stored: DateTime<Utc>,
        incoming: DateTime<Utc>,
    },
    #[error("invalid persisted value for '{field}': {value}")]
    InvalidPersistedValue { field: &'static str, value: String },
    #[error(transparent)]
    Sqlite(#[from] rusqlite::Error),
    #[error(transparent)]
    Chrono(#[from] chrono::ParseError),
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// Durable mapping from incident identifier to its last reconciliation state.
///
/// Writes are atomic per key. A write whose `last_update` is older than the
/// stored one is rejected with [`StoreError::StaleRecord`]; cross-key
/// atomicity is not provided.
#[async_trait]
pub trait IncidentStore: Send + Sync {
    /// `Ok(None)` means the key is absent; read failures are always `Err`.
    async fn get(&self, incident_id: &str) -> StoreResult<Option<StoredRecord>>;
    async fn set(&self, incident_id: &str, record: StoredRecord) -> StoreResult<()>;
    /// Deletes resolved records last updated before `older_than`.
    async fn prune_resolved(&self, older_than: DateTime<Utc>) -> StoreResult<usize>;
    async fn len(&self) -> StoreResult<usize>;
}

pub(crate) fn ensure_monotonic(
    incident_id: &str,
    existing: Option<DateTime<Utc>>,
    incoming: &StoredRecord,
) -> StoreResult<()> {
    match existing {
        Some(stored) if stored > incoming.last_update => Err(StoreError::StaleRecord {
            incident_id: incident_id.to_string(),
            stored,
            incoming: incoming.last_update,
        }),
        _ => Ok(()),
    }
}

/// In-memory implementation for tests and dry runs.
#[derive(Debug, Default)]
pub struct InMemoryIncidentStore {
    records: RwLock<HashMap<String, StoredRecord>>,
}

impl InMemoryIncidentStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl IncidentStore for InMemoryIncidentStore {
    async fn get(&self, incident_id: &str) -> StoreResult<Option<StoredRecord>> {
        Ok(self.records.read().await.get(incident_id).cloned())
    }

    async fn set(&self, incident_id: &str, record: StoredRecord) -> StoreResult<()> {
        let mut records = self.records.write().await;
        ensure_monotonic(
            incident_id,
            records.get(incident_id).map(|existing| existing.last_update),
            &record,
        )?;
        records.insert(incident_id.to_string(), record);
        Ok(())
    }

    async fn prune_resolved(&self, older_than: DateTime<Utc>) -> StoreResult<usize> {
        let mut records = self.records.write().await;
        let before = records.len();
        records.retain(|_, record| !(record.resolved && record.last_update < older_than));
        Ok(before - records.len())
    }

    async fn len(&self) -> StoreResult<usize> {
        Ok(self.records.read().await.len())
    }
}
