//! SQLite-backed `IncidentStore` implementation with durable persistence.

use crate::{ensure_monotonic, IncidentStore, StoreError, StoreResult, StoredRecord};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension, TransactionBehavior};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Persistent SQLite store holding one row per reconciled incident.
#[derive(Debug)]
pub struct SqliteIncidentStore {
    db_path: PathBuf,
}

impl SqliteIncidentStore {
    /// Opens (or creates) the database at `path` and ensures the schema exists.
    pub fn new(path: impl AsRef<Path>) -> StoreResult<Self> {
        let db_path = path.as_ref().to_path_buf();
        if let Some(parent) = db_path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }

        let store = Self { db_path };
        let connection = store.open_connection()?;
        initialize_schema(&connection)?;
        tracing::debug!(path = %store.db_path.display(), "opened incident store");
        Ok(store)
    }

    pub fn path(&self) -> &Path {
        &self.db_path
    }

    fn open_connection(&self) -> StoreResult<Connection> {
        let connection = Connection::open(&self.db_path)?;
        connection.busy_timeout(Duration::from_secs(5))?;
        connection.execute_batch(
            r#"
            PRAGMA journal_mode = WAL;
            PRAGMA synchronous = NORMAL;
            "#,
        )?;
        Ok(connection)
    }
}

fn initialize_schema(connection: &Connection) -> StoreResult<()> {
    connection.execute_batch(
        r#"
        CREATE TABLE IF NOT EXISTS incident_records (
            incident_id TEXT PRIMARY KEY,
            message_id TEXT NOT NULL,
            last_update TEXT NOT NULL,
            resolved INTEGER NOT NULL,
            updated_at TEXT NOT NULL
        );

        CREATE INDEX IF NOT EXISTS idx_incident_records_resolved
            ON incident_records (resolved, last_update);
        "#,
    )?;
    Ok(())
}

#[async_trait]
impl IncidentStore for SqliteIncidentStore {
    async fn get(&self, incident_id: &str) -> StoreResult<Option<StoredRecord>> {
        let connection = self.open_connection()?;
        let row = connection
            .query_row(
                "SELECT message_id, last_update, resolved FROM incident_records WHERE incident_id = ?1",
                params![incident_id],
                |row| {
                    Ok((
                        row.get::<_, String>(0)?,
                        row.get::<_, String>(1)?,
                        row.get::<_, i64>(2)?,
                    ))
                },
            )
            .optional()?;

        row.map(|(message_id, last_update, resolved)| -> StoreResult<StoredRecord> {
            Ok(StoredRecord {
                message_id,
                last_update: timestamp_from_db(&last_update)?,
                resolved: bool_from_db("resolved", resolved)?,
            })
        })
        .transpose()
    }

    async fn set(&self, incident_id: &str, record: StoredRecord) -> StoreResult<()> {
        let mut connection = self.open_connection()?;
        let transaction = connection.transaction_with_behavior(TransactionBehavior::Immediate)?;

        let existing = transaction
            .query_row(
                "SELECT last_update FROM incident_records WHERE incident_id = ?1",
                params![incident_id],
                |row| row.get::<_, String>(0),
            )
            .optional()?
            .map(|value| timestamp_from_db(&value))
            .transpose()?;
        ensure_monotonic(incident_id, existing, &record)?;

        transaction.execute(
            r#"
            INSERT INTO incident_records (incident_id, message_id, last_update, resolved, updated_at)
            VALUES (?1, ?2, ?3, ?4, ?5)
            ON CONFLICT(incident_id) DO UPDATE SET
                message_id = excluded.message_id,
                last_update = excluded.last_update,
                resolved = excluded.resolved,
                updated_at = excluded.updated_at
            "#,
            params![
                incident_id,
                record.message_id,
                timestamp_to_db(record.last_update),
                i64::from(record.resolved),
                timestamp_to_db(Utc::now()),
            ],
        )?;
        transaction.commit()?;
        Ok(())
    }

    async fn prune_resolved(&self, older_than: DateTime<Utc>) -> StoreResult<usize> {
        let mut connection = self.open_connection()?;
        let transaction = connection.transaction_with_behavior(TransactionBehavior::Immediate)?;

        // Timestamps are compared after parsing; stored offsets may differ.
        let candidates = {
            let mut statement = transaction.prepare(
                "SELECT incident_id, last_update FROM incident_records WHERE resolved = 1",
            )?;
            let rows = statement.query_map([], |row| {
                Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?))
            })?;
            let mut expired = Vec::new();
            for row in rows {
                let (incident_id, last_update) = row?;
                if timestamp_from_db(&last_update)? < older_than {
                    expired.push(incident_id);
                }
            }
            expired
        };

        for incident_id in &candidates {
            transaction.execute(
                "DELETE FROM incident_records WHERE incident_id = ?1",
                params![incident_id],
            )?;
        }
        transaction.commit()?;
        Ok(candidates.len())
    }

    async fn len(&self) -> StoreResult<usize> {
        let connection = self.open_connection()?;
        let count = connection.query_row("SELECT COUNT(*) FROM incident_records", [], |row| {
            row.get::<_, i64>(0)
        })?;
        usize::try_from(count).map_err(|_| StoreError::InvalidPersistedValue {
            field: "count",
            value: count.to_string(),
        })
    }
}

fn timestamp_to_db(value: DateTime<Utc>) -> String {
    value.to_rfc3339()
}

fn timestamp_from_db(value: &str) -> StoreResult<DateTime<Utc>> {
    Ok(DateTime::parse_from_rfc3339(value)?.with_timezone(&Utc))
}

fn bool_from_db(field: &'static str, value: i64) -> StoreResult<bool> {
    match value {
        0 => Ok(false),
        1 => Ok(true),
        other => Err(StoreError::InvalidPersistedValue {
            field,
            value: other.to_string(),
        }),
    }
}
