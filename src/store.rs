//! Durable record store for processed messages
//!
//! One row per remote message id, inserted exactly once after a successful
//! classify+label cycle. The primary-key constraint is what makes reprocessing
//! impossible even if two pollers ever point at the same database.

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use std::path::Path;
use std::sync::{Mutex, MutexGuard};
use tracing::info;

use crate::error::{Result, TriageError};
use crate::models::{Classification, ProcessedMessageRecord};

const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS processed_messages (
    message_id       TEXT PRIMARY KEY,
    subject          TEXT,
    sender           TEXT,
    classification   TEXT NOT NULL,
    has_attachments  INTEGER NOT NULL DEFAULT 0,
    processed_at     TEXT NOT NULL,
    applied_label_id TEXT
);
CREATE INDEX IF NOT EXISTS idx_processed_classification
    ON processed_messages(classification);
CREATE INDEX IF NOT EXISTS idx_processed_at
    ON processed_messages(processed_at);
";

/// SQLite-backed processed-message ledger. The connection is serialized
/// behind a mutex; access patterns here are single-flight anyway.
pub struct ProcessedStore {
    conn: Mutex<Connection>,
}

impl ProcessedStore {
    /// Open (or create) the store at the given path, creating parent
    /// directories as needed
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let conn = Connection::open(path)?;
        conn.execute_batch(SCHEMA)?;
        info!("Opened processed-message store at {:?}", path);
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// In-memory store for tests and one-shot runs
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        conn.execute_batch(SCHEMA)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn conn(&self) -> Result<MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|_| TriageError::Unknown("store connection mutex poisoned".to_string()))
    }

    /// Insert a new record. Fails if the message id is already present;
    /// callers check [`find_by_message_id`] before processing, so a conflict
    /// here indicates a logic error upstream.
    ///
    /// [`find_by_message_id`]: ProcessedStore::find_by_message_id
    pub fn insert(&self, record: &ProcessedMessageRecord) -> Result<()> {
        self.conn()?.execute(
            "INSERT INTO processed_messages
                (message_id, subject, sender, classification, has_attachments,
                 processed_at, applied_label_id)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            params![
                record.message_id,
                record.subject,
                record.sender,
                record.classification.as_str(),
                record.has_attachments as i64,
                record.processed_at.to_rfc3339(),
                record.applied_label_id,
            ],
        )?;
        Ok(())
    }

    pub fn find_by_message_id(&self, message_id: &str) -> Result<Option<ProcessedMessageRecord>> {
        let conn = self.conn()?;
        let row = conn
            .query_row(
                "SELECT message_id, subject, sender, classification, has_attachments,
                        processed_at, applied_label_id
                 FROM processed_messages WHERE message_id = ?1",
                params![message_id],
                row_to_record,
            )
            .optional()?;

        row.map(decode_record).transpose()
    }

    pub fn count(&self) -> Result<u64> {
        let count: i64 =
            self.conn()?
                .query_row("SELECT COUNT(*) FROM processed_messages", [], |row| {
                    row.get(0)
                })?;
        Ok(count as u64)
    }

    pub fn count_by_classification(&self, classification: Classification) -> Result<u64> {
        let count: i64 = self.conn()?.query_row(
            "SELECT COUNT(*) FROM processed_messages WHERE classification = ?1",
            params![classification.as_str()],
            |row| row.get(0),
        )?;
        Ok(count as u64)
    }

    /// Most recently processed records, newest first
    pub fn recent(&self, limit: u32) -> Result<Vec<ProcessedMessageRecord>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(
            "SELECT message_id, subject, sender, classification, has_attachments,
                    processed_at, applied_label_id
             FROM processed_messages ORDER BY processed_at DESC LIMIT ?1",
        )?;

        let rows = stmt.query_map(params![limit], row_to_record)?;
        let mut records = Vec::new();
        for row in rows {
            records.push(decode_record(row?)?);
        }
        Ok(records)
    }

    /// Delete every record, making all messages eligible for reprocessing
    pub fn reset(&self) -> Result<u64> {
        let deleted = self.conn()?.execute("DELETE FROM processed_messages", [])?;
        info!("Cleared {} processed-message records", deleted);
        Ok(deleted as u64)
    }
}

/// Raw row shape before classification/timestamp decoding
struct StoredRow {
    message_id: String,
    subject: Option<String>,
    sender: Option<String>,
    classification: String,
    has_attachments: i64,
    processed_at: String,
    applied_label_id: Option<String>,
}

fn row_to_record(row: &rusqlite::Row<'_>) -> rusqlite::Result<StoredRow> {
    Ok(StoredRow {
        message_id: row.get(0)?,
        subject: row.get(1)?,
        sender: row.get(2)?,
        classification: row.get(3)?,
        has_attachments: row.get(4)?,
        processed_at: row.get(5)?,
        applied_label_id: row.get(6)?,
    })
}

fn decode_record(row: StoredRow) -> Result<ProcessedMessageRecord> {
    let classification = Classification::from_stored(&row.classification)?;
    let processed_at = DateTime::parse_from_rfc3339(&row.processed_at)
        .map_err(|e| {
            TriageError::InvalidMessageFormat(format!(
                "Bad processed_at timestamp for {}: {}",
                row.message_id, e
            ))
        })?
        .with_timezone(&Utc);

    Ok(ProcessedMessageRecord {
        message_id: row.message_id,
        subject: row.subject,
        sender: row.sender,
        classification,
        has_attachments: row.has_attachments != 0,
        processed_at,
        applied_label_id: row.applied_label_id,
    })
}
