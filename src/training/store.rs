//! Persistence for training records and datasets.
//!
//! Rows carry the full record as JSON plus indexed columns for the fields
//! queries filter on. Writes funnel through one connection; the lifecycle
//! service holds the transition lock above this layer.

use anyhow::{Context, Result};
use parking_lot::Mutex;
use rusqlite::{params, Connection, OptionalExtension};

use crate::errors::PipelineError;
use crate::models::{Dataset, TrainingRecord, TrainingStatus};

const SCHEMA_SQL: &str = "
CREATE TABLE IF NOT EXISTS training_records (
    id             TEXT PRIMARY KEY,
    status         TEXT NOT NULL,
    statement_type TEXT NOT NULL,
    source         TEXT NOT NULL,
    uploaded_at    TEXT NOT NULL,
    record_json    TEXT NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_records_status ON training_records(status);

CREATE TABLE IF NOT EXISTS datasets (
    id           TEXT PRIMARY KEY,
    name         TEXT NOT NULL,
    created_at   TEXT NOT NULL,
    dataset_json TEXT NOT NULL
);
";

pub struct TrainingStore {
    conn: Mutex<Connection>,
}

impl TrainingStore {
    pub fn open(db_path: &str) -> Result<Self> {
        let conn = Connection::open(db_path).context("open training db")?;
        conn.pragma_update(None, "journal_mode", "WAL").ok();
        conn.pragma_update(None, "synchronous", "NORMAL").ok();
        conn.execute_batch(SCHEMA_SQL)
            .context("create training schema")?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    pub fn upsert_record(&self, record: &TrainingRecord) -> Result<(), PipelineError> {
        let json = serde_json::to_string(record)
            .map_err(|e| PipelineError::Validation(format!("record serialization failed: {e}")))?;
        let conn = self.conn.lock();
        conn.execute(
            "INSERT INTO training_records (id, status, statement_type, source, uploaded_at, record_json)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)
             ON CONFLICT(id) DO UPDATE SET
                status = excluded.status,
                record_json = excluded.record_json",
            params![
                record.id,
                record.status.as_str(),
                record.statement_type.as_str(),
                record.source.as_str(),
                record.uploaded_at.to_rfc3339(),
                json,
            ],
        )?;
        Ok(())
    }

    pub fn get_record(&self, id: &str) -> Result<Option<TrainingRecord>, PipelineError> {
        let conn = self.conn.lock();
        let json: Option<String> = conn
            .query_row(
                "SELECT record_json FROM training_records WHERE id = ?1",
                params![id],
                |row| row.get(0),
            )
            .optional()?;
        Ok(json.and_then(|j| serde_json::from_str(&j).ok()))
    }

    pub fn list_records(&self) -> Result<Vec<TrainingRecord>, PipelineError> {
        let conn = self.conn.lock();
        let mut stmt =
            conn.prepare("SELECT record_json FROM training_records ORDER BY uploaded_at")?;
        let rows = stmt.query_map([], |row| row.get::<_, String>(0))?;
        let mut records = Vec::new();
        for row in rows {
            if let Ok(record) = serde_json::from_str(&row?) {
                records.push(record);
            }
        }
        Ok(records)
    }

    pub fn records_by_status(
        &self,
        status: TrainingStatus,
    ) -> Result<Vec<TrainingRecord>, PipelineError> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(
            "SELECT record_json FROM training_records WHERE status = ?1 ORDER BY uploaded_at",
        )?;
        let rows = stmt.query_map(params![status.as_str()], |row| row.get::<_, String>(0))?;
        let mut records = Vec::new();
        for row in rows {
            if let Ok(record) = serde_json::from_str(&row?) {
                records.push(record);
            }
        }
        Ok(records)
    }

    pub fn upsert_dataset(&self, dataset: &Dataset) -> Result<(), PipelineError> {
        let json = serde_json::to_string(dataset)
            .map_err(|e| PipelineError::Validation(format!("dataset serialization failed: {e}")))?;
        let conn = self.conn.lock();
        conn.execute(
            "INSERT INTO datasets (id, name, created_at, dataset_json)
             VALUES (?1, ?2, ?3, ?4)
             ON CONFLICT(id) DO UPDATE SET dataset_json = excluded.dataset_json",
            params![
                dataset.id,
                dataset.name,
                dataset.created_at.to_rfc3339(),
                json,
            ],
        )?;
        Ok(())
    }

    pub fn get_dataset(&self, id: &str) -> Result<Option<Dataset>, PipelineError> {
        let conn = self.conn.lock();
        let json: Option<String> = conn
            .query_row(
                "SELECT dataset_json FROM datasets WHERE id = ?1",
                params![id],
                |row| row.get(0),
            )
            .optional()?;
        Ok(json.and_then(|j| serde_json::from_str(&j).ok()))
    }

    pub fn list_datasets(&self) -> Result<Vec<Dataset>, PipelineError> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare("SELECT dataset_json FROM datasets ORDER BY created_at")?;
        let rows = stmt.query_map([], |row| row.get::<_, String>(0))?;
        let mut datasets = Vec::new();
        for row in rows {
            if let Ok(dataset) = serde_json::from_str(&row?) {
                datasets.push(dataset);
            }
        }
        Ok(datasets)
    }
}
