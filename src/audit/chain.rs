//! Append-only, hash-chained audit log backed by SQLite.
//!
//! All appends funnel through a single serializing writer; `seq` is a
//! global monotonic counter and readers always see a prefix-consistent
//! view. The tail pointer (`last_seq`, `last_hash`) is the only hot
//! mutable state and lives behind the writer lock.

use std::str::FromStr;
use std::sync::Arc;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use rusqlite::{params, Connection, OptionalExtension};
use tracing::{error, info, warn};
use uuid::Uuid;

use super::canonical::{format_ts, hash_event, truncate_ts, ZERO_HASH};
use super::retention::RetentionPolicy;
use super::{AuditEvent, AuditEventType, AuditSeverity, EventDraft};
use crate::errors::PipelineError;

const SCHEMA_SQL: &str = "
CREATE TABLE IF NOT EXISTS audit_log (
    seq           INTEGER PRIMARY KEY,
    id            TEXT NOT NULL,
    ts            TEXT NOT NULL,
    tenant_id     TEXT,
    actor_id      TEXT,
    event_type    TEXT NOT NULL,
    severity      TEXT NOT NULL,
    resource_type TEXT NOT NULL,
    resource_id   TEXT NOT NULL,
    action        TEXT NOT NULL,
    changes       TEXT,
    metadata      TEXT,
    prev_hash     TEXT NOT NULL,
    self_hash     TEXT NOT NULL,
    archived      INTEGER NOT NULL DEFAULT 0
);
CREATE INDEX IF NOT EXISTS idx_audit_event_type ON audit_log(event_type);
CREATE INDEX IF NOT EXISTS idx_audit_resource ON audit_log(resource_type, resource_id);
";

/// Result of an end-to-end hash verification over a contiguous range.
#[derive(Debug, Clone)]
pub struct ChainVerification {
    pub ok: bool,
    pub checked: u64,
    pub first_invalid_seq: Option<u64>,
}

struct ChainInner {
    conn: Connection,
    last_seq: Option<u64>,
    last_hash: String,
}

/// The single serializing writer over the audit log.
#[derive(Clone)]
pub struct AuditChain {
    inner: Arc<Mutex<ChainInner>>,
    retention: Arc<RetentionPolicy>,
}

impl AuditChain {
    pub fn open(db_path: &str) -> Result<Self> {
        let conn = Connection::open(db_path).context("open audit db")?;
        conn.pragma_update(None, "journal_mode", "WAL").ok();
        conn.pragma_update(None, "synchronous", "NORMAL").ok();
        conn.execute_batch(SCHEMA_SQL).context("create audit schema")?;

        let tail: Option<(i64, String)> = conn
            .query_row(
                "SELECT seq, self_hash FROM audit_log ORDER BY seq DESC LIMIT 1",
                [],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .optional()
            .context("read audit tail")?;

        let (last_seq, last_hash) = match tail {
            Some((seq, hash)) => (Some(seq as u64), hash),
            None => (None, ZERO_HASH.to_string()),
        };

        if let Some(seq) = last_seq {
            info!(last_seq = seq, "audit chain resumed");
        }

        Ok(Self {
            inner: Arc::new(Mutex::new(ChainInner {
                conn,
                last_seq,
                last_hash,
            })),
            retention: Arc::new(RetentionPolicy::new()),
        })
    }

    /// Replace the default retention table with a configured one.
    pub fn with_retention(mut self, policy: RetentionPolicy) -> Self {
        self.retention = Arc::new(policy);
        self
    }

    /// Append one event. Computes seq/prev_hash/self_hash under the writer
    /// lock and persists atomically. Returns the assigned seq.
    pub fn append(&self, draft: EventDraft) -> Result<u64, PipelineError> {
        let mut inner = self.inner.lock();

        let seq = inner.last_seq.map_or(0, |s| s + 1);
        let prev_hash = inner.last_hash.clone();

        let mut event = AuditEvent {
            id: Uuid::new_v4().to_string(),
            seq,
            ts: truncate_ts(Utc::now()),
            tenant_id: draft.tenant_id,
            actor_id: draft.actor_id,
            event_type: draft.event_type,
            severity: draft.severity,
            resource_type: draft.resource_type,
            resource_id: draft.resource_id,
            action: draft.action,
            changes: draft.changes,
            metadata: draft.metadata,
            prev_hash,
            self_hash: String::new(),
        };
        event.self_hash = hash_event(&event);

        inner.conn.execute(
            "INSERT INTO audit_log
                (seq, id, ts, tenant_id, actor_id, event_type, severity,
                 resource_type, resource_id, action, changes, metadata,
                 prev_hash, self_hash)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14)",
            params![
                event.seq as i64,
                event.id,
                format_ts(event.ts),
                event.tenant_id,
                event.actor_id,
                event.event_type.as_str(),
                event.severity.as_str(),
                event.resource_type,
                event.resource_id,
                event.action,
                event.changes.as_ref().map(|v| v.to_string()),
                event.metadata.as_ref().map(|v| v.to_string()),
                event.prev_hash,
                event.self_hash,
            ],
        )?;

        inner.last_seq = Some(seq);
        inner.last_hash = event.self_hash.clone();

        Ok(seq)
    }

    /// Recompute hashes over `[from, to]` and check every link. Succeeds
    /// iff every stored `self_hash` matches the recomputation and every
    /// `prev_hash` matches the previous event's `self_hash`.
    pub fn verify_range(&self, from: u64, to: u64) -> Result<ChainVerification, PipelineError> {
        let inner = self.inner.lock();

        let expected_first_prev: String = if from == 0 {
            ZERO_HASH.to_string()
        } else {
            inner
                .conn
                .query_row(
                    "SELECT self_hash FROM audit_log WHERE seq = ?1",
                    params![(from - 1) as i64],
                    |row| row.get(0),
                )
                .optional()?
                .ok_or(PipelineError::NotFound {
                    kind: "audit event",
                    id: (from - 1).to_string(),
                })?
        };

        let mut stmt = inner.conn.prepare(
            "SELECT seq, id, ts, tenant_id, actor_id, event_type, severity,
                    resource_type, resource_id, action, changes, metadata,
                    prev_hash, self_hash
             FROM audit_log WHERE seq BETWEEN ?1 AND ?2 ORDER BY seq",
        )?;

        let rows = stmt.query_map(params![from as i64, to as i64], row_to_event)?;

        let mut checked = 0u64;
        let mut prev_hash = expected_first_prev;
        let mut expected_seq = from;
        for row in rows {
            let event = row?;
            let recomputed = hash_event(&event);
            if event.seq != expected_seq
                || event.prev_hash != prev_hash
                || event.self_hash != recomputed
            {
                warn!(seq = event.seq, "audit chain link failed verification");
                return Ok(ChainVerification {
                    ok: false,
                    checked,
                    first_invalid_seq: Some(event.seq),
                });
            }
            prev_hash = event.self_hash.clone();
            expected_seq += 1;
            checked += 1;
        }

        Ok(ChainVerification {
            ok: true,
            checked,
            first_invalid_seq: None,
        })
    }

    /// Verify a range, then record the check itself in the chain. A broken
    /// chain is never appended to; the failure is surfaced as
    /// `ChainIntegrity` and the store must be treated as halted.
    pub fn verify_and_log(&self, from: u64, to: u64) -> Result<ChainVerification, PipelineError> {
        let verification = self.verify_range(from, to)?;

        if let Some(bad_seq) = verification.first_invalid_seq {
            error!(
                first_bad_seq = bad_seq,
                "audit chain integrity violation; halting appends for this store"
            );
            return Err(PipelineError::ChainIntegrity {
                first_bad_seq: bad_seq,
            });
        }

        self.append(
            EventDraft::new(
                AuditEventType::IntegrityCheck,
                "audit_chain",
                format!("{from}..{to}"),
                "integrity check performed",
            )
            .metadata(serde_json::json!({
                "checked": verification.checked,
                "result": "ok",
            })),
        )?;

        Ok(verification)
    }

    /// Last assigned seq, if any event exists.
    pub fn last_seq(&self) -> Option<u64> {
        self.inner.lock().last_seq
    }

    pub fn tail_hash(&self) -> String {
        self.inner.lock().last_hash.clone()
    }

    /// Read a contiguous range of events (prefix-consistent snapshot).
    pub fn events_in_range(&self, from: u64, to: u64) -> Result<Vec<AuditEvent>, PipelineError> {
        let inner = self.inner.lock();
        let mut stmt = inner.conn.prepare(
            "SELECT seq, id, ts, tenant_id, actor_id, event_type, severity,
                    resource_type, resource_id, action, changes, metadata,
                    prev_hash, self_hash
             FROM audit_log WHERE seq BETWEEN ?1 AND ?2 ORDER BY seq",
        )?;
        let rows = stmt.query_map(params![from as i64, to as i64], row_to_event)?;
        let mut events = Vec::new();
        for row in rows {
            events.push(row?);
        }
        Ok(events)
    }

    /// Events for a given resource, oldest first.
    pub fn events_for_resource(
        &self,
        resource_type: &str,
        resource_id: &str,
    ) -> Result<Vec<AuditEvent>, PipelineError> {
        let inner = self.inner.lock();
        let mut stmt = inner.conn.prepare(
            "SELECT seq, id, ts, tenant_id, actor_id, event_type, severity,
                    resource_type, resource_id, action, changes, metadata,
                    prev_hash, self_hash
             FROM audit_log WHERE resource_type = ?1 AND resource_id = ?2 ORDER BY seq",
        )?;
        let rows = stmt.query_map(params![resource_type, resource_id], row_to_event)?;
        let mut events = Vec::new();
        for row in rows {
            events.push(row?);
        }
        Ok(events)
    }

    /// Whether an event of this type written at `ts` is past retention.
    pub fn should_archive(&self, event_type: AuditEventType, ts: DateTime<Utc>) -> bool {
        self.retention.should_archive(event_type, ts)
    }

    /// Flag every past-retention event as cold. Rows are kept in place so
    /// hash linkage stays intact; `archived` is storage metadata and not
    /// part of the hashed encoding.
    pub fn archive_due(&self) -> Result<usize, PipelineError> {
        let inner = self.inner.lock();
        let mut stmt = inner
            .conn
            .prepare("SELECT seq, event_type, ts FROM audit_log WHERE archived = 0")?;
        let rows = stmt.query_map([], |row| {
            Ok((
                row.get::<_, i64>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, String>(2)?,
            ))
        })?;

        let mut due = Vec::new();
        for row in rows {
            let (seq, event_type, ts) = row?;
            let Ok(event_type) = AuditEventType::from_str(&event_type) else {
                continue;
            };
            let Ok(ts) = DateTime::parse_from_rfc3339(&ts) else {
                continue;
            };
            if self.retention.should_archive(event_type, ts.with_timezone(&Utc)) {
                due.push(seq);
            }
        }
        drop(stmt);

        for seq in &due {
            inner.conn.execute(
                "UPDATE audit_log SET archived = 1 WHERE seq = ?1",
                params![seq],
            )?;
        }

        if !due.is_empty() {
            info!(count = due.len(), "archived audit events past retention");
        }
        Ok(due.len())
    }
}

fn row_to_event(row: &rusqlite::Row<'_>) -> rusqlite::Result<AuditEvent> {
    let ts: String = row.get(2)?;
    let event_type: String = row.get(5)?;
    let severity: String = row.get(6)?;
    let changes: Option<String> = row.get(10)?;
    let metadata: Option<String> = row.get(11)?;

    Ok(AuditEvent {
        seq: row.get::<_, i64>(0)? as u64,
        id: row.get(1)?,
        ts: DateTime::parse_from_rfc3339(&ts)
            .map(|t| t.with_timezone(&Utc))
            .unwrap_or_default(),
        tenant_id: row.get(3)?,
        actor_id: row.get(4)?,
        event_type: AuditEventType::from_str(&event_type)
            .unwrap_or(AuditEventType::ServiceStarted),
        severity: AuditSeverity::from_str(&severity).unwrap_or(AuditSeverity::Info),
        resource_type: row.get(7)?,
        resource_id: row.get(8)?,
        action: row.get(9)?,
        changes: changes.and_then(|c| serde_json::from_str(&c).ok()),
        metadata: metadata.and_then(|m| serde_json::from_str(&m).ok()),
        prev_hash: row.get(12)?,
        self_hash: row.get(13)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn temp_chain() -> (tempfile::TempDir, AuditChain) {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("audit.db");
        let chain = AuditChain::open(path.to_str().unwrap()).unwrap();
        (dir, chain)
    }

    fn draft(i: usize) -> EventDraft {
        EventDraft::new(
            AuditEventType::DataRead,
            "document",
            format!("doc-{i}"),
            format!("read document {i}"),
        )
    }

    #[test]
    fn seq_is_monotonic_from_zero() {
        let (_dir, chain) = temp_chain();
        for i in 0..5 {
            let seq = chain.append(draft(i)).unwrap();
            assert_eq!(seq, i as u64);
        }
        assert_eq!(chain.last_seq(), Some(4));
    }

    #[test]
    fn links_chain_through_prev_hash() {
        let (_dir, chain) = temp_chain();
        for i in 0..3 {
            chain.append(draft(i)).unwrap();
        }
        let events = chain.events_in_range(0, 2).unwrap();
        assert_eq!(events[0].prev_hash, ZERO_HASH);
        assert_eq!(events[1].prev_hash, events[0].self_hash);
        assert_eq!(events[2].prev_hash, events[1].self_hash);
    }

    #[test]
    fn verify_accepts_untampered_range() {
        let (_dir, chain) = temp_chain();
        for i in 0..20 {
            chain.append(draft(i)).unwrap();
        }
        let v = chain.verify_range(0, 19).unwrap();
        assert!(v.ok);
        assert_eq!(v.checked, 20);
        assert!(v.first_invalid_seq.is_none());
    }

    #[test]
    fn verify_reports_first_tampered_seq() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("audit.db");
        let chain = AuditChain::open(path.to_str().unwrap()).unwrap();
        for i in 0..100 {
            chain.append(draft(i)).unwrap();
        }

        // Mutate event #42 behind the chain's back.
        let raw = Connection::open(&path).unwrap();
        raw.execute(
            "UPDATE audit_log SET action = 'tampered' WHERE seq = 42",
            [],
        )
        .unwrap();

        let v = chain.verify_range(0, 99).unwrap();
        assert!(!v.ok);
        assert_eq!(v.first_invalid_seq, Some(42));
    }

    #[test]
    fn verify_and_log_appends_integrity_event() {
        let (_dir, chain) = temp_chain();
        for i in 0..3 {
            chain.append(draft(i)).unwrap();
        }
        chain.verify_and_log(0, 2).unwrap();
        let events = chain.events_in_range(0, 3).unwrap();
        assert_eq!(events[3].event_type, AuditEventType::IntegrityCheck);

        // The integrity event itself extends the verified chain.
        assert!(chain.verify_range(0, 3).unwrap().ok);
    }

    #[test]
    fn verify_and_log_refuses_broken_chain() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("audit.db");
        let chain = AuditChain::open(path.to_str().unwrap()).unwrap();
        for i in 0..5 {
            chain.append(draft(i)).unwrap();
        }
        let raw = Connection::open(&path).unwrap();
        raw.execute("UPDATE audit_log SET action = 'x' WHERE seq = 2", [])
            .unwrap();

        let before = chain.last_seq();
        let err = chain.verify_and_log(0, 4).unwrap_err();
        assert_eq!(err.reason_code(), "CHAIN_INTEGRITY");
        // No mutation performed on failure.
        assert_eq!(chain.last_seq(), before);
    }

    #[test]
    fn chain_resumes_across_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("audit.db");
        {
            let chain = AuditChain::open(path.to_str().unwrap()).unwrap();
            for i in 0..4 {
                chain.append(draft(i)).unwrap();
            }
        }
        let chain = AuditChain::open(path.to_str().unwrap()).unwrap();
        assert_eq!(chain.append(draft(4)).unwrap(), 4);
        assert!(chain.verify_range(0, 4).unwrap().ok);
    }
}
