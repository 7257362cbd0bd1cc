//! Buffered, hash-chained audit and usage ledger on SQLite.
//!
//! Entries collect in memory and are written in one transaction when the
//! buffer reaches `batch_size` or `flush_interval_ms` elapses. Each flush
//! writes the v1 chain (`ts|event|detail|prev`) and the structured v2 row
//! for every entry. The connection lock is held for the whole flush, so
//! the chain is always extended from the persisted head by one writer.

use crate::chain::{entry_hash, ChainVerification, GENESIS_HASH};
use crate::checkpoint::{self, Checkpoint, CheckpointReport};
use crate::error::LedgerError;
use chrono::{DateTime, SecondsFormat, Utc};
use parking_lot::Mutex;
use rusqlite::{params, Connection, OptionalExtension};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use switchyard_core::{model_spec, AuditEntry, AuditSink, Usage};
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LedgerConfig {
    pub db_path: PathBuf,
    pub checkpoint_path: PathBuf,
    pub batch_size: usize,
    pub flush_interval_ms: u64,
}

impl LedgerConfig {
    /// Database at `db_path`, checkpoints beside it.
    pub fn at(db_path: &Path) -> Self {
        Self {
            db_path: db_path.to_path_buf(),
            checkpoint_path: db_path.with_extension("checkpoints"),
            ..Self::default()
        }
    }
}

impl Default for LedgerConfig {
    fn default() -> Self {
        Self {
            db_path: PathBuf::from("./data/ledger.db"),
            checkpoint_path: PathBuf::from("./data/ledger.checkpoints"),
            batch_size: 20,
            flush_interval_ms: 5_000,
        }
    }
}

/// Filter for [`AuditLedger::query`]. Empty fields match everything.
#[derive(Debug, Clone)]
pub struct AuditFilter {
    pub session_id: Option<String>,
    pub event: Option<String>,
    pub since: Option<DateTime<Utc>>,
    pub limit: usize,
}

impl Default for AuditFilter {
    fn default() -> Self {
        Self {
            session_id: None,
            event: None,
            since: None,
            limit: 100,
        }
    }
}

/// One persisted entry, v1 fields joined with its structured v2 detail.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LedgerRecord {
    pub id: i64,
    pub timestamp: DateTime<Utc>,
    pub event: String,
    pub detail: String,
    pub session_id: Option<String>,
    pub data: Value,
}

/// Aggregated usage for one model.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ModelUsage {
    pub model: String,
    pub calls: u64,
    pub input_tokens: u64,
    pub output_tokens: u64,
    pub cost_usd: f64,
}

#[derive(Debug, Clone)]
struct UsageRecord {
    ts: DateTime<Utc>,
    session_id: Option<String>,
    model: String,
    usage: Usage,
    cost_usd: f64,
}

#[derive(Debug, Clone)]
enum Pending {
    Audit(AuditEntry),
    Usage(UsageRecord),
}

fn format_ts(ts: &DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn parse_ts(id: i64, ts: &str) -> Result<DateTime<Utc>, LedgerError> {
    DateTime::parse_from_rfc3339(ts)
        .map(|t| t.with_timezone(&Utc))
        .map_err(|e| LedgerError::Corrupt {
            id,
            reason: format!("bad timestamp {:?}: {}", ts, e),
        })
}

struct LedgerInner {
    conn: Mutex<Connection>,
    buffer: Mutex<Vec<Pending>>,
    notify: Notify,
    closed: AtomicBool,
    batch_size: usize,
    flush_interval: Duration,
}

impl LedgerInner {
    fn head(conn: &Connection) -> Result<Option<(i64, String)>, LedgerError> {
        Ok(conn
            .query_row(
                "SELECT id, hash FROM audit_v1 ORDER BY id DESC LIMIT 1",
                [],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .optional()?)
    }

    /// Write everything buffered. On failure the batch goes back to the
    /// front of the buffer, ahead of anything logged meanwhile.
    fn flush(&self) -> Result<usize, LedgerError> {
        let mut conn = self.conn.lock();
        let pending = std::mem::take(&mut *self.buffer.lock());
        if pending.is_empty() {
            return Ok(0);
        }

        match Self::write_batch(&mut conn, &pending) {
            Ok(written) => {
                debug!("Flushed {} ledger records", written);
                Ok(written)
            }
            Err(e) => {
                let mut buffer = self.buffer.lock();
                let newer = std::mem::replace(&mut *buffer, pending);
                buffer.extend(newer);
                Err(e)
            }
        }
    }

    fn write_batch(conn: &mut Connection, pending: &[Pending]) -> Result<usize, LedgerError> {
        let tx = conn.transaction()?;
        let mut prev_hash = Self::head(&tx)?
            .map(|(_, hash)| hash)
            .unwrap_or_else(|| GENESIS_HASH.to_string());

        for item in pending {
            match item {
                Pending::Audit(entry) => {
                    let ts = format_ts(&entry.timestamp);
                    let hash = entry_hash(&ts, &entry.event, &entry.detail, &prev_hash);
                    tx.execute(
                        "INSERT INTO audit_v1 (ts, event, detail, prev_hash, hash) VALUES (?1, ?2, ?3, ?4, ?5)",
                        params![ts, entry.event, entry.detail, prev_hash, hash],
                    )?;
                    let v1_id = tx.last_insert_rowid();
                    tx.execute(
                        "INSERT INTO audit_v2 (v1_id, ts, event, session_id, data) VALUES (?1, ?2, ?3, ?4, ?5)",
                        params![v1_id, ts, entry.event, entry.session_id, entry.data.to_string()],
                    )?;
                    prev_hash = hash;
                }
                Pending::Usage(record) => {
                    tx.execute(
                        "INSERT INTO usage (ts, session_id, model, input_tokens, output_tokens, cost_usd)
                         VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                        params![
                            format_ts(&record.ts),
                            record.session_id,
                            record.model,
                            record.usage.input as i64,
                            record.usage.output as i64,
                            record.cost_usd
                        ],
                    )?;
                }
            }
        }

        tx.commit()?;
        Ok(pending.len())
    }

    fn push(&self, item: Pending) -> bool {
        let mut buffer = self.buffer.lock();
        buffer.push(item);
        buffer.len() >= self.batch_size
    }
}

async fn run_flusher(inner: Arc<LedgerInner>) {
    loop {
        tokio::select! {
            _ = inner.notify.notified() => {}
            _ = tokio::time::sleep(inner.flush_interval) => {}
        }
        if inner.closed.load(Ordering::SeqCst) {
            break;
        }
        let worker = inner.clone();
        match tokio::task::spawn_blocking(move || worker.flush()).await {
            Ok(Ok(_)) => {}
            Ok(Err(e)) => warn!("Ledger flush failed, will retry: {}", e),
            Err(e) => warn!("Ledger flush task failed: {}", e),
        }
    }
}

/// Tamper-evident audit log and usage accounting.
pub struct AuditLedger {
    inner: Arc<LedgerInner>,
    checkpoint_path: PathBuf,
    flusher: Mutex<Option<JoinHandle<()>>>,
}

impl AuditLedger {
    /// Open (or create) the ledger. The periodic flusher only runs when
    /// called inside a tokio runtime; otherwise batches flush inline.
    pub fn open(config: &LedgerConfig) -> Result<Self, LedgerError> {
        if let Some(parent) = config.db_path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let conn = Connection::open(&config.db_path)?;
        conn.pragma_update(None, "journal_mode", "WAL")?;
        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS audit_v1 (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                ts TEXT NOT NULL,
                event TEXT NOT NULL,
                detail TEXT NOT NULL,
                prev_hash TEXT NOT NULL,
                hash TEXT NOT NULL
            );
            CREATE TABLE IF NOT EXISTS audit_v2 (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                v1_id INTEGER NOT NULL REFERENCES audit_v1(id),
                ts TEXT NOT NULL,
                event TEXT NOT NULL,
                session_id TEXT,
                data TEXT NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_audit_v2_session ON audit_v2(session_id);
            CREATE TABLE IF NOT EXISTS usage (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                ts TEXT NOT NULL,
                session_id TEXT,
                model TEXT NOT NULL,
                input_tokens INTEGER NOT NULL,
                output_tokens INTEGER NOT NULL,
                cost_usd REAL NOT NULL
            );",
        )?;

        let inner = Arc::new(LedgerInner {
            conn: Mutex::new(conn),
            buffer: Mutex::new(Vec::new()),
            notify: Notify::new(),
            closed: AtomicBool::new(false),
            batch_size: config.batch_size.max(1),
            flush_interval: Duration::from_millis(config.flush_interval_ms.max(1)),
        });

        let flusher = tokio::runtime::Handle::try_current()
            .ok()
            .map(|handle| handle.spawn(run_flusher(inner.clone())));
        if flusher.is_none() {
            debug!("No tokio runtime, ledger flushes inline");
        }

        info!("Opened audit ledger at {}", config.db_path.display());
        Ok(Self {
            inner,
            checkpoint_path: config.checkpoint_path.clone(),
            flusher: Mutex::new(flusher),
        })
    }

    fn enqueue(&self, item: Pending) {
        if !self.inner.push(item) {
            return;
        }
        if self.flusher.lock().is_some() {
            self.inner.notify.notify_one();
        } else if let Err(e) = self.inner.flush() {
            warn!("Inline ledger flush failed: {}", e);
        }
    }

    /// Buffer a usage row and return its cost in USD. Unknown models cost 0.
    pub fn record_usage(&self, session_id: Option<&str>, model: &str, usage: Usage) -> f64 {
        let cost_usd = model_spec(model)
            .map(|spec| spec.cost(usage.input, usage.output))
            .unwrap_or(0.0);
        self.enqueue(Pending::Usage(UsageRecord {
            ts: Utc::now(),
            session_id: session_id.map(str::to_string),
            model: model.to_string(),
            usage,
            cost_usd,
        }));
        cost_usd
    }

    /// Write all buffered records now.
    pub fn flush(&self) -> Result<usize, LedgerError> {
        self.inner.flush()
    }

    pub fn pending(&self) -> usize {
        self.inner.buffer.lock().len()
    }

    /// Number of v1 entries on disk, excluding anything still buffered.
    pub fn persisted_count(&self) -> Result<u64, LedgerError> {
        let conn = self.inner.conn.lock();
        let count: i64 = conn.query_row("SELECT COUNT(*) FROM audit_v1", [], |row| row.get(0))?;
        Ok(count as u64)
    }

    /// Replay the v1 chain from genesis. Once an entry fails, every later
    /// entry is checked against the recomputed chain and fails too.
    pub fn verify_chain(&self) -> Result<ChainVerification, LedgerError> {
        self.flush()?;
        let conn = self.inner.conn.lock();
        let mut stmt =
            conn.prepare("SELECT id, ts, event, detail, prev_hash, hash FROM audit_v1 ORDER BY id ASC")?;
        let rows = stmt.query_map([], |row| {
            Ok((
                row.get::<_, i64>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, String>(2)?,
                row.get::<_, String>(3)?,
                row.get::<_, String>(4)?,
                row.get::<_, String>(5)?,
            ))
        })?;

        let mut result = ChainVerification {
            checked: 0,
            head_id: None,
            head_hash: GENESIS_HASH.to_string(),
            first_broken: None,
        };
        let mut expected_prev = GENESIS_HASH.to_string();
        for row in rows {
            let (id, ts, event, detail, prev_hash, hash) = row?;
            let computed = entry_hash(&ts, &event, &detail, &expected_prev);
            if result.first_broken.is_none() && (prev_hash != expected_prev || computed != hash) {
                error!("Audit chain broken at entry {}", id);
                result.first_broken = Some(id);
            }
            result.checked += 1;
            result.head_id = Some(id);
            result.head_hash = hash;
            expected_prev = computed;
        }
        Ok(result)
    }

    /// Flush, then append the current chain head to the checkpoint file.
    pub fn checkpoint(&self) -> Result<Checkpoint, LedgerError> {
        self.flush()?;
        let head = LedgerInner::head(&self.inner.conn.lock())?;
        let checkpoint = Checkpoint {
            ts: Utc::now(),
            head_id: head.as_ref().map(|(id, _)| *id),
            head_hash: head.map(|(_, hash)| hash).unwrap_or_else(|| GENESIS_HASH.to_string()),
        };
        checkpoint::append(&self.checkpoint_path, &checkpoint)?;
        info!("Checkpointed audit chain at {:?}", checkpoint.head_id);
        Ok(checkpoint)
    }

    /// Check every recorded checkpoint against the stored chain.
    pub fn verify_checkpoints(&self) -> Result<CheckpointReport, LedgerError> {
        let (checkpoints, unreadable_lines) = checkpoint::read_all(&self.checkpoint_path)?;
        let conn = self.inner.conn.lock();
        let mut report = CheckpointReport {
            checked: checkpoints.len(),
            mismatched: Vec::new(),
            unreadable_lines,
        };
        for checkpoint in checkpoints {
            let stored = match checkpoint.head_id {
                Some(id) => conn
                    .query_row("SELECT hash FROM audit_v1 WHERE id = ?1", params![id], |row| {
                        row.get::<_, String>(0)
                    })
                    .optional()?,
                None => Some(GENESIS_HASH.to_string()),
            };
            if stored.as_deref() != Some(checkpoint.head_hash.as_str()) {
                warn!("Checkpoint at {} does not match stored chain", checkpoint.ts);
                report.mismatched.push(checkpoint);
            }
        }
        Ok(report)
    }

    /// Most recent matching entries, oldest first.
    pub fn query(&self, filter: &AuditFilter) -> Result<Vec<LedgerRecord>, LedgerError> {
        self.flush()?;
        let since = filter.since.as_ref().map(format_ts);
        let conn = self.inner.conn.lock();
        let mut stmt = conn.prepare(
            "SELECT v1.id, v1.ts, v1.event, v1.detail, v2.session_id, v2.data
             FROM audit_v1 v1 LEFT JOIN audit_v2 v2 ON v2.v1_id = v1.id
             WHERE (?1 IS NULL OR v2.session_id = ?1)
               AND (?2 IS NULL OR v1.event = ?2)
               AND (?3 IS NULL OR v1.ts >= ?3)
             ORDER BY v1.id DESC LIMIT ?4",
        )?;
        let rows = stmt.query_map(
            params![filter.session_id, filter.event, since, filter.limit as i64],
            |row| {
                Ok((
                    row.get::<_, i64>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, String>(2)?,
                    row.get::<_, String>(3)?,
                    row.get::<_, Option<String>>(4)?,
                    row.get::<_, Option<String>>(5)?,
                ))
            },
        )?;

        let mut records = Vec::new();
        for row in rows {
            let (id, ts, event, detail, session_id, data) = row?;
            let data = match data {
                Some(raw) => serde_json::from_str(&raw)?,
                None => Value::Null,
            };
            records.push(LedgerRecord {
                id,
                timestamp: parse_ts(id, &ts)?,
                event,
                detail,
                session_id,
                data,
            });
        }
        records.reverse();
        Ok(records)
    }

    /// Calls, tokens and cost per model, most expensive first.
    pub fn usage_summary(&self) -> Result<Vec<ModelUsage>, LedgerError> {
        self.flush()?;
        let conn = self.inner.conn.lock();
        let mut stmt = conn.prepare(
            "SELECT model, COUNT(*), SUM(input_tokens), SUM(output_tokens), SUM(cost_usd)
             FROM usage GROUP BY model ORDER BY SUM(cost_usd) DESC, model ASC",
        )?;
        let rows = stmt.query_map([], |row| {
            Ok(ModelUsage {
                model: row.get(0)?,
                calls: row.get::<_, i64>(1)? as u64,
                input_tokens: row.get::<_, i64>(2)? as u64,
                output_tokens: row.get::<_, i64>(3)? as u64,
                cost_usd: row.get(4)?,
            })
        })?;
        let mut summary = Vec::new();
        for row in rows {
            summary.push(row?);
        }
        Ok(summary)
    }

    /// Stop the periodic flusher and write what is left. Idempotent.
    pub fn shutdown(&self) -> Result<usize, LedgerError> {
        if !self.inner.closed.swap(true, Ordering::SeqCst) {
            if let Some(handle) = self.flusher.lock().take() {
                handle.abort();
            }
        }
        let written = self.flush()?;
        if written > 0 {
            info!("Final ledger flush wrote {} records", written);
        }
        Ok(written)
    }
}

impl AuditSink for AuditLedger {
    fn log(&self, entry: AuditEntry) {
        self.enqueue(Pending::Audit(entry));
    }
}

impl Drop for AuditLedger {
    fn drop(&mut self) {
        if let Err(e) = self.shutdown() {
            error!("Ledger flush on drop failed, {} records lost: {}", self.pending(), e);
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]
mod tests {
    use super::*;
    use serde_json::json;
    use tempfile::TempDir;

    fn config(dir: &TempDir) -> LedgerConfig {
        LedgerConfig::at(&dir.path().join("ledger.db"))
    }

    #[test]
    fn test_inline_flush_at_batch_size() {
        let dir = TempDir::new().unwrap();
        let ledger = AuditLedger::open(&LedgerConfig {
            batch_size: 3,
            ..config(&dir)
        })
        .unwrap();
        ledger.log(AuditEntry::new("a", "1"));
        ledger.log(AuditEntry::new("a", "2"));
        assert_eq!(ledger.persisted_count().unwrap(), 0);
        ledger.log(AuditEntry::new("a", "3"));
        assert_eq!(ledger.persisted_count().unwrap(), 3);
        assert_eq!(ledger.pending(), 0);
    }

    #[test]
    fn test_chain_links_across_flushes() {
        let dir = TempDir::new().unwrap();
        let ledger = AuditLedger::open(&config(&dir)).unwrap();
        ledger.log(AuditEntry::new("turn", "one"));
        ledger.flush().unwrap();
        ledger.log(AuditEntry::new("turn", "two"));
        ledger.flush().unwrap();

        let verification = ledger.verify_chain().unwrap();
        assert!(verification.is_valid());
        assert_eq!(verification.checked, 2);
        assert_eq!(verification.head_id, Some(2));
    }

    #[test]
    fn test_query_filters_by_session_and_event() {
        let dir = TempDir::new().unwrap();
        let ledger = AuditLedger::open(&config(&dir)).unwrap();
        ledger.log(AuditEntry::new("tool", "read").session("s1").data(json!({"ok": true})));
        ledger.log(AuditEntry::new("tool", "exec").session("s2"));
        ledger.log(AuditEntry::new("failover", "gpt-4.1").session("s1"));

        let s1 = ledger
            .query(&AuditFilter {
                session_id: Some("s1".into()),
                ..AuditFilter::default()
            })
            .unwrap();
        assert_eq!(s1.len(), 2);
        assert_eq!(s1[0].detail, "read");
        assert_eq!(s1[0].data, json!({"ok": true}));

        let tools = ledger
            .query(&AuditFilter {
                event: Some("tool".into()),
                limit: 1,
                ..AuditFilter::default()
            })
            .unwrap();
        assert_eq!(tools.len(), 1);
        assert_eq!(tools[0].detail, "exec");
    }

    #[test]
    fn test_unknown_model_costs_nothing() {
        let dir = TempDir::new().unwrap();
        let ledger = AuditLedger::open(&config(&dir)).unwrap();
        let cost = ledger.record_usage(None, "local-llama", Usage { input: 1000, output: 1000 });
        assert_eq!(cost, 0.0);
    }
}
