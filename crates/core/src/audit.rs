//! Audit sink seam shared by tools, runtime and the ledger.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// One audit event before it is sequenced into the ledger.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditEntry {
    pub timestamp: DateTime<Utc>,
    pub event: String,
    pub detail: String,
    #[serde(default)]
    pub session_id: Option<String>,
    #[serde(default)]
    pub data: Value,
}

impl AuditEntry {
    pub fn new(event: impl Into<String>, detail: impl Into<String>) -> Self {
        Self {
            timestamp: Utc::now(),
            event: event.into(),
            detail: detail.into(),
            session_id: None,
            data: Value::Null,
        }
    }

    pub fn session(mut self, session_id: impl Into<String>) -> Self {
        self.session_id = Some(session_id.into());
        self
    }

    pub fn data(mut self, data: Value) -> Self {
        self.data = data;
        self
    }
}

/// Fire-and-forget audit recording. Implementations must not block on I/O.
pub trait AuditSink: Send + Sync {
    fn log(&self, entry: AuditEntry);
}

/// Discards every entry.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopAudit;

impl AuditSink for NoopAudit {
    fn log(&self, _entry: AuditEntry) {}
}
