#![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]
//! Durability and tamper detection of the audit ledger.

use rusqlite::{params, Connection};
use std::time::Duration;
use switchyard_core::{AuditEntry, AuditSink, Usage};
use switchyard_ledger::{AuditLedger, LedgerConfig, GENESIS_HASH};
use tempfile::TempDir;

fn config(dir: &TempDir) -> LedgerConfig {
    LedgerConfig::at(&dir.path().join("audit.db"))
}

fn log_many(ledger: &AuditLedger, n: usize) {
    for i in 0..n {
        ledger.log(AuditEntry::new("tool_call", format!("call {}", i)).session("s1"));
    }
}

#[test]
fn test_tampering_breaks_chain_from_that_entry() {
    let dir = TempDir::new().unwrap();
    let cfg = config(&dir);
    {
        let ledger = AuditLedger::open(&cfg).unwrap();
        log_many(&ledger, 5);
        let clean = ledger.verify_chain().unwrap();
        assert!(clean.is_valid());
        assert_eq!(clean.checked, 5);
    }

    let conn = Connection::open(&cfg.db_path).unwrap();
    conn.execute("UPDATE audit_v1 SET detail = ?1 WHERE id = 3", params!["forged"])
        .unwrap();
    drop(conn);

    let ledger = AuditLedger::open(&cfg).unwrap();
    let verification = ledger.verify_chain().unwrap();
    assert_eq!(verification.first_broken, Some(3));
    assert_eq!(verification.checked, 5);
}

#[test]
fn test_empty_chain_is_valid() {
    let dir = TempDir::new().unwrap();
    let ledger = AuditLedger::open(&config(&dir)).unwrap();
    let verification = ledger.verify_chain().unwrap();
    assert!(verification.is_valid());
    assert_eq!(verification.head_id, None);
    assert_eq!(verification.head_hash, GENESIS_HASH);
}

#[tokio::test]
async fn test_batch_size_triggers_background_flush() {
    let dir = TempDir::new().unwrap();
    let ledger = AuditLedger::open(&config(&dir)).unwrap();

    log_many(&ledger, 19);
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(ledger.persisted_count().unwrap(), 0);

    log_many(&ledger, 1);
    let mut persisted = 0;
    for _ in 0..100 {
        persisted = ledger.persisted_count().unwrap();
        if persisted == 20 {
            break;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    assert_eq!(persisted, 20);
}

#[tokio::test]
async fn test_interval_flushes_partial_batch() {
    let dir = TempDir::new().unwrap();
    let ledger = AuditLedger::open(&LedgerConfig {
        flush_interval_ms: 50,
        ..config(&dir)
    })
    .unwrap();
    log_many(&ledger, 2);
    tokio::time::sleep(Duration::from_millis(400)).await;
    assert_eq!(ledger.persisted_count().unwrap(), 2);
}

#[test]
fn test_drop_flushes_buffer() {
    let dir = TempDir::new().unwrap();
    let cfg = config(&dir);
    {
        let ledger = AuditLedger::open(&cfg).unwrap();
        log_many(&ledger, 3);
        assert_eq!(ledger.pending(), 3);
    }
    let reopened = AuditLedger::open(&cfg).unwrap();
    assert_eq!(reopened.persisted_count().unwrap(), 3);
}

#[test]
fn test_checkpoint_detects_rewritten_history() {
    let dir = TempDir::new().unwrap();
    let cfg = config(&dir);
    {
        let ledger = AuditLedger::open(&cfg).unwrap();
        log_many(&ledger, 4);
        let checkpoint = ledger.checkpoint().unwrap();
        assert_eq!(checkpoint.head_id, Some(4));
        assert!(ledger.verify_checkpoints().unwrap().is_valid());
    }

    // Rewrite the head consistently, so only the checkpoint can tell.
    let conn = Connection::open(&cfg.db_path).unwrap();
    conn.execute("UPDATE audit_v1 SET hash = ?1 WHERE id = 4", params!["f".repeat(64)])
        .unwrap();
    drop(conn);

    let ledger = AuditLedger::open(&cfg).unwrap();
    let report = ledger.verify_checkpoints().unwrap();
    assert_eq!(report.checked, 1);
    assert_eq!(report.mismatched.len(), 1);
}

#[test]
fn test_usage_summary_groups_by_model() {
    let dir = TempDir::new().unwrap();
    let ledger = AuditLedger::open(&config(&dir)).unwrap();
    let opus = ledger.record_usage(Some("s1"), "claude-opus-4-1", Usage { input: 1_000, output: 500 });
    ledger.record_usage(Some("s1"), "claude-opus-4-1", Usage { input: 1_000, output: 500 });
    ledger.record_usage(Some("s2"), "gpt-4.1-mini", Usage { input: 2_000, output: 100 });
    assert!(opus > 0.0);

    let summary = ledger.usage_summary().unwrap();
    assert_eq!(summary.len(), 2);
    assert_eq!(summary[0].model, "claude-opus-4-1");
    assert_eq!(summary[0].calls, 2);
    assert_eq!(summary[0].input_tokens, 2_000);
    assert!((summary[0].cost_usd - 2.0 * opus).abs() < 1e-9);
}
