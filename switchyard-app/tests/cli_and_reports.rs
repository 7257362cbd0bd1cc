#![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]

use rusqlite::{params, Connection};
use std::path::PathBuf;
use std::time::Duration;
use switchyard_app::report::{cooldown_report, usage_report, verification_report};
use switchyard_app::{load_gateway_config, Invocation, Mode};
use switchyard_core::{AuditEntry, AuditSink, CooldownInfo};
use switchyard_ledger::{AuditLedger, LedgerConfig, ModelUsage};
use tempfile::TempDir;

#[test]
fn test_invocation_parsing() {
    let plain = Invocation::parse(Vec::<String>::new()).unwrap();
    assert_eq!(plain.mode, Mode::Repl);
    assert_eq!(plain.config, None);

    let verify = Invocation::parse(["--config", "gw.yaml", "verify"]).unwrap();
    assert_eq!(verify.mode, Mode::Verify);
    assert_eq!(verify.config, Some(PathBuf::from("gw.yaml")));

    let inline = Invocation::parse(["checkpoint", "--config=/etc/switchyard.yaml"]).unwrap();
    assert_eq!(inline.mode, Mode::Checkpoint);
    assert_eq!(inline.config, Some(PathBuf::from("/etc/switchyard.yaml")));

    assert!(Invocation::parse(["--config"]).is_err());
    assert!(Invocation::parse(["serve"]).is_err());
}

#[test]
fn test_config_loading() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("gateway.yaml");
    std::fs::write(&path, "orchestration:\n  max_iterations: 7\n").unwrap();

    let config = load_gateway_config(Some(&path)).unwrap();
    assert_eq!(config.orchestration.max_iterations, 7);
    assert_eq!(load_gateway_config(None).unwrap().orchestration.max_iterations, 25);

    let missing = load_gateway_config(Some(&dir.path().join("nope.yaml"))).unwrap_err();
    assert!(missing.to_string().contains("nope.yaml"));
}

#[test]
fn test_verification_report_flags_tampering() {
    let dir = TempDir::new().unwrap();
    let db = dir.path().join("ledger.db");
    let ledger = AuditLedger::open(&LedgerConfig::at(&db)).unwrap();
    for i in 0..3 {
        ledger.log(AuditEntry::new("route", format!("model-{}", i)));
    }
    ledger.checkpoint().unwrap();

    let (intact, report) = verification_report(&ledger).unwrap();
    assert!(intact, "{report}");
    assert!(report.contains("3 entries"));

    let conn = Connection::open(&db).unwrap();
    conn.execute("UPDATE audit_v1 SET detail = ?1 WHERE id = 2", params!["forged"])
        .unwrap();
    drop(conn);
    let (intact, report) = verification_report(&ledger).unwrap();
    assert!(!intact);
    assert!(report.contains("broken at entry 2"), "{report}");
}

#[test]
fn test_usage_and_cooldown_reports() {
    let rows = vec![
        ModelUsage {
            model: "claude-opus-4-1".into(),
            calls: 2,
            input_tokens: 1_000,
            output_tokens: 500,
            cost_usd: 0.0525,
        },
        ModelUsage {
            model: "gpt-4.1-mini".into(),
            calls: 1,
            input_tokens: 100,
            output_tokens: 20,
            cost_usd: 0.000072,
        },
    ];
    let report = usage_report(&rows);
    assert!(report.contains("claude-opus-4-1"));
    assert!(report.ends_with("total cost: $0.0526"));
    assert_eq!(usage_report(&[]), "No model usage recorded yet.");

    let cooling = vec![CooldownInfo {
        model: "o3".into(),
        failures: 2,
        remaining: Duration::from_secs(90),
    }];
    assert_eq!(cooldown_report(&cooling), "o3: 2 failure(s), 90s remaining");
    assert_eq!(cooldown_report(&[]), "All models healthy.");
}
