//! Plain-text renderings of ledger and routing state for the terminal.

use anyhow::Result;
use switchyard_core::CooldownInfo;
use switchyard_ledger::{AuditLedger, Checkpoint, ModelUsage};

pub fn usage_report(rows: &[ModelUsage]) -> String {
    if rows.is_empty() {
        return "No model usage recorded yet.".to_string();
    }
    let mut out = format!(
        "{:<24} {:>6} {:>12} {:>12} {:>10}\n",
        "model", "calls", "input", "output", "cost"
    );
    let mut total = 0.0;
    for row in rows {
        total += row.cost_usd;
        out.push_str(&format!(
            "{:<24} {:>6} {:>12} {:>12} {:>10}\n",
            row.model,
            row.calls,
            row.input_tokens,
            row.output_tokens,
            format!("${:.4}", row.cost_usd)
        ));
    }
    out.push_str(&format!("total cost: ${:.4}", total));
    out
}

pub fn cooldown_report(cooldowns: &[CooldownInfo]) -> String {
    if cooldowns.is_empty() {
        return "All models healthy.".to_string();
    }
    cooldowns
        .iter()
        .map(|c| {
            format!(
                "{}: {} failure(s), {}s remaining",
                c.model,
                c.failures,
                c.remaining.as_secs()
            )
        })
        .collect::<Vec<_>>()
        .join("\n")
}

pub fn checkpoint_report(checkpoint: &Checkpoint) -> String {
    match checkpoint.head_id {
        Some(id) => format!(
            "Checkpoint at entry {} ({})",
            id,
            short_hash(&checkpoint.head_hash)
        ),
        None => "Checkpoint of empty chain".to_string(),
    }
}

/// Replay the chain and every checkpoint. Returns whether both are intact
/// together with a printable summary.
pub fn verification_report(ledger: &AuditLedger) -> Result<(bool, String)> {
    let chain = ledger.verify_chain()?;
    let checkpoints = ledger.verify_checkpoints()?;

    let mut lines = Vec::new();
    match chain.first_broken {
        None => lines.push(format!(
            "✓ chain intact: {} entries, head {}",
            chain.checked,
            short_hash(&chain.head_hash)
        )),
        Some(id) => lines.push(format!(
            "✗ chain broken at entry {} ({} entries checked)",
            id, chain.checked
        )),
    }
    if checkpoints.is_valid() {
        lines.push(format!("✓ {} checkpoint(s) match", checkpoints.checked));
    } else {
        for bad in &checkpoints.mismatched {
            lines.push(format!(
                "✗ checkpoint from {} no longer matches entry {:?}",
                bad.ts.to_rfc3339(),
                bad.head_id
            ));
        }
        if checkpoints.unreadable_lines > 0 {
            lines.push(format!(
                "✗ {} unreadable checkpoint line(s)",
                checkpoints.unreadable_lines
            ));
        }
    }

    Ok((chain.is_valid() && checkpoints.is_valid(), lines.join("\n")))
}

fn short_hash(hash: &str) -> &str {
    hash.get(..12).unwrap_or(hash)
}
