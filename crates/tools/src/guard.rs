//! Circuit breaker and loop detector spanning every iteration of one turn.

use crate::limits::ToolLimits;
use serde_json::Value;
use sha2::{Digest, Sha256};
use std::collections::VecDeque;
use switchyard_core::{ToolCall, ToolResult};
use tracing::warn;

/// Why the guard stopped the turn.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GuardTrip {
    CircuitOpen { summary: String },
    LoopDetected { tool: String, count: usize },
}

impl GuardTrip {
    pub fn message(&self) -> String {
        match self {
            GuardTrip::CircuitOpen { summary } => summary.clone(),
            GuardTrip::LoopDetected { tool, count } => format!(
                "repeating tool call: {} was called {} times with identical arguments",
                tool, count
            ),
        }
    }
}

#[derive(Debug)]
pub struct ToolGuard {
    circuit_threshold: usize,
    loop_window: usize,
    loop_repeat: usize,
    consecutive_errors: usize,
    failures: Vec<String>,
    recent: VecDeque<String>,
}

impl ToolGuard {
    pub fn new(circuit_threshold: usize, loop_window: usize, loop_repeat: usize) -> Self {
        Self {
            circuit_threshold: circuit_threshold.max(1),
            loop_window: loop_window.max(1),
            loop_repeat: loop_repeat.max(2),
            consecutive_errors: 0,
            failures: Vec::new(),
            recent: VecDeque::new(),
        }
    }

    pub fn from_limits(limits: &ToolLimits) -> Self {
        Self::new(limits.circuit_threshold, limits.loop_window, limits.loop_repeat)
    }

    /// Record requested calls before they run. Trips when one signature
    /// reaches the repeat threshold inside the rolling window.
    pub fn check_calls(&mut self, calls: &[ToolCall]) -> Result<(), GuardTrip> {
        for call in calls {
            let signature = signature(call);
            self.recent.push_back(signature.clone());
            while self.recent.len() > self.loop_window {
                self.recent.pop_front();
            }
            let count = self.recent.iter().filter(|s| **s == signature).count();
            if count >= self.loop_repeat {
                warn!("Loop detected: {} repeated {} times", call.name, count);
                return Err(GuardTrip::LoopDetected {
                    tool: call.name.clone(),
                    count,
                });
            }
        }
        Ok(())
    }

    /// Record results in order. Trips the moment the run of consecutive
    /// errors reaches the threshold.
    pub fn record_results(&mut self, results: &[ToolResult]) -> Result<(), GuardTrip> {
        for result in results {
            if result.success {
                self.consecutive_errors = 0;
                self.failures.clear();
                continue;
            }
            self.consecutive_errors += 1;
            let first_line = result.output.lines().next().unwrap_or_default();
            self.failures.push(format!("{}: {}", result.name, first_line));
            if self.consecutive_errors == self.circuit_threshold {
                warn!("Circuit breaker open after {} consecutive tool errors", self.consecutive_errors);
                let summary = format!(
                    "{} consecutive tool failures:\n{}",
                    self.consecutive_errors,
                    self.failures
                        .iter()
                        .map(|f| format!("- {}", f))
                        .collect::<Vec<_>>()
                        .join("\n")
                );
                return Err(GuardTrip::CircuitOpen { summary });
            }
        }
        Ok(())
    }

    pub fn consecutive_errors(&self) -> usize {
        self.consecutive_errors
    }
}

/// `name:sha256(canonical args)`.
pub fn signature(call: &ToolCall) -> String {
    let mut canonical = String::new();
    write_canonical(&Value::Object(call.arguments.clone()), &mut canonical);
    let digest = Sha256::digest(canonical.as_bytes());
    format!("{}:{:x}", call.name, digest)
}

/// JSON text with object keys sorted at every depth.
fn write_canonical(value: &Value, out: &mut String) {
    match value {
        Value::Object(map) => {
            let mut keys: Vec<&String> = map.keys().collect();
            keys.sort();
            out.push('{');
            for (i, key) in keys.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                out.push_str(&Value::String((*key).clone()).to_string());
                out.push(':');
                if let Some(inner) = map.get(*key) {
                    write_canonical(inner, out);
                }
            }
            out.push('}');
        }
        Value::Array(items) => {
            out.push('[');
            for (i, item) in items.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                write_canonical(item, out);
            }
            out.push(']');
        }
        other => out.push_str(&other.to_string()),
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::time::Duration;

    fn call(name: &str, args: Value) -> ToolCall {
        ToolCall {
            id: "id".into(),
            name: name.into(),
            arguments: args.as_object().cloned().unwrap(),
        }
    }

    fn result(name: &str, success: bool) -> ToolResult {
        ToolResult {
            call_id: "id".into(),
            name: name.into(),
            output: if success { "ok".into() } else { format!("[ERROR] {} failed", name) },
            elapsed: Duration::ZERO,
            success,
        }
    }

    #[test]
    fn test_signature_ignores_key_order() {
        let a = call("read", json!({"path": "a", "opts": {"x": 1, "y": 2}}));
        let b = call("read", json!({"opts": {"y": 2, "x": 1}, "path": "a"}));
        assert_eq!(signature(&a), signature(&b));
        assert_ne!(signature(&a), signature(&call("read", json!({"path": "b"}))));
    }

    #[test]
    fn test_circuit_trips_exactly_at_three() {
        let mut guard = ToolGuard::new(3, 6, 3);
        assert!(guard.record_results(&[result("a", false)]).is_ok());
        assert!(guard.record_results(&[result("b", false)]).is_ok());
        assert_eq!(guard.consecutive_errors(), 2);
        let trip = guard.record_results(&[result("c", false)]).unwrap_err();
        let GuardTrip::CircuitOpen { summary } = trip else {
            panic!("expected circuit trip");
        };
        for name in ["a", "b", "c"] {
            assert!(summary.contains(&format!("- {}: [ERROR] {} failed", name, name)));
        }
    }

    #[test]
    fn test_success_resets_run() {
        let mut guard = ToolGuard::new(3, 6, 3);
        guard.record_results(&[result("a", false), result("b", false)]).unwrap();
        guard.record_results(&[result("ok", true)]).unwrap();
        guard.record_results(&[result("c", false), result("d", false)]).unwrap();
        assert_eq!(guard.consecutive_errors(), 2);
    }

    #[test]
    fn test_loop_trips_on_third_repeat() {
        let mut guard = ToolGuard::new(3, 6, 3);
        let same = call("exec", json!({"command": "ls"}));
        guard.check_calls(&[same.clone()]).unwrap();
        guard.check_calls(&[call("read", json!({"path": "x"}))]).unwrap();
        guard.check_calls(&[same.clone()]).unwrap();
        let trip = guard.check_calls(&[same]).unwrap_err();
        assert_eq!(trip, GuardTrip::LoopDetected { tool: "exec".into(), count: 3 });
        assert!(trip.message().contains("exec"));
    }

    #[test]
    fn test_repeat_outside_window_is_fine() {
        let mut guard = ToolGuard::new(3, 6, 3);
        let same = call("exec", json!({"command": "ls"}));
        guard.check_calls(&[same.clone(), same.clone()]).unwrap();
        for i in 0..5 {
            guard.check_calls(&[call("read", json!({"path": i}))]).unwrap();
        }
        // the two earlier repeats have left the window of 6
        guard.check_calls(&[same]).unwrap();
    }
}
