use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::Duration;

/// Per-tool execution limits and guard thresholds.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ToolLimits {
    /// Width of the worker pool shared by every batch.
    pub pool_size: usize,
    pub default_timeout_secs: u64,
    pub timeouts: HashMap<String, u64>,
    /// Default character cap applied to each result.
    pub default_max_chars: usize,
    pub max_chars: HashMap<String, usize>,
    pub circuit_threshold: usize,
    pub loop_window: usize,
    pub loop_repeat: usize,
}

impl Default for ToolLimits {
    fn default() -> Self {
        let timeouts = [("exec", 120), ("python", 30), ("eval", 30), ("calc", 10), ("web_fetch", 30)]
            .into_iter()
            .map(|(name, secs)| (name.to_string(), secs))
            .collect();
        let max_chars = [("read", 20_000), ("exec", 10_000), ("web_fetch", 15_000), ("web_search", 5_000)]
            .into_iter()
            .map(|(name, cap)| (name.to_string(), cap))
            .collect();
        Self {
            pool_size: 4,
            default_timeout_secs: 60,
            timeouts,
            default_max_chars: 8_000,
            max_chars,
            circuit_threshold: 3,
            loop_window: 6,
            loop_repeat: 3,
        }
    }
}

impl ToolLimits {
    pub fn timeout_for(&self, tool: &str) -> Duration {
        Duration::from_secs(
            self.timeouts
                .get(tool)
                .copied()
                .unwrap_or(self.default_timeout_secs),
        )
    }

    pub fn max_chars_for(&self, tool: &str) -> usize {
        self.max_chars
            .get(tool)
            .copied()
            .unwrap_or(self.default_max_chars)
    }
}

/// Cut `text` to `max_chars` characters, noting how much was dropped.
pub fn truncate_output(text: &str, max_chars: usize) -> String {
    let total = text.chars().count();
    if total <= max_chars {
        return text.to_string();
    }
    let kept: String = text.chars().take(max_chars).collect();
    format!("{}\n...[truncated {} chars]", kept, total - max_chars)
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]
mod tests {
    use super::*;

    #[test]
    fn test_timeout_lookup() {
        let limits = ToolLimits::default();
        assert_eq!(limits.timeout_for("exec"), Duration::from_secs(120));
        assert_eq!(limits.timeout_for("calc"), Duration::from_secs(10));
        assert_eq!(limits.timeout_for("weather"), Duration::from_secs(60));
    }

    #[test]
    fn test_truncate_counts_chars() {
        assert_eq!(truncate_output("short", 10), "short");
        let out = truncate_output("가나다라마", 2);
        assert!(out.starts_with("가나\n"));
        assert!(out.ends_with("[truncated 3 chars]"));
    }
}
