use crate::limits::{truncate_output, ToolLimits};
use crate::redact::redact;
use crate::request::ToolRequest;
use crate::traits::{ToolError, ToolRegistry};
use serde_json::{json, Map, Value};
use std::sync::Arc;
use std::time::{Duration, Instant};
use switchyard_core::{AuditEntry, AuditSink, ToolCall, ToolResult};
use tokio::sync::{mpsc, Semaphore};
use tokio::time::timeout;
use tracing::{error, info, warn};

/// Prefix marking a failed tool result.
pub const ERROR_MARKER: &str = "[ERROR]";

/// Longest argument summary kept in logs and audit entries.
const ARG_SUMMARY_CHARS: usize = 200;

/// Progress notifications for one batch.
#[derive(Debug, Clone, PartialEq)]
pub enum ToolEvent {
    Started {
        call_id: String,
        name: String,
    },
    Finished {
        call_id: String,
        name: String,
        success: bool,
        elapsed: Duration,
    },
}

pub type ProgressSender = mpsc::UnboundedSender<ToolEvent>;

/// Runs tool batches on a fixed-width worker pool.
pub struct ToolDispatcher {
    registry: Arc<dyn ToolRegistry>,
    audit: Arc<dyn AuditSink>,
    limits: Arc<ToolLimits>,
    pool: Arc<Semaphore>,
}

impl ToolDispatcher {
    pub fn new(registry: Arc<dyn ToolRegistry>, audit: Arc<dyn AuditSink>, limits: ToolLimits) -> Self {
        let width = limits.pool_size.max(1);
        Self {
            registry,
            audit,
            limits: Arc::new(limits),
            pool: Arc::new(Semaphore::new(width)),
        }
    }

    pub fn registry(&self) -> &Arc<dyn ToolRegistry> {
        &self.registry
    }

    pub fn limits(&self) -> &ToolLimits {
        &self.limits
    }

    /// Execute every call concurrently and return exactly one result per
    /// call, in call order. A failing or slow call never affects its siblings.
    pub async fn run_batch(
        &self,
        calls: &[ToolCall],
        session_id: Option<&str>,
        progress: Option<&ProgressSender>,
    ) -> Vec<ToolResult> {
        info!("Dispatching batch of {} tool call(s)", calls.len());

        let handles: Vec<_> = calls
            .iter()
            .cloned()
            .map(|call| {
                let registry = self.registry.clone();
                let limits = self.limits.clone();
                let pool = self.pool.clone();
                let progress = progress.cloned();
                tokio::spawn(async move {
                    let _permit = match pool.acquire_owned().await {
                        Ok(permit) => permit,
                        Err(_) => {
                            return finish(
                                &call,
                                Err(ToolError::Execution("worker pool closed".into())),
                                Duration::ZERO,
                                &limits,
                            )
                        }
                    };
                    if let Some(tx) = &progress {
                        let _ = tx.send(ToolEvent::Started {
                            call_id: call.id.clone(),
                            name: call.name.clone(),
                        });
                    }
                    let started = Instant::now();
                    let outcome = execute_one(registry, &limits, &call).await;
                    let result = finish(&call, outcome, started.elapsed(), &limits);
                    if let Some(tx) = &progress {
                        let _ = tx.send(ToolEvent::Finished {
                            call_id: result.call_id.clone(),
                            name: result.name.clone(),
                            success: result.success,
                            elapsed: result.elapsed,
                        });
                    }
                    result
                })
            })
            .collect();

        let mut results = Vec::with_capacity(calls.len());
        for (call, handle) in calls.iter().zip(handles) {
            let result = match handle.await {
                Ok(result) => result,
                Err(join_err) => {
                    error!("Tool worker for {} failed: {}", call.name, join_err);
                    finish(call, Err(ToolError::Panicked), Duration::ZERO, &self.limits)
                }
            };
            self.audit_call(call, &result, session_id);
            results.push(result);
        }
        results
    }

    fn audit_call(&self, call: &ToolCall, result: &ToolResult, session_id: Option<&str>) {
        let elapsed_ms = result.elapsed.as_millis() as u64;
        let status = if result.success { "ok" } else { "error" };
        let args = summarize_args(&call.arguments);
        let mut entry = AuditEntry::new(
            "tool_call",
            format!("{} {} ({}ms) {}", call.name, status, elapsed_ms, args),
        )
        .data(json!({
            "tool": call.name,
            "call_id": call.id,
            "success": result.success,
            "elapsed_ms": elapsed_ms,
            "args": args,
        }));
        if let Some(id) = session_id {
            entry = entry.session(id);
        }
        self.audit.log(entry);
        metrics::histogram!(
            "tool_execution_latency",
            result.elapsed.as_secs_f64() * 1000.0,
            "tool" => call.name.clone()
        );
    }
}

/// Validate, then run one call under its timeout with panic isolation.
async fn execute_one(
    registry: Arc<dyn ToolRegistry>,
    limits: &ToolLimits,
    call: &ToolCall,
) -> Result<String, ToolError> {
    let validated = ToolRequest::parse(&call.name, &call.arguments)?;

    let limit = limits.timeout_for(&call.name);
    let mut handle = tokio::spawn(async move { registry.execute(&validated).await });

    match timeout(limit, &mut handle).await {
        Ok(Ok(result)) => result,
        Ok(Err(join_err)) => {
            if join_err.is_panic() {
                error!("Tool {} panicked", call.name);
            } else {
                error!("Tool {} was cancelled", call.name);
            }
            Err(ToolError::Panicked)
        }
        Err(_) => {
            warn!("Tool {} timed out after {:?}", call.name, limit);
            handle.abort();
            Err(ToolError::Timeout(limit))
        }
    }
}

/// Turn an outcome into the result the model sees: error-marked on
/// failure, then redacted, then truncated.
fn finish(
    call: &ToolCall,
    outcome: Result<String, ToolError>,
    elapsed: Duration,
    limits: &ToolLimits,
) -> ToolResult {
    let (raw, mut success) = match outcome {
        Ok(output) => (output, true),
        Err(e) => (format!("{} {}", ERROR_MARKER, e), false),
    };
    if raw.trim_start().starts_with(ERROR_MARKER) {
        success = false;
    }
    let output = truncate_output(&redact(&raw), limits.max_chars_for(&call.name));
    ToolResult {
        call_id: call.id.clone(),
        name: call.name.clone(),
        output,
        elapsed,
        success,
    }
}

/// Redacted one-line view of the arguments.
pub fn summarize_args(args: &Map<String, Value>) -> String {
    let text = redact(&Value::Object(args.clone()).to_string());
    if text.chars().count() > ARG_SUMMARY_CHARS {
        let head: String = text.chars().take(ARG_SUMMARY_CHARS).collect();
        format!("{}...", head)
    } else {
        text
    }
}
