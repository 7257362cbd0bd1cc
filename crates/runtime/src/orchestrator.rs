//! Turn state machine: Classify -> Route -> Call -> (ToolRound -> Call)* -> Finalize.
//!
//! A turn ends `Finalized` with the model's reply or `Aborted` by the
//! circuit breaker, the loop detector, the iteration cap or an abort
//! signal. Every failure is turned into a short localized reply here;
//! nothing propagates to the caller.
//!
//! Turns on one session are serialized by the session's turn lock. A new
//! turn first signals the in-flight one to stop, then waits up to
//! `lock_wait_secs` for the lock. If that wait times out the new turn
//! runs WITHOUT the lock, so two turns may then interleave on the same
//! session and the later write-back wins. This double-execution window is
//! kept as is and needs product sign-off before it is closed.

use crate::config::GatewayConfig;
use crate::gate::RequestGate;
use crate::metrics::{increment_aborted_turn, increment_failover, MetricTimer};
use crate::turn::{EventSender, ThinkingSetting, TurnEvent, TurnReply, TurnRequest, ABORT_MARKER};
use chrono::Utc;
use serde_json::{json, Value};
use std::sync::{Arc, Weak};
use std::time::Duration;
use switchyard_core::{
    friendly_message, AuditEntry, AuditSink, Classification, Classifier, CooldownInfo,
    CooldownTracker, Credentials, EngineError, ErrorKind, Message, ModelSelector, Provider,
    RoutePlan, Role, Session, SessionFlags, ToolCall, ToolResult, Usage,
};
use switchyard_ledger::AuditLedger;
use switchyard_memory::{
    CompactionReport, CompactionStage, ContextCompactor, SessionEntry, SessionRegistry,
    SessionStore, Summarizer,
};
use switchyard_providers::{
    ProviderClient, ProviderError, ProviderRequest, ProviderResponse, StopReason, TokenSender,
};
use switchyard_tools::{GuardTrip, ToolDispatcher, ToolEvent, ToolGuard, ToolRegistry};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

/// Ephemeral instruction replayed after a reply was cut off by the token cap.
pub const CONTINUE_PROMPT: &str =
    "Your previous reply was cut off. Continue exactly where you stopped without repeating anything.";

/// Concrete collaborators wired in by the composition root.
pub struct Collaborators {
    pub provider: Arc<dyn ProviderClient>,
    pub credentials: Credentials,
    pub tools: Arc<dyn ToolRegistry>,
    pub store: Arc<dyn SessionStore>,
    pub summarizer: Arc<dyn Summarizer>,
    pub audit: Arc<dyn AuditSink>,
    /// Usage accounting; turns still run without one.
    pub ledger: Option<Arc<AuditLedger>>,
}

pub struct Orchestrator {
    config: GatewayConfig,
    classifier: Classifier,
    selector: ModelSelector,
    cooldowns: CooldownTracker,
    credentials: Credentials,
    provider: Arc<dyn ProviderClient>,
    dispatcher: ToolDispatcher,
    compactor: ContextCompactor<Arc<dyn Summarizer>>,
    sessions: SessionRegistry,
    audit: Arc<dyn AuditSink>,
    ledger: Option<Arc<AuditLedger>>,
    gate: Arc<RequestGate>,
}

/// Mutable state of the turn in flight.
struct Turn {
    session: Session,
    events: Option<EventSender>,
    classification: Option<Classification>,
    model: Option<String>,
    usage: Usage,
    /// Everything the model said this turn, returned on abort.
    streamed: String,
    warning: Option<String>,
    iterations: usize,
}

impl Turn {
    fn new(session: Session, events: Option<EventSender>) -> Self {
        Self {
            session,
            events,
            classification: None,
            model: None,
            usage: Usage::default(),
            streamed: String::new(),
            warning: None,
            iterations: 0,
        }
    }

    fn emit(&self, event: TurnEvent) {
        if let Some(events) = &self.events {
            let _ = events.send(event);
        }
    }

    fn reply(&self) -> TurnReply {
        TurnReply {
            model: self.model.clone(),
            classification: self.classification.clone(),
            usage: self.usage,
            iterations: self.iterations,
            warning: self.warning.clone(),
            ..TurnReply::default()
        }
    }
}

/// Per-turn provider call parameters.
struct CallSpec<'a> {
    plan: &'a RoutePlan,
    tools: &'a [Value],
    max_tokens: u32,
    thinking: Option<u32>,
}

enum CallFailure {
    Overflow(String),
    Engine(EngineError),
}

impl Orchestrator {
    pub fn new(config: GatewayConfig, parts: Collaborators) -> Self {
        let cooldowns = CooldownTracker::new(
            Duration::from_secs(config.routing.cooldown_base_secs),
            Duration::from_secs(config.routing.cooldown_max_secs),
        );
        let sessions = SessionRegistry::new(
            parts.store,
            Duration::from_secs(config.sessions.idle_ttl_secs),
            config.sessions.capacity,
        );
        let dispatcher = ToolDispatcher::new(parts.tools, parts.audit.clone(), config.tools.clone());
        Self {
            classifier: Classifier::new(config.classifier.clone()),
            selector: ModelSelector::new(config.routing.clone()),
            compactor: ContextCompactor::new(config.compaction.clone(), parts.summarizer),
            cooldowns,
            credentials: parts.credentials,
            provider: parts.provider,
            dispatcher,
            sessions,
            audit: parts.audit,
            ledger: parts.ledger,
            gate: RequestGate::new(),
            config,
        }
    }

    pub fn config(&self) -> &GatewayConfig {
        &self.config
    }

    pub fn credentials(&self) -> &Credentials {
        &self.credentials
    }

    pub fn ledger(&self) -> Option<&Arc<AuditLedger>> {
        self.ledger.as_ref()
    }

    pub fn sessions(&self) -> &SessionRegistry {
        &self.sessions
    }

    /// Run one user turn. The turn executes on its own task so a panic
    /// inside it becomes an error reply instead of taking down the caller.
    pub async fn handle_turn(self: &Arc<Self>, request: TurnRequest) -> TurnReply {
        let Some(permit) = self.gate.enter() else {
            return self.failed(&request.session_id, EngineError::ShuttingDown, TurnReply::default(), "");
        };

        let engine = self.clone();
        let session_id = request.session_id.clone();
        let handle = tokio::spawn(async move {
            let _permit = permit;
            engine.run_turn(request).await
        });

        match handle.await {
            Ok(reply) => reply,
            Err(join_err) => {
                error!("Turn task for session {} failed: {}", session_id, join_err);
                self.failed(
                    &session_id,
                    EngineError::Internal(join_err.to_string()),
                    TurnReply::default(),
                    "",
                )
            }
        }
    }

    async fn run_turn(self: Arc<Self>, request: TurnRequest) -> TurnReply {
        let _timer = MetricTimer::new("turn_duration");
        let entry = match self
            .sessions
            .get_or_load(&request.session_id, request.user_id.as_deref())
            .await
        {
            Ok(entry) => entry,
            Err(e) => {
                return self.failed(
                    &request.session_id,
                    EngineError::Session(e.to_string()),
                    TurnReply::default(),
                    "",
                )
            }
        };

        let generation = entry.request_abort();
        let access = {
            let _wait = MetricTimer::new("lock_wait_duration");
            entry
                .acquire_turn(Duration::from_secs(self.config.orchestration.lock_wait_secs))
                .await
        };
        if !access.is_locked() {
            self.audit.log(
                AuditEntry::new("turn_lock_timeout", "turn proceeding without session lock")
                    .session(&request.session_id),
            );
        }

        let mut turn = Turn::new(entry.snapshot(), request.events.clone());
        let outcome = self.drive(&entry, generation, &request.message, &mut turn).await;
        self.write_back(&entry, &mut turn).await;
        drop(access);

        match outcome {
            Ok(text) => {
                info!(
                    "Turn for session {} finalized after {} iteration(s) on {}",
                    request.session_id,
                    turn.iterations,
                    turn.model.as_deref().unwrap_or("-")
                );
                self.audit.log(
                    AuditEntry::new("turn_completed", turn.model.clone().unwrap_or_default())
                        .session(&request.session_id)
                        .data(json!({
                            "iterations": turn.iterations,
                            "input_tokens": turn.usage.input,
                            "output_tokens": turn.usage.output,
                        })),
                );
                TurnReply {
                    text,
                    ..turn.reply()
                }
            }
            Err(e) => {
                let partial = turn.streamed.clone();
                self.failed(&request.session_id, e, turn.reply(), &partial)
            }
        }
    }

    async fn drive(
        &self,
        entry: &SessionEntry,
        generation: u64,
        message: &str,
        turn: &mut Turn,
    ) -> Result<String, EngineError> {
        let orchestration = &self.config.orchestration;
        turn.session.drop_ephemeral();
        turn.session.set_system_prompt(&orchestration.system_prompt);

        // Classify
        let classification = self.classifier.classify(message, turn.session.depth());

        // Route
        let plan = self.selector.plan(
            &classification,
            turn.session.flags.model_override.as_deref(),
            &self.credentials,
            &self.cooldowns,
        );
        let tools = self.tool_schemas(&classification);
        let spec = CallSpec {
            plan: &plan,
            tools: &tools,
            max_tokens: classification.max_output_tokens(),
            thinking: classification.effective_thinking(&turn.session.flags, &self.config.thinking),
        };
        info!(
            "Session {}: intent={} tier={} model={} tools={}",
            turn.session.id,
            classification.intent.as_str(),
            classification.tier.as_u8(),
            plan.selection.model,
            tools.len()
        );
        self.audit.log(
            AuditEntry::new("route", plan.selection.model.clone())
                .session(turn.session.id.clone())
                .data(json!({
                    "intent": classification.intent.as_str(),
                    "tier": classification.tier.as_u8(),
                    "manual": plan.selection.manual,
                    "candidates": plan.candidates,
                })),
        );
        turn.warning = plan.selection.warning.clone();
        turn.classification = Some(classification);

        turn.session.push(Message::user(message));
        self.compact(turn).await;

        let mut guard = ToolGuard::from_limits(self.dispatcher.limits());
        let mut continuations = 0;
        let mut reply = String::new();

        for iteration in 0..orchestration.max_iterations {
            if entry.is_aborted(generation) {
                info!("Turn for session {} aborted before iteration {}", turn.session.id, iteration + 1);
                return Err(EngineError::Aborted);
            }
            if iteration > 0 && turn.session.messages.len() > orchestration.mid_loop_compact_messages {
                self.compact(turn).await;
            }
            turn.iterations = iteration + 1;

            // Call
            let (model, response) = self.call_recovering(turn, &spec).await?;
            turn.usage.add(response.usage);
            turn.model = Some(model);
            if !response.content.is_empty() {
                if !turn.streamed.is_empty() {
                    turn.streamed.push('\n');
                }
                turn.streamed.push_str(&response.content);
            }

            if response.tool_calls.is_empty() {
                reply.push_str(&response.content);
                if response.stop_reason() == StopReason::MaxTokens
                    && continuations < orchestration.max_continuations
                {
                    continuations += 1;
                    info!(
                        "Reply for session {} hit the token cap, continuing ({}/{})",
                        turn.session.id, continuations, orchestration.max_continuations
                    );
                    turn.session.push(Message::assistant(response.content).into_ephemeral());
                    turn.session.push(Message::user(CONTINUE_PROMPT).into_ephemeral());
                    continue;
                }
                // Finalize
                turn.session.push(Message::assistant(reply.clone()));
                return Ok(reply);
            }

            // ToolRound
            reply.clear();
            guard.check_calls(&response.tool_calls).map_err(guard_error)?;
            turn.session.push(Message::assistant_with_calls(
                &response.content,
                &response.tool_calls,
            ));
            let results = self.run_tools(turn, &response.tool_calls).await;
            turn.session.push(Message::tool_results(&results));
            guard.record_results(&results).map_err(guard_error)?;
        }

        Err(EngineError::MaxIterations(orchestration.max_iterations))
    }

    /// Schemas for the intent's tools that the registry actually has.
    fn tool_schemas(&self, classification: &Classification) -> Vec<Value> {
        let registry = self.dispatcher.registry();
        classification
            .tools()
            .iter()
            .filter_map(|name| registry.schema(name))
            .collect()
    }

    async fn run_tools(&self, turn: &Turn, calls: &[ToolCall]) -> Vec<ToolResult> {
        let progress = turn.events.as_ref().map(progress_bridge);
        self.dispatcher
            .run_batch(calls, Some(&turn.session.id), progress.as_ref())
            .await
    }

    async fn compact(&self, turn: &mut Turn) {
        let messages = std::mem::take(&mut turn.session.messages);
        let (compacted, report) = self.compactor.compact_with_report(messages).await;
        turn.session.messages = compacted;
        self.report_compaction(turn, &report);
    }

    fn report_compaction(&self, turn: &Turn, report: &CompactionReport) {
        if report.stage == CompactionStage::Unchanged {
            return;
        }
        info!(
            "Compacted session {} at stage {}: {} -> {} chars",
            turn.session.id,
            report.stage.as_str(),
            report.before_chars,
            report.after_chars
        );
        self.audit.log(
            AuditEntry::new("compaction", report.stage.as_str())
                .session(turn.session.id.clone())
                .data(json!({
                    "before_chars": report.before_chars,
                    "after_chars": report.after_chars,
                    "before_messages": report.before_messages,
                    "after_messages": report.after_messages,
                    "summary_rejected": report.summary_rejected,
                })),
        );
        turn.emit(TurnEvent::Compacted {
            stage: report.stage,
            before_chars: report.before_chars,
            after_chars: report.after_chars,
        });
    }

    /// Call with failover, shrinking the context step by step when the
    /// provider rejects it as too long: forced compaction first, then the
    /// configured hard trims.
    async fn call_recovering(
        &self,
        turn: &mut Turn,
        spec: &CallSpec<'_>,
    ) -> Result<(String, ProviderResponse), EngineError> {
        let trims = &self.config.orchestration.overflow_trims;
        let mut step = 0;
        loop {
            let detail = match self.call_with_failover(turn, spec).await {
                Ok(done) => return Ok(done),
                Err(CallFailure::Engine(e)) => return Err(e),
                Err(CallFailure::Overflow(detail)) => detail,
            };

            let before = turn.session.messages.len();
            if step == 0 {
                let messages = std::mem::take(&mut turn.session.messages);
                let (compacted, report) = self.compactor.compact_forced(messages).await;
                turn.session.messages = compacted;
                self.report_compaction(turn, &report);
            } else if let Some(&keep) = trims.get(step - 1) {
                let messages = std::mem::take(&mut turn.session.messages);
                turn.session.messages = keep_recent(messages, keep);
            } else {
                warn!("Context for session {} still too long after every shrink step", turn.session.id);
                return Err(EngineError::TokenOverflow);
            }
            step += 1;

            warn!(
                "Context overflow for session {} ({}), shrank {} -> {} messages",
                turn.session.id,
                detail,
                before,
                turn.session.messages.len()
            );
            self.audit.log(
                AuditEntry::new("context_overflow", detail)
                    .session(turn.session.id.clone())
                    .data(json!({"step": step, "messages": turn.session.messages.len()})),
            );
        }
    }

    /// Healthy candidates in plan order, then any that went into cooldown
    /// since the plan was made.
    fn ordered_candidates(&self, plan: &RoutePlan) -> Vec<String> {
        let (mut healthy, cooling): (Vec<String>, Vec<String>) = plan
            .candidates
            .iter()
            .cloned()
            .partition(|model| !self.cooldowns.is_cooling(model));
        healthy.extend(cooling);
        healthy
    }

    async fn call_with_failover(
        &self,
        turn: &mut Turn,
        spec: &CallSpec<'_>,
    ) -> Result<(String, ProviderResponse), CallFailure> {
        let candidates = self.ordered_candidates(spec.plan);
        let mut auth_failures = 0;
        let mut last_error: Option<ProviderError> = None;

        for (idx, model) in candidates.iter().enumerate() {
            let request = ProviderRequest {
                model: model.clone(),
                messages: turn.session.messages.clone(),
                tools: spec.tools.to_vec(),
                max_tokens: spec.max_tokens,
                thinking: spec.thinking,
            };
            let result = {
                let _timer = MetricTimer::new("llm_request_latency");
                let tokens = turn.events.as_ref().map(token_bridge);
                self.provider.call(&request, tokens.as_ref()).await
            };

            match result {
                Ok(response) => {
                    self.cooldowns.record_success(model);
                    self.record_call(turn, model, &response);
                    return Ok((model.clone(), response));
                }
                Err(e) if e.is_overflow() => return Err(CallFailure::Overflow(e.to_string())),
                Err(e) => {
                    if e.is_hard_failure() {
                        let window = self.cooldowns.record_failure(model);
                        warn!("Model {} failed ({}), cooling down for {:?}", model, e, window);
                    } else {
                        warn!("Model {} failed: {}", model, e);
                    }
                    if matches!(e, ProviderError::Auth(_)) {
                        auth_failures += 1;
                    }
                    self.audit.log(
                        AuditEntry::new("provider_failure", format!("{}: {}", model, e))
                            .session(turn.session.id.clone())
                            .data(json!({"model": model, "transient": e.is_transient()})),
                    );
                    if let Some(next) = candidates.get(idx + 1) {
                        info!("Failing over from {} to {}", model, next);
                        increment_failover(model);
                        self.audit.log(
                            AuditEntry::new("failover", format!("{} -> {}", model, next))
                                .session(turn.session.id.clone()),
                        );
                        turn.emit(TurnEvent::Failover {
                            from: model.clone(),
                            to: next.clone(),
                            reason: e.to_string(),
                        });
                    }
                    last_error = Some(e);
                }
            }
        }

        let message = last_error
            .map(|e| e.to_string())
            .unwrap_or_else(|| "no candidate models".to_string());
        let error = if auth_failures > 0 && auth_failures == candidates.len() {
            let provider = candidates
                .first()
                .and_then(|m| Provider::of_model(m))
                .map(|p| p.as_str().to_string())
                .unwrap_or_default();
            EngineError::Auth { provider, message }
        } else {
            EngineError::ProvidersExhausted(message)
        };
        Err(CallFailure::Engine(error))
    }

    fn record_call(&self, turn: &Turn, model: &str, response: &ProviderResponse) {
        let cost = self
            .ledger
            .as_ref()
            .map(|ledger| ledger.record_usage(Some(&turn.session.id), model, response.usage))
            .unwrap_or(0.0);
        debug!(
            "{} used {} in / {} out tokens (${:.6})",
            model, response.usage.input, response.usage.output, cost
        );
        self.audit.log(
            AuditEntry::new("llm_call", model)
                .session(turn.session.id.clone())
                .data(json!({
                    "input_tokens": response.usage.input,
                    "output_tokens": response.usage.output,
                    "tool_calls": response.tool_calls.len(),
                    "cost_usd": cost,
                })),
        );
    }

    /// Store the turn's history on the live session. Operator flags set
    /// while the turn ran are kept; only the routing outcome is recorded.
    async fn write_back(&self, entry: &SessionEntry, turn: &mut Turn) {
        turn.session.drop_ephemeral();
        let messages = std::mem::take(&mut turn.session.messages);
        let model = turn.model.clone();
        let tier = turn.classification.as_ref().map(|c| c.tier);
        let snapshot = entry.update(|live| {
            live.messages = messages;
            if model.is_some() {
                live.flags.last_model = model;
            }
            if tier.is_some() {
                live.flags.last_complexity = tier;
            }
            live.updated_at = Utc::now();
            live.clone()
        });
        if let Err(e) = self.sessions.persist(&snapshot).await {
            warn!("Failed to persist session {}: {}", snapshot.id, e);
        }
    }

    fn failed(&self, session_id: &str, error: EngineError, mut reply: TurnReply, partial: &str) -> TurnReply {
        let kind = error.kind();
        let friendly = friendly_message(kind, self.config.orchestration.locale);
        reply.text = match &error {
            EngineError::Aborted if partial.is_empty() => format!("{} {}", ABORT_MARKER, friendly),
            EngineError::Aborted => format!("{}\n{}", partial, ABORT_MARKER),
            EngineError::LoopDetected(detail) | EngineError::CircuitOpen(detail) => {
                format!("{}\n\n{}", friendly, detail)
            }
            _ => friendly.to_string(),
        };
        reply.error = Some(kind);

        match kind {
            ErrorKind::Aborted
            | ErrorKind::LoopDetected
            | ErrorKind::CircuitOpen
            | ErrorKind::MaxIterations
            | ErrorKind::ShuttingDown => {
                warn!("Turn for session {} stopped: {}", session_id, error);
                increment_aborted_turn(kind.as_str());
            }
            _ => error!("Turn for session {} failed: {}", session_id, error),
        }
        self.audit.log(
            AuditEntry::new("turn_failed", error.to_string())
                .session(session_id)
                .data(json!({"kind": kind.as_str()})),
        );
        reply
    }

    // Operator controls

    pub fn cooldowns(&self) -> Vec<CooldownInfo> {
        self.cooldowns.snapshot()
    }

    pub fn reset_cooldown(&self, model: &str) -> bool {
        let cleared = self.cooldowns.reset(model);
        if cleared {
            info!("Cooldown for {} reset by operator", model);
            self.audit.log(AuditEntry::new("cooldown_reset", model));
        }
        cleared
    }

    pub fn reset_all_cooldowns(&self) -> usize {
        let cleared = self.cooldowns.reset_all();
        info!("Operator reset {} cooldown(s)", cleared);
        self.audit.log(AuditEntry::new("cooldown_reset", format!("all ({})", cleared)));
        cleared
    }

    /// Signal the session's in-flight turn to stop at its next iteration
    /// boundary. False when the session is not live.
    pub fn abort(&self, session_id: &str) -> bool {
        match self.sessions.get(session_id) {
            Some(entry) => {
                entry.request_abort();
                info!("Abort requested for session {}", session_id);
                self.audit
                    .log(AuditEntry::new("abort_requested", "operator").session(session_id));
                true
            }
            None => false,
        }
    }

    /// Pin a model for the session, or return to automatic routing with
    /// `auto`. Returns the override now in effect.
    pub async fn set_model_override(&self, session_id: &str, model: &str) -> Result<Option<String>, EngineError> {
        let model = model.trim();
        let value = if model.is_empty() || model.eq_ignore_ascii_case("auto") {
            None
        } else {
            Some(model.to_string())
        };
        let applied = value.clone();
        self.update_flags(session_id, "model_override", move |flags| flags.model_override = value)
            .await?;
        Ok(applied)
    }

    pub async fn set_thinking(&self, session_id: &str, setting: ThinkingSetting) -> Result<(), EngineError> {
        self.update_flags(session_id, "thinking", move |flags| match setting {
            ThinkingSetting::Off => {
                flags.thinking_enabled = false;
                flags.thinking_level = None;
            }
            ThinkingSetting::Auto => {
                flags.thinking_enabled = true;
                flags.thinking_level = None;
            }
            ThinkingSetting::Level(level) => {
                flags.thinking_enabled = true;
                flags.thinking_level = Some(level);
            }
        })
        .await
    }

    pub async fn session_flags(&self, session_id: &str) -> Result<SessionFlags, EngineError> {
        let entry = self
            .sessions
            .get_or_load(session_id, None)
            .await
            .map_err(|e| EngineError::Session(e.to_string()))?;
        Ok(entry.snapshot().flags)
    }

    async fn update_flags<F>(&self, session_id: &str, what: &str, f: F) -> Result<(), EngineError>
    where
        F: FnOnce(&mut SessionFlags),
    {
        let entry = self
            .sessions
            .get_or_load(session_id, None)
            .await
            .map_err(|e| EngineError::Session(e.to_string()))?;
        let snapshot = entry.update(|live| {
            f(&mut live.flags);
            live.clone()
        });
        let data = serde_json::to_value(&snapshot.flags).unwrap_or(Value::Null);
        self.audit
            .log(AuditEntry::new("session_flags", what).session(session_id).data(data));
        self.sessions
            .persist(&snapshot)
            .await
            .map_err(|e| EngineError::Session(e.to_string()))
    }

    pub fn evict_idle_sessions(&self) -> usize {
        self.sessions.evict_idle()
    }

    /// Periodically evict idle sessions until the orchestrator is dropped.
    pub fn spawn_session_sweeper(self: &Arc<Self>, every: Duration) -> JoinHandle<()> {
        let weak: Weak<Self> = Arc::downgrade(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(every);
            ticker.tick().await;
            loop {
                ticker.tick().await;
                match weak.upgrade() {
                    Some(engine) => {
                        engine.evict_idle_sessions();
                    }
                    None => break,
                }
            }
        })
    }

    /// Stop admitting turns, wait for in-flight ones, then flush the ledger.
    pub async fn shutdown(&self) -> bool {
        let drained = self
            .gate
            .shutdown(Duration::from_secs(self.config.orchestration.shutdown_drain_secs))
            .await;
        if let Some(ledger) = &self.ledger {
            if let Err(e) = ledger.shutdown() {
                error!("Final ledger flush failed: {}", e);
            }
        }
        drained
    }
}

fn guard_error(trip: GuardTrip) -> EngineError {
    match trip {
        GuardTrip::CircuitOpen { summary } => EngineError::CircuitOpen(summary),
        loop_trip @ GuardTrip::LoopDetected { .. } => EngineError::LoopDetected(loop_trip.message()),
    }
}

/// Head system message plus the last `keep` others, never starting on an
/// orphaned tool result.
fn keep_recent(mut messages: Vec<Message>, keep: usize) -> Vec<Message> {
    let head = if messages.first().is_some_and(|m| m.role == Role::System) {
        Some(messages.remove(0))
    } else {
        None
    };
    let mut start = messages.len().saturating_sub(keep);
    while start < messages.len() && messages[start].role == Role::Tool {
        start += 1;
    }
    let mut out = Vec::with_capacity(messages.len() - start + 1);
    out.extend(head);
    out.extend(messages.drain(start..));
    out
}

fn token_bridge(events: &EventSender) -> TokenSender {
    let (tx, mut rx) = mpsc::unbounded_channel::<String>();
    let events = events.clone();
    tokio::spawn(async move {
        while let Some(token) = rx.recv().await {
            if events.send(TurnEvent::Token(token)).is_err() {
                break;
            }
        }
    });
    tx
}

fn progress_bridge(events: &EventSender) -> mpsc::UnboundedSender<ToolEvent> {
    let (tx, mut rx) = mpsc::unbounded_channel::<ToolEvent>();
    let events = events.clone();
    tokio::spawn(async move {
        while let Some(event) = rx.recv().await {
            if events.send(TurnEvent::from(event)).is_err() {
                break;
            }
        }
    });
    tx
}
