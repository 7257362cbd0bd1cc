//! Staged context compaction for managing history size.
//!
//! Two hard caps run first and unconditionally. Below the threshold nothing
//! else happens; above it the stages run in order and the first one that
//! brings the history within budget wins. The system message at the head is
//! never dropped and the most recent turns always survive.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use switchyard_core::{
    merge_summary, split_summary, total_chars, ContentBlock, Message, MessageContent, Role,
};
use thiserror::Error;
use tracing::{debug, info, warn};

/// Instruction given to the summarizer for stage 5.
pub const SUMMARY_INSTRUCTION: &str = "You compress earlier parts of a conversation. \
Write a summary of 5 to 15 sentences that preserves decisions made, progress so far, \
facts learned, the user's stated preferences and any pending items or open questions. \
Write the summary directly with no preamble or closing remarks.";

pub const IMAGE_PLACEHOLDER: &str = "[image omitted]";
pub const TRUNCATION_MARKER: &str = "...[truncated]";

#[derive(Debug, Error)]
#[error("Summarization failed: {0}")]
pub struct SummaryError(pub String);

/// Produces the stage-5 summary.
#[async_trait]
pub trait Summarizer: Send + Sync {
    async fn summarize(&self, messages: &[Message]) -> Result<String, SummaryError>;
}

#[async_trait]
impl<S: Summarizer + ?Sized> Summarizer for Arc<S> {
    async fn summarize(&self, messages: &[Message]) -> Result<String, SummaryError> {
        (**self).summarize(messages).await
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CompactionConfig {
    pub threshold_chars: usize,
    pub max_messages: usize,
    pub max_total_chars: usize,
    /// Non-system messages always kept verbatim.
    pub recent_keep: usize,
    pub tool_truncate: usize,
    pub old_assistant_truncate: usize,
    pub old_user_truncate: usize,
    pub summary_window: usize,
    pub min_summary_chars: usize,
}

impl Default for CompactionConfig {
    fn default() -> Self {
        Self {
            threshold_chars: 60_000,
            max_messages: 100,
            max_total_chars: 500_000,
            recent_keep: 10,
            tool_truncate: 500,
            old_assistant_truncate: 800,
            old_user_truncate: 500,
            summary_window: 30,
            min_summary_chars: 20,
        }
    }
}

/// Deepest step a compaction pass needed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CompactionStage {
    Unchanged,
    HardCap,
    StripMedia,
    TruncateTools,
    DropOldToolTurns,
    TruncateOld,
    Summarize,
}

impl CompactionStage {
    pub fn as_str(self) -> &'static str {
        match self {
            CompactionStage::Unchanged => "unchanged",
            CompactionStage::HardCap => "hard_cap",
            CompactionStage::StripMedia => "strip_media",
            CompactionStage::TruncateTools => "truncate_tools",
            CompactionStage::DropOldToolTurns => "drop_old_tool_turns",
            CompactionStage::TruncateOld => "truncate_old",
            CompactionStage::Summarize => "summarize",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompactionReport {
    pub stage: CompactionStage,
    pub before_chars: usize,
    pub after_chars: usize,
    pub before_messages: usize,
    pub after_messages: usize,
    /// Stage 5 ran but its summary was discarded.
    pub summary_rejected: bool,
}

pub struct ContextCompactor<S: Summarizer> {
    config: CompactionConfig,
    summarizer: S,
}

/// System head plus the remaining messages, worked on separately.
struct Split {
    head: Option<Message>,
    rest: Vec<Message>,
}

impl Split {
    fn new(mut messages: Vec<Message>) -> Self {
        let head = if messages.first().is_some_and(|m| m.role == Role::System) {
            Some(messages.remove(0))
        } else {
            None
        };
        Self {
            head,
            rest: messages,
        }
    }

    fn chars(&self) -> usize {
        self.head.as_ref().map(Message::char_len).unwrap_or(0) + total_chars(&self.rest)
    }

    fn len(&self) -> usize {
        self.rest.len() + usize::from(self.head.is_some())
    }

    fn into_messages(self) -> Vec<Message> {
        let mut out = Vec::with_capacity(self.rest.len() + 1);
        out.extend(self.head);
        out.extend(self.rest);
        out
    }
}

impl<S: Summarizer> ContextCompactor<S> {
    pub fn new(config: CompactionConfig, summarizer: S) -> Self {
        Self { config, summarizer }
    }

    pub fn config(&self) -> &CompactionConfig {
        &self.config
    }

    /// Compact against the configured threshold.
    pub async fn compact(&self, messages: Vec<Message>) -> Vec<Message> {
        self.compact_with_report(messages).await.0
    }

    pub async fn compact_with_report(&self, messages: Vec<Message>) -> (Vec<Message>, CompactionReport) {
        let target = self.config.threshold_chars;
        self.compact_to(messages, target).await
    }

    /// Compact even below the threshold, aiming for half the current size.
    /// Used to recover from a provider rejecting the context as too long.
    pub async fn compact_forced(&self, messages: Vec<Message>) -> (Vec<Message>, CompactionReport) {
        let target = (total_chars(&messages) / 2).min(self.config.threshold_chars);
        self.compact_to(messages, target).await
    }

    async fn compact_to(&self, messages: Vec<Message>, target: usize) -> (Vec<Message>, CompactionReport) {
        let before_chars = total_chars(&messages);
        let before_messages = messages.len();
        let mut split = Split::new(messages);
        let mut stage = CompactionStage::Unchanged;
        let mut summary_rejected = false;

        if self.apply_caps(&mut split) {
            stage = CompactionStage::HardCap;
        }

        if split.chars() <= target {
            debug!("History at {} chars, within budget {}", split.chars(), target);
            return self.finish(split, stage, before_chars, before_messages, summary_rejected);
        }

        info!(
            "History at {} chars exceeds budget {}, compacting",
            split.chars(),
            target
        );

        strip_media(&mut split.rest);
        stage = CompactionStage::StripMedia;
        if split.chars() <= target {
            return self.finish(split, stage, before_chars, before_messages, summary_rejected);
        }

        truncate_tool_output(&mut split.rest, self.config.tool_truncate);
        stage = CompactionStage::TruncateTools;
        if split.chars() <= target {
            return self.finish(split, stage, before_chars, before_messages, summary_rejected);
        }

        let recent_start = recent_start(&split.rest, self.config.recent_keep);
        let recent = split.rest.split_off(recent_start);
        let mut old = std::mem::take(&mut split.rest);

        drop_tool_turns(&mut old);
        stage = CompactionStage::DropOldToolTurns;
        split.rest = old.iter().cloned().chain(recent.iter().cloned()).collect();
        if split.chars() <= target || old.is_empty() {
            return self.finish(split, stage, before_chars, before_messages, summary_rejected);
        }

        truncate_old(&mut old, &self.config);
        stage = CompactionStage::TruncateOld;
        split.rest = old.iter().cloned().chain(recent.iter().cloned()).collect();
        if split.chars() <= target {
            return self.finish(split, stage, before_chars, before_messages, summary_rejected);
        }

        match self.summarize_old(split.head.as_ref(), &old).await {
            Some(head) => {
                stage = CompactionStage::Summarize;
                split.head = Some(head);
                split.rest = recent;
            }
            None => summary_rejected = true,
        }
        self.finish(split, stage, before_chars, before_messages, summary_rejected)
    }

    /// Returns true when either cap removed messages.
    fn apply_caps(&self, split: &mut Split) -> bool {
        let mut changed = false;

        let allowed = self
            .config
            .max_messages
            .saturating_sub(usize::from(split.head.is_some()))
            .max(1);
        if split.rest.len() > allowed {
            let cut = skip_leading_tool_turns(&split.rest, split.rest.len() - allowed);
            warn!("Message cap hit, dropping {} oldest messages", cut);
            split.rest.drain(..cut);
            changed = true;
        }

        if split.chars() > self.config.max_total_chars {
            let head_chars = split.head.as_ref().map(Message::char_len).unwrap_or(0);
            let budget = self.config.max_total_chars.saturating_sub(head_chars);
            let mut kept_chars = 0usize;
            let mut cut = split.rest.len();
            while cut > 0 {
                let next = split.rest[cut - 1].char_len();
                if kept_chars + next > budget && cut < split.rest.len() {
                    break;
                }
                kept_chars += next;
                cut -= 1;
            }
            let cut = skip_leading_tool_turns(&split.rest, cut);
            if cut > 0 {
                warn!("Character cap hit, dropping {} oldest messages", cut);
                split.rest.drain(..cut);
                changed = true;
            }
        }

        // The newest message is always kept, so it may be over the cap on its own.
        if split.chars() > self.config.max_total_chars {
            let newest_chars = split.rest.last().map(Message::char_len).unwrap_or(0);
            let room = self
                .config
                .max_total_chars
                .saturating_sub(split.chars() - newest_chars);
            if let Some(newest) = split.rest.last_mut() {
                warn!(
                    "Newest message has {} chars, truncating it to {}",
                    newest_chars, room
                );
                shrink_message(newest, room);
                changed = true;
            }
        }
        changed
    }

    /// Summarize the old turns into a new head, or None when the summary
    /// fails or is rejected.
    async fn summarize_old(&self, head: Option<&Message>, old: &[Message]) -> Option<Message> {
        let head_text = head.map(Message::text).unwrap_or_default();
        let (prompt, previous) = split_summary(&head_text);

        let window_start = old.len().saturating_sub(self.config.summary_window);
        let mut input = Vec::with_capacity(old.len() - window_start + 1);
        if let Some(previous) = previous {
            input.push(Message::system(previous.to_string()));
        }
        input.extend_from_slice(&old[window_start..]);

        let replaced = total_chars(old) + previous.map(|p| p.chars().count()).unwrap_or(0);
        let summary = match self.summarizer.summarize(&input).await {
            Ok(summary) => summary.trim().to_string(),
            Err(e) => {
                warn!("{}, keeping truncated history", e);
                return None;
            }
        };

        let length = summary.chars().count();
        if length < self.config.min_summary_chars || length > replaced {
            warn!(
                "Rejected summary of {} chars (replacing {} chars)",
                length, replaced
            );
            return None;
        }
        info!("Summarized {} old messages into {} chars", old.len(), length);
        Some(Message::system(merge_summary(prompt, &summary)))
    }

    fn finish(
        &self,
        split: Split,
        stage: CompactionStage,
        before_chars: usize,
        before_messages: usize,
        summary_rejected: bool,
    ) -> (Vec<Message>, CompactionReport) {
        let after_chars = split.chars();
        let after_messages = split.len();
        if stage != CompactionStage::Unchanged {
            metrics::counter!("compaction_count", 1, "stage" => stage.as_str());
            info!(
                "Compaction stage {}: {} -> {} chars, {} -> {} messages",
                stage.as_str(),
                before_chars,
                after_chars,
                before_messages,
                after_messages
            );
        }
        (
            split.into_messages(),
            CompactionReport {
                stage,
                before_chars,
                after_chars,
                before_messages,
                after_messages,
                summary_rejected,
            },
        )
    }
}

/// Move a cut point forward so the kept part does not open with tool
/// results whose call was dropped. Always keeps the last message.
fn skip_leading_tool_turns(rest: &[Message], mut cut: usize) -> usize {
    while cut + 1 < rest.len() && rest[cut].is_tool_turn() {
        cut += 1;
    }
    cut
}

/// Start of the recent window, extended backward over tool turns so each
/// kept result still has its call.
fn recent_start(rest: &[Message], keep: usize) -> usize {
    let mut start = rest.len().saturating_sub(keep);
    while start > 0 && start < rest.len() && rest[start].is_tool_turn() {
        start -= 1;
    }
    start
}

fn truncate_chars(text: &str, max: usize) -> String {
    if text.chars().count() <= max {
        return text.to_string();
    }
    let head: String = text.chars().take(max).collect();
    format!("{}{}", head, TRUNCATION_MARKER)
}

/// Cut text and tool output until the message weighs at most `max`,
/// truncation markers included. Images become placeholders.
fn shrink_message(message: &mut Message, max: usize) {
    let marker = TRUNCATION_MARKER.chars().count();
    match &mut message.content {
        MessageContent::Text(text) => *text = truncate_chars(text, max.saturating_sub(marker)),
        MessageContent::Blocks(blocks) => {
            let mut left = max;
            for block in blocks.iter_mut() {
                if matches!(block, ContentBlock::Image { .. }) {
                    *block = ContentBlock::text(IMAGE_PLACEHOLDER);
                }
                match block {
                    ContentBlock::Text { text: body } | ContentBlock::ToolResult { content: body, .. } => {
                        if body.chars().count() > left {
                            *body = truncate_chars(body, left.saturating_sub(marker));
                        }
                    }
                    _ => {}
                }
                left = left.saturating_sub(block.char_len());
            }
        }
    }
}

fn strip_media(messages: &mut [Message]) {
    for message in messages.iter_mut().filter(|m| m.role == Role::User) {
        if let MessageContent::Blocks(blocks) = &mut message.content {
            for block in blocks.iter_mut() {
                if matches!(block, ContentBlock::Image { .. }) {
                    *block = ContentBlock::text(IMAGE_PLACEHOLDER);
                }
            }
        }
    }
}

fn truncate_tool_output(messages: &mut [Message], max: usize) {
    for message in messages.iter_mut() {
        let is_tool_role = message.role == Role::Tool;
        match &mut message.content {
            MessageContent::Text(text) if is_tool_role => {
                *text = truncate_chars(text, max);
            }
            MessageContent::Text(_) => {}
            MessageContent::Blocks(blocks) => {
                for block in blocks.iter_mut() {
                    match block {
                        ContentBlock::ToolResult { content, .. } => {
                            *content = truncate_chars(content, max);
                        }
                        ContentBlock::Text { text } if is_tool_role => {
                            *text = truncate_chars(text, max);
                        }
                        _ => {}
                    }
                }
            }
        }
    }
}

/// Keep only user and assistant prose in the old part.
fn drop_tool_turns(old: &mut Vec<Message>) {
    old.retain(|m| !m.is_tool_turn());
    for message in old.iter_mut() {
        if message.has_tool_calls() {
            *message = Message::new(message.role, message.text());
        }
    }
    old.retain(|m| m.role == Role::System || !m.text().trim().is_empty());
}

fn truncate_old(old: &mut [Message], config: &CompactionConfig) {
    for message in old.iter_mut() {
        let max = match message.role {
            Role::Assistant => config.old_assistant_truncate,
            Role::User => config.old_user_truncate,
            _ => continue,
        };
        if message.char_len() > max {
            *message = Message::new(message.role, truncate_chars(&message.text(), max));
        }
    }
}
