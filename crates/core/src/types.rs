//! Core type definitions shared by every switchyard crate.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::time::Duration;

/// Schema version written into persisted session headers.
pub const SCHEMA_VERSION: u32 = 1;

/// Marker separating the system prompt from a compaction summary carried in
/// the same system message.
pub const SUMMARY_HEADER: &str = "[Earlier conversation summary]";

/// Message role in conversation.
#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
    Tool,
}

/// Coarse complexity bucket that decides which cost class handles a turn.
#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[serde(rename_all = "lowercase")]
pub enum Tier {
    Simple = 1,
    Moderate = 2,
    Complex = 3,
}

impl Tier {
    pub fn as_u8(self) -> u8 {
        self as u8
    }

    pub fn from_u8(value: u8) -> Tier {
        match value {
            0 | 1 => Tier::Simple,
            2 => Tier::Moderate,
            _ => Tier::Complex,
        }
    }
}

/// Explicit reasoning budget a session can pin.
#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum ThinkingLevel {
    Low,
    Medium,
    High,
    XHigh,
}

impl ThinkingLevel {
    pub fn parse(value: &str) -> Option<ThinkingLevel> {
        match value.trim().to_ascii_lowercase().as_str() {
            "low" => Some(ThinkingLevel::Low),
            "medium" | "med" => Some(ThinkingLevel::Medium),
            "high" => Some(ThinkingLevel::High),
            "xhigh" | "max" => Some(ThinkingLevel::XHigh),
            _ => None,
        }
    }
}

/// A typed content block inside a message.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ContentBlock {
    Text {
        text: String,
    },
    Image {
        media_type: String,
        data: String,
    },
    ToolUse {
        id: String,
        name: String,
        input: Map<String, Value>,
    },
    ToolResult {
        tool_use_id: String,
        content: String,
        #[serde(default)]
        is_error: bool,
    },
}

impl ContentBlock {
    pub fn text(text: impl Into<String>) -> Self {
        ContentBlock::Text { text: text.into() }
    }

    /// Character weight of the block as seen by the compaction budget.
    pub fn char_len(&self) -> usize {
        match self {
            ContentBlock::Text { text } => text.chars().count(),
            ContentBlock::Image { data, .. } => data.len(),
            ContentBlock::ToolUse { name, input, .. } => {
                name.len() + serde_json::to_string(input).map(|s| s.len()).unwrap_or(0)
            }
            ContentBlock::ToolResult { content, .. } => content.chars().count(),
        }
    }
}

/// Message body: plain text or an ordered list of typed blocks.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
#[serde(untagged)]
pub enum MessageContent {
    Text(String),
    Blocks(Vec<ContentBlock>),
}

/// A single message in the conversation.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct Message {
    pub role: Role,
    pub content: MessageContent,
    /// Transient messages (planning prompts, continue instructions) that never
    /// survive past the turn that created them.
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub ephemeral: bool,
}

impl Message {
    pub fn new(role: Role, text: impl Into<String>) -> Self {
        Self {
            role,
            content: MessageContent::Text(text.into()),
            ephemeral: false,
        }
    }

    pub fn with_blocks(role: Role, blocks: Vec<ContentBlock>) -> Self {
        Self {
            role,
            content: MessageContent::Blocks(blocks),
            ephemeral: false,
        }
    }

    pub fn system(text: impl Into<String>) -> Self {
        Self::new(Role::System, text)
    }

    pub fn user(text: impl Into<String>) -> Self {
        Self::new(Role::User, text)
    }

    pub fn assistant(text: impl Into<String>) -> Self {
        Self::new(Role::Assistant, text)
    }

    /// Assistant turn that requests tool calls, optionally with leading text.
    pub fn assistant_with_calls(text: &str, calls: &[ToolCall]) -> Self {
        let mut blocks = Vec::with_capacity(calls.len() + 1);
        if !text.is_empty() {
            blocks.push(ContentBlock::text(text));
        }
        for call in calls {
            blocks.push(ContentBlock::ToolUse {
                id: call.id.clone(),
                name: call.name.clone(),
                input: call.arguments.clone(),
            });
        }
        Self::with_blocks(Role::Assistant, blocks)
    }

    /// Tool turn answering every call of one batch.
    pub fn tool_results(results: &[ToolResult]) -> Self {
        let blocks = results
            .iter()
            .map(|r| ContentBlock::ToolResult {
                tool_use_id: r.call_id.clone(),
                content: r.output.clone(),
                is_error: !r.success,
            })
            .collect();
        Self::with_blocks(Role::Tool, blocks)
    }

    /// Mark the message as transient for the current turn.
    pub fn into_ephemeral(mut self) -> Self {
        self.ephemeral = true;
        self
    }

    /// Concatenated textual content (text blocks and tool results).
    pub fn text(&self) -> String {
        match &self.content {
            MessageContent::Text(text) => text.clone(),
            MessageContent::Blocks(blocks) => blocks
                .iter()
                .filter_map(|b| match b {
                    ContentBlock::Text { text } => Some(text.as_str()),
                    ContentBlock::ToolResult { content, .. } => Some(content.as_str()),
                    _ => None,
                })
                .collect::<Vec<_>>()
                .join("\n"),
        }
    }

    pub fn char_len(&self) -> usize {
        match &self.content {
            MessageContent::Text(text) => text.chars().count(),
            MessageContent::Blocks(blocks) => blocks.iter().map(ContentBlock::char_len).sum(),
        }
    }

    /// Tool calls requested by this message.
    pub fn tool_calls(&self) -> Vec<ToolCall> {
        match &self.content {
            MessageContent::Text(_) => Vec::new(),
            MessageContent::Blocks(blocks) => blocks
                .iter()
                .filter_map(|b| match b {
                    ContentBlock::ToolUse { id, name, input } => Some(ToolCall {
                        id: id.clone(),
                        name: name.clone(),
                        arguments: input.clone(),
                    }),
                    _ => None,
                })
                .collect(),
        }
    }

    pub fn has_tool_calls(&self) -> bool {
        matches!(&self.content, MessageContent::Blocks(blocks)
            if blocks.iter().any(|b| matches!(b, ContentBlock::ToolUse { .. })))
    }

    /// True for tool-role messages and messages carrying tool results.
    pub fn is_tool_turn(&self) -> bool {
        self.role == Role::Tool
            || matches!(&self.content, MessageContent::Blocks(blocks)
                if blocks.iter().any(|b| matches!(b, ContentBlock::ToolResult { .. })))
    }
}

/// A tool invocation requested by the model.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct ToolCall {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub arguments: Map<String, Value>,
}

/// Outcome of exactly one [`ToolCall`].
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct ToolResult {
    pub call_id: String,
    pub name: String,
    pub output: String,
    pub elapsed: Duration,
    pub success: bool,
}

/// Token accounting for one provider call.
#[derive(Debug, Serialize, Deserialize, Clone, Copy, Default, PartialEq, Eq)]
pub struct Usage {
    pub input: u64,
    pub output: u64,
}

impl Usage {
    pub fn add(&mut self, other: Usage) {
        self.input += other.input;
        self.output += other.output;
    }
}

/// Mutable per-session switches.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct SessionFlags {
    #[serde(default = "default_true")]
    pub thinking_enabled: bool,
    #[serde(default)]
    pub thinking_level: Option<ThinkingLevel>,
    #[serde(default)]
    pub model_override: Option<String>,
    #[serde(default)]
    pub last_model: Option<String>,
    #[serde(default)]
    pub last_complexity: Option<Tier>,
}

fn default_true() -> bool {
    true
}

impl Default for SessionFlags {
    fn default() -> Self {
        Self {
            thinking_enabled: true,
            thinking_level: None,
            model_override: None,
            last_model: None,
            last_complexity: None,
        }
    }
}

/// One conversation. Message order is significant and never rearranged.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct Session {
    pub id: String,
    #[serde(default)]
    pub user_id: Option<String>,
    #[serde(default)]
    pub messages: Vec<Message>,
    #[serde(default)]
    pub flags: SessionFlags,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Session {
    pub fn new(id: impl Into<String>, user_id: Option<String>) -> Self {
        let now = Utc::now();
        Self {
            id: id.into(),
            user_id,
            messages: Vec::new(),
            flags: SessionFlags::default(),
            created_at: now,
            updated_at: now,
        }
    }

    pub fn system_message(&self) -> Option<&Message> {
        self.messages.first().filter(|m| m.role == Role::System)
    }

    /// Install a fresh system prompt at the head, replacing any previous one.
    /// A compaction summary carried by the old head survives the replacement.
    pub fn set_system_prompt(&mut self, prompt: &str) {
        let carried = self
            .system_message()
            .and_then(|m| split_summary(&m.text()).1.map(str::to_string));
        let text = match carried {
            Some(summary) => merge_summary(prompt, &summary),
            None => prompt.to_string(),
        };
        if self.system_message().is_some() {
            self.messages[0] = Message::system(text);
        } else {
            self.messages.insert(0, Message::system(text));
        }
    }

    /// Append a message. A system message is routed to the head instead.
    pub fn push(&mut self, message: Message) {
        if message.role == Role::System {
            self.set_system_prompt(&message.text());
        } else {
            self.messages.push(message);
        }
        self.updated_at = Utc::now();
    }

    /// Number of non-system messages.
    pub fn depth(&self) -> usize {
        self.messages.iter().filter(|m| m.role != Role::System).count()
    }

    pub fn total_chars(&self) -> usize {
        total_chars(&self.messages)
    }

    pub fn drop_ephemeral(&mut self) {
        self.messages.retain(|m| !m.ephemeral);
    }
}

pub fn total_chars(messages: &[Message]) -> usize {
    messages.iter().map(Message::char_len).sum()
}

/// Split a system text into its prompt and an optional carried summary.
pub fn split_summary(text: &str) -> (&str, Option<&str>) {
    match text.find(SUMMARY_HEADER) {
        Some(idx) => (
            text[..idx].trim_end(),
            Some(text[idx + SUMMARY_HEADER.len()..].trim()),
        ),
        None => (text, None),
    }
}

pub fn merge_summary(prompt: &str, summary: &str) -> String {
    if prompt.trim().is_empty() {
        format!("{}\n{}", SUMMARY_HEADER, summary)
    } else {
        format!("{}\n\n{}\n{}", prompt.trim_end(), SUMMARY_HEADER, summary)
    }
}
