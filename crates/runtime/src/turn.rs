//! Request, reply and progress types for one turn.

use std::time::Duration;
use switchyard_core::{Classification, ErrorKind, ThinkingLevel, Usage};
use switchyard_memory::CompactionStage;
use switchyard_tools::ToolEvent;
use tokio::sync::mpsc;

/// Appended to the partial text of a turn stopped by an abort signal.
pub const ABORT_MARKER: &str = "[aborted]";

/// Progress delivered to the caller while a turn runs.
#[derive(Debug, Clone, PartialEq)]
pub enum TurnEvent {
    Token(String),
    ToolStarted {
        call_id: String,
        name: String,
    },
    ToolFinished {
        call_id: String,
        name: String,
        success: bool,
        elapsed: Duration,
    },
    Compacted {
        stage: CompactionStage,
        before_chars: usize,
        after_chars: usize,
    },
    Failover {
        from: String,
        to: String,
        reason: String,
    },
}

impl From<ToolEvent> for TurnEvent {
    fn from(event: ToolEvent) -> Self {
        match event {
            ToolEvent::Started { call_id, name } => TurnEvent::ToolStarted { call_id, name },
            ToolEvent::Finished {
                call_id,
                name,
                success,
                elapsed,
            } => TurnEvent::ToolFinished {
                call_id,
                name,
                success,
                elapsed,
            },
        }
    }
}

pub type EventSender = mpsc::UnboundedSender<TurnEvent>;

#[derive(Debug, Clone)]
pub struct TurnRequest {
    pub session_id: String,
    pub user_id: Option<String>,
    pub message: String,
    pub events: Option<EventSender>,
}

impl TurnRequest {
    pub fn new(session_id: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            session_id: session_id.into(),
            user_id: None,
            message: message.into(),
            events: None,
        }
    }

    pub fn user(mut self, user_id: impl Into<String>) -> Self {
        self.user_id = Some(user_id.into());
        self
    }

    pub fn events(mut self, events: EventSender) -> Self {
        self.events = Some(events);
        self
    }
}

/// What the caller gets back. Failures carry a short localized text and
/// the error kind; they are never raised.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TurnReply {
    pub text: String,
    pub model: Option<String>,
    pub classification: Option<Classification>,
    pub usage: Usage,
    pub iterations: usize,
    pub error: Option<ErrorKind>,
    /// Routing warning, e.g. when no credentialed model was found.
    pub warning: Option<String>,
}

impl TurnReply {
    pub fn is_error(&self) -> bool {
        self.error.is_some()
    }
}

/// Operator switch for a session's reasoning budget.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ThinkingSetting {
    Off,
    /// Let the classifier decide.
    Auto,
    Level(ThinkingLevel),
}

impl ThinkingSetting {
    pub fn parse(value: &str) -> Option<ThinkingSetting> {
        match value.trim().to_ascii_lowercase().as_str() {
            "off" | "none" => Some(ThinkingSetting::Off),
            "on" | "auto" => Some(ThinkingSetting::Auto),
            other => ThinkingLevel::parse(other).map(ThinkingSetting::Level),
        }
    }
}
