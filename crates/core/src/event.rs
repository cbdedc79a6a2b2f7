use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A single normalized activity event.
///
/// Events are produced once by the normalizer and never mutated afterwards;
/// downstream stages share them behind `Arc`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Event {
    /// Stream-unique identifier supplied by the source (`id` or `uuid`).
    pub id: String,
    /// Source-supplied timestamp. Arrival order, not this value, drives grouping.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<DateTime<Utc>>,
    #[serde(flatten)]
    pub kind: EventKind,
}

/// Event payload - the closed set of activity kinds.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum EventKind {
    // Conversation
    UserMessage {
        content: String,
    },
    AssistantText {
        content: String,
    },
    Thinking {
        content: String,
    },

    // Tools
    ToolCall {
        tool_use_id: String,
        tool_name: String,
        #[serde(default)]
        input: serde_json::Value,
    },
    ToolResult {
        tool_use_id: String,
        success: bool,
        #[serde(default)]
        output: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        duration_ms: Option<u64>,
    },

    // Session markers
    SessionBoundary,
    SystemNotice {
        content: String,
    },
    Progress {
        step: u64,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        total: Option<u64>,
        #[serde(default)]
        description: String,
    },
    Error {
        message: String,
    },
}

impl Event {
    pub fn new(id: impl Into<String>, timestamp: Option<DateTime<Utc>>, kind: EventKind) -> Self {
        Self {
            id: id.into(),
            timestamp,
            kind,
        }
    }

    /// Short lowercase label for the event kind, used in logs.
    pub fn kind_label(&self) -> &'static str {
        match &self.kind {
            EventKind::UserMessage { .. } => "user_message",
            EventKind::AssistantText { .. } => "assistant_text",
            EventKind::Thinking { .. } => "thinking",
            EventKind::ToolCall { .. } => "tool_call",
            EventKind::ToolResult { .. } => "tool_result",
            EventKind::SessionBoundary => "session_boundary",
            EventKind::SystemNotice { .. } => "system_notice",
            EventKind::Progress { .. } => "progress",
            EventKind::Error { .. } => "error",
        }
    }

    /// The call-site id for tool calls and tool results.
    pub fn tool_use_id(&self) -> Option<&str> {
        match &self.kind {
            EventKind::ToolCall { tool_use_id, .. } | EventKind::ToolResult { tool_use_id, .. } => {
                Some(tool_use_id)
            }
            _ => None,
        }
    }

    pub fn is_tool_call(&self) -> bool {
        matches!(self.kind, EventKind::ToolCall { .. })
    }

    pub fn is_tool_result(&self) -> bool {
        matches!(self.kind, EventKind::ToolResult { .. })
    }

    /// Human-readable text carried by message-like events.
    pub fn text(&self) -> Option<&str> {
        match &self.kind {
            EventKind::UserMessage { content }
            | EventKind::AssistantText { content }
            | EventKind::Thinking { content }
            | EventKind::SystemNotice { content } => Some(content),
            EventKind::Progress { description, .. } => Some(description),
            EventKind::Error { message } => Some(message),
            EventKind::ToolResult { output, .. } => Some(output),
            EventKind::ToolCall { .. } | EventKind::SessionBoundary => None,
        }
    }
}
