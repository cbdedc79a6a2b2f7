use crate::{Event, EventKind};
use std::sync::Arc;

/// User message with the given id.
pub fn user(id: &str, content: &str) -> Arc<Event> {
    event(
        id,
        EventKind::UserMessage {
            content: content.to_string(),
        },
    )
}

/// Assistant text with the given id.
pub fn assistant(id: &str, content: &str) -> Arc<Event> {
    event(
        id,
        EventKind::AssistantText {
            content: content.to_string(),
        },
    )
}

pub fn thinking(id: &str, content: &str) -> Arc<Event> {
    event(
        id,
        EventKind::Thinking {
            content: content.to_string(),
        },
    )
}

/// Tool call whose input carries `file_path` when `target` is given.
pub fn tool_call(id: &str, tool_use_id: &str, tool_name: &str, target: Option<&str>) -> Arc<Event> {
    let input = match target {
        Some(path) => serde_json::json!({ "file_path": path }),
        None => serde_json::json!({}),
    };
    event(
        id,
        EventKind::ToolCall {
            tool_use_id: tool_use_id.to_string(),
            tool_name: tool_name.to_string(),
            input,
        },
    )
}

/// Successful tool result.
pub fn tool_result(id: &str, tool_use_id: &str) -> Arc<Event> {
    event(
        id,
        EventKind::ToolResult {
            tool_use_id: tool_use_id.to_string(),
            success: true,
            output: format!("output of {tool_use_id}"),
            duration_ms: None,
        },
    )
}

pub fn boundary(id: &str) -> Arc<Event> {
    event(id, EventKind::SessionBoundary)
}

pub fn notice(id: &str, content: &str) -> Arc<Event> {
    event(
        id,
        EventKind::SystemNotice {
            content: content.to_string(),
        },
    )
}

pub fn progress(id: &str, step: u64) -> Arc<Event> {
    event(
        id,
        EventKind::Progress {
            step,
            total: None,
            description: format!("step {step}"),
        },
    )
}

pub fn error(id: &str, message: &str) -> Arc<Event> {
    event(
        id,
        EventKind::Error {
            message: message.to_string(),
        },
    )
}

fn event(id: &str, kind: EventKind) -> Arc<Event> {
    Arc::new(Event {
        id: id.to_string(),
        timestamp: Some(chrono::Utc::now()),
        kind,
    })
}
