//! Raw record normalization.
//!
//! Inbound records arrive as loosely shaped JSON objects carrying a `type`
//! discriminator. They are decoded into a closed tagged union (`RawBody`)
//! whose `Unknown` arm catches every type we do not render. Unknown and
//! malformed records are skipped; nothing here panics or blocks.

use crate::event::{Event, EventKind};
use chrono::{DateTime, Utc};
use serde::Deserialize;
use serde_json::Value;

/// Why a record could not be turned into an [`Event`].
#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum NormalizeError {
    #[error("invalid record: {0}")]
    Json(#[from] serde_json::Error),
    #[error("{kind} record has no id")]
    MissingId { kind: &'static str },
}

// ── Raw deserialization types ───────────────────────────────────────────────

#[derive(Debug, Deserialize)]
struct RawEnvelope {
    #[serde(default, alias = "uuid")]
    id: Option<String>,
    /// Kept loose so an odd timestamp never costs the whole record.
    #[serde(default)]
    timestamp: Option<Value>,
    #[serde(flatten)]
    body: RawBody,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "type")]
enum RawBody {
    #[serde(rename = "user_message", alias = "user")]
    User {
        #[serde(default)]
        content: Option<RawContent>,
    },
    #[serde(rename = "assistant_text", alias = "assistant", alias = "text")]
    Assistant {
        #[serde(default)]
        content: Option<RawContent>,
    },
    #[serde(rename = "thinking", alias = "reasoning")]
    Thinking {
        #[serde(default)]
        content: Option<RawContent>,
    },
    #[serde(rename = "tool_call", alias = "tool_use")]
    ToolCall {
        #[serde(alias = "toolUseId")]
        tool_use_id: String,
        #[serde(alias = "toolName", alias = "name")]
        tool_name: String,
        #[serde(default)]
        input: Value,
    },
    #[serde(rename = "tool_result")]
    ToolResult {
        #[serde(alias = "toolUseId")]
        tool_use_id: String,
        #[serde(default)]
        success: Option<bool>,
        #[serde(default, alias = "isError")]
        is_error: Option<bool>,
        #[serde(default)]
        output: Value,
        #[serde(default, alias = "durationMs")]
        duration_ms: Option<u64>,
    },
    #[serde(
        rename = "session_boundary",
        alias = "context_reset",
        alias = "compact_boundary"
    )]
    SessionBoundary {},
    #[serde(rename = "system_notice", alias = "system")]
    SystemNotice {
        #[serde(default)]
        content: Option<RawContent>,
    },
    #[serde(rename = "progress")]
    Progress {
        #[serde(default)]
        step: u64,
        #[serde(default)]
        total: Option<u64>,
        #[serde(default)]
        description: String,
    },
    #[serde(rename = "error")]
    Error {
        #[serde(default, alias = "error")]
        message: String,
    },
    // Catch-all for record types we do not reconstruct
    #[serde(other)]
    Unknown,
}

/// Message content is either a plain string or an array of content blocks.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum RawContent {
    Text(String),
    Blocks(Vec<RawContentBlock>),
}

#[derive(Debug, Deserialize)]
#[serde(tag = "type")]
enum RawContentBlock {
    #[serde(rename = "text")]
    Text { text: String },
    #[serde(rename = "thinking")]
    Thinking {
        #[serde(default)]
        thinking: Option<String>,
    },
    #[serde(other)]
    Other,
}

impl RawContent {
    fn into_text(self) -> String {
        match self {
            RawContent::Text(text) => text,
            RawContent::Blocks(blocks) => blocks
                .into_iter()
                .filter_map(|block| match block {
                    RawContentBlock::Text { text } => Some(text),
                    RawContentBlock::Thinking { thinking } => thinking,
                    RawContentBlock::Other => None,
                })
                .collect::<Vec<_>>()
                .join("\n"),
        }
    }
}

fn content_text(content: Option<RawContent>) -> String {
    content.map(RawContent::into_text).unwrap_or_default()
}

/// Flatten a tool output value (string, text-block array, or anything else) to text.
fn output_text(output: Value) -> String {
    match output {
        Value::Null => String::new(),
        Value::String(text) => text,
        Value::Array(items) => items
            .into_iter()
            .filter_map(|item| match item {
                Value::String(text) => Some(text),
                Value::Object(map) => map
                    .get("text")
                    .and_then(Value::as_str)
                    .map(str::to_string),
                _ => None,
            })
            .collect::<Vec<_>>()
            .join("\n"),
        other => other.to_string(),
    }
}

/// Epoch values below this are read as seconds, anything larger as millis.
const EPOCH_SECONDS_LIMIT: f64 = 100_000_000_000.0;

/// RFC 3339 strings, or numeric epochs in seconds or milliseconds
/// (integer or fractional). Anything else yields `None`.
fn parse_timestamp(raw: &Value) -> Option<DateTime<Utc>> {
    match raw {
        Value::String(text) => DateTime::parse_from_rfc3339(text.trim())
            .ok()
            .map(|dt| dt.with_timezone(&Utc)),
        Value::Number(number) => {
            let value = number.as_f64()?;
            if !value.is_finite() {
                return None;
            }
            let millis = if value.abs() < EPOCH_SECONDS_LIMIT {
                value * 1000.0
            } else {
                value
            };
            DateTime::from_timestamp_millis(millis.round() as i64)
        }
        _ => None,
    }
}

// ── Normalization ───────────────────────────────────────────────────────────

/// Decode one raw record.
///
/// Returns `Ok(None)` for well-formed records of a type we do not handle.
pub fn normalize_record(raw: &Value) -> Result<Option<Event>, NormalizeError> {
    let envelope = RawEnvelope::deserialize(raw)?;

    let kind = match envelope.body {
        RawBody::User { content } => EventKind::UserMessage {
            content: content_text(content),
        },
        RawBody::Assistant { content } => EventKind::AssistantText {
            content: content_text(content),
        },
        RawBody::Thinking { content } => EventKind::Thinking {
            content: content_text(content),
        },
        RawBody::ToolCall {
            tool_use_id,
            tool_name,
            input,
        } => EventKind::ToolCall {
            tool_use_id,
            tool_name,
            input,
        },
        RawBody::ToolResult {
            tool_use_id,
            success,
            is_error,
            output,
            duration_ms,
        } => EventKind::ToolResult {
            tool_use_id,
            success: success.unwrap_or_else(|| !is_error.unwrap_or(false)),
            output: output_text(output),
            duration_ms,
        },
        RawBody::SessionBoundary {} => EventKind::SessionBoundary,
        RawBody::SystemNotice { content } => EventKind::SystemNotice {
            content: content_text(content),
        },
        RawBody::Progress {
            step,
            total,
            description,
        } => EventKind::Progress {
            step,
            total,
            description,
        },
        RawBody::Error { message } => EventKind::Error { message },
        RawBody::Unknown => return Ok(None),
    };

    let event = Event {
        id: String::new(),
        timestamp: envelope.timestamp.as_ref().and_then(parse_timestamp),
        kind,
    };
    match envelope.id.filter(|id| !id.trim().is_empty()) {
        Some(id) => Ok(Some(Event { id, ..event })),
        None => Err(NormalizeError::MissingId {
            kind: event.kind_label(),
        }),
    }
}

/// Normalize one raw record, skipping anything unrecognized or malformed.
pub fn normalize(raw: &Value) -> Option<Event> {
    match normalize_record(raw) {
        Ok(Some(event)) => Some(event),
        Ok(None) => {
            let record_type = raw.get("type").and_then(|t| t.as_str()).unwrap_or("");
            tracing::trace!(record_type, "Skipping unhandled record type");
            None
        }
        Err(e) => {
            tracing::debug!("Skipping malformed record: {}", e);
            None
        }
    }
}

/// Normalize a single JSONL line.
pub fn normalize_line(line: &str) -> Option<Event> {
    let line = line.trim();
    if line.is_empty() {
        return None;
    }
    match serde_json::from_str::<Value>(line) {
        Ok(value) => normalize(&value),
        Err(e) => {
            tracing::debug!("Skipping unparseable line: {}", e);
            None
        }
    }
}

/// Normalize a batch of records in order, dropping the ones that do not decode.
pub fn normalize_all<'a, I>(records: I) -> Vec<Event>
where
    I: IntoIterator<Item = &'a Value>,
{
    records.into_iter().filter_map(normalize).collect()
}
