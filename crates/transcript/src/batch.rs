//! Tool batching.
//!
//! Consecutive calls to the same tool against the same target collapse into a
//! single [`ToolBatch`]. Batching is a view over a turn's response events and
//! never mutates the turn itself.

use serde::Serialize;
use serde_json::Value;
use std::sync::Arc;
use turnline_core::{Event, EventKind};

/// Smallest run that is shown as a batch.
pub const MIN_BATCH_SIZE: usize = 2;

/// Input fields checked, in order, for a batching target.
pub const DEFAULT_TARGET_FIELDS: &[&str] = &["file_path", "notebook_path", "path"];

/// One displayed entry of a turn's response.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "item", rename_all = "snake_case")]
pub enum ResponseItem {
    Event(Arc<Event>),
    Batch(ToolBatch),
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ToolBatch {
    pub tool_name: String,
    pub target: String,
    pub tools: Vec<Arc<Event>>,
}

impl ToolBatch {
    pub fn len(&self) -> usize {
        self.tools.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }

    pub fn tool_use_ids(&self) -> impl Iterator<Item = &str> {
        self.tools.iter().filter_map(|tool| tool.tool_use_id())
    }
}

/// Which input fields name a tool's target.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BatchPolicy {
    target_fields: Vec<String>,
}

impl Default for BatchPolicy {
    fn default() -> Self {
        Self::new(DEFAULT_TARGET_FIELDS.iter().copied())
    }
}

impl BatchPolicy {
    pub fn new<I, S>(fields: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            target_fields: fields.into_iter().map(Into::into).collect(),
        }
    }

    pub fn target_fields(&self) -> &[String] {
        &self.target_fields
    }

    pub fn target_for(&self, input: &Value) -> Option<String> {
        derive_target(input, &self.target_fields)
    }

    fn key<'a>(&self, item: &'a ResponseItem) -> Option<(&'a str, String)> {
        let ResponseItem::Event(event) = item else {
            return None;
        };
        match &event.kind {
            EventKind::ToolCall {
                tool_name, input, ..
            } => self
                .target_for(input)
                .map(|target| (tool_name.as_str(), target)),
            _ => None,
        }
    }
}

/// Last path segment of the first non-empty string among `fields`.
///
/// Returns `None` when no target field is present, which keeps the call out of
/// any batch.
pub fn derive_target<S: AsRef<str>>(input: &Value, fields: &[S]) -> Option<String> {
    fields.iter().find_map(|field| {
        let raw = input.get(field.as_ref())?.as_str()?;
        let trimmed = raw.trim().trim_end_matches(['/', '\\']);
        let segment = trimmed.rsplit(['/', '\\']).next().unwrap_or(trimmed);
        (!segment.is_empty()).then(|| segment.to_string())
    })
}

/// Collapse runs of same-tool, same-target calls.
///
/// Existing batches and every non-call item pass through unchanged, so
/// applying this to its own output is a no-op.
pub fn batch_items(items: &[ResponseItem], policy: &BatchPolicy) -> Vec<ResponseItem> {
    let mut out = Vec::with_capacity(items.len());
    let mut i = 0;

    while i < items.len() {
        let Some(key) = policy.key(&items[i]) else {
            out.push(items[i].clone());
            i += 1;
            continue;
        };

        let mut end = i + 1;
        while end < items.len() && policy.key(&items[end]).as_ref() == Some(&key) {
            end += 1;
        }

        if end - i >= MIN_BATCH_SIZE {
            let tools = items[i..end]
                .iter()
                .filter_map(|item| match item {
                    ResponseItem::Event(event) => Some(Arc::clone(event)),
                    ResponseItem::Batch(_) => None,
                })
                .collect();
            out.push(ResponseItem::Batch(ToolBatch {
                tool_name: key.0.to_string(),
                target: key.1,
                tools,
            }));
        } else {
            out.push(items[i].clone());
        }
        i = end;
    }

    out
}

/// Batch a turn's raw response events.
pub fn batch_tool_calls(events: &[Arc<Event>], policy: &BatchPolicy) -> Vec<ResponseItem> {
    let items: Vec<ResponseItem> = events
        .iter()
        .map(|event| ResponseItem::Event(Arc::clone(event)))
        .collect();
    batch_items(&items, policy)
}
