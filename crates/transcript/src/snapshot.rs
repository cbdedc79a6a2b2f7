use crate::batch::{batch_tool_calls, BatchPolicy, ResponseItem};
use crate::turn::Turn;
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;
use turnline_core::Event;

/// Read-only view of the reconstructed conversation.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct TranscriptSnapshot {
    turns: Vec<Arc<Turn>>,
    /// tool_use_id -> result, across all turns.
    tool_results: Arc<HashMap<String, Arc<Event>>>,
    /// tool_use_id -> index of the turn holding the call.
    #[serde(skip)]
    call_owner: Arc<HashMap<String, usize>>,
    event_count: usize,
}

impl TranscriptSnapshot {
    pub(crate) fn new(
        turns: Vec<Arc<Turn>>,
        tool_results: Arc<HashMap<String, Arc<Event>>>,
        call_owner: Arc<HashMap<String, usize>>,
        event_count: usize,
    ) -> Self {
        Self {
            turns,
            tool_results,
            call_owner,
            event_count,
        }
    }

    pub fn turns(&self) -> &[Arc<Turn>] {
        &self.turns
    }

    pub fn turn(&self, index: usize) -> Option<&Turn> {
        self.turns.get(index).map(Arc::as_ref)
    }

    pub fn len(&self) -> usize {
        self.turns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.turns.is_empty()
    }

    /// Number of events folded into this snapshot, tool results included.
    pub fn event_count(&self) -> usize {
        self.event_count
    }

    /// Pairing lookup: the result for `tool_use_id`, wherever it arrived.
    pub fn tool_result(&self, tool_use_id: &str) -> Option<&Arc<Event>> {
        self.tool_results.get(tool_use_id)
    }

    /// Index of the turn that displays the call for `tool_use_id`.
    pub fn call_turn_index(&self, tool_use_id: &str) -> Option<usize> {
        self.call_owner.get(tool_use_id).copied()
    }

    /// True when both the call and its result have been seen.
    pub fn is_paired(&self, tool_use_id: &str) -> bool {
        self.call_owner.contains_key(tool_use_id) && self.tool_results.contains_key(tool_use_id)
    }

    /// Results whose call has not (yet) been seen.
    pub fn orphan_results(&self) -> impl Iterator<Item = &Arc<Event>> {
        self.tool_results
            .iter()
            .filter(|(id, _)| !self.call_owner.contains_key(id.as_str()))
            .map(|(_, result)| result)
    }

    /// Batched view of one turn's response events. Boundary turns yield an
    /// empty list; out-of-range indices yield `None`.
    pub fn batched(&self, index: usize, policy: &BatchPolicy) -> Option<Vec<ResponseItem>> {
        let turn = self.turns.get(index)?;
        Some(
            turn.as_normal()
                .map(|normal| batch_tool_calls(&normal.response_events, policy))
                .unwrap_or_default(),
        )
    }

    /// Position of the turn with the given id.
    pub fn position(&self, turn_id: &str) -> Option<usize> {
        self.turns.iter().position(|turn| turn.id == turn_id)
    }
}
