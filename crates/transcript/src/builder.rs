//! Turn reconstruction.
//!
//! `TurnBuilder` is a single forward pass over the event stream. Its state is
//! kept between calls so a newly appended tail can be pushed without
//! replaying the whole session; the result is identical to a full rebuild.

use crate::snapshot::TranscriptSnapshot;
use crate::turn::{Turn, TurnBody};
use std::collections::HashMap;
use std::sync::Arc;
use turnline_core::{Event, EventKind, MessageClassifier, PatternClassifier};

pub struct TurnBuilder {
    classifier: Arc<dyn MessageClassifier>,
    /// Shared with published snapshots; a turn is copied only when it is
    /// modified while a snapshot still holds it.
    turns: Vec<Arc<Turn>>,
    /// Index of the open Normal turn receiving response events.
    current: Option<usize>,
    /// Position in the current turn's response events where the open tool
    /// run starts. Runs live inside `response_events`; flushing only closes them.
    tool_run_start: Option<usize>,
    /// Boundary turn that may still absorb the very next message.
    merge_candidate: Option<usize>,
    /// tool_use_id -> turn index owning the call.
    call_owner: Arc<HashMap<String, usize>>,
    /// tool_use_id -> most recent result, across all turns.
    results: Arc<HashMap<String, Arc<Event>>>,
    event_count: usize,
}

impl Default for TurnBuilder {
    fn default() -> Self {
        Self::new(Arc::new(PatternClassifier::default()))
    }
}

impl TurnBuilder {
    pub fn new(classifier: Arc<dyn MessageClassifier>) -> Self {
        Self {
            classifier,
            turns: Vec::new(),
            current: None,
            tool_run_start: None,
            merge_candidate: None,
            call_owner: Arc::default(),
            results: Arc::default(),
            event_count: 0,
        }
    }

    /// Build turns for a complete event sequence.
    pub fn build<'a, I>(classifier: Arc<dyn MessageClassifier>, events: I) -> TranscriptSnapshot
    where
        I: IntoIterator<Item = &'a Arc<Event>>,
    {
        let mut builder = Self::new(classifier);
        builder.extend(events);
        builder.finish()
    }

    /// Drop all derived state, keeping the classifier.
    pub fn reset(&mut self) {
        *self = Self::new(Arc::clone(&self.classifier));
    }

    /// Reset and replay `events` from scratch.
    pub fn rebuild<'a, I>(&mut self, events: I)
    where
        I: IntoIterator<Item = &'a Arc<Event>>,
    {
        self.reset();
        self.extend(events);
    }

    pub fn extend<'a, I>(&mut self, events: I)
    where
        I: IntoIterator<Item = &'a Arc<Event>>,
    {
        for event in events {
            self.push(Arc::clone(event));
        }
    }

    pub fn push(&mut self, event: Arc<Event>) {
        self.event_count += 1;

        match &event.kind {
            EventKind::SessionBoundary => {
                self.flush_tool_run();
                self.close_turn();
                self.turns.push(Arc::new(Turn::boundary(event)));
                self.merge_candidate = Some(self.turns.len() - 1);
            }
            EventKind::UserMessage { content } => {
                if self.merge_candidate.is_some() && self.classifier.is_system_message(content) {
                    self.absorb_handoff(event);
                    return;
                }
                self.merge_candidate = None;
                self.flush_tool_run();
                self.close_turn();
                self.turns.push(Arc::new(Turn::led_by(event)));
                self.current = Some(self.turns.len() - 1);
            }
            EventKind::SystemNotice { .. } => {
                if self.merge_candidate.is_some() {
                    self.absorb_handoff(event);
                    return;
                }
                self.push_standalone(event);
            }
            EventKind::AssistantText { .. } | EventKind::Thinking { .. } => {
                self.merge_candidate = None;
                self.flush_tool_run();
                let idx = self.ensure_current(&event);
                self.normal_mut(idx).response_events.push(event);
            }
            EventKind::ToolCall { tool_use_id, .. } => {
                self.merge_candidate = None;
                let idx = self.ensure_current(&event);
                let tool_use_id = tool_use_id.clone();
                let earlier_result = self.results.get(&tool_use_id).cloned();
                if self.tool_run_start.is_none() {
                    let start = self.normal_mut(idx).response_events.len();
                    self.tool_run_start = Some(start);
                }
                let turn = self.normal_mut(idx);
                turn.response_events.push(event);
                // Result arrived before its call: pair it here as well.
                if let Some(result) = earlier_result {
                    turn.tool_results.insert(tool_use_id.clone(), result);
                }
                Arc::make_mut(&mut self.call_owner).insert(tool_use_id, idx);
            }
            EventKind::ToolResult { tool_use_id, .. } => {
                self.merge_candidate = None;
                let idx = self.ensure_current(&event);
                let tool_use_id = tool_use_id.clone();
                self.normal_mut(idx)
                    .tool_results
                    .insert(tool_use_id.clone(), Arc::clone(&event));
                if let Some(owner) = self.call_owner.get(&tool_use_id).copied() {
                    if owner != idx {
                        self.normal_mut(owner)
                            .tool_results
                            .insert(tool_use_id.clone(), Arc::clone(&event));
                    }
                }
                Arc::make_mut(&mut self.results).insert(tool_use_id, event);
            }
            EventKind::Progress { .. } | EventKind::Error { .. } => {
                self.push_standalone(event);
            }
        }
    }

    /// Flush the open tool run and close the last turn.
    pub fn finish(mut self) -> TranscriptSnapshot {
        self.flush_tool_run();
        self.close_turn();
        self.snapshot()
    }

    /// Current turns as an immutable snapshot. The open turn is included as-is.
    ///
    /// Turns and lookup maps are shared, not copied.
    pub fn snapshot(&self) -> TranscriptSnapshot {
        TranscriptSnapshot::new(
            self.turns.clone(),
            Arc::clone(&self.results),
            Arc::clone(&self.call_owner),
            self.event_count,
        )
    }

    pub fn turns(&self) -> &[Arc<Turn>] {
        &self.turns
    }

    pub fn event_count(&self) -> usize {
        self.event_count
    }

    /// Tool calls in the run that is still open on the current turn.
    pub fn open_tool_run(&self) -> &[Arc<Event>] {
        match (self.current, self.tool_run_start) {
            (Some(idx), Some(start)) => self.turns[idx]
                .as_normal()
                .map(|turn| &turn.response_events[start..])
                .unwrap_or(&[]),
            _ => &[],
        }
    }

    /// True while a boundary is waiting for its handoff message.
    pub fn awaiting_handoff(&self) -> bool {
        self.merge_candidate.is_some()
    }

    // ── State transitions ───────────────────────────────────────────────────

    fn flush_tool_run(&mut self) {
        self.tool_run_start = None;
    }

    fn close_turn(&mut self) {
        self.current = None;
    }

    fn absorb_handoff(&mut self, event: Arc<Event>) {
        let Some(idx) = self.merge_candidate.take() else {
            return;
        };
        if let TurnBody::Boundary(boundary) = &mut Arc::make_mut(&mut self.turns[idx]).body {
            boundary.handoff = Some(event);
        }
    }

    fn push_standalone(&mut self, event: Arc<Event>) {
        self.merge_candidate = None;
        self.flush_tool_run();
        self.close_turn();
        self.turns.push(Arc::new(Turn::standalone(event)));
    }

    fn ensure_current(&mut self, event: &Event) -> usize {
        if let Some(idx) = self.current {
            return idx;
        }
        tracing::trace!(event_id = %event.id, kind = event.kind_label(), "Opening anonymous turn");
        self.turns.push(Arc::new(Turn::anonymous(event)));
        let idx = self.turns.len() - 1;
        self.current = Some(idx);
        idx
    }

    fn normal_mut(&mut self, idx: usize) -> &mut crate::turn::NormalTurn {
        // `current` and `call_owner` only ever point at Normal turns.
        match Arc::make_mut(&mut self.turns[idx]).as_normal_mut() {
            Some(turn) => turn,
            None => unreachable!("turn {idx} is not a normal turn"),
        }
    }
}
