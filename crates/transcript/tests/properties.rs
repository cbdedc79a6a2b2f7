use proptest::prelude::*;
use std::collections::HashSet;
use std::sync::Arc;
use turnline_core::{Event, EventKind, PatternClassifier};
use turnline_transcript::{batch_items, BatchPolicy, ResponseItem, TranscriptSnapshot, TurnBuilder};

const TOOLS: &[&str] = &["Read", "Edit", "Bash"];
const TARGETS: &[Option<&str>] = &[Some("/repo/a.md"), Some("/repo/b.md"), None];

#[derive(Debug, Clone)]
enum Op {
    User { handoff: bool },
    Assistant,
    Thinking,
    Call { tool: usize, target: usize, call: u8 },
    Result { call: u8 },
    Boundary,
    Notice,
    Progress,
    Error,
}

fn op() -> impl Strategy<Value = Op> {
    prop_oneof![
        any::<bool>().prop_map(|handoff| Op::User { handoff }),
        Just(Op::Assistant),
        Just(Op::Thinking),
        (0..TOOLS.len(), 0..TARGETS.len(), 0u8..8)
            .prop_map(|(tool, target, call)| Op::Call { tool, target, call }),
        (0u8..8).prop_map(|call| Op::Result { call }),
        Just(Op::Boundary),
        Just(Op::Notice),
        Just(Op::Progress),
        Just(Op::Error),
    ]
}

fn to_events(ops: &[Op]) -> Vec<Arc<Event>> {
    ops.iter()
        .enumerate()
        .map(|(i, op)| {
            let kind = match op {
                Op::User { handoff: true } => EventKind::UserMessage {
                    content: format!("[AUTO-HANDOFF] reason: {i}"),
                },
                Op::User { handoff: false } => EventKind::UserMessage {
                    content: format!("question {i}"),
                },
                Op::Assistant => EventKind::AssistantText {
                    content: format!("answer {i}"),
                },
                Op::Thinking => EventKind::Thinking {
                    content: format!("thought {i}"),
                },
                Op::Call { tool, target, call } => EventKind::ToolCall {
                    tool_use_id: format!("tu{call}"),
                    tool_name: TOOLS[*tool].to_string(),
                    input: match TARGETS[*target] {
                        Some(path) => serde_json::json!({ "file_path": path }),
                        None => serde_json::json!({ "command": "ls" }),
                    },
                },
                Op::Result { call } => EventKind::ToolResult {
                    tool_use_id: format!("tu{call}"),
                    success: true,
                    output: String::new(),
                    duration_ms: None,
                },
                Op::Boundary => EventKind::SessionBoundary,
                Op::Notice => EventKind::SystemNotice {
                    content: format!("notice {i}"),
                },
                Op::Progress => EventKind::Progress {
                    step: i as u64,
                    total: None,
                    description: String::new(),
                },
                Op::Error => EventKind::Error {
                    message: format!("error {i}"),
                },
            };
            Arc::new(Event::new(format!("e{i}"), None, kind))
        })
        .collect()
}

fn build(events: &[Arc<Event>]) -> TranscriptSnapshot {
    TurnBuilder::build(Arc::new(PatternClassifier::default()), events)
}

proptest! {
    #[test]
    fn turns_preserve_arrival_order(ops in proptest::collection::vec(op(), 0..60)) {
        let events = to_events(&ops);
        let snapshot = build(&events);

        let flattened: Vec<&str> = snapshot
            .turns()
            .iter()
            .flat_map(|turn| turn.events())
            .map(|event| event.id.as_str())
            .collect();
        let expected: Vec<&str> = events
            .iter()
            .filter(|event| !event.is_tool_result())
            .map(|event| event.id.as_str())
            .collect();
        prop_assert_eq!(flattened, expected);
    }

    #[test]
    fn every_result_is_reachable_by_tool_use_id(ops in proptest::collection::vec(op(), 0..60)) {
        let events = to_events(&ops);
        let snapshot = build(&events);

        let calls: HashSet<&str> = events
            .iter()
            .filter(|e| e.is_tool_call())
            .filter_map(|e| e.tool_use_id())
            .collect();
        for result in events.iter().filter(|e| e.is_tool_result()) {
            let id = result.tool_use_id().unwrap_or_default();
            prop_assert!(snapshot.tool_result(id).is_some());
            if calls.contains(id) {
                prop_assert!(snapshot.is_paired(id));
                let owner = snapshot.call_turn_index(id).expect("call owner");
                prop_assert!(snapshot.turns()[owner].tool_result(id).is_some());
            }
        }
    }

    #[test]
    fn boundary_absorbs_at_most_the_next_event(ops in proptest::collection::vec(op(), 0..60)) {
        let events = to_events(&ops);
        let snapshot = build(&events);

        for turn in snapshot.turns() {
            let Some(boundary) = turn.as_boundary() else { continue };
            if let Some(handoff) = &boundary.handoff {
                let at = events
                    .iter()
                    .position(|e| e.id == boundary.boundary.id)
                    .expect("boundary in input");
                prop_assert_eq!(&events[at + 1].id, &handoff.id);
            }
        }
    }

    #[test]
    fn batching_is_idempotent(ops in proptest::collection::vec(op(), 0..60)) {
        let events = to_events(&ops);
        let snapshot = build(&events);
        let policy = BatchPolicy::default();

        for index in 0..snapshot.len() {
            let once = snapshot.batched(index, &policy).expect("turn exists");
            let twice = batch_items(&once, &policy);
            prop_assert_eq!(&once, &twice);

            let flattened: Vec<&str> = once
                .iter()
                .flat_map(|item| match item {
                    ResponseItem::Event(event) => vec![event.id.as_str()],
                    ResponseItem::Batch(batch) => {
                        batch.tools.iter().map(|tool| tool.id.as_str()).collect()
                    }
                })
                .collect();
            let original: Vec<&str> = snapshot.turns()[index]
                .as_normal()
                .map(|turn| turn.response_events.iter().map(|e| e.id.as_str()).collect())
                .unwrap_or_default();
            prop_assert_eq!(flattened, original);
        }
    }

    #[test]
    fn incremental_build_equals_full_rebuild(
        ops in proptest::collection::vec(op(), 0..60),
        split in 0usize..60,
    ) {
        let events = to_events(&ops);
        let split = split.min(events.len());

        let mut builder = TurnBuilder::default();
        builder.extend(&events[..split]);
        let _ = builder.snapshot();
        builder.extend(&events[split..]);

        prop_assert_eq!(builder.finish(), build(&events));
    }
}
