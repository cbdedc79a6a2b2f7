//! Conversation reconstruction over normalized activity events.
//!
//! [`TurnBuilder`] groups events into [`Turn`]s and pairs tool results with
//! their calls; [`batch`] derives collapsed tool batches on demand.

pub mod batch;
pub mod builder;
pub mod snapshot;
pub mod turn;

pub use batch::{
    batch_items, batch_tool_calls, BatchPolicy, ResponseItem, ToolBatch, DEFAULT_TARGET_FIELDS,
};
pub use builder::TurnBuilder;
pub use snapshot::TranscriptSnapshot;
pub use turn::{BoundaryTurn, NormalTurn, Turn, TurnBody};
