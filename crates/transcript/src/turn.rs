use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;
use turnline_core::Event;

/// The unit of display: a request/response group or a session boundary.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Turn {
    /// Stream-derived id, stable across incremental rebuilds.
    pub id: String,
    #[serde(flatten)]
    pub body: TurnBody,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum TurnBody {
    Normal(NormalTurn),
    Boundary(BoundaryTurn),
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct NormalTurn {
    /// Leading user message; `None` for anonymous and standalone turns.
    pub user_message: Option<Arc<Event>>,
    /// Assistant text, thinking and tool calls in arrival order.
    pub response_events: Vec<Arc<Event>>,
    /// Results keyed by tool_use_id: those that arrived while this turn was
    /// open plus those answering calls this turn owns.
    pub tool_results: HashMap<String, Arc<Event>>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BoundaryTurn {
    pub boundary: Arc<Event>,
    /// At most one system handoff message absorbed right after the boundary.
    pub handoff: Option<Arc<Event>>,
}

impl Turn {
    pub(crate) fn led_by(event: Arc<Event>) -> Self {
        Self {
            id: format!("turn:{}", event.id),
            body: TurnBody::Normal(NormalTurn {
                user_message: Some(event),
                ..NormalTurn::default()
            }),
        }
    }

    pub(crate) fn anonymous(first: &Event) -> Self {
        Self {
            id: format!("anon:{}", first.id),
            body: TurnBody::Normal(NormalTurn::default()),
        }
    }

    pub(crate) fn standalone(event: Arc<Event>) -> Self {
        Self {
            id: format!("turn:{}", event.id),
            body: TurnBody::Normal(NormalTurn {
                response_events: vec![event],
                ..NormalTurn::default()
            }),
        }
    }

    pub(crate) fn boundary(event: Arc<Event>) -> Self {
        Self {
            id: format!("boundary:{}", event.id),
            body: TurnBody::Boundary(BoundaryTurn {
                boundary: event,
                handoff: None,
            }),
        }
    }

    pub fn is_boundary(&self) -> bool {
        matches!(self.body, TurnBody::Boundary(_))
    }

    pub fn as_normal(&self) -> Option<&NormalTurn> {
        match &self.body {
            TurnBody::Normal(turn) => Some(turn),
            TurnBody::Boundary(_) => None,
        }
    }

    pub fn as_boundary(&self) -> Option<&BoundaryTurn> {
        match &self.body {
            TurnBody::Boundary(turn) => Some(turn),
            TurnBody::Normal(_) => None,
        }
    }

    pub(crate) fn as_normal_mut(&mut self) -> Option<&mut NormalTurn> {
        match &mut self.body {
            TurnBody::Normal(turn) => Some(turn),
            TurnBody::Boundary(_) => None,
        }
    }

    /// Displayed events in order. Tool results live in the pairing map and
    /// are not part of this sequence.
    pub fn events(&self) -> Vec<&Arc<Event>> {
        match &self.body {
            TurnBody::Normal(turn) => turn
                .user_message
                .iter()
                .chain(turn.response_events.iter())
                .collect(),
            TurnBody::Boundary(turn) => std::iter::once(&turn.boundary)
                .chain(turn.handoff.iter())
                .collect(),
        }
    }

    /// Result recorded on this turn for `tool_use_id`.
    pub fn tool_result(&self, tool_use_id: &str) -> Option<&Arc<Event>> {
        self.as_normal()
            .and_then(|turn| turn.tool_results.get(tool_use_id))
    }

    /// Tool calls in this turn's response events.
    pub fn tool_calls(&self) -> impl Iterator<Item = &Arc<Event>> {
        self.as_normal()
            .into_iter()
            .flat_map(|turn| turn.response_events.iter())
            .filter(|event| event.is_tool_call())
    }
}

impl NormalTurn {
    pub fn is_empty(&self) -> bool {
        self.user_message.is_none() && self.response_events.is_empty()
    }
}
