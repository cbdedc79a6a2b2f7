//! Per-session event store.
//!
//! Events are kept in arrival order and de-duplicated by id. Backfilled
//! history goes in front of what is already loaded; nothing is ever
//! re-sorted by timestamp.

use chrono::{DateTime, Utc};
use std::collections::HashSet;
use std::sync::Arc;
use turnline_core::Event;

/// What a cache mutation did to the ordered event list.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheChange {
    /// Nothing new; every incoming id was already known.
    Unchanged,
    /// Events were added at the end, starting at this index.
    Appended { start: usize },
    /// The list changed somewhere other than its tail.
    Rebuilt,
}

impl CacheChange {
    pub fn is_changed(self) -> bool {
        !matches!(self, CacheChange::Unchanged)
    }
}

#[derive(Debug, Clone)]
pub struct SessionCache {
    session_id: String,
    events: Vec<Arc<Event>>,
    known_event_ids: HashSet<String>,
    fresh_at: Option<DateTime<Utc>>,
}

impl SessionCache {
    pub fn new(session_id: impl Into<String>) -> Self {
        Self {
            session_id: session_id.into(),
            events: Vec::new(),
            known_event_ids: HashSet::new(),
            fresh_at: None,
        }
    }

    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    pub fn events(&self) -> &[Arc<Event>] {
        &self.events
    }

    pub fn len(&self) -> usize {
        self.events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    pub fn contains(&self, event_id: &str) -> bool {
        self.known_event_ids.contains(event_id)
    }

    /// When the cache last gained events.
    pub fn fresh_at(&self) -> Option<DateTime<Utc>> {
        self.fresh_at
    }

    /// Id of the earliest loaded event, used as the backfill cursor.
    pub fn oldest_id(&self) -> Option<&str> {
        self.events.first().map(|event| event.id.as_str())
    }

    /// Id of the most recent event, used to resume after a reconnect.
    pub fn last_id(&self) -> Option<&str> {
        self.events.last().map(|event| event.id.as_str())
    }

    /// Append one event. Returns false when its id was already seen.
    pub fn append(&mut self, event: Arc<Event>) -> bool {
        if !self.known_event_ids.insert(event.id.clone()) {
            tracing::trace!(
                session_id = %self.session_id,
                event_id = %event.id,
                "Ignoring duplicate event"
            );
            return false;
        }
        self.events.push(event);
        self.touch();
        true
    }

    /// Append events in order, skipping known ids.
    pub fn append_all<I>(&mut self, events: I) -> CacheChange
    where
        I: IntoIterator<Item = Arc<Event>>,
    {
        let start = self.events.len();
        for event in events {
            self.append(event);
        }
        if self.events.len() > start {
            CacheChange::Appended { start }
        } else {
            CacheChange::Unchanged
        }
    }

    /// Place earlier history before the loaded events.
    ///
    /// Ids already present, or repeated inside `events`, are dropped.
    pub fn prepend<I>(&mut self, events: I) -> CacheChange
    where
        I: IntoIterator<Item = Arc<Event>>,
    {
        let mut earlier = Vec::new();
        for event in events {
            if self.known_event_ids.insert(event.id.clone()) {
                earlier.push(event);
            }
        }
        if earlier.is_empty() {
            return CacheChange::Unchanged;
        }

        tracing::debug!(
            session_id = %self.session_id,
            added = earlier.len(),
            "Prepended earlier events"
        );
        earlier.append(&mut self.events);
        self.events = earlier;
        self.touch();
        CacheChange::Rebuilt
    }

    /// Full reload.
    ///
    /// `events` become the head of the list in their given order. Loaded
    /// events the reload does not mention (typically pushed after the reload
    /// was cut) stay after them, in their original order.
    pub fn replace<I>(&mut self, events: I) -> CacheChange
    where
        I: IntoIterator<Item = Arc<Event>>,
    {
        let mut known = HashSet::new();
        let mut next: Vec<Arc<Event>> = Vec::new();
        for event in events {
            if known.insert(event.id.clone()) {
                next.push(event);
            }
        }
        for event in &self.events {
            if known.insert(event.id.clone()) {
                next.push(Arc::clone(event));
            }
        }

        let previous_len = self.events.len();
        let keeps_prefix = next.len() >= previous_len
            && self
                .events
                .iter()
                .zip(&next)
                .all(|(old, new)| old.id == new.id);

        let change = if keeps_prefix && next.len() == previous_len {
            CacheChange::Unchanged
        } else if keeps_prefix {
            CacheChange::Appended {
                start: previous_len,
            }
        } else {
            CacheChange::Rebuilt
        };

        if change.is_changed() {
            self.events = next;
            self.known_event_ids = known;
            self.touch();
        }
        change
    }

    /// Drop every event.
    pub fn clear(&mut self) {
        self.events.clear();
        self.known_event_ids.clear();
        self.fresh_at = None;
    }

    fn touch(&mut self) {
        self.fresh_at = Some(Utc::now());
    }
}
