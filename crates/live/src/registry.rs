//! Explicit owner of every open session.

use crate::cache::CacheChange;
use crate::error::LiveError;
use crate::session::{BackfillTicket, LiveSession, SessionOptions};
use crate::transport::TransportError;
use serde_json::Value;
use std::collections::HashMap;
use turnline_runtime_config::RuntimeConfig;

#[derive(Debug, Default)]
pub struct SessionRegistry {
    options: SessionOptions,
    sessions: HashMap<String, LiveSession>,
}

impl SessionRegistry {
    pub fn new(options: SessionOptions) -> Self {
        Self {
            options,
            sessions: HashMap::new(),
        }
    }

    pub fn from_config(config: &RuntimeConfig) -> Result<Self, LiveError> {
        Ok(Self::new(SessionOptions::from_config(config)?))
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }

    pub fn session_ids(&self) -> impl Iterator<Item = &str> {
        self.sessions.keys().map(String::as_str)
    }

    /// Open a session, or return the live instance if it is already open.
    pub fn open(&mut self, session_id: &str) -> &mut LiveSession {
        self.sessions
            .entry(session_id.to_string())
            .or_insert_with(|| {
                tracing::info!(session_id, "Opened live session");
                LiveSession::new(session_id, self.options.clone())
            })
    }

    pub fn get(&self, session_id: &str) -> Option<&LiveSession> {
        self.sessions.get(session_id)
    }

    pub fn get_mut(&mut self, session_id: &str) -> Option<&mut LiveSession> {
        self.sessions.get_mut(session_id)
    }

    /// Tear a session down. Backfills started against it become stale.
    pub fn evict(&mut self, session_id: &str) -> Option<LiveSession> {
        let evicted = self.sessions.remove(session_id);
        if let Some(session) = &evicted {
            tracing::info!(
                session_id,
                events = session.cache().len(),
                "Evicted live session"
            );
        }
        evicted
    }

    pub fn append(&mut self, session_id: &str, raw: &Value) -> Result<CacheChange, LiveError> {
        Ok(self.require(session_id)?.ingest(raw))
    }

    pub fn replace(&mut self, session_id: &str, records: &[Value]) -> Result<CacheChange, LiveError> {
        Ok(self.require(session_id)?.reload(records))
    }

    pub fn begin_backfill(&mut self, session_id: &str) -> Result<BackfillTicket, LiveError> {
        Ok(self.require(session_id)?.begin_backfill())
    }

    /// Drop a backfill whose response will never arrive. Stale tickets and
    /// closed sessions are ignored.
    pub fn abandon_backfill(&mut self, ticket: BackfillTicket) {
        if let Some(session) = self.sessions.get_mut(ticket.session_id()) {
            session.abandon_backfill(ticket);
        }
    }

    /// Route a backfill outcome to the session it was started for.
    ///
    /// Returns `None` when that session has been evicted, replaced by a new
    /// instance under the same id, or has started a newer backfill since; the
    /// response is dropped untouched.
    pub fn complete_backfill(
        &mut self,
        ticket: BackfillTicket,
        result: Result<Vec<Value>, TransportError>,
    ) -> Option<Result<CacheChange, LiveError>> {
        let Some(session) = self.sessions.get_mut(ticket.session_id()) else {
            tracing::debug!(
                session_id = ticket.session_id(),
                "Abandoning backfill for closed session"
            );
            return None;
        };
        if !session.is_current(&ticket) {
            tracing::debug!(
                session_id = ticket.session_id(),
                generation = ticket.generation(),
                "Abandoning stale backfill"
            );
            return None;
        }
        Some(session.complete_backfill(ticket, result))
    }

    fn require(&mut self, session_id: &str) -> Result<&mut LiveSession, LiveError> {
        self.sessions
            .get_mut(session_id)
            .ok_or_else(|| LiveError::UnknownSession(session_id.to_string()))
    }
}
