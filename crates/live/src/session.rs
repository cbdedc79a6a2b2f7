//! One reconstruction instance per session id.
//!
//! [`LiveSession`] owns the event cache, the incremental turn builder and the
//! viewport. Every mutation runs to completion, produces a fresh immutable
//! [`SessionSnapshot`] and publishes it on a watch channel.

use crate::cache::{CacheChange, SessionCache};
use crate::error::LiveError;
use crate::transport::{BackfillCursor, BackfillRequest, InboundMessage, TransportError};
use crate::viewport::{ScrollAction, Viewport, ViewportInput, ViewportState};
use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use turnline_core::{normalize, normalize_all, Event, MessageClassifier, PatternClassifier};
use turnline_runtime_config::RuntimeConfig;
use turnline_transcript::{BatchPolicy, ResponseItem, TranscriptSnapshot, TurnBuilder};
use uuid::Uuid;

/// Knobs shared by every session a host opens.
#[derive(Clone)]
pub struct SessionOptions {
    pub classifier: Arc<dyn MessageClassifier>,
    pub batch_policy: BatchPolicy,
    pub auto_follow_threshold_rows: usize,
    pub backfill_page_size: usize,
    pub backfill_timeout: Duration,
    /// Capacity of channels made by [`LiveSession::inbound_channel`].
    pub inbound_capacity: usize,
}

impl Default for SessionOptions {
    fn default() -> Self {
        Self::from_settings(&RuntimeConfig::default(), Arc::new(PatternClassifier::default()))
    }
}

impl std::fmt::Debug for SessionOptions {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionOptions")
            .field("batch_policy", &self.batch_policy)
            .field("auto_follow_threshold_rows", &self.auto_follow_threshold_rows)
            .field("backfill_page_size", &self.backfill_page_size)
            .field("backfill_timeout", &self.backfill_timeout)
            .field("inbound_capacity", &self.inbound_capacity)
            .finish_non_exhaustive()
    }
}

impl SessionOptions {
    /// Build options from loaded configuration. Custom system-message
    /// patterns replace the built-in ones.
    pub fn from_config(config: &RuntimeConfig) -> Result<Self, LiveError> {
        let patterns = &config.transcript.system_patterns;
        let classifier = if patterns.is_empty() {
            PatternClassifier::default()
        } else {
            PatternClassifier::new(patterns)?
        };
        Ok(Self::from_settings(config, Arc::new(classifier)))
    }

    fn from_settings(config: &RuntimeConfig, classifier: Arc<dyn MessageClassifier>) -> Self {
        let fields = &config.transcript.batch_target_fields;
        let batch_policy = if fields.is_empty() {
            BatchPolicy::default()
        } else {
            BatchPolicy::new(fields)
        };
        Self {
            classifier,
            batch_policy,
            auto_follow_threshold_rows: config.viewport.auto_follow_threshold_rows,
            backfill_page_size: config.backfill.page_size,
            backfill_timeout: config.backfill.timeout(),
            inbound_capacity: config.inbound.channel_capacity,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Connectivity {
    Connected,
    Disconnected,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum BackfillStatus {
    Idle,
    Loading,
    Failed { error: String, retryable: bool },
    /// The last page came back short; there is nothing earlier.
    Exhausted,
}

/// Everything a consumer may read, frozen at one revision.
#[derive(Debug, Clone, Serialize)]
pub struct SessionSnapshot {
    pub session_id: String,
    pub epoch: Uuid,
    pub revision: u64,
    pub transcript: Arc<TranscriptSnapshot>,
    pub viewport: ViewportState,
    pub connectivity: Connectivity,
    pub backfill: BackfillStatus,
    pub fresh_at: Option<DateTime<Utc>>,
}

/// Proof that a backfill was started against a particular session instance.
///
/// Only the most recent ticket of a live instance can be completed; starting
/// a new backfill, clearing or evicting the session makes older ones stale.
#[derive(Debug)]
pub struct BackfillTicket {
    epoch: Uuid,
    generation: u64,
    request: BackfillRequest,
}

impl BackfillTicket {
    pub fn session_id(&self) -> &str {
        &self.request.session_id
    }

    pub fn epoch(&self) -> Uuid {
        self.epoch
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn request(&self) -> &BackfillRequest {
        &self.request
    }
}

pub struct LiveSession {
    session_id: String,
    epoch: Uuid,
    options: SessionOptions,
    cache: SessionCache,
    builder: TurnBuilder,
    transcript: Arc<TranscriptSnapshot>,
    viewport: Viewport,
    connectivity: Connectivity,
    backfill: BackfillStatus,
    /// Bumped whenever outstanding backfill tickets must stop applying.
    backfill_generation: u64,
    revision: u64,
    changes: watch::Sender<Arc<SessionSnapshot>>,
}

impl std::fmt::Debug for LiveSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LiveSession")
            .field("session_id", &self.session_id)
            .field("epoch", &self.epoch)
            .field("events", &self.cache.len())
            .field("turns", &self.transcript.len())
            .field("revision", &self.revision)
            .finish_non_exhaustive()
    }
}

impl LiveSession {
    pub fn new(session_id: impl Into<String>, options: SessionOptions) -> Self {
        let session_id = session_id.into();
        let epoch = Uuid::new_v4();
        let viewport = Viewport::new(options.auto_follow_threshold_rows);
        let transcript = Arc::new(TranscriptSnapshot::default());
        let initial = SessionSnapshot {
            session_id: session_id.clone(),
            epoch,
            revision: 0,
            transcript: Arc::clone(&transcript),
            viewport: viewport.state(),
            connectivity: Connectivity::Connected,
            backfill: BackfillStatus::Idle,
            fresh_at: None,
        };
        let (changes, _) = watch::channel(Arc::new(initial));

        Self {
            cache: SessionCache::new(session_id.clone()),
            builder: TurnBuilder::new(Arc::clone(&options.classifier)),
            session_id,
            epoch,
            options,
            transcript,
            viewport,
            connectivity: Connectivity::Connected,
            backfill: BackfillStatus::Idle,
            backfill_generation: 0,
            revision: 0,
            changes,
        }
    }

    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    pub fn epoch(&self) -> Uuid {
        self.epoch
    }

    pub fn options(&self) -> &SessionOptions {
        &self.options
    }

    pub fn cache(&self) -> &SessionCache {
        &self.cache
    }

    pub fn transcript(&self) -> &Arc<TranscriptSnapshot> {
        &self.transcript
    }

    pub fn viewport(&self) -> ViewportState {
        self.viewport.state()
    }

    /// Latest published snapshot.
    pub fn snapshot(&self) -> Arc<SessionSnapshot> {
        Arc::clone(&self.changes.borrow())
    }

    /// Change signal for the rendering layer.
    pub fn subscribe(&self) -> watch::Receiver<Arc<SessionSnapshot>> {
        self.changes.subscribe()
    }

    /// Inbound channel sized by [`SessionOptions::inbound_capacity`].
    pub fn inbound_channel(&self) -> (mpsc::Sender<InboundMessage>, mpsc::Receiver<InboundMessage>) {
        crate::transport::inbound_channel(self.options.inbound_capacity)
    }

    /// Batched view of one turn, using the session's batch policy.
    pub fn batched(&self, turn_index: usize) -> Option<Vec<ResponseItem>> {
        self.transcript.batched(turn_index, &self.options.batch_policy)
    }

    /// Id of the newest event; where a reconnect should resume from.
    pub fn resume_cursor(&self) -> Option<&str> {
        self.cache.last_id()
    }

    // ── Inbound ────────────────────────────────────────────────────────────

    /// Normalize and append one raw record. Unrecognized records are skipped.
    pub fn ingest(&mut self, raw: &Value) -> CacheChange {
        match normalize(raw) {
            Some(event) => self.ingest_event(Arc::new(event)),
            None => CacheChange::Unchanged,
        }
    }

    pub fn ingest_event(&mut self, event: Arc<Event>) -> CacheChange {
        let start = self.cache.len();
        if !self.cache.append(Arc::clone(&event)) {
            return CacheChange::Unchanged;
        }
        self.builder.push(event);
        let change = CacheChange::Appended { start };
        self.refresh(change);
        change
    }

    /// Append a delivery of several records as one update.
    pub fn ingest_batch(&mut self, records: &[Value]) -> CacheChange {
        let events = normalize_all(records).into_iter().map(Arc::new);
        let change = self.cache.append_all(events);
        if let CacheChange::Appended { start } = change {
            self.builder.extend(&self.cache.events()[start..]);
        }
        self.refresh(change);
        change
    }

    /// Merge a full (re)load of the session history.
    pub fn reload(&mut self, records: &[Value]) -> CacheChange {
        let events = normalize_all(records).into_iter().map(Arc::new);
        let change = self.cache.replace(events);
        self.absorb(change);
        change
    }

    // ── Backfill ───────────────────────────────────────────────────────────

    /// Start a "load earlier" request.
    ///
    /// A request still in flight is superseded: its ticket turns stale and
    /// its response will be dropped.
    pub fn begin_backfill(&mut self) -> BackfillTicket {
        if self.backfill == BackfillStatus::Loading {
            tracing::debug!(
                session_id = %self.session_id,
                generation = self.backfill_generation,
                "Superseding pending backfill"
            );
        }
        self.backfill_generation += 1;
        let cursor = match self.cache.oldest_id() {
            Some(id) => BackfillCursor::BeforeId(id.to_string()),
            None => BackfillCursor::Loaded(0),
        };
        let request = BackfillRequest {
            session_id: self.session_id.clone(),
            cursor,
            limit: self.options.backfill_page_size,
        };
        tracing::debug!(
            session_id = %self.session_id,
            cursor = ?request.cursor,
            limit = request.limit,
            "Starting backfill"
        );
        self.backfill = BackfillStatus::Loading;
        self.publish();
        BackfillTicket {
            epoch: self.epoch,
            generation: self.backfill_generation,
            request,
        }
    }

    /// Whether `ticket` belongs to this instance's latest backfill.
    pub fn is_current(&self, ticket: &BackfillTicket) -> bool {
        ticket.epoch == self.epoch
            && ticket.generation == self.backfill_generation
            && ticket.request.session_id == self.session_id
    }

    /// Give up on a backfill whose response will never be applied, e.g.
    /// because the request future was dropped. Returns false for stale
    /// tickets, which leave the session as it is.
    pub fn abandon_backfill(&mut self, ticket: BackfillTicket) -> bool {
        if !self.is_current(&ticket) {
            return false;
        }
        self.backfill_generation += 1;
        if self.backfill == BackfillStatus::Loading {
            tracing::debug!(session_id = %self.session_id, "Abandoned backfill");
            self.backfill = BackfillStatus::Idle;
            self.publish();
        }
        true
    }

    /// Apply the outcome of a backfill started with [`Self::begin_backfill`].
    ///
    /// A failure leaves the cache untouched, records a retryable status and
    /// returns the transport error.
    pub fn complete_backfill(
        &mut self,
        ticket: BackfillTicket,
        result: Result<Vec<Value>, TransportError>,
    ) -> Result<CacheChange, LiveError> {
        if !self.is_current(&ticket) {
            return Err(LiveError::StaleTicket(ticket.request.session_id));
        }
        self.backfill_generation += 1;

        let records = match result {
            Ok(records) => records,
            Err(err) => {
                tracing::warn!(session_id = %self.session_id, "Backfill failed: {}", err);
                self.backfill = BackfillStatus::Failed {
                    error: err.to_string(),
                    retryable: err.is_retryable(),
                };
                self.publish();
                return Err(err.into());
            }
        };

        let exhausted = records.len() < ticket.request.limit;
        let events = normalize_all(&records).into_iter().map(Arc::new);
        let change = self.cache.prepend(events);
        self.backfill = if exhausted {
            BackfillStatus::Exhausted
        } else {
            BackfillStatus::Idle
        };
        if change.is_changed() {
            self.absorb(change);
        } else {
            self.publish();
        }
        Ok(change)
    }

    // ── Connectivity and viewport ──────────────────────────────────────────

    pub fn mark_disconnected(&mut self) {
        if self.connectivity == Connectivity::Disconnected {
            return;
        }
        tracing::info!(
            session_id = %self.session_id,
            resume_from = self.cache.last_id().unwrap_or(""),
            "Session stream disconnected"
        );
        self.connectivity = Connectivity::Disconnected;
        self.publish();
    }

    pub fn mark_connected(&mut self) {
        if self.connectivity == Connectivity::Connected {
            return;
        }
        tracing::info!(session_id = %self.session_id, "Session stream reconnected");
        self.connectivity = Connectivity::Connected;
        self.publish();
    }

    pub fn apply_viewport(&mut self, input: ViewportInput) -> ScrollAction {
        let action = self.viewport.apply(input);
        self.publish();
        action
    }

    /// Drop all events and derived state. The epoch is kept.
    pub fn clear(&mut self) {
        self.cache.clear();
        self.builder.reset();
        self.transcript = Arc::new(TranscriptSnapshot::default());
        self.viewport.reset();
        self.backfill = BackfillStatus::Idle;
        self.backfill_generation += 1;
        self.publish();
    }

    // ── Internals ──────────────────────────────────────────────────────────

    /// Bring the builder in line with a cache change, then refresh.
    fn absorb(&mut self, change: CacheChange) {
        match change {
            CacheChange::Unchanged => {}
            CacheChange::Appended { start } => {
                self.builder.extend(&self.cache.events()[start..]);
            }
            CacheChange::Rebuilt => self.builder.rebuild(self.cache.events()),
        }
        self.refresh(change);
    }

    fn refresh(&mut self, change: CacheChange) {
        let input = match change {
            CacheChange::Unchanged => return,
            CacheChange::Appended { start } => {
                self.transcript = Arc::new(self.builder.snapshot());
                ViewportInput::ContentAppended {
                    turn_count: self.transcript.len(),
                    events_added: self.cache.len().saturating_sub(start),
                }
            }
            CacheChange::Rebuilt => {
                let focused_id = self
                    .viewport
                    .focused_turn_index()
                    .and_then(|index| self.transcript.turn(index))
                    .map(|turn| turn.id.clone());
                self.transcript = Arc::new(self.builder.snapshot());
                ViewportInput::ContentReplaced {
                    turn_count: self.transcript.len(),
                    focus_hint: focused_id.and_then(|id| self.transcript.position(&id)),
                }
            }
        };
        self.viewport.apply(input);
        self.publish();
    }

    fn publish(&mut self) {
        self.revision += 1;
        let snapshot = SessionSnapshot {
            session_id: self.session_id.clone(),
            epoch: self.epoch,
            revision: self.revision,
            transcript: Arc::clone(&self.transcript),
            viewport: self.viewport.state(),
            connectivity: self.connectivity,
            backfill: self.backfill.clone(),
            fresh_at: self.cache.fresh_at(),
        };
        self.changes.send_replace(Arc::new(snapshot));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::viewport::Navigation;
    use serde_json::json;

    fn record(id: &str, kind: &str, content: &str) -> Value {
        json!({ "id": id, "type": kind, "content": content })
    }

    #[test]
    fn ingest_builds_turns_and_publishes() {
        let mut session = LiveSession::new("s1", SessionOptions::default());
        let changes = session.subscribe();

        session.ingest(&record("u1", "user", "hi"));
        session.ingest(&record("a1", "assistant", "hello"));

        let snapshot = changes.borrow().clone();
        assert_eq!(snapshot.revision, 2);
        assert_eq!(snapshot.transcript.len(), 1);
        let turn = snapshot.transcript.turns()[0]
            .as_normal()
            .expect("normal turn");
        assert_eq!(
            turn.user_message.as_ref().and_then(|e| e.text()),
            Some("hi")
        );
        assert_eq!(turn.response_events.len(), 1);
    }

    #[test]
    fn duplicate_and_unknown_records_do_not_publish() {
        let mut session = LiveSession::new("s1", SessionOptions::default());
        session.ingest(&record("u1", "user", "hi"));
        let before = session.snapshot().revision;

        assert_eq!(
            session.ingest(&record("u1", "user", "hi")),
            CacheChange::Unchanged
        );
        assert_eq!(
            session.ingest(&json!({"id": "x", "type": "heartbeat"})),
            CacheChange::Unchanged
        );
        assert_eq!(session.ingest(&json!({"type": "user"})), CacheChange::Unchanged);
        assert_eq!(session.snapshot().revision, before);
    }

    #[test]
    fn new_backfill_supersedes_pending_one() {
        let mut session = LiveSession::new("s1", SessionOptions::default());
        let first = session.begin_backfill();
        assert_eq!(first.request().cursor, BackfillCursor::Loaded(0));
        // the first ticket is dropped by its owner without completing
        let second = session.begin_backfill();
        assert!(!session.is_current(&first));

        let err = session
            .complete_backfill(first, Ok(vec![record("u0", "user", "old")]))
            .expect_err("superseded");
        assert!(matches!(err, LiveError::StaleTicket(_)));
        assert!(session.cache().is_empty());
        assert_eq!(session.snapshot().backfill, BackfillStatus::Loading);

        session
            .complete_backfill(second, Ok(Vec::new()))
            .expect("complete");
        assert_eq!(session.snapshot().backfill, BackfillStatus::Exhausted);
    }

    #[test]
    fn abandoned_backfill_returns_to_idle() {
        let mut session = LiveSession::new("s1", SessionOptions::default());
        let ticket = session.begin_backfill();
        let request = ticket.request().clone();
        assert!(session.abandon_backfill(ticket));
        assert_eq!(session.snapshot().backfill, BackfillStatus::Idle);

        let next = session.begin_backfill();
        assert_eq!(next.request(), &request);
        assert!(session.is_current(&next));
    }

    #[test]
    fn ticket_is_stale_after_clear() {
        let mut session = LiveSession::new("s1", SessionOptions::default());
        let ticket = session.begin_backfill();
        session.clear();
        assert!(!session.abandon_backfill(ticket));
        assert_eq!(session.snapshot().backfill, BackfillStatus::Idle);
    }

    #[test]
    fn failed_backfill_keeps_cache_and_reports_retryable() {
        let mut session = LiveSession::new("s1", SessionOptions::default());
        session.ingest(&record("u5", "user", "later"));
        let ticket = session.begin_backfill();
        assert_eq!(
            ticket.request().cursor,
            BackfillCursor::BeforeId("u5".into())
        );

        let err = session
            .complete_backfill(ticket, Err(TransportError::Failed("503".into())))
            .expect_err("transport failure");
        assert!(matches!(err, LiveError::Transport(_)));
        assert_eq!(session.cache().len(), 1);
        assert!(matches!(
            session.snapshot().backfill,
            BackfillStatus::Failed {
                retryable: true,
                ..
            }
        ));
        let retry = session.begin_backfill();
        assert!(session.is_current(&retry));
    }

    #[test]
    fn ticket_from_another_instance_is_stale() {
        let mut first = LiveSession::new("s1", SessionOptions::default());
        let mut second = LiveSession::new("s1", SessionOptions::default());
        let ticket = first.begin_backfill();
        let err = second
            .complete_backfill(ticket, Ok(vec![record("u0", "user", "old")]))
            .expect_err("stale");
        assert!(matches!(err, LiveError::StaleTicket(_)));
        assert!(second.cache().is_empty());
    }

    #[test]
    fn prepend_keeps_focus_on_same_turn() {
        let mut session = LiveSession::new("s1", SessionOptions::default());
        session.ingest(&record("u3", "user", "c"));
        session.ingest(&record("u4", "user", "d"));
        session.apply_viewport(ViewportInput::Navigate(Navigation::Last));
        assert_eq!(session.viewport().focused_turn_index, Some(1));

        let ticket = session.begin_backfill();
        session
            .complete_backfill(
                ticket,
                Ok(vec![record("u1", "user", "a"), record("u2", "user", "b")]),
            )
            .expect("backfill");

        assert_eq!(session.transcript().len(), 4);
        assert_eq!(session.viewport().focused_turn_index, Some(3));
    }

    #[test]
    fn paused_viewport_counts_new_turns() {
        let mut session = LiveSession::new("s1", SessionOptions::default());
        session.ingest(&record("u1", "user", "a"));
        session.apply_viewport(ViewportInput::Scrolled {
            rows_from_bottom: 30,
        });
        session.ingest(&record("u2", "user", "b"));
        session.ingest(&record("a2", "assistant", "b'"));

        let viewport = session.viewport();
        assert!(!viewport.follow_mode);
        assert_eq!(viewport.unseen_turns, 1);
        assert!(viewport.new_items_available());

        assert_eq!(
            session.apply_viewport(ViewportInput::Resume),
            ScrollAction::JumpToLatest
        );
        assert!(!session.viewport().new_items_available());
    }

    #[test]
    fn paused_viewport_notices_streaming_into_open_turn() {
        let mut session = LiveSession::new("s1", SessionOptions::default());
        session.ingest(&record("u1", "user", "a"));
        session.apply_viewport(ViewportInput::Scrolled {
            rows_from_bottom: 30,
        });
        session.ingest(&record("a1", "assistant", "partial"));
        session.ingest(&record("a2", "assistant", "more"));

        let viewport = session.viewport();
        assert_eq!(session.transcript().len(), 1);
        assert_eq!(viewport.unseen_turns, 0);
        assert_eq!(viewport.unseen_events, 2);
        assert!(viewport.new_items_available());
    }

    #[test]
    fn custom_patterns_come_from_config() {
        let mut config = RuntimeConfig::default();
        config.transcript.system_patterns = vec![r"^\[HANDOFF\]".into()];
        let options = SessionOptions::from_config(&config).expect("options");
        assert!(options.classifier.is_system_message("[HANDOFF] go"));
        assert!(!options.classifier.is_system_message("[AUTO-HANDOFF] go"));

        config.transcript.system_patterns = vec!["(".into()];
        assert!(matches!(
            SessionOptions::from_config(&config),
            Err(LiveError::InvalidPattern(_))
        ));
    }

    #[test]
    fn config_sizes_channel_and_batch_policy() {
        let mut config = RuntimeConfig::default();
        let options = SessionOptions::from_config(&config).expect("options");
        assert_eq!(options.inbound_capacity, 256);
        assert_eq!(
            options.batch_policy.target_fields(),
            BatchPolicy::default().target_fields()
        );

        config.inbound.channel_capacity = 3;
        config.transcript.batch_target_fields = vec!["url".into()];
        let options = SessionOptions::from_config(&config).expect("options");
        assert_eq!(options.batch_policy.target_fields(), ["url".to_string()]);

        let session = LiveSession::new("s1", options);
        let (tx, _rx) = session.inbound_channel();
        assert_eq!(tx.max_capacity(), 3);
    }
}
