//! Async edges of a live session: the inbound push channel and "load
//! earlier" backfill requests.
//!
//! Reconstruction itself never awaits. Suspension happens only here, while
//! waiting for the next pushed record or for a backfill response.

use crate::error::LiveError;
use crate::session::{BackfillTicket, LiveSession};
use crate::CacheChange;
use serde::Serialize;
use serde_json::Value;
use std::future::Future;
use std::time::Duration;
use tokio::sync::mpsc;

/// One message on a session's inbound channel.
#[derive(Debug, Clone)]
pub enum InboundMessage {
    Record(Value),
    Batch(Vec<Value>),
    Disconnected,
    /// The stream came back. `history` is whatever the source resent after
    /// the resume cursor; already-seen ids are dropped.
    Reconnected { history: Vec<Value> },
}

/// Where a backfill page should end.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum BackfillCursor {
    /// Events strictly older than this id.
    BeforeId(String),
    /// Skip this many events counted from the newest.
    Loaded(usize),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BackfillRequest {
    pub session_id: String,
    pub cursor: BackfillCursor,
    pub limit: usize,
}

#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum TransportError {
    #[error("backfill timed out after {}ms", .0.as_millis())]
    Timeout(Duration),
    #[error("transport closed")]
    Closed,
    #[error("transport failed: {0}")]
    Failed(String),
}

impl TransportError {
    pub fn is_retryable(&self) -> bool {
        !matches!(self, TransportError::Closed)
    }
}

/// Supplies earlier history for a session, oldest first.
pub trait BackfillSource {
    fn fetch_earlier(
        &self,
        request: &BackfillRequest,
    ) -> impl Future<Output = Result<Vec<Value>, TransportError>> + Send;
}

/// Run a backfill request with a deadline.
pub async fn fetch_backfill<S>(
    source: &S,
    request: &BackfillRequest,
    deadline: Duration,
) -> Result<Vec<Value>, TransportError>
where
    S: BackfillSource + ?Sized,
{
    match tokio::time::timeout(deadline, source.fetch_earlier(request)).await {
        Ok(result) => result,
        Err(_) => Err(TransportError::Timeout(deadline)),
    }
}

/// Holds the session while a backfill is outstanding. Dropping it before
/// completion (the caller's future was cancelled) abandons the ticket so
/// the session does not stay `Loading`.
struct PendingBackfill<'a> {
    session: &'a mut LiveSession,
    ticket: Option<BackfillTicket>,
}

impl PendingBackfill<'_> {
    fn complete(
        mut self,
        result: Result<Vec<Value>, TransportError>,
    ) -> Result<CacheChange, LiveError> {
        match self.ticket.take() {
            Some(ticket) => self.session.complete_backfill(ticket, result),
            None => Ok(CacheChange::Unchanged),
        }
    }
}

impl Drop for PendingBackfill<'_> {
    fn drop(&mut self) {
        if let Some(ticket) = self.ticket.take() {
            self.session.abandon_backfill(ticket);
        }
    }
}

/// Fetch one page of earlier history and prepend it.
///
/// A failed or timed-out request leaves the cache as it was and shows up as
/// [`crate::BackfillStatus::Failed`] in the session snapshot. Dropping the
/// returned future puts the session back to idle.
pub async fn load_earlier<S>(session: &mut LiveSession, source: &S) -> Result<CacheChange, LiveError>
where
    S: BackfillSource + ?Sized,
{
    let ticket = session.begin_backfill();
    let request = ticket.request().clone();
    let deadline = session.options().backfill_timeout;
    let pending = PendingBackfill {
        session,
        ticket: Some(ticket),
    };
    let result = fetch_backfill(source, &request, deadline).await;
    pending.complete(result)
}

pub fn inbound_channel(
    capacity: usize,
) -> (mpsc::Sender<InboundMessage>, mpsc::Receiver<InboundMessage>) {
    mpsc::channel(capacity.max(1))
}

/// Apply one inbound message to completion.
pub fn apply_inbound(session: &mut LiveSession, message: InboundMessage) -> CacheChange {
    match message {
        InboundMessage::Record(raw) => session.ingest(&raw),
        InboundMessage::Batch(records) => session.ingest_batch(&records),
        InboundMessage::Disconnected => {
            session.mark_disconnected();
            CacheChange::Unchanged
        }
        InboundMessage::Reconnected { history } => {
            session.mark_connected();
            session.ingest_batch(&history)
        }
    }
}

/// Drain the inbound channel until every sender is gone. Messages are
/// processed one at a time, in order. Returns the number handled.
pub async fn pump_inbound(
    session: &mut LiveSession,
    inbound: &mut mpsc::Receiver<InboundMessage>,
) -> usize {
    let mut handled = 0;
    while let Some(message) = inbound.recv().await {
        apply_inbound(session, message);
        handled += 1;
    }
    tracing::debug!(
        session_id = %session.session_id(),
        handled,
        "Inbound channel closed"
    );
    session.mark_disconnected();
    handled
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    struct Never;

    impl BackfillSource for Never {
        fn fetch_earlier(
            &self,
            _request: &BackfillRequest,
        ) -> impl Future<Output = Result<Vec<Value>, TransportError>> + Send {
            std::future::pending()
        }
    }

    struct Fixed(Vec<Value>);

    impl BackfillSource for Fixed {
        fn fetch_earlier(
            &self,
            _request: &BackfillRequest,
        ) -> impl Future<Output = Result<Vec<Value>, TransportError>> + Send {
            let records = self.0.clone();
            async move { Ok(records) }
        }
    }

    #[test]
    fn closed_transport_is_not_retryable() {
        assert!(!TransportError::Closed.is_retryable());
        assert!(TransportError::Timeout(Duration::from_secs(1)).is_retryable());
        assert!(TransportError::Failed("502".into()).is_retryable());
    }

    #[tokio::test(start_paused = true)]
    async fn fetch_backfill_times_out() {
        let mut session = LiveSession::new("s1", Default::default());
        let ticket = session.begin_backfill();
        let err = fetch_backfill(&Never, ticket.request(), Duration::from_millis(50))
            .await
            .expect_err("deadline");
        assert!(matches!(err, TransportError::Timeout(_)));
    }

    #[tokio::test]
    async fn load_earlier_prepends_page() {
        let mut session = LiveSession::new("s1", Default::default());
        session.ingest(&json!({"id": "u2", "type": "user", "content": "later"}));
        let source = Fixed(vec![json!({"id": "u1", "type": "user", "content": "first"})]);

        let change = load_earlier(&mut session, &source).await.expect("backfill");
        assert_eq!(change, CacheChange::Rebuilt);
        assert_eq!(session.cache().oldest_id(), Some("u1"));
    }

    #[tokio::test(start_paused = true)]
    async fn cancelled_load_earlier_does_not_block_next_backfill() {
        let mut session = LiveSession::new("s1", Default::default());
        session.ingest(&json!({"id": "u2", "type": "user", "content": "later"}));

        let cancelled =
            tokio::time::timeout(Duration::from_millis(10), load_earlier(&mut session, &Never))
                .await;
        assert!(cancelled.is_err());
        assert_eq!(session.snapshot().backfill, crate::BackfillStatus::Idle);

        let source = Fixed(vec![json!({"id": "u1", "type": "user", "content": "first"})]);
        let change = load_earlier(&mut session, &source).await.expect("backfill");
        assert_eq!(change, CacheChange::Rebuilt);
        assert_eq!(session.cache().oldest_id(), Some("u1"));
    }

    #[tokio::test]
    async fn pump_applies_in_order_and_marks_disconnect() {
        let mut session = LiveSession::new("s1", Default::default());
        let (tx, mut rx) = inbound_channel(4);
        tx.send(InboundMessage::Record(
            json!({"id": "u1", "type": "user", "content": "hi"}),
        ))
        .await
        .expect("send");
        tx.send(InboundMessage::Batch(vec![
            json!({"id": "a1", "type": "assistant", "content": "hello"}),
            json!({"id": "a1", "type": "assistant", "content": "hello"}),
        ]))
        .await
        .expect("send");
        drop(tx);

        assert_eq!(pump_inbound(&mut session, &mut rx).await, 2);
        assert_eq!(session.cache().len(), 2);
        assert_eq!(session.transcript().len(), 1);
        assert_eq!(
            session.snapshot().connectivity,
            crate::Connectivity::Disconnected
        );
    }
}
