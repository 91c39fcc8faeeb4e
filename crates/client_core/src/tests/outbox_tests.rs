use super::*;
use std::collections::VecDeque;

use chrono::{DateTime, Duration as ChronoDuration};
use shared::{domain::Outcome, protocol::SwipeResponse};
use tokio::sync::Mutex;
use uuid::Uuid;

/// Replies from a script, then succeeds once the script runs dry (or keeps
/// failing with `fallback` when set).
struct ScriptedSink {
    script: Mutex<VecDeque<SyncError>>,
    fallback: Option<SyncError>,
    submitted: Mutex<Vec<Decision>>,
}

impl ScriptedSink {
    fn new(script: impl IntoIterator<Item = SyncError>) -> Self {
        Self {
            script: Mutex::new(script.into_iter().collect()),
            fallback: None,
            submitted: Mutex::new(Vec::new()),
        }
    }

    fn always(error: SyncError) -> Self {
        Self {
            fallback: Some(error),
            ..Self::new([])
        }
    }
}

#[async_trait]
impl DecisionSink for ScriptedSink {
    async fn submit(&self, decision: &Decision) -> Result<SwipeResponse, SyncError> {
        self.submitted.lock().await.push(*decision);
        if let Some(err) = self.script.lock().await.pop_front() {
            return Err(err);
        }
        if let Some(err) = &self.fallback {
            return Err(err.clone());
        }
        Ok(SwipeResponse {
            success: true,
            message: "Swipe recorded".into(),
            seeker_profile_id: decision.item_id,
            decision: decision.outcome.as_wire().into(),
        })
    }
}

fn fast_policy(max_attempts: u32) -> RetryPolicy {
    RetryPolicy {
        base_delay: Duration::from_millis(1),
        factor: 2,
        max_delay: Duration::from_millis(4),
        max_attempts,
    }
}

async fn outbox(sink: Arc<ScriptedSink>, max_attempts: u32) -> DecisionOutbox {
    let storage = Storage::new("sqlite::memory:").await.expect("memory storage");
    DecisionOutbox::new(storage, sink, fast_policy(max_attempts))
}

fn decision(outcome: Outcome) -> Decision {
    Decision::new(ItemId(Uuid::new_v4()), outcome)
}

fn network_down() -> SyncError {
    SyncError::Network("connection refused".into())
}

#[test]
fn backoff_doubles_up_to_the_cap() {
    let policy = RetryPolicy::default();
    assert_eq!(policy.delay_for(1), Duration::from_millis(500));
    assert_eq!(policy.delay_for(2), Duration::from_secs(1));
    assert_eq!(policy.delay_for(4), Duration::from_secs(4));
    assert_eq!(policy.delay_for(7), Duration::from_secs(30));
    assert_eq!(policy.delay_for(40), Duration::from_secs(30));
}

#[tokio::test]
async fn acknowledged_decision_is_settled() {
    let sink = Arc::new(ScriptedSink::new([]));
    let outbox = outbox(sink.clone(), 3).await;
    let accepted = decision(Outcome::Accept);

    outbox.dispatch(accepted).await.expect("dispatch");

    assert_eq!(*sink.submitted.lock().await, vec![accepted]);
    assert_eq!(
        outbox.counts().await.expect("counts"),
        OutboxCounts {
            pending: 0,
            settled: 1
        }
    );
}

#[tokio::test]
async fn transient_failures_are_retried() {
    let sink = Arc::new(ScriptedSink::new([
        network_down(),
        SyncError::rejected(503, "Service Unavailable"),
    ]));
    let outbox = outbox(sink.clone(), 5).await;

    outbox.dispatch(decision(Outcome::Reject)).await.expect("dispatch");

    assert_eq!(sink.submitted.lock().await.len(), 3);
    assert_eq!(outbox.counts().await.expect("counts").settled, 1);
}

#[tokio::test]
async fn exhausted_retries_keep_the_decision_queued() {
    let sink = Arc::new(ScriptedSink::always(network_down()));
    let outbox = outbox(sink.clone(), 3).await;
    let pending = decision(Outcome::Accept);

    let err = outbox.dispatch(pending).await.expect_err("server down");
    assert_eq!(err, network_down());

    let queued = outbox.pending().await.expect("pending");
    assert_eq!(queued.len(), 1);
    assert_eq!(queued[0].item_id, pending.item_id);
    assert_eq!(queued[0].attempts, 3);
    assert!(queued[0]
        .last_error
        .as_deref()
        .is_some_and(|reason| reason.contains("connection refused")));
}

#[tokio::test]
async fn duplicate_submission_counts_as_settled() {
    let sink = Arc::new(ScriptedSink::new([SyncError::rejected(
        409,
        "Already swiped on this candidate",
    )]));
    let outbox = outbox(sink.clone(), 3).await;

    outbox.dispatch(decision(Outcome::Accept)).await.expect("duplicate is fine");

    assert_eq!(sink.submitted.lock().await.len(), 1);
    assert_eq!(outbox.counts().await.expect("counts").pending, 0);
}

#[tokio::test]
async fn permanent_rejection_is_not_retried() {
    let sink = Arc::new(ScriptedSink::always(SyncError::rejected(
        404,
        "Seeker not found",
    )));
    let outbox = outbox(sink.clone(), 5).await;

    let err = outbox
        .dispatch(decision(Outcome::Reject))
        .await
        .expect_err("rejected");
    assert_eq!(err, SyncError::rejected(404, "Seeker not found"));
    assert_eq!(sink.submitted.lock().await.len(), 1);
    assert_eq!(
        outbox.counts().await.expect("counts"),
        OutboxCounts {
            pending: 0,
            settled: 1
        }
    );
}

#[tokio::test]
async fn flush_replays_oldest_first() {
    let sink = Arc::new(ScriptedSink::new([]));
    let outbox = outbox(sink.clone(), 3).await;
    let base = DateTime::parse_from_rfc3339("2024-05-01T10:00:00Z")
        .expect("timestamp")
        .with_timezone(&Utc);

    let mut queued = Vec::new();
    for (offset, outcome) in [(30, Outcome::Accept), (10, Outcome::Reject), (20, Outcome::Accept)] {
        let mut next = decision(outcome);
        next.issued_at = base + ChronoDuration::seconds(offset);
        assert!(outbox.record(&next).await.expect("record"));
        queued.push(next);
    }
    assert!(!outbox.record(&queued[0]).await.expect("re-record"));

    let report = outbox.flush().await.expect("flush");
    assert_eq!(report.delivered, 3);
    assert_eq!(report.remaining, 0);

    let order: Vec<ItemId> = sink
        .submitted
        .lock()
        .await
        .iter()
        .map(|d| d.item_id)
        .collect();
    assert_eq!(
        order,
        vec![queued[1].item_id, queued[2].item_id, queued[0].item_id]
    );
}

#[tokio::test]
async fn flush_stops_when_the_service_is_unreachable() {
    let sink = Arc::new(ScriptedSink::always(network_down()));
    let outbox = outbox(sink.clone(), 2).await;
    for _ in 0..3 {
        outbox.record(&decision(Outcome::Accept)).await.expect("record");
    }

    let report = outbox.flush().await.expect("flush");
    assert_eq!(
        report,
        FlushReport {
            delivered: 0,
            rejected: 0,
            failed: 1,
            remaining: 3
        }
    );
    assert_eq!(sink.submitted.lock().await.len(), 2);
}

#[tokio::test]
async fn redispatch_delivers_the_originally_stored_outcome() {
    let sink = Arc::new(ScriptedSink::new([network_down()]));
    let outbox = outbox(sink.clone(), 1).await;
    let first = decision(Outcome::Accept);

    outbox.dispatch(first).await.expect_err("first attempt fails");
    let flipped = Decision {
        outcome: Outcome::Reject,
        ..first
    };
    outbox.dispatch(flipped).await.expect("second dispatch");

    let submitted = sink.submitted.lock().await;
    assert_eq!(submitted.len(), 2);
    assert_eq!(submitted[1].outcome, Outcome::Accept);
}
