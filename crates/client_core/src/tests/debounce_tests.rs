use super::*;
use async_trait::async_trait;
use std::collections::VecDeque;
use shared::domain::ProfileField;
use tokio::time::{sleep, Instant};

struct RecordingSink<K, V> {
    writes: Mutex<Vec<(K, V)>>,
    latency: Duration,
    // Per-call latencies consumed in order before falling back to `latency`.
    scripted: Mutex<VecDeque<Duration>>,
    fail: bool,
}

impl<K, V> RecordingSink<K, V> {
    fn new() -> Self {
        Self {
            writes: Mutex::new(Vec::new()),
            latency: Duration::ZERO,
            scripted: Mutex::new(VecDeque::new()),
            fail: false,
        }
    }

    fn scripted(latencies: impl IntoIterator<Item = Duration>) -> Self {
        Self {
            scripted: Mutex::new(latencies.into_iter().collect()),
            ..Self::new()
        }
    }

    fn with_latency(latency: Duration) -> Self {
        Self {
            latency,
            ..Self::new()
        }
    }

    fn failing() -> Self {
        Self {
            fail: true,
            ..Self::new()
        }
    }
}

#[async_trait]
impl<K, V> SyncSink<K, V> for RecordingSink<K, V>
where
    K: Clone + Send + Sync,
    V: Clone + Send + Sync,
{
    async fn commit(&self, key: &K, value: &V) -> Result<(), SyncError> {
        self.writes.lock().await.push((key.clone(), value.clone()));
        let latency = self
            .scripted
            .lock()
            .await
            .pop_front()
            .unwrap_or(self.latency);
        if !latency.is_zero() {
            sleep(latency).await;
        }
        if self.fail {
            return Err(SyncError::rejected(500, "Failed to update profile"));
        }
        Ok(())
    }
}

fn profile_queue(
    sink: RecordingSink<ProfileField, String>,
) -> (
    DebouncedSyncQueue<ProfileField, String>,
    Arc<RecordingSink<ProfileField, String>>,
) {
    let sink = Arc::new(sink);
    let queue: DebouncedSyncQueue<ProfileField, String> =
        DebouncedSyncQueue::new(DebounceConfig::profile(), sink.clone());
    (queue, sink)
}

#[tokio::test(start_paused = true)]
async fn rapid_edits_collapse_into_one_write_of_the_last_value() {
    let (queue, sink) = profile_queue(RecordingSink::new());

    queue.schedule(ProfileField::Headline, "Data".into()).await;
    sleep(Duration::from_millis(200)).await;
    queue
        .schedule(ProfileField::Headline, "Data Eng".into())
        .await;
    sleep(Duration::from_millis(200)).await;
    queue
        .schedule(ProfileField::Headline, "Data Engineer".into())
        .await;
    assert_eq!(queue.status(&ProfileField::Headline).await, SyncStatus::Pending);

    sleep(Duration::from_millis(450)).await;
    assert!(sink.writes.lock().await.is_empty(), "window restarted on each edit");

    sleep(Duration::from_millis(100)).await;
    assert_eq!(
        *sink.writes.lock().await,
        vec![(ProfileField::Headline, "Data Engineer".to_string())]
    );
    assert_eq!(
        queue.status(&ProfileField::Headline).await,
        SyncStatus::Committed
    );
    assert_eq!(
        queue.last_committed(&ProfileField::Headline).await.as_deref(),
        Some("Data Engineer")
    );

    sleep(Duration::from_millis(2100)).await;
    assert_eq!(queue.status(&ProfileField::Headline).await, SyncStatus::Idle);
}

#[tokio::test(start_paused = true)]
async fn two_edits_within_the_window_send_one_put() {
    let (queue, sink) = profile_queue(RecordingSink::new());

    queue.schedule(ProfileField::Bio, "first draft".into()).await;
    sleep(Duration::from_millis(300)).await;
    queue.schedule(ProfileField::Bio, "second draft".into()).await;
    sleep(Duration::from_secs(1)).await;

    assert_eq!(
        *sink.writes.lock().await,
        vec![(ProfileField::Bio, "second draft".to_string())]
    );
}

#[tokio::test(start_paused = true)]
async fn status_walks_through_the_save_lifecycle() {
    let (queue, _sink) = profile_queue(RecordingSink::with_latency(Duration::from_millis(50)));
    let mut events = queue.subscribe();

    queue.schedule(ProfileField::Location, "Lisbon".into()).await;
    sleep(Duration::from_secs(3)).await;

    let mut seen = Vec::new();
    while let Ok(change) = events.try_recv() {
        assert_eq!(change.key, ProfileField::Location);
        seen.push(change.status);
    }
    assert_eq!(
        seen,
        vec![
            SyncStatus::Pending,
            SyncStatus::Committing,
            SyncStatus::Committed,
            SyncStatus::Idle
        ]
    );
}

#[tokio::test(start_paused = true)]
async fn zero_window_sends_immediately() {
    let sink = Arc::new(RecordingSink::<&'static str, u8>::new());
    let queue: DebouncedSyncQueue<&'static str, u8> =
        DebouncedSyncQueue::new(DebounceConfig::answers(), sink.clone());

    queue.schedule("q1", 4).await;
    sleep(Duration::from_millis(1)).await;

    assert_eq!(*sink.writes.lock().await, vec![("q1", 4)]);
    assert_eq!(queue.status(&"q1").await, SyncStatus::Committed);
    sleep(Duration::from_millis(1600)).await;
    assert_eq!(queue.status(&"q1").await, SyncStatus::Idle);
}

#[tokio::test(start_paused = true)]
async fn failure_is_reported_then_reverts_without_retry() {
    let (queue, sink) = profile_queue(RecordingSink::failing());

    queue.schedule(ProfileField::Headline, "Rust dev".into()).await;
    assert_eq!(queue.flush(&ProfileField::Headline).await, SyncStatus::Failed);
    assert_eq!(queue.last_committed(&ProfileField::Headline).await, None);

    sleep(Duration::from_millis(2900)).await;
    assert_eq!(queue.status(&ProfileField::Headline).await, SyncStatus::Failed);
    sleep(Duration::from_millis(200)).await;
    assert_eq!(queue.status(&ProfileField::Headline).await, SyncStatus::Idle);

    sleep(Duration::from_secs(30)).await;
    assert_eq!(sink.writes.lock().await.len(), 1);
}

#[tokio::test(start_paused = true)]
async fn stuck_write_times_out_into_failed() {
    let (queue, _sink) = profile_queue(RecordingSink::with_latency(Duration::from_secs(60)));
    let started = Instant::now();

    queue.schedule(ProfileField::Bio, "long".into()).await;
    assert_eq!(queue.flush(&ProfileField::Bio).await, SyncStatus::Failed);

    let elapsed = started.elapsed();
    assert!(elapsed >= Duration::from_secs(10), "elapsed {elapsed:?}");
    assert!(elapsed < Duration::from_secs(11), "elapsed {elapsed:?}");
}

#[tokio::test(start_paused = true)]
async fn edit_during_flight_is_written_after_it_lands() {
    let (queue, sink) = profile_queue(RecordingSink::with_latency(Duration::from_secs(1)));

    queue.schedule(ProfileField::Headline, "v1".into()).await;
    sleep(Duration::from_millis(600)).await;
    assert_eq!(
        queue.status(&ProfileField::Headline).await,
        SyncStatus::Committing
    );

    queue.schedule(ProfileField::Headline, "v2".into()).await;
    assert_eq!(
        queue.status(&ProfileField::Headline).await,
        SyncStatus::Committing,
        "in-flight write keeps its status"
    );

    assert_eq!(
        queue.flush(&ProfileField::Headline).await,
        SyncStatus::Committed
    );
    assert_eq!(
        *sink.writes.lock().await,
        vec![
            (ProfileField::Headline, "v1".to_string()),
            (ProfileField::Headline, "v2".to_string())
        ]
    );
    assert_eq!(
        queue.last_committed(&ProfileField::Headline).await.as_deref(),
        Some("v2")
    );
}

#[tokio::test(start_paused = true)]
async fn unchanged_value_is_not_written_again() {
    let (queue, sink) = profile_queue(RecordingSink::new());

    queue.schedule(ProfileField::Location, "Porto".into()).await;
    assert_eq!(
        queue.flush(&ProfileField::Location).await,
        SyncStatus::Committed
    );

    queue.schedule(ProfileField::Location, "Porto".into()).await;
    assert_eq!(queue.flush(&ProfileField::Location).await, SyncStatus::Idle);
    assert_eq!(sink.writes.lock().await.len(), 1);
}

#[tokio::test(start_paused = true)]
async fn cancel_discards_the_pending_value() {
    let (queue, sink) = profile_queue(RecordingSink::new());

    queue.schedule(ProfileField::Bio, "oops".into()).await;
    assert_eq!(
        queue.cancel(&ProfileField::Bio).await.as_deref(),
        Some("oops")
    );
    assert_eq!(queue.status(&ProfileField::Bio).await, SyncStatus::Idle);
    assert_eq!(queue.pending(&ProfileField::Bio).await, None);

    sleep(Duration::from_secs(2)).await;
    assert!(sink.writes.lock().await.is_empty());
    assert_eq!(queue.cancel(&ProfileField::Headline).await, None);
}

#[tokio::test(start_paused = true)]
async fn flush_does_not_wait_for_the_window() {
    let (queue, sink) = profile_queue(RecordingSink::new());
    let started = Instant::now();

    queue.schedule(ProfileField::Headline, "Now".into()).await;
    assert_eq!(
        queue.flush(&ProfileField::Headline).await,
        SyncStatus::Committed
    );
    assert!(started.elapsed() < Duration::from_millis(500));
    assert_eq!(sink.writes.lock().await.len(), 1);

    sleep(Duration::from_secs(1)).await;
    assert_eq!(sink.writes.lock().await.len(), 1, "timer must not fire twice");
    assert_eq!(queue.flush(&ProfileField::Bio).await, SyncStatus::Idle);
}

#[tokio::test(start_paused = true)]
async fn keys_are_debounced_independently() {
    let (queue, sink) = profile_queue(RecordingSink::new());

    queue.schedule(ProfileField::Headline, "Backend".into()).await;
    sleep(Duration::from_millis(300)).await;
    queue.schedule(ProfileField::Location, "Oslo".into()).await;
    sleep(Duration::from_millis(250)).await;

    assert_eq!(
        *sink.writes.lock().await,
        vec![(ProfileField::Headline, "Backend".to_string())]
    );
    assert_eq!(queue.status(&ProfileField::Location).await, SyncStatus::Pending);

    let settled = queue.shutdown().await;
    assert_eq!(settled.len(), 2);
    assert!(settled
        .iter()
        .all(|(_, status)| *status == SyncStatus::Committed));
    assert_eq!(sink.writes.lock().await.len(), 2);
}

#[tokio::test(start_paused = true)]
async fn reverting_after_a_timed_out_write_sends_the_old_value_again() {
    let (queue, sink) = profile_queue(RecordingSink::scripted([
        Duration::ZERO,
        Duration::from_secs(60),
        Duration::ZERO,
    ]));

    queue.schedule(ProfileField::Headline, "A".into()).await;
    assert_eq!(
        queue.flush(&ProfileField::Headline).await,
        SyncStatus::Committed
    );

    // The server may still apply "B" after the client gave up on it.
    queue.schedule(ProfileField::Headline, "B".into()).await;
    assert_eq!(queue.flush(&ProfileField::Headline).await, SyncStatus::Failed);
    assert_eq!(queue.last_committed(&ProfileField::Headline).await, None);

    queue.schedule(ProfileField::Headline, "A".into()).await;
    assert_eq!(
        queue.flush(&ProfileField::Headline).await,
        SyncStatus::Committed
    );
    assert_eq!(
        *sink.writes.lock().await,
        vec![
            (ProfileField::Headline, "A".to_string()),
            (ProfileField::Headline, "B".to_string()),
            (ProfileField::Headline, "A".to_string())
        ]
    );
}

#[tokio::test(start_paused = true)]
async fn failed_write_does_not_suppress_the_mid_flight_follow_up() {
    let (queue, sink) = profile_queue(RecordingSink::scripted([
        Duration::ZERO,
        Duration::from_secs(60),
        Duration::ZERO,
    ]));

    queue.schedule(ProfileField::Bio, "A".into()).await;
    queue.flush(&ProfileField::Bio).await;

    queue.schedule(ProfileField::Bio, "B".into()).await;
    sleep(Duration::from_secs(1)).await;
    assert_eq!(queue.status(&ProfileField::Bio).await, SyncStatus::Committing);
    queue.schedule(ProfileField::Bio, "A".into()).await;

    assert_eq!(queue.flush(&ProfileField::Bio).await, SyncStatus::Committed);
    let writes = sink.writes.lock().await;
    assert_eq!(writes.len(), 3);
    assert_eq!(writes[2], (ProfileField::Bio, "A".to_string()));
}

#[tokio::test(start_paused = true)]
async fn settled_keys_are_forgotten_once_their_status_clears() {
    let sink = Arc::new(RecordingSink::<u32, u8>::new());
    let queue: DebouncedSyncQueue<u32, u8> =
        DebouncedSyncQueue::new(DebounceConfig::answers(), sink.clone());

    for question in 0..20 {
        queue.schedule(question, 3).await;
    }
    sleep(Duration::from_millis(1)).await;
    assert_eq!(queue.tracked_keys().await, 20);

    sleep(Duration::from_secs(2)).await;
    assert_eq!(queue.tracked_keys().await, 0);
    assert_eq!(queue.status(&7).await, SyncStatus::Idle);
    assert_eq!(sink.writes.lock().await.len(), 20);

    queue.schedule(99, 1).await;
    assert_eq!(queue.cancel(&99).await, Some(1));
    assert_eq!(queue.tracked_keys().await, 0);
}
