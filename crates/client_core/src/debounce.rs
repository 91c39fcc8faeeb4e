//! Coalescing autosave primitive.
//!
//! One `DebouncedSyncQueue` owns every key's pending value, its quiet-period
//! timer and its save status. Rapid `schedule` calls for a key collapse into a
//! single write of the latest value; a write already on the wire is never
//! aborted, a follow-up write is issued once it lands.

use std::{
    collections::HashMap,
    fmt::Debug,
    hash::Hash,
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc,
    },
    time::Duration,
};

use tokio::{
    sync::{broadcast, Mutex, Notify},
    task::JoinHandle,
};
use tracing::{debug, warn};

use crate::{error::SyncError, types::SyncStatus, SyncSink};

const EVENT_CAPACITY: usize = 256;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DebounceConfig {
    /// Quiet period before a write fires. Zero sends on the next scheduler turn.
    pub window: Duration,
    pub committed_display: Duration,
    pub failed_display: Duration,
    /// Upper bound on a single write so a key never sticks in `Committing`.
    pub commit_timeout: Duration,
}

impl DebounceConfig {
    pub fn profile() -> Self {
        Self {
            window: Duration::from_millis(500),
            committed_display: Duration::from_secs(2),
            failed_display: Duration::from_secs(3),
            commit_timeout: Duration::from_secs(10),
        }
    }

    pub fn answers() -> Self {
        Self {
            window: Duration::ZERO,
            committed_display: Duration::from_millis(1500),
            failed_display: Duration::from_secs(2),
            commit_timeout: Duration::from_secs(10),
        }
    }
}

impl Default for DebounceConfig {
    fn default() -> Self {
        Self::profile()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncStatusChanged<K> {
    pub key: K,
    pub status: SyncStatus,
}

struct Entry<V> {
    pending: Option<V>,
    last_committed: Option<V>,
    status: SyncStatus,
    timer: Option<JoinHandle<()>>,
    reset: Option<JoinHandle<()>>,
    in_flight: bool,
    // Renewed by every schedule; a timer only fires for its own generation.
    generation: u64,
    // Bumped by every status change; a reset only applies to its own epoch.
    epoch: u64,
}

impl<V> Entry<V> {
    /// Nothing left to send or display; the key can be forgotten.
    fn is_quiet(&self) -> bool {
        self.status == SyncStatus::Idle
            && self.pending.is_none()
            && !self.in_flight
            && self.timer.is_none()
            && self.reset.is_none()
    }
}

impl<V> Default for Entry<V> {
    fn default() -> Self {
        Self {
            pending: None,
            last_committed: None,
            status: SyncStatus::Idle,
            timer: None,
            reset: None,
            in_flight: false,
            generation: 0,
            epoch: 0,
        }
    }
}

struct QueueInner<K, V> {
    config: DebounceConfig,
    sink: Arc<dyn SyncSink<K, V>>,
    entries: Mutex<HashMap<K, Entry<V>>>,
    events: broadcast::Sender<SyncStatusChanged<K>>,
    settled: Notify,
    // Queue-wide so a key that is forgotten and re-added never reuses one.
    generations: AtomicU64,
}

impl<K, V> QueueInner<K, V>
where
    K: Clone + Debug,
{
    fn next_generation(&self) -> u64 {
        self.generations.fetch_add(1, Ordering::Relaxed) + 1
    }

    fn set_status(&self, key: &K, entry: &mut Entry<V>, status: SyncStatus) {
        if entry.status == status {
            return;
        }
        debug!(key = ?key, from = ?entry.status, to = ?status, "debounce: status changed");
        entry.status = status;
        entry.epoch += 1;
        let _ = self.events.send(SyncStatusChanged {
            key: key.clone(),
            status,
        });
    }
}

enum FlushStep {
    Wait,
    Fire(u64),
    Done(SyncStatus),
}

/// Cheap to clone; every clone drives the same set of keys.
pub struct DebouncedSyncQueue<K, V> {
    inner: Arc<QueueInner<K, V>>,
}

impl<K, V> Clone for DebouncedSyncQueue<K, V> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<K, V> DebouncedSyncQueue<K, V>
where
    K: Clone + Eq + Hash + Debug + Send + Sync + 'static,
    V: Clone + PartialEq + Send + Sync + 'static,
{
    pub fn new(config: DebounceConfig, sink: Arc<dyn SyncSink<K, V>>) -> Self {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Self {
            inner: Arc::new(QueueInner {
                config,
                sink,
                entries: Mutex::new(HashMap::new()),
                events,
                settled: Notify::new(),
                generations: AtomicU64::new(0),
            }),
        }
    }

    pub fn config(&self) -> DebounceConfig {
        self.inner.config
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SyncStatusChanged<K>> {
        self.inner.events.subscribe()
    }

    /// Registers `value` as the latest state of `key` and restarts its quiet
    /// period. Must be called from within a tokio runtime.
    pub async fn schedule(&self, key: K, value: V) {
        let mut entries = self.inner.entries.lock().await;
        let entry = entries.entry(key.clone()).or_default();
        entry.pending = Some(value);
        let generation = self.inner.next_generation();
        entry.generation = generation;
        if let Some(timer) = entry.timer.take() {
            debug!(key = ?key, "debounce: re-arming timer");
            timer.abort();
        }
        if let Some(reset) = entry.reset.take() {
            reset.abort();
        }
        if !entry.in_flight {
            self.inner.set_status(&key, entry, SyncStatus::Pending);
        }

        let queue = self.clone();
        let window = self.inner.config.window;
        entry.timer = Some(tokio::spawn(async move {
            if !window.is_zero() {
                tokio::time::sleep(window).await;
            }
            queue.fire(key, generation).await;
        }));
    }

    /// Drops the unsent value for `key`. A write already on the wire still
    /// lands. Returns the discarded value.
    pub async fn cancel(&self, key: &K) -> Option<V> {
        let mut entries = self.inner.entries.lock().await;
        let entry = entries.get_mut(key)?;
        if let Some(timer) = entry.timer.take() {
            timer.abort();
        }
        entry.generation = self.inner.next_generation();
        let dropped = entry.pending.take();
        if !entry.in_flight && entry.status == SyncStatus::Pending {
            self.inner.set_status(key, entry, SyncStatus::Idle);
        }
        if entry.is_quiet() {
            entries.remove(key);
        }
        drop(entries);
        self.inner.settled.notify_waiters();
        if dropped.is_some() {
            debug!(key = ?key, "debounce: pending write cancelled");
        }
        dropped
    }

    /// Sends any pending value for `key` right away and waits until nothing is
    /// pending or in flight. Returns the status the key settled on.
    pub async fn flush(&self, key: &K) -> SyncStatus {
        loop {
            let notified = self.inner.settled.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            let step = {
                let mut entries = self.inner.entries.lock().await;
                match entries.get_mut(key) {
                    None => FlushStep::Done(SyncStatus::Idle),
                    Some(entry) if entry.in_flight => FlushStep::Wait,
                    Some(entry) if entry.pending.is_some() => {
                        if let Some(timer) = entry.timer.take() {
                            timer.abort();
                        }
                        entry.generation = self.inner.next_generation();
                        FlushStep::Fire(entry.generation)
                    }
                    Some(entry) => FlushStep::Done(entry.status),
                }
            };

            match step {
                FlushStep::Done(status) => return status,
                FlushStep::Fire(generation) => self.fire(key.clone(), generation).await,
                FlushStep::Wait => notified.await,
            }
        }
    }

    pub async fn flush_all(&self) -> Vec<(K, SyncStatus)> {
        let keys: Vec<K> = self.inner.entries.lock().await.keys().cloned().collect();
        let mut settled = Vec::with_capacity(keys.len());
        for key in keys {
            let status = self.flush(&key).await;
            settled.push((key, status));
        }
        settled
    }

    /// Keys that still hold a pending value, a write or a visible status.
    pub async fn tracked_keys(&self) -> usize {
        self.inner.entries.lock().await.len()
    }

    pub async fn status(&self, key: &K) -> SyncStatus {
        self.inner
            .entries
            .lock()
            .await
            .get(key)
            .map(|entry| entry.status)
            .unwrap_or_default()
    }

    pub async fn pending(&self, key: &K) -> Option<V> {
        self.inner
            .entries
            .lock()
            .await
            .get(key)
            .and_then(|entry| entry.pending.clone())
    }

    pub async fn last_committed(&self, key: &K) -> Option<V> {
        self.inner
            .entries
            .lock()
            .await
            .get(key)
            .and_then(|entry| entry.last_committed.clone())
    }

    /// Flushes every key, then stops the status reset timers.
    pub async fn shutdown(&self) -> Vec<(K, SyncStatus)> {
        let settled = self.flush_all().await;
        let mut entries = self.inner.entries.lock().await;
        for entry in entries.values_mut() {
            if let Some(reset) = entry.reset.take() {
                reset.abort();
            }
        }
        settled
    }

    async fn fire(&self, key: K, generation: u64) {
        let value = {
            let mut entries = self.inner.entries.lock().await;
            let Some(entry) = entries.get_mut(&key) else {
                return;
            };
            if entry.generation != generation {
                return;
            }
            entry.timer = None;
            if entry.in_flight {
                // Picked up by the in-flight write when it lands.
                return;
            }
            let Some(value) = entry.pending.take() else {
                return;
            };
            if entry.last_committed.as_ref() == Some(&value) {
                debug!(key = ?key, "debounce: value unchanged since last commit, skipping");
                self.inner.set_status(&key, entry, SyncStatus::Idle);
                if entry.is_quiet() {
                    entries.remove(&key);
                }
                drop(entries);
                self.inner.settled.notify_waiters();
                return;
            }
            entry.in_flight = true;
            self.inner.set_status(&key, entry, SyncStatus::Committing);
            value
        };
        self.commit(key, value).await;
    }

    async fn commit(&self, key: K, mut value: V) {
        let timeout = self.inner.config.commit_timeout;
        loop {
            let result =
                match tokio::time::timeout(timeout, self.inner.sink.commit(&key, &value)).await {
                    Ok(result) => result,
                    Err(_) => Err(SyncError::Timeout(timeout)),
                };

            let mut entries = self.inner.entries.lock().await;
            let Some(entry) = entries.get_mut(&key) else {
                return;
            };
            match &result {
                Ok(()) => entry.last_committed = Some(value.clone()),
                Err(error) => {
                    // The server may or may not hold `value` now; never skip the next write.
                    entry.last_committed = None;
                    warn!(key = ?key, %error, "debounce: write failed");
                }
            }

            if entry.timer.is_none() {
                if let Some(next) = entry.pending.take() {
                    if entry.last_committed.as_ref() != Some(&next) {
                        debug!(key = ?key, "debounce: newer value arrived mid-flight, writing again");
                        value = next;
                        continue;
                    }
                }
            }

            entry.in_flight = false;
            if entry.pending.is_some() {
                self.inner.set_status(&key, entry, SyncStatus::Pending);
            } else {
                let (status, display) = match result {
                    Ok(()) => (SyncStatus::Committed, self.inner.config.committed_display),
                    Err(_) => (SyncStatus::Failed, self.inner.config.failed_display),
                };
                self.inner.set_status(&key, entry, status);
                self.arm_reset(&key, entry, display);
            }
            drop(entries);
            self.inner.settled.notify_waiters();
            return;
        }
    }

    fn arm_reset(&self, key: &K, entry: &mut Entry<V>, display: Duration) {
        if let Some(previous) = entry.reset.take() {
            previous.abort();
        }
        let epoch = entry.epoch;
        let queue = self.clone();
        let key = key.clone();
        entry.reset = Some(tokio::spawn(async move {
            tokio::time::sleep(display).await;
            let mut entries = queue.inner.entries.lock().await;
            if let Some(entry) = entries.get_mut(&key) {
                if entry.epoch == epoch {
                    entry.reset = None;
                    queue.inner.set_status(&key, entry, SyncStatus::Idle);
                    if entry.is_quiet() {
                        entries.remove(&key);
                    }
                }
            }
        }));
    }
}

#[cfg(test)]
#[path = "tests/debounce_tests.rs"]
mod tests;
