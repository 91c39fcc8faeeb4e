//! Durable delivery of decisions.
//!
//! Every decision is written to the local outbox before the first network
//! attempt and only marked settled once the service acknowledged it (or
//! reported it as already recorded).

use std::{sync::Arc, time::Duration};

use async_trait::async_trait;
use chrono::Utc;
use shared::domain::ItemId;
use storage::{OutboxCounts, OutboxEntry, Storage};
use tracing::{error, info, warn};

use crate::{types::Decision, DecisionDispatcher, DecisionSink, SyncError};

const FLUSH_BATCH: u32 = 500;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub base_delay: Duration,
    pub factor: u32,
    pub max_delay: Duration,
    /// Attempts per delivery, the first one included.
    pub max_attempts: u32,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            base_delay: Duration::from_millis(500),
            factor: 2,
            max_delay: Duration::from_secs(30),
            max_attempts: 8,
        }
    }
}

impl RetryPolicy {
    /// Pause after failed attempt number `attempt` (1-based).
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1);
        let multiplier = self.factor.max(1).saturating_pow(exponent);
        self.base_delay
            .checked_mul(multiplier)
            .unwrap_or(self.max_delay)
            .min(self.max_delay)
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FlushReport {
    pub delivered: usize,
    pub rejected: usize,
    pub failed: usize,
    /// Still unsettled once the flush finished.
    pub remaining: u64,
}

pub struct DecisionOutbox {
    storage: Storage,
    sink: Arc<dyn DecisionSink>,
    policy: RetryPolicy,
}

impl DecisionOutbox {
    pub fn new(storage: Storage, sink: Arc<dyn DecisionSink>, policy: RetryPolicy) -> Self {
        Self {
            storage,
            sink,
            policy,
        }
    }

    pub fn policy(&self) -> RetryPolicy {
        self.policy
    }

    /// Persists `decision`. `false` means the item already had one, which
    /// keeps its original outcome.
    pub async fn record(&self, decision: &Decision) -> Result<bool, SyncError> {
        self.storage
            .enqueue_decision(decision.item_id, decision.outcome, decision.issued_at)
            .await
            .map_err(|err| {
                error!(item_id = %decision.item_id, error = %err, "outbox: failed to persist decision");
                SyncError::from(err)
            })
    }

    /// Delivers one recorded decision, retrying transient failures with backoff.
    pub async fn deliver(&self, decision: &Decision) -> Result<(), SyncError> {
        let mut attempt = 0;
        loop {
            attempt += 1;
            let error = match self.sink.submit(decision).await {
                Ok(_) => {
                    self.settle(decision.item_id).await?;
                    return Ok(());
                }
                Err(err) if err.is_duplicate() => {
                    info!(item_id = %decision.item_id, "outbox: already recorded remotely");
                    self.settle(decision.item_id).await?;
                    return Ok(());
                }
                Err(err) => err,
            };

            if !error.is_retryable() {
                warn!(item_id = %decision.item_id, %error, "outbox: decision rejected");
                self.storage
                    .mark_rejected(decision.item_id, &error.to_string(), Utc::now())
                    .await?;
                return Err(error);
            }

            let attempts = self
                .storage
                .record_attempt_failure(decision.item_id, &error.to_string())
                .await?;
            if attempt >= self.policy.max_attempts {
                warn!(
                    item_id = %decision.item_id,
                    attempts,
                    %error,
                    "outbox: giving up for now, decision stays queued"
                );
                return Err(error);
            }
            let delay = self.policy.delay_for(attempt);
            warn!(
                item_id = %decision.item_id,
                attempt,
                delay_ms = delay.as_millis() as u64,
                %error,
                "outbox: delivery failed, retrying"
            );
            tokio::time::sleep(delay).await;
        }
    }

    async fn settle(&self, item_id: ItemId) -> Result<(), SyncError> {
        self.storage.mark_settled(item_id, Utc::now()).await?;
        Ok(())
    }

    /// Replays every unsettled decision, oldest first. Stops at the first
    /// transient failure since the rest would most likely fail the same way.
    pub async fn flush(&self) -> Result<FlushReport, SyncError> {
        let pending = self.storage.pending_decisions(FLUSH_BATCH).await?;
        let mut report = FlushReport::default();
        for entry in pending {
            let decision = decision_from_entry(&entry);
            match self.deliver(&decision).await {
                Ok(()) => report.delivered += 1,
                Err(err) if err.is_retryable() => {
                    report.failed += 1;
                    break;
                }
                Err(SyncError::Storage(reason)) => return Err(SyncError::Storage(reason)),
                Err(_) => report.rejected += 1,
            }
        }
        report.remaining = self.storage.outbox_counts().await?.pending;
        info!(
            delivered = report.delivered,
            rejected = report.rejected,
            failed = report.failed,
            remaining = report.remaining,
            "outbox: flushed"
        );
        Ok(report)
    }

    pub async fn counts(&self) -> Result<OutboxCounts, SyncError> {
        Ok(self.storage.outbox_counts().await?)
    }

    pub async fn pending(&self) -> Result<Vec<OutboxEntry>, SyncError> {
        Ok(self.storage.pending_decisions(FLUSH_BATCH).await?)
    }
}

fn decision_from_entry(entry: &OutboxEntry) -> Decision {
    Decision {
        item_id: entry.item_id,
        outcome: entry.outcome,
        issued_at: entry.issued_at,
    }
}

#[async_trait]
impl DecisionDispatcher for DecisionOutbox {
    async fn dispatch(&self, decision: Decision) -> Result<(), SyncError> {
        if !self.record(&decision).await? {
            // Already queued by an earlier run; deliver what was stored.
            if let Some(entry) = self.storage.pending_decision(decision.item_id).await? {
                return self.deliver(&decision_from_entry(&entry)).await;
            }
            return Ok(());
        }
        self.deliver(&decision).await
    }

    async fn stash(&self, decision: Decision) -> Result<(), SyncError> {
        let inserted = self.record(&decision).await?;
        info!(item_id = %decision.item_id, inserted, "outbox: kept cancelled decision for a later flush");
        Ok(())
    }
}

#[cfg(test)]
#[path = "tests/outbox_tests.rs"]
mod tests;
