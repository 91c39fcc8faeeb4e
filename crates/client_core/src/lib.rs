use async_trait::async_trait;
use shared::protocol::{FeedResponse, SwipeResponse};
use tracing::warn;

pub mod config;
pub mod debounce;
pub mod error;
pub mod feed;
pub mod gesture;
pub mod outbox;
pub mod remote;
pub mod resolver;
pub mod stack;
pub mod types;

pub use config::{load_settings, ClientSettings};
pub use debounce::{DebounceConfig, DebouncedSyncQueue, SyncStatusChanged};
pub use error::{ConfigError, SyncError};
pub use feed::load_queue;
pub use outbox::{DecisionOutbox, FlushReport, RetryPolicy};
pub use remote::{AnswerSink, ProfileSink, RemoteClient, SessionContext};
pub use stack::{CardPhase, CardStack, CardTransform, Release, StackEvent, SwipeSettings};
pub use types::{Decision, Item, SyncStatus};

/// Source of candidate pages, in presentation order.
#[async_trait]
pub trait FeedSource: Send + Sync {
    async fn fetch_page(&self, cursor: Option<String>, limit: u32)
        -> Result<FeedResponse, SyncError>;
}

/// Remote endpoint that records a decision. One attempt per call.
#[async_trait]
pub trait DecisionSink: Send + Sync {
    async fn submit(&self, decision: &Decision) -> Result<SwipeResponse, SyncError>;
}

/// Delivery policy the card stack hands decisions to.
#[async_trait]
pub trait DecisionDispatcher: Send + Sync {
    async fn dispatch(&self, decision: Decision) -> Result<(), SyncError>;

    /// Keeps a decision whose delivery was cancelled so it can be sent later.
    /// Dispatchers without local storage have nowhere to put it.
    async fn stash(&self, decision: Decision) -> Result<(), SyncError> {
        warn!(item_id = %decision.item_id, "dispatcher: no local storage, cancelled decision dropped");
        Ok(())
    }
}

/// Any sink doubles as a fire-and-forget dispatcher.
#[async_trait]
impl<T> DecisionDispatcher for T
where
    T: DecisionSink,
{
    async fn dispatch(&self, decision: Decision) -> Result<(), SyncError> {
        self.submit(&decision).await.map(|_| ())
    }
}

/// Write target of a debounced key.
#[async_trait]
pub trait SyncSink<K, V>: Send + Sync {
    async fn commit(&self, key: &K, value: &V) -> Result<(), SyncError>;
}

/// Stand-in sink for running without a server; every submission fails as a
/// network failure so decisions stay queued in the outbox.
pub struct MissingDecisionSink;

#[async_trait]
impl DecisionSink for MissingDecisionSink {
    async fn submit(&self, decision: &Decision) -> Result<SwipeResponse, SyncError> {
        Err(SyncError::Network(format!(
            "no server configured; decision for item {} kept locally",
            decision.item_id
        )))
    }
}
