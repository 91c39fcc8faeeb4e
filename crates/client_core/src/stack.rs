//! The review deck: one interactive card at a time, optimistic advance.
//!
//! The stack is driven by the UI loop. Pointer and button input arrive through
//! the `begin_drag`/`drag_to`/`release`/`press` family, and `tick` moves the
//! exit animation along and collects finished decision submissions. Decision
//! delivery runs on tasks owned by the stack; the advance never waits on them.

use std::{
    collections::HashMap,
    sync::Arc,
    time::{Duration, Instant},
};

use shared::domain::{ItemId, Outcome};
use tokio::task::{Id as TaskId, JoinSet};
use tracing::{debug, error, info, warn};

use crate::{
    gesture::{self, GestureTracker, Offset, Point},
    resolver::{self, Resolution},
    types::{Decision, Item, SyncStatus},
    DecisionDispatcher, SyncError,
};

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SwipeSettings {
    pub threshold_px: f32,
    pub rotation_per_px: f32,
    pub fade_distance_px: f32,
    pub button_exit_px: f32,
    pub exit_delay: Duration,
    pub committed_display: Duration,
    pub failed_display: Duration,
}

impl Default for SwipeSettings {
    fn default() -> Self {
        Self {
            threshold_px: resolver::DEFAULT_THRESHOLD_PX,
            rotation_per_px: gesture::DEFAULT_ROTATION_PER_PX,
            fade_distance_px: gesture::DEFAULT_FADE_DISTANCE_PX,
            button_exit_px: resolver::DEFAULT_BUTTON_EXIT_PX,
            exit_delay: Duration::from_millis(300),
            committed_display: Duration::from_secs(2),
            failed_display: Duration::from_secs(3),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CardPhase {
    Presenting,
    Committing,
    Exhausted,
}

/// Render values for the top card.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CardTransform {
    pub offset: Offset,
    pub rotation_deg: f32,
    pub opacity: f32,
}

/// What a pointer release did.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Release {
    Decided(Decision),
    SnappedBack,
    /// No drag was in progress, or the deck is not accepting input.
    Ignored,
}

#[derive(Debug, Clone, PartialEq)]
pub enum StackEvent {
    Advanced { cursor: usize },
    Exhausted { reviewed: usize },
    DecisionSettled { item_id: ItemId },
    DecisionFailed { item_id: ItemId, error: SyncError },
}

#[derive(Debug, Clone, Copy)]
enum Phase {
    Presenting,
    Committing {
        decision: Decision,
        release_offset: Offset,
        started: Instant,
    },
    Exhausted,
}

#[derive(Debug, Clone, Copy)]
struct DecisionState {
    status: SyncStatus,
    since: Instant,
}

pub struct CardStack {
    queue: Vec<Item>,
    cursor: usize,
    phase: Phase,
    tracker: GestureTracker,
    settings: SwipeSettings,
    dispatcher: Arc<dyn DecisionDispatcher>,
    inflight: JoinSet<(ItemId, Result<(), SyncError>)>,
    inflight_items: HashMap<TaskId, ItemId>,
    decisions: Vec<Decision>,
    statuses: HashMap<ItemId, DecisionState>,
}

impl CardStack {
    pub fn new(
        items: Vec<Item>,
        settings: SwipeSettings,
        dispatcher: Arc<dyn DecisionDispatcher>,
    ) -> Self {
        let phase = if items.is_empty() {
            Phase::Exhausted
        } else {
            Phase::Presenting
        };
        Self {
            queue: items,
            cursor: 0,
            phase,
            tracker: GestureTracker::new(),
            settings,
            dispatcher,
            inflight: JoinSet::new(),
            inflight_items: HashMap::new(),
            decisions: Vec::new(),
            statuses: HashMap::new(),
        }
    }

    pub fn settings(&self) -> &SwipeSettings {
        &self.settings
    }

    pub fn phase(&self) -> CardPhase {
        match self.phase {
            Phase::Presenting => CardPhase::Presenting,
            Phase::Committing { .. } => CardPhase::Committing,
            Phase::Exhausted => CardPhase::Exhausted,
        }
    }

    pub fn is_exhausted(&self) -> bool {
        matches!(self.phase, Phase::Exhausted)
    }

    pub fn cursor(&self) -> usize {
        self.cursor
    }

    pub fn len(&self) -> usize {
        self.queue.len()
    }

    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }

    pub fn reviewed(&self) -> usize {
        self.cursor
    }

    pub fn remaining(&self) -> usize {
        self.queue.len().saturating_sub(self.cursor)
    }

    /// The top card, including while it is animating out.
    pub fn current(&self) -> Option<&Item> {
        self.queue.get(self.cursor)
    }

    /// The card rendered behind the top one. Never interactive.
    pub fn peek_next(&self) -> Option<&Item> {
        if self.is_exhausted() {
            return None;
        }
        self.queue.get(self.cursor + 1)
    }

    /// The decision whose card is animating out right now.
    pub fn exiting(&self) -> Option<&Decision> {
        match &self.phase {
            Phase::Committing { decision, .. } => Some(decision),
            _ => None,
        }
    }

    pub fn decisions(&self) -> &[Decision] {
        &self.decisions
    }

    pub fn is_dragging(&self) -> bool {
        self.tracker.is_active()
    }

    pub fn begin_drag(&mut self, point: Point) -> bool {
        if !matches!(self.phase, Phase::Presenting) {
            debug!(phase = ?self.phase(), "stack: drag ignored");
            return false;
        }
        self.tracker.begin(point)
    }

    pub fn drag_to(&mut self, point: Point) -> Option<Offset> {
        if !matches!(self.phase, Phase::Presenting) {
            return None;
        }
        self.tracker.update(point)
    }

    pub fn release(&mut self, now: Instant) -> Release {
        let Some(offset) = self.tracker.end() else {
            return Release::Ignored;
        };
        self.apply(resolver::resolve(offset, self.settings.threshold_px), now)
    }

    /// Pointer left the card surface; resolved exactly like a release.
    pub fn pointer_left(&mut self, now: Instant) -> Release {
        let Some(offset) = self.tracker.leave() else {
            return Release::Ignored;
        };
        self.apply(resolver::resolve(offset, self.settings.threshold_px), now)
    }

    /// The platform took the pointer away mid-drag. Never a decision.
    pub fn interrupt(&mut self) -> bool {
        let was_active = self.tracker.is_active();
        self.tracker.reset();
        if was_active {
            debug!("stack: gesture interrupted, snapping back");
        }
        was_active
    }

    /// Accept/reject button. Bypasses the gesture entirely.
    pub fn press(&mut self, outcome: Outcome, now: Instant) -> Release {
        if !matches!(self.phase, Phase::Presenting) {
            return Release::Ignored;
        }
        self.tracker.reset();
        self.apply(
            resolver::resolve_button(outcome, self.settings.button_exit_px),
            now,
        )
    }

    fn apply(&mut self, resolution: Resolution, now: Instant) -> Release {
        let Resolution::Decided {
            outcome,
            exit_offset,
        } = resolution
        else {
            return Release::SnappedBack;
        };
        if !matches!(self.phase, Phase::Presenting) {
            return Release::Ignored;
        }
        let Some(item) = self.queue.get(self.cursor) else {
            return Release::Ignored;
        };

        let decision = Decision::new(item.id, outcome);
        info!(
            item_id = %decision.item_id,
            outcome = %decision.outcome,
            cursor = self.cursor,
            "stack: decision issued"
        );
        self.decisions.push(decision);
        self.set_status(decision.item_id, SyncStatus::Committing, now);
        self.spawn_dispatch(decision);
        self.phase = Phase::Committing {
            decision,
            release_offset: exit_offset,
            started: now,
        };
        Release::Decided(decision)
    }

    fn spawn_dispatch(&mut self, decision: Decision) {
        let dispatcher = Arc::clone(&self.dispatcher);
        let handle = self.inflight.spawn(async move {
            let result = dispatcher.dispatch(decision).await;
            (decision.item_id, result)
        });
        self.inflight_items.insert(handle.id(), decision.item_id);
    }

    pub fn transform(&self, now: Instant) -> CardTransform {
        let offset = match self.phase {
            Phase::Presenting => self.tracker.offset(),
            Phase::Committing {
                release_offset,
                started,
                ..
            } => {
                let progress = self.exit_progress(started, now);
                release_offset.lerp(self.departure(release_offset), progress)
            }
            Phase::Exhausted => Offset::ZERO,
        };
        CardTransform {
            offset,
            rotation_deg: gesture::rotation_deg(offset.x, self.settings.rotation_per_px),
            opacity: gesture::fade(offset.x, self.settings.fade_distance_px),
        }
    }

    fn departure(&self, release_offset: Offset) -> Offset {
        let distance = release_offset.x.abs().max(self.settings.button_exit_px.abs());
        Offset::new(distance.copysign(release_offset.x), release_offset.y)
    }

    fn exit_progress(&self, started: Instant, now: Instant) -> f32 {
        let delay = self.settings.exit_delay;
        if delay.is_zero() {
            return 1.0;
        }
        let elapsed = now.saturating_duration_since(started);
        (elapsed.as_secs_f32() / delay.as_secs_f32()).clamp(0.0, 1.0)
    }

    /// Advances the exit animation and gathers finished submissions.
    pub fn tick(&mut self, now: Instant) -> Vec<StackEvent> {
        let mut events = self.reap_finished(now);
        self.expire_statuses(now);

        if let Phase::Committing { started, .. } = self.phase {
            if now.saturating_duration_since(started) >= self.settings.exit_delay {
                events.extend(self.advance());
            }
        }
        events
    }

    fn advance(&mut self) -> Vec<StackEvent> {
        self.cursor += 1;
        self.tracker.reset();
        let mut events = vec![StackEvent::Advanced {
            cursor: self.cursor,
        }];
        if self.cursor >= self.queue.len() {
            self.phase = Phase::Exhausted;
            info!(reviewed = self.cursor, "stack: queue exhausted");
            events.push(StackEvent::Exhausted {
                reviewed: self.cursor,
            });
        } else {
            self.phase = Phase::Presenting;
            debug!(cursor = self.cursor, "stack: presenting next card");
        }
        events
    }

    fn reap_finished(&mut self, now: Instant) -> Vec<StackEvent> {
        let mut events = Vec::new();
        while let Some(joined) = self.inflight.try_join_next_with_id() {
            if let Some(event) = self.record_completion(joined, now) {
                events.push(event);
            }
        }
        events
    }

    fn record_completion(
        &mut self,
        joined: Result<(TaskId, (ItemId, Result<(), SyncError>)), tokio::task::JoinError>,
        now: Instant,
    ) -> Option<StackEvent> {
        match joined {
            Ok((task_id, (item_id, Ok(())))) => {
                self.inflight_items.remove(&task_id);
                self.set_status(item_id, SyncStatus::Committed, now);
                Some(StackEvent::DecisionSettled { item_id })
            }
            Ok((task_id, (item_id, Err(error)))) => {
                self.inflight_items.remove(&task_id);
                warn!(item_id = %item_id, %error, "stack: decision submission failed");
                self.set_status(item_id, SyncStatus::Failed, now);
                Some(StackEvent::DecisionFailed { item_id, error })
            }
            Err(join_err) => {
                let item_id = self.inflight_items.remove(&join_err.id())?;
                if join_err.is_cancelled() {
                    self.statuses.remove(&item_id);
                    return None;
                }
                warn!(item_id = %item_id, error = %join_err, "stack: decision task crashed");
                self.set_status(item_id, SyncStatus::Failed, now);
                Some(StackEvent::DecisionFailed {
                    item_id,
                    error: SyncError::Network(join_err.to_string()),
                })
            }
        }
    }

    fn set_status(&mut self, item_id: ItemId, status: SyncStatus, now: Instant) {
        self.statuses
            .insert(item_id, DecisionState { status, since: now });
    }

    fn expire_statuses(&mut self, now: Instant) {
        let committed = self.settings.committed_display;
        let failed = self.settings.failed_display;
        self.statuses.retain(|_, state| {
            let window = match state.status {
                SyncStatus::Committed => committed,
                SyncStatus::Failed => failed,
                _ => return true,
            };
            now.saturating_duration_since(state.since) < window
        });
    }

    pub fn decision_status(&self, item_id: ItemId) -> SyncStatus {
        self.statuses
            .get(&item_id)
            .map(|state| state.status)
            .unwrap_or_default()
    }

    pub fn inflight(&self) -> usize {
        self.inflight.len()
    }

    /// Waits for every outstanding submission and reports how each ended.
    pub async fn settle(&mut self) -> Vec<StackEvent> {
        let mut events = Vec::new();
        while let Some(joined) = self.inflight.join_next_with_id().await {
            if let Some(event) = self.record_completion(joined, Instant::now()) {
                events.push(event);
            }
        }
        events
    }

    /// Tears the deck down, cancelling submissions still on the wire.
    ///
    /// Each cancelled decision is handed back to the dispatcher's `stash`, so
    /// a durable dispatcher keeps it for a later flush. Returns how many were
    /// cancelled.
    pub async fn shutdown(&mut self) -> usize {
        if !self.inflight.is_empty() {
            info!(
                outstanding = self.inflight.len(),
                "stack: cancelling outstanding submissions"
            );
        }
        self.inflight.abort_all();

        let mut cancelled = Vec::new();
        while let Some(joined) = self.inflight.join_next_with_id().await {
            let (task_id, was_cancelled) = match &joined {
                Ok((task_id, _)) => (*task_id, false),
                Err(join_err) => (join_err.id(), join_err.is_cancelled()),
            };
            if let Some(item_id) = self.inflight_items.remove(&task_id) {
                if was_cancelled {
                    cancelled.push(item_id);
                }
            }
        }
        self.inflight_items.clear();
        self.tracker.reset();

        for item_id in &cancelled {
            self.statuses.remove(item_id);
            let Some(decision) = self
                .decisions
                .iter()
                .find(|decision| decision.item_id == *item_id)
                .copied()
            else {
                continue;
            };
            if let Err(error) = self.dispatcher.stash(decision).await {
                error!(item_id = %item_id, %error, "stack: cancelled decision could not be kept");
            }
        }
        cancelled.len()
    }
}

#[cfg(test)]
#[path = "tests/stack_tests.rs"]
mod tests;
