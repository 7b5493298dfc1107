//! Drives a consumer over a subscription with checkpointing (spec.md §4.F).
//!
//! Two phases, same as the data-flow diagram in spec.md §2: **catch-up** reads the
//! event log directly by `global_position` until the store's tip at start time, then
//! **live** attaches to the [`Streamer`] for everything after. Checkpoints land in the
//! `checkpoints` table via [`EventStore::save_checkpoint`]; handler failures classified
//! as fatal land in `dead_letters` via [`EventStore::record_dead_letter`], grounded in
//! `workflow-engine-rs`'s dead-letter queue module.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures::StreamExt;
use tokio::time::Instant;
use tracing::{error, warn};

use crate::error::EventStoreError;
use crate::event::Event;
use crate::store::EventStore;
use crate::streamer::{StreamItem, Subscription};
use crate::GlobalPosition;

/// A host-provided consumer applied to every event a subscription matches.
///
/// Implementations classify their own failures: [`HandlerError::Retryable`] triggers
/// backoff and a re-delivery of the same event; [`HandlerError::Fatal`] dead-letters the
/// event and advances past it so one poison event cannot stall the whole subscription.
#[async_trait]
pub trait ProjectionHandler: Send + Sync {
    async fn handle(&self, event: &Event) -> Result<(), HandlerError>;
}

#[derive(Debug, thiserror::Error)]
pub enum HandlerError {
    #[error("retryable projection handler error: {0}")]
    Retryable(String),
    #[error("fatal projection handler error: {0}")]
    Fatal(String),
}

/// Exponential backoff before a retryable error is escalated to fatal (spec.md §4.F
/// "Error policy per event").
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub base: Duration,
    pub max_backoff: Duration,
    pub max_attempts: u32,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self { base: Duration::from_millis(100), max_backoff: Duration::from_secs(30), max_attempts: 5 }
    }
}

impl RetryPolicy {
    fn backoff_for(&self, attempt: u32) -> Duration {
        let scaled = self.base.saturating_mul(1u32 << attempt.min(20));
        scaled.min(self.max_backoff)
    }
}

/// How often [`ProjectionRunner`] commits its checkpoint: every `every_n_events` events
/// or every `every` elapsed, whichever comes first (spec.md §4.F).
#[derive(Debug, Clone, Copy)]
pub struct CheckpointPolicy {
    pub every_n_events: u64,
    pub every: Duration,
}

impl Default for CheckpointPolicy {
    fn default() -> Self {
        Self { every_n_events: 100, every: Duration::from_secs(5) }
    }
}

/// Outcome of one [`ProjectionRunner::catch_up`] or [`ProjectionRunner::apply_live`]
/// pass, surfaced so hosts can log progress or decide when catch-up has finished.
#[derive(Debug, Clone, Copy, Default)]
pub struct RunSummary {
    pub applied: u64,
    pub dead_lettered: u64,
    pub checkpoint: Option<GlobalPosition>,
}

/// Drives `handler` over `subscription`, checkpointing progress in `store`.
pub struct ProjectionRunner<H: ProjectionHandler> {
    store: Arc<dyn EventStore>,
    subscription: Subscription,
    handler: H,
    retry_policy: RetryPolicy,
    checkpoint_policy: CheckpointPolicy,
}

impl<H: ProjectionHandler> ProjectionRunner<H> {
    pub fn new(store: Arc<dyn EventStore>, subscription: Subscription, handler: H) -> Self {
        Self {
            store,
            subscription,
            handler,
            retry_policy: RetryPolicy::default(),
            checkpoint_policy: CheckpointPolicy::default(),
        }
    }

    pub fn with_retry_policy(mut self, policy: RetryPolicy) -> Self {
        self.retry_policy = policy;
        self
    }

    pub fn with_checkpoint_policy(mut self, policy: CheckpointPolicy) -> Self {
        self.checkpoint_policy = policy;
        self
    }

    fn matches(&self, event: &Event) -> bool {
        self.subscription.aggregate_type_filter.as_deref().map_or(true, |want| want == event.aggregate_type)
            && self.subscription.event_type_filter.as_deref().map_or(true, |want| want == event.event_type)
    }

    /// Resume from the last checkpoint (or `0`) and replay the log up to the store's
    /// tip as of when this call started (spec.md §4.F "Catch-up phase").
    pub async fn catch_up(&self) -> Result<RunSummary, EventStoreError> {
        let resume_from = self.store.load_checkpoint(&self.subscription.id).await?.unwrap_or(0);
        let Some(tip) = self.store.tip().await? else {
            return Ok(RunSummary { checkpoint: Some(resume_from), ..Default::default() });
        };
        if resume_from >= tip {
            return Ok(RunSummary { checkpoint: Some(resume_from), ..Default::default() });
        }

        let mut summary = RunSummary::default();
        let mut last_checkpoint_at = Instant::now();
        let mut position = resume_from;

        let mut stream = match self.subscription.aggregate_type_filter.as_deref() {
            Some(aggregate_type) => self.store.load_events_by_type(aggregate_type, Some(resume_from)),
            None => self.store.load_all_events(Some(resume_from)),
        };

        while let Some(event) = stream.next().await {
            let event = event?;
            if event.global_position > tip {
                break;
            }
            if self.matches(&event) {
                self.apply_with_retry(&event, &mut summary).await?;
            }
            position = event.global_position;

            if summary.applied % self.checkpoint_policy.every_n_events == 0
                || last_checkpoint_at.elapsed() >= self.checkpoint_policy.every
            {
                self.store.save_checkpoint(&self.subscription.id, position).await?;
                last_checkpoint_at = Instant::now();
            }
        }

        self.store.save_checkpoint(&self.subscription.id, position).await?;
        summary.checkpoint = Some(position);
        Ok(summary)
    }

    /// Process one live event already delivered by the [`Streamer`] (spec.md §4.F "Live
    /// phase"), checkpointing per [`CheckpointPolicy`]. Callers drive their own receive
    /// loop against [`crate::streamer::Receiver`] and hand each [`StreamItem`] here; a
    /// [`StreamItem::Lagged`] signal is not itself an error — it's the host's cue to
    /// resync via [`crate::store::EventStore::load_events_by_type`] before continuing.
    pub async fn apply_live(&self, item: StreamItem) -> Result<RunSummary, EventStoreError> {
        let mut summary = RunSummary::default();
        match item {
            StreamItem::Lagged { .. } => {}
            StreamItem::Event(stream_event) => {
                if self.matches(&stream_event.event) {
                    self.apply_with_retry(&stream_event.event, &mut summary).await?;
                }
                self.store.save_checkpoint(&self.subscription.id, stream_event.global_position).await?;
                summary.checkpoint = Some(stream_event.global_position);
            }
        }
        Ok(summary)
    }

    async fn apply_with_retry(&self, event: &Event, summary: &mut RunSummary) -> Result<(), EventStoreError> {
        let mut attempt = 0;
        loop {
            match self.handler.handle(event).await {
                Ok(()) => {
                    summary.applied += 1;
                    return Ok(());
                }
                Err(HandlerError::Fatal(reason)) => {
                    error!(subscription = %self.subscription.id, global_position = event.global_position, %reason, "dead-lettering event");
                    self.store
                        .record_dead_letter(&self.subscription.id, event.global_position, event.event_id, &reason)
                        .await?;
                    summary.dead_lettered += 1;
                    return Ok(());
                }
                Err(HandlerError::Retryable(reason)) if attempt < self.retry_policy.max_attempts => {
                    warn!(subscription = %self.subscription.id, attempt, %reason, "retrying projection handler");
                    tokio::time::sleep(self.retry_policy.backoff_for(attempt)).await;
                    attempt += 1;
                }
                Err(HandlerError::Retryable(reason)) => {
                    error!(subscription = %self.subscription.id, %reason, "retries exhausted, dead-lettering");
                    self.store
                        .record_dead_letter(&self.subscription.id, event.global_position, event.event_id, &reason)
                        .await?;
                    summary.dead_lettered += 1;
                    return Ok(());
                }
            }
        }
    }

    /// Delete the checkpoint so the next [`Self::catch_up`] replays from `global_position
    /// = 0` (spec.md §4.F "Rebuild"). Projection-owned read-model rows are the host's
    /// responsibility to clear; the engine owns only the checkpoint.
    pub async fn reset(&self) -> Result<(), EventStoreError> {
        self.store.delete_checkpoint(&self.subscription.id).await
    }
}
