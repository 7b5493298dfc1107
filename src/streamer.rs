//! In-process broadcast of committed events (spec.md §4.E).
//!
//! Built on `tokio::sync::broadcast`, the same primitive `workflow-engine-rs`'s
//! `EventDispatcher` uses for its subscriber fan-out. Its `Lagged(u64)` receiver error
//! is exactly the "lag-then-drop-oldest, signal the count" policy the spec asks for, so
//! [`Receiver::recv`] surfaces it directly as [`StreamItem::Lagged`] instead of
//! re-implementing ring-buffer bookkeeping by hand.

use std::collections::HashMap;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::{Arc, Mutex};

use tokio::sync::broadcast;

use crate::event::Event;
use crate::{AggregateVersion, GlobalPosition};

#[derive(Debug, Clone)]
struct Envelope {
    event: Event,
    stream_position: AggregateVersion,
    global_position: GlobalPosition,
}

/// A filter + identity for a stream consumer (spec.md §3 "Subscription").
#[derive(Debug, Clone)]
pub struct Subscription {
    pub id: String,
    pub aggregate_type_filter: Option<String>,
    pub event_type_filter: Option<String>,
    /// Advisory only: the streamer holds no history, so a caller asking to resume from
    /// a position must first backfill via [`crate::store::EventStore::load_events_by_type`]
    /// (spec.md §4.E `subscribe`).
    pub from_position: Option<GlobalPosition>,
}

impl Subscription {
    pub fn new(id: impl Into<String>) -> Self {
        Self { id: id.into(), aggregate_type_filter: None, event_type_filter: None, from_position: None }
    }

    pub fn with_aggregate_type(mut self, aggregate_type: impl Into<String>) -> Self {
        self.aggregate_type_filter = Some(aggregate_type.into());
        self
    }

    pub fn with_event_type(mut self, event_type: impl Into<String>) -> Self {
        self.event_type_filter = Some(event_type.into());
        self
    }

    pub fn from_position(mut self, position: GlobalPosition) -> Self {
        self.from_position = Some(position);
        self
    }

    fn matches(&self, event: &Event) -> bool {
        self.aggregate_type_filter.as_deref().map_or(true, |want| want == event.aggregate_type)
            && self.event_type_filter.as_deref().map_or(true, |want| want == event.event_type)
    }
}

/// A committed event delivered to a matching subscriber (spec.md §3 "Stream Position").
#[derive(Debug, Clone)]
pub struct StreamEvent {
    pub event: Event,
    pub stream_position: AggregateVersion,
    pub global_position: GlobalPosition,
}

/// What a [`Receiver`] yields: either a matching event or a lag notification.
#[derive(Debug, Clone)]
pub enum StreamItem {
    Event(StreamEvent),
    /// The subscriber's buffer overflowed and `skipped` events (matching or not) were
    /// dropped before this one; resync via the Event Store from the last known position.
    Lagged { skipped: u64 },
}

/// Whether a [`Receiver`] has anything left to report.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecvOutcome {
    Closed,
}

/// A live handle to a [`Subscription`], yielding matching committed events in
/// publication order until dropped (which unregisters it with no further action
/// needed — `tokio::sync::broadcast` drops lagging state with the receiver).
///
/// This is also how `unsubscribe(id)` (spec.md §4.E) is implemented: there is no
/// explicit unsubscribe call, dropping the `Receiver` is the unsubscribe.
pub struct Receiver {
    subscription: Subscription,
    inner: broadcast::Receiver<Arc<Envelope>>,
}

impl Receiver {
    pub fn subscription(&self) -> &Subscription {
        &self.subscription
    }

    /// Wait for the next event matching this subscription's filters, or a
    /// [`StreamItem::Lagged`] if the buffer overflowed before one arrived.
    pub async fn recv(&mut self) -> Result<StreamItem, RecvOutcome> {
        loop {
            match self.inner.recv().await {
                Ok(envelope) => {
                    if self.subscription.matches(&envelope.event) {
                        return Ok(StreamItem::Event(StreamEvent {
                            event: envelope.event.clone(),
                            stream_position: envelope.stream_position,
                            global_position: envelope.global_position,
                        }));
                    }
                }
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    return Ok(StreamItem::Lagged { skipped });
                }
                Err(broadcast::error::RecvError::Closed) => return Err(RecvOutcome::Closed),
            }
        }
    }
}

/// Bounded in-process publish/subscribe over committed events (spec.md §4.E).
///
/// Holds no event history: every [`Receiver`] only sees events published after it
/// subscribed. A subscriber that needs events from before it attached must backfill via
/// [`crate::store::EventStore::load_events_by_type`] first.
pub struct Streamer {
    sender: broadcast::Sender<Arc<Envelope>>,
    global_position: AtomicI64,
    stream_positions: Mutex<HashMap<String, AggregateVersion>>,
}

impl Streamer {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self { sender, global_position: AtomicI64::new(0), stream_positions: Mutex::new(HashMap::new()) }
    }

    /// Register a new subscriber. Returns a [`Receiver`] that starts observing events
    /// published from this call onward.
    pub fn subscribe(&self, subscription: Subscription) -> Receiver {
        Receiver { subscription, inner: self.sender.subscribe() }
    }

    /// Deliver `event` to every matching subscriber. Called by an [`crate::store::EventStore`]
    /// after a commit; publication failure (no subscribers) is not an error — the append
    /// already durably succeeded (spec.md §4.C "Publication is best-effort after commit").
    pub fn publish_event(&self, event: Event, stream_position: AggregateVersion, global_position: GlobalPosition) {
        self.global_position.fetch_max(global_position, Ordering::SeqCst);
        self.stream_positions.lock().expect("streamer position lock poisoned").insert(event.aggregate_id.clone(), stream_position);
        // No receivers is `Err(SendError)`; that's a no-op by design, not a failure.
        let _ = self.sender.send(Arc::new(Envelope { event, stream_position, global_position }));
    }

    /// The highest `global_position` published so far (`0` if nothing has been
    /// published yet).
    pub fn get_global_position(&self) -> GlobalPosition {
        self.global_position.load(Ordering::SeqCst)
    }

    /// The last `aggregate_version` published for `aggregate_id`, if any event for it
    /// has passed through this streamer.
    pub fn get_stream_position(&self, aggregate_id: &str) -> Option<AggregateVersion> {
        self.stream_positions.lock().expect("streamer position lock poisoned").get(aggregate_id).copied()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::Encoding;
    use crate::event::EventMetadata;
    use chrono::Utc;
    use uuid::Uuid;

    fn event(aggregate_type: &str, event_type: &str, aggregate_version: AggregateVersion, global_position: GlobalPosition) -> Event {
        Event {
            event_id: Uuid::new_v4(),
            aggregate_id: "agg-1".to_string(),
            aggregate_type: aggregate_type.to_string(),
            event_type: event_type.to_string(),
            event_version: 1,
            aggregate_version,
            global_position,
            timestamp: Utc::now(),
            metadata: EventMetadata::default(),
            payload: b"{}".to_vec(),
            payload_encoding: Encoding::Json,
        }
    }

    #[tokio::test]
    async fn subscriber_receives_matching_events_only() {
        let streamer = Streamer::new(16);
        let mut receiver = streamer.subscribe(Subscription::new("sub-1").with_event_type("Deposited"));

        streamer.publish_event(event("Account", "Withdrawn", 1, 1), 1, 1);
        streamer.publish_event(event("Account", "Deposited", 2, 2), 2, 2);

        match receiver.recv().await.unwrap() {
            StreamItem::Event(e) => assert_eq!(e.event.event_type, "Deposited"),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[tokio::test]
    async fn lagging_subscriber_observes_lagged_then_resyncs() {
        let streamer = Streamer::new(10);
        let mut receiver = streamer.subscribe(Subscription::new("sub-1"));

        for i in 1..=100i64 {
            streamer.publish_event(event("Account", "Tick", i, i), i, i);
        }

        match receiver.recv().await.unwrap() {
            StreamItem::Lagged { skipped } => assert_eq!(skipped, 90),
            other => panic!("expected Lagged, got {other:?}"),
        }

        let mut last = 0;
        for _ in 0..10 {
            match receiver.recv().await.unwrap() {
                StreamItem::Event(e) => last = e.global_position,
                other => panic!("expected Event, got {other:?}"),
            }
        }
        assert_eq!(last, 100);
    }

    #[tokio::test]
    async fn position_bookkeeping_tracks_latest() {
        let streamer = Streamer::new(16);
        assert_eq!(streamer.get_global_position(), 0);
        assert_eq!(streamer.get_stream_position("agg-1"), None);

        streamer.publish_event(event("Account", "Opened", 1, 1), 1, 1);
        assert_eq!(streamer.get_global_position(), 1);
        assert_eq!(streamer.get_stream_position("agg-1"), Some(1));
    }
}
