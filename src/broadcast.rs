use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock};

use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::mpsc;

/// Per-subscriber buffer size. Subscribers are cache-invalidation consumers;
/// a slow one loses events rather than slowing the publisher down.
const SUBSCRIBER_BUFFER: usize = 64;

/// A change event fanned out to connected stream subscribers whenever the
/// store mutates a flag, rule, or segment.
#[derive(Clone, Debug, Deserialize, PartialEq, Serialize)]
pub struct Event {
    /// Millisecond-timestamp id; non-decreasing but not necessarily unique.
    pub id: String,
    #[serde(rename = "type")]
    pub kind: EventKind,
    pub data: Value,
}

#[derive(Clone, Copy, Debug, Deserialize, Eq, PartialEq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    FlagCreated,
    FlagUpdated,
    FlagDeleted,
    FlagToggled,
    RuleCreated,
    RuleUpdated,
    RuleDeleted,
    SegmentCreated,
    SegmentUpdated,
    SegmentDeleted,
}

impl EventKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            EventKind::FlagCreated => "flag_created",
            EventKind::FlagUpdated => "flag_updated",
            EventKind::FlagDeleted => "flag_deleted",
            EventKind::FlagToggled => "flag_toggled",
            EventKind::RuleCreated => "rule_created",
            EventKind::RuleUpdated => "rule_updated",
            EventKind::RuleDeleted => "rule_deleted",
            EventKind::SegmentCreated => "segment_created",
            EventKind::SegmentUpdated => "segment_updated",
            EventKind::SegmentDeleted => "segment_deleted",
        }
    }
}

impl Event {
    /// Stamp a new event with the current wall-clock millisecond id.
    pub fn now(kind: EventKind, data: Value) -> Self {
        Event {
            id: Utc::now().timestamp_millis().to_string(),
            kind,
            data,
        }
    }
}

/// Fans out events to every current subscriber.
///
/// The subscriber set is the only shared mutable state in the engine: a map
/// of bounded channels behind a reader-writer lock, keyed by ids from an
/// atomic counter. Publishing takes the shared lock and performs one
/// non-blocking send per subscriber; a full buffer drops the event for that
/// subscriber only. Subscribing, unsubscribing, and closing take the
/// exclusive lock.
#[derive(Default)]
pub struct Broadcaster {
    clients: RwLock<HashMap<u64, mpsc::Sender<Event>>>,
    next_id: AtomicU64,
}

impl Broadcaster {
    pub fn new() -> Arc<Self> {
        Arc::new(Broadcaster::default())
    }

    /// Register a new subscriber. Returns the event stream and a guard that
    /// detaches the subscriber when dropped.
    pub fn subscribe(self: &Arc<Self>) -> (mpsc::Receiver<Event>, Subscription) {
        let (tx, rx) = mpsc::channel(SUBSCRIBER_BUFFER);
        let id = self.next_id.fetch_add(1, Ordering::Relaxed) + 1;

        self.clients
            .write()
            .expect("broadcaster lock poisoned")
            .insert(id, tx);

        let subscription = Subscription {
            id,
            broadcaster: Arc::clone(self),
        };
        (rx, subscription)
    }

    /// Deliver an event to every subscriber with buffer capacity. Never
    /// blocks; a subscriber whose buffer is full misses this event without
    /// affecting the others. After `close` this is a no-op.
    pub fn publish(&self, event: Event) {
        let clients = self.clients.read().expect("broadcaster lock poisoned");
        for tx in clients.values() {
            // try_send: on a full buffer the event is dropped for this
            // subscriber; on a closed receiver the entry is reaped lazily by
            // its Subscription guard.
            let _ = tx.try_send(event.clone());
        }
    }

    /// Current subscriber count, for telemetry.
    pub fn client_count(&self) -> usize {
        self.clients
            .read()
            .expect("broadcaster lock poisoned")
            .len()
    }

    /// Detach all subscribers. Their streams terminate once drained;
    /// subsequent publishes go nowhere.
    pub fn close(&self) {
        self.clients
            .write()
            .expect("broadcaster lock poisoned")
            .clear();
    }

    fn unsubscribe(&self, id: u64) {
        self.clients
            .write()
            .expect("broadcaster lock poisoned")
            .remove(&id);
    }
}

/// Detaches its subscriber from the broadcaster on drop. Safe to drop at any
/// time, including concurrently with a publish targeting the subscriber.
pub struct Subscription {
    id: u64,
    broadcaster: Arc<Broadcaster>,
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.broadcaster.unsubscribe(self.id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use spectral::prelude::*;

    fn event(id: u64) -> Event {
        Event {
            id: id.to_string(),
            kind: EventKind::FlagUpdated,
            data: json!({"key": "f"}),
        }
    }

    #[tokio::test]
    async fn delivers_in_publication_order() {
        let b = Broadcaster::new();
        let (mut rx, _sub) = b.subscribe();

        for i in 0..10 {
            b.publish(event(i));
        }

        for i in 0..10 {
            let received = rx.recv().await.unwrap();
            assert_eq!(received.id, i.to_string());
        }
    }

    #[tokio::test]
    async fn fans_out_to_every_subscriber() {
        let b = Broadcaster::new();
        let (mut rx1, _s1) = b.subscribe();
        let (mut rx2, _s2) = b.subscribe();
        assert_eq!(b.client_count(), 2);

        b.publish(event(1));
        assert_eq!(rx1.recv().await.unwrap().id, "1");
        assert_eq!(rx2.recv().await.unwrap().id, "1");
    }

    #[tokio::test]
    async fn full_buffer_drops_for_that_subscriber_only() {
        let b = Broadcaster::new();
        let (mut slow, _s1) = b.subscribe();
        let (mut fast, _s2) = b.subscribe();

        // Overflow the buffers without reading `slow`.
        for i in 0..(SUBSCRIBER_BUFFER as u64 + 10) {
            b.publish(event(i));
            // Keep `fast` drained so it sees everything.
            assert_eq!(fast.recv().await.unwrap().id, i.to_string());
        }

        // The slow subscriber got exactly the buffered prefix, in order.
        for i in 0..SUBSCRIBER_BUFFER as u64 {
            assert_eq!(slow.recv().await.unwrap().id, i.to_string());
        }
        assert!(slow.try_recv().is_err());
    }

    #[tokio::test]
    async fn unsubscribe_detaches_and_publish_continues() {
        let b = Broadcaster::new();
        let (mut rx1, sub1) = b.subscribe();
        let (mut rx2, _sub2) = b.subscribe();

        b.publish(event(1));
        assert_eq!(rx1.recv().await.unwrap().id, "1");

        drop(sub1);
        assert_eq!(b.client_count(), 1);

        b.publish(event(2));
        assert_eq!(rx2.recv().await.unwrap().id, "1");
        assert_eq!(rx2.recv().await.unwrap().id, "2");
        // rx1's stream has terminated.
        assert!(rx1.recv().await.is_none());
    }

    #[tokio::test]
    async fn close_terminates_streams_and_mutes_publish() {
        let b = Broadcaster::new();
        let (mut rx, _sub) = b.subscribe();

        b.publish(event(1));
        b.close();
        assert_eq!(b.client_count(), 0);

        // Buffered event still drains, then the stream ends.
        assert_eq!(rx.recv().await.unwrap().id, "1");
        assert!(rx.recv().await.is_none());

        // Publishing after close is a silent no-op.
        b.publish(event(2));
    }

    #[tokio::test]
    async fn subscriber_ids_are_unique_under_concurrency() {
        let b = Broadcaster::new();
        let mut handles = Vec::new();
        for _ in 0..8 {
            let b = Arc::clone(&b);
            handles.push(tokio::spawn(async move {
                let subs: Vec<_> = (0..50).map(|_| b.subscribe()).collect();
                drop(subs);
            }));
        }
        for h in handles {
            h.await.unwrap();
        }
        // Every guard dropped: the set must be empty again.
        assert_eq!(b.client_count(), 0);
    }

    #[test]
    fn event_kind_wire_names() {
        assert_eq!(
            serde_json::to_value(EventKind::SegmentDeleted).unwrap(),
            json!("segment_deleted")
        );
        assert_eq!(EventKind::FlagToggled.as_str(), "flag_toggled");
        let kind: EventKind = serde_json::from_value(json!("rule_created")).unwrap();
        assert_that!(kind).is_equal_to(EventKind::RuleCreated);
    }
}
