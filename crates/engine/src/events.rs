//! Event Publisher: after any successful write applies locally,
//! a typed event is fanned out to subscribers over bounded, per-subscriber
//! channels. Delivery is at-least-once best-effort: a subscriber whose
//! buffer is full has that one event dropped and a `BackpressureDropped`
//! counter incremented, never the whole publisher blocked or the apply
//! loop stalled.

use concord_core::Key;
use crossbeam::channel::{self, Receiver, Sender, TrySendError};
use parking_lot::RwLock;
use std::collections::HashSet;
use std::sync::atomic::{AtomicU64, Ordering};

/// The kind of write that produced an event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventOp {
    /// `put`.
    Put,
    /// `delete`.
    Delete,
    /// `touch`.
    Touch,
    /// `put_if`.
    PutIf,
    /// `delete_if`.
    DeleteIf,
    /// `put_many`.
    PutMany,
    /// `delete_many`.
    DeleteMany,
    /// `touch_many`.
    TouchMany,
    /// `cleanup_expired`.
    CleanupExpired,
    /// `index_create`.
    IndexCreate,
    /// `index_drop`.
    IndexDrop,
    /// `index_reindex`.
    IndexReindex,
}

/// A single change-data event: `{op, keys, version, applied_index, node_id}`.
#[derive(Debug, Clone)]
pub struct Event {
    /// Which command produced this event.
    pub op: EventOp,
    /// Keys touched by the command.
    pub keys: Vec<Key>,
    /// Post-write version of the affected key(s); `0` for operations with
    /// no single authoritative version (e.g. `cleanup_expired`).
    pub version: u64,
    /// Log index the command committed at.
    pub applied_index: u64,
    /// Id of the node that applied (and is publishing) this event.
    pub node_id: String,
}

/// Subscription filter: a subscriber only receives events matching both
/// the key prefix (if set) and the op-type set (if set).
#[derive(Debug, Clone, Default)]
pub struct SubscriptionFilter {
    /// Only deliver events touching at least one key with this prefix.
    pub key_prefix: Option<Vec<u8>>,
    /// Only deliver events whose op is in this set.
    pub op_types: Option<HashSet<EventOp>>,
}

impl SubscriptionFilter {
    /// No filtering: receive every event.
    pub fn all() -> Self {
        SubscriptionFilter::default()
    }

    fn matches(&self, event: &Event) -> bool {
        if let Some(prefix) = &self.key_prefix {
            if !event.keys.iter().any(|k| k.starts_with(prefix)) {
                return false;
            }
        }
        if let Some(ops) = &self.op_types {
            if !ops.contains(&event.op) {
                return false;
            }
        }
        true
    }
}

/// A live subscription: drop it (or call [`EventPublisher::unsubscribe`])
/// to stop receiving events.
pub struct Subscription {
    id: u64,
    /// Receiving end of this subscriber's bounded channel.
    pub receiver: Receiver<Event>,
}

impl Subscription {
    /// The id used to unsubscribe.
    pub fn id(&self) -> u64 {
        self.id
    }
}

struct SubscriberHandle {
    id: u64,
    sender: Sender<Event>,
    filter: SubscriptionFilter,
}

/// Fans out committed-write events to registered subscribers.
pub struct EventPublisher {
    enabled: bool,
    buffer_size: usize,
    subscribers: RwLock<Vec<SubscriberHandle>>,
    next_id: AtomicU64,
    backpressure_dropped: AtomicU64,
}

impl EventPublisher {
    /// Build a publisher. When `enabled` is false, `publish` is a no-op
    /// and `subscribe` still works but will never receive anything.
    pub fn new(enabled: bool, buffer_size: usize) -> Self {
        EventPublisher {
            enabled,
            buffer_size,
            subscribers: RwLock::new(Vec::new()),
            next_id: AtomicU64::new(1),
            backpressure_dropped: AtomicU64::new(0),
        }
    }

    /// Register a new subscriber with `filter`, returning its subscription.
    pub fn subscribe(&self, filter: SubscriptionFilter) -> Subscription {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let (sender, receiver) = channel::bounded(self.buffer_size.max(1));
        self.subscribers.write().push(SubscriberHandle { id, sender, filter });
        Subscription { id, receiver }
    }

    /// Remove a subscriber by id.
    pub fn unsubscribe(&self, id: u64) {
        self.subscribers.write().retain(|s| s.id != id);
    }

    /// Fan `event` out to every matching, still-connected subscriber. A
    /// full buffer drops that event for that subscriber only; a
    /// disconnected subscriber is pruned.
    pub fn publish(&self, event: Event) {
        if !self.enabled {
            return;
        }
        let mut subscribers = self.subscribers.write();
        subscribers.retain(|sub| {
            if !sub.filter.matches(&event) {
                return true;
            }
            match sub.sender.try_send(event.clone()) {
                Ok(()) => true,
                Err(TrySendError::Full(_)) => {
                    self.backpressure_dropped.fetch_add(1, Ordering::SeqCst);
                    true
                }
                Err(TrySendError::Disconnected(_)) => false,
            }
        });
    }

    /// Total events dropped across all subscribers due to a full buffer.
    pub fn backpressure_dropped(&self) -> u64 {
        self.backpressure_dropped.load(Ordering::SeqCst)
    }

    /// Number of currently registered subscribers.
    pub fn subscriber_count(&self) -> usize {
        self.subscribers.read().len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use concord_core::Key;

    fn key(s: &str) -> Key {
        Key::new(s.as_bytes().to_vec()).unwrap()
    }

    fn sample_event(op: EventOp, keys: Vec<Key>) -> Event {
        Event {
            op,
            keys,
            version: 1,
            applied_index: 1,
            node_id: "n1".into(),
        }
    }

    #[test]
    fn subscriber_receives_matching_event() {
        let pub_ = EventPublisher::new(true, 10);
        let sub = pub_.subscribe(SubscriptionFilter::all());
        pub_.publish(sample_event(EventOp::Put, vec![key("a")]));
        let event = sub.receiver.try_recv().unwrap();
        assert_eq!(event.op, EventOp::Put);
    }

    #[test]
    fn key_prefix_filter_excludes_non_matching() {
        let pub_ = EventPublisher::new(true, 10);
        let filter = SubscriptionFilter {
            key_prefix: Some(b"user:".to_vec()),
            op_types: None,
        };
        let sub = pub_.subscribe(filter);
        pub_.publish(sample_event(EventOp::Put, vec![key("order:1")]));
        assert!(sub.receiver.try_recv().is_err());
        pub_.publish(sample_event(EventOp::Put, vec![key("user:1")]));
        assert!(sub.receiver.try_recv().is_ok());
    }

    #[test]
    fn op_type_filter_excludes_non_matching() {
        let pub_ = EventPublisher::new(true, 10);
        let mut ops = HashSet::new();
        ops.insert(EventOp::Delete);
        let filter = SubscriptionFilter {
            key_prefix: None,
            op_types: Some(ops),
        };
        let sub = pub_.subscribe(filter);
        pub_.publish(sample_event(EventOp::Put, vec![key("a")]));
        assert!(sub.receiver.try_recv().is_err());
        pub_.publish(sample_event(EventOp::Delete, vec![key("a")]));
        assert!(sub.receiver.try_recv().is_ok());
    }

    #[test]
    fn full_buffer_drops_and_increments_counter_without_losing_other_subscribers() {
        let pub_ = EventPublisher::new(true, 1);
        let slow = pub_.subscribe(SubscriptionFilter::all());
        let fast = pub_.subscribe(SubscriptionFilter::all());

        pub_.publish(sample_event(EventOp::Put, vec![key("a")]));
        pub_.publish(sample_event(EventOp::Put, vec![key("b")]));

        assert_eq!(pub_.backpressure_dropped(), 1);
        // slow subscriber still got the first event, just not the second.
        assert!(slow.receiver.try_recv().is_ok());
        assert!(slow.receiver.try_recv().is_err());
        // fast subscriber is unaffected by slow's backpressure.
        drop(fast);
    }

    #[test]
    fn disabled_publisher_delivers_nothing() {
        let pub_ = EventPublisher::new(false, 10);
        let sub = pub_.subscribe(SubscriptionFilter::all());
        pub_.publish(sample_event(EventOp::Put, vec![key("a")]));
        assert!(sub.receiver.try_recv().is_err());
    }

    #[test]
    fn unsubscribe_stops_delivery() {
        let pub_ = EventPublisher::new(true, 10);
        let sub = pub_.subscribe(SubscriptionFilter::all());
        pub_.unsubscribe(sub.id());
        pub_.publish(sample_event(EventOp::Put, vec![key("a")]));
        assert_eq!(pub_.subscriber_count(), 0);
    }
}
