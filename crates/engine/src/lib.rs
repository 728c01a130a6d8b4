//! The state machine layer: commands, queries, the event
//! publisher, and the deterministic interpreter tying them to the store
//! and secondary indexes.

#![warn(missing_docs)]

pub mod command;
pub mod events;
pub mod machine;
pub mod predicate;
pub mod query;
pub mod reply;

pub use command::{
    decode_command, encode_command, Command, Condition, PutOp, TouchOp,
};
pub use events::{Event, EventOp, EventPublisher, Subscription, SubscriptionFilter};
pub use machine::{ApplyReply, StateMachine};
pub use predicate::{PredicateFn, PredicateId, PredicateRegistry};
pub use query::{KeysPattern, QueryValue, QueryValueWithTtl, Stats, TtlStatus};
pub use reply::{decode_reply, encode_reply};
