//! Shared types and error taxonomy for Concord.
//!
//! Every other crate in the workspace depends on this one for `Key`,
//! `Value`, `Record`, `Error`/`Result`, and `Config`. Nothing here touches
//! storage, consensus, or the wire format — those are the concern of
//! `concord-store`, `concord-consensus`, and `concord-engine` respectively.

#![warn(missing_docs)]

mod config;
mod error;
mod key;
pub mod limits;
mod record;
mod value;

pub use config::{
    CompressionAlgorithm, CompressionConfig, Config, EventStreamConfig, ReadConsistency,
    TtlConfig,
};
pub use error::{Error, Result};
pub use key::Key;
pub use record::Record;
pub use value::Value;
