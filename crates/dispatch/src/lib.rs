//! Command Dispatcher and Query Router: the API-level seam between a
//! host process and the replicated log.

#![warn(missing_docs)]

pub mod dispatcher;
pub mod router;

pub use dispatcher::{ConditionSpec, DispatchOptions, Dispatcher, PutRequest, TouchRequest};
pub use router::{QueryOutcome, QueryRouter};
