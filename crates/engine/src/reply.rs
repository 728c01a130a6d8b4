//! Wire encoding for a command's outcome: `apply` itself returns
//! a plain `Result<ApplyReply>`, but the `Consensus::submit_command` seam
//! only deals in opaque bytes, so the host-supplied apply closure encodes
//! the outcome here before handing it back across that boundary.

use crate::machine::ApplyReply;
use concord_core::{Error, Result};
use serde::{Deserialize, Serialize};

#[derive(Serialize, Deserialize)]
enum WireReply {
    Ok(ApplyReply),
    Err(Error),
}

/// Encode a command's outcome for the reply side of `CommandCommit`.
pub fn encode_reply(result: &Result<ApplyReply>) -> Vec<u8> {
    let wire = match result {
        Ok(reply) => WireReply::Ok(reply.clone()),
        Err(err) => WireReply::Err(err.clone()),
    };
    rmp_serde::to_vec(&wire).expect("ApplyReply encodes to msgpack infallibly")
}

/// Reverse `encode_reply`. A decode failure indicates the reply bytes were
/// produced by an incompatible version and is itself surfaced as an error
/// rather than panicking.
pub fn decode_reply(bytes: &[u8]) -> Result<ApplyReply> {
    match rmp_serde::from_slice::<WireReply>(bytes) {
        Ok(WireReply::Ok(reply)) => Ok(reply),
        Ok(WireReply::Err(err)) => Err(err),
        Err(e) => Err(Error::InvalidOperationFormat(format!("reply decode: {e}"))),
    }
}
