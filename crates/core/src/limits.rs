//! Hard limits enumerated by the external interface contract.

/// Minimum length of a key, in bytes. Keys of length 0 are rejected.
pub const MIN_KEY_LEN: usize = 1;

/// Maximum length of a key, in bytes.
pub const MAX_KEY_LEN: usize = 1024;

/// Default maximum number of operations in a single bulk command.
pub const DEFAULT_MAX_BATCH_SIZE: usize = 500;

/// Default TTL reaper cadence, in seconds.
pub const DEFAULT_TTL_CLEANUP_INTERVAL_SECONDS: u64 = 300;

/// Default event subscriber buffer size.
pub const DEFAULT_EVENT_BUFFER_SIZE: usize = 10_000;

/// Current command/query wire schema version.
///
/// Bumped whenever a breaking change is made to the encoding in
/// `concord-engine::wire`. Entries tagged with a newer version than this
/// are rejected before decoding is attempted, so a rolling upgrade never
/// misinterprets a payload it doesn't understand yet.
pub const CURRENT_SCHEMA_VERSION: u16 = 1;
