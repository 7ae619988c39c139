/// Seconds a pending lock candidate may collect votes before eviction.
pub const LOCK_TIMEOUT_SECS: u64 = 15;

/// Seconds an attacked or ready-but-unconfirmed candidate is retained so that
/// straggler vote evidence can still be collected before garbage collection.
pub const FAILED_LOCK_TIMEOUT_SECS: u64 = 60;

/// Seconds an orphan vote (vote seen before its transaction) is cached.
pub const ORPHAN_VOTE_TIMEOUT_SECS: u64 = 10;

/// Maximum cached orphan votes per voter across all transactions.
pub const ORPHAN_VOTES_PER_VOTER: usize = 32;

/// Size of the voter pool considered per input when selecting expected voters.
pub const QUORUM_SIZE: usize = 10;

/// Minimum number of distinct voter signatures required per input.
pub const BASE_SIGNATURES_REQUIRED: usize = 6;

/// Floor value of the lock fee in satoshis.
pub const MIN_LOCK_FEE: u64 = 10_000;

/// Per-input component of the minimum lock fee in satoshis.
pub const MIN_LOCK_FEE_PER_INPUT: u64 = 1_000;

/// Input count above which a lock request logs a fanout warning (soft limit).
pub const MANY_INPUTS_WARN_THRESHOLD: usize = 100;

/// Block depth at which a confirmed transaction's lock is superseded.
pub const LOCK_CONFIRMATION_DEPTH: u64 = 6;

/// Maximum entries kept in the rejected-request cache before it is reset.
pub const REJECTED_CACHE_MAX: usize = 1_024;
