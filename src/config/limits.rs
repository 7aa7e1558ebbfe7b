//! Limits for batched ledger writes and transaction retries.

use serde::Deserialize;

/// Default operations per bulk-write batch.
///
/// One under the store's hard cap of 500 operations per commit.
pub const DEFAULT_MAX_BATCH_WRITES: usize = 499;

/// Default retries after a purchase loses a version race.
pub const DEFAULT_PURCHASE_MAX_RETRIES: u32 = 5;

/// Default first retry delay in milliseconds.
pub const DEFAULT_RETRY_MIN_DELAY_MS: u64 = 10;

/// Default retry delay cap in milliseconds.
pub const DEFAULT_RETRY_MAX_DELAY_MS: u64 = 500;

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LedgerLimits {
    /// Maximum operations per commit for chunked bulk writes
    /// (history clearing, black marks, mark-all-read).
    pub max_batch_writes: usize,

    /// Retries after a version conflict before a purchase reports a
    /// transient failure.
    pub purchase_max_retries: u32,

    pub retry_min_delay_ms: u64,

    pub retry_max_delay_ms: u64,
}

impl Default for LedgerLimits {
    fn default() -> Self {
        Self {
            max_batch_writes: DEFAULT_MAX_BATCH_WRITES,
            purchase_max_retries: DEFAULT_PURCHASE_MAX_RETRIES,
            retry_min_delay_ms: DEFAULT_RETRY_MIN_DELAY_MS,
            retry_max_delay_ms: DEFAULT_RETRY_MAX_DELAY_MS,
        }
    }
}
