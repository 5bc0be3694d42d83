//! Indexer-wide constants.

/// Current on-disk schema version of every column family.
pub const DB_VERSION: u32 = 6;

/// Output scripts whose descriptor exceeds this length are not indexed.
pub const MAX_ADDR_DESC_LEN: usize = 1024;

/// Largest magnitude, in bytes, a packed bigint may carry.
pub const MAX_PACKED_BIGINT_BYTES: usize = 248;

/// UTXO list length at which balance lookups switch from a linear scan
/// to the `btxID -> position` map.
pub const UTXO_MAP_THRESHOLD: usize = 16;

/// Address index of a plain value transfer recipient.
pub const TRANSFER_TO: i32 = 0;
/// Address index of a plain value transfer sender.
pub const TRANSFER_FROM: i32 = !0;
/// Address index of an internal transfer recipient (or created contract).
pub const INTERNAL_TRANSFER_TO: i32 = 1;
/// Address index of an internal transfer sender.
pub const INTERNAL_TRANSFER_FROM: i32 = !1;
/// Token transfer `k` is recorded with index `k + CONTRACT_INDEX_OFFSET`.
pub const CONTRACT_INDEX_OFFSET: i32 = 2;

/// Number of block timestamps kept in the in-memory ring.
pub const BLOCK_TIMES_CAPACITY: usize = 1024;

/// Number of trailing inter-block gaps averaged into the block period.
pub const AVG_BLOCK_PERIOD_WINDOW: usize = 100;

/// Timestamp layout of `fiatRates` keys.
pub const FIAT_RATES_TIME_FORMAT: &str = "%Y%m%d%H%M%S";
