//! Global constants for the Clevel hash index.

/// Slots per bucket. Fixed by the data model; not configurable at runtime.
pub const ASSOC: usize = 8;

/// Maximum number of stacked levels. Bounds worst-case find/insert cost and
/// the depth of the `up` chain walked by `capacity()`.
pub const MAX_LEVEL: usize = 16;

/// Buckets migrated by the resizer per iteration.
pub const RESIZE_BULK: usize = 1;

/// Width in bits of the partial fingerprint carried in a slot's low bits.
pub const PARTIAL_BITS: u32 = 16;

/// MurmurHash2 64-bit mixer constant, used by `second_index`/`alt_index`.
pub const HASH_MIXER: u64 = 0xc6a4a7935bd1e995;

/// Cache line size, used to size arena allocation alignment.
pub const CACHE_LINE_SIZE: usize = 64;

/// Worker thread park timeout in milliseconds: how long the resizer thread
/// sleeps when there is no migration work pending (only two levels exist).
pub const WORKER_PARK_TIMEOUT_MS: u64 = 10;
