//! Error types for the Clevel hash index.
//!
//! `AllocatorFull` is the only error variant a caller of [`crate::ClevelHash`]
//! can observe from `insert`/`update`; `Corrupt` surfaces only from the
//! crash-recovery pass, and `InvalidConfig` only from [`crate::core::config`].
//! `LostRace` and `ResizeInFlight` are internal retry signals and
//! deliberately do not appear here — they never cross the public API.

use thiserror::Error;

/// Errors surfaced by the public API.
#[derive(Debug, Error)]
pub enum ClevelError {
    /// The arena has no room for the requested allocation. The operation
    /// that triggered this performed no state change.
    #[error("arena allocator exhausted")]
    AllocatorFull,

    /// The recovery pass found a root, level, or slot graph it could not
    /// reconcile (e.g. an offset pointing outside any mapped region).
    #[error("persisted state is corrupt: {0}")]
    Corrupt(String),

    /// A `Config` failed validation.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    /// Wraps I/O errors from the arena's backing file.
    #[error("arena I/O error: {0}")]
    Io(#[from] std::io::Error),
}
