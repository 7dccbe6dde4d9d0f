//! # Clevel Hash
//!
//! A lock-free, crash-consistent, dynamically resizable persistent-memory
//! hash index: a stack of fixed-associativity hash levels addressed through
//! arena offsets, with a background resizer that migrates the bottom level
//! upward while readers and writers keep making progress.

#![warn(missing_docs)]

/// Arena: the offset-addressed allocator backing every entry.
pub mod arena;

/// Core application components: configuration and logging.
pub mod core;

/// The Clevel engine: levels, buckets, slots, and the mutator protocols.
pub mod clevel;

/// Shared type definitions (errors).
pub mod types;

/// System constants.
pub mod constants;

// Re-export commonly used items.
pub use clevel::{ClevelHash, FoundResult, InsertResult, RecoveryReport};
pub use core::Config;
pub use types::error::ClevelError;
