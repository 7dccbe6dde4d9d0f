//! Core application components: configuration and logging, usable whether
//! the table is embedded in a server process or a standalone benchmark.

/// Table configuration.
pub mod config;

/// Logging macros wrapping `tracing`.
pub mod logging;

pub use config::Config;
