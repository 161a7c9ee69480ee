//! osinfo-core: shared library for the osinfo exporter.
//!
//! Provides:
//! - `registry`: metric families keyed by label tuple, per-family locking, text exposition
//! - `reconcile`: snapshot diffing that keeps each family equal to the latest observation
//! - `scheduler`: one task per probe, single in-flight run, timeouts, generation fencing
//! - `governor`: CPU thread ceiling and memory ceiling enforcement
//! - `collector`: filesystem abstraction (`RealFs`, `MockFs`) used by probes
//! - `probe`: OS-state probes and platform detection
//! - `config`: validated exporter configuration
//! - `fmt`: shared formatting helpers

pub mod collector;
pub mod config;
pub mod fmt;
pub mod governor;
pub mod probe;
pub mod reconcile;
pub mod registry;
pub mod scheduler;

/// Crate version, shared by the exporter binary and the landing page.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
