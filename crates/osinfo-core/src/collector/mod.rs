//! Filesystem access for probes.
//!
//! Probes never touch `std::fs` directly. They read through the
//! [`FileSystem`] trait so the same code runs against the real host
//! ([`RealFs`]) or an in-memory fixture ([`MockFs`]) in tests.
//!
//! ```text
//!        ┌──────────────┐
//!        │    Probe     │  users, processes, cron, audit, ...
//!        └──────┬───────┘
//!               │
//!        ┌──────▼──────┐
//!        │  FileSystem │ (trait)
//!        └──────┬──────┘
//!       ┌───────┴────────┐
//! ┌─────▼─────┐   ┌──────▼──────┐
//! │  RealFs   │   │   MockFs    │
//! │  (host)   │   │  (fixtures) │
//! └───────────┘   └─────────────┘
//! ```

pub mod mock;
pub mod traits;

pub use mock::MockFs;
pub use traits::{FileMeta, FileSystem, RealFs};
