//! CPU and memory ceilings.
//!
//! The CPU ceiling is applied once, by sizing the runtime's thread pools
//! (see [`ResourceLimits::worker_threads`]). The memory ceiling is enforced
//! by [`MemoryGovernor`], which samples allocator statistics once per
//! second and reports a breach; the binary terminates the process on it.

use std::time::Duration;

use serde::Serialize;
use tokio::sync::watch;
use tokio::time::MissedTickBehavior;
use tracing::{debug, trace};

use crate::fmt::{FmtStyle, format_bytes};

pub const CHECK_INTERVAL: Duration = Duration::from_secs(1);

const BYTES_PER_MB: u64 = 1024 * 1024;

/// Ceilings requested on the command line. Zero means unlimited.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ResourceLimits {
    /// CPU budget in millicores (1000 = one core).
    pub cpu_millicores: u32,
    /// Memory budget in megabytes.
    pub memory_mb: u64,
}

impl ResourceLimits {
    /// Worker thread count for the CPU budget, rounded up to whole cores.
    pub fn worker_threads(&self) -> Option<usize> {
        (self.cpu_millicores > 0).then(|| self.cpu_millicores.div_ceil(1000) as usize)
    }

    pub fn memory_bytes(&self) -> Option<u64> {
        (self.memory_mb > 0).then(|| self.memory_mb.saturating_mul(BYTES_PER_MB))
    }
}

/// Memory usage breached the configured ceiling.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResourceCeilingExceeded {
    pub observed: u64,
    pub limit: u64,
}

impl std::fmt::Display for ResourceCeilingExceeded {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "memory usage {} exceeds limit {}",
            format_bytes(self.observed, FmtStyle::Detail),
            format_bytes(self.limit, FmtStyle::Detail)
        )
    }
}

impl std::error::Error for ResourceCeilingExceeded {}

/// Source of the process's current heap usage.
pub trait AllocatedMemory: Send + Sync + 'static {
    /// Bytes currently allocated, or `None` when statistics are unavailable.
    fn allocated_bytes(&self) -> Option<u64>;
}

pub struct MemoryGovernor<S> {
    source: S,
    limit: u64,
    interval: Duration,
}

impl<S: AllocatedMemory> MemoryGovernor<S> {
    pub fn new(source: S, limit_bytes: u64) -> Self {
        Self {
            source,
            limit: limit_bytes,
            interval: CHECK_INTERVAL,
        }
    }

    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    pub fn limit(&self) -> u64 {
        self.limit
    }

    /// Samples once. Returns the observed usage, if any.
    pub fn check(&self) -> Result<Option<u64>, ResourceCeilingExceeded> {
        let Some(observed) = self.source.allocated_bytes() else {
            return Ok(None);
        };
        if observed > self.limit {
            return Err(ResourceCeilingExceeded {
                observed,
                limit: self.limit,
            });
        }
        Ok(Some(observed))
    }

    /// Samples every interval until shutdown or a breach.
    pub async fn run(
        self,
        mut shutdown: watch::Receiver<bool>,
    ) -> Result<(), ResourceCeilingExceeded> {
        debug!(
            limit = %format_bytes(self.limit, FmtStyle::Compact),
            "memory governor started"
        );
        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    if let Some(observed) = self.check()? {
                        trace!(allocated = observed, "memory sample");
                    }
                }
                _ = shutdown.changed() => return Ok(()),
            }
        }
    }
}
