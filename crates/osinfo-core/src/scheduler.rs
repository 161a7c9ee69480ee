//! Per-probe collection loops.
//!
//! Each probe gets its own tokio task driven by an interval timer. A cycle
//! runs the synchronous probe on the blocking pool under a deadline and
//! reconciles the result into the probe's family. At most one run per probe
//! is in flight; ticks that arrive while a run is still executing are
//! counted as skipped.
//!
//! ```text
//!   tick ──► in flight? ──yes──► Skipped
//!              │ no
//!              ▼
//!   spawn_blocking(probe.collect) ──deadline──► TimedOut (generation retired, run cancelled)
//!              │
//!      Err ◄───┴───► Ok(snapshot) ──► reconcile ──► Committed | Stale
//!   Failed
//! ```

use std::any::Any;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::{Duration, Instant};

use serde::Serialize;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

use crate::probe::{CancelFlag, Probe, ProbeError};
use crate::reconcile::{ReconcileOutcome, ReconcileStats, Snapshot, reconcile};
use crate::registry::{MetricFamily, MetricKind, Registry, RegistryError, TextEncoder};

/// Result of one scheduled run.
#[derive(Debug)]
pub enum CycleOutcome {
    /// Snapshot applied to the family.
    Committed(ReconcileStats),
    /// Snapshot was older than what the family already holds.
    Stale { generation: u64, committed: u64 },
    /// Probe returned an error or panicked; the family is unchanged.
    Failed(ProbeError),
    /// Probe missed its deadline; its generation is retired.
    TimedOut { generation: u64 },
    /// A previous run was still in flight.
    Skipped,
}

/// Counters for one probe, exported as self-metrics.
#[derive(Debug, Default)]
pub struct ProbeStats {
    runs: AtomicU64,
    failures: AtomicU64,
    timeouts: AtomicU64,
    skipped: AtomicU64,
    last_duration_micros: AtomicU64,
    series: AtomicU64,
}

/// Point-in-time copy of [`ProbeStats`].
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ProbeStatsSnapshot {
    pub collector: String,
    pub interval_seconds: u64,
    pub timeout_seconds: f64,
    pub runs: u64,
    pub failures: u64,
    pub timeouts: u64,
    pub skipped: u64,
    pub last_duration_seconds: f64,
    pub series: u64,
}

impl ProbeStats {
    fn record_duration(&self, elapsed: Duration) {
        self.last_duration_micros
            .store(elapsed.as_micros() as u64, Ordering::Relaxed);
    }

    pub fn runs(&self) -> u64 {
        self.runs.load(Ordering::Relaxed)
    }

    pub fn failures(&self) -> u64 {
        self.failures.load(Ordering::Relaxed)
    }

    pub fn timeouts(&self) -> u64 {
        self.timeouts.load(Ordering::Relaxed)
    }

    pub fn skipped(&self) -> u64 {
        self.skipped.load(Ordering::Relaxed)
    }

    pub fn series(&self) -> u64 {
        self.series.load(Ordering::Relaxed)
    }

    pub fn last_duration(&self) -> Duration {
        Duration::from_micros(self.last_duration_micros.load(Ordering::Relaxed))
    }
}

/// Clears the in-flight flag when the blocking run actually ends.
struct InFlightGuard(Arc<AtomicBool>);

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

/// Cancels the run if the awaiting future goes away first.
struct CancelOnDrop(CancelFlag);

impl Drop for CancelOnDrop {
    fn drop(&mut self) {
        self.0.cancel();
    }
}

fn panic_message(payload: Box<dyn Any + Send>) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic payload".to_string()
    }
}

/// A probe bound to its family, with its cadence and run state.
pub struct ScheduledProbe {
    probe: Arc<dyn Probe>,
    family: Arc<MetricFamily>,
    interval: Duration,
    timeout: Duration,
    stats: ProbeStats,
    in_flight: Arc<AtomicBool>,
    generation: AtomicU64,
}

impl ScheduledProbe {
    /// The deadline is capped at the interval so a run never spans two ticks.
    pub fn new(
        probe: Arc<dyn Probe>,
        family: Arc<MetricFamily>,
        interval: Duration,
        timeout: Duration,
    ) -> Self {
        Self {
            probe,
            family,
            interval,
            timeout: timeout.min(interval),
            stats: ProbeStats::default(),
            in_flight: Arc::new(AtomicBool::new(false)),
            generation: AtomicU64::new(0),
        }
    }

    pub fn name(&self) -> &str {
        self.family.name()
    }

    pub fn family(&self) -> &Arc<MetricFamily> {
        &self.family
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    pub fn stats(&self) -> &ProbeStats {
        &self.stats
    }

    pub fn is_in_flight(&self) -> bool {
        self.in_flight.load(Ordering::Acquire)
    }

    pub fn stats_snapshot(&self) -> ProbeStatsSnapshot {
        ProbeStatsSnapshot {
            collector: self.name().to_string(),
            interval_seconds: self.interval.as_secs(),
            timeout_seconds: self.timeout.as_secs_f64(),
            runs: self.stats.runs(),
            failures: self.stats.failures(),
            timeouts: self.stats.timeouts(),
            skipped: self.stats.skipped(),
            last_duration_seconds: self.stats.last_duration().as_secs_f64(),
            series: self.stats.series(),
        }
    }

    /// Runs one collection cycle.
    pub async fn run_cycle(&self) -> CycleOutcome {
        if self
            .in_flight
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            self.stats.skipped.fetch_add(1, Ordering::Relaxed);
            debug!(family = %self.name(), "previous run still in flight, skipping");
            return CycleOutcome::Skipped;
        }

        let generation = self.generation.fetch_add(1, Ordering::Relaxed) + 1;
        self.stats.runs.fetch_add(1, Ordering::Relaxed);
        let guard = InFlightGuard(self.in_flight.clone());
        let probe = self.probe.clone();
        let started = Instant::now();

        let cancel = CancelFlag::new();
        let _abandon = CancelOnDrop(cancel.clone());
        let run_cancel = cancel.clone();

        // A run still queued for a blocking thread when cancelled never calls collect.
        let task = tokio::task::spawn_blocking(move || {
            let _guard = guard;
            let mut snapshot = Snapshot::new(generation);
            probe
                .collect_until(&mut snapshot, &run_cancel)
                .map(|_| snapshot)
        });

        let joined = match tokio::time::timeout(self.timeout, task).await {
            Ok(joined) => joined,
            Err(_) => {
                // Whatever the blocking run still returns is dropped.
                cancel.cancel();
                self.family.retire_generation(generation);
                self.stats.timeouts.fetch_add(1, Ordering::Relaxed);
                self.stats.record_duration(self.timeout);
                warn!(
                    family = %self.name(),
                    generation,
                    timeout_ms = self.timeout.as_millis() as u64,
                    "probe timed out, result will be discarded"
                );
                return CycleOutcome::TimedOut { generation };
            }
        };
        let elapsed = started.elapsed();
        self.stats.record_duration(elapsed);

        let collected = match joined {
            Ok(result) => result,
            Err(e) if e.is_panic() => Err(ProbeError::Panicked(panic_message(e.into_panic()))),
            Err(e) => Err(ProbeError::Panicked(e.to_string())),
        };
        let outcome = collected.and_then(|snapshot| {
            reconcile(&self.family, snapshot).map_err(ProbeError::from)
        });

        match outcome {
            Ok(ReconcileOutcome::Applied(stats)) => {
                self.stats
                    .series
                    .store(stats.total() as u64, Ordering::Relaxed);
                debug!(
                    family = %self.name(),
                    generation,
                    added = stats.added,
                    updated = stats.updated,
                    removed = stats.removed,
                    duration_ms = elapsed.as_millis() as u64,
                    "snapshot committed"
                );
                CycleOutcome::Committed(stats)
            }
            Ok(ReconcileOutcome::Stale {
                generation,
                committed,
            }) => {
                warn!(family = %self.name(), generation, committed, "stale snapshot rejected");
                CycleOutcome::Stale {
                    generation,
                    committed,
                }
            }
            Err(e) => {
                self.stats.failures.fetch_add(1, Ordering::Relaxed);
                warn!(
                    family = %self.name(),
                    generation,
                    error = %e,
                    "probe failed, keeping previous state"
                );
                CycleOutcome::Failed(e)
            }
        }
    }
}

/// Interval loop for one probe. The first tick fires immediately.
async fn run_loop(probe: Arc<ScheduledProbe>, mut shutdown: watch::Receiver<bool>) {
    let mut ticker = tokio::time::interval(probe.interval());
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

    loop {
        tokio::select! {
            _ = ticker.tick() => {}
            _ = shutdown.changed() => break,
        }
        tokio::select! {
            _ = probe.run_cycle() => {}
            _ = shutdown.changed() => break,
        }
    }
    debug!(family = %probe.name(), "collection loop stopped");
}

/// Owns the registry and one [`ScheduledProbe`] per family.
pub struct Scheduler {
    registry: Registry,
    probes: Vec<Arc<ScheduledProbe>>,
}

impl Scheduler {
    /// Registers one family per probe. Each probe runs at its cadence
    /// resolved against `default_interval`.
    pub fn new(
        probes: Vec<Arc<dyn Probe>>,
        default_interval: Duration,
        timeout: Duration,
    ) -> Result<Self, RegistryError> {
        let mut builder = Registry::builder();
        let mut scheduled = Vec::with_capacity(probes.len());
        for probe in probes {
            let family = builder.register(probe.desc())?;
            let interval = probe.cadence().resolve(default_interval);
            scheduled.push(Arc::new(ScheduledProbe::new(
                probe, family, interval, timeout,
            )));
        }
        Ok(Self {
            registry: builder.build(),
            probes: scheduled,
        })
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    pub fn probes(&self) -> &[Arc<ScheduledProbe>] {
        &self.probes
    }

    /// Starts one loop per probe on the current runtime.
    pub fn spawn(&self, shutdown: watch::Receiver<bool>) -> Vec<JoinHandle<()>> {
        self.probes
            .iter()
            .map(|probe| {
                info!(
                    family = %probe.name(),
                    interval_secs = probe.interval().as_secs(),
                    timeout_secs = probe.timeout().as_secs(),
                    "scheduling probe"
                );
                tokio::spawn(run_loop(probe.clone(), shutdown.clone()))
            })
            .collect()
    }

    /// Names of families whose last run has not finished yet.
    pub fn in_flight(&self) -> Vec<&str> {
        self.probes
            .iter()
            .filter(|p| p.is_in_flight())
            .map(|p| p.name())
            .collect()
    }

    pub fn stats(&self) -> Vec<ProbeStatsSnapshot> {
        self.probes.iter().map(|p| p.stats_snapshot()).collect()
    }

    /// Full exposition text: every family, then the collector self-metrics.
    pub fn render(&self) -> String {
        let mut encoder = TextEncoder::new();
        for view in self.registry.export() {
            encoder.family(&view);
        }
        encode_self_metrics(&mut encoder, &self.stats());
        encoder.finish()
    }
}

fn encode_self_metrics(encoder: &mut TextEncoder, stats: &[ProbeStatsSnapshot]) {
    type Field = fn(&ProbeStatsSnapshot) -> f64;
    let metrics: [(&str, &str, MetricKind, Field); 6] = [
        (
            "osinfo_collector_runs_total",
            "Collection cycles started per collector.",
            MetricKind::Counter,
            |s| s.runs as f64,
        ),
        (
            "osinfo_collector_failures_total",
            "Collection cycles that failed and left the family unchanged.",
            MetricKind::Counter,
            |s| s.failures as f64,
        ),
        (
            "osinfo_collector_timeouts_total",
            "Collection cycles abandoned at the deadline.",
            MetricKind::Counter,
            |s| s.timeouts as f64,
        ),
        (
            "osinfo_collector_skipped_total",
            "Ticks skipped because a previous cycle was still running.",
            MetricKind::Counter,
            |s| s.skipped as f64,
        ),
        (
            "osinfo_collector_last_duration_seconds",
            "Duration of the last collection cycle.",
            MetricKind::Gauge,
            |s| s.last_duration_seconds,
        ),
        (
            "osinfo_collector_series",
            "Series currently held by the collector's family.",
            MetricKind::Gauge,
            |s| s.series as f64,
        ),
    ];

    for (name, help, kind, field) in metrics {
        encoder.header(name, help, kind);
        for s in stats {
            encoder.sample(name, [("collector", s.collector.as_str())], field(s));
        }
    }
}
