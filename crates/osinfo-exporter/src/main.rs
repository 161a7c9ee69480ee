//! osinfo-exporter - OS state exporter.
//!
//! Periodically probes users, processes, network interfaces, filesystems,
//! scheduled jobs, packages and audited files, and serves the results as
//! labelled gauges in the Prometheus text format.

mod handlers;
mod state;

use std::path::PathBuf;
use std::process;
use std::sync::Arc;
use std::time::Duration;

use clap::{ArgAction, Parser};
use tokio::sync::watch;
use tracing::{Level, error, info, warn};
use tracing_subscriber::EnvFilter;

use osinfo_core::collector::RealFs;
use osinfo_core::config::{ConfigError, ExporterConfig};
use osinfo_core::fmt::{FmtStyle, format_bytes, format_duration};
use osinfo_core::governor::{AllocatedMemory, MemoryGovernor, ResourceLimits};
use osinfo_core::probe::{Platform, build_probes};
use osinfo_core::scheduler::Scheduler;

use state::{AppState, JemallocStats};

/// Exit code for startup failures.
const EXIT_STARTUP: i32 = 1;
/// Exit code when the memory ceiling is breached.
const EXIT_RESOURCE_CEILING: i32 = 3;
/// How long shutdown waits for probe runs still on the blocking pool.
const SHUTDOWN_GRACE: Duration = Duration::from_secs(5);

// ============================================================
// CLI
// ============================================================

#[derive(Parser, Debug)]
#[command(
    name = "osinfo-exporter",
    about = "Exports OS state as Prometheus metrics",
    version = osinfo_core::VERSION
)]
struct Args {
    /// Address to listen on.
    #[arg(long, default_value = "0.0.0.0", env = "OSINFO_ADDRESS")]
    address: String,

    /// Port to listen on.
    #[arg(long, default_value_t = 9101, env = "OSINFO_PORT")]
    port: u16,

    /// Default collection interval. A bare number is seconds; use a suffix
    /// for other units (`30m`, `1h`).
    #[arg(long, default_value = "30m", value_parser = parse_duration_arg, env = "OSINFO_INTERVAL")]
    interval: Duration,

    /// Per-run probe timeout. A bare number is seconds.
    #[arg(long, default_value = "60s", value_parser = parse_duration_arg, env = "OSINFO_TIMEOUT")]
    timeout: Duration,

    /// CPU limit in millicores (1000 = one core, 0 = unlimited).
    #[arg(long = "resource.cpu", default_value_t = 0, env = "OSINFO_RESOURCE_CPU")]
    resource_cpu: u32,

    /// Memory limit in megabytes (0 = unlimited).
    #[arg(long = "resource.memory", default_value_t = 0, env = "OSINFO_RESOURCE_MEMORY")]
    resource_memory: u64,

    /// Path to the /proc filesystem.
    #[arg(long, default_value = "/proc", env = "OSINFO_PROC_PATH")]
    proc_path: PathBuf,

    /// Directory to audit (repeatable). Defaults to /var/log and /etc.
    #[arg(long = "audit-path", value_name = "DIR")]
    audit_paths: Vec<PathBuf>,

    /// Path whose filesystem is reported (repeatable). Defaults to /, /home and /var.
    #[arg(long = "mount-point", value_name = "PATH")]
    mount_points: Vec<PathBuf>,

    /// Collect system users.
    #[arg(long = "collector.users", default_value_t = true, action = ArgAction::Set)]
    collector_users: bool,

    /// Collect running processes.
    #[arg(long = "collector.processes", default_value_t = true, action = ArgAction::Set)]
    collector_processes: bool,

    /// Collect network interfaces.
    #[arg(long = "collector.network", default_value_t = true, action = ArgAction::Set)]
    collector_network: bool,

    /// Collect filesystem usage.
    #[arg(long = "collector.filesystem", default_value_t = true, action = ArgAction::Set)]
    collector_filesystem: bool,

    /// Collect crontab entries.
    #[arg(long = "collector.scheduled_jobs", default_value_t = true, action = ArgAction::Set)]
    collector_scheduled_jobs: bool,

    /// Collect audited file metadata.
    #[arg(long = "collector.auditing", default_value_t = false, action = ArgAction::Set)]
    collector_auditing: bool,

    /// Collect OS name and version.
    #[arg(long = "collector.os_info", default_value_t = true, action = ArgAction::Set)]
    collector_os_info: bool,

    /// Collect installed package versions.
    #[arg(long = "collector.package_versions", default_value_t = true, action = ArgAction::Set)]
    collector_package_versions: bool,

    /// Collect package update availability.
    #[arg(long = "collector.package_updates", default_value_t = true, action = ArgAction::Set)]
    collector_package_updates: bool,

    /// Increase verbosity (-v debug, -vv trace).
    #[arg(short, long, action = ArgAction::Count)]
    verbose: u8,

    /// Shorthand for -v.
    #[arg(long)]
    debug: bool,

    /// Only log errors.
    #[arg(short, long, conflicts_with_all = ["verbose", "debug"])]
    quiet: bool,
}

impl Args {
    fn collector_toggles(&self) -> [(&'static str, bool); 9] {
        [
            ("users", self.collector_users),
            ("processes", self.collector_processes),
            ("network", self.collector_network),
            ("filesystem", self.collector_filesystem),
            ("scheduled_jobs", self.collector_scheduled_jobs),
            ("auditing", self.collector_auditing),
            ("os_info", self.collector_os_info),
            ("package_versions", self.collector_package_versions),
            ("package_updates", self.collector_package_updates),
        ]
    }

    fn into_config(self) -> Result<ExporterConfig, ConfigError> {
        let mut builder = ExporterConfig::builder()
            .listen(self.address.clone(), self.port)
            .interval(self.interval)
            .timeout(self.timeout)
            .proc_path(self.proc_path.clone())
            .limits(ResourceLimits {
                cpu_millicores: self.resource_cpu,
                memory_mb: self.resource_memory,
            });
        for (name, enabled) in self.collector_toggles() {
            builder = builder.collector(name, enabled);
        }
        builder
            .mount_points(self.mount_points)
            .audit_paths(self.audit_paths)
            .build()
    }
}

/// Parses `90`, `90s`, `30m` or `1h30m`. Bare numbers are seconds.
fn parse_duration_arg(s: &str) -> Result<Duration, String> {
    let s = s.trim();
    if s.is_empty() {
        return Err("duration string is empty".to_string());
    }
    if let Ok(secs) = s.parse::<u64>() {
        return Ok(Duration::from_secs(secs));
    }
    humantime::parse_duration(s).map_err(|e| e.to_string())
}

/// Initializes the tracing subscriber with the appropriate log level.
/// Default level is INFO. Use -q for quiet mode (errors only).
fn init_logging(verbose: u8, quiet: bool) {
    let level = if quiet {
        Level::ERROR
    } else {
        match verbose {
            0 => Level::INFO,
            1 => Level::DEBUG,
            _ => Level::TRACE,
        }
    };

    let mut filter = EnvFilter::from_default_env();
    for target in ["osinfo_exporter", "osinfo_core"] {
        if let Ok(directive) = format!("{}={}", target, level).parse() {
            filter = filter.add_directive(directive);
        }
    }

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();
}

// ============================================================
// Main
// ============================================================

fn main() {
    let args = Args::parse();
    let verbose = if args.debug {
        args.verbose.max(1)
    } else {
        args.verbose
    };
    init_logging(verbose, args.quiet);

    let config = match args.into_config() {
        Ok(config) => config,
        Err(e) => {
            error!(error = %e, "invalid configuration");
            process::exit(EXIT_STARTUP);
        }
    };

    let mut runtime = tokio::runtime::Builder::new_multi_thread();
    runtime.enable_all();
    if let Some(threads) = config.limits.worker_threads() {
        runtime.worker_threads(threads).max_blocking_threads(threads);
    }
    let runtime = match runtime.build() {
        Ok(runtime) => runtime,
        Err(e) => {
            error!(error = %e, "failed to build tokio runtime");
            process::exit(EXIT_STARTUP);
        }
    };

    run_then_shutdown(runtime, async_main(config), SHUTDOWN_GRACE);
}

/// Drives `future` to completion, then gives blocking work at most `grace`
/// before the runtime is torn down. A hung probe run cannot hold up exit.
fn run_then_shutdown<F: Future>(
    runtime: tokio::runtime::Runtime,
    future: F,
    grace: Duration,
) -> F::Output {
    let output = runtime.block_on(future);
    runtime.shutdown_timeout(grace);
    output
}

async fn async_main(config: ExporterConfig) {
    let fs = RealFs::new();
    let platform = Platform::detect(&fs);
    info!(
        version = osinfo_core::VERSION,
        %platform,
        listen = %config.listen,
        interval = %format_duration(config.interval.as_secs()),
        timeout = %format_duration(config.timeout.as_secs()),
        collectors = ?config.probes.enabled,
        "starting"
    );

    let probes = build_probes(&config.probes, &platform, fs);
    let scheduler = match Scheduler::new(probes, config.interval, config.timeout) {
        Ok(scheduler) => Arc::new(scheduler),
        Err(e) => {
            error!(error = %e, "failed to register metric families");
            process::exit(EXIT_STARTUP);
        }
    };

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let collectors = scheduler.spawn(shutdown_rx.clone());

    if let Some(limit) = config.limits.memory_bytes() {
        spawn_memory_governor(limit, shutdown_rx.clone());
    }
    if let Some(threads) = config.limits.worker_threads() {
        info!(
            cpu_millicores = config.limits.cpu_millicores,
            threads, "CPU ceiling applied"
        );
    }

    let app = handlers::router(AppState {
        scheduler: scheduler.clone(),
        platform: Arc::new(platform),
    });

    let listener = match tokio::net::TcpListener::bind(config.listen).await {
        Ok(listener) => listener,
        Err(e) => {
            error!(addr = %config.listen, error = %e, "failed to bind");
            process::exit(EXIT_STARTUP);
        }
    };
    info!(addr = %config.listen, "listening");

    let served = axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await;

    let _ = shutdown_tx.send(true);
    for handle in collectors {
        let _ = handle.await;
    }
    let busy = scheduler.in_flight();
    if !busy.is_empty() {
        warn!(
            collectors = ?busy,
            grace_secs = SHUTDOWN_GRACE.as_secs(),
            "abandoning probe runs still in flight"
        );
    }

    if let Err(e) = served {
        error!(error = %e, "server error");
        process::exit(EXIT_STARTUP);
    }
    info!("shutdown complete");
}

fn spawn_memory_governor(limit: u64, shutdown: watch::Receiver<bool>) {
    if JemallocStats.allocated_bytes().is_none() {
        warn!("allocator statistics unavailable, memory ceiling not enforced");
        return;
    }
    info!(limit = %format_bytes(limit, FmtStyle::Compact), "memory ceiling applied");

    let governor = MemoryGovernor::new(JemallocStats, limit);
    tokio::spawn(async move {
        if let Err(e) = governor.run(shutdown).await {
            error!(error = %e, "memory ceiling exceeded, terminating");
            process::exit(EXIT_RESOURCE_CEILING);
        }
    });
}

/// Resolves on Ctrl-C or SIGTERM.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!(error = %e, "cannot listen for Ctrl-C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{SignalKind, signal};
        match signal(SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                warn!(error = %e, "cannot listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }
    info!("shutdown signal received");
}

#[cfg(test)]
mod tests {
    use super::*;
    use osinfo_core::probe::{Cadence, Probe, ProbeError, ProbeKind};
    use osinfo_core::reconcile::Snapshot;
    use osinfo_core::registry::FamilyDesc;
    use std::time::Instant;

    #[test]
    fn test_args_defaults() {
        let args = Args::parse_from(["osinfo-exporter"]);
        let config = args.into_config().unwrap();
        assert_eq!(config, ExporterConfig::default());
    }

    #[test]
    fn test_args_collector_flags() {
        let args = Args::parse_from([
            "osinfo-exporter",
            "--collector.auditing=true",
            "--collector.processes=false",
            "--audit-path",
            "/srv/logs",
            "--resource.cpu",
            "1500",
            "--resource.memory",
            "256",
        ]);
        let config = args.into_config().unwrap();
        assert!(config.probes.enabled.contains(&ProbeKind::Auditing));
        assert!(!config.probes.enabled.contains(&ProbeKind::Processes));
        assert_eq!(config.probes.audit_paths, vec![PathBuf::from("/srv/logs")]);
        assert_eq!(config.limits.worker_threads(), Some(2));
        assert_eq!(config.limits.memory_bytes(), Some(256 * 1024 * 1024));
    }

    #[test]
    fn test_args_invalid_interval() {
        let args = Args::parse_from(["osinfo-exporter", "--interval", "0"]);
        assert!(matches!(
            args.into_config(),
            Err(ConfigError::InvalidInterval(_))
        ));
    }

    #[test]
    fn test_args_interval_units() {
        let args = Args::parse_from(["osinfo-exporter", "--interval", "30", "--timeout", "5s"]);
        assert_eq!(args.interval, Duration::from_secs(30));
        assert_eq!(args.timeout, Duration::from_secs(5));

        let args = Args::parse_from(["osinfo-exporter", "--interval", "30m"]);
        assert_eq!(args.interval, Duration::from_secs(1800));

        assert!(Args::try_parse_from(["osinfo-exporter", "--interval", "soon"]).is_err());
    }

    #[test]
    fn test_shutdown_does_not_wait_for_hung_collector() {
        struct HungProbe;

        impl Probe for HungProbe {
            fn desc(&self) -> FamilyDesc {
                FamilyDesc::new("hung", "Never returns in time", &["item"])
            }

            fn cadence(&self) -> Cadence {
                Cadence::Default
            }

            fn collect(&self, _snapshot: &mut Snapshot) -> Result<(), ProbeError> {
                std::thread::sleep(Duration::from_secs(3));
                Ok(())
            }
        }

        let runtime = tokio::runtime::Builder::new_multi_thread()
            .worker_threads(1)
            .enable_all()
            .build()
            .unwrap();
        let started = Instant::now();

        let abandoned = run_then_shutdown(
            runtime,
            async {
                let scheduler = Scheduler::new(
                    vec![Arc::new(HungProbe)],
                    Duration::from_secs(60),
                    Duration::from_millis(50),
                )
                .unwrap();
                let (tx, rx) = watch::channel(false);
                let handles = scheduler.spawn(rx);
                tokio::time::sleep(Duration::from_millis(200)).await;
                tx.send(true).unwrap();
                for handle in handles {
                    handle.await.unwrap();
                }
                scheduler
                    .in_flight()
                    .into_iter()
                    .map(str::to_string)
                    .collect::<Vec<_>>()
            },
            Duration::from_millis(100),
        );

        assert_eq!(abandoned, vec!["hung".to_string()]);
        assert!(started.elapsed() < Duration::from_secs(2));
    }

    #[test]
    fn test_args_quiet_conflicts_with_verbose() {
        assert!(Args::try_parse_from(["osinfo-exporter", "-q", "-v"]).is_err());
    }
}
