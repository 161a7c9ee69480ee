//! Validated runtime configuration.
//!
//! The binary parses command-line flags and hands the raw values to
//! [`ExporterConfig::builder`]; everything past that point works with
//! checked values only.

use std::collections::BTreeSet;
use std::net::{IpAddr, SocketAddr};
use std::path::PathBuf;
use std::time::Duration;

use crate::governor::ResourceLimits;
use crate::probe::ProbeKind;

pub const DEFAULT_ADDRESS: &str = "0.0.0.0";
pub const DEFAULT_PORT: u16 = 9101;
pub const DEFAULT_INTERVAL: Duration = Duration::from_secs(1800);
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(60);
pub const MIN_INTERVAL: Duration = Duration::from_secs(1);

pub const DEFAULT_PROC_PATH: &str = "/proc";
pub const DEFAULT_MOUNT_POINTS: [&str; 3] = ["/", "/home", "/var"];
pub const DEFAULT_AUDIT_PATHS: [&str; 2] = ["/var/log", "/etc"];

/// Error type for invalid configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    /// Listen address is not an IP address.
    InvalidAddress(String),
    /// Interval below [`MIN_INTERVAL`].
    InvalidInterval(Duration),
    /// Zero probe timeout.
    InvalidTimeout,
    /// Collector name does not match any probe.
    UnknownCollector(String),
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::InvalidAddress(addr) => write!(f, "invalid listen address '{}'", addr),
            ConfigError::InvalidInterval(d) => write!(
                f,
                "interval {}s is below the minimum of {}s",
                d.as_secs(),
                MIN_INTERVAL.as_secs()
            ),
            ConfigError::InvalidTimeout => write!(f, "timeout must be at least 1s"),
            ConfigError::UnknownCollector(name) => write!(f, "unknown collector '{}'", name),
        }
    }
}

impl std::error::Error for ConfigError {}

/// Which probes run and where they look.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProbeSettings {
    pub enabled: BTreeSet<ProbeKind>,
    pub proc_path: PathBuf,
    pub mount_points: Vec<PathBuf>,
    pub audit_paths: Vec<PathBuf>,
}

impl Default for ProbeSettings {
    fn default() -> Self {
        Self {
            enabled: ProbeKind::ALL
                .into_iter()
                .filter(|k| k.enabled_by_default())
                .collect(),
            proc_path: PathBuf::from(DEFAULT_PROC_PATH),
            mount_points: DEFAULT_MOUNT_POINTS.into_iter().map(PathBuf::from).collect(),
            audit_paths: DEFAULT_AUDIT_PATHS.into_iter().map(PathBuf::from).collect(),
        }
    }
}

impl ProbeSettings {
    pub fn set_enabled(&mut self, kind: ProbeKind, enabled: bool) {
        if enabled {
            self.enabled.insert(kind);
        } else {
            self.enabled.remove(&kind);
        }
    }

    /// Toggles a probe by its command-line name.
    pub fn set_enabled_by_name(&mut self, name: &str, enabled: bool) -> Result<(), ConfigError> {
        let kind =
            ProbeKind::from_name(name).ok_or_else(|| ConfigError::UnknownCollector(name.to_string()))?;
        self.set_enabled(kind, enabled);
        Ok(())
    }
}

/// Complete, validated exporter configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExporterConfig {
    pub listen: SocketAddr,
    /// Default collection interval; fast probes may run more often.
    pub interval: Duration,
    /// Per-run probe deadline, capped at each probe's interval.
    pub timeout: Duration,
    pub probes: ProbeSettings,
    pub limits: ResourceLimits,
}

impl Default for ExporterConfig {
    fn default() -> Self {
        Self {
            listen: SocketAddr::new(IpAddr::from([0, 0, 0, 0]), DEFAULT_PORT),
            interval: DEFAULT_INTERVAL,
            timeout: DEFAULT_TIMEOUT,
            probes: ProbeSettings::default(),
            limits: ResourceLimits::default(),
        }
    }
}

impl ExporterConfig {
    pub fn builder() -> ExporterConfigBuilder {
        ExporterConfigBuilder::default()
    }
}

/// Collects raw option values and validates them in [`build`](Self::build).
#[derive(Debug, Clone)]
pub struct ExporterConfigBuilder {
    address: String,
    port: u16,
    interval: Duration,
    timeout: Duration,
    probes: ProbeSettings,
    toggles: Vec<(String, bool)>,
    limits: ResourceLimits,
}

impl Default for ExporterConfigBuilder {
    fn default() -> Self {
        Self {
            address: DEFAULT_ADDRESS.to_string(),
            port: DEFAULT_PORT,
            interval: DEFAULT_INTERVAL,
            timeout: DEFAULT_TIMEOUT,
            probes: ProbeSettings::default(),
            toggles: Vec::new(),
            limits: ResourceLimits::default(),
        }
    }
}

impl ExporterConfigBuilder {
    pub fn listen(mut self, address: impl Into<String>, port: u16) -> Self {
        self.address = address.into();
        self.port = port;
        self
    }

    pub fn interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn collector(mut self, name: impl Into<String>, enabled: bool) -> Self {
        self.toggles.push((name.into(), enabled));
        self
    }

    pub fn proc_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.probes.proc_path = path.into();
        self
    }

    /// Replaces the default mount points when `paths` is non-empty.
    pub fn mount_points(mut self, paths: Vec<PathBuf>) -> Self {
        if !paths.is_empty() {
            self.probes.mount_points = paths;
        }
        self
    }

    /// Replaces the default audited directories when `paths` is non-empty.
    pub fn audit_paths(mut self, paths: Vec<PathBuf>) -> Self {
        if !paths.is_empty() {
            self.probes.audit_paths = paths;
        }
        self
    }

    pub fn limits(mut self, limits: ResourceLimits) -> Self {
        self.limits = limits;
        self
    }

    pub fn build(self) -> Result<ExporterConfig, ConfigError> {
        let ip: IpAddr = self
            .address
            .parse()
            .map_err(|_| ConfigError::InvalidAddress(self.address.clone()))?;
        if self.interval < MIN_INTERVAL {
            return Err(ConfigError::InvalidInterval(self.interval));
        }
        if self.timeout.is_zero() {
            return Err(ConfigError::InvalidTimeout);
        }

        let mut probes = self.probes;
        for (name, enabled) in &self.toggles {
            probes.set_enabled_by_name(name, *enabled)?;
        }

        Ok(ExporterConfig {
            listen: SocketAddr::new(ip, self.port),
            interval: self.interval,
            timeout: self.timeout,
            probes,
            limits: self.limits,
        })
    }
}
