//! OS-state probes.
//!
//! A probe reads the current state of one aspect of the host and reports it
//! as label tuples for exactly one metric family. Probes hold no state
//! between runs and never touch the registry: the scheduler hands each run
//! an empty [`Snapshot`] and reconciles it only if the run succeeds.
//!
//! Platform differences are resolved once, when the probe set is built by
//! [`build_probes`] from a detected [`Platform`]; individual probes do not
//! branch on the operating system at collection time.

pub mod auditing;
pub mod filesystem;
pub mod network;
pub mod os_info;
pub mod packages;
pub mod parser;
pub mod platform;
pub mod processes;
pub mod scheduled_jobs;
pub mod updates;
pub mod users;

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use crate::collector::traits::FileSystem;
use crate::config::ProbeSettings;
use crate::reconcile::Snapshot;
use crate::registry::{FamilyDesc, RegistryError};

pub use platform::Platform;

/// Cadence used by probes whose source changes quickly.
pub const FAST_INTERVAL: Duration = Duration::from_secs(300);

/// Error type for a failed collection cycle.
#[derive(Debug)]
pub enum ProbeError {
    /// I/O error reading a source path.
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
    /// Source content could not be parsed.
    Parse(String),
    /// External command could not be run or exited unsuccessfully.
    Command { program: String, message: String },
    /// No supported source exists on this host.
    Unsupported(String),
    /// The probe panicked.
    Panicked(String),
    /// The run was abandoned at its deadline and stopped early.
    Cancelled,
    /// The snapshot does not fit the family's label schema.
    Schema(RegistryError),
}

impl ProbeError {
    pub fn io(path: impl AsRef<Path>, source: std::io::Error) -> Self {
        ProbeError::Io {
            path: path.as_ref().to_path_buf(),
            source,
        }
    }
}

impl std::fmt::Display for ProbeError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ProbeError::Io { path, source } => write!(f, "I/O error on {}: {}", path.display(), source),
            ProbeError::Parse(msg) => write!(f, "parse error: {}", msg),
            ProbeError::Command { program, message } => {
                write!(f, "command '{}' failed: {}", program, message)
            }
            ProbeError::Unsupported(msg) => write!(f, "unsupported: {}", msg),
            ProbeError::Panicked(msg) => write!(f, "probe panicked: {}", msg),
            ProbeError::Cancelled => write!(f, "run cancelled"),
            ProbeError::Schema(e) => write!(f, "schema mismatch: {}", e),
        }
    }
}

impl std::error::Error for ProbeError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            ProbeError::Io { source, .. } => Some(source),
            ProbeError::Schema(e) => Some(e),
            _ => None,
        }
    }
}

impl From<RegistryError> for ProbeError {
    fn from(e: RegistryError) -> Self {
        ProbeError::Schema(e)
    }
}

/// Cancellation signal shared between the scheduler and one blocking run.
///
/// Setting it never interrupts a blocking call; probes poll it between units
/// of work and bail out with [`ProbeError::Cancelled`].
#[derive(Debug, Clone, Default)]
pub struct CancelFlag(Arc<AtomicBool>);

impl CancelFlag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::Release);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::Acquire)
    }

    /// `Err(Cancelled)` once the flag is set.
    pub fn check(&self) -> Result<(), ProbeError> {
        if self.is_cancelled() {
            Err(ProbeError::Cancelled)
        } else {
            Ok(())
        }
    }
}

/// Runs an external command found on `PATH` and returns its stdout.
pub(crate) fn run_command(program: &str, args: &[&str]) -> Result<String, ProbeError> {
    let path = which::which(program).map_err(|e| ProbeError::Command {
        program: program.to_string(),
        message: e.to_string(),
    })?;
    let output = std::process::Command::new(path)
        .args(args)
        .output()
        .map_err(|e| ProbeError::Command {
            program: program.to_string(),
            message: e.to_string(),
        })?;
    if !output.status.success() {
        return Err(ProbeError::Command {
            program: program.to_string(),
            message: format!(
                "{}: {}",
                output.status,
                String::from_utf8_lossy(&output.stderr).trim()
            ),
        });
    }
    Ok(String::from_utf8_lossy(&output.stdout).into_owned())
}

/// Lists the numeric (PID) entries of a procfs directory.
pub(crate) fn list_pids<F: FileSystem>(fs: &F, proc_path: &Path) -> Result<Vec<u32>, ProbeError> {
    let entries = fs
        .read_dir(proc_path)
        .map_err(|e| ProbeError::io(proc_path, e))?;
    let mut pids: Vec<u32> = entries
        .iter()
        .filter_map(|p| p.file_name()?.to_str()?.parse().ok())
        .collect();
    pids.sort_unstable();
    Ok(pids)
}

/// How often a probe wants to run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Cadence {
    /// Every [`FAST_INTERVAL`], or the default interval if that is shorter.
    Fast,
    /// The configured default interval.
    Default,
}

impl Cadence {
    pub fn resolve(self, default_interval: Duration) -> Duration {
        match self {
            Cadence::Fast => FAST_INTERVAL.min(default_interval),
            Cadence::Default => default_interval,
        }
    }
}

/// A unit of OS-state collection for one metric family.
pub trait Probe: Send + Sync + 'static {
    /// Family name, help text and label schema.
    fn desc(&self) -> FamilyDesc;

    /// Suggested cadence.
    fn cadence(&self) -> Cadence;

    /// Fills `snapshot` with the current observation.
    ///
    /// On error the snapshot is discarded, so a probe may bail out halfway.
    fn collect(&self, snapshot: &mut Snapshot) -> Result<(), ProbeError>;

    /// Like [`Probe::collect`], but stops early once `cancel` is set.
    ///
    /// Probes that walk many entries override this; the rest ignore the flag.
    fn collect_until(&self, snapshot: &mut Snapshot, cancel: &CancelFlag) -> Result<(), ProbeError> {
        cancel.check()?;
        self.collect(snapshot)
    }
}

/// The probes this exporter knows about.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ProbeKind {
    Users,
    Processes,
    Network,
    Filesystem,
    ScheduledJobs,
    Auditing,
    OsInfo,
    PackageVersions,
    PackageUpdates,
}

impl ProbeKind {
    pub const ALL: [ProbeKind; 9] = [
        ProbeKind::Users,
        ProbeKind::Processes,
        ProbeKind::Network,
        ProbeKind::Filesystem,
        ProbeKind::ScheduledJobs,
        ProbeKind::Auditing,
        ProbeKind::OsInfo,
        ProbeKind::PackageVersions,
        ProbeKind::PackageUpdates,
    ];

    /// Short name used on the command line.
    pub fn name(self) -> &'static str {
        match self {
            ProbeKind::Users => "users",
            ProbeKind::Processes => "processes",
            ProbeKind::Network => "network",
            ProbeKind::Filesystem => "filesystem",
            ProbeKind::ScheduledJobs => "scheduled_jobs",
            ProbeKind::Auditing => "auditing",
            ProbeKind::OsInfo => "os_info",
            ProbeKind::PackageVersions => "package_versions",
            ProbeKind::PackageUpdates => "package_updates",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|k| k.name() == name)
    }

    /// Walking audited directories is expensive and high-cardinality, so
    /// it is opt-in.
    pub fn enabled_by_default(self) -> bool {
        !matches!(self, ProbeKind::Auditing)
    }
}

impl std::fmt::Display for ProbeKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// Builds the enabled probes for `platform`.
///
/// Every variant choice (procfs vs. sysinfo, dpkg vs. dnf vs. Homebrew, ...)
/// happens here, once.
pub fn build_probes<F>(settings: &ProbeSettings, platform: &Platform, fs: F) -> Vec<Arc<dyn Probe>>
where
    F: FileSystem + Clone + 'static,
{
    let proc_path = settings.proc_path.clone();
    let mut probes: Vec<Arc<dyn Probe>> = Vec::new();

    for kind in ProbeKind::ALL {
        if !settings.enabled.contains(&kind) {
            continue;
        }
        let probe: Arc<dyn Probe> = match kind {
            ProbeKind::Users => Arc::new(users::UserProbe::new(fs.clone(), &proc_path)),
            ProbeKind::Processes => processes::for_platform(platform, fs.clone(), &proc_path),
            ProbeKind::Network => network::for_platform(platform, fs.clone()),
            ProbeKind::Filesystem => Arc::new(filesystem::FilesystemProbe::new(
                filesystem::SysinfoDisks,
                settings.mount_points.clone(),
            )),
            ProbeKind::ScheduledJobs => {
                Arc::new(scheduled_jobs::ScheduledJobsProbe::new(fs.clone()))
            }
            ProbeKind::Auditing => Arc::new(auditing::AuditProbe::new(
                fs.clone(),
                settings.audit_paths.clone(),
            )),
            ProbeKind::OsInfo => os_info::for_platform(platform, fs.clone()),
            ProbeKind::PackageVersions => Arc::new(packages::PackageProbe::new(
                packages::PackageSource::detect(platform, &fs),
                fs.clone(),
            )),
            ProbeKind::PackageUpdates => Arc::new(updates::UpdateProbe::new(
                updates::UpdateSource::detect(platform, &fs),
                fs.clone(),
            )),
        };
        probes.push(probe);
    }

    probes
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collector::MockFs;
    use std::collections::BTreeSet;

    #[test]
    fn test_cadence_resolve() {
        let default = Duration::from_secs(1800);
        assert_eq!(Cadence::Fast.resolve(default), FAST_INTERVAL);
        assert_eq!(Cadence::Default.resolve(default), default);
        assert_eq!(
            Cadence::Fast.resolve(Duration::from_secs(60)),
            Duration::from_secs(60)
        );
    }

    #[test]
    fn test_probe_kind_names_roundtrip() {
        for kind in ProbeKind::ALL {
            assert_eq!(ProbeKind::from_name(kind.name()), Some(kind));
        }
        assert_eq!(ProbeKind::from_name("gpu"), None);
    }

    #[test]
    fn test_build_probes_respects_enabled_set() {
        let fs = MockFs::debian_host();
        let platform = Platform::detect_for("linux", &fs);
        let settings = ProbeSettings {
            enabled: BTreeSet::from([ProbeKind::Users, ProbeKind::PackageVersions]),
            ..ProbeSettings::default()
        };

        let probes = build_probes(&settings, &platform, fs);
        let names: Vec<String> = probes.iter().map(|p| p.desc().name().to_string()).collect();
        assert_eq!(names, vec!["system_user_info", "system_package_version"]);
    }

    #[test]
    fn test_default_probe_families_are_unique() {
        let fs = MockFs::debian_host();
        let platform = Platform::detect_for("linux", &fs);
        let settings = ProbeSettings {
            enabled: ProbeKind::ALL.into_iter().collect(),
            ..ProbeSettings::default()
        };

        let probes = build_probes(&settings, &platform, fs);
        let names: BTreeSet<String> = probes.iter().map(|p| p.desc().name().to_string()).collect();
        assert_eq!(names.len(), ProbeKind::ALL.len());
    }

    #[test]
    fn test_list_pids_skips_non_numeric() {
        let fs = MockFs::debian_host();
        let pids = list_pids(&fs, Path::new("/proc")).unwrap();
        assert_eq!(pids, vec![1, 42, 1200]);
        assert!(list_pids(&MockFs::new(), Path::new("/proc")).is_err());
    }

    #[test]
    fn test_run_command_missing_program() {
        let err = run_command("osinfo-no-such-program", &[]).unwrap_err();
        assert!(matches!(err, ProbeError::Command { .. }));
    }

    #[test]
    fn test_probe_error_display() {
        let err = ProbeError::io(
            "/etc/crontab",
            std::io::Error::new(std::io::ErrorKind::PermissionDenied, "denied"),
        );
        assert_eq!(err.to_string(), "I/O error on /etc/crontab: denied");
        assert!(std::error::Error::source(&err).is_some());
    }

    #[test]
    fn test_cancel_flag_shared_between_clones() {
        let flag = CancelFlag::new();
        let run = flag.clone();
        assert!(run.check().is_ok());

        flag.cancel();
        assert!(run.is_cancelled());
        assert!(matches!(run.check(), Err(ProbeError::Cancelled)));
    }
}
