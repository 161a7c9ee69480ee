//! `system_process_info`: one series per running process.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use sysinfo::{ProcessRefreshKind, ProcessesToUpdate, System, UpdateKind, Users};
use tracing::debug;

use crate::collector::traits::FileSystem;
use crate::probe::parser::{UserResolver, parse_proc_status};
use crate::probe::{Cadence, CancelFlag, Platform, Probe, ProbeError, list_pids};
use crate::reconcile::Snapshot;
use crate::registry::{FamilyDesc, LabelTuple};

fn process_desc() -> FamilyDesc {
    FamilyDesc::new(
        "system_process_info",
        "Information about running processes",
        &["pid", "name", "user"],
    )
}

/// Picks the procfs reader on Linux and `sysinfo` elsewhere.
pub fn for_platform<F>(platform: &Platform, fs: F, proc_path: &Path) -> Arc<dyn Probe>
where
    F: FileSystem + 'static,
{
    if platform.is_linux() {
        Arc::new(ProcfsProcessProbe::new(fs, proc_path))
    } else {
        Arc::new(SysinfoProcessProbe)
    }
}

/// Reads `/proc/[pid]/status` for every PID.
pub struct ProcfsProcessProbe<F> {
    fs: F,
    proc_path: PathBuf,
}

impl<F: FileSystem> ProcfsProcessProbe<F> {
    pub fn new(fs: F, proc_path: &Path) -> Self {
        Self {
            fs,
            proc_path: proc_path.to_path_buf(),
        }
    }

    fn load_users(&self) -> UserResolver {
        match self.fs.read_to_string(Path::new("/etc/passwd")) {
            Ok(content) => UserResolver::from_passwd(&content),
            Err(e) => {
                debug!(error = %e, "cannot read /etc/passwd, reporting numeric UIDs");
                UserResolver::new()
            }
        }
    }
}

impl<F: FileSystem + 'static> Probe for ProcfsProcessProbe<F> {
    fn desc(&self) -> FamilyDesc {
        process_desc()
    }

    fn cadence(&self) -> Cadence {
        Cadence::Fast
    }

    fn collect(&self, snapshot: &mut Snapshot) -> Result<(), ProbeError> {
        self.collect_until(snapshot, &CancelFlag::new())
    }

    fn collect_until(&self, snapshot: &mut Snapshot, cancel: &CancelFlag) -> Result<(), ProbeError> {
        let users = self.load_users();
        for pid in list_pids(&self.fs, &self.proc_path)? {
            cancel.check()?;
            let path = self.proc_path.join(pid.to_string()).join("status");
            // Process may have exited since the directory listing
            let Ok(content) = self.fs.read_to_string(&path) else {
                continue;
            };
            let status = match parse_proc_status(&content) {
                Ok(status) => status,
                Err(e) => {
                    debug!(pid, error = %e, "skipping unparsable status");
                    continue;
                }
            };
            let pid = pid.to_string();
            let user = users.resolve(status.uid);
            snapshot.insert(LabelTuple::new([pid, status.name, user]));
        }
        Ok(())
    }
}

/// Process table via `sysinfo`, for hosts without procfs.
#[derive(Debug, Default, Clone, Copy)]
pub struct SysinfoProcessProbe;

impl Probe for SysinfoProcessProbe {
    fn desc(&self) -> FamilyDesc {
        process_desc()
    }

    fn cadence(&self) -> Cadence {
        Cadence::Fast
    }

    fn collect(&self, snapshot: &mut Snapshot) -> Result<(), ProbeError> {
        let mut system = System::new();
        system.refresh_processes_specifics(
            ProcessesToUpdate::All,
            true,
            ProcessRefreshKind::nothing().with_user(UpdateKind::Always),
        );
        let users = Users::new_with_refreshed_list();

        for (pid, process) in system.processes() {
            let name = process.name().to_string_lossy().into_owned();
            let user = process
                .user_id()
                .and_then(|uid| users.get_user_by_id(uid))
                .map(|u| u.name().to_string())
                .unwrap_or_else(|| "unknown".to_string());
            snapshot.insert(LabelTuple::new([pid.as_u32().to_string(), name, user]));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collector::MockFs;

    fn collect(fs: MockFs) -> Result<Snapshot, ProbeError> {
        let probe = ProcfsProcessProbe::new(fs, Path::new("/proc"));
        let mut snapshot = Snapshot::new(1);
        probe.collect(&mut snapshot).map(|_| snapshot)
    }

    #[test]
    fn test_procfs_processes() {
        let snapshot = collect(MockFs::debian_host()).unwrap();
        let tuples: Vec<&LabelTuple> = snapshot.samples().keys().collect();
        assert_eq!(
            tuples,
            vec![
                &LabelTuple::from(["1", "systemd", "root"]),
                &LabelTuple::from(["1200", "bash", "alice"]),
                &LabelTuple::from(["42", "sshd", "root"]),
            ]
        );
    }

    #[test]
    fn test_unknown_uid_reported_numerically() {
        let mut fs = MockFs::debian_host();
        fs.add_process(5000, "worker", 4242);
        let snapshot = collect(fs).unwrap();
        assert!(
            snapshot
                .samples()
                .contains_key(&LabelTuple::from(["5000", "worker", "4242"]))
        );
    }

    #[test]
    fn test_vanished_and_malformed_processes_skipped() {
        let mut fs = MockFs::debian_host();
        fs.add_dir("/proc/777");
        fs.add_file("/proc/778/status", "garbage\n");
        let snapshot = collect(fs).unwrap();
        assert_eq!(snapshot.len(), 3);
    }

    #[test]
    fn test_missing_procfs_fails() {
        assert!(collect(MockFs::new()).is_err());
    }

    #[test]
    fn test_for_platform_picks_variant() {
        let fs = MockFs::new();
        let probe = for_platform(&Platform::MacOs, fs, Path::new("/proc"));
        assert_eq!(probe.desc().name(), "system_process_info");
    }

    #[test]
    fn test_sysinfo_sees_current_process() {
        let mut snapshot = Snapshot::new(1);
        SysinfoProcessProbe.collect(&mut snapshot).unwrap();
        let me = std::process::id().to_string();
        assert!(snapshot.samples().keys().any(|t| t.values()[0] == me));
    }
}
