//! `system_user_info`: login-capable accounts and whether they are active.

use std::collections::HashSet;
use std::path::{Path, PathBuf};

use tracing::debug;

use crate::collector::traits::FileSystem;
use crate::probe::parser::{PasswdEntry, parse_passwd, parse_proc_status};
use crate::probe::{Cadence, Probe, ProbeError, list_pids, run_command};
use crate::reconcile::Snapshot;
use crate::registry::{FamilyDesc, LabelTuple};

const PASSWD_PATH: &str = "/etc/passwd";
const MIN_REGULAR_UID: u32 = 1000;
const LOGIN_SHELLS: [&str; 2] = ["/bin/bash", "/bin/sh"];

/// Source of logged-in usernames, consulted for users that own no process.
pub trait LoginSessions: Send + Sync + 'static {
    fn logged_in(&self) -> Result<HashSet<String>, ProbeError>;
}

/// Reads sessions from `w -h`.
#[derive(Debug, Default, Clone, Copy)]
pub struct WCommand;

impl LoginSessions for WCommand {
    fn logged_in(&self) -> Result<HashSet<String>, ProbeError> {
        run_command("w", &["-h"]).map(|out| parse_w_output(&out))
    }
}

/// Extracts the username column of `w -h` output.
pub fn parse_w_output(output: &str) -> HashSet<String> {
    output
        .lines()
        .filter_map(|line| line.split_whitespace().next())
        .map(str::to_string)
        .collect()
}

/// Reports users with UID >= 1000 and a `/bin/bash` or `/bin/sh` shell.
pub struct UserProbe<F, S = WCommand> {
    fs: F,
    proc_path: PathBuf,
    sessions: S,
}

impl<F: FileSystem> UserProbe<F, WCommand> {
    pub fn new(fs: F, proc_path: &Path) -> Self {
        Self {
            fs,
            proc_path: proc_path.to_path_buf(),
            sessions: WCommand,
        }
    }
}

impl<F: FileSystem, S: LoginSessions> UserProbe<F, S> {
    pub fn with_sessions<T: LoginSessions>(self, sessions: T) -> UserProbe<F, T> {
        UserProbe {
            fs: self.fs,
            proc_path: self.proc_path,
            sessions,
        }
    }

    /// Real UIDs owning at least one process. Processes that exit during
    /// the scan are skipped.
    fn process_owners(&self) -> HashSet<u32> {
        let pids = match list_pids(&self.fs, &self.proc_path) {
            Ok(pids) => pids,
            Err(e) => {
                debug!(error = %e, "process scan unavailable");
                return HashSet::new();
            }
        };
        pids.into_iter()
            .filter_map(|pid| {
                let path = self.proc_path.join(pid.to_string()).join("status");
                let content = self.fs.read_to_string(&path).ok()?;
                parse_proc_status(&content).ok().map(|s| s.uid)
            })
            .collect()
    }
}

fn is_regular_user(entry: &PasswdEntry) -> bool {
    entry.uid >= MIN_REGULAR_UID && LOGIN_SHELLS.contains(&entry.shell.as_str())
}

impl<F: FileSystem + 'static, S: LoginSessions> Probe for UserProbe<F, S> {
    fn desc(&self) -> FamilyDesc {
        FamilyDesc::new(
            "system_user_info",
            "Information about system users, including username, home directory, UID, GID, and active status",
            &["username", "home_directory", "uid", "gid", "active"],
        )
    }

    fn cadence(&self) -> Cadence {
        Cadence::Fast
    }

    fn collect(&self, snapshot: &mut Snapshot) -> Result<(), ProbeError> {
        let content = self
            .fs
            .read_to_string(Path::new(PASSWD_PATH))
            .map_err(|e| ProbeError::io(PASSWD_PATH, e))?;
        let users: Vec<PasswdEntry> = parse_passwd(&content)
            .into_iter()
            .filter(is_regular_user)
            .collect();

        let owners = self.process_owners();
        let mut sessions: Option<HashSet<String>> = None;

        for user in users {
            let mut active = owners.contains(&user.uid);
            if !active {
                let logged_in = sessions.get_or_insert_with(|| {
                    self.sessions.logged_in().unwrap_or_else(|e| {
                        debug!(error = %e, "login session lookup failed");
                        HashSet::new()
                    })
                });
                active = logged_in.contains(&user.username);
            }
            let uid = user.uid.to_string();
            snapshot.insert(LabelTuple::new([
                user.username.as_str(),
                user.home.as_str(),
                uid.as_str(),
                user.gid.as_str(),
                if active { "1" } else { "0" },
            ]));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collector::MockFs;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    struct FixedSessions(Vec<&'static str>);

    impl LoginSessions for FixedSessions {
        fn logged_in(&self) -> Result<HashSet<String>, ProbeError> {
            Ok(self.0.iter().map(|s| s.to_string()).collect())
        }
    }

    struct FailingSessions(Arc<AtomicUsize>);

    impl LoginSessions for FailingSessions {
        fn logged_in(&self) -> Result<HashSet<String>, ProbeError> {
            self.0.fetch_add(1, Ordering::SeqCst);
            Err(ProbeError::Command {
                program: "w".to_string(),
                message: "not found".to_string(),
            })
        }
    }

    fn collect(probe: &impl Probe) -> Snapshot {
        let mut snapshot = Snapshot::new(1);
        probe.collect(&mut snapshot).unwrap();
        snapshot
    }

    #[test]
    fn test_filters_system_and_non_login_users() {
        let probe = UserProbe::new(MockFs::debian_host(), Path::new("/proc"))
            .with_sessions(FixedSessions(vec![]));
        let snapshot = collect(&probe);

        let names: Vec<&str> = snapshot
            .samples()
            .keys()
            .map(|t| t.values()[0].as_str())
            .collect();
        // carol uses zsh, root/daemon/nobody are below 1000
        assert_eq!(names, vec!["alice", "bob", "deploy"]);
    }

    #[test]
    fn test_active_from_process_owner() {
        let probe = UserProbe::new(MockFs::debian_host(), Path::new("/proc"))
            .with_sessions(FixedSessions(vec![]));
        let snapshot = collect(&probe);

        assert!(
            snapshot
                .samples()
                .contains_key(&LabelTuple::from(["alice", "/home/alice", "1000", "1000", "1"]))
        );
        assert!(
            snapshot
                .samples()
                .contains_key(&LabelTuple::from(["bob", "/home/bob", "1001", "1001", "0"]))
        );
    }

    #[test]
    fn test_active_from_login_sessions() {
        let probe = UserProbe::new(MockFs::debian_host(), Path::new("/proc"))
            .with_sessions(FixedSessions(vec!["deploy"]));
        let snapshot = collect(&probe);

        assert!(snapshot.samples().contains_key(&LabelTuple::from([
            "deploy",
            "/srv/deploy",
            "1003",
            "1003",
            "1"
        ])));
    }

    #[test]
    fn test_session_lookup_failure_is_tolerated_and_cached() {
        let calls = Arc::new(AtomicUsize::new(0));
        let probe = UserProbe::new(MockFs::debian_host(), Path::new("/proc"))
            .with_sessions(FailingSessions(calls.clone()));
        let snapshot = collect(&probe);

        assert_eq!(snapshot.len(), 3);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_missing_passwd_fails() {
        let probe = UserProbe::new(MockFs::new(), Path::new("/proc"))
            .with_sessions(FixedSessions(vec![]));
        let mut snapshot = Snapshot::new(1);
        let err = probe.collect(&mut snapshot).unwrap_err();
        assert!(matches!(err, ProbeError::Io { .. }));
    }

    #[test]
    fn test_parse_w_output() {
        let users = parse_w_output(
            "alice    pts/0    10.0.0.2         09:12    1:02   0.05s  0.05s -bash\nbob      tty1     -                08:00    3days  0.01s  0.01s -sh\n",
        );
        assert_eq!(users.len(), 2);
        assert!(users.contains("alice"));
        assert!(users.contains("bob"));
    }
}
