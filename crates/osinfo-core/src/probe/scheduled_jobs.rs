//! `system_scheduled_jobs_info`: entries of the system crontab.

use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use tracing::debug;

use crate::collector::traits::FileSystem;
use crate::probe::{Cadence, Probe, ProbeError};
use crate::reconcile::Snapshot;
use crate::registry::{FamilyDesc, LabelTuple};

const CRONTAB: &str = "/etc/crontab";
const CRON_D: &str = "/etc/cron.d";
/// Cron keeps no run history we can read.
const LAST_RUN_STATUS: &str = "unknown";

/// One parsed system crontab line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CronEntry {
    pub schedule: String,
    pub user: String,
    pub command: String,
}

/// Parses system crontab content (the format with a user column).
///
/// Comments, blank lines and `NAME=value` environment lines are skipped, as
/// are lines too short to hold a schedule, a user and a command.
pub fn parse_crontab(content: &str) -> Vec<CronEntry> {
    let mut entries = Vec::new();
    for line in content.lines() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        let fields: Vec<&str> = line.split_whitespace().collect();
        if fields[0].contains('=') {
            continue;
        }
        // @reboot, @daily, ... replace the five time fields
        let schedule_len = if fields[0].starts_with('@') { 1 } else { 5 };
        if fields.len() < schedule_len + 2 {
            debug!(line, "invalid crontab entry");
            continue;
        }
        entries.push(CronEntry {
            schedule: fields[..schedule_len].join(" "),
            user: fields[schedule_len].to_string(),
            command: fields[schedule_len + 1..].join(" "),
        });
    }
    entries
}

/// Reads `/etc/crontab` and every file in `/etc/cron.d`.
pub struct ScheduledJobsProbe<F> {
    fs: F,
    crontab: PathBuf,
    cron_d: PathBuf,
}

impl<F: FileSystem> ScheduledJobsProbe<F> {
    pub fn new(fs: F) -> Self {
        Self {
            fs,
            crontab: PathBuf::from(CRONTAB),
            cron_d: PathBuf::from(CRON_D),
        }
    }

    /// Reads a crontab file; a missing file holds no jobs.
    fn read_optional(&self, path: &Path) -> Result<Option<String>, ProbeError> {
        match self.fs.read_to_string(path) {
            Ok(content) => Ok(Some(content)),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(ProbeError::io(path, e)),
        }
    }

    fn crontab_files(&self) -> Vec<PathBuf> {
        let mut files = vec![self.crontab.clone()];
        if let Ok(mut extra) = self.fs.read_dir(&self.cron_d) {
            // run-parts naming: skip hidden files and package manager leftovers
            extra.retain(|p| {
                p.file_name()
                    .and_then(|n| n.to_str())
                    .is_some_and(|n| !n.starts_with('.') && !n.contains(".dpkg-"))
            });
            extra.sort();
            files.extend(extra);
        }
        files
    }
}

impl<F: FileSystem + 'static> Probe for ScheduledJobsProbe<F> {
    fn desc(&self) -> FamilyDesc {
        FamilyDesc::new(
            "system_scheduled_jobs_info",
            "Information about scheduled jobs",
            &["job_name", "schedule", "last_run_status"],
        )
    }

    fn cadence(&self) -> Cadence {
        Cadence::Fast
    }

    fn collect(&self, snapshot: &mut Snapshot) -> Result<(), ProbeError> {
        for path in self.crontab_files() {
            let Some(content) = self.read_optional(&path)? else {
                continue;
            };
            for entry in parse_crontab(&content) {
                snapshot.insert(LabelTuple::new([
                    entry.command.as_str(),
                    entry.schedule.as_str(),
                    LAST_RUN_STATUS,
                ]));
            }
        }
        Ok(())
    }
}
