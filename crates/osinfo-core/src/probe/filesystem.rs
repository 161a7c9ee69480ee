//! `system_filesystem_info`: size and usage of the filesystems holding the
//! configured paths.

use std::path::{Path, PathBuf};

use sysinfo::Disks;
use tracing::debug;

use crate::fmt::{FmtStyle, format_bytes};
use crate::probe::{Cadence, Probe, ProbeError};
use crate::reconcile::Snapshot;
use crate::registry::{FamilyDesc, LabelTuple};

/// One mounted filesystem.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiskInfo {
    pub mount_point: PathBuf,
    pub fs_type: String,
    pub total: u64,
    pub available: u64,
}

/// Source of the mount table.
pub trait DiskSource: Send + Sync + 'static {
    fn disks(&self) -> Vec<DiskInfo>;
}

/// Mount table via `sysinfo`.
#[derive(Debug, Default, Clone, Copy)]
pub struct SysinfoDisks;

impl DiskSource for SysinfoDisks {
    fn disks(&self) -> Vec<DiskInfo> {
        Disks::new_with_refreshed_list()
            .list()
            .iter()
            .map(|disk| DiskInfo {
                mount_point: disk.mount_point().to_path_buf(),
                fs_type: disk.file_system().to_string_lossy().into_owned(),
                total: disk.total_space(),
                available: disk.available_space(),
            })
            .collect()
    }
}

/// Finds the filesystem a path lives on: the mount with the longest
/// matching prefix.
pub fn mount_for<'a>(disks: &'a [DiskInfo], path: &Path) -> Option<&'a DiskInfo> {
    disks
        .iter()
        .filter(|d| path.starts_with(&d.mount_point))
        .max_by_key(|d| d.mount_point.components().count())
}

/// Reports one series per configured path, labelled with the path itself.
pub struct FilesystemProbe<D> {
    source: D,
    paths: Vec<PathBuf>,
}

impl<D: DiskSource> FilesystemProbe<D> {
    pub fn new(source: D, paths: Vec<PathBuf>) -> Self {
        Self { source, paths }
    }
}

impl<D: DiskSource> Probe for FilesystemProbe<D> {
    fn desc(&self) -> FamilyDesc {
        FamilyDesc::new(
            "system_filesystem_info",
            "Information about mounted filesystems",
            &["mount_point", "filesystem_type", "total_space", "used_space"],
        )
    }

    fn cadence(&self) -> Cadence {
        Cadence::Fast
    }

    fn collect(&self, snapshot: &mut Snapshot) -> Result<(), ProbeError> {
        let disks = self.source.disks();
        if disks.is_empty() {
            return Err(ProbeError::Unsupported("no mounted filesystems reported".to_string()));
        }

        for path in &self.paths {
            let Some(disk) = mount_for(&disks, path) else {
                debug!(path = %path.display(), "no filesystem found for path");
                continue;
            };
            let used = disk.total.saturating_sub(disk.available);
            let mount_point = path.to_string_lossy();
            let total = format_bytes(disk.total, FmtStyle::Detail);
            let used = format_bytes(used, FmtStyle::Detail);
            snapshot.insert(LabelTuple::new([
                mount_point.as_ref(),
                disk.fs_type.as_str(),
                total.as_str(),
                used.as_str(),
            ]));
        }
        Ok(())
    }
}
