//! `system_auditing_info`: every regular file under the audited directories,
//! with its modification time and size.

use std::path::{Path, PathBuf};

use tracing::debug;

use crate::collector::traits::FileSystem;
use crate::fmt::{FmtStyle, format_bytes, format_rfc3339};
use crate::probe::{Cadence, CancelFlag, Probe, ProbeError};
use crate::reconcile::Snapshot;
use crate::registry::{FamilyDesc, LabelTuple};

pub struct AuditProbe<F> {
    fs: F,
    roots: Vec<PathBuf>,
}

impl<F: FileSystem> AuditProbe<F> {
    pub fn new(fs: F, roots: Vec<PathBuf>) -> Self {
        Self { fs, roots }
    }

    /// Depth-first walk of one root. The root itself must be listable;
    /// entries below it that vanish or cannot be read are skipped.
    fn walk(
        &self,
        root: &Path,
        snapshot: &mut Snapshot,
        cancel: &CancelFlag,
    ) -> Result<(), ProbeError> {
        let mut stack = self
            .fs
            .read_dir(root)
            .map_err(|e| ProbeError::io(root, e))?;

        while let Some(path) = stack.pop() {
            cancel.check()?;
            let meta = match self.fs.metadata(&path) {
                Ok(meta) => meta,
                Err(e) => {
                    debug!(path = %path.display(), error = %e, "skipping unreadable entry");
                    continue;
                }
            };
            if meta.is_dir {
                match self.fs.read_dir(&path) {
                    Ok(children) => stack.extend(children),
                    Err(e) => {
                        debug!(path = %path.display(), error = %e, "skipping unreadable directory")
                    }
                }
                continue;
            }
            let file_path = path.to_string_lossy();
            let modified = format_rfc3339(meta.modified);
            let size = format_bytes(meta.len, FmtStyle::Detail);
            snapshot.insert(LabelTuple::new([
                file_path.as_ref(),
                modified.as_str(),
                size.as_str(),
            ]));
        }
        Ok(())
    }
}

impl<F: FileSystem + 'static> Probe for AuditProbe<F> {
    fn desc(&self) -> FamilyDesc {
        FamilyDesc::new(
            "system_auditing_info",
            "Information about auditing files",
            &["file_path", "last_modified", "size"],
        )
    }

    fn cadence(&self) -> Cadence {
        Cadence::Default
    }

    fn collect(&self, snapshot: &mut Snapshot) -> Result<(), ProbeError> {
        self.collect_until(snapshot, &CancelFlag::new())
    }

    fn collect_until(&self, snapshot: &mut Snapshot, cancel: &CancelFlag) -> Result<(), ProbeError> {
        for root in &self.roots {
            self.walk(root, snapshot, cancel)?;
        }
        Ok(())
    }
}
