//! `system_os_info`: a single series describing the running OS.

use std::path::Path;
use std::sync::Arc;

use sysinfo::System;

use crate::collector::traits::FileSystem;
use crate::probe::parser::parse_os_release;
use crate::probe::{Cadence, Platform, Probe, ProbeError};
use crate::reconcile::Snapshot;
use crate::registry::{FamilyDesc, LabelTuple};

const OS_RELEASE: &str = "/etc/os-release";
const KERNEL_RELEASE: &str = "/proc/sys/kernel/osrelease";

fn os_info_desc() -> FamilyDesc {
    FamilyDesc::new(
        "system_os_info",
        "Operating system name, version, architecture, platform, and kernel version",
        &[
            "os_name",
            "os_version",
            "architecture",
            "platform",
            "kernel_version",
        ],
    )
}

/// Picks the `/etc/os-release` reader on Linux and `sysinfo` elsewhere.
pub fn for_platform<F>(platform: &Platform, fs: F) -> Arc<dyn Probe>
where
    F: FileSystem + 'static,
{
    if platform.is_linux() {
        Arc::new(OsReleaseProbe::new(fs, platform))
    } else {
        Arc::new(SysinfoOsProbe::new(platform))
    }
}

pub struct OsReleaseProbe<F> {
    fs: F,
    platform: String,
}

impl<F: FileSystem> OsReleaseProbe<F> {
    pub fn new(fs: F, platform: &Platform) -> Self {
        Self {
            fs,
            platform: platform.os().to_string(),
        }
    }

    fn read(&self, path: &str) -> Result<String, ProbeError> {
        self.fs
            .read_to_string(Path::new(path))
            .map_err(|e| ProbeError::io(path, e))
    }
}

impl<F: FileSystem + 'static> Probe for OsReleaseProbe<F> {
    fn desc(&self) -> FamilyDesc {
        os_info_desc()
    }

    fn cadence(&self) -> Cadence {
        Cadence::Default
    }

    fn collect(&self, snapshot: &mut Snapshot) -> Result<(), ProbeError> {
        let release = parse_os_release(&self.read(OS_RELEASE)?);
        let (Some(name), Some(version)) = (release.name, release.version_id) else {
            return Err(ProbeError::Parse(format!(
                "{}: NAME or VERSION_ID missing",
                OS_RELEASE
            )));
        };
        let kernel = self.read(KERNEL_RELEASE)?;
        snapshot.insert(LabelTuple::new([
            name.as_str(),
            version.as_str(),
            std::env::consts::ARCH,
            self.platform.as_str(),
            kernel.trim(),
        ]));
        Ok(())
    }
}

/// OS description via `sysinfo`.
pub struct SysinfoOsProbe {
    platform: String,
}

impl SysinfoOsProbe {
    pub fn new(platform: &Platform) -> Self {
        Self {
            platform: platform.os().to_string(),
        }
    }
}

impl Probe for SysinfoOsProbe {
    fn desc(&self) -> FamilyDesc {
        os_info_desc()
    }

    fn cadence(&self) -> Cadence {
        Cadence::Default
    }

    fn collect(&self, snapshot: &mut Snapshot) -> Result<(), ProbeError> {
        let (Some(name), Some(version)) = (System::name(), System::os_version()) else {
            return Err(ProbeError::Unsupported(
                "OS name or version not reported".to_string(),
            ));
        };
        let kernel = System::kernel_version().unwrap_or_else(|| "unknown".to_string());
        snapshot.insert(LabelTuple::new([
            name.as_str(),
            version.as_str(),
            std::env::consts::ARCH,
            self.platform.as_str(),
            kernel.as_str(),
        ]));
        Ok(())
    }
}
