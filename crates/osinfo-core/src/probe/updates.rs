//! `system_package_update_available`: whether the package manager has
//! pending updates, as a 0/1 value per package manager.
//!
//! The signal is a marker-path heuristic: it looks for package manager state
//! directories rather than querying repositories.

use std::path::Path;

use crate::collector::traits::FileSystem;
use crate::probe::packages::homebrew_cellar;
use crate::probe::platform::DistroFamily;
use crate::probe::{Cadence, Platform, Probe, ProbeError};
use crate::reconcile::Snapshot;
use crate::registry::{FamilyDesc, LabelTuple};

const APT_LISTS: &str = "/var/lib/apt/lists";
const APT_PARTIAL: &str = "/var/lib/apt/lists/partial";
const YUM_CACHE: &str = "/var/cache/yum";
const DNF_CACHE: &str = "/var/cache/dnf";

/// Package manager family whose update markers are checked.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpdateSource {
    Apt,
    Rpm,
    Homebrew,
    None,
}

impl UpdateSource {
    pub fn detect<F: FileSystem>(platform: &Platform, fs: &F) -> Self {
        match (platform, platform.distro_family()) {
            (Platform::Linux { .. }, DistroFamily::Debian) => UpdateSource::Apt,
            (Platform::Linux { .. }, DistroFamily::RedHat) => UpdateSource::Rpm,
            (Platform::Linux { .. }, DistroFamily::Unknown) => {
                if fs.exists(Path::new(APT_LISTS)) {
                    UpdateSource::Apt
                } else if fs.exists(Path::new(DNF_CACHE)) || fs.exists(Path::new(YUM_CACHE)) {
                    UpdateSource::Rpm
                } else {
                    UpdateSource::None
                }
            }
            (Platform::MacOs, _) => UpdateSource::Homebrew,
            (Platform::Other(_), _) => UpdateSource::None,
        }
    }
}

pub struct UpdateProbe<F> {
    source: UpdateSource,
    fs: F,
}

impl<F: FileSystem> UpdateProbe<F> {
    pub fn new(source: UpdateSource, fs: F) -> Self {
        Self { source, fs }
    }

    fn exists(&self, path: &str) -> bool {
        self.fs.exists(Path::new(path))
    }

    /// Returns the (package manager, value) pair to report, if any.
    fn observe(&self) -> Result<Option<(&'static str, f64)>, ProbeError> {
        let flag = |b: bool| if b { 1.0 } else { 0.0 };
        let observed = match self.source {
            UpdateSource::Apt => {
                if !self.exists(APT_LISTS) {
                    // apt not installed, nothing to report
                    return Ok(None);
                }
                ("apt", flag(self.exists(APT_PARTIAL)))
            }
            UpdateSource::Rpm => {
                if self.exists(YUM_CACHE) {
                    ("yum", 1.0)
                } else if self.exists(DNF_CACHE) {
                    ("dnf", 1.0)
                } else {
                    ("yum_or_dnf", 0.0)
                }
            }
            UpdateSource::Homebrew => match homebrew_cellar(&self.fs) {
                Some(cellar) => ("homebrew", flag(self.fs.exists(&cellar.join("outdated")))),
                None => ("homebrew", 0.0),
            },
            UpdateSource::None => {
                return Err(ProbeError::Unsupported(
                    "no update source for this platform".to_string(),
                ));
            }
        };
        Ok(Some(observed))
    }
}

impl<F: FileSystem + 'static> Probe for UpdateProbe<F> {
    fn desc(&self) -> FamilyDesc {
        FamilyDesc::new(
            "system_package_update_available",
            "Indicates if updates are available for installed packages (1 if updates are available, 0 otherwise)",
            &["package"],
        )
    }

    fn cadence(&self) -> Cadence {
        Cadence::Default
    }

    fn collect(&self, snapshot: &mut Snapshot) -> Result<(), ProbeError> {
        if let Some((manager, value)) = self.observe()? {
            snapshot.insert_value(LabelTuple::new([manager]), value);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collector::MockFs;

    fn collect(source: UpdateSource, fs: MockFs) -> Vec<(String, f64)> {
        let probe = UpdateProbe::new(source, fs);
        let mut snapshot = Snapshot::new(1);
        probe.collect(&mut snapshot).unwrap();
        snapshot
            .samples()
            .iter()
            .map(|(t, v)| (t.values()[0].clone(), *v))
            .collect()
    }

    #[test]
    fn test_detect() {
        let debian = MockFs::debian_host();
        let fedora = MockFs::fedora_host();
        assert_eq!(
            UpdateSource::detect(&Platform::detect_for("linux", &debian), &debian),
            UpdateSource::Apt
        );
        assert_eq!(
            UpdateSource::detect(&Platform::detect_for("linux", &fedora), &fedora),
            UpdateSource::Rpm
        );
        assert_eq!(
            UpdateSource::detect(&Platform::Linux { distro: None }, &MockFs::new()),
            UpdateSource::None
        );
        assert_eq!(
            UpdateSource::detect(&Platform::MacOs, &MockFs::new()),
            UpdateSource::Homebrew
        );
    }

    #[test]
    fn test_apt_partial_marks_updates() {
        assert_eq!(
            collect(UpdateSource::Apt, MockFs::debian_host()),
            vec![("apt".to_string(), 1.0)]
        );

        let mut fs = MockFs::debian_host();
        fs.remove(APT_PARTIAL);
        fs.add_dir(APT_LISTS);
        assert_eq!(
            collect(UpdateSource::Apt, fs),
            vec![("apt".to_string(), 0.0)]
        );
    }

    #[test]
    fn test_apt_missing_reports_nothing() {
        assert!(collect(UpdateSource::Apt, MockFs::new()).is_empty());
    }

    #[test]
    fn test_rpm_markers() {
        assert_eq!(
            collect(UpdateSource::Rpm, MockFs::fedora_host()),
            vec![("dnf".to_string(), 1.0)]
        );
        assert_eq!(
            collect(UpdateSource::Rpm, MockFs::new()),
            vec![("yum_or_dnf".to_string(), 0.0)]
        );
    }

    #[test]
    fn test_homebrew_outdated_marker() {
        let mut fs = MockFs::homebrew_host();
        assert_eq!(
            collect(UpdateSource::Homebrew, fs.clone()),
            vec![("homebrew".to_string(), 0.0)]
        );
        fs.add_file("/opt/homebrew/Cellar/outdated", "");
        assert_eq!(
            collect(UpdateSource::Homebrew, fs),
            vec![("homebrew".to_string(), 1.0)]
        );
    }

    #[test]
    fn test_unsupported_platform_fails() {
        let probe = UpdateProbe::new(UpdateSource::None, MockFs::new());
        assert!(probe.collect(&mut Snapshot::new(1)).is_err());
    }
}
