//! `system_package_version`: installed packages and their versions.

use std::path::{Path, PathBuf};

use tracing::debug;

use crate::collector::traits::FileSystem;
use crate::probe::platform::DistroFamily;
use crate::probe::{Cadence, Platform, Probe, ProbeError, run_command};
use crate::reconcile::Snapshot;
use crate::registry::{FamilyDesc, LabelTuple};

pub const DPKG_STATUS: &str = "/var/lib/dpkg/status";
pub const HOMEBREW_CELLARS: [&str; 2] = ["/usr/local/Cellar", "/opt/homebrew/Cellar"];

/// Where installed packages are listed on this host.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PackageSource {
    /// dpkg status database.
    Dpkg(PathBuf),
    /// `yum list installed` or `dnf list installed`.
    Rpm(&'static str),
    /// Homebrew Cellar: one directory per formula, one subdirectory per
    /// installed version.
    Homebrew(PathBuf),
    None,
}

impl PackageSource {
    pub fn detect<F: FileSystem>(platform: &Platform, fs: &F) -> Self {
        match platform {
            Platform::Linux { .. } => {
                if fs.exists(Path::new(DPKG_STATUS)) {
                    return PackageSource::Dpkg(PathBuf::from(DPKG_STATUS));
                }
                let candidates: &[&'static str] = match platform.distro_family() {
                    DistroFamily::Debian => &[],
                    _ => &["yum", "dnf"],
                };
                candidates
                    .iter()
                    .copied()
                    .find(|program| which::which(program).is_ok())
                    .map(PackageSource::Rpm)
                    .unwrap_or(PackageSource::None)
            }
            Platform::MacOs => homebrew_cellar(fs)
                .map(PackageSource::Homebrew)
                .unwrap_or(PackageSource::None),
            Platform::Other(_) => PackageSource::None,
        }
    }
}

/// First Homebrew Cellar present on this host.
pub fn homebrew_cellar<F: FileSystem>(fs: &F) -> Option<PathBuf> {
    HOMEBREW_CELLARS
        .into_iter()
        .map(PathBuf::from)
        .find(|p| fs.exists(p))
}

/// Parses a dpkg status database into (package, version) pairs.
///
/// Stanzas are separated by blank lines. Packages whose `Status` does not
/// end in `installed` (removed, config-files only, half-installed) are
/// skipped.
pub fn parse_dpkg_status(content: &str) -> Vec<(String, String)> {
    let mut packages = Vec::new();
    for stanza in content.split("\n\n") {
        let mut name = None;
        let mut version = None;
        let mut installed = true;
        for line in stanza.lines() {
            if let Some(value) = line.strip_prefix("Package:") {
                name = Some(value.trim());
            } else if let Some(value) = line.strip_prefix("Version:") {
                version = Some(value.trim());
            } else if let Some(value) = line.strip_prefix("Status:") {
                installed = value.trim().ends_with(" installed");
            }
        }
        if let (Some(name), Some(version)) = (name, version)
            && installed
        {
            packages.push((name.to_string(), version.to_string()));
        }
    }
    packages
}

/// Parses `yum list installed` / `dnf list installed` output.
pub fn parse_rpm_list(output: &str) -> Vec<(String, String)> {
    output
        .lines()
        .filter(|line| {
            !line.starts_with("Installed Packages")
                && !line.starts_with("Loaded plugins:")
                && !line.trim().is_empty()
        })
        .filter_map(|line| {
            let fields: Vec<&str> = line.split_whitespace().collect();
            (fields.len() >= 3).then(|| (fields[0].to_string(), fields[1].to_string()))
        })
        .collect()
}

pub struct PackageProbe<F> {
    source: PackageSource,
    fs: F,
}

impl<F: FileSystem> PackageProbe<F> {
    pub fn new(source: PackageSource, fs: F) -> Self {
        debug!(?source, "package source selected");
        Self { source, fs }
    }

    fn homebrew_versions(&self, cellar: &Path) -> Result<Vec<(String, String)>, ProbeError> {
        let formulas = self
            .fs
            .read_dir(cellar)
            .map_err(|e| ProbeError::io(cellar, e))?;
        let mut packages = Vec::new();
        for formula in formulas {
            let Some(name) = visible_dir_name(&self.fs, &formula) else {
                continue;
            };
            let Ok(versions) = self.fs.read_dir(&formula) else {
                continue;
            };
            for version in versions {
                if let Some(v) = visible_dir_name(&self.fs, &version) {
                    packages.push((name.clone(), v));
                }
            }
        }
        Ok(packages)
    }
}

fn visible_dir_name<F: FileSystem>(fs: &F, path: &Path) -> Option<String> {
    let name = path.file_name()?.to_str()?;
    if name.starts_with('.') || !fs.metadata(path).is_ok_and(|m| m.is_dir) {
        return None;
    }
    Some(name.to_string())
}

impl<F: FileSystem + 'static> Probe for PackageProbe<F> {
    fn desc(&self) -> FamilyDesc {
        FamilyDesc::new(
            "system_package_version",
            "Version of installed packages",
            &["package", "version"],
        )
    }

    fn cadence(&self) -> Cadence {
        Cadence::Default
    }

    fn collect(&self, snapshot: &mut Snapshot) -> Result<(), ProbeError> {
        let packages = match &self.source {
            PackageSource::Dpkg(path) => {
                let content = self
                    .fs
                    .read_to_string(path)
                    .map_err(|e| ProbeError::io(path, e))?;
                parse_dpkg_status(&content)
            }
            PackageSource::Rpm(program) => {
                parse_rpm_list(&run_command(program, &["list", "installed"])?)
            }
            PackageSource::Homebrew(cellar) => self.homebrew_versions(cellar)?,
            PackageSource::None => {
                return Err(ProbeError::Unsupported(
                    "no supported package manager found".to_string(),
                ));
            }
        };
        for (name, version) in packages {
            snapshot.insert(LabelTuple::new([name, version]));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collector::MockFs;

    #[test]
    fn test_detect_sources() {
        let debian = MockFs::debian_host();
        assert_eq!(
            PackageSource::detect(&Platform::detect_for("linux", &debian), &debian),
            PackageSource::Dpkg(PathBuf::from(DPKG_STATUS))
        );

        let brew = MockFs::homebrew_host();
        assert_eq!(
            PackageSource::detect(&Platform::MacOs, &brew),
            PackageSource::Homebrew(PathBuf::from("/opt/homebrew/Cellar"))
        );
        assert_eq!(
            PackageSource::detect(&Platform::MacOs, &MockFs::new()),
            PackageSource::None
        );
        assert_eq!(
            PackageSource::detect(&Platform::Other("freebsd".to_string()), &debian),
            PackageSource::None
        );
    }

    #[test]
    fn test_parse_dpkg_status_skips_removed() {
        let packages = parse_dpkg_status(
            "Package: bash\nStatus: install ok installed\nVersion: 5.2\n\nPackage: nano\nStatus: deinstall ok config-files\nVersion: 7.2-1\n\nPackage: old\nVersion: 0.1\n",
        );
        assert_eq!(
            packages,
            vec![
                ("bash".to_string(), "5.2".to_string()),
                ("old".to_string(), "0.1".to_string()),
            ]
        );
    }

    #[test]
    fn test_parse_rpm_list() {
        let packages = parse_rpm_list(
            "Loaded plugins: fastestmirror\nInstalled Packages\nbash.x86_64                 5.2.26-1.fc39        @fedora\nshort line\n\nopenssl.x86_64   1:3.1.1-4.fc39   @updates\n",
        );
        assert_eq!(
            packages,
            vec![
                ("bash.x86_64".to_string(), "5.2.26-1.fc39".to_string()),
                ("openssl.x86_64".to_string(), "1:3.1.1-4.fc39".to_string()),
            ]
        );
    }

    #[test]
    fn test_dpkg_probe() {
        let probe = PackageProbe::new(
            PackageSource::Dpkg(PathBuf::from(DPKG_STATUS)),
            MockFs::debian_host(),
        );
        let mut snapshot = Snapshot::new(1);
        probe.collect(&mut snapshot).unwrap();

        let tuples: Vec<&LabelTuple> = snapshot.samples().keys().collect();
        assert_eq!(
            tuples,
            vec![
                &LabelTuple::from(["bash", "5.2.15-2+b2"]),
                &LabelTuple::from(["openssh-server", "1:9.2p1-2+deb12u2"]),
            ]
        );
    }

    #[test]
    fn test_homebrew_probe_reports_every_version() {
        let probe = PackageProbe::new(
            PackageSource::Homebrew(PathBuf::from("/opt/homebrew/Cellar")),
            MockFs::homebrew_host(),
        );
        let mut snapshot = Snapshot::new(1);
        probe.collect(&mut snapshot).unwrap();

        let tuples: Vec<&LabelTuple> = snapshot.samples().keys().collect();
        assert_eq!(
            tuples,
            vec![
                &LabelTuple::from(["git", "2.43.0"]),
                &LabelTuple::from(["openssl@3", "3.1.4"]),
                &LabelTuple::from(["openssl@3", "3.2.0"]),
            ]
        );
    }

    #[test]
    fn test_no_source_is_unsupported() {
        let probe = PackageProbe::new(PackageSource::None, MockFs::new());
        assert!(matches!(
            probe.collect(&mut Snapshot::new(1)),
            Err(ProbeError::Unsupported(_))
        ));
    }
}
