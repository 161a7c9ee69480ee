//! Host platform detection.

use std::path::Path;

use crate::collector::traits::FileSystem;
use crate::probe::parser::parse_os_release;

/// Linux distribution families with distinct package tooling.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DistroFamily {
    Debian,
    RedHat,
    Unknown,
}

/// The host the exporter runs on, resolved once at startup.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Platform {
    /// Linux, with the `ID=` value of `/etc/os-release` when readable.
    Linux { distro: Option<String> },
    MacOs,
    Other(String),
}

impl Platform {
    /// Detects the platform this binary was compiled for.
    pub fn detect<F: FileSystem>(fs: &F) -> Self {
        Self::detect_for(std::env::consts::OS, fs)
    }

    /// Detects the platform for an explicit OS name (as in
    /// `std::env::consts::OS`).
    pub fn detect_for<F: FileSystem>(os: &str, fs: &F) -> Self {
        match os {
            "linux" => {
                let distro = fs
                    .read_to_string(Path::new("/etc/os-release"))
                    .ok()
                    .and_then(|content| parse_os_release(&content).id);
                Platform::Linux { distro }
            }
            "macos" => Platform::MacOs,
            other => Platform::Other(other.to_string()),
        }
    }

    /// OS name as reported in the `platform` label.
    pub fn os(&self) -> &str {
        match self {
            Platform::Linux { .. } => "linux",
            Platform::MacOs => "macos",
            Platform::Other(os) => os,
        }
    }

    pub fn is_linux(&self) -> bool {
        matches!(self, Platform::Linux { .. })
    }

    pub fn distro_family(&self) -> DistroFamily {
        match self {
            Platform::Linux {
                distro: Some(distro),
            } => match distro.as_str() {
                "ubuntu" | "debian" => DistroFamily::Debian,
                "rhel" | "centos" | "fedora" | "amazon" | "amzn" => DistroFamily::RedHat,
                _ => DistroFamily::Unknown,
            },
            _ => DistroFamily::Unknown,
        }
    }
}

impl std::fmt::Display for Platform {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Platform::Linux {
                distro: Some(distro),
            } => write!(f, "linux ({})", distro),
            _ => f.write_str(self.os()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collector::MockFs;

    #[test]
    fn test_detect_debian() {
        let platform = Platform::detect_for("linux", &MockFs::debian_host());
        assert_eq!(
            platform,
            Platform::Linux {
                distro: Some("debian".to_string())
            }
        );
        assert_eq!(platform.distro_family(), DistroFamily::Debian);
        assert_eq!(platform.to_string(), "linux (debian)");
    }

    #[test]
    fn test_detect_fedora() {
        let platform = Platform::detect_for("linux", &MockFs::fedora_host());
        assert_eq!(platform.distro_family(), DistroFamily::RedHat);
    }

    #[test]
    fn test_detect_linux_without_os_release() {
        let platform = Platform::detect_for("linux", &MockFs::new());
        assert_eq!(platform, Platform::Linux { distro: None });
        assert_eq!(platform.distro_family(), DistroFamily::Unknown);
    }

    #[test]
    fn test_detect_other_os() {
        assert_eq!(Platform::detect_for("macos", &MockFs::new()), Platform::MacOs);
        let freebsd = Platform::detect_for("freebsd", &MockFs::new());
        assert_eq!(freebsd.os(), "freebsd");
        assert!(!freebsd.is_linux());
    }
}
