//! Pre-built mock filesystem scenarios for testing.
//!
//! These scenarios provide realistic host states (`/etc`, `/proc`, `/sys`,
//! package databases) for exercising probes end to end.

use super::filesystem::MockFs;

impl MockFs {
    /// Creates a typical Debian host.
    ///
    /// Includes: three login-capable users, init/sshd/bash processes,
    /// loopback + one up and one down interface, a system crontab with an
    /// extra `/etc/cron.d` file, a small dpkg database and apt lists.
    pub fn debian_host() -> Self {
        let mut fs = Self::new();

        fs.add_file(
            "/etc/passwd",
            "\
root:x:0:0:root:/root:/bin/bash
daemon:x:1:1:daemon:/usr/sbin:/usr/sbin/nologin
nobody:x:65534:65534:nobody:/nonexistent:/usr/sbin/nologin
alice:x:1000:1000:Alice:/home/alice:/bin/bash
bob:x:1001:1001:Bob:/home/bob:/bin/sh
carol:x:1002:100:Carol:/home/carol:/usr/bin/zsh
deploy:x:1003:1003::/srv/deploy:/bin/bash
",
        );
        fs.add_file(
            "/etc/os-release",
            "\
PRETTY_NAME=\"Debian GNU/Linux 12 (bookworm)\"
NAME=\"Debian GNU/Linux\"
VERSION_ID=\"12\"
VERSION=\"12 (bookworm)\"
ID=debian
",
        );
        fs.add_file("/proc/sys/kernel/osrelease", "6.1.0-18-amd64\n");

        fs.add_process(1, "systemd", 0);
        fs.add_process(42, "sshd", 0);
        fs.add_process(1200, "bash", 1000);

        fs.add_file("/sys/class/net/lo/address", "00:00:00:00:00:00\n");
        fs.add_file("/sys/class/net/lo/flags", "0x9\n");
        fs.add_file("/sys/class/net/eth0/address", "52:54:00:12:34:56\n");
        fs.add_file("/sys/class/net/eth0/flags", "0x1003\n");
        fs.add_file("/sys/class/net/eth1/address", "52:54:00:ab:cd:ef\n");
        fs.add_file("/sys/class/net/eth1/flags", "0x1002\n");

        fs.add_file(
            "/etc/crontab",
            "\
# /etc/crontab: system-wide crontab
SHELL=/bin/sh
PATH=/usr/local/sbin:/usr/local/bin:/sbin:/bin:/usr/sbin:/usr/bin

17 *\t* * *\troot\tcd / && run-parts --report /etc/cron.hourly
25 6\t* * *\troot\ttest -x /usr/sbin/anacron || run-parts --report /etc/cron.daily
",
        );
        fs.add_file(
            "/etc/cron.d/certbot",
            "\
SHELL=/bin/sh
0 */12 * * * root certbot -q renew
",
        );

        fs.add_file(
            "/var/lib/dpkg/status",
            "\
Package: bash
Status: install ok installed
Priority: required
Version: 5.2.15-2+b2

Package: openssh-server
Status: install ok installed
Version: 1:9.2p1-2+deb12u2

Package: nano
Status: deinstall ok config-files
Version: 7.2-1
",
        );
        fs.add_dir("/var/lib/apt/lists/partial");

        fs.add_file("/var/log/syslog", "Nov 14 22:13:20 host systemd[1]: Started.\n");
        fs.add_file("/var/log/apt/history.log", "Start-Date: 2023-11-14\n");

        fs
    }

    /// Creates a Fedora host with a dnf cache and no dpkg database.
    pub fn fedora_host() -> Self {
        let mut fs = Self::new();
        fs.add_file(
            "/etc/os-release",
            "\
NAME=\"Fedora Linux\"
VERSION=\"39 (Server Edition)\"
ID=fedora
VERSION_ID=39
",
        );
        fs.add_file("/proc/sys/kernel/osrelease", "6.5.6-300.fc39.x86_64\n");
        fs.add_file("/etc/passwd", "root:x:0:0:root:/root:/bin/bash\n");
        fs.add_dir("/var/cache/dnf");
        fs
    }

    /// Creates a macOS-like host with a Homebrew Cellar.
    pub fn homebrew_host() -> Self {
        let mut fs = Self::new();
        fs.add_dir("/opt/homebrew/Cellar/git/2.43.0");
        fs.add_dir("/opt/homebrew/Cellar/openssl@3/3.1.4");
        fs.add_dir("/opt/homebrew/Cellar/openssl@3/3.2.0");
        fs.add_file("/opt/homebrew/Cellar/.keepme", "");
        fs
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collector::traits::FileSystem;
    use std::path::Path;

    #[test]
    fn test_debian_host_has_processes() {
        let fs = MockFs::debian_host();
        let entries = fs.read_dir(Path::new("/proc")).unwrap();
        // 1, 42, 1200 and the sys directory
        assert_eq!(entries.len(), 4);
    }

    #[test]
    fn test_homebrew_host_versions() {
        let fs = MockFs::homebrew_host();
        let versions = fs
            .read_dir(Path::new("/opt/homebrew/Cellar/openssl@3"))
            .unwrap();
        assert_eq!(versions.len(), 2);
    }
}
