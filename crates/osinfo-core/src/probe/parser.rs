//! Parsers for `/etc` and `/proc` text formats shared by several probes.

use std::collections::HashMap;

use crate::probe::ProbeError;

// ============ /etc/passwd ============

/// One line of `/etc/passwd`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PasswdEntry {
    pub username: String,
    pub uid: u32,
    pub gid: String,
    pub home: String,
    pub shell: String,
}

/// Parses `/etc/passwd` content.
///
/// Format: username:password:uid:gid:gecos:home:shell. Lines with fewer
/// than seven fields or a non-numeric UID are skipped.
pub fn parse_passwd(content: &str) -> Vec<PasswdEntry> {
    let mut entries = Vec::new();
    for line in content.lines() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        let parts: Vec<&str> = line.split(':').collect();
        if parts.len() < 7 {
            continue;
        }
        let Ok(uid) = parts[2].parse::<u32>() else {
            continue;
        };
        entries.push(PasswdEntry {
            username: parts[0].to_string(),
            uid,
            gid: parts[3].to_string(),
            home: parts[5].to_string(),
            shell: parts[6].to_string(),
        });
    }
    entries
}

/// Resolver for UID -> username mapping.
#[derive(Debug, Clone, Default)]
pub struct UserResolver {
    uid_to_name: HashMap<u32, String>,
}

impl UserResolver {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builds a resolver from `/etc/passwd` content. The first entry wins
    /// when a UID appears twice.
    pub fn from_passwd(content: &str) -> Self {
        let mut uid_to_name = HashMap::new();
        for entry in parse_passwd(content) {
            uid_to_name.entry(entry.uid).or_insert(entry.username);
        }
        Self { uid_to_name }
    }

    /// Resolves UID to username, returns UID as string if not found.
    pub fn resolve(&self, uid: u32) -> String {
        self.uid_to_name
            .get(&uid)
            .cloned()
            .unwrap_or_else(|| uid.to_string())
    }

    pub fn is_loaded(&self) -> bool {
        !self.uid_to_name.is_empty()
    }
}

// ============ /proc/[pid]/status ============

/// Fields of `/proc/[pid]/status` used by probes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcStatus {
    pub name: String,
    /// Real UID.
    pub uid: u32,
}

/// Parses `/proc/[pid]/status` content.
///
/// Format is key:\tvalue pairs, one per line. `Uid:` holds real, effective,
/// saved and filesystem UIDs.
pub fn parse_proc_status(content: &str) -> Result<ProcStatus, ProbeError> {
    let mut name = None;
    let mut uid = None;

    for line in content.lines() {
        let Some((key, value)) = line.split_once(':') else {
            continue;
        };
        match key.trim() {
            "Name" => name = Some(value.trim().to_string()),
            "Uid" => {
                uid = value
                    .split_whitespace()
                    .next()
                    .and_then(|s| s.parse::<u32>().ok());
            }
            _ => {}
        }
        if name.is_some() && uid.is_some() {
            break;
        }
    }

    match (name, uid) {
        (Some(name), Some(uid)) => Ok(ProcStatus { name, uid }),
        (None, _) => Err(ProbeError::Parse("status: missing Name".to_string())),
        (_, None) => Err(ProbeError::Parse("status: missing or invalid Uid".to_string())),
    }
}

// ============ /etc/os-release ============

/// Fields of `/etc/os-release` used by probes.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct OsRelease {
    pub id: Option<String>,
    pub name: Option<String>,
    pub version_id: Option<String>,
}

/// Parses `/etc/os-release` content. The first occurrence of a key wins.
pub fn parse_os_release(content: &str) -> OsRelease {
    let mut release = OsRelease::default();
    for line in content.lines() {
        let line = line.trim();
        if line.starts_with('#') {
            continue;
        }
        let Some((key, value)) = line.split_once('=') else {
            continue;
        };
        let value = value.trim().trim_matches('"').trim_matches('\'').to_string();
        let slot = match key.trim() {
            "ID" => &mut release.id,
            "NAME" => &mut release.name,
            "VERSION_ID" => &mut release.version_id,
            _ => continue,
        };
        if slot.is_none() {
            *slot = Some(value);
        }
    }
    release
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_passwd() {
        let entries = parse_passwd(
            "# comment\nroot:x:0:0:root:/root:/bin/bash\nbroken:x:abc:0::/:/bin/sh\nshort:x:1\nalice:x:1000:100:Alice:/home/alice:/bin/sh\n",
        );
        assert_eq!(entries.len(), 2);
        assert_eq!(
            entries[1],
            PasswdEntry {
                username: "alice".to_string(),
                uid: 1000,
                gid: "100".to_string(),
                home: "/home/alice".to_string(),
                shell: "/bin/sh".to_string(),
            }
        );
    }

    #[test]
    fn test_user_resolver() {
        let resolver = UserResolver::from_passwd(
            "root:x:0:0::/root:/bin/bash\nuser:x:1000:1000::/home/user:/bin/bash\ntoor:x:0:0::/root:/bin/sh",
        );

        assert_eq!(resolver.resolve(0), "root");
        assert_eq!(resolver.resolve(1000), "user");
        assert_eq!(resolver.resolve(9999), "9999"); // Unknown UID returns as string
        assert!(resolver.is_loaded());
        assert!(!UserResolver::new().is_loaded());
    }

    #[test]
    fn test_parse_proc_status() {
        let status = parse_proc_status(
            "Name:\tWeb Content\nUmask:\t0022\nState:\tS (sleeping)\nUid:\t1000\t1000\t1000\t1000\n",
        )
        .unwrap();
        assert_eq!(status.name, "Web Content");
        assert_eq!(status.uid, 1000);
    }

    #[test]
    fn test_parse_proc_status_missing_uid() {
        let err = parse_proc_status("Name:\tbash\n").unwrap_err();
        assert!(err.to_string().contains("Uid"));
    }

    #[test]
    fn test_parse_os_release() {
        let release = parse_os_release(
            "NAME=\"Ubuntu\"\nVERSION_ID=\"22.04\"\nID=ubuntu\nID_LIKE=debian\nNAME=\"Other\"\n",
        );
        assert_eq!(release.name.as_deref(), Some("Ubuntu"));
        assert_eq!(release.version_id.as_deref(), Some("22.04"));
        assert_eq!(release.id.as_deref(), Some("ubuntu"));
    }
}
