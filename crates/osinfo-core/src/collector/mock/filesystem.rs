//! In-memory mock filesystem for testing probes without a real host.
//!
//! `MockFs` simulates a filesystem in memory so probe tests can run on any
//! platform and in CI without touching `/proc`, `/etc` or `/sys`.

use crate::collector::traits::{FileMeta, FileSystem};
use std::collections::{HashMap, HashSet};
use std::io;
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

/// Modification time reported for files added without an explicit one
/// (2023-11-14T22:13:20Z).
const DEFAULT_MTIME_SECS: u64 = 1_700_000_000;

/// In-memory filesystem for testing.
///
/// Stores files and directories in memory. Cloning is cheap enough for tests
/// and gives each probe its own view.
#[derive(Debug, Clone, Default)]
pub struct MockFs {
    /// Map from path to file contents.
    files: HashMap<PathBuf, String>,
    /// Set of directories (for read_dir support).
    directories: HashSet<PathBuf>,
    /// Explicit modification times, keyed by file path.
    mtimes: HashMap<PathBuf, SystemTime>,
}

impl MockFs {
    /// Creates a new empty mock filesystem.
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a file with the given content.
    ///
    /// Parent directories are automatically created.
    pub fn add_file(&mut self, path: impl AsRef<Path>, content: impl Into<String>) {
        let path = path.as_ref().to_path_buf();
        self.add_parents(&path);
        self.files.insert(path, content.into());
    }

    /// Adds an empty directory.
    pub fn add_dir(&mut self, path: impl AsRef<Path>) {
        let path = path.as_ref().to_path_buf();
        self.add_parents(&path);
        self.directories.insert(path);
    }

    /// Overrides the modification time of an existing file.
    pub fn set_modified(&mut self, path: impl AsRef<Path>, secs_since_epoch: u64) {
        self.mtimes.insert(
            path.as_ref().to_path_buf(),
            UNIX_EPOCH + Duration::from_secs(secs_since_epoch),
        );
    }

    /// Removes a file or a whole directory subtree.
    pub fn remove(&mut self, path: impl AsRef<Path>) {
        let path = path.as_ref();
        self.files.retain(|p, _| !p.starts_with(path));
        self.directories.retain(|p| !p.starts_with(path));
        self.mtimes.retain(|p, _| !p.starts_with(path));
    }

    /// Adds a process with the `/proc/[pid]/` files probes look at.
    ///
    /// # Arguments
    /// * `pid` - Process ID
    /// * `name` - Value of the `Name:` line in `/proc/[pid]/status`
    /// * `uid` - Real UID reported on the `Uid:` line
    pub fn add_process(&mut self, pid: u32, name: &str, uid: u32) {
        let base = PathBuf::from(format!("/proc/{}", pid));
        self.add_dir(&base);
        self.add_file(
            base.join("status"),
            format!(
                "Name:\t{name}\nUmask:\t0022\nState:\tS (sleeping)\nTgid:\t{pid}\nPid:\t{pid}\nPPid:\t1\nUid:\t{uid}\t{uid}\t{uid}\t{uid}\nGid:\t{uid}\t{uid}\t{uid}\t{uid}\n"
            ),
        );
        self.add_file(base.join("comm"), format!("{name}\n"));
    }

    /// Removes a process, as if it exited between two scans.
    pub fn remove_process(&mut self, pid: u32) {
        self.remove(format!("/proc/{}", pid));
    }

    fn add_parents(&mut self, path: &Path) {
        let mut parent = path.parent();
        while let Some(p) = parent {
            if !p.as_os_str().is_empty() {
                self.directories.insert(p.to_path_buf());
            }
            parent = p.parent();
        }
    }
}

impl FileSystem for MockFs {
    fn read_to_string(&self, path: &Path) -> io::Result<String> {
        self.files.get(path).cloned().ok_or_else(|| {
            io::Error::new(
                io::ErrorKind::NotFound,
                format!("file not found: {:?}", path),
            )
        })
    }

    fn exists(&self, path: &Path) -> bool {
        self.files.contains_key(path) || self.directories.contains(path)
    }

    fn read_dir(&self, path: &Path) -> io::Result<Vec<PathBuf>> {
        if !self.directories.contains(path) {
            return Err(io::Error::new(
                io::ErrorKind::NotFound,
                format!("directory not found: {:?}", path),
            ));
        }

        let mut entries = HashSet::new();

        for file_path in self.files.keys() {
            if file_path.parent().is_some_and(|parent| parent == path) {
                entries.insert(file_path.clone());
            }
        }

        for dir_path in &self.directories {
            if dir_path.parent().is_some_and(|parent| parent == path) && dir_path != path {
                entries.insert(dir_path.clone());
            }
        }

        Ok(entries.into_iter().collect())
    }

    fn metadata(&self, path: &Path) -> io::Result<FileMeta> {
        if let Some(content) = self.files.get(path) {
            let modified = self
                .mtimes
                .get(path)
                .copied()
                .unwrap_or(UNIX_EPOCH + Duration::from_secs(DEFAULT_MTIME_SECS));
            return Ok(FileMeta {
                is_dir: false,
                len: content.len() as u64,
                modified,
            });
        }
        if self.directories.contains(path) {
            return Ok(FileMeta {
                is_dir: true,
                len: 0,
                modified: UNIX_EPOCH + Duration::from_secs(DEFAULT_MTIME_SECS),
            });
        }
        Err(io::Error::new(
            io::ErrorKind::NotFound,
            format!("path not found: {:?}", path),
        ))
    }
}
