//! Discovery of the latest fsimage snapshot file.
//!
//! The storage master drops versioned snapshot files named
//! `fsimage_<txid>` into a directory, replacing older generations over time.
//! [`SnapshotWatcher`] finds the newest generation; whether it needs reloading
//! is decided by the update coordinator.

mod error;

pub use error::Error;

use std::path::{Path, PathBuf};

/// Fixed name prefix of snapshot files.
pub const SNAPSHOT_FILE_PREFIX: &str = "fsimage_";

/// Whether a file name follows the `fsimage_<txid>` convention.
pub(crate) fn is_snapshot_file_name(name: &str) -> bool {
    name.strip_prefix(SNAPSHOT_FILE_PREFIX)
        .is_some_and(|suffix| !suffix.is_empty() && suffix.bytes().all(|b| b.is_ascii_digit()))
}

/// Watches a directory for fsimage snapshot files.
#[derive(Debug)]
pub struct SnapshotWatcher {
    dir: PathBuf,
}

impl SnapshotWatcher {
    /// Creates a watcher over `dir`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::DirectoryMissing`] if `dir` is not an existing
    /// directory.
    pub fn new(dir: impl Into<PathBuf>) -> Result<Self, Error> {
        let dir = dir.into();
        if !dir.is_dir() {
            return Err(Error::DirectoryMissing { path: dir });
        }
        Ok(Self { dir })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Finds the latest snapshot file in the watched directory.
    ///
    /// "Latest" is the lexicographically greatest matching name. Transaction
    /// id suffixes grow monotonically, so string order matches numeric order
    /// for the equal-width names the master produces.
    ///
    /// # Errors
    ///
    /// - [`Error::ReadDir`] if the directory cannot be listed.
    /// - [`Error::NoSnapshots`] if nothing matches the naming convention.
    pub fn find_latest(&self) -> Result<PathBuf, Error> {
        let entries = std::fs::read_dir(&self.dir).map_err(|source| Error::ReadDir {
            path: self.dir.clone(),
            source,
        })?;

        let mut latest: Option<String> = None;
        for entry in entries {
            let entry = entry.map_err(|source| Error::ReadDir {
                path: self.dir.clone(),
                source,
            })?;
            let name = entry.file_name();
            let Some(name) = name.to_str() else {
                continue;
            };
            if !is_snapshot_file_name(name) {
                continue;
            }
            if latest.as_deref().is_none_or(|current| name > current) {
                latest = Some(name.to_owned());
            }
        }

        match latest {
            Some(name) => Ok(self.dir.join(name)),
            None => Err(Error::NoSnapshots {
                path: self.dir.clone(),
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs::File;

    fn touch(dir: &Path, name: &str) {
        File::create(dir.join(name)).unwrap();
    }

    #[test]
    fn test_snapshot_file_name_filter() {
        assert!(is_snapshot_file_name("fsimage_0000000000000000001"));
        assert!(is_snapshot_file_name("fsimage_42"));
        assert!(!is_snapshot_file_name("fsimage_"));
        assert!(!is_snapshot_file_name("fsimage_42.md5"));
        assert!(!is_snapshot_file_name("edits_0000001"));
        assert!(!is_snapshot_file_name("fsimage"));
    }

    #[test]
    fn test_missing_directory_is_fatal() {
        let err = SnapshotWatcher::new("/definitely/does/not/exist").unwrap_err();
        match err {
            Error::DirectoryMissing { path } => {
                assert_eq!(path, PathBuf::from("/definitely/does/not/exist"));
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_find_latest_picks_greatest_name() {
        let dir = tempfile::tempdir().unwrap();
        touch(dir.path(), "fsimage_0000000000000000100");
        touch(dir.path(), "fsimage_0000000000000000250");
        touch(dir.path(), "fsimage_0000000000000000099");
        touch(dir.path(), "fsimage_0000000000000000250.md5");
        touch(dir.path(), "edits_inprogress_0000251");

        let watcher = SnapshotWatcher::new(dir.path()).unwrap();
        let latest = watcher.find_latest().unwrap();
        assert_eq!(
            latest,
            dir.path().join("fsimage_0000000000000000250")
        );
    }

    #[test]
    fn test_find_latest_without_snapshots() {
        let dir = tempfile::tempdir().unwrap();
        touch(dir.path(), "README");

        let watcher = SnapshotWatcher::new(dir.path()).unwrap();
        let err = watcher.find_latest().unwrap_err();
        assert!(matches!(err, Error::NoSnapshots { .. }));
    }
}
