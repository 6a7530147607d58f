//! Access to cgroup controller files.
//!
//! Everything that touches the cgroup filesystem goes through
//! [`CgroupFs`], so managers and the reconciler can be exercised against a
//! temporary directory or an in-memory tree instead of a live kernel.

use std::fmt;
use std::io::Write;
use std::path::Path;

use taskcg_common::constants::CPUSET_CPUS;
use taskcg_common::error::{Result, TaskcgError};

/// Read/write access to cgroup directories and their controller files.
pub trait CgroupFs: Send + Sync + fmt::Debug {
    /// Reads `file` inside the cgroup directory `cgroup`.
    ///
    /// # Errors
    ///
    /// Returns [`TaskcgError::CgroupRead`] if the file is missing or unreadable.
    fn read_file(&self, cgroup: &Path, file: &str) -> Result<String>;

    /// Replaces the contents of an existing controller file.
    ///
    /// Controller files are never created; a missing cgroup is an error.
    ///
    /// # Errors
    ///
    /// Returns [`TaskcgError::CgroupWrite`] if the file is missing or unwritable.
    fn write_file(&self, cgroup: &Path, file: &str, value: &str) -> Result<()>;

    /// Creates a cgroup directory and any missing parents. Idempotent.
    ///
    /// # Errors
    ///
    /// Returns [`TaskcgError::Io`] if the directory cannot be created.
    fn create_dir(&self, cgroup: &Path) -> Result<()>;

    /// Removes an empty cgroup directory. A missing directory is not an error.
    ///
    /// # Errors
    ///
    /// Returns [`TaskcgError::Io`] if the directory cannot be removed.
    fn remove_dir(&self, cgroup: &Path) -> Result<()>;
}

/// [`CgroupFs`] backed by the host filesystem.
#[derive(Debug, Clone, Copy, Default)]
pub struct HostFs;

impl CgroupFs for HostFs {
    fn read_file(&self, cgroup: &Path, file: &str) -> Result<String> {
        std::fs::read_to_string(cgroup.join(file)).map_err(|e| TaskcgError::CgroupRead {
            cgroup: cgroup.to_path_buf(),
            file: file.to_string(),
            source: e,
        })
    }

    fn write_file(&self, cgroup: &Path, file: &str, value: &str) -> Result<()> {
        let to_error = |e| TaskcgError::CgroupWrite {
            cgroup: cgroup.to_path_buf(),
            file: file.to_string(),
            source: e,
        };
        let mut handle = std::fs::OpenOptions::new()
            .write(true)
            .truncate(true)
            .open(cgroup.join(file))
            .map_err(to_error)?;
        handle.write_all(value.as_bytes()).map_err(to_error)
    }

    fn create_dir(&self, cgroup: &Path) -> Result<()> {
        std::fs::create_dir_all(cgroup).map_err(|e| TaskcgError::Io {
            path: cgroup.to_path_buf(),
            source: e,
        })
    }

    fn remove_dir(&self, cgroup: &Path) -> Result<()> {
        match std::fs::remove_dir(cgroup) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(TaskcgError::Io {
                path: cgroup.to_path_buf(),
                source: e,
            }),
        }
    }
}

/// Copies the `cpuset.cpus` value of `source` into `destination`.
///
/// The destination is left untouched when the source cannot be read.
///
/// # Errors
///
/// Returns a read error for the source or a write error for the destination.
pub fn copy_cpuset(fs: &dyn CgroupFs, source: &Path, destination: &Path) -> Result<()> {
    let correct = fs.read_file(source, CPUSET_CPUS)?;
    fs.write_file(destination, CPUSET_CPUS, correct.trim())?;
    tracing::trace!(
        source = %source.display(),
        destination = %destination.display(),
        cpus = correct.trim(),
        "cpuset copied"
    );
    Ok(())
}

#[cfg(test)]
pub(crate) mod testing {
    //! In-memory cgroup tree for manager tests.

    use std::collections::{BTreeMap, BTreeSet};
    use std::path::{Path, PathBuf};
    use std::sync::Mutex;

    use taskcg_common::error::{Result, TaskcgError};

    use super::CgroupFs;

    #[derive(Debug, Default)]
    struct Tree {
        dirs: BTreeSet<PathBuf>,
        files: BTreeMap<PathBuf, String>,
        denied: BTreeSet<PathBuf>,
    }

    /// Behaves like cgroupfs: files may only be written inside existing
    /// directories, and any file can be written once its directory exists.
    #[derive(Debug, Default)]
    pub(crate) struct MemFs {
        tree: Mutex<Tree>,
    }

    impl MemFs {
        pub(crate) fn set(&self, cgroup: &Path, file: &str, value: &str) {
            let mut tree = self.tree.lock().unwrap();
            for dir in cgroup.ancestors() {
                let _ = tree.dirs.insert(dir.to_path_buf());
            }
            let _ = tree.files.insert(cgroup.join(file), value.to_string());
        }

        pub(crate) fn get(&self, cgroup: &Path, file: &str) -> Option<String> {
            self.tree.lock().unwrap().files.get(&cgroup.join(file)).cloned()
        }

        pub(crate) fn has_dir(&self, cgroup: &Path) -> bool {
            self.tree.lock().unwrap().dirs.contains(cgroup)
        }

        /// Makes creating or removing `cgroup` fail with `PermissionDenied`.
        pub(crate) fn deny(&self, cgroup: &Path) {
            let _ = self.tree.lock().unwrap().denied.insert(cgroup.to_path_buf());
        }

        /// Lifts a [`deny`](Self::deny).
        pub(crate) fn allow(&self, cgroup: &Path) {
            let _ = self.tree.lock().unwrap().denied.remove(cgroup);
        }
    }

    impl CgroupFs for MemFs {
        fn read_file(&self, cgroup: &Path, file: &str) -> Result<String> {
            self.get(cgroup, file).ok_or_else(|| TaskcgError::CgroupRead {
                cgroup: cgroup.to_path_buf(),
                file: file.to_string(),
                source: std::io::ErrorKind::NotFound.into(),
            })
        }

        fn write_file(&self, cgroup: &Path, file: &str, value: &str) -> Result<()> {
            let mut tree = self.tree.lock().unwrap();
            if !tree.dirs.contains(cgroup) {
                return Err(TaskcgError::CgroupWrite {
                    cgroup: cgroup.to_path_buf(),
                    file: file.to_string(),
                    source: std::io::ErrorKind::NotFound.into(),
                });
            }
            let _ = tree.files.insert(cgroup.join(file), value.to_string());
            Ok(())
        }

        fn create_dir(&self, cgroup: &Path) -> Result<()> {
            let mut tree = self.tree.lock().unwrap();
            if tree.denied.contains(cgroup) {
                return Err(TaskcgError::Io {
                    path: cgroup.to_path_buf(),
                    source: std::io::ErrorKind::PermissionDenied.into(),
                });
            }
            for dir in cgroup.ancestors() {
                let _ = tree.dirs.insert(dir.to_path_buf());
            }
            Ok(())
        }

        fn remove_dir(&self, cgroup: &Path) -> Result<()> {
            let mut tree = self.tree.lock().unwrap();
            if tree.denied.contains(cgroup) {
                return Err(TaskcgError::Io {
                    path: cgroup.to_path_buf(),
                    source: std::io::ErrorKind::PermissionDenied.into(),
                });
            }
            let _ = tree.dirs.remove(cgroup);
            tree.files.retain(|path, _| !path.starts_with(cgroup));
            Ok(())
        }
    }
}
