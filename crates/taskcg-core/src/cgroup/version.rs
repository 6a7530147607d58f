//! Host cgroup mode detection.

use std::fmt;
use std::path::Path;
use std::sync::OnceLock;

use taskcg_common::constants::CGROUP_ROOT;

/// Which kernel cgroup API the host exposes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CgroupVersion {
    /// cgroups v1, including hybrid hosts where v2 is mounted alongside.
    Legacy,
    /// cgroups v2 only, mounted at the cgroup root.
    Unified,
}

/// `CGROUP2_SUPER_MAGIC` from `statfs(2)`.
#[cfg(target_os = "linux")]
const CGROUP2_SUPER_MAGIC: i64 = 0x6367_7270;

static DETECTED: OnceLock<CgroupVersion> = OnceLock::new();

impl CgroupVersion {
    /// Returns the host's cgroup mode, probing `/sys/fs/cgroup` on first use.
    ///
    /// The result is fixed for the rest of the process even if mounts change.
    pub fn detect() -> Self {
        *DETECTED.get_or_init(|| {
            let version = Self::probe(Path::new(CGROUP_ROOT));
            tracing::info!(%version, "detected cgroup mode");
            version
        })
    }

    /// Probes `root` without caching.
    ///
    /// Only a cgroup2 filesystem mounted directly at `root` counts as
    /// unified; hybrid layouts and probe failures resolve to legacy.
    #[cfg(target_os = "linux")]
    pub fn probe(root: &Path) -> Self {
        match nix::sys::statfs::statfs(root) {
            Ok(stat) if i64::try_from(stat.filesystem_type().0).ok() == Some(CGROUP2_SUPER_MAGIC) => {
                Self::Unified
            }
            Ok(_) => Self::Legacy,
            Err(err) => {
                tracing::debug!(root = %root.display(), %err, "cgroup root not statable, assuming legacy");
                Self::Legacy
            }
        }
    }

    /// Non-Linux hosts have no unified hierarchy.
    #[cfg(not(target_os = "linux"))]
    pub fn probe(_root: &Path) -> Self {
        Self::Legacy
    }

    /// Returns whether this is the unified hierarchy.
    #[must_use]
    pub const fn is_unified(self) -> bool {
        matches!(self, Self::Unified)
    }
}

impl fmt::Display for CgroupVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Legacy => write!(f, "v1"),
            Self::Unified => write!(f, "v2"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn detection_is_memoized() {
        let first = CgroupVersion::detect();
        for _ in 0..3 {
            assert_eq!(CgroupVersion::detect(), first);
        }
    }

    #[test]
    fn plain_directory_is_legacy() {
        let dir = tempfile::tempdir().expect("tempdir");
        assert_eq!(CgroupVersion::probe(dir.path()), CgroupVersion::Legacy);
    }

    #[test]
    fn missing_root_is_legacy() {
        let dir = tempfile::tempdir().expect("tempdir");
        assert_eq!(
            CgroupVersion::probe(&dir.path().join("absent")),
            CgroupVersion::Legacy
        );
    }

    #[test]
    fn display_uses_short_names() {
        assert_eq!(CgroupVersion::Unified.to_string(), "v2");
        assert_eq!(CgroupVersion::Legacy.to_string(), "v1");
        assert!(CgroupVersion::Unified.is_unified());
    }
}
