//! Cgroup management across legacy and unified hierarchies.
//!
//! [`CgroupHost`] carries the host's detected [`CgroupVersion`] together with
//! the mount root, mount table, and filesystem access, so every
//! version-dependent decision is made from one explicitly passed value.

pub mod basic;
pub mod fs;
pub mod manager;
pub mod mountinfo;
pub mod naming;
pub mod partition;
pub mod v1;
pub mod v2;
pub mod version;

use std::path::{Path, PathBuf};
use std::sync::Arc;

use taskcg_common::config::DriverConfig;
use taskcg_common::constants::{
    CGROUP_ROOT, CPUSET_CPUS_EFFECTIVE, CPUSET_EFFECTIVE_CPUS_V1, CPUSET_SUBSYSTEM, MOUNTINFO_PATH,
};
use taskcg_common::cpuset::CpuSet;
use taskcg_common::error::{Result, TaskcgError};

pub use basic::RuntimeCgroupConfig;
pub use fs::{CgroupFs, HostFs, copy_cpuset};
pub use manager::{
    AllocCpusets, CpusetManager, CpusetManagerKind, NoopCpusetManager, TaskCgroupInfo, TaskCpus,
};
pub use naming::{ScopeId, docker_scope, effective_parent, scope_id};
pub use version::CgroupVersion;

/// The host's cgroup layout.
#[derive(Debug, Clone)]
pub struct CgroupHost {
    version: CgroupVersion,
    root: PathBuf,
    mountinfo: PathBuf,
    fs: Arc<dyn CgroupFs>,
}

impl CgroupHost {
    /// Describes a host with a known version and mount root.
    #[must_use]
    pub fn new(version: CgroupVersion, root: impl Into<PathBuf>) -> Self {
        Self {
            version,
            root: root.into(),
            mountinfo: PathBuf::from(MOUNTINFO_PATH),
            fs: Arc::new(HostFs),
        }
    }

    /// Describes the running host at the canonical mount root.
    #[must_use]
    pub fn detect() -> Self {
        Self::new(CgroupVersion::detect(), CGROUP_ROOT)
    }

    /// Describes the running host using the paths from `config`.
    #[must_use]
    pub fn from_config(config: &DriverConfig) -> Self {
        Self::new(CgroupVersion::detect(), config.cgroup_root.clone())
            .with_mountinfo(config.mountinfo.clone())
    }

    /// Replaces the mount table location.
    #[must_use]
    pub fn with_mountinfo(mut self, path: impl Into<PathBuf>) -> Self {
        self.mountinfo = path.into();
        self
    }

    /// Replaces filesystem access.
    #[must_use]
    pub fn with_fs(mut self, fs: Arc<dyn CgroupFs>) -> Self {
        self.fs = fs;
        self
    }

    /// The detected cgroup mode.
    #[must_use]
    pub const fn version(&self) -> CgroupVersion {
        self.version
    }

    /// The cgroup mount root.
    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Filesystem access shared with managers and the reconciler.
    #[must_use]
    pub fn fs(&self) -> &Arc<dyn CgroupFs> {
        &self.fs
    }

    /// See [`naming::effective_parent`].
    #[must_use]
    pub fn effective_parent(&self, configured: &str) -> String {
        effective_parent(self.version, configured)
    }

    /// See [`ScopeId::new`].
    ///
    /// # Errors
    ///
    /// Returns an error if either part is empty.
    pub fn scope_id(&self, alloc_id: &str, task: &str) -> Result<ScopeId> {
        ScopeId::new(self.version, alloc_id, task)
    }

    /// Reads and parses the mount table.
    ///
    /// # Errors
    ///
    /// Returns an error if the mount table cannot be read.
    pub fn mounts(&self) -> Result<Vec<mountinfo::MountEntry>> {
        let content = std::fs::read_to_string(&self.mountinfo).map_err(|e| TaskcgError::Io {
            path: self.mountinfo.clone(),
            source: e,
        })?;
        Ok(mountinfo::parse(&content))
    }

    /// Mountpoint of a legacy subsystem hierarchy.
    ///
    /// # Errors
    ///
    /// Returns an error if the mount table is unreadable or the subsystem
    /// is not mounted.
    pub fn subsystem_mountpoint(&self, subsystem: &str) -> Result<PathBuf> {
        let entries = self.mounts()?;
        mountinfo::find_subsystem(&entries, subsystem)
            .map(|e| e.mount_point.clone())
            .ok_or_else(|| TaskcgError::MountpointNotFound {
                subsystem: subsystem.to_string(),
            })
    }

    /// Mountpoint of the first cgroup hierarchy, `None` when nothing is mounted.
    ///
    /// # Errors
    ///
    /// Returns an error if the mount table cannot be read.
    pub fn find_cgroup_mountpoint_dir(&self) -> Result<Option<PathBuf>> {
        Ok(mountinfo::first_cgroup_mountpoint(&self.mounts()?))
    }

    /// Builds the cpuset manager matching this host.
    ///
    /// # Errors
    ///
    /// Returns an error if a legacy host has no cpuset hierarchy mounted.
    #[cfg(target_os = "linux")]
    pub fn cpuset_manager(&self, parent: &str) -> Result<Arc<dyn CpusetManager>> {
        let parent = self.effective_parent(parent);
        let manager: Arc<dyn CpusetManager> = match self.version {
            CgroupVersion::Unified => {
                Arc::new(v2::CpusetManagerV2::new(&self.root, &parent, Arc::clone(&self.fs)))
            }
            CgroupVersion::Legacy => {
                let mount = self.subsystem_mountpoint(CPUSET_SUBSYSTEM)?;
                Arc::new(v1::CpusetManagerV1::new(&mount, &parent, Arc::clone(&self.fs)))
            }
        };
        tracing::debug!(version = %self.version, parent, "cpuset manager created");
        Ok(manager)
    }

    /// Hosts without cgroups get a manager that does nothing.
    ///
    /// # Errors
    ///
    /// Never fails on non-Linux hosts.
    #[cfg(not(target_os = "linux"))]
    pub fn cpuset_manager(&self, _parent: &str) -> Result<Arc<dyn CpusetManager>> {
        Ok(Arc::new(NoopCpusetManager))
    }

    /// Reads the CPUs granted to `group` without a manager, e.g. to learn
    /// the node's usable cores before [`CpusetManager::init`]. An empty
    /// group reads the default parent.
    ///
    /// # Errors
    ///
    /// Returns an error if the controller file is missing or malformed.
    pub fn read_assigned_cpus(&self, group: &str) -> Result<CpuSet> {
        let group = self.effective_parent(group);
        let (dir, file) = match self.version {
            CgroupVersion::Unified => (mountinfo::join_relative(&self.root, &group), CPUSET_CPUS_EFFECTIVE),
            CgroupVersion::Legacy => {
                let mount = self.subsystem_mountpoint(CPUSET_SUBSYSTEM)?;
                (mountinfo::join_relative(&mount, &group), CPUSET_EFFECTIVE_CPUS_V1)
            }
        };
        CpuSet::parse(&self.fs.read_file(&dir, file)?)
    }
}
