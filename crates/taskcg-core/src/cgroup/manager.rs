//! The cpuset manager capability and its admission types.

use std::fmt;
use std::path::{Path, PathBuf};

use taskcg_common::cpuset::CpuSet;
use taskcg_common::error::Result;

/// Cores requested by one task of an allocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TaskCpus {
    /// Task name within the allocation.
    pub name: String,
    /// Exclusively reserved cores; empty places the task in the shared pool.
    pub reserved: CpuSet,
}

/// Admission request for one allocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AllocCpusets {
    /// Allocation ID.
    pub alloc_id: String,
    /// Tasks of the allocation.
    pub tasks: Vec<TaskCpus>,
}

impl AllocCpusets {
    /// Starts a request with no tasks.
    #[must_use]
    pub fn new(alloc_id: impl Into<String>) -> Self {
        Self {
            alloc_id: alloc_id.into(),
            tasks: Vec::new(),
        }
    }

    /// Adds a task that runs on the shared pool.
    #[must_use]
    pub fn shared_task(mut self, name: impl Into<String>) -> Self {
        self.tasks.push(TaskCpus {
            name: name.into(),
            reserved: CpuSet::new(),
        });
        self
    }

    /// Adds a task with exclusively reserved cores.
    #[must_use]
    pub fn reserved_task(mut self, name: impl Into<String>, cores: CpuSet) -> Self {
        self.tasks.push(TaskCpus {
            name: name.into(),
            reserved: cores,
        });
        self
    }
}

/// Where an admitted task's cgroup lives and what it may run on.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TaskCgroupInfo {
    /// Task name.
    pub task: String,
    /// Absolute cgroup directory.
    pub cgroup_path: PathBuf,
    /// Cgroup directory relative to the hierarchy mount.
    pub relative_cgroup_path: PathBuf,
    /// Cores written to the cgroup's `cpuset.cpus`.
    pub cpuset: CpuSet,
}

/// Which implementation a manager is.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CpusetManagerKind {
    /// cgroups v2 slice/scope layout.
    Unified,
    /// cgroups v1 shared/reserved layout.
    Legacy,
    /// Hosts without cgroups.
    Noop,
}

/// Owns the node's exclusive/shared CPU partition.
///
/// Every change that fails to reach the cgroup filesystem is returned to
/// the caller.
pub trait CpusetManager: Send + Sync + fmt::Debug {
    /// Which implementation this is.
    fn kind(&self) -> CpusetManagerKind;

    /// Sets the node's usable cores and creates the parent hierarchy.
    ///
    /// # Errors
    ///
    /// Returns an error if the parent cgroups cannot be created or written.
    fn init(&self, cores: CpuSet) -> Result<()>;

    /// Admits an allocation, reserving cores for tasks that ask for them.
    ///
    /// Re-admitting an allocation replaces its previous assignment.
    ///
    /// # Errors
    ///
    /// Returns an error if a reservation conflicts with the partition or a
    /// cgroup cannot be created or written.
    fn add_alloc(&self, alloc: &AllocCpusets) -> Result<Vec<TaskCgroupInfo>>;

    /// Releases an allocation's cores back to the shared pool.
    ///
    /// # Errors
    ///
    /// Returns an error if task cgroups cannot be removed or the shared pool
    /// cannot be rewritten.
    fn remove_alloc(&self, alloc_id: &str) -> Result<()>;

    /// Absolute cgroup path of an admitted task.
    ///
    /// # Errors
    ///
    /// Returns an error if the task was never admitted.
    fn cgroup_path_for(&self, alloc_id: &str, task: &str) -> Result<PathBuf>;

    /// Reads the CPUs the kernel currently grants `cgroup`, a path relative
    /// to the hierarchy mount; empty reads the manager's parent.
    ///
    /// # Errors
    ///
    /// Returns a read error if the cgroup or its controller file is absent.
    fn read_assigned_cpus(&self, cgroup: &str) -> Result<CpuSet>;
}

/// Manager for hosts without cgroups. Admits everything and writes nothing.
#[derive(Debug, Default)]
pub struct NoopCpusetManager;

impl CpusetManager for NoopCpusetManager {
    fn kind(&self) -> CpusetManagerKind {
        CpusetManagerKind::Noop
    }

    fn init(&self, _cores: CpuSet) -> Result<()> {
        Ok(())
    }

    fn add_alloc(&self, _alloc: &AllocCpusets) -> Result<Vec<TaskCgroupInfo>> {
        Ok(Vec::new())
    }

    fn remove_alloc(&self, _alloc_id: &str) -> Result<()> {
        Ok(())
    }

    fn cgroup_path_for(&self, _alloc_id: &str, _task: &str) -> Result<PathBuf> {
        Ok(PathBuf::new())
    }

    fn read_assigned_cpus(&self, _cgroup: &str) -> Result<CpuSet> {
        Ok(CpuSet::new())
    }
}

/// Strips `mount` from `path`, for [`TaskCgroupInfo::relative_cgroup_path`].
pub(crate) fn relative_to(mount: &Path, path: &Path) -> PathBuf {
    path.strip_prefix(mount)
        .map_or_else(|_| path.to_path_buf(), |p| Path::new("/").join(p))
}
