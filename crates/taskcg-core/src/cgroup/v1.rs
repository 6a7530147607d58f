//! Cpuset manager for legacy hierarchies.
//!
//! Legacy cpusets live under the cpuset subsystem mount. Shared tasks all
//! join one cgroup; only reservations get their own:
//!
//! ```text
//! <cpuset mount>/nomad/
//! ├── shared/                   cpuset.cpus = shared pool
//! └── reserved/
//!     └── <task>.<alloc>/       cpuset.cpus = reservation
//! ```
//!
//! A v1 cpuset refuses tasks until `cpuset.mems` is set, so every directory
//! created here inherits it from its parent.

use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use taskcg_common::constants::{
    CPUSET_CPUS, CPUSET_EFFECTIVE_CPUS_V1, CPUSET_MEMS, RESERVED_CPUSET_DIR, SHARED_CPUSET_DIR,
};
use taskcg_common::cpuset::CpuSet;
use taskcg_common::error::{Result, TaskcgError};

use super::fs::CgroupFs;
use super::manager::{AllocCpusets, CpusetManager, CpusetManagerKind, TaskCgroupInfo, relative_to};
use super::mountinfo::join_relative;
use super::naming::ScopeId;
use super::partition::{CpuPartition, Identity};
use super::version::CgroupVersion;

/// Legacy-hierarchy [`CpusetManager`].
///
/// Partition changes are committed only after they reach the filesystem.
#[derive(Debug)]
pub struct CpusetManagerV1 {
    mount: PathBuf,
    parent: PathBuf,
    fs: Arc<dyn CgroupFs>,
    partition: Mutex<CpuPartition>,
    span: tracing::Span,
}

impl CpusetManagerV1 {
    /// Creates a manager for `parent` under the cpuset subsystem `mount`.
    #[must_use]
    pub fn new(mount: &Path, parent: &str, fs: Arc<dyn CgroupFs>) -> Self {
        let parent = join_relative(mount, parent);
        let span = tracing::info_span!("cpuset.v1", parent = %parent.display());
        Self {
            mount: mount.to_path_buf(),
            parent,
            fs,
            partition: Mutex::new(CpuPartition::default()),
            span,
        }
    }

    /// Absolute path of the parent cgroup.
    #[must_use]
    pub fn parent(&self) -> &Path {
        &self.parent
    }

    fn shared_path(&self) -> PathBuf {
        self.parent.join(SHARED_CPUSET_DIR)
    }

    fn reserved_root(&self) -> PathBuf {
        self.parent.join(RESERVED_CPUSET_DIR)
    }

    fn reserved_path(&self, id: &Identity) -> Result<PathBuf> {
        let scope = ScopeId::new(CgroupVersion::Legacy, &id.alloc_id, &id.task)?;
        Ok(self.reserved_root().join(scope.as_str()))
    }

    fn lock(&self) -> MutexGuard<'_, CpuPartition> {
        self.partition.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Creates `dir` with the memory nodes of `from` and the given cores.
    fn create_cpuset(&self, dir: &Path, from: &Path, cores: &CpuSet) -> Result<()> {
        self.fs.create_dir(dir)?;
        let mems = self.fs.read_file(from, CPUSET_MEMS)?;
        self.fs.write_file(dir, CPUSET_MEMS, mems.trim())?;
        self.fs.write_file(dir, CPUSET_CPUS, &cores.to_string())
    }

    fn write_shared_pool(&self, partition: &CpuPartition) -> Result<()> {
        let shared = partition.shared_pool();
        self.fs.write_file(&self.shared_path(), CPUSET_CPUS, &shared.to_string())?;
        tracing::debug!(shared = %shared, "shared cpuset updated");
        Ok(())
    }

    /// Creates the reserved cpusets of `admitted` and applies `next`.
    fn apply_admission(&self, next: &CpuPartition, admitted: &[Identity]) -> Result<Vec<TaskCgroupInfo>> {
        let reserved_root = self.reserved_root();
        let mut infos = Vec::with_capacity(admitted.len());
        for id in admitted {
            let (path, cpuset) = match next.reservation(id) {
                Some(cores) => {
                    let path = self.reserved_path(id)?;
                    self.create_cpuset(&path, &reserved_root, cores)?;
                    (path, cores.clone())
                }
                None => (self.shared_path(), next.shared_pool()),
            };
            infos.push(TaskCgroupInfo {
                task: id.task.clone(),
                relative_cgroup_path: relative_to(&self.mount, &path),
                cgroup_path: path,
                cpuset,
            });
        }
        self.write_shared_pool(next)?;
        Ok(infos)
    }

    /// Removes the reserved cpusets of `ids`, returning the first failure
    /// after trying all of them.
    fn remove_reserved(&self, ids: &[Identity]) -> Result<()> {
        let mut first_error = None;
        for id in ids {
            let result = self.reserved_path(id).and_then(|path| self.fs.remove_dir(&path));
            if let Err(err) = result {
                tracing::warn!(task = %id, %err, "failed to remove reserved cpuset");
                if first_error.is_none() {
                    first_error = Some(err);
                }
            }
        }
        first_error.map_or(Ok(()), Err)
    }
}

fn reserved_of(partition: &CpuPartition, alloc_id: &str) -> Vec<Identity> {
    partition
        .isolating()
        .filter(|(id, _)| id.alloc_id == alloc_id)
        .map(|(id, _)| id.clone())
        .collect()
}

impl CpusetManager for CpusetManagerV1 {
    fn kind(&self) -> CpusetManagerKind {
        CpusetManagerKind::Legacy
    }

    fn init(&self, cores: CpuSet) -> Result<()> {
        let _guard = self.span.enter();
        let mut partition = self.lock();
        self.create_cpuset(&self.parent, &self.mount, &cores)?;
        self.create_cpuset(&self.shared_path(), &self.parent, &cores)?;
        self.create_cpuset(&self.reserved_root(), &self.parent, &cores)?;
        tracing::info!(cores = %cores, "cpuset manager initialized");
        *partition = CpuPartition::new(cores);
        Ok(())
    }

    fn add_alloc(&self, alloc: &AllocCpusets) -> Result<Vec<TaskCgroupInfo>> {
        let _guard = self.span.enter();
        let mut partition = self.lock();
        let mut next = partition.clone();
        let _ = next.release(&alloc.alloc_id);
        let admitted = next.admit(alloc)?;

        let infos = match self.apply_admission(&next, &admitted) {
            Ok(infos) => infos,
            Err(err) => {
                let created: Vec<Identity> = admitted
                    .iter()
                    .filter(|id| next.reservation(id).is_some() && partition.reservation(id).is_none())
                    .cloned()
                    .collect();
                let undo = self
                    .remove_reserved(&created)
                    .and_then(|()| self.write_shared_pool(&partition));
                if let Err(undo) = undo {
                    tracing::warn!(err = %undo, "failed to roll back admission");
                }
                return Err(err);
            }
        };

        let stale = reserved_of(&partition, &alloc.alloc_id)
            .into_iter()
            .filter(|id| next.reservation(id).is_none())
            .collect::<Vec<_>>();
        *partition = next;
        if let Err(err) = self.remove_reserved(&stale) {
            tracing::warn!(alloc_id = %alloc.alloc_id, %err, "stale reserved cpusets left behind");
        }
        tracing::info!(alloc_id = %alloc.alloc_id, tasks = infos.len(), "allocation admitted");
        Ok(infos)
    }

    fn remove_alloc(&self, alloc_id: &str) -> Result<()> {
        let _guard = self.span.enter();
        let mut partition = self.lock();
        let reserved = reserved_of(&partition, alloc_id);
        let mut next = partition.clone();
        if next.release(alloc_id).is_empty() {
            return Ok(());
        }

        self.remove_reserved(&reserved)?;
        self.write_shared_pool(&next)?;
        *partition = next;
        tracing::info!(alloc_id, "allocation released");
        Ok(())
    }

    fn cgroup_path_for(&self, alloc_id: &str, task: &str) -> Result<PathBuf> {
        let id = Identity::new(alloc_id, task);
        let partition = self.lock();
        if partition.reservation(&id).is_some() {
            return self.reserved_path(&id);
        }
        if partition.contains(&id) {
            return Ok(self.shared_path());
        }
        Err(TaskcgError::NotFound {
            kind: "task cgroup",
            id: id.to_string(),
        })
    }

    fn read_assigned_cpus(&self, cgroup: &str) -> Result<CpuSet> {
        let path = if cgroup.is_empty() {
            self.parent.clone()
        } else {
            join_relative(&self.mount, cgroup)
        };
        CpuSet::parse(&self.fs.read_file(&path, CPUSET_EFFECTIVE_CPUS_V1)?)
    }
}
