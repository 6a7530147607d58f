//! Cpuset manager for the unified hierarchy.
//!
//! Every task gets a scope under the parent slice:
//!
//! ```text
//! /sys/fs/cgroup/nomad.slice/
//! ├── <alloc>.<task>.scope      cpuset.cpus = reservation
//! └── <alloc>.<task>.scope      cpuset.cpus = shared pool
//! ```

use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use taskcg_common::constants::{CGROUP_SUBTREE_CONTROL, CPUSET_CPUS, CPUSET_CPUS_EFFECTIVE};
use taskcg_common::cpuset::CpuSet;
use taskcg_common::error::{Result, TaskcgError};

use super::fs::CgroupFs;
use super::manager::{AllocCpusets, CpusetManager, CpusetManagerKind, TaskCgroupInfo, relative_to};
use super::mountinfo::join_relative;
use super::naming::ScopeId;
use super::partition::{CpuPartition, Identity};
use super::version::CgroupVersion;

const CPUSET_CONTROLLER: &str = "+cpuset";

/// Unified-hierarchy [`CpusetManager`].
///
/// Partition changes are committed only after they reach the filesystem;
/// a failed admission or release leaves the previous state in place.
#[derive(Debug)]
pub struct CpusetManagerV2 {
    root: PathBuf,
    parent: PathBuf,
    fs: Arc<dyn CgroupFs>,
    partition: Mutex<CpuPartition>,
    span: tracing::Span,
}

impl CpusetManagerV2 {
    /// Creates a manager for `parent` (relative to `root`).
    #[must_use]
    pub fn new(root: &Path, parent: &str, fs: Arc<dyn CgroupFs>) -> Self {
        let parent = join_relative(root, parent);
        let span = tracing::info_span!("cpuset.v2", parent = %parent.display());
        Self {
            root: root.to_path_buf(),
            parent,
            fs,
            partition: Mutex::new(CpuPartition::default()),
            span,
        }
    }

    /// Absolute path of the parent slice.
    #[must_use]
    pub fn parent(&self) -> &Path {
        &self.parent
    }

    fn lock(&self) -> MutexGuard<'_, CpuPartition> {
        self.partition.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn scope_path(&self, id: &Identity) -> Result<PathBuf> {
        let scope = ScopeId::new(CgroupVersion::Unified, &id.alloc_id, &id.task)?;
        Ok(self.parent.join(scope.as_str()))
    }

    /// Turns the cpuset controller on for every level from the root down to
    /// the parent, so the parent and its scopes get `cpuset.cpus`.
    fn enable_cpuset(&self) -> Result<()> {
        let relative = self.parent.strip_prefix(&self.root).unwrap_or_else(|_| Path::new(""));
        let mut dir = self.root.clone();
        self.fs.write_file(&dir, CGROUP_SUBTREE_CONTROL, CPUSET_CONTROLLER)?;
        for component in relative.components() {
            dir.push(component);
            self.fs.write_file(&dir, CGROUP_SUBTREE_CONTROL, CPUSET_CONTROLLER)?;
        }
        Ok(())
    }

    /// Writes every admitted task's assignment.
    fn reconcile(&self, partition: &CpuPartition) -> Result<()> {
        for (id, cores) in partition.isolating() {
            self.fs.write_file(&self.scope_path(id)?, CPUSET_CPUS, &cores.to_string())?;
        }
        let shared = partition.shared_pool().to_string();
        for id in partition.sharing() {
            self.fs.write_file(&self.scope_path(id)?, CPUSET_CPUS, &shared)?;
        }
        tracing::debug!(shared = %shared, "cpuset partition applied");
        Ok(())
    }

    /// Creates the scopes of `admitted` and applies `next`.
    fn apply_admission(&self, next: &CpuPartition, admitted: &[Identity]) -> Result<Vec<TaskCgroupInfo>> {
        self.enable_cpuset()?;
        let mut infos = Vec::with_capacity(admitted.len());
        for id in admitted {
            let path = self.scope_path(id)?;
            self.fs.create_dir(&path)?;
            infos.push(TaskCgroupInfo {
                task: id.task.clone(),
                relative_cgroup_path: relative_to(&self.root, &path),
                cgroup_path: path,
                cpuset: next.assignment(id).unwrap_or_default(),
            });
        }
        self.reconcile(next)?;
        Ok(infos)
    }

    /// Best-effort undo of a failed admission: drops scopes created for it
    /// and rewrites the committed partition.
    fn roll_back(&self, committed: &CpuPartition, previous: &[Identity], admitted: &[Identity]) {
        let created: Vec<Identity> = admitted.iter().filter(|id| !previous.contains(id)).cloned().collect();
        if let Err(err) = self.remove_scopes(&created).and_then(|()| self.reconcile(committed)) {
            tracing::warn!(%err, "failed to roll back admission");
        }
    }

    /// Removes the scopes of `ids`, returning the first failure after
    /// trying all of them.
    fn remove_scopes(&self, ids: &[Identity]) -> Result<()> {
        let mut first_error = None;
        for id in ids {
            let result = self.scope_path(id).and_then(|path| self.fs.remove_dir(&path));
            if let Err(err) = result {
                tracing::warn!(task = %id, %err, "failed to remove task cgroup");
                if first_error.is_none() {
                    first_error = Some(err);
                }
            }
        }
        first_error.map_or(Ok(()), Err)
    }
}

impl CpusetManager for CpusetManagerV2 {
    fn kind(&self) -> CpusetManagerKind {
        CpusetManagerKind::Unified
    }

    fn init(&self, cores: CpuSet) -> Result<()> {
        let _guard = self.span.enter();
        let mut partition = self.lock();
        self.fs.create_dir(&self.parent)?;
        self.enable_cpuset()?;
        self.fs.write_file(&self.parent, CPUSET_CPUS, &cores.to_string())?;
        tracing::info!(cores = %cores, "cpuset manager initialized");
        *partition = CpuPartition::new(cores);
        Ok(())
    }

    fn add_alloc(&self, alloc: &AllocCpusets) -> Result<Vec<TaskCgroupInfo>> {
        let _guard = self.span.enter();
        let mut partition = self.lock();
        let mut next = partition.clone();
        let previous = next.release(&alloc.alloc_id);
        let admitted = next.admit(alloc)?;

        let infos = match self.apply_admission(&next, &admitted) {
            Ok(infos) => infos,
            Err(err) => {
                self.roll_back(&partition, &previous, &admitted);
                return Err(err);
            }
        };
        *partition = next;

        let stale: Vec<Identity> = previous.into_iter().filter(|id| !admitted.contains(id)).collect();
        if let Err(err) = self.remove_scopes(&stale) {
            tracing::warn!(alloc_id = %alloc.alloc_id, %err, "stale task cgroups left behind");
        }
        tracing::info!(alloc_id = %alloc.alloc_id, tasks = infos.len(), "allocation admitted");
        Ok(infos)
    }

    fn remove_alloc(&self, alloc_id: &str) -> Result<()> {
        let _guard = self.span.enter();
        let mut partition = self.lock();
        let mut next = partition.clone();
        let removed = next.release(alloc_id);
        if removed.is_empty() {
            return Ok(());
        }

        self.remove_scopes(&removed)?;
        self.reconcile(&next)?;
        *partition = next;
        tracing::info!(alloc_id, "allocation released");
        Ok(())
    }

    fn cgroup_path_for(&self, alloc_id: &str, task: &str) -> Result<PathBuf> {
        let id = Identity::new(alloc_id, task);
        if !self.lock().contains(&id) {
            return Err(TaskcgError::NotFound {
                kind: "task cgroup",
                id: id.to_string(),
            });
        }
        self.scope_path(&id)
    }

    fn read_assigned_cpus(&self, cgroup: &str) -> Result<CpuSet> {
        let path = if cgroup.is_empty() {
            self.parent.clone()
        } else {
            join_relative(&self.root, cgroup)
        };
        CpuSet::parse(&self.fs.read_file(&path, CPUSET_CPUS_EFFECTIVE)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cgroup::fs::testing::MemFs;

    fn cpus(s: &str) -> CpuSet {
        CpuSet::parse(s).unwrap()
    }

    fn manager() -> (Arc<MemFs>, CpusetManagerV2) {
        let fs = Arc::new(MemFs::default());
        let m = CpusetManagerV2::new(Path::new("/sys/fs/cgroup"), "nomad.slice", fs.clone());
        m.init(cpus("0-7")).unwrap();
        (fs, m)
    }

    fn scope_cpus(fs: &MemFs, scope: &str) -> Option<String> {
        fs.get(&Path::new("/sys/fs/cgroup/nomad.slice").join(scope), CPUSET_CPUS)
    }

    #[test]
    fn init_writes_parent_cpuset() {
        let (fs, m) = manager();
        assert_eq!(m.parent(), Path::new("/sys/fs/cgroup/nomad.slice"));
        assert_eq!(fs.get(m.parent(), CPUSET_CPUS).as_deref(), Some("0-7"));
    }

    #[test]
    fn admission_writes_reservation_and_shared_pool() {
        let (fs, m) = manager();
        let _ = m.add_alloc(&AllocCpusets::new("a1").shared_task("web")).unwrap();
        let infos = m
            .add_alloc(&AllocCpusets::new("a2").reserved_task("db", cpus("6-7")))
            .unwrap();

        assert_eq!(infos[0].cgroup_path, PathBuf::from("/sys/fs/cgroup/nomad.slice/a2.db.scope"));
        assert_eq!(infos[0].relative_cgroup_path, PathBuf::from("/nomad.slice/a2.db.scope"));
        assert_eq!(scope_cpus(&fs, "a2.db.scope").as_deref(), Some("6-7"));
        assert_eq!(scope_cpus(&fs, "a1.web.scope").as_deref(), Some("0-5"));
    }

    #[test]
    fn release_returns_cores_to_shared_pool() {
        let (fs, m) = manager();
        let _ = m.add_alloc(&AllocCpusets::new("a1").shared_task("web")).unwrap();
        let _ = m.add_alloc(&AllocCpusets::new("a2").reserved_task("db", cpus("4-7"))).unwrap();
        m.remove_alloc("a2").unwrap();

        assert!(!fs.has_dir(Path::new("/sys/fs/cgroup/nomad.slice/a2.db.scope")));
        assert_eq!(scope_cpus(&fs, "a1.web.scope").as_deref(), Some("0-7"));
        assert!(m.cgroup_path_for("a2", "db").is_err());
    }

    #[test]
    fn conflicting_admission_surfaces_error() {
        let (_fs, m) = manager();
        let _ = m.add_alloc(&AllocCpusets::new("a1").reserved_task("db", cpus("0-3"))).unwrap();
        let err = m
            .add_alloc(&AllocCpusets::new("a2").reserved_task("db", cpus("3")))
            .unwrap_err();
        assert!(matches!(err, TaskcgError::CpusetConflict { .. }));
    }

    #[test]
    fn cgroup_path_for_admitted_task() {
        let (_fs, m) = manager();
        let _ = m.add_alloc(&AllocCpusets::new("a1").shared_task("web")).unwrap();
        assert_eq!(
            m.cgroup_path_for("a1", "web").unwrap(),
            PathBuf::from("/sys/fs/cgroup/nomad.slice/a1.web.scope")
        );
    }

    #[test]
    fn read_assigned_cpus_uses_effective_file() {
        let (fs, m) = manager();
        fs.set(
            Path::new("/sys/fs/cgroup/nomad.slice/a1.web.scope"),
            CPUSET_CPUS_EFFECTIVE,
            "0-3\n",
        );
        assert_eq!(m.read_assigned_cpus("nomad.slice/a1.web.scope").unwrap().to_vec(), vec![0, 1, 2, 3]);
    }

    #[test]
    fn read_assigned_cpus_missing_cgroup_is_read_error() {
        let (_fs, m) = manager();
        let err = m.read_assigned_cpus("nomad.slice/missing.scope").unwrap_err();
        assert!(matches!(err, TaskcgError::CgroupRead { .. }));
    }

    #[test]
    fn admission_before_init_is_rejected() {
        let fs = Arc::new(MemFs::default());
        let m = CpusetManagerV2::new(Path::new("/sys/fs/cgroup"), "nomad.slice", fs);
        let err = m.add_alloc(&AllocCpusets::new("a1").shared_task("web")).unwrap_err();
        assert!(matches!(err, TaskcgError::CpusetConflict { .. }));
    }

    #[test]
    fn init_enables_cpuset_controller_down_to_parent() {
        let (fs, _m) = manager();
        assert_eq!(
            fs.get(Path::new("/sys/fs/cgroup"), CGROUP_SUBTREE_CONTROL).as_deref(),
            Some("+cpuset")
        );
        assert_eq!(
            fs.get(Path::new("/sys/fs/cgroup/nomad.slice"), CGROUP_SUBTREE_CONTROL).as_deref(),
            Some("+cpuset")
        );
    }

    #[test]
    fn nested_parent_enables_every_level() {
        let fs = Arc::new(MemFs::default());
        let m = CpusetManagerV2::new(Path::new("/sys/fs/cgroup"), "nomad.slice/batch", fs.clone());
        m.init(cpus("0-3")).unwrap();
        for dir in ["/sys/fs/cgroup", "/sys/fs/cgroup/nomad.slice", "/sys/fs/cgroup/nomad.slice/batch"] {
            assert_eq!(fs.get(Path::new(dir), CGROUP_SUBTREE_CONTROL).as_deref(), Some("+cpuset"), "{dir}");
        }
    }

    #[test]
    fn failed_scope_creation_leaves_no_reservation() {
        let (fs, m) = manager();
        let _ = m.add_alloc(&AllocCpusets::new("a0").shared_task("web")).unwrap();
        fs.deny(Path::new("/sys/fs/cgroup/nomad.slice/a1.db.scope"));

        let err = m
            .add_alloc(&AllocCpusets::new("a1").shared_task("log").reserved_task("db", cpus("4-7")))
            .unwrap_err();
        assert!(matches!(err, TaskcgError::Io { .. }));
        assert!(m.cgroup_path_for("a1", "db").is_err());
        assert!(m.cgroup_path_for("a1", "log").is_err());
        assert!(!fs.has_dir(Path::new("/sys/fs/cgroup/nomad.slice/a1.log.scope")));
        assert_eq!(scope_cpus(&fs, "a0.web.scope").as_deref(), Some("0-7"));

        // The cores the failed admission asked for are still free.
        let _ = m.add_alloc(&AllocCpusets::new("a2").reserved_task("x", cpus("4"))).unwrap();
        assert_eq!(scope_cpus(&fs, "a2.x.scope").as_deref(), Some("4"));
        assert_eq!(scope_cpus(&fs, "a0.web.scope").as_deref(), Some("0-3,5-7"));
    }

    #[test]
    fn failed_release_can_be_retried() {
        let (fs, m) = manager();
        let _ = m.add_alloc(&AllocCpusets::new("a0").shared_task("web")).unwrap();
        let _ = m.add_alloc(&AllocCpusets::new("a1").reserved_task("db", cpus("6-7"))).unwrap();
        let db = Path::new("/sys/fs/cgroup/nomad.slice/a1.db.scope");
        fs.deny(db);

        assert!(m.remove_alloc("a1").is_err());
        assert!(m.cgroup_path_for("a1", "db").is_ok());
        assert_eq!(scope_cpus(&fs, "a0.web.scope").as_deref(), Some("0-5"));

        fs.allow(db);
        m.remove_alloc("a1").unwrap();
        assert!(!fs.has_dir(db));
        assert!(m.cgroup_path_for("a1", "db").is_err());
        assert_eq!(scope_cpus(&fs, "a0.web.scope").as_deref(), Some("0-7"));
    }

    #[test]
    fn readmission_removes_dropped_task_scopes() {
        let (fs, m) = manager();
        let _ = m
            .add_alloc(&AllocCpusets::new("a1").shared_task("web").reserved_task("db", cpus("6-7")))
            .unwrap();
        let _ = m.add_alloc(&AllocCpusets::new("a1").shared_task("web")).unwrap();

        assert!(!fs.has_dir(Path::new("/sys/fs/cgroup/nomad.slice/a1.db.scope")));
        assert!(fs.has_dir(Path::new("/sys/fs/cgroup/nomad.slice/a1.web.scope")));
        assert_eq!(scope_cpus(&fs, "a1.web.scope").as_deref(), Some("0-7"));
    }
}
