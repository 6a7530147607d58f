//! Cgroup side of the Docker task driver.

use std::sync::Arc;

use taskcg_common::config::DriverConfig;
use taskcg_common::error::Result;
use taskcg_core::cgroup::{CgroupHost, CpusetManager, RuntimeCgroupConfig};
use tokio_util::sync::CancellationToken;

use crate::reconcile::CpusetFixer;
use crate::tasks::{TaskHandle, TaskStore, TaskTracker};

/// Owns the driver's lifetime token, task registry, and cpuset reconciler.
#[derive(Debug)]
pub struct Driver {
    ctx: CancellationToken,
    tasks: Arc<TaskStore>,
    host: CgroupHost,
    config: DriverConfig,
    fixer: CpusetFixer,
}

impl Driver {
    /// Creates a driver for the running host.
    ///
    /// # Errors
    ///
    /// Returns an error if `config` is invalid.
    pub fn new(config: DriverConfig) -> Result<Self> {
        let host = CgroupHost::from_config(&config);
        Self::with_host(config, host)
    }

    /// Creates a driver against an explicit host layout.
    ///
    /// # Errors
    ///
    /// Returns an error if `config` is invalid.
    pub fn with_host(config: DriverConfig, host: CgroupHost) -> Result<Self> {
        config.validate()?;
        let ctx = CancellationToken::new();
        let tasks = Arc::new(TaskStore::new());
        let tracker: Arc<dyn TaskTracker> = Arc::clone(&tasks) as Arc<dyn TaskTracker>;
        let fixer = CpusetFixer::new(
            ctx.clone(),
            config.reconcile_interval,
            &host,
            &config.cgroup_parent,
            tracker,
        );
        tracing::debug!(
            version = %host.version(),
            slice = %fixer.slice().display(),
            "driver created"
        );
        Ok(Self {
            ctx,
            tasks,
            host,
            config,
            fixer,
        })
    }

    /// Starts background work. Repeated calls are no-ops.
    ///
    /// Returns whether the cpuset reconciler was launched by this call.
    /// Outside a tokio runtime nothing is launched; see [`CpusetFixer::start`].
    pub fn start(&self) -> bool {
        self.fixer.start()
    }

    /// Registers a started task so its container follows the task's cpuset.
    pub fn track_task(&self, task_id: impl Into<String>, handle: TaskHandle) {
        let task_id = task_id.into();
        tracing::debug!(task_id = %task_id, container_id = %handle.container_id, "tracking task");
        if let Some(previous) = self.tasks.set(task_id, handle) {
            tracing::debug!(container_id = %previous.container_id, "replaced task handle");
        }
    }

    /// Forgets a stopped task, returning its handle.
    pub fn untrack_task(&self, task_id: &str) -> Option<TaskHandle> {
        let removed = self.tasks.delete(task_id);
        if removed.is_some() {
            tracing::debug!(task_id, "untracked task");
        }
        removed
    }

    /// Builds the cpuset manager for the configured cgroup parent.
    ///
    /// # Errors
    ///
    /// Returns an error if the host's cpuset hierarchy cannot be located.
    pub fn cpuset_manager(&self) -> Result<Arc<dyn CpusetManager>> {
        self.host.cpuset_manager(&self.config.cgroup_parent)
    }

    /// Prepares the runtime cgroup configuration for a task's container.
    ///
    /// # Errors
    ///
    /// See [`CgroupHost::configure_basic_cgroups`].
    pub fn configure_task_cgroups(&self, cgroup: &str, config: &mut RuntimeCgroupConfig) -> Result<()> {
        self.host.configure_basic_cgroups(cgroup, config)
    }

    /// Tasks currently tracked.
    #[must_use]
    pub fn tasks(&self) -> &TaskStore {
        &self.tasks
    }

    /// Host layout the driver works against.
    #[must_use]
    pub const fn host(&self) -> &CgroupHost {
        &self.host
    }

    /// Active configuration.
    #[must_use]
    pub const fn config(&self) -> &DriverConfig {
        &self.config
    }

    /// Token cancelled when the driver shuts down.
    #[must_use]
    pub fn cancellation_token(&self) -> CancellationToken {
        self.ctx.clone()
    }

    /// Cancels background work and waits for it to stop.
    pub async fn shutdown(&self) {
        tracing::info!("driver shutting down");
        self.ctx.cancel();
        self.fixer.stopped().await;
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use taskcg_common::error::TaskcgError;
    use taskcg_common::types::ContainerId;
    use taskcg_core::cgroup::{CgroupVersion, CpusetManagerKind};

    use super::*;

    fn driver(version: CgroupVersion, root: &std::path::Path) -> Driver {
        Driver::with_host(DriverConfig::default(), CgroupHost::new(version, root)).unwrap()
    }

    #[test]
    fn zero_interval_is_rejected() {
        let config = DriverConfig {
            reconcile_interval: Duration::ZERO,
            ..DriverConfig::default()
        };
        let root = tempfile::tempdir().unwrap();
        let err = Driver::with_host(config, CgroupHost::new(CgroupVersion::Unified, root.path())).unwrap_err();
        assert!(matches!(err, TaskcgError::Config { .. }));
    }

    #[test]
    fn track_and_untrack() {
        let root = tempfile::tempdir().unwrap();
        let d = driver(CgroupVersion::Unified, root.path());
        d.track_task("t1", TaskHandle::new(ContainerId::new("abc"), "a1", "web"));
        assert_eq!(d.tasks().len(), 1);
        assert!(d.untrack_task("t1").is_some());
        assert!(d.untrack_task("t1").is_none());
        assert!(d.tasks().is_empty());
    }

    #[cfg(target_os = "linux")]
    #[test]
    fn unified_driver_builds_unified_manager() {
        let root = tempfile::tempdir().unwrap();
        let d = driver(CgroupVersion::Unified, root.path());
        assert_eq!(d.cpuset_manager().unwrap().kind(), CpusetManagerKind::Unified);
    }

    #[test]
    fn unified_task_cgroups_need_no_setup() {
        let root = tempfile::tempdir().unwrap();
        let d = driver(CgroupVersion::Unified, root.path());
        let mut config = RuntimeCgroupConfig::default();
        d.configure_task_cgroups("foo", &mut config).unwrap();
        assert!(config.paths.is_empty());
    }

    #[tokio::test]
    async fn shutdown_cancels_token() {
        let root = tempfile::tempdir().unwrap();
        let d = driver(CgroupVersion::Unified, root.path());
        let token = d.cancellation_token();
        assert!(d.start());
        d.shutdown().await;
        assert!(token.is_cancelled());
    }
}
