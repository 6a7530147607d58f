//! Keeps Docker's container scopes on the cpusets computed for their tasks.
//!
//! Docker only accepts a cgroup parent, so it creates its own
//! `docker-<id>.scope` next to the scope the cpuset manager configured and
//! gives it the parent's broad cpuset. [`CpusetFixer`] periodically copies
//! `cpuset.cpus` from each task's scope into its container's scope, which
//! also follows the shared pool as reservations come and go.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use taskcg_common::error::Result;
use taskcg_common::types::Coordinate;
use taskcg_core::cgroup::mountinfo::join_relative;
use taskcg_core::cgroup::{CgroupFs, CgroupHost, CgroupVersion, ScopeId, copy_cpuset, docker_scope};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::tasks::TaskTracker;

/// Snapshot-and-copy pass over every tracked task.
#[derive(Debug, Clone)]
struct Scanner {
    version: CgroupVersion,
    slice: PathBuf,
    tasks: Arc<dyn TaskTracker>,
    fs: Arc<dyn CgroupFs>,
}

impl Scanner {
    fn scan(&self) {
        for coordinate in self.tasks.snapshot() {
            if let Err(err) = self.fix(&coordinate) {
                tracing::trace!(%coordinate, %err, "failed to fix container cpuset");
            }
        }
    }

    fn fix(&self, coordinate: &Coordinate) -> Result<()> {
        let scope = ScopeId::new(self.version, &coordinate.alloc_id, &coordinate.task)?;
        let source = self.slice.join(scope.as_str());
        let destination = self.slice.join(docker_scope(coordinate.container_id.as_str()));
        copy_cpuset(self.fs.as_ref(), &source, &destination)
    }
}

/// Background cpuset reconciler.
///
/// Constructed idle; [`start`](Self::start) launches at most one loop per
/// fixer, and only on unified hosts. The loop ends when the cancellation
/// token fires.
#[derive(Debug)]
pub struct CpusetFixer {
    ctx: CancellationToken,
    interval: Duration,
    scanner: Scanner,
    started: AtomicBool,
    handle: Mutex<Option<JoinHandle<()>>>,
}

impl CpusetFixer {
    /// Creates a fixer for the tasks under the cgroup `parent` of `host`.
    #[must_use]
    pub fn new(
        ctx: CancellationToken,
        interval: Duration,
        host: &CgroupHost,
        parent: &str,
        tasks: Arc<dyn TaskTracker>,
    ) -> Self {
        let slice = join_relative(host.root(), &host.effective_parent(parent));
        Self {
            ctx,
            interval,
            scanner: Scanner {
                version: host.version(),
                slice,
                tasks,
                fs: Arc::clone(host.fs()),
            },
            started: AtomicBool::new(false),
            handle: Mutex::new(None),
        }
    }

    /// Directory holding both the task scopes and the container scopes.
    #[must_use]
    pub fn slice(&self) -> &Path {
        &self.scanner.slice
    }

    /// Launches the reconciliation loop.
    ///
    /// Only the first successful call has any effect. Returns whether this
    /// call launched the loop, which never happens on legacy hosts. Called
    /// outside a tokio runtime it launches nothing and a later call from
    /// inside one may still start the loop.
    pub fn start(&self) -> bool {
        let runtime = if self.scanner.version.is_unified() {
            match tokio::runtime::Handle::try_current() {
                Ok(runtime) => Some(runtime),
                Err(err) => {
                    tracing::warn!(%err, "cpuset reconciler needs a tokio runtime");
                    return false;
                }
            }
        } else {
            None
        };
        if self
            .started
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return false;
        }
        let Some(runtime) = runtime else {
            tracing::debug!(version = %self.scanner.version, "cpuset reconciler not needed");
            return false;
        };

        let scanner = self.scanner.clone();
        let ctx = self.ctx.clone();
        let interval = self.interval;
        tracing::info!(
            slice = %scanner.slice.display(),
            interval_ms = u64::try_from(interval.as_millis()).unwrap_or(u64::MAX),
            "starting cpuset reconciler"
        );
        let handle = runtime.spawn(run(scanner, ctx, interval));
        *self.handle.lock().unwrap_or_else(PoisonError::into_inner) = Some(handle);
        true
    }

    /// Runs one pass outside the loop.
    pub fn scan(&self) {
        self.scanner.scan();
    }

    /// Waits for a launched loop to exit. Returns immediately if none runs.
    pub async fn stopped(&self) {
        let handle = self.handle.lock().unwrap_or_else(PoisonError::into_inner).take();
        let Some(handle) = handle else {
            return;
        };
        if let Err(err) = handle.await {
            tracing::warn!(%err, "cpuset reconciler exited abnormally");
        }
    }
}

async fn run(scanner: Scanner, ctx: CancellationToken, interval: Duration) {
    let mut delay = Duration::ZERO;
    loop {
        tokio::select! {
            biased;
            () = ctx.cancelled() => break,
            () = tokio::time::sleep(delay) => {}
        }
        scanner.scan();
        delay = interval;
    }
    tracing::debug!("cpuset reconciler stopped");
}
