//! Basic cgroup setup handed to the low-level container runtime.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use taskcg_common::constants::{DEFAULT_CGROUP_V1_PARENT, FREEZER_SUBSYSTEM};
use taskcg_common::error::{Result, TaskcgError};

use super::CgroupHost;
use super::mountinfo::{self, join_relative};

/// Cgroup section of the low-level runtime's container configuration.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RuntimeCgroupConfig {
    /// Cgroup name.
    pub name: String,
    /// Cgroup parent.
    pub parent: String,
    /// Absolute cgroup path per legacy subsystem.
    pub paths: HashMap<String, PathBuf>,
}

impl CgroupHost {
    /// Prepares the cgroups a task needs before the runtime starts it.
    ///
    /// On legacy hosts the freezer cgroup has to be created by hand and
    /// handed to the runtime; unified hosts freeze through `cgroup.freeze`
    /// and need nothing here.
    ///
    /// # Errors
    ///
    /// Returns an error if the freezer mountpoint is unknown or the cgroup
    /// directory cannot be created.
    pub fn configure_basic_cgroups(&self, cgroup: &str, config: &mut RuntimeCgroupConfig) -> Result<()> {
        if self.version().is_unified() {
            return Ok(());
        }

        let entries = self.mounts()?;
        let mount = mountinfo::find_subsystem(&entries, FREEZER_SUBSYSTEM).ok_or_else(|| {
            TaskcgError::MountpointNotFound {
                subsystem: FREEZER_SUBSYSTEM.to_string(),
            }
        })?;
        let cgroup_path = join_relative(Path::new(DEFAULT_CGROUP_V1_PARENT), cgroup);
        let path = mount.cgroup_path(&cgroup_path.to_string_lossy());

        self.fs().create_dir(&path)?;
        tracing::debug!(cgroup, path = %path.display(), "freezer cgroup ready");

        config.paths = HashMap::from([(FREEZER_SUBSYSTEM.to_string(), path)]);
        Ok(())
    }
}
