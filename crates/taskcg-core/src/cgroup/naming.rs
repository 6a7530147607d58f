//! Cgroup parent resolution and task scope naming.
//!
//! Unified hosts follow the systemd convention: scopes live in a slice and
//! are named `<alloc>.<task>.scope`. Legacy hierarchies predate that and use
//! `<task>.<alloc>` under `/nomad`.

use std::fmt;

use taskcg_common::constants::{DEFAULT_CGROUP_PARENT_V2, DEFAULT_CGROUP_V1_PARENT};
use taskcg_common::error::{Result, TaskcgError};

use super::version::CgroupVersion;

/// Resolves the configured cgroup parent, falling back to the default for
/// `version` when none is configured.
#[must_use]
pub fn effective_parent(version: CgroupVersion, configured: &str) -> String {
    if !configured.is_empty() {
        return configured.to_string();
    }
    match version {
        CgroupVersion::Unified => DEFAULT_CGROUP_PARENT_V2.to_string(),
        CgroupVersion::Legacy => DEFAULT_CGROUP_V1_PARENT.to_string(),
    }
}

/// Name of the cgroup the orchestrator manages for one task.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ScopeId(String);

impl ScopeId {
    /// Builds the scope name for `task` of allocation `alloc_id`.
    ///
    /// # Errors
    ///
    /// Returns [`TaskcgError::InvalidIdentity`] if either part is empty;
    /// that is a caller defect, not a host condition.
    pub fn new(version: CgroupVersion, alloc_id: &str, task: &str) -> Result<Self> {
        if alloc_id.is_empty() {
            return Err(TaskcgError::InvalidIdentity {
                field: "allocation ID",
            });
        }
        if task.is_empty() {
            return Err(TaskcgError::InvalidIdentity { field: "task name" });
        }
        Ok(Self(match version {
            CgroupVersion::Unified => format!("{alloc_id}.{task}.scope"),
            CgroupVersion::Legacy => format!("{task}.{alloc_id}"),
        }))
    }

    /// Returns the scope name.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ScopeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// String form of [`ScopeId::new`].
///
/// # Errors
///
/// Returns [`TaskcgError::InvalidIdentity`] if either part is empty.
pub fn scope_id(version: CgroupVersion, alloc_id: &str, task: &str) -> Result<String> {
    ScopeId::new(version, alloc_id, task).map(|id| id.0)
}

/// Scope Docker creates for a container under its cgroup parent.
#[must_use]
pub fn docker_scope(container_id: &str) -> String {
    format!("docker-{container_id}.scope")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unified_scope_is_alloc_first_with_suffix() {
        assert_eq!(
            scope_id(CgroupVersion::Unified, "alloc1", "web").unwrap(),
            "alloc1.web.scope"
        );
    }

    #[test]
    fn legacy_scope_is_task_first() {
        assert_eq!(
            scope_id(CgroupVersion::Legacy, "alloc1", "web").unwrap(),
            "web.alloc1"
        );
    }

    #[test]
    fn empty_parts_are_identity_errors() {
        for version in [CgroupVersion::Unified, CgroupVersion::Legacy] {
            assert!(matches!(
                ScopeId::new(version, "", "web"),
                Err(TaskcgError::InvalidIdentity { field: "allocation ID" })
            ));
            assert!(matches!(
                ScopeId::new(version, "alloc1", ""),
                Err(TaskcgError::InvalidIdentity { field: "task name" })
            ));
        }
    }

    #[test]
    fn effective_parent_defaults_per_version() {
        assert_eq!(effective_parent(CgroupVersion::Unified, ""), "nomad.slice");
        assert_eq!(effective_parent(CgroupVersion::Legacy, ""), "/nomad");
        assert_eq!(effective_parent(CgroupVersion::Unified, "batch.slice"), "batch.slice");
        assert_eq!(effective_parent(CgroupVersion::Legacy, "/custom"), "/custom");
    }

    #[test]
    fn effective_parent_is_deterministic() {
        let a = effective_parent(CgroupVersion::Unified, "x.slice");
        let b = effective_parent(CgroupVersion::Unified, "x.slice");
        assert_eq!(a, b);
    }

    #[test]
    fn docker_scope_format() {
        assert_eq!(docker_scope("abc123"), "docker-abc123.scope");
    }
}
