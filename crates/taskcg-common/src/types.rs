//! Domain primitive types used across the taskcg workspace.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Identifier Docker assigns to a container.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ContainerId(String);

impl ContainerId {
    /// Creates a new container ID from a string value.
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Returns the inner string representation.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ContainerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Correlates orchestrator bookkeeping with a Docker container.
///
/// The allocation ID and task name locate the cgroup the orchestrator
/// manages; the container ID locates the scope Docker creates on its own.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Coordinate {
    /// Docker container backing the task.
    pub container_id: ContainerId,
    /// Allocation the task belongs to.
    pub alloc_id: String,
    /// Task name within the allocation.
    pub task: String,
}

impl Coordinate {
    /// Builds a coordinate from its three parts.
    #[must_use]
    pub fn new(container_id: ContainerId, alloc_id: impl Into<String>, task: impl Into<String>) -> Self {
        Self {
            container_id,
            alloc_id: alloc_id.into(),
            task: task.into(),
        }
    }
}

impl fmt::Display for Coordinate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}@{}", self.alloc_id, self.task, self.container_id)
    }
}
