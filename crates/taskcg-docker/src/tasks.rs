//! Registry of the tasks a driver instance is running.

use std::collections::{HashMap, HashSet};
use std::fmt;
use std::sync::{PoisonError, RwLock};

use taskcg_common::types::{ContainerId, Coordinate};

/// Driver-side record of a running task.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TaskHandle {
    /// Docker container backing the task.
    pub container_id: ContainerId,
    /// Allocation the task belongs to.
    pub alloc_id: String,
    /// Task name within the allocation.
    pub task_name: String,
}

impl TaskHandle {
    /// Builds a handle.
    #[must_use]
    pub fn new(container_id: ContainerId, alloc_id: impl Into<String>, task_name: impl Into<String>) -> Self {
        Self {
            container_id,
            alloc_id: alloc_id.into(),
            task_name: task_name.into(),
        }
    }

    /// The coordinate the reconciler works from.
    #[must_use]
    pub fn coordinate(&self) -> Coordinate {
        Coordinate::new(self.container_id.clone(), self.alloc_id.as_str(), self.task_name.as_str())
    }
}

/// Source of the coordinates the reconciler keeps in sync.
pub trait TaskTracker: Send + Sync + fmt::Debug {
    /// Coordinates of every task tracked at the time of the call.
    fn snapshot(&self) -> HashSet<Coordinate>;
}

/// Tasks keyed by task ID.
#[derive(Debug, Default)]
pub struct TaskStore {
    store: RwLock<HashMap<String, TaskHandle>>,
}

impl TaskStore {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Records `handle` under `id`, returning the handle it replaced.
    pub fn set(&self, id: impl Into<String>, handle: TaskHandle) -> Option<TaskHandle> {
        self.store
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(id.into(), handle)
    }

    /// Looks up the handle stored under `id`.
    #[must_use]
    pub fn get(&self, id: &str) -> Option<TaskHandle> {
        self.store
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(id)
            .cloned()
    }

    /// Forgets `id`, returning its handle.
    pub fn delete(&self, id: &str) -> Option<TaskHandle> {
        self.store
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(id)
    }

    /// Number of tracked tasks.
    #[must_use]
    pub fn len(&self) -> usize {
        self.store.read().unwrap_or_else(PoisonError::into_inner).len()
    }

    /// Whether no task is tracked.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl TaskTracker for TaskStore {
    fn snapshot(&self) -> HashSet<Coordinate> {
        self.store
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .values()
            .map(TaskHandle::coordinate)
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn handle(container: &str, alloc: &str, task: &str) -> TaskHandle {
        TaskHandle::new(ContainerId::new(container), alloc, task)
    }

    #[test]
    fn set_get_delete() {
        let store = TaskStore::new();
        assert!(store.set("t1", handle("abc", "a1", "web")).is_none());
        assert_eq!(store.get("t1").map(|h| h.task_name), Some("web".to_string()));
        assert_eq!(store.len(), 1);

        let replaced = store.set("t1", handle("def", "a1", "web"));
        assert_eq!(replaced.map(|h| h.container_id), Some(ContainerId::new("abc")));

        assert!(store.delete("t1").is_some());
        assert!(store.delete("t1").is_none());
        assert!(store.is_empty());
    }

    #[test]
    fn snapshot_projects_coordinates() {
        let store = TaskStore::new();
        let _ = store.set("t1", handle("abc123", "alloc1", "web"));
        let _ = store.set("t2", handle("def456", "alloc1", "db"));

        let snapshot = store.snapshot();
        assert_eq!(snapshot.len(), 2);
        assert!(snapshot.contains(&Coordinate::new(ContainerId::new("abc123"), "alloc1", "web")));
        assert!(snapshot.contains(&Coordinate::new(ContainerId::new("def456"), "alloc1", "db")));
    }

    #[test]
    fn snapshot_is_detached_from_later_changes() {
        let store = TaskStore::new();
        let _ = store.set("t1", handle("abc123", "alloc1", "web"));
        let snapshot = store.snapshot();
        let _ = store.delete("t1");
        assert_eq!(snapshot.len(), 1);
        assert!(store.snapshot().is_empty());
    }

    #[test]
    fn empty_store_has_empty_snapshot() {
        assert!(TaskStore::new().snapshot().is_empty());
    }
}
