//! Node-wide split of CPU cores into exclusive reservations and a shared pool.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use taskcg_common::cpuset::CpuSet;
use taskcg_common::error::{Result, TaskcgError};

use super::manager::AllocCpusets;

/// A task as the partition knows it.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Identity {
    /// Allocation ID.
    pub alloc_id: String,
    /// Task name.
    pub task: String,
}

impl Identity {
    /// Builds an identity.
    #[must_use]
    pub fn new(alloc_id: impl Into<String>, task: impl Into<String>) -> Self {
        Self {
            alloc_id: alloc_id.into(),
            task: task.into(),
        }
    }
}

impl fmt::Display for Identity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.alloc_id, self.task)
    }
}

/// Exclusive/shared partition of the node's cores.
///
/// The shared pool is always the initial set minus every reservation.
#[derive(Debug, Clone, Default)]
pub struct CpuPartition {
    initial: CpuSet,
    sharing: BTreeSet<Identity>,
    isolating: BTreeMap<Identity, CpuSet>,
}

impl CpuPartition {
    /// Starts with every core of `initial` in the shared pool.
    #[must_use]
    pub fn new(initial: CpuSet) -> Self {
        Self {
            initial,
            ..Self::default()
        }
    }

    /// Admits `alloc`, replacing any earlier admission of the same ID.
    ///
    /// Nothing changes when the request is rejected.
    ///
    /// # Errors
    ///
    /// Returns an error on empty identities, cores outside the node set,
    /// overlapping reservations, or when shared tasks would be left with
    /// no cores.
    pub fn admit(&mut self, alloc: &AllocCpusets) -> Result<Vec<Identity>> {
        if alloc.alloc_id.is_empty() {
            return Err(TaskcgError::InvalidIdentity {
                field: "allocation ID",
            });
        }

        let mut claimed: CpuSet = self
            .isolating
            .iter()
            .filter(|(id, _)| id.alloc_id != alloc.alloc_id)
            .fold(CpuSet::new(), |acc, (_, cores)| acc.union(cores));
        let mut has_shared = self.sharing.iter().any(|id| id.alloc_id != alloc.alloc_id);

        for task in &alloc.tasks {
            if task.name.is_empty() {
                return Err(TaskcgError::InvalidIdentity { field: "task name" });
            }
            let identity = Identity::new(alloc.alloc_id.as_str(), task.name.as_str());
            if task.reserved.is_empty() {
                has_shared = true;
                continue;
            }
            if !task.reserved.is_subset(&self.initial) {
                return Err(TaskcgError::CpusetConflict {
                    identity: identity.to_string(),
                    message: format!(
                        "cores {} are not available on this node ({})",
                        task.reserved.difference(&self.initial),
                        self.initial
                    ),
                });
            }
            let overlap = task.reserved.intersection(&claimed);
            if !overlap.is_empty() {
                return Err(TaskcgError::CpusetConflict {
                    identity: identity.to_string(),
                    message: format!("cores {overlap} are already reserved"),
                });
            }
            claimed = claimed.union(&task.reserved);
        }

        if has_shared && self.initial.difference(&claimed).is_empty() {
            return Err(TaskcgError::CpusetConflict {
                identity: alloc.alloc_id.clone(),
                message: "reservations leave no cores for the shared pool".into(),
            });
        }

        let _ = self.release(&alloc.alloc_id);
        let mut admitted = Vec::with_capacity(alloc.tasks.len());
        for task in &alloc.tasks {
            let identity = Identity::new(alloc.alloc_id.as_str(), task.name.as_str());
            if task.reserved.is_empty() {
                let _ = self.sharing.insert(identity.clone());
            } else {
                let _ = self.isolating.insert(identity.clone(), task.reserved.clone());
            }
            admitted.push(identity);
        }
        Ok(admitted)
    }

    /// Drops every task of `alloc_id`, returning the removed identities.
    pub fn release(&mut self, alloc_id: &str) -> Vec<Identity> {
        let mut removed: Vec<Identity> = self
            .sharing
            .iter()
            .filter(|id| id.alloc_id == alloc_id)
            .cloned()
            .collect();
        removed.extend(
            self.isolating
                .keys()
                .filter(|id| id.alloc_id == alloc_id)
                .cloned(),
        );
        for id in &removed {
            let _ = self.sharing.remove(id);
            let _ = self.isolating.remove(id);
        }
        removed
    }

    /// Cores not reserved by any task.
    #[must_use]
    pub fn shared_pool(&self) -> CpuSet {
        self.isolating
            .values()
            .fold(self.initial.clone(), |pool, cores| pool.difference(cores))
    }

    /// The reservation of `id`, if it holds one.
    #[must_use]
    pub fn reservation(&self, id: &Identity) -> Option<&CpuSet> {
        self.isolating.get(id)
    }

    /// Cores `id` runs on: its reservation or the shared pool.
    #[must_use]
    pub fn assignment(&self, id: &Identity) -> Option<CpuSet> {
        if let Some(cores) = self.isolating.get(id) {
            return Some(cores.clone());
        }
        self.sharing.contains(id).then(|| self.shared_pool())
    }

    /// Whether `id` has been admitted.
    #[must_use]
    pub fn contains(&self, id: &Identity) -> bool {
        self.sharing.contains(id) || self.isolating.contains_key(id)
    }

    /// Tasks on the shared pool.
    pub fn sharing(&self) -> impl Iterator<Item = &Identity> {
        self.sharing.iter()
    }

    /// Tasks holding reservations.
    pub fn isolating(&self) -> impl Iterator<Item = (&Identity, &CpuSet)> {
        self.isolating.iter()
    }
}
