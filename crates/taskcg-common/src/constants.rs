//! System-wide constants and default paths.

use std::time::Duration;

/// Canonical cgroup mount root.
pub const CGROUP_ROOT: &str = "/sys/fs/cgroup";

/// Mount table consulted to locate legacy subsystem hierarchies.
pub const MOUNTINFO_PATH: &str = "/proc/self/mountinfo";

/// Default parent slice under the unified hierarchy.
pub const DEFAULT_CGROUP_PARENT_V2: &str = "nomad.slice";

/// Default parent under each legacy subsystem hierarchy.
pub const DEFAULT_CGROUP_V1_PARENT: &str = "/nomad";

/// Legacy cpuset subdirectory holding the shared pool.
pub const SHARED_CPUSET_DIR: &str = "shared";

/// Legacy cpuset subdirectory holding exclusive reservations.
pub const RESERVED_CPUSET_DIR: &str = "reserved";

/// Controller file listing the CPUs a cgroup may run on.
pub const CPUSET_CPUS: &str = "cpuset.cpus";

/// Unified controller file with the CPUs actually granted.
pub const CPUSET_CPUS_EFFECTIVE: &str = "cpuset.cpus.effective";

/// Legacy controller file with the CPUs actually granted.
pub const CPUSET_EFFECTIVE_CPUS_V1: &str = "cpuset.effective_cpus";

/// Unified file enabling controllers for a cgroup's children.
pub const CGROUP_SUBTREE_CONTROL: &str = "cgroup.subtree_control";

/// Legacy controller file listing permitted memory nodes.
pub const CPUSET_MEMS: &str = "cpuset.mems";

/// Legacy subsystem the basic configurer provisions.
pub const FREEZER_SUBSYSTEM: &str = "freezer";

/// Legacy subsystem backing the cpuset manager.
pub const CPUSET_SUBSYSTEM: &str = "cpuset";

/// How often the reconciler copies cpusets into Docker scopes.
pub const CPUSET_RECONCILE_INTERVAL: Duration = Duration::from_secs(1);
