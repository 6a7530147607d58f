//! Unified error types for the taskcg workspace.
//!
//! Every fallible operation in the cgroup layer and the Docker driver
//! returns [`TaskcgError`]. Variants carry the path involved so that a
//! caller can decide whether to abort startup or proceed degraded.

use std::path::PathBuf;

use thiserror::Error;

/// Top-level error type shared across the workspace.
#[derive(Debug, Error)]
pub enum TaskcgError {
    /// A filesystem operation outside a controller file failed.
    #[error("I/O error at {path}: {source}")]
    Io {
        /// Path where the I/O error occurred.
        path: PathBuf,
        /// Underlying I/O error.
        source: std::io::Error,
    },

    /// A cgroup controller file could not be read.
    #[error("failed to read {file} in cgroup {cgroup}: {source}")]
    CgroupRead {
        /// Cgroup directory.
        cgroup: PathBuf,
        /// Controller file name.
        file: String,
        /// Underlying I/O error.
        source: std::io::Error,
    },

    /// A cgroup controller file could not be written.
    #[error("failed to write {file} in cgroup {cgroup}: {source}")]
    CgroupWrite {
        /// Cgroup directory.
        cgroup: PathBuf,
        /// Controller file name.
        file: String,
        /// Underlying I/O error.
        source: std::io::Error,
    },

    /// No mountpoint exists for a legacy cgroup subsystem.
    #[error("failed to find {subsystem} cgroup mountpoint")]
    MountpointNotFound {
        /// Subsystem that was looked up (e.g. `freezer`).
        subsystem: String,
    },

    /// An allocation ID or task name was empty where an identity is built.
    ///
    /// This signals a caller defect rather than an environmental problem.
    #[error("empty {field} in task cgroup identity")]
    InvalidIdentity {
        /// Which identity component was empty.
        field: &'static str,
    },

    /// A CPU list could not be parsed.
    #[error("invalid cpuset {value:?}: {reason}")]
    InvalidCpuset {
        /// The offending text.
        value: String,
        /// What was wrong with it.
        reason: String,
    },

    /// A core reservation cannot be honored.
    #[error("cpuset conflict for {identity}: {message}")]
    CpusetConflict {
        /// Task identity requesting the reservation.
        identity: String,
        /// Description of the conflict.
        message: String,
    },

    /// A configuration value is invalid.
    #[error("invalid configuration: {message}")]
    Config {
        /// Description of the invalid configuration.
        message: String,
    },

    /// A required resource was not found.
    #[error("{kind} not found: {id}")]
    NotFound {
        /// Type of the missing resource.
        kind: &'static str,
        /// Identifier of the missing resource.
        id: String,
    },

    /// Serialization or deserialization failed.
    #[error("serialization error: {source}")]
    Serialization {
        /// Underlying serialization error.
        #[from]
        source: serde_json::Error,
    },
}

/// Convenience alias used throughout the workspace.
pub type Result<T> = std::result::Result<T, TaskcgError>;
