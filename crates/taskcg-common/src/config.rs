//! Configuration model for the cgroup layer of the Docker driver.

use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::constants;

/// Driver-level cgroup configuration.
///
/// Loading this from the agent's configuration file is the embedding
/// agent's job; this type only fixes the shape and the defaults.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DriverConfig {
    /// Mount root of the cgroup filesystem.
    pub cgroup_root: PathBuf,
    /// Operator-supplied cgroup parent; empty selects the per-version default.
    pub cgroup_parent: String,
    /// Mount table used to locate legacy subsystem hierarchies.
    pub mountinfo: PathBuf,
    /// Pause between two reconciliation scans.
    #[serde(rename = "reconcile_interval_ms", with = "millis")]
    pub reconcile_interval: Duration,
}

impl Default for DriverConfig {
    fn default() -> Self {
        Self {
            cgroup_root: PathBuf::from(constants::CGROUP_ROOT),
            cgroup_parent: String::new(),
            mountinfo: PathBuf::from(constants::MOUNTINFO_PATH),
            reconcile_interval: constants::CPUSET_RECONCILE_INTERVAL,
        }
    }
}

impl DriverConfig {
    /// Decodes a configuration from JSON, filling omitted fields with defaults.
    ///
    /// # Errors
    ///
    /// Returns an error if the JSON is malformed or the interval is zero.
    pub fn from_json(input: &str) -> crate::error::Result<Self> {
        let config: Self = serde_json::from_str(input)?;
        config.validate()?;
        Ok(config)
    }

    /// Checks values that serde cannot reject on its own.
    ///
    /// # Errors
    ///
    /// Returns an error if the reconcile interval is zero.
    pub fn validate(&self) -> crate::error::Result<()> {
        if self.reconcile_interval.is_zero() {
            return Err(crate::error::TaskcgError::Config {
                message: "reconcile interval must be greater than zero".into(),
            });
        }
        Ok(())
    }
}

mod millis {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(u64::try_from(value.as_millis()).unwrap_or(u64::MAX))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        u64::deserialize(deserializer).map(Duration::from_millis)
    }
}
