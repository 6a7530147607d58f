//! Ordered CPU core sets in the kernel's list format.
//!
//! `cpuset.cpus` holds a comma separated list of core indices and
//! inclusive ranges, e.g. `0-3,8,10-11`. [`CpuSet`] parses that text and
//! renders it back in the same compressed form.

use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::{Result, TaskcgError};

/// An ordered set of CPU core indices.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CpuSet(BTreeSet<u16>);

impl CpuSet {
    /// Creates an empty set.
    #[must_use]
    pub const fn new() -> Self {
        Self(BTreeSet::new())
    }

    /// Parses the kernel list format. Surrounding whitespace and an empty
    /// string (an unconfigured cpuset) are accepted.
    ///
    /// # Errors
    ///
    /// Returns an error on non-numeric entries or descending ranges.
    pub fn parse(text: &str) -> Result<Self> {
        let mut cores = BTreeSet::new();
        let trimmed = text.trim();
        if trimmed.is_empty() {
            return Ok(Self(cores));
        }
        for part in trimmed.split(',') {
            let part = part.trim();
            match part.split_once('-') {
                Some((start, end)) => {
                    let start = parse_core(text, start)?;
                    let end = parse_core(text, end)?;
                    if start > end {
                        return Err(TaskcgError::InvalidCpuset {
                            value: text.to_string(),
                            reason: format!("descending range {part}"),
                        });
                    }
                    cores.extend(start..=end);
                }
                None => {
                    let _ = cores.insert(parse_core(text, part)?);
                }
            }
        }
        Ok(Self(cores))
    }

    /// Number of cores in the set.
    #[must_use]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Returns whether the set holds no cores.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Cores present in either set.
    #[must_use]
    pub fn union(&self, other: &Self) -> Self {
        Self(self.0.union(&other.0).copied().collect())
    }

    /// Cores present in `self` but not in `other`.
    #[must_use]
    pub fn difference(&self, other: &Self) -> Self {
        Self(self.0.difference(&other.0).copied().collect())
    }

    /// Cores present in both sets.
    #[must_use]
    pub fn intersection(&self, other: &Self) -> Self {
        Self(self.0.intersection(&other.0).copied().collect())
    }

    /// Returns whether every core of `self` is in `other`.
    #[must_use]
    pub fn is_subset(&self, other: &Self) -> bool {
        self.0.is_subset(&other.0)
    }

    /// Returns whether the sets share no core.
    #[must_use]
    pub fn is_disjoint(&self, other: &Self) -> bool {
        self.0.is_disjoint(&other.0)
    }

    /// Cores as an ascending vector.
    #[must_use]
    pub fn to_vec(&self) -> Vec<u16> {
        self.0.iter().copied().collect()
    }
}

fn parse_core(text: &str, item: &str) -> Result<u16> {
    item.trim().parse().map_err(|_| TaskcgError::InvalidCpuset {
        value: text.to_string(),
        reason: format!("{item:?} is not a core index"),
    })
}

impl FromStr for CpuSet {
    type Err = TaskcgError;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

impl FromIterator<u16> for CpuSet {
    fn from_iter<I: IntoIterator<Item = u16>>(iter: I) -> Self {
        Self(iter.into_iter().collect())
    }
}

impl fmt::Display for CpuSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut cores = self.0.iter().copied().peekable();
        let mut first = true;
        while let Some(start) = cores.next() {
            let mut end = start;
            while let Some(next) = end.checked_add(1) {
                if cores.peek() != Some(&next) {
                    break;
                }
                end = next;
                let _ = cores.next();
            }
            if !first {
                f.write_str(",")?;
            }
            first = false;
            if start == end {
                write!(f, "{start}")?;
            } else {
                write!(f, "{start}-{end}")?;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_ranges_and_singles() {
        let set = CpuSet::parse("0-3,8,10-11\n").unwrap();
        assert_eq!(set.to_vec(), vec![0, 1, 2, 3, 8, 10, 11]);
    }

    #[test]
    fn empty_text_is_empty_set() {
        assert!(CpuSet::parse("  \n").unwrap().is_empty());
    }

    #[test]
    fn renders_compressed_ranges() {
        let set: CpuSet = [5, 0, 1, 2, 7, 8].into_iter().collect();
        assert_eq!(set.to_string(), "0-2,5,7-8");
    }

    #[test]
    fn rejects_garbage_and_descending_ranges() {
        assert!(CpuSet::parse("0-a").is_err());
        assert!(CpuSet::parse("4-2").is_err());
        assert!(CpuSet::parse("1,,2").is_err());
    }

    #[test]
    fn set_algebra() {
        let all = CpuSet::parse("0-7").unwrap();
        let reserved = CpuSet::parse("2-3").unwrap();
        let shared = all.difference(&reserved);
        assert_eq!(shared.to_string(), "0-1,4-7");
        assert!(reserved.is_subset(&all));
        assert!(reserved.is_disjoint(&shared));
        assert_eq!(shared.union(&reserved), all);
        assert_eq!(all.intersection(&reserved), reserved);
    }
}
