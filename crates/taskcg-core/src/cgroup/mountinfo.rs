//! Cgroup mount discovery from `/proc/self/mountinfo`.
//!
//! A mountinfo line looks like:
//!
//! ```text
//! 36 25 0:31 / /sys/fs/cgroup/freezer rw,nosuid - cgroup cgroup rw,freezer
//! ```
//!
//! Fields before ` - ` are the mount ID, parent ID, device, root within the
//! filesystem, and mountpoint; after it come the filesystem type, source, and
//! super options (which name the legacy subsystems).

use std::path::{Path, PathBuf};

/// One cgroup-relevant line of the mount table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MountEntry {
    /// Root of the mount within its filesystem.
    pub root: PathBuf,
    /// Where the filesystem is mounted.
    pub mount_point: PathBuf,
    /// Filesystem type (`cgroup`, `cgroup2`, ...).
    pub fs_type: String,
    /// Per-superblock options.
    pub super_options: Vec<String>,
}

impl MountEntry {
    /// Whether this is a legacy hierarchy carrying `subsystem`.
    #[must_use]
    pub fn has_subsystem(&self, subsystem: &str) -> bool {
        self.fs_type == "cgroup" && self.super_options.iter().any(|o| o == subsystem)
    }

    /// Whether this mount is any cgroup hierarchy.
    #[must_use]
    pub fn is_cgroup(&self) -> bool {
        self.fs_type == "cgroup" || self.fs_type == "cgroup2"
    }

    /// Maps an absolute cgroup path onto this mount's directory tree.
    #[must_use]
    pub fn cgroup_path(&self, cgroup: &str) -> PathBuf {
        let cgroup = Path::new(cgroup);
        let relative = cgroup.strip_prefix(&self.root).unwrap_or(cgroup);
        join_relative(&self.mount_point, &relative.to_string_lossy())
    }
}

/// Parses a mount table, skipping malformed lines.
#[must_use]
pub fn parse(content: &str) -> Vec<MountEntry> {
    content.lines().filter_map(parse_line).collect()
}

fn parse_line(line: &str) -> Option<MountEntry> {
    let (head, tail) = line.split_once(" - ")?;
    let head: Vec<&str> = head.split(' ').collect();
    let tail: Vec<&str> = tail.split(' ').collect();
    if head.len() < 5 || tail.len() < 3 {
        return None;
    }
    Some(MountEntry {
        root: PathBuf::from(unescape(head[3])),
        mount_point: PathBuf::from(unescape(head[4])),
        fs_type: tail[0].to_string(),
        super_options: tail[2].split(',').map(str::to_string).collect(),
    })
}

/// Decodes the octal escapes (`\040` for space) the kernel uses in paths.
fn unescape(field: &str) -> String {
    let bytes = field.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'\\' && i + 3 < bytes.len() {
            if let Some(byte) = std::str::from_utf8(&bytes[i + 1..i + 4])
                .ok()
                .and_then(|oct| u8::from_str_radix(oct, 8).ok())
            {
                out.push(byte);
                i += 4;
                continue;
            }
        }
        out.push(bytes[i]);
        i += 1;
    }
    String::from_utf8_lossy(&out).into_owned()
}

/// Finds the legacy hierarchy that carries `subsystem`.
#[must_use]
pub fn find_subsystem<'a>(entries: &'a [MountEntry], subsystem: &str) -> Option<&'a MountEntry> {
    entries.iter().find(|e| e.has_subsystem(subsystem))
}

/// Returns the mountpoint of the first cgroup hierarchy, if any.
#[must_use]
pub fn first_cgroup_mountpoint(entries: &[MountEntry]) -> Option<PathBuf> {
    entries.iter().find(|e| e.is_cgroup()).map(|e| e.mount_point.clone())
}

/// Joins `relative` under `base`, treating a leading `/` as relative.
#[must_use]
pub fn join_relative(base: &Path, relative: &str) -> PathBuf {
    let trimmed = relative.trim_start_matches('/');
    if trimmed.is_empty() {
        base.to_path_buf()
    } else {
        base.join(trimmed)
    }
}
