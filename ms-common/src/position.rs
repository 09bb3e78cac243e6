use std::{fmt, fs, path::Path};

use regex::Regex;

use crate::log_warn;

const POSITION_PATTERN: &str = r"\(([^,]+),\s*(\d+)\)";

/// A point in the replication stream. Ordered lexicographically by
/// (name, offset); persisted across restarts.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub struct ReplicationPosition {
    pub name: String,
    pub offset: u32,
}

impl ReplicationPosition {
    pub fn new(name: &str, offset: u32) -> Self {
        Self {
            name: name.to_string(),
            offset,
        }
    }
}

impl fmt::Display for ReplicationPosition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({}, {})", self.name, self.offset)
    }
}

/// Persists the acknowledged replication position as a single
/// `(<log_name>, <log_offset>)` line. The line format is the on-disk
/// contract; surrounding noise is tolerated on read.
pub struct PositionStore {}

impl PositionStore {
    /// Missing file and unparseable content both mean "no position";
    /// only real I/O failures propagate.
    pub fn load(path: &str) -> anyhow::Result<Option<ReplicationPosition>> {
        if !Path::new(path).exists() {
            return Ok(None);
        }

        let content = fs::read_to_string(path)?;
        match Self::parse(&content) {
            Some(position) => Ok(Some(position)),
            None => {
                log_warn!("ignoring unparseable progress file: {}", path);
                Ok(None)
            }
        }
    }

    pub fn parse(content: &str) -> Option<ReplicationPosition> {
        let pattern = Regex::new(POSITION_PATTERN).ok()?;
        let captures = pattern.captures(content)?;
        let name = captures[1].trim().to_string();
        let offset = captures[2].parse().ok()?;
        Some(ReplicationPosition { name, offset })
    }

    /// Write-then-rename so a crash mid-save never leaves a torn file.
    pub fn save(path: &str, position: &ReplicationPosition) -> anyhow::Result<()> {
        let tmp_path = format!("{}.tmp", path);
        fs::write(&tmp_path, position.to_string())?;
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            fs::set_permissions(&tmp_path, fs::Permissions::from_mode(0o644))?;
        }
        fs::rename(&tmp_path, path)?;
        Ok(())
    }
}
