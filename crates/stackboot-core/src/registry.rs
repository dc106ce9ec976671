use crate::error::Result;
use crate::io::atomic_write;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

/// Logical process name → OS PID, persisted as one JSON object.
///
/// Every mutation is a read-modify-write of the whole file. An entry means
/// the PID was believed live when it was written; callers probe liveness
/// before trusting it.
#[derive(Debug, Clone)]
pub struct PidRegistry {
    path: PathBuf,
}

impl PidRegistry {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Read all entries. A missing, empty or unparsable file is an empty
    /// registry; the next write replaces an unparsable one.
    pub fn load(&self) -> Result<BTreeMap<String, u32>> {
        if !self.path.exists() {
            return Ok(BTreeMap::new());
        }
        let data = std::fs::read_to_string(&self.path)?;
        if data.trim().is_empty() {
            return Ok(BTreeMap::new());
        }
        match serde_json::from_str(&data) {
            Ok(entries) => Ok(entries),
            Err(e) => {
                tracing::warn!(
                    path = %self.path.display(),
                    error = %e,
                    "unreadable process registry, treating it as empty"
                );
                Ok(BTreeMap::new())
            }
        }
    }

    pub fn get(&self, name: &str) -> Result<Option<u32>> {
        Ok(self.load()?.get(name).copied())
    }

    pub fn set(&self, name: &str, pid: u32) -> Result<()> {
        let mut entries = self.load()?;
        entries.insert(name.to_string(), pid);
        self.save(&entries)
    }

    /// Remove `name`. Returns the PID it held, if any.
    pub fn remove(&self, name: &str) -> Result<Option<u32>> {
        let mut entries = self.load()?;
        let removed = entries.remove(name);
        if removed.is_some() {
            self.save(&entries)?;
        }
        Ok(removed)
    }

    fn save(&self, entries: &BTreeMap<String, u32>) -> Result<()> {
        let data = serde_json::to_string_pretty(entries)?;
        atomic_write(&self.path, data.as_bytes())
    }
}
