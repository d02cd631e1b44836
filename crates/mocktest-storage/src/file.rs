//! JSON file backend.

use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use tempfile::NamedTempFile;

use mocktest_core::session::{SessionSnapshot, SESSION_KEY};
use mocktest_core::traits::SnapshotStorage;

/// Stores the session snapshot as `<dir>/exam-session.json`.
///
/// Writes go to a temporary file in the same directory which is then
/// renamed over the record, so a crash never leaves a half-written snapshot.
#[derive(Debug, Clone)]
pub struct FileStorage {
    dir: PathBuf,
}

impl FileStorage {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    /// Path of the session record.
    pub fn path(&self) -> PathBuf {
        self.dir.join(format!("{SESSION_KEY}.json"))
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }
}

impl SnapshotStorage for FileStorage {
    fn load(&self) -> Result<Option<SessionSnapshot>> {
        let path = self.path();
        let content = match std::fs::read_to_string(&path) {
            Ok(content) => content,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
            Err(e) => {
                return Err(e).with_context(|| format!("failed to read session from {}", path.display()))
            }
        };
        let snapshot = serde_json::from_str(&content)
            .with_context(|| format!("failed to parse session JSON in {}", path.display()))?;
        Ok(Some(snapshot))
    }

    fn save(&self, snapshot: &SessionSnapshot) -> Result<()> {
        std::fs::create_dir_all(&self.dir)
            .with_context(|| format!("failed to create {}", self.dir.display()))?;
        let json = serde_json::to_vec_pretty(snapshot).context("failed to serialize session")?;

        let mut tmp = NamedTempFile::new_in(&self.dir).context("failed to create temp file")?;
        tmp.write_all(&json).context("failed to write session")?;
        tmp.as_file().sync_all().context("failed to sync session file")?;
        let path = self.path();
        tmp.persist(&path)
            .with_context(|| format!("failed to write session to {}", path.display()))?;
        Ok(())
    }

    fn clear(&self) -> Result<()> {
        let path = self.path();
        match std::fs::remove_file(&path) {
            Ok(()) => {
                tracing::debug!(path = %path.display(), "stored session removed");
                Ok(())
            }
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e).with_context(|| format!("failed to remove {}", path.display())),
        }
    }
}
