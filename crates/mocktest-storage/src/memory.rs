//! In-memory backend.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Mutex, PoisonError};

use anyhow::Result;

use mocktest_core::session::SessionSnapshot;
use mocktest_core::traits::SnapshotStorage;

/// Keeps the snapshot in memory and counts writes. Useful in tests and for
/// sessions that should not survive the process.
#[derive(Debug, Default)]
pub struct MemoryStorage {
    record: Mutex<Option<SessionSnapshot>>,
    writes: AtomicU32,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of snapshots written so far.
    pub fn write_count(&self) -> u32 {
        self.writes.load(Ordering::SeqCst)
    }

    /// The stored snapshot, if any.
    pub fn snapshot(&self) -> Option<SessionSnapshot> {
        self.record
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

impl SnapshotStorage for MemoryStorage {
    fn load(&self) -> Result<Option<SessionSnapshot>> {
        Ok(self.snapshot())
    }

    fn save(&self, snapshot: &SessionSnapshot) -> Result<()> {
        *self.record.lock().unwrap_or_else(PoisonError::into_inner) = Some(snapshot.clone());
        self.writes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn clear(&self) -> Result<()> {
        self.record
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        Ok(())
    }
}
