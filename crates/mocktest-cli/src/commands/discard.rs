//! The `mocktest discard` command.

use std::path::PathBuf;

use anyhow::Result;

use mocktest_client::load_config_from;
use mocktest_core::traits::SnapshotStorage;

pub fn execute(config_path: Option<PathBuf>) -> Result<()> {
    let config = load_config_from(config_path.as_deref())?;
    let storage = super::session_storage(&config);

    if !storage.path().exists() {
        println!("No saved session.");
        return Ok(());
    }

    let saved = match storage.load() {
        Ok(saved) => saved,
        Err(e) => {
            tracing::warn!("saved session is unreadable: {e:#}");
            None
        }
    };
    storage.clear()?;

    match saved {
        Some(snapshot) => println!("Discarded the session for exam {}.", snapshot.exam_id),
        None => println!("Discarded the unreadable session record."),
    }
    Ok(())
}
