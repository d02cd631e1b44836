//! The `mocktest status` command.

use std::path::PathBuf;

use anyhow::Result;

use mocktest_client::load_config_from;
use mocktest_core::traits::SnapshotStorage;

use crate::console;

pub fn execute(config_path: Option<PathBuf>) -> Result<()> {
    let config = load_config_from(config_path.as_deref())?;
    let storage = super::session_storage(&config);

    let Some(snapshot) = storage.load()? else {
        println!("No saved session.");
        return Ok(());
    };
    let session = snapshot.into_session()?;
    console::print_status(&session);
    Ok(())
}
