//! Subcommand implementations.

pub mod discard;
pub mod init;
pub mod resume;
pub mod score;
pub mod status;
pub mod take;
pub mod validate;

use mocktest_client::MocktestConfig;
use mocktest_storage::FileStorage;

/// Storage holding the session record for this configuration.
fn session_storage(config: &MocktestConfig) -> FileStorage {
    FileStorage::new(&config.storage_dir)
}
