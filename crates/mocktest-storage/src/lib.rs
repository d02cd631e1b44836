//! mocktest-storage: Durable storage for the in-progress exam session.
//!
//! Backends implement [`SnapshotStorage`](mocktest_core::traits::SnapshotStorage)
//! and hold exactly one record, keyed by
//! [`SESSION_KEY`](mocktest_core::session::SESSION_KEY).

pub mod file;
pub mod memory;

pub use file::FileStorage;
pub use memory::MemoryStorage;
