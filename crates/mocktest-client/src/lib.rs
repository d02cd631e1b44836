//! mocktest-client: Attempt service integrations.
//!
//! Implements the `AttemptApi` trait over HTTP and in-process, and loads the
//! configuration that selects between them.

pub mod config;
pub mod http;
pub mod local;

pub use config::{create_api, load_config, load_config_from, ApiConfig, MocktestConfig};
pub use http::HttpAttemptApi;
pub use local::LocalAttemptApi;
pub use mocktest_core::error::ApiError;
