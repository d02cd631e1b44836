//! Configuration and attempt service factory.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use mocktest_core::scoring::DEFAULT_PASSING_PERCENT;
use mocktest_core::traits::AttemptApi;

use crate::http::HttpAttemptApi;
use crate::local::LocalAttemptApi;

/// Which attempt service to talk to.
///
/// Note: Custom Debug impl masks the token to keep it out of logs.
#[derive(Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum ApiConfig {
    Http {
        base_url: String,
        #[serde(default)]
        token: Option<String>,
        #[serde(default)]
        timeout_secs: Option<u64>,
    },
    /// In-process service grading exams loaded from TOML files.
    Local {
        #[serde(default = "default_exam_dir")]
        exam_dir: PathBuf,
    },
}

impl std::fmt::Debug for ApiConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ApiConfig::Http {
                base_url,
                token,
                timeout_secs,
            } => f
                .debug_struct("Http")
                .field("base_url", base_url)
                .field("token", &token.as_ref().map(|_| "***"))
                .field("timeout_secs", timeout_secs)
                .finish(),
            ApiConfig::Local { exam_dir } => f
                .debug_struct("Local")
                .field("exam_dir", exam_dir)
                .finish(),
        }
    }
}

impl Default for ApiConfig {
    fn default() -> Self {
        ApiConfig::Local {
            exam_dir: default_exam_dir(),
        }
    }
}

fn default_exam_dir() -> PathBuf {
    PathBuf::from("./exams")
}

/// Top-level mocktest configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MocktestConfig {
    #[serde(default)]
    pub api: ApiConfig,
    /// Directory holding the durable session record.
    #[serde(default = "default_storage_dir")]
    pub storage_dir: PathBuf,
    /// Pass mark for `mocktest score` when none is given.
    #[serde(default = "default_passing_percent")]
    pub passing_percent: f64,
    /// Window for coalescing session writes, in milliseconds.
    #[serde(default = "default_debounce_ms")]
    pub debounce_ms: u64,
}

fn default_storage_dir() -> PathBuf {
    PathBuf::from("./.mocktest")
}
fn default_passing_percent() -> f64 {
    DEFAULT_PASSING_PERCENT
}
fn default_debounce_ms() -> u64 {
    500
}

impl Default for MocktestConfig {
    fn default() -> Self {
        Self {
            api: ApiConfig::default(),
            storage_dir: default_storage_dir(),
            passing_percent: default_passing_percent(),
            debounce_ms: default_debounce_ms(),
        }
    }
}

impl MocktestConfig {
    pub fn debounce(&self) -> Duration {
        Duration::from_millis(self.debounce_ms)
    }
}

/// Resolve environment variable references like `${VAR_NAME}` in a string.
fn resolve_env_vars(s: &str) -> String {
    let mut result = String::with_capacity(s.len());
    let mut rest = s;
    while let Some(start) = rest.find("${") {
        let Some(len) = rest[start..].find('}') else {
            break;
        };
        result.push_str(&rest[..start]);
        let name = &rest[start + 2..start + len];
        result.push_str(&std::env::var(name).unwrap_or_default());
        rest = &rest[start + len + 1..];
    }
    result.push_str(rest);
    result
}

fn resolve_api_config(config: &ApiConfig) -> ApiConfig {
    match config {
        ApiConfig::Http {
            base_url,
            token,
            timeout_secs,
        } => ApiConfig::Http {
            base_url: resolve_env_vars(base_url),
            token: token.as_deref().map(resolve_env_vars),
            timeout_secs: *timeout_secs,
        },
        ApiConfig::Local { exam_dir } => ApiConfig::Local {
            exam_dir: resolve_path(exam_dir),
        },
    }
}

fn resolve_path(path: &Path) -> PathBuf {
    PathBuf::from(resolve_env_vars(&path.to_string_lossy()))
}

/// Expand `${VAR}` references in every string-valued setting.
fn resolve_config(config: &mut MocktestConfig) {
    config.api = resolve_api_config(&config.api);
    config.storage_dir = resolve_path(&config.storage_dir);
}

/// Load configuration from well-known paths.
///
/// Search order:
/// 1. `mocktest.toml` in the current directory
/// 2. `~/.config/mocktest/config.toml`
///
/// Environment variable overrides: `MOCKTEST_API_URL`, `MOCKTEST_API_TOKEN`.
pub fn load_config() -> Result<MocktestConfig> {
    load_config_from(None)
}

/// Load config from an explicit path, or search the default locations.
pub fn load_config_from(path: Option<&Path>) -> Result<MocktestConfig> {
    let config_path = match path {
        Some(p) if p.exists() => Some(p.to_path_buf()),
        Some(p) => anyhow::bail!("config file not found: {}", p.display()),
        None => {
            let local = PathBuf::from("mocktest.toml");
            if local.exists() {
                Some(local)
            } else {
                dirs_path()
                    .map(|home| home.join("config.toml"))
                    .filter(|global| global.exists())
            }
        }
    };

    let mut config = match config_path {
        Some(path) => {
            let content = std::fs::read_to_string(&path)
                .with_context(|| format!("failed to read config: {}", path.display()))?;
            toml::from_str::<MocktestConfig>(&content)
                .with_context(|| format!("failed to parse config: {}", path.display()))?
        }
        None => MocktestConfig::default(),
    };

    apply_env_overrides(
        &mut config,
        std::env::var("MOCKTEST_API_URL").ok(),
        std::env::var("MOCKTEST_API_TOKEN").ok(),
    );
    resolve_config(&mut config);

    tracing::debug!(api = ?config.api, storage_dir = %config.storage_dir.display(), "configuration loaded");
    Ok(config)
}

fn apply_env_overrides(config: &mut MocktestConfig, url: Option<String>, api_token: Option<String>) {
    if let Some(url) = url {
        match &mut config.api {
            ApiConfig::Http { base_url, .. } => *base_url = url,
            ApiConfig::Local { .. } => {
                config.api = ApiConfig::Http {
                    base_url: url,
                    token: None,
                    timeout_secs: None,
                };
            }
        }
    }

    if let Some(value) = api_token {
        if let ApiConfig::Http { token, .. } = &mut config.api {
            *token = Some(value);
        }
    }
}

fn dirs_path() -> Option<PathBuf> {
    std::env::var("HOME")
        .ok()
        .map(|h| PathBuf::from(h).join(".config").join("mocktest"))
}

/// Create an attempt service from its configuration.
pub fn create_api(config: &ApiConfig) -> Result<Arc<dyn AttemptApi>> {
    match config {
        ApiConfig::Http {
            base_url,
            token,
            timeout_secs,
        } => Ok(Arc::new(HttpAttemptApi::new(
            base_url,
            token.clone(),
            *timeout_secs,
        )?)),
        ApiConfig::Local { exam_dir } => Ok(Arc::new(LocalAttemptApi::from_dir(exam_dir)?)),
    }
}
