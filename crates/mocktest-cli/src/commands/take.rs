//! The `mocktest take` command.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::Result;

use mocktest_client::{create_api, load_config_from, LocalAttemptApi, MocktestConfig};
use mocktest_core::controller::{ControllerConfig, SessionController};
use mocktest_core::parser;
use mocktest_core::store::SessionStore;
use mocktest_core::traits::{AttemptApi, SnapshotStorage};

use crate::console::{self, ConsoleObserver};

pub async fn execute(exam: String, config_path: Option<PathBuf>) -> Result<()> {
    let config = load_config_from(config_path.as_deref())?;
    let storage = Arc::new(super::session_storage(&config));

    if let Some(saved) = storage.load()? {
        if !saved.is_completed {
            anyhow::bail!(
                "an unfinished session for exam {} is saved in {}; run `mocktest resume` or `mocktest discard` first",
                saved.exam_id,
                storage.path().display()
            );
        }
    }

    let (api, exam_id) = exam_source(&exam, &config)?;
    tracing::debug!(backend = api.name(), %exam_id, "starting exam");

    let store = SessionStore::with_storage(storage, config.debounce())?;
    let observer = Arc::new(ConsoleObserver::default());
    let ctl = SessionController::new(api, store, observer.clone(), ControllerConfig::default());

    ctl.start(&exam_id).await?;
    if let Some(session) = ctl.session() {
        println!(
            "{}: {} questions, {} minutes. +1 per correct answer, -0.25 per wrong one.",
            session.exam_title,
            session.questions.len(),
            session.duration_secs / 60
        );
    }

    console::run(&ctl, &observer).await
}

/// A path to an exam file runs against an in-process service; anything else
/// is an exam id on the configured one.
fn exam_source(exam: &str, config: &MocktestConfig) -> Result<(Arc<dyn AttemptApi>, String)> {
    let path = Path::new(exam);
    if path.extension().is_some_and(|ext| ext == "toml") || path.is_file() {
        let exam = parser::parse_exam(path)?;
        let exam_id = exam.id.clone();
        return Ok((Arc::new(LocalAttemptApi::new(vec![exam])), exam_id));
    }
    Ok((create_api(&config.api)?, exam.to_string()))
}
