//! The `mocktest resume` command.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Result;

use mocktest_client::local::is_local_attempt;
use mocktest_client::{create_api, load_config_from, ApiConfig, LocalAttemptApi, MocktestConfig};
use mocktest_core::controller::{ControllerConfig, SessionController};
use mocktest_core::model::Exam;
use mocktest_core::session::Session;
use mocktest_core::store::SessionStore;
use mocktest_core::traits::AttemptApi;

use crate::console::{self, ConsoleObserver};

pub async fn execute(config_path: Option<PathBuf>) -> Result<()> {
    let config = load_config_from(config_path.as_deref())?;
    let storage = Arc::new(super::session_storage(&config));
    let store = SessionStore::restore(storage, config.debounce())?;

    let api = match store.session() {
        None => {
            println!("No saved session. Start one with `mocktest take --exam <id>`.");
            return Ok(());
        }
        Some(session) if session.is_closed() => {
            println!(
                "The saved session for exam {} was already submitted. \
                 See it with `mocktest status` or remove it with `mocktest discard`.",
                session.exam_id()
            );
            return Ok(());
        }
        Some(session) => resume_api(session, &config)?,
    };

    let observer = Arc::new(ConsoleObserver::default());
    let ctl = SessionController::new(api, store, observer.clone(), ControllerConfig::default());
    ctl.resume_session()?;

    if ctl.session().is_some_and(|s| s.is_paused) {
        println!("The session is paused. Type `resume` to restart the clock.");
    }
    console::run(&ctl, &observer).await
}

/// The in-process service keeps nothing between runs, so it is rebuilt from
/// the saved question set and handed the saved attempt.
fn resume_api(session: &Session, config: &MocktestConfig) -> Result<Arc<dyn AttemptApi>> {
    let local = matches!(config.api, ApiConfig::Local { .. })
        || session.attempt_id().is_some_and(is_local_attempt);
    if !local {
        return create_api(&config.api);
    }

    let exam = Exam {
        id: session.exam_id().to_string(),
        title: session.exam_title.clone(),
        description: String::new(),
        duration_minutes: session.duration_secs / 60,
        passing_percent: session.passing_percent,
        questions: session.questions.clone(),
    };
    let api = LocalAttemptApi::new(vec![exam]);
    if let Some(attempt_id) = session.attempt_id() {
        api.adopt_attempt(attempt_id, session.exam_id())?;
    }
    Ok(Arc::new(api))
}
