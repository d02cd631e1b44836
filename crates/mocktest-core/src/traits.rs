//! Trait definitions for the remote attempt service and durable storage.
//!
//! `AttemptApi` is implemented by `mocktest-client`, `SnapshotStorage` by
//! `mocktest-storage`.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::label::Label;
use crate::model::{Exam, ExamResult, Question};
use crate::session::SessionSnapshot;

// ---------------------------------------------------------------------------
// Remote attempt service
// ---------------------------------------------------------------------------

/// Operations the session engine needs from the attempt/question service.
///
/// Errors should wrap [`crate::error::ApiError`] so callers can classify them.
#[async_trait]
pub trait AttemptApi: Send + Sync {
    /// Human-readable backend name (e.g. "http").
    fn name(&self) -> &str;

    /// Open a new attempt and return its id.
    async fn start_attempt(&self, exam_id: &str) -> anyhow::Result<String>;

    /// Submit all answers and close the attempt.
    async fn submit_attempt(
        &self,
        attempt_id: &str,
        answers: &[SubmittedAnswer],
    ) -> anyhow::Result<ExamResult>;

    async fn flag_question(&self, attempt_id: &str, question_id: &str) -> anyhow::Result<()>;

    async fn unflag_question(&self, attempt_id: &str, question_id: &str) -> anyhow::Result<()>;

    /// Record one answer. Best-effort mirror of local state.
    async fn answer_question(
        &self,
        attempt_id: &str,
        answer: &SubmittedAnswer,
    ) -> anyhow::Result<()>;

    /// Fetch an exam with its questions.
    async fn get_exam(&self, exam_id: &str) -> anyhow::Result<Exam>;

    async fn get_exam_questions(&self, exam_id: &str) -> anyhow::Result<Vec<Question>>;
}

/// Wire shape of one answer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubmittedAnswer {
    pub question_id: String,
    /// Option id when the selection resolves to an option, else the raw selection.
    pub selected_option_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub selected_label: Option<Label>,
    #[serde(default)]
    pub time_spent_secs: u32,
}

// ---------------------------------------------------------------------------
// Durable session storage
// ---------------------------------------------------------------------------

/// Durable storage for the single in-progress session snapshot.
///
/// Implementations are synchronous; the store calls them from its background
/// persistence task.
pub trait SnapshotStorage: Send + Sync {
    /// Load the stored snapshot. `Ok(None)` means no session is in progress.
    fn load(&self) -> anyhow::Result<Option<SessionSnapshot>>;

    /// Replace the stored snapshot.
    fn save(&self, snapshot: &SessionSnapshot) -> anyhow::Result<()>;

    /// Remove the stored snapshot. Removing a missing snapshot is not an error.
    fn clear(&self) -> anyhow::Result<()>;
}
