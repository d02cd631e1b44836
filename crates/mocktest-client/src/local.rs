//! In-process attempt service.
//!
//! Serves exams loaded from TOML files and grades submissions with the same
//! aggregator the session engine uses. Also the stand-in service for tests:
//! it counts calls and can be told to fail.

use std::collections::{BTreeSet, HashMap};
use std::path::Path;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};

use anyhow::Result;
use async_trait::async_trait;

use mocktest_core::error::ApiError;
use mocktest_core::label::AnswerRef;
use mocktest_core::model::{Answers, Exam, ExamResult, Question, UserAnswer};
use mocktest_core::parser::load_exam_directory;
use mocktest_core::statistics::aggregate;
use mocktest_core::traits::{AttemptApi, SubmittedAnswer};

const ATTEMPT_PREFIX: &str = "local-";

/// `true` for attempt ids handed out by a [`LocalAttemptApi`].
pub fn is_local_attempt(attempt_id: &str) -> bool {
    attempt_number(attempt_id).is_some()
}

fn attempt_number(attempt_id: &str) -> Option<u32> {
    attempt_id.strip_prefix(ATTEMPT_PREFIX)?.parse().ok()
}

#[derive(Debug, Default)]
struct LocalAttempt {
    exam_id: String,
    answers: HashMap<String, SubmittedAnswer>,
    flagged: BTreeSet<String>,
    submitted: bool,
}

/// Attempt service backed by exams held in memory.
pub struct LocalAttemptApi {
    exams: HashMap<String, Exam>,
    attempts: Mutex<HashMap<String, LocalAttempt>>,
    hide_answer_keys: bool,
    offline: AtomicBool,
    failing_submits: AtomicU32,
    next_attempt: AtomicU32,
    start_calls: AtomicU32,
    submit_calls: AtomicU32,
    answer_calls: AtomicU32,
    flag_calls: AtomicU32,
}

impl LocalAttemptApi {
    pub fn new(exams: Vec<Exam>) -> Self {
        Self {
            exams: exams.into_iter().map(|e| (e.id.clone(), e)).collect(),
            attempts: Mutex::new(HashMap::new()),
            hide_answer_keys: false,
            offline: AtomicBool::new(false),
            failing_submits: AtomicU32::new(0),
            next_attempt: AtomicU32::new(1),
            start_calls: AtomicU32::new(0),
            submit_calls: AtomicU32::new(0),
            answer_calls: AtomicU32::new(0),
            flag_calls: AtomicU32::new(0),
        }
    }

    /// Load every exam file under `dir`.
    pub fn from_dir(dir: &Path) -> Result<Self> {
        let exams = load_exam_directory(dir)?;
        tracing::debug!(dir = %dir.display(), exams = exams.len(), "local exams loaded");
        Ok(Self::new(exams))
    }

    /// Strip correct answers from exams handed to clients, the way a real
    /// service would. Grading still uses the full keys.
    pub fn with_hidden_answer_keys(mut self) -> Self {
        self.hide_answer_keys = true;
        self
    }

    /// Make every call fail with a network error until switched back.
    pub fn set_offline(&self, offline: bool) {
        self.offline.store(offline, Ordering::SeqCst);
    }

    /// Fail the next `n` submissions with a 503.
    pub fn fail_next_submits(&self, n: u32) {
        self.failing_submits.store(n, Ordering::SeqCst);
    }

    /// Re-register an open attempt issued by an earlier process.
    ///
    /// The local service keeps nothing between runs, so a restored session
    /// hands its attempt back before mirroring resumes.
    pub fn adopt_attempt(&self, attempt_id: &str, exam_id: &str) -> Result<(), ApiError> {
        self.exam(exam_id)?;
        if let Some(n) = attempt_number(attempt_id) {
            self.next_attempt.fetch_max(n.saturating_add(1), Ordering::SeqCst);
        }
        self.attempts()
            .entry(attempt_id.to_string())
            .or_insert_with(|| LocalAttempt {
                exam_id: exam_id.to_string(),
                ..LocalAttempt::default()
            });
        Ok(())
    }

    pub fn exam_ids(&self) -> Vec<&str> {
        let mut ids: Vec<&str> = self.exams.keys().map(String::as_str).collect();
        ids.sort_unstable();
        ids
    }

    pub fn start_calls(&self) -> u32 {
        self.start_calls.load(Ordering::SeqCst)
    }

    pub fn submit_calls(&self) -> u32 {
        self.submit_calls.load(Ordering::SeqCst)
    }

    pub fn answer_calls(&self) -> u32 {
        self.answer_calls.load(Ordering::SeqCst)
    }

    pub fn flag_calls(&self) -> u32 {
        self.flag_calls.load(Ordering::SeqCst)
    }

    /// Answer recorded by the service for one question of an attempt.
    pub fn recorded_answer(&self, attempt_id: &str, question_id: &str) -> Option<SubmittedAnswer> {
        self.attempts()
            .get(attempt_id)
            .and_then(|a| a.answers.get(question_id).cloned())
    }

    /// Questions the service has flagged for an attempt.
    pub fn flagged(&self, attempt_id: &str) -> Vec<String> {
        self.attempts()
            .get(attempt_id)
            .map(|a| a.flagged.iter().cloned().collect())
            .unwrap_or_default()
    }

    fn attempts(&self) -> MutexGuard<'_, HashMap<String, LocalAttempt>> {
        self.attempts.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn check_online(&self) -> Result<(), ApiError> {
        if self.offline.load(Ordering::SeqCst) {
            return Err(ApiError::Network("local service is offline".into()));
        }
        Ok(())
    }

    fn exam(&self, exam_id: &str) -> Result<&Exam, ApiError> {
        self.exams
            .get(exam_id)
            .ok_or_else(|| ApiError::NotFound(format!("exam {exam_id}")))
    }

    fn client_questions(&self, questions: &[Question]) -> Vec<Question> {
        questions
            .iter()
            .cloned()
            .map(|mut q| {
                if self.hide_answer_keys {
                    q.correct_label = None;
                    q.correct_answer = None;
                    q.correct_option = None;
                    for option in &mut q.options {
                        option.is_correct = None;
                    }
                }
                q
            })
            .collect()
    }

    /// Update an open attempt.
    fn with_open_attempt<T>(
        &self,
        attempt_id: &str,
        f: impl FnOnce(&mut LocalAttempt) -> T,
    ) -> Result<T, ApiError> {
        let mut attempts = self.attempts();
        let attempt = attempts
            .get_mut(attempt_id)
            .ok_or_else(|| ApiError::NotFound(format!("attempt {attempt_id}")))?;
        if attempt.submitted {
            return Err(ApiError::Conflict(format!("attempt {attempt_id} already submitted")));
        }
        Ok(f(attempt))
    }
}

/// Interpret a wire answer the way the engine stores answers.
fn to_user_answer(answer: &SubmittedAnswer) -> UserAnswer {
    let selected = match answer.selected_label {
        Some(label) => AnswerRef::from(label),
        None => AnswerRef::Text(answer.selected_option_id.clone()),
    };
    UserAnswer {
        question_id: answer.question_id.clone(),
        selected,
        time_spent_secs: answer.time_spent_secs,
    }
}

#[async_trait]
impl AttemptApi for LocalAttemptApi {
    fn name(&self) -> &str {
        "local"
    }

    async fn start_attempt(&self, exam_id: &str) -> anyhow::Result<String> {
        self.start_calls.fetch_add(1, Ordering::SeqCst);
        self.check_online()?;
        self.exam(exam_id)?;

        let attempt_id = format!("{ATTEMPT_PREFIX}{}", self.next_attempt.fetch_add(1, Ordering::SeqCst));
        self.attempts().insert(
            attempt_id.clone(),
            LocalAttempt {
                exam_id: exam_id.to_string(),
                ..LocalAttempt::default()
            },
        );
        Ok(attempt_id)
    }

    async fn submit_attempt(
        &self,
        attempt_id: &str,
        answers: &[SubmittedAnswer],
    ) -> anyhow::Result<ExamResult> {
        self.submit_calls.fetch_add(1, Ordering::SeqCst);
        self.check_online()?;
        let failing = self
            .failing_submits
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if failing {
            return Err(ApiError::Api {
                status: 503,
                message: "submission temporarily unavailable".into(),
            }
            .into());
        }

        let exam_id = self.with_open_attempt(attempt_id, |attempt| {
            for answer in answers {
                attempt
                    .answers
                    .insert(answer.question_id.clone(), answer.clone());
            }
            attempt.submitted = true;
            attempt.exam_id.clone()
        })?;
        let exam = self.exam(&exam_id)?;

        let graded: Answers = answers
            .iter()
            .map(|a| (a.question_id.clone(), to_user_answer(a)))
            .collect();
        let time_spent = answers.iter().map(|a| a.time_spent_secs).sum();
        let stats = aggregate(&exam.questions, &graded, exam.passing_percent);
        Ok(stats.to_result(attempt_id, &exam.id, &exam.title, time_spent))
    }

    async fn flag_question(&self, attempt_id: &str, question_id: &str) -> anyhow::Result<()> {
        self.flag_calls.fetch_add(1, Ordering::SeqCst);
        self.check_online()?;
        self.with_open_attempt(attempt_id, |a| a.flagged.insert(question_id.to_string()))?;
        Ok(())
    }

    async fn unflag_question(&self, attempt_id: &str, question_id: &str) -> anyhow::Result<()> {
        self.flag_calls.fetch_add(1, Ordering::SeqCst);
        self.check_online()?;
        self.with_open_attempt(attempt_id, |a| a.flagged.remove(question_id))?;
        Ok(())
    }

    async fn answer_question(
        &self,
        attempt_id: &str,
        answer: &SubmittedAnswer,
    ) -> anyhow::Result<()> {
        self.answer_calls.fetch_add(1, Ordering::SeqCst);
        self.check_online()?;
        self.with_open_attempt(attempt_id, |a| {
            a.answers.insert(answer.question_id.clone(), answer.clone())
        })?;
        Ok(())
    }

    async fn get_exam(&self, exam_id: &str) -> anyhow::Result<Exam> {
        self.check_online()?;
        let exam = self.exam(exam_id)?;
        Ok(Exam {
            questions: self.client_questions(&exam.questions),
            ..exam.clone()
        })
    }

    async fn get_exam_questions(&self, exam_id: &str) -> anyhow::Result<Vec<Question>> {
        self.check_online()?;
        Ok(self.client_questions(&self.exam(exam_id)?.questions))
    }
}
