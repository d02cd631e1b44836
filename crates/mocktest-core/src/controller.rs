//! Session controller.
//!
//! Keeps the local [`SessionStore`] and the remote attempt in agreement
//! without making the user wait on the network. Every local mutation is
//! applied synchronously; the matching remote call is spawned afterwards and
//! its failure is reported, never rolled back. Results of remote calls are
//! discarded when the session they belong to has since been replaced.

use std::fmt;
use std::future::Future;
use std::ops::ControlFlow;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use std::time::Duration;

use anyhow::Context;
use futures::future::join_all;
use tokio::task::JoinHandle;
use uuid::Uuid;

use crate::error::{ApiError, SessionError};
use crate::label::AnswerRef;
use crate::model::{Exam, ExamResult};
use crate::session::{Session, SessionProgress};
use crate::statistics::{self, ExamStatistics};
use crate::store::SessionStore;
use crate::timer::{Countdown, TICK_PERIOD};
use crate::traits::AttemptApi;

/// Configuration for the session controller.
#[derive(Debug, Clone)]
pub struct ControllerConfig {
    /// Interval between countdown ticks. Each tick takes one second off the clock.
    pub tick_period: Duration,
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self {
            tick_period: TICK_PERIOD,
        }
    }
}

/// Remote call that mirrors a local mutation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SyncOp {
    Start { exam_id: String },
    Answer { question_id: String },
    Flag { question_id: String },
    Unflag { question_id: String },
}

impl fmt::Display for SyncOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SyncOp::Start { exam_id } => write!(f, "start attempt for exam {exam_id}"),
            SyncOp::Answer { question_id } => write!(f, "answer question {question_id}"),
            SyncOp::Flag { question_id } => write!(f, "flag question {question_id}"),
            SyncOp::Unflag { question_id } => write!(f, "unflag question {question_id}"),
        }
    }
}

/// What happened to the remote mirror of a local mutation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mirror {
    /// The remote call was spawned.
    Dispatched,
    /// Applied locally only: the session has no attempt id.
    Offline,
    /// Nothing changed locally, so nothing was sent.
    Unchanged,
}

/// Result of opening a session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StartOutcome {
    Online { attempt_id: String },
    /// The service did not issue an attempt; the session runs locally.
    Offline { reason: String },
}

impl StartOutcome {
    pub fn attempt_id(&self) -> Option<&str> {
        match self {
            StartOutcome::Online { attempt_id } => Some(attempt_id),
            StartOutcome::Offline { .. } => None,
        }
    }
}

/// Receives session events. Called without any controller lock held.
pub trait SessionObserver: Send + Sync {
    fn on_attempt_started(&self, outcome: &StartOutcome);
    fn on_sync_error(&self, op: &SyncOp, error: &anyhow::Error);
    fn on_tick(&self, remaining_secs: u32);
    fn on_time_expired(&self);
    fn on_submitted(&self, result: &ExamResult);
    fn on_submit_failed(&self, error: &SessionError);
}

/// Observer that ignores every event.
pub struct NoopObserver;

impl SessionObserver for NoopObserver {
    fn on_attempt_started(&self, _: &StartOutcome) {}
    fn on_sync_error(&self, _: &SyncOp, _: &anyhow::Error) {}
    fn on_tick(&self, _: u32) {}
    fn on_time_expired(&self) {}
    fn on_submitted(&self, _: &ExamResult) {}
    fn on_submit_failed(&self, _: &SessionError) {}
}

/// Drives one exam session against an [`AttemptApi`].
pub struct SessionController {
    api: Arc<dyn AttemptApi>,
    observer: Arc<dyn SessionObserver>,
    store: Mutex<SessionStore>,
    countdown: Mutex<Option<Countdown>>,
    pending: Mutex<Vec<JoinHandle<()>>>,
    submitting: AtomicBool,
    config: ControllerConfig,
    me: Weak<SessionController>,
}

impl SessionController {
    pub fn new(
        api: Arc<dyn AttemptApi>,
        store: SessionStore,
        observer: Arc<dyn SessionObserver>,
        config: ControllerConfig,
    ) -> Arc<Self> {
        Arc::new_cyclic(|me| Self {
            api,
            observer,
            store: Mutex::new(store),
            countdown: Mutex::new(None),
            pending: Mutex::new(Vec::new()),
            submitting: AtomicBool::new(false),
            config,
            me: me.clone(),
        })
    }

    // -----------------------------------------------------------------------
    // Lifecycle
    // -----------------------------------------------------------------------

    /// Fetch an exam from the service and start it.
    pub async fn start(&self, exam_id: &str) -> anyhow::Result<StartOutcome> {
        let mut exam = self
            .api
            .get_exam(exam_id)
            .await
            .with_context(|| format!("failed to load exam {exam_id}"))?;
        if exam.questions.is_empty() {
            exam.questions = self
                .api
                .get_exam_questions(exam_id)
                .await
                .with_context(|| format!("failed to load questions for exam {exam_id}"))?;
        }
        Ok(self.start_exam(exam).await?)
    }

    /// Replace any current session with a fresh one for `exam` and open a
    /// remote attempt for it.
    ///
    /// If the service cannot open an attempt the session still starts, in
    /// offline mode.
    pub async fn start_exam(&self, exam: Exam) -> Result<StartOutcome, SessionError> {
        self.stop_countdown();
        let token = {
            let mut store = self.store();
            store.start(&exam)?;
            store.token()
        };

        let outcome = match self.api.start_attempt(&exam.id).await {
            Ok(attempt_id) => {
                let mut store = self.store();
                if store.token() != token {
                    tracing::debug!(exam_id = %exam.id, %attempt_id, "discarding attempt id for a replaced session");
                    return Err(SessionError::Superseded);
                }
                store.set_attempt_id(&attempt_id)?;
                tracing::info!(exam_id = %exam.id, %attempt_id, "attempt started");
                StartOutcome::Online { attempt_id }
            }
            Err(e) => {
                if self.store().token() != token {
                    return Err(SessionError::Superseded);
                }
                tracing::warn!(exam_id = %exam.id, "could not open an attempt, continuing offline: {e:#}");
                self.observer.on_sync_error(
                    &SyncOp::Start {
                        exam_id: exam.id.clone(),
                    },
                    &e,
                );
                StartOutcome::Offline {
                    reason: format!("{e:#}"),
                }
            }
        };

        self.observer.on_attempt_started(&outcome);
        self.arm_countdown()?;
        Ok(outcome)
    }

    /// Re-arm the countdown for a session restored from storage.
    ///
    /// Returns `false` if there is nothing to resume.
    pub fn resume_session(&self) -> Result<bool, SessionError> {
        let live = self
            .store()
            .session()
            .is_some_and(|s| !s.is_closed());
        if live {
            self.arm_countdown()?;
        }
        Ok(live)
    }

    pub fn pause(&self) -> Result<(), SessionError> {
        {
            let mut store = self.store();
            Self::open(&store)?;
            store.pause();
        }
        self.stop_countdown();
        tracing::info!("exam paused");
        Ok(())
    }

    pub fn resume(&self) -> Result<(), SessionError> {
        {
            let mut store = self.store();
            Self::open(&store)?;
            store.resume();
        }
        tracing::info!("exam resumed");
        self.arm_countdown()
    }

    /// Give up on the session. The durable record is removed.
    pub fn abandon(&self) -> bool {
        self.stop_countdown();
        self.store().abandon()
    }

    /// Stop the countdown and write pending durable state.
    pub async fn shutdown(&self) -> Result<(), SessionError> {
        self.stop_countdown();
        let flush = self.store().flush();
        flush.await
    }

    /// Wait for every spawned remote call (and a forced submission, if one
    /// is running) to finish.
    pub async fn settle(&self) {
        loop {
            let handles = std::mem::take(&mut *self.pending());
            if handles.is_empty() {
                break;
            }
            for outcome in join_all(handles).await {
                if let Err(e) = outcome {
                    if e.is_panic() {
                        tracing::error!("background session task panicked: {e}");
                    }
                }
            }
        }
    }

    // -----------------------------------------------------------------------
    // Mutations
    // -----------------------------------------------------------------------

    /// Record an answer locally and mirror it to the service.
    pub fn answer(&self, question_id: &str, selected: AnswerRef) -> Result<Mirror, SessionError> {
        let (token, attempt_id, wire) = {
            let mut store = self.store();
            Self::writable(&store)?;
            let answer = store.answer_question(question_id, selected)?;
            let session = store.session().ok_or(SessionError::NoSession)?;
            (
                session.token,
                session.attempt_id().map(str::to_owned),
                session.wire_answer(&answer),
            )
        };

        let Some(attempt_id) = attempt_id else {
            tracing::debug!(question_id, "no attempt id, answer kept locally");
            return Ok(Mirror::Offline);
        };
        let api = Arc::clone(&self.api);
        let op = SyncOp::Answer {
            question_id: question_id.to_string(),
        };
        self.mirror(op, token, async move {
            api.answer_question(&attempt_id, &wire).await
        });
        Ok(Mirror::Dispatched)
    }

    pub fn flag(&self, question_id: &str) -> Result<Mirror, SessionError> {
        self.set_flag(question_id, true)
    }

    pub fn unflag(&self, question_id: &str) -> Result<Mirror, SessionError> {
        self.set_flag(question_id, false)
    }

    /// Flip the flag on a question. Returns the new state.
    pub fn toggle_flag(&self, question_id: &str) -> Result<bool, SessionError> {
        let flagged = {
            let store = self.store();
            let session = store.session().ok_or(SessionError::NoSession)?;
            !session.is_flagged(question_id)
        };
        self.set_flag(question_id, flagged)?;
        Ok(flagged)
    }

    fn set_flag(&self, question_id: &str, flagged: bool) -> Result<Mirror, SessionError> {
        let (token, attempt_id) = {
            let mut store = self.store();
            Self::writable(&store)?;
            if !store.set_flag(question_id, flagged)? {
                return Ok(Mirror::Unchanged);
            }
            let session = store.session().ok_or(SessionError::NoSession)?;
            (session.token, session.attempt_id().map(str::to_owned))
        };

        let Some(attempt_id) = attempt_id else {
            return Ok(Mirror::Offline);
        };
        let api = Arc::clone(&self.api);
        let question = question_id.to_string();
        if flagged {
            let op = SyncOp::Flag {
                question_id: question.clone(),
            };
            self.mirror(op, token, async move {
                api.flag_question(&attempt_id, &question).await
            });
        } else {
            let op = SyncOp::Unflag {
                question_id: question.clone(),
            };
            self.mirror(op, token, async move {
                api.unflag_question(&attempt_id, &question).await
            });
        }
        Ok(Mirror::Dispatched)
    }

    pub fn navigate_to(&self, index: usize) -> Result<bool, SessionError> {
        let mut store = self.store();
        Self::writable(&store)?;
        Ok(store.navigate_to(index))
    }

    pub fn next(&self) -> Result<bool, SessionError> {
        let mut store = self.store();
        Self::writable(&store)?;
        Ok(store.next())
    }

    pub fn previous(&self) -> Result<bool, SessionError> {
        let mut store = self.store();
        Self::writable(&store)?;
        Ok(store.previous())
    }

    pub fn set_show_summary(&self, show: bool) {
        self.store().set_show_summary(show);
    }

    // -----------------------------------------------------------------------
    // Timer
    // -----------------------------------------------------------------------

    /// Take one second off the clock.
    ///
    /// Breaks when the countdown should stop. Reaching zero spawns the
    /// forced submission; it happens on the transition only, so at most once.
    pub fn tick(&self) -> ControlFlow<()> {
        let (before, remaining) = {
            let mut store = self.store();
            let before = match store.session() {
                Some(s) if !s.is_closed() && !s.is_paused => s.remaining_secs,
                _ => return ControlFlow::Break(()),
            };
            match store.decrement_timer() {
                Some(remaining) => (before, remaining),
                None => return ControlFlow::Break(()),
            }
        };

        self.observer.on_tick(remaining);
        if remaining > 0 {
            return ControlFlow::Continue(());
        }
        if before > 0 {
            self.spawn_expiry();
        }
        ControlFlow::Break(())
    }

    /// Called when the countdown runs out: submit whatever has been answered.
    pub async fn handle_time_expired(&self) -> Result<ExamResult, SessionError> {
        tracing::info!("time is up, submitting");
        self.observer.on_time_expired();
        self.submit().await
    }

    fn arm_countdown(&self) -> Result<(), SessionError> {
        let remaining = {
            let store = self.store();
            match store.session() {
                Some(s) if !s.is_closed() && !s.is_paused => s.remaining_secs,
                _ => return Ok(()),
            }
        };
        if remaining == 0 {
            self.stop_countdown();
            self.spawn_expiry();
            return Ok(());
        }

        let me = self.me.clone();
        let countdown = Countdown::start(self.config.tick_period, move || match me.upgrade() {
            Some(controller) => controller.tick(),
            None => ControlFlow::Break(()),
        })?;
        let previous = self.countdown().replace(countdown);
        drop(previous);
        Ok(())
    }

    fn stop_countdown(&self) {
        let countdown = self.countdown().take();
        drop(countdown);
    }

    fn spawn_expiry(&self) {
        let Some(controller) = self.me.upgrade() else {
            return;
        };
        self.spawn_tracked(async move {
            match controller.handle_time_expired().await {
                Ok(_) => {}
                Err(SessionError::SubmissionInProgress | SessionError::Completed) => {
                    tracing::debug!("exam already being submitted when time ran out");
                }
                Err(e) => tracing::warn!("automatic submission failed: {e}"),
            }
        });
    }

    // -----------------------------------------------------------------------
    // Submission
    // -----------------------------------------------------------------------

    /// Submit every local answer and close the session.
    ///
    /// On failure the session stays in progress with all answers, so the
    /// caller can retry.
    pub async fn submit(&self) -> Result<ExamResult, SessionError> {
        let _guard = SubmitGuard::acquire(&self.submitting).ok_or(SessionError::SubmissionInProgress)?;
        match self.try_submit().await {
            Ok(result) => {
                self.observer.on_submitted(&result);
                Ok(result)
            }
            Err(err @ (SessionError::Superseded | SessionError::Completed)) => Err(err),
            Err(err) => {
                self.observer.on_submit_failed(&err);
                Err(err)
            }
        }
    }

    async fn try_submit(&self) -> Result<ExamResult, SessionError> {

        let (token, attempt_id, answers) = {
            let store = self.store();
            let session = store.session().ok_or(SessionError::NoSession)?;
            if session.is_closed() {
                return Err(SessionError::Completed);
            }
            let attempt_id = session
                .attempt_id()
                .ok_or(SessionError::NoActiveAttempt)?
                .to_string();
            (session.token, attempt_id, session.submitted_answers())
        };

        let submitted = self.api.submit_attempt(&attempt_id, &answers).await;
        if self.store().token() != Some(token) {
            tracing::debug!(%attempt_id, "discarding submission result for a replaced session");
            return Err(SessionError::Superseded);
        }
        let remote = match submitted {
            Ok(remote) => remote,
            Err(e) => {
                let err = match e.downcast_ref::<ApiError>() {
                    Some(ApiError::NoActiveAttempt) => SessionError::NoActiveAttempt,
                    _ => SessionError::Remote(format!("{e:#}")),
                };
                tracing::error!(
                    %attempt_id,
                    retryable = ApiError::is_retryable_error(&e),
                    "submission failed: {e:#}"
                );
                return Err(err);
            }
        };

        let result = {
            let mut store = self.store();
            store.complete_exam();
            store.set_show_summary(true);
            let session = store.session().ok_or(SessionError::NoSession)?;
            let local = statistics::aggregate(
                &session.questions,
                &session.attempt.answers,
                session.passing_percent,
            );
            let mut result = statistics::reconcile(remote, &local, session.time_spent_secs());
            if result.exam_title.is_empty() {
                result.exam_title = session.exam_title.clone();
            }
            store.record_result(result.clone());
            result
        };
        self.stop_countdown();

        tracing::info!(
            attempt_id = %result.attempt_id,
            score = result.score,
            percentage = result.percentage,
            passing = result.is_passing,
            "exam submitted"
        );
        Ok(result)
    }

    // -----------------------------------------------------------------------
    // Queries
    // -----------------------------------------------------------------------

    /// A copy of the current session.
    pub fn session(&self) -> Option<Session> {
        self.store().session().cloned()
    }

    pub fn progress(&self) -> Option<SessionProgress> {
        self.store().progress()
    }

    pub fn remaining_secs(&self) -> Option<u32> {
        self.store().session().map(|s| s.remaining_secs)
    }

    /// Live statistics of the current session.
    pub fn statistics(&self) -> Option<ExamStatistics> {
        let store = self.store();
        let session = store.session()?;
        Some(statistics::aggregate_live(
            &session.questions,
            &session.attempt.answers,
            session.passing_percent,
        ))
    }

    pub fn is_timer_running(&self) -> bool {
        self.countdown()
            .as_ref()
            .is_some_and(|c| !c.is_finished())
    }

    // -----------------------------------------------------------------------
    // Internals
    // -----------------------------------------------------------------------

    fn store(&self) -> MutexGuard<'_, SessionStore> {
        self.store.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn countdown(&self) -> MutexGuard<'_, Option<Countdown>> {
        self.countdown.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn pending(&self) -> MutexGuard<'_, Vec<JoinHandle<()>>> {
        self.pending.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn open(store: &SessionStore) -> Result<&Session, SessionError> {
        let session = store.session().ok_or(SessionError::NoSession)?;
        if session.is_closed() {
            return Err(SessionError::Completed);
        }
        Ok(session)
    }

    fn writable(store: &SessionStore) -> Result<(), SessionError> {
        let session = Self::open(store)?;
        if session.is_paused {
            return Err(SessionError::Paused);
        }
        if session.remaining_secs == 0 {
            return Err(SessionError::TimeUp);
        }
        Ok(())
    }

    /// Spawn a remote mirror call. Failures are reported unless the session
    /// identified by `token` has been replaced in the meantime.
    fn mirror<F>(&self, op: SyncOp, token: Uuid, call: F)
    where
        F: Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        let me = self.me.clone();
        self.spawn_tracked(async move {
            let outcome = call.await;
            let Some(controller) = me.upgrade() else {
                return;
            };
            let current = controller.store().token() == Some(token);
            match outcome {
                Ok(()) => tracing::debug!(%op, "mirrored"),
                Err(e) if !current => {
                    tracing::debug!(%op, "ignoring sync failure for a replaced session: {e:#}");
                }
                Err(e) => {
                    tracing::warn!(%op, "failed to sync with the attempt service: {e:#}");
                    controller.observer.on_sync_error(&op, &e);
                }
            }
        });
    }

    fn spawn_tracked<F>(&self, task: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        match tokio::runtime::Handle::try_current() {
            Ok(runtime) => {
                let handle = runtime.spawn(task);
                let mut pending = self.pending();
                pending.retain(|h| !h.is_finished());
                pending.push(handle);
            }
            Err(e) => tracing::warn!("no async runtime, background sync skipped: {e}"),
        }
    }
}

/// Clears the in-flight submission flag on drop.
struct SubmitGuard<'a>(&'a AtomicBool);

impl<'a> SubmitGuard<'a> {
    fn acquire(flag: &'a AtomicBool) -> Option<Self> {
        flag.compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| Self(flag))
    }
}

impl Drop for SubmitGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicU32;

    use async_trait::async_trait;

    use crate::label::Label;
    use crate::model::{AnswerOption, Question};
    use crate::traits::SubmittedAnswer;

    #[derive(Default)]
    struct FakeApi {
        fail_start: AtomicBool,
        fail_answers: AtomicBool,
        fail_submit: AtomicBool,
        delay: Mutex<Duration>,
        answer_delay: Mutex<Duration>,
        starts: AtomicU32,
        submits: AtomicU32,
        answers: Mutex<Vec<SubmittedAnswer>>,
        flags: Mutex<Vec<(String, bool)>>,
    }

    impl FakeApi {
        async fn wait(&self) {
            let delay = *self.delay.lock().unwrap();
            if !delay.is_zero() {
                tokio::time::sleep(delay).await;
            }
        }
    }

    fn set(delay: &Mutex<Duration>, value: Duration) {
        *delay.lock().unwrap() = value;
    }

    #[async_trait]
    impl AttemptApi for FakeApi {
        fn name(&self) -> &str {
            "fake"
        }

        async fn start_attempt(&self, exam_id: &str) -> anyhow::Result<String> {
            self.wait().await;
            let n = self.starts.fetch_add(1, Ordering::SeqCst) + 1;
            if self.fail_start.load(Ordering::SeqCst) {
                return Err(ApiError::Network("connection refused".into()).into());
            }
            Ok(format!("{exam_id}-attempt-{n}"))
        }

        async fn submit_attempt(
            &self,
            attempt_id: &str,
            answers: &[SubmittedAnswer],
        ) -> anyhow::Result<ExamResult> {
            self.wait().await;
            self.submits.fetch_add(1, Ordering::SeqCst);
            if self.fail_submit.load(Ordering::SeqCst) {
                return Err(ApiError::Api {
                    status: 503,
                    message: "unavailable".into(),
                }
                .into());
            }
            Ok(ExamResult {
                attempt_id: attempt_id.to_string(),
                exam_id: "exam-1".into(),
                exam_title: String::new(),
                score: 0.0,
                total_marks: 0.0,
                percentage: 0.0,
                passing_marks: 0.0,
                passing_percent: 40.0,
                is_passing: false,
                time_spent_secs: 0,
                total_questions: 0,
                correct_answers: 0,
                incorrect_answers: 0,
                unanswered: answers.len(),
                question_results: vec![],
            })
        }

        async fn flag_question(&self, _: &str, question_id: &str) -> anyhow::Result<()> {
            self.flags.lock().unwrap().push((question_id.to_string(), true));
            Ok(())
        }

        async fn unflag_question(&self, _: &str, question_id: &str) -> anyhow::Result<()> {
            self.flags.lock().unwrap().push((question_id.to_string(), false));
            Ok(())
        }

        async fn answer_question(&self, _: &str, answer: &SubmittedAnswer) -> anyhow::Result<()> {
            let delay = *self.answer_delay.lock().unwrap();
            tokio::time::sleep(delay).await;
            if self.fail_answers.load(Ordering::SeqCst) {
                return Err(ApiError::Timeout(30).into());
            }
            self.answers.lock().unwrap().push(answer.clone());
            Ok(())
        }

        async fn get_exam(&self, exam_id: &str) -> anyhow::Result<Exam> {
            Ok(exam(exam_id, 3, 1))
        }

        async fn get_exam_questions(&self, _: &str) -> anyhow::Result<Vec<Question>> {
            Ok(questions(3))
        }
    }

    #[derive(Default)]
    struct Recorder {
        sync_errors: AtomicU32,
        ticks: AtomicU32,
        expired: AtomicU32,
        submitted: AtomicU32,
        submit_failed: AtomicU32,
    }

    impl SessionObserver for Recorder {
        fn on_attempt_started(&self, _: &StartOutcome) {}
        fn on_sync_error(&self, _: &SyncOp, _: &anyhow::Error) {
            self.sync_errors.fetch_add(1, Ordering::SeqCst);
        }
        fn on_tick(&self, _: u32) {
            self.ticks.fetch_add(1, Ordering::SeqCst);
        }
        fn on_time_expired(&self) {
            self.expired.fetch_add(1, Ordering::SeqCst);
        }
        fn on_submitted(&self, _: &ExamResult) {
            self.submitted.fetch_add(1, Ordering::SeqCst);
        }
        fn on_submit_failed(&self, _: &SessionError) {
            self.submit_failed.fetch_add(1, Ordering::SeqCst);
        }
    }

    fn questions(n: usize) -> Vec<Question> {
        (0..n)
            .map(|i| Question {
                id: format!("q{i}"),
                number: i as u32 + 1,
                text: format!("Question {i}"),
                options: (0..4)
                    .map(|o| AnswerOption {
                        id: format!("q{i}-o{o}"),
                        label: Label::from_index(o).unwrap(),
                        text: format!("option {o}"),
                        is_correct: None,
                    })
                    .collect(),
                correct_label: Label::new('A'),
                correct_answer: None,
                correct_option: None,
                explanation: String::new(),
                marks: 1.0,
            })
            .collect()
    }

    fn exam(id: &str, n: usize, minutes: u32) -> Exam {
        Exam {
            id: id.to_string(),
            title: format!("Exam {id}"),
            description: String::new(),
            duration_minutes: minutes,
            passing_percent: 40.0,
            questions: questions(n),
        }
    }

    fn controller(api: &Arc<FakeApi>, observer: &Arc<Recorder>) -> Arc<SessionController> {
        SessionController::new(
            api.clone(),
            SessionStore::new(),
            observer.clone(),
            ControllerConfig::default(),
        )
    }

    #[tokio::test(start_paused = true)]
    async fn start_records_attempt_and_runs_clock() {
        let api = Arc::new(FakeApi::default());
        let observer = Arc::new(Recorder::default());
        let ctl = controller(&api, &observer);

        let outcome = ctl.start("exam-1").await.unwrap();
        assert_eq!(outcome.attempt_id(), Some("exam-1-attempt-1"));
        assert!(ctl.is_timer_running());

        tokio::time::sleep(Duration::from_millis(3500)).await;
        assert_eq!(ctl.remaining_secs(), Some(57));
        assert_eq!(observer.ticks.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn offline_start_keeps_local_progress() {
        let api = Arc::new(FakeApi::default());
        api.fail_start.store(true, Ordering::SeqCst);
        let observer = Arc::new(Recorder::default());
        let ctl = controller(&api, &observer);

        let outcome = ctl.start_exam(exam("exam-1", 3, 1)).await.unwrap();
        assert!(matches!(outcome, StartOutcome::Offline { .. }));
        assert_eq!(observer.sync_errors.load(Ordering::SeqCst), 1);

        assert_eq!(ctl.answer("q0", AnswerRef::Index(0)), Ok(Mirror::Offline));
        assert_eq!(ctl.flag("q1"), Ok(Mirror::Offline));
        ctl.settle().await;
        assert!(api.answers.lock().unwrap().is_empty());
        assert!(ctl.session().unwrap().answer_for("q0").is_some());

        assert_eq!(ctl.submit().await, Err(SessionError::NoActiveAttempt));
        assert_eq!(api.submits.load(Ordering::SeqCst), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn answers_are_mirrored_with_option_ids() {
        let api = Arc::new(FakeApi::default());
        let observer = Arc::new(Recorder::default());
        let ctl = controller(&api, &observer);
        ctl.start_exam(exam("exam-1", 3, 10)).await.unwrap();

        assert_eq!(ctl.answer("q0", AnswerRef::Label('c')), Ok(Mirror::Dispatched));
        assert_eq!(ctl.flag("q2"), Ok(Mirror::Dispatched));
        assert_eq!(ctl.flag("q2"), Ok(Mirror::Unchanged));
        assert!(!ctl.toggle_flag("q2").unwrap());
        ctl.settle().await;

        let answers = api.answers.lock().unwrap();
        assert_eq!(answers.len(), 1);
        assert_eq!(answers[0].selected_option_id, "q0-o2");
        assert_eq!(answers[0].selected_label, Label::new('C'));
        assert_eq!(
            *api.flags.lock().unwrap(),
            vec![("q2".to_string(), true), ("q2".to_string(), false)]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn mirror_failure_is_reported_not_rolled_back() {
        let api = Arc::new(FakeApi::default());
        api.fail_answers.store(true, Ordering::SeqCst);
        let observer = Arc::new(Recorder::default());
        let ctl = controller(&api, &observer);
        ctl.start_exam(exam("exam-1", 3, 10)).await.unwrap();

        ctl.answer("q1", AnswerRef::Index(1)).unwrap();
        ctl.settle().await;

        assert_eq!(observer.sync_errors.load(Ordering::SeqCst), 1);
        let session = ctl.session().unwrap();
        assert_eq!(session.answer_for("q1").unwrap().selected, AnswerRef::Index(1));
    }

    #[tokio::test(start_paused = true)]
    async fn late_failure_for_replaced_session_is_ignored() {
        let api = Arc::new(FakeApi::default());
        let observer = Arc::new(Recorder::default());
        let ctl = controller(&api, &observer);
        ctl.start_exam(exam("exam-1", 3, 10)).await.unwrap();

        api.fail_answers.store(true, Ordering::SeqCst);
        set(&api.answer_delay, Duration::from_secs(2));
        ctl.answer("q0", AnswerRef::Index(0)).unwrap();

        ctl.start_exam(exam("exam-2", 2, 10)).await.unwrap();
        ctl.settle().await;

        assert_eq!(observer.sync_errors.load(Ordering::SeqCst), 0);
        assert_eq!(ctl.session().unwrap().exam_id(), "exam-2");
    }

    #[tokio::test(start_paused = true)]
    async fn overlapping_start_is_superseded() {
        let api = Arc::new(FakeApi::default());
        set(&api.delay, Duration::from_secs(1));
        let observer = Arc::new(Recorder::default());
        let ctl = controller(&api, &observer);

        let (first, second) = tokio::join!(
            ctl.start_exam(exam("exam-1", 3, 10)),
            ctl.start_exam(exam("exam-2", 3, 10)),
        );
        assert_eq!(first, Err(SessionError::Superseded));
        assert!(second.is_ok());
        let session = ctl.session().unwrap();
        assert_eq!(session.exam_id(), "exam-2");
        assert_eq!(session.attempt_id(), Some("exam-2-attempt-2"));
    }

    #[tokio::test(start_paused = true)]
    async fn paused_session_rejects_input_and_stops_clock() {
        let api = Arc::new(FakeApi::default());
        let observer = Arc::new(Recorder::default());
        let ctl = controller(&api, &observer);
        ctl.start_exam(exam("exam-1", 3, 1)).await.unwrap();

        tokio::time::sleep(Duration::from_millis(2500)).await;
        ctl.pause().unwrap();
        assert!(!ctl.is_timer_running());
        assert_eq!(ctl.answer("q0", AnswerRef::Index(0)), Err(SessionError::Paused));
        assert_eq!(ctl.next(), Err(SessionError::Paused));
        assert_eq!(ctl.flag("q0"), Err(SessionError::Paused));

        tokio::time::sleep(Duration::from_secs(10)).await;
        assert_eq!(ctl.remaining_secs(), Some(58));

        ctl.resume().unwrap();
        tokio::time::sleep(Duration::from_millis(1500)).await;
        assert_eq!(ctl.remaining_secs(), Some(57));
        assert_eq!(ctl.next(), Ok(true));
    }

    #[tokio::test(start_paused = true)]
    async fn expiry_submits_exactly_once() {
        let api = Arc::new(FakeApi::default());
        let observer = Arc::new(Recorder::default());
        let ctl = controller(&api, &observer);
        ctl.start_exam(exam("exam-1", 3, 1)).await.unwrap();
        ctl.answer("q0", AnswerRef::Index(0)).unwrap();

        tokio::time::sleep(Duration::from_secs(75)).await;
        ctl.settle().await;

        assert_eq!(api.submits.load(Ordering::SeqCst), 1);
        assert_eq!(observer.expired.load(Ordering::SeqCst), 1);
        assert_eq!(observer.submitted.load(Ordering::SeqCst), 1);
        assert_eq!(observer.ticks.load(Ordering::SeqCst), 60);
        let session = ctl.session().unwrap();
        assert!(session.is_completed());
        assert_eq!(session.remaining_secs, 0);
        assert!(!ctl.is_timer_running());
    }

    #[tokio::test(start_paused = true)]
    async fn offline_expiry_reports_failure_and_locks_input() {
        let api = Arc::new(FakeApi::default());
        api.fail_start.store(true, Ordering::SeqCst);
        let observer = Arc::new(Recorder::default());
        let ctl = controller(&api, &observer);
        ctl.start_exam(exam("exam-1", 3, 1)).await.unwrap();
        ctl.answer("q0", AnswerRef::Index(0)).unwrap();

        tokio::time::sleep(Duration::from_secs(75)).await;
        ctl.settle().await;

        assert_eq!(observer.expired.load(Ordering::SeqCst), 1);
        assert_eq!(observer.submit_failed.load(Ordering::SeqCst), 1);
        assert_eq!(api.submits.load(Ordering::SeqCst), 0);
        let session = ctl.session().unwrap();
        assert_eq!(session.remaining_secs, 0);
        assert!(!session.is_closed());

        assert_eq!(ctl.answer("q1", AnswerRef::Index(1)), Err(SessionError::TimeUp));
        assert_eq!(ctl.flag("q1"), Err(SessionError::TimeUp));
        assert_eq!(ctl.next(), Err(SessionError::TimeUp));
        assert!(ctl.session().unwrap().answer_for("q1").is_none());

        assert_eq!(ctl.submit().await, Err(SessionError::NoActiveAttempt));
        assert_eq!(observer.submit_failed.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn failed_submit_keeps_session_open() {
        let api = Arc::new(FakeApi::default());
        api.fail_submit.store(true, Ordering::SeqCst);
        let observer = Arc::new(Recorder::default());
        let ctl = controller(&api, &observer);
        ctl.start_exam(exam("exam-1", 4, 10)).await.unwrap();
        ctl.answer("q0", AnswerRef::Index(0)).unwrap();
        ctl.answer("q1", AnswerRef::Index(3)).unwrap();

        assert!(matches!(ctl.submit().await, Err(SessionError::Remote(_))));
        assert_eq!(observer.submit_failed.load(Ordering::SeqCst), 1);
        let session = ctl.session().unwrap();
        assert!(!session.is_closed());
        assert_eq!(session.attempt.answers.len(), 2);

        api.fail_submit.store(false, Ordering::SeqCst);
        let result = ctl.submit().await.unwrap();
        assert_eq!(result.correct_answers, 1);
        assert_eq!(result.incorrect_answers, 1);
        assert_eq!(result.unanswered, 2);
        assert_eq!(result.score, 0.75);
        assert_eq!(result.exam_title, "Exam exam-1");
        let session = ctl.session().unwrap();
        assert!(session.is_completed());
        assert_eq!(session.result, Some(result));
        assert_eq!(ctl.submit().await, Err(SessionError::Completed));
        assert_eq!(ctl.answer("q2", AnswerRef::Index(0)), Err(SessionError::Completed));
    }

    #[tokio::test(start_paused = true)]
    async fn concurrent_submit_rejected() {
        let api = Arc::new(FakeApi::default());
        let observer = Arc::new(Recorder::default());
        let ctl = controller(&api, &observer);
        ctl.start_exam(exam("exam-1", 2, 10)).await.unwrap();
        set(&api.delay, Duration::from_secs(1));

        let (first, second) = tokio::join!(ctl.submit(), ctl.submit());
        assert!(first.is_ok());
        assert_eq!(second, Err(SessionError::SubmissionInProgress));
        assert_eq!(api.submits.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn live_statistics_follow_answers() {
        let api = Arc::new(FakeApi::default());
        let observer = Arc::new(Recorder::default());
        let ctl = controller(&api, &observer);
        ctl.start_exam(exam("exam-1", 3, 10)).await.unwrap();
        ctl.answer("q0", AnswerRef::Index(0)).unwrap();
        ctl.answer("q1", AnswerRef::Text("B".into())).unwrap();

        let stats = ctl.statistics().unwrap();
        assert_eq!(stats.correct_answers, 1);
        assert_eq!(stats.incorrect_answers, 1);
        assert_eq!(stats.unanswered, 1);
        assert_eq!(ctl.progress().unwrap().answered, 2);
    }

    #[tokio::test(start_paused = true)]
    async fn abandon_stops_clock() {
        let api = Arc::new(FakeApi::default());
        let observer = Arc::new(Recorder::default());
        let ctl = controller(&api, &observer);
        ctl.start_exam(exam("exam-1", 2, 10)).await.unwrap();

        assert!(ctl.abandon());
        assert!(!ctl.is_timer_running());
        assert_eq!(ctl.submit().await, Err(SessionError::Completed));
        assert!(!ctl.resume_session().unwrap());
    }
}
