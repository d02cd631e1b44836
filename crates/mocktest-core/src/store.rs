//! Session store: the single mutable owner of the live session.
//!
//! Every mutation is synchronous. When a storage backend is attached, each
//! mutation queues a snapshot for a background task which coalesces snapshots
//! arriving within the debounce window into a single write (latest wins).

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use uuid::Uuid;

use crate::error::SessionError;
use crate::label::AnswerRef;
use crate::model::{AttemptStatus, Exam, ExamResult, Question, UserAnswer};
use crate::session::{Session, SessionProgress, SessionSnapshot};
use crate::traits::SnapshotStorage;

/// Default window for coalescing durable writes.
pub const DEFAULT_DEBOUNCE: Duration = Duration::from_millis(500);

/// Owner of the in-progress session.
#[derive(Default)]
pub struct SessionStore {
    session: Option<Session>,
    persister: Option<Persister>,
}

impl SessionStore {
    /// In-memory store without durable persistence.
    pub fn new() -> Self {
        Self::default()
    }

    /// Store that persists snapshots to `storage`.
    ///
    /// Must be called from within a tokio runtime.
    pub fn with_storage(
        storage: Arc<dyn SnapshotStorage>,
        debounce: Duration,
    ) -> Result<Self, SessionError> {
        Ok(Self {
            session: None,
            persister: Some(Persister::spawn(storage, debounce)?),
        })
    }

    /// Rehydrate the stored session, if any, and keep persisting to `storage`.
    pub fn restore(
        storage: Arc<dyn SnapshotStorage>,
        debounce: Duration,
    ) -> Result<Self, SessionError> {
        let snapshot = storage
            .load()
            .map_err(|e| SessionError::Storage(format!("{e:#}")))?;
        let session = snapshot.map(SessionSnapshot::into_session).transpose()?;
        if let Some(session) = &session {
            tracing::info!(
                exam_id = %session.exam_id(),
                remaining_secs = session.remaining_secs,
                "restored exam session"
            );
        }
        Ok(Self {
            session,
            persister: Some(Persister::spawn(storage, debounce)?),
        })
    }

    pub fn session(&self) -> Option<&Session> {
        self.session.as_ref()
    }

    /// Token of the current session, if any.
    pub fn token(&self) -> Option<Uuid> {
        self.session.as_ref().map(|s| s.token)
    }

    pub fn progress(&self) -> Option<SessionProgress> {
        self.session.as_ref().map(Session::progress)
    }

    /// Begin a new exam, discarding any previous session first, both in
    /// memory and in durable storage.
    pub fn start_exam(
        &mut self,
        exam_id: &str,
        questions: Vec<Question>,
        duration_minutes: u32,
    ) -> Result<(), SessionError> {
        self.clear();
        let session = Session::new(exam_id, questions, duration_minutes.saturating_mul(60))?;
        tracing::info!(
            exam_id,
            questions = session.questions.len(),
            duration_secs = session.duration_secs,
            "exam session started"
        );
        self.session = Some(session);
        self.persist();
        Ok(())
    }

    /// [`start_exam`](Self::start_exam) taking title and pass mark from the exam.
    pub fn start(&mut self, exam: &Exam) -> Result<(), SessionError> {
        self.start_exam(&exam.id, exam.questions.clone(), exam.duration_minutes)?;
        if let Some(session) = self.session.as_mut() {
            session.exam_title = exam.title.clone();
            session.passing_percent = exam.passing_percent;
        }
        self.persist();
        Ok(())
    }

    pub fn set_attempt_id(&mut self, attempt_id: &str) -> Result<(), SessionError> {
        let session = self.open_session_mut()?;
        session.attempt.id = Some(attempt_id.to_string());
        self.persist();
        Ok(())
    }

    /// Record an answer, replacing any earlier answer to the same question.
    ///
    /// Time spent is the countdown consumed since the question became current.
    pub fn answer_question(
        &mut self,
        question_id: &str,
        selected: AnswerRef,
    ) -> Result<UserAnswer, SessionError> {
        let session = self.open_session_mut()?;
        if session.question(question_id).is_none() {
            return Err(SessionError::UnknownQuestion(question_id.to_string()));
        }
        let on_current = session
            .current_question()
            .is_some_and(|q| q.id == question_id);
        let time_spent_secs = if on_current {
            session
                .entered_at_remaining
                .saturating_sub(session.remaining_secs)
        } else {
            0
        };

        let answer = UserAnswer {
            question_id: question_id.to_string(),
            selected,
            time_spent_secs,
        };
        session
            .attempt
            .answers
            .insert(question_id.to_string(), answer.clone());
        self.persist();
        Ok(answer)
    }

    /// Remove the answer to a question. Returns `false` if there was none.
    pub fn clear_answer(&mut self, question_id: &str) -> Result<bool, SessionError> {
        let session = self.open_session_mut()?;
        let removed = session.attempt.answers.remove(question_id).is_some();
        if removed {
            self.persist();
        }
        Ok(removed)
    }

    /// Flip the flag on a question. Returns the new state.
    pub fn toggle_flag(&mut self, question_id: &str) -> Result<bool, SessionError> {
        let flagged = {
            let session = self.open_session_mut()?;
            !session.is_flagged(question_id)
        };
        self.set_flag(question_id, flagged)?;
        Ok(flagged)
    }

    /// Set the flag on a question. Returns `true` if the state changed.
    pub fn set_flag(&mut self, question_id: &str, flagged: bool) -> Result<bool, SessionError> {
        let session = self.open_session_mut()?;
        if session.question(question_id).is_none() {
            return Err(SessionError::UnknownQuestion(question_id.to_string()));
        }
        let changed = if flagged {
            session.attempt.flagged.insert(question_id.to_string())
        } else {
            session.attempt.flagged.remove(question_id)
        };
        if changed {
            self.persist();
        }
        Ok(changed)
    }

    /// Move to `index`. Out-of-range targets and closed sessions are no-ops.
    pub fn navigate_to(&mut self, index: usize) -> bool {
        let Some(session) = self.session.as_mut() else {
            return false;
        };
        if session.is_closed() || index >= session.questions.len() {
            return false;
        }
        session.current_index = index;
        session.visited.insert(index);
        session.entered_at_remaining = session.remaining_secs;
        self.persist();
        true
    }

    pub fn next(&mut self) -> bool {
        match self.session.as_ref() {
            Some(session) => self.navigate_to(session.current_index + 1),
            None => false,
        }
    }

    pub fn previous(&mut self) -> bool {
        match self.session.as_ref().and_then(|s| s.current_index.checked_sub(1)) {
            Some(index) => self.navigate_to(index),
            None => false,
        }
    }

    /// Take one second off the countdown, never going below zero.
    ///
    /// Returns the remaining seconds, or `None` if there is no open session.
    pub fn decrement_timer(&mut self) -> Option<u32> {
        let session = self.session.as_mut().filter(|s| !s.is_closed())?;
        session.remaining_secs = session.remaining_secs.saturating_sub(1);
        let remaining = session.remaining_secs;
        self.persist();
        Some(remaining)
    }

    /// Record the paused flag. The store itself keeps accepting mutations.
    pub fn pause(&mut self) {
        self.set_paused(true);
    }

    pub fn resume(&mut self) {
        self.set_paused(false);
    }

    fn set_paused(&mut self, paused: bool) {
        if let Some(session) = self.session.as_mut().filter(|s| !s.is_closed()) {
            if session.is_paused != paused {
                session.is_paused = paused;
                self.persist();
            }
        }
    }

    /// Close the session as completed. Idempotent: returns `false` (and
    /// changes nothing) if it was already closed.
    pub fn complete_exam(&mut self) -> bool {
        self.close(AttemptStatus::Completed)
    }

    /// Close the session as abandoned and drop its durable record.
    pub fn abandon(&mut self) -> bool {
        let closed = self.close(AttemptStatus::Abandoned);
        if closed {
            if let Some(persister) = &self.persister {
                persister.send(PersistCommand::Clear);
            }
        }
        closed
    }

    fn close(&mut self, status: AttemptStatus) -> bool {
        let Some(session) = self.session.as_mut().filter(|s| !s.is_closed()) else {
            return false;
        };
        session.attempt.status = status;
        session.attempt.ended_at = Some(Utc::now());
        session.is_paused = false;
        tracing::info!(exam_id = %session.exam_id(), %status, "exam session closed");
        if status == AttemptStatus::Completed {
            self.persist();
        }
        true
    }

    /// Keep the submitted result with the completed session.
    pub fn record_result(&mut self, result: ExamResult) {
        if let Some(session) = self.session.as_mut().filter(|s| s.is_completed()) {
            session.result = Some(result);
            self.persist();
        }
    }

    pub fn set_show_summary(&mut self, show: bool) {
        if let Some(session) = self.session.as_mut() {
            session.show_summary = show;
        }
    }

    /// Drop the session from memory and durable storage. Pending writes are discarded.
    pub fn clear(&mut self) {
        self.session = None;
        if let Some(persister) = &self.persister {
            persister.send(PersistCommand::Clear);
        }
    }

    /// Write any pending snapshot now.
    ///
    /// The flush is requested when this is called; the returned future only
    /// waits for it, so it can be awaited after releasing a lock on the store.
    pub fn flush(&self) -> impl Future<Output = Result<(), SessionError>> + Send + 'static {
        let ack = self.persister.as_ref().map(Persister::request_flush);
        async move {
            let Some(ack) = ack else {
                return Ok(());
            };
            ack.await
                .map_err(|_| SessionError::Storage("persistence task stopped".into()))?
                .map_err(SessionError::Storage)
        }
    }

    fn open_session_mut(&mut self) -> Result<&mut Session, SessionError> {
        let session = self.session.as_mut().ok_or(SessionError::NoSession)?;
        if session.is_closed() {
            return Err(SessionError::Completed);
        }
        Ok(session)
    }

    fn persist(&self) {
        if let (Some(persister), Some(session)) = (&self.persister, &self.session) {
            persister.send(PersistCommand::Save(Box::new(SessionSnapshot::from(session))));
        }
    }
}

// ---------------------------------------------------------------------------
// Debounced persistence
// ---------------------------------------------------------------------------

enum PersistCommand {
    Save(Box<SessionSnapshot>),
    Clear,
    Flush(oneshot::Sender<Result<(), String>>),
}

/// Handle to the background persistence task.
///
/// Dropping the handle closes the channel; the task writes whatever is still
/// pending and exits.
struct Persister {
    tx: mpsc::UnboundedSender<PersistCommand>,
    _task: JoinHandle<()>,
}

impl Persister {
    fn spawn(storage: Arc<dyn SnapshotStorage>, debounce: Duration) -> Result<Self, SessionError> {
        let runtime = tokio::runtime::Handle::try_current()
            .map_err(|e| SessionError::Runtime(e.to_string()))?;
        let (tx, rx) = mpsc::unbounded_channel();
        let task = runtime.spawn(run_persister(storage, debounce, rx));
        Ok(Self { tx, _task: task })
    }

    fn send(&self, command: PersistCommand) {
        if self.tx.send(command).is_err() {
            tracing::error!("session persistence task is gone, snapshot not saved");
        }
    }

    fn request_flush(&self) -> oneshot::Receiver<Result<(), String>> {
        let (ack, rx) = oneshot::channel();
        self.send(PersistCommand::Flush(ack));
        rx
    }
}

async fn run_persister(
    storage: Arc<dyn SnapshotStorage>,
    debounce: Duration,
    mut rx: mpsc::UnboundedReceiver<PersistCommand>,
) {
    let mut pending: Option<Box<SessionSnapshot>> = None;
    let mut deadline = Instant::now();

    loop {
        tokio::select! {
            command = rx.recv() => match command {
                Some(PersistCommand::Save(snapshot)) => {
                    if pending.is_none() {
                        deadline = Instant::now() + debounce;
                    }
                    pending = Some(snapshot);
                }
                Some(PersistCommand::Clear) => {
                    pending = None;
                    if let Err(e) = storage.clear() {
                        tracing::error!("failed to clear stored session: {e:#}");
                    }
                }
                Some(PersistCommand::Flush(ack)) => {
                    let outcome = write(storage.as_ref(), pending.take()).map_err(|e| format!("{e:#}"));
                    let _ = ack.send(outcome);
                }
                None => {
                    if let Err(e) = write(storage.as_ref(), pending.take()) {
                        tracing::error!("failed to save session on shutdown: {e:#}");
                    }
                    break;
                }
            },
            _ = tokio::time::sleep_until(deadline), if pending.is_some() => {
                if let Err(e) = write(storage.as_ref(), pending.take()) {
                    tracing::error!("failed to save session: {e:#}");
                }
            }
        }
    }
}

fn write(storage: &dyn SnapshotStorage, snapshot: Option<Box<SessionSnapshot>>) -> anyhow::Result<()> {
    let Some(snapshot) = snapshot else {
        return Ok(());
    };
    storage.save(&snapshot)?;
    tracing::debug!(
        exam_id = %snapshot.exam_id,
        time_remaining = snapshot.time_remaining,
        "session snapshot saved"
    );
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    use crate::label::Label;
    use crate::model::AnswerOption;

    #[derive(Default)]
    struct RecordingStorage {
        saved: Mutex<Vec<SessionSnapshot>>,
        current: Mutex<Option<SessionSnapshot>>,
        clears: Mutex<u32>,
    }

    impl RecordingStorage {
        fn writes(&self) -> usize {
            self.saved.lock().unwrap().len()
        }

        fn current(&self) -> Option<SessionSnapshot> {
            self.current.lock().unwrap().clone()
        }
    }

    impl SnapshotStorage for RecordingStorage {
        fn load(&self) -> anyhow::Result<Option<SessionSnapshot>> {
            Ok(self.current())
        }

        fn save(&self, snapshot: &SessionSnapshot) -> anyhow::Result<()> {
            self.saved.lock().unwrap().push(snapshot.clone());
            *self.current.lock().unwrap() = Some(snapshot.clone());
            Ok(())
        }

        fn clear(&self) -> anyhow::Result<()> {
            *self.clears.lock().unwrap() += 1;
            *self.current.lock().unwrap() = None;
            Ok(())
        }
    }

    fn questions(prefix: &str, n: usize) -> Vec<Question> {
        (0..n)
            .map(|i| Question {
                id: format!("{prefix}-q{i}"),
                number: i as u32 + 1,
                text: format!("Question {i}"),
                options: (0..4)
                    .map(|o| AnswerOption {
                        id: format!("{prefix}-q{i}-o{o}"),
                        label: Label::from_index(o).unwrap(),
                        text: format!("option {o}"),
                        is_correct: None,
                    })
                    .collect(),
                correct_label: Label::from_index(0),
                correct_answer: None,
                correct_option: None,
                explanation: String::new(),
                marks: 1.0,
            })
            .collect()
    }

    fn started(n: usize) -> SessionStore {
        let mut store = SessionStore::new();
        store.start_exam("exam-1", questions("a", n), 10).unwrap();
        store
    }

    #[test]
    fn start_initialises_session() {
        let store = started(3);
        let session = store.session().unwrap();
        assert_eq!(session.remaining_secs, 600);
        assert_eq!(session.current_index, 0);
        assert!(session.visited.contains(&0));
        assert!(!session.is_paused);
        assert!(!session.is_closed());
    }

    #[test]
    fn restart_leaves_no_residue() {
        let mut store = started(3);
        store.answer_question("a-q0", AnswerRef::Index(1)).unwrap();
        store.toggle_flag("a-q1").unwrap();
        store.navigate_to(2);

        store.start_exam("exam-2", questions("b", 2), 5).unwrap();
        let session = store.session().unwrap();
        assert_eq!(session.exam_id(), "exam-2");
        assert!(session.attempt.answers.is_empty());
        assert!(session.attempt.flagged.is_empty());
        assert_eq!(session.current_index, 0);
        assert_eq!(session.visited.len(), 1);
        assert_eq!(session.remaining_secs, 300);
    }

    #[test]
    fn answers_overwrite() {
        let mut store = started(2);
        store.answer_question("a-q0", AnswerRef::Index(1)).unwrap();
        store.answer_question("a-q0", AnswerRef::Label('d')).unwrap();
        let answers = &store.session().unwrap().attempt.answers;
        assert_eq!(answers.len(), 1);
        assert_eq!(answers["a-q0"].selected, AnswerRef::Label('d'));
    }

    #[test]
    fn unknown_question_rejected() {
        let mut store = started(2);
        assert_eq!(
            store.answer_question("zzz", AnswerRef::Index(0)),
            Err(SessionError::UnknownQuestion("zzz".into()))
        );
        assert_eq!(
            store.toggle_flag("zzz"),
            Err(SessionError::UnknownQuestion("zzz".into()))
        );
    }

    #[test]
    fn no_session_errors() {
        let mut store = SessionStore::new();
        assert_eq!(
            store.answer_question("q", AnswerRef::Index(0)),
            Err(SessionError::NoSession)
        );
        assert!(!store.next());
        assert_eq!(store.decrement_timer(), None);
    }

    #[test]
    fn flag_toggle_is_symmetric() {
        let mut store = started(2);
        assert_eq!(store.toggle_flag("a-q1"), Ok(true));
        assert!(store.session().unwrap().is_flagged("a-q1"));
        assert_eq!(store.toggle_flag("a-q1"), Ok(false));
        assert!(!store.session().unwrap().is_flagged("a-q1"));
        assert_eq!(store.set_flag("a-q1", false), Ok(false));
    }

    #[test]
    fn navigation_is_bounds_checked() {
        let mut store = started(3);
        assert!(!store.previous());
        assert!(store.next());
        assert!(store.next());
        assert!(!store.next());
        assert_eq!(store.session().unwrap().current_index, 2);
        assert!(!store.navigate_to(3));
        assert!(store.navigate_to(1));
        assert!(store.previous());
        let session = store.session().unwrap();
        assert_eq!(session.current_index, 0);
        assert_eq!(session.visited.len(), 3);
    }

    #[test]
    fn timer_floors_at_zero() {
        let mut store = SessionStore::new();
        store.start_exam("e", questions("a", 1), 0).unwrap();
        assert_eq!(store.decrement_timer(), Some(0));
        assert_eq!(store.decrement_timer(), Some(0));
    }

    #[test]
    fn time_spent_measured_from_entering_question() {
        let mut store = started(2);
        for _ in 0..5 {
            store.decrement_timer();
        }
        store.navigate_to(1);
        for _ in 0..7 {
            store.decrement_timer();
        }
        let answer = store.answer_question("a-q1", AnswerRef::Index(0)).unwrap();
        assert_eq!(answer.time_spent_secs, 7);
        let other = store.answer_question("a-q0", AnswerRef::Index(0)).unwrap();
        assert_eq!(other.time_spent_secs, 0);
    }

    #[test]
    fn pause_only_records_flag() {
        let mut store = started(2);
        store.pause();
        assert!(store.session().unwrap().is_paused);
        store.answer_question("a-q0", AnswerRef::Index(0)).unwrap();
        store.resume();
        assert!(!store.session().unwrap().is_paused);
    }

    #[test]
    fn complete_is_idempotent() {
        let mut store = started(2);
        store.answer_question("a-q0", AnswerRef::Index(0)).unwrap();
        assert!(store.complete_exam());
        let first = store.session().unwrap().clone();

        assert!(!store.complete_exam());
        let second = store.session().unwrap();
        assert_eq!(second.attempt, first.attempt);
        assert_eq!(second.remaining_secs, first.remaining_secs);
        assert!(second.is_completed());
    }

    #[test]
    fn closed_session_rejects_mutation() {
        let mut store = started(2);
        store.complete_exam();
        assert_eq!(
            store.answer_question("a-q0", AnswerRef::Index(0)),
            Err(SessionError::Completed)
        );
        assert!(!store.navigate_to(1));
        assert_eq!(store.decrement_timer(), None);
        assert_eq!(store.toggle_flag("a-q0"), Err(SessionError::Completed));
    }

    #[test]
    fn abandon_closes_session() {
        let mut store = started(2);
        assert!(store.abandon());
        assert_eq!(
            store.session().unwrap().attempt.status,
            AttemptStatus::Abandoned
        );
        assert!(!store.complete_exam());
    }

    #[test]
    fn with_storage_requires_runtime() {
        let storage = Arc::new(RecordingStorage::default());
        assert!(matches!(
            SessionStore::with_storage(storage, DEFAULT_DEBOUNCE),
            Err(SessionError::Runtime(_))
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn rapid_mutations_coalesce_into_one_write() {
        let storage = Arc::new(RecordingStorage::default());
        let mut store = SessionStore::with_storage(storage.clone(), DEFAULT_DEBOUNCE).unwrap();
        store.start_exam("exam-1", questions("a", 5), 10).unwrap();
        for _ in 0..4 {
            store.next();
        }
        store.answer_question("a-q4", AnswerRef::Index(2)).unwrap();

        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(storage.writes(), 0);

        tokio::time::sleep(Duration::from_millis(500)).await;
        assert_eq!(storage.writes(), 1);
        let stored = storage.current().unwrap();
        assert_eq!(stored.current_question_index, 4);
        assert_eq!(stored.visited_questions, vec![0, 1, 2, 3, 4]);
        assert!(stored.answers.contains_key("a-q4"));
    }

    #[tokio::test(start_paused = true)]
    async fn flush_writes_immediately() {
        let storage = Arc::new(RecordingStorage::default());
        let mut store = SessionStore::with_storage(storage.clone(), DEFAULT_DEBOUNCE).unwrap();
        store.start_exam("exam-1", questions("a", 2), 10).unwrap();
        store.toggle_flag("a-q1").unwrap();
        store.flush().await.unwrap();
        assert_eq!(storage.writes(), 1);
        assert_eq!(
            storage.current().unwrap().flagged_questions,
            vec!["a-q1".to_string()]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn start_clears_durable_state_first() {
        let storage = Arc::new(RecordingStorage::default());
        let mut store = SessionStore::with_storage(storage.clone(), DEFAULT_DEBOUNCE).unwrap();
        store.start_exam("exam-1", questions("a", 2), 10).unwrap();
        store.answer_question("a-q0", AnswerRef::Index(0)).unwrap();
        store.flush().await.unwrap();

        store.start_exam("exam-2", questions("b", 2), 10).unwrap();
        store.flush().await.unwrap();

        assert_eq!(*storage.clears.lock().unwrap(), 2);
        let stored = storage.current().unwrap();
        assert_eq!(stored.exam_id, "exam-2");
        assert!(stored.answers.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn restore_rehydrates_session() {
        let storage = Arc::new(RecordingStorage::default());
        {
            let mut store =
                SessionStore::with_storage(storage.clone(), DEFAULT_DEBOUNCE).unwrap();
            store.start_exam("exam-1", questions("a", 3), 10).unwrap();
            store.set_attempt_id("att-1").unwrap();
            store.navigate_to(2);
            store.toggle_flag("a-q2").unwrap();
            store.decrement_timer();
            store.flush().await.unwrap();
        }

        let store = SessionStore::restore(storage.clone(), DEFAULT_DEBOUNCE).unwrap();
        let session = store.session().unwrap();
        assert_eq!(session.attempt_id(), Some("att-1"));
        assert_eq!(session.current_index, 2);
        assert_eq!(session.remaining_secs, 599);
        assert!(session.is_flagged("a-q2"));
    }

    #[tokio::test(start_paused = true)]
    async fn restore_without_record_is_empty() {
        let storage = Arc::new(RecordingStorage::default());
        let store = SessionStore::restore(storage, DEFAULT_DEBOUNCE).unwrap();
        assert!(store.session().is_none());
    }
}
