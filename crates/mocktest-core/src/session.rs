//! The live exam session and its durable snapshot.
//!
//! A [`Session`] wraps one [`Attempt`] plus client-only navigation state. The
//! snapshot is the serialisation boundary: ordered sets become arrays there
//! and nowhere else.

use std::collections::BTreeSet;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::SessionError;
use crate::label::{option_for, resolve_answer};
use crate::model::{Answers, Attempt, AttemptStatus, ExamResult, Question, UserAnswer};
use crate::scoring::DEFAULT_PASSING_PERCENT;
use crate::traits::SubmittedAnswer;

/// Fixed key of the durable session record.
pub const SESSION_KEY: &str = "exam-session";

/// The in-progress (or just finished) exam session.
#[derive(Debug, Clone)]
pub struct Session {
    /// Identifies this session instance; changes on every start or restore.
    pub token: Uuid,
    pub attempt: Attempt,
    pub exam_title: String,
    pub passing_percent: f64,
    pub questions: Vec<Question>,
    /// Always within `0..questions.len()`.
    pub current_index: usize,
    pub duration_secs: u32,
    pub remaining_secs: u32,
    pub visited: BTreeSet<usize>,
    pub is_paused: bool,
    /// Set once the attempt has been submitted.
    pub result: Option<ExamResult>,
    /// Transient UI flag, not persisted.
    pub show_summary: bool,
    /// Remaining seconds when the current question was entered.
    pub(crate) entered_at_remaining: u32,
}

impl Session {
    pub fn new(
        exam_id: &str,
        questions: Vec<Question>,
        duration_secs: u32,
    ) -> Result<Self, SessionError> {
        if questions.is_empty() {
            return Err(SessionError::EmptyExam);
        }
        Ok(Self {
            token: Uuid::new_v4(),
            attempt: Attempt::new(exam_id),
            exam_title: String::new(),
            passing_percent: DEFAULT_PASSING_PERCENT,
            questions,
            current_index: 0,
            duration_secs,
            remaining_secs: duration_secs,
            visited: BTreeSet::from([0]),
            is_paused: false,
            result: None,
            show_summary: false,
            entered_at_remaining: duration_secs,
        })
    }

    pub fn exam_id(&self) -> &str {
        &self.attempt.exam_id
    }

    pub fn attempt_id(&self) -> Option<&str> {
        self.attempt.id.as_deref()
    }

    pub fn is_completed(&self) -> bool {
        self.attempt.status == AttemptStatus::Completed
    }

    /// Completed or abandoned; no further mutation is accepted.
    pub fn is_closed(&self) -> bool {
        !self.attempt.is_open()
    }

    pub fn question(&self, question_id: &str) -> Option<&Question> {
        self.questions.iter().find(|q| q.id == question_id)
    }

    pub fn current_question(&self) -> Option<&Question> {
        self.questions.get(self.current_index)
    }

    pub fn answer_for(&self, question_id: &str) -> Option<&UserAnswer> {
        self.attempt.answers.get(question_id)
    }

    pub fn is_flagged(&self, question_id: &str) -> bool {
        self.attempt.flagged.contains(question_id)
    }

    /// Seconds of the countdown used so far.
    pub fn time_spent_secs(&self) -> u32 {
        self.duration_secs.saturating_sub(self.remaining_secs)
    }

    pub fn progress(&self) -> SessionProgress {
        let total = self.questions.len();
        let answered = self
            .questions
            .iter()
            .filter(|q| self.attempt.answers.contains_key(&q.id))
            .count();
        let flagged = self
            .questions
            .iter()
            .filter(|q| self.attempt.flagged.contains(&q.id))
            .count();
        let answered_and_flagged = self
            .questions
            .iter()
            .filter(|q| {
                self.attempt.answers.contains_key(&q.id) && self.attempt.flagged.contains(&q.id)
            })
            .count();
        let visited = self.visited.iter().filter(|i| **i < total).count();

        SessionProgress {
            total,
            answered,
            unanswered: total - answered,
            flagged,
            visited,
            not_visited: total - visited,
            answered_and_flagged,
        }
    }

    /// Wire shape of a stored answer.
    pub fn wire_answer(&self, answer: &UserAnswer) -> SubmittedAnswer {
        let question = self.question(&answer.question_id);
        let label = question.and_then(|q| resolve_answer(q, &answer.selected));
        let option_id = question
            .zip(label)
            .and_then(|(q, label)| option_for(q, label))
            .map(|o| o.id.clone());

        SubmittedAnswer {
            question_id: answer.question_id.clone(),
            selected_option_id: option_id.unwrap_or_else(|| answer.selected.to_string()),
            selected_label: label,
            time_spent_secs: answer.time_spent_secs,
        }
    }

    /// All answers in wire shape, in question order.
    pub fn submitted_answers(&self) -> Vec<SubmittedAnswer> {
        self.questions
            .iter()
            .filter_map(|q| self.attempt.answers.get(&q.id))
            .map(|a| self.wire_answer(a))
            .collect()
    }
}

/// Question-palette counts for the UI.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionProgress {
    pub total: usize,
    pub answered: usize,
    pub unanswered: usize,
    pub flagged: usize,
    pub visited: usize,
    pub not_visited: usize,
    pub answered_and_flagged: usize,
}

/// Durable record of a session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionSnapshot {
    pub exam_id: String,
    #[serde(default)]
    pub attempt_id: Option<String>,
    #[serde(default)]
    pub exam_title: String,
    #[serde(default = "default_passing_percent")]
    pub passing_percent: f64,
    pub questions: Vec<Question>,
    pub current_question_index: usize,
    pub time_remaining: u32,
    #[serde(default)]
    pub duration_seconds: u32,
    pub start_time: DateTime<Utc>,
    #[serde(default)]
    pub end_time: Option<DateTime<Utc>>,
    #[serde(default)]
    pub answers: Answers,
    #[serde(default)]
    pub flagged_questions: Vec<String>,
    #[serde(default)]
    pub visited_questions: Vec<usize>,
    #[serde(default)]
    pub is_paused: bool,
    #[serde(default)]
    pub is_completed: bool,
    #[serde(default)]
    pub result: Option<ExamResult>,
}

fn default_passing_percent() -> f64 {
    DEFAULT_PASSING_PERCENT
}

impl From<&Session> for SessionSnapshot {
    fn from(session: &Session) -> Self {
        Self {
            exam_id: session.attempt.exam_id.clone(),
            attempt_id: session.attempt.id.clone(),
            exam_title: session.exam_title.clone(),
            passing_percent: session.passing_percent,
            questions: session.questions.clone(),
            current_question_index: session.current_index,
            time_remaining: session.remaining_secs,
            duration_seconds: session.duration_secs,
            start_time: session.attempt.started_at,
            end_time: session.attempt.ended_at,
            answers: session.attempt.answers.clone(),
            flagged_questions: session.attempt.flagged.iter().cloned().collect(),
            visited_questions: session.visited.iter().copied().collect(),
            is_paused: session.is_paused,
            is_completed: session.is_completed(),
            result: session.result.clone(),
        }
    }
}

impl SessionSnapshot {
    /// Rehydrate a session, repairing out-of-range navigation state.
    pub fn into_session(self) -> Result<Session, SessionError> {
        if self.questions.is_empty() {
            return Err(SessionError::EmptyExam);
        }
        let count = self.questions.len();
        let current_index = if self.current_question_index < count {
            self.current_question_index
        } else {
            tracing::warn!(
                index = self.current_question_index,
                count,
                "stored question index out of range, resetting to the first question"
            );
            0
        };

        let mut visited: BTreeSet<usize> = self
            .visited_questions
            .into_iter()
            .filter(|i| *i < count)
            .collect();
        visited.insert(current_index);

        let duration_secs = self.duration_seconds.max(self.time_remaining);
        let status = if self.is_completed {
            AttemptStatus::Completed
        } else {
            AttemptStatus::InProgress
        };

        Ok(Session {
            token: Uuid::new_v4(),
            attempt: Attempt {
                id: self.attempt_id,
                exam_id: self.exam_id,
                started_at: self.start_time,
                ended_at: self.end_time,
                status,
                answers: self.answers,
                flagged: self.flagged_questions.into_iter().collect(),
            },
            exam_title: self.exam_title,
            passing_percent: self.passing_percent,
            questions: self.questions,
            current_index,
            duration_secs,
            remaining_secs: self.time_remaining,
            visited,
            is_paused: self.is_paused,
            result: self.result.filter(|_| status == AttemptStatus::Completed),
            show_summary: false,
            entered_at_remaining: self.time_remaining,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::label::{AnswerRef, Label};
    use crate::model::AnswerOption;

    fn questions(n: usize) -> Vec<Question> {
        (0..n)
            .map(|i| Question {
                id: format!("q{i}"),
                number: i as u32 + 1,
                text: format!("Question {i}"),
                options: (0..3)
                    .map(|o| AnswerOption {
                        id: format!("q{i}-o{o}"),
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

    #[test]
    fn empty_exam_rejected() {
        assert_eq!(
            Session::new("e1", vec![], 60).unwrap_err(),
            SessionError::EmptyExam
        );
    }

    #[test]
    fn snapshot_roundtrip_restores_sets() {
        let mut session = Session::new("e1", questions(3), 600).unwrap();
        session.attempt.id = Some("att-9".into());
        session.attempt.flagged.insert("q2".into());
        session.visited.insert(2);
        session.current_index = 2;
        session.remaining_secs = 420;
        session.show_summary = true;

        let json = serde_json::to_value(SessionSnapshot::from(&session)).unwrap();
        assert_eq!(json["flaggedQuestions"], serde_json::json!(["q2"]));
        assert_eq!(json["visitedQuestions"], serde_json::json!([0, 2]));
        assert_eq!(json["timeRemaining"], 420);
        assert!(json.get("showSummary").is_none());

        let snapshot: SessionSnapshot = serde_json::from_value(json).unwrap();
        let restored = snapshot.into_session().unwrap();
        assert_eq!(restored.attempt_id(), Some("att-9"));
        assert!(restored.is_flagged("q2"));
        assert!(restored.visited.contains(&2));
        assert_eq!(restored.current_index, 2);
        assert!(!restored.show_summary);
        assert_ne!(restored.token, session.token);
    }

    #[test]
    fn submitted_result_survives_only_with_completed_sessions() {
        let mut session = Session::new("e1", questions(2), 60).unwrap();
        session.attempt.status = AttemptStatus::Completed;
        session.result = Some(ExamResult {
            attempt_id: "att-1".into(),
            exam_id: "e1".into(),
            exam_title: String::new(),
            score: 0.75,
            total_marks: 2.0,
            percentage: 37.5,
            passing_marks: 0.8,
            passing_percent: 40.0,
            is_passing: false,
            time_spent_secs: 12,
            total_questions: 2,
            correct_answers: 1,
            incorrect_answers: 1,
            unanswered: 0,
            question_results: vec![],
        });

        let snapshot = SessionSnapshot::from(&session);
        let json = serde_json::to_value(&snapshot).unwrap();
        assert_eq!(json["result"]["score"], 0.75);
        let restored = snapshot.clone().into_session().unwrap();
        assert_eq!(restored.result, session.result);

        let mut reopened = snapshot;
        reopened.is_completed = false;
        assert!(reopened.into_session().unwrap().result.is_none());
    }

    #[test]
    fn out_of_range_index_repaired() {
        let session = Session::new("e1", questions(2), 60).unwrap();
        let mut snapshot = SessionSnapshot::from(&session);
        snapshot.current_question_index = 9;
        snapshot.visited_questions = vec![0, 7];
        let restored = snapshot.into_session().unwrap();
        assert_eq!(restored.current_index, 0);
        assert_eq!(restored.visited, BTreeSet::from([0]));
    }

    #[test]
    fn wire_answer_resolves_option_id() {
        let mut session = Session::new("e1", questions(2), 60).unwrap();
        let answer = UserAnswer {
            question_id: "q1".into(),
            selected: AnswerRef::Index(2),
            time_spent_secs: 4,
        };
        session.attempt.answers.insert("q1".into(), answer.clone());

        let wire = session.wire_answer(&answer);
        assert_eq!(wire.selected_option_id, "q1-o2");
        assert_eq!(wire.selected_label, Label::new('C'));
        assert_eq!(wire.time_spent_secs, 4);

        let unresolved = UserAnswer {
            question_id: "q1".into(),
            selected: AnswerRef::Text("no idea".into()),
            time_spent_secs: 0,
        };
        assert_eq!(session.wire_answer(&unresolved).selected_option_id, "no idea");
        assert_eq!(session.submitted_answers().len(), 1);
    }

    #[test]
    fn progress_counts() {
        let mut session = Session::new("e1", questions(4), 60).unwrap();
        session.attempt.answers.insert(
            "q0".into(),
            UserAnswer {
                question_id: "q0".into(),
                selected: AnswerRef::Index(0),
                time_spent_secs: 0,
            },
        );
        session.attempt.flagged.insert("q0".into());
        session.attempt.flagged.insert("q3".into());
        session.visited.insert(3);

        let progress = session.progress();
        assert_eq!(progress.total, 4);
        assert_eq!(progress.answered, 1);
        assert_eq!(progress.unanswered, 3);
        assert_eq!(progress.flagged, 2);
        assert_eq!(progress.visited, 2);
        assert_eq!(progress.not_visited, 2);
        assert_eq!(progress.answered_and_flagged, 1);
    }
}
