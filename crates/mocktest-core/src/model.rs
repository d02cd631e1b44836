//! Core data model types for mocktest.
//!
//! Exams, questions, answers, attempts and results. Field names serialise in
//! camelCase to match the attempt service and the durable session layout.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::classify::QuestionStatus;
use crate::label::{AnswerRef, Label};
use crate::scoring::DEFAULT_PASSING_PERCENT;

/// Answers of one attempt keyed by question id. At most one per question.
pub type Answers = BTreeMap<String, UserAnswer>;

/// A timed exam and its question set.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Exam {
    pub id: String,
    pub title: String,
    #[serde(default)]
    pub description: String,
    /// Countdown length in minutes.
    pub duration_minutes: u32,
    /// Percentage needed to pass.
    #[serde(default = "default_passing_percent")]
    pub passing_percent: f64,
    #[serde(default)]
    pub questions: Vec<Question>,
}

fn default_passing_percent() -> f64 {
    DEFAULT_PASSING_PERCENT
}

/// A multiple-choice question.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Question {
    pub id: String,
    /// Ordinal shown to the user (1-based).
    #[serde(default)]
    pub number: u32,
    pub text: String,
    #[serde(default)]
    pub options: Vec<AnswerOption>,
    /// Authored correct label. Absent before publication or when the
    /// service hides answers from the client.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub correct_label: Option<Label>,
    /// Legacy correct-answer text such as `"B) Paris"`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub correct_answer: Option<String>,
    /// Legacy zero-based index of the correct option.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub correct_option: Option<usize>,
    #[serde(default)]
    pub explanation: String,
    #[serde(default = "default_marks")]
    pub marks: f64,
}

fn default_marks() -> f64 {
    1.0
}

/// One selectable option of a question.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AnswerOption {
    pub id: String,
    pub label: Label,
    pub text: String,
    /// Authoring-only flag; never required for grading.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub is_correct: Option<bool>,
}

/// The user's selection for one question.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserAnswer {
    pub question_id: String,
    pub selected: AnswerRef,
    /// Seconds spent on the question, best-effort.
    #[serde(default)]
    pub time_spent_secs: u32,
}

/// Lifecycle of an attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AttemptStatus {
    InProgress,
    Completed,
    Abandoned,
}

impl fmt::Display for AttemptStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AttemptStatus::InProgress => write!(f, "in progress"),
            AttemptStatus::Completed => write!(f, "completed"),
            AttemptStatus::Abandoned => write!(f, "abandoned"),
        }
    }
}

/// One user's run through an exam.
#[derive(Debug, Clone, PartialEq)]
pub struct Attempt {
    /// Server-issued id; `None` while offline.
    pub id: Option<String>,
    pub exam_id: String,
    pub started_at: DateTime<Utc>,
    pub ended_at: Option<DateTime<Utc>>,
    pub status: AttemptStatus,
    pub answers: Answers,
    pub flagged: BTreeSet<String>,
}

impl Attempt {
    pub fn new(exam_id: &str) -> Self {
        Self {
            id: None,
            exam_id: exam_id.to_string(),
            started_at: Utc::now(),
            ended_at: None,
            status: AttemptStatus::InProgress,
            answers: Answers::new(),
            flagged: BTreeSet::new(),
        }
    }

    pub fn is_open(&self) -> bool {
        self.status == AttemptStatus::InProgress
    }
}

/// Graded outcome of one question.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QuestionResult {
    pub question_id: String,
    pub status: QuestionStatus,
    #[serde(default)]
    pub selected: Option<Label>,
    #[serde(default)]
    pub correct: Option<Label>,
    /// Marks awarded under the negative-marking scheme.
    #[serde(default)]
    pub marks: f64,
}

/// Final result of a submitted attempt.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExamResult {
    pub attempt_id: String,
    pub exam_id: String,
    #[serde(default)]
    pub exam_title: String,
    /// Raw score; negative values are preserved.
    pub score: f64,
    pub total_marks: f64,
    pub percentage: f64,
    #[serde(default)]
    pub passing_marks: f64,
    #[serde(default = "default_passing_percent")]
    pub passing_percent: f64,
    pub is_passing: bool,
    #[serde(default)]
    pub time_spent_secs: u32,
    pub total_questions: usize,
    pub correct_answers: usize,
    pub incorrect_answers: usize,
    pub unanswered: usize,
    #[serde(default)]
    pub question_results: Vec<QuestionResult>,
}

impl ExamResult {
    /// `correct + incorrect + unanswered == total`.
    pub fn counts_consistent(&self) -> bool {
        self.correct_answers + self.incorrect_answers + self.unanswered == self.total_questions
    }

    /// Score for display, floored at zero. The raw `score` stays untouched.
    pub fn display_score(&self) -> f64 {
        self.score.max(0.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exam_defaults_on_deserialize() {
        let json = r#"{"id":"e1","title":"Demo","durationMinutes":10}"#;
        let exam: Exam = serde_json::from_str(json).unwrap();
        assert_eq!(exam.passing_percent, 40.0);
        assert!(exam.questions.is_empty());
    }

    #[test]
    fn question_camel_case_fields() {
        let json = r#"{
            "id": "q1",
            "text": "2 + 2?",
            "options": [
                {"id": "o1", "label": "A", "text": "3"},
                {"id": "o2", "label": "B", "text": "4", "isCorrect": true}
            ],
            "correctAnswer": "B) 4"
        }"#;
        let q: Question = serde_json::from_str(json).unwrap();
        assert_eq!(q.marks, 1.0);
        assert_eq!(q.correct_answer.as_deref(), Some("B) 4"));
        assert_eq!(q.options[1].is_correct, Some(true));
        assert_eq!(q.correct_label, None);
    }

    #[test]
    fn display_score_floors_at_zero() {
        let result = ExamResult {
            attempt_id: "a".into(),
            exam_id: "e".into(),
            exam_title: String::new(),
            score: -2.5,
            total_marks: 10.0,
            percentage: -25.0,
            passing_marks: 4.0,
            passing_percent: 40.0,
            is_passing: false,
            time_spent_secs: 0,
            total_questions: 10,
            correct_answers: 0,
            incorrect_answers: 10,
            unanswered: 0,
            question_results: vec![],
        };
        assert_eq!(result.display_score(), 0.0);
        assert_eq!(result.score, -2.5);
        assert!(result.counts_consistent());
    }

    #[test]
    fn attempt_status_serde() {
        assert_eq!(
            serde_json::to_string(&AttemptStatus::InProgress).unwrap(),
            "\"in_progress\""
        );
    }
}
