//! Per-question status classification.

use std::collections::HashMap;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::label::{correct_label_of, resolve_answer, Label};
use crate::model::{Answers, Question};

/// Grading status of one question in an attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QuestionStatus {
    Unanswered,
    /// Answered, but the correct label is unknown.
    AnsweredPending,
    AnsweredCorrect,
    AnsweredIncorrect,
}

impl QuestionStatus {
    pub fn is_answered(self) -> bool {
        self != QuestionStatus::Unanswered
    }
}

impl fmt::Display for QuestionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            QuestionStatus::Unanswered => write!(f, "unanswered"),
            QuestionStatus::AnsweredPending => write!(f, "pending"),
            QuestionStatus::AnsweredCorrect => write!(f, "correct"),
            QuestionStatus::AnsweredIncorrect => write!(f, "incorrect"),
        }
    }
}

/// Correct labels keyed by question id. Questions that are not gradable yet
/// have no entry.
pub type CorrectLabels = HashMap<String, Label>;

/// Resolve the correct label of every question once.
pub fn correct_labels(questions: &[Question]) -> CorrectLabels {
    questions
        .iter()
        .filter_map(|q| correct_label_of(q).map(|label| (q.id.clone(), label)))
        .collect()
}

/// Classify a question against the attempt's answers.
pub fn classify(question: &Question, answers: &Answers, correct: &CorrectLabels) -> QuestionStatus {
    let Some(answer) = answers.get(&question.id) else {
        return QuestionStatus::Unanswered;
    };
    let Some(&expected) = correct.get(&question.id) else {
        return QuestionStatus::AnsweredPending;
    };
    match resolve_answer(question, &answer.selected) {
        Some(given) if given == expected => QuestionStatus::AnsweredCorrect,
        Some(_) => QuestionStatus::AnsweredIncorrect,
        None => {
            tracing::debug!(
                question_id = %question.id,
                selected = %answer.selected,
                "answer does not name an option, grading as incorrect"
            );
            QuestionStatus::AnsweredIncorrect
        }
    }
}
