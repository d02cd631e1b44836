//! Exam statistics aggregation.
//!
//! The only place that turns a question set plus answers into correct /
//! incorrect / unanswered counts and a score. UI code reads these numbers; it
//! never recounts on its own.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::classify::{classify, correct_labels, QuestionStatus};
use crate::label::resolve_answer;
use crate::model::{Answers, ExamResult, Question, QuestionResult};
use crate::scoring::{ScoreBreakdown, Tally, CORRECT_MARKS, INCORRECT_PENALTY};

/// Whether counts are being produced for a running session or for grading.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Live,
    Final,
}

/// Aggregated statistics of one attempt.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExamStatistics {
    pub correct_answers: usize,
    pub incorrect_answers: usize,
    /// Includes pending questions.
    pub unanswered: usize,
    /// Answered questions whose correct label is unknown.
    pub pending: usize,
    pub total_questions: usize,
    pub score: ScoreBreakdown,
    /// Per-question outcome in question order.
    pub question_results: Vec<QuestionResult>,
}

impl ExamStatistics {
    pub fn tally(&self) -> Tally {
        Tally {
            total: self.total_questions,
            correct: self.correct_answers,
            incorrect: self.incorrect_answers,
            unanswered: self.unanswered,
        }
    }

    /// Status of every question keyed by question id.
    pub fn status_map(&self) -> HashMap<&str, QuestionStatus> {
        self.question_results
            .iter()
            .map(|r| (r.question_id.as_str(), r.status))
            .collect()
    }

    pub fn status_of(&self, question_id: &str) -> Option<QuestionStatus> {
        self.question_results
            .iter()
            .find(|r| r.question_id == question_id)
            .map(|r| r.status)
    }

    /// `true` when every answered question could be graded.
    pub fn fully_graded(&self) -> bool {
        self.pending == 0
    }

    /// Build an `ExamResult` from these statistics.
    pub fn to_result(
        &self,
        attempt_id: &str,
        exam_id: &str,
        exam_title: &str,
        time_spent_secs: u32,
    ) -> ExamResult {
        ExamResult {
            attempt_id: attempt_id.to_string(),
            exam_id: exam_id.to_string(),
            exam_title: exam_title.to_string(),
            score: self.score.score,
            total_marks: self.score.total_marks,
            percentage: self.score.percentage,
            passing_marks: self.score.passing_marks,
            passing_percent: self.score.passing_percent,
            is_passing: self.score.is_passing,
            time_spent_secs,
            total_questions: self.total_questions,
            correct_answers: self.correct_answers,
            incorrect_answers: self.incorrect_answers,
            unanswered: self.unanswered,
            question_results: self.question_results.clone(),
        }
    }
}

/// Aggregate for final grading. Pending questions are logged as errors.
pub fn aggregate(questions: &[Question], answers: &Answers, passing_percent: f64) -> ExamStatistics {
    aggregate_at(questions, answers, passing_percent, Stage::Final)
}

/// Aggregate for a running session, where hidden answer keys are expected.
pub fn aggregate_live(
    questions: &[Question],
    answers: &Answers,
    passing_percent: f64,
) -> ExamStatistics {
    aggregate_at(questions, answers, passing_percent, Stage::Live)
}

/// Classify every question once, tally, verify and score.
pub fn aggregate_at(
    questions: &[Question],
    answers: &Answers,
    passing_percent: f64,
    stage: Stage,
) -> ExamStatistics {
    let correct = correct_labels(questions);

    let mut tally = Tally {
        total: questions.len(),
        ..Tally::default()
    };
    let mut pending = 0usize;
    let mut question_results = Vec::with_capacity(questions.len());

    for question in questions {
        let status = classify(question, answers, &correct);
        let marks = match status {
            QuestionStatus::AnsweredCorrect => {
                tally.correct += 1;
                CORRECT_MARKS
            }
            QuestionStatus::AnsweredIncorrect => {
                tally.incorrect += 1;
                -INCORRECT_PENALTY
            }
            QuestionStatus::Unanswered => {
                tally.unanswered += 1;
                0.0
            }
            QuestionStatus::AnsweredPending => {
                pending += 1;
                tally.unanswered += 1;
                if stage == Stage::Final {
                    tracing::error!(
                        question_id = %question.id,
                        "answered question has no correct answer at grading time, counting as unanswered"
                    );
                }
                0.0
            }
        };

        question_results.push(QuestionResult {
            question_id: question.id.clone(),
            status,
            selected: answers
                .get(&question.id)
                .and_then(|a| resolve_answer(question, &a.selected)),
            correct: correct.get(&question.id).copied(),
            marks,
        });
    }

    if !tally.is_consistent() {
        tracing::error!(?tally, "aggregated counts do not add up to the question total");
    }

    ExamStatistics {
        correct_answers: tally.correct,
        incorrect_answers: tally.incorrect,
        unanswered: tally.unanswered,
        pending,
        total_questions: tally.total,
        score: tally.score(passing_percent),
        question_results,
    }
}

/// Reconcile the service's result with the locally aggregated statistics.
///
/// When every question was gradable locally, the local counts and score win
/// and any disagreement is logged. Otherwise the service's numbers are kept
/// and only their tally is checked.
pub fn reconcile(mut remote: ExamResult, local: &ExamStatistics, time_spent_secs: u32) -> ExamResult {
    if remote.time_spent_secs == 0 {
        remote.time_spent_secs = time_spent_secs;
    }

    if !local.fully_graded() {
        if !remote.counts_consistent() {
            tracing::error!(
                attempt_id = %remote.attempt_id,
                total = remote.total_questions,
                correct = remote.correct_answers,
                incorrect = remote.incorrect_answers,
                unanswered = remote.unanswered,
                "service result counts do not add up to the total"
            );
        }
        if remote.question_results.is_empty() {
            remote.question_results = local.question_results.clone();
        }
        return remote;
    }

    if remote.correct_answers != local.correct_answers
        || remote.incorrect_answers != local.incorrect_answers
        || remote.unanswered != local.unanswered
    {
        tracing::warn!(
            attempt_id = %remote.attempt_id,
            remote_correct = remote.correct_answers,
            local_correct = local.correct_answers,
            remote_incorrect = remote.incorrect_answers,
            local_incorrect = local.incorrect_answers,
            "service and local grading disagree, using local statistics"
        );
    }

    local.to_result(
        &remote.attempt_id,
        &remote.exam_id,
        &remote.exam_title,
        remote.time_spent_secs,
    )
}
