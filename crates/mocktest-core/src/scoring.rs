//! Negative-marking score computation.
//!
//! Every correct answer earns one mark, every incorrect answer costs a quarter
//! mark, unanswered questions cost nothing. The raw score is never clamped
//! here; presentation decides whether to floor it.

use serde::{Deserialize, Serialize};

/// Marks for a correct answer.
pub const CORRECT_MARKS: f64 = 1.0;

/// Marks deducted for an incorrect answer.
pub const INCORRECT_PENALTY: f64 = 0.25;

/// Passing threshold used when an exam does not set one.
pub const DEFAULT_PASSING_PERCENT: f64 = 40.0;

/// Question counts of one attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Tally {
    pub total: usize,
    pub correct: usize,
    pub incorrect: usize,
    pub unanswered: usize,
}

impl Tally {
    /// `correct + incorrect + unanswered == total`.
    pub fn is_consistent(&self) -> bool {
        self.correct + self.incorrect + self.unanswered == self.total
    }

    pub fn score(&self, passing_percent: f64) -> ScoreBreakdown {
        score(
            self.total,
            self.correct,
            self.incorrect,
            self.unanswered,
            passing_percent,
        )
    }
}

/// Score and marks breakdown.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScoreBreakdown {
    /// `correct_marks - incorrect_penalty`, may be negative.
    pub score: f64,
    pub total_marks: f64,
    pub percentage: f64,
    pub correct_marks: f64,
    /// Marks lost to incorrect answers (a non-negative magnitude).
    pub incorrect_penalty: f64,
    pub is_passing: bool,
    pub passing_marks: f64,
    pub passing_percent: f64,
}

/// Score an attempt from its question counts.
///
/// If the counts do not add up to `total` an error is logged and the supplied
/// numbers are used anyway.
pub fn score(
    total: usize,
    correct: usize,
    incorrect: usize,
    unanswered: usize,
    passing_percent: f64,
) -> ScoreBreakdown {
    if correct + incorrect + unanswered != total {
        tracing::error!(
            total,
            correct,
            incorrect,
            unanswered,
            "question counts do not add up to the total"
        );
    }

    let total_marks = total as f64 * CORRECT_MARKS;
    let correct_marks = correct as f64 * CORRECT_MARKS;
    let incorrect_penalty = incorrect as f64 * INCORRECT_PENALTY;
    let score = correct_marks - incorrect_penalty;
    let percentage = if total_marks > 0.0 {
        score * 100.0 / total_marks
    } else {
        0.0
    };

    ScoreBreakdown {
        score,
        total_marks,
        percentage,
        correct_marks,
        incorrect_penalty,
        is_passing: percentage >= passing_percent,
        passing_marks: total_marks * passing_percent / 100.0,
        passing_percent,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sixty_right_twenty_wrong() {
        let s = score(100, 60, 20, 20, DEFAULT_PASSING_PERCENT);
        assert!((s.score - 55.0).abs() < f64::EPSILON);
        assert!((s.percentage - 55.0).abs() < f64::EPSILON);
        assert!((s.correct_marks - 60.0).abs() < f64::EPSILON);
        assert!((s.incorrect_penalty - 5.0).abs() < f64::EPSILON);
        assert!((s.passing_marks - 40.0).abs() < f64::EPSILON);
        assert!(s.is_passing);
    }

    #[test]
    fn all_wrong_goes_negative() {
        let s = score(100, 0, 100, 0, DEFAULT_PASSING_PERCENT);
        assert!((s.score + 25.0).abs() < f64::EPSILON);
        assert!((s.percentage + 25.0).abs() < f64::EPSILON);
        assert!(!s.is_passing);
    }

    #[test]
    fn unanswered_costs_nothing() {
        let s = score(10, 0, 0, 10, DEFAULT_PASSING_PERCENT);
        assert_eq!(s.score, 0.0);
        assert_eq!(s.percentage, 0.0);
    }

    #[test]
    fn exact_score_formula() {
        for (correct, incorrect) in [(0, 0), (1, 1), (7, 3), (13, 41), (250, 250)] {
            let total = correct + incorrect + 5;
            let s = score(total, correct, incorrect, 5, DEFAULT_PASSING_PERCENT);
            assert_eq!(s.score, correct as f64 - incorrect as f64 * 0.25);
        }
    }

    #[test]
    fn threshold_is_inclusive() {
        assert!(score(10, 4, 0, 6, 40.0).is_passing);
        assert!(!score(10, 4, 1, 5, 40.0).is_passing);
        assert!(score(10, 5, 0, 5, 50.0).is_passing);
    }

    #[test]
    fn empty_exam() {
        let s = score(0, 0, 0, 0, DEFAULT_PASSING_PERCENT);
        assert_eq!(s.percentage, 0.0);
        assert!(!s.is_passing);
    }

    #[test]
    fn inconsistent_counts_still_scored() {
        let s = score(10, 5, 5, 5, DEFAULT_PASSING_PERCENT);
        assert_eq!(s.score, 3.75);
        assert!(!Tally {
            total: 10,
            correct: 5,
            incorrect: 5,
            unanswered: 5
        }
        .is_consistent());
    }
}
