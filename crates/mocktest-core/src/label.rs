//! Answer-label normalisation.
//!
//! Answers and correct-answer keys arrive in several shapes: a zero-based
//! option index, a bare letter, or option text prefixed with its letter
//! ("B) Paris"). Everything is reduced to a canonical [`Label`] here so that
//! correctness is always decided by comparing labels.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::model::{AnswerOption, Question};

/// Canonical option label: a single upper-case letter `A`..=`Z`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Label(char);

impl Label {
    /// Build a label from a letter, upper-casing it. Non-letters yield `None`.
    pub fn new(c: char) -> Option<Self> {
        let upper = c.to_ascii_uppercase();
        upper.is_ascii_uppercase().then_some(Label(upper))
    }

    /// Label for a zero-based option position (`0 -> A`, `25 -> Z`).
    pub fn from_index(index: usize) -> Option<Self> {
        u8::try_from(index)
            .ok()
            .filter(|i| *i < 26)
            .map(|i| Label(char::from(b'A' + i)))
    }

    /// Zero-based position of this label.
    pub fn index(self) -> usize {
        (self.0 as u8 - b'A') as usize
    }

    pub fn as_char(self) -> char {
        self.0
    }
}

impl fmt::Display for Label {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for Label {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut chars = s.trim().chars();
        match (chars.next(), chars.next()) {
            (Some(c), None) => Label::new(c).ok_or_else(|| format!("invalid option label: {s}")),
            _ => Err(format!("invalid option label: {s}")),
        }
    }
}

impl TryFrom<String> for Label {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<Label> for String {
    fn from(label: Label) -> Self {
        label.0.to_string()
    }
}

/// A user's selection as it was captured at the call site.
///
/// Deserialises from a bare JSON number (index) or string (letter or text).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum AnswerRef {
    Index(usize),
    Label(char),
    Text(String),
}

impl fmt::Display for AnswerRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AnswerRef::Index(i) => write!(f, "{i}"),
            AnswerRef::Label(c) => write!(f, "{c}"),
            AnswerRef::Text(s) => write!(f, "{s}"),
        }
    }
}

impl From<Label> for AnswerRef {
    fn from(label: Label) -> Self {
        AnswerRef::Label(label.as_char())
    }
}

/// Where a question's correct label was found.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LabelSource {
    /// The authored `correct_label` field.
    Explicit,
    /// Extracted from the legacy `correct_answer` text.
    AnswerText,
    /// Converted from the legacy `correct_option` index.
    OptionIndex,
    /// Found by scanning options for an `is_correct` flag.
    OptionFlag,
}

impl LabelSource {
    /// `true` when the label had to be inferred from legacy fields.
    pub fn is_inferred(self) -> bool {
        self != LabelSource::Explicit
    }
}

/// Normalise a raw answer reference to a canonical label.
pub fn to_label(raw: &AnswerRef) -> Option<Label> {
    match raw {
        AnswerRef::Index(index) => Label::from_index(*index),
        AnswerRef::Label(c) => Label::new(*c),
        AnswerRef::Text(text) => label_from_text(text),
    }
}

/// Extract a label from text.
///
/// A lone letter is accepted in either case. Longer text must start with an
/// upper-case letter followed by `)`, `.` or whitespace.
pub fn label_from_text(text: &str) -> Option<Label> {
    let trimmed = text.trim();
    let mut chars = trimmed.chars();
    let first = chars.next()?;
    match chars.next() {
        None => Label::new(first),
        Some(sep) if first.is_ascii_uppercase() && (sep == ')' || sep == '.' || sep.is_whitespace()) => {
            Label::new(first)
        }
        _ => None,
    }
}

/// Resolve a user's answer against the question it belongs to.
///
/// Text equal to an option identifier or to an option's full text maps to that
/// option's label; anything else is normalised with [`to_label`].
pub fn resolve_answer(question: &Question, raw: &AnswerRef) -> Option<Label> {
    if let AnswerRef::Text(text) = raw {
        let text = text.trim();
        if let Some(option) = question
            .options
            .iter()
            .find(|o| o.id == text || o.text.trim() == text)
        {
            return Some(option.label);
        }
    }
    to_label(raw)
}

/// The option carrying `label`, if the question has one.
pub fn option_for(question: &Question, label: Label) -> Option<&AnswerOption> {
    question.options.iter().find(|o| o.label == label)
}

/// Canonical correct label of a question, or `None` if it is not gradable yet.
///
/// Callers must treat `None` as "pending", never as "incorrect".
pub fn correct_label_of(question: &Question) -> Option<Label> {
    correct_label_with_source(question).map(|(label, _)| label)
}

/// Like [`correct_label_of`], also reporting which field the label came from.
pub fn correct_label_with_source(question: &Question) -> Option<(Label, LabelSource)> {
    if let Some(label) = question.correct_label {
        return Some((label, LabelSource::Explicit));
    }

    if let Some(answer) = question.correct_answer.as_deref() {
        let from_text = label_from_text(answer).or_else(|| {
            question
                .options
                .iter()
                .find(|o| o.text.trim() == answer.trim())
                .map(|o| o.label)
        });
        if let Some(label) = from_text {
            tracing::debug!(question_id = %question.id, %label, "correct label inferred from answer text");
            return Some((label, LabelSource::AnswerText));
        }
    }

    if let Some(index) = question.correct_option {
        let label = question
            .options
            .get(index)
            .map(|o| o.label)
            .or_else(|| Label::from_index(index));
        if let Some(label) = label {
            tracing::debug!(question_id = %question.id, %label, "correct label inferred from option index");
            return Some((label, LabelSource::OptionIndex));
        }
    }

    if let Some(option) = question.options.iter().find(|o| o.is_correct == Some(true)) {
        tracing::debug!(question_id = %question.id, label = %option.label, "correct label inferred from option flag");
        return Some((option.label, LabelSource::OptionFlag));
    }

    tracing::debug!(question_id = %question.id, "no correct answer available, question is not gradable yet");
    None
}
