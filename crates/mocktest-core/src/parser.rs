//! TOML exam definition parser.
//!
//! Loads exams from TOML files and directories, and validates them.

use std::collections::HashSet;
use std::path::Path;

use anyhow::{Context, Result};
use serde::Deserialize;

use crate::label::{correct_label_with_source, option_for, Label};
use crate::model::{AnswerOption, Exam, Question};
use crate::scoring::DEFAULT_PASSING_PERCENT;

/// Intermediate TOML structure for parsing exam files.
#[derive(Debug, Deserialize)]
struct TomlExamFile {
    exam: TomlExamHeader,
    #[serde(default)]
    questions: Vec<TomlQuestion>,
}

#[derive(Debug, Deserialize)]
struct TomlExamHeader {
    id: String,
    title: String,
    #[serde(default)]
    description: String,
    duration_minutes: u32,
    #[serde(default = "default_passing_percent")]
    passing_percent: f64,
}

fn default_passing_percent() -> f64 {
    DEFAULT_PASSING_PERCENT
}

#[derive(Debug, Deserialize)]
struct TomlQuestion {
    id: String,
    #[serde(default)]
    number: Option<u32>,
    text: String,
    #[serde(default)]
    options: Vec<TomlOption>,
    /// A label (`"B"`) or legacy answer text (`"B) Paris"`).
    #[serde(default)]
    correct: Option<String>,
    #[serde(default)]
    correct_option: Option<usize>,
    #[serde(default)]
    explanation: String,
    #[serde(default = "default_marks")]
    marks: f64,
}

fn default_marks() -> f64 {
    1.0
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum TomlOption {
    Text(String),
    Table {
        #[serde(default)]
        id: Option<String>,
        #[serde(default)]
        label: Option<String>,
        text: String,
        #[serde(default)]
        is_correct: Option<bool>,
    },
}

/// Parse a single TOML file into an `Exam`.
pub fn parse_exam(path: &Path) -> Result<Exam> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read exam file: {}", path.display()))?;

    parse_exam_str(&content, path)
}

/// Parse a TOML string into an `Exam`.
pub fn parse_exam_str(content: &str, source_path: &Path) -> Result<Exam> {
    let parsed: TomlExamFile = toml::from_str(content)
        .with_context(|| format!("failed to parse TOML: {}", source_path.display()))?;

    let questions = parsed
        .questions
        .into_iter()
        .enumerate()
        .map(|(position, q)| convert_question(position, q))
        .collect::<Result<Vec<_>>>()
        .with_context(|| format!("invalid exam definition: {}", source_path.display()))?;

    Ok(Exam {
        id: parsed.exam.id,
        title: parsed.exam.title,
        description: parsed.exam.description,
        duration_minutes: parsed.exam.duration_minutes,
        passing_percent: parsed.exam.passing_percent,
        questions,
    })
}

fn convert_question(position: usize, q: TomlQuestion) -> Result<Question> {
    let options = q
        .options
        .into_iter()
        .enumerate()
        .map(|(index, option)| {
            let positional = Label::from_index(index)
                .with_context(|| format!("question {} has more than 26 options", q.id))?;
            let option = match option {
                TomlOption::Text(text) => AnswerOption {
                    id: option_id(&q.id, positional),
                    label: positional,
                    text,
                    is_correct: None,
                },
                TomlOption::Table {
                    id,
                    label,
                    text,
                    is_correct,
                } => {
                    let label = match label {
                        Some(raw) => raw
                            .parse::<Label>()
                            .map_err(|e| anyhow::anyhow!("question {}: {e}", q.id))?,
                        None => positional,
                    };
                    AnswerOption {
                        id: id.unwrap_or_else(|| option_id(&q.id, label)),
                        label,
                        text,
                        is_correct,
                    }
                }
            };
            Ok(option)
        })
        .collect::<Result<Vec<_>>>()?;

    let mut labels = HashSet::new();
    if let Some(duplicate) = options.iter().find(|o| !labels.insert(o.label)) {
        anyhow::bail!(
            "question {}: option label {} is used more than once",
            q.id,
            duplicate.label
        );
    }

    let (correct_label, correct_answer) = match q.correct {
        Some(raw) => match raw.parse::<Label>() {
            Ok(label) => (Some(label), None),
            Err(_) => (None, Some(raw)),
        },
        None => (None, None),
    };

    Ok(Question {
        id: q.id,
        number: q.number.unwrap_or(position as u32 + 1),
        text: q.text,
        options,
        correct_label,
        correct_answer,
        correct_option: q.correct_option,
        explanation: q.explanation,
        marks: q.marks,
    })
}

fn option_id(question_id: &str, label: Label) -> String {
    format!("{question_id}-{}", label.as_char().to_ascii_lowercase())
}

/// Recursively load all `.toml` exam files from a directory.
pub fn load_exam_directory(dir: &Path) -> Result<Vec<Exam>> {
    let mut exams = Vec::new();

    if !dir.is_dir() {
        anyhow::bail!("not a directory: {}", dir.display());
    }

    for entry in std::fs::read_dir(dir)
        .with_context(|| format!("failed to read directory: {}", dir.display()))?
    {
        let entry = entry?;
        let path = entry.path();

        if path.is_dir() {
            exams.extend(load_exam_directory(&path)?);
        } else if path.extension().is_some_and(|ext| ext == "toml") {
            match parse_exam(&path) {
                Ok(exam) => exams.push(exam),
                Err(e) => {
                    tracing::warn!("skipping {}: {e:#}", path.display());
                }
            }
        }
    }

    exams.sort_by(|a, b| a.id.cmp(&b.id));
    Ok(exams)
}

/// A warning from exam validation.
#[derive(Debug, Clone, PartialEq)]
pub struct ValidationWarning {
    /// The question ID (if applicable).
    pub question_id: Option<String>,
    pub message: String,
}

impl ValidationWarning {
    fn question(question: &Question, message: impl Into<String>) -> Self {
        Self {
            question_id: Some(question.id.clone()),
            message: message.into(),
        }
    }
}

/// Validate an exam for authoring problems.
pub fn validate_exam(exam: &Exam) -> Vec<ValidationWarning> {
    let mut warnings = Vec::new();

    if exam.questions.is_empty() {
        warnings.push(ValidationWarning {
            question_id: None,
            message: "exam has no questions".into(),
        });
    }

    if exam.duration_minutes == 0 {
        warnings.push(ValidationWarning {
            question_id: None,
            message: "duration is zero, the exam would be submitted immediately".into(),
        });
    }

    let mut seen_ids = HashSet::new();
    for question in &exam.questions {
        if !seen_ids.insert(&question.id) {
            warnings.push(ValidationWarning::question(
                question,
                format!("duplicate question ID: {}", question.id),
            ));
        }

        let mut labels = HashSet::new();
        for option in &question.options {
            if !labels.insert(option.label) {
                warnings.push(ValidationWarning::question(
                    question,
                    format!("duplicate option label {}", option.label),
                ));
            }
        }

        match correct_label_with_source(question) {
            None => warnings.push(ValidationWarning::question(
                question,
                "no correct answer, answers to this question cannot be graded",
            )),
            Some((label, source)) => {
                if source.is_inferred() {
                    warnings.push(ValidationWarning::question(
                        question,
                        format!("correct answer {label} inferred from {source:?}, set `correct` to the label"),
                    ));
                }
                if option_for(question, label).is_none() {
                    warnings.push(ValidationWarning::question(
                        question,
                        format!("correct answer {label} is not one of the options"),
                    ));
                }
            }
        }

        if (question.marks - 1.0).abs() > f64::EPSILON {
            warnings.push(ValidationWarning::question(
                question,
                format!(
                    "marks = {} is ignored, every question is worth one mark",
                    question.marks
                ),
            ));
        }
    }

    warnings
}
