//! HTTP attempt service client.

use std::collections::HashSet;
use std::time::Duration;

use anyhow::Context;
use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tracing::instrument;

use mocktest_core::error::ApiError;
use mocktest_core::label::Label;
use mocktest_core::model::{AnswerOption, Exam, ExamResult, Question};
use mocktest_core::scoring::DEFAULT_PASSING_PERCENT;
use mocktest_core::traits::{AttemptApi, SubmittedAnswer};

const DEFAULT_TIMEOUT_SECS: u64 = 30;

/// Client for the remote attempt/question service.
pub struct HttpAttemptApi {
    base_url: String,
    token: Option<String>,
    timeout_secs: u64,
    client: reqwest::Client,
}

impl HttpAttemptApi {
    pub fn new(base_url: &str, token: Option<String>, timeout_secs: Option<u64>) -> anyhow::Result<Self> {
        let timeout_secs = timeout_secs.unwrap_or(DEFAULT_TIMEOUT_SECS);
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(timeout_secs))
            .build()
            .context("failed to build HTTP client")?;

        Ok(Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            token: token.filter(|t| !t.is_empty()),
            timeout_secs,
            client,
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{path}", self.base_url)
    }

    fn authorize(&self, request: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match &self.token {
            Some(token) => request.bearer_auth(token),
            None => request,
        }
    }

    async fn send(&self, request: reqwest::RequestBuilder, what: &str) -> Result<reqwest::Response, ApiError> {
        let response = self.authorize(request).send().await.map_err(|e| {
            if e.is_timeout() {
                ApiError::Timeout(self.timeout_secs)
            } else if e.is_connect() {
                ApiError::Network(format!("attempt service not reachable at {}", self.base_url))
            } else {
                ApiError::Network(e.to_string())
            }
        })?;

        let status = response.status().as_u16();
        if status < 400 {
            return Ok(response);
        }
        let body = response.text().await.unwrap_or_default();
        Err(match status {
            401 | 403 => ApiError::Unauthorized(body),
            404 => ApiError::NotFound(what.to_string()),
            409 => ApiError::Conflict(body),
            _ => ApiError::Api {
                status,
                message: body,
            },
        })
    }

    async fn parse<T: DeserializeOwned>(response: reqwest::Response) -> Result<T, ApiError> {
        let status = response.status().as_u16();
        response.json().await.map_err(|e| ApiError::Api {
            status,
            message: format!("failed to parse response: {e}"),
        })
    }
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct StartAttemptResponse {
    #[serde(alias = "id")]
    attempt_id: String,
}

#[derive(Serialize)]
struct SubmitRequest<'a> {
    answers: &'a [SubmittedAnswer],
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct ExamResponse {
    id: String,
    title: String,
    #[serde(default)]
    description: String,
    #[serde(alias = "duration")]
    duration_minutes: u32,
    #[serde(default)]
    passing_percent: Option<f64>,
    #[serde(default)]
    questions: Vec<QuestionResponse>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct QuestionResponse {
    id: String,
    #[serde(default)]
    number: Option<u32>,
    text: String,
    #[serde(default)]
    options: Vec<OptionResponse>,
    #[serde(default)]
    correct_label: Option<String>,
    #[serde(default)]
    correct_answer: Option<String>,
    #[serde(default)]
    correct_option: Option<usize>,
    #[serde(default)]
    explanation: String,
    #[serde(default)]
    marks: Option<f64>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct OptionResponse {
    id: String,
    #[serde(default)]
    label: Option<String>,
    text: String,
    #[serde(default)]
    is_correct: Option<bool>,
}

impl QuestionResponse {
    /// Options without a usable label are labelled by position. If the
    /// service sends the same label twice, every option is relabelled by
    /// position.
    fn into_question(self, position: usize) -> Question {
        let id = self.id;
        let mut options: Vec<AnswerOption> = self
            .options
            .into_iter()
            .enumerate()
            .filter_map(|(index, o)| {
                let label = o
                    .label
                    .as_deref()
                    .and_then(|raw| raw.parse::<Label>().ok())
                    .or_else(|| Label::from_index(index));
                match label {
                    Some(label) => Some(AnswerOption {
                        id: o.id,
                        label,
                        text: o.text,
                        is_correct: o.is_correct,
                    }),
                    None => {
                        tracing::warn!(question_id = %id, option_id = %o.id, "dropping option beyond Z");
                        None
                    }
                }
            })
            .collect();

        let mut labels = HashSet::new();
        if !options.iter().all(|o| labels.insert(o.label)) {
            tracing::warn!(question_id = %id, "duplicate option labels, labelling options by position");
            options.truncate(26);
            for (index, option) in options.iter_mut().enumerate() {
                if let Some(label) = Label::from_index(index) {
                    option.label = label;
                }
            }
        }

        Question {
            number: self.number.unwrap_or(position as u32 + 1),
            text: self.text,
            options,
            correct_label: self.correct_label.and_then(|raw| raw.parse().ok()),
            correct_answer: self.correct_answer,
            correct_option: self.correct_option,
            explanation: self.explanation,
            marks: self.marks.unwrap_or(1.0),
            id,
        }
    }
}

fn into_questions(questions: Vec<QuestionResponse>) -> Vec<Question> {
    questions
        .into_iter()
        .enumerate()
        .map(|(position, q)| q.into_question(position))
        .collect()
}

#[async_trait]
impl AttemptApi for HttpAttemptApi {
    fn name(&self) -> &str {
        "http"
    }

    #[instrument(skip(self))]
    async fn start_attempt(&self, exam_id: &str) -> anyhow::Result<String> {
        let request = self.client.post(self.url(&format!("/api/exams/{exam_id}/attempts")));
        let response = self.send(request, &format!("exam {exam_id}")).await?;
        let body: StartAttemptResponse = Self::parse(response).await?;
        Ok(body.attempt_id)
    }

    #[instrument(skip(self, answers), fields(answers = answers.len()))]
    async fn submit_attempt(
        &self,
        attempt_id: &str,
        answers: &[SubmittedAnswer],
    ) -> anyhow::Result<ExamResult> {
        let request = self
            .client
            .post(self.url(&format!("/api/attempts/{attempt_id}/submit")))
            .json(&SubmitRequest { answers });
        let response = self.send(request, &format!("attempt {attempt_id}")).await?;
        Ok(Self::parse(response).await?)
    }

    #[instrument(skip(self))]
    async fn flag_question(&self, attempt_id: &str, question_id: &str) -> anyhow::Result<()> {
        let request = self.client.post(
            self.url(&format!("/api/attempts/{attempt_id}/flags/{question_id}")),
        );
        self.send(request, &format!("question {question_id}")).await?;
        Ok(())
    }

    #[instrument(skip(self))]
    async fn unflag_question(&self, attempt_id: &str, question_id: &str) -> anyhow::Result<()> {
        let request = self.client.delete(
            self.url(&format!("/api/attempts/{attempt_id}/flags/{question_id}")),
        );
        self.send(request, &format!("question {question_id}")).await?;
        Ok(())
    }

    #[instrument(skip(self, answer), fields(question_id = %answer.question_id))]
    async fn answer_question(
        &self,
        attempt_id: &str,
        answer: &SubmittedAnswer,
    ) -> anyhow::Result<()> {
        let request = self
            .client
            .post(self.url(&format!("/api/attempts/{attempt_id}/answers")))
            .json(answer);
        self.send(request, &format!("attempt {attempt_id}")).await?;
        Ok(())
    }

    #[instrument(skip(self))]
    async fn get_exam(&self, exam_id: &str) -> anyhow::Result<Exam> {
        let request = self.client.get(self.url(&format!("/api/exams/{exam_id}")));
        let response = self.send(request, &format!("exam {exam_id}")).await?;
        let body: ExamResponse = Self::parse(response).await?;
        Ok(Exam {
            id: body.id,
            title: body.title,
            description: body.description,
            duration_minutes: body.duration_minutes,
            passing_percent: body.passing_percent.unwrap_or(DEFAULT_PASSING_PERCENT),
            questions: into_questions(body.questions),
        })
    }

    #[instrument(skip(self))]
    async fn get_exam_questions(&self, exam_id: &str) -> anyhow::Result<Vec<Question>> {
        let request = self
            .client
            .get(self.url(&format!("/api/exams/{exam_id}/questions")));
        let response = self.send(request, &format!("exam {exam_id}")).await?;
        let body: Vec<QuestionResponse> = Self::parse(response).await?;
        Ok(into_questions(body))
    }
}
