use std::time::Duration;

use async_trait::async_trait;
use serde::Serialize;
use serde_json::{json, Value};
use thiserror::Error;

/// Fields longer than these are cut before they reach the evaluator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InputLimits {
    pub max_question_chars: usize,
    pub max_answer_chars: usize,
}

impl Default for InputLimits {
    fn default() -> Self {
        Self { max_question_chars: 800, max_answer_chars: 1500 }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct EvaluationRequest {
    pub question: String,
    pub answer: String,
}

impl EvaluationRequest {
    pub fn bounded(question: &str, answer: &str, limits: InputLimits) -> Self {
        Self {
            question: truncate_chars(question, limits.max_question_chars),
            answer: truncate_chars(answer, limits.max_answer_chars),
        }
    }
}

fn truncate_chars(value: &str, max_chars: usize) -> String {
    match value.char_indices().nth(max_chars) {
        Some((byte_index, _)) => value[..byte_index].to_string(),
        None => value.to_string(),
    }
}

/// Validated evaluator output. `raw` keeps the whole object for the `result` column.
#[derive(Debug, Clone, PartialEq)]
pub struct EvaluationResult {
    pub total_score: f64,
    pub feedback: String,
    pub content_score: f64,
    pub organization_score: f64,
    pub language_score: f64,
    pub grade: String,
    pub raw: Value,
}

impl EvaluationResult {
    /// Requires a numeric `total_score` and a string `feedback`. Sub-scores default to 0
    /// and `grade` to an empty string.
    pub fn from_value(value: Value) -> Result<Self, EvaluationError> {
        let object = value
            .as_object()
            .ok_or_else(|| EvaluationError::MalformedResult("result is not a JSON object".into()))?;

        let total_score = object.get("total_score").and_then(Value::as_f64).ok_or_else(|| {
            EvaluationError::MalformedResult("missing or non-numeric total_score".into())
        })?;
        let feedback = object
            .get("feedback")
            .and_then(Value::as_str)
            .ok_or_else(|| EvaluationError::MalformedResult("missing or non-string feedback".into()))?
            .to_string();

        let score = |key: &str| object.get(key).and_then(Value::as_f64).unwrap_or(0.0);
        let content_score = score("content_score");
        let organization_score = score("organization_score");
        let language_score = score("language_score");
        let grade =
            object.get("grade").and_then(Value::as_str).unwrap_or_default().trim().to_string();

        Ok(Self {
            total_score,
            feedback,
            content_score,
            organization_score,
            language_score,
            grade,
            raw: value,
        })
    }

    pub(crate) fn unanswered() -> Self {
        Self {
            total_score: 0.0,
            feedback: "No answer submitted".to_string(),
            content_score: 0.0,
            organization_score: 0.0,
            language_score: 0.0,
            grade: String::new(),
            raw: json!({"total_score": 0, "feedback": "No answer submitted"}),
        }
    }
}

/// Extracts the outermost `{...}` from free-form model output and validates it.
pub fn parse_result(raw: &str) -> Result<EvaluationResult, EvaluationError> {
    let (Some(start), Some(end)) = (raw.find('{'), raw.rfind('}')) else {
        return Err(EvaluationError::MalformedResult("no JSON object in evaluator output".into()));
    };
    if end < start {
        return Err(EvaluationError::MalformedResult("no JSON object in evaluator output".into()));
    }

    let value: Value = serde_json::from_str(&raw[start..=end])
        .map_err(|err| EvaluationError::MalformedResult(format!("invalid JSON: {err}")))?;

    EvaluationResult::from_value(value)
}

/// Every variant is retryable; the retry budget decides when to stop.
#[derive(Debug, Error)]
pub enum EvaluationError {
    #[error("evaluator unavailable: {0}")]
    Transient(String),
    #[error("evaluator rejected the request with status {status}: {body}")]
    Rejected { status: u16, body: String },
    #[error("evaluation timed out after {0:?}")]
    Timeout(Duration),
    #[error("malformed evaluation result: {0}")]
    MalformedResult(String),
}

impl EvaluationError {
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Transient(_) => "transient",
            Self::Rejected { .. } => "rejected",
            Self::Timeout(_) => "timeout",
            Self::MalformedResult(_) => "malformed",
        }
    }
}

/// Grades one question/answer pair. Implementations may be slow, fail, or return
/// garbage; callers bound them with a timeout.
#[async_trait]
pub trait Evaluator: Send + Sync {
    async fn evaluate(&self, request: &EvaluationRequest)
        -> Result<EvaluationResult, EvaluationError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bounded_truncates_on_char_boundaries() {
        let limits = InputLimits { max_question_chars: 3, max_answer_chars: 4 };
        let request = EvaluationRequest::bounded("héllo", "ответ длинный", limits);
        assert_eq!(request.question, "hél");
        assert_eq!(request.answer, "отве");
    }

    #[test]
    fn bounded_keeps_short_input() {
        let request = EvaluationRequest::bounded("q", "a", InputLimits::default());
        assert_eq!(request, EvaluationRequest { question: "q".into(), answer: "a".into() });
    }

    #[test]
    fn parse_result_extracts_object_from_prose() {
        let raw = "Sure, here is the grade:\n```json\n{\"total_score\": 6.5, \"feedback\": \"ok\", \
                   \"content_score\": 3, \"grade\": \"B\"}\n```";
        let result = parse_result(raw).expect("parsed");
        assert_eq!(result.total_score, 6.5);
        assert_eq!(result.feedback, "ok");
        assert_eq!(result.content_score, 3.0);
        assert_eq!(result.organization_score, 0.0);
        assert_eq!(result.language_score, 0.0);
        assert_eq!(result.grade, "B");
    }

    #[test]
    fn missing_total_score_is_malformed() {
        let err = parse_result("{\"feedback\": \"fine\"}").expect_err("malformed");
        assert!(matches!(err, EvaluationError::MalformedResult(_)));
    }

    #[test]
    fn wrong_type_is_malformed() {
        let err = parse_result("{\"total_score\": \"7\", \"feedback\": \"x\"}").expect_err("type");
        assert_eq!(err.kind(), "malformed");
    }

    #[test]
    fn no_object_is_malformed() {
        assert!(parse_result("I cannot grade this").is_err());
        assert!(parse_result("} backwards {").is_err());
        assert!(parse_result("{not json}").is_err());
    }

    #[test]
    fn array_result_is_malformed() {
        let err = EvaluationResult::from_value(json!([1, 2])).expect_err("array");
        assert_eq!(err.kind(), "malformed");
    }
}
