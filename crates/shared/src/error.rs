use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::domain::QuestionType;

/// Error body returned by the service on non-success responses.
///
/// `detail` is usually a string, but validation failures carry a list of
/// field errors, so it is kept as raw JSON.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiError {
    #[serde(default)]
    pub detail: serde_json::Value,
}

impl ApiError {
    pub fn new(detail: impl Into<String>) -> Self {
        Self {
            detail: serde_json::Value::String(detail.into()),
        }
    }

    /// Human readable detail, or `None` when the body carried nothing useful.
    pub fn message(&self) -> Option<String> {
        match &self.detail {
            serde_json::Value::Null => None,
            serde_json::Value::String(text) if text.trim().is_empty() => None,
            serde_json::Value::String(text) => Some(text.clone()),
            serde_json::Value::Array(entries) => {
                let parts: Vec<String> = entries
                    .iter()
                    .filter_map(|entry| {
                        entry
                            .get("msg")
                            .and_then(|msg| msg.as_str())
                            .map(str::to_string)
                    })
                    .collect();
                if parts.is_empty() {
                    Some(self.detail.to_string())
                } else {
                    Some(parts.join("; "))
                }
            }
            other => Some(other.to_string()),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AnswerValidationError {
    #[error("{kind:?} question does not accept this kind of answer")]
    KindMismatch { kind: QuestionType },
    #[error("scale answer {value} outside {min}..={max}")]
    ScaleOutOfRange { value: i64, min: i64, max: i64 },
    #[error("'{choice}' is not one of the offered choices")]
    UnknownChoice { choice: String },
    #[error("multi-selection must contain at least one choice")]
    EmptySelection,
    #[error("text answer exceeds {max} characters")]
    TextTooLong { max: usize },
}
