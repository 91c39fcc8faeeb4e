use std::collections::{BTreeMap, BTreeSet};

use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};

use crate::{
    domain::{FitBand, ItemId, Outcome, QuestionId, QuestionType, QuestionnaireId, RoleConfigId},
    error::AnswerValidationError,
};

pub const MAX_TEXT_ANSWER_CHARS: usize = 2000;
pub const MAX_NOTE_CHARS: usize = 2000;
const DEFAULT_SCALE_MIN: i64 = 1;
const DEFAULT_SCALE_MAX: i64 = 5;

/// One candidate as served by the feed. Carries no contact details.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CandidateCard {
    pub seeker_profile_id: ItemId,
    #[serde(default)]
    pub headline: Option<String>,
    #[serde(default)]
    pub location: Option<String>,
    #[serde(default)]
    pub bio: Option<String>,
    #[serde(default)]
    pub stats: BTreeMap<String, f64>,
    pub fit_score: f64,
    #[serde(default)]
    pub questionnaire_completed: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stats_computed_at: Option<NaiveDateTime>,
}

impl CandidateCard {
    pub fn fit_band(&self) -> FitBand {
        FitBand::from_score(self.fit_score)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FeedResponse {
    pub candidates: Vec<CandidateCard>,
    #[serde(default)]
    pub next_cursor: Option<String>,
    pub has_more: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SwipeRequest {
    pub seeker_profile_id: ItemId,
    pub decision: Outcome,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SwipeResponse {
    pub success: bool,
    pub message: String,
    pub seeker_profile_id: ItemId,
    pub decision: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ShortlistCandidate {
    pub seeker_profile_id: ItemId,
    #[serde(default)]
    pub headline: Option<String>,
    #[serde(default)]
    pub location: Option<String>,
    #[serde(default)]
    pub bio: Option<String>,
    #[serde(default)]
    pub stats: BTreeMap<String, f64>,
    pub fit_score: f64,
    #[serde(default)]
    pub note: Option<String>,
    pub swiped_at: NaiveDateTime,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ShortlistResponse {
    pub candidates: Vec<ShortlistCandidate>,
    pub total: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NoteRequest {
    pub note: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NoteResponse {
    pub success: bool,
    pub message: String,
    pub seeker_profile_id: ItemId,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RoleConfigSummary {
    pub id: RoleConfigId,
    pub role_name: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub weights: BTreeMap<String, f64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RoleConfigsResponse {
    pub configs: Vec<RoleConfigSummary>,
    pub total: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OffererConfigRequest {
    pub role_config_id: RoleConfigId,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OffererConfigResponse {
    pub role_config_id: RoleConfigId,
    pub role_name: String,
    pub message: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ProfileRecord {
    #[serde(default)]
    pub headline: Option<String>,
    #[serde(default)]
    pub location: Option<String>,
    #[serde(default)]
    pub bio: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub preferences: Option<serde_json::Value>,
    #[serde(default)]
    pub questionnaire_completed: bool,
}

/// Partial profile write; absent fields are left untouched by the service.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ProfileUpdate {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub headline: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub location: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bio: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Question {
    pub id: QuestionId,
    pub questionnaire_id: QuestionnaireId,
    pub text: String,
    pub question_type: QuestionType,
    #[serde(default)]
    pub order: i32,
    #[serde(default)]
    pub options: Option<serde_json::Value>,
    #[serde(default)]
    pub scoring_config: Option<serde_json::Value>,
    #[serde(default = "default_required")]
    pub is_required: bool,
}

fn default_required() -> bool {
    true
}

impl Question {
    pub fn scale_bounds(&self) -> (i64, i64) {
        let bound = |name: &str, fallback: i64| {
            self.options
                .as_ref()
                .and_then(|options| options.get(name))
                .and_then(|value| value.as_i64())
                .unwrap_or(fallback)
        };
        (
            bound("min", DEFAULT_SCALE_MIN),
            bound("max", DEFAULT_SCALE_MAX),
        )
    }

    /// Offered choice values, when the question restricts them.
    ///
    /// Entries are either bare strings or `{"value", "label", "score"}`
    /// objects; only the `value` is sent back as an answer.
    pub fn choices(&self) -> Option<Vec<String>> {
        let list = self.options.as_ref()?.get("choices")?.as_array()?;
        Some(
            list.iter()
                .filter_map(|choice| {
                    choice
                        .as_str()
                        .or_else(|| choice.get("value").and_then(|value| value.as_str()))
                        .map(str::to_string)
                })
                .collect(),
        )
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Questionnaire {
    pub id: QuestionnaireId,
    pub title: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub version: String,
    #[serde(default)]
    pub is_active: bool,
    #[serde(default)]
    pub questions: Vec<Question>,
}

/// A questionnaire answer as it travels on the wire.
///
/// Untagged: a bare JSON string always decodes as `Choice`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum AnswerValue {
    Scale(i64),
    Multi(BTreeSet<String>),
    Choice(String),
    Text(String),
}

impl AnswerValue {
    pub fn validate_for(&self, question: &Question) -> Result<(), AnswerValidationError> {
        let kind = question.question_type;
        match (kind, self) {
            (QuestionType::Scale, AnswerValue::Scale(value)) => {
                let (min, max) = question.scale_bounds();
                if (min..=max).contains(value) {
                    Ok(())
                } else {
                    Err(AnswerValidationError::ScaleOutOfRange {
                        value: *value,
                        min,
                        max,
                    })
                }
            }
            (QuestionType::MultipleChoice, AnswerValue::Choice(choice)) => {
                check_choice(question, choice)
            }
            (QuestionType::MultipleChoice, AnswerValue::Multi(choices)) => {
                if choices.is_empty() {
                    return Err(AnswerValidationError::EmptySelection);
                }
                choices
                    .iter()
                    .try_for_each(|choice| check_choice(question, choice))
            }
            (QuestionType::YesNo, AnswerValue::Choice(choice)) => {
                match choice.trim().to_ascii_lowercase().as_str() {
                    "yes" | "no" => Ok(()),
                    _ => Err(AnswerValidationError::UnknownChoice {
                        choice: choice.clone(),
                    }),
                }
            }
            (QuestionType::Text, AnswerValue::Text(text) | AnswerValue::Choice(text)) => {
                if text.chars().count() > MAX_TEXT_ANSWER_CHARS {
                    Err(AnswerValidationError::TextTooLong {
                        max: MAX_TEXT_ANSWER_CHARS,
                    })
                } else {
                    Ok(())
                }
            }
            _ => Err(AnswerValidationError::KindMismatch { kind }),
        }
    }
}

fn check_choice(question: &Question, choice: &str) -> Result<(), AnswerValidationError> {
    match question.choices() {
        Some(offered) if !offered.iter().any(|offer| offer == choice) => {
            Err(AnswerValidationError::UnknownChoice {
                choice: choice.to_string(),
            })
        }
        _ => Ok(()),
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnswerSubmission {
    pub question_id: QuestionId,
    pub value: AnswerValue,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnswerSubmissionRequest {
    pub answers: Vec<AnswerSubmission>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnswerSubmissionResponse {
    pub total_questions: u32,
    pub answered_questions: u32,
    pub completion_percent: f64,
    pub updated_answers: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatsResponse {
    pub seeker_profile_id: ItemId,
    #[serde(default)]
    pub stats: BTreeMap<String, f64>,
    #[serde(default)]
    pub fit_scores: Option<BTreeMap<String, f64>>,
    #[serde(default)]
    pub questionnaire_completed: bool,
}
