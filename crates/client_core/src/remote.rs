//! HTTP boundary to the review service. Every transport or status failure is
//! turned into a `SyncError` here and nowhere else.

use std::{collections::HashMap, fmt, time::Duration};

use async_trait::async_trait;
use reqwest::{Client, RequestBuilder, Response};
use serde::de::DeserializeOwned;
use shared::{
    domain::{ItemId, ProfileField, QuestionId, RoleConfigId},
    error::ApiError,
    protocol::{
        AnswerSubmission, AnswerSubmissionRequest, AnswerSubmissionResponse, AnswerValue,
        FeedResponse, NoteRequest, NoteResponse, OffererConfigRequest, OffererConfigResponse,
        ProfileRecord, ProfileUpdate, Question, Questionnaire, RoleConfigsResponse,
        ShortlistResponse, StatsResponse, SwipeRequest, SwipeResponse, MAX_NOTE_CHARS,
    },
};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};
use url::Url;

use crate::{types::Decision, DecisionSink, FeedSource, SyncError, SyncSink};

pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(10);
pub const MIN_PAGE_SIZE: u32 = 1;
pub const MAX_PAGE_SIZE: u32 = 50;

/// Bearer credentials for one signed-in user. Passed explicitly to the client.
#[derive(Clone)]
pub struct SessionContext {
    token: String,
}

impl SessionContext {
    pub fn new(token: impl Into<String>) -> Self {
        Self {
            token: token.into(),
        }
    }

    pub fn token(&self) -> &str {
        &self.token
    }
}

impl fmt::Debug for SessionContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionContext")
            .field("token", &"<redacted>")
            .finish()
    }
}

#[derive(Debug, Clone)]
pub struct RemoteClient {
    http: Client,
    server_url: String,
    session: SessionContext,
    timeout: Duration,
}

impl RemoteClient {
    pub fn new(server_url: &str, session: SessionContext) -> Result<Self, SyncError> {
        let parsed = Url::parse(server_url.trim())
            .map_err(|err| SyncError::Invalid(format!("server url '{server_url}': {err}")))?;
        if !matches!(parsed.scheme(), "http" | "https") {
            return Err(SyncError::Invalid(format!(
                "server url '{server_url}' must use http or https"
            )));
        }
        Ok(Self {
            http: Client::new(),
            server_url: parsed.as_str().trim_end_matches('/').to_string(),
            session,
            timeout: DEFAULT_REQUEST_TIMEOUT,
        })
    }

    /// Per-request bound; a request past it fails as `SyncError::Timeout`.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn server_url(&self) -> &str {
        &self.server_url
    }

    fn endpoint(&self, path: &str) -> String {
        format!("{}{path}", self.server_url)
    }

    async fn send<T: DeserializeOwned>(&self, request: RequestBuilder) -> Result<T, SyncError> {
        let response = request
            .bearer_auth(self.session.token())
            .timeout(self.timeout)
            .send()
            .await
            .map_err(|err| self.transport_error(err))?;
        let response = check_status(response).await?;
        response
            .json::<T>()
            .await
            .map_err(|err| SyncError::Decode(err.to_string()))
    }

    fn transport_error(&self, err: reqwest::Error) -> SyncError {
        if err.is_timeout() {
            SyncError::Timeout(self.timeout)
        } else {
            SyncError::from(err)
        }
    }

    pub async fn fetch_feed(
        &self,
        cursor: Option<&str>,
        limit: u32,
    ) -> Result<FeedResponse, SyncError> {
        let limit = limit.clamp(MIN_PAGE_SIZE, MAX_PAGE_SIZE);
        let mut request = self
            .http
            .get(self.endpoint("/offerer/feed"))
            .query(&[("limit", limit.to_string())]);
        if let Some(cursor) = cursor {
            request = request.query(&[("cursor", cursor)]);
        }
        let page: FeedResponse = self.send(request).await?;
        debug!(
            candidates = page.candidates.len(),
            has_more = page.has_more,
            "remote: feed page fetched"
        );
        Ok(page)
    }

    pub async fn swipe(&self, decision: &Decision) -> Result<SwipeResponse, SyncError> {
        let body = SwipeRequest {
            seeker_profile_id: decision.item_id,
            decision: decision.outcome,
        };
        let ack: SwipeResponse = self
            .send(self.http.post(self.endpoint("/offerer/swipe")).json(&body))
            .await?;
        info!(
            item_id = %decision.item_id,
            outcome = %decision.outcome,
            "remote: decision recorded"
        );
        Ok(ack)
    }

    pub async fn profile(&self) -> Result<ProfileRecord, SyncError> {
        self.send(self.http.get(self.endpoint("/seeker/profile")))
            .await
    }

    pub async fn update_profile(&self, update: &ProfileUpdate) -> Result<ProfileRecord, SyncError> {
        self.send(self.http.put(self.endpoint("/seeker/profile")).json(update))
            .await
    }

    pub async fn role_configs(&self) -> Result<RoleConfigsResponse, SyncError> {
        self.send(self.http.get(self.endpoint("/offerer/role-configs")))
            .await
    }

    pub async fn set_role_config(
        &self,
        role_config_id: RoleConfigId,
    ) -> Result<OffererConfigResponse, SyncError> {
        let body = OffererConfigRequest { role_config_id };
        let response: OffererConfigResponse = self
            .send(self.http.put(self.endpoint("/offerer/config")).json(&body))
            .await?;
        info!(role = %response.role_name, "remote: role configuration selected");
        Ok(response)
    }

    pub async fn questionnaire(&self) -> Result<Questionnaire, SyncError> {
        self.send(self.http.get(self.endpoint("/questionnaire")))
            .await
    }

    pub async fn submit_answers(
        &self,
        answers: Vec<AnswerSubmission>,
    ) -> Result<AnswerSubmissionResponse, SyncError> {
        if answers.is_empty() {
            return Err(SyncError::Invalid("no answers to submit".into()));
        }
        let body = AnswerSubmissionRequest { answers };
        self.send(
            self.http
                .post(self.endpoint("/questionnaire/answers"))
                .json(&body),
        )
        .await
    }

    pub async fn shortlist(&self) -> Result<ShortlistResponse, SyncError> {
        self.send(self.http.get(self.endpoint("/offerer/shortlist")))
            .await
    }

    pub async fn add_shortlist_note(
        &self,
        item_id: ItemId,
        note: &str,
    ) -> Result<NoteResponse, SyncError> {
        let chars = note.chars().count();
        if chars > MAX_NOTE_CHARS {
            return Err(SyncError::Invalid(format!(
                "note is {chars} characters, limit is {MAX_NOTE_CHARS}"
            )));
        }
        let body = NoteRequest {
            note: note.to_string(),
        };
        self.send(
            self.http
                .post(self.endpoint(&format!("/offerer/shortlist/{item_id}/note")))
                .json(&body),
        )
        .await
    }

    pub async fn stats(&self) -> Result<StatsResponse, SyncError> {
        self.send(self.http.get(self.endpoint("/seeker/stats")))
            .await
    }
}

async fn check_status(response: Response) -> Result<Response, SyncError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response.text().await.unwrap_or_default();
    let detail = serde_json::from_str::<ApiError>(&body)
        .ok()
        .and_then(|error| error.message())
        .unwrap_or_else(|| format!("HTTP {}", status.as_u16()));
    Err(SyncError::rejected(status.as_u16(), detail))
}

#[async_trait]
impl FeedSource for RemoteClient {
    async fn fetch_page(
        &self,
        cursor: Option<String>,
        limit: u32,
    ) -> Result<FeedResponse, SyncError> {
        self.fetch_feed(cursor.as_deref(), limit).await
    }
}

#[async_trait]
impl DecisionSink for RemoteClient {
    async fn submit(&self, decision: &Decision) -> Result<SwipeResponse, SyncError> {
        self.swipe(decision).await
    }
}

/// Autosave target for free-text profile fields. Each write carries only the
/// field that changed.
#[derive(Debug, Clone)]
pub struct ProfileSink {
    client: RemoteClient,
}

impl ProfileSink {
    pub fn new(client: RemoteClient) -> Self {
        Self { client }
    }
}

#[async_trait]
impl SyncSink<ProfileField, String> for ProfileSink {
    async fn commit(&self, field: &ProfileField, value: &String) -> Result<(), SyncError> {
        let truncated = field.truncate_to_limit(value);
        if truncated.len() != value.len() {
            warn!(field = %field, max = field.max_chars(), "remote: profile value truncated");
        }
        let mut update = ProfileUpdate::default();
        match field {
            ProfileField::Headline => update.headline = Some(truncated),
            ProfileField::Location => update.location = Some(truncated),
            ProfileField::Bio => update.bio = Some(truncated),
        }
        self.client.update_profile(&update).await.map(|_| ())
    }
}

/// Autosave target for questionnaire answers, one answer per write.
///
/// When built with the questionnaire's questions, answers are checked
/// against them before anything goes on the wire.
pub struct AnswerSink {
    client: RemoteClient,
    questions: HashMap<QuestionId, Question>,
    progress: Mutex<Option<AnswerSubmissionResponse>>,
}

impl AnswerSink {
    pub fn new(client: RemoteClient) -> Self {
        Self {
            client,
            questions: HashMap::new(),
            progress: Mutex::new(None),
        }
    }

    pub fn with_questions(mut self, questions: impl IntoIterator<Item = Question>) -> Self {
        self.questions = questions
            .into_iter()
            .map(|question| (question.id, question))
            .collect();
        self
    }

    /// Completion figures from the latest successful write.
    pub async fn progress(&self) -> Option<AnswerSubmissionResponse> {
        self.progress.lock().await.clone()
    }
}

#[async_trait]
impl SyncSink<QuestionId, AnswerValue> for AnswerSink {
    async fn commit(&self, question_id: &QuestionId, value: &AnswerValue) -> Result<(), SyncError> {
        if let Some(question) = self.questions.get(question_id) {
            value
                .validate_for(question)
                .map_err(|err| SyncError::Invalid(err.to_string()))?;
        } else if !self.questions.is_empty() {
            return Err(SyncError::Invalid(format!("unknown question {question_id}")));
        }
        let ack = self
            .client
            .submit_answers(vec![AnswerSubmission {
                question_id: *question_id,
                value: value.clone(),
            }])
            .await?;
        debug!(
            question_id = %question_id,
            answered = ack.answered_questions,
            total = ack.total_questions,
            "remote: answer saved"
        );
        *self.progress.lock().await = Some(ack);
        Ok(())
    }
}

#[cfg(test)]
#[path = "tests/remote_tests.rs"]
mod tests;
