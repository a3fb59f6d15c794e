//! Request/response DTOs for the HTTP edge.

use serde::{Deserialize, Serialize};

use crate::types::{Role, Session, SessionConfig, SessionConfigView, SessionStatus};
use crate::types::{CriterionScore, Phase};

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateSessionRequest {
    pub title: String,
    pub creator_user_id: String,
    pub creator_user_name: String,
    #[serde(default)]
    pub config: SessionConfig,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JoinRequest {
    pub role: Role,
    pub user_id: String,
    pub user_name: String,
}

/// `caseSelector` in the external spec is carried entirely by
/// `config.selectedTopics`/`config.recallDateRange`; no separate field is
/// needed since [`crate::orchestrator::SessionOrchestrator::configure`]
/// consumes a single `SessionConfig`.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConfigureRequest {
    pub user_id: String,
    pub config: SessionConfig,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ActingUserRequest {
    pub user_id: String,
    #[serde(default)]
    pub acting_as_admin: bool,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubmitFeedbackRequest {
    pub code: String,
    pub user_id: String,
    pub comment: String,
    pub criteria_scores: Vec<CriterionScore>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionResponse {
    pub session_code: String,
    pub title: String,
    pub status: SessionStatus,
    pub phase: Phase,
    pub config: SessionConfigView,
    pub current_round: u32,
    pub timer_start_timestamp: Option<i64>,
}

impl From<&Session> for SessionResponse {
    fn from(s: &Session) -> Self {
        Self {
            session_code: s.code.as_str().to_string(),
            title: s.title.clone(),
            status: s.status,
            phase: s.phase,
            config: SessionConfigView::from(&s.config),
            current_round: s.current_round,
            timer_start_timestamp: s.timer_start_timestamp,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FeedbackResponse {
    pub id: String,
    pub overall_performance: f64,
}

#[derive(Debug, Clone, Serialize)]
pub struct ErrorResponse {
    pub error: String,
    pub code: String,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HealthResponse {
    pub status: String,
    pub uptime_seconds: u64,
    pub version: String,
}

/// Inbound control frames on a topic-subscription WebSocket. Any other text
/// frame is treated as an opaque activity ping.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type", rename_all = "UPPERCASE")]
pub enum ClientMessage {
    Ping,
}
