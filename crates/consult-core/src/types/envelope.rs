//! Outbound envelopes delivered over the topic bus.

use serde::{Deserialize, Serialize};

use super::{CaseProjection, Phase, Role, SessionCode, SessionConfig, SessionStatus};

/// One participant as surfaced in `participants[]` on outbound envelopes.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ParticipantView {
    pub user_id: String,
    pub name: String,
    pub role: Role,
    pub is_active: bool,
    pub has_completed: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionConfigView {
    pub reading_time: u32,
    pub consultation_time: u32,
    pub timing_type: String,
    pub session_type: String,
    pub selected_topics: Vec<String>,
}

impl From<&SessionConfig> for SessionConfigView {
    fn from(c: &SessionConfig) -> Self {
        Self {
            reading_time: c.reading_minutes,
            consultation_time: c.consultation_minutes,
            timing_type: c.timing_type.clone(),
            session_type: c.session_type.clone(),
            selected_topics: c.selected_topics.clone(),
        }
    }
}

/// A tagged message delivered on a session topic or a per-user private queue.
/// `type` is the serde-level discriminator.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum Envelope {
    #[serde(rename = "SESSION_UPDATE", rename_all = "camelCase")]
    SessionUpdate {
        session_code: SessionCode,
        title: String,
        phase: Phase,
        status: SessionStatus,
        config: SessionConfigView,
        participants: Vec<ParticipantView>,
        selected_case: Option<CaseProjection>,
        current_round: u32,
        timer_start_timestamp: Option<i64>,
    },

    #[serde(rename = "PARTICIPANT_UPDATE", rename_all = "camelCase")]
    ParticipantUpdate {
        session_code: SessionCode,
        participants: Vec<ParticipantView>,
    },

    #[serde(rename = "PHASE_CHANGE", rename_all = "camelCase")]
    PhaseChange {
        session_code: SessionCode,
        phase: Phase,
        duration_seconds: u64,
        start_timestamp: i64,
    },

    #[serde(rename = "TIMER_START", rename_all = "camelCase")]
    TimerStart {
        session_code: SessionCode,
        phase: Phase,
        duration_seconds: u64,
        start_timestamp: i64,
    },

    /// Private: only delivered to one `(session, user)` queue, never on the
    /// shared topic.
    #[serde(rename = "CASE_DATA", rename_all = "camelCase")]
    CaseData {
        session_code: SessionCode,
        case: CaseProjection,
    },

    #[serde(rename = "USER_LEFT", rename_all = "camelCase")]
    UserLeft {
        session_code: SessionCode,
        user_id: String,
        user_name: String,
        user_role: Option<Role>,
    },

    #[serde(rename = "SESSION_ENDED", rename_all = "camelCase")]
    SessionEnded {
        session_code: SessionCode,
        reason: String,
        timestamp: i64,
    },

    #[serde(rename = "ROLE_CHANGE", rename_all = "camelCase")]
    RoleChange {
        session_code: SessionCode,
        message: String,
    },

    #[serde(rename = "TOPIC_SELECTION_NEEDED", rename_all = "camelCase")]
    TopicSelectionNeeded {
        session_code: SessionCode,
        completed_topic: String,
        available_topics: Vec<String>,
    },
}

impl Envelope {
    pub fn session_code(&self) -> &SessionCode {
        match self {
            Envelope::SessionUpdate { session_code, .. }
            | Envelope::ParticipantUpdate { session_code, .. }
            | Envelope::PhaseChange { session_code, .. }
            | Envelope::TimerStart { session_code, .. }
            | Envelope::CaseData { session_code, .. }
            | Envelope::UserLeft { session_code, .. }
            | Envelope::SessionEnded { session_code, .. }
            | Envelope::RoleChange { session_code, .. }
            | Envelope::TopicSelectionNeeded { session_code, .. } => session_code,
        }
    }

    /// Whether this envelope carries role-filtered case content and must
    /// never be published on the shared topic.
    pub fn is_private(&self) -> bool {
        matches!(self, Envelope::CaseData { .. })
    }
}
