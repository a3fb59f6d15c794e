//! The `Session` entity.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::time::Instant;

use super::{CaseId, Phase, SessionCode, SessionId, SessionStatus, UserId};

/// Configuration chosen by the DOCTOR before `Start`, re-settable only while
/// `WAITING`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionConfig {
    pub reading_minutes: u32,
    pub consultation_minutes: u32,
    pub timing_type: String,
    pub session_type: String,
    /// Ordered set of category names; order is preserved but duplicates are
    /// not meaningful beyond case selection.
    pub selected_topics: Vec<String>,
    pub recall_date_range: Option<RecallDateRange>,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            reading_minutes: 5,
            consultation_minutes: 10,
            timing_type: "standard".to_string(),
            session_type: "standard".to_string(),
            selected_topics: Vec::new(),
            recall_date_range: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RecallDateRange {
    pub from: DateTime<Utc>,
    pub to: DateTime<Utc>,
}

/// A coordinated multi-user practice run, identified by a six-digit code.
#[derive(Debug, Clone)]
pub struct Session {
    pub id: SessionId,
    pub code: SessionCode,
    pub title: String,
    pub status: SessionStatus,
    pub phase: Phase,

    pub config: SessionConfig,

    pub selected_case_id: Option<CaseId>,
    /// Ordered, append-only within the session.
    pub used_case_ids: Vec<CaseId>,

    /// Wall-clock instant the current phase began, used only to compute
    /// elapsed time for diagnostics; clients derive remaining time from
    /// `timer_start_timestamp`.
    pub phase_start_time: Option<Instant>,
    /// Epoch-millisecond timestamp matching the last `TIMER_START` envelope.
    /// Non-null iff `phase` is timed and a timer is armed.
    pub timer_start_timestamp: Option<i64>,
    pub current_round: u32,

    pub created_by_user_id: UserId,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub ended_at: Option<DateTime<Utc>>,
}

impl Session {
    pub fn new(code: SessionCode, title: String, creator: UserId, config: SessionConfig) -> Self {
        Self {
            id: SessionId::new(),
            code,
            title,
            status: SessionStatus::Created,
            phase: Phase::Waiting,
            config,
            selected_case_id: None,
            used_case_ids: Vec::new(),
            phase_start_time: None,
            timer_start_timestamp: None,
            current_round: 1,
            created_by_user_id: creator,
            created_at: Utc::now(),
            started_at: None,
            ended_at: None,
        }
    }

    /// Invariant (i): `status=COMPLETED ⇔ phase=COMPLETED`.
    pub fn is_completed(&self) -> bool {
        debug_assert_eq!(
            self.status == SessionStatus::Completed,
            self.phase == Phase::Completed,
            "status/phase COMPLETED invariant violated for session {}",
            self.code
        );
        self.status == SessionStatus::Completed
    }

    /// `feedback_phase_seconds` comes from the orchestrator's
    /// `SessionDefaultsConfig` rather than being hardcoded here, so a
    /// deployment can retune the FEEDBACK duration without a code change.
    pub fn duration_for(&self, phase: Phase, feedback_phase_seconds: u64) -> u64 {
        match phase {
            Phase::Reading => self.config.reading_minutes as u64 * 60,
            Phase::Consultation => self.config.consultation_minutes as u64 * 60,
            Phase::Feedback => feedback_phase_seconds,
            Phase::Waiting | Phase::Completed => 0,
        }
    }
}
