//! Repository interfaces.
//!
//! The core coordinates one repository call per step; it does not attempt
//! multi-entity transactions. Any durable store satisfying these
//! traits is an acceptable backing implementation.

pub mod memory;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::types::{
    Case, CaseId, Feedback, FeedbackSubmission, Participant, RepositoryError, Session,
    SessionCode, SessionId, UserId,
};

#[async_trait]
pub trait SessionRepository: Send + Sync {
    async fn find_by_code(&self, code: &SessionCode) -> Result<Option<Session>, RepositoryError>;

    async fn find_by_id(&self, id: SessionId) -> Result<Option<Session>, RepositoryError>;

    async fn save(&self, session: &Session) -> Result<(), RepositoryError>;
}

#[async_trait]
pub trait ParticipantRepository: Send + Sync {
    async fn save(&self, participant: &Participant) -> Result<(), RepositoryError>;

    async fn find_by_session_id_and_active(
        &self,
        session_id: SessionId,
        active: bool,
    ) -> Result<Vec<Participant>, RepositoryError>;

    async fn find_by_session_id_and_user_id(
        &self,
        session_id: SessionId,
        user_id: &UserId,
    ) -> Result<Option<Participant>, RepositoryError>;

    async fn find_by_user_id_and_active(
        &self,
        user_id: &UserId,
        active: bool,
    ) -> Result<Vec<Participant>, RepositoryError>;
}

#[async_trait]
pub trait FeedbackRepository: Send + Sync {
    async fn find_by_session_id_and_sender_id(
        &self,
        session_id: SessionId,
        sender_id: &UserId,
    ) -> Result<Vec<Feedback>, RepositoryError>;

    async fn find_for_round(
        &self,
        session_id: SessionId,
        case_id: &CaseId,
        round_number: u32,
    ) -> Result<Vec<Feedback>, RepositoryError>;

    /// Upserts on `(sessionId, senderId, caseId, roundNumber)`.
    async fn upsert(
        &self,
        session_id: SessionId,
        sender_id: UserId,
        recipient_id: UserId,
        case_id: CaseId,
        round_number: u32,
        submission: FeedbackSubmission,
    ) -> Result<Feedback, RepositoryError>;
}

#[async_trait]
pub trait CaseRepository: Send + Sync {
    async fn pick_random_by_category_names(
        &self,
        topics: &[String],
        exclude_ids: &[CaseId],
    ) -> Result<Option<Case>, RepositoryError>;

    async fn pick_random_by_date_range(
        &self,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
        exclude_ids: &[CaseId],
    ) -> Result<Option<Case>, RepositoryError>;
}
