//! In-memory repository implementations.
//!
//! Useful as the default backing store for tests and small deployments; any
//! persistent store satisfying the traits in [`super`] is a drop-in
//! replacement.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use parking_lot::Mutex;
use rand::seq::SliceRandom;

use crate::types::{
    Case, CaseId, Feedback, FeedbackId, FeedbackSubmission, Participant, RepositoryError, Session,
    SessionCode, SessionId, UserId,
};

use super::{CaseRepository, FeedbackRepository, ParticipantRepository, SessionRepository};

#[derive(Default)]
pub struct InMemorySessionRepository {
    by_code: DashMap<SessionCode, Session>,
}

#[async_trait]
impl SessionRepository for InMemorySessionRepository {
    async fn find_by_code(&self, code: &SessionCode) -> Result<Option<Session>, RepositoryError> {
        Ok(self.by_code.get(code).map(|r| r.value().clone()))
    }

    async fn find_by_id(&self, id: SessionId) -> Result<Option<Session>, RepositoryError> {
        Ok(self
            .by_code
            .iter()
            .find(|r| r.value().id == id)
            .map(|r| r.value().clone()))
    }

    async fn save(&self, session: &Session) -> Result<(), RepositoryError> {
        self.by_code.insert(session.code.clone(), session.clone());
        Ok(())
    }
}

#[derive(Default)]
pub struct InMemoryParticipantRepository {
    // keyed by (session, user), matching a participant's natural identity
    rows: DashMap<(SessionId, UserId), Participant>,
}

#[async_trait]
impl ParticipantRepository for InMemoryParticipantRepository {
    async fn save(&self, participant: &Participant) -> Result<(), RepositoryError> {
        self.rows.insert(
            (participant.session_id, participant.user_id.clone()),
            participant.clone(),
        );
        Ok(())
    }

    async fn find_by_session_id_and_active(
        &self,
        session_id: SessionId,
        active: bool,
    ) -> Result<Vec<Participant>, RepositoryError> {
        Ok(self
            .rows
            .iter()
            .filter(|r| r.key().0 == session_id && r.value().is_active == active)
            .map(|r| r.value().clone())
            .collect())
    }

    async fn find_by_session_id_and_user_id(
        &self,
        session_id: SessionId,
        user_id: &UserId,
    ) -> Result<Option<Participant>, RepositoryError> {
        Ok(self
            .rows
            .get(&(session_id, user_id.clone()))
            .map(|r| r.value().clone()))
    }

    async fn find_by_user_id_and_active(
        &self,
        user_id: &UserId,
        active: bool,
    ) -> Result<Vec<Participant>, RepositoryError> {
        Ok(self
            .rows
            .iter()
            .filter(|r| &r.key().1 == user_id && r.value().is_active == active)
            .map(|r| r.value().clone())
            .collect())
    }
}

#[derive(Default)]
pub struct InMemoryFeedbackRepository {
    rows: DashMap<(SessionId, UserId, CaseId, u32), Feedback>,
}

#[async_trait]
impl FeedbackRepository for InMemoryFeedbackRepository {
    async fn find_by_session_id_and_sender_id(
        &self,
        session_id: SessionId,
        sender_id: &UserId,
    ) -> Result<Vec<Feedback>, RepositoryError> {
        Ok(self
            .rows
            .iter()
            .filter(|r| r.key().0 == session_id && &r.key().1 == sender_id)
            .map(|r| r.value().clone())
            .collect())
    }

    async fn find_for_round(
        &self,
        session_id: SessionId,
        case_id: &CaseId,
        round_number: u32,
    ) -> Result<Vec<Feedback>, RepositoryError> {
        Ok(self
            .rows
            .iter()
            .filter(|r| {
                let k = r.key();
                k.0 == session_id && &k.2 == case_id && k.3 == round_number
            })
            .map(|r| r.value().clone())
            .collect())
    }

    async fn upsert(
        &self,
        session_id: SessionId,
        sender_id: UserId,
        recipient_id: UserId,
        case_id: CaseId,
        round_number: u32,
        submission: FeedbackSubmission,
    ) -> Result<Feedback, RepositoryError> {
        let key = (session_id, sender_id.clone(), case_id.clone(), round_number);
        let existing_id = self.rows.get(&key).map(|r| r.value().id);
        let feedback = Feedback {
            id: existing_id.unwrap_or_else(FeedbackId::new),
            session_id,
            sender_user_id: sender_id,
            recipient_user_id: recipient_id,
            case_id,
            round_number,
            comment: submission.comment,
            criteria_scores: submission.criteria_scores,
            created_at: Utc::now(),
        };
        self.rows.insert(key, feedback.clone());
        Ok(feedback)
    }
}

/// In-memory case catalog. Real deployments back this with whatever store
/// authors and hosts case content; this implementation exists so the core is
/// runnable and testable standalone.
#[derive(Default)]
pub struct InMemoryCaseRepository {
    cases: Mutex<Vec<Case>>,
}

impl InMemoryCaseRepository {
    pub fn new(cases: Vec<Case>) -> Self {
        Self {
            cases: Mutex::new(cases),
        }
    }

    pub fn seed(&self, case: Case) {
        self.cases.lock().push(case);
    }
}

#[async_trait]
impl CaseRepository for InMemoryCaseRepository {
    async fn pick_random_by_category_names(
        &self,
        topics: &[String],
        exclude_ids: &[CaseId],
    ) -> Result<Option<Case>, RepositoryError> {
        let cases = self.cases.lock();
        let mut candidates: Vec<&Case> = cases
            .iter()
            .filter(|c| topics.is_empty() || topics.contains(&c.category))
            .filter(|c| !exclude_ids.contains(&c.id))
            .collect();
        candidates.shuffle(&mut rand::thread_rng());
        Ok(candidates.first().map(|c| (*c).clone()))
    }

    async fn pick_random_by_date_range(
        &self,
        _from: DateTime<Utc>,
        _to: DateTime<Utc>,
        exclude_ids: &[CaseId],
    ) -> Result<Option<Case>, RepositoryError> {
        // The in-memory catalog carries no authoring timestamps; recall-range
        // selection degrades to "any case not yet used" so standalone runs
        // and tests can still exercise the recall path end to end.
        let cases = self.cases.lock();
        let mut candidates: Vec<&Case> = cases
            .iter()
            .filter(|c| !exclude_ids.contains(&c.id))
            .collect();
        candidates.shuffle(&mut rand::thread_rng());
        Ok(candidates.first().map(|c| (*c).clone()))
    }
}
