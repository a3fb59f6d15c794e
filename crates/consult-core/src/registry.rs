//! Participant Registry.
//!
//! Caches the active participant set per session, invalidated on Join/Leave;
//! the repository remains the durable source of truth.

use std::sync::Arc;

use dashmap::DashMap;

use crate::repository::ParticipantRepository;
use crate::types::{Participant, RepositoryError, Role, SessionId};

/// Derived query: which roles a joiner may currently request.
///
/// - `DOCTOR` is never available to joiners; only the creator may reactivate it.
/// - `PATIENT` is available iff no active PATIENT exists.
/// - `OBSERVER` is always available.
pub fn available_roles(active: &[Participant]) -> Vec<Role> {
    let mut roles = Vec::with_capacity(2);
    if !active.iter().any(|p| p.role == Role::Patient) {
        roles.push(Role::Patient);
    }
    roles.push(Role::Observer);
    roles
}

pub fn has_active_role(active: &[Participant], role: Role) -> bool {
    active.iter().any(|p| p.role == role)
}

pub fn active_doctor(active: &[Participant]) -> Option<&Participant> {
    active.iter().find(|p| p.role == Role::Doctor)
}

pub struct ParticipantRegistry {
    repo: Arc<dyn ParticipantRepository>,
    /// Cache of each session's active participants, invalidated whenever a
    /// Join or Leave mutates the underlying rows.
    cache: DashMap<SessionId, Vec<Participant>>,
}

impl ParticipantRegistry {
    pub fn new(repo: Arc<dyn ParticipantRepository>) -> Self {
        Self {
            repo,
            cache: DashMap::new(),
        }
    }

    /// Returns the cached active set, refreshing from the repository on a
    /// cache miss.
    pub async fn active(&self, session_id: SessionId) -> Result<Vec<Participant>, RepositoryError> {
        if let Some(hit) = self.cache.get(&session_id) {
            return Ok(hit.value().clone());
        }
        let fresh = self
            .repo
            .find_by_session_id_and_active(session_id, true)
            .await?;
        self.cache.insert(session_id, fresh.clone());
        Ok(fresh)
    }

    pub fn invalidate(&self, session_id: SessionId) {
        self.cache.remove(&session_id);
    }

    /// Persists `participant` and invalidates the session's cached active
    /// set so the next read reflects it.
    pub async fn save(&self, participant: &Participant) -> Result<(), RepositoryError> {
        self.repo.save(participant).await?;
        self.invalidate(participant.session_id);
        Ok(())
    }

    pub async fn find(
        &self,
        session_id: SessionId,
        user_id: &crate::types::UserId,
    ) -> Result<Option<Participant>, RepositoryError> {
        self.repo
            .find_by_session_id_and_user_id(session_id, user_id)
            .await
    }

    pub async fn other_active_sessions(
        &self,
        user_id: &crate::types::UserId,
    ) -> Result<Vec<Participant>, RepositoryError> {
        self.repo.find_by_user_id_and_active(user_id, true).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::UserId;

    fn participant(role: Role) -> Participant {
        Participant::new(
            SessionId::new(),
            UserId("u".into()),
            "name".into(),
            role,
        )
    }

    #[test]
    fn available_roles_excludes_patient_once_taken() {
        let active = vec![participant(Role::Doctor), participant(Role::Patient)];
        assert_eq!(available_roles(&active), vec![Role::Observer]);
    }

    #[test]
    fn available_roles_offers_patient_and_observer_when_free() {
        let active = vec![participant(Role::Doctor)];
        assert_eq!(available_roles(&active), vec![Role::Patient, Role::Observer]);
    }

    #[test]
    fn has_active_role_checks_membership() {
        let active = vec![participant(Role::Observer)];
        assert!(has_active_role(&active, Role::Observer));
        assert!(!has_active_role(&active, Role::Doctor));
    }

    #[test]
    fn active_doctor_finds_the_sole_doctor() {
        let active = vec![participant(Role::Observer), participant(Role::Doctor)];
        assert!(active_doctor(&active).is_some());
        assert_eq!(active_doctor(&active).unwrap().role, Role::Doctor);
    }

    #[test]
    fn active_doctor_is_none_without_one() {
        let active = vec![participant(Role::Observer)];
        assert!(active_doctor(&active).is_none());
    }
}
