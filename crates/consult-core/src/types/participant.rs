//! The `Participant` entity.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::{Role, SessionId, UserId};

/// A user's membership in one session. Keyed by `(sessionId, userId)`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Participant {
    pub session_id: SessionId,
    pub user_id: UserId,
    pub user_name: String,
    pub role: Role,
    pub is_active: bool,
    pub has_completed: bool,
    /// Legacy flag, ignored by gating; superseded by
    /// [`crate::feedback_store`] round-scoped lookups.
    pub has_given_feedback: bool,
    pub joined_at: DateTime<Utc>,
}

impl Participant {
    pub fn new(session_id: SessionId, user_id: UserId, user_name: String, role: Role) -> Self {
        Self {
            session_id,
            user_id,
            user_name,
            role,
            is_active: true,
            has_completed: false,
            has_given_feedback: false,
            joined_at: Utc::now(),
        }
    }
}
