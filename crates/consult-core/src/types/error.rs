//! Error kinds for the orchestration core.

use thiserror::Error;

use super::{Role, SessionCode};

/// Top-level error returned by every orchestrator operation.
///
/// Recovery policy: `NotFound` / `Forbidden` / `Conflict` /
/// `InvalidState` / `Validation` are returned without side effects. `Transient`
/// is surfaced after a mutation has already been applied; the caller may retry
/// the next legal event. `Fatal` triggers `endSession` from within the
/// orchestrator before being returned.
#[derive(Error, Debug, Clone)]
pub enum OrchestratorError {
    #[error("session {0} not found")]
    NotFound(SessionCode),

    #[error("participant {user} not found in session {code}")]
    ParticipantNotFound { code: SessionCode, user: String },

    #[error("forbidden: {0}")]
    Forbidden(String),

    #[error("conflict: {0}")]
    Conflict(String),

    #[error("invalid state: {0}")]
    InvalidState(String),

    #[error("validation failed: {0}")]
    Validation(String),

    #[error("transient failure, safe to retry: {0}")]
    Transient(String),

    #[error("internal invariant violated, session force-ended: {0}")]
    Fatal(String),
}

impl OrchestratorError {
    pub fn role_unavailable(role: Role) -> Self {
        Self::Conflict(format!("role {role} is not available"))
    }

    pub fn forbidden_doctor() -> Self {
        Self::Forbidden("only the session creator may hold the DOCTOR role".into())
    }

    pub fn session_completed(code: &SessionCode) -> Self {
        Self::InvalidState(format!("session {code} is already completed"))
    }

    /// Whether this error was returned without mutating session state, so a
    /// caller can safely retry the same intent unchanged.
    pub fn is_side_effect_free(&self) -> bool {
        !matches!(self, Self::Transient(_) | Self::Fatal(_))
    }
}

/// Errors surfaced by the [`crate::repository`] traits.
#[derive(Error, Debug, Clone)]
pub enum RepositoryError {
    #[error("not found")]
    NotFound,

    #[error("uniqueness violation: {0}")]
    Conflict(String),

    #[error("backing store error: {0}")]
    Backend(String),
}

impl RepositoryError {
    /// Maps a repository failure into an orchestrator error, attaching the
    /// session code for the `NotFound` case since the repository layer does
    /// not carry it on its own error type.
    pub fn into_orchestrator_error(self, code: &SessionCode) -> OrchestratorError {
        match self {
            RepositoryError::NotFound => OrchestratorError::NotFound(code.clone()),
            RepositoryError::Conflict(msg) => OrchestratorError::Conflict(msg),
            RepositoryError::Backend(msg) => OrchestratorError::Transient(msg),
        }
    }
}

/// Errors surfaced by the [`crate::scheduler`].
#[derive(Error, Debug, Clone)]
pub enum SchedulerError {
    #[error("scheduler is shutting down")]
    ShuttingDown,

    #[error("scheduler backend error: {0}")]
    Backend(String),
}

impl From<SchedulerError> for OrchestratorError {
    fn from(e: SchedulerError) -> Self {
        OrchestratorError::Transient(e.to_string())
    }
}

/// Errors surfaced by the [`crate::bus`].
#[derive(Error, Debug, Clone)]
pub enum BusError {
    #[error("topic has no subscribers")]
    NoSubscribers,

    #[error("publish failed: {0}")]
    Backend(String),
}
