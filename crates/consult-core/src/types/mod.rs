//! Core identifiers and value types shared across the orchestration core.

use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

pub mod case;
pub mod envelope;
pub mod error;
pub mod feedback;
pub mod participant;
pub mod session;

pub use case::*;
pub use envelope::*;
pub use error::*;
pub use feedback::*;
pub use participant::*;
pub use session::*;

/// Opaque internal identifier for a `Session`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SessionId(pub Uuid);

impl SessionId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for SessionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Six decimal digit session code, case-sensitive, unique among non-completed
/// sessions. This is the key of the session's pub/sub topic (`session/<code>`).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SessionCode(String);

impl SessionCode {
    /// Builds a code from a pre-validated string (e.g. one read back from the
    /// repository). Panics in debug builds if the invariant does not hold.
    pub fn from_raw(code: impl Into<String>) -> Self {
        let code = code.into();
        debug_assert!(
            code.len() == 6 && code.chars().all(|c| c.is_ascii_digit()),
            "session code must be 6 decimal digits, got {code:?}"
        );
        Self(code)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// The pub/sub topic this code is addressed at.
    pub fn topic(&self) -> String {
        format!("session/{}", self.0)
    }
}

impl fmt::Display for SessionCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Identifier for a human user, minted and authenticated by the edge the core
/// does not implement. Treated as an opaque string.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct UserId(pub String);

impl fmt::Display for UserId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Identifier for a case, minted by the case-content repository.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CaseId(pub String);

impl fmt::Display for CaseId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Opaque identifier for a `Feedback` row.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct FeedbackId(pub Uuid);

impl FeedbackId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for FeedbackId {
    fn default() -> Self {
        Self::new()
    }
}

/// Role a participant holds within one session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Role {
    Doctor,
    Patient,
    Observer,
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Role::Doctor => "DOCTOR",
            Role::Patient => "PATIENT",
            Role::Observer => "OBSERVER",
        };
        write!(f, "{s}")
    }
}

/// The session's overall lifecycle status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum SessionStatus {
    Created,
    InProgress,
    Completed,
}

/// The session's current phase.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Phase {
    Waiting,
    Reading,
    Consultation,
    Feedback,
    Completed,
}

impl Phase {
    /// Whether this phase arms a scheduler timer.
    pub fn is_timed(self) -> bool {
        matches!(self, Phase::Reading | Phase::Consultation | Phase::Feedback)
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Phase::Waiting => "WAITING",
            Phase::Reading => "READING",
            Phase::Consultation => "CONSULTATION",
            Phase::Feedback => "FEEDBACK",
            Phase::Completed => "COMPLETED",
        };
        write!(f, "{s}")
    }
}

/// Default feedback-phase duration when not overridden: 600s.
pub const FEEDBACK_PHASE_SECONDS: u64 = 600;

/// Default idle timeout used by the activity tracker.
pub const DEFAULT_IDLE_TIMEOUT_SECS: u64 = 300;
