//! Phase State Machine.
//!
//! Pure transition and envelope-construction logic; no locking or I/O lives
//! here; see [`crate::orchestrator`] for that and the durability/scheduling
//! sequencing that wraps it.

use crate::types::{Envelope, Phase, Session, SessionCode};

/// The phase a timer-expiry callback should drive the session into, given the
/// phase it is currently in. `None` if that
/// phase has no natural successor (`WAITING`, `COMPLETED`).
pub fn next_on_timer_expiry(phase: Phase) -> Option<Phase> {
    match phase {
        Phase::Reading => Some(Phase::Consultation),
        Phase::Consultation => Some(Phase::Feedback),
        Phase::Feedback => Some(Phase::Completed),
        Phase::Waiting | Phase::Completed => None,
    }
}

/// Whether `Skip` is legal in this phase.
pub fn can_skip(phase: Phase) -> bool {
    matches!(phase, Phase::Reading | Phase::Consultation)
}

/// Builds the `PHASE_CHANGE` envelope for a transition into `new_phase`.
/// `duration_seconds` is 0 for untimed phases.
pub fn phase_change_envelope(
    code: &SessionCode,
    new_phase: Phase,
    duration_seconds: u64,
    start_timestamp_ms: i64,
) -> Envelope {
    Envelope::PhaseChange {
        session_code: code.clone(),
        phase: new_phase,
        duration_seconds,
        start_timestamp: start_timestamp_ms,
    }
}

/// Builds the `TIMER_START` envelope that follows a `PHASE_CHANGE` into a
/// timed phase. Callers must publish `PHASE_CHANGE` first to
/// preserve the per-topic ordering guarantee.
pub fn timer_start_envelope(
    code: &SessionCode,
    phase: Phase,
    duration_seconds: u64,
    start_timestamp_ms: i64,
) -> Envelope {
    Envelope::TimerStart {
        session_code: code.clone(),
        phase,
        duration_seconds,
        start_timestamp: start_timestamp_ms,
    }
}

/// Current epoch-millisecond wall clock, used as the authoritative
/// `startTimestamp` clients compute remaining time from.
pub fn now_epoch_ms() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

/// Convenience used by the orchestrator to compute the duration for the
/// phase a session is about to enter.
pub fn duration_seconds_for(session: &Session, phase: Phase) -> u64 {
    session.duration_for(phase)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn timer_expiry_advances_through_timed_phases_then_completes() {
        assert_eq!(next_on_timer_expiry(Phase::Reading), Some(Phase::Consultation));
        assert_eq!(next_on_timer_expiry(Phase::Consultation), Some(Phase::Feedback));
        assert_eq!(next_on_timer_expiry(Phase::Feedback), Some(Phase::Completed));
    }

    #[test]
    fn waiting_and_completed_have_no_natural_successor() {
        assert_eq!(next_on_timer_expiry(Phase::Waiting), None);
        assert_eq!(next_on_timer_expiry(Phase::Completed), None);
    }

    #[test]
    fn only_reading_and_consultation_can_be_skipped() {
        assert!(can_skip(Phase::Reading));
        assert!(can_skip(Phase::Consultation));
        assert!(!can_skip(Phase::Feedback));
        assert!(!can_skip(Phase::Waiting));
        assert!(!can_skip(Phase::Completed));
    }

    #[test]
    fn phase_change_then_timer_start_carry_the_same_phase_and_duration() {
        let code = SessionCode::from_raw("123456");
        let change = phase_change_envelope(&code, Phase::Reading, 60, 1_000);
        let start = timer_start_envelope(&code, Phase::Reading, 60, 1_000);
        match (change, start) {
            (
                Envelope::PhaseChange { phase: p1, duration_seconds: d1, start_timestamp: t1, .. },
                Envelope::TimerStart { phase: p2, duration_seconds: d2, start_timestamp: t2, .. },
            ) => {
                assert_eq!(p1, p2);
                assert_eq!(d1, d2);
                assert_eq!(t1, t2);
            }
            _ => panic!("unexpected envelope kinds"),
        }
    }
}
