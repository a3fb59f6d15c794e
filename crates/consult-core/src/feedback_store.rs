//! Feedback Store gating.
//!
//! Pure predicates over an already-fetched round's feedback rows and the
//! session's active participants; [`crate::orchestrator`] owns the
//! read-modify-write sequencing against [`crate::repository::FeedbackRepository`].

use crate::registry::has_active_role;
use crate::types::{CriterionScore, Feedback, FeedbackSubmission, Participant, Role};

/// Inclusive bounds a criterion's resolved score must fall within.
pub const SCORE_MIN: f64 = 0.0;
pub const SCORE_MAX: f64 = 5.0;

/// `Validation`'s defining trigger: a missing comment or an out-of-range
/// score (direct or any sub-score).
pub fn validate_submission(submission: &FeedbackSubmission) -> Result<(), String> {
    if submission.comment.trim().is_empty() {
        return Err("feedback comment must not be empty".into());
    }
    if submission.criteria_scores.is_empty() {
        return Err("feedback must include at least one scored criterion".into());
    }
    for criterion in &submission.criteria_scores {
        let scores: &[f64] = match criterion {
            CriterionScore::Direct { score, .. } => std::slice::from_ref(score),
            CriterionScore::SubScored { sub_scores, .. } => sub_scores,
        };
        if scores.iter().any(|s| !(SCORE_MIN..=SCORE_MAX).contains(s)) {
            return Err(format!(
                "score for criterion '{}' is out of range [{SCORE_MIN}, {SCORE_MAX}]",
                criterion.name()
            ));
        }
    }
    Ok(())
}

/// True iff some active participant holding `role` has submitted feedback
/// for this round.
pub fn feedback_given_by_role(round_rows: &[Feedback], active: &[Participant], role: Role) -> bool {
    active
        .iter()
        .filter(|p| p.role == role)
        .any(|p| round_rows.iter().any(|f| f.sender_user_id == p.user_id))
}

/// `gatingSatisfied`: PATIENT must have submitted; OBSERVER must
/// have submitted only if an active observer exists.
pub fn gating_satisfied(round_rows: &[Feedback], active: &[Participant]) -> bool {
    let patient_ok = feedback_given_by_role(round_rows, active, Role::Patient);
    let observer_ok = !has_active_role(active, Role::Observer)
        || feedback_given_by_role(round_rows, active, Role::Observer);
    patient_ok && observer_ok
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{CaseId, CriterionScore, FeedbackId, SessionId, UserId};

    fn participant(user_id: &str, role: Role) -> Participant {
        Participant::new(SessionId::new(), UserId(user_id.into()), user_id.into(), role)
    }

    fn feedback_from(sender: &str) -> Feedback {
        Feedback {
            id: FeedbackId::new(),
            session_id: SessionId::new(),
            sender_user_id: UserId(sender.into()),
            recipient_user_id: UserId("doctor".into()),
            case_id: CaseId("case-1".into()),
            round_number: 1,
            comment: "ok".into(),
            criteria_scores: vec![CriterionScore::Direct {
                name: "communication".into(),
                score: 3.0,
            }],
            created_at: chrono::Utc::now(),
        }
    }

    #[test]
    fn gating_requires_patient_feedback() {
        let active = vec![participant("doc", Role::Doctor), participant("pat", Role::Patient)];
        assert!(!gating_satisfied(&[], &active));
        assert!(gating_satisfied(&[feedback_from("pat")], &active));
    }

    #[test]
    fn gating_requires_observer_feedback_only_when_observer_present() {
        let active = vec![
            participant("doc", Role::Doctor),
            participant("pat", Role::Patient),
            participant("obs", Role::Observer),
        ];
        let patient_only = vec![feedback_from("pat")];
        assert!(!gating_satisfied(&patient_only, &active));

        let both = vec![feedback_from("pat"), feedback_from("obs")];
        assert!(gating_satisfied(&both, &active));
    }

    #[test]
    fn gating_ignores_observer_requirement_without_an_active_observer() {
        let active = vec![participant("doc", Role::Doctor), participant("pat", Role::Patient)];
        let rows = vec![feedback_from("pat")];
        assert!(gating_satisfied(&rows, &active));
    }

    fn submission(comment: &str, scores: Vec<CriterionScore>) -> FeedbackSubmission {
        FeedbackSubmission {
            comment: comment.to_string(),
            criteria_scores: scores,
        }
    }

    #[test]
    fn rejects_an_empty_comment() {
        let result = validate_submission(&submission(
            "  ",
            vec![CriterionScore::Direct { name: "rapport".into(), score: 3.0 }],
        ));
        assert!(result.is_err());
    }

    #[test]
    fn rejects_no_scored_criteria() {
        let result = validate_submission(&submission("good session", vec![]));
        assert!(result.is_err());
    }

    #[test]
    fn rejects_an_out_of_range_direct_score() {
        let result = validate_submission(&submission(
            "good session",
            vec![CriterionScore::Direct { name: "rapport".into(), score: 7.0 }],
        ));
        assert!(result.is_err());
    }

    #[test]
    fn rejects_an_out_of_range_sub_score() {
        let result = validate_submission(&submission(
            "good session",
            vec![CriterionScore::SubScored {
                name: "differential".into(),
                sub_scores: vec![2.0, -1.0],
            }],
        ));
        assert!(result.is_err());
    }

    #[test]
    fn accepts_a_well_formed_submission() {
        let result = validate_submission(&submission(
            "good session",
            vec![
                CriterionScore::Direct { name: "rapport".into(), score: 4.0 },
                CriterionScore::SubScored { name: "differential".into(), sub_scores: vec![3.0, 5.0] },
            ],
        ));
        assert!(result.is_ok());
    }
}
