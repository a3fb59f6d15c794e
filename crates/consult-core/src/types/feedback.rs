//! The `Feedback` entity and scoring model.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::{CaseId, FeedbackId, SessionId, UserId};

/// One scored criterion: either a direct score, or a list of sub-scores whose
/// arithmetic mean stands in for the criterion's score.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum CriterionScore {
    Direct {
        name: String,
        score: f64,
    },
    #[serde(rename_all = "camelCase")]
    SubScored {
        name: String,
        sub_scores: Vec<f64>,
    },
}

impl CriterionScore {
    pub fn name(&self) -> &str {
        match self {
            CriterionScore::Direct { name, .. } => name,
            CriterionScore::SubScored { name, .. } => name,
        }
    }

    /// The criterion's contribution to `overallPerformance`: the direct score,
    /// or the mean of its sub-scores (0.0 if the list is empty).
    pub fn resolved_score(&self) -> f64 {
        match self {
            CriterionScore::Direct { score, .. } => *score,
            CriterionScore::SubScored { sub_scores, .. } => {
                if sub_scores.is_empty() {
                    0.0
                } else {
                    sub_scores.iter().sum::<f64>() / sub_scores.len() as f64
                }
            }
        }
    }
}

/// A round-scoped feedback submission.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Feedback {
    pub id: FeedbackId,
    pub session_id: SessionId,
    pub sender_user_id: UserId,
    /// The DOCTOR of the round this feedback concerns.
    pub recipient_user_id: UserId,
    pub case_id: CaseId,
    pub round_number: u32,
    pub comment: String,
    pub criteria_scores: Vec<CriterionScore>,
    pub created_at: DateTime<Utc>,
}

impl Feedback {
    /// Sum over criteria of each criterion's resolved score.
    pub fn overall_performance(&self) -> f64 {
        self.criteria_scores
            .iter()
            .map(CriterionScore::resolved_score)
            .sum()
    }

    /// Legacy integer field: `round(overallPerformance)`.
    pub fn overall_performance_rounded(&self) -> i64 {
        self.overall_performance().round() as i64
    }
}

/// Payload accepted by `SubmitFeedback`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FeedbackSubmission {
    pub comment: String,
    pub criteria_scores: Vec<CriterionScore>,
}
