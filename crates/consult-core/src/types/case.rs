//! Case content and its role-filtered projection.
//!
//! Case authoring, storage and image hosting are out of scope; this
//! module defines only the minimal shape the core needs to project and emit.

use serde::{Deserialize, Serialize};

use super::CaseId;

/// The untrimmed case as held by the (external) case repository. Never
/// published on a shared topic.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Case {
    pub id: CaseId,
    pub category: String,
    pub title: String,
    pub description: String,
    pub doctor_sections: Vec<String>,
    pub patient_sections: Vec<String>,
    pub notes: String,
    pub image_ref: Option<String>,
    pub feedback_criteria: Vec<String>,
}

/// The subset of a `Case` visible to one role, computed on emit.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CaseProjection {
    /// Omitted entirely for DOCTOR.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    pub description: String,
    pub doctor_sections: Vec<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub patient_sections: Vec<String>,
    pub notes: String,
    pub image_ref: Option<String>,
    pub feedback_criteria: Vec<String>,
}
