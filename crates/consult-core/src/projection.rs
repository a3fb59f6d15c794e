//! Role-Filtered Projection.
//!
//! Computed on emit; the untrimmed [`Case`] is never published on a shared
//! topic.

use crate::types::{Case, CaseProjection, Role};

pub fn project_case(case: &Case, role: Role) -> CaseProjection {
    match role {
        Role::Doctor => CaseProjection {
            title: None,
            description: case.description.clone(),
            doctor_sections: case.doctor_sections.clone(),
            patient_sections: Vec::new(),
            notes: case.notes.clone(),
            image_ref: case.image_ref.clone(),
            feedback_criteria: case.feedback_criteria.clone(),
        },
        Role::Patient | Role::Observer => CaseProjection {
            title: Some(case.title.clone()),
            description: case.description.clone(),
            doctor_sections: case.doctor_sections.clone(),
            patient_sections: case.patient_sections.clone(),
            notes: case.notes.clone(),
            image_ref: case.image_ref.clone(),
            feedback_criteria: case.feedback_criteria.clone(),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::CaseId;

    fn sample_case() -> Case {
        Case {
            id: CaseId("case-1".into()),
            category: "cardio".into(),
            title: "Chest pain assessment".into(),
            description: "A 54yo presents with chest pain.".into(),
            doctor_sections: vec!["History taking cues".into()],
            patient_sections: vec!["Symptom script".into()],
            notes: "Watch for referred pain.".into(),
            image_ref: Some("img://ecg-1".into()),
            feedback_criteria: vec!["rapport".into(), "differential".into()],
        }
    }

    #[test]
    fn doctor_never_sees_title() {
        let projection = project_case(&sample_case(), Role::Doctor);
        assert!(projection.title.is_none());
        assert!(projection.patient_sections.is_empty());
    }

    #[test]
    fn patient_and_observer_see_title() {
        for role in [Role::Patient, Role::Observer] {
            let projection = project_case(&sample_case(), role);
            assert_eq!(projection.title.as_deref(), Some("Chest pain assessment"));
            assert_eq!(projection.patient_sections, vec!["Symptom script".to_string()]);
        }
    }
}
