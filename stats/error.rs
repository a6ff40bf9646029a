//! # Pipeline Errors
//!
//! Every failure inside the analytical stages is unrecoverable for the patient it
//! concerns and is surfaced to the caller. A skipped patient would silently corrupt the
//! cohort statistics, so nothing here is ever downgraded to a warning.

use crate::types::{OutcomeKind, StatusKey, TableVariant};
use std::fmt;
use thiserror::Error;

/// The stage that raised an error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Aggregate,
    Classify,
    Reassess,
    Simulate,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Aggregate => "lesion aggregation",
            Self::Classify => "response classification",
            Self::Reassess => "probability reassessment",
            Self::Simulate => "uncertainty simulation",
        })
    }
}

/// Renders an optional patient id for error messages.
struct PatientLabel(Option<i64>);

impl fmt::Display for PatientLabel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.0 {
            Some(id) => write!(f, "patient {id}"),
            None => f.write_str("cohort"),
        }
    }
}

#[derive(Error, Debug, Clone, PartialEq)]
pub enum PipelineError {
    #[error("Invalid input during {stage} ({}): {reason}", PatientLabel(*.patient_id))]
    Validation {
        patient_id: Option<i64>,
        stage: Stage,
        reason: String,
    },
    #[error("Arithmetic error during {stage} (patient {patient_id}): {reason}")]
    Arithmetic {
        patient_id: i64,
        stage: Stage,
        reason: String,
    },
    #[error(
        "The {variant:?} {outcome} table has no entry for percent change {percent_change}, status key '{status_key}' (patient {patient_id})."
    )]
    Lookup {
        patient_id: i64,
        outcome: OutcomeKind,
        variant: TableVariant,
        percent_change: i64,
        status_key: StatusKey,
    },
    #[error("Value out of domain during {stage} ({}): {reason}", PatientLabel(*.patient_id))]
    Value {
        patient_id: Option<i64>,
        stage: Stage,
        reason: String,
    },
}

impl PipelineError {
    pub fn validation(patient_id: Option<i64>, stage: Stage, reason: impl Into<String>) -> Self {
        Self::Validation {
            patient_id,
            stage,
            reason: reason.into(),
        }
    }

    pub fn value(patient_id: Option<i64>, stage: Stage, reason: impl Into<String>) -> Self {
        Self::Value {
            patient_id,
            stage,
            reason: reason.into(),
        }
    }

    /// The patient the error concerns, if it concerns a single one.
    pub fn patient_id(&self) -> Option<i64> {
        match self {
            Self::Validation { patient_id, .. } | Self::Value { patient_id, .. } => *patient_id,
            Self::Arithmetic { patient_id, .. } | Self::Lookup { patient_id, .. } => {
                Some(*patient_id)
            }
        }
    }

    pub fn stage(&self) -> Stage {
        match self {
            Self::Validation { stage, .. }
            | Self::Arithmetic { stage, .. }
            | Self::Value { stage, .. } => *stage,
            Self::Lookup { .. } => Stage::Reassess,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn messages_carry_patient_and_stage() {
        let err = PipelineError::validation(Some(4), Stage::Aggregate, "patient ids are not dense");
        let text = err.to_string();
        assert!(text.contains("patient 4"), "{text}");
        assert!(text.contains("lesion aggregation"), "{text}");

        let err = PipelineError::value(None, Stage::Simulate, "empty cohort");
        assert!(err.to_string().contains("cohort"));
        assert_eq!(err.patient_id(), None);
    }

    #[test]
    fn lookup_error_names_the_cell() {
        let err = PipelineError::Lookup {
            patient_id: 3,
            outcome: OutcomeKind::Progression,
            variant: TableVariant::Singular,
            percent_change: 100,
            status_key: StatusKey::from("0115"),
        };
        let text = err.to_string();
        assert!(text.contains("Singular progression"), "{text}");
        assert!(text.contains("100"), "{text}");
        assert!(text.contains("'0115'"), "{text}");
        assert_eq!(err.stage(), Stage::Reassess);
    }
}
