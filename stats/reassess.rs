//! # Probability Reassessment
//!
//! Replaces each patient's raw classification with the probability, read from the
//! observer scenario's tables, that they truly are a partial response or a progression.
//! Deterministic: identical tables and patients always give identical rows.

use crate::error::PipelineError;
use crate::table::TableSet;
use crate::types::{OutcomeKind, PatientAggregate, ReassessedPatient, StatusKey};

/// Percent changes above this value share the table's top row.
pub const PERCENT_CHANGE_CAP: i64 = 100;

/// Caps the percent change at 100. Negative values are left as they are.
pub fn clamp_percent_change(percent_change: i64) -> i64 {
    percent_change.min(PERCENT_CHANGE_CAP)
}

fn lookup(
    tables: &TableSet,
    patient: &PatientAggregate,
    outcome: OutcomeKind,
    percent_change: i64,
    key: &StatusKey,
) -> Result<f64, PipelineError> {
    let variant = patient.table_variant();
    tables
        .table(outcome, variant)
        .get(percent_change, key)
        .ok_or_else(|| PipelineError::Lookup {
            patient_id: patient.patient_id,
            outcome,
            variant,
            percent_change,
            status_key: key.clone(),
        })
}

pub fn reassess_patient(
    patient: &PatientAggregate,
    tables: &TableSet,
) -> Result<ReassessedPatient, PipelineError> {
    let clamped = clamp_percent_change(patient.percent_change);
    if clamped != patient.percent_change {
        log::warn!(
            "Patient {}: percent change {}% capped at {}% for table lookup",
            patient.patient_id,
            patient.percent_change,
            PERCENT_CHANGE_CAP
        );
    }
    let key = StatusKey::for_patient(patient);
    let new_pr_probability = lookup(tables, patient, OutcomeKind::PartialResponse, clamped, &key)?;
    let new_progression_probability =
        lookup(tables, patient, OutcomeKind::Progression, clamped, &key)?;

    log::debug!(
        "Patient {}: key {} at {}% -> PR {:.4}, progression {:.4}",
        patient.patient_id,
        key,
        clamped,
        new_pr_probability,
        new_progression_probability
    );
    Ok(ReassessedPatient {
        patient_id: patient.patient_id,
        clamped_percent_change: Some(clamped),
        status_key: Some(key),
        new_pr_probability,
        new_progression_probability,
    })
}

/// One reassessed row per aggregated patient, in input order.
pub fn reassess_cohort(
    patients: &[PatientAggregate],
    tables: &TableSet,
) -> Result<Vec<ReassessedPatient>, PipelineError> {
    let rows = patients
        .iter()
        .map(|patient| reassess_patient(patient, tables))
        .collect::<Result<Vec<_>, _>>()?;
    log::info!("Reassessed {} patients", rows.len());
    Ok(rows)
}
