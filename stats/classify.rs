//! # Response Classification
//!
//! Cohort-level partial-response and progression proportions computed directly from the
//! raw percent change, before any measurement-error correction. Up patients count towards
//! the cohort size and are always progressions.

use crate::error::{PipelineError, Stage};
use crate::types::PatientAggregate;
use serde::{Deserialize, Serialize};

/// A patient is a partial response when `percent_change < PARTIAL_RESPONSE_THRESHOLD`.
/// The comparison is strict: exactly -30% is not a partial response.
pub const PARTIAL_RESPONSE_THRESHOLD: i64 = -30;

/// A patient is a progression when `percent_change >= PROGRESSION_THRESHOLD`.
pub const PROGRESSION_THRESHOLD: i64 = 20;

pub fn is_partial_response(percent_change: i64) -> bool {
    percent_change < PARTIAL_RESPONSE_THRESHOLD
}

pub fn is_progression(percent_change: i64) -> bool {
    percent_change >= PROGRESSION_THRESHOLD
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CohortProportions {
    pub cohort_size: usize,
    pub partial_response_count: usize,
    pub progression_count: usize,
    /// Percent of the cohort, rounded to two decimals half-to-even.
    pub partial_response_pct: f64,
    /// Percent of the cohort, rounded to two decimals half-to-even.
    pub progression_pct: f64,
}

/// Rounds a percentage to two decimals, ties to even (3.125 -> 3.12, 9.375 -> 9.38).
pub fn round_percent(value: f64) -> f64 {
    (value * 100.0).round_ties_even() / 100.0
}

pub fn classify_cohort(
    patients: &[PatientAggregate],
    up_patients: usize,
) -> Result<CohortProportions, PipelineError> {
    let cohort_size = patients.len() + up_patients;
    if cohort_size == 0 {
        return Err(PipelineError::validation(
            None,
            Stage::Classify,
            "the cohort is empty: no measured patients and no up patients",
        ));
    }

    let partial_response_count = patients
        .iter()
        .filter(|p| is_partial_response(p.percent_change))
        .count();
    let progression_count = patients
        .iter()
        .filter(|p| is_progression(p.percent_change))
        .count()
        + up_patients;

    let total = cohort_size as f64;
    let proportions = CohortProportions {
        cohort_size,
        partial_response_count,
        progression_count,
        partial_response_pct: round_percent(partial_response_count as f64 / total * 100.0),
        progression_pct: round_percent(progression_count as f64 / total * 100.0),
    };
    log::info!(
        "Cohort of {}: {} PR ({:.2}%), {} progression ({:.2}%)",
        cohort_size,
        partial_response_count,
        proportions.partial_response_pct,
        progression_count,
        proportions.progression_pct
    );
    Ok(proportions)
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    fn cohort(changes: &[i64]) -> Vec<PatientAggregate> {
        changes
            .iter()
            .zip(1_i64..)
            .map(|(&percent_change, patient_id)| PatientAggregate {
                patient_id,
                solid_count: 1,
                lymph_count: 0,
                baseline_burden: 10.0,
                post_burden: 10.0,
                single_lesion_size: Some(10.0),
                percent_change,
            })
            .collect()
    }

    #[test]
    fn worked_example() {
        let out = classify_cohort(&cohort(&[-40, -35, 0, 25, 30]), 1).unwrap();
        assert_eq!(out.cohort_size, 6);
        assert_eq!(out.partial_response_count, 2);
        assert_eq!(out.progression_count, 3);
        assert_abs_diff_eq!(out.partial_response_pct, 33.33);
        assert_abs_diff_eq!(out.progression_pct, 50.0);
    }

    #[test]
    fn thresholds_are_strict_below_and_inclusive_above() {
        assert!(!is_partial_response(-30));
        assert!(is_partial_response(-31));
        assert!(is_progression(20));
        assert!(!is_progression(19));

        let out = classify_cohort(&cohort(&[-30, 20]), 0).unwrap();
        assert_eq!(out.partial_response_count, 0);
        assert_eq!(out.progression_count, 1);
    }

    #[test]
    fn rounding_is_half_to_even() {
        assert_abs_diff_eq!(round_percent(3.125), 3.12);
        assert_abs_diff_eq!(round_percent(9.375), 9.38);
        assert_abs_diff_eq!(round_percent(66.666_666), 66.67);

        // 1 PR in a cohort of 32 is exactly 3.125%
        let mut changes = vec![-50];
        changes.extend(std::iter::repeat_n(0, 31));
        let out = classify_cohort(&cohort(&changes), 0).unwrap();
        assert_abs_diff_eq!(out.partial_response_pct, 3.12);
    }

    #[test]
    fn up_patients_only() {
        let out = classify_cohort(&[], 3).unwrap();
        assert_eq!(out.progression_count, 3);
        assert_abs_diff_eq!(out.progression_pct, 100.0);
        assert_abs_diff_eq!(out.partial_response_pct, 0.0);
    }

    #[test]
    fn empty_cohort_is_rejected() {
        assert!(matches!(
            classify_cohort(&[], 0),
            Err(PipelineError::Validation { .. })
        ));
    }
}
