//! # Lesion Aggregation
//!
//! Collapses the flat per-lesion sheet into one `PatientAggregate` per patient:
//! lesion counts by category, baseline and post-treatment tumor burden, the size of a
//! patient's only lesion (if they have just one), and the raw percent change.
//!
//! Patient ids are expected to be dense positive integers `1..=N`. Downstream code maps
//! them to rows through an explicit id lookup, but a gap still means the sheet lost a
//! patient and is rejected.

use crate::error::{PipelineError, Stage};
use crate::types::{LesionRecord, PatientAggregate, SiteCategory};
use std::collections::BTreeMap;

/// One patient's lesions, collected while the sheet is scanned.
#[derive(Default)]
struct Accumulator {
    solid_count: u32,
    lymph_count: u32,
    baseline_sizes: Vec<f64>,
    post_sizes: Vec<f64>,
}

impl Accumulator {
    fn push(&mut self, lesion: &LesionRecord) {
        match SiteCategory::from_site(&lesion.site) {
            SiteCategory::LymphNode => self.lymph_count += 1,
            SiteCategory::SolidOrgan => self.solid_count += 1,
        }
        self.baseline_sizes.push(lesion.baseline_size);
        self.post_sizes.push(lesion.post_size);
    }

    fn finish(self, patient_id: i64) -> Result<PatientAggregate, PipelineError> {
        let single_lesion_size = match self.baseline_sizes.as_slice() {
            [only] => Some(*only),
            _ => None,
        };
        let baseline_burden = burden(self.baseline_sizes);
        let post_burden = burden(self.post_sizes);
        let percent_change = percent_change(patient_id, baseline_burden, post_burden)?;
        Ok(PatientAggregate {
            patient_id,
            solid_count: self.solid_count,
            lymph_count: self.lymph_count,
            baseline_burden,
            post_burden,
            single_lesion_size,
            percent_change,
        })
    }
}

/// Sums sizes in ascending order so the total does not depend on row order.
fn burden(mut sizes: Vec<f64>) -> f64 {
    sizes.sort_by(f64::total_cmp);
    sizes.iter().sum()
}

/// `floor((post - baseline) / baseline * 100)`, rounding toward negative infinity.
pub fn percent_change(patient_id: i64, baseline_burden: f64, post_burden: f64) -> Result<i64, PipelineError> {
    if baseline_burden == 0.0 {
        return Err(PipelineError::Arithmetic {
            patient_id,
            stage: Stage::Aggregate,
            reason: "baseline tumor burden is zero; percent change is undefined".to_string(),
        });
    }
    let ratio = (post_burden - baseline_burden) / baseline_burden * 100.0;
    Ok(ratio.floor() as i64)
}

fn validate_lesion(lesion: &LesionRecord) -> Result<(), PipelineError> {
    if lesion.patient_id < 1 {
        return Err(PipelineError::validation(
            Some(lesion.patient_id),
            Stage::Aggregate,
            "patient ids must be positive integers",
        ));
    }
    for (name, value) in [
        ("baseline_size", lesion.baseline_size),
        ("post_size", lesion.post_size),
    ] {
        if !value.is_finite() || value < 0.0 {
            return Err(PipelineError::validation(
                Some(lesion.patient_id),
                Stage::Aggregate,
                format!("{name} must be a finite, non-negative size (found {value})"),
            ));
        }
    }
    Ok(())
}

/// Groups lesions by patient and returns one aggregate per patient, ordered by id.
pub fn aggregate_lesions(lesions: &[LesionRecord]) -> Result<Vec<PatientAggregate>, PipelineError> {
    let mut groups: BTreeMap<i64, Accumulator> = BTreeMap::new();
    for lesion in lesions {
        validate_lesion(lesion)?;
        groups.entry(lesion.patient_id).or_default().push(lesion);
    }

    // Ids must be exactly 1..=N once sorted.
    for (expected, &patient_id) in (1_i64..).zip(groups.keys()) {
        if patient_id != expected {
            return Err(PipelineError::validation(
                Some(expected),
                Stage::Aggregate,
                format!(
                    "patient ids must be dense starting at 1, but id {expected} is missing (next id present is {patient_id})"
                ),
            ));
        }
    }

    let aggregates = groups
        .into_iter()
        .map(|(patient_id, acc)| acc.finish(patient_id))
        .collect::<Result<Vec<_>, _>>()?;

    for patient in &aggregates {
        log::debug!(
            "Patient {}: {} solid, {} lymph, burden {} -> {} ({}%)",
            patient.patient_id,
            patient.solid_count,
            patient.lymph_count,
            patient.baseline_burden,
            patient.post_burden,
            patient.percent_change
        );
    }
    log::info!(
        "Aggregated {} lesions into {} patients",
        lesions.len(),
        aggregates.len()
    );
    Ok(aggregates)
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    fn lesion(id: i64, site: &str, baseline: f64, post: f64) -> LesionRecord {
        LesionRecord::new(id, site, baseline, post)
    }

    #[test]
    fn percent_change_uses_floor() {
        assert_eq!(percent_change(1, 50.0, 30.0).unwrap(), -40);
        assert_eq!(percent_change(1, 33.0, 40.0).unwrap(), 21);
        // -1/3 * 100 = -33.33.. floors to -34, truncation would give -33
        assert_eq!(percent_change(1, 30.0, 20.0).unwrap(), -34);
        assert_eq!(percent_change(1, 10.0, 0.0).unwrap(), -100);
    }

    #[test]
    fn zero_baseline_is_an_arithmetic_error() {
        let lesions = vec![lesion(1, "liver", 0.0, 5.0)];
        match aggregate_lesions(&lesions).unwrap_err() {
            PipelineError::Arithmetic { patient_id, stage, .. } => {
                assert_eq!(patient_id, 1);
                assert_eq!(stage, Stage::Aggregate);
            }
            other => panic!("expected Arithmetic, got {other:?}"),
        }
    }

    #[test]
    fn groups_and_counts_by_category() {
        let lesions = vec![
            lesion(1, "Liver", 20.0, 10.0),
            lesion(2, "lymph node", 15.0, 30.0),
            lesion(1, "Lymph Node", 30.0, 20.0),
            lesion(1, "lung", 10.0, 10.0),
        ];
        let out = aggregate_lesions(&lesions).unwrap();
        assert_eq!(out.len(), 2);

        let first = &out[0];
        assert_eq!(first.patient_id, 1);
        assert_eq!(first.solid_count, 2);
        assert_eq!(first.lymph_count, 1);
        assert_abs_diff_eq!(first.baseline_burden, 60.0);
        assert_abs_diff_eq!(first.post_burden, 40.0);
        assert_eq!(first.single_lesion_size, None);
        assert_eq!(first.percent_change, -34);

        let second = &out[1];
        assert_eq!(second.solid_count, 0);
        assert_eq!(second.lymph_count, 1);
        assert_eq!(second.single_lesion_size, Some(15.0));
        assert_eq!(second.percent_change, 100);
    }

    #[test]
    fn counts_match_row_counts_per_patient() {
        let lesions = vec![
            lesion(1, "a", 1.0, 1.0),
            lesion(1, "lymph", 1.0, 1.0),
            lesion(2, "b", 1.0, 1.0),
            lesion(3, "LYMPH", 1.0, 1.0),
            lesion(3, "c", 1.0, 1.0),
            lesion(3, "d", 1.0, 1.0),
        ];
        let out = aggregate_lesions(&lesions).unwrap();
        for patient in &out {
            let rows = lesions
                .iter()
                .filter(|l| l.patient_id == patient.patient_id)
                .count() as u32;
            assert_eq!(patient.lesion_count(), rows);
        }
    }

    #[test]
    fn reordering_rows_does_not_change_percent_change() {
        let forward = vec![
            lesion(1, "liver", 12.3, 9.1),
            lesion(1, "lung", 7.7, 8.8),
            lesion(1, "lymph", 21.05, 14.2),
        ];
        let mut backward = forward.clone();
        backward.reverse();
        let a = aggregate_lesions(&forward).unwrap();
        let b = aggregate_lesions(&backward).unwrap();
        assert_eq!(a[0].percent_change, b[0].percent_change);
        assert_eq!(a[0].solid_count, b[0].solid_count);
    }

    #[test]
    fn percent_change_is_stable_at_integer_boundaries() {
        // Summed in row order, 0.1 + 0.2 + 0.3 and 0.3 + 0.2 + 0.1 differ in the last bit,
        // which is enough to floor the change to -1 one way and 0 the other.
        let forward = vec![
            lesion(1, "liver", 0.1, 0.3),
            lesion(1, "lung", 0.2, 0.2),
            lesion(1, "kidney", 0.3, 0.1),
        ];
        let mut backward = forward.clone();
        backward.reverse();
        let a = aggregate_lesions(&forward).unwrap();
        let b = aggregate_lesions(&backward).unwrap();
        assert_eq!(a[0].percent_change, 0);
        assert_eq!(b[0].percent_change, 0);
        assert_eq!(a[0].baseline_burden.to_bits(), b[0].baseline_burden.to_bits());
    }

    #[test]
    fn rejects_non_positive_ids() {
        let err = aggregate_lesions(&[lesion(0, "liver", 1.0, 1.0)]).unwrap_err();
        assert!(matches!(err, PipelineError::Validation { patient_id: Some(0), .. }));
    }

    #[test]
    fn rejects_gaps_in_ids() {
        let lesions = vec![lesion(1, "liver", 1.0, 1.0), lesion(3, "liver", 1.0, 1.0)];
        let err = aggregate_lesions(&lesions).unwrap_err();
        assert!(matches!(err, PipelineError::Validation { patient_id: Some(2), .. }));
    }

    #[test]
    fn rejects_negative_or_non_finite_sizes() {
        let err = aggregate_lesions(&[lesion(1, "liver", -1.0, 1.0)]).unwrap_err();
        assert!(matches!(err, PipelineError::Validation { .. }));
        let err = aggregate_lesions(&[lesion(1, "liver", 1.0, f64::NAN)]).unwrap_err();
        assert!(matches!(err, PipelineError::Validation { .. }));
    }

    #[test]
    fn empty_sheet_yields_no_patients() {
        assert!(aggregate_lesions(&[]).unwrap().is_empty());
    }
}
