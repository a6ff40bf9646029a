//! # Monte-Carlo Uncertainty
//!
//! Turns per-patient corrected probabilities into confidence intervals for the cohort's
//! PR and progression rates. Every patient is an independent Bernoulli variable for each
//! outcome; each trial draws one value per patient and outcome and records the cohort
//! rate. The sorted trial rates give the empirical 2.5th percentile, median and 97.5th
//! percentile.
//!
//! Reproducibility: one seed per patient row is drawn, in row order, from the caller's
//! random source. Patients are then simulated in parallel, each from its own generator.
//! Per-trial counts are integer sums, so the parallel reduction order does not matter.

use crate::error::{PipelineError, Stage};
use crate::types::{OutcomeKind, QuantileTriple, ReassessedPatient, SimulationResult};
use rand::distributions::Bernoulli;
use rand::rngs::StdRng;
use rand::{Rng, RngCore, SeedableRng};
use rayon::prelude::*;

pub const DEFAULT_TRIALS: usize = 1000;

/// Appends `up_patients` synthetic rows (PR 0, progression 1) after the measured ones.
/// Their ids continue from the largest measured id.
pub fn with_unverified(rows: &[ReassessedPatient], up_patients: usize) -> Vec<ReassessedPatient> {
    let next_id = rows.iter().map(|r| r.patient_id).max().unwrap_or(0) + 1;
    let mut extended = rows.to_vec();
    extended.extend((next_id..).take(up_patients).map(ReassessedPatient::unverified));
    extended
}

/// Sorted-rank positions (zero-based) of the reported quantiles for `trials` samples.
///
/// The lower bound sits at `floor(0.025 * T)`, the upper at `ceil(0.975 * T) - 1`, and
/// the median averages the two middle ranks when `T` is even. For `T = 1000` these are
/// indices 25, 974 and (499, 500). Zero trials have no ranks.
pub fn quantile_ranks(trials: usize) -> Option<(usize, (usize, usize), usize)> {
    if trials == 0 {
        return None;
    }
    let lower = 25 * trials / 1000;
    let upper = (975 * trials).div_ceil(1000) - 1;
    let median = if trials % 2 == 0 {
        (trials / 2 - 1, trials / 2)
    } else {
        (trials / 2, trials / 2)
    };
    Some((lower, median, upper))
}

/// Sorts the trial rates and reads the 2.5% / 50% / 97.5% quantiles.
/// `None` when there are no rates.
pub fn summarize_rates(mut rates: Vec<u32>) -> Option<QuantileTriple> {
    rates.sort_unstable();
    let (lower, (mid_a, mid_b), upper) = quantile_ranks(rates.len())?;
    // Rates are non-negative, so integer division truncates.
    let median = (rates[mid_a] + rates[mid_b]) / 2;
    Some(QuantileTriple::new(rates[lower], median, rates[upper]))
}

/// Converts per-trial success counts into integer percentages, truncating.
fn rates_from_counts(counts: &[u32], cohort_size: usize) -> Vec<u32> {
    counts
        .iter()
        .map(|&count| ((count as u64 * 100) / cohort_size as u64) as u32)
        .collect()
}

fn validate_rows(rows: &[ReassessedPatient]) -> Result<(), PipelineError> {
    for row in rows {
        for outcome in [OutcomeKind::PartialResponse, OutcomeKind::Progression] {
            let p = row.probability(outcome);
            if !(0.0..=1.0).contains(&p) {
                return Err(PipelineError::value(
                    Some(row.patient_id),
                    Stage::Simulate,
                    format!("{outcome} probability {p} is outside [0, 1]"),
                ));
            }
        }
    }
    Ok(())
}

/// Draws `trials` Bernoulli indicators per outcome for one patient.
fn draw_patient(
    row: &ReassessedPatient,
    seed: u64,
    trials: usize,
) -> Result<(Vec<u32>, Vec<u32>), PipelineError> {
    let mut rng = StdRng::seed_from_u64(seed);
    let mut draw = |outcome: OutcomeKind| -> Result<Vec<u32>, PipelineError> {
        let dist = Bernoulli::new(row.probability(outcome)).map_err(|e| {
            PipelineError::value(Some(row.patient_id), Stage::Simulate, e.to_string())
        })?;
        Ok((0..trials).map(|_| u32::from(rng.sample(dist))).collect())
    };
    let pr = draw(OutcomeKind::PartialResponse)?;
    let progression = draw(OutcomeKind::Progression)?;
    Ok((pr, progression))
}

fn add_counts(mut acc: (Vec<u32>, Vec<u32>), other: (Vec<u32>, Vec<u32>)) -> (Vec<u32>, Vec<u32>) {
    for (a, b) in acc.0.iter_mut().zip(&other.0) {
        *a += b;
    }
    for (a, b) in acc.1.iter_mut().zip(&other.1) {
        *a += b;
    }
    acc
}

/// Runs the simulation over `rows` extended with `up_patients` certain progressions.
pub fn simulate<R: RngCore + ?Sized>(
    rows: &[ReassessedPatient],
    up_patients: usize,
    trials: usize,
    rng: &mut R,
) -> Result<SimulationResult, PipelineError> {
    if trials == 0 {
        return Err(PipelineError::value(
            None,
            Stage::Simulate,
            "the number of trials must be at least 1",
        ));
    }
    let cohort = with_unverified(rows, up_patients);
    if cohort.is_empty() {
        return Err(PipelineError::value(
            None,
            Stage::Simulate,
            "cannot simulate an empty cohort",
        ));
    }
    validate_rows(&cohort)?;

    let seeds: Vec<u64> = cohort.iter().map(|_| rng.next_u64()).collect();
    let (pr_counts, progression_counts) = cohort
        .par_iter()
        .zip(seeds.par_iter())
        .map(|(row, &seed)| draw_patient(row, seed, trials))
        .try_reduce(
            || (vec![0u32; trials], vec![0u32; trials]),
            |a, b| Ok(add_counts(a, b)),
        )?;

    let summarize = |counts: &[u32]| {
        summarize_rates(rates_from_counts(counts, cohort.len())).ok_or_else(|| {
            PipelineError::value(None, Stage::Simulate, "no trial rates to summarize")
        })
    };
    let result = SimulationResult {
        pr_quantiles: summarize(pr_counts.as_slice())?,
        progression_quantiles: summarize(progression_counts.as_slice())?,
    };
    log::info!(
        "Simulated {} trials over {} patients: PR {}, progression {}",
        trials,
        cohort.len(),
        result.pr_quantiles,
        result.progression_quantiles
    );
    Ok(result)
}
