// ========================================================================================
//
//                               THE STUDY PIPELINE
//
// ========================================================================================
//
// Chains the four analytical stages. Data flows strictly forward:
//
//   lesion sheet -> aggregate -> classify              (raw proportions, display only)
//                            \-> reassess -> simulate  (corrected rates with intervals)
//
// `run_study` is pure: it performs no I/O and draws randomness only from the source it
// is handed. `execute` is the I/O shell around it: it loads the sheet and tables named
// by a `StudyConfig`, fixes the seed, and records it in the report.

use crate::aggregate::aggregate_lesions;
use crate::classify::{CohortProportions, classify_cohort};
use crate::config::{ConfigError, StudyConfig};
use crate::data::{DataError, load_lesion_sheet};
use crate::error::PipelineError;
use crate::reassess::reassess_cohort;
use crate::report::ReportError;
use crate::simulate::{simulate, with_unverified};
use crate::table::{TableError, TableSet};
use crate::types::{
    LesionRecord, ObserverScenario, PatientAggregate, ReassessedPatient, SimulationResult,
};
use rand::rngs::StdRng;
use rand::{RngCore, SeedableRng};
use serde::Serialize;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum StudyError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error("Lesion sheet error: {0}")]
    Data(#[from] DataError),
    #[error("Reassessment table error: {0}")]
    Table(#[from] TableError),
    #[error(transparent)]
    Pipeline(#[from] PipelineError),
    #[error("Report error: {0}")]
    Report(#[from] ReportError),
}

/// Everything one pipeline run produces.
#[derive(Debug, Clone, Serialize)]
pub struct StudyReport {
    pub study_name: String,
    pub treatment_name: String,
    pub observer: ObserverScenario,
    pub up_patients: usize,
    pub trials: usize,
    /// Seed the simulation ran with, when known.
    pub seed: Option<u64>,
    pub proportions: CohortProportions,
    pub simulation: SimulationResult,
    #[serde(skip)]
    pub patients: Vec<PatientAggregate>,
    /// Reassessed rows, including the synthetic rows for up patients.
    #[serde(skip)]
    pub reassessed: Vec<ReassessedPatient>,
}

/// Runs every stage on in-memory inputs.
pub fn run_study<R: RngCore + ?Sized>(
    config: &StudyConfig,
    lesions: &[LesionRecord],
    tables: &TableSet,
    rng: &mut R,
) -> Result<StudyReport, PipelineError> {
    let up_patients = config.up_patients;
    let patients = aggregate_lesions(lesions)?;
    let proportions = classify_cohort(&patients, up_patients)?;
    let reassessed = reassess_cohort(&patients, tables)?;
    let simulation = simulate(&reassessed, up_patients, config.simulation.trials, rng)?;

    Ok(StudyReport {
        study_name: config.study_name.clone(),
        treatment_name: config.treatment_name.clone(),
        observer: config.observer,
        up_patients,
        trials: config.simulation.trials,
        seed: None,
        proportions,
        simulation,
        reassessed: with_unverified(&reassessed, up_patients),
        patients,
    })
}

/// Loads the lesion sheet and the scenario's tables named by `config`, then runs the study.
pub fn execute(config: &StudyConfig) -> Result<StudyReport, StudyError> {
    config.validate()?;
    let sheet = config
        .lesion_sheet
        .as_deref()
        .ok_or_else(|| ConfigError::InvalidSetting {
            setting: "lesion_sheet",
            reason: "no lesion sheet configured".to_string(),
        })?;
    let table_dir = config
        .tables
        .for_scenario(config.observer)
        .ok_or_else(|| ConfigError::InvalidSetting {
            setting: "tables",
            reason: format!("no table directory configured for the {} scenario", config.observer),
        })?;

    log::info!(
        "Study '{}' ({}), {} scenario",
        config.study_name,
        config.treatment_name,
        config.observer
    );
    let lesions = load_lesion_sheet(sheet)?;
    let tables = TableSet::load_dir(table_dir)?;

    // TOML integers are signed 64-bit, so a drawn seed stays within u32 to round-trip.
    let seed = config
        .simulation
        .seed
        .unwrap_or_else(|| u64::from(rand::random::<u32>()));
    log::debug!("Simulation seed: {seed}");
    let mut rng = StdRng::seed_from_u64(seed);
    let mut report = run_study(config, &lesions, &tables, &mut rng)?;
    report.seed = Some(seed);
    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::table::ReassessmentTable;
    use crate::types::QuantileTriple;

    fn uniform_tables(pr: f64, progression: f64) -> TableSet {
        let cells = |p: f64| {
            (-100..=100).flat_map(move |pc| {
                ["10", "01", "20", "1010", "1020", "1030"]
                    .into_iter()
                    .map(move |k| (pc, k, p))
            })
        };
        TableSet {
            pr_multiple: ReassessmentTable::from_cells("pr_multiple", cells(pr)).unwrap(),
            pr_singular: ReassessmentTable::from_cells("pr_singular", cells(pr)).unwrap(),
            progression_multiple: ReassessmentTable::from_cells(
                "progression_multiple",
                cells(progression),
            )
            .unwrap(),
            progression_singular: ReassessmentTable::from_cells(
                "progression_singular",
                cells(progression),
            )
            .unwrap(),
        }
    }

    fn lesions() -> Vec<LesionRecord> {
        vec![
            LesionRecord::new(1, "liver", 10.0, 5.0),
            LesionRecord::new(2, "lung", 20.0, 30.0),
            LesionRecord::new(3, "liver", 30.0, 30.0),
            LesionRecord::new(3, "kidney", 10.0, 12.0),
        ]
    }

    #[test]
    fn runs_every_stage() {
        let mut config = StudyConfig::template();
        config.up_patients = 1;
        let mut rng = StdRng::seed_from_u64(11);
        let report = run_study(&config, &lesions(), &uniform_tables(0.0, 1.0), &mut rng).unwrap();

        assert_eq!(report.patients.len(), 3);
        assert_eq!(report.reassessed.len(), 4);
        assert!(report.reassessed[3].is_unverified());
        assert_eq!(report.proportions.cohort_size, 4);
        assert_eq!(report.proportions.partial_response_count, 1);
        assert_eq!(report.proportions.progression_count, 2);
        assert_eq!(report.simulation.pr_quantiles, QuantileTriple::new(0, 0, 0));
        assert_eq!(
            report.simulation.progression_quantiles,
            QuantileTriple::new(100, 100, 100)
        );
    }

    #[test]
    fn stage_errors_propagate() {
        let config = StudyConfig::template();
        let mut rng = StdRng::seed_from_u64(1);
        let bad = vec![LesionRecord::new(1, "liver", 0.0, 3.0)];
        assert!(matches!(
            run_study(&config, &bad, &uniform_tables(0.5, 0.5), &mut rng),
            Err(PipelineError::Arithmetic { patient_id: 1, .. })
        ));
    }
}
