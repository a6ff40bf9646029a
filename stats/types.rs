// ========================================================================================
//
//                               THE SHARED ROW TYPES
//
// ========================================================================================
//
// Every table that flows between pipeline stages is a `Vec` of one of the structs below.
// Columns are fields, fixed at compile time. Stages never mutate the table they are
// handed; they return a new one.

use serde::{Deserialize, Serialize};
use std::fmt;

/// One measured lesion, exactly as it appears in the study's lesion sheet.
#[derive(Debug, Clone, PartialEq)]
pub struct LesionRecord {
    pub patient_id: i64,
    pub site: String,
    /// Baseline longest diameter, in millimetres.
    pub baseline_size: f64,
    /// Post-treatment longest diameter, in millimetres.
    pub post_size: f64,
}

impl LesionRecord {
    pub fn new(patient_id: i64, site: impl Into<String>, baseline_size: f64, post_size: f64) -> Self {
        Self {
            patient_id,
            site: site.into(),
            baseline_size,
            post_size,
        }
    }
}

/// The two lesion categories the reassessment tables distinguish.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SiteCategory {
    SolidOrgan,
    LymphNode,
}

impl SiteCategory {
    /// Classifies a free-text site label. Any label containing "lymph", in any case and
    /// at any position, is a lymph node; everything else is a solid-organ tumor.
    /// Qualified labels such as "cervical lymph" or "Node (lymph)" are lymph nodes
    /// too, so this is a substring match rather than a prefix match.
    pub fn from_site(site: &str) -> Self {
        if site.to_lowercase().contains("lymph") {
            Self::LymphNode
        } else {
            Self::SolidOrgan
        }
    }
}

/// One row per patient: lesion counts, tumor burden sums and the raw percent change.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PatientAggregate {
    pub patient_id: i64,
    pub solid_count: u32,
    pub lymph_count: u32,
    pub baseline_burden: f64,
    pub post_burden: f64,
    /// Baseline size of the patient's only lesion. `None` for multi-lesion patients.
    pub single_lesion_size: Option<f64>,
    pub percent_change: i64,
}

impl PatientAggregate {
    pub fn lesion_count(&self) -> u32 {
        self.solid_count + self.lymph_count
    }

    pub fn table_variant(&self) -> TableVariant {
        if self.single_lesion_size.is_some() {
            TableVariant::Singular
        } else {
            TableVariant::Multiple
        }
    }
}

/// Column key of a reassessment table.
///
/// Multi-lesion patients are keyed by `{solid}{lymph}`; single-lesion patients by
/// `{solid}{lymph}{size}` where `size` is the baseline size rounded half-to-even.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct StatusKey(String);

impl StatusKey {
    pub fn for_patient(patient: &PatientAggregate) -> Self {
        match patient.single_lesion_size {
            Some(size) => Self(format!(
                "{}{}{}",
                patient.solid_count,
                patient.lymph_count,
                size.round_ties_even() as i64
            )),
            None => Self(format!("{}{}", patient.solid_count, patient.lymph_count)),
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for StatusKey {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

impl From<String> for StatusKey {
    fn from(value: String) -> Self {
        Self(value)
    }
}

impl fmt::Display for StatusKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Which pair of reassessment tables a patient is looked up in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TableVariant {
    Multiple,
    Singular,
}

/// The two response outcomes the pipeline reports on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OutcomeKind {
    PartialResponse,
    Progression,
}

impl fmt::Display for OutcomeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::PartialResponse => f.write_str("PR"),
            Self::Progression => f.write_str("progression"),
        }
    }
}

/// Measurement-error scenario the reassessment tables were derived under.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ObserverScenario {
    Intra,
    Inter,
}

impl fmt::Display for ObserverScenario {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Intra => f.write_str("intra-observer"),
            Self::Inter => f.write_str("inter-observer"),
        }
    }
}

/// Corrected response probabilities for one patient.
///
/// Rows produced by the reassessor always carry a percent change and a status key.
/// Synthetic rows for unverified ("up") patients carry neither.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ReassessedPatient {
    pub patient_id: i64,
    pub clamped_percent_change: Option<i64>,
    pub status_key: Option<StatusKey>,
    pub new_pr_probability: f64,
    pub new_progression_probability: f64,
}

impl ReassessedPatient {
    /// An up patient: certain progression, never a partial response.
    pub fn unverified(patient_id: i64) -> Self {
        Self {
            patient_id,
            clamped_percent_change: None,
            status_key: None,
            new_pr_probability: 0.0,
            new_progression_probability: 1.0,
        }
    }

    pub fn is_unverified(&self) -> bool {
        self.status_key.is_none()
    }

    pub fn probability(&self, outcome: OutcomeKind) -> f64 {
        match outcome {
            OutcomeKind::PartialResponse => self.new_pr_probability,
            OutcomeKind::Progression => self.new_progression_probability,
        }
    }
}

/// Empirical 2.5th percentile, median and 97.5th percentile of a simulated rate, in percent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct QuantileTriple {
    pub lower: u32,
    pub median: u32,
    pub upper: u32,
}

impl QuantileTriple {
    pub fn new(lower: u32, median: u32, upper: u32) -> Self {
        Self {
            lower,
            median,
            upper,
        }
    }
}

impl From<(u32, u32, u32)> for QuantileTriple {
    fn from((lower, median, upper): (u32, u32, u32)) -> Self {
        Self::new(lower, median, upper)
    }
}

impl fmt::Display for QuantileTriple {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}% ({}% - {}%)", self.median, self.lower, self.upper)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SimulationResult {
    pub pr_quantiles: QuantileTriple,
    pub progression_quantiles: QuantileTriple,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn patient(solid: u32, lymph: u32, single: Option<f64>) -> PatientAggregate {
        PatientAggregate {
            patient_id: 1,
            solid_count: solid,
            lymph_count: lymph,
            baseline_burden: 10.0,
            post_burden: 10.0,
            single_lesion_size: single,
            percent_change: 0,
        }
    }

    #[test]
    fn site_category_is_case_insensitive() {
        assert_eq!(SiteCategory::from_site("Lymph node"), SiteCategory::LymphNode);
        assert_eq!(SiteCategory::from_site("LYMPHNODE"), SiteCategory::LymphNode);
        assert_eq!(SiteCategory::from_site("cervical lymph"), SiteCategory::LymphNode);
        assert_eq!(SiteCategory::from_site("Node (lymph)"), SiteCategory::LymphNode);
        assert_eq!(SiteCategory::from_site("liver"), SiteCategory::SolidOrgan);
        assert_eq!(SiteCategory::from_site("lym"), SiteCategory::SolidOrgan);
    }

    #[test]
    fn status_key_for_single_lesion_includes_size() {
        assert_eq!(StatusKey::for_patient(&patient(0, 1, Some(15.0))).as_str(), "0115");
        assert_eq!(StatusKey::for_patient(&patient(1, 0, Some(22.4))).as_str(), "1022");
    }

    #[test]
    fn status_key_size_rounds_half_to_even() {
        assert_eq!(StatusKey::for_patient(&patient(1, 0, Some(12.5))).as_str(), "1012");
        assert_eq!(StatusKey::for_patient(&patient(1, 0, Some(13.5))).as_str(), "1014");
    }

    #[test]
    fn status_key_for_multiple_lesions_is_counts_only() {
        let p = patient(2, 1, None);
        assert_eq!(StatusKey::for_patient(&p).as_str(), "21");
        assert_eq!(p.table_variant(), TableVariant::Multiple);
    }

    #[test]
    fn unverified_row_is_certain_progression() {
        let row = ReassessedPatient::unverified(7);
        assert!(row.is_unverified());
        assert_eq!(row.probability(OutcomeKind::PartialResponse), 0.0);
        assert_eq!(row.probability(OutcomeKind::Progression), 1.0);
    }
}
