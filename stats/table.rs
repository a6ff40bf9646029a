//! # Reassessment Tables
//!
//! A reassessment table maps `(clamped percent change, status key)` to the probability
//! that a patient truly belongs to an outcome once measurement error is accounted for.
//! Four tables make up one observer scenario: PR and progression, each in a "multiple"
//! variant (patients with several lesions) and a "singular" variant (one lesion, keyed
//! additionally by its size).
//!
//! On disk a table is a TSV whose first column is `percent_change` and whose remaining
//! column headers are status keys. Empty cells mean the table has no entry there.

use crate::types::{OutcomeKind, StatusKey, TableVariant};
use ndarray::Array2;
use polars::prelude::*;
use std::collections::HashMap;
use std::fs::File;
use std::path::{Path, PathBuf};
use thiserror::Error;

pub const ROW_LABEL_COLUMN: &str = "percent_change";

#[derive(Error, Debug)]
pub enum TableError {
    #[error("Error from the underlying Polars DataFrame library while reading '{path}': {source}")]
    Polars {
        path: PathBuf,
        #[source]
        source: PolarsError,
    },
    #[error("Could not open reassessment table '{path}': {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("Table '{0}' has no 'percent_change' column.")]
    MissingRowLabels(String),
    #[error("Table '{table}' has an invalid row label at row {row}: every row needs an integer percent change.")]
    InvalidRowLabel { table: String, row: usize },
    #[error("Table '{table}' lists percent change {percent_change} more than once.")]
    DuplicateRow { table: String, percent_change: i64 },
    #[error("Table '{table}' lists status key '{key}' more than once.")]
    DuplicateKey { table: String, key: String },
    #[error("Column '{key}' of table '{table}' could not be read as probabilities (found type: {found_type}).")]
    ColumnWrongType {
        table: String,
        key: String,
        found_type: String,
    },
    #[error(
        "Table '{table}' holds {value} at percent change {percent_change}, key '{key}'; probabilities must lie in [0, 1]."
    )]
    ProbabilityOutOfRange {
        table: String,
        percent_change: i64,
        key: String,
        value: f64,
    },
    #[error("Table '{0}' has no rows or no status-key columns.")]
    Empty(String),
}

/// Dense probability matrix with labelled rows and columns. Missing entries are `NaN`.
#[derive(Debug, Clone)]
pub struct ReassessmentTable {
    name: String,
    row_index: HashMap<i64, usize>,
    column_index: HashMap<StatusKey, usize>,
    values: Array2<f64>,
}

impl ReassessmentTable {
    /// Builds a table from `(percent_change, status_key, probability)` cells.
    /// Cells not listed are absent.
    pub fn from_cells<K: Into<StatusKey>>(
        name: impl Into<String>,
        cells: impl IntoIterator<Item = (i64, K, f64)>,
    ) -> Result<Self, TableError> {
        let name = name.into();
        let mut row_index = HashMap::new();
        let mut column_index = HashMap::new();
        let mut collected = Vec::new();
        for (percent_change, key, value) in cells {
            let key = key.into();
            let next_row = row_index.len();
            let row = *row_index.entry(percent_change).or_insert(next_row);
            let next_col = column_index.len();
            let col = *column_index.entry(key.clone()).or_insert(next_col);
            validate_probability(&name, percent_change, &key, value)?;
            collected.push((row, col, value));
        }
        if row_index.is_empty() || column_index.is_empty() {
            return Err(TableError::Empty(name));
        }
        let mut values = Array2::from_elem((row_index.len(), column_index.len()), f64::NAN);
        for (row, col, value) in collected {
            values[[row, col]] = value;
        }
        Ok(Self {
            name,
            row_index,
            column_index,
            values,
        })
    }

    /// Reads a table from a tab-separated file.
    pub fn load(path: &Path) -> Result<Self, TableError> {
        let name = path.display().to_string();
        let polars_err = |source: PolarsError| TableError::Polars {
            path: path.to_path_buf(),
            source,
        };

        let file = File::open(path).map_err(|source| TableError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let df = CsvReader::new(file)
            .with_options(
                CsvReadOptions::default()
                    .with_has_header(true)
                    .with_parse_options(CsvParseOptions::default().with_separator(b'\t')),
            )
            .finish()
            .map_err(polars_err)?;

        let column_names: Vec<String> = df
            .get_column_names()
            .into_iter()
            .map(|s| s.to_string())
            .collect();
        if !column_names.iter().any(|c| c == ROW_LABEL_COLUMN) {
            return Err(TableError::MissingRowLabels(name));
        }

        let labels = float_column(&df, &name, ROW_LABEL_COLUMN)?;
        let mut row_index = HashMap::with_capacity(labels.len());
        let mut row_labels = Vec::with_capacity(labels.len());
        for (row, label) in labels.iter().enumerate() {
            let percent_change = match label {
                Some(v) if v.is_finite() && v.fract() == 0.0 => *v as i64,
                _ => {
                    return Err(TableError::InvalidRowLabel {
                        table: name,
                        row: row + 1,
                    });
                }
            };
            if row_index.insert(percent_change, row).is_some() {
                return Err(TableError::DuplicateRow {
                    table: name,
                    percent_change,
                });
            }
            row_labels.push(percent_change);
        }

        let keys: Vec<&String> = column_names
            .iter()
            .filter(|c| c.as_str() != ROW_LABEL_COLUMN)
            .collect();
        if row_labels.is_empty() || keys.is_empty() {
            return Err(TableError::Empty(name));
        }

        let mut column_index = HashMap::with_capacity(keys.len());
        let mut values = Array2::from_elem((row_labels.len(), keys.len()), f64::NAN);
        for (col, key) in keys.iter().enumerate() {
            let status_key = StatusKey::from(key.as_str());
            if column_index.insert(status_key.clone(), col).is_some() {
                return Err(TableError::DuplicateKey {
                    table: name,
                    key: key.to_string(),
                });
            }
            let cells = float_column(&df, &name, key)?;
            for (row, cell) in cells.into_iter().enumerate() {
                if let Some(value) = cell {
                    validate_probability(&name, row_labels[row], &status_key, value)?;
                    values[[row, col]] = value;
                }
            }
        }

        log::debug!(
            "Loaded reassessment table '{}': {} rows x {} keys",
            name,
            row_labels.len(),
            keys.len()
        );
        Ok(Self {
            name,
            row_index,
            column_index,
            values,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Number of (row, key) slots, present or not.
    pub fn shape(&self) -> (usize, usize) {
        self.values.dim()
    }

    /// The probability at `(percent_change, key)`, or `None` if the table has no entry.
    pub fn get(&self, percent_change: i64, key: &StatusKey) -> Option<f64> {
        let row = *self.row_index.get(&percent_change)?;
        let col = *self.column_index.get(key)?;
        let value = self.values[[row, col]];
        if value.is_nan() { None } else { Some(value) }
    }
}

fn validate_probability(
    table: &str,
    percent_change: i64,
    key: &StatusKey,
    value: f64,
) -> Result<(), TableError> {
    if (0.0..=1.0).contains(&value) {
        Ok(())
    } else {
        Err(TableError::ProbabilityOutOfRange {
            table: table.to_string(),
            percent_change,
            key: key.to_string(),
            value,
        })
    }
}

/// Reads a column as nullable `f64`. Null cells stay `None`; text that is not a
/// number is an error rather than a silent null.
fn float_column(df: &DataFrame, table: &str, column_name: &str) -> Result<Vec<Option<f64>>, TableError> {
    let wrong_type = |found_type: String| TableError::ColumnWrongType {
        table: table.to_string(),
        key: column_name.to_string(),
        found_type,
    };
    let series = df
        .column(column_name)
        .map_err(|e| wrong_type(e.to_string()))?;
    let casted = series
        .cast(&DataType::Float64)
        .map_err(|_| wrong_type(format!("{:?}", series.dtype())))?;
    if casted.null_count() > series.null_count() {
        return Err(wrong_type(format!("{:?}", series.dtype())));
    }
    let chunked = casted
        .f64()
        .map_err(|_| wrong_type(format!("{:?}", series.dtype())))?;
    Ok(chunked.into_iter().collect())
}

/// The four tables of one observer scenario.
#[derive(Debug, Clone)]
pub struct TableSet {
    pub pr_multiple: ReassessmentTable,
    pub pr_singular: ReassessmentTable,
    pub progression_multiple: ReassessmentTable,
    pub progression_singular: ReassessmentTable,
}

impl TableSet {
    /// File name a table is stored under inside a scenario directory.
    pub fn file_name(outcome: OutcomeKind, variant: TableVariant) -> &'static str {
        match (outcome, variant) {
            (OutcomeKind::PartialResponse, TableVariant::Multiple) => "pr_multiple.tsv",
            (OutcomeKind::PartialResponse, TableVariant::Singular) => "pr_singular.tsv",
            (OutcomeKind::Progression, TableVariant::Multiple) => "progression_multiple.tsv",
            (OutcomeKind::Progression, TableVariant::Singular) => "progression_singular.tsv",
        }
    }

    /// Loads all four tables from a scenario directory.
    pub fn load_dir(dir: &Path) -> Result<Self, TableError> {
        let load = |outcome: OutcomeKind, variant: TableVariant| {
            ReassessmentTable::load(&dir.join(Self::file_name(outcome, variant)))
        };
        let set = Self {
            pr_multiple: load(OutcomeKind::PartialResponse, TableVariant::Multiple)?,
            pr_singular: load(OutcomeKind::PartialResponse, TableVariant::Singular)?,
            progression_multiple: load(OutcomeKind::Progression, TableVariant::Multiple)?,
            progression_singular: load(OutcomeKind::Progression, TableVariant::Singular)?,
        };
        log::info!("Loaded reassessment tables from '{}'", dir.display());
        Ok(set)
    }

    pub fn table(&self, outcome: OutcomeKind, variant: TableVariant) -> &ReassessmentTable {
        match (outcome, variant) {
            (OutcomeKind::PartialResponse, TableVariant::Multiple) => &self.pr_multiple,
            (OutcomeKind::PartialResponse, TableVariant::Singular) => &self.pr_singular,
            (OutcomeKind::Progression, TableVariant::Multiple) => &self.progression_multiple,
            (OutcomeKind::Progression, TableVariant::Singular) => &self.progression_singular,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;
    use std::io::Write;
    use tempfile::tempdir;

    #[test]
    fn from_cells_leaves_unlisted_cells_absent() {
        let table = ReassessmentTable::from_cells(
            "t",
            vec![(100, "0115", 0.9), (-40, "21", 0.25)],
        )
        .unwrap();
        assert_eq!(table.shape(), (2, 2));
        assert_eq!(table.get(100, &StatusKey::from("0115")), Some(0.9));
        assert_eq!(table.get(100, &StatusKey::from("21")), None);
        assert_eq!(table.get(99, &StatusKey::from("0115")), None);
    }

    #[test]
    fn from_cells_rejects_out_of_range() {
        let err = ReassessmentTable::from_cells("t", vec![(0, "10", 1.5)]).unwrap_err();
        assert!(matches!(err, TableError::ProbabilityOutOfRange { .. }));
    }

    #[test]
    fn loads_tsv_with_empty_cells() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("pr_singular.tsv");
        let mut file = File::create(&path).unwrap();
        writeln!(file, "percent_change\t0115\t1010").unwrap();
        writeln!(file, "-50\t0.8\t0.75").unwrap();
        writeln!(file, "100\t\t0.01").unwrap();
        drop(file);

        let table = ReassessmentTable::load(&path).unwrap();
        assert_eq!(table.shape(), (2, 2));
        assert_abs_diff_eq!(table.get(-50, &StatusKey::from("0115")).unwrap(), 0.8);
        assert_eq!(table.get(100, &StatusKey::from("0115")), None);
        assert_abs_diff_eq!(table.get(100, &StatusKey::from("1010")).unwrap(), 0.01);
    }

    #[test]
    fn load_rejects_duplicate_rows() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("t.tsv");
        std::fs::write(&path, "percent_change\t10\n5\t0.1\n5\t0.2\n").unwrap();
        assert!(matches!(
            ReassessmentTable::load(&path).unwrap_err(),
            TableError::DuplicateRow { percent_change: 5, .. }
        ));
    }

    #[test]
    fn load_requires_row_label_column() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("t.tsv");
        std::fs::write(&path, "pct\t10\n5\t0.1\n").unwrap();
        assert!(matches!(
            ReassessmentTable::load(&path).unwrap_err(),
            TableError::MissingRowLabels(_)
        ));
    }

    #[test]
    fn missing_file_reports_path() {
        let dir = tempdir().unwrap();
        let err = TableSet::load_dir(dir.path()).unwrap_err();
        match err {
            TableError::Io { path, .. } => assert!(path.ends_with("pr_multiple.tsv")),
            other => panic!("expected Io, got {other:?}"),
        }
    }
}
