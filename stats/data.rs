//! # Lesion Sheet Loading and Validation
//!
//! Reads the study's per-lesion measurement sheet (TSV) and validates it against a
//! fixed schema before anything reaches the analytical stages.
//!
//! - Strict schema: the columns `patient_id`, `site`, `baseline_size` and `post_size`
//!   are required by name. Extra columns are ignored.
//! - Failures are assumed to be user-input errors. `DataError` names the column and,
//!   where it can, the row, so the sheet can be fixed at the source.

use crate::types::LesionRecord;
use polars::prelude::*;
use std::collections::HashSet;
use std::fs::File;
use std::path::Path;
use thiserror::Error;

pub const PATIENT_ID_COLUMN: &str = "patient_id";
pub const SITE_COLUMN: &str = "site";
pub const BASELINE_COLUMN: &str = "baseline_size";
pub const POST_COLUMN: &str = "post_size";

const REQUIRED_COLUMNS: [&str; 4] = [PATIENT_ID_COLUMN, SITE_COLUMN, BASELINE_COLUMN, POST_COLUMN];

#[derive(Error, Debug)]
pub enum DataError {
    #[error("Error from the underlying Polars DataFrame library: {0}")]
    PolarsError(#[from] PolarsError),
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),
    #[error(
        "The required column '{0}' was not found in the lesion sheet. Please check spelling and case."
    )]
    ColumnNotFound(String),
    #[error(
        "The required column '{column_name}' could not be converted to the expected type '{expected_type}'. (Found type: {found_type})"
    )]
    ColumnWrongType {
        column_name: String,
        expected_type: &'static str,
        found_type: String,
    },
    #[error("Missing or null values were found in the required column '{0}'.")]
    MissingValuesFound(String),
    #[error("Non-finite values (NaN or Infinity) were found in the required column '{0}'.")]
    NonFiniteValuesFound(String),
    #[error("Row {row}: patient_id {value} is not a whole number.")]
    NonIntegerPatientId { row: usize, value: f64 },
    #[error("The lesion sheet contains no lesion rows.")]
    Empty,
}

/// Loads every lesion row of a tab-separated sheet.
pub fn load_lesion_sheet(path: &Path) -> Result<Vec<LesionRecord>, DataError> {
    log::info!("Loading lesion sheet from '{}'", path.display());
    let df = CsvReader::new(File::open(path)?)
        .with_options(
            CsvReadOptions::default()
                .with_has_header(true)
                .with_parse_options(CsvParseOptions::default().with_separator(b'\t')),
        )
        .finish()?;

    let columns: HashSet<String> = df
        .get_column_names()
        .into_iter()
        .map(|s| s.to_string())
        .collect();
    for name in REQUIRED_COLUMNS {
        if !columns.contains(name) {
            return Err(DataError::ColumnNotFound(name.to_string()));
        }
    }
    if df.height() == 0 {
        return Err(DataError::Empty);
    }

    let ids = extract_numeric_column(&df, PATIENT_ID_COLUMN)?;
    let sites = extract_text_column(&df, SITE_COLUMN)?;
    let baseline = extract_numeric_column(&df, BASELINE_COLUMN)?;
    let post = extract_numeric_column(&df, POST_COLUMN)?;

    let mut lesions = Vec::with_capacity(df.height());
    for (row, (((id, site), baseline_size), post_size)) in ids
        .into_iter()
        .zip(sites)
        .zip(baseline)
        .zip(post)
        .enumerate()
    {
        if id.fract() != 0.0 {
            return Err(DataError::NonIntegerPatientId {
                row: row + 1,
                value: id,
            });
        }
        lesions.push(LesionRecord {
            patient_id: id as i64,
            site,
            baseline_size,
            post_size,
        });
    }
    log::info!("Loaded {} lesion rows", lesions.len());
    Ok(lesions)
}

fn extract_numeric_column(df: &DataFrame, column_name: &str) -> Result<Vec<f64>, DataError> {
    let series = df.column(column_name)?;
    if series.null_count() > 0 {
        return Err(DataError::MissingValuesFound(column_name.to_string()));
    }

    let wrong_type = || DataError::ColumnWrongType {
        column_name: column_name.to_string(),
        expected_type: "f64 (numeric)",
        found_type: format!("{:?}", series.dtype()),
    };
    let casted = series.cast(&DataType::Float64).map_err(|_| wrong_type())?;
    if casted.null_count() > 0 {
        return Err(wrong_type());
    }

    let values: Vec<f64> = casted.f64()?.into_no_null_iter().collect();
    if values.iter().any(|v| !v.is_finite()) {
        return Err(DataError::NonFiniteValuesFound(column_name.to_string()));
    }
    Ok(values)
}

fn extract_text_column(df: &DataFrame, column_name: &str) -> Result<Vec<String>, DataError> {
    let series = df.column(column_name)?;
    if series.null_count() > 0 {
        return Err(DataError::MissingValuesFound(column_name.to_string()));
    }
    let casted = series
        .cast(&DataType::String)
        .map_err(|_| DataError::ColumnWrongType {
            column_name: column_name.to_string(),
            expected_type: "text",
            found_type: format!("{:?}", series.dtype()),
        })?;
    Ok(casted
        .str()?
        .into_no_null_iter()
        .map(|s| s.trim().to_string())
        .collect())
}
