//! Writes pipeline results to an output directory: the two row tables as TSV and the
//! study-level summary as TOML.

use crate::pipeline::StudyReport;
use serde::Serialize;
use std::fs;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use thiserror::Error;

pub const PATIENTS_FILE: &str = "patients.tsv";
pub const REASSESSED_FILE: &str = "reassessed.tsv";
pub const SUMMARY_FILE: &str = "report.toml";

#[derive(Error, Debug)]
pub enum ReportError {
    #[error("Failed to write '{path}': {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("Failed to write TSV '{path}': {source}")]
    Csv {
        path: PathBuf,
        #[source]
        source: csv::Error,
    },
    #[error("Failed to serialize report to TOML format: {0}")]
    TomlSerializeError(#[from] toml::ser::Error),
}

/// Writes one serde row per line, tab-separated, with a header row.
pub fn write_rows<T: Serialize>(path: &Path, rows: &[T]) -> Result<(), ReportError> {
    let csv_err = |source: csv::Error| ReportError::Csv {
        path: path.to_path_buf(),
        source,
    };
    let mut writer = csv::WriterBuilder::new()
        .delimiter(b'\t')
        .from_path(path)
        .map_err(csv_err)?;
    for row in rows {
        writer.serialize(row).map_err(csv_err)?;
    }
    writer.flush().map_err(|source| ReportError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    Ok(())
}

fn write_summary(path: &Path, toml_string: &str) -> Result<(), ReportError> {
    let io_err = |source: std::io::Error| ReportError::Io {
        path: path.to_path_buf(),
        source,
    };
    let mut file = BufWriter::new(fs::File::create(path).map_err(io_err)?);
    file.write_all(toml_string.as_bytes()).map_err(io_err)?;
    file.flush().map_err(io_err)?;
    Ok(())
}

/// Writes `patients.tsv`, `reassessed.tsv` and `report.toml` into `out_dir`, creating it
/// if needed. Returns the paths written. The summary is serialized first, so a report
/// that cannot be represented leaves the directory untouched.
pub fn write_report(out_dir: &Path, report: &StudyReport) -> Result<Vec<PathBuf>, ReportError> {
    let summary_toml = toml::to_string_pretty(report)?;
    fs::create_dir_all(out_dir).map_err(|source| ReportError::Io {
        path: out_dir.to_path_buf(),
        source,
    })?;
    let patients = out_dir.join(PATIENTS_FILE);
    let reassessed = out_dir.join(REASSESSED_FILE);
    let summary = out_dir.join(SUMMARY_FILE);

    write_rows(&patients, &report.patients)?;
    write_rows(&reassessed, &report.reassessed)?;
    write_summary(&summary, &summary_toml)?;
    log::info!("Wrote report to '{}'", out_dir.display());
    Ok(vec![patients, reassessed, summary])
}
