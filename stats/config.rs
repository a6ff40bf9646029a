//! Study configuration, stored as human-readable TOML.

use crate::simulate::DEFAULT_TRIALS;
use crate::types::ObserverScenario;
use serde::{Deserialize, Serialize};
use std::fs;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Largest seed a TOML report can record (TOML integers are signed 64-bit).
pub const MAX_SEED: u64 = i64::MAX as u64;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read or write config file: {0}")]
    IoError(#[from] std::io::Error),
    #[error("Failed to parse TOML config file: {0}")]
    TomlParseError(#[from] toml::de::Error),
    #[error("Failed to serialize config to TOML format: {0}")]
    TomlSerializeError(#[from] toml::ser::Error),
    #[error("Invalid setting '{setting}': {reason}")]
    InvalidSetting {
        setting: &'static str,
        reason: String,
    },
}

/// Where the four reassessment tables of each observer scenario live.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TableDirs {
    pub intra: Option<PathBuf>,
    pub inter: Option<PathBuf>,
}

impl TableDirs {
    pub fn for_scenario(&self, scenario: ObserverScenario) -> Option<&Path> {
        match scenario {
            ObserverScenario::Intra => self.intra.as_deref(),
            ObserverScenario::Inter => self.inter.as_deref(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SimulationConfig {
    #[serde(default = "default_trials")]
    pub trials: usize,
    /// Fixed seed for reproducible runs. Absent means seeded from entropy.
    #[serde(default)]
    pub seed: Option<u64>,
}

fn default_trials() -> usize {
    DEFAULT_TRIALS
}

impl Default for SimulationConfig {
    fn default() -> Self {
        Self {
            trials: DEFAULT_TRIALS,
            seed: None,
        }
    }
}

/// Everything needed to analyse one study.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StudyConfig {
    pub study_name: String,
    pub treatment_name: String,
    /// Patients known to be in the cohort but absent from the lesion sheet.
    /// They are counted as progressions.
    #[serde(default)]
    pub up_patients: usize,
    pub observer: ObserverScenario,
    #[serde(default)]
    pub lesion_sheet: Option<PathBuf>,
    #[serde(default)]
    pub tables: TableDirs,
    #[serde(default)]
    pub simulation: SimulationConfig,
}

impl StudyConfig {
    /// A starter config pointing at conventional relative locations.
    pub fn template() -> Self {
        Self {
            study_name: "Untitled study".to_string(),
            treatment_name: "Untitled treatment".to_string(),
            up_patients: 0,
            observer: ObserverScenario::Inter,
            lesion_sheet: Some(PathBuf::from("lesions.tsv")),
            tables: TableDirs {
                intra: Some(PathBuf::from("tables/intra")),
                inter: Some(PathBuf::from("tables/inter")),
            },
            simulation: SimulationConfig::default(),
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.simulation.trials == 0 {
            return Err(ConfigError::InvalidSetting {
                setting: "simulation.trials",
                reason: "must be at least 1".to_string(),
            });
        }
        if let Some(seed) = self.simulation.seed {
            if seed > MAX_SEED {
                return Err(ConfigError::InvalidSetting {
                    setting: "simulation.seed",
                    reason: format!("{seed} is larger than the maximum of {MAX_SEED}"),
                });
            }
        }
        if self.tables.for_scenario(self.observer).is_none() {
            return Err(ConfigError::InvalidSetting {
                setting: "tables",
                reason: format!("no table directory configured for the {} scenario", self.observer),
            });
        }
        Ok(())
    }

    /// Saves the config to a file in TOML format.
    pub fn save(&self, path: &Path) -> Result<(), ConfigError> {
        let toml_string = toml::to_string_pretty(self)?;
        let mut file = BufWriter::new(fs::File::create(path)?);
        file.write_all(toml_string.as_bytes())?;
        file.flush()?;
        Ok(())
    }

    /// Loads a config from a TOML file. Relative paths inside it are resolved against
    /// the directory holding the file.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let toml_string = fs::read_to_string(path)?;
        let mut config: Self = toml::from_str(&toml_string)?;
        if let Some(base) = path.parent() {
            config.resolve_paths(base);
        }
        config.validate()?;
        Ok(config)
    }

    fn resolve_paths(&mut self, base: &Path) {
        let resolve = |p: &mut Option<PathBuf>| {
            if let Some(inner) = p.as_mut() {
                if inner.is_relative() {
                    *inner = base.join(&*inner);
                }
            }
        };
        resolve(&mut self.lesion_sheet);
        resolve(&mut self.tables.intra);
        resolve(&mut self.tables.inter);
    }
}
