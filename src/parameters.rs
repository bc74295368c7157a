//! Model parameters, read from a JSON configuration file.
//!
//! The file is a flat JSON object. Disease and population parameters are grouped into their own
//! structs (flattened into the same object) so the components that need them can take just that
//! group.

use std::fs;
use std::path::{Path, PathBuf};

use chrono::NaiveDate;
use log::{debug, warn};
use serde::{Deserialize, Serialize};

use crate::error::TbError;
use crate::numeric::{almost_eq, is_probability, ACC};

pub const DEFAULT_CONFIG_PATH: &str = "config/config.json";
pub const DEFAULT_SEX_RATIO_PATH: &str = "data/sex_ratio.csv";
pub const DEFAULT_SEED: u64 = 42;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum Mode {
    #[default]
    Simulation,
    Calibration,
}

/// Rates used by the per-agent disease state machine and by screening.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DiseaseParameters {
    pub screening_test_sensitivity: f64,
    pub tpt_efficacy: f64,
    pub treatment_success_rate: f64,
    /// Probability of death at the end of treatment.
    pub mortality_rate: f64,
    /// Carried for reference; the failure band is whatever success and mortality leave over.
    pub treatment_failure_rate: f64,
    pub tpt_completion_rate: f64,
}

/// Percentages (0 to 100) used when loading the synthetic population.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PopulationParameters {
    pub initial_tbi_percentage: f64,
    pub initial_active_tbi_percentage: f64,
    pub men_working_percentage: f64,
    pub women_working_percentage: f64,
}

/// A closed grid of beta values `[min, max]` spaced by `step`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(from = "[f64; 3]", into = "[f64; 3]")]
pub struct BetaRange {
    pub min: f64,
    pub max: f64,
    pub step: f64,
}

impl From<[f64; 3]> for BetaRange {
    fn from([min, max, step]: [f64; 3]) -> Self {
        BetaRange { min, max, step }
    }
}

impl From<BetaRange> for [f64; 3] {
    fn from(range: BetaRange) -> Self {
        [range.min, range.max, range.step]
    }
}

impl BetaRange {
    /// The candidate values in ascending order, both ends included.
    #[must_use]
    pub fn candidates(&self) -> Vec<f64> {
        if self.step <= 0.0 || self.max < self.min {
            return Vec::new();
        }
        // Tolerate representation error so that e.g. [0.1, 0.2, 0.1] yields both ends.
        #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
        let n = ((self.max - self.min) / self.step + 1e-9).floor() as usize;
        #[allow(clippy::cast_precision_loss)]
        (0..=n).map(|i| self.min + i as f64 * self.step).collect()
    }
}

/// An inclusive range of simulated dates.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DateWindow {
    pub start: NaiveDate,
    pub end: NaiveDate,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Parameters {
    #[serde(default)]
    pub mode: Mode,
    pub beta_calibration_range: BetaRange,
    pub beta: f64,
    pub num_simulations: usize,
    /// Days per step.
    pub timestep: f64,
    pub start_date: NaiveDate,
    pub end_date: NaiveDate,
    pub calibration_start_date: NaiveDate,
    pub calibration_end_date: NaiveDate,
    /// Multiplier on the infection probability at workplaces and schools.
    pub infection_factor: f64,
    #[serde(flatten)]
    pub population: PopulationParameters,
    #[serde(flatten)]
    pub disease: DiseaseParameters,
    #[serde(default = "default_seed")]
    pub seed: u64,
    #[serde(default = "default_calibration_threads")]
    pub calibration_threads: usize,
    pub synthetic_population_path: PathBuf,
    pub fertility_data_path: PathBuf,
    pub mortality_data_path: PathBuf,
    pub calibration_data_path: PathBuf,
    #[serde(default = "default_sex_ratio_path")]
    pub sex_ratio_data_path: PathBuf,
}

fn default_seed() -> u64 {
    DEFAULT_SEED
}

fn default_calibration_threads() -> usize {
    1
}

fn default_sex_ratio_path() -> PathBuf {
    PathBuf::from(DEFAULT_SEX_RATIO_PATH)
}

impl Parameters {
    /// Reads and validates parameters from a JSON file.
    ///
    /// # Errors
    ///
    /// Returns `TbError::ConfigurationError` if the file cannot be read, a required key is
    /// missing, a date is malformed, or a value is out of range.
    pub fn load(path: &Path) -> Result<Parameters, TbError> {
        debug!("loading parameters from {}", path.display());
        let contents = fs::read_to_string(path).map_err(|e| {
            TbError::ConfigurationError(format!("cannot read {}: {e}", path.display()))
        })?;
        Parameters::from_json(&contents)
            .map_err(|e| TbError::ConfigurationError(format!("{}: {e}", path.display())))
    }

    /// Parses and validates parameters from a JSON string.
    ///
    /// # Errors
    ///
    /// Returns `TbError::ConfigurationError` if a required key is missing, a date is malformed,
    /// or a value is out of range.
    pub fn from_json(contents: &str) -> Result<Parameters, TbError> {
        let parameters: Parameters = serde_json::from_str(contents)
            .map_err(|e| TbError::ConfigurationError(e.to_string()))?;
        parameters.validate()?;
        Ok(parameters)
    }

    /// Checks value ranges and consistency between values.
    ///
    /// # Errors
    ///
    /// Returns `TbError::ConfigurationError` describing the first offending value.
    pub fn validate(&self) -> Result<(), TbError> {
        if !(self.timestep > 0.0) {
            return Err(format!("timestep must be positive, got {}", self.timestep).into());
        }
        if self.end_date < self.start_date {
            return Err("end_date is before start_date".into());
        }
        if self.calibration_end_date < self.calibration_start_date {
            return Err("calibration_end_date is before calibration_start_date".into());
        }
        let range = self.beta_calibration_range;
        if !(range.step > 0.0) || range.max < range.min {
            return Err(format!(
                "beta_calibration_range must be [min, max, step] with min <= max and step > 0, got {:?}",
                <[f64; 3]>::from(range)
            )
            .into());
        }
        if self.beta < 0.0 || range.min < 0.0 {
            return Err("beta values must be non-negative".into());
        }
        if self.infection_factor < 0.0 {
            return Err("infection_factor must be non-negative".into());
        }
        if self.num_simulations == 0 {
            return Err("num_simulations must be at least 1".into());
        }
        if self.calibration_threads == 0 {
            return Err("calibration_threads must be at least 1".into());
        }

        let percentages = [
            ("initial_tbi_percentage", self.population.initial_tbi_percentage),
            (
                "initial_active_tbi_percentage",
                self.population.initial_active_tbi_percentage,
            ),
            ("men_working_percentage", self.population.men_working_percentage),
            (
                "women_working_percentage",
                self.population.women_working_percentage,
            ),
        ];
        for (name, value) in percentages {
            if !(0.0..=100.0).contains(&value) {
                return Err(format!("{name} must be between 0 and 100, got {value}").into());
            }
        }
        if self.population.initial_tbi_percentage + self.population.initial_active_tbi_percentage
            > 100.0
        {
            return Err("initial TBI and active TB percentages exceed 100".into());
        }

        let disease = &self.disease;
        let probabilities = [
            (
                "screening_test_sensitivity",
                disease.screening_test_sensitivity,
            ),
            ("tpt_efficacy", disease.tpt_efficacy),
            ("treatment_success_rate", disease.treatment_success_rate),
            ("mortality_rate", disease.mortality_rate),
            ("treatment_failure_rate", disease.treatment_failure_rate),
            ("tpt_completion_rate", disease.tpt_completion_rate),
        ];
        for (name, value) in probabilities {
            if !is_probability(value) {
                return Err(format!("{name} must be between 0 and 1, got {value}").into());
            }
        }

        let outcome_total = disease.treatment_success_rate + disease.mortality_rate;
        if outcome_total > 1.0 {
            warn!(
                "treatment_success_rate + mortality_rate = {outcome_total} > 1; no treatment can fail"
            );
        }
        if !almost_eq(
            outcome_total + disease.treatment_failure_rate,
            1.0,
            ACC,
        ) {
            warn!(
                "treatment outcome rates sum to {}; the failure band is 1 - success - mortality = {}",
                outcome_total + disease.treatment_failure_rate,
                (1.0 - outcome_total).max(0.0)
            );
        }
        Ok(())
    }

    #[must_use]
    pub fn simulation_window(&self) -> DateWindow {
        DateWindow {
            start: self.start_date,
            end: self.end_date,
        }
    }

    #[must_use]
    pub fn calibration_window(&self) -> DateWindow {
        DateWindow {
            start: self.calibration_start_date,
            end: self.calibration_end_date,
        }
    }
}

#[cfg(test)]
pub(crate) const TEST_CONFIG: &str = r#"{
    "mode": "simulation",
    "beta_calibration_range": [0.1, 0.2, 0.1],
    "beta": 0.5,
    "num_simulations": 1,
    "timestep": 1.0,
    "start_date": "2021-01-01",
    "end_date": "2021-03-31",
    "calibration_start_date": "2021-01-01",
    "calibration_end_date": "2021-02-28",
    "infection_factor": 1.5,
    "initial_tbi_percentage": 31.3,
    "initial_active_tbi_percentage": 0.115,
    "men_working_percentage": 80.0,
    "women_working_percentage": 60.0,
    "screening_test_sensitivity": 0.9,
    "tpt_efficacy": 0.9,
    "treatment_success_rate": 0.85,
    "mortality_rate": 0.05,
    "treatment_failure_rate": 0.10,
    "tpt_completion_rate": 0.8,
    "synthetic_population_path": "data/synthetic_population.csv",
    "fertility_data_path": "data/fertility.csv",
    "mortality_data_path": "data/mortality.csv",
    "calibration_data_path": "data/calibration.csv"
}"#;

#[cfg(test)]
pub(crate) fn test_parameters() -> Parameters {
    Parameters::from_json(TEST_CONFIG).unwrap()
}
