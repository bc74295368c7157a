//! Output tables. A run's files are written together once the run has finished, after checking
//! that every target can be written, so a failed run never leaves a partial result set.
//!
//! File names are built from a fixed stem and an optional tag: `daily_states_<tag>.csv`,
//! `weekly_incidence_<tag>.csv`, `calibration_results_<tag>.csv` and `best_beta_<tag>.txt`.
//! A calibration run also keeps the tables of every candidate, with the candidate's beta in the
//! stem: `daily_states_beta0.1_<tag>.csv` and `weekly_incidence_beta0.1_<tag>.csv`.

use std::ffi::OsStr;
use std::fs::{create_dir_all, File};
use std::io::Write as _;
use std::path::{Path, PathBuf};

use csv::Writer;
use log::info;
use serde::Serialize;

use crate::calibration::CalibrationOutcome;
use crate::error::TbError;
use crate::simulation::SimulationOutput;

pub const DAILY_STATES: &str = "daily_states";
pub const WEEKLY_INCIDENCE: &str = "weekly_incidence";
pub const CALIBRATION_RESULTS: &str = "calibration_results";
pub const BEST_BETA: &str = "best_beta";

/// Where output files go and how they are named.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReportOptions {
    pub directory: PathBuf,
    pub tag: Option<String>,
    /// Replace files left by an earlier run instead of failing.
    pub overwrite: bool,
}

impl Default for ReportOptions {
    fn default() -> Self {
        ReportOptions {
            directory: PathBuf::from("output"),
            tag: None,
            overwrite: false,
        }
    }
}

impl ReportOptions {
    #[must_use]
    pub fn new(directory: impl Into<PathBuf>) -> Self {
        ReportOptions {
            directory: directory.into(),
            ..ReportOptions::default()
        }
    }

    #[must_use]
    pub fn tag(mut self, tag: Option<String>) -> Self {
        self.tag = tag.filter(|tag| !tag.is_empty());
        self
    }

    #[must_use]
    pub fn overwrite(mut self, overwrite: bool) -> Self {
        self.overwrite = overwrite;
        self
    }

    /// The path of the output file with the given stem and extension.
    #[must_use]
    pub fn path(&self, stem: &str, extension: &str) -> PathBuf {
        let name = match &self.tag {
            Some(tag) => format!("{stem}_{tag}.{extension}"),
            None => format!("{stem}.{extension}"),
        };
        self.directory.join(name)
    }

    /// The files a simulation run writes.
    #[must_use]
    pub fn simulation_paths(&self) -> [PathBuf; 2] {
        [
            self.path(DAILY_STATES, "csv"),
            self.path(WEEKLY_INCIDENCE, "csv"),
        ]
    }

    /// The daily and weekly tables of one calibration candidate.
    #[must_use]
    pub fn candidate_paths(&self, beta: f64) -> [PathBuf; 2] {
        let label = beta_label(beta);
        [
            self.path(&format!("{DAILY_STATES}_{label}"), "csv"),
            self.path(&format!("{WEEKLY_INCIDENCE}_{label}"), "csv"),
        ]
    }

    /// The files a calibration over `candidates` writes: the results table, the best-beta report,
    /// then each candidate's tables in order.
    #[must_use]
    pub fn calibration_paths(&self, candidates: &[f64]) -> Vec<PathBuf> {
        let mut paths = vec![
            self.path(CALIBRATION_RESULTS, "csv"),
            self.path(BEST_BETA, "txt"),
        ];
        for &beta in candidates {
            paths.extend(self.candidate_paths(beta));
        }
        paths
    }

    /// Fails if any of `paths` already exists and overwriting is off.
    ///
    /// # Errors
    ///
    /// Returns `TbError::ReportError` naming the first existing file.
    pub fn check_writable(&self, paths: &[PathBuf]) -> Result<(), TbError> {
        if self.overwrite {
            return Ok(());
        }
        match paths.iter().find(|path| path.exists()) {
            Some(path) => Err(TbError::ReportError(format!(
                "{} already exists; use --force to overwrite",
                path.display()
            ))),
            None => Ok(()),
        }
    }
}

/// `beta` as it appears in file names. Grid values such as 0.30000000000000004 are rounded back to
/// the value they stand for.
fn beta_label(beta: f64) -> String {
    let rounded = (beta * 1e9).round() / 1e9;
    format!("beta{rounded}")
}

/// Checks that the path names a CSV file, creates its parent directories, and creates the file.
fn generate_validate_filepath(path: &Path) -> Result<File, TbError> {
    match path.extension().and_then(OsStr::to_str) {
        Some("csv") => {
            if let Some(parent) = path.parent() {
                create_dir_all(parent)?;
            }
            Ok(File::create(path)?)
        }
        _ => Err(TbError::ReportError(format!(
            "report {} must be a CSV file",
            path.display()
        ))),
    }
}

/// Writes `rows` to a CSV file at `path`, with a header row taken from the field names.
///
/// # Errors
///
/// Returns `TbError::ReportError` for a non-CSV path and I/O or CSV errors from writing.
pub fn write_csv<T: Serialize>(path: &Path, rows: &[T]) -> Result<(), TbError> {
    let file = generate_validate_filepath(path)?;
    let mut writer = Writer::from_writer(file);
    for row in rows {
        writer.serialize(row)?;
    }
    writer.flush()?;
    Ok(())
}

/// Writes the daily disease-state and weekly incidence tables of a simulation run.
///
/// # Errors
///
/// Returns `TbError::ReportError` if a file exists and overwriting is off, and I/O or CSV errors
/// from writing.
pub fn write_simulation_output(
    options: &ReportOptions,
    output: &SimulationOutput,
) -> Result<Vec<PathBuf>, TbError> {
    let [daily, weekly] = options.simulation_paths();
    options.check_writable(&[daily.clone(), weekly.clone()])?;
    write_csv(&daily, &output.daily)?;
    write_csv(&weekly, &output.weekly)?;
    info!("wrote {} and {}", daily.display(), weekly.display());
    Ok(vec![daily, weekly])
}

/// Writes the (beta, RMSE) table, the best-beta report, and the daily and weekly tables of every
/// candidate of a calibration run.
///
/// # Errors
///
/// Returns `TbError::ReportError` if a file exists and overwriting is off, and I/O or CSV errors
/// from writing.
pub fn write_calibration_output(
    options: &ReportOptions,
    outcome: &CalibrationOutcome,
) -> Result<Vec<PathBuf>, TbError> {
    let betas: Vec<f64> = outcome.results.iter().map(|result| result.beta).collect();
    let paths = options.calibration_paths(&betas);
    options.check_writable(&paths)?;
    let (results, best) = (&paths[0], &paths[1]);
    write_csv(results, &outcome.results)?;

    if let Some(parent) = best.parent() {
        create_dir_all(parent)?;
    }
    let mut file = File::create(best)?;
    writeln!(file, "Best beta: {}", outcome.best.beta)?;
    writeln!(file, "RMSE: {}", outcome.best.rmse)?;
    info!("wrote {} and {}", results.display(), best.display());

    for (run, tables) in outcome.runs.iter().zip(paths[2..].chunks(2)) {
        write_csv(&tables[0], &run.daily)?;
        write_csv(&tables[1], &run.weekly)?;
    }
    info!("wrote the tables of {} candidates", outcome.runs.len());
    Ok(paths)
}
