//! Grid search for the transmission rate `beta` that best reproduces a reference weekly
//! incidence series.
//!
//! Every candidate starts from its own copy of the loaded population and of the seeded random
//! generator, so candidates differ only in `beta` and can be evaluated on several threads
//! without changing the result.

use std::collections::HashMap;
use std::thread;

use log::{info, warn};
use rand::rngs::StdRng;
use serde::{Deserialize, Serialize};

use crate::error::TbError;
use crate::parameters::Parameters;
use crate::population::Population;
use crate::simulation::{Simulation, SimulationOutput, WeeklyIncidence};

/// One row of the reference incidence series.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ReferenceIncidence {
    #[serde(rename = "Year")]
    pub year: i32,
    #[serde(rename = "Week")]
    pub week: u32,
    #[serde(rename = "Reference")]
    pub reference: f64,
}

/// One row of the calibration results table.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct CalibrationResult {
    #[serde(rename = "Beta")]
    pub beta: f64,
    #[serde(rename = "RMSE")]
    pub rmse: f64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct CalibrationOutcome {
    /// One result per candidate, in ascending beta order.
    pub results: Vec<CalibrationResult>,
    /// The daily and weekly tables of each candidate's run, in the same order as `results`.
    pub runs: Vec<SimulationOutput>,
    pub best: CalibrationResult,
}

/// Root mean squared error between simulated and reference incidence over the (year, week)
/// pairs present in both. Returns `None` if they share no week.
#[must_use]
pub fn rmse(simulated: &[WeeklyIncidence], reference: &[ReferenceIncidence]) -> Option<f64> {
    let reference: HashMap<(i32, u32), f64> = reference
        .iter()
        .map(|row| ((row.year, row.week), row.reference))
        .collect();

    let mut sum_of_squares = 0.0;
    let mut n = 0usize;
    for row in simulated {
        if let Some(expected) = reference.get(&(row.year, row.week)) {
            #[allow(clippy::cast_precision_loss)]
            let error = row.incidence as f64 - expected;
            sum_of_squares += error * error;
            n += 1;
        }
    }
    #[allow(clippy::cast_precision_loss)]
    (n > 0).then(|| (sum_of_squares / n as f64).sqrt())
}

/// Picks the candidate with the lowest RMSE. Candidates are compared in the given order and a
/// later one only wins if it is strictly better. Candidates without an RMSE never win.
#[must_use]
pub fn select_best(results: &[CalibrationResult]) -> Option<CalibrationResult> {
    let mut best: Option<CalibrationResult> = None;
    for result in results {
        if result.rmse.is_nan() {
            continue;
        }
        if best.is_none_or(|best| result.rmse < best.rmse) {
            best = Some(*result);
        }
    }
    best
}

/// Runs the model over the calibration window once per beta candidate and selects the best.
///
/// `population` and `rng` are the state right after loading; each candidate runs on clones of
/// them. `on_candidate` is called from the worker threads as each candidate finishes.
///
/// # Errors
///
/// Returns `TbError::ConfigurationError` if the beta range has no candidates,
/// `TbError::DataFormatError` if no candidate shares a week with the reference series, and any
/// error raised by a run.
pub fn calibrate(
    population: &Population,
    rng: &StdRng,
    parameters: &Parameters,
    reference: &[ReferenceIncidence],
    on_candidate: &(dyn Fn(&CalibrationResult) + Sync),
) -> Result<CalibrationOutcome, TbError> {
    let candidates = parameters.beta_calibration_range.candidates();
    if candidates.is_empty() {
        return Err(TbError::ConfigurationError(format!(
            "beta calibration range {:?} has no candidates",
            parameters.beta_calibration_range
        )));
    }
    let threads = parameters.calibration_threads.clamp(1, candidates.len());
    info!(
        "calibrating {} beta candidates on {threads} threads",
        candidates.len()
    );

    let evaluate = |beta: f64| -> Result<(CalibrationResult, SimulationOutput), TbError> {
        let mut population = population.clone();
        let mut rng = rng.clone();
        let output = Simulation::new(parameters, beta, parameters.calibration_window())
            .run(&mut population, &mut rng)?;
        let rmse = rmse(&output.weekly, reference).unwrap_or_else(|| {
            warn!("beta {beta}: no simulated week matches the reference series");
            f64::NAN
        });
        let result = CalibrationResult { beta, rmse };
        on_candidate(&result);
        Ok((result, output))
    };

    let mut evaluated: Vec<(usize, Result<(CalibrationResult, SimulationOutput), TbError>)> =
        thread::scope(|scope| {
            let handles: Vec<_> = (0..threads)
                .map(|worker| {
                    let candidates = &candidates;
                    let evaluate = &evaluate;
                    scope.spawn(move || {
                        candidates
                            .iter()
                            .enumerate()
                            .skip(worker)
                            .step_by(threads)
                            .map(|(index, &beta)| (index, evaluate(beta)))
                            .collect::<Vec<_>>()
                    })
                })
                .collect();
            handles
                .into_iter()
                .map(|handle| {
                    handle.join().map_err(|_| {
                        TbError::InvariantViolation("calibration worker panicked".to_string())
                    })
                })
                .collect::<Result<Vec<_>, _>>()
        })?
        .into_iter()
        .flatten()
        .collect();
    evaluated.sort_by_key(|(index, _)| *index);

    let (results, runs): (Vec<_>, Vec<_>) = evaluated
        .into_iter()
        .map(|(_, result)| result)
        .collect::<Result<Vec<_>, _>>()?
        .into_iter()
        .unzip();
    for result in &results {
        info!("beta {}: RMSE {}", result.beta, result.rmse);
    }

    let best = select_best(&results).ok_or_else(|| {
        TbError::DataFormatError(
            "the reference incidence shares no (year, week) with the calibration window"
                .to_string(),
        )
    })?;
    info!("best beta {} with RMSE {}", best.beta, best.rmse);
    Ok(CalibrationOutcome {
        results,
        runs,
        best,
    })
}
