//! The time-stepped driver for one run.
//!
//! Each step is applied as a unit, in this order:
//!
//! 1. transmission at every workplace, then every school, for half a timestep;
//! 2. transmission in every household for the other half;
//! 3. household screening, once a week;
//! 4. the disease-state update of every living agent, after which treatment deaths are removed;
//! 5. aging, and on weekly dates deaths and births;
//! 6. recomputing the counters and recording the day.
//!
//! The random stream is consumed in exactly this order, and within each stage in the insertion
//! order of the population's containers, so a given seed always reproduces the same run.

use chrono::{Datelike, Duration, NaiveDate};
use indexmap::IndexMap;
use log::{debug, info};
use rand::Rng;
use serde::Serialize;

use crate::agent::{AgentId, LocationType, Transition};
use crate::demographics;
use crate::error::TbError;
use crate::parameters::{DateWindow, Parameters};
use crate::population::{DiseaseCounts, Population};
use crate::screening::screen_household_contacts;
use crate::transmission::contacts;

/// One row of the daily disease-state table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct DailyRecord {
    #[serde(rename = "Date")]
    pub date: NaiveDate,
    #[serde(rename = "Susceptible")]
    pub susceptible: usize,
    #[serde(rename = "TBI")]
    pub tbi: usize,
    #[serde(rename = "ActiveTB")]
    pub active_tb: usize,
    #[serde(rename = "Treatment")]
    pub treatment: usize,
    #[serde(rename = "NewTBI")]
    pub new_tbi: usize,
    #[serde(rename = "NewActiveTB")]
    pub new_active_tb: usize,
}

impl DailyRecord {
    fn new(date: NaiveDate, counts: DiseaseCounts, new_tbi: usize, new_active_tb: usize) -> Self {
        DailyRecord {
            date,
            susceptible: counts.susceptible,
            tbi: counts.tbi,
            active_tb: counts.active_tb,
            treatment: counts.treatment,
            new_tbi,
            new_active_tb,
        }
    }
}

/// New active TB cases in one ISO week, keyed by its ISO week-numbering year.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct WeeklyIncidence {
    #[serde(rename = "Year")]
    pub year: i32,
    #[serde(rename = "Week")]
    pub week: u32,
    #[serde(rename = "Incidence")]
    pub incidence: usize,
}

/// Totals for one run.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct RunSummary {
    pub beta: f64,
    pub home_infections: usize,
    pub work_infections: usize,
    pub school_infections: usize,
    pub new_active_tb: usize,
    pub treatment_deaths: usize,
    pub deaths: usize,
    pub births: usize,
}

impl RunSummary {
    /// All new latent infections, wherever they happened.
    #[must_use]
    pub fn new_tbi(&self) -> usize {
        self.home_infections + self.work_infections + self.school_infections
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct SimulationOutput {
    pub daily: Vec<DailyRecord>,
    pub weekly: Vec<WeeklyIncidence>,
    pub summary: RunSummary,
}

/// Number of whole days between recorded dates.
#[must_use]
pub fn step_days(timestep: f64) -> i64 {
    #[allow(clippy::cast_possible_truncation)]
    let days = timestep.round() as i64;
    days.max(1)
}

/// Number of steps between household screening rounds.
#[must_use]
pub fn screening_interval(timestep: f64) -> usize {
    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
    let steps = (7.0 / timestep).round() as usize;
    steps.max(1)
}

/// The dates a run over `window` records, first day included.
#[must_use]
pub fn dates(window: DateWindow, timestep: f64) -> Vec<NaiveDate> {
    let step = Duration::days(step_days(timestep));
    let mut dates = Vec::new();
    let mut date = window.start;
    while date <= window.end {
        dates.push(date);
        match date.checked_add_signed(step) {
            Some(next) => date = next,
            None => break,
        }
    }
    dates
}

type StepCallback<'a> = Box<dyn FnMut(NaiveDate) + 'a>;

/// One run of the model over a date window with a fixed beta.
pub struct Simulation<'a> {
    parameters: &'a Parameters,
    beta: f64,
    window: DateWindow,
    on_step: Option<StepCallback<'a>>,
}

impl<'a> Simulation<'a> {
    #[must_use]
    pub fn new(parameters: &'a Parameters, beta: f64, window: DateWindow) -> Self {
        Simulation {
            parameters,
            beta,
            window,
            on_step: None,
        }
    }

    /// Calls `callback` with the date of every completed step.
    #[must_use]
    pub fn with_step_callback(mut self, callback: impl FnMut(NaiveDate) + 'a) -> Self {
        self.on_step = Some(Box::new(callback));
        self
    }

    /// Runs the model, mutating `population` in place.
    ///
    /// # Errors
    ///
    /// Returns `TbError::InvariantViolation` if the population's indices or counters become
    /// inconsistent.
    pub fn run<R: Rng + ?Sized>(
        &mut self,
        population: &mut Population,
        rng: &mut R,
    ) -> Result<SimulationOutput, TbError> {
        let dates = dates(self.window, self.parameters.timestep);
        let Some((&first, steps)) = dates.split_first() else {
            return Err(TbError::ConfigurationError(format!(
                "empty simulation window {} to {}",
                self.window.start, self.window.end
            )));
        };
        info!(
            "running {} to {} with beta {} ({} agents)",
            self.window.start,
            self.window.end,
            self.beta,
            population.len()
        );

        let mut summary = RunSummary {
            beta: self.beta,
            ..RunSummary::default()
        };
        let mut daily = Vec::with_capacity(dates.len());
        let mut weekly: IndexMap<(i32, u32), usize> = IndexMap::new();

        let counts = population.recompute_counters();
        daily.push(DailyRecord::new(first, counts, 0, 0));
        weekly.entry(week_key(first)).or_default();

        let interval = screening_interval(self.parameters.timestep);
        for (index, &date) in steps.iter().enumerate() {
            let record = self.step(population, date, index + 1, interval, &mut summary, rng)?;
            *weekly.entry(week_key(date)).or_default() += record.new_active_tb;
            daily.push(record);
            if let Some(on_step) = self.on_step.as_mut() {
                on_step(date);
            }
        }

        population.check_consistency()?;
        info!(
            "run finished: {} new infections ({} home, {} work, {} school), {} new active cases",
            summary.new_tbi(),
            summary.home_infections,
            summary.work_infections,
            summary.school_infections,
            summary.new_active_tb
        );

        let weekly = weekly
            .into_iter()
            .map(|((year, week), incidence)| WeeklyIncidence {
                year,
                week,
                incidence,
            })
            .collect();
        Ok(SimulationOutput {
            daily,
            weekly,
            summary,
        })
    }

    fn step<R: Rng + ?Sized>(
        &self,
        population: &mut Population,
        date: NaiveDate,
        index: usize,
        screening_interval: usize,
        summary: &mut RunSummary,
        rng: &mut R,
    ) -> Result<DailyRecord, TbError> {
        let parameters = self.parameters;
        let half = parameters.timestep / 2.0;

        let work = self.transmit(population, LocationType::Work, half, rng);
        let school = self.transmit(population, LocationType::School, half, rng);
        let home = self.transmit(population, LocationType::Home, half, rng);
        summary.work_infections += work;
        summary.school_infections += school;
        summary.home_infections += home;

        if index % screening_interval == 0 {
            screen_household_contacts(population, &parameters.disease, rng);
        }

        let active_before = DiseaseCounts::tally(population.agents()).active_tb;
        let mut died_on_treatment: Vec<AgentId> = Vec::new();
        for agent in population.agents_mut() {
            let transition = agent.advance_disease_state(parameters.timestep, &parameters.disease, rng);
            if transition == Transition::DiedOnTreatment {
                died_on_treatment.push(agent.id);
            }
        }
        let active_after = DiseaseCounts::tally(population.agents()).active_tb;
        let new_active_tb = active_after.saturating_sub(active_before);
        for id in &died_on_treatment {
            population.remove_agent(*id);
        }
        if !died_on_treatment.is_empty() {
            debug!("{date}: {} deaths on treatment", died_on_treatment.len());
        }
        summary.treatment_deaths += died_on_treatment.len();
        summary.new_active_tb += new_active_tb;

        let demographic = demographics::update(population, date, parameters.timestep, rng)?;
        summary.deaths += demographic.deaths;
        summary.births += demographic.births;
        if cfg!(debug_assertions) {
            population.check_consistency()?;
        }

        let counts = population.recompute_counters();
        Ok(DailyRecord::new(
            date,
            counts,
            work + school + home,
            new_active_tb,
        ))
    }

    fn transmit<R: Rng + ?Sized>(
        &self,
        population: &mut Population,
        kind: LocationType,
        timestep: f64,
        rng: &mut R,
    ) -> usize {
        population
            .group_ids(kind)
            .into_iter()
            .map(|id| {
                contacts(
                    population,
                    kind,
                    id,
                    timestep,
                    self.beta,
                    self.parameters.infection_factor,
                    rng,
                )
            })
            .sum()
    }
}

/// The (ISO year, ISO week) a date belongs to. Late-December days in week 1 count towards the
/// following year and early-January days in week 52 or 53 towards the previous one.
fn week_key(date: NaiveDate) -> (i32, u32) {
    let week = date.iso_week();
    (week.year(), week.week())
}
