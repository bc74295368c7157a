//! Aging, deaths and births.
//!
//! Every step ages the population. Deaths and births run once a week, on dates whose day number
//! is a multiple of seven, using annual rates per 1000 converted to a weekly probability.

use chrono::{Datelike, NaiveDate};
use log::{debug, trace, warn};
use rand::Rng;

use crate::agent::{Agent, AgentId, Gender};
use crate::error::TbError;
use crate::population::Population;

/// Youngest age at which agents can give birth.
pub const MIN_MATERNAL_AGE: f64 = 18.0;
/// Age at which agents stop giving birth.
pub const MAX_MATERNAL_AGE: f64 = 50.0;
/// Age at which children are enrolled in a school if they have none.
pub const SCHOOL_ENTRY_AGE: f64 = 4.0;

const WEEKS_PER_YEAR: f64 = 52.0;

/// What one call to `update` did.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DemographicSummary {
    pub deaths: usize,
    pub births: usize,
    pub enrolled: usize,
    /// Agents skipped because no rate could be found for them.
    pub skipped: usize,
}

/// Converts an annual rate per 1000 into the probability of the event within one week.
#[must_use]
pub fn weekly_probability(annual_rate_per_1000: f64) -> f64 {
    let annual = (annual_rate_per_1000 / 1000.0).clamp(0.0, 1.0);
    1.0 - (1.0 - annual).powf(1.0 / WEEKS_PER_YEAR)
}

/// Whether deaths and births run on this date.
#[must_use]
pub fn is_weekly_update(date: NaiveDate) -> bool {
    date.num_days_from_ce().rem_euclid(7) == 0
}

/// Ages every agent by `timestep` days, runs the weekly deaths and births when due, and
/// recomputes the counters.
///
/// Random draws, in order: school reassignment for children crossing the entry age, then one
/// draw per agent with a mortality rate, then one draw per eligible mother followed by the
/// newborn's sex draw for each birth.
///
/// # Errors
///
/// Returns `TbError::InvariantViolation` if the population indices cannot be updated.
pub fn update<R: Rng + ?Sized>(
    population: &mut Population,
    date: NaiveDate,
    timestep: f64,
    rng: &mut R,
) -> Result<DemographicSummary, TbError> {
    let mut summary = DemographicSummary {
        enrolled: age_population(population, timestep, rng)?,
        ..DemographicSummary::default()
    };

    if is_weekly_update(date) {
        let (deaths, skipped_deaths) = process_deaths(population, date.year(), rng);
        let (births, skipped_births) = process_births(population, date.year(), rng)?;
        summary.deaths = deaths;
        summary.births = births;
        summary.skipped = skipped_deaths + skipped_births;
        debug!("{date}: {deaths} deaths, {births} births");
    }

    population.recompute_counters();
    Ok(summary)
}

fn age_population<R: Rng + ?Sized>(
    population: &mut Population,
    timestep: f64,
    rng: &mut R,
) -> Result<usize, TbError> {
    let mut entering_school = Vec::new();
    for agent in population.agents_mut() {
        let before = agent.age;
        agent.age(timestep);
        if before < SCHOOL_ENTRY_AGE && agent.age >= SCHOOL_ENTRY_AGE && agent.school_id() == 0 {
            entering_school.push(agent.id);
        }
    }

    let mut enrolled = 0;
    for id in entering_school {
        if let Some(school_id) = population.reassign_school(id, rng)? {
            trace!("agent {id} enrolled in school {school_id}");
            enrolled += 1;
        }
    }
    Ok(enrolled)
}

/// Removes agents according to the mortality table row nearest to `year`. Returns the number of
/// deaths and the number of agents skipped because no rate was found.
pub fn process_deaths<R: Rng + ?Sized>(
    population: &mut Population,
    year: i32,
    rng: &mut R,
) -> (usize, usize) {
    let Some((table_year, row)) = population.tables().mortality.nearest(year) else {
        warn!("no mortality data; skipping deaths for {year}");
        return (0, population.len());
    };
    // The row is cloned so the population can be mutated while it is in use.
    let row = row.clone();
    trace!("mortality for {year} uses {table_year} rates");

    let mut dying: Vec<AgentId> = Vec::new();
    let mut skipped = 0;
    for agent in population.agents() {
        match row.rate(agent.gender, agent.age) {
            Ok(rate) => {
                if rng.random::<f64>() < weekly_probability(rate) {
                    dying.push(agent.id);
                }
            }
            Err(e) => {
                debug!("agent {} skipped for mortality: {e}", agent.id);
                skipped += 1;
            }
        }
    }
    if skipped > 0 {
        warn!("{skipped} agents had no mortality rate for {table_year} and were skipped");
    }

    for id in &dying {
        population.remove_agent(*id);
    }
    (dying.len(), skipped)
}

/// Adds newborns according to the fertility table row nearest to `year`. Returns the number of
/// births and the number of eligible mothers skipped because no rate was found.
///
/// # Errors
///
/// Returns `TbError::InvariantViolation` if a newborn cannot be added.
pub fn process_births<R: Rng + ?Sized>(
    population: &mut Population,
    year: i32,
    rng: &mut R,
) -> Result<(usize, usize), TbError> {
    let Some((table_year, row)) = population.tables().fertility.nearest(year) else {
        warn!("no fertility data; skipping births for {year}");
        return Ok((0, 0));
    };
    let row = row.clone();
    let female_probability = population.tables().sex_ratio.female_probability(year);
    trace!("fertility for {year} uses {table_year} rates");

    let mothers: Vec<(AgentId, f64, u32)> = population
        .agents()
        .filter(|agent| {
            agent.gender == Gender::Female
                && (MIN_MATERNAL_AGE..MAX_MATERNAL_AGE).contains(&agent.age)
        })
        .map(|agent| (agent.id, agent.age, agent.household_id()))
        .collect();

    let mut births = 0;
    let mut skipped = 0;
    for (mother, age, household_id) in mothers {
        let rate = match row.rate(age) {
            Ok(rate) => rate,
            Err(e) => {
                debug!("agent {mother} skipped for fertility: {e}");
                skipped += 1;
                continue;
            }
        };
        if rng.random::<f64>() >= weekly_probability(rate) {
            continue;
        }
        let gender = if rng.random::<f64>() < female_probability {
            Gender::Female
        } else {
            Gender::Male
        };
        let child = Agent::new(population.next_agent_id(), gender, 0.0, household_id, 0, 0);
        trace!("agent {mother} gave birth to {} in household {household_id}", child.id);
        population.add_agent(child)?;
        births += 1;
    }
    if skipped > 0 {
        warn!("{skipped} mothers had no fertility rate for {table_year} and were skipped");
    }
    Ok((births, skipped))
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::agent::{DiseaseState, LocationType};
    use crate::assert_almost_eq;
    use crate::tables::{DemographicTables, MORTALITY_AGE_GROUPS};
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    fn tables(death_rate: f64, birth_rate: f64) -> DemographicTables {
        let mut tables = DemographicTables::default();
        for bucket in 0..MORTALITY_AGE_GROUPS.len() {
            tables
                .mortality
                .insert(2020, bucket, Some(death_rate), Some(death_rate));
        }
        for bucket in 0..7 {
            tables.fertility.insert(2020, bucket, birth_rate);
        }
        tables.sex_ratio.insert(2020, 1000.0);
        tables
    }

    fn population(tables: DemographicTables) -> Population {
        let mut population = Population::new(Arc::new(tables));
        let agents = [
            Agent::new(AgentId(1), Gender::Female, 25.0, 1, 0, 0),
            Agent::new(AgentId(2), Gender::Male, 27.0, 1, 100, 0),
            Agent::new(AgentId(3), Gender::Female, 3.999, 1, 0, 0),
            Agent::new(AgentId(4), Gender::Female, 60.0, 2, 0, 0),
            Agent::new(AgentId(5), Gender::Male, 10.0, 2, 0, 200),
        ];
        for agent in agents {
            population.add_agent(agent).unwrap();
        }
        population.recompute_counters();
        population
    }

    #[test]
    fn weekly_probability_conversion() {
        assert_eq!(weekly_probability(0.0), 0.0);
        assert_almost_eq!(weekly_probability(1000.0), 1.0, 1e-12);
        assert_almost_eq!(
            weekly_probability(100.0),
            1.0 - 0.9_f64.powf(1.0 / 52.0),
            1e-12
        );
        // Compounded over a year the weekly probability gives back the annual rate.
        let weekly = weekly_probability(20.0);
        assert_almost_eq!(1.0 - (1.0 - weekly).powi(52), 0.02, 1e-12);
    }

    #[test]
    fn weekly_cadence() {
        // 2021-01-03 is day 737793 of the common era, a multiple of seven.
        let sunday = NaiveDate::from_ymd_opt(2021, 1, 3).unwrap();
        assert!(is_weekly_update(sunday));
        assert!(!is_weekly_update(sunday.succ_opt().unwrap()));
        assert!(is_weekly_update(NaiveDate::from_ymd_opt(2021, 1, 10).unwrap()));
    }

    #[test]
    fn certain_death_removes_everyone() {
        let mut rng = StdRng::seed_from_u64(1);
        let mut population = population(tables(1000.0, 0.0));
        let (deaths, skipped) = process_deaths(&mut population, 2021, &mut rng);
        assert_eq!(deaths, 5);
        assert_eq!(skipped, 0);
        assert!(population.is_empty());
        assert!(population
            .members(LocationType::Work, 100)
            .unwrap()
            .is_empty());
    }

    #[test]
    fn agents_without_a_rate_are_skipped() {
        let mut rng = StdRng::seed_from_u64(1);
        let mut tables = DemographicTables::default();
        for bucket in 0..MORTALITY_AGE_GROUPS.len() {
            tables.mortality.insert(2020, bucket, Some(1000.0), None);
        }
        let mut population = population(tables);
        let (deaths, skipped) = process_deaths(&mut population, 2020, &mut rng);
        assert_eq!(deaths, 2);
        assert_eq!(skipped, 3);
        assert!(population
            .agents()
            .all(|agent| agent.gender == Gender::Female));
    }

    #[test]
    fn no_mortality_data_kills_nobody() {
        let mut rng = StdRng::seed_from_u64(1);
        let mut population = population(DemographicTables::default());
        assert_eq!(process_deaths(&mut population, 2020, &mut rng).0, 0);
        assert_eq!(population.len(), 5);
    }

    #[test]
    fn certain_births_for_women_of_reproductive_age() {
        let mut rng = StdRng::seed_from_u64(1);
        let mut population = population(tables(0.0, 1000.0));
        let (births, skipped) = process_births(&mut population, 2020, &mut rng).unwrap();
        // Only agent 1 is a woman aged 18 to 50.
        assert_eq!(births, 1);
        assert_eq!(skipped, 0);
        let child = population.agent(AgentId(6)).unwrap();
        assert_eq!(child.age, 0.0);
        assert_eq!(child.household_id(), 1);
        assert_eq!(child.workplace_id(), 0);
        assert_eq!(child.school_id(), 0);
        assert_eq!(child.disease_state, DiseaseState::Susceptible);
        assert!(population
            .members(LocationType::Home, 1)
            .unwrap()
            .contains(&AgentId(6)));
        population.recompute_counters();
        assert_eq!(population.counts().susceptible, 6);
        population.check_consistency().unwrap();
    }

    #[test]
    fn newborn_ids_continue_after_the_dead() {
        let mut rng = StdRng::seed_from_u64(1);
        let mut population = population(tables(0.0, 1000.0));
        population.remove_agent(AgentId(5));
        process_births(&mut population, 2020, &mut rng).unwrap();
        assert!(population.agent(AgentId(6)).is_some());
        assert!(population.agent(AgentId(5)).is_none());
    }

    #[test]
    fn update_ages_and_enrolls_new_pupils() {
        let mut rng = StdRng::seed_from_u64(1);
        let mut population = population(tables(0.0, 0.0));
        let not_weekly = NaiveDate::from_ymd_opt(2021, 1, 4).unwrap();
        let summary = update(&mut population, not_weekly, 1.0, &mut rng).unwrap();
        assert_eq!(summary.enrolled, 1);
        assert_eq!(summary.deaths + summary.births, 0);
        let pupil = population.agent(AgentId(3)).unwrap();
        assert!(pupil.age >= SCHOOL_ENTRY_AGE);
        assert_eq!(pupil.school_id(), 200);
        assert_almost_eq!(
            population.agent(AgentId(1)).unwrap().age,
            25.0 + 1.0 / 365.0,
            1e-12
        );
        population.check_consistency().unwrap();
    }

    #[test]
    fn update_runs_weekly_processes_on_schedule() {
        let mut rng = StdRng::seed_from_u64(1);
        let mut population = population(tables(1000.0, 0.0));
        let not_weekly = NaiveDate::from_ymd_opt(2021, 1, 4).unwrap();
        update(&mut population, not_weekly, 1.0, &mut rng).unwrap();
        assert_eq!(population.len(), 5);

        let weekly = NaiveDate::from_ymd_opt(2021, 1, 10).unwrap();
        let summary = update(&mut population, weekly, 1.0, &mut rng).unwrap();
        assert_eq!(summary.deaths, 5);
        assert_eq!(population.counts().total(), 0);
    }
}
