//! Contact-based transmission within one location group.
//!
//! Everyone present at a location mixes with everyone else: the per-susceptible infection
//! probability is the infectious share of those present scaled by `beta` and the length of the
//! contact period. Workplaces and schools meet in the morning and households in the afternoon, so
//! a member of a workplace or school index who spends the morning elsewhere is not present.

use log::trace;
use rand::Rng;

use crate::agent::{DiseaseState, Location, LocationType, Period};
use crate::population::Population;

/// Infection probability for one susceptible in a group of `occupants` with `infectious` cases.
/// Workplaces and schools are scaled by `infection_factor`; households are not.
#[must_use]
pub fn infection_probability(
    kind: LocationType,
    infectious: usize,
    occupants: usize,
    timestep: f64,
    beta: f64,
    infection_factor: f64,
) -> f64 {
    if infectious == 0 || occupants == 0 {
        return 0.0;
    }
    #[allow(clippy::cast_precision_loss)]
    let share = infectious as f64 / occupants as f64;
    let factor = match kind {
        LocationType::Home => 1.0,
        LocationType::Work | LocationType::School => infection_factor,
    };
    (share * beta * timestep * factor).min(1.0)
}

/// Runs one contact period at a single location and returns the number of new infections.
///
/// Only members whose `location` for the contact period is this location take part, in both the
/// infectious count and the denominator. One uniform draw is consumed per susceptible occupant
/// present, in membership order, and only when at least one infectious occupant is present.
pub fn contacts<R: Rng + ?Sized>(
    population: &mut Population,
    kind: LocationType,
    location_id: u32,
    timestep: f64,
    beta: f64,
    infection_factor: f64,
    rng: &mut R,
) -> usize {
    let Some((members, agents)) = population.group_mut(kind, location_id) else {
        return 0;
    };
    let here = Location::new(kind, location_id);
    let period = contact_period(kind);
    let present: Vec<_> = members
        .iter()
        .copied()
        .filter(|id| {
            agents
                .get(id)
                .is_some_and(|agent| agent.location(period) == here)
        })
        .collect();
    if present.is_empty() {
        return 0;
    }

    let infectious = present
        .iter()
        .filter(|id| agents.get(*id).is_some_and(|agent| agent.is_infectious()))
        .count();
    let probability = infection_probability(
        kind,
        infectious,
        present.len(),
        timestep,
        beta,
        infection_factor,
    );
    if probability == 0.0 {
        return 0;
    }

    let mut new_infections = 0;
    for id in &present {
        let Some(agent) = agents.get_mut(id) else {
            continue;
        };
        if agent.disease_state == DiseaseState::Susceptible && rng.random::<f64>() < probability {
            agent.infect();
            new_infections += 1;
        }
    }
    if new_infections > 0 {
        trace!(
            "{new_infections} new infections at {kind:?} {location_id} ({infectious}/{} infectious, p={probability:.4})",
            present.len()
        );
    }
    new_infections
}

/// The half of the day contacts at a kind of location happen in.
#[must_use]
pub fn contact_period(kind: LocationType) -> Period {
    match kind {
        LocationType::Home => Period::Afternoon,
        LocationType::Work | LocationType::School => Period::Morning,
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::agent::{Agent, AgentId, Gender};
    use crate::assert_almost_eq;
    use crate::tables::DemographicTables;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    fn workplace_of(n: u32, infectious: u32) -> Population {
        let mut population = Population::new(Arc::new(DemographicTables::default()));
        for i in 1..=n {
            let mut agent = Agent::new(AgentId(i), Gender::Male, 30.0, i, 100, 0);
            if i <= infectious {
                agent.disease_state = DiseaseState::ActiveTB;
                agent.infectious = true;
            }
            population.add_agent(agent).unwrap();
        }
        population.recompute_counters();
        population
    }

    #[test]
    fn probability_uses_factor_only_away_from_home() {
        assert_almost_eq!(
            infection_probability(LocationType::Home, 1, 4, 0.5, 0.4, 2.0),
            0.05,
            1e-12
        );
        assert_almost_eq!(
            infection_probability(LocationType::Work, 1, 4, 0.5, 0.4, 2.0),
            0.1,
            1e-12
        );
        assert_almost_eq!(
            infection_probability(LocationType::School, 1, 4, 0.5, 0.4, 2.0),
            0.1,
            1e-12
        );
    }

    #[test]
    fn probability_is_capped_at_one() {
        assert_eq!(
            infection_probability(LocationType::Work, 3, 4, 1.0, 10.0, 5.0),
            1.0
        );
        assert_eq!(infection_probability(LocationType::Home, 0, 4, 1.0, 10.0, 1.0), 0.0);
    }

    #[test]
    fn no_infections_without_infectious_occupants() {
        for seed in 0..20 {
            let mut rng = StdRng::seed_from_u64(seed);
            let mut population = workplace_of(50, 0);
            let infected = contacts(
                &mut population,
                LocationType::Work,
                100,
                1.0,
                1000.0,
                10.0,
                &mut rng,
            );
            assert_eq!(infected, 0);
            assert!(population
                .agents()
                .all(|agent| agent.disease_state == DiseaseState::Susceptible));
        }
    }

    #[test]
    fn treated_cases_stop_transmitting_after_two_weeks() {
        let mut rng = StdRng::seed_from_u64(8);
        let mut population = workplace_of(10, 1);
        let case = population.agent_mut(AgentId(1)).unwrap();
        case.disease_state = DiseaseState::Treatment;
        case.treatment_time = 14.0;
        let infected = contacts(
            &mut population,
            LocationType::Work,
            100,
            1.0,
            1000.0,
            1.0,
            &mut rng,
        );
        assert_eq!(infected, 0);
    }

    #[test]
    fn certain_infection_infects_every_susceptible() {
        let mut rng = StdRng::seed_from_u64(8);
        let mut population = workplace_of(10, 2);
        let infected = contacts(
            &mut population,
            LocationType::Work,
            100,
            1.0,
            100.0,
            1.0,
            &mut rng,
        );
        assert_eq!(infected, 8);
        population.recompute_counters();
        assert_eq!(population.counts().tbi, 8);
        assert_eq!(population.counts().active_tb, 2);
        for agent in population.agents().skip(2) {
            assert_eq!(agent.disease_state, DiseaseState::TBI);
            assert_eq!(agent.tbi_time, 0.0);
        }
    }

    #[test]
    fn elders_with_a_workplace_are_not_exposed_at_work() {
        let mut population = workplace_of(2, 1);
        let elder = Agent::new(AgentId(3), Gender::Female, 70.0, 3, 100, 0);
        population.add_agent(elder).unwrap();
        for seed in 0..20 {
            let mut rng = StdRng::seed_from_u64(seed);
            contacts(
                &mut population,
                LocationType::Work,
                100,
                1.0,
                1000.0,
                1.0,
                &mut rng,
            );
            assert_eq!(
                population.agent(AgentId(3)).unwrap().disease_state,
                DiseaseState::Susceptible
            );
        }
        assert_eq!(
            population.agent(AgentId(2)).unwrap().disease_state,
            DiseaseState::TBI
        );
    }

    #[test]
    fn absent_members_do_not_dilute_the_infectious_share() {
        // One infectious worker and one susceptible worker, plus two retirees still indexed.
        let mut population = workplace_of(2, 1);
        for id in 3..=4 {
            let retiree = Agent::new(AgentId(id), Gender::Male, 80.0, id, 100, 0);
            population.add_agent(retiree).unwrap();
        }
        // Share 1/2 with beta 2 and a one-day step gives certain infection; 1/4 would not.
        let mut rng = StdRng::seed_from_u64(5);
        let infected = contacts(
            &mut population,
            LocationType::Work,
            100,
            1.0,
            2.0,
            1.0,
            &mut rng,
        );
        assert_eq!(infected, 1);
    }

    #[test]
    fn children_with_a_school_are_exposed_only_at_school() {
        let mut population = Population::new(Arc::new(DemographicTables::default()));
        let mut worker = Agent::new(AgentId(1), Gender::Male, 30.0, 1, 100, 0);
        worker.disease_state = DiseaseState::ActiveTB;
        worker.infectious = true;
        population.add_agent(worker).unwrap();
        population
            .add_agent(Agent::new(AgentId(2), Gender::Female, 10.0, 2, 100, 200))
            .unwrap();
        let mut rng = StdRng::seed_from_u64(2);
        assert_eq!(
            contacts(&mut population, LocationType::Work, 100, 1.0, 1000.0, 1.0, &mut rng),
            0
        );
        assert_eq!(
            population.agent(AgentId(2)).unwrap().disease_state,
            DiseaseState::Susceptible
        );
    }

    #[test]
    fn households_meet_in_the_afternoon() {
        assert_eq!(contact_period(LocationType::Home), Period::Afternoon);
        assert_eq!(contact_period(LocationType::Work), Period::Morning);
        assert_eq!(contact_period(LocationType::School), Period::Morning);
    }

    #[test]
    fn unknown_or_empty_locations_infect_nobody() {
        let mut rng = StdRng::seed_from_u64(8);
        let mut population = workplace_of(4, 1);
        assert_eq!(
            contacts(&mut population, LocationType::School, 7, 1.0, 1.0, 1.0, &mut rng),
            0
        );
        for id in 1..=4 {
            population.remove_agent(AgentId(id));
        }
        assert_eq!(
            contacts(&mut population, LocationType::Work, 100, 1.0, 1.0, 1.0, &mut rng),
            0
        );
    }
}
