//! The `Population` owns every `Agent` and the three location indices (household, workplace,
//! school) that group agents for transmission.
//!
//! All containers preserve insertion order. Random draws are consumed while iterating over them,
//! so iteration order is part of what makes a seeded run reproducible.
//!
//! An agent's location ids and the indices are only changed together, through `add_agent`,
//! `remove_agent`, `reassign_workplace` and `reassign_school`. The disease-state counters are a
//! cache: call `recompute_counters` after a batch of mutations.

use std::sync::Arc;

use indexmap::{IndexMap, IndexSet};
use log::{debug, info, trace};
use rand::seq::SliceRandom;
use rand::Rng;
use rand_distr::{Distribution, Uniform};
use serde::Serialize;

use crate::agent::{
    Agent, AgentId, DiseaseState, Gender, HouseholdId, LocationType, SchoolId, WorkplaceId,
    DAYS_PER_YEAR, NOTIFICATION_DELAY_DAYS,
};
use crate::data::PopulationRecord;
use crate::error::TbError;
use crate::parameters::PopulationParameters;
use crate::tables::DemographicTables;

/// Upper bound, in years, of the time since infection drawn for initial latent infections.
pub const MAX_INITIAL_TBI_YEARS: f64 = 12.0;
pub const WORKING_AGE_MIN: f64 = 18.0;
pub const WORKING_AGE_MAX: f64 = 65.0;

pub type Members = IndexSet<AgentId>;

/// Number of living agents in each disease state.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct DiseaseCounts {
    pub susceptible: usize,
    pub tbi: usize,
    pub active_tb: usize,
    pub treatment: usize,
}

impl DiseaseCounts {
    /// Tallies the disease states of the given agents.
    pub fn tally<'a>(agents: impl IntoIterator<Item = &'a Agent>) -> Self {
        let mut counts = DiseaseCounts::default();
        for agent in agents {
            match agent.disease_state {
                DiseaseState::Susceptible => counts.susceptible += 1,
                DiseaseState::TBI => counts.tbi += 1,
                DiseaseState::ActiveTB => counts.active_tb += 1,
                DiseaseState::Treatment => counts.treatment += 1,
            }
        }
        counts
    }

    #[must_use]
    pub fn get(&self, state: DiseaseState) -> usize {
        match state {
            DiseaseState::Susceptible => self.susceptible,
            DiseaseState::TBI => self.tbi,
            DiseaseState::ActiveTB => self.active_tb,
            DiseaseState::Treatment => self.treatment,
        }
    }

    #[must_use]
    pub fn total(&self) -> usize {
        self.susceptible + self.tbi + self.active_tb + self.treatment
    }
}

#[derive(Debug, Clone)]
pub struct Population {
    agents: IndexMap<AgentId, Agent>,
    households: IndexMap<HouseholdId, Members>,
    workplaces: IndexMap<WorkplaceId, Members>,
    schools: IndexMap<SchoolId, Members>,
    known_workplaces: IndexSet<WorkplaceId>,
    known_schools: IndexSet<SchoolId>,
    tables: Arc<DemographicTables>,
    counts: DiseaseCounts,
    /// Highest id ever held by an agent, so that ids are never reused after a death.
    max_id: Option<AgentId>,
}

impl Population {
    /// Creates an empty population.
    #[must_use]
    pub fn new(tables: Arc<DemographicTables>) -> Self {
        Population {
            agents: IndexMap::new(),
            households: IndexMap::new(),
            workplaces: IndexMap::new(),
            schools: IndexMap::new(),
            known_workplaces: IndexSet::new(),
            known_schools: IndexSet::new(),
            tables,
            counts: DiseaseCounts::default(),
            max_id: None,
        }
    }

    /// Builds the population from the synthetic input rows.
    ///
    /// Random draws, in order: one shuffle of the initial disease-state array, then for each row
    /// in input order the work-force draw (working-age adults with a workplace only) and the
    /// time-since-infection or time-since-onset draw (latent and active agents only).
    ///
    /// # Errors
    ///
    /// Returns `TbError::InvariantViolation` if two rows share an agent id.
    pub fn load<R: Rng + ?Sized>(
        records: &[PopulationRecord],
        parameters: &PopulationParameters,
        tables: Arc<DemographicTables>,
        rng: &mut R,
    ) -> Result<Population, TbError> {
        let mut population = Population::new(tables);
        for record in records {
            if record.workplace_id != 0 {
                population.known_workplaces.insert(record.workplace_id);
            }
            if record.school_id != 0 {
                population.known_schools.insert(record.school_id);
            }
        }

        let mut initial_states = initial_disease_states(records.len(), parameters);
        initial_states.shuffle(rng);

        let tbi_time = Uniform::new_inclusive(0.0, MAX_INITIAL_TBI_YEARS * DAYS_PER_YEAR)
            .map_err(|e| TbError::InvariantViolation(e.to_string()))?;
        let active_time = Uniform::new_inclusive(0.0, NOTIFICATION_DELAY_DAYS)
            .map_err(|e| TbError::InvariantViolation(e.to_string()))?;

        let mut demoted = 0;
        for (record, state) in records.iter().zip(initial_states) {
            let mut workplace_id = record.workplace_id;
            if workplace_id != 0 && (WORKING_AGE_MIN..WORKING_AGE_MAX).contains(&record.age) {
                let working_percentage = match record.gender {
                    Gender::Male => parameters.men_working_percentage,
                    Gender::Female => parameters.women_working_percentage,
                };
                if rng.random::<f64>() >= working_percentage / 100.0 {
                    workplace_id = 0;
                    demoted += 1;
                }
            }

            let mut agent = Agent::new(
                AgentId(record.agent_id),
                record.gender,
                record.age,
                record.household_id,
                workplace_id,
                record.school_id,
            );
            agent.disease_state = state;
            match state {
                DiseaseState::TBI => agent.tbi_time = tbi_time.sample(rng),
                DiseaseState::ActiveTB => {
                    agent.active_time = active_time.sample(rng);
                    agent.infectious = true;
                }
                DiseaseState::Susceptible | DiseaseState::Treatment => {}
            }
            population.add_agent(agent)?;
        }

        let counts = population.recompute_counters();
        info!(
            "population loaded: {} agents in {} households, {} workplaces, {} schools",
            population.len(),
            population.households.len(),
            population.known_workplaces.len(),
            population.known_schools.len()
        );
        debug!(
            "initial states {:?}; {} working-age adults without work",
            counts, demoted
        );
        Ok(population)
    }

    /// Inserts an agent and indexes it by its household and, if nonzero, workplace and school.
    /// Its workplace and school become known locations for later reassignment.
    ///
    /// # Errors
    ///
    /// Returns `TbError::InvariantViolation` if an agent with the same id already exists.
    pub fn add_agent(&mut self, agent: Agent) -> Result<(), TbError> {
        let id = agent.id;
        if self.agents.contains_key(&id) {
            return Err(TbError::InvariantViolation(format!(
                "agent {id} already exists"
            )));
        }
        self.households
            .entry(agent.household_id())
            .or_default()
            .insert(id);
        if agent.workplace_id() != 0 {
            self.known_workplaces.insert(agent.workplace_id());
            self.workplaces
                .entry(agent.workplace_id())
                .or_default()
                .insert(id);
        }
        if agent.school_id() != 0 {
            self.known_schools.insert(agent.school_id());
            self.schools.entry(agent.school_id()).or_default().insert(id);
        }
        self.agents.insert(id, agent);
        if self.max_id.is_none_or(|max_id| id > max_id) {
            self.max_id = Some(id);
        }
        Ok(())
    }

    /// Removes an agent and its entries in every location index. Removing an absent id does
    /// nothing and returns `None`.
    pub fn remove_agent(&mut self, id: AgentId) -> Option<Agent> {
        let agent = self.agents.shift_remove(&id)?;
        detach(&mut self.households, agent.household_id(), id);
        detach(&mut self.workplaces, agent.workplace_id(), id);
        detach(&mut self.schools, agent.school_id(), id);
        trace!("removed agent {id}");
        Some(agent)
    }

    /// Moves an agent to a uniformly random known workplace. Returns the new workplace, or
    /// `None` if no workplaces are known.
    ///
    /// # Errors
    ///
    /// Returns `TbError::InvariantViolation` if the agent does not exist.
    pub fn reassign_workplace<R: Rng + ?Sized>(
        &mut self,
        id: AgentId,
        rng: &mut R,
    ) -> Result<Option<WorkplaceId>, TbError> {
        let Some(agent) = self.agents.get_mut(&id) else {
            return Err(TbError::InvariantViolation(format!(
                "cannot reassign workplace of missing agent {id}"
            )));
        };
        let Some(&workplace_id) = choose(&self.known_workplaces, rng) else {
            return Ok(None);
        };
        detach(&mut self.workplaces, agent.workplace_id(), id);
        agent.set_workplace_id(workplace_id);
        self.workplaces.entry(workplace_id).or_default().insert(id);
        Ok(Some(workplace_id))
    }

    /// Moves an agent to a uniformly random known school. Returns the new school, or `None` if
    /// no schools are known.
    ///
    /// # Errors
    ///
    /// Returns `TbError::InvariantViolation` if the agent does not exist.
    pub fn reassign_school<R: Rng + ?Sized>(
        &mut self,
        id: AgentId,
        rng: &mut R,
    ) -> Result<Option<SchoolId>, TbError> {
        let Some(agent) = self.agents.get_mut(&id) else {
            return Err(TbError::InvariantViolation(format!(
                "cannot reassign school of missing agent {id}"
            )));
        };
        let Some(&school_id) = choose(&self.known_schools, rng) else {
            return Ok(None);
        };
        detach(&mut self.schools, agent.school_id(), id);
        agent.set_school_id(school_id);
        self.schools.entry(school_id).or_default().insert(id);
        Ok(Some(school_id))
    }

    /// Re-tallies the disease-state counters from the living agents.
    pub fn recompute_counters(&mut self) -> DiseaseCounts {
        self.counts = DiseaseCounts::tally(self.agents.values());
        self.counts
    }

    /// The counters as of the last `recompute_counters`.
    #[must_use]
    pub fn counts(&self) -> DiseaseCounts {
        self.counts
    }

    /// The id the next newborn will get.
    #[must_use]
    pub fn next_agent_id(&self) -> AgentId {
        self.max_id.map_or(AgentId(1), AgentId::next)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.agents.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.agents.is_empty()
    }

    #[must_use]
    pub fn agent(&self, id: AgentId) -> Option<&Agent> {
        self.agents.get(&id)
    }

    pub fn agent_mut(&mut self, id: AgentId) -> Option<&mut Agent> {
        self.agents.get_mut(&id)
    }

    /// Agents in insertion order.
    pub fn agents(&self) -> impl Iterator<Item = &Agent> {
        self.agents.values()
    }

    /// Agents in insertion order, mutably. Location ids cannot be changed through this.
    pub fn agents_mut(&mut self) -> impl Iterator<Item = &mut Agent> {
        self.agents.values_mut()
    }

    /// Ids of all living agents in insertion order.
    #[must_use]
    pub fn agent_ids(&self) -> Vec<AgentId> {
        self.agents.keys().copied().collect()
    }

    #[must_use]
    pub fn tables(&self) -> &DemographicTables {
        &self.tables
    }

    #[must_use]
    pub fn known_workplaces(&self) -> &IndexSet<WorkplaceId> {
        &self.known_workplaces
    }

    #[must_use]
    pub fn known_schools(&self) -> &IndexSet<SchoolId> {
        &self.known_schools
    }

    fn index(&self, kind: LocationType) -> &IndexMap<u32, Members> {
        match kind {
            LocationType::Home => &self.households,
            LocationType::Work => &self.workplaces,
            LocationType::School => &self.schools,
        }
    }

    /// Members of one location, in the order they joined it.
    #[must_use]
    pub fn members(&self, kind: LocationType, id: u32) -> Option<&Members> {
        self.index(kind).get(&id)
    }

    /// Ids of every group of the given kind, in the order the groups were first seen.
    #[must_use]
    pub fn group_ids(&self, kind: LocationType) -> Vec<u32> {
        self.index(kind).keys().copied().collect()
    }

    /// The members of one location together with mutable access to the agents.
    pub(crate) fn group_mut(
        &mut self,
        kind: LocationType,
        id: u32,
    ) -> Option<(&Members, &mut IndexMap<AgentId, Agent>)> {
        let index = match kind {
            LocationType::Home => &self.households,
            LocationType::Work => &self.workplaces,
            LocationType::School => &self.schools,
        };
        index.get(&id).map(|members| (members, &mut self.agents))
    }

    /// Verifies that every agent is indexed under its location ids, that every indexed id is a
    /// living agent with matching location ids, and that the counters match a fresh tally.
    ///
    /// # Errors
    ///
    /// Returns `TbError::InvariantViolation` describing the first inconsistency found.
    pub fn check_consistency(&self) -> Result<(), TbError> {
        for agent in self.agents.values() {
            let memberships = [
                (LocationType::Home, agent.household_id()),
                (LocationType::Work, agent.workplace_id()),
                (LocationType::School, agent.school_id()),
            ];
            for (kind, location_id) in memberships {
                if location_id == 0 && kind != LocationType::Home {
                    continue;
                }
                if !self
                    .members(kind, location_id)
                    .is_some_and(|members| members.contains(&agent.id))
                {
                    return Err(TbError::InvariantViolation(format!(
                        "agent {} missing from {kind:?} index {location_id}",
                        agent.id
                    )));
                }
            }
        }
        for kind in [LocationType::Home, LocationType::Work, LocationType::School] {
            for (&location_id, members) in self.index(kind) {
                for id in members {
                    let Some(agent) = self.agents.get(id) else {
                        return Err(TbError::InvariantViolation(format!(
                            "{kind:?} index {location_id} lists missing agent {id}"
                        )));
                    };
                    let agent_location = match kind {
                        LocationType::Home => agent.household_id(),
                        LocationType::Work => agent.workplace_id(),
                        LocationType::School => agent.school_id(),
                    };
                    if agent_location != location_id {
                        return Err(TbError::InvariantViolation(format!(
                            "{kind:?} index {location_id} lists agent {id} whose id is {agent_location}"
                        )));
                    }
                }
            }
        }
        let tally = DiseaseCounts::tally(self.agents.values());
        if tally != self.counts {
            return Err(TbError::InvariantViolation(format!(
                "counters {:?} do not match tally {:?}",
                self.counts, tally
            )));
        }
        Ok(())
    }
}

fn detach(index: &mut IndexMap<u32, Members>, location_id: u32, id: AgentId) {
    if location_id == 0 {
        return;
    }
    if let Some(members) = index.get_mut(&location_id) {
        members.shift_remove(&id);
    }
}

fn choose<'a, R: Rng + ?Sized>(ids: &'a IndexSet<u32>, rng: &mut R) -> Option<&'a u32> {
    if ids.is_empty() {
        return None;
    }
    ids.get_index(rng.random_range(0..ids.len()))
}

/// The unshuffled initial disease states: latent infections, then active cases, then
/// susceptibles, sized by the configured percentages of `n`.
fn initial_disease_states(n: usize, parameters: &PopulationParameters) -> Vec<DiseaseState> {
    #[allow(
        clippy::cast_precision_loss,
        clippy::cast_possible_truncation,
        clippy::cast_sign_loss
    )]
    let share = |percentage: f64| ((n as f64) * percentage / 100.0).round() as usize;
    let tbi = share(parameters.initial_tbi_percentage).min(n);
    let active = share(parameters.initial_active_tbi_percentage).min(n - tbi);

    let mut states = Vec::with_capacity(n);
    states.resize(tbi, DiseaseState::TBI);
    states.resize(tbi + active, DiseaseState::ActiveTB);
    states.resize(n, DiseaseState::Susceptible);
    states
}
