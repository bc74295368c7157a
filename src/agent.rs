//! An `Agent` is one member of the synthetic population: demographic attributes, the three
//! location memberships that decide whom it meets, and the tuberculosis natural-history state
//! that evolves one timestep at a time.
//!
//! Disease progression is a tagged `DiseaseState` with an explicit transition function,
//! `advance_disease_state`. The `infectious`, `screened` and `on_tpt` flags are orthogonal to the
//! state and live beside it. All randomness comes from the generator passed in by the caller, and
//! draws are consumed in a fixed order so that a seeded run is reproducible.
//!
//! Location ids are private to this module. They can only be changed through `Population`, which
//! keeps the location indices in sync.

use std::fmt;

use log::trace;
use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::parameters::DiseaseParameters;

pub type HouseholdId = u32;
pub type WorkplaceId = u32;
pub type SchoolId = u32;

/// Days in a year for every age and time-since-infection conversion.
pub const DAYS_PER_YEAR: f64 = 365.0;
/// Days on treatment after which a case is no longer transmissible.
pub const INFECTIOUS_TREATMENT_DAYS: f64 = 14.0;
/// Length of a full course of treatment, in days.
pub const TREATMENT_DURATION_DAYS: f64 = 180.0;
/// Length of a full course of preventive therapy, in days.
pub const TPT_DURATION_DAYS: f64 = 180.0;
/// Days of active disease before a case can be notified.
pub const NOTIFICATION_DELAY_DAYS: f64 = 78.0;
/// Chance that an eligible active case is notified on a given step.
pub const NOTIFICATION_PROBABILITY: f64 = 0.5;
/// Fraction of latent infections that ever progress to active disease.
pub const LIFETIME_PROGRESSION_PROBABILITY: f64 = 0.10;

/// Cumulative share of eventual progressors that have progressed by the end of each band, keyed
/// by the band's upper bound in years since infection.
const PROGRESSION_BANDS: [(f64, f64); 5] = [
    (1.0, 0.45),
    (2.0, 0.62),
    (5.0, 0.83),
    (12.0, 0.99),
    (f64::INFINITY, 1.0),
];

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct AgentId(pub u32);

impl AgentId {
    /// The id following this one.
    #[must_use]
    pub fn next(self) -> AgentId {
        AgentId(self.0 + 1)
    }
}

impl fmt::Display for AgentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Gender {
    Male,
    Female,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DiseaseState {
    Susceptible,
    TBI,
    ActiveTB,
    Treatment,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LocationType {
    Home,
    Work,
    School,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Period {
    Morning,
    Afternoon,
}

/// A place an agent can be found: the kind of setting and its id.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Location {
    pub kind: LocationType,
    pub id: u32,
}

impl Location {
    #[must_use]
    pub fn new(kind: LocationType, id: u32) -> Self {
        Location { kind, id }
    }
}

/// What happened to an agent during one call to `advance_disease_state`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transition {
    None,
    /// Preventive therapy finished and cleared the latent infection.
    TptCured,
    /// Preventive therapy finished without clearing the infection.
    TptCompleted,
    ProgressedToActive,
    Notified,
    /// No longer transmissible after two weeks on treatment.
    BecameNonInfectious,
    Cured,
    /// Died at the end of treatment. The agent is left in `Treatment`; the caller removes it.
    DiedOnTreatment,
    TreatmentFailed,
}

/// Outcome of screening one agent.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScreeningResult {
    AlreadyScreened,
    /// Screened, but nothing was detected or there was nothing to detect.
    Negative,
    TptStarted,
    /// Latent infection detected but preventive therapy was not taken up.
    TptDeclined,
    TreatmentStarted,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Agent {
    pub id: AgentId,
    pub gender: Gender,
    /// Years, fractional.
    pub age: f64,
    household_id: HouseholdId,
    workplace_id: WorkplaceId,
    school_id: SchoolId,
    pub disease_state: DiseaseState,
    /// Days since latent infection.
    pub tbi_time: f64,
    /// Days since onset of active disease.
    pub active_time: f64,
    /// Days on the current course of treatment.
    pub treatment_time: f64,
    /// `active_time` at notification; zero means not notified.
    pub treatment_notification_time: f64,
    pub infectious: bool,
    pub screened: bool,
    pub on_tpt: bool,
    pub tpt_time: f64,
}

impl Agent {
    /// Creates a susceptible agent. A `workplace_id` or `school_id` of 0 means none.
    #[must_use]
    pub fn new(
        id: AgentId,
        gender: Gender,
        age: f64,
        household_id: HouseholdId,
        workplace_id: WorkplaceId,
        school_id: SchoolId,
    ) -> Self {
        Agent {
            id,
            gender,
            age,
            household_id,
            workplace_id,
            school_id,
            disease_state: DiseaseState::Susceptible,
            tbi_time: 0.0,
            active_time: 0.0,
            treatment_time: 0.0,
            treatment_notification_time: 0.0,
            infectious: false,
            screened: false,
            on_tpt: false,
            tpt_time: 0.0,
        }
    }

    #[must_use]
    pub fn household_id(&self) -> HouseholdId {
        self.household_id
    }

    #[must_use]
    pub fn workplace_id(&self) -> WorkplaceId {
        self.workplace_id
    }

    #[must_use]
    pub fn school_id(&self) -> SchoolId {
        self.school_id
    }

    pub(crate) fn set_workplace_id(&mut self, workplace_id: WorkplaceId) {
        self.workplace_id = workplace_id;
    }

    pub(crate) fn set_school_id(&mut self, school_id: SchoolId) {
        self.school_id = school_id;
    }

    /// Whether the agent can currently infect others: active disease, or fewer than two weeks of
    /// treatment, with the infectious flag still set.
    #[must_use]
    pub fn is_infectious(&self) -> bool {
        let state_allows = match self.disease_state {
            DiseaseState::ActiveTB => true,
            DiseaseState::Treatment => self.treatment_time < INFECTIOUS_TREATMENT_DAYS,
            DiseaseState::Susceptible | DiseaseState::TBI => false,
        };
        state_allows && self.infectious
    }

    /// Marks a susceptible agent as newly infected.
    pub fn infect(&mut self) {
        debug_assert_eq!(self.disease_state, DiseaseState::Susceptible);
        self.disease_state = DiseaseState::TBI;
        self.tbi_time = 0.0;
    }

    /// Where the agent spends the given half of the day.
    #[must_use]
    pub fn location(&self, period: Period) -> Location {
        let home = Location::new(LocationType::Home, self.household_id);
        if self.age < 4.0 || self.age >= 65.0 {
            return home;
        }
        let away = if self.age < 18.0 && self.school_id != 0 {
            Location::new(LocationType::School, self.school_id)
        } else if self.workplace_id != 0 {
            Location::new(LocationType::Work, self.workplace_id)
        } else {
            return home;
        };
        match period {
            Period::Morning => away,
            Period::Afternoon => home,
        }
    }

    /// Ages the agent by `days`.
    pub fn age(&mut self, days: f64) {
        self.age += days / DAYS_PER_YEAR;
    }

    /// Advances the agent's disease state by one timestep of `timestep` days.
    ///
    /// Random draws, in order and only when reached: TPT efficacy (TBI finishing TPT),
    /// lifetime-progressor draw then band draw (TBI), notification coin (ActiveTB past the
    /// notification delay), treatment outcome (Treatment at the end of the course).
    pub fn advance_disease_state<R: Rng + ?Sized>(
        &mut self,
        timestep: f64,
        params: &DiseaseParameters,
        rng: &mut R,
    ) -> Transition {
        match self.disease_state {
            DiseaseState::Susceptible => {}
            DiseaseState::TBI => self.tbi_time += timestep,
            DiseaseState::ActiveTB => self.active_time += timestep,
            DiseaseState::Treatment => self.treatment_time += timestep,
        }
        if self.on_tpt {
            self.tpt_time += timestep;
        }

        match self.disease_state {
            DiseaseState::Susceptible => Transition::None,
            DiseaseState::TBI => self.advance_latent(params, rng),
            DiseaseState::ActiveTB => self.advance_active(rng),
            DiseaseState::Treatment => self.advance_treatment(params, rng),
        }
    }

    fn advance_latent<R: Rng + ?Sized>(
        &mut self,
        params: &DiseaseParameters,
        rng: &mut R,
    ) -> Transition {
        let mut transition = Transition::None;
        if self.on_tpt && self.tpt_time >= TPT_DURATION_DAYS {
            self.on_tpt = false;
            if rng.random::<f64>() < params.tpt_efficacy {
                trace!("agent {} cleared latent infection after TPT", self.id);
                self.disease_state = DiseaseState::Susceptible;
                self.tbi_time = 0.0;
                return Transition::TptCured;
            }
            transition = Transition::TptCompleted;
        }

        if rng.random::<f64>() <= LIFETIME_PROGRESSION_PROBABILITY {
            let years_since_infection = self.tbi_time / DAYS_PER_YEAR;
            if rng.random::<f64>() < progression_probability(years_since_infection) {
                trace!(
                    "agent {} progressed to active TB {:.2} years after infection",
                    self.id,
                    years_since_infection
                );
                self.disease_state = DiseaseState::ActiveTB;
                self.infectious = true;
                self.active_time = 0.0;
                self.on_tpt = false;
                self.tpt_time = 0.0;
                return Transition::ProgressedToActive;
            }
        }
        transition
    }

    fn advance_active<R: Rng + ?Sized>(&mut self, rng: &mut R) -> Transition {
        let not_notified = self.treatment_notification_time == 0.0;
        if not_notified
            && self.active_time >= NOTIFICATION_DELAY_DAYS
            && rng.random::<f64>() < NOTIFICATION_PROBABILITY
        {
            self.treatment_notification_time = self.active_time;
            self.disease_state = DiseaseState::Treatment;
            self.treatment_time = 0.0;
            return Transition::Notified;
        }
        Transition::None
    }

    fn advance_treatment<R: Rng + ?Sized>(
        &mut self,
        params: &DiseaseParameters,
        rng: &mut R,
    ) -> Transition {
        if self.treatment_time >= TREATMENT_DURATION_DAYS {
            let outcome = rng.random::<f64>();
            if outcome < params.treatment_success_rate {
                self.disease_state = DiseaseState::Susceptible;
                self.infectious = false;
                self.reset_case_timers();
                Transition::Cured
            } else if outcome < params.treatment_success_rate + params.mortality_rate {
                Transition::DiedOnTreatment
            } else {
                self.disease_state = DiseaseState::ActiveTB;
                self.infectious = true;
                self.reset_case_timers();
                Transition::TreatmentFailed
            }
        } else if self.treatment_time >= INFECTIOUS_TREATMENT_DAYS && self.infectious {
            self.infectious = false;
            Transition::BecameNonInfectious
        } else {
            Transition::None
        }
    }

    fn reset_case_timers(&mut self) {
        self.active_time = 0.0;
        self.treatment_time = 0.0;
        self.treatment_notification_time = 0.0;
    }

    /// Screens the agent once. Latent infections may be offered preventive therapy; active
    /// disease that is detected goes straight to treatment without waiting for notification.
    pub fn screen<R: Rng + ?Sized>(
        &mut self,
        params: &DiseaseParameters,
        rng: &mut R,
    ) -> ScreeningResult {
        if self.screened {
            return ScreeningResult::AlreadyScreened;
        }
        self.screened = true;
        match self.disease_state {
            DiseaseState::TBI => {
                if rng.random::<f64>() < params.screening_test_sensitivity {
                    if self.start_tpt(params, rng) {
                        ScreeningResult::TptStarted
                    } else {
                        ScreeningResult::TptDeclined
                    }
                } else {
                    ScreeningResult::Negative
                }
            }
            DiseaseState::ActiveTB => {
                if rng.random::<f64>() < params.screening_test_sensitivity {
                    self.disease_state = DiseaseState::Treatment;
                    self.treatment_time = 0.0;
                    self.treatment_notification_time = 0.0;
                    ScreeningResult::TreatmentStarted
                } else {
                    ScreeningResult::Negative
                }
            }
            DiseaseState::Susceptible | DiseaseState::Treatment => ScreeningResult::Negative,
        }
    }

    /// Starts preventive therapy for a latent infection. Returns whether it was started; only
    /// agents that will complete the course start it.
    pub fn start_tpt<R: Rng + ?Sized>(&mut self, params: &DiseaseParameters, rng: &mut R) -> bool {
        if self.disease_state != DiseaseState::TBI {
            return false;
        }
        if rng.random::<f64>() < params.tpt_completion_rate {
            self.on_tpt = true;
            self.tpt_time = 0.0;
            return true;
        }
        false
    }
}

/// Probability that an eventual progressor progresses on this step, given the years elapsed since
/// infection. Each band's share is conditioned on not having progressed in an earlier band.
#[must_use]
pub fn progression_probability(years_since_infection: f64) -> f64 {
    let mut previous = 0.0;
    for (upper_bound, cumulative) in PROGRESSION_BANDS {
        if years_since_infection <= upper_bound {
            return (cumulative - previous) / (1.0 - previous);
        }
        previous = cumulative;
    }
    1.0
}
