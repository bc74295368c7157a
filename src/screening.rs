//! Household contact tracing: once an active case has been notified, everyone it lives with is
//! screened.

use indexmap::IndexSet;
use log::debug;
use rand::Rng;

use crate::agent::{DiseaseState, HouseholdId, LocationType, ScreeningResult};
use crate::parameters::DiseaseParameters;
use crate::population::Population;

/// What a screening round found.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ScreeningSummary {
    pub households: usize,
    pub screened: usize,
    pub tpt_started: usize,
    pub treatment_started: usize,
}

/// Households with at least one notified case, in the order the cases appear in the population.
///
/// A notified case is one whose `treatment_notification_time` is set. Notification moves the case
/// into `Treatment`, so index cases are looked for in both `ActiveTB` and `Treatment`.
#[must_use]
pub fn index_households(population: &Population) -> IndexSet<HouseholdId> {
    population
        .agents()
        .filter(|agent| {
            matches!(
                agent.disease_state,
                DiseaseState::ActiveTB | DiseaseState::Treatment
            ) && agent.treatment_notification_time > 0.0
        })
        .map(|agent| agent.household_id())
        .collect()
}

/// Screens every household member of a notified case who does not have active TB.
/// Agents already screened are left unchanged.
pub fn screen_household_contacts<R: Rng + ?Sized>(
    population: &mut Population,
    params: &DiseaseParameters,
    rng: &mut R,
) -> ScreeningSummary {
    let households = index_households(population);
    let mut summary = ScreeningSummary {
        households: households.len(),
        ..ScreeningSummary::default()
    };

    for household_id in households {
        let Some((members, agents)) = population.group_mut(LocationType::Home, household_id)
        else {
            continue;
        };
        for id in members {
            let Some(agent) = agents.get_mut(id) else {
                continue;
            };
            if agent.disease_state == DiseaseState::ActiveTB {
                continue;
            }
            match agent.screen(params, rng) {
                ScreeningResult::AlreadyScreened => continue,
                ScreeningResult::TptStarted => summary.tpt_started += 1,
                ScreeningResult::TreatmentStarted => summary.treatment_started += 1,
                ScreeningResult::Negative | ScreeningResult::TptDeclined => {}
            }
            summary.screened += 1;
        }
    }

    if summary.screened > 0 {
        debug!(
            "screened {} contacts in {} households; {} started TPT",
            summary.screened, summary.households, summary.tpt_started
        );
    }
    summary
}
