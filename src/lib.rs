//! An agent-based model of tuberculosis transmission in a synthetic population.
//!
//! Each agent belongs to a household and possibly a workplace or a school, and carries a
//! natural-history state (susceptible, latent infection, active disease, treatment) that
//! advances one timestep at a time. A run proceeds day by day:
//! * infectious agents expose the other members of their workplaces, schools and households;
//! * household contacts of notified cases are screened and offered preventive therapy;
//! * every agent's disease state advances;
//! * the population ages, and once a week deaths and births are drawn from demographic tables.
//!
//! The daily counts and the weekly incidence of active disease are the outputs of a run. In
//! calibration mode the model is run over a grid of transmission rates (`beta`) and the value
//! whose weekly incidence best matches a reference series is selected.
//!
//! The modules, from the bottom up:
//! * `agent`: one individual and its disease state machine
//! * `population`: the agents and their location indices
//! * `transmission`, `screening`, `demographics`: the processes applied each step
//! * `simulation`: one complete run
//! * `calibration`: the beta grid search
//! * `parameters`, `data`, `tables`, `report`, `runner`: configuration, inputs and outputs
pub mod agent;
pub mod calibration;
pub mod data;
pub mod demographics;
pub mod error;
pub mod log;
pub mod macros;
pub mod numeric;
pub mod parameters;
pub mod population;
#[cfg(feature = "progress_bar")]
pub mod progress;
pub mod report;
pub mod runner;
pub mod screening;
pub mod simulation;
pub mod tables;
pub mod transmission;

pub use error::TbError;
pub use parameters::Parameters;
pub use population::Population;
pub use simulation::Simulation;
