//! Diagnostic logging for the simulator. This is separate from the output tables written by
//! `report`: log messages describe what a run is doing, not its results.
//!
//! Every module logs through the `log` facade macros, re-exported here. Logging is _disabled_ by
//! default. The `--log-level` option turns it on, either with a single level (`--log-level
//! debug`) or with a comma-separated list mixing a global level and per-module levels
//! (`--log-level info,tbsim::demographics=trace`).
//!
//! From code, `configure` takes the same values:
//!
//! ```rust
//! // Per-agent transmission chatter is only wanted while debugging.
//! tbsim::log::configure("info,tbsim::transmission=off").unwrap();
//! ```
#[cfg(feature = "logging")]
mod standard_logger;

#[cfg(not(feature = "logging"))]
mod null_logger;

#[cfg(all(feature = "logging", feature = "progress_bar"))]
mod progress_bar_encoder;

use std::str::FromStr;
use std::sync::{LazyLock, Mutex, MutexGuard, PoisonError};

use indexmap::map::Entry;
use indexmap::IndexMap;
pub use log::{debug, error, info, trace, warn, LevelFilter};
#[cfg(feature = "logging")]
use log4rs::Handle;

use crate::error::TbError;

const DEFAULT_LOG_LEVEL: LevelFilter = LevelFilter::Off;

static LOG_CONFIGURATION: LazyLock<Mutex<LogConfiguration>> = LazyLock::new(Mutex::default);

/// The level filter applied to one module path, e.g. `"tbsim::population"`.
#[derive(Debug, Clone, PartialEq)]
struct ModuleLogConfiguration {
    module: String,
    level: LevelFilter,
}

impl From<(&str, LevelFilter)> for ModuleLogConfiguration {
    fn from((module, level): (&str, LevelFilter)) -> Self {
        Self {
            module: module.to_string(),
            level,
        }
    }
}

/// The global level, the per-module filters and the handle of the installed logger. Only the
/// singleton behind `LOG_CONFIGURATION` exists; the public API is the free functions below.
#[derive(Debug)]
pub(in crate::log) struct LogConfiguration {
    /// Level for modules without their own filter. `LevelFilter::Off` disables logging.
    pub(in crate::log) global_log_level: LevelFilter,
    pub(in crate::log) module_configurations: IndexMap<String, ModuleLogConfiguration>,

    #[cfg(feature = "logging")]
    root_handle: Option<Handle>,
}

impl Default for LogConfiguration {
    fn default() -> Self {
        Self {
            global_log_level: DEFAULT_LOG_LEVEL,
            module_configurations: IndexMap::new(),

            #[cfg(feature = "logging")]
            root_handle: None,
        }
    }
}

impl LogConfiguration {
    /// Replaces the global level and every module filter, then reinstalls the logger.
    fn apply(&mut self, spec: &LogSpec) -> Result<(), TbError> {
        self.global_log_level = spec.global.unwrap_or(LevelFilter::Error);
        self.module_configurations.clear();
        for (module, level) in &spec.modules {
            // A module named twice keeps its last level.
            match self.module_configurations.entry(module.clone()) {
                Entry::Occupied(mut entry) => entry.get_mut().level = *level,
                Entry::Vacant(entry) => {
                    entry.insert((module.as_str(), *level).into());
                }
            }
        }
        self.set_config()
    }
}

/// A parsed `--log-level` value.
#[derive(Debug, Clone, PartialEq)]
pub struct LogSpec {
    pub global: Option<LevelFilter>,
    pub modules: Vec<(String, LevelFilter)>,
}

impl FromStr for LogSpec {
    type Err = TbError;

    /// Parses `level`, `module=level`, or a comma-separated mix of them.
    fn from_str(spec: &str) -> Result<Self, Self::Err> {
        let parse_level = |level: &str| {
            LevelFilter::from_str(level.trim()).map_err(|_| {
                TbError::ConfigurationError(format!("invalid log level {:?}", level.trim()))
            })
        };
        let mut parsed = LogSpec {
            global: None,
            modules: Vec::new(),
        };
        for part in spec.split(',').map(str::trim).filter(|part| !part.is_empty()) {
            match part.split_once('=') {
                Some((module, level)) => {
                    parsed.modules.push((module.trim().to_string(), parse_level(level)?));
                }
                None => parsed.global = Some(parse_level(part)?),
            }
        }
        if parsed.global.is_none() && parsed.modules.is_empty() {
            return Err(TbError::ConfigurationError("empty log level".to_string()));
        }
        Ok(parsed)
    }
}

/// Applies a `--log-level` value, replacing any earlier one. Naming only modules turns the others
/// up to `error`.
///
/// # Errors
///
/// Returns `TbError::ConfigurationError` if the value cannot be parsed or the logger cannot be
/// configured.
pub fn configure(spec: &str) -> Result<(), TbError> {
    let spec: LogSpec = spec.parse()?;
    get_log_configuration().apply(&spec)
}

fn get_log_configuration() -> MutexGuard<'static, LogConfiguration> {
    LOG_CONFIGURATION
        .lock()
        .unwrap_or_else(PoisonError::into_inner)
}
