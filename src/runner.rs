use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;
use log::info;
use rand::rngs::StdRng;
use rand::SeedableRng;

use crate::calibration::calibrate;
use crate::data::{load_demographic_tables, load_reference_incidence, load_synthetic_population};
use crate::error::TbError;
use crate::parameters::{Mode, Parameters, DEFAULT_CONFIG_PATH};
use crate::population::Population;
use crate::report::{write_calibration_output, write_simulation_output, ReportOptions};
use crate::simulation::Simulation;

/// Command line arguments of the `tbsim` binary.
#[derive(Parser, Debug, Clone, PartialEq)]
#[command(
    name = "tbsim",
    version,
    about = "Agent-based simulation and calibration of tuberculosis transmission"
)]
pub struct BaseArgs {
    /// Run one simulation or calibrate beta; overrides `mode` in the config file
    #[arg(short, long, value_enum)]
    pub mode: Option<Mode>,

    /// Path of the JSON parameters file
    #[arg(short, long, default_value = DEFAULT_CONFIG_PATH)]
    pub config: PathBuf,

    /// Appended to output file names
    #[arg(short, long)]
    pub tag: Option<String>,

    /// Random seed; overrides `seed` in the config file
    #[arg(short, long)]
    pub random_seed: Option<u64>,

    /// Directory for output files
    #[arg(short, long, default_value = "output")]
    pub output_dir: PathBuf,

    /// Enable logging: a level (`info`) or a list such as `warn,tbsim::demographics=debug`
    #[arg(short, long)]
    pub log_level: Option<String>,

    /// Overwrite existing output files
    #[arg(short, long)]
    pub force: bool,

    /// Do not show a progress bar
    #[arg(long)]
    pub no_progress: bool,
}

/// What a completed run produced.
#[derive(Debug, Clone, PartialEq)]
pub enum RunOutcome {
    Simulation {
        new_infections: usize,
        new_active_tb: usize,
        beta: f64,
        files: Vec<PathBuf>,
    },
    Calibration {
        best_beta: f64,
        rmse: f64,
        files: Vec<PathBuf>,
    },
}

/// Parses the command line and runs.
///
/// # Errors
///
/// Returns any fatal configuration, data, invariant or output error.
pub fn run() -> Result<RunOutcome, TbError> {
    run_with_args(BaseArgs::parse())
}

/// Loads every input, runs the selected mode, and writes its output files.
///
/// All inputs are read and checked, and existing output files are detected, before the first
/// simulated day.
///
/// # Errors
///
/// Returns any fatal configuration, data, invariant or output error.
pub fn run_with_args(args: BaseArgs) -> Result<RunOutcome, TbError> {
    if let Some(spec) = &args.log_level {
        crate::log::configure(spec)?;
    }

    info!("loading parameters from {}", args.config.display());
    let mut parameters = Parameters::load(&args.config)?;
    if let Some(mode) = args.mode {
        parameters.mode = mode;
    }
    if let Some(seed) = args.random_seed {
        parameters.seed = seed;
    }

    let options = ReportOptions::new(&args.output_dir)
        .tag(args.tag.clone())
        .overwrite(args.force);
    let reference = match parameters.mode {
        Mode::Simulation => {
            options.check_writable(&options.simulation_paths())?;
            None
        }
        Mode::Calibration => {
            let candidates = parameters.beta_calibration_range.candidates();
            options.check_writable(&options.calibration_paths(&candidates))?;
            Some(load_reference_incidence(&parameters.calibration_data_path)?)
        }
    };

    let records = load_synthetic_population(&parameters.synthetic_population_path)?;
    let tables = Arc::new(load_demographic_tables(&parameters)?);
    let mut rng = StdRng::seed_from_u64(parameters.seed);
    let mut population = Population::load(&records, &parameters.population, tables, &mut rng)?;
    let show_progress = !args.no_progress;

    match reference {
        None => {
            let window = parameters.simulation_window();
            let mut simulation = Simulation::new(&parameters, parameters.beta, window);
            if show_progress {
                simulation = with_timeline_progress(simulation, window);
            }
            let output = simulation.run(&mut population, &mut rng)?;
            let files = write_simulation_output(&options, &output)?;
            Ok(RunOutcome::Simulation {
                new_infections: output.summary.new_tbi(),
                new_active_tb: output.summary.new_active_tb,
                beta: output.summary.beta,
                files,
            })
        }
        Some(reference) => {
            let candidates = parameters.beta_calibration_range.candidates().len();
            if show_progress {
                start_calibration_progress(candidates);
            }
            let outcome = calibrate(&population, &rng, &parameters, &reference, &|_| {
                if show_progress {
                    advance_calibration_progress();
                }
            })?;
            if show_progress {
                finish_calibration_progress();
            }
            let files = write_calibration_output(&options, &outcome)?;
            Ok(RunOutcome::Calibration {
                best_beta: outcome.best.beta,
                rmse: outcome.best.rmse,
                files,
            })
        }
    }
}

#[cfg(feature = "progress_bar")]
fn with_timeline_progress(
    simulation: Simulation<'_>,
    window: crate::parameters::DateWindow,
) -> Simulation<'_> {
    crate::progress::init_timeline_progress_bar(window);
    simulation.with_step_callback(crate::progress::update_timeline_progress)
}

#[cfg(not(feature = "progress_bar"))]
fn with_timeline_progress(
    simulation: Simulation<'_>,
    _window: crate::parameters::DateWindow,
) -> Simulation<'_> {
    simulation
}

#[cfg(feature = "progress_bar")]
fn start_calibration_progress(candidates: usize) {
    crate::progress::init_custom_progress_bar("Calibration", candidates);
}

#[cfg(feature = "progress_bar")]
fn advance_calibration_progress() {
    crate::progress::increment_custom_progress();
}

#[cfg(feature = "progress_bar")]
fn finish_calibration_progress() {
    crate::progress::finalize_custom_progress();
}

#[cfg(not(feature = "progress_bar"))]
fn start_calibration_progress(_candidates: usize) {}

#[cfg(not(feature = "progress_bar"))]
fn advance_calibration_progress() {}

#[cfg(not(feature = "progress_bar"))]
fn finish_calibration_progress() {}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::test_data::{self, write};
    use crate::parameters::TEST_CONFIG;
    use std::fs;
    use std::path::Path;
    use tempfile::tempdir;

    /// Writes the test inputs into `dir` and a config pointing at them.
    fn write_inputs(dir: &Path) -> PathBuf {
        let population = write(dir, "population.csv", test_data::POPULATION_CSV);
        let fertility = write(dir, "fertility.csv", test_data::FERTILITY_CSV);
        let mortality = write(dir, "mortality.csv", test_data::MORTALITY_CSV);
        let sex_ratio = write(dir, "sex_ratio.csv", test_data::SEX_RATIO_CSV);
        let reference = write(dir, "reference.csv", test_data::REFERENCE_CSV);
        let mut config: serde_json::Value = serde_json::from_str(TEST_CONFIG).unwrap();
        config["synthetic_population_path"] = population.to_string_lossy().into();
        config["fertility_data_path"] = fertility.to_string_lossy().into();
        config["mortality_data_path"] = mortality.to_string_lossy().into();
        config["sex_ratio_data_path"] = sex_ratio.to_string_lossy().into();
        config["calibration_data_path"] = reference.to_string_lossy().into();
        write(dir, "config.json", &config.to_string())
    }

    fn args(dir: &Path, config: PathBuf) -> BaseArgs {
        BaseArgs {
            mode: None,
            config,
            tag: Some("test".to_string()),
            random_seed: Some(3),
            output_dir: dir.join("output"),
            log_level: None,
            force: false,
            no_progress: true,
        }
    }

    #[test]
    fn parses_command_line() {
        let args = BaseArgs::try_parse_from([
            "tbsim",
            "--mode",
            "calibration",
            "--config",
            "other.json",
            "--tag",
            "a",
            "--random-seed",
            "7",
            "--force",
            "--no-progress",
        ])
        .unwrap();
        assert_eq!(args.mode, Some(Mode::Calibration));
        assert_eq!(args.config, PathBuf::from("other.json"));
        assert_eq!(args.tag.as_deref(), Some("a"));
        assert_eq!(args.random_seed, Some(7));
        assert!(args.force);
        assert!(args.no_progress);

        let defaults = BaseArgs::try_parse_from(["tbsim"]).unwrap();
        assert_eq!(defaults.config, PathBuf::from(DEFAULT_CONFIG_PATH));
        assert_eq!(defaults.output_dir, PathBuf::from("output"));
        assert_eq!(defaults.mode, None);
        assert!(BaseArgs::try_parse_from(["tbsim", "--mode", "fit"]).is_err());
    }

    #[test]
    fn simulation_writes_tagged_tables() {
        let dir = tempdir().unwrap();
        let config = write_inputs(dir.path());
        let outcome = run_with_args(args(dir.path(), config)).unwrap();
        let RunOutcome::Simulation { beta, files, .. } = outcome else {
            panic!("expected a simulation outcome");
        };
        assert_eq!(beta, 0.5);
        assert_eq!(
            files,
            vec![
                dir.path().join("output/daily_states_test.csv"),
                dir.path().join("output/weekly_incidence_test.csv"),
            ]
        );
        let daily = fs::read_to_string(&files[0]).unwrap();
        // Header plus 2021-01-01 to 2021-03-31.
        assert_eq!(daily.lines().count(), 91);
    }

    #[test]
    fn calibration_mode_from_the_command_line() {
        let dir = tempdir().unwrap();
        let config = write_inputs(dir.path());
        let mut args = args(dir.path(), config);
        args.mode = Some(Mode::Calibration);
        let outcome = run_with_args(args).unwrap();
        let RunOutcome::Calibration {
            best_beta, files, ..
        } = outcome
        else {
            panic!("expected a calibration outcome");
        };
        assert!(best_beta == 0.1 || best_beta == 0.2);
        assert!(files[1].ends_with("best_beta_test.txt"));
        let results = fs::read_to_string(&files[0]).unwrap();
        assert_eq!(results.lines().count(), 3);

        let output = dir.path().join("output");
        assert_eq!(
            files[2..].to_vec(),
            vec![
                output.join("daily_states_beta0.1_test.csv"),
                output.join("weekly_incidence_beta0.1_test.csv"),
                output.join("daily_states_beta0.2_test.csv"),
                output.join("weekly_incidence_beta0.2_test.csv"),
            ]
        );
        // Header plus 2021-01-01 to 2021-02-28.
        let daily = fs::read_to_string(&files[2]).unwrap();
        assert_eq!(daily.lines().count(), 60);
    }

    #[test]
    fn existing_candidate_tables_stop_calibration_before_it_starts() {
        let dir = tempdir().unwrap();
        let config = write_inputs(dir.path());
        let output = dir.path().join("output");
        fs::create_dir_all(&output).unwrap();
        fs::write(output.join("weekly_incidence_beta0.2_test.csv"), "").unwrap();
        let mut args = args(dir.path(), config);
        args.mode = Some(Mode::Calibration);
        assert!(matches!(
            run_with_args(args),
            Err(TbError::ReportError(_))
        ));
        assert!(!output.join("calibration_results_test.csv").exists());
    }

    #[test]
    fn existing_outputs_stop_the_run_before_it_starts() {
        let dir = tempdir().unwrap();
        let config = write_inputs(dir.path());
        run_with_args(args(dir.path(), config.clone())).unwrap();
        assert!(matches!(
            run_with_args(args(dir.path(), config.clone())),
            Err(TbError::ReportError(_))
        ));
        let mut forced = args(dir.path(), config);
        forced.force = true;
        run_with_args(forced).unwrap();
    }

    #[test]
    fn missing_config_is_an_error() {
        let dir = tempdir().unwrap();
        let result = run_with_args(args(dir.path(), dir.path().join("absent.json")));
        assert!(result.is_err());
        assert!(!dir.path().join("output").exists());
    }

    #[test]
    fn missing_population_column_is_fatal() {
        let dir = tempdir().unwrap();
        let config = write_inputs(dir.path());
        write(
            dir.path(),
            "population.csv",
            "SexLabel,Age,HHID,WorkPlaceID,AgentID\nMale,30,1,0,1\n",
        );
        assert!(matches!(
            run_with_args(args(dir.path(), config)),
            Err(TbError::DataFormatError(_))
        ));
        assert!(!dir.path().join("output").exists());
    }
}
