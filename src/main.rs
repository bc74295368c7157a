use std::process::ExitCode;

use tbsim::runner::{run, RunOutcome};

fn main() -> ExitCode {
    match run() {
        Ok(RunOutcome::Simulation {
            new_infections,
            new_active_tb,
            beta,
            files,
        }) => {
            println!(
                "Simulation finished with beta {beta}: {new_infections} new infections, {new_active_tb} new active TB cases"
            );
            for file in files {
                println!("Wrote {}", file.display());
            }
            ExitCode::SUCCESS
        }
        Ok(RunOutcome::Calibration {
            best_beta,
            rmse,
            files,
        }) => {
            println!("Calibration finished: best beta {best_beta} (RMSE {rmse})");
            for file in files {
                println!("Wrote {}", file.display());
            }
            ExitCode::SUCCESS
        }
        Err(e) => {
            eprintln!("tbsim: {e}");
            ExitCode::FAILURE
        }
    }
}
