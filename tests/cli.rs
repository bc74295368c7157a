use std::fs;
use std::path::{Path, PathBuf};

use assert_approx_eq::assert_approx_eq;
use assert_cmd::Command;
use tempfile::tempdir;

fn manifest_dir() -> PathBuf {
    PathBuf::from(env!("CARGO_MANIFEST_DIR"))
}

/// Writes a copy of the sample config with absolute data paths and a short window.
fn write_config(dir: &Path) -> PathBuf {
    let contents = fs::read_to_string(manifest_dir().join("config/config.json")).unwrap();
    let mut config: serde_json::Value = serde_json::from_str(&contents).unwrap();
    for key in [
        "synthetic_population_path",
        "fertility_data_path",
        "mortality_data_path",
        "calibration_data_path",
        "sex_ratio_data_path",
    ] {
        let relative = config[key].as_str().unwrap().to_string();
        config[key] = manifest_dir()
            .join(relative)
            .to_string_lossy()
            .into_owned()
            .into();
    }
    config["end_date"] = "2021-02-28".into();
    config["calibration_end_date"] = "2021-03-31".into();
    config["beta_calibration_range"] = serde_json::json!([0.1, 0.3, 0.1]);
    let path = dir.join("config.json");
    fs::write(&path, config.to_string()).unwrap();
    path
}

fn tbsim() -> Command {
    Command::cargo_bin("tbsim").unwrap()
}

#[test]
fn help_exits_successfully() {
    let output = tbsim().arg("--help").output().unwrap();
    assert!(output.status.success());
    let stdout = String::from_utf8(output.stdout).unwrap();
    assert!(stdout.contains("--config"));
    assert!(stdout.contains("--mode"));
    assert!(stdout.contains("--tag"));
}

#[test]
fn missing_config_fails() {
    let dir = tempdir().unwrap();
    let output = tbsim()
        .args(["--config", "no/such/config.json", "--no-progress"])
        .current_dir(dir.path())
        .output()
        .unwrap();
    assert_eq!(output.status.code(), Some(1));
    let stderr = String::from_utf8(output.stderr).unwrap();
    assert!(stderr.contains("Configuration error"));
}

#[test]
fn simulation_writes_daily_and_weekly_tables() {
    let dir = tempdir().unwrap();
    let config = write_config(dir.path());
    let output_dir = dir.path().join("out");
    tbsim()
        .arg("--config")
        .arg(&config)
        .arg("--output-dir")
        .arg(&output_dir)
        .args(["--tag", "cli", "--no-progress"])
        .assert()
        .success();

    let daily = fs::read_to_string(output_dir.join("daily_states_cli.csv")).unwrap();
    let mut lines = daily.lines();
    assert_eq!(
        lines.next(),
        Some("Date,Susceptible,TBI,ActiveTB,Treatment,NewTBI,NewActiveTB")
    );
    assert_eq!(lines.next().map(|line| &line[..10]), Some("2021-01-01"));
    // 2021-01-01 to 2021-02-28.
    assert_eq!(lines.count(), 58);

    let weekly = fs::read_to_string(output_dir.join("weekly_incidence_cli.csv")).unwrap();
    assert!(weekly.starts_with("Year,Week,Incidence\n"));
}

#[test]
fn same_seed_gives_identical_output() {
    let dir = tempdir().unwrap();
    let config = write_config(dir.path());
    for tag in ["a", "b"] {
        tbsim()
            .arg("--config")
            .arg(&config)
            .arg("--output-dir")
            .arg(dir.path())
            .args(["--tag", tag, "--random-seed", "11", "--no-progress"])
            .assert()
            .success();
    }
    assert_eq!(
        fs::read_to_string(dir.path().join("daily_states_a.csv")).unwrap(),
        fs::read_to_string(dir.path().join("daily_states_b.csv")).unwrap()
    );
}

#[test]
fn refuses_to_overwrite_without_force() {
    let dir = tempdir().unwrap();
    let config = write_config(dir.path());
    let run = |force: bool| {
        let mut command = tbsim();
        command
            .arg("--config")
            .arg(&config)
            .arg("--output-dir")
            .arg(dir.path())
            .arg("--no-progress");
        if force {
            command.arg("--force");
        }
        command.output().unwrap()
    };
    assert!(run(false).status.success());
    let second = run(false);
    assert_eq!(second.status.code(), Some(1));
    assert!(String::from_utf8(second.stderr)
        .unwrap()
        .contains("already exists"));
    assert!(run(true).status.success());
}

#[test]
fn calibration_reports_the_best_beta() {
    let dir = tempdir().unwrap();
    let config = write_config(dir.path());
    tbsim()
        .arg("--config")
        .arg(&config)
        .arg("--output-dir")
        .arg(dir.path())
        .args(["--mode", "calibration", "--no-progress"])
        .assert()
        .success();

    for beta in ["0.1", "0.2", "0.3"] {
        for stem in ["daily_states", "weekly_incidence"] {
            let path = dir.path().join(format!("{stem}_beta{beta}.csv"));
            assert!(path.exists(), "{} missing", path.display());
        }
    }

    let mut reader = csv::Reader::from_path(dir.path().join("calibration_results.csv")).unwrap();
    let rows: Vec<(f64, f64)> = reader.deserialize().map(Result::unwrap).collect();
    assert_eq!(rows.len(), 3);
    let best = rows
        .iter()
        .copied()
        .fold(None, |best: Option<(f64, f64)>, row| match best {
            Some(best) if best.1 <= row.1 => Some(best),
            _ => Some(row),
        })
        .unwrap();

    let report = fs::read_to_string(dir.path().join("best_beta.txt")).unwrap();
    let value = |prefix: &str| -> f64 {
        report
            .lines()
            .find_map(|line| line.strip_prefix(prefix))
            .unwrap()
            .trim()
            .parse()
            .unwrap()
    };
    assert_approx_eq!(value("Best beta:"), best.0);
    assert_approx_eq!(value("RMSE:"), best.1);
}
