pub mod analysis;
pub mod run_batch;
pub mod status;

use std::path::Path;
use std::time::Duration;

use histmatch_core::{Error, ExecutorConfig, ParameterSpace, Result};

/// Exit status for errors the user can fix by changing the arguments.
const EXIT_INVALID_INPUT: i32 = 2;

/// Build the launcher configuration shared by `run-batch` and `analysis`.
pub fn executor_config(
    mpi_exec: &str,
    solver_exec: &str,
    processes: usize,
    timeout_sec: f64,
) -> Result<ExecutorConfig> {
    if processes == 0 {
        return Err(Error::InvalidInput(
            "--processes must be at least 1".to_string(),
        ));
    }
    Ok(ExecutorConfig {
        processes,
        timeout: parse_timeout(timeout_sec)?,
        ..ExecutorConfig::new(mpi_exec, solver_exec)
    })
}

/// `0` disables the timeout; negative or non-finite values are rejected.
pub fn parse_timeout(seconds: f64) -> Result<Option<Duration>> {
    if !seconds.is_finite() || seconds < 0.0 {
        return Err(Error::InvalidInput(format!(
            "--timeout-sec must be a non-negative number, got {seconds}"
        )));
    }
    if seconds == 0.0 {
        return Ok(None);
    }
    Ok(Some(Duration::from_secs_f64(seconds)))
}

/// The default space, or the one described by a JSON file.
pub fn load_space(path: Option<&str>) -> Result<ParameterSpace> {
    match path {
        Some(p) => ParameterSpace::from_json_file(Path::new(p)),
        None => Ok(ParameterSpace::default()),
    }
}

pub fn exit_code(err: &Error) -> i32 {
    match err {
        Error::InvalidInput(_) => EXIT_INVALID_INPUT,
        _ => 1,
    }
}

/// Print `err` and terminate with its exit status.
pub fn fail(err: &Error) -> ! {
    eprintln!("Error: {err}");
    std::process::exit(exit_code(err));
}

/// Format a point with its parameter names.
pub fn describe_point(space: &ParameterSpace, values: &[f64]) -> String {
    space
        .names()
        .zip(values)
        .map(|(name, v)| format!("{name}={v:.6}"))
        .collect::<Vec<_>>()
        .join(", ")
}
