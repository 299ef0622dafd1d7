//! Simulation case construction, execution and summary extraction.
//!
//! Every simulator implements the [`Simulator`] trait. The pipeline only
//! relies on its three-step contract; [`CommandSimulator`] is the default
//! implementation, which launches an external solver through an MPI launcher.
//!
//! # Case directory layout (CommandSimulator)
//!
//! - `case.json`: solver input: case name, named parameters, raw point
//! - `solver.log`: captured stdout/stderr of the launcher
//! - `observation.json`: written by the solver: a number or array of numbers

use std::collections::BTreeMap;
use std::fs::{self, File};
use std::path::{Path, PathBuf};
use std::process::{Child, Command, ExitStatus, Stdio};
use std::thread;
use std::time::{Duration, Instant};

use log::debug;
use serde::{Deserialize, Serialize};

use crate::campaign::{CaseName, write_json_atomic};
use crate::design::{ParameterPoint, ParameterSpace};
use crate::error::{Error, Result};

pub const CASE_INPUT_FILE: &str = "case.json";
pub const SOLVER_LOG_FILE: &str = "solver.log";
pub const OBSERVATION_FILE: &str = "observation.json";

/// Default wall-clock limit for one external solver run.
pub const DEFAULT_TIMEOUT_SECS: f64 = 3600.0;

const POLL_INTERVAL: Duration = Duration::from_millis(25);

// ---------------------------------------------------------------------------
// Observation
// ---------------------------------------------------------------------------

/// Summary statistic extracted from one case. Always at least one value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Observation(Vec<f64>);

impl Observation {
    /// Build an observation, rejecting empty or non-finite vectors.
    pub fn new(values: Vec<f64>) -> Result<Self> {
        if values.is_empty() {
            return Err(Error::InvalidInput("observation is empty".to_string()));
        }
        if values.iter().any(|v| !v.is_finite()) {
            return Err(Error::InvalidInput(format!(
                "observation contains non-finite values: {values:?}"
            )));
        }
        Ok(Self(values))
    }

    /// Single-output observation.
    pub fn scalar(value: f64) -> Result<Self> {
        Self::new(vec![value])
    }

    pub fn values(&self) -> &[f64] {
        &self.0
    }

    /// Number of outputs.
    pub fn dim(&self) -> usize {
        self.0.len()
    }
}

/// `observation.json` accepts a bare number or an array.
#[derive(Deserialize)]
#[serde(untagged)]
enum ObservationFile {
    Scalar(f64),
    Vector(Vec<f64>),
}

// ---------------------------------------------------------------------------
// Simulator trait
// ---------------------------------------------------------------------------

/// Contract every simulator backend fulfils.
///
/// Each case owns `<output_dir>/<name>` exclusively, so distinct cases may
/// run concurrently.
pub trait Simulator: Send + Sync {
    /// Write the input artifacts of case `name` for `point`.
    fn create_case(&self, point: &ParameterPoint, name: &CaseName, output_dir: &Path)
    -> Result<()>;

    /// Run case `name`, blocking until it completes or fails.
    fn run_case(&self, name: &CaseName, output_dir: &Path) -> Result<()>;

    /// Read the summary statistic of a completed case.
    ///
    /// Fails with [`Error::MissingResult`] if the case never produced output.
    fn extract_observation(&self, name: &CaseName, output_dir: &Path) -> Result<Observation>;
}

// ---------------------------------------------------------------------------
// Command simulator
// ---------------------------------------------------------------------------

/// How to launch the external solver.
#[derive(Debug, Clone)]
pub struct ExecutorConfig {
    /// MPI launcher, invoked as `<mpi_exec> -n <processes> <solver_exec> case.json`.
    pub mpi_exec: PathBuf,
    pub solver_exec: PathBuf,
    pub processes: usize,
    /// `None` waits forever.
    pub timeout: Option<Duration>,
}

impl ExecutorConfig {
    pub fn new(mpi_exec: impl Into<PathBuf>, solver_exec: impl Into<PathBuf>) -> Self {
        Self {
            mpi_exec: mpi_exec.into(),
            solver_exec: solver_exec.into(),
            ..Default::default()
        }
    }
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            mpi_exec: PathBuf::from("mpiexec"),
            solver_exec: PathBuf::from("solver"),
            processes: 4,
            timeout: Some(Duration::from_secs_f64(DEFAULT_TIMEOUT_SECS)),
        }
    }
}

/// Solver input written to `case.json`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CaseInput {
    pub name: CaseName,
    pub parameters: BTreeMap<String, f64>,
    pub point: ParameterPoint,
}

impl CaseInput {
    pub fn load(case_dir: &Path) -> Result<Self> {
        let path = case_dir.join(CASE_INPUT_FILE);
        let text = fs::read_to_string(&path)
            .map_err(|e| Error::io(format!("reading {}", path.display()), e))?;
        serde_json::from_str(&text)
            .map_err(|e| Error::InvalidInput(format!("{}: {e}", path.display())))
    }
}

/// Runs each case as an external MPI job.
pub struct CommandSimulator {
    config: ExecutorConfig,
    space: ParameterSpace,
}

impl CommandSimulator {
    pub fn new(config: ExecutorConfig, space: ParameterSpace) -> Self {
        Self { config, space }
    }

    pub fn config(&self) -> &ExecutorConfig {
        &self.config
    }

    fn launch(&self, name: &CaseName, case_dir: &Path) -> Result<ExitStatus> {
        let log_path = case_dir.join(SOLVER_LOG_FILE);
        let log = File::create(&log_path)
            .map_err(|e| Error::io(format!("creating {}", log_path.display()), e))?;
        let log_err = log
            .try_clone()
            .map_err(|e| Error::io(format!("duplicating {}", log_path.display()), e))?;

        debug!(
            "{name}: {} -n {} {} {CASE_INPUT_FILE}",
            self.config.mpi_exec.display(),
            self.config.processes,
            self.config.solver_exec.display()
        );

        let mut command = Command::new(&self.config.mpi_exec);
        command
            .arg("-n")
            .arg(self.config.processes.to_string())
            .arg(&self.config.solver_exec)
            .arg(CASE_INPUT_FILE)
            .current_dir(case_dir)
            .stdin(Stdio::null())
            .stdout(log)
            .stderr(log_err);
        // The launcher leads a new process group so a timeout reaches every rank.
        #[cfg(unix)]
        {
            use std::os::unix::process::CommandExt;
            command.process_group(0);
        }

        let mut child = command
            .spawn()
            .map_err(|e| Error::SimulationFailure {
                case: name.to_string(),
                reason: format!("could not launch {}: {e}", self.config.mpi_exec.display()),
            })?;

        let started = Instant::now();
        loop {
            match child.try_wait() {
                Ok(Some(status)) => return Ok(status),
                Ok(None) => {}
                Err(e) => return Err(Error::io(format!("waiting for {name}"), e)),
            }
            if let Some(limit) = self.config.timeout
                && started.elapsed() >= limit
            {
                kill_process_group(&mut child);
                let _ = child.wait();
                // Anything written before the kill belongs to an abandoned attempt.
                let partial = case_dir.join(OBSERVATION_FILE);
                if partial.exists() {
                    fs::remove_file(&partial)
                        .map_err(|e| Error::io(format!("removing {}", partial.display()), e))?;
                }
                return Err(Error::Timeout {
                    case: name.to_string(),
                    seconds: limit.as_secs_f64(),
                });
            }
            thread::sleep(POLL_INTERVAL);
        }
    }
}

/// Kill the launcher and every process it started.
#[cfg(unix)]
fn kill_process_group(child: &mut Child) {
    // process_group(0) made the launcher's pid the group id.
    let pgid = child.id() as libc::pid_t;
    // SAFETY: `kill` only sends a signal; a stale group id makes it fail with ESRCH.
    let rc = unsafe { libc::kill(-pgid, libc::SIGKILL) };
    if rc != 0 {
        debug!("killing process group {pgid} failed; killing the launcher only");
        let _ = child.kill();
    }
}

#[cfg(not(unix))]
fn kill_process_group(child: &mut Child) {
    let _ = child.kill();
}

impl Simulator for CommandSimulator {
    fn create_case(
        &self,
        point: &ParameterPoint,
        name: &CaseName,
        output_dir: &Path,
    ) -> Result<()> {
        if point.dim() != self.space.dim() {
            return Err(Error::InvalidInput(format!(
                "{name}: point has {} values, parameter space has {}",
                point.dim(),
                self.space.dim()
            )));
        }
        let case_dir = name.case_dir(output_dir);
        fs::create_dir_all(&case_dir)
            .map_err(|e| Error::io(format!("creating {}", case_dir.display()), e))?;

        // A stale result from an earlier run must not be mistaken for this one.
        let stale = case_dir.join(OBSERVATION_FILE);
        if stale.exists() {
            fs::remove_file(&stale)
                .map_err(|e| Error::io(format!("removing {}", stale.display()), e))?;
        }

        let input = CaseInput {
            name: name.clone(),
            parameters: self
                .space
                .names()
                .map(str::to_string)
                .zip(point.values().iter().copied())
                .collect(),
            point: point.clone(),
        };
        write_json_atomic(&case_dir.join(CASE_INPUT_FILE), &input)
    }

    fn run_case(&self, name: &CaseName, output_dir: &Path) -> Result<()> {
        let case_dir = name.case_dir(output_dir);
        if !case_dir.join(CASE_INPUT_FILE).is_file() {
            return Err(Error::SimulationFailure {
                case: name.to_string(),
                reason: format!("no {CASE_INPUT_FILE} in {}", case_dir.display()),
            });
        }

        let status = self.launch(name, &case_dir)?;
        if !status.success() {
            return Err(Error::SimulationFailure {
                case: name.to_string(),
                reason: format!(
                    "solver exited with {status}; see {}",
                    case_dir.join(SOLVER_LOG_FILE).display()
                ),
            });
        }
        Ok(())
    }

    fn extract_observation(&self, name: &CaseName, output_dir: &Path) -> Result<Observation> {
        read_observation(name, output_dir)
    }
}

/// Read `<output_dir>/<name>/observation.json`.
pub fn read_observation(name: &CaseName, output_dir: &Path) -> Result<Observation> {
    let path = name.case_dir(output_dir).join(OBSERVATION_FILE);
    if !path.is_file() {
        return Err(Error::MissingResult {
            case: name.to_string(),
            path,
        });
    }
    let text =
        fs::read_to_string(&path).map_err(|e| Error::io(format!("reading {}", path.display()), e))?;
    let values = match serde_json::from_str::<ObservationFile>(&text) {
        Ok(ObservationFile::Scalar(v)) => vec![v],
        Ok(ObservationFile::Vector(v)) => v,
        Err(e) => {
            return Err(Error::SimulationFailure {
                case: name.to_string(),
                reason: format!("malformed {}: {e}", path.display()),
            });
        }
    };
    Observation::new(values).map_err(|e| Error::SimulationFailure {
        case: name.to_string(),
        reason: e.to_string(),
    })
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
