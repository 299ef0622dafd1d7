//! Batch driver: generate the training design and run one simulation per point.
//!
//! Architecture:
//! 1. Validate the request (no stage runs on invalid input)
//! 2. Generate the design from an explicitly seeded sampler, or reload it on resume
//! 3. Persist `design.json` atomically before anything is dispatched
//! 4. Dispatch cases in generation order, up to `jobs` at a time
//! 5. Stamp each completed case with the campaign id
//! 6. Write `batch.json` with the outcome of every case, failed or not
//!
//! Case directories outlive a design: only output stamped with the current
//! campaign id is reused on resume or aggregated later.

use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::{Duration, Instant};

use log::{info, warn};
use serde::{Deserialize, Serialize};

use crate::campaign::{
    BatchReport, CaseName, CaseRecord, CaseStamp, CaseStatus, DesignRecord, unix_now,
};
use crate::design::{DEFAULT_DESIGN_SEED, LatinHypercube, ParameterPoint, ParameterSpace, Sampler};
use crate::error::{Error, Result};
use crate::simulation::Simulator;

// ---------------------------------------------------------------------------
// Configuration
// ---------------------------------------------------------------------------

/// What to do when one case of a batch fails.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailurePolicy {
    /// Stop dispatching and return the first failure.
    #[default]
    FailFast,
    /// Record the case as failed in `batch.json` and keep going.
    SkipAndRecord,
}

impl std::fmt::Display for FailurePolicy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::FailFast => write!(f, "fail_fast"),
            Self::SkipAndRecord => write!(f, "skip_and_record"),
        }
    }
}

/// Configuration for one batch run.
#[derive(Debug, Clone)]
pub struct BatchConfig {
    pub sample_count: usize,
    pub seed: u64,
    pub space: ParameterSpace,
    pub output_dir: PathBuf,
    pub failure_policy: FailurePolicy,
    /// Extra attempts granted to a case whose run timed out.
    pub timeout_retries: u32,
    /// Maximum number of cases running at once.
    pub jobs: usize,
    /// Reuse a matching `design.json` and skip cases that already have output.
    pub resume: bool,
    /// Recorded in the batch report; the simulator owns the real setting.
    pub processes: usize,
}

impl Default for BatchConfig {
    fn default() -> Self {
        Self {
            sample_count: 20,
            seed: DEFAULT_DESIGN_SEED,
            space: ParameterSpace::default(),
            output_dir: PathBuf::from("results"),
            failure_policy: FailurePolicy::FailFast,
            timeout_retries: 1,
            jobs: 1,
            resume: false,
            processes: 4,
        }
    }
}

/// Parse a user-supplied sample count. Only positive integers are accepted.
pub fn parse_sample_count(s: &str) -> Result<usize> {
    let trimmed = s.trim();
    match trimmed.parse::<usize>() {
        Ok(0) => Err(Error::InvalidInput(
            "sample count must be at least 1".to_string(),
        )),
        Ok(n) => Ok(n),
        Err(_) => Err(Error::InvalidInput(format!(
            "sample count must be a positive integer, got '{trimmed}'"
        ))),
    }
}

// ---------------------------------------------------------------------------
// Case dispatch
// ---------------------------------------------------------------------------

/// Result of creating and running one case, retries included.
pub(crate) struct CaseOutcome {
    pub attempts: u32,
    pub duration: Duration,
    pub result: Result<()>,
}

/// Create then run one case. Retryable failures (timeouts) get up to
/// `timeout_retries` more attempts; anything else fails immediately.
pub(crate) fn dispatch_case<S: Simulator + ?Sized>(
    simulator: &S,
    point: &ParameterPoint,
    name: &CaseName,
    output_dir: &Path,
    timeout_retries: u32,
) -> CaseOutcome {
    let started = Instant::now();
    let mut attempts = 0;
    let result = (|| -> Result<()> {
        simulator.create_case(point, name, output_dir)?;
        loop {
            attempts += 1;
            match simulator.run_case(name, output_dir) {
                Ok(()) => return Ok(()),
                Err(e) if e.is_retryable() && attempts <= timeout_retries => {
                    warn!("{e}; retrying ({attempts}/{timeout_retries})");
                }
                Err(e) => return Err(e),
            }
        }
    })();
    CaseOutcome {
        attempts,
        duration: started.elapsed(),
        result,
    }
}

// ---------------------------------------------------------------------------
// Batch driver
// ---------------------------------------------------------------------------

/// Generate (or reload) the design and run every case.
///
/// `stop` is polled between cases; once set, no new case is started and the
/// remaining ones are reported as skipped.
pub fn run_batch<S: Simulator + ?Sized>(
    config: &BatchConfig,
    simulator: &S,
    stop: Option<&AtomicBool>,
) -> Result<BatchReport> {
    if config.sample_count == 0 {
        return Err(Error::InvalidInput(
            "sample count must be at least 1".to_string(),
        ));
    }
    if config.jobs == 0 {
        return Err(Error::InvalidInput("jobs must be at least 1".to_string()));
    }
    config.space.validate()?;

    let output_dir = config.output_dir.as_path();
    std::fs::create_dir_all(output_dir)
        .map_err(|e| Error::io(format!("creating {}", output_dir.display()), e))?;

    let design = prepare_design(config)?;
    let started_at = unix_now();
    info!(
        "campaign {}: {} case(s), seed {}, {} job(s), policy {}",
        design.campaign_id,
        design.len(),
        design.seed,
        config.jobs,
        config.failure_policy
    );

    let records = dispatch_all(config, &design, simulator, stop);

    let report = BatchReport {
        version: 1,
        campaign_id: design.campaign_id.clone(),
        started_at,
        ended_at: unix_now(),
        failure_policy: config.failure_policy.to_string(),
        processes: config.processes,
        jobs: config.jobs,
        cases: records.iter().map(|(record, _)| record.clone()).collect(),
        histmatch_version: crate::VERSION.to_string(),
    };
    report.save(output_dir)?;

    info!(
        "batch finished: {} completed, {} reused, {} failed, {} skipped",
        report.count(CaseStatus::Completed),
        report.count(CaseStatus::Reused),
        report.count(CaseStatus::Failed),
        report.count(CaseStatus::Skipped)
    );

    // Under fail-fast the first failure in design order aborts the batch.
    if config.failure_policy == FailurePolicy::FailFast
        && let Some(err) = records.into_iter().find_map(|(_, err)| err)
    {
        return Err(err);
    }

    let skipped = report.count(CaseStatus::Skipped);
    if skipped > 0 {
        return Err(Error::Interrupted { remaining: skipped });
    }
    Ok(report)
}

/// Load the design to resume, or generate and persist a fresh one.
fn prepare_design(config: &BatchConfig) -> Result<DesignRecord> {
    let output_dir = config.output_dir.as_path();
    let existing = DesignRecord::path(output_dir).is_file();

    if config.resume && existing {
        let design = DesignRecord::load(output_dir)?;
        if design.seed != config.seed
            || design.space != config.space
            || design.len() != config.sample_count
        {
            return Err(Error::InvalidInput(format!(
                "cannot resume: {} was generated with seed {} and {} case(s), \
                 requested seed {} and {} case(s)",
                DesignRecord::path(output_dir).display(),
                design.seed,
                design.len(),
                config.seed,
                config.sample_count
            )));
        }
        info!("resuming campaign {}", design.campaign_id);
        return Ok(design);
    }

    if existing {
        warn!(
            "replacing existing design in {}; earlier case output will not be reused",
            output_dir.display()
        );
    }
    let mut sampler = LatinHypercube::new(config.space.clone(), config.seed);
    let points = sampler.sample(config.sample_count);
    let design = DesignRecord::new(config.seed, config.space.clone(), points)?;
    let path = design.save(output_dir)?;
    info!("design written to {}", path.display());
    Ok(design)
}

/// Run every case of `design`, returning one record per case in design order
/// together with the error of each failed case.
fn dispatch_all<S: Simulator + ?Sized>(
    config: &BatchConfig,
    design: &DesignRecord,
    simulator: &S,
    stop: Option<&AtomicBool>,
) -> Vec<(CaseRecord, Option<Error>)> {
    let total = design.len();
    let next = AtomicUsize::new(0);
    let abort = AtomicBool::new(false);
    let slots: Mutex<Vec<Option<(CaseRecord, Option<Error>)>>> =
        Mutex::new((0..total).map(|_| None).collect());

    let halted = || {
        abort.load(Ordering::SeqCst) || stop.is_some_and(|s| s.load(Ordering::SeqCst))
    };

    std::thread::scope(|s| {
        for _ in 0..config.jobs.min(total) {
            s.spawn(|| {
                loop {
                    if halted() {
                        return;
                    }
                    let index = next.fetch_add(1, Ordering::SeqCst);
                    let Some(case) = design.cases.get(index) else {
                        return;
                    };

                    let entry = run_one(config, design, simulator, &case.point, &case.name, index);
                    if entry.1.is_some() && config.failure_policy == FailurePolicy::FailFast {
                        abort.store(true, Ordering::SeqCst);
                    }
                    if let Ok(mut slots) = slots.lock() {
                        slots[index] = Some(entry);
                    }
                }
            });
        }
    });

    let slots = slots.into_inner().unwrap_or_else(|poisoned| poisoned.into_inner());
    slots
        .into_iter()
        .zip(&design.cases)
        .map(|(slot, case)| {
            slot.unwrap_or_else(|| {
                (
                    CaseRecord {
                        name: case.name.clone(),
                        status: CaseStatus::Skipped,
                        attempts: 0,
                        duration_ms: 0,
                        error: None,
                    },
                    None,
                )
            })
        })
        .collect()
}

fn run_one<S: Simulator + ?Sized>(
    config: &BatchConfig,
    design: &DesignRecord,
    simulator: &S,
    point: &ParameterPoint,
    name: &CaseName,
    index: usize,
) -> (CaseRecord, Option<Error>) {
    let output_dir = config.output_dir.as_path();
    let total = design.len();

    if config.resume
        && design.owns_output(name, output_dir)
        && simulator.extract_observation(name, output_dir).is_ok()
    {
        info!("[{}/{total}] {name}: output present, reusing", index + 1);
        let record = CaseRecord {
            name: name.clone(),
            status: CaseStatus::Reused,
            attempts: 0,
            duration_ms: 0,
            error: None,
        };
        return (record, None);
    }

    let outcome = match CaseStamp::clear(name, output_dir) {
        Ok(()) => dispatch_case(simulator, point, name, output_dir, config.timeout_retries),
        Err(e) => CaseOutcome {
            attempts: 0,
            duration: Duration::ZERO,
            result: Err(e),
        },
    };
    let duration_ms = outcome.duration.as_millis() as u64;
    let result = outcome.result.and_then(|()| {
        CaseStamp::new(&design.campaign_id)
            .save(name, output_dir)
            .map(drop)
    });
    match result {
        Ok(()) => {
            info!(
                "[{}/{total}] {name}: completed in {:.1}s",
                index + 1,
                outcome.duration.as_secs_f64()
            );
            let record = CaseRecord {
                name: name.clone(),
                status: CaseStatus::Completed,
                attempts: outcome.attempts,
                duration_ms,
                error: None,
            };
            (record, None)
        }
        Err(e) => {
            warn!("[{}/{total}] {name}: {e}", index + 1);
            let record = CaseRecord {
                name: name.clone(),
                status: CaseStatus::Failed,
                attempts: outcome.attempts,
                duration_ms,
                error: Some(e.to_string()),
            };
            (record, Some(e))
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use std::collections::HashSet;
    use std::fs;

    use super::*;
    use crate::simulation::Observation;

    /// Writes `sum(point)` as the observation; fails or times out on request.
    #[derive(Default)]
    struct ScriptedSimulator {
        fail: HashSet<String>,
        timeouts: Mutex<Vec<String>>,
        runs: Mutex<Vec<String>>,
    }

    impl Simulator for ScriptedSimulator {
        fn create_case(&self, point: &ParameterPoint, name: &CaseName, output_dir: &Path) -> Result<()> {
            let dir = name.case_dir(output_dir);
            fs::create_dir_all(&dir).unwrap();
            let sum: f64 = point.values().iter().sum();
            fs::write(dir.join("pending"), sum.to_string()).unwrap();
            Ok(())
        }

        fn run_case(&self, name: &CaseName, output_dir: &Path) -> Result<()> {
            self.runs.lock().unwrap().push(name.to_string());
            if self.fail.contains(name.as_str()) {
                return Err(Error::SimulationFailure {
                    case: name.to_string(),
                    reason: "exit status 1".to_string(),
                });
            }
            let mut timeouts = self.timeouts.lock().unwrap();
            if let Some(pos) = timeouts.iter().position(|n| n == name.as_str()) {
                timeouts.remove(pos);
                return Err(Error::Timeout {
                    case: name.to_string(),
                    seconds: 1.0,
                });
            }
            let dir = name.case_dir(output_dir);
            fs::rename(dir.join("pending"), dir.join("done")).unwrap();
            Ok(())
        }

        fn extract_observation(&self, name: &CaseName, output_dir: &Path) -> Result<Observation> {
            let path = name.case_dir(output_dir).join("done");
            let text = fs::read_to_string(&path).map_err(|_| Error::MissingResult {
                case: name.to_string(),
                path: path.clone(),
            })?;
            Observation::scalar(text.parse().unwrap())
        }
    }

    fn config(dir: &Path, n: usize) -> BatchConfig {
        BatchConfig {
            sample_count: n,
            output_dir: dir.to_path_buf(),
            ..Default::default()
        }
    }

    fn runs(sim: &ScriptedSimulator) -> Vec<String> {
        sim.runs.lock().unwrap().clone()
    }

    #[test]
    fn test_parse_sample_count() {
        assert_eq!(parse_sample_count("12").unwrap(), 12);
        assert_eq!(parse_sample_count(" 3 ").unwrap(), 3);
        for bad in ["abc", "", "0", "-4", "2.5", "1e3"] {
            assert!(
                matches!(parse_sample_count(bad), Err(Error::InvalidInput(_))),
                "{bad:?} accepted"
            );
        }
    }

    #[test]
    fn test_zero_samples_dispatches_nothing() {
        let tmp = tempfile::tempdir().unwrap();
        let sim = ScriptedSimulator::default();
        let err = run_batch(&config(tmp.path(), 0), &sim, None).unwrap_err();
        assert!(matches!(err, Error::InvalidInput(_)));
        assert!(runs(&sim).is_empty());
        assert!(!DesignRecord::path(tmp.path()).exists());
    }

    #[test]
    fn test_batch_runs_cases_in_order_and_persists_design() {
        let tmp = tempfile::tempdir().unwrap();
        let sim = ScriptedSimulator::default();
        let report = run_batch(&config(tmp.path(), 4), &sim, None).unwrap();

        assert_eq!(
            runs(&sim),
            vec!["simulation_1", "simulation_2", "simulation_3", "simulation_4"]
        );
        assert_eq!(report.count(CaseStatus::Completed), 4);
        let design = DesignRecord::load(tmp.path()).unwrap();
        assert_eq!(design.len(), 4);
        assert_eq!(design.seed, DEFAULT_DESIGN_SEED);
        assert!(BatchReport::load(tmp.path()).unwrap().is_some());
    }

    #[test]
    fn test_batch_design_is_reproducible() {
        let a = tempfile::tempdir().unwrap();
        let b = tempfile::tempdir().unwrap();
        run_batch(&config(a.path(), 6), &ScriptedSimulator::default(), None).unwrap();
        run_batch(&config(b.path(), 6), &ScriptedSimulator::default(), None).unwrap();
        let da = DesignRecord::load(a.path()).unwrap();
        let db = DesignRecord::load(b.path()).unwrap();
        assert_eq!(da.cases, db.cases);
    }

    #[test]
    fn test_fail_fast_aborts_and_records() {
        let tmp = tempfile::tempdir().unwrap();
        let sim = ScriptedSimulator {
            fail: HashSet::from(["simulation_2".to_string()]),
            ..Default::default()
        };
        let err = run_batch(&config(tmp.path(), 4), &sim, None).unwrap_err();
        assert!(matches!(err, Error::SimulationFailure { ref case, .. } if case == "simulation_2"));
        assert_eq!(runs(&sim), vec!["simulation_1", "simulation_2"]);

        let report = BatchReport::load(tmp.path()).unwrap().unwrap();
        let statuses: Vec<CaseStatus> = report.cases.iter().map(|c| c.status).collect();
        assert_eq!(
            statuses,
            vec![
                CaseStatus::Completed,
                CaseStatus::Failed,
                CaseStatus::Skipped,
                CaseStatus::Skipped
            ]
        );
    }

    #[test]
    fn test_skip_and_record_continues() {
        let tmp = tempfile::tempdir().unwrap();
        let sim = ScriptedSimulator {
            fail: HashSet::from(["simulation_2".to_string()]),
            ..Default::default()
        };
        let cfg = BatchConfig {
            failure_policy: FailurePolicy::SkipAndRecord,
            ..config(tmp.path(), 3)
        };
        let report = run_batch(&cfg, &sim, None).unwrap();
        assert_eq!(runs(&sim).len(), 3);
        assert_eq!(report.count(CaseStatus::Failed), 1);
        assert_eq!(report.count(CaseStatus::Completed), 2);
        let failed: Vec<&str> = report.failed_cases().map(CaseName::as_str).collect();
        assert_eq!(failed, vec!["simulation_2"]);
        assert_eq!(report.cases[1].error.as_deref().map(|e| e.contains("exit status 1")), Some(true));
    }

    #[test]
    fn test_timeout_is_retried() {
        let tmp = tempfile::tempdir().unwrap();
        let sim = ScriptedSimulator {
            timeouts: Mutex::new(vec!["simulation_1".to_string()]),
            ..Default::default()
        };
        let report = run_batch(&config(tmp.path(), 2), &sim, None).unwrap();
        assert_eq!(report.cases[0].attempts, 2);
        assert_eq!(report.cases[0].status, CaseStatus::Completed);
        assert_eq!(report.cases[1].attempts, 1);
    }

    #[test]
    fn test_timeout_without_retries_fails() {
        let tmp = tempfile::tempdir().unwrap();
        let sim = ScriptedSimulator {
            timeouts: Mutex::new(vec!["simulation_1".to_string()]),
            ..Default::default()
        };
        let cfg = BatchConfig {
            timeout_retries: 0,
            ..config(tmp.path(), 2)
        };
        assert!(matches!(
            run_batch(&cfg, &sim, None),
            Err(Error::Timeout { .. })
        ));
    }

    #[test]
    fn test_resume_reuses_completed_cases() {
        let tmp = tempfile::tempdir().unwrap();
        let first = ScriptedSimulator {
            fail: HashSet::from(["simulation_3".to_string()]),
            ..Default::default()
        };
        assert!(run_batch(&config(tmp.path(), 3), &first, None).is_err());
        let before = DesignRecord::load(tmp.path()).unwrap();

        let second = ScriptedSimulator::default();
        let cfg = BatchConfig {
            resume: true,
            ..config(tmp.path(), 3)
        };
        let report = run_batch(&cfg, &second, None).unwrap();
        assert_eq!(runs(&second), vec!["simulation_3"]);
        assert_eq!(report.count(CaseStatus::Reused), 2);
        assert_eq!(report.count(CaseStatus::Completed), 1);
        assert_eq!(DesignRecord::load(tmp.path()).unwrap(), before);
    }

    #[test]
    fn test_replaced_design_ignores_earlier_output() {
        let tmp = tempfile::tempdir().unwrap();
        run_batch(&config(tmp.path(), 3), &ScriptedSimulator::default(), None).unwrap();

        // A new design over the same directory, stopped before any case runs.
        let reseeded = BatchConfig {
            seed: 2,
            ..config(tmp.path(), 3)
        };
        let stop = AtomicBool::new(true);
        let sim = ScriptedSimulator::default();
        assert!(matches!(
            run_batch(&reseeded, &sim, Some(&stop)),
            Err(Error::Interrupted { remaining: 3 })
        ));
        let err = crate::aggregate::load_training_set(tmp.path(), &sim, Default::default())
            .unwrap_err();
        assert!(matches!(err, Error::MissingResult { ref case, .. } if case == "simulation_1"));

        // Resuming the new design reruns every case instead of reusing them.
        let resumed = BatchConfig {
            resume: true,
            ..reseeded
        };
        let report = run_batch(&resumed, &sim, None).unwrap();
        assert_eq!(report.count(CaseStatus::Reused), 0);
        assert_eq!(report.count(CaseStatus::Completed), 3);
        assert_eq!(runs(&sim).len(), 3);

        let design = DesignRecord::load(tmp.path()).unwrap();
        let training =
            crate::aggregate::load_training_set(tmp.path(), &sim, Default::default()).unwrap();
        for (case, obs) in design.cases.iter().zip(training.observations()) {
            let sum: f64 = case.point.values().iter().sum();
            assert_eq!(obs.values(), &[sum]);
        }
    }

    #[test]
    fn test_completed_cases_are_stamped() {
        let tmp = tempfile::tempdir().unwrap();
        let sim = ScriptedSimulator {
            fail: HashSet::from(["simulation_2".to_string()]),
            ..Default::default()
        };
        let cfg = BatchConfig {
            failure_policy: FailurePolicy::SkipAndRecord,
            ..config(tmp.path(), 3)
        };
        run_batch(&cfg, &sim, None).unwrap();
        let design = DesignRecord::load(tmp.path()).unwrap();
        let owned: Vec<bool> = design
            .cases
            .iter()
            .map(|c| design.owns_output(&c.name, tmp.path()))
            .collect();
        assert_eq!(owned, vec![true, false, true]);
    }

    #[test]
    fn test_resume_rejects_mismatched_design() {
        let tmp = tempfile::tempdir().unwrap();
        run_batch(&config(tmp.path(), 3), &ScriptedSimulator::default(), None).unwrap();
        let cfg = BatchConfig {
            resume: true,
            ..config(tmp.path(), 5)
        };
        let sim = ScriptedSimulator::default();
        assert!(matches!(
            run_batch(&cfg, &sim, None),
            Err(Error::InvalidInput(_))
        ));
        assert!(runs(&sim).is_empty());
    }

    #[test]
    fn test_parallel_jobs_keep_design_order() {
        let tmp = tempfile::tempdir().unwrap();
        let sim = ScriptedSimulator::default();
        let cfg = BatchConfig {
            jobs: 4,
            ..config(tmp.path(), 12)
        };
        let report = run_batch(&cfg, &sim, None).unwrap();
        let names: Vec<String> = report.cases.iter().map(|c| c.name.to_string()).collect();
        let expected: Vec<String> = (1..=12).map(|i| format!("simulation_{i}")).collect();
        assert_eq!(names, expected);
        let mut ran = runs(&sim);
        ran.sort();
        let mut expected_sorted = expected.clone();
        expected_sorted.sort();
        assert_eq!(ran, expected_sorted);
    }

    #[test]
    fn test_stop_flag_skips_remaining() {
        let tmp = tempfile::tempdir().unwrap();
        let stop = AtomicBool::new(true);
        let sim = ScriptedSimulator::default();
        let err = run_batch(&config(tmp.path(), 3), &sim, Some(&stop)).unwrap_err();
        assert!(matches!(err, Error::Interrupted { remaining: 3 }));
        assert!(runs(&sim).is_empty());
        // The design is still persisted so the batch can be resumed.
        assert!(DesignRecord::load(tmp.path()).is_ok());
    }
}
