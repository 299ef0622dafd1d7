//! `histmatch run-batch`: generate a design and run one simulation per point.

use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use histmatch_core::{
    BatchConfig, BatchReport, CaseStatus, CommandSimulator, Error, FailurePolicy, Result,
    parse_sample_count, run_batch,
};

pub struct RunBatchCommandConfig<'a> {
    pub mpi_exec: &'a str,
    pub solver_exec: &'a str,
    pub output_dir: &'a str,
    pub sample_count: &'a str,
    pub processes: usize,
    pub timeout_sec: f64,
    pub timeout_retries: u32,
    pub jobs: usize,
    pub seed: u64,
    pub space_path: Option<&'a str>,
    pub skip_failed_cases: bool,
    pub resume: bool,
}

/// Run the run-batch command.
pub fn run(cmd: RunBatchCommandConfig<'_>) {
    // Everything the user typed is checked before the first case starts.
    let (config, simulator) = match build(&cmd) {
        Ok(parts) => parts,
        Err(e) => super::fail(&e),
    };

    // Ctrl+C stops dispatching new cases; running ones finish.
    let stop = Arc::new(AtomicBool::new(false));
    let s = stop.clone();
    if let Err(e) = ctrlc::set_handler(move || {
        s.store(true, Ordering::SeqCst);
    }) {
        log::warn!("could not install Ctrl+C handler: {e}");
    }

    println!("Running batch");
    println!("  Samples:   {}", config.sample_count);
    println!("  Seed:      {}", config.seed);
    println!("  Processes: {}", config.processes);
    println!("  Jobs:      {}", config.jobs);
    println!("  Policy:    {}", config.failure_policy);
    println!("  Output:    {}", config.output_dir.display());
    println!();

    match run_batch(&config, &simulator, Some(stop.as_ref())) {
        Ok(report) => print_summary(&report),
        Err(e) => {
            // batch.json is written even when the batch fails.
            if let Ok(Some(report)) = BatchReport::load(&config.output_dir) {
                print_summary(&report);
            }
            super::fail(&e);
        }
    }
}

fn build(cmd: &RunBatchCommandConfig<'_>) -> Result<(BatchConfig, CommandSimulator)> {
    let sample_count = parse_sample_count(cmd.sample_count)?;
    if cmd.jobs == 0 {
        return Err(Error::InvalidInput("--jobs must be at least 1".to_string()));
    }
    let space = super::load_space(cmd.space_path)?;
    let executor =
        super::executor_config(cmd.mpi_exec, cmd.solver_exec, cmd.processes, cmd.timeout_sec)?;

    let config = BatchConfig {
        sample_count,
        seed: cmd.seed,
        space: space.clone(),
        output_dir: PathBuf::from(cmd.output_dir),
        failure_policy: if cmd.skip_failed_cases {
            FailurePolicy::SkipAndRecord
        } else {
            FailurePolicy::FailFast
        },
        timeout_retries: cmd.timeout_retries,
        jobs: cmd.jobs,
        resume: cmd.resume,
        processes: cmd.processes,
    };
    Ok((config, CommandSimulator::new(executor, space)))
}

fn print_summary(report: &BatchReport) {
    println!(
        "Batch {}: {} completed, {} reused, {} failed, {} skipped",
        report.campaign_id,
        report.count(CaseStatus::Completed),
        report.count(CaseStatus::Reused),
        report.count(CaseStatus::Failed),
        report.count(CaseStatus::Skipped)
    );
    for case in &report.cases {
        if let Some(err) = &case.error {
            println!("  {:<16} {}  {err}", case.name.as_str(), case.status);
        }
    }
}
