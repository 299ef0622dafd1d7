//! `histmatch analysis`: emulate a finished batch and report the NROY space.

use std::path::{Path, PathBuf};

use histmatch_core::{
    AggregateOptions, Analysis, AnalysisConfig, CommandSimulator, DesignRecord, Error,
    GaussianProcess, GaussianProcessFitter, HistoryMatchConfig, ParameterSpace, Result,
    run_analysis,
};

pub struct AnalysisCommandConfig<'a> {
    pub mpi_exec: &'a str,
    pub solver_exec: &'a str,
    pub output_dir: &'a str,
    pub processes: usize,
    pub timeout_sec: f64,
    pub query_points: usize,
    pub query_seed: u64,
    pub threshold: f64,
    pub observation_variance: f64,
    pub model_discrepancy: f64,
    pub skip_failed_cases: bool,
    pub output_path: Option<&'a str>,
}

/// Run the analysis command.
pub fn run(cmd: AnalysisCommandConfig<'_>) {
    if let Err(e) = execute(&cmd) {
        super::fail(&e);
    }
}

fn execute(cmd: &AnalysisCommandConfig<'_>) -> Result<()> {
    let config = analysis_config(cmd)?;
    let executor =
        super::executor_config(cmd.mpi_exec, cmd.solver_exec, cmd.processes, cmd.timeout_sec)?;

    // The validation case is written with the campaign's own parameter names.
    let design = DesignRecord::load(&config.output_dir)?;
    let space = design.space.clone();
    let simulator = CommandSimulator::new(executor, space.clone());

    let analysis = run_analysis(&config, &simulator, &GaussianProcessFitter::default())?;
    print_analysis(&space, &analysis);

    if let Some(path) = cmd.output_path {
        write_report(Path::new(path), &analysis)?;
        println!();
        println!("Report written to {path}");
    }
    Ok(())
}

fn analysis_config(cmd: &AnalysisCommandConfig<'_>) -> Result<AnalysisConfig> {
    if cmd.query_points == 0 {
        return Err(Error::InvalidInput(
            "--query-points must be at least 1".to_string(),
        ));
    }
    Ok(AnalysisConfig {
        output_dir: PathBuf::from(cmd.output_dir),
        query_points: cmd.query_points,
        query_seed: cmd.query_seed,
        history: HistoryMatchConfig {
            threshold: cmd.threshold,
            observation_variance: cmd.observation_variance,
            model_discrepancy: cmd.model_discrepancy,
        },
        aggregate: AggregateOptions {
            skip_failed: cmd.skip_failed_cases,
        },
        ..Default::default()
    })
}

fn print_analysis(space: &ParameterSpace, analysis: &Analysis<GaussianProcess>) {
    let report = &analysis.report;

    println!("Training cases: {}", analysis.training_cases);
    for (j, hp) in analysis.model.hyperparameters().iter().enumerate() {
        println!(
            "  output {j}: signal variance {:.4}, nugget {:.2e}",
            hp.signal_variance, hp.nugget
        );
        for (range, length) in space.ranges().iter().zip(&hp.correlation_lengths) {
            println!("    {:<16} correlation length {length:.4}", range.name);
        }
    }
    println!();
    println!("Actual point: {}", analysis.validation.point);
    println!(
        "  {}",
        super::describe_point(space, analysis.validation.point.values())
    );
    println!("Observation:  {:?}", analysis.validation.observation.values());
    println!();
    println!(
        "NROY points: {} of {} ({:.1}%) at threshold {}",
        report.nroy_count,
        report.query_points,
        report.nroy_fraction * 100.0,
        analysis.history.threshold
    );
    if let Some(min) = report.min_implausibility {
        println!("Lowest implausibility: {min:.4}");
    }
    for entry in &report.nroy {
        println!(
            "  #{:<6} {}  I={:.4}",
            entry.index, entry.point, entry.implausibility
        );
    }
}

fn write_report(path: &Path, analysis: &Analysis<GaussianProcess>) -> Result<()> {
    let json = serde_json::to_string_pretty(&analysis.report)
        .map_err(|e| Error::InvalidInput(format!("serializing analysis report: {e}")))?;
    std::fs::write(path, json).map_err(|e| Error::io(format!("writing {}", path.display()), e))
}
