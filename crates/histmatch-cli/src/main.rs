//! CLI for histmatch: calibrate a simulator against an observation by history matching.

mod commands;

use clap::{Parser, Subcommand};

#[derive(Parser)]
#[command(name = "histmatch")]
#[command(about = "histmatch: Latin hypercube batches, Gaussian-process emulation and history matching")]
#[command(version = histmatch_core::VERSION)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Generate a Latin hypercube design and run one simulation per point
    RunBatch {
        /// MPI launcher (e.g. mpiexec)
        mpi_exec: String,

        /// Solver executable, run as `<MPI_EXEC> -n <processes> <SOLVER_EXEC> case.json`
        solver_exec: String,

        /// Directory holding design.json, batch.json and one directory per case
        output_dir: String,

        /// Number of design points (positive integer)
        sample_count: String,

        /// MPI processes per simulation
        #[arg(long, default_value = "4")]
        processes: usize,

        /// Per-simulation timeout in seconds (0 waits forever)
        #[arg(long, default_value = "3600")]
        timeout_sec: f64,

        /// Extra attempts granted to a simulation that timed out
        #[arg(long, default_value = "1")]
        timeout_retries: u32,

        /// Simulations running at once
        #[arg(long, default_value = "1")]
        jobs: usize,

        /// Design sampler seed
        #[arg(long, default_value_t = histmatch_core::DEFAULT_DESIGN_SEED)]
        seed: u64,

        /// JSON file with the parameter ranges: [{"name", "low", "high"}, ...]
        #[arg(long)]
        space: Option<String>,

        /// Record failed simulations in batch.json and keep going
        #[arg(long)]
        skip_failed_cases: bool,

        /// Reuse an existing design.json and skip cases that already have output
        #[arg(long)]
        resume: bool,
    },

    /// Fit the emulator to a finished batch, run a validation point and report NROY space
    Analysis {
        /// MPI launcher (e.g. mpiexec)
        mpi_exec: String,

        /// Solver executable
        solver_exec: String,

        /// Directory produced by `run-batch`
        output_dir: String,

        /// MPI processes for the validation run
        #[arg(long, default_value = "4")]
        processes: usize,

        /// Validation run timeout in seconds (0 waits forever)
        #[arg(long, default_value = "3600")]
        timeout_sec: f64,

        /// Number of query points scored against the observation
        #[arg(long, default_value_t = histmatch_core::DEFAULT_QUERY_POINTS)]
        query_points: usize,

        /// Seed of the query and validation sampler
        #[arg(long, default_value_t = histmatch_core::DEFAULT_QUERY_SEED)]
        query_seed: u64,

        /// Implausibility cut-off; points at or below it are not ruled out
        #[arg(long, default_value_t = histmatch_core::DEFAULT_THRESHOLD)]
        threshold: f64,

        /// Observation-error variance added to every emulator variance
        #[arg(long, default_value = "0")]
        observation_variance: f64,

        /// Model-discrepancy variance added to every emulator variance
        #[arg(long, default_value = "0")]
        model_discrepancy: f64,

        /// Leave cases recorded as failed in batch.json out of the training set
        #[arg(long)]
        skip_failed_cases: bool,

        /// Also write the analysis report as JSON to this path
        #[arg(long)]
        output: Option<String>,
    },

    /// Show the persisted design and the state of every case
    Status {
        /// Directory produced by `run-batch`
        output_dir: String,
    },
}

fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"))
        .format_timestamp_secs()
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::RunBatch {
            mpi_exec,
            solver_exec,
            output_dir,
            sample_count,
            processes,
            timeout_sec,
            timeout_retries,
            jobs,
            seed,
            space,
            skip_failed_cases,
            resume,
        } => commands::run_batch::run(commands::run_batch::RunBatchCommandConfig {
            mpi_exec: &mpi_exec,
            solver_exec: &solver_exec,
            output_dir: &output_dir,
            sample_count: &sample_count,
            processes,
            timeout_sec,
            timeout_retries,
            jobs,
            seed,
            space_path: space.as_deref(),
            skip_failed_cases,
            resume,
        }),
        Commands::Analysis {
            mpi_exec,
            solver_exec,
            output_dir,
            processes,
            timeout_sec,
            query_points,
            query_seed,
            threshold,
            observation_variance,
            model_discrepancy,
            skip_failed_cases,
            output,
        } => commands::analysis::run(commands::analysis::AnalysisCommandConfig {
            mpi_exec: &mpi_exec,
            solver_exec: &solver_exec,
            output_dir: &output_dir,
            processes,
            timeout_sec,
            query_points,
            query_seed,
            threshold,
            observation_variance,
            model_discrepancy,
            skip_failed_cases,
            output_path: output.as_deref(),
        }),
        Commands::Status { output_dir } => commands::status::run(&output_dir),
    }
}
