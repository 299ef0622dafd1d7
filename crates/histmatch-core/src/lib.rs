//! # histmatch-core
//!
//! **Calibrate a simulator by ruling out the parameters that cannot explain an observation.**
//!
//! `histmatch-core` drives a history-matching campaign against an external,
//! MPI-launched solver: it lays out a Latin hypercube design, runs one
//! simulation per design point, fits a Gaussian-process emulator to the
//! results, and scores a large set of query points against an observation.
//!
//! ## Quick Start
//!
//! ```no_run
//! use std::path::PathBuf;
//!
//! use histmatch_core::{
//!     AnalysisConfig, BatchConfig, CommandSimulator, ExecutorConfig, GaussianProcessFitter,
//!     ParameterSpace, run_analysis, run_batch,
//! };
//!
//! let space = ParameterSpace::default();
//! let simulator = CommandSimulator::new(
//!     ExecutorConfig::new("mpiexec", "/opt/solver/bin/fdfault"),
//!     space.clone(),
//! );
//!
//! let batch = BatchConfig {
//!     sample_count: 20,
//!     space,
//!     output_dir: PathBuf::from("results"),
//!     ..Default::default()
//! };
//! run_batch(&batch, &simulator, None)?;
//!
//! let analysis = run_analysis(
//!     &AnalysisConfig::new("results"),
//!     &simulator,
//!     &GaussianProcessFitter::default(),
//! )?;
//! println!("Actual point: {}", analysis.validation.point);
//! println!("{} point(s) not ruled out yet", analysis.history.nroy.len());
//! # Ok::<(), histmatch_core::Error>(())
//! ```
//!
//! ## Architecture
//!
//! Design → Batch dispatch → Aggregation → Emulator fit → Query prediction → Implausibility
//!
//! Every stage talks to the solver through the [`Simulator`] trait and to the
//! emulator through [`Surrogate`] / [`SurrogateFitter`], so tests swap both for
//! in-process stubs. Campaign state lives in the output directory
//! (`design.json`, `batch.json`, `analysis.json`), never in process memory.

pub mod aggregate;
pub mod batch;
pub mod campaign;
pub mod design;
pub mod emulator;
pub mod error;
pub mod history;
pub mod pipeline;
pub mod simulation;
pub mod validation;

pub use aggregate::{AggregateOptions, TrainingSet, load_training_set, training_set_from_design};
pub use batch::{BatchConfig, FailurePolicy, parse_sample_count, run_batch};
pub use campaign::{
    BatchReport, CaseName, CaseRecord, CaseStamp, CaseStatus, DesignCase, DesignRecord,
};
pub use design::{
    DEFAULT_DESIGN_SEED, LatinHypercube, ParameterPoint, ParameterRange, ParameterSpace, Sampler,
};
pub use emulator::{
    GaussianProcess, GaussianProcessFitter, GpConfig, Hyperparameters, Prediction, Surrogate,
    SurrogateFitter,
};
pub use error::{Error, Result};
pub use history::{DEFAULT_THRESHOLD, HistoryMatch, HistoryMatchConfig, history_match};
pub use pipeline::{
    Analysis, AnalysisConfig, AnalysisReport, DEFAULT_QUERY_POINTS, DEFAULT_QUERY_SEED,
    NroyEntry, run_analysis,
};
pub use simulation::{CommandSimulator, ExecutorConfig, Observation, Simulator, read_observation};
pub use validation::{ValidationPoint, draw_and_run_validation};

/// Library version (from Cargo.toml).
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
