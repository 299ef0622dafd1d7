//! Analysis pipeline: fit an emulator to a finished batch and history-match
//! a freshly simulated validation point against it.
//!
//! Stages, in order:
//! 1. Reload `design.json` and extract every case's observation
//! 2. Fit the surrogate once
//! 3. Draw the query set from a sampler seeded independently of the design
//! 4. Predict mean/variance at every query point
//! 5. Draw one more point from the same sampler and run it as `known_value`
//! 6. Score the predictions against that observation and write `analysis.json`

use std::path::{Path, PathBuf};

use log::{info, warn};
use serde::Serialize;

use crate::aggregate::{AggregateOptions, training_set_from_design};
use crate::campaign::{ANALYSIS_REPORT_FILE, DesignRecord, unix_now, write_json_atomic};
use crate::design::{LatinHypercube, ParameterPoint, Sampler};
use crate::emulator::{Prediction, Surrogate, SurrogateFitter};
use crate::error::{Error, Result};
use crate::history::{HistoryMatch, HistoryMatchConfig, history_match};
use crate::simulation::{Observation, Simulator};
use crate::validation::{ValidationPoint, draw_and_run_validation};

/// Number of query points scored per analysis.
pub const DEFAULT_QUERY_POINTS: usize = 1000;

/// Seed of the query/validation sampler, distinct from the design seed.
pub const DEFAULT_QUERY_SEED: u64 = 157_375;

#[derive(Debug, Clone)]
pub struct AnalysisConfig {
    pub output_dir: PathBuf,
    pub query_points: usize,
    pub query_seed: u64,
    pub history: HistoryMatchConfig,
    pub aggregate: AggregateOptions,
    /// Extra attempts granted to the validation run after a timeout.
    pub timeout_retries: u32,
}

impl AnalysisConfig {
    pub fn new(output_dir: impl Into<PathBuf>) -> Self {
        Self {
            output_dir: output_dir.into(),
            ..Default::default()
        }
    }
}

impl Default for AnalysisConfig {
    fn default() -> Self {
        Self {
            output_dir: PathBuf::from("results"),
            query_points: DEFAULT_QUERY_POINTS,
            query_seed: DEFAULT_QUERY_SEED,
            history: HistoryMatchConfig::default(),
            aggregate: AggregateOptions::default(),
            timeout_retries: 1,
        }
    }
}

/// Everything one analysis run produced, including the fitted model.
#[derive(Debug)]
pub struct Analysis<M> {
    pub campaign_id: String,
    pub training_cases: usize,
    pub model: M,
    pub query_points: Vec<ParameterPoint>,
    pub predictions: Vec<Prediction>,
    pub validation: ValidationPoint,
    pub history: HistoryMatch,
    pub report: AnalysisReport,
}

impl<M> Analysis<M> {
    pub fn nroy_points(&self) -> Vec<&ParameterPoint> {
        self.history.nroy_points(&self.query_points)
    }
}

/// One surviving query point.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct NroyEntry {
    pub index: usize,
    pub point: ParameterPoint,
    pub implausibility: f64,
}

/// Contents of `analysis.json`.
#[derive(Debug, Clone, Serialize)]
pub struct AnalysisReport {
    pub version: u32,
    pub campaign_id: String,
    pub created_at: u64,
    pub training_cases: usize,
    pub query_seed: u64,
    pub query_points: usize,
    pub history: HistoryMatchConfig,
    pub actual_point: ParameterPoint,
    pub observation: Observation,
    pub nroy_count: usize,
    pub nroy_fraction: f64,
    /// Smallest finite implausibility over the query set.
    pub min_implausibility: Option<f64>,
    pub nroy: Vec<NroyEntry>,
    /// Fitted surrogate state, when the surrogate exposes one.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub surrogate: Option<serde_json::Value>,
    pub histmatch_version: String,
}

impl AnalysisReport {
    pub fn path(output_dir: &Path) -> PathBuf {
        output_dir.join(ANALYSIS_REPORT_FILE)
    }

    pub fn save(&self, output_dir: &Path) -> Result<PathBuf> {
        let path = Self::path(output_dir);
        write_json_atomic(&path, self)?;
        Ok(path)
    }
}

/// Run the whole analysis over the campaign in `config.output_dir`.
pub fn run_analysis<S, F>(
    config: &AnalysisConfig,
    simulator: &S,
    fitter: &F,
) -> Result<Analysis<F::Model>>
where
    S: Simulator + ?Sized,
    F: SurrogateFitter,
{
    if config.query_points == 0 {
        return Err(Error::InvalidInput(
            "query point count must be a positive integer".to_string(),
        ));
    }
    config.history.validate()?;
    let output_dir = config.output_dir.as_path();

    let design = DesignRecord::load(output_dir)?;
    if design.seed == config.query_seed {
        warn!(
            "query seed {} equals the design seed; query points will repeat the design",
            config.query_seed
        );
    }

    let training = training_set_from_design(&design, output_dir, simulator, config.aggregate)?;
    let model = fitter.fit(&training)?;
    info!("emulator fitted to {} case(s)", training.len());

    let mut sampler = LatinHypercube::new(design.space.clone(), config.query_seed);
    let query_points = sampler.sample(config.query_points);
    let predictions = model.predict(&query_points)?;
    if predictions.len() != query_points.len() {
        return Err(Error::FitFailure(format!(
            "surrogate returned {} predictions for {} query points",
            predictions.len(),
            query_points.len()
        )));
    }
    info!("predicted {} query point(s)", query_points.len());

    let validation =
        draw_and_run_validation(&mut sampler, simulator, output_dir, config.timeout_retries)?;
    let history = history_match(
        &validation.observation,
        &query_points,
        &predictions,
        &config.history,
    )?;
    info!(
        "{} of {} query point(s) not ruled out at threshold {}",
        history.nroy.len(),
        query_points.len(),
        history.threshold
    );

    let report = AnalysisReport {
        version: 1,
        campaign_id: design.campaign_id.clone(),
        created_at: unix_now(),
        training_cases: training.len(),
        query_seed: config.query_seed,
        query_points: query_points.len(),
        history: config.history,
        actual_point: validation.point.clone(),
        observation: validation.observation.clone(),
        nroy_count: history.nroy.len(),
        nroy_fraction: history.nroy_fraction(),
        min_implausibility: history
            .implausibility
            .iter()
            .copied()
            .filter(|v| v.is_finite())
            .reduce(f64::min),
        nroy: history
            .nroy
            .iter()
            .map(|&index| NroyEntry {
                index,
                point: query_points[index].clone(),
                implausibility: history.implausibility[index],
            })
            .collect(),
        surrogate: model.summary(),
        histmatch_version: crate::VERSION.to_string(),
    };
    let path = report.save(output_dir)?;
    info!("analysis report written to {}", path.display());

    Ok(Analysis {
        campaign_id: design.campaign_id,
        training_cases: training.len(),
        model,
        query_points,
        predictions,
        validation,
        history,
        report,
    })
}
