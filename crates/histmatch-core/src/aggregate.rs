//! Result aggregation: pair every persisted design point with its simulation output.

use std::collections::HashSet;
use std::path::Path;

use log::{info, warn};

use crate::campaign::{BatchReport, CaseName, CaseStamp, DesignRecord};
use crate::design::ParameterPoint;
use crate::error::{Error, Result};
use crate::simulation::{Observation, Simulator};

/// Design points paired index-by-index with their observations.
#[derive(Debug, Clone, PartialEq)]
pub struct TrainingSet {
    names: Vec<CaseName>,
    points: Vec<ParameterPoint>,
    observations: Vec<Observation>,
}

impl TrainingSet {
    /// Pair `points[i]` with `observations[i]`.
    ///
    /// All points must share a dimension, all observations must share an
    /// output dimension, and both sequences must have the same length.
    pub fn new(
        names: Vec<CaseName>,
        points: Vec<ParameterPoint>,
        observations: Vec<Observation>,
    ) -> Result<Self> {
        if points.is_empty() {
            return Err(Error::FitFailure("training set is empty".to_string()));
        }
        if points.len() != observations.len() || points.len() != names.len() {
            return Err(Error::FitFailure(format!(
                "training set misaligned: {} names, {} points, {} observations",
                names.len(),
                points.len(),
                observations.len()
            )));
        }
        let input_dim = points[0].dim();
        if let Some((name, p)) = names.iter().zip(&points).find(|(_, p)| p.dim() != input_dim) {
            return Err(Error::FitFailure(format!(
                "{name} has {} inputs, expected {input_dim}",
                p.dim()
            )));
        }
        let output_dim = observations[0].dim();
        if let Some((name, o)) = names
            .iter()
            .zip(&observations)
            .find(|(_, o)| o.dim() != output_dim)
        {
            return Err(Error::FitFailure(format!(
                "{name} has {} outputs, expected {output_dim}",
                o.dim()
            )));
        }
        Ok(Self {
            names,
            points,
            observations,
        })
    }

    pub fn len(&self) -> usize {
        self.points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    pub fn names(&self) -> &[CaseName] {
        &self.names
    }

    pub fn points(&self) -> &[ParameterPoint] {
        &self.points
    }

    pub fn observations(&self) -> &[Observation] {
        &self.observations
    }

    pub fn input_dim(&self) -> usize {
        self.points[0].dim()
    }

    pub fn output_dim(&self) -> usize {
        self.observations[0].dim()
    }

    /// Values of output `j` across all cases, in design order.
    pub fn output_column(&self, j: usize) -> Vec<f64> {
        self.observations.iter().map(|o| o.values()[j]).collect()
    }
}

/// How the aggregator treats cases that did not produce output.
#[derive(Debug, Clone, Copy, Default)]
pub struct AggregateOptions {
    /// Leave out cases that `batch.json` records as failed. Any other missing
    /// case is still an error.
    pub skip_failed: bool,
}

/// Reload `design.json` and extract each case's observation in design order.
pub fn load_training_set<S: Simulator + ?Sized>(
    output_dir: &Path,
    simulator: &S,
    options: AggregateOptions,
) -> Result<TrainingSet> {
    let design = DesignRecord::load(output_dir)?;
    training_set_from_design(&design, output_dir, simulator, options)
}

/// Extract the observation of every case of an already loaded design.
///
/// Output that is not stamped with the design's campaign id (left behind by a
/// replaced design, or never completed) counts as missing.
pub fn training_set_from_design<S: Simulator + ?Sized>(
    design: &DesignRecord,
    output_dir: &Path,
    simulator: &S,
    options: AggregateOptions,
) -> Result<TrainingSet> {
    let skip: HashSet<CaseName> = if options.skip_failed {
        BatchReport::load(output_dir)?
            .map(|report| report.failed_cases().cloned().collect())
            .unwrap_or_default()
    } else {
        HashSet::new()
    };

    let mut names = Vec::with_capacity(design.len());
    let mut points = Vec::with_capacity(design.len());
    let mut observations = Vec::with_capacity(design.len());

    for case in &design.cases {
        if skip.contains(&case.name) {
            warn!("{}: recorded as failed, leaving it out of the training set", case.name);
            continue;
        }
        let observation = simulator.extract_observation(&case.name, output_dir)?;
        if !design.owns_output(&case.name, output_dir) {
            warn!(
                "{}: output was not produced by campaign {}",
                case.name, design.campaign_id
            );
            return Err(Error::MissingResult {
                case: case.name.to_string(),
                path: CaseStamp::path(&case.name, output_dir),
            });
        }
        names.push(case.name.clone());
        points.push(case.point.clone());
        observations.push(observation);
    }

    if names.is_empty() {
        return Err(Error::FitFailure(format!(
            "no usable cases in {}",
            output_dir.display()
        )));
    }

    info!(
        "training set: {} of {} case(s) from {}",
        names.len(),
        design.len(),
        output_dir.display()
    );
    TrainingSet::new(names, points, observations)
}
