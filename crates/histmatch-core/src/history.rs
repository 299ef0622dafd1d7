//! History matching: rule out query points whose predictions sit too many
//! standard deviations away from the observation.
//!
//! For query `i` and output `j`:
//!
//! ```text
//! I_ij = |z_j − E_ij| / sqrt(V_ij + V_obs + V_md)
//! I_i  = max_j I_ij
//! ```
//!
//! `V_ij` is the emulator variance. The observation-error (`V_obs`) and
//! model-discrepancy (`V_md`) terms default to zero, leaving the emulator's
//! own uncertainty as the only source; they only contribute when set.
//! A point is Not Ruled Out Yet (NROY) when `I_i ≤ threshold`.

use serde::{Deserialize, Serialize};

use crate::design::ParameterPoint;
use crate::emulator::Prediction;
use crate::error::{Error, Result};
use crate::simulation::Observation;

/// Conventional cut-off used unless the caller picks another.
pub const DEFAULT_THRESHOLD: f64 = 2.0;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct HistoryMatchConfig {
    pub threshold: f64,
    pub observation_variance: f64,
    pub model_discrepancy: f64,
}

impl Default for HistoryMatchConfig {
    fn default() -> Self {
        Self {
            threshold: DEFAULT_THRESHOLD,
            observation_variance: 0.0,
            model_discrepancy: 0.0,
        }
    }
}

impl HistoryMatchConfig {
    pub(crate) fn validate(&self) -> Result<()> {
        if !(self.threshold.is_finite() && self.threshold > 0.0) {
            return Err(Error::InvalidInput(format!(
                "threshold must be a positive number, got {}",
                self.threshold
            )));
        }
        for (label, v) in [
            ("observation variance", self.observation_variance),
            ("model discrepancy", self.model_discrepancy),
        ] {
            if !(v.is_finite() && v >= 0.0) {
                return Err(Error::InvalidInput(format!(
                    "{label} must be non-negative, got {v}"
                )));
            }
        }
        Ok(())
    }
}

/// Implausibility of every query point and the indices that survive.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct HistoryMatch {
    pub threshold: f64,
    pub implausibility: Vec<f64>,
    pub nroy: Vec<usize>,
}

impl HistoryMatch {
    /// The surviving query points, in query order.
    ///
    /// `query_points` should be the slice that was scored; indices past its
    /// end are dropped.
    pub fn nroy_points<'a>(&self, query_points: &'a [ParameterPoint]) -> Vec<&'a ParameterPoint> {
        self.nroy.iter().filter_map(|&i| query_points.get(i)).collect()
    }

    pub fn ruled_out(&self) -> usize {
        self.implausibility.len() - self.nroy.len()
    }

    /// Fraction of query points still in NROY space.
    pub fn nroy_fraction(&self) -> f64 {
        if self.implausibility.is_empty() {
            return 0.0;
        }
        self.nroy.len() as f64 / self.implausibility.len() as f64
    }
}

/// Standardized distance between one prediction and one observed value.
///
/// A zero variance gives 0 when the mean equals the observation exactly and
/// `+∞` otherwise.
pub fn implausibility(observation: f64, mean: f64, variance: f64) -> f64 {
    let distance = (observation - mean).abs();
    if variance == 0.0 {
        return if distance == 0.0 { 0.0 } else { f64::INFINITY };
    }
    distance / variance.sqrt()
}

/// Score every query point against `observation` and extract the NROY set.
pub fn history_match(
    observation: &Observation,
    query_points: &[ParameterPoint],
    predictions: &[Prediction],
    config: &HistoryMatchConfig,
) -> Result<HistoryMatch> {
    config.validate()?;
    if query_points.len() != predictions.len() {
        return Err(Error::InvalidInput(format!(
            "{} query points but {} predictions",
            query_points.len(),
            predictions.len()
        )));
    }

    let extra_variance = config.observation_variance + config.model_discrepancy;
    let mut scores = Vec::with_capacity(predictions.len());

    for (index, prediction) in predictions.iter().enumerate() {
        if prediction.mean.len() != observation.dim()
            || prediction.variance.len() != observation.dim()
        {
            return Err(Error::InvalidInput(format!(
                "prediction {index} has {} outputs, observation has {}",
                prediction.mean.len(),
                observation.dim()
            )));
        }

        let mut worst: f64 = 0.0;
        for ((&z, &mean), &variance) in observation
            .values()
            .iter()
            .zip(&prediction.mean)
            .zip(&prediction.variance)
        {
            if !mean.is_finite() {
                return Err(Error::DegenerateUncertainty {
                    index,
                    reason: format!("non-finite mean {mean}"),
                });
            }
            if !(variance.is_finite() && variance >= 0.0) {
                return Err(Error::DegenerateUncertainty {
                    index,
                    reason: format!("invalid variance {variance}"),
                });
            }
            worst = worst.max(implausibility(z, mean, variance + extra_variance));
        }
        scores.push(worst);
    }

    let nroy = scores
        .iter()
        .enumerate()
        .filter(|&(_, &s)| s <= config.threshold)
        .map(|(i, _)| i)
        .collect();

    Ok(HistoryMatch {
        threshold: config.threshold,
        implausibility: scores,
        nroy,
    })
}
