//! Surrogate models of the simulator.
//!
//! A [`SurrogateFitter`] turns a [`TrainingSet`] into a [`Surrogate`], which
//! answers mean/variance queries without running the simulator. The analysis
//! pipeline fits once per run and reuses the fitted model for every query.

pub mod gp;
pub mod optimize;

use serde::{Deserialize, Serialize};

use crate::aggregate::TrainingSet;
use crate::design::ParameterPoint;
use crate::error::Result;

pub use gp::{GaussianProcess, GaussianProcessFitter, GpConfig, Hyperparameters};

/// Predictive mean and variance at one query point, per output.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Prediction {
    pub mean: Vec<f64>,
    pub variance: Vec<f64>,
}

impl Prediction {
    /// Single-output prediction.
    pub fn scalar(mean: f64, variance: f64) -> Self {
        Self {
            mean: vec![mean],
            variance: vec![variance],
        }
    }
}

/// A fitted emulator.
pub trait Surrogate {
    /// One prediction per query point, in query order.
    fn predict(&self, points: &[ParameterPoint]) -> Result<Vec<Prediction>>;

    /// Fitted state worth recording in the analysis report, if any.
    fn summary(&self) -> Option<serde_json::Value> {
        None
    }
}

/// Builds a [`Surrogate`] from simulation results.
pub trait SurrogateFitter {
    type Model: Surrogate;

    fn fit(&self, training: &TrainingSet) -> Result<Self::Model>;
}
