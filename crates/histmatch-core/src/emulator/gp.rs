//! Gaussian-process emulator with a squared-exponential kernel.
//!
//! Inputs and outputs are standardized with the training set's mean and
//! standard deviation. Each output dimension gets its own zero-mean process
//! with kernel
//!
//! ```text
//! k(x, x') = s² · exp(-½ Σ_d ((x_d − x'_d) / ℓ_d)²)
//! ```
//!
//! The correlation lengths `ℓ_d` and signal variance `s²` maximize the log
//! marginal likelihood. The optimizer works on their logarithms and starts
//! from a fixed set of points, so a fit is a pure function of its training
//! set. A nugget is added to the covariance diagonal: the smallest entry of
//! [`NUGGET_LADDER`] (relative to `s²`) for which the Cholesky factorization
//! succeeds, unless a fixed nugget is configured.

use std::f64::consts::PI;

use log::debug;
use nalgebra::{Cholesky, DMatrix, DVector, Dyn};
use serde::{Deserialize, Serialize};

use super::optimize::{SimplexOptions, nelder_mead};
use super::{Prediction, Surrogate, SurrogateFitter};
use crate::aggregate::TrainingSet;
use crate::design::ParameterPoint;
use crate::error::{Error, Result};

/// Relative nugget sizes tried in order when no fixed nugget is configured.
pub const NUGGET_LADDER: [f64; 7] = [1e-10, 1e-9, 1e-8, 1e-7, 1e-6, 1e-4, 1e-2];

/// Bounds on log correlation length, in standardized input units.
const LOG_LENGTH_BOUNDS: (f64, f64) = (-4.6, 4.6);
/// Bounds on log signal variance, in standardized output units.
const LOG_VARIANCE_BOUNDS: (f64, f64) = (-13.8, 9.2);

/// Starting log correlation lengths; every start uses unit signal variance.
const LOG_LENGTH_STARTS: [f64; 3] = [0.0, -1.2, 1.2];

/// Gaussian-process fitting options.
#[derive(Debug, Clone)]
pub struct GpConfig {
    pub optimizer: SimplexOptions,
    /// Absolute nugget in standardized units; `None` picks one adaptively.
    pub fixed_nugget: Option<f64>,
}

impl Default for GpConfig {
    fn default() -> Self {
        Self {
            optimizer: SimplexOptions::default(),
            fixed_nugget: None,
        }
    }
}

/// Fitted hyperparameters of one output, in the original units.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Hyperparameters {
    pub correlation_lengths: Vec<f64>,
    pub signal_variance: f64,
    pub nugget: f64,
    pub log_likelihood: f64,
}

/// Affine map to zero mean and unit spread.
#[derive(Debug, Clone)]
struct Scaling {
    mean: f64,
    scale: f64,
}

impl Scaling {
    fn fit(values: &[f64]) -> Self {
        let n = values.len() as f64;
        let mean = values.iter().sum::<f64>() / n;
        let var = values.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / n;
        let sd = var.sqrt();
        Self {
            mean,
            scale: if sd > f64::EPSILON * mean.abs().max(1.0) {
                sd
            } else {
                1.0
            },
        }
    }

    fn forward(&self, v: f64) -> f64 {
        (v - self.mean) / self.scale
    }

    fn inverse(&self, v: f64) -> f64 {
        self.mean + v * self.scale
    }
}

/// Squared-exponential kernel evaluation.
fn kernel(a: &[f64], b: &[f64], lengths: &[f64], variance: f64) -> f64 {
    let r2: f64 = a
        .iter()
        .zip(b)
        .zip(lengths)
        .map(|((x, y), l)| ((x - y) / l).powi(2))
        .sum();
    variance * (-0.5 * r2).exp()
}

fn covariance(x: &[Vec<f64>], lengths: &[f64], variance: f64, nugget: f64) -> DMatrix<f64> {
    let n = x.len();
    DMatrix::from_fn(n, n, |i, j| {
        let k = kernel(&x[i], &x[j], lengths, variance);
        if i == j { k + nugget } else { k }
    })
}

/// Factorized covariance for one hyperparameter setting.
struct Factorization {
    chol: Cholesky<f64, Dyn>,
    alpha: DVector<f64>,
    nugget: f64,
    log_likelihood: f64,
}

fn factorize(
    x: &[Vec<f64>],
    y: &DVector<f64>,
    lengths: &[f64],
    variance: f64,
    fixed_nugget: Option<f64>,
) -> Option<Factorization> {
    let ladder: Vec<f64> = match fixed_nugget {
        Some(n) => vec![n],
        None => NUGGET_LADDER.iter().map(|r| r * variance).collect(),
    };
    for nugget in ladder {
        let Some(chol) = covariance(x, lengths, variance, nugget).cholesky() else {
            continue;
        };
        let alpha = chol.solve(y);
        let log_det: f64 = 2.0 * chol.l_dirty().diagonal().iter().map(|d| d.ln()).sum::<f64>();
        let n = y.len() as f64;
        let log_likelihood = -0.5 * y.dot(&alpha) - 0.5 * log_det - 0.5 * n * (2.0 * PI).ln();
        if log_likelihood.is_finite() {
            return Some(Factorization {
                chol,
                alpha,
                nugget,
                log_likelihood,
            });
        }
    }
    None
}

/// Unpack `[ln ℓ_1 .. ln ℓ_D, ln s²]`, rejecting out-of-bounds values.
fn unpack(theta: &[f64]) -> Option<(Vec<f64>, f64)> {
    let (log_lengths, log_variance) = theta.split_at(theta.len() - 1);
    let in_bounds = |v: f64, (lo, hi): (f64, f64)| v >= lo && v <= hi;
    if !log_lengths.iter().all(|&l| in_bounds(l, LOG_LENGTH_BOUNDS))
        || !in_bounds(log_variance[0], LOG_VARIANCE_BOUNDS)
    {
        return None;
    }
    Some((
        log_lengths.iter().map(|l| l.exp()).collect(),
        log_variance[0].exp(),
    ))
}

/// One fitted output dimension.
#[derive(Debug, Clone)]
struct OutputProcess {
    lengths: Vec<f64>,
    variance: f64,
    chol: Cholesky<f64, Dyn>,
    alpha: DVector<f64>,
    scaling: Scaling,
    hyperparameters: Hyperparameters,
}

impl OutputProcess {
    fn fit(
        x: &[Vec<f64>],
        input_scaling: &[Scaling],
        targets: &[f64],
        config: &GpConfig,
        output: usize,
    ) -> Result<Self> {
        let scaling = Scaling::fit(targets);
        let y = DVector::from_iterator(targets.len(), targets.iter().map(|&t| scaling.forward(t)));
        let dim = input_scaling.len();

        let objective = |theta: &[f64]| -> f64 {
            let Some((lengths, variance)) = unpack(theta) else {
                return f64::INFINITY;
            };
            factorize(x, &y, &lengths, variance, config.fixed_nugget)
                .map_or(f64::INFINITY, |f| -f.log_likelihood)
        };

        let mut best: Option<(Vec<f64>, f64)> = None;
        for &start in &LOG_LENGTH_STARTS {
            let mut theta0 = vec![start; dim];
            theta0.push(0.0);
            let min = nelder_mead(&objective, &theta0, config.optimizer);
            debug!(
                "output {output}: start ln(l)={start:+.1} -> -logL {:.4} after {} iterations{}",
                min.value,
                min.iterations,
                if min.converged { "" } else { " (not converged)" }
            );
            if min.value.is_finite() && best.as_ref().is_none_or(|(_, v)| min.value < *v) {
                best = Some((min.x, min.value));
            }
        }

        let Some((theta, _)) = best else {
            return Err(Error::FitFailure(format!(
                "output {output}: covariance is not positive definite for any hyperparameters"
            )));
        };
        let (lengths, variance) = unpack(&theta)
            .ok_or_else(|| Error::FitFailure(format!("output {output}: optimizer left bounds")))?;
        let fact = factorize(x, &y, &lengths, variance, config.fixed_nugget).ok_or_else(|| {
            Error::FitFailure(format!("output {output}: final factorization failed"))
        })?;

        let hyperparameters = Hyperparameters {
            correlation_lengths: lengths
                .iter()
                .zip(input_scaling)
                .map(|(l, s)| l * s.scale)
                .collect(),
            signal_variance: variance * scaling.scale.powi(2),
            nugget: fact.nugget * scaling.scale.powi(2),
            log_likelihood: fact.log_likelihood,
        };

        Ok(Self {
            lengths,
            variance,
            chol: fact.chol,
            alpha: fact.alpha,
            scaling,
            hyperparameters,
        })
    }

    /// Mean and variance at a standardized input.
    fn predict(&self, x_train: &[Vec<f64>], x: &[f64]) -> (f64, f64) {
        let k = DVector::from_iterator(
            x_train.len(),
            x_train
                .iter()
                .map(|xi| kernel(xi, x, &self.lengths, self.variance)),
        );
        let mean = k.dot(&self.alpha);
        let reduction = self
            .chol
            .l_dirty()
            .solve_lower_triangular(&k)
            .map_or(0.0, |v| v.norm_squared());
        let variance = (self.variance - reduction).max(0.0);
        (
            self.scaling.inverse(mean),
            variance * self.scaling.scale.powi(2),
        )
    }
}

/// Fitted multi-output Gaussian process.
#[derive(Debug, Clone)]
pub struct GaussianProcess {
    inputs: Vec<Vec<f64>>,
    input_scaling: Vec<Scaling>,
    outputs: Vec<OutputProcess>,
}

impl GaussianProcess {
    /// Fit one process per output dimension of `training`.
    pub fn fit(training: &TrainingSet, config: &GpConfig) -> Result<Self> {
        let dim = training.input_dim();
        if dim == 0 {
            return Err(Error::FitFailure("training points have no inputs".to_string()));
        }
        let values_finite = training
            .points()
            .iter()
            .all(|p| p.values().iter().all(|v| v.is_finite()));
        if !values_finite {
            return Err(Error::FitFailure(
                "training inputs contain non-finite values".to_string(),
            ));
        }

        let input_scaling: Vec<Scaling> = (0..dim)
            .map(|d| {
                let column: Vec<f64> = training.points().iter().map(|p| p.values()[d]).collect();
                Scaling::fit(&column)
            })
            .collect();
        let inputs: Vec<Vec<f64>> = training
            .points()
            .iter()
            .map(|p| standardize(p.values(), &input_scaling))
            .collect();

        let outputs = (0..training.output_dim())
            .map(|j| {
                OutputProcess::fit(
                    &inputs,
                    &input_scaling,
                    &training.output_column(j),
                    config,
                    j,
                )
            })
            .collect::<Result<Vec<_>>>()?;

        Ok(Self {
            inputs,
            input_scaling,
            outputs,
        })
    }

    pub fn input_dim(&self) -> usize {
        self.input_scaling.len()
    }

    pub fn output_dim(&self) -> usize {
        self.outputs.len()
    }

    /// Fitted hyperparameters, one entry per output.
    pub fn hyperparameters(&self) -> Vec<Hyperparameters> {
        self.outputs
            .iter()
            .map(|o| o.hyperparameters.clone())
            .collect()
    }
}

fn standardize(values: &[f64], scaling: &[Scaling]) -> Vec<f64> {
    values
        .iter()
        .zip(scaling)
        .map(|(&v, s)| s.forward(v))
        .collect()
}

impl Surrogate for GaussianProcess {
    fn predict(&self, points: &[ParameterPoint]) -> Result<Vec<Prediction>> {
        points
            .iter()
            .map(|p| {
                if p.dim() != self.input_dim() {
                    return Err(Error::InvalidInput(format!(
                        "query point {p} has {} values, emulator expects {}",
                        p.dim(),
                        self.input_dim()
                    )));
                }
                let x = standardize(p.values(), &self.input_scaling);
                let (mean, variance) = self
                    .outputs
                    .iter()
                    .map(|o| o.predict(&self.inputs, &x))
                    .unzip();
                Ok(Prediction { mean, variance })
            })
            .collect()
    }

    fn summary(&self) -> Option<serde_json::Value> {
        serde_json::to_value(self.hyperparameters()).ok()
    }
}

/// [`SurrogateFitter`] producing [`GaussianProcess`] models.
#[derive(Debug, Clone, Default)]
pub struct GaussianProcessFitter {
    pub config: GpConfig,
}

impl SurrogateFitter for GaussianProcessFitter {
    type Model = GaussianProcess;

    fn fit(&self, training: &TrainingSet) -> Result<GaussianProcess> {
        GaussianProcess::fit(training, &self.config)
    }
}
