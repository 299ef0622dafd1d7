//! Parameter space and Latin hypercube design generation.
//!
//! A [`ParameterSpace`] is an ordered list of named inclusive ranges. The
//! [`LatinHypercube`] sampler splits every range into `n` equal strata, draws
//! one value per stratum and pairs the strata across dimensions through an
//! independent random permutation per dimension. The sampler owns its RNG,
//! seeded explicitly at construction, so two samplers never share state and
//! successive `sample` calls continue one reproducible stream.

use std::fmt;
use std::path::Path;

use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Seed used for training designs unless the caller picks another.
pub const DEFAULT_DESIGN_SEED: u64 = 157_374;

// ---------------------------------------------------------------------------
// Parameter space
// ---------------------------------------------------------------------------

/// One calibration dimension: a name and an inclusive `[low, high]` range.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParameterRange {
    pub name: String,
    pub low: f64,
    pub high: f64,
}

impl ParameterRange {
    pub fn new(name: impl Into<String>, low: f64, high: f64) -> Self {
        Self {
            name: name.into(),
            low,
            high,
        }
    }

    /// Width of the range.
    pub fn span(&self) -> f64 {
        self.high - self.low
    }

    pub fn contains(&self, value: f64) -> bool {
        value >= self.low && value <= self.high
    }
}

/// Ordered set of calibration dimensions.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ParameterSpace {
    ranges: Vec<ParameterRange>,
}

impl ParameterSpace {
    /// Build a space, rejecting empty, inverted, non-finite or duplicate ranges.
    pub fn new(ranges: Vec<ParameterRange>) -> Result<Self> {
        let space = Self { ranges };
        space.validate()?;
        Ok(space)
    }

    /// Load a space from a JSON array of `{ "name", "low", "high" }` objects.
    pub fn from_json_file(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)
            .map_err(|e| Error::io(format!("reading {}", path.display()), e))?;
        let space: Self = serde_json::from_str(&text).map_err(|e| {
            Error::InvalidInput(format!("parameter space {}: {e}", path.display()))
        })?;
        space.validate()?;
        Ok(space)
    }

    pub fn validate(&self) -> Result<()> {
        if self.ranges.is_empty() {
            return Err(Error::InvalidInput(
                "parameter space has no dimensions".to_string(),
            ));
        }
        for (i, r) in self.ranges.iter().enumerate() {
            if !r.low.is_finite() || !r.high.is_finite() {
                return Err(Error::InvalidInput(format!(
                    "range '{}' has non-finite bounds",
                    r.name
                )));
            }
            if r.low > r.high {
                return Err(Error::InvalidInput(format!(
                    "range '{}' is inverted: {} > {}",
                    r.name, r.low, r.high
                )));
            }
            if self.ranges[..i].iter().any(|o| o.name == r.name) {
                return Err(Error::InvalidInput(format!(
                    "duplicate parameter name '{}'",
                    r.name
                )));
            }
        }
        Ok(())
    }

    /// Number of dimensions.
    pub fn dim(&self) -> usize {
        self.ranges.len()
    }

    pub fn ranges(&self) -> &[ParameterRange] {
        &self.ranges
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.ranges.iter().map(|r| r.name.as_str())
    }

    /// Whether `point` has the right dimension and every component is in range.
    pub fn contains(&self, point: &ParameterPoint) -> bool {
        point.dim() == self.dim()
            && self
                .ranges
                .iter()
                .zip(point.values())
                .all(|(r, &v)| r.contains(v))
    }
}

impl Default for ParameterSpace {
    /// Rupture-dynamics calibration space: fault normal stress (MPa), initial
    /// shear-to-normal stress ratio, and dynamic-to-static friction ratio.
    fn default() -> Self {
        Self {
            ranges: vec![
                ParameterRange::new("normal_stress", -120.0, -80.0),
                ParameterRange::new("shear_ratio", 0.1, 0.4),
                ParameterRange::new("friction_ratio", 0.9, 1.1),
            ],
        }
    }
}

// ---------------------------------------------------------------------------
// Parameter point
// ---------------------------------------------------------------------------

/// One point in parameter space. Immutable once drawn.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ParameterPoint(Vec<f64>);

impl ParameterPoint {
    pub fn new(values: Vec<f64>) -> Self {
        Self(values)
    }

    pub fn values(&self) -> &[f64] {
        &self.0
    }

    pub fn dim(&self) -> usize {
        self.0.len()
    }
}

impl From<Vec<f64>> for ParameterPoint {
    fn from(values: Vec<f64>) -> Self {
        Self(values)
    }
}

impl fmt::Display for ParameterPoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[")?;
        for (i, v) in self.0.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{v:.6}")?;
        }
        write!(f, "]")
    }
}

// ---------------------------------------------------------------------------
// Sampler
// ---------------------------------------------------------------------------

/// Anything that can draw points from a fixed parameter space.
pub trait Sampler {
    fn space(&self) -> &ParameterSpace;

    /// Draw `count` points. Successive calls continue the same stream.
    fn sample(&mut self, count: usize) -> Vec<ParameterPoint>;
}

/// Seeded Latin hypercube sampler.
pub struct LatinHypercube {
    space: ParameterSpace,
    seed: u64,
    rng: ChaCha8Rng,
}

impl LatinHypercube {
    pub fn new(space: ParameterSpace, seed: u64) -> Self {
        Self {
            space,
            seed,
            rng: ChaCha8Rng::seed_from_u64(seed),
        }
    }

    /// Seed this sampler was constructed with.
    pub fn seed(&self) -> u64 {
        self.seed
    }

    /// Draw unit-hypercube coordinates, one stratum per point per dimension.
    fn unit_design(&mut self, count: usize) -> Vec<Vec<f64>> {
        let dim = self.space.dim();
        let mut unit = vec![vec![0.0; dim]; count];
        let mut strata: Vec<usize> = (0..count).collect();

        for d in 0..dim {
            strata.shuffle(&mut self.rng);
            for (row, &stratum) in unit.iter_mut().zip(&strata) {
                let jitter: f64 = self.rng.random();
                row[d] = (stratum as f64 + jitter) / count as f64;
            }
        }
        unit
    }
}

impl Sampler for LatinHypercube {
    fn space(&self) -> &ParameterSpace {
        &self.space
    }

    fn sample(&mut self, count: usize) -> Vec<ParameterPoint> {
        if count == 0 {
            return Vec::new();
        }
        self.unit_design(count)
            .into_iter()
            .map(|row| {
                let values = row
                    .iter()
                    .zip(self.space.ranges())
                    // `u` is in [0, 1) so the result never leaves [low, high].
                    .map(|(&u, r)| (r.low + u * r.span()).clamp(r.low, r.high))
                    .collect();
                ParameterPoint(values)
            })
            .collect()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
