//! Validation point: one fresh draw run as a regular case under `known_value`,
//! whose output stands in for the field observation.

use std::path::Path;

use log::info;
use serde::{Deserialize, Serialize};

use crate::batch::dispatch_case;
use crate::campaign::CaseName;
use crate::design::{ParameterPoint, Sampler};
use crate::error::{Error, Result};
use crate::simulation::{Observation, Simulator};

/// The drawn "true" parameters and the observation they produce.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ValidationPoint {
    pub point: ParameterPoint,
    pub observation: Observation,
}

/// Draw one new point from `sampler` and run it under the reserved name.
///
/// The point comes from the sampler's current stream position, so it is
/// independent of the training design as long as the sampler is not the one
/// that produced it (or has moved past it).
pub fn draw_and_run_validation<P, S>(
    sampler: &mut P,
    simulator: &S,
    output_dir: &Path,
    timeout_retries: u32,
) -> Result<ValidationPoint>
where
    P: Sampler + ?Sized,
    S: Simulator + ?Sized,
{
    let point = sampler
        .sample(1)
        .pop()
        .ok_or_else(|| Error::InvalidInput("sampler returned no validation point".to_string()))?;
    let name = CaseName::known_value();

    info!("{name}: running validation point {point}");
    let outcome = dispatch_case(simulator, &point, &name, output_dir, timeout_retries);
    outcome.result?;
    let observation = simulator.extract_observation(&name, output_dir)?;
    info!(
        "{name}: observation {:?} after {:.1}s",
        observation.values(),
        outcome.duration.as_secs_f64()
    );

    Ok(ValidationPoint { point, observation })
}
