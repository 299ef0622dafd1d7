//! On-disk campaign state: case names, the persisted design, and the batch report.
//!
//! # Storage Format
//!
//! Each output directory holds:
//! - `design.json`: seed, parameter space, and the ordered `(case name, point)` list
//! - `batch.json`: per-case outcome of the last batch run
//! - `analysis.json`: report of the last analysis run
//! - one directory per case, named `simulation_<n>` or `known_value`
//! - `<case>/campaign.json`: id of the campaign the case's output belongs to
//!
//! `design.json` is written once per campaign, atomically, before any case is
//! dispatched. Readers therefore see a complete design or none at all.

use std::fmt;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tempfile::NamedTempFile;

use crate::design::{ParameterPoint, ParameterSpace};
use crate::error::{Error, Result};

pub const DESIGN_FILE: &str = "design.json";
pub const BATCH_REPORT_FILE: &str = "batch.json";
pub const ANALYSIS_REPORT_FILE: &str = "analysis.json";
pub const CASE_STAMP_FILE: &str = "campaign.json";

const SIMULATION_PREFIX: &str = "simulation_";
const KNOWN_VALUE: &str = "known_value";

/// Current version of every JSON artifact written here.
const FORMAT_VERSION: u32 = 1;

// ---------------------------------------------------------------------------
// Case names
// ---------------------------------------------------------------------------

/// Identity of one simulation case: `simulation_<n>` (n ≥ 1) or `known_value`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct CaseName(String);

impl CaseName {
    /// Training case for the 1-based design index `index`.
    pub fn simulation(index: usize) -> Result<Self> {
        if index == 0 {
            return Err(Error::InvalidInput(
                "case indices start at 1".to_string(),
            ));
        }
        Ok(Self(format!("{SIMULATION_PREFIX}{index}")))
    }

    /// Reserved name of the validation case.
    pub fn known_value() -> Self {
        Self(KNOWN_VALUE.to_string())
    }

    /// Validate an arbitrary string as a case name.
    pub fn parse(s: &str) -> Result<Self> {
        if s == KNOWN_VALUE {
            return Ok(Self::known_value());
        }
        match s
            .strip_prefix(SIMULATION_PREFIX)
            .and_then(|n| n.parse::<usize>().ok())
        {
            // Round-trip through the formatter so "simulation_01" is rejected.
            Some(n) if n > 0 && format!("{SIMULATION_PREFIX}{n}") == s => Ok(Self(s.to_string())),
            _ => Err(Error::InvalidInput(format!("invalid case name '{s}'"))),
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_known_value(&self) -> bool {
        self.0 == KNOWN_VALUE
    }

    /// Directory owned by this case under `output_dir`.
    pub fn case_dir(&self, output_dir: &Path) -> PathBuf {
        output_dir.join(&self.0)
    }
}

impl TryFrom<String> for CaseName {
    type Error = Error;

    fn try_from(s: String) -> Result<Self> {
        Self::parse(&s)
    }
}

impl From<CaseName> for String {
    fn from(name: CaseName) -> Self {
        name.0
    }
}

impl fmt::Display for CaseName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

// ---------------------------------------------------------------------------
// Persisted design (design.json)
// ---------------------------------------------------------------------------

/// One design row: the case that owns a point.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DesignCase {
    pub name: CaseName,
    pub point: ParameterPoint,
}

/// The training design of a campaign with its explicit case-name mapping.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DesignRecord {
    pub version: u32,
    pub campaign_id: String,
    pub created_at: u64,
    pub seed: u64,
    pub space: ParameterSpace,
    pub cases: Vec<DesignCase>,
    pub histmatch_version: String,
}

impl DesignRecord {
    /// Name the points `simulation_1..=N` in generation order.
    pub fn new(seed: u64, space: ParameterSpace, points: Vec<ParameterPoint>) -> Result<Self> {
        let cases = points
            .into_iter()
            .enumerate()
            .map(|(i, point)| {
                Ok(DesignCase {
                    name: CaseName::simulation(i + 1)?,
                    point,
                })
            })
            .collect::<Result<Vec<_>>>()?;

        let record = Self {
            version: FORMAT_VERSION,
            campaign_id: uuid::Uuid::new_v4().to_string(),
            created_at: unix_now(),
            seed,
            space,
            cases,
            histmatch_version: crate::VERSION.to_string(),
        };
        record.validate().map_err(Error::InvalidInput)?;
        Ok(record)
    }

    /// Check the invariants a loaded record must satisfy.
    fn validate(&self) -> std::result::Result<(), String> {
        if self.version != FORMAT_VERSION {
            return Err(format!("unsupported design version {}", self.version));
        }
        self.space.validate().map_err(|e| e.to_string())?;
        if self.cases.is_empty() {
            return Err("design has no cases".to_string());
        }
        for (i, case) in self.cases.iter().enumerate() {
            if case.name.is_known_value() {
                return Err(format!("reserved name '{}' used by a design case", case.name));
            }
            if self.cases[..i].iter().any(|c| c.name == case.name) {
                return Err(format!("duplicate case name '{}'", case.name));
            }
            if !self.space.contains(&case.point) {
                return Err(format!(
                    "point {} of {} lies outside the parameter space",
                    case.point, case.name
                ));
            }
        }
        Ok(())
    }

    /// Number of design points.
    pub fn len(&self) -> usize {
        self.cases.len()
    }

    pub fn is_empty(&self) -> bool {
        self.cases.is_empty()
    }

    pub fn points(&self) -> impl Iterator<Item = &ParameterPoint> {
        self.cases.iter().map(|c| &c.point)
    }

    pub fn path(output_dir: &Path) -> PathBuf {
        output_dir.join(DESIGN_FILE)
    }

    /// Whether the output in `name`'s directory was produced for this campaign.
    pub fn owns_output(&self, name: &CaseName, output_dir: &Path) -> bool {
        CaseStamp::load(name, output_dir).is_some_and(|s| s.campaign_id == self.campaign_id)
    }

    /// Persist atomically to `<output_dir>/design.json`.
    pub fn save(&self, output_dir: &Path) -> Result<PathBuf> {
        let path = Self::path(output_dir);
        write_json_atomic(&path, self)?;
        Ok(path)
    }

    /// Load `<output_dir>/design.json`.
    pub fn load(output_dir: &Path) -> Result<Self> {
        let path = Self::path(output_dir);
        if !path.is_file() {
            return Err(Error::DesignNotFound(path));
        }
        let record: Self = read_json(&path).map_err(|reason| Error::CorruptDesign {
            path: path.clone(),
            reason,
        })?;
        record
            .validate()
            .map_err(|reason| Error::CorruptDesign { path, reason })?;
        Ok(record)
    }
}

// ---------------------------------------------------------------------------
// Batch report (batch.json)
// ---------------------------------------------------------------------------

/// Outcome of one case in a batch run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CaseStatus {
    /// Ran to completion in this batch.
    Completed,
    /// Output from an earlier run was found and kept.
    Reused,
    /// Ran and failed; recorded under the skip-and-record policy.
    Failed,
    /// Never dispatched (batch aborted or interrupted first).
    Skipped,
}

impl fmt::Display for CaseStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Completed => write!(f, "completed"),
            Self::Reused => write!(f, "reused"),
            Self::Failed => write!(f, "failed"),
            Self::Skipped => write!(f, "skipped"),
        }
    }
}

/// Per-case entry of the batch report.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CaseRecord {
    pub name: CaseName,
    pub status: CaseStatus,
    pub attempts: u32,
    pub duration_ms: u64,
    pub error: Option<String>,
}

/// Summary written to `batch.json` when a batch ends.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BatchReport {
    pub version: u32,
    pub campaign_id: String,
    pub started_at: u64,
    pub ended_at: u64,
    pub failure_policy: String,
    pub processes: usize,
    pub jobs: usize,
    pub cases: Vec<CaseRecord>,
    pub histmatch_version: String,
}

impl BatchReport {
    pub fn path(output_dir: &Path) -> PathBuf {
        output_dir.join(BATCH_REPORT_FILE)
    }

    pub fn save(&self, output_dir: &Path) -> Result<PathBuf> {
        let path = Self::path(output_dir);
        write_json_atomic(&path, self)?;
        Ok(path)
    }

    /// Load `<output_dir>/batch.json` if a batch has ever finished there.
    pub fn load(output_dir: &Path) -> Result<Option<Self>> {
        let path = Self::path(output_dir);
        if !path.is_file() {
            return Ok(None);
        }
        read_json(&path)
            .map(Some)
            .map_err(|reason| Error::InvalidInput(format!("{}: {reason}", path.display())))
    }

    pub fn count(&self, status: CaseStatus) -> usize {
        self.cases.iter().filter(|c| c.status == status).count()
    }

    /// Names of cases recorded as failed.
    pub fn failed_cases(&self) -> impl Iterator<Item = &CaseName> {
        self.cases
            .iter()
            .filter(|c| c.status == CaseStatus::Failed)
            .map(|c| &c.name)
    }
}

// ---------------------------------------------------------------------------
// Case stamp (<case>/campaign.json)
// ---------------------------------------------------------------------------

/// Written into a case directory once its run completes.
///
/// Case names repeat across campaigns, so output left behind by an earlier
/// design only counts for the campaign id it carries.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CaseStamp {
    pub campaign_id: String,
    pub completed_at: u64,
}

impl CaseStamp {
    pub fn new(campaign_id: impl Into<String>) -> Self {
        Self {
            campaign_id: campaign_id.into(),
            completed_at: unix_now(),
        }
    }

    pub fn path(name: &CaseName, output_dir: &Path) -> PathBuf {
        name.case_dir(output_dir).join(CASE_STAMP_FILE)
    }

    pub fn save(&self, name: &CaseName, output_dir: &Path) -> Result<PathBuf> {
        let path = Self::path(name, output_dir);
        write_json_atomic(&path, self)?;
        Ok(path)
    }

    /// The stamp of `name`, or `None` if the case never completed or the
    /// stamp cannot be read.
    pub fn load(name: &CaseName, output_dir: &Path) -> Option<Self> {
        let path = Self::path(name, output_dir);
        if !path.is_file() {
            return None;
        }
        match read_json(&path) {
            Ok(stamp) => Some(stamp),
            Err(reason) => {
                log::debug!("ignoring unreadable {}: {reason}", path.display());
                None
            }
        }
    }

    /// Remove the stamp before a case is rerun.
    pub(crate) fn clear(name: &CaseName, output_dir: &Path) -> Result<()> {
        let path = Self::path(name, output_dir);
        match fs::remove_file(&path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(Error::io(format!("removing {}", path.display()), e)),
        }
    }
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

/// Seconds since the Unix epoch.
pub(crate) fn unix_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}

/// Serialize `value` next to `path` and rename it into place.
pub(crate) fn write_json_atomic<T: Serialize>(path: &Path, value: &T) -> Result<()> {
    let dir = path.parent().unwrap_or_else(|| Path::new("."));
    fs::create_dir_all(dir).map_err(|e| Error::io(format!("creating {}", dir.display()), e))?;

    let json = serde_json::to_string_pretty(value)
        .map_err(|e| Error::io("serializing JSON", std::io::Error::other(e)))?;

    let context = || format!("writing {}", path.display());
    let mut tmp = NamedTempFile::new_in(dir).map_err(|e| Error::io(context(), e))?;
    tmp.write_all(json.as_bytes())
        .and_then(|()| tmp.flush())
        .map_err(|e| Error::io(context(), e))?;
    tmp.persist(path).map_err(|e| Error::io(context(), e.error))?;
    Ok(())
}

fn read_json<T: DeserializeOwned>(path: &Path) -> std::result::Result<T, String> {
    let text = fs::read_to_string(path).map_err(|e| e.to_string())?;
    serde_json::from_str(&text).map_err(|e| e.to_string())
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
