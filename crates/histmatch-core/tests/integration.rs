//! Integration tests for histmatch-core.
//!
//! These tests drive the full calibration pipeline against an in-process
//! solver that writes real case directories:
//! design → batch dispatch → aggregation → emulator → validation → history match.

use std::fs;
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};

use histmatch_core::simulation::{CASE_INPUT_FILE, CaseInput, OBSERVATION_FILE};
use histmatch_core::{
    AnalysisConfig, AnalysisReport, BatchConfig, CaseName, CaseStatus, DesignRecord, Error,
    GaussianProcessFitter, HistoryMatchConfig, LatinHypercube, Observation, ParameterPoint,
    ParameterSpace, Prediction, Sampler, Simulator, Surrogate, SurrogateFitter, TrainingSet,
    history_match, load_training_set, parse_sample_count, read_observation, run_analysis,
    run_batch,
};

/// Writes `case.json` and an `observation.json` holding sum(point), the way a
/// solver run through the launcher would.
#[derive(Default)]
struct SumSolver {
    runs: AtomicUsize,
}

impl Simulator for SumSolver {
    fn create_case(
        &self,
        point: &ParameterPoint,
        name: &CaseName,
        output_dir: &Path,
    ) -> histmatch_core::Result<()> {
        let dir = name.case_dir(output_dir);
        fs::create_dir_all(&dir).unwrap();
        let input = serde_json::json!({
            "name": name.as_str(),
            "parameters": {},
            "point": point.values(),
        });
        fs::write(dir.join(CASE_INPUT_FILE), input.to_string()).unwrap();
        Ok(())
    }

    fn run_case(&self, name: &CaseName, output_dir: &Path) -> histmatch_core::Result<()> {
        self.runs.fetch_add(1, Ordering::SeqCst);
        let dir = name.case_dir(output_dir);
        let input = CaseInput::load(&dir)?;
        let sum: f64 = input.point.values().iter().sum();
        fs::write(dir.join(OBSERVATION_FILE), sum.to_string()).unwrap();
        Ok(())
    }

    fn extract_observation(
        &self,
        name: &CaseName,
        output_dir: &Path,
    ) -> histmatch_core::Result<Observation> {
        read_observation(name, output_dir)
    }
}

/// Knows the solver exactly: predicts sum(point) with no uncertainty.
struct ExactSum;

impl Surrogate for ExactSum {
    fn predict(&self, points: &[ParameterPoint]) -> histmatch_core::Result<Vec<Prediction>> {
        Ok(points
            .iter()
            .map(|p| Prediction::scalar(p.values().iter().sum(), 0.0))
            .collect())
    }
}

struct ExactSumFitter;

impl SurrogateFitter for ExactSumFitter {
    type Model = ExactSum;

    fn fit(&self, _: &TrainingSet) -> histmatch_core::Result<ExactSum> {
        Ok(ExactSum)
    }
}

fn batch_config(dir: &Path, n: usize) -> BatchConfig {
    BatchConfig {
        sample_count: n,
        output_dir: dir.to_path_buf(),
        ..Default::default()
    }
}

#[test]
fn same_seed_same_design() {
    let space = ParameterSpace::default();
    let a = LatinHypercube::new(space.clone(), 157_374).sample(25);
    let b = LatinHypercube::new(space.clone(), 157_374).sample(25);
    assert_eq!(a, b);
    for n in [1, 2, 7, 40] {
        let points = LatinHypercube::new(space.clone(), 3).sample(n);
        assert_eq!(points.len(), n);
        assert!(points.iter().all(|p| space.contains(p)));
    }
}

#[test]
fn batch_persists_aligned_design() {
    let tmp = tempfile::tempdir().unwrap();
    let solver = SumSolver::default();
    let report = run_batch(&batch_config(tmp.path(), 8), &solver, None).unwrap();
    assert_eq!(report.count(CaseStatus::Completed), 8);
    assert_eq!(solver.runs.load(Ordering::SeqCst), 8);

    let design = DesignRecord::load(tmp.path()).unwrap();
    let training = load_training_set(tmp.path(), &solver, Default::default()).unwrap();
    assert_eq!(training.len(), design.len());
    for (i, case) in design.cases.iter().enumerate() {
        assert_eq!(case.name.as_str(), format!("simulation_{}", i + 1));
        assert_eq!(training.names()[i], case.name);
        assert_eq!(training.points()[i], case.point);
        let sum: f64 = case.point.values().iter().sum();
        assert!((training.observations()[i].values()[0] - sum).abs() < 1e-9);
    }
}

#[test]
fn missing_third_case_is_missing_result() {
    let tmp = tempfile::tempdir().unwrap();
    let solver = SumSolver::default();
    run_batch(&batch_config(tmp.path(), 5), &solver, None).unwrap();
    fs::remove_file(tmp.path().join("simulation_3").join(OBSERVATION_FILE)).unwrap();

    let err = load_training_set(tmp.path(), &solver, Default::default()).unwrap_err();
    match err {
        Error::MissingResult { case, .. } => assert_eq!(case, "simulation_3"),
        other => panic!("expected MissingResult, got {other:?}"),
    }
}

#[test]
fn non_numeric_sample_count_is_rejected_before_dispatch() {
    let tmp = tempfile::tempdir().unwrap();
    assert!(matches!(parse_sample_count("abc"), Err(Error::InvalidInput(_))));
    assert!(matches!(parse_sample_count("0"), Err(Error::InvalidInput(_))));

    let solver = SumSolver::default();
    let err = run_batch(&batch_config(tmp.path(), 0), &solver, None).unwrap_err();
    assert!(matches!(err, Error::InvalidInput(_)));
    assert_eq!(solver.runs.load(Ordering::SeqCst), 0);
    assert!(!DesignRecord::path(tmp.path()).exists());
}

#[test]
fn exact_surrogate_scores_training_point_zero() {
    let tmp = tempfile::tempdir().unwrap();
    let solver = SumSolver::default();
    run_batch(&batch_config(tmp.path(), 5), &solver, None).unwrap();
    let training = load_training_set(tmp.path(), &solver, Default::default()).unwrap();

    // Observe exactly what the third training case should produce.
    let observation = Observation::scalar(training.points()[2].values().iter().sum()).unwrap();
    let model = ExactSumFitter.fit(&training).unwrap();
    let predictions = model.predict(training.points()).unwrap();
    let hm = history_match(
        &observation,
        training.points(),
        &predictions,
        &HistoryMatchConfig::default(),
    )
    .unwrap();
    assert_eq!(hm.implausibility[2], 0.0);
    assert!(hm.nroy.contains(&2));
}

#[test]
fn end_to_end_with_exact_surrogate() {
    let tmp = tempfile::tempdir().unwrap();
    let solver = SumSolver::default();
    run_batch(&batch_config(tmp.path(), 5), &solver, None).unwrap();

    let config = AnalysisConfig {
        query_points: 100,
        ..AnalysisConfig::new(tmp.path())
    };
    let analysis = run_analysis(&config, &solver, &ExactSumFitter).unwrap();

    let known = tmp.path().join("known_value");
    assert!(known.join(CASE_INPUT_FILE).exists());
    assert!(known.join(OBSERVATION_FILE).exists());
    let sum: f64 = analysis.validation.point.values().iter().sum();
    assert!((analysis.validation.observation.values()[0] - sum).abs() < 1e-9);
    assert_eq!(analysis.training_cases, 5);
    assert!(AnalysisReport::path(tmp.path()).exists());
}

#[test]
fn end_to_end_with_gaussian_process() {
    let tmp = tempfile::tempdir().unwrap();
    let solver = SumSolver::default();
    run_batch(&batch_config(tmp.path(), 20), &solver, None).unwrap();

    let config = AnalysisConfig {
        query_points: 200,
        ..AnalysisConfig::new(tmp.path())
    };
    let analysis = run_analysis(&config, &solver, &GaussianProcessFitter::default()).unwrap();

    // sum(point) is linear; the emulator should track it closely.
    for (p, pred) in analysis.query_points.iter().zip(&analysis.predictions) {
        let truth: f64 = p.values().iter().sum();
        assert!(
            (pred.mean[0] - truth).abs() < 1.0,
            "prediction {} vs truth {truth} at {p}",
            pred.mean[0]
        );
        assert!(pred.variance[0] >= 0.0);
    }
    assert_eq!(analysis.history.implausibility.len(), 200);
    assert!(analysis.report.surrogate.is_some());

    let saved: serde_json::Value =
        serde_json::from_str(&fs::read_to_string(AnalysisReport::path(tmp.path())).unwrap())
            .unwrap();
    assert_eq!(saved["query_points"], 200);
    assert_eq!(saved["nroy_count"].as_u64().unwrap() as usize, analysis.history.nroy.len());
}

#[test]
fn resumed_batch_runs_only_missing_cases() {
    let tmp = tempfile::tempdir().unwrap();
    let first = SumSolver::default();
    run_batch(&batch_config(tmp.path(), 6), &first, None).unwrap();
    fs::remove_file(tmp.path().join("simulation_4").join(OBSERVATION_FILE)).unwrap();

    let second = SumSolver::default();
    let config = BatchConfig {
        resume: true,
        ..batch_config(tmp.path(), 6)
    };
    let report = run_batch(&config, &second, None).unwrap();
    assert_eq!(second.runs.load(Ordering::SeqCst), 1);
    assert_eq!(report.count(CaseStatus::Reused), 5);
    assert_eq!(report.count(CaseStatus::Completed), 1);
}

#[test]
fn new_design_never_pairs_with_old_outputs() {
    let tmp = tempfile::tempdir().unwrap();
    let solver = SumSolver::default();
    run_batch(&batch_config(tmp.path(), 3), &solver, None).unwrap();

    // Replace the design, then stop before a single case runs.
    let replaced = BatchConfig {
        seed: 2,
        ..batch_config(tmp.path(), 3)
    };
    let stop = std::sync::atomic::AtomicBool::new(true);
    assert!(run_batch(&replaced, &solver, Some(&stop)).is_err());
    assert!(tmp.path().join("simulation_1").join(OBSERVATION_FILE).exists());

    match load_training_set(tmp.path(), &solver, Default::default()).unwrap_err() {
        Error::MissingResult { case, .. } => assert_eq!(case, "simulation_1"),
        other => panic!("expected MissingResult, got {other:?}"),
    }

    let resumed = BatchConfig {
        resume: true,
        ..replaced
    };
    let before = solver.runs.load(Ordering::SeqCst);
    let report = run_batch(&resumed, &solver, None).unwrap();
    assert_eq!(report.count(CaseStatus::Reused), 0);
    assert_eq!(solver.runs.load(Ordering::SeqCst) - before, 3);
    let training = load_training_set(tmp.path(), &solver, Default::default()).unwrap();
    for (point, obs) in training.points().iter().zip(training.observations()) {
        let sum: f64 = point.values().iter().sum();
        assert!((obs.values()[0] - sum).abs() < 1e-9);
    }
}
