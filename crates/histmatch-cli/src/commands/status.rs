//! `histmatch status`: show the persisted design and where every case stands.

use std::collections::HashMap;
use std::path::Path;

use histmatch_core::{
    AnalysisReport, BatchReport, CaseName, CaseRecord, DesignRecord, Result, read_observation,
};

/// Run the status command.
pub fn run(output_dir: &str) {
    if let Err(e) = print_status(Path::new(output_dir)) {
        super::fail(&e);
    }
}

/// What is known about one case: its batch record, if any, and whether its
/// observation can be read right now. Output from another campaign is `stale`.
fn case_state(
    name: &CaseName,
    record: Option<&CaseRecord>,
    owned: bool,
    output_dir: &Path,
) -> String {
    let status = record.map_or_else(|| "pending".to_string(), |r| r.status.to_string());
    match read_observation(name, output_dir) {
        Ok(obs) if owned => format!("{status:<10} {:?}", obs.values()),
        Ok(_) => format!("{status:<10} stale"),
        Err(_) => format!("{status:<10} -"),
    }
}

fn print_status(output_dir: &Path) -> Result<()> {
    let design = DesignRecord::load(output_dir)?;
    let batch = BatchReport::load(output_dir)?;
    let records: HashMap<&CaseName, &CaseRecord> = batch
        .as_ref()
        .map(|b| b.cases.iter().map(|c| (&c.name, c)).collect())
        .unwrap_or_default();

    println!("Campaign {}", design.campaign_id);
    println!("  Seed:      {}", design.seed);
    println!("  Cases:     {}", design.len());
    println!(
        "  Space:     {}",
        design
            .space
            .ranges()
            .iter()
            .map(|r| format!("{} [{}, {}]", r.name, r.low, r.high))
            .collect::<Vec<_>>()
            .join(", ")
    );
    match &batch {
        Some(b) => println!("  Last batch: {} ({})", b.ended_at, b.failure_policy),
        None => println!("  Last batch: none"),
    }
    println!();

    println!("{:<16} {:<40} {:<10} OBSERVATION", "CASE", "POINT", "STATUS");
    for case in &design.cases {
        println!(
            "{:<16} {:<40} {}",
            case.name.as_str(),
            case.point.to_string(),
            case_state(
                &case.name,
                records.get(&case.name).copied(),
                design.owns_output(&case.name, output_dir),
                output_dir
            )
        );
    }

    let known = CaseName::known_value();
    if known.case_dir(output_dir).is_dir() {
        println!(
            "{:<16} {:<40} {}",
            known.as_str(),
            "",
            case_state(&known, None, true, output_dir)
        );
    }

    if AnalysisReport::path(output_dir).is_file() {
        println!();
        println!("Analysis report: {}", AnalysisReport::path(output_dir).display());
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use histmatch_core::{Error, LatinHypercube, ParameterSpace, Sampler};

    #[test]
    fn test_status_requires_design() {
        let dir = tempfile::tempdir().unwrap();
        assert!(matches!(
            print_status(dir.path()),
            Err(Error::DesignNotFound(_))
        ));
    }

    #[test]
    fn test_status_of_fresh_design() {
        let dir = tempfile::tempdir().unwrap();
        let space = ParameterSpace::default();
        let points = LatinHypercube::new(space.clone(), 1).sample(3);
        DesignRecord::new(1, space, points)
            .unwrap()
            .save(dir.path())
            .unwrap();
        print_status(dir.path()).unwrap();
    }

    #[test]
    fn test_case_state_reports_observation() {
        let dir = tempfile::tempdir().unwrap();
        let name = CaseName::simulation(1).unwrap();
        assert_eq!(
            case_state(&name, None, true, dir.path()),
            format!("{:<10} -", "pending")
        );

        let case_dir = name.case_dir(dir.path());
        std::fs::create_dir_all(&case_dir).unwrap();
        std::fs::write(case_dir.join("observation.json"), "[1.5]").unwrap();
        assert_eq!(
            case_state(&name, None, true, dir.path()),
            format!("{:<10} [1.5]", "pending")
        );
        assert_eq!(
            case_state(&name, None, false, dir.path()),
            format!("{:<10} stale", "pending")
        );
    }
}
