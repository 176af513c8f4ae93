use std::path::Path;

use randomtrust_core::Services;
use randomtrust_core::service::analyze_bytes;
use randomtrust_tests::TestOutcome;
use serde::Serialize;
use uuid::Uuid;

use super::{CommandError, print_json, read_hex_input};

/// What to analyze. Exactly one of the fields is set (enforced by clap).
pub struct AnalyzeTarget<'a> {
    pub run: Option<Uuid>,
    pub audit: Option<Uuid>,
    pub hex: Option<&'a str>,
    pub file: Option<&'a Path>,
}

#[derive(Serialize)]
struct AdHocAnalysis<'a> {
    bytes: usize,
    outcomes: &'a [TestOutcome],
}

pub fn run(
    services: &Services,
    target: AnalyzeTarget<'_>,
    tests: Option<&[String]>,
) -> Result<(), CommandError> {
    let outcomes = if let Some(run_id) = target.run {
        let analysis = services.analysis.analyze_run(run_id, tests)?;
        print_json(&analysis)?;
        analysis.outcomes
    } else if let Some(audit_id) = target.audit {
        let analysis = services.analysis.analyze_audit(audit_id, tests)?;
        print_json(&analysis)?;
        analysis.outcomes
    } else {
        let payload = read_hex_input(target.hex, target.file)?;
        let outcomes = analyze_bytes(&payload, tests)?;
        print_json(&AdHocAnalysis {
            bytes: payload.len(),
            outcomes: &outcomes,
        })?;
        outcomes
    };

    for o in outcomes.iter().filter(|o| !o.passed) {
        log::warn!(
            "{} failed (metric {:.4}, threshold {:.4})",
            o.name,
            o.metric,
            o.threshold
        );
    }
    Ok(())
}
