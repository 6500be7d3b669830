//! Writes the policy verdict result files.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::Context;
use serde::Serialize;
use serde_json::ser::{PrettyFormatter, Serializer};

use depreport_policy::{LEGACY_VIOLATIONS_FILE, POLICY_REJECTION_SUMMARY_FILE, PolicyReport};

const LEGACY_INDENT: &[u8] = b"    ";

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PolicyOutputFiles {
    pub summary_path: PathBuf,
    pub violations_path: PathBuf,
}

/// Writes the aggregated summary and the legacy violation list into `dir`, creating it if needed.
pub fn write_policy_results(dir: &Path, report: &PolicyReport) -> anyhow::Result<PolicyOutputFiles> {
    fs::create_dir_all(dir)
        .with_context(|| format!("failed to create output directory {}", dir.display()))?;

    let summary_path = dir.join(POLICY_REJECTION_SUMMARY_FILE);
    let summary = serde_json::to_string_pretty(&report.summary)
        .context("failed to encode policy rejection summary")?;
    write_file(&summary_path, summary.as_bytes())?;

    let violations_path = dir.join(LEGACY_VIOLATIONS_FILE);
    let mut violations = Vec::new();
    let mut serializer =
        Serializer::with_formatter(&mut violations, PrettyFormatter::with_indent(LEGACY_INDENT));
    report
        .violations
        .serialize(&mut serializer)
        .context("failed to encode policy violation list")?;
    write_file(&violations_path, &violations)?;

    tracing::info!(
        "review {} and {} for policy details",
        summary_path.display(),
        violations_path.display()
    );
    Ok(PolicyOutputFiles {
        summary_path,
        violations_path,
    })
}

fn write_file(path: &Path, contents: &[u8]) -> anyhow::Result<()> {
    fs::write(path, contents).with_context(|| format!("failed to write {}", path.display()))
}
