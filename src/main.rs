//! CLI entrypoint for building dependency reports and checking them against policies.

mod config;
mod output;
mod service;

use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::Context;
use clap::{Parser, Subcommand};
use depreport_core::{DependencySource, ReportPayload};
use depreport_npm::NpmListingSource;
use depreport_yarn::YarnLockfileSource;
use serde::Serialize;
use service::{ReportService, exit_code_for};

#[derive(Parser)]
#[command(
    name = "depreport",
    version,
    about = "Normalize package-manager dependency graphs and report policy violations"
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Build a report from saved `npm ls` output
    Npm {
        /// Output of `npm ls --json`
        #[arg(long)]
        ls_json: PathBuf,
        /// Plain `npm ls` rendering of the same install, used to expand deduped entries
        #[arg(long)]
        ls_text: Option<PathBuf>,
        /// Project root that holds `node_modules`
        #[arg(long, default_value = ".")]
        project_dir: PathBuf,
        /// Print the report instead of sending it
        #[arg(long)]
        dry_run: bool,
    },
    /// Build a report from a yarn.lock file
    Yarn {
        /// Path to yarn.lock or the directory containing it
        path: Option<String>,
        /// Print the report instead of sending it
        #[arg(long)]
        dry_run: bool,
    },
    /// Aggregate a saved policy-check response into result files
    Policies {
        /// Raw response body of a policy compliance check
        response: PathBuf,
        /// Directory for the result files (defaults to the configured output_dir)
        #[arg(long)]
        output_dir: Option<PathBuf>,
    },
}

#[tokio::main]
async fn main() -> ExitCode {
    // stdout carries JSON results only
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_ansi(false)
        .init();

    match run(Cli::parse()).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(error) => {
            tracing::error!("{error:#}");
            let code = exit_code_for(&error);
            ExitCode::from(u8::try_from(code).unwrap_or(1))
        }
    }
}

async fn run(cli: Cli) -> anyhow::Result<()> {
    let service = ReportService::new()?;

    match cli.command {
        Commands::Npm {
            ls_json,
            ls_text,
            project_dir,
            dry_run,
        } => {
            let source = NpmListingSource::new(ls_json, ls_text, project_dir);
            report_and_submit(&service, &source, dry_run).await
        }
        Commands::Yarn { path, dry_run } => {
            let source = YarnLockfileSource::from_input(path.as_deref())?;
            report_and_submit(&service, &source, dry_run).await
        }
        Commands::Policies {
            response,
            output_dir,
        } => {
            let raw = std::fs::read_to_string(&response)
                .with_context(|| format!("failed to read response file {}", response.display()))?;
            let (policy_report, files) =
                service.report_saved_verdict(&raw, output_dir.as_deref())?;
            print_json(&PoliciesSummary {
                total_rejected_libraries: policy_report.total_rejected_libraries(),
                violations: policy_report.violations.len(),
                files,
            })
        }
    }
}

async fn report_and_submit(
    service: &ReportService,
    source: &dyn DependencySource,
    dry_run: bool,
) -> anyhow::Result<()> {
    let report: ReportPayload = service.build_report(source)?;
    if dry_run {
        return print_json(&report);
    }
    let outcome = service.submit(&report).await?;
    print_json(&outcome)
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct PoliciesSummary {
    total_rejected_libraries: usize,
    violations: usize,
    files: output::PolicyOutputFiles,
}

fn print_json<T: Serialize>(value: &T) -> anyhow::Result<()> {
    let json = serde_json::to_string_pretty(value)?;
    println!("{json}");
    Ok(())
}
