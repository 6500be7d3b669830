//! Report generation and the upload / policy-check run flow.

use std::path::Path;
use std::sync::Arc;

use serde::Serialize;
use thiserror::Error;

use depreport_core::{DependencySource, NormalizeOptions, ReportPayload, assemble_report};
use depreport_http::{ClientSettings, HttpVerdictClient, TransportError, VerdictClient};
use depreport_policy::{PolicyError, PolicyReport, ServiceEnvelope};

use crate::config::DepReportConfig;
use crate::output::{PolicyOutputFiles, write_policy_results};

const DEFAULT_PROJECT_NAME: &str = "unnamed-project";
const DEFAULT_PROJECT_VERSION: &str = "0.0.0";

/// Terminal run failures, each mapped to a distinct process exit code.
#[derive(Debug, Error)]
pub enum RunFailure {
    #[error("some dependencies were rejected by the organization's policies ({total} libraries)")]
    PolicyViolation { total: usize },
    #[error("client configuration is incomplete: {message}")]
    ClientFailure { message: String },
    #[error("couldn't reach the server: {source}")]
    ConnectionFailure {
        #[source]
        source: TransportError,
    },
    #[error("server failure: {message}")]
    ServerFailure { message: String },
}

impl RunFailure {
    pub fn exit_code(&self) -> i32 {
        match self {
            Self::PolicyViolation { .. } => 2,
            Self::ClientFailure { .. } => 3,
            Self::ConnectionFailure { .. } => 4,
            Self::ServerFailure { .. } => 5,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum RunOutcome {
    /// The report was stored by the service.
    Updated {
        forced: bool,
        #[serde(skip_serializing_if = "Option::is_none")]
        request_token: Option<String>,
        #[serde(skip_serializing_if = "Option::is_none")]
        policy_files: Option<PolicyOutputFiles>,
    },
    /// Violations were written out and the update was skipped.
    ViolationsReported {
        total_rejected_libraries: usize,
        policy_files: PolicyOutputFiles,
    },
    /// The service was unreachable and connection failures are configured as non-fatal.
    ConnectionFailureIgnored { message: String },
}

/// Runtime service tying dependency sources, the verdict client and result files together.
#[derive(Clone)]
pub struct ReportService {
    config: Arc<DepReportConfig>,
    client: Option<Arc<dyn VerdictClient>>,
}

impl ReportService {
    /// Creates a service from on-disk configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if config loading or HTTP client setup fails.
    pub fn new() -> anyhow::Result<Self> {
        let config = DepReportConfig::load()?;
        let client = match (config.server_url.as_deref(), config.api_key.as_deref()) {
            (Some(server_url), Some(api_key)) => {
                let mut settings = ClientSettings::new(server_url, api_key);
                settings.product_name = config.product_name.clone();
                settings.product_version = config.product_version.clone();
                settings.timeout = config.request_timeout();
                settings.connection_retries = config.connection_retries;
                let client: Arc<dyn VerdictClient> = Arc::new(HttpVerdictClient::new(settings)?);
                Some(client)
            }
            _ => None,
        };
        Ok(Self {
            config: Arc::new(config),
            client,
        })
    }

    #[cfg(test)]
    pub fn with_client(config: DepReportConfig, client: Option<Arc<dyn VerdictClient>>) -> Self {
        Self {
            config: Arc::new(config),
            client,
        }
    }

    /// Normalizes `source` and wraps the result in the report identity.
    ///
    /// Identity comes from config first, then from the source's own root.
    pub fn build_report(&self, source: &dyn DependencySource) -> anyhow::Result<ReportPayload> {
        let options = NormalizeOptions {
            include_dev: self.config.dev_dependencies,
        };
        let tree = source.normalize(&options)?;

        let name = self
            .config
            .project_name
            .clone()
            .or_else(|| tree.name.clone())
            .unwrap_or_else(|| {
                tracing::warn!("no project name configured or found; using {DEFAULT_PROJECT_NAME}");
                DEFAULT_PROJECT_NAME.to_string()
            });
        let version = self
            .config
            .project_version
            .clone()
            .or_else(|| tree.version.clone())
            .unwrap_or_else(|| DEFAULT_PROJECT_VERSION.to_string());

        let report = assemble_report(name, version, [tree]);
        tracing::info!(
            "built {} report {}@{} with {} nodes",
            source.key(),
            report.name,
            report.version,
            report.node_count()
        );
        Ok(report)
    }

    /// Sends the report, checking policies first when configured.
    ///
    /// # Errors
    ///
    /// Aborts carry a [`RunFailure`]; file-system problems surface as plain errors.
    pub async fn submit(&self, report: &ReportPayload) -> anyhow::Result<RunOutcome> {
        let Some(client) = self.client.as_deref() else {
            return Err(RunFailure::ClientFailure {
                message: "server_url and api_key must both be configured".to_string(),
            }
            .into());
        };

        if !self.config.check_policies {
            return self.update(client, report, false, None).await;
        }

        tracing::info!("checking policies");
        let verdict = match client.check_policies(report).await {
            Ok(verdict) => verdict,
            Err(error) => return self.connection_problem(error),
        };

        let policy_report = match PolicyReport::from_response(&verdict) {
            Ok(policy_report) => policy_report,
            Err(error) => {
                log_unreadable_verdict(&error);
                if self.config.force_update {
                    tracing::warn!("force updating without a policy verdict");
                    return self.update(client, report, true, None).await;
                }
                return Err(RunFailure::ServerFailure {
                    message: error.to_string(),
                }
                .into());
            }
        };

        if !policy_report.has_violations() {
            tracing::info!("no policy violations; posting update request");
            return self.update(client, report, false, None).await;
        }

        tracing::error!("some dependencies did not conform with open source policies");
        let policy_files = self.write_results(&policy_report)?;
        let total = policy_report.total_rejected_libraries();

        if self.config.force_update {
            tracing::info!("there are policy violations; force updating");
            return self.update(client, report, true, Some(policy_files)).await;
        }
        if self.config.fail_on_error {
            return Err(RunFailure::PolicyViolation { total }.into());
        }
        Ok(RunOutcome::ViolationsReported {
            total_rejected_libraries: total,
            policy_files,
        })
    }

    /// Aggregates a saved verdict response and writes both result files.
    pub fn report_saved_verdict(
        &self,
        raw: &str,
        output_dir: Option<&Path>,
    ) -> anyhow::Result<(PolicyReport, PolicyOutputFiles)> {
        let policy_report = PolicyReport::from_response(raw)?;
        let dir = output_dir
            .map(Path::to_path_buf)
            .unwrap_or_else(|| self.config.output_dir.clone());
        let files = write_policy_results(&dir, &policy_report)?;
        Ok((policy_report, files))
    }

    fn write_results(&self, policy_report: &PolicyReport) -> anyhow::Result<PolicyOutputFiles> {
        write_policy_results(&self.config.output_dir, policy_report)
    }

    async fn update(
        &self,
        client: &dyn VerdictClient,
        report: &ReportPayload,
        forced: bool,
        policy_files: Option<PolicyOutputFiles>,
    ) -> anyhow::Result<RunOutcome> {
        let response = match client.update(report).await {
            Ok(response) => response,
            Err(error) => return self.connection_problem(error),
        };

        let envelope = ServiceEnvelope::parse(&response).map_err(|error| RunFailure::ServerFailure {
            message: error.to_string(),
        })?;
        if envelope.is_rejected_request() {
            return Err(RunFailure::ServerFailure {
                message: format!(
                    "{} : {}",
                    envelope.message.unwrap_or_default(),
                    envelope.data.unwrap_or_default()
                ),
            }
            .into());
        }

        let request_token = envelope
            .request_token
            .filter(|token| !token.trim().is_empty());
        if let Some(token) = request_token.as_deref() {
            tracing::info!("support token: {token}");
        }
        tracing::info!("update accepted");
        Ok(RunOutcome::Updated {
            forced,
            request_token,
            policy_files,
        })
    }

    fn connection_problem(&self, error: TransportError) -> anyhow::Result<RunOutcome> {
        if !error.is_connection_failure() {
            return Err(RunFailure::ServerFailure {
                message: error.to_string(),
            }
            .into());
        }
        if self.config.fail_on_connection_error {
            return Err(RunFailure::ConnectionFailure { source: error }.into());
        }
        tracing::warn!("ignoring connection failure: {error}");
        Ok(RunOutcome::ConnectionFailureIgnored {
            message: error.to_string(),
        })
    }
}

fn log_unreadable_verdict(error: &PolicyError) {
    let PolicyError::UnreadableServerResponse {
        reason,
        message,
        data,
    } = error;
    match (message.as_deref(), data.as_deref()) {
        (Some("Invalid User Key"), data) => {
            tracing::error!("{} - Invalid User Key", data.unwrap_or_default())
        }
        (None, None) => tracing::error!("failed to find policy violations - {reason}"),
        (message, data) => tracing::error!(
            "failed to find policy violations - {} : {}",
            message.unwrap_or_default(),
            data.unwrap_or_default()
        ),
    }
}

/// Maps an error chain to the process exit code.
pub fn exit_code_for(error: &anyhow::Error) -> i32 {
    error
        .downcast_ref::<RunFailure>()
        .map(RunFailure::exit_code)
        .unwrap_or(1)
}

#[cfg(test)]
#[path = "tests/service.rs"]
mod tests;
