use async_trait::async_trait;
use chrono::Utc;
use reqwest::Client;
use serde::Serialize;
use std::error::Error as StdError;
use std::time::Duration;
use thiserror::Error;

use depreport_core::ReportPayload;

pub const AGENT_NAME: &str = "depreport";
pub const AGENT_VERSION: &str = env!("CARGO_PKG_VERSION");
const AGENT_ENDPOINT: &str = "agent";
const DEFAULT_RETRY_DELAY: Duration = Duration::from_secs(1);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestType {
    CheckPolicyCompliance,
    Update,
}

impl RequestType {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::CheckPolicyCompliance => "CHECK_POLICY_COMPLIANCE",
            Self::Update => "UPDATE",
        }
    }
}

#[derive(Debug, Clone, Error)]
pub enum TransportError {
    #[error("{request} request failed: {message}")]
    Request {
        request: &'static str,
        message: String,
    },
    #[error("{request} request returned status {status}: {body}")]
    Status {
        request: &'static str,
        status: u16,
        body: String,
    },
    #[error("failed to encode report: {message}")]
    Encode { message: String },
}

impl TransportError {
    /// Connection-level failures, as opposed to an answer the server actually sent.
    pub fn is_connection_failure(&self) -> bool {
        match self {
            Self::Request { .. } => true,
            Self::Status { status, .. } => *status >= 500,
            Self::Encode { .. } => false,
        }
    }
}

/// Remote collaborator that judges a report and stores it.
#[async_trait]
pub trait VerdictClient: Send + Sync {
    async fn check_policies(&self, report: &ReportPayload) -> Result<String, TransportError>;
    async fn update(&self, report: &ReportPayload) -> Result<String, TransportError>;
}

#[derive(Debug, Clone)]
pub struct ClientSettings {
    pub server_url: String,
    pub api_key: String,
    pub product_name: Option<String>,
    pub product_version: Option<String>,
    pub timeout: Duration,
    pub connection_retries: u32,
    pub retry_delay: Duration,
}

impl ClientSettings {
    pub fn new(server_url: impl Into<String>, api_key: impl Into<String>) -> Self {
        Self {
            server_url: server_url.into(),
            api_key: api_key.into(),
            product_name: None,
            product_version: None,
            timeout: Duration::from_secs(60 * 60),
            connection_retries: 1,
            retry_delay: DEFAULT_RETRY_DELAY,
        }
    }

    fn endpoint(&self) -> String {
        format!("{}/{AGENT_ENDPOINT}", self.server_url.trim_end_matches('/'))
    }
}

#[derive(Debug, Serialize)]
struct AgentRequest<'a> {
    #[serde(rename = "type")]
    request_type: &'static str,
    agent: &'static str,
    #[serde(rename = "agentVersion")]
    agent_version: &'static str,
    token: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    product: Option<&'a str>,
    #[serde(rename = "productVersion", skip_serializing_if = "Option::is_none")]
    product_version: Option<&'a str>,
    #[serde(rename = "timeStamp")]
    time_stamp: i64,
    diff: String,
}

#[derive(Debug, Clone)]
pub struct HttpVerdictClient {
    client: Client,
    settings: ClientSettings,
}

impl HttpVerdictClient {
    pub fn new(settings: ClientSettings) -> Result<Self, TransportError> {
        let client = Client::builder()
            .timeout(settings.timeout)
            .build()
            .map_err(|error| TransportError::Request {
                request: "client setup",
                message: error.to_string(),
            })?;
        Ok(Self { client, settings })
    }

    async fn post(
        &self,
        request_type: RequestType,
        report: &ReportPayload,
    ) -> Result<String, TransportError> {
        let diff = serde_json::to_string(&[report]).map_err(|error| TransportError::Encode {
            message: error.to_string(),
        })?;
        let form = AgentRequest {
            request_type: request_type.as_str(),
            agent: AGENT_NAME,
            agent_version: AGENT_VERSION,
            token: &self.settings.api_key,
            product: self.settings.product_name.as_deref(),
            product_version: self.settings.product_version.as_deref(),
            time_stamp: Utc::now().timestamp_millis(),
            diff,
        };

        let endpoint = self.settings.endpoint();
        let attempts = self.settings.connection_retries.saturating_add(1);
        let mut attempt = 1;
        loop {
            match self.send_once(request_type, &endpoint, &form).await {
                Ok(body) => return Ok(body),
                Err(error) if error.is_connection_failure() && attempt < attempts => {
                    tracing::warn!(
                        "{} attempt {attempt}/{attempts} failed, retrying: {error}",
                        request_type.as_str()
                    );
                    tokio::time::sleep(self.settings.retry_delay).await;
                    attempt += 1;
                }
                Err(error) => return Err(error),
            }
        }
    }

    async fn send_once(
        &self,
        request_type: RequestType,
        endpoint: &str,
        form: &AgentRequest<'_>,
    ) -> Result<String, TransportError> {
        let request = request_type.as_str();
        tracing::debug!("posting {request} request to {endpoint}");

        let response = self
            .client
            .post(endpoint)
            .form(form)
            .send()
            .await
            .map_err(|error| transport_error(request, endpoint, error))?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|error| transport_error(request, endpoint, error))?;

        if !status.is_success() {
            return Err(TransportError::Status {
                request,
                status: status.as_u16(),
                body,
            });
        }
        Ok(body)
    }
}

#[async_trait]
impl VerdictClient for HttpVerdictClient {
    async fn check_policies(&self, report: &ReportPayload) -> Result<String, TransportError> {
        self.post(RequestType::CheckPolicyCompliance, report).await
    }

    async fn update(&self, report: &ReportPayload) -> Result<String, TransportError> {
        self.post(RequestType::Update, report).await
    }
}

fn transport_error(request: &'static str, request_url: &str, error: reqwest::Error) -> TransportError {
    let mut details = Vec::new();
    let effective_url = error
        .url()
        .map(|url| url.as_str().to_string())
        .unwrap_or_else(|| request_url.to_string());
    details.push(format!("request_url={effective_url}"));

    let mut kinds = Vec::new();
    if error.is_timeout() {
        kinds.push("timeout");
    }
    if error.is_connect() {
        kinds.push("connect");
    }
    if error.is_body() {
        kinds.push("body");
    }
    if error.is_decode() {
        kinds.push("decode");
    }
    if kinds.is_empty() {
        kinds.push("unknown");
    }
    details.push(format!("kinds={}", kinds.join(",")));

    let mut sources = Vec::new();
    let mut current = error.source();
    while let Some(source) = current {
        sources.push(source.to_string());
        if sources.len() >= 4 {
            break;
        }
        current = source.source();
    }
    if !sources.is_empty() {
        details.push(format!("source_chain={}", sources.join(" | ")));
    }

    TransportError::Request {
        request,
        message: format!("{error}; {}", details.join("; ")),
    }
}
