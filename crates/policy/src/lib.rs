mod aggregate;
mod envelope;
mod response;

use thiserror::Error;

pub use aggregate::{
    LegacyViolation, PolicyAccumulator, PolicyRejectionSummary, RejectedLibrary, RejectedPolicy,
    RejectionTotals, aggregate, legacy_violations,
};
pub use envelope::ServiceEnvelope;
pub use response::{
    Policy, RejectionEvent, Resource, ResponseData, ResponseNode, collect_rejections,
};

pub const POLICY_REJECTION_SUMMARY_FILE: &str = "policy-rejection-summary.json";
pub const LEGACY_VIOLATIONS_FILE: &str = "ws-log-policy-violations.json";

#[derive(Debug, Error)]
pub enum PolicyError {
    #[error("unreadable server response: {reason}")]
    UnreadableServerResponse {
        reason: String,
        message: Option<String>,
        data: Option<String>,
    },
}

/// Both views of one compliance verdict, built from a single walk.
#[derive(Debug, Clone, PartialEq)]
pub struct PolicyReport {
    pub summary: PolicyRejectionSummary,
    pub violations: Vec<LegacyViolation>,
}

impl PolicyReport {
    pub fn from_response(raw: &str) -> Result<Self, PolicyError> {
        let envelope = ServiceEnvelope::parse(raw)?;
        let data = envelope.decode_data()?;
        Self::from_data(&data)
    }

    pub fn from_data(data: &ResponseData) -> Result<Self, PolicyError> {
        let trees = data.project_trees()?;
        let events = collect_rejections(&trees);
        tracing::debug!(
            "collected {} rejection events across {} projects",
            events.len(),
            trees.len()
        );
        Ok(Self {
            summary: PolicyRejectionSummary::new(aggregate(&events)),
            violations: legacy_violations(&events),
        })
    }

    pub fn has_violations(&self) -> bool {
        !self.violations.is_empty()
    }

    pub fn total_rejected_libraries(&self) -> usize {
        self.summary.summary.total_rejected_libraries
    }
}
