use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::response::{Policy, RejectionEvent, Resource};

const FILTER_LOGIC_FIELD: &str = "filterLogic";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RejectedPolicy {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub policy_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub filter_type: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub product_level: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub inclusive: Option<Value>,
    #[serde(default)]
    pub rejected_libraries: Vec<RejectedLibrary>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RejectedLibrary {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sha1: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub link: Option<String>,
    #[serde(rename = "project", default)]
    pub projects: Vec<String>,
}

impl RejectedLibrary {
    fn from_event(event: &RejectionEvent<'_>) -> Self {
        Self {
            name: event.resource_name().map(ToOwned::to_owned),
            sha1: event.resource_sha1().map(ToOwned::to_owned),
            link: event.resource_link().map(ToOwned::to_owned),
            projects: vec![event.project.to_string()],
        }
    }

    /// Names only veto when both sides carry one; a merge always needs matching sha1 values.
    pub fn is_same_library(&self, name: Option<&str>, sha1: Option<&str>) -> bool {
        if let (Some(own), Some(other)) = (self.name.as_deref(), name)
            && own != other
        {
            return false;
        }
        matches!((self.sha1.as_deref(), sha1), (Some(own), Some(other)) if own == other)
    }

    fn add_project(&mut self, project: &str) {
        if !self.projects.iter().any(|existing| existing == project) {
            self.projects.push(project.to_string());
        }
    }
}

/// Folds rejection events into per-policy library lists, first-seen order throughout.
#[derive(Debug, Default)]
pub struct PolicyAccumulator {
    policies: Vec<RejectedPolicy>,
}

impl PolicyAccumulator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&mut self, event: &RejectionEvent<'_>) {
        let policy_name = event.policy.display_name.as_deref();
        let position = match self
            .policies
            .iter()
            .position(|policy| policy.policy_name.as_deref() == policy_name)
        {
            Some(position) => position,
            None => {
                self.policies.push(RejectedPolicy {
                    policy_name: policy_name.map(ToOwned::to_owned),
                    filter_type: event.policy.filter_type.clone(),
                    product_level: event.policy.project_level.clone(),
                    inclusive: event.policy.inclusive.clone(),
                    rejected_libraries: Vec::new(),
                });
                self.policies.len() - 1
            }
        };

        let libraries = &mut self.policies[position].rejected_libraries;
        match libraries
            .iter_mut()
            .find(|library| library.is_same_library(event.resource_name(), event.resource_sha1()))
        {
            Some(library) => library.add_project(event.project),
            None => libraries.push(RejectedLibrary::from_event(event)),
        }
    }

    pub fn finish(self) -> Vec<RejectedPolicy> {
        self.policies
    }
}

pub fn aggregate(events: &[RejectionEvent<'_>]) -> Vec<RejectedPolicy> {
    let mut accumulator = PolicyAccumulator::new();
    for event in events {
        accumulator.record(event);
    }
    accumulator.finish()
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LegacyViolation {
    pub policy: Policy,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resource: Option<Resource>,
}

/// Raw rejection records in walk order, `filterLogic` removed, no merging.
pub fn legacy_violations(events: &[RejectionEvent<'_>]) -> Vec<LegacyViolation> {
    events
        .iter()
        .map(|event| {
            let mut policy = event.policy.clone();
            policy.extra.remove(FILTER_LOGIC_FIELD);
            LegacyViolation {
                policy,
                resource: event.resource.cloned(),
            }
        })
        .collect()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RejectionTotals {
    pub total_rejected_libraries: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PolicyRejectionSummary {
    pub rejecting_policies: Vec<RejectedPolicy>,
    pub summary: RejectionTotals,
}

impl PolicyRejectionSummary {
    pub fn new(rejecting_policies: Vec<RejectedPolicy>) -> Self {
        let total_rejected_libraries = rejecting_policies
            .iter()
            .map(|policy| policy.rejected_libraries.len())
            .sum();
        Self {
            rejecting_policies,
            summary: RejectionTotals {
                total_rejected_libraries,
            },
        }
    }
}
