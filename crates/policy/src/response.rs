use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Map, Value};

use crate::PolicyError;

const REJECT_ACTION: &str = "Reject";
const PROJECT_MAPPINGS: &[&str] = &["projects", "existingProjects", "newProjects"];

/// Decoded `data` document. Project mappings keep the order the service sent them in.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResponseData {
    #[serde(default)]
    pub projects: Option<Map<String, Value>>,
    #[serde(default)]
    pub existing_projects: Option<Map<String, Value>>,
    #[serde(default)]
    pub new_projects: Option<Map<String, Value>>,
}

impl ResponseData {
    fn mapping(&self, key: &str) -> Option<&Map<String, Value>> {
        match key {
            "projects" => self.projects.as_ref(),
            "existingProjects" => self.existing_projects.as_ref(),
            "newProjects" => self.new_projects.as_ref(),
            _ => None,
        }
    }

    /// Every project tree across all present mappings, typed.
    pub fn project_trees(&self) -> Result<Vec<(String, ResponseNode)>, PolicyError> {
        let mut trees = Vec::new();
        for &mapping_key in PROJECT_MAPPINGS {
            let Some(mapping) = self.mapping(mapping_key) else {
                continue;
            };
            for (project, value) in mapping {
                let node = ResponseNode::deserialize(value).map_err(|error| {
                    PolicyError::UnreadableServerResponse {
                        reason: format!(
                            "project '{project}' in {mapping_key} is not a node object: {error}"
                        ),
                        message: None,
                        data: None,
                    }
                })?;
                trees.push((project.clone(), node));
            }
        }
        Ok(trees)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct ResponseNode {
    #[serde(default, deserialize_with = "null_as_empty")]
    pub children: Vec<ResponseNode>,
    #[serde(default)]
    pub policy: Option<Policy>,
    #[serde(default)]
    pub resource: Option<Resource>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Policy {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub display_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub action_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub filter_type: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub project_level: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub inclusive: Option<Value>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl Policy {
    pub fn is_reject(&self) -> bool {
        self.action_type.as_deref() == Some(REJECT_ACTION)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Resource {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub display_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sha1: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub link: Option<String>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

fn null_as_empty<'de, D>(deserializer: D) -> Result<Vec<ResponseNode>, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(Option::<Vec<ResponseNode>>::deserialize(deserializer)?.unwrap_or_default())
}

/// One policy rejecting one resource in one project.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RejectionEvent<'a> {
    pub policy: &'a Policy,
    pub resource: Option<&'a Resource>,
    pub project: &'a str,
}

impl RejectionEvent<'_> {
    pub fn resource_name(&self) -> Option<&str> {
        self.resource.and_then(|r| r.display_name.as_deref())
    }

    pub fn resource_sha1(&self) -> Option<&str> {
        self.resource.and_then(|r| r.sha1.as_deref())
    }

    pub fn resource_link(&self) -> Option<&str> {
        self.resource.and_then(|r| r.link.as_deref())
    }
}

/// Walks every project tree in pre-order and yields each rejecting node.
///
/// Project roots themselves are not inspected, only their descendants. Children of a
/// rejected node are still visited.
pub fn collect_rejections(trees: &[(String, ResponseNode)]) -> Vec<RejectionEvent<'_>> {
    let mut events = Vec::new();
    for (project, root) in trees {
        let mut stack = root.children.iter().rev().collect::<Vec<_>>();
        while let Some(node) = stack.pop() {
            if let Some(policy) = node.policy.as_ref()
                && policy.is_reject()
            {
                events.push(RejectionEvent {
                    policy,
                    resource: node.resource.as_ref(),
                    project: project.as_str(),
                });
            }
            stack.extend(node.children.iter().rev());
        }
    }
    events
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn data(value: Value) -> ResponseData {
        serde_json::from_value(value).expect("decode response data")
    }

    #[test]
    fn walks_mappings_in_order_and_descends_into_rejected_nodes() {
        let response = data(json!({
            "newProjects": {
                "fresh": {"children": [
                    {"policy": {"displayName": "P", "actionType": "Reject"},
                     "resource": {"displayName": "c", "sha1": "3"}, "children": []}
                ]}
            },
            "existingProjects": {
                "web": {
                    "policy": {"displayName": "root", "actionType": "Reject"},
                    "children": [
                        {"policy": {"displayName": "P", "actionType": "Reject"},
                         "resource": {"displayName": "a", "sha1": "1"},
                         "children": [
                            {"policy": {"displayName": "Q", "actionType": "Reject"},
                             "resource": {"displayName": "b", "sha1": "2"}, "children": []}
                         ]},
                        {"policy": {"displayName": "P", "actionType": "Approve"},
                         "resource": {"displayName": "ok"}}
                    ]
                }
            }
        }));

        let trees = response.project_trees().expect("typed trees");
        let events = collect_rejections(&trees);
        let summary = events
            .iter()
            .map(|event| (event.project, event.resource_name().unwrap_or("-")))
            .collect::<Vec<_>>();
        assert_eq!(summary, vec![("web", "a"), ("web", "b"), ("fresh", "c")]);
        assert_eq!(events[1].policy.display_name.as_deref(), Some("Q"));
        assert_eq!(events[2].resource_sha1(), Some("3"));
    }

    #[test]
    fn combined_mapping_is_walked_first() {
        let response = data(json!({
            "existingProjects": {"old": {"children": [
                {"policy": {"displayName": "P", "actionType": "Reject"}, "resource": {"sha1": "x"}}
            ]}},
            "projects": {"both": {"children": [
                {"policy": {"displayName": "P", "actionType": "Reject"}, "resource": {"sha1": "y"}}
            ]}}
        }));
        let trees = response.project_trees().expect("typed trees");
        let projects = collect_rejections(&trees)
            .iter()
            .map(|event| event.project)
            .collect::<Vec<_>>();
        assert_eq!(projects, vec!["both", "old"]);
    }

    #[test]
    fn non_object_project_is_unreadable() {
        let response = data(json!({"newProjects": {"broken": 42}}));
        let err = response.project_trees().expect_err("project is a number");
        match err {
            PolicyError::UnreadableServerResponse { reason, .. } => {
                assert!(reason.contains("'broken' in newProjects"));
            }
        }
    }

    #[test]
    fn null_children_are_treated_as_empty() {
        let response = data(json!({
            "newProjects": {"web": {"children": [
                {"policy": {"displayName": "P", "actionType": "Reject"},
                 "resource": {"displayName": "a", "sha1": "1"},
                 "children": null}
            ]}},
            "existingProjects": {"old": {"children": null}}
        }));
        let trees = response.project_trees().expect("null children accepted");
        assert_eq!(trees.len(), 2);
        assert!(trees[0].1.children.is_empty());
        let events = collect_rejections(&trees);
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].resource_name(), Some("a"));
    }

    #[test]
    fn deep_chains_are_walked_without_recursion() {
        let mut node = ResponseNode {
            policy: Some(Policy {
                action_type: Some("Reject".to_string()),
                ..Policy::default()
            }),
            ..ResponseNode::default()
        };
        for _ in 0..2_000 {
            node = ResponseNode {
                children: vec![node],
                ..ResponseNode::default()
            };
        }
        let trees = vec![("deep".to_string(), node)];
        assert_eq!(collect_rejections(&trees).len(), 1);
    }
}
