use depreport_core::NormalizeError;
use semver::Version;

const SOURCE_KIND: &str = "package.json";

/// The parts of a sibling `package.json` that shape lockfile normalization.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProjectManifest {
    pub name: Option<String>,
    pub version: Option<String>,
    /// Root specifiers in the lockfile's `name@range` key form.
    pub roots: Vec<String>,
}

pub fn parse_manifest(raw: &str, include_dev: bool) -> Result<ProjectManifest, NormalizeError> {
    let root: serde_json::Value =
        serde_json::from_str(raw).map_err(|error| NormalizeError::MalformedInput {
            source_kind: SOURCE_KIND,
            message: error.to_string(),
        })?;

    let mut sections = vec!["dependencies", "optionalDependencies"];
    if include_dev {
        sections.push("devDependencies");
    }

    let mut roots = Vec::new();
    for section in sections {
        let Some(entries) = root.get(section).and_then(|value| value.as_object()) else {
            continue;
        };
        for (name, range) in entries {
            let Some(range) = range.as_str() else {
                continue;
            };
            let specifier = format!("{name}@{range}");
            if !roots.contains(&specifier) {
                roots.push(specifier);
            }
        }
    }

    Ok(ProjectManifest {
        name: string_field(&root, "name"),
        version: string_field(&root, "version").and_then(normalize_project_version),
        roots,
    })
}

fn string_field(root: &serde_json::Value, key: &str) -> Option<String> {
    root.get(key)
        .and_then(|value| value.as_str())
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .map(ToOwned::to_owned)
}

fn normalize_project_version(raw: String) -> Option<String> {
    let trimmed = raw.trim_start_matches('v');
    match Version::parse(trimmed) {
        Ok(version) => Some(version.to_string()),
        Err(error) => {
            tracing::debug!("ignoring non-semver project version {raw}: {error}");
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const MANIFEST: &str = r#"{
        "name": "web",
        "version": "v2.1.0",
        "dependencies": {"react": "^18.2.0", "lodash": "^4.17.0"},
        "optionalDependencies": {"fsevents": "~2.3.2"},
        "devDependencies": {"jest": "^29.0.0", "lodash": "^4.17.0"}
    }"#;

    #[test]
    fn roots_follow_declaration_order_without_dev() {
        let manifest = parse_manifest(MANIFEST, false).expect("parse manifest");
        assert_eq!(manifest.name.as_deref(), Some("web"));
        assert_eq!(manifest.version.as_deref(), Some("2.1.0"));
        assert_eq!(
            manifest.roots,
            vec!["react@^18.2.0", "lodash@^4.17.0", "fsevents@~2.3.2"]
        );
    }

    #[test]
    fn dev_roots_are_appended_once_when_requested() {
        let manifest = parse_manifest(MANIFEST, true).expect("parse manifest");
        assert_eq!(
            manifest.roots,
            vec![
                "react@^18.2.0",
                "lodash@^4.17.0",
                "fsevents@~2.3.2",
                "jest@^29.0.0"
            ]
        );
    }

    #[test]
    fn non_semver_version_is_dropped_and_bad_json_is_malformed() {
        let manifest = parse_manifest(r#"{"name":"x","version":"latest"}"#, false)
            .expect("parse manifest");
        assert!(manifest.version.is_none());
        assert!(manifest.roots.is_empty());

        let err = parse_manifest("{", false).expect_err("bad json");
        assert!(matches!(
            err,
            NormalizeError::MalformedInput {
                source_kind: "package.json",
                ..
            }
        ));
    }
}
