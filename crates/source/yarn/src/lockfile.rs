//! yarn.lock (v1) syntax: indentation-structured blocks keyed by comma-joined specifiers.

use depreport_core::{LockEntry, LockfileGraph, NormalizeError};

const SOURCE_KIND: &str = "yarn.lock";
const INDENT: usize = 2;
const DEPENDENCY_SECTIONS: &[&str] = &["dependencies", "optionalDependencies"];

struct Block {
    specifiers: Vec<String>,
    entry: LockEntry,
    section: Option<String>,
}

/// Parses yarn.lock text into a specifier-keyed graph. Line endings are normalized first.
pub fn parse_yarn_lock(raw: &str) -> Result<LockfileGraph, NormalizeError> {
    let text = raw.replace("\r\n", "\n").replace('\r', "\n");
    let mut graph = LockfileGraph::new();
    let mut current: Option<Block> = None;

    for (index, line) in text.lines().enumerate() {
        let line_number = index + 1;
        let trimmed = line.trim_end();
        let content = trimmed.trim_start();
        if content.is_empty() || content.starts_with('#') {
            continue;
        }

        let indent = trimmed.len() - content.len();
        if indent % INDENT != 0 {
            return Err(malformed(line_number, "indentation is not a multiple of two spaces"));
        }

        match indent / INDENT {
            0 => {
                let Some(header) = content.strip_suffix(':') else {
                    return Err(malformed(line_number, "expected a `specifier:` block header"));
                };
                if let Some(block) = current.take() {
                    flush(&mut graph, block);
                }
                current = Some(Block {
                    specifiers: parse_specifiers(header, line_number)?,
                    entry: LockEntry::default(),
                    section: None,
                });
            }
            1 => {
                let Some(block) = current.as_mut() else {
                    return Err(malformed(line_number, "field outside of any entry"));
                };
                let (key, value) = split_pair(content, line_number)?;
                block.section = None;
                match (key.as_str(), value) {
                    (section, None) => block.section = Some(section.to_string()),
                    ("version", Some(value)) => block.entry.version = Some(value),
                    ("resolved", Some(value)) => block.entry.resolved = Some(value),
                    ("integrity", Some(value)) => block.entry.integrity = Some(value),
                    _ => {}
                }
            }
            2 => {
                let Some(block) = current.as_mut() else {
                    return Err(malformed(line_number, "dependency outside of any entry"));
                };
                let Some(section) = block.section.as_deref() else {
                    return Err(malformed(line_number, "nested value outside of a section"));
                };
                let (name, range) = split_pair(content, line_number)?;
                if DEPENDENCY_SECTIONS.contains(&section) {
                    let Some(range) = range else {
                        return Err(malformed(line_number, "dependency without a range"));
                    };
                    block.entry.add_dependency(name, range);
                }
            }
            _ => return Err(malformed(line_number, "unexpected nesting depth")),
        }
    }

    if let Some(block) = current.take() {
        flush(&mut graph, block);
    }
    Ok(graph)
}

fn flush(graph: &mut LockfileGraph, block: Block) {
    for specifier in block.specifiers {
        graph.insert(specifier, block.entry.clone());
    }
}

fn parse_specifiers(header: &str, line_number: usize) -> Result<Vec<String>, NormalizeError> {
    let mut specifiers = Vec::new();
    for part in header.split(", ") {
        let specifier = unquote(part.trim(), line_number)?;
        if specifier.is_empty() {
            return Err(malformed(line_number, "empty specifier"));
        }
        specifiers.push(specifier);
    }
    Ok(specifiers)
}

/// Splits `key value` (or `key: value` / `key:`) into an unquoted key and optional value.
fn split_pair(content: &str, line_number: usize) -> Result<(String, Option<String>), NormalizeError> {
    let (raw_key, rest) = if let Some(stripped) = content.strip_prefix('"') {
        let Some(end) = stripped.find('"') else {
            return Err(malformed(line_number, "unterminated quoted key"));
        };
        (&content[..end + 2], &stripped[end + 1..])
    } else {
        match content.find(char::is_whitespace) {
            Some(end) => (&content[..end], &content[end..]),
            None => (content, ""),
        }
    };

    let rest = rest.trim();
    let (raw_key, rest) = match (raw_key.strip_suffix(':'), rest.strip_prefix(':')) {
        (Some(key), _) => (key, rest),
        (None, Some(value)) => (raw_key, value.trim()),
        (None, None) => (raw_key, rest),
    };

    let key = unquote(raw_key, line_number)?;
    if rest.is_empty() {
        return Ok((key, None));
    }
    Ok((key, Some(unquote(rest, line_number)?)))
}

fn unquote(raw: &str, line_number: usize) -> Result<String, NormalizeError> {
    match raw.strip_prefix('"') {
        Some(inner) => inner
            .strip_suffix('"')
            .map(ToOwned::to_owned)
            .ok_or_else(|| malformed(line_number, "unterminated quoted string")),
        None => Ok(raw.to_string()),
    }
}

fn malformed(line_number: usize, reason: &str) -> NormalizeError {
    NormalizeError::MalformedInput {
        source_kind: SOURCE_KIND,
        message: format!("line {line_number}: {reason}"),
    }
}
