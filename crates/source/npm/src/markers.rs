use depreport_core::{PackageId, split_specifier};
use std::collections::HashSet;

const DEDUPED_MARKER: &str = "deduped";

/// Identities the plain `npm ls` rendering marks as `deduped` somewhere in the tree.
pub fn deduped_markers(plain: &str) -> HashSet<PackageId> {
    let mut markers = HashSet::new();
    for line in plain.lines() {
        let tokens = line.split_whitespace().collect::<Vec<_>>();
        let Some(position) = tokens.iter().position(|token| *token == DEDUPED_MARKER) else {
            continue;
        };
        let identity = tokens[..position]
            .iter()
            .rev()
            .map(|token| token.trim_start_matches(is_tree_glyph))
            .find_map(parse_identity);
        if let Some(identity) = identity {
            markers.insert(identity);
        }
    }
    markers
}

fn is_tree_glyph(ch: char) -> bool {
    matches!(ch, '│' | '├' | '└' | '─' | '┬' | '┼' | '+' | '`' | '|' | '-')
}

fn parse_identity(token: &str) -> Option<PackageId> {
    let (name, version) = split_specifier(token);
    if name.is_empty() || version.is_empty() {
        return None;
    }
    Some(PackageId::new(name, Some(version.to_string())))
}
