//! Parsing of `git status --porcelain` output.

use std::collections::HashSet;

/// Extracts the affected paths from porcelain status output, one entry per
/// distinct path in first-occurrence order.
///
/// A well-formed record opens with two status-code bytes and a separating
/// space. Leading spaces are status-significant, so lines are split on line
/// boundaries only and never pre-trimmed. Rename records (`old -> new`) keep
/// the destination side. Malformed records degrade to the text after the
/// leading indentation instead of being dropped.
///
/// Pure function: no subprocess, no side effects.
pub fn changed_paths(output: &str) -> Vec<String> {
    let mut seen = HashSet::new();
    let mut paths = Vec::new();

    for line in output.split(['\n', '\r']) {
        if line.is_empty() {
            continue;
        }
        if let Some(path) = path_candidate(line)
            && seen.insert(path.to_string())
        {
            paths.push(path.to_string());
        }
    }

    paths
}

fn path_candidate(line: &str) -> Option<&str> {
    let bytes = line.as_bytes();

    // An ASCII space at offset 2 marks a well-formed "XY path" record; the
    // space byte guarantees offset 3 is a char boundary.
    let raw = if bytes.len() >= 3 && bytes[2] == b' ' {
        &line[3..]
    } else {
        let start = line.find(|c| c != ' ' && c != '\t')?;
        &line[start..]
    };

    let destination = match raw.rfind(" -> ") {
        Some(idx) => &raw[idx + 4..],
        None => raw,
    };

    let trimmed = destination.trim();
    (!trimmed.is_empty()).then_some(trimmed)
}
