//! CS-014: Breaking-change notes in a Keep-a-Changelog document.
//!
//! The note goes under "### Changed" of the Unreleased section, which is
//! created when missing. A description already present anywhere in the
//! document is not added again.

use super::error::EngineError;
use crate::tree::SourceTree;
use tracing::warn;

/// Outcome of recording a breaking change.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChangelogUpdate {
    /// New document content.
    Updated(String),
    AlreadyUpdated,
    /// Neither an Unreleased section nor a "### Changed" heading exists.
    NoChangedSection,
    /// No changelog file.
    Missing,
}

pub fn breaking_change_line(description: &str) -> String {
    format!("-   **BREAKING** {}", description)
}

fn is_version_heading(line: &str) -> bool {
    line.starts_with("## ")
}

fn is_changed_heading(line: &str) -> bool {
    line.trim_end() == "### Changed"
}

fn splice(lines: &[&str], at: usize, text: &str) -> String {
    let mut out: String = lines[..at].concat();
    if !out.is_empty() && !out.ends_with('\n') {
        out.push('\n');
    }
    out.push_str(text);
    out.push_str(&lines[at..].concat());
    out
}

/// Insert a breaking-change line for `description` into `content`.
pub fn insert_breaking_change(content: &str, description: &str) -> ChangelogUpdate {
    if content.contains(description) {
        return ChangelogUpdate::AlreadyUpdated;
    }
    let line = format!("{}\n", breaking_change_line(description));
    let lines: Vec<&str> = content.split_inclusive('\n').collect();

    let unreleased = lines
        .iter()
        .position(|l| l.trim_end().eq_ignore_ascii_case("## [Unreleased]"));
    let (from, to) = match unreleased {
        Some(u) => {
            let end = lines[u + 1..]
                .iter()
                .position(|l| is_version_heading(l))
                .map_or(lines.len(), |i| u + 1 + i);
            (u + 1, end)
        }
        None => (0, lines.len()),
    };

    if let Some(h) = lines[from..to].iter().position(|l| is_changed_heading(l)) {
        let heading = from + h;
        let mut at = heading + 1;
        if lines.get(at).is_some_and(|l| l.trim().is_empty()) {
            at += 1;
        }
        return ChangelogUpdate::Updated(splice(&lines, at, &line));
    }

    match unreleased {
        Some(u) => ChangelogUpdate::Updated(splice(
            &lines,
            u + 1,
            &format!("\n### Changed\n\n{}", line),
        )),
        None => ChangelogUpdate::NoChangedSection,
    }
}

/// Work out how the changelog at `path` of `tree` would change. Writes nothing.
pub async fn prepare_breaking_change(
    tree: &dyn SourceTree,
    path: &str,
    description: &str,
) -> Result<ChangelogUpdate, EngineError> {
    let Some(content) = tree.read_file(path).await? else {
        warn!(changelog = path, "no changelog, breaking change not documented");
        return Ok(ChangelogUpdate::Missing);
    };
    let update = insert_breaking_change(&content, description);
    if update == ChangelogUpdate::NoChangedSection {
        warn!(changelog = path, "no Unreleased or Changed section, breaking change not documented");
    }
    Ok(update)
}
