//! Composition of line-range changes onto file content.
//!
//! The LLM describes edits as [`StructuredChange`]s: 1-based inclusive line
//! ranges plus the text it believes is there (`before`) and the replacement
//! (`after`). Line numbers drift when the model miscounts, so `before` is
//! located with increasingly tolerant matching, preferring the candidate
//! closest to the stated line:
//!
//! 1. exact line equality
//! 2. equality after trimming trailing whitespace
//! 3. equality after collapsing all whitespace runs
//!
//! Changes are applied bottom-up so earlier line numbers stay valid.

use std::fmt;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::PatchError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChangeKind {
    /// Insert `after` before `start_line`.
    Insert,
    /// Replace `start_line..=end_line` with `after`.
    #[default]
    Update,
    /// Remove `start_line..=end_line`.
    Delete,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChangeLocation {
    pub file_path: String,
    pub start_line: usize,
    pub end_line: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StructuredChange {
    #[serde(default)]
    pub reason: String,
    pub location: ChangeLocation,
    #[serde(default, alias = "change_type")]
    pub kind: ChangeKind,
    #[serde(default)]
    pub before: String,
    #[serde(default)]
    pub after: String,
}

/// The response shape requested from the LLM and accepted in plan files.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StructuredResponse {
    #[serde(default)]
    pub summary: String,
    #[serde(default)]
    pub changes: Vec<StructuredChange>,
}

impl StructuredResponse {
    /// Distinct target files, in order of first mention.
    pub fn files(&self) -> Vec<PathBuf> {
        let mut files: Vec<PathBuf> = Vec::new();
        for change in &self.changes {
            let path = PathBuf::from(&change.location.file_path);
            if !files.contains(&path) {
                files.push(path);
            }
        }
        files
    }

    /// Changes aimed at `file`. A change with an empty `file_path` is taken
    /// to target `file`.
    pub fn changes_for(&self, file: &Path) -> Vec<StructuredChange> {
        self.changes
            .iter()
            .filter(|c| c.location.file_path.is_empty() || same_file(&c.location.file_path, file))
            .cloned()
            .collect()
    }
}

/// Loose path comparison: models echo paths with `./` prefixes or as
/// absolute paths ending in the project-relative one.
fn same_file(stated: &str, file: &Path) -> bool {
    let stated = Path::new(stated.trim_start_matches("./"));
    stated == file || stated.ends_with(file) || file.ends_with(stated)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum MatchKind {
    Exact,
    TrimmedTrailing,
    WhitespaceNormalized,
}

impl fmt::Display for MatchKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Exact => write!(f, "exact"),
            Self::TrimmedTrailing => write!(f, "trimmed_trailing"),
            Self::WhitespaceNormalized => write!(f, "whitespace_normalized"),
        }
    }
}

/// Half-open line range `[start, end)` replaced by `lines`.
#[derive(Debug)]
struct Splice {
    start: usize,
    end: usize,
    lines: Vec<String>,
}

/// Apply `changes` to `content` and return the new content.
///
/// The original line-ending style and trailing-newline state are kept.
/// Out-of-bounds, unlocatable or overlapping changes reject the whole set.
pub fn compose(content: &str, changes: &[StructuredChange]) -> Result<String, PatchError> {
    let eol = if content.contains("\r\n") { "\r\n" } else { "\n" };
    let trailing_newline = content.is_empty() || content.ends_with('\n');
    let mut lines: Vec<String> = content.lines().map(String::from).collect();

    let mut splices = changes
        .iter()
        .map(|change| resolve(&lines, change))
        .collect::<Result<Vec<_>, _>>()?;

    splices.sort_by_key(|s| (s.start, s.end));
    for pair in splices.windows(2) {
        if pair[1].start < pair[0].end {
            return Err(PatchError::invalid_change(
                pair[1].start + 1,
                format!(
                    "overlaps the change at lines {}-{}",
                    pair[0].start + 1,
                    pair[0].end
                ),
            ));
        }
    }

    for splice in splices.into_iter().rev() {
        lines.splice(splice.start..splice.end, splice.lines);
    }

    let mut out = lines.join(eol);
    if trailing_newline && !out.is_empty() {
        out.push_str(eol);
    }
    Ok(out)
}

fn resolve(lines: &[String], change: &StructuredChange) -> Result<Splice, PatchError> {
    let loc = &change.location;
    if loc.start_line == 0 {
        return Err(PatchError::invalid_change(0, "line numbers are 1-based"));
    }

    let after = split_lines(&change.after);

    if change.kind == ChangeKind::Insert {
        if loc.start_line > lines.len() + 1 {
            return Err(PatchError::invalid_change(
                loc.start_line,
                format!("insert past end of file ({} lines)", lines.len()),
            ));
        }
        let at = loc.start_line - 1;
        return Ok(Splice {
            start: at,
            end: at,
            lines: after,
        });
    }

    if loc.end_line < loc.start_line {
        return Err(PatchError::invalid_change(
            loc.start_line,
            format!("end_line {} before start_line", loc.end_line),
        ));
    }

    let before = split_lines(&change.before);
    let (start, end) = if before.is_empty() {
        if loc.end_line > lines.len() {
            return Err(PatchError::invalid_change(
                loc.start_line,
                format!("range ends past end of file ({} lines)", lines.len()),
            ));
        }
        (loc.start_line - 1, loc.end_line)
    } else {
        let pattern: Vec<&str> = before.iter().map(String::as_str).collect();
        let (pos, kind) = locate(lines, &pattern, loc.start_line - 1).ok_or_else(|| {
            PatchError::invalid_change(loc.start_line, "`before` text not found in file")
        })?;
        if pos + 1 != loc.start_line || kind != MatchKind::Exact {
            tracing::debug!(
                stated = loc.start_line,
                found = pos + 1,
                match_kind = %kind,
                "Relocated change"
            );
        }
        (pos, pos + pattern.len())
    };

    let replacement = match change.kind {
        ChangeKind::Delete => Vec::new(),
        _ => after,
    };
    Ok(Splice {
        start,
        end,
        lines: replacement,
    })
}

fn split_lines(text: &str) -> Vec<String> {
    text.lines().map(String::from).collect()
}

/// Find `pattern` in `content`, trying each tolerance level in turn and
/// returning the match nearest to `hint` (0-based).
fn locate(content: &[String], pattern: &[&str], hint: usize) -> Option<(usize, MatchKind)> {
    let exact = |a: &str, b: &str| a == b;
    let trimmed = |a: &str, b: &str| a.trim_end() == b.trim_end();
    let normalized = |a: &str, b: &str| normalize_ws(a) == normalize_ws(b);

    find_nearest(content, pattern, hint, exact)
        .map(|p| (p, MatchKind::Exact))
        .or_else(|| find_nearest(content, pattern, hint, trimmed).map(|p| (p, MatchKind::TrimmedTrailing)))
        .or_else(|| {
            find_nearest(content, pattern, hint, normalized)
                .map(|p| (p, MatchKind::WhitespaceNormalized))
        })
}

fn find_nearest(
    content: &[String],
    pattern: &[&str],
    hint: usize,
    eq: impl Fn(&str, &str) -> bool,
) -> Option<usize> {
    if pattern.is_empty() || pattern.len() > content.len() {
        return None;
    }
    (0..=content.len() - pattern.len())
        .filter(|&i| {
            pattern
                .iter()
                .enumerate()
                .all(|(j, pat)| eq(&content[i + j], pat))
        })
        .min_by_key(|&i| i.abs_diff(hint))
}

/// Collapse runs of whitespace to one space and trim.
fn normalize_ws(s: &str) -> String {
    s.split_whitespace().collect::<Vec<_>>().join(" ")
}
