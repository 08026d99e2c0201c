//! Projection of a bug report onto the five semantic fields.
//!
//! The text produced here is what the embedder sees at build time. Queries
//! go through [`crate::search::BugQuery::field_texts`] instead, which
//! combines the query parts with the same separators.

use std::collections::BTreeSet;

use crate::types::{BugReport, FieldKind};

/// Added lines, removed lines and touched files of one or more unified diffs.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DiffAggregate {
    pub added: Vec<String>,
    pub removed: Vec<String>,
    /// Sorted, de-duplicated file paths without `a/` and `b/` prefixes
    pub changed_files: Vec<String>,
}

impl DiffAggregate {
    pub fn is_empty(&self) -> bool {
        self.added.is_empty() && self.removed.is_empty() && self.changed_files.is_empty()
    }
}

/// Joins the non-blank parts with newlines.
pub fn join_parts<'a>(parts: impl IntoIterator<Item = &'a str>) -> String {
    parts
        .into_iter()
        .map(str::trim)
        .filter(|p| !p.is_empty())
        .collect::<Vec<_>>()
        .join("\n")
}

/// Text embedded for `field` of `report`. Empty when the report has nothing
/// for that field.
pub fn field_text(report: &BugReport, field: FieldKind) -> String {
    match field {
        FieldKind::Summary => join_parts([report.summary.as_str(), report.description.as_str()]),
        FieldKind::Code => {
            let diffs = aggregate_diffs(&report.code_diffs);
            let paths = join_parts(
                report
                    .file_paths
                    .iter()
                    .chain(diffs.changed_files.iter())
                    .map(String::as_str)
                    .collect::<BTreeSet<_>>(),
            );
            let added = diffs.added.join("\n");
            let removed = diffs.removed.join("\n");
            join_parts([
                report.code.as_str(),
                paths.as_str(),
                added.as_str(),
                removed.as_str(),
            ])
        }
        FieldKind::TestInfo => join_parts([
            report.test_steps.as_str(),
            report.expected_result.as_str(),
            report.actual_result.as_str(),
        ]),
        FieldKind::Log => join_parts([report.error_logs.as_str(), report.log_info.as_str()]),
        FieldKind::Environment => join_parts([report.environment_info.as_str()]),
    }
}

/// Aggregates unified diff text.
///
/// Context lines are ignored, binary sections contribute only their path,
/// and `/dev/null` sides of added or deleted files are skipped.
pub fn aggregate_diffs(diffs: &[String]) -> DiffAggregate {
    let mut aggregate = DiffAggregate::default();
    let mut files = BTreeSet::new();

    for diff in diffs {
        let mut section = FileSection::default();
        let mut lines = diff.lines().peekable();

        while let Some(line) = lines.next() {
            if let Some(rest) = line.strip_prefix("diff --git ") {
                section.flush(&mut files);
                section.git_path = rest.split_whitespace().last().map(str::to_string);
                continue;
            }

            let next_is_target = lines.peek().is_some_and(|next| next.starts_with("+++ "));
            if let Some(source) = line.strip_prefix("--- ") {
                if !section.in_hunk || next_is_target {
                    if section.source.is_some() || section.target.is_some() {
                        section.flush(&mut files);
                    }
                    section.source = Some(header_path(source));
                    section.in_hunk = false;
                    continue;
                }
            }
            if let Some(target) = line.strip_prefix("+++ ") {
                if !section.in_hunk {
                    section.target = Some(header_path(target));
                    continue;
                }
            }

            if line.starts_with("Binary files ") || line.starts_with("GIT binary patch") {
                section.binary = true;
                section.in_hunk = false;
                continue;
            }
            if line.starts_with("@@") {
                section.in_hunk = !section.binary;
                continue;
            }
            if !section.in_hunk {
                continue;
            }

            if let Some(added) = line.strip_prefix('+') {
                aggregate.added.push(added.to_string());
            } else if let Some(removed) = line.strip_prefix('-') {
                aggregate.removed.push(removed.to_string());
            }
        }
        section.flush(&mut files);
    }

    aggregate.changed_files = files.into_iter().collect();
    aggregate
}

#[derive(Debug, Default)]
struct FileSection {
    git_path: Option<String>,
    source: Option<String>,
    target: Option<String>,
    binary: bool,
    in_hunk: bool,
}

impl FileSection {
    /// Records the section's path and resets for the next file.
    fn flush(&mut self, files: &mut BTreeSet<String>) {
        let taken = std::mem::take(self);
        let path = taken
            .target
            .filter(|p| p != "/dev/null")
            .or(taken.source.filter(|p| p != "/dev/null"))
            .or(taken.git_path);
        if let Some(path) = path {
            let stripped = strip_side_prefix(&path);
            if !stripped.is_empty() {
                files.insert(stripped.to_string());
            }
        }
    }
}

/// Path from a `---`/`+++` header, without any trailing timestamp.
fn header_path(header: &str) -> String {
    header.split('\t').next().unwrap_or(header).trim().to_string()
}

fn strip_side_prefix(path: &str) -> &str {
    path.strip_prefix("a/")
        .or_else(|| path.strip_prefix("b/"))
        .unwrap_or(path)
}
