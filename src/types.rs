use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Stable identity of a bug report as assigned by the issue tracker.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct BugId(String);

impl BugId {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.trim().is_empty()
    }
}

impl fmt::Display for BugId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for BugId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

impl From<String> for BugId {
    fn from(value: String) -> Self {
        Self(value)
    }
}

/// The five semantic fields a bug report is split into.
///
/// Each kind owns one field index inside an index generation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FieldKind {
    Summary,
    Code,
    TestInfo,
    Log,
    Environment,
}

impl FieldKind {
    /// Every field kind, in index order.
    pub const ALL: [FieldKind; 5] = [
        FieldKind::Summary,
        FieldKind::Code,
        FieldKind::TestInfo,
        FieldKind::Log,
        FieldKind::Environment,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            FieldKind::Summary => "summary",
            FieldKind::Code => "code",
            FieldKind::TestInfo => "test_info",
            FieldKind::Log => "log",
            FieldKind::Environment => "environment",
        }
    }

    /// Position of this kind in [`FieldKind::ALL`].
    pub fn index(&self) -> usize {
        match self {
            FieldKind::Summary => 0,
            FieldKind::Code => 1,
            FieldKind::TestInfo => 2,
            FieldKind::Log => 3,
            FieldKind::Environment => 4,
        }
    }

    /// Tag written into index artifact headers.
    pub fn tag(&self) -> u8 {
        self.index() as u8
    }

    pub fn from_tag(tag: u8) -> Option<Self> {
        Self::ALL.get(tag as usize).copied()
    }

    /// File name of this field's index artifact inside a version directory.
    pub fn artifact_name(&self) -> String {
        format!("{}.idx", self.as_str())
    }
}

impl fmt::Display for FieldKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for FieldKind {
    type Err = &'static str;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "summary" => Ok(FieldKind::Summary),
            "code" => Ok(FieldKind::Code),
            "test_info" | "test" | "testinfo" => Ok(FieldKind::TestInfo),
            "log" | "logs" => Ok(FieldKind::Log),
            "environment" | "env" => Ok(FieldKind::Environment),
            _ => Err("Unknown field kind"),
        }
    }
}

/// Position of a report inside one index generation (`0..n-1`).
///
/// Only meaningful together with the generation that assigned it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct InternalId(pub u32);

impl InternalId {
    pub fn value(&self) -> u32 {
        self.0
    }

    pub fn as_index(&self) -> usize {
        self.0 as usize
    }
}

impl fmt::Display for InternalId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Monotonically increasing identifier of a published index generation.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct IndexVersion(pub u64);

impl IndexVersion {
    pub fn value(&self) -> u64 {
        self.0
    }

    pub fn next(&self) -> Self {
        Self(self.0 + 1)
    }
}

impl fmt::Display for IndexVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "v{}", self.0)
    }
}

/// A bug report as stored by the relational collaborator.
///
/// Every field except `bug_id` is optional on input.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BugReport {
    pub bug_id: BugId,
    pub summary: String,
    pub description: String,
    pub code: String,
    pub file_paths: Vec<String>,
    /// Unified diffs attached to the fix
    pub code_diffs: Vec<String>,
    pub test_steps: String,
    pub expected_result: String,
    pub actual_result: String,
    pub error_logs: String,
    pub log_info: String,
    pub environment_info: String,
    pub fix_person: Option<String>,
    pub related_issues: Vec<String>,
    pub create_at: Option<DateTime<Utc>>,
    pub fix_date: Option<DateTime<Utc>>,
}

impl BugReport {
    pub fn new(bug_id: impl Into<BugId>) -> Self {
        Self {
            bug_id: bug_id.into(),
            ..Default::default()
        }
    }

    pub fn with_summary(mut self, summary: impl Into<String>) -> Self {
        self.summary = summary.into();
        self
    }

    pub fn with_code(mut self, code: impl Into<String>) -> Self {
        self.code = code.into();
        self
    }

    pub fn with_error_logs(mut self, logs: impl Into<String>) -> Self {
        self.error_logs = logs.into();
        self
    }

    pub fn with_environment(mut self, environment: impl Into<String>) -> Self {
        self.environment_info = environment.into();
        self
    }

    pub fn with_fix_date(mut self, fix_date: DateTime<Utc>) -> Self {
        self.fix_date = Some(fix_date);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_field_kind_roundtrips_through_tags_and_names() {
        for (i, kind) in FieldKind::ALL.iter().enumerate() {
            assert_eq!(kind.index(), i);
            assert_eq!(FieldKind::from_tag(kind.tag()), Some(*kind));
            assert_eq!(kind.as_str().parse::<FieldKind>(), Ok(*kind));
        }
        assert_eq!(FieldKind::from_tag(5), None);
        assert_eq!("env".parse::<FieldKind>(), Ok(FieldKind::Environment));
        assert!("stacktrace".parse::<FieldKind>().is_err());
    }

    #[test]
    fn test_artifact_names_are_distinct() {
        let names: std::collections::HashSet<_> =
            FieldKind::ALL.iter().map(|k| k.artifact_name()).collect();
        assert_eq!(names.len(), 5);
        assert!(names.contains("test_info.idx"));
    }

    #[test]
    fn test_index_version_ordering() {
        let v1 = IndexVersion(1);
        assert_eq!(v1.next(), IndexVersion(2));
        assert!(v1 < v1.next());
        assert_eq!(v1.to_string(), "v1");
    }

    #[test]
    fn test_bug_report_deserializes_with_missing_fields() {
        let json = r#"{"bug_id": "BUG-7", "summary": "crash on start", "fix_date": "2024-03-01T10:00:00Z"}"#;
        let report: BugReport = serde_json::from_str(json).unwrap();

        assert_eq!(report.bug_id, BugId::from("BUG-7"));
        assert_eq!(report.summary, "crash on start");
        assert!(report.code.is_empty());
        assert!(report.code_diffs.is_empty());
        assert!(report.fix_date.is_some());
        assert!(report.create_at.is_none());
    }

    #[test]
    fn test_bug_id_emptiness() {
        assert!(BugId::new("  ").is_empty());
        assert!(!BugId::new("B-1").is_empty());
        assert_eq!(BugId::new("B-1").to_string(), "B-1");
    }
}
