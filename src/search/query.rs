//! Partial bug report queries.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::embedding::text::join_parts;
use crate::types::FieldKind;

/// A query made of any subset of the five fields.
///
/// Test info may be supplied as separate steps, expected and actual
/// results; they are combined the same way report fields are.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BugQuery {
    pub summary: Option<String>,
    pub code: Option<String>,
    pub test_steps: Option<String>,
    pub expected_result: Option<String>,
    pub actual_result: Option<String>,
    pub log: Option<String>,
    pub environment: Option<String>,
}

impl BugQuery {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_summary(mut self, text: impl Into<String>) -> Self {
        self.summary = Some(text.into());
        self
    }

    pub fn with_code(mut self, text: impl Into<String>) -> Self {
        self.code = Some(text.into());
        self
    }

    pub fn with_test_steps(mut self, text: impl Into<String>) -> Self {
        self.test_steps = Some(text.into());
        self
    }

    pub fn with_expected_result(mut self, text: impl Into<String>) -> Self {
        self.expected_result = Some(text.into());
        self
    }

    pub fn with_actual_result(mut self, text: impl Into<String>) -> Self {
        self.actual_result = Some(text.into());
        self
    }

    pub fn with_log(mut self, text: impl Into<String>) -> Self {
        self.log = Some(text.into());
        self
    }

    pub fn with_environment(mut self, text: impl Into<String>) -> Self {
        self.environment = Some(text.into());
        self
    }

    /// Non-empty text per supplied field, in field order.
    pub fn field_texts(&self) -> Vec<(FieldKind, String)> {
        fn part(value: &Option<String>) -> &str {
            value.as_deref().unwrap_or("")
        }

        FieldKind::ALL
            .into_iter()
            .filter_map(|field| {
                let text = match field {
                    FieldKind::Summary => join_parts([part(&self.summary)]),
                    FieldKind::Code => join_parts([part(&self.code)]),
                    FieldKind::TestInfo => join_parts([
                        part(&self.test_steps),
                        part(&self.expected_result),
                        part(&self.actual_result),
                    ]),
                    FieldKind::Log => join_parts([part(&self.log)]),
                    FieldKind::Environment => join_parts([part(&self.environment)]),
                };
                (!text.is_empty()).then_some((field, text))
            })
            .collect()
    }

    /// Whether no field carries any text.
    pub fn is_empty(&self) -> bool {
        self.field_texts().is_empty()
    }

    pub fn fields(&self) -> Vec<FieldKind> {
        self.field_texts().into_iter().map(|(f, _)| f).collect()
    }
}

/// Which fields a query supplied.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QueryShape {
    SummaryOnly,
    CodeOnly,
    TestOnly,
    LogOnly,
    EnvironmentOnly,
    Mixed,
}

impl QueryShape {
    /// `None` for an empty field list.
    pub fn classify(fields: &[FieldKind]) -> Option<Self> {
        match fields {
            [] => None,
            [FieldKind::Summary] => Some(QueryShape::SummaryOnly),
            [FieldKind::Code] => Some(QueryShape::CodeOnly),
            [FieldKind::TestInfo] => Some(QueryShape::TestOnly),
            [FieldKind::Log] => Some(QueryShape::LogOnly),
            [FieldKind::Environment] => Some(QueryShape::EnvironmentOnly),
            _ => Some(QueryShape::Mixed),
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            QueryShape::SummaryOnly => "summary_only",
            QueryShape::CodeOnly => "code_only",
            QueryShape::TestOnly => "test_only",
            QueryShape::LogOnly => "log_only",
            QueryShape::EnvironmentOnly => "environment_only",
            QueryShape::Mixed => "mixed",
        }
    }
}

impl fmt::Display for QueryShape {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
