//! End to end over a JSON bug report file and a settings file.

use std::fs;

use bugfuse::{BugId, BugQuery, LoadOutcome, SearchContext, SearchError, Settings};
use tempfile::TempDir;

const BUGS: &str = r#"[
  {
    "bug_id": "PAY-1",
    "summary": "checkout total rounds cents incorrectly",
    "code": "let total = (price * qty) as i64 / 100;",
    "error_logs": "assertion failed: total == 1999",
    "environment_info": "rust 1.80 linux",
    "fix_date": "2024-03-01T12:00:00Z"
  },
  {
    "bug_id": "PAY-2",
    "summary": "refund webhook retried forever",
    "log_info": "webhook 503 attempt 57",
    "fix_date": "2024-05-20T08:30:00Z"
  },
  {
    "bug_id": "UI-7",
    "summary": "date picker shows wrong month in January",
    "test_steps": "open picker on Jan 31",
    "expected_result": "January is shown",
    "actual_result": "March is shown"
  }
]"#;

fn write_workspace(dir: &TempDir) -> std::path::PathBuf {
    let root = dir.path();
    fs::write(root.join("bugs.json"), BUGS).unwrap();

    let config = format!(
        r#"
[store]
data_dir = "{root}/index"
backup_dir = "{root}/backups"
retry_delay_ms = 0

[embedding]
provider = "hashing"
dimension = 96

[search]
default_results = 2

[source]
path = "{root}/bugs.json"
"#,
        root = root.display()
    );
    let path = root.join("settings.toml");
    fs::write(&path, config).unwrap();
    path
}

#[test]
fn test_search_from_settings_file() {
    let dir = TempDir::new().unwrap();
    let settings = Settings::load_from(write_workspace(&dir)).unwrap();
    assert_eq!(settings.search.default_results, 2);

    let context = SearchContext::from_settings(&settings).unwrap();
    let outcome = context.load().unwrap();
    assert!(matches!(outcome, LoadOutcome::Rebuilt(_)));
    assert_eq!(context.status().model_id, "hashing-fnv1a-96");

    let response = context
        .search(&BugQuery::new().with_summary("checkout total rounding"), None, None)
        .unwrap();
    assert_eq!(response.hits.len(), 2);
    assert_eq!(response.hits[0].bug_id, BugId::from("PAY-1"));
    assert_eq!(
        response.hits[0].report.error_logs,
        "assertion failed: total == 1999"
    );

    let reloaded = SearchContext::from_settings(&settings).unwrap();
    assert!(matches!(reloaded.load().unwrap(), LoadOutcome::Loaded(_)));
}

#[test]
fn test_test_info_query_matches_combined_steps() {
    let dir = TempDir::new().unwrap();
    let settings = Settings::load_from(write_workspace(&dir)).unwrap();
    let context = SearchContext::from_settings(&settings).unwrap();
    context.load().unwrap();

    let response = context
        .search(
            &BugQuery::new()
                .with_test_steps("open picker on Jan 31")
                .with_actual_result("March is shown"),
            None,
            Some(1),
        )
        .unwrap();
    assert_eq!(response.hits[0].bug_id, BugId::from("UI-7"));
}

#[test]
fn test_malformed_source_fails_rebuild_and_keeps_serving() {
    let dir = TempDir::new().unwrap();
    let settings = Settings::load_from(write_workspace(&dir)).unwrap();
    let context = SearchContext::from_settings(&settings).unwrap();
    context.rebuild().unwrap();

    fs::write(&settings.source.path, "[{\"bug_id\": \"X\", ").unwrap();
    assert!(matches!(context.rebuild(), Err(SearchError::Source(_))));

    // Ranking needs only the index; hydration would hit the broken file
    let (ranking, _) = context
        .rank(&BugQuery::new().with_log("webhook 503"), None, Some(1))
        .unwrap();
    assert_eq!(ranking.version.value(), 1);
    assert_eq!(ranking.hits[0].bug_id, BugId::from("PAY-2"));
}
