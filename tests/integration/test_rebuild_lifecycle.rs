//! Rebuild, publish and cache behavior across index versions.

use std::sync::Arc;

use bugfuse::{
    BugId, BugQuery, BugReport, IndexVersion, InMemoryBugSource, LoadOutcome, SearchContext,
    SearchError,
};

use crate::common::{
    FlakySource, GatedEmbedder, TestContext, abc_reports, hashing_embedder, memory_source,
};

#[test]
fn test_cached_results_never_outlive_their_version() {
    let source = memory_source(abc_reports());
    let test = TestContext::new(source.clone());
    test.context.rebuild().unwrap();

    let query = BugQuery::new().with_summary("socket timeout in client");
    let before = test.context.search(&query, None, Some(3)).unwrap();
    assert_eq!(before.hits[0].bug_id, BugId::from("C"));
    assert!(test.context.search(&query, None, Some(3)).unwrap().cached);

    source.insert(BugReport::new("D").with_summary("socket timeout in client"));
    test.context.rebuild().unwrap();

    let after = test.context.search(&query, None, Some(3)).unwrap();
    assert!(!after.cached);
    assert_eq!(after.version, IndexVersion(2));
    assert_eq!(after.hits[0].bug_id, BugId::from("D"));
}

#[test]
fn test_concurrent_rebuild_is_rejected_while_searches_continue() {
    let embedder = Arc::new(GatedEmbedder::new());
    let test = TestContext::with_embedder(embedder.clone(), memory_source(abc_reports()));
    let context = Arc::new(test.context);
    context.rebuild().unwrap();

    embedder.close();
    let background = {
        let context = Arc::clone(&context);
        std::thread::spawn(move || context.rebuild())
    };
    embedder.wait_until_blocked();

    assert!(context.store().is_rebuilding());
    assert!(matches!(context.rebuild(), Err(SearchError::RebuildInProgress)));

    let during = context
        .search(&BugQuery::new().with_summary("memory leak"), None, Some(1))
        .unwrap();
    assert_eq!(during.version, IndexVersion(1));
    assert_eq!(during.hits[0].bug_id, BugId::from("B"));

    embedder.open();
    let report = background.join().unwrap().unwrap();
    assert_eq!(report.version, IndexVersion(2));
    assert!(!context.store().is_rebuilding());
    assert_eq!(context.store().version(), Some(IndexVersion(2)));
}

#[test]
fn test_upserts_are_searchable_after_the_next_rebuild() {
    let test = TestContext::new(memory_source(abc_reports()));
    test.context.rebuild().unwrap();

    let staged = test.context.upsert_batch([
        BugReport::new("E").with_summary("race condition in file watcher startup"),
        BugReport::new("").with_summary("ignored without an id"),
    ]);
    assert_eq!(staged, 1);

    let query = BugQuery::new().with_summary("file watcher race");
    let before = test.context.search(&query, None, Some(4)).unwrap();
    assert!(before.hits.iter().all(|h| h.bug_id != BugId::from("E")));

    test.context.rebuild().unwrap();
    let after = test.context.search(&query, None, Some(4)).unwrap();
    assert_eq!(after.hits[0].bug_id, BugId::from("E"));
    assert_eq!(
        after.hits[0].report.summary,
        "race condition in file watcher startup"
    );
    assert_eq!(test.context.status().staged_reports, 1);
}

#[test]
fn test_restarted_context_loads_the_persisted_version() {
    let source = memory_source(abc_reports());
    let test = TestContext::new(source.clone());
    test.context.rebuild().unwrap();
    test.context.rebuild().unwrap();

    let restarted = SearchContext::new(&test.settings, hashing_embedder(), source).unwrap();
    let outcome = restarted.load().unwrap();
    assert!(matches!(outcome, LoadOutcome::Loaded(IndexVersion(2))));

    let response = restarted
        .search(&BugQuery::new().with_summary("JSON parser null pointer"), None, Some(1))
        .unwrap();
    assert_eq!(response.hits[0].bug_id, BugId::from("A"));
}

#[test]
fn test_hits_for_deleted_reports_are_dropped() {
    let source = Arc::new(InMemoryBugSource::from_reports(abc_reports()));
    let test = TestContext::new(source.clone());
    test.context.rebuild().unwrap();

    source.remove(&BugId::from("A"));
    let response = test
        .context
        .search(&BugQuery::new().with_summary("null pointer parser"), None, Some(3))
        .unwrap();
    assert!(response.hits.iter().all(|h| h.bug_id != BugId::from("A")));
    assert_eq!(response.hits.len(), 2);
}

#[test]
fn test_rebuild_retries_transient_source_failures() {
    let source = Arc::new(FlakySource::new(abc_reports()));
    let test = TestContext::new(source.clone());
    assert_eq!(test.settings.store.max_retries, 3);

    source.fail_next(3);
    let report = test.context.rebuild().unwrap();
    assert_eq!(report.version, IndexVersion(1));
    assert_eq!(report.report_count, 3);
    assert_eq!(source.list_calls(), 4);
}

#[test]
fn test_rebuild_surfaces_source_failure_after_retry_budget() {
    let source = Arc::new(FlakySource::new(abc_reports()));
    let test = TestContext::new(source.clone());
    test.context.rebuild().unwrap();

    source.fail_next(4);
    let err = test.context.rebuild().unwrap_err();
    assert!(matches!(err, SearchError::Source(_)));
    assert_eq!(source.list_calls(), 4);

    assert_eq!(test.context.store().version(), Some(IndexVersion(1)));
    assert!(!test.context.store().is_rebuilding());
    let response = test
        .context
        .search(&BugQuery::new().with_summary("memory leak"), None, Some(1))
        .unwrap();
    assert_eq!(response.version, IndexVersion(1));
    assert_eq!(response.hits[0].bug_id, BugId::from("B"));
}
