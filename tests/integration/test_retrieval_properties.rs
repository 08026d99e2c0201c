//! Ranking properties checked end to end through `SearchContext`.

use bugfuse::{AbsentFieldPolicy, BugId, BugQuery, FieldKind, FieldWeights, SearchError};

use crate::common::{TestContext, abc_reports, memory_source, sample_reports};

const EPSILON: f32 = 1e-5;

#[test]
fn test_parser_query_ranks_a_first() {
    let test = TestContext::new(memory_source(abc_reports()));
    test.context.rebuild().unwrap();

    let response = test
        .context
        .search(&BugQuery::new().with_summary("parser throws null pointer"), None, Some(3))
        .unwrap();

    assert_eq!(response.hits[0].bug_id, BugId::from("A"));
    for other in &response.hits[1..] {
        assert!(
            response.hits[0].score > other.score,
            "A ({}) must beat {} ({})",
            response.hits[0].score,
            other.bug_id,
            other.score
        );
    }
}

#[test]
fn test_every_report_retrieves_itself_by_summary() {
    let reports = sample_reports();
    let test = TestContext::new(memory_source(reports.clone()));
    test.context.rebuild().unwrap();

    for report in &reports {
        let response = test
            .context
            .search(&BugQuery::new().with_summary(&report.summary), None, Some(3))
            .unwrap();
        let ids: Vec<&BugId> = response.hits.iter().map(|h| &h.bug_id).collect();
        assert!(
            ids.contains(&&report.bug_id),
            "{} missing from its own results: {ids:?}",
            report.bug_id
        );
    }
}

#[test]
fn test_adding_a_matching_field_never_lowers_the_score() {
    let reports = sample_reports();
    let test = TestContext::new(memory_source(reports.clone()));
    test.context.rebuild().unwrap();
    let n = reports.len();

    for report in reports.iter().filter(|r| !r.error_logs.is_empty()) {
        let summary_only = BugQuery::new().with_summary("crash on startup");
        let with_log = summary_only.clone().with_log(&report.error_logs);

        let score_of = |query: &BugQuery| {
            test.context
                .search(query, None, Some(n))
                .unwrap()
                .hits
                .into_iter()
                .find(|h| h.bug_id == report.bug_id)
                .map_or(0.0, |h| h.score)
        };

        let before = score_of(&summary_only);
        let after = score_of(&with_log);
        assert!(
            after + EPSILON >= before,
            "{}: {after} < {before} after adding its own log",
            report.bug_id
        );
    }
}

#[test]
fn test_identical_queries_rank_identically() {
    let reports = sample_reports();
    let first = TestContext::new(memory_source(reports.clone()));
    let second = TestContext::new(memory_source(reports));
    first.context.rebuild().unwrap();
    second.context.rebuild().unwrap();

    let query = BugQuery::new()
        .with_summary("connection problems")
        .with_log("timed out waiting")
        .with_environment("kubernetes");

    let a = first.context.search(&query, None, Some(5)).unwrap();
    let b = second.context.search(&query, None, Some(5)).unwrap();
    let a: Vec<(BugId, u32)> = a.hits.iter().map(|h| (h.bug_id.clone(), h.score.to_bits())).collect();
    let b: Vec<(BugId, u32)> = b.hits.iter().map(|h| (h.bug_id.clone(), h.score.to_bits())).collect();
    assert_eq!(a, b);
}

#[test]
fn test_empty_query_is_rejected() {
    let test = TestContext::new(memory_source(abc_reports()));
    test.context.rebuild().unwrap();

    let blank = BugQuery::new().with_summary("   ").with_code("");
    assert!(matches!(
        test.context.search(&blank, None, None),
        Err(SearchError::EmptyQuery)
    ));
}

#[test]
fn test_zero_weights_are_invalid() {
    let test = TestContext::new(memory_source(abc_reports()));
    test.context.rebuild().unwrap();

    let mut weights = FieldWeights::default();
    weights.summary = 0.0;
    let result = test
        .context
        .search(&BugQuery::new().with_summary("parser"), Some(&weights), None);
    assert!(matches!(result, Err(SearchError::InvalidWeights(_))));
}

#[test]
fn test_reported_weights_cover_supplied_fields_only() {
    let test = TestContext::new(memory_source(sample_reports()));
    test.context.rebuild().unwrap();

    let response = test
        .context
        .search(
            &BugQuery::new().with_summary("login fails").with_environment("chrome"),
            None,
            None,
        )
        .unwrap();

    let fields: Vec<FieldKind> = response.weights.keys().copied().collect();
    assert_eq!(fields, vec![FieldKind::Summary, FieldKind::Environment]);
    if test.settings.search.absent_fields == AbsentFieldPolicy::Renormalize {
        let total: f32 = response.weights.values().sum();
        assert!((total - 1.0).abs() < EPSILON);
    }
}
