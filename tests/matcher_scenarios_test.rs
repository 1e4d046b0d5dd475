use std::sync::Arc;

use dbcompare::db::{RowIdentity, RowRecord, RowStream, Value};
use dbcompare::engine::{
    ColumnMapping, ComparisonOptions, DiffAggregator, DiffReport, ExportFormat, MatchingAlgorithm,
    Matcher, Progress, ResultQuery, RowStatus,
};
use dbcompare::error::{ComparisonError, RowStreamError};
use tokio_util::sync::CancellationToken;

fn options(keyed: bool) -> ComparisonOptions {
    let mut opts = ComparisonOptions::new(
        "crm.users",
        "erp.customers",
        vec![
            ColumnMapping::new("id", "customer_id"),
            ColumnMapping::new("name", "full_name"),
            ColumnMapping::new("email", "email"),
        ],
    );
    if keyed {
        opts.key_columns = vec!["id".to_string()];
    }
    opts
}

fn row(identity: RowIdentity, id: i64, name: &str, email: Option<&str>) -> RowRecord {
    RowRecord {
        identity,
        values: vec![
            Value::Int(id),
            Value::Text(name.to_string()),
            email.map_or(Value::Null, |e| Value::Text(e.to_string())),
        ],
    }
}

fn keyed(id: i64, name: &str, email: Option<&str>) -> RowRecord {
    row(RowIdentity::Key(vec![Value::Int(id)]), id, name, email)
}

fn stream(rows: Vec<RowRecord>) -> RowStream {
    RowStream::from_rows("users", rows, CancellationToken::new())
}

async fn run(
    opts: &ComparisonOptions,
    source: Vec<RowRecord>,
    target: Vec<RowRecord>,
) -> Result<DiffReport, ComparisonError> {
    let mut matcher = Matcher::new(opts, Arc::new(Progress::default()));
    let mut out = DiffAggregator::new(opts);
    if opts.key_columns.is_empty() {
        matcher
            .run_unkeyed(&mut stream(source), &mut stream(target), &mut out)
            .await?;
    } else {
        matcher
            .run_keyed(&mut stream(source), &mut stream(target), &mut out)
            .await?;
    }
    Ok(out.finalize())
}

#[tokio::test]
async fn keyed_merge_classifies_every_row_once() {
    let report = run(
        &options(true),
        vec![
            keyed(1, "Ann", Some("ann@example.com")),
            keyed(2, "Bob", None),
            keyed(4, "Dee", Some("dee@example.com")),
        ],
        vec![
            keyed(1, "Ann", Some("ann@example.com")),
            keyed(2, "Bobby", None),
            keyed(3, "Cid", Some("cid@example.com")),
        ],
    )
    .await
    .expect("run");

    let statuses = report.results().iter().map(|r| r.status).collect::<Vec<_>>();
    assert_eq!(
        statuses,
        vec![
            RowStatus::Matched,
            RowStatus::Mismatched,
            RowStatus::MissingSource,
            RowStatus::MissingTarget,
        ]
    );
    let summary = report.summary();
    assert_eq!(summary.total, 4);
    assert_eq!(
        summary.matched + summary.mismatched + summary.missing_source + summary.missing_target,
        summary.total
    );

    let mismatch = &report.results()[1];
    assert_eq!(mismatch.differences.len(), 1);
    assert_eq!(mismatch.differences[0].column, "name");
}

#[tokio::test]
async fn null_equals_null_but_not_empty_text() {
    let report = run(
        &options(true),
        vec![keyed(1, "Ann", None), keyed(2, "Bob", None)],
        vec![keyed(1, "Ann", None), keyed(2, "Bob", Some(""))],
    )
    .await
    .expect("run");

    assert_eq!(report.results()[0].status, RowStatus::Matched);
    assert_eq!(report.results()[1].status, RowStatus::Mismatched);
}

#[tokio::test]
async fn fuzzy_threshold_accepts_near_matches() {
    let mut opts = options(true);
    opts.matching_algorithm = MatchingAlgorithm::Fuzzy;
    opts.fuzzy_threshold = 70;
    let report = run(
        &opts,
        vec![keyed(1, "Jonathan Smith", None)],
        vec![keyed(1, "Jonathon Smith", None)],
    )
    .await
    .expect("run");
    assert_eq!(report.results()[0].status, RowStatus::Matched);
}

#[tokio::test]
async fn positional_join_pairs_by_ordinal() {
    let report = run(
        &options(false),
        vec![
            row(RowIdentity::Ordinal(1), 1, "Ann", None),
            row(RowIdentity::Ordinal(2), 2, "Bob", None),
        ],
        vec![row(RowIdentity::Ordinal(1), 1, "Ann", None)],
    )
    .await
    .expect("run");

    assert_eq!(report.results().len(), 2);
    assert_eq!(report.results()[1].status, RowStatus::MissingTarget);
    assert_eq!(report.results()[1].row_key_display(), "2");
}

#[tokio::test]
async fn unsorted_keys_abort_the_run() {
    let err = run(
        &options(true),
        vec![keyed(2, "Bob", None), keyed(1, "Ann", None)],
        vec![keyed(1, "Ann", None)],
    )
    .await
    .expect_err("order");
    assert!(matches!(
        err,
        ComparisonError::Stream(RowStreamError::KeyOrderViolated { .. })
    ));
}

#[tokio::test]
async fn report_pages_filters_and_exports() {
    let source = (1..=6).map(|id| keyed(id, "same", None)).collect::<Vec<_>>();
    let mut target = (1..=6).map(|id| keyed(id, "same", None)).collect::<Vec<_>>();
    target[4] = keyed(5, "changed", None);
    let report = run(&options(true), source, target).await.expect("run");

    let page = report.page(&ResultQuery {
        status: Some(RowStatus::Matched),
        limit: Some(2),
        offset: Some(2),
        ..ResultQuery::default()
    });
    assert_eq!(page.total, 5);
    assert_eq!(page.count, 2);
    assert_eq!(page.next_offset, Some(4));

    let search = report.page(&ResultQuery {
        search: Some("CHANGED".to_string()),
        ..ResultQuery::default()
    });
    assert_eq!(search.total, 1);
    assert_eq!(search.results[0].id, 5);

    let first = report.export(ExportFormat::Json).expect("json");
    let second = report.export(ExportFormat::Json).expect("json");
    assert_eq!(first, second);
    let csv = String::from_utf8(report.export(ExportFormat::Csv).expect("csv")).expect("utf8");
    assert_eq!(csv.lines().count(), 7);
}
