//! Entry point for one comparison run.

use std::sync::Arc;
use std::time::Instant;

use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::db::connection::TableRef;
use crate::db::driver::StreamRequest;
use crate::db::manager::ConnectionHandle;
use crate::db::schema;
use crate::db::stream::RowStream;
use crate::db::types::ColumnInfo;
use crate::engine::aggregate::{DiffAggregator, DiffReport};
use crate::engine::matcher::{Matcher, Progress};
use crate::engine::options::ComparisonOptions;
use crate::error::ComparisonError;

pub const DEFAULT_BATCH_SIZE: usize = 1000;

/// Handles and tuning for one run.
#[derive(Clone)]
pub struct RunContext {
    pub source: ConnectionHandle,
    pub target: ConnectionHandle,
    pub batch_size: usize,
    pub cancel: CancellationToken,
    pub progress: Arc<Progress>,
}

impl RunContext {
    pub fn new(source: ConnectionHandle, target: ConnectionHandle) -> Self {
        Self {
            source,
            target,
            batch_size: DEFAULT_BATCH_SIZE,
            cancel: CancellationToken::new(),
            progress: Arc::new(Progress::default()),
        }
    }
}

/// Runs a full comparison. Options and both schemas are checked before any
/// row is read; an aborted run yields only the error.
pub async fn compare(
    options: &ComparisonOptions,
    ctx: &RunContext,
) -> Result<DiffReport, ComparisonError> {
    options.validate()?;
    let started = Instant::now();
    info!(
        source = %ctx.source.id(),
        target = %ctx.target.id(),
        source_table = %options.source_table,
        target_table = %options.target_table,
        algorithm = ?options.matching_algorithm,
        keyed = !options.key_columns.is_empty(),
        "comparison started"
    );

    let (source_request, target_request) = tokio::select! {
        biased;
        _ = ctx.cancel.cancelled() => return Err(ComparisonError::Cancelled),
        requests = plan(options, ctx) => requests?,
    };

    let mut source = RowStream::open(&ctx.source, source_request, ctx.cancel.clone());
    let mut target = RowStream::open(&ctx.target, target_request, ctx.cancel.clone());
    let mut aggregator = DiffAggregator::new(options);
    let mut matcher = Matcher::new(options, ctx.progress.clone());

    if options.key_columns.is_empty() {
        matcher.run_unkeyed(&mut source, &mut target, &mut aggregator).await?;
    } else {
        matcher.run_keyed(&mut source, &mut target, &mut aggregator).await?;
    }

    let report = aggregator.finalize();
    let summary = report.summary();
    info!(
        results = summary.total,
        matched = summary.matched,
        mismatched = summary.mismatched,
        missing_source = summary.missing_source,
        missing_target = summary.missing_target,
        elapsed_ms = started.elapsed().as_millis() as u64,
        "comparison finished"
    );
    Ok(report)
}

async fn plan(
    options: &ComparisonOptions,
    ctx: &RunContext,
) -> Result<(StreamRequest, StreamRequest), ComparisonError> {
    let source_schema = schema::list_columns(&ctx.source, &options.source_table).await?;
    let target_schema = schema::list_columns(&ctx.target, &options.target_table).await?;

    let mut source_columns = Vec::with_capacity(options.column_mappings.len());
    let mut target_columns = Vec::with_capacity(options.column_mappings.len());
    for mapping in &options.column_mappings {
        source_columns.push(resolve_column(
            &source_schema,
            &mapping.source_column,
            &options.source_table,
        )?);
        target_columns.push(resolve_column(
            &target_schema,
            &mapping.target_column,
            &options.target_table,
        )?);
    }

    let keys = options.key_positions();
    let batch_size = ctx.batch_size.max(1);
    let source = StreamRequest {
        table: TableRef::parse(&options.source_table),
        columns: source_columns,
        key_columns: keys.clone(),
        batch_size,
    };
    let target = StreamRequest {
        table: TableRef::parse(&options.target_table),
        columns: target_columns,
        key_columns: keys,
        batch_size,
    };
    debug!(source_sql = %source.select_sql(ctx.source.driver().database_type()), "source projection");
    debug!(target_sql = %target.select_sql(ctx.target.driver().database_type()), "target projection");
    Ok((source, target))
}

/// Exact name first, then a case-insensitive match for catalogs that fold
/// identifiers.
fn resolve_column(
    schema: &[ColumnInfo],
    name: &str,
    table: &str,
) -> Result<ColumnInfo, ComparisonError> {
    schema
        .iter()
        .find(|col| col.name == name)
        .or_else(|| schema.iter().find(|col| col.name.eq_ignore_ascii_case(name)))
        .cloned()
        .ok_or_else(|| {
            ComparisonError::invalid_mapping(format!(
                "column '{}' does not exist in table '{}'",
                name, table
            ))
        })
}
