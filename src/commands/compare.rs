use anyhow::Result;
use serde_json::json;
use tracing::{info, warn};

use crate::cli::{CliArgs, CompareArgs};
use crate::commands::common;
use crate::config::OutputFormat;
use crate::engine::aggregate::{DiffReport, ResultQuery};
use crate::engine::options::{ColumnMapping, ComparisonOptions, ExportFormat, MatchingAlgorithm};
use crate::engine::orchestrator::{self, RunContext};
use crate::engine::result::RowStatus;
use crate::error::{AppError, ErrorKind};
use crate::output::{self, TableOptions, json as json_out, table};

pub fn run(args: &CliArgs, cmd: &CompareArgs) -> Result<()> {
    let resolved = common::load_config_with(args, None, cmd.batch_size)?;
    let format = common::output_format(args, &resolved);
    let options = build_options(cmd)?;
    let query = build_query(cmd)?;
    let batch_size = resolved.settings.engine.batch_size;

    let report = common::runtime()?.block_on(async {
        let manager = common::manager(&resolved);
        let source = common::connect(&manager, &resolved, &cmd.source).await?;
        let target = match common::connect(&manager, &resolved, &cmd.target).await {
            Ok(handle) => handle,
            Err(err) => {
                manager.release(source);
                return Err(err);
            }
        };

        let mut ctx = RunContext::new(source, target);
        ctx.batch_size = batch_size;
        let cancel = ctx.cancel.clone();
        let interrupt = tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                warn!("interrupted, cancelling comparison");
                cancel.cancel();
            }
        });

        let outcome = orchestrator::compare(&options, &ctx).await;
        interrupt.abort();
        let RunContext { source, target, .. } = ctx;
        manager.release(source);
        manager.release(target);
        Ok::<_, anyhow::Error>(outcome?)
    })?;

    if let Some(path) = &cmd.output_path {
        let bytes = output::write_export(&report, options.export_format, path)?;
        info!(path = %path.display(), format = %options.export_format, bytes, "export written");
    }

    if args.quiet {
        return Ok(());
    }
    print_report(&report, &query, format, common::json_pretty(&resolved))
}

fn build_options(cmd: &CompareArgs) -> Result<ComparisonOptions> {
    let mappings = cmd
        .mappings
        .iter()
        .map(|raw| ColumnMapping::parse(raw))
        .collect::<Vec<_>>();
    let mut options = ComparisonOptions::new(&cmd.source_table, &cmd.target_table, mappings);
    options.key_columns = cmd.keys.clone();
    options.skip_columns = cmd.skip.clone();
    options.only_differences = cmd.only_differences;
    if let Some(raw) = &cmd.algorithm {
        options.matching_algorithm = MatchingAlgorithm::parse(raw)
            .ok_or_else(|| config_error(format!("Unknown matching algorithm '{}'", raw)))?;
    }
    if let Some(threshold) = cmd.threshold {
        options.fuzzy_threshold = threshold;
    }
    if let Some(raw) = &cmd.format {
        options.export_format = ExportFormat::parse(raw)
            .ok_or_else(|| config_error(format!("Unknown export format '{}'", raw)))?;
    }
    Ok(options)
}

fn build_query(cmd: &CompareArgs) -> Result<ResultQuery> {
    let status = match &cmd.status {
        Some(raw) => Some(
            RowStatus::parse(raw).ok_or_else(|| config_error(format!("Unknown status '{}'", raw)))?,
        ),
        None => None,
    };
    Ok(ResultQuery {
        status,
        search: cmd.search.clone(),
        offset: cmd.offset,
        limit: cmd.limit,
    })
}

fn config_error(message: String) -> anyhow::Error {
    AppError::new(ErrorKind::Config, message).into()
}

fn print_report(
    report: &DiffReport,
    query: &ResultQuery,
    format: OutputFormat,
    pretty: bool,
) -> Result<()> {
    let summary = report.summary();
    let page = report.page(query);

    if matches!(format, OutputFormat::Json) {
        let payload = json!({
            "summary": summary,
            "columns": report.columns(),
            "page": page,
        });
        println!("{}", json_out::emit_json_value(&payload, pretty)?);
        return Ok(());
    }

    let options = TableOptions::default();
    let rows = [
        ("total", summary.total),
        ("matched", summary.matched),
        ("mismatched", summary.mismatched),
        ("missing_source", summary.missing_source),
        ("missing_target", summary.missing_target),
    ]
    .into_iter()
    .map(|(key, value)| (key.to_string(), value.to_string()))
    .collect::<Vec<_>>();
    println!("{}", table::render_key_value_table("Summary", &rows, format, &options));
    println!();
    println!(
        "{}",
        table::render_results_table(report.columns(), &page, format, &options)
    );
    Ok(())
}

#[cfg(test)]
mod tests {
    use std::path::PathBuf;

    use super::*;
    use crate::cli::Endpoint;

    fn args() -> CompareArgs {
        CompareArgs {
            source: Endpoint::Profile("crm".to_string()),
            target: Endpoint::Profile("erp".to_string()),
            source_table: "users".to_string(),
            target_table: "customers".to_string(),
            mappings: vec!["id=customer_id".to_string(), "name".to_string()],
            keys: vec!["id".to_string()],
            skip: Vec::new(),
            algorithm: Some("fuzzy".to_string()),
            threshold: Some(65),
            format: Some("csv".to_string()),
            output_path: Some(PathBuf::from("out.csv")),
            only_differences: true,
            status: Some("mismatched".to_string()),
            search: None,
            limit: Some(10),
            offset: None,
            batch_size: None,
        }
    }

    #[test]
    fn builds_options_from_flags() {
        let options = build_options(&args()).expect("options");
        assert_eq!(
            options.column_mappings,
            vec![
                ColumnMapping::new("id", "customer_id"),
                ColumnMapping::new("name", "name")
            ]
        );
        assert_eq!(options.matching_algorithm, MatchingAlgorithm::Fuzzy);
        assert_eq!(options.fuzzy_threshold, 65);
        assert_eq!(options.export_format, ExportFormat::Csv);
        assert!(options.only_differences);
        options.validate().expect("valid");
    }

    #[test]
    fn builds_result_query() {
        let query = build_query(&args()).expect("query");
        assert_eq!(query.status, Some(RowStatus::Mismatched));
        assert_eq!(query.limit, Some(10));
    }

    #[test]
    fn unknown_status_is_config_error() {
        let mut cmd = args();
        cmd.status = Some("gone".to_string());
        let err = build_query(&cmd).expect_err("status");
        assert_eq!(crate::error::classify_error(&err), ErrorKind::Config);
    }
}
