//! Collects classified rows and presents them for display and export.

use anyhow::Result;
use serde::{Deserialize, Serialize};

use crate::engine::options::{ComparisonOptions, ExportFormat};
use crate::engine::result::{ComparisonResult, RowStatus};
use crate::output::paging::{Paging, build_paging};
use crate::output::{csv, json, spreadsheet};

pub const DEFAULT_PAGE_LIMIT: u64 = 50;
pub const MAX_PAGE_LIMIT: u64 = 500;

/// Accumulates results in emission order.
#[derive(Debug)]
pub struct DiffAggregator {
    columns: Vec<String>,
    only_differences: bool,
    results: Vec<ComparisonResult>,
}

impl DiffAggregator {
    pub fn new(options: &ComparisonOptions) -> Self {
        Self {
            columns: options
                .column_mappings
                .iter()
                .map(|m| m.source_column.clone())
                .collect(),
            only_differences: options.only_differences,
            results: Vec::new(),
        }
    }

    pub fn add(&mut self, result: ComparisonResult) {
        if self.only_differences && result.status == RowStatus::Matched {
            return;
        }
        self.results.push(result);
    }

    pub fn len(&self) -> usize {
        self.results.len()
    }

    pub fn is_empty(&self) -> bool {
        self.results.is_empty()
    }

    pub fn finalize(self) -> DiffReport {
        DiffReport {
            columns: self.columns,
            results: self.results,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Summary {
    pub total: u64,
    pub matched: u64,
    pub mismatched: u64,
    pub missing_source: u64,
    pub missing_target: u64,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResultQuery {
    pub status: Option<RowStatus>,
    pub search: Option<String>,
    pub offset: Option<u64>,
    pub limit: Option<u64>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ResultPage {
    pub results: Vec<ComparisonResult>,
    pub total: u64,
    pub count: u64,
    pub offset: u64,
    pub limit: u64,
    pub has_more: bool,
    pub next_offset: Option<u64>,
}

impl ResultPage {
    fn new(results: Vec<ComparisonResult>, paging: Paging) -> Self {
        Self {
            results,
            total: paging.total,
            count: paging.count,
            offset: paging.offset,
            limit: paging.limit,
            has_more: paging.has_more,
            next_offset: paging.next_offset,
        }
    }
}

/// Finalized result set of one run.
#[derive(Debug, Clone, PartialEq)]
pub struct DiffReport {
    columns: Vec<String>,
    results: Vec<ComparisonResult>,
}

impl DiffReport {
    pub fn new(columns: Vec<String>, results: Vec<ComparisonResult>) -> Self {
        Self { columns, results }
    }

    /// Mapped source columns, in mapping order.
    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    pub fn results(&self) -> &[ComparisonResult] {
        &self.results
    }

    pub fn into_results(self) -> Vec<ComparisonResult> {
        self.results
    }

    pub fn summary(&self) -> Summary {
        let mut summary = Summary {
            total: self.results.len() as u64,
            ..Summary::default()
        };
        for result in &self.results {
            match result.status {
                RowStatus::Matched => summary.matched += 1,
                RowStatus::Mismatched => summary.mismatched += 1,
                RowStatus::MissingSource => summary.missing_source += 1,
                RowStatus::MissingTarget => summary.missing_target += 1,
            }
        }
        summary
    }

    /// Filtered, paged view. Search is case-insensitive over the row key,
    /// difference column names and values.
    pub fn page(&self, query: &ResultQuery) -> ResultPage {
        let needle = query
            .search
            .as_deref()
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(str::to_lowercase);
        let filtered = self
            .results
            .iter()
            .filter(|r| query.status.is_none_or(|status| r.status == status))
            .filter(|r| needle.as_deref().is_none_or(|needle| matches_search(r, needle)))
            .collect::<Vec<_>>();

        let offset = query.offset.unwrap_or(0);
        let limit = query
            .limit
            .unwrap_or(DEFAULT_PAGE_LIMIT)
            .clamp(1, MAX_PAGE_LIMIT);
        let items = filtered
            .iter()
            .skip(offset as usize)
            .take(limit as usize)
            .map(|r| (*r).clone())
            .collect::<Vec<_>>();
        let paging = build_paging(filtered.len() as u64, items.len() as u64, offset, limit);
        ResultPage::new(items, paging)
    }

    /// Serializes the full result set. JSON and CSV output is byte-stable for
    /// the same results.
    pub fn export(&self, format: ExportFormat) -> Result<Vec<u8>> {
        match format {
            ExportFormat::Json => Ok(json::emit_json(&self.results, true)?.into_bytes()),
            ExportFormat::Csv => csv::results_to_csv(&self.columns, &self.results),
            ExportFormat::Excel => {
                Ok(spreadsheet::results_to_workbook(&self.columns, &self.results))
            }
        }
    }
}

fn matches_search(result: &ComparisonResult, needle: &str) -> bool {
    if result.row_key_display().to_lowercase().contains(needle) {
        return true;
    }
    result.differences.iter().any(|diff| {
        diff.column.to_lowercase().contains(needle)
            || diff.source_value.display().to_lowercase().contains(needle)
            || diff.target_value.display().to_lowercase().contains(needle)
    })
}
