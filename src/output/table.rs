use comfy_table::{ContentArrangement, Table, presets};

use crate::config::OutputFormat;
use crate::engine::aggregate::ResultPage;
use crate::engine::result::ComparisonResult;

const ELLIPSIS: &str = "…";
const DEFAULT_MAX_CELL_WIDTH: usize = 60;
const DEFAULT_MAX_OUTPUT_CHARS: usize = 25_000;

#[derive(Debug, Clone)]
pub struct TableOptions {
    pub max_cell_width: usize,
    pub max_output_chars: usize,
}

impl Default for TableOptions {
    fn default() -> Self {
        Self {
            max_cell_width: DEFAULT_MAX_CELL_WIDTH,
            max_output_chars: DEFAULT_MAX_OUTPUT_CHARS,
        }
    }
}

fn new_table(format: OutputFormat) -> Table {
    let mut table = Table::new();
    match format {
        OutputFormat::Markdown => {
            table.load_preset(presets::ASCII_MARKDOWN);
        }
        _ => {
            table.load_preset(presets::UTF8_FULL);
        }
    }
    table.set_content_arrangement(ContentArrangement::Dynamic);
    table
}

/// Result grid: id, status, row key, then `source => target` for each
/// mapped column that disagrees.
pub fn render_results_table(
    columns: &[String],
    page: &ResultPage,
    format: OutputFormat,
    options: &TableOptions,
) -> String {
    let mut table = new_table(format);
    let mut headers = vec!["#".to_string(), "status".to_string(), "key".to_string()];
    headers.extend(columns.iter().cloned());
    table.set_header(headers);

    for result in &page.results {
        table.add_row(result_cells(columns, result, options.max_cell_width));
    }

    let mut output = table.to_string();
    output.push('\n');
    output.push_str(&pagination_footer(page));
    truncate_output(output, options.max_output_chars)
}

fn result_cells(columns: &[String], result: &ComparisonResult, width: usize) -> Vec<String> {
    let mut cells = vec![
        result.id.to_string(),
        result.status.to_string(),
        truncate_string(&result.row_key_display(), width),
    ];
    for column in columns {
        let cell = match result.difference(column) {
            Some(diff) => format!(
                "{} => {}",
                diff.source_value.display(),
                diff.target_value.display()
            ),
            None => String::new(),
        };
        cells.push(truncate_string(&cell, width));
    }
    cells
}

/// Plain grid with the given headers.
pub fn render_list_table(
    headers: &[&str],
    rows: &[Vec<String>],
    format: OutputFormat,
    options: &TableOptions,
) -> String {
    let mut table = new_table(format);
    table.set_header(headers.to_vec());
    for row in rows {
        table.add_row(
            row.iter()
                .map(|cell| truncate_string(cell, options.max_cell_width))
                .collect::<Vec<_>>(),
        );
    }
    truncate_output(table.to_string(), options.max_output_chars)
}

pub fn render_key_value_table(
    title: &str,
    rows: &[(String, String)],
    format: OutputFormat,
    options: &TableOptions,
) -> String {
    let mut table = new_table(format);
    table.set_header(vec![title.to_string(), "Value".to_string()]);

    for (key, value) in rows {
        let key = truncate_string(key, options.max_cell_width);
        let value = truncate_string(value, options.max_cell_width);
        table.add_row(vec![key, value]);
    }

    truncate_output(table.to_string(), options.max_output_chars)
}

fn truncate_string(input: &str, max_len: usize) -> String {
    let len = input.chars().count();
    if len <= max_len {
        return input.to_string();
    }
    if max_len <= 1 {
        return ELLIPSIS.to_string();
    }
    let truncated: String = input.chars().take(max_len - 1).collect();
    format!("{}{}", truncated, ELLIPSIS)
}

fn pagination_footer(page: &ResultPage) -> String {
    if page.count == 0 {
        return format!("No results (total {})", page.total);
    }
    let start = page.offset + 1;
    let end = page.offset + page.count;
    match page.next_offset {
        Some(next) => format!(
            "Results {}-{} of {} (next: --offset {})",
            start, end, page.total, next
        ),
        None => format!("Results {}-{} of {}", start, end, page.total),
    }
}

fn truncate_output(output: String, max_len: usize) -> String {
    if output.len() <= max_len {
        return output;
    }
    let mut truncated = output.chars().take(max_len).collect::<String>();
    truncated.push_str("\n[output truncated]");
    truncated
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::aggregate::{DiffReport, ResultQuery};
    use crate::engine::result::{ColumnDifference, DiffValue, RowStatus};

    fn report() -> DiffReport {
        let results = (1..=3)
            .map(|id| ComparisonResult {
                id,
                status: if id == 2 {
                    RowStatus::Mismatched
                } else {
                    RowStatus::Matched
                },
                differences: if id == 2 {
                    vec![ColumnDifference {
                        column: "name".to_string(),
                        source_value: DiffValue::Text("Alicia".to_string()),
                        target_value: DiffValue::Null,
                    }]
                } else {
                    Vec::new()
                },
                row_key: vec![DiffValue::Text(id.to_string())],
            })
            .collect();
        DiffReport::new(vec!["id".to_string(), "name".to_string()], results)
    }

    #[test]
    fn truncates_cells() {
        assert_eq!(truncate_string("abcdefghijklmnopqrstuvwxyz", 8), "abcdefg…");
    }

    #[test]
    fn renders_differences_and_footer() {
        let report = report();
        let page = report.page(&ResultQuery {
            limit: Some(2),
            ..ResultQuery::default()
        });
        let out = render_results_table(
            report.columns(),
            &page,
            OutputFormat::Pretty,
            &TableOptions::default(),
        );
        assert!(out.contains("Alicia => NULL"));
        assert!(out.contains("mismatched"));
        assert!(out.contains("Results 1-2 of 3 (next: --offset 2)"));
    }

    #[test]
    fn markdown_lists_use_pipes() {
        let out = render_list_table(
            &["table"],
            &[vec!["users".to_string()]],
            OutputFormat::Markdown,
            &TableOptions::default(),
        );
        assert!(out.contains("| users |"));
    }

    #[test]
    fn truncates_output_when_too_long() {
        let rows = vec![("k".to_string(), "x".repeat(200))];
        let options = TableOptions {
            max_output_chars: 50,
            ..TableOptions::default()
        };
        let out = render_key_value_table("Config", &rows, OutputFormat::Pretty, &options);
        assert!(out.contains("[output truncated]"));
    }
}
