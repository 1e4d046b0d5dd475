pub mod csv;
pub mod json;
pub mod paging;
pub mod spreadsheet;
pub mod table;

use std::fs;
use std::io::IsTerminal;
use std::path::Path;

use anyhow::{Context, Result};

use crate::cli::OutputFlags;
use crate::config::{OutputFormat, SettingsResolved};
use crate::engine::aggregate::DiffReport;
use crate::engine::options::ExportFormat;

pub use table::TableOptions;

/// Explicit flags win; otherwise the configured default on a terminal and
/// markdown when piped.
pub fn select_format(flags: &OutputFlags, settings: &SettingsResolved) -> OutputFormat {
    resolve_format(
        flags,
        settings.output.default_format,
        std::io::stdout().is_terminal(),
    )
}

fn resolve_format(flags: &OutputFlags, default: OutputFormat, is_tty: bool) -> OutputFormat {
    match (flags.json, flags.markdown, flags.pretty) {
        (true, _, _) => OutputFormat::Json,
        (_, true, _) => OutputFormat::Markdown,
        (_, _, true) => OutputFormat::Pretty,
        _ if is_tty => default,
        _ => OutputFormat::Markdown,
    }
}

/// Writes the full export of `report` to `path`; returns the byte count.
pub fn write_export(report: &DiffReport, format: ExportFormat, path: &Path) -> Result<usize> {
    let bytes = report.export(format)?;
    fs::write(path, &bytes).with_context(|| format!("Failed to write {}", path.display()))?;
    Ok(bytes.len())
}

/// Download name for an exported run.
pub fn export_file_name(run: &str, format: ExportFormat) -> String {
    format!("comparison-{}.{}", run, format.extension())
}
