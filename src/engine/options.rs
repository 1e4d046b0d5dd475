use std::collections::HashSet;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::ComparisonError;

pub const DEFAULT_FUZZY_THRESHOLD: i64 = 80;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ColumnMapping {
    pub source_column: String,
    pub target_column: String,
}

impl ColumnMapping {
    pub fn new(source: impl Into<String>, target: impl Into<String>) -> Self {
        Self {
            source_column: source.into(),
            target_column: target.into(),
        }
    }

    /// Parses `SRC=TGT`, or `COL` for a column with the same name on both sides.
    pub fn parse(input: &str) -> Self {
        match input.split_once('=') {
            Some((source, target)) => Self::new(source.trim(), target.trim()),
            None => Self::new(input.trim(), input.trim()),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MatchingAlgorithm {
    #[default]
    Exact,
    Fuzzy,
}

impl MatchingAlgorithm {
    pub fn parse(input: &str) -> Option<Self> {
        match input.trim().to_ascii_lowercase().as_str() {
            "exact" => Some(Self::Exact),
            "fuzzy" => Some(Self::Fuzzy),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExportFormat {
    #[default]
    Json,
    Excel,
    Csv,
}

impl ExportFormat {
    pub fn parse(input: &str) -> Option<Self> {
        match input.trim().to_ascii_lowercase().as_str() {
            "json" => Some(Self::Json),
            "excel" | "xls" | "xlsx" => Some(Self::Excel),
            "csv" => Some(Self::Csv),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Json => "json",
            Self::Excel => "excel",
            Self::Csv => "csv",
        }
    }

    pub fn content_type(self) -> &'static str {
        match self {
            Self::Json => "application/json",
            Self::Excel => "application/vnd.ms-excel",
            Self::Csv => "text/csv; charset=utf-8",
        }
    }

    pub fn extension(self) -> &'static str {
        match self {
            Self::Json => "json",
            Self::Excel => "xls",
            Self::Csv => "csv",
        }
    }
}

impl fmt::Display for ExportFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One comparison request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ComparisonOptions {
    pub source_table: String,
    pub target_table: String,
    pub column_mappings: Vec<ColumnMapping>,
    #[serde(default)]
    pub skip_columns: Vec<String>,
    #[serde(default)]
    pub matching_algorithm: MatchingAlgorithm,
    #[serde(default = "default_threshold")]
    pub fuzzy_threshold: i64,
    #[serde(default)]
    pub export_format: ExportFormat,
    /// Source columns forming the row identity, in key order.
    #[serde(default)]
    pub key_columns: Vec<String>,
    /// Leave matched rows out of the result set.
    #[serde(default)]
    pub only_differences: bool,
}

fn default_threshold() -> i64 {
    DEFAULT_FUZZY_THRESHOLD
}

impl ComparisonOptions {
    pub fn new(
        source_table: impl Into<String>,
        target_table: impl Into<String>,
        column_mappings: Vec<ColumnMapping>,
    ) -> Self {
        Self {
            source_table: source_table.into(),
            target_table: target_table.into(),
            column_mappings,
            skip_columns: Vec::new(),
            matching_algorithm: MatchingAlgorithm::Exact,
            fuzzy_threshold: DEFAULT_FUZZY_THRESHOLD,
            export_format: ExportFormat::Json,
            key_columns: Vec::new(),
            only_differences: false,
        }
    }

    /// Checks everything that can be checked without a database.
    pub fn validate(&self) -> Result<(), ComparisonError> {
        if self.source_table.trim().is_empty() || self.target_table.trim().is_empty() {
            return Err(ComparisonError::invalid_mapping(
                "source and target tables are required",
            ));
        }
        if !(0..=100).contains(&self.fuzzy_threshold) {
            return Err(ComparisonError::invalid_mapping(format!(
                "fuzzyThreshold must be between 0 and 100, got {}",
                self.fuzzy_threshold
            )));
        }
        if self.column_mappings.is_empty() {
            return Err(ComparisonError::invalid_mapping(
                "at least one column mapping is required",
            ));
        }

        let mut sources = HashSet::new();
        let mut targets = HashSet::new();
        for mapping in &self.column_mappings {
            if mapping.source_column.is_empty() || mapping.target_column.is_empty() {
                return Err(ComparisonError::invalid_mapping("column names must not be empty"));
            }
            if !sources.insert(mapping.source_column.as_str()) {
                return Err(ComparisonError::invalid_mapping(format!(
                    "source column '{}' is mapped more than once",
                    mapping.source_column
                )));
            }
            if !targets.insert(mapping.target_column.as_str()) {
                return Err(ComparisonError::invalid_mapping(format!(
                    "target column '{}' is mapped from more than one source column",
                    mapping.target_column
                )));
            }
        }

        for column in &self.skip_columns {
            if !sources.contains(column.as_str()) {
                return Err(ComparisonError::invalid_mapping(format!(
                    "skip column '{}' is not a mapped source column",
                    column
                )));
            }
        }

        let mut keys = HashSet::new();
        for column in &self.key_columns {
            if !sources.contains(column.as_str()) {
                return Err(ComparisonError::invalid_mapping(format!(
                    "key column '{}' is not a mapped source column",
                    column
                )));
            }
            if !keys.insert(column.as_str()) {
                return Err(ComparisonError::invalid_mapping(format!(
                    "key column '{}' is listed more than once",
                    column
                )));
            }
        }
        Ok(())
    }

    pub fn is_skipped(&self, source_column: &str) -> bool {
        self.skip_columns.iter().any(|c| c == source_column)
    }

    /// Positions of the key columns within `column_mappings`, in key order.
    pub fn key_positions(&self) -> Vec<usize> {
        self.key_columns
            .iter()
            .filter_map(|key| {
                self.column_mappings
                    .iter()
                    .position(|m| &m.source_column == key)
            })
            .collect()
    }
}
