//! Joins two row streams and classifies every row identity.

use std::cmp::Ordering;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering as AtomicOrdering};

use serde::Serialize;
use tracing::debug;

use crate::db::stream::{RowIdentity, RowRecord, RowStream};
use crate::db::types::Value;
use crate::engine::aggregate::DiffAggregator;
use crate::engine::options::{ComparisonOptions, MatchingAlgorithm};
use crate::engine::result::{ColumnDifference, ComparisonResult, DiffValue, RowStatus};
use crate::engine::similarity::similarity;
use crate::error::{ComparisonError, RowStreamError};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum MatcherState {
    Idle,
    Streaming,
    Draining,
    Done,
}

/// Counters a running comparison publishes for status polling.
#[derive(Debug, Default)]
pub struct Progress {
    source_rows: AtomicU64,
    target_rows: AtomicU64,
    results: AtomicU64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProgressSnapshot {
    pub source_rows: u64,
    pub target_rows: u64,
    pub results: u64,
}

impl Progress {
    pub fn snapshot(&self) -> ProgressSnapshot {
        ProgressSnapshot {
            source_rows: self.source_rows.load(AtomicOrdering::Relaxed),
            target_rows: self.target_rows.load(AtomicOrdering::Relaxed),
            results: self.results.load(AtomicOrdering::Relaxed),
        }
    }
}

#[derive(Debug, Clone)]
struct ComparedColumn {
    name: String,
    compared: bool,
}

/// Per-value comparison policy for one run.
#[derive(Debug, Clone)]
pub struct ValueComparer {
    columns: Vec<ComparedColumn>,
    algorithm: MatchingAlgorithm,
    threshold: u8,
}

impl ValueComparer {
    pub fn from_options(options: &ComparisonOptions) -> Self {
        Self {
            columns: options
                .column_mappings
                .iter()
                .map(|m| ComparedColumn {
                    name: m.source_column.clone(),
                    compared: !options.is_skipped(&m.source_column),
                })
                .collect(),
            algorithm: options.matching_algorithm,
            threshold: options.fuzzy_threshold.clamp(0, 100) as u8,
        }
    }

    pub fn values_agree(&self, source: &Value, target: &Value) -> bool {
        match (source, target) {
            (Value::Null, Value::Null) => true,
            (Value::Null, _) | (_, Value::Null) => false,
            (Value::Unreadable(_), _) | (_, Value::Unreadable(_)) => false,
            _ => match self.algorithm {
                MatchingAlgorithm::Exact => source.same_as(target),
                MatchingAlgorithm::Fuzzy => {
                    if source.same_as(target) {
                        return true;
                    }
                    let left = source.render().unwrap_or_default();
                    let right = target.render().unwrap_or_default();
                    similarity(&left, &right) >= self.threshold
                }
            },
        }
    }

    /// Disagreeing compared columns, in mapping order.
    pub fn differences(&self, source: &[Value], target: &[Value]) -> Vec<ColumnDifference> {
        self.columns
            .iter()
            .enumerate()
            .filter(|(_, col)| col.compared)
            .filter_map(|(idx, col)| {
                let left = source.get(idx).unwrap_or(&Value::Null);
                let right = target.get(idx).unwrap_or(&Value::Null);
                if self.values_agree(left, right) {
                    None
                } else {
                    Some(ColumnDifference {
                        column: col.name.clone(),
                        source_value: left.into(),
                        target_value: right.into(),
                    })
                }
            })
            .collect()
    }

    /// Every compared column with the present side's value against null.
    pub fn one_sided(&self, values: &[Value], present_is_source: bool) -> Vec<ColumnDifference> {
        self.columns
            .iter()
            .enumerate()
            .filter(|(_, col)| col.compared)
            .map(|(idx, col)| {
                let present: DiffValue = values.get(idx).unwrap_or(&Value::Null).into();
                let (source_value, target_value) = if present_is_source {
                    (present, DiffValue::Null)
                } else {
                    (DiffValue::Null, present)
                };
                ColumnDifference {
                    column: col.name.clone(),
                    source_value,
                    target_value,
                }
            })
            .collect()
    }
}

/// Which stream a row came from.
#[derive(Debug, Clone, Copy)]
enum Side {
    Source,
    Target,
}

/// Remembers the last key seen on one side to enforce strictly ascending
/// key order, which the merge-join depends on.
struct KeyGuard {
    previous: Option<Vec<Value>>,
}

impl KeyGuard {
    fn new() -> Self {
        Self { previous: None }
    }

    fn check(&mut self, table: &str, record: &RowRecord) -> Result<(), RowStreamError> {
        let RowIdentity::Key(key) = &record.identity else {
            return Ok(());
        };
        if let Some(previous) = &self.previous {
            match compare_keys(key, previous) {
                Ordering::Greater => {}
                Ordering::Equal => {
                    return Err(RowStreamError::DuplicateKey {
                        table: table.to_string(),
                        key: record.identity.describe(),
                    });
                }
                Ordering::Less => {
                    return Err(RowStreamError::KeyOrderViolated {
                        table: table.to_string(),
                        key: record.identity.describe(),
                        previous: RowIdentity::Key(previous.clone()).describe(),
                    });
                }
            }
        }
        self.previous = Some(key.clone());
        Ok(())
    }
}

fn compare_keys(left: &[Value], right: &[Value]) -> Ordering {
    for (a, b) in left.iter().zip(right) {
        let ord = a.key_cmp(b);
        if ord != Ordering::Equal {
            return ord;
        }
    }
    left.len().cmp(&right.len())
}

fn identity_order(left: &RowIdentity, right: &RowIdentity) -> Ordering {
    match (left, right) {
        (RowIdentity::Key(a), RowIdentity::Key(b)) => compare_keys(a, b),
        (RowIdentity::Ordinal(a), RowIdentity::Ordinal(b)) => a.cmp(b),
        (RowIdentity::Ordinal(_), RowIdentity::Key(_)) => Ordering::Less,
        (RowIdentity::Key(_), RowIdentity::Ordinal(_)) => Ordering::Greater,
    }
}

fn row_key(identity: &RowIdentity) -> Vec<DiffValue> {
    match identity {
        RowIdentity::Key(values) => values.iter().map(DiffValue::from).collect(),
        RowIdentity::Ordinal(ordinal) => vec![DiffValue::Text(ordinal.to_string())],
    }
}

/// One comparison run's join. Results are numbered from 1 in emission order.
pub struct Matcher {
    comparer: ValueComparer,
    progress: Arc<Progress>,
    state: MatcherState,
    next_id: u64,
}

impl Matcher {
    pub fn new(options: &ComparisonOptions, progress: Arc<Progress>) -> Self {
        Self {
            comparer: ValueComparer::from_options(options),
            progress,
            state: MatcherState::Idle,
            next_id: 1,
        }
    }

    pub fn state(&self) -> MatcherState {
        self.state
    }

    fn transition(&mut self, next: MatcherState) {
        debug!(from = ?self.state, to = ?next, "matcher state");
        self.state = next;
    }

    async fn pull(
        &self,
        stream: &mut RowStream,
        side: Side,
        guard: Option<&mut KeyGuard>,
    ) -> Result<Option<RowRecord>, ComparisonError> {
        let Some(record) = stream.next().await? else {
            return Ok(None);
        };
        if let Some(guard) = guard {
            guard.check(stream.table(), &record)?;
        }
        let counter = match side {
            Side::Source => &self.progress.source_rows,
            Side::Target => &self.progress.target_rows,
        };
        counter.fetch_add(1, AtomicOrdering::Relaxed);
        Ok(Some(record))
    }

    fn emit(
        &mut self,
        out: &mut DiffAggregator,
        status: RowStatus,
        identity: &RowIdentity,
        differences: Vec<ColumnDifference>,
    ) {
        let result = ComparisonResult {
            id: self.next_id,
            status,
            differences,
            row_key: row_key(identity),
        };
        self.next_id += 1;
        self.progress.results.fetch_add(1, AtomicOrdering::Relaxed);
        out.add(result);
    }

    fn classify_pair(&mut self, out: &mut DiffAggregator, source: RowRecord, target: RowRecord) {
        let differences = self.comparer.differences(&source.values, &target.values);
        let status = if differences.is_empty() {
            RowStatus::Matched
        } else {
            RowStatus::Mismatched
        };
        self.emit(out, status, &source.identity, differences);
    }

    fn missing_target(&mut self, out: &mut DiffAggregator, source: RowRecord) {
        let differences = self.comparer.one_sided(&source.values, true);
        self.emit(out, RowStatus::MissingTarget, &source.identity, differences);
    }

    fn missing_source(&mut self, out: &mut DiffAggregator, target: RowRecord) {
        let differences = self.comparer.one_sided(&target.values, false);
        self.emit(out, RowStatus::MissingSource, &target.identity, differences);
    }

    /// Merge-join over two streams sorted by ascending key.
    pub async fn run_keyed(
        &mut self,
        source: &mut RowStream,
        target: &mut RowStream,
        out: &mut DiffAggregator,
    ) -> Result<(), ComparisonError> {
        let mut source_guard = KeyGuard::new();
        let mut target_guard = KeyGuard::new();
        self.transition(MatcherState::Streaming);

        let mut left = self.pull(source, Side::Source, Some(&mut source_guard)).await?;
        let mut right = self.pull(target, Side::Target, Some(&mut target_guard)).await?;
        loop {
            match (left.take(), right.take()) {
                (Some(src), Some(tgt)) => match identity_order(&src.identity, &tgt.identity) {
                    Ordering::Equal => {
                        self.classify_pair(out, src, tgt);
                        left = self.pull(source, Side::Source, Some(&mut source_guard)).await?;
                        right = self.pull(target, Side::Target, Some(&mut target_guard)).await?;
                    }
                    Ordering::Less => {
                        self.missing_target(out, src);
                        right = Some(tgt);
                        left = self.pull(source, Side::Source, Some(&mut source_guard)).await?;
                    }
                    Ordering::Greater => {
                        self.missing_source(out, tgt);
                        left = Some(src);
                        right = self.pull(target, Side::Target, Some(&mut target_guard)).await?;
                    }
                },
                (Some(src), None) => {
                    self.enter_draining();
                    self.missing_target(out, src);
                    left = self.pull(source, Side::Source, Some(&mut source_guard)).await?;
                }
                (None, Some(tgt)) => {
                    self.enter_draining();
                    self.missing_source(out, tgt);
                    right = self.pull(target, Side::Target, Some(&mut target_guard)).await?;
                }
                (None, None) => break,
            }
        }

        self.enter_draining();
        self.transition(MatcherState::Done);
        Ok(())
    }

    /// Positional join: buffers the whole target, then pairs source rows by
    /// ordinal.
    pub async fn run_unkeyed(
        &mut self,
        source: &mut RowStream,
        target: &mut RowStream,
        out: &mut DiffAggregator,
    ) -> Result<(), ComparisonError> {
        self.transition(MatcherState::Streaming);

        let mut buffered: Vec<Option<RowRecord>> = Vec::new();
        while let Some(record) = self.pull(target, Side::Target, None).await? {
            buffered.push(Some(record));
        }
        debug!(rows = buffered.len(), "target buffered");

        let mut paired = 0usize;
        while let Some(src) = self.pull(source, Side::Source, None).await? {
            match buffered.get_mut(paired).and_then(Option::take) {
                Some(tgt) => self.classify_pair(out, src, tgt),
                None => self.missing_target(out, src),
            }
            paired += 1;
        }

        self.enter_draining();
        for tgt in buffered.into_iter().skip(paired).flatten() {
            self.missing_source(out, tgt);
        }
        self.transition(MatcherState::Done);
        Ok(())
    }

    fn enter_draining(&mut self) {
        if self.state == MatcherState::Streaming {
            self.transition(MatcherState::Draining);
        }
    }
}
