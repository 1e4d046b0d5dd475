//! Chunked, cancellable row streams.
//!
//! Each stream is a producer task that runs the driver query and pushes
//! bounded chunks through a bounded channel; the consumer pulls rows one at a
//! time. At most `CHANNEL_DEPTH + 1` chunks per side are held in memory.

use std::collections::VecDeque;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::db::driver::StreamRequest;
use crate::db::manager::ConnectionHandle;
use crate::db::types::Value;
use crate::error::{ComparisonError, RowStreamError};

const CHANNEL_DEPTH: usize = 2;

type Chunk = Result<Vec<RowRecord>, RowStreamError>;

/// How a row is matched with its counterpart on the other side.
#[derive(Debug, Clone, PartialEq)]
pub enum RowIdentity {
    Key(Vec<Value>),
    /// 1-based position in streamed order; used when no key is declared.
    Ordinal(u64),
}

impl RowIdentity {
    pub fn describe(&self) -> String {
        match self {
            RowIdentity::Ordinal(ordinal) => format!("#{}", ordinal),
            RowIdentity::Key(values) => {
                let parts = values
                    .iter()
                    .map(|value| value.render().unwrap_or_else(|| "NULL".to_string()))
                    .collect::<Vec<_>>();
                format!("({})", parts.join(", "))
            }
        }
    }
}

/// One projected row. `values` follows the projection order of the request.
#[derive(Debug, Clone, PartialEq)]
pub struct RowRecord {
    pub identity: RowIdentity,
    pub values: Vec<Value>,
}

/// Driver-facing half of a stream: batches rows and applies backpressure.
pub struct RowSink {
    tx: mpsc::Sender<Chunk>,
    table: String,
    column_names: Vec<String>,
    key_columns: Vec<usize>,
    batch: Vec<RowRecord>,
    batch_size: usize,
    ordinal: u64,
}

impl RowSink {
    fn new(tx: mpsc::Sender<Chunk>, request: &StreamRequest) -> Self {
        let batch_size = request.batch_size.max(1);
        Self {
            tx,
            table: request.table.to_string(),
            column_names: request.columns.iter().map(|c| c.name.clone()).collect(),
            key_columns: request.key_columns.clone(),
            batch: Vec::with_capacity(batch_size),
            batch_size,
            ordinal: 0,
        }
    }

    /// Ordinal the next pushed row will receive.
    pub fn next_ordinal(&self) -> u64 {
        self.ordinal + 1
    }

    /// Queues one decoded row. Returns `Ok(false)` once the consumer has gone
    /// away, at which point the driver should stop reading.
    pub async fn push(&mut self, values: Vec<Value>) -> Result<bool, RowStreamError> {
        self.ordinal += 1;
        let identity = if self.key_columns.is_empty() {
            RowIdentity::Ordinal(self.ordinal)
        } else {
            let mut key = Vec::with_capacity(self.key_columns.len());
            for &idx in &self.key_columns {
                let value = values.get(idx).cloned().unwrap_or(Value::Null);
                if let Value::Unreadable(detail) = &value {
                    return Err(RowStreamError::TypeCoercionFailed {
                        table: self.table.clone(),
                        column: self.column_names.get(idx).cloned().unwrap_or_default(),
                        row: format!("#{}", self.ordinal),
                        detail: format!("key value unreadable: {}", detail),
                    });
                }
                key.push(value);
            }
            RowIdentity::Key(key)
        };

        self.batch.push(RowRecord { identity, values });
        if self.batch.len() >= self.batch_size {
            return Ok(self.flush().await);
        }
        Ok(true)
    }

    async fn flush(&mut self) -> bool {
        if self.batch.is_empty() {
            return true;
        }
        let chunk = std::mem::replace(&mut self.batch, Vec::with_capacity(self.batch_size));
        debug!(table = %self.table, rows = chunk.len(), "chunk ready");
        self.tx.send(Ok(chunk)).await.is_ok()
    }

    async fn finish(mut self, outcome: Result<(), RowStreamError>) {
        match outcome {
            Ok(()) => {
                self.flush().await;
            }
            Err(err) => {
                let _ = self.tx.send(Err(err)).await;
            }
        }
    }
}

/// Consumer half: a finite, non-restartable sequence of rows.
pub struct RowStream {
    table: String,
    receiver: mpsc::Receiver<Chunk>,
    buffered: VecDeque<RowRecord>,
    cancel: CancellationToken,
    producer: Option<JoinHandle<()>>,
    exhausted: bool,
}

impl RowStream {
    /// Starts streaming `request` from `handle`. The producer holds its own
    /// handle reference, released when the stream ends, fails, is cancelled or
    /// is dropped.
    pub fn open(
        handle: &ConnectionHandle,
        request: StreamRequest,
        cancel: CancellationToken,
    ) -> Self {
        let (tx, receiver) = mpsc::channel(CHANNEL_DEPTH);
        let session = handle.clone();
        let token = cancel.clone();
        let table = request.table.to_string();
        debug!(connection = %handle.id(), table = %table, keyed = request.is_keyed(), "opening row stream");

        let producer = tokio::spawn(async move {
            let driver = session.driver();
            let mut sink = RowSink::new(tx, &request);
            let outcome = tokio::select! {
                outcome = driver.pump_rows(&request, &mut sink) => outcome,
                _ = token.cancelled() => return,
            };
            sink.finish(outcome).await;
            drop(session);
        });

        Self {
            table,
            receiver,
            buffered: VecDeque::new(),
            cancel,
            producer: Some(producer),
            exhausted: false,
        }
    }

    /// Stream over pre-built chunks, for callers that already hold the rows.
    pub fn from_chunks(
        table: impl Into<String>,
        chunks: Vec<Result<Vec<RowRecord>, RowStreamError>>,
        cancel: CancellationToken,
    ) -> Self {
        let (tx, receiver) = mpsc::channel(chunks.len().max(1));
        for chunk in chunks {
            // Capacity covers every chunk, so this cannot fail.
            let _ = tx.try_send(chunk);
        }
        Self {
            table: table.into(),
            receiver,
            buffered: VecDeque::new(),
            cancel,
            producer: None,
            exhausted: false,
        }
    }

    /// Convenience over `from_chunks` for a single chunk of rows.
    pub fn from_rows(
        table: impl Into<String>,
        rows: Vec<RowRecord>,
        cancel: CancellationToken,
    ) -> Self {
        Self::from_chunks(table, vec![Ok(rows)], cancel)
    }

    pub fn table(&self) -> &str {
        &self.table
    }

    /// Next row, `None` once exhausted. Waiting for a chunk observes the
    /// run's cancellation signal.
    pub async fn next(&mut self) -> Result<Option<RowRecord>, ComparisonError> {
        loop {
            if let Some(row) = self.buffered.pop_front() {
                return Ok(Some(row));
            }
            if self.exhausted {
                return Ok(None);
            }
            if self.cancel.is_cancelled() {
                return Err(ComparisonError::Cancelled);
            }
            let chunk = tokio::select! {
                _ = self.cancel.cancelled() => return Err(ComparisonError::Cancelled),
                chunk = self.receiver.recv() => chunk,
            };
            match chunk {
                Some(Ok(rows)) => self.buffered.extend(rows),
                Some(Err(err)) => {
                    self.exhausted = true;
                    return Err(err.into());
                }
                None => self.exhausted = true,
            }
        }
    }
}

impl Drop for RowStream {
    fn drop(&mut self) {
        if let Some(producer) = self.producer.take() {
            producer.abort();
        }
    }
}
