//! In-process driver for unit tests.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;

use crate::db::connection::{DatabaseConnection, DatabaseType, TableRef};
use crate::db::driver::{Connector, DatabaseDriver, SessionSettings, StreamRequest, unreadable};
use crate::db::stream::RowSink;
use crate::db::types::{ColumnInfo, Value};
use crate::error::{ConnectionError, RowStreamError, SchemaError};

/// Cell as stored; `Err` simulates a value the driver cannot decode.
pub type Cell = Result<Value, String>;

#[derive(Debug, Clone, Default)]
pub struct MemoryTable {
    pub name: String,
    pub columns: Vec<ColumnInfo>,
    pub rows: Vec<Vec<Cell>>,
    /// Serve rows as stored even when a key order is requested.
    pub ignore_order_by: bool,
    /// Fail the stream after this many rows.
    pub fail_after: Option<usize>,
    /// Stop producing after this many rows without ending the stream.
    pub stall_after: Option<usize>,
}

impl MemoryTable {
    pub fn new(name: &str, columns: &[(&str, &str)]) -> Self {
        Self {
            name: name.to_string(),
            columns: columns
                .iter()
                .map(|(name, ty)| ColumnInfo::new(*name, *ty))
                .collect(),
            ..Self::default()
        }
    }

    pub fn row(mut self, values: Vec<Value>) -> Self {
        self.rows.push(values.into_iter().map(Ok).collect());
        self
    }

    pub fn raw_row(mut self, cells: Vec<Cell>) -> Self {
        self.rows.push(cells);
        self
    }

    pub fn unordered(mut self) -> Self {
        self.ignore_order_by = true;
        self
    }

    pub fn failing_after(mut self, rows: usize) -> Self {
        self.fail_after = Some(rows);
        self
    }

    pub fn stalling_after(mut self, rows: usize) -> Self {
        self.stall_after = Some(rows);
        self
    }
}

#[derive(Debug, Clone, Default)]
pub struct MemoryDatabase {
    pub tables: Vec<MemoryTable>,
    pub password: Option<String>,
}

impl MemoryDatabase {
    pub fn with_table(mut self, table: MemoryTable) -> Self {
        self.tables.push(table);
        self
    }
}

pub struct MemoryDriver {
    name: String,
    database: Arc<Mutex<MemoryDatabase>>,
    closed: Arc<AtomicUsize>,
}

impl MemoryDriver {
    fn table(&self, table: &TableRef) -> Option<MemoryTable> {
        let database = self.database.lock().ok()?;
        database.tables.iter().find(|t| t.name == table.name).cloned()
    }
}

#[async_trait]
impl DatabaseDriver for MemoryDriver {
    fn database_type(&self) -> DatabaseType {
        DatabaseType::PostgreSql
    }

    async fn probe(&self) -> Result<(), ConnectionError> {
        Ok(())
    }

    async fn list_tables(&self) -> Result<Vec<String>, SchemaError> {
        let database = self.database.lock().map_err(|_| SchemaError::QueryFailed {
            connection: self.name.clone(),
            detail: "poisoned".to_string(),
        })?;
        Ok(database.tables.iter().map(|t| t.name.clone()).collect())
    }

    async fn list_columns(&self, table: &TableRef) -> Result<Vec<ColumnInfo>, SchemaError> {
        Ok(self.table(table).map(|t| t.columns).unwrap_or_default())
    }

    async fn pump_rows(
        &self,
        request: &StreamRequest,
        sink: &mut RowSink,
    ) -> Result<(), RowStreamError> {
        let table = self.table(&request.table).ok_or_else(|| RowStreamError::QueryFailed {
            connection: self.name.clone(),
            table: request.table.to_string(),
            detail: "relation does not exist".to_string(),
        })?;

        let positions = request
            .columns
            .iter()
            .map(|col| table.columns.iter().position(|c| c.name == col.name))
            .collect::<Vec<_>>();
        let mut rows = table
            .rows
            .iter()
            .map(|row| {
                positions
                    .iter()
                    .map(|pos| pos.and_then(|p| row.get(p).cloned()).unwrap_or(Ok(Value::Null)))
                    .collect::<Vec<Cell>>()
            })
            .collect::<Vec<_>>();

        if request.is_keyed() && !table.ignore_order_by {
            rows.sort_by(|a, b| {
                for &idx in &request.key_columns {
                    let left = a[idx].clone().unwrap_or(Value::Null);
                    let right = b[idx].clone().unwrap_or(Value::Null);
                    let ord = left.key_cmp(&right);
                    if ord != std::cmp::Ordering::Equal {
                        return ord;
                    }
                }
                std::cmp::Ordering::Equal
            });
        }

        for (index, row) in rows.into_iter().enumerate() {
            if table.fail_after == Some(index) {
                return Err(RowStreamError::QueryFailed {
                    connection: self.name.clone(),
                    table: request.table.to_string(),
                    detail: "connection reset".to_string(),
                });
            }
            if table.stall_after == Some(index) {
                std::future::pending::<()>().await;
            }
            let row_number = sink.next_ordinal();
            let values = row
                .into_iter()
                .zip(&request.columns)
                .map(|(cell, col)| match cell {
                    Ok(value) => value,
                    Err(detail) => unreadable(&request.table, &col.name, row_number, detail),
                })
                .collect();
            if !sink.push(values).await? {
                break;
            }
        }
        Ok(())
    }

    async fn close(&self) {
        self.closed.fetch_add(1, Ordering::SeqCst);
    }
}

/// Serves registered databases by `databaseName`.
#[derive(Default)]
pub struct MemoryConnector {
    databases: Mutex<HashMap<String, Arc<Mutex<MemoryDatabase>>>>,
    opened: AtomicUsize,
    closed: Arc<AtomicUsize>,
}

impl MemoryConnector {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, name: &str, database: MemoryDatabase) {
        if let Ok(mut databases) = self.databases.lock() {
            databases.insert(name.to_string(), Arc::new(Mutex::new(database)));
        }
    }

    /// Removes a table from a registered database, simulating a concurrent
    /// schema change.
    pub fn drop_table(&self, database: &str, table: &str) {
        if let Ok(databases) = self.databases.lock() {
            if let Some(db) = databases.get(database) {
                if let Ok(mut db) = db.lock() {
                    db.tables.retain(|t| t.name != table);
                }
            }
        }
    }

    pub fn opened(&self) -> usize {
        self.opened.load(Ordering::SeqCst)
    }

    pub fn closed(&self) -> usize {
        self.closed.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Connector for MemoryConnector {
    async fn open(
        &self,
        connection: &DatabaseConnection,
        _settings: &SessionSettings,
    ) -> Result<Arc<dyn DatabaseDriver>, ConnectionError> {
        let id = connection.connection_id();
        let database = self
            .databases
            .lock()
            .ok()
            .and_then(|databases| databases.get(&connection.database_name).cloned())
            .ok_or_else(|| ConnectionError::Unreachable {
                connection: id.clone(),
                detail: "no such host".to_string(),
            })?;
        let expected = database.lock().ok().and_then(|db| db.password.clone());
        if let Some(expected) = expected {
            if expected != connection.password {
                return Err(ConnectionError::AuthRejected {
                    connection: id,
                    detail: "password authentication failed".to_string(),
                });
            }
        }
        self.opened.fetch_add(1, Ordering::SeqCst);
        Ok(Arc::new(MemoryDriver {
            name: id,
            database,
            closed: self.closed.clone(),
        }))
    }
}
