use std::fmt::Display;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tracing::warn;

use crate::db::connection::{DatabaseConnection, DatabaseType, TableRef};
use crate::db::stream::RowSink;
use crate::db::types::{ColumnInfo, Value};
use crate::db::{mysql, postgres, sqlserver};
use crate::error::{ConnectionError, RowStreamError, SchemaError};

/// Knobs shared by every vendor session.
#[derive(Debug, Clone)]
pub struct SessionSettings {
    pub connect_timeout: Duration,
    pub max_pool_size: u32,
    pub encrypt: bool,
    pub trust_cert: bool,
}

impl Default for SessionSettings {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_millis(10_000),
            max_pool_size: 5,
            encrypt: true,
            trust_cert: true,
        }
    }
}

/// One vendor's live session. Implementations must allow concurrent read-only
/// queries from independent comparison runs.
#[async_trait]
pub trait DatabaseDriver: Send + Sync {
    fn database_type(&self) -> DatabaseType;

    /// Cheap round trip used to validate credentials and reachability.
    async fn probe(&self) -> Result<(), ConnectionError>;

    /// Tables in catalog order.
    async fn list_tables(&self) -> Result<Vec<String>, SchemaError>;

    /// Columns in ordinal order. An empty result means the table is missing.
    async fn list_columns(&self, table: &TableRef) -> Result<Vec<ColumnInfo>, SchemaError>;

    /// Runs the projection described by `request` and pushes decoded rows into
    /// `sink` until the result set ends or the sink reports its consumer gone.
    async fn pump_rows(
        &self,
        request: &StreamRequest,
        sink: &mut RowSink,
    ) -> Result<(), RowStreamError>;

    async fn close(&self);
}

/// Opens vendor sessions. The manager goes through this seam so sessions can
/// be swapped for in-process ones.
#[async_trait]
pub trait Connector: Send + Sync {
    async fn open(
        &self,
        connection: &DatabaseConnection,
        settings: &SessionSettings,
    ) -> Result<Arc<dyn DatabaseDriver>, ConnectionError>;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct VendorConnector;

#[async_trait]
impl Connector for VendorConnector {
    async fn open(
        &self,
        connection: &DatabaseConnection,
        settings: &SessionSettings,
    ) -> Result<Arc<dyn DatabaseDriver>, ConnectionError> {
        let driver: Arc<dyn DatabaseDriver> = match connection.database_kind()? {
            DatabaseType::PostgreSql => {
                Arc::new(postgres::PostgresDriver::connect(connection, settings).await?)
            }
            DatabaseType::MySql => {
                Arc::new(mysql::MySqlDriver::connect(connection, settings).await?)
            }
            DatabaseType::SqlServer => {
                Arc::new(sqlserver::SqlServerDriver::connect(connection, settings).await?)
            }
        };
        driver.probe().await?;
        Ok(driver)
    }
}

/// Projection of one table for a comparison run.
#[derive(Debug, Clone)]
pub struct StreamRequest {
    pub table: TableRef,
    pub columns: Vec<ColumnInfo>,
    /// Positions in `columns` that form the row identity, in key order.
    pub key_columns: Vec<usize>,
    pub batch_size: usize,
}

impl StreamRequest {
    pub fn is_keyed(&self) -> bool {
        !self.key_columns.is_empty()
    }

    pub fn select_sql(&self, dialect: DatabaseType) -> String {
        let select_list = self
            .columns
            .iter()
            .map(|col| dialect.quote_ident(&col.name))
            .collect::<Vec<_>>()
            .join(", ");
        let mut sql = format!("SELECT {} FROM {}", select_list, dialect.quote_table(&self.table));
        if self.is_keyed() {
            let order = self
                .key_columns
                .iter()
                .filter_map(|&idx| self.columns.get(idx))
                .map(|col| dialect.order_key(&col.name, col.key_sort()))
                .collect::<Vec<_>>()
                .join(", ");
            sql.push_str(" ORDER BY ");
            sql.push_str(&order);
        }
        sql
    }
}

/// Maps a pool or login failure onto the connection taxonomy. The server
/// answering at all means the host is reachable, so database-level errors
/// count as rejected credentials.
pub(crate) fn classify_sqlx(connection: &str, err: sqlx::Error) -> ConnectionError {
    match err {
        sqlx::Error::Database(db) => ConnectionError::AuthRejected {
            connection: connection.to_string(),
            detail: db.message().to_string(),
        },
        other => ConnectionError::Unreachable {
            connection: connection.to_string(),
            detail: other.to_string(),
        },
    }
}

/// Bounds a connect attempt by the configured timeout.
pub(crate) async fn with_connect_timeout<T, F>(
    connection: &str,
    settings: &SessionSettings,
    attempt: F,
) -> Result<T, ConnectionError>
where
    F: std::future::Future<Output = Result<T, ConnectionError>>,
{
    if settings.connect_timeout.is_zero() {
        return attempt.await;
    }
    tokio::time::timeout(settings.connect_timeout, attempt)
        .await
        .map_err(|_| ConnectionError::Unreachable {
            connection: connection.to_string(),
            detail: format!(
                "connection timed out after {} ms",
                settings.connect_timeout.as_millis()
            ),
        })?
}

/// Degrades one undecodable cell to the unreadable sentinel and records why.
pub fn unreadable(table: &TableRef, column: &str, row: u64, detail: impl Display) -> Value {
    let detail = detail.to_string();
    let err = RowStreamError::TypeCoercionFailed {
        table: table.to_string(),
        column: column.to_string(),
        row: row.to_string(),
        detail: detail.clone(),
    };
    warn!("{}", err);
    Value::Unreadable(detail)
}
