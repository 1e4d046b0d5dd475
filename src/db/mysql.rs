use async_trait::async_trait;
use chrono::{NaiveDate, NaiveDateTime, NaiveTime};
use futures::TryStreamExt;
use sqlx::mysql::{MySqlConnectOptions, MySqlPoolOptions, MySqlRow, MySqlSslMode};
use sqlx::{MySqlPool, Row, TypeInfo, ValueRef};
use tracing::debug;

use crate::db::connection::{DatabaseConnection, DatabaseType, TableRef};
use crate::db::driver::{
    DatabaseDriver, SessionSettings, StreamRequest, classify_sqlx, unreadable,
    with_connect_timeout,
};
use crate::db::stream::RowSink;
use crate::db::types::{ColumnInfo, Value};
use crate::error::{ConnectionError, RowStreamError, SchemaError};

// No ORDER BY: the data dictionary returns tables in its own order.
const TABLES_SQL: &str = r#"
    SELECT CAST(TABLE_NAME AS CHAR) AS table_name
    FROM information_schema.TABLES
    WHERE TABLE_SCHEMA = DATABASE()
"#;

const COLUMNS_SQL: &str = r#"
    SELECT CAST(COLUMN_NAME AS CHAR) AS column_name,
           CAST(COLUMN_TYPE AS CHAR) AS data_type
    FROM information_schema.COLUMNS
    WHERE TABLE_SCHEMA = COALESCE(?, DATABASE())
      AND TABLE_NAME = ?
    ORDER BY ORDINAL_POSITION
"#;

pub struct MySqlDriver {
    id: String,
    pool: MySqlPool,
}

impl MySqlDriver {
    pub async fn connect(
        connection: &DatabaseConnection,
        settings: &SessionSettings,
    ) -> Result<Self, ConnectionError> {
        let id = connection.connection_id();
        let options = MySqlConnectOptions::new()
            .host(&connection.hostname)
            .port(connection.port)
            .username(&connection.username)
            .password(&connection.password)
            .database(&connection.database_name)
            .ssl_mode(if settings.encrypt {
                MySqlSslMode::Preferred
            } else {
                MySqlSslMode::Disabled
            });

        let pool = with_connect_timeout(&id, settings, async {
            MySqlPoolOptions::new()
                .max_connections(settings.max_pool_size.max(1))
                .acquire_timeout(settings.connect_timeout)
                .connect_with(options)
                .await
                .map_err(|err| classify_sqlx(&id, err))
        })
        .await?;
        Ok(Self { id, pool })
    }

    fn schema_error(&self, err: sqlx::Error) -> SchemaError {
        SchemaError::QueryFailed {
            connection: self.id.clone(),
            detail: err.to_string(),
        }
    }
}

#[async_trait]
impl DatabaseDriver for MySqlDriver {
    fn database_type(&self) -> DatabaseType {
        DatabaseType::MySql
    }

    async fn probe(&self) -> Result<(), ConnectionError> {
        sqlx::query("SELECT 1")
            .execute(&self.pool)
            .await
            .map_err(|err| classify_sqlx(&self.id, err))?;
        Ok(())
    }

    async fn list_tables(&self) -> Result<Vec<String>, SchemaError> {
        let rows = sqlx::query(TABLES_SQL)
            .fetch_all(&self.pool)
            .await
            .map_err(|err| self.schema_error(err))?;
        rows.iter()
            .map(|row| row.try_get::<String, _>("table_name"))
            .collect::<Result<Vec<_>, _>>()
            .map_err(|err| self.schema_error(err))
    }

    async fn list_columns(&self, table: &TableRef) -> Result<Vec<ColumnInfo>, SchemaError> {
        let rows = sqlx::query(COLUMNS_SQL)
            .bind(table.schema.as_deref())
            .bind(&table.name)
            .fetch_all(&self.pool)
            .await
            .map_err(|err| self.schema_error(err))?;
        rows.iter()
            .map(|row| {
                Ok(ColumnInfo::new(
                    row.try_get::<String, _>("column_name")?,
                    row.try_get::<String, _>("data_type")?,
                ))
            })
            .collect::<Result<Vec<_>, sqlx::Error>>()
            .map_err(|err| self.schema_error(err))
    }

    async fn pump_rows(
        &self,
        request: &StreamRequest,
        sink: &mut RowSink,
    ) -> Result<(), RowStreamError> {
        let sql = request.select_sql(DatabaseType::MySql);
        debug!(connection = %self.id, sql = %sql, "streaming rows");

        let mut rows = sqlx::query(&sql).fetch(&self.pool);
        while let Some(row) = rows.try_next().await.map_err(|err| RowStreamError::QueryFailed {
            connection: self.id.clone(),
            table: request.table.to_string(),
            detail: err.to_string(),
        })? {
            let row_number = sink.next_ordinal();
            let values = request
                .columns
                .iter()
                .enumerate()
                .map(|(index, col)| decode(&row, index, &request.table, &col.name, row_number))
                .collect();
            if !sink.push(values).await? {
                break;
            }
        }
        Ok(())
    }

    async fn close(&self) {
        self.pool.close().await;
    }
}

fn decode(row: &MySqlRow, index: usize, table: &TableRef, column: &str, row_number: u64) -> Value {
    let raw = match row.try_get_raw(index) {
        Ok(raw) => raw,
        Err(err) => return unreadable(table, column, row_number, err),
    };
    if raw.is_null() {
        return Value::Null;
    }
    let type_name = raw.type_info().name().to_string();

    let decoded: Result<Value, sqlx::Error> = match type_name.as_str() {
        "BOOLEAN" => row.try_get::<bool, _>(index).map(Value::Bool),
        "TINYINT" | "SMALLINT" | "MEDIUMINT" | "INT" | "BIGINT" => {
            row.try_get::<i64, _>(index).map(Value::Int)
        }
        "TINYINT UNSIGNED" | "SMALLINT UNSIGNED" | "MEDIUMINT UNSIGNED" | "INT UNSIGNED"
        | "BIGINT UNSIGNED" | "YEAR" => row.try_get::<u64, _>(index).map(|v| match i64::try_from(v) {
            Ok(v) => Value::Int(v),
            Err(_) => Value::Decimal(v.into()),
        }),
        "FLOAT" => row.try_get::<f32, _>(index).map(|v| Value::Float(v.into())),
        "DOUBLE" => row.try_get::<f64, _>(index).map(Value::Float),
        "DECIMAL" => row.try_get::<sqlx::types::BigDecimal, _>(index).map(Value::Decimal),
        "DATE" => row.try_get::<NaiveDate, _>(index).map(Value::Date),
        "DATETIME" | "TIMESTAMP" => row.try_get::<NaiveDateTime, _>(index).map(Value::Timestamp),
        "TIME" => row
            .try_get::<NaiveTime, _>(index)
            .map(|v| Value::Text(v.to_string())),
        "JSON" => row
            .try_get::<serde_json::Value, _>(index)
            .map(|v| Value::Text(v.to_string())),
        "BINARY" | "VARBINARY" | "BLOB" | "TINYBLOB" | "MEDIUMBLOB" | "LONGBLOB" | "BIT" => {
            row.try_get::<Vec<u8>, _>(index).map(Value::Bytes)
        }
        _ => row.try_get::<String, _>(index).map(Value::Text),
    };

    decoded.unwrap_or_else(|err| unreadable(table, column, row_number, err))
}
