use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, NaiveDateTime, NaiveTime, Utc};
use futures::TryStreamExt;
use sqlx::postgres::{PgConnectOptions, PgPoolOptions, PgRow, PgSslMode};
use sqlx::{PgPool, Row, TypeInfo, ValueRef};
use tracing::debug;

use crate::db::connection::{DatabaseConnection, DatabaseType, TableRef};
use crate::db::driver::{
    DatabaseDriver, SessionSettings, StreamRequest, classify_sqlx, unreadable,
    with_connect_timeout,
};
use crate::db::stream::RowSink;
use crate::db::types::{ColumnInfo, Value};
use crate::error::{ConnectionError, RowStreamError, SchemaError};

const TABLES_SQL: &str = r#"
    SELECT CASE WHEN n.nspname = current_schema() THEN c.relname::text
                ELSE n.nspname::text || '.' || c.relname::text END AS table_name
    FROM pg_class c
    JOIN pg_namespace n ON n.oid = c.relnamespace
    WHERE c.relkind IN ('r', 'p', 'v', 'm')
      AND n.nspname NOT IN ('pg_catalog', 'information_schema')
      AND n.nspname NOT LIKE 'pg_toast%'
      AND n.nspname NOT LIKE 'pg_temp%'
    ORDER BY c.oid
"#;

const COLUMNS_SQL: &str = r#"
    SELECT a.attname::text AS column_name,
           format_type(a.atttypid, a.atttypmod) AS data_type
    FROM pg_attribute a
    JOIN pg_class c ON a.attrelid = c.oid
    JOIN pg_namespace n ON c.relnamespace = n.oid
    WHERE n.nspname = COALESCE($1::name, current_schema())
      AND c.relname = $2::name
      AND a.attnum > 0 AND NOT a.attisdropped
    ORDER BY a.attnum
"#;

pub struct PostgresDriver {
    id: String,
    pool: PgPool,
}

impl PostgresDriver {
    pub async fn connect(
        connection: &DatabaseConnection,
        settings: &SessionSettings,
    ) -> Result<Self, ConnectionError> {
        let id = connection.connection_id();
        let options = PgConnectOptions::new()
            .host(&connection.hostname)
            .port(connection.port)
            .username(&connection.username)
            .password(&connection.password)
            .database(&connection.database_name)
            .ssl_mode(if settings.encrypt {
                PgSslMode::Prefer
            } else {
                PgSslMode::Disable
            });

        let pool = with_connect_timeout(&id, settings, async {
            PgPoolOptions::new()
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
impl DatabaseDriver for PostgresDriver {
    fn database_type(&self) -> DatabaseType {
        DatabaseType::PostgreSql
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
        let sql = request.select_sql(DatabaseType::PostgreSql);
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

fn decode(row: &PgRow, index: usize, table: &TableRef, column: &str, row_number: u64) -> Value {
    let raw = match row.try_get_raw(index) {
        Ok(raw) => raw,
        Err(err) => return unreadable(table, column, row_number, err),
    };
    if raw.is_null() {
        return Value::Null;
    }
    let type_name = raw.type_info().name().to_string();

    let decoded: Result<Value, sqlx::Error> = match type_name.as_str() {
        "BOOL" => row.try_get::<bool, _>(index).map(Value::Bool),
        "INT2" => row.try_get::<i16, _>(index).map(|v| Value::Int(v.into())),
        "INT4" => row.try_get::<i32, _>(index).map(|v| Value::Int(v.into())),
        "INT8" => row.try_get::<i64, _>(index).map(Value::Int),
        "FLOAT4" => row.try_get::<f32, _>(index).map(|v| Value::Float(v.into())),
        "FLOAT8" => row.try_get::<f64, _>(index).map(Value::Float),
        "NUMERIC" => row.try_get::<sqlx::types::BigDecimal, _>(index).map(Value::Decimal),
        "TEXT" | "VARCHAR" | "CHAR" | "BPCHAR" | "NAME" | "CITEXT" => {
            row.try_get::<String, _>(index).map(Value::Text)
        }
        "UUID" => row
            .try_get::<uuid::Uuid, _>(index)
            .map(|v| Value::Text(v.to_string())),
        "DATE" => row.try_get::<NaiveDate, _>(index).map(Value::Date),
        "TIMESTAMP" => row.try_get::<NaiveDateTime, _>(index).map(Value::Timestamp),
        "TIMESTAMPTZ" => row
            .try_get::<DateTime<Utc>, _>(index)
            .map(|v| Value::Timestamp(v.naive_utc())),
        "TIME" => row
            .try_get::<NaiveTime, _>(index)
            .map(|v| Value::Text(v.to_string())),
        "JSON" | "JSONB" => row
            .try_get::<serde_json::Value, _>(index)
            .map(|v| Value::Text(v.to_string())),
        "BYTEA" => row.try_get::<Vec<u8>, _>(index).map(Value::Bytes),
        _ => row.try_get::<String, _>(index).map(Value::Text).or_else(|err| {
            // Unknown types: accept the wire text when it is valid UTF-8.
            match raw.as_bytes().ok().map(std::str::from_utf8) {
                Some(Ok(text)) => Ok(Value::Text(text.to_string())),
                _ => Err(err),
            }
        }),
    };

    decoded.unwrap_or_else(|err| unreadable(table, column, row_number, err))
}
