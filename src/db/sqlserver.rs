use std::str::FromStr;

use async_trait::async_trait;
use bigdecimal::BigDecimal;
use chrono::{Duration, NaiveDate, NaiveDateTime, NaiveTime};
use futures::TryStreamExt;
use tiberius::ColumnData;
use tracing::debug;

use crate::db::client::{self, SqlClient};
use crate::db::connection::{DatabaseConnection, DatabaseType, TableRef};
use crate::db::driver::{DatabaseDriver, SessionSettings, StreamRequest, unreadable};
use crate::db::stream::RowSink;
use crate::db::types::{ColumnInfo, Value};
use crate::error::{ConnectionError, RowStreamError, SchemaError};

const TABLES_SQL: &str = "SELECT CASE WHEN s.name = SCHEMA_NAME() THEN o.name \
     ELSE s.name + '.' + o.name END AS table_name \
     FROM sys.objects o \
     JOIN sys.schemas s ON s.schema_id = o.schema_id \
     WHERE o.type IN ('U', 'V') AND o.is_ms_shipped = 0 \
     ORDER BY o.object_id";

const COLUMNS_SQL: &str = "SELECT c.name AS column_name, TYPE_NAME(c.user_type_id) AS data_type \
     FROM sys.columns c \
     WHERE c.object_id = OBJECT_ID(@P1) \
     ORDER BY c.column_id";

/// SQL Server session. Every query logs in on its own client so concurrent
/// runs never share cursor state.
pub struct SqlServerDriver {
    id: String,
    config: tiberius::Config,
    settings: SessionSettings,
}

impl SqlServerDriver {
    pub async fn connect(
        connection: &DatabaseConnection,
        settings: &SessionSettings,
    ) -> Result<Self, ConnectionError> {
        Ok(Self {
            id: connection.connection_id(),
            config: client::build_config(connection, settings),
            settings: settings.clone(),
        })
    }

    async fn client(&self) -> Result<SqlClient, ConnectionError> {
        client::connect(&self.id, self.config.clone(), &self.settings).await
    }

    fn schema_error(&self, detail: impl ToString) -> SchemaError {
        SchemaError::QueryFailed {
            connection: self.id.clone(),
            detail: detail.to_string(),
        }
    }
}

#[async_trait]
impl DatabaseDriver for SqlServerDriver {
    fn database_type(&self) -> DatabaseType {
        DatabaseType::SqlServer
    }

    async fn probe(&self) -> Result<(), ConnectionError> {
        let mut client = self.client().await?;
        client
            .simple_query("SELECT 1")
            .await
            .map_err(|err| client::classify_tiberius(&self.id, err))?
            .into_results()
            .await
            .map_err(|err| client::classify_tiberius(&self.id, err))?;
        Ok(())
    }

    async fn list_tables(&self) -> Result<Vec<String>, SchemaError> {
        let mut client = self.client().await.map_err(|err| self.schema_error(err))?;
        let rows = client
            .simple_query(TABLES_SQL)
            .await
            .map_err(|err| self.schema_error(err))?
            .into_first_result()
            .await
            .map_err(|err| self.schema_error(err))?;
        rows.iter()
            .map(|row| {
                catalog_text(&self.id, "table_name", row.try_get::<&str, _>(0))?
                    .ok_or_else(|| self.schema_error("table_name is NULL"))
            })
            .collect()
    }

    async fn list_columns(&self, table: &TableRef) -> Result<Vec<ColumnInfo>, SchemaError> {
        let mut client = self.client().await.map_err(|err| self.schema_error(err))?;
        let qualified = DatabaseType::SqlServer.quote_table(table);
        let rows = client
            .query(COLUMNS_SQL, &[&qualified])
            .await
            .map_err(|err| self.schema_error(err))?
            .into_first_result()
            .await
            .map_err(|err| self.schema_error(err))?;
        rows.iter()
            .map(|row| {
                let name = catalog_text(&self.id, "column_name", row.try_get::<&str, _>(0))?
                    .ok_or_else(|| self.schema_error("column_name is NULL"))?;
                // TYPE_NAME is NULL for types the login cannot see.
                let data_type = catalog_text(&self.id, "data_type", row.try_get::<&str, _>(1))?
                    .unwrap_or_else(|| "unknown".to_string());
                Ok(ColumnInfo::new(name, data_type))
            })
            .collect()
    }

    async fn pump_rows(
        &self,
        request: &StreamRequest,
        sink: &mut RowSink,
    ) -> Result<(), RowStreamError> {
        let query_failed = |detail: String| RowStreamError::QueryFailed {
            connection: self.id.clone(),
            table: request.table.to_string(),
            detail,
        };
        let sql = request.select_sql(DatabaseType::SqlServer);
        debug!(connection = %self.id, sql = %sql, "streaming rows");

        let mut client = self
            .client()
            .await
            .map_err(|err| query_failed(err.to_string()))?;
        let stream = client
            .simple_query(sql)
            .await
            .map_err(|err| query_failed(err.to_string()))?;
        let mut rows = stream.into_row_stream();

        while let Some(row) = rows
            .try_next()
            .await
            .map_err(|err| query_failed(err.to_string()))?
        {
            let row_number = sink.next_ordinal();
            let values = row
                .cells()
                .zip(&request.columns)
                .map(|((_, data), col)| decode(data, &request.table, &col.name, row_number))
                .collect();
            if !sink.push(values).await? {
                break;
            }
        }
        Ok(())
    }

    async fn close(&self) {}
}

fn decode(data: &ColumnData<'_>, table: &TableRef, column: &str, row_number: u64) -> Value {
    let converted = match data {
        ColumnData::U8(value) => Ok(value.map(|v| Value::Int(v.into()))),
        ColumnData::I16(value) => Ok(value.map(|v| Value::Int(v.into()))),
        ColumnData::I32(value) => Ok(value.map(|v| Value::Int(v.into()))),
        ColumnData::I64(value) => Ok(value.map(Value::Int)),
        ColumnData::F32(value) => Ok(value.map(|v| Value::Float(v.into()))),
        ColumnData::F64(value) => Ok(value.map(Value::Float)),
        ColumnData::Bit(value) => Ok(value.map(Value::Bool)),
        ColumnData::String(value) => Ok(value.as_ref().map(|v| Value::Text(v.to_string()))),
        ColumnData::Guid(value) => Ok(value.map(|v| Value::Text(v.to_string()))),
        ColumnData::Binary(value) => Ok(value.as_ref().map(|v| Value::Bytes(v.to_vec()))),
        ColumnData::Xml(value) => Ok(value.as_ref().map(|v| Value::Text(v.to_string()))),
        ColumnData::Numeric(value) => value
            .as_ref()
            .map(|v| {
                BigDecimal::from_str(&v.to_string())
                    .map(Value::Decimal)
                    .map_err(|err| err.to_string())
            })
            .transpose(),
        ColumnData::DateTime(value) => value
            .as_ref()
            .map(|v| {
                // 1/300 second ticks since midnight.
                let nanos = i64::from(v.seconds_fragments()) * 1_000_000_000 / 300;
                legacy_timestamp(v.days().into(), nanos)
            })
            .transpose(),
        ColumnData::SmallDateTime(value) => value
            .as_ref()
            .map(|v| {
                // Minutes since midnight.
                let nanos = i64::from(v.seconds_fragments()) * 60 * 1_000_000_000;
                legacy_timestamp(v.days().into(), nanos)
            })
            .transpose(),
        #[cfg(feature = "tds73")]
        ColumnData::Time(value) => value
            .map(|v| time_of_day(v).map(|t| Value::Text(t.to_string())))
            .transpose(),
        #[cfg(feature = "tds73")]
        ColumnData::Date(value) => value.map(|v| modern_date(v).map(Value::Date)).transpose(),
        #[cfg(feature = "tds73")]
        ColumnData::DateTime2(value) => value
            .map(|v| modern_timestamp(v).map(Value::Timestamp))
            .transpose(),
        #[cfg(feature = "tds73")]
        ColumnData::DateTimeOffset(value) => value
            // The stored datetime2 part is already UTC.
            .map(|v| modern_timestamp(v.datetime2()).map(Value::Timestamp))
            .transpose(),
    };

    match converted {
        Ok(Some(value)) => value,
        Ok(None) => Value::Null,
        Err(detail) => unreadable(table, column, row_number, detail),
    }
}

fn legacy_timestamp(days: i64, nanos: i64) -> Result<Value, String> {
    let base = NaiveDate::from_ymd_opt(1900, 1, 1)
        .map(|d| d.and_time(NaiveTime::default()))
        .ok_or_else(|| "invalid base date".to_string())?;
    base.checked_add_signed(Duration::days(days))
        .and_then(|ts| ts.checked_add_signed(Duration::nanoseconds(nanos)))
        .map(Value::Timestamp)
        .ok_or_else(|| format!("datetime out of range ({} days)", days))
}

#[cfg(feature = "tds73")]
fn modern_date(date: tiberius::time::Date) -> Result<NaiveDate, String> {
    NaiveDate::from_ymd_opt(1, 1, 1)
        .and_then(|base| base.checked_add_signed(Duration::days(i64::from(date.days()))))
        .ok_or_else(|| format!("date out of range ({} days)", date.days()))
}

#[cfg(feature = "tds73")]
fn time_of_day(time: tiberius::time::Time) -> Result<NaiveTime, String> {
    let nanos = time.increments() * 10u64.pow(9 - u32::from(time.scale()));
    let secs = u32::try_from(nanos / 1_000_000_000).map_err(|err| err.to_string())?;
    let frac = u32::try_from(nanos % 1_000_000_000).map_err(|err| err.to_string())?;
    NaiveTime::from_num_seconds_from_midnight_opt(secs, frac)
        .ok_or_else(|| format!("time out of range ({} ns)", nanos))
}

#[cfg(feature = "tds73")]
fn modern_timestamp(value: tiberius::time::DateTime2) -> Result<NaiveDateTime, String> {
    Ok(modern_date(value.date())?.and_time(time_of_day(value.time())?))
}

/// One text cell from a catalog query. Decode failures fail the listing.
fn catalog_text(
    connection: &str,
    column: &str,
    cell: Result<Option<&str>, tiberius::error::Error>,
) -> Result<Option<String>, SchemaError> {
    cell.map(|value| value.map(str::to_string))
        .map_err(|err| SchemaError::QueryFailed {
            connection: connection.to_string(),
            detail: format!("{}: {}", column, err),
        })
}
