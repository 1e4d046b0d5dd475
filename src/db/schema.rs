//! Catalog access through a live session.

use tracing::debug;

use crate::db::connection::TableRef;
use crate::db::manager::ConnectionHandle;
use crate::db::types::ColumnInfo;
use crate::error::SchemaError;

/// Tables in the database's catalog order.
pub async fn list_tables(handle: &ConnectionHandle) -> Result<Vec<String>, SchemaError> {
    let tables = handle.driver().list_tables().await?;
    debug!(connection = %handle.id(), count = tables.len(), "listed tables");
    Ok(tables)
}

/// Columns of `table` in ordinal order.
///
/// # Errors
///
/// `SchemaError::TableNotFound` when the table does not exist at the time of
/// the call, including when it was dropped after an earlier listing.
pub async fn list_columns(
    handle: &ConnectionHandle,
    table: &str,
) -> Result<Vec<ColumnInfo>, SchemaError> {
    let table_ref = TableRef::parse(table);
    let columns = handle.driver().list_columns(&table_ref).await?;
    if columns.is_empty() {
        return Err(SchemaError::TableNotFound {
            connection: handle.id().to_string(),
            table: table_ref.to_string(),
        });
    }
    debug!(connection = %handle.id(), table = %table_ref, count = columns.len(), "listed columns");
    Ok(columns)
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::db::connection::DatabaseConnection;
    use crate::db::driver::SessionSettings;
    use crate::db::manager::ConnectionManager;
    use crate::db::memory::{MemoryConnector, MemoryDatabase, MemoryTable};

    async fn handle(connector: Arc<MemoryConnector>) -> ConnectionHandle {
        let manager = ConnectionManager::with_connector(connector, SessionSettings::default());
        let connection = DatabaseConnection::from_url("postgres://u:p@h/app").expect("url");
        manager.connect(&connection).await.expect("connect")
    }

    fn database() -> MemoryDatabase {
        MemoryDatabase::default()
            .with_table(MemoryTable::new("zebra", &[("id", "integer")]))
            .with_table(MemoryTable::new(
                "accounts",
                &[("id", "integer"), ("owner", "text"), ("balance", "numeric")],
            ))
    }

    #[tokio::test]
    async fn keeps_catalog_order() {
        let connector = Arc::new(MemoryConnector::new());
        connector.register("app", database());
        let handle = handle(connector).await;

        assert_eq!(list_tables(&handle).await.expect("tables"), vec!["zebra", "accounts"]);
        let names = list_columns(&handle, "accounts")
            .await
            .expect("columns")
            .into_iter()
            .map(|c| c.name)
            .collect::<Vec<_>>();
        assert_eq!(names, vec!["id", "owner", "balance"]);
    }

    #[tokio::test]
    async fn dropped_table_is_not_found() {
        let connector = Arc::new(MemoryConnector::new());
        connector.register("app", database());
        let handle = handle(connector.clone()).await;

        assert!(list_tables(&handle).await.expect("tables").contains(&"zebra".to_string()));
        connector.drop_table("app", "zebra");
        let err = list_columns(&handle, "zebra").await.expect_err("missing");
        assert!(matches!(err, SchemaError::TableNotFound { ref table, .. } if table == "zebra"));
    }
}
