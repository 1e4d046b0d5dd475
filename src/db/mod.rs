pub mod client;
pub mod connection;
pub mod driver;
pub mod manager;
#[cfg(test)]
pub(crate) mod memory;
pub mod mysql;
pub mod postgres;
pub mod schema;
pub mod sqlserver;
pub mod stream;
pub mod types;

pub use connection::{DatabaseConnection, DatabaseType, TableRef};
pub use driver::{Connector, DatabaseDriver, SessionSettings, StreamRequest};
pub use manager::{ConnectionHandle, ConnectionManager};
pub use stream::{RowIdentity, RowRecord, RowStream};
pub use types::{ColumnInfo, Value};
