use tokio::net::TcpStream;
use tokio::time::timeout;
use tokio_util::compat::{Compat, TokioAsyncWriteCompatExt};

use crate::db::connection::DatabaseConnection;
use crate::db::driver::SessionSettings;
use crate::error::ConnectionError;

pub type SqlClient = tiberius::Client<Compat<TcpStream>>;

/// Builds the tiberius login configuration for a SQL Server endpoint.
pub fn build_config(
    connection: &DatabaseConnection,
    settings: &SessionSettings,
) -> tiberius::Config {
    let mut config = tiberius::Config::new();
    config.host(&connection.hostname);
    config.port(connection.port);
    config.database(&connection.database_name);
    config.authentication(tiberius::AuthMethod::sql_server(
        &connection.username,
        &connection.password,
    ));

    if settings.encrypt {
        config.encryption(tiberius::EncryptionLevel::Required);
    } else {
        config.encryption(tiberius::EncryptionLevel::NotSupported);
    }
    if settings.trust_cert {
        config.trust_cert();
    }
    config
}

/// Connect to SQL Server.
///
/// # Errors
///
/// TCP failures and elapsed timeouts surface as `Unreachable`; a server that
/// refuses the login surfaces as `AuthRejected`.
pub async fn connect(
    connection_id: &str,
    config: tiberius::Config,
    settings: &SessionSettings,
) -> Result<SqlClient, ConnectionError> {
    let timeout_duration = if settings.connect_timeout.is_zero() {
        None
    } else {
        Some(settings.connect_timeout)
    };
    let unreachable_err = |detail: String| ConnectionError::Unreachable {
        connection: connection_id.to_string(),
        detail,
    };

    // `timeout` wraps the future in an outer Result for Elapsed vs IO errors.
    let tcp = if let Some(duration) = timeout_duration {
        timeout(duration, TcpStream::connect(config.get_addr()))
            .await
            .map_err(|_| {
                unreachable_err(format!(
                    "connection timed out after {} ms",
                    duration.as_millis()
                ))
            })?
            .map_err(|err| unreachable_err(err.to_string()))?
    } else {
        TcpStream::connect(config.get_addr())
            .await
            .map_err(|err| unreachable_err(err.to_string()))?
    };
    tcp.set_nodelay(true)
        .map_err(|err| unreachable_err(err.to_string()))?;

    let login = tiberius::Client::connect(config, tcp.compat_write());
    let result = if let Some(duration) = timeout_duration {
        timeout(duration, login).await.map_err(|_| {
            unreachable_err(format!("login timed out after {} ms", duration.as_millis()))
        })?
    } else {
        login.await
    };
    result.map_err(|err| classify_tiberius(connection_id, err))
}

pub fn classify_tiberius(connection_id: &str, err: tiberius::error::Error) -> ConnectionError {
    match err {
        tiberius::error::Error::Server(token) => ConnectionError::AuthRejected {
            connection: connection_id.to_string(),
            detail: token.message().to_string(),
        },
        other => ConnectionError::Unreachable {
            connection: connection_id.to_string(),
            detail: other.to_string(),
        },
    }
}
