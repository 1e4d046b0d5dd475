use anyhow::Result;

use crate::cli::{CliArgs, Endpoint};
use crate::config::OutputFormat;
use crate::config::{self, CliOverrides, ResolvedConfig};
use crate::db::connection::DatabaseConnection;
use crate::db::manager::{ConnectionHandle, ConnectionManager};
use crate::error::{AppError, ErrorKind};
use crate::output;

pub fn overrides_from_args(
    args: &CliArgs,
    bind: Option<String>,
    batch_size: Option<usize>,
) -> CliOverrides {
    CliOverrides {
        config_path: args.config_path.clone(),
        env_file: args.env_file.clone(),
        bind,
        batch_size,
    }
}

pub fn load_config(args: &CliArgs) -> Result<ResolvedConfig> {
    load_config_with(args, None, None)
}

pub fn load_config_with(
    args: &CliArgs,
    bind: Option<String>,
    batch_size: Option<usize>,
) -> Result<ResolvedConfig> {
    let overrides = overrides_from_args(args, bind, batch_size);
    config::load_from_system(&overrides)
        .map_err(|err| AppError::new(ErrorKind::Config, err.to_string()).into())
}

pub fn output_format(args: &CliArgs, resolved: &ResolvedConfig) -> OutputFormat {
    output::select_format(&args.output, &resolved.settings)
}

pub fn json_pretty(resolved: &ResolvedConfig) -> bool {
    resolved.settings.output.json.pretty
}

pub fn runtime() -> Result<tokio::runtime::Runtime> {
    Ok(tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()?)
}

pub fn manager(resolved: &ResolvedConfig) -> ConnectionManager {
    ConnectionManager::new(resolved.settings.engine.session_settings())
}

/// Turns `--profile`/`--url` style flags into connection parameters.
pub fn connection_for(
    resolved: &ResolvedConfig,
    endpoint: &Endpoint,
) -> Result<DatabaseConnection> {
    let connection = match endpoint {
        Endpoint::Profile(name) => resolved.connection(name),
        Endpoint::Url(url) => DatabaseConnection::from_url(url),
    };
    connection.map_err(|err| AppError::new(ErrorKind::Config, err.to_string()).into())
}

pub async fn connect(
    manager: &ConnectionManager,
    resolved: &ResolvedConfig,
    endpoint: &Endpoint,
) -> Result<ConnectionHandle> {
    let connection = connection_for(resolved, endpoint)?;
    Ok(manager.connect(&connection).await?)
}
