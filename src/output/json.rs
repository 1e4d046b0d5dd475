use serde::Serialize;
use serde_json::json;

use crate::config::ResolvedConfig;

pub fn emit_json<T: Serialize>(value: &T, pretty: bool) -> anyhow::Result<String> {
    if pretty {
        Ok(serde_json::to_string_pretty(value)?)
    } else {
        Ok(serde_json::to_string(value)?)
    }
}

pub fn emit_json_value(value: &serde_json::Value, pretty: bool) -> anyhow::Result<String> {
    emit_json(value, pretty)
}

pub fn error_json(message: &str, kind: &str) -> serde_json::Value {
    json!({
        "error": {
            "message": message,
            "kind": kind,
        }
    })
}

const MASK: &str = "********";

/// Resolved configuration with every password masked.
pub fn config_to_json(resolved: &ResolvedConfig) -> serde_json::Value {
    let profiles = resolved
        .profiles
        .keys()
        .map(|name| {
            let value = match resolved.connection(name) {
                Ok(conn) => json!({
                    "connectionId": conn.connection_id(),
                    "databaseType": conn.database_type,
                    "hostname": conn.hostname,
                    "port": conn.port,
                    "username": conn.username,
                    "password": (!conn.password.is_empty()).then_some(MASK),
                    "databaseName": conn.database_name,
                }),
                Err(err) => json!({ "error": err.to_string() }),
            };
            (name.clone(), value)
        })
        .collect::<serde_json::Map<_, _>>();

    let settings = &resolved.settings;
    json!({
        "configPath": resolved.config_path.as_ref().map(|p| p.display().to_string()),
        "profiles": profiles,
        "settings": {
            "server": { "bind": settings.server.bind },
            "engine": {
                "batchSize": settings.engine.batch_size,
                "connectTimeoutMs": settings.engine.connect_timeout_ms,
                "maxPoolSize": settings.engine.max_pool_size,
                "maxRetainedJobs": settings.engine.max_retained_jobs,
                "encrypt": settings.engine.encrypt,
                "trustCert": settings.engine.trust_cert,
            },
            "output": {
                "defaultFormat": settings.output.default_format.as_str(),
                "json": { "pretty": settings.output.json.pretty },
            }
        }
    })
}
