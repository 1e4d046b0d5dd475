use std::io::{self, Write};

use anyhow::Result;

use crate::cli::CliArgs;
use crate::commands::common;
use crate::config;
use crate::output::{self, TableOptions, json, table};

pub fn run(args: &CliArgs) -> Result<()> {
    let resolved = common::load_config(args)?;
    let format = output::select_format(&args.output, &resolved.settings);

    if args.quiet {
        return Ok(());
    }

    if matches!(format, config::OutputFormat::Json) {
        let payload = json::config_to_json(&resolved);
        let body = json::emit_json_value(&payload, resolved.settings.output.json.pretty)?;
        println!("{}", body);
        return Ok(());
    }

    let settings = &resolved.settings;
    let mut rows = vec![
        (
            "configPath".to_string(),
            resolved
                .config_path
                .as_ref()
                .map(|p| p.display().to_string())
                .unwrap_or_else(|| "(none)".to_string()),
        ),
        ("bind".to_string(), settings.server.bind.clone()),
        ("batchSize".to_string(), settings.engine.batch_size.to_string()),
        (
            "connectTimeoutMs".to_string(),
            settings.engine.connect_timeout_ms.to_string(),
        ),
        (
            "maxPoolSize".to_string(),
            settings.engine.max_pool_size.to_string(),
        ),
        (
            "maxRetainedJobs".to_string(),
            settings.engine.max_retained_jobs.to_string(),
        ),
        ("encrypt".to_string(), settings.engine.encrypt.to_string()),
        ("trustCert".to_string(), settings.engine.trust_cert.to_string()),
    ];
    for name in resolved.profiles.keys() {
        let value = match resolved.connection(name) {
            Ok(conn) => conn.connection_id(),
            Err(err) => format!("invalid: {}", err),
        };
        rows.push((format!("profile.{}", name), value));
    }

    let rendered = table::render_key_value_table("Config", &rows, format, &TableOptions::default());
    writeln!(io::stdout(), "{}", rendered)?;
    Ok(())
}
