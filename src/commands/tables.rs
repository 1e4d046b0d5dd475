use anyhow::Result;
use serde_json::json;

use crate::cli::{CliArgs, TablesArgs};
use crate::commands::common;
use crate::config::OutputFormat;
use crate::db::schema;
use crate::output::{TableOptions, json as json_out, table};

pub fn run(args: &CliArgs, cmd: &TablesArgs) -> Result<()> {
    let resolved = common::load_config(args)?;
    let format = common::output_format(args, &resolved);

    let (connection_id, tables) = common::runtime()?.block_on(async {
        let manager = common::manager(&resolved);
        let handle = common::connect(&manager, &resolved, &cmd.endpoint).await?;
        let id = handle.id().to_string();
        let tables = schema::list_tables(&handle).await;
        manager.release(handle);
        Ok::<_, anyhow::Error>((id, tables?))
    })?;

    if args.quiet {
        return Ok(());
    }

    if matches!(format, OutputFormat::Json) {
        let payload = json!({
            "connectionId": connection_id,
            "count": tables.len(),
            "tables": tables,
        });
        println!(
            "{}",
            json_out::emit_json_value(&payload, common::json_pretty(&resolved))?
        );
        return Ok(());
    }

    if tables.is_empty() {
        println!("No tables found.");
        return Ok(());
    }
    let rows = tables.into_iter().map(|name| vec![name]).collect::<Vec<_>>();
    println!(
        "{}",
        table::render_list_table(&["table"], &rows, format, &TableOptions::default())
    );
    Ok(())
}
