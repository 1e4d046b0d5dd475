use anyhow::Result;
use serde_json::json;

use crate::cli::{CliArgs, ColumnsArgs};
use crate::commands::common;
use crate::config::OutputFormat;
use crate::db::schema;
use crate::output::{TableOptions, json as json_out, table};

pub fn run(args: &CliArgs, cmd: &ColumnsArgs) -> Result<()> {
    let resolved = common::load_config(args)?;
    let format = common::output_format(args, &resolved);

    let columns = common::runtime()?.block_on(async {
        let manager = common::manager(&resolved);
        let handle = common::connect(&manager, &resolved, &cmd.endpoint).await?;
        let columns = schema::list_columns(&handle, &cmd.table).await;
        manager.release(handle);
        Ok::<_, anyhow::Error>(columns?)
    })?;

    if args.quiet {
        return Ok(());
    }

    if matches!(format, OutputFormat::Json) {
        let payload = json!({
            "table": cmd.table,
            "columns": columns,
        });
        println!(
            "{}",
            json_out::emit_json_value(&payload, common::json_pretty(&resolved))?
        );
        return Ok(());
    }

    let rows = columns
        .iter()
        .enumerate()
        .map(|(idx, column)| {
            vec![
                (idx + 1).to_string(),
                column.name.clone(),
                column.data_type.clone(),
            ]
        })
        .collect::<Vec<_>>();
    println!(
        "{}",
        table::render_list_table(&["#", "column", "type"], &rows, format, &TableOptions::default())
    );
    Ok(())
}
