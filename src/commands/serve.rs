use std::sync::Arc;

use anyhow::Result;
use tracing::info;

use crate::cli::{CliArgs, ServeArgs};
use crate::commands::common;
use crate::server::{self, AppState};

pub fn run(args: &CliArgs, cmd: &ServeArgs) -> Result<()> {
    let resolved = common::load_config_with(args, cmd.bind.clone(), cmd.batch_size)?;
    let bind = resolved.settings.server.bind.clone();
    let engine = resolved.settings.engine.clone();

    info!(
        bind = %bind,
        batch_size = engine.batch_size,
        max_pool_size = engine.max_pool_size,
        "starting server"
    );
    if !args.quiet {
        eprintln!("dbcompare listening on http://{}", bind);
    }

    common::runtime()?.block_on(async {
        let state = Arc::new(AppState::new(common::manager(&resolved), engine));
        server::serve(&bind, state).await
    })
}
