mod columns;
mod common;
mod compare;
mod config;
mod serve;
mod tables;

use anyhow::Result;

use crate::cli::{CliArgs, CommandKind};

pub fn dispatch(args: &CliArgs) -> Result<()> {
    match &args.command {
        CommandKind::Serve(cmd) => serve::run(args, cmd),
        CommandKind::Tables(cmd) => tables::run(args, cmd),
        CommandKind::Columns(cmd) => columns::run(args, cmd),
        CommandKind::Compare(cmd) => compare::run(args, cmd),
        CommandKind::Config(_) => config::run(args),
    }
}
