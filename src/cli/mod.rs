mod args;

pub use args::{
    CliArgs, ColumnsArgs, CommandKind, CompareArgs, ConfigArgs, Endpoint, OutputFlags, ServeArgs,
    TablesArgs, build_cli, try_parse_from,
};

pub fn parse() -> CliArgs {
    args::parse_args()
}
