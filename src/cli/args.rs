use std::path::PathBuf;

use clap::{Arg, ArgAction, ArgGroup, ArgMatches, Command, ValueHint};

#[derive(Debug, Clone)]
pub struct OutputFlags {
    pub json: bool,
    pub markdown: bool,
    pub pretty: bool,
}

#[derive(Debug, Clone)]
pub struct CliArgs {
    pub config_path: Option<PathBuf>,
    pub env_file: Option<PathBuf>,
    pub output: OutputFlags,
    pub verbose: u8,
    pub quiet: bool,
    pub command: CommandKind,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CommandKind {
    Serve(ServeArgs),
    Tables(TablesArgs),
    Columns(ColumnsArgs),
    Compare(CompareArgs),
    Config(ConfigArgs),
}

/// A database named by config profile or by URL.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Endpoint {
    Profile(String),
    Url(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServeArgs {
    pub bind: Option<String>,
    pub batch_size: Option<usize>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TablesArgs {
    pub endpoint: Endpoint,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ColumnsArgs {
    pub endpoint: Endpoint,
    pub table: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompareArgs {
    pub source: Endpoint,
    pub target: Endpoint,
    pub source_table: String,
    pub target_table: String,
    pub mappings: Vec<String>,
    pub keys: Vec<String>,
    pub skip: Vec<String>,
    pub algorithm: Option<String>,
    pub threshold: Option<i64>,
    pub format: Option<String>,
    pub output_path: Option<PathBuf>,
    pub only_differences: bool,
    pub status: Option<String>,
    pub search: Option<String>,
    pub limit: Option<u64>,
    pub offset: Option<u64>,
    pub batch_size: Option<usize>,
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ConfigArgs;

pub fn build_cli() -> Command {
    let mut cmd = Command::new("dbcompare")
        .about("Row-level comparison of tables across MySQL, PostgreSQL and SQL Server")
        .version(env!("CARGO_PKG_VERSION"))
        .arg_required_else_help(true)
        .subcommand_required(true)
        .subcommand_value_name("COMMAND");

    cmd = add_global_args(cmd);

    cmd = cmd.subcommand(command_serve());
    cmd = cmd.subcommand(command_tables());
    cmd = cmd.subcommand(command_columns());
    cmd = cmd.subcommand(command_compare());
    cmd = cmd.subcommand(command_config());

    cmd
}

pub fn parse_args() -> CliArgs {
    let matches = build_cli().get_matches();
    parse_matches(&matches)
}

pub fn try_parse_from<I, T>(args: I) -> Result<CliArgs, clap::Error>
where
    I: IntoIterator<Item = T>,
    T: Into<std::ffi::OsString> + Clone,
{
    let matches = build_cli().try_get_matches_from(args)?;
    Ok(parse_matches(&matches))
}

fn add_global_args(cmd: Command) -> Command {
    cmd.arg(
        Arg::new("config")
            .long("config")
            .value_name("PATH")
            .value_hint(ValueHint::FilePath)
            .global(true)
            .help("Override config file location"),
    )
    .arg(
        Arg::new("env-file")
            .long("env-file")
            .value_name("PATH")
            .value_hint(ValueHint::FilePath)
            .global(true)
            .help("Load environment variables from file (default: .env)"),
    )
    .arg(
        Arg::new("json")
            .long("json")
            .action(ArgAction::SetTrue)
            .global(true)
            .help("Output as JSON"),
    )
    .arg(
        Arg::new("markdown")
            .long("markdown")
            .action(ArgAction::SetTrue)
            .global(true)
            .help("Force markdown table output"),
    )
    .arg(
        Arg::new("pretty")
            .long("pretty")
            .action(ArgAction::SetTrue)
            .global(true)
            .help("Force pretty-printed table output"),
    )
    .arg(
        Arg::new("verbose")
            .short('v')
            .long("verbose")
            .action(ArgAction::Count)
            .global(true)
            .help("Increase log verbosity (-v info, -vv debug, -vvv trace)"),
    )
    .arg(
        Arg::new("quiet")
            .short('q')
            .long("quiet")
            .action(ArgAction::SetTrue)
            .global(true)
            .help("Suppress non-error output"),
    )
}

fn command_core(
    name: &'static str,
    about: &'static str,
    aliases: &'static [&'static str],
) -> Command {
    let mut cmd = Command::new(name).about(about);
    for alias in aliases {
        cmd = cmd.visible_alias(*alias);
    }
    cmd
}

/// `--{profile}` / `--{url}`, exactly one required.
fn endpoint_args(
    cmd: Command,
    id: &'static str,
    profile: &'static str,
    url: &'static str,
    side: &str,
) -> Command {
    let subject = if side.is_empty() {
        "the database".to_string()
    } else {
        format!("the {} database", side)
    };
    cmd.arg(
        Arg::new(profile)
            .long(profile)
            .value_name("NAME")
            .help(format!("Config profile for {}", subject)),
    )
    .arg(
        Arg::new(url)
            .long(url)
            .value_name("URL")
            .help(format!(
                "Connection URL for {} (postgres://, mysql://, sqlserver://)",
                subject
            )),
    )
    .group(ArgGroup::new(id).args([profile, url]).required(true))
}

fn batch_size_arg() -> Arg {
    Arg::new("batch-size")
        .long("batch-size")
        .value_name("ROWS")
        .value_parser(clap::value_parser!(usize))
        .help("Rows fetched per chunk")
}

fn command_serve() -> Command {
    command_core("serve", "Run the HTTP API", &["server"])
        .arg(
            Arg::new("bind")
                .long("bind")
                .value_name("ADDR")
                .help("Listen address (default: 127.0.0.1:8080)"),
        )
        .arg(batch_size_arg())
}

fn command_tables() -> Command {
    endpoint_args(
        command_core("tables", "List tables in catalog order", &[]),
        "endpoint",
        "profile",
        "url",
        "",
    )
}

fn command_columns() -> Command {
    endpoint_args(
        command_core("columns", "List a table's columns with declared types", &["cols"]),
        "endpoint",
        "profile",
        "url",
        "",
    )
    .arg(
        Arg::new("table")
            .long("table")
            .value_name("NAME")
            .required(true)
            .help("Table name, optionally schema-qualified"),
    )
}

fn command_compare() -> Command {
    let cmd = command_core("compare", "Compare two tables row by row", &["diff"]);
    let cmd = endpoint_args(cmd, "source-endpoint", "source", "source-url", "source");
    let cmd = endpoint_args(cmd, "target-endpoint", "target", "target-url", "target");
    cmd.arg(
        Arg::new("source-table")
            .long("source-table")
            .value_name("NAME")
            .required(true),
    )
    .arg(
        Arg::new("target-table")
            .long("target-table")
            .value_name("NAME")
            .required(true),
    )
    .arg(
        Arg::new("map")
            .long("map")
            .value_name("SRC[=TGT]")
            .action(ArgAction::Append)
            .value_delimiter(',')
            .required(true)
            .help("Column mapping; repeat or comma-separate, in display order"),
    )
    .arg(
        Arg::new("key")
            .long("key")
            .value_name("COL")
            .action(ArgAction::Append)
            .value_delimiter(',')
            .help("Source key column(s) for a merge join; omit to pair rows by position"),
    )
    .arg(
        Arg::new("skip")
            .long("skip")
            .value_name("COL")
            .action(ArgAction::Append)
            .value_delimiter(',')
            .help("Mapped source column(s) excluded from value comparison"),
    )
    .arg(
        Arg::new("algorithm")
            .long("algorithm")
            .value_name("NAME")
            .value_parser(["exact", "fuzzy"])
            .help("Value comparison (default: exact)"),
    )
    .arg(
        Arg::new("threshold")
            .long("threshold")
            .value_name("0-100")
            .value_parser(clap::value_parser!(i64).range(0..=100))
            .help("Fuzzy similarity threshold in percent (default: 80)"),
    )
    .arg(
        Arg::new("format")
            .long("format")
            .value_name("FORMAT")
            .value_parser(["json", "csv", "excel"])
            .help("Export format for --output (default: json)"),
    )
    .arg(
        Arg::new("output")
            .long("output")
            .short('o')
            .value_name("PATH")
            .value_hint(ValueHint::FilePath)
            .help("Write the full export to a file"),
    )
    .arg(
        Arg::new("only-differences")
            .long("only-differences")
            .action(ArgAction::SetTrue)
            .help("Leave matched rows out of the results"),
    )
    .arg(
        Arg::new("status")
            .long("status")
            .value_name("STATUS")
            .value_parser(["matched", "mismatched", "missing_source", "missing_target"])
            .help("Only display results with this status"),
    )
    .arg(
        Arg::new("search")
            .long("search")
            .value_name("TEXT")
            .help("Only display results whose key, columns or values contain TEXT"),
    )
    .arg(
        Arg::new("limit")
            .long("limit")
            .value_name("n")
            .value_parser(clap::value_parser!(u64))
            .help("Results displayed (default: 50, max: 500)"),
    )
    .arg(
        Arg::new("offset")
            .long("offset")
            .value_name("n")
            .value_parser(clap::value_parser!(u64)),
    )
    .arg(batch_size_arg())
}

fn command_config() -> Command {
    command_core("config", "Show resolved configuration", &[])
}

fn endpoint(matches: &ArgMatches, profile: &str, url: &str) -> Endpoint {
    match matches.get_one::<String>(url) {
        Some(url) => Endpoint::Url(url.clone()),
        None => Endpoint::Profile(
            matches
                .get_one::<String>(profile)
                .cloned()
                .unwrap_or_default(),
        ),
    }
}

fn many(matches: &ArgMatches, id: &str) -> Vec<String> {
    matches
        .get_many::<String>(id)
        .map(|values| {
            values
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
                .collect()
        })
        .unwrap_or_default()
}

fn parse_matches(matches: &ArgMatches) -> CliArgs {
    let config_path = matches.get_one::<String>("config").map(PathBuf::from);
    let env_file = matches.get_one::<String>("env-file").map(PathBuf::from);
    let output = OutputFlags {
        json: matches.get_flag("json"),
        markdown: matches.get_flag("markdown"),
        pretty: matches.get_flag("pretty"),
    };
    let verbose = matches.get_count("verbose");
    let quiet = matches.get_flag("quiet");

    let command = match matches.subcommand() {
        Some(("serve", sub_m)) => CommandKind::Serve(ServeArgs {
            bind: sub_m.get_one::<String>("bind").cloned(),
            batch_size: sub_m.get_one::<usize>("batch-size").copied(),
        }),
        Some(("tables", sub_m)) => CommandKind::Tables(TablesArgs {
            endpoint: endpoint(sub_m, "profile", "url"),
        }),
        Some(("columns", sub_m)) => CommandKind::Columns(ColumnsArgs {
            endpoint: endpoint(sub_m, "profile", "url"),
            table: sub_m
                .get_one::<String>("table")
                .cloned()
                .unwrap_or_default(),
        }),
        Some(("compare", sub_m)) => CommandKind::Compare(CompareArgs {
            source: endpoint(sub_m, "source", "source-url"),
            target: endpoint(sub_m, "target", "target-url"),
            source_table: sub_m
                .get_one::<String>("source-table")
                .cloned()
                .unwrap_or_default(),
            target_table: sub_m
                .get_one::<String>("target-table")
                .cloned()
                .unwrap_or_default(),
            mappings: many(sub_m, "map"),
            keys: many(sub_m, "key"),
            skip: many(sub_m, "skip"),
            algorithm: sub_m.get_one::<String>("algorithm").cloned(),
            threshold: sub_m.get_one::<i64>("threshold").copied(),
            format: sub_m.get_one::<String>("format").cloned(),
            output_path: sub_m.get_one::<String>("output").map(PathBuf::from),
            only_differences: sub_m.get_flag("only-differences"),
            status: sub_m.get_one::<String>("status").cloned(),
            search: sub_m.get_one::<String>("search").cloned(),
            limit: sub_m.get_one::<u64>("limit").copied(),
            offset: sub_m.get_one::<u64>("offset").copied(),
            batch_size: sub_m.get_one::<usize>("batch-size").copied(),
        }),
        _ => CommandKind::Config(ConfigArgs),
    };

    CliArgs {
        config_path,
        env_file,
        output,
        verbose,
        quiet,
        command,
    }
}
