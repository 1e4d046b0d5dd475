use std::io::{self, IsTerminal, Write};
use std::process::ExitCode;

use dbcompare::cli::{self, CliArgs};
use dbcompare::commands;
use dbcompare::error::{self, ErrorKind};
use dbcompare::output::json;
use owo_colors::OwoColorize;

fn main() -> ExitCode {
    let args = cli::parse();
    init_logging(args.verbose, args.quiet);

    match commands::dispatch(&args) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            let kind = error::classify_error(&err);
            tracing::debug!(kind = kind.as_str(), error = ?err, "command failed");
            report_error(&args, &err.to_string(), kind);
            ExitCode::FAILURE
        }
    }
}

fn init_logging(verbose: u8, quiet: bool) {
    let filter = match (verbose, quiet) {
        (0, true) => "error",
        (0, false) => "warn,sqlx=error,tiberius=error",
        (1, _) => "info,sqlx=warn",
        (2, _) => "debug",
        _ => "trace",
    };
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(filter));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_writer(io::stderr)
        .try_init();
}

fn report_error(args: &CliArgs, message: &str, kind: ErrorKind) {
    let mut stderr = io::stderr();
    if args.output.json {
        let payload = json::error_json(message, kind.as_str());
        if let Ok(body) = json::emit_json_value(&payload, true) {
            let _ = writeln!(stderr, "{}", body);
        }
        return;
    }

    let line = format!("Error: {}", message);
    if color_stderr() {
        let _ = writeln!(stderr, "{}", line.red());
    } else {
        let _ = writeln!(stderr, "{}", line);
    }
}

fn color_stderr() -> bool {
    std::env::var_os("NO_COLOR").is_none() && io::stderr().is_terminal()
}
