#![allow(dead_code)]

use std::env;
use std::ffi::OsStr;
use std::path::Path;

use assert_cmd::Command;
use assert_cmd::cargo::cargo_bin_cmd;
use serde_json::Value;

pub fn integration_enabled() -> bool {
    env::var("DBCOMPARE_INTEGRATION_TESTS")
        .map(|value| value == "1" || value.eq_ignore_ascii_case("true"))
        .unwrap_or(false)
}

/// Binary isolated from the caller's config, `.env` and home directory.
pub fn isolated_cmd(dir: &Path) -> Command {
    let mut cmd = cargo_bin_cmd!("dbcompare");
    cmd.current_dir(dir)
        .env("HOME", dir)
        .env("XDG_CONFIG_HOME", dir.join("xdg"))
        .env_remove("DBCOMPARE_CONFIG")
        .env_remove("DBCOMPARE_BIND")
        .env_remove("DBCOMPARE_BATCH_SIZE")
        .env_remove("RUST_LOG");
    cmd
}

pub fn run_json<I, S>(dir: &Path, args: I) -> Value
where
    I: IntoIterator<Item = S>,
    S: AsRef<OsStr>,
{
    let mut cmd = isolated_cmd(dir);
    cmd.args(args);
    let output = cmd.assert().success().get_output().stdout.clone();
    serde_json::from_slice(&output).expect("json")
}
