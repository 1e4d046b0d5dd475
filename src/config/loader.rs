use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result, anyhow};

use super::env::{Env, parse_bool};
use super::schema::{ConfigFile, EngineSettings, OutputFormat, OutputSettings, Profile, Settings};
use crate::db::connection::{DatabaseConnection, DatabaseType};
use crate::db::driver::SessionSettings;

#[derive(Debug, Clone, Default)]
pub struct CliOverrides {
    pub config_path: Option<PathBuf>,
    pub env_file: Option<PathBuf>,
    pub bind: Option<String>,
    pub batch_size: Option<usize>,
}

#[derive(Debug, Clone)]
pub struct LoadOptions {
    pub cli: CliOverrides,
    pub cwd: PathBuf,
    pub home_dir: Option<PathBuf>,
    pub xdg_config_dir: Option<PathBuf>,
}

#[derive(Debug, Clone)]
pub struct ResolvedConfig {
    pub config_path: Option<PathBuf>,
    /// Profiles with `passwordEnv` already resolved into `password`.
    pub profiles: BTreeMap<String, Profile>,
    pub settings: SettingsResolved,
}

impl ResolvedConfig {
    /// Builds the connection for a named profile.
    pub fn connection(&self, name: &str) -> Result<DatabaseConnection> {
        let profile = self.profiles.get(name).ok_or_else(|| {
            let known = self.profiles.keys().cloned().collect::<Vec<_>>();
            if known.is_empty() {
                anyhow!("Profile '{}' not found (no profiles configured)", name)
            } else {
                anyhow!("Profile '{}' not found (known: {})", name, known.join(", "))
            }
        })?;
        profile_connection(name, profile)
    }
}

fn profile_connection(name: &str, profile: &Profile) -> Result<DatabaseConnection> {
    let mut connection = match &profile.url {
        Some(url) => DatabaseConnection::from_url(url)
            .with_context(|| format!("Profile '{}' has an invalid url", name))?,
        None => {
            let database_type = profile
                .database_type
                .as_deref()
                .ok_or_else(|| anyhow!("Profile '{}' is missing databaseType", name))?;
            let kind = DatabaseType::parse(database_type)?;
            DatabaseConnection {
                hostname: profile
                    .hostname
                    .clone()
                    .unwrap_or_else(|| "localhost".to_string()),
                port: profile.port.unwrap_or_else(|| kind.default_port()),
                username: profile.username.clone().unwrap_or_default(),
                password: String::new(),
                database_type: kind.as_str().to_string(),
                database_name: profile
                    .database_name
                    .clone()
                    .ok_or_else(|| anyhow!("Profile '{}' is missing databaseName", name))?,
            }
        }
    };
    if let Some(password) = &profile.password {
        connection.password = password.clone();
    }
    Ok(connection)
}

#[derive(Debug, Clone)]
pub struct SettingsResolved {
    pub server: ServerSettingsResolved,
    pub engine: EngineSettingsResolved,
    pub output: OutputSettingsResolved,
}

#[derive(Debug, Clone)]
pub struct ServerSettingsResolved {
    pub bind: String,
}

#[derive(Debug, Clone)]
pub struct EngineSettingsResolved {
    pub batch_size: usize,
    pub connect_timeout_ms: u64,
    pub max_pool_size: u32,
    /// Finished background jobs kept for result retrieval.
    pub max_retained_jobs: usize,
    pub encrypt: bool,
    pub trust_cert: bool,
}

impl EngineSettingsResolved {
    pub fn session_settings(&self) -> SessionSettings {
        SessionSettings {
            connect_timeout: Duration::from_millis(self.connect_timeout_ms),
            max_pool_size: self.max_pool_size.max(1),
            encrypt: self.encrypt,
            trust_cert: self.trust_cert,
        }
    }
}

#[derive(Debug, Clone)]
pub struct OutputSettingsResolved {
    pub default_format: OutputFormat,
    pub json: JsonSettingsResolved,
}

#[derive(Debug, Clone)]
pub struct JsonSettingsResolved {
    pub pretty: bool,
}

impl Default for SettingsResolved {
    fn default() -> Self {
        Self {
            server: ServerSettingsResolved {
                bind: "127.0.0.1:8080".to_string(),
            },
            engine: EngineSettingsResolved {
                batch_size: 1000,
                connect_timeout_ms: 10_000,
                max_pool_size: 5,
                max_retained_jobs: 100,
                encrypt: true,
                trust_cert: true,
            },
            output: OutputSettingsResolved {
                default_format: OutputFormat::Pretty,
                json: JsonSettingsResolved { pretty: true },
            },
        }
    }
}

pub fn load_config(options: &LoadOptions, env: &Env) -> Result<ResolvedConfig> {
    let config_path = resolve_config_path(options, env)?;
    let config_file = match &config_path {
        Some(path) => load_config_file(path)?,
        None => ConfigFile::default(),
    };

    let mut settings = SettingsResolved::default();
    if let Some(settings_cfg) = &config_file.settings {
        apply_settings(&mut settings, settings_cfg);
    }
    apply_env_overrides(&mut settings, env);
    apply_cli_overrides(&mut settings, &options.cli);

    let profiles = config_file
        .profiles
        .into_iter()
        .map(|(name, mut profile)| {
            if profile.password.is_none() {
                if let Some(key) = &profile.password_env {
                    profile.password = env.get(key);
                }
            }
            (name, profile)
        })
        .collect();

    Ok(ResolvedConfig {
        config_path,
        profiles,
        settings,
    })
}

fn resolve_config_path(options: &LoadOptions, env: &Env) -> Result<Option<PathBuf>> {
    if let Some(path) = &options.cli.config_path {
        if !path.exists() {
            return Err(anyhow!("Config file not found: {}", path.display()));
        }
        return Ok(Some(path.clone()));
    }

    if let Some(path) = env.get("DBCOMPARE_CONFIG") {
        let path = PathBuf::from(path);
        if !path.exists() {
            return Err(anyhow!("Config file not found: {}", path.display()));
        }
        return Ok(Some(path));
    }

    if let Some(path) = find_local_config(&options.cwd, options.home_dir.as_deref()) {
        return Ok(Some(path));
    }

    Ok(find_global_config(options.xdg_config_dir.as_deref()))
}

const CONFIG_NAMES: [&str; 3] = ["config.yaml", "config.yml", "config.json"];

fn find_local_config(start: &Path, home: Option<&Path>) -> Option<PathBuf> {
    for dir in start.ancestors() {
        for name in &CONFIG_NAMES {
            let path = dir.join(".dbcompare").join(name);
            if path.is_file() {
                return Some(path);
            }
        }

        if home.is_some_and(|home_dir| dir == home_dir) {
            break;
        }
    }

    None
}

fn find_global_config(xdg_config: Option<&Path>) -> Option<PathBuf> {
    let base = xdg_config?.join("dbcompare");
    CONFIG_NAMES
        .iter()
        .map(|name| base.join(name))
        .find(|path| path.is_file())
}

fn load_config_file(path: &Path) -> Result<ConfigFile> {
    let content = fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    match path.extension().and_then(|ext| ext.to_str()) {
        Some("yaml") | Some("yml") => {
            serde_yaml::from_str(&content).context("Failed to parse YAML config")
        }
        Some("json") => serde_json::from_str(&content).context("Failed to parse JSON config"),
        _ => Err(anyhow!("Unsupported config file extension")),
    }
}

fn apply_settings(settings: &mut SettingsResolved, overrides: &Settings) {
    if let Some(bind) = overrides.server.as_ref().and_then(|s| s.bind.clone()) {
        settings.server.bind = bind;
    }
    if let Some(engine) = &overrides.engine {
        apply_engine_settings(&mut settings.engine, engine);
    }
    if let Some(output) = &overrides.output {
        apply_output_settings(&mut settings.output, output);
    }
}

fn apply_engine_settings(settings: &mut EngineSettingsResolved, overrides: &EngineSettings) {
    if let Some(batch_size) = overrides.batch_size {
        settings.batch_size = batch_size;
    }
    if let Some(timeout) = overrides.connect_timeout_ms {
        settings.connect_timeout_ms = timeout;
    }
    if let Some(pool) = overrides.max_pool_size {
        settings.max_pool_size = pool;
    }
    if let Some(retained) = overrides.max_retained_jobs {
        settings.max_retained_jobs = retained;
    }
    if let Some(encrypt) = overrides.encrypt {
        settings.encrypt = encrypt;
    }
    if let Some(trust_cert) = overrides.trust_cert {
        settings.trust_cert = trust_cert;
    }
}

fn apply_output_settings(settings: &mut OutputSettingsResolved, overrides: &OutputSettings) {
    if let Some(default_format) = overrides.default_format {
        settings.default_format = default_format;
    }
    if let Some(pretty) = overrides.json.as_ref().and_then(|json| json.pretty) {
        settings.json.pretty = pretty;
    }
}

fn apply_env_overrides(settings: &mut SettingsResolved, env: &Env) {
    if let Some(bind) = env.get("DBCOMPARE_BIND") {
        settings.server.bind = bind;
    }
    if let Some(batch_size) = env.get_parsed("DBCOMPARE_BATCH_SIZE") {
        settings.engine.batch_size = batch_size;
    }
    if let Some(timeout) = env.get_parsed("DBCOMPARE_CONNECT_TIMEOUT_MS") {
        settings.engine.connect_timeout_ms = timeout;
    }
    if let Some(pool) = env.get_parsed("DBCOMPARE_MAX_POOL_SIZE") {
        settings.engine.max_pool_size = pool;
    }
    if let Some(retained) = env.get_parsed("DBCOMPARE_MAX_RETAINED_JOBS") {
        settings.engine.max_retained_jobs = retained;
    }
    if let Some(encrypt) = env.get("DBCOMPARE_ENCRYPT").and_then(|v| parse_bool(&v)) {
        settings.engine.encrypt = encrypt;
    }
    if let Some(trust_cert) = env.get("DBCOMPARE_TRUST_CERT").and_then(|v| parse_bool(&v)) {
        settings.engine.trust_cert = trust_cert;
    }
}

fn apply_cli_overrides(settings: &mut SettingsResolved, cli: &CliOverrides) {
    if let Some(bind) = &cli.bind {
        settings.server.bind = bind.clone();
    }
    if let Some(batch_size) = cli.batch_size {
        settings.engine.batch_size = batch_size;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn options_for(dir: &Path, config_path: Option<PathBuf>) -> LoadOptions {
        LoadOptions {
            cli: CliOverrides {
                config_path,
                ..CliOverrides::default()
            },
            cwd: dir.to_path_buf(),
            home_dir: None,
            xdg_config_dir: None,
        }
    }

    const CONFIG: &str = "\
profiles:
  legacy:
    databaseType: mysql
    hostname: db1
    username: app
    passwordEnv: LEGACY_PASS
    databaseName: shop
  warehouse:
    url: postgres://etl:pw@wh:6543/dw
settings:
  engine:
    batchSize: 250
";

    #[test]
    fn loads_profiles_from_cli_path() {
        let dir = tempfile::tempdir().expect("tempdir");
        let config_path = dir.path().join("config.yaml");
        fs::write(&config_path, CONFIG).expect("write config");

        let env = Env::from_pairs(&[("LEGACY_PASS", "secret")]);
        let resolved =
            load_config(&options_for(dir.path(), Some(config_path)), &env).expect("load");

        let legacy = resolved.connection("legacy").expect("legacy");
        assert_eq!(legacy.port, 3306);
        assert_eq!(legacy.password, "secret");
        assert_eq!(legacy.connection_id(), "mysql:app@db1:3306/shop");

        let warehouse = resolved.connection("warehouse").expect("warehouse");
        assert_eq!(warehouse.database_type, "postgresql");
        assert_eq!(warehouse.port, 6543);
        assert_eq!(resolved.settings.engine.batch_size, 250);
    }

    #[test]
    fn unknown_profile_lists_known_names() {
        let dir = tempfile::tempdir().expect("tempdir");
        let config_path = dir.path().join("config.yaml");
        fs::write(&config_path, CONFIG).expect("write config");
        let resolved = load_config(&options_for(dir.path(), Some(config_path)), &Env::default())
            .expect("load");
        let err = resolved.connection("nope").expect_err("missing");
        assert!(err.to_string().contains("legacy, warehouse"));
    }

    #[test]
    fn discovers_local_config_walking_up() {
        let dir = tempfile::tempdir().expect("tempdir");
        let config_dir = dir.path().join(".dbcompare");
        fs::create_dir_all(&config_dir).expect("mkdir");
        fs::write(config_dir.join("config.yml"), CONFIG).expect("write config");
        let nested = dir.path().join("a").join("b");
        fs::create_dir_all(&nested).expect("mkdir nested");

        let resolved = load_config(&options_for(&nested, None), &Env::default()).expect("load");
        assert_eq!(
            resolved.config_path.as_deref(),
            Some(config_dir.join("config.yml").as_path())
        );
    }

    #[test]
    fn job_retention_comes_from_engine_settings() {
        let dir = tempfile::tempdir().expect("tempdir");
        let config_path = dir.path().join("config.json");
        fs::write(&config_path, r#"{"settings":{"engine":{"maxRetainedJobs":3}}}"#)
            .expect("write config");
        let options = options_for(dir.path(), Some(config_path));
        let resolved = load_config(&options, &Env::default()).expect("load");
        assert_eq!(resolved.settings.engine.max_retained_jobs, 3);

        let env = Env::from_pairs(&[("DBCOMPARE_MAX_RETAINED_JOBS", "12")]);
        let resolved = load_config(&options, &env).expect("load");
        assert_eq!(resolved.settings.engine.max_retained_jobs, 12);
        assert_eq!(SettingsResolved::default().engine.max_retained_jobs, 100);
    }

    #[test]
    fn env_then_cli_override_file() {
        let dir = tempfile::tempdir().expect("tempdir");
        let config_path = dir.path().join("config.json");
        fs::write(
            &config_path,
            r#"{"settings":{"server":{"bind":"0.0.0.0:9000"},"engine":{"batchSize":10}}}"#,
        )
        .expect("write config");

        let env = Env::from_pairs(&[
            ("DBCOMPARE_BIND", "127.0.0.1:7000"),
            ("DBCOMPARE_BATCH_SIZE", "20"),
            ("DBCOMPARE_MAX_POOL_SIZE", "9"),
        ]);
        let mut options = options_for(dir.path(), Some(config_path));
        options.cli.batch_size = Some(30);
        let resolved = load_config(&options, &env).expect("load");

        assert_eq!(resolved.settings.server.bind, "127.0.0.1:7000");
        assert_eq!(resolved.settings.engine.batch_size, 30);
        assert_eq!(resolved.settings.engine.session_settings().max_pool_size, 9);
    }

    #[test]
    fn defaults_without_config() {
        let dir = tempfile::tempdir().expect("tempdir");
        let resolved = load_config(&options_for(dir.path(), None), &Env::default()).expect("load");
        assert!(resolved.config_path.is_none());
        assert!(resolved.profiles.is_empty());
        assert_eq!(resolved.settings.server.bind, "127.0.0.1:8080");
        assert_eq!(resolved.settings.engine.connect_timeout_ms, 10_000);
    }

    #[test]
    fn missing_explicit_config_is_an_error() {
        let dir = tempfile::tempdir().expect("tempdir");
        let missing = dir.path().join("nope.yaml");
        let err = load_config(&options_for(dir.path(), Some(missing)), &Env::default())
            .expect_err("missing");
        assert!(err.to_string().contains("Config file not found"));
    }
}
