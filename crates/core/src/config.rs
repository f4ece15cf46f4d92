use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::lifecycle::LifecycleSettings;
use crate::numbering::DEFAULT_NUMBER_PREFIX;
use crate::sync::SyncSettings;

#[derive(Clone, Debug)]
pub struct AppConfig {
    pub database: DatabaseConfig,
    pub logging: LoggingConfig,
    pub numbering: NumberingConfig,
    pub lifecycle: LifecycleConfig,
    pub warehouse: WarehouseConfig,
}

#[derive(Clone, Debug)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
    pub timeout_secs: u64,
}

#[derive(Clone, Debug)]
pub struct LoggingConfig {
    pub level: String,
    pub format: LogFormat,
}

#[derive(Clone, Debug)]
pub struct NumberingConfig {
    /// Used for companies without their own prefix.
    pub default_prefix: String,
}

#[derive(Clone, Debug)]
pub struct LifecycleConfig {
    pub default_expiration_days: i64,
}

#[derive(Clone, Debug)]
pub struct WarehouseConfig {
    pub enabled: bool,
    pub base_url: Option<String>,
    pub api_token: Option<SecretString>,
    pub timeout_secs: u64,
    pub max_retries: u32,
    pub initial_backoff_ms: u64,
    pub max_backoff_ms: u64,
    pub sync_interval_secs: u64,
    pub stale_max_age_secs: u64,
    pub bulk_concurrency: usize,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogFormat {
    Compact,
    Pretty,
    Json,
}

#[derive(Clone, Debug, Default)]
pub struct ConfigOverrides {
    pub database_url: Option<String>,
    pub log_level: Option<String>,
    pub log_format: Option<LogFormat>,
    pub warehouse_enabled: Option<bool>,
    pub warehouse_base_url: Option<String>,
}

#[derive(Clone, Debug, Default)]
pub struct LoadOptions {
    pub config_path: Option<PathBuf>,
    pub require_file: bool,
    pub overrides: ConfigOverrides,
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("could not read config file `{path}`: {source}")]
    ReadFile { path: PathBuf, source: std::io::Error },
    #[error("could not parse config file `{path}`: {source}")]
    ParseFile { path: PathBuf, source: toml::de::Error },
    #[error("required config file was not found: `{0}`")]
    MissingConfigFile(PathBuf),
    #[error("environment variable interpolation failed for `{var}`")]
    MissingEnvInterpolation { var: String },
    #[error("unterminated environment interpolation expression")]
    UnterminatedInterpolation,
    #[error("invalid environment override for `{key}`: `{value}`")]
    InvalidEnvOverride { key: String, value: String },
    #[error("configuration validation failed: {0}")]
    Validation(String),
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            database: DatabaseConfig {
                url: "sqlite://offerflow.db".to_string(),
                max_connections: 5,
                timeout_secs: 30,
            },
            logging: LoggingConfig { level: "info".to_string(), format: LogFormat::Compact },
            numbering: NumberingConfig { default_prefix: DEFAULT_NUMBER_PREFIX.to_string() },
            lifecycle: LifecycleConfig {
                default_expiration_days: LifecycleSettings::default().default_expiration_days,
            },
            warehouse: WarehouseConfig {
                enabled: false,
                base_url: None,
                api_token: None,
                timeout_secs: 10,
                max_retries: 3,
                initial_backoff_ms: 200,
                max_backoff_ms: 5_000,
                sync_interval_secs: 3_600,
                stale_max_age_secs: 3_300,
                bulk_concurrency: 4,
            },
        }
    }
}

impl std::str::FromStr for LogFormat {
    type Err = ConfigError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "compact" => Ok(Self::Compact),
            "pretty" => Ok(Self::Pretty),
            "json" => Ok(Self::Json),
            other => Err(ConfigError::Validation(format!(
                "unsupported log format `{other}` (expected compact|pretty|json)"
            ))),
        }
    }
}

impl AppConfig {
    pub fn load(options: LoadOptions) -> Result<Self, ConfigError> {
        let mut config = Self::default();
        let maybe_path = resolve_config_path(options.config_path.as_deref());

        if let Some(path) = maybe_path {
            let patch = read_patch(&path)?;
            config.apply_patch(patch);
        } else if options.require_file {
            let expected = options.config_path.unwrap_or_else(|| PathBuf::from("offerflow.toml"));
            return Err(ConfigError::MissingConfigFile(expected));
        }

        config.apply_env_overrides()?;
        config.apply_overrides(options.overrides);
        config.validate()?;

        Ok(config)
    }

    pub fn lifecycle_settings(&self) -> LifecycleSettings {
        LifecycleSettings { default_expiration_days: self.lifecycle.default_expiration_days }
    }

    pub fn sync_settings(&self) -> SyncSettings {
        SyncSettings {
            bulk_concurrency: self.warehouse.bulk_concurrency,
            scheduled_max_age: Duration::from_secs(self.warehouse.stale_max_age_secs),
        }
    }

    pub fn sync_interval(&self) -> Duration {
        Duration::from_secs(self.warehouse.sync_interval_secs)
    }

    fn apply_patch(&mut self, patch: ConfigPatch) {
        if let Some(database) = patch.database {
            if let Some(url) = database.url {
                self.database.url = url;
            }
            if let Some(max_connections) = database.max_connections {
                self.database.max_connections = max_connections;
            }
            if let Some(timeout_secs) = database.timeout_secs {
                self.database.timeout_secs = timeout_secs;
            }
        }

        if let Some(logging) = patch.logging {
            if let Some(level) = logging.level {
                self.logging.level = level;
            }
            if let Some(format) = logging.format {
                self.logging.format = format;
            }
        }

        if let Some(numbering) = patch.numbering {
            if let Some(default_prefix) = numbering.default_prefix {
                self.numbering.default_prefix = default_prefix;
            }
        }

        if let Some(lifecycle) = patch.lifecycle {
            if let Some(days) = lifecycle.default_expiration_days {
                self.lifecycle.default_expiration_days = days;
            }
        }

        if let Some(warehouse) = patch.warehouse {
            if let Some(enabled) = warehouse.enabled {
                self.warehouse.enabled = enabled;
            }
            if let Some(base_url) = warehouse.base_url {
                self.warehouse.base_url = Some(base_url);
            }
            if let Some(api_token) = warehouse.api_token {
                self.warehouse.api_token = Some(api_token.into());
            }
            if let Some(timeout_secs) = warehouse.timeout_secs {
                self.warehouse.timeout_secs = timeout_secs;
            }
            if let Some(max_retries) = warehouse.max_retries {
                self.warehouse.max_retries = max_retries;
            }
            if let Some(initial_backoff_ms) = warehouse.initial_backoff_ms {
                self.warehouse.initial_backoff_ms = initial_backoff_ms;
            }
            if let Some(max_backoff_ms) = warehouse.max_backoff_ms {
                self.warehouse.max_backoff_ms = max_backoff_ms;
            }
            if let Some(sync_interval_secs) = warehouse.sync_interval_secs {
                self.warehouse.sync_interval_secs = sync_interval_secs;
            }
            if let Some(stale_max_age_secs) = warehouse.stale_max_age_secs {
                self.warehouse.stale_max_age_secs = stale_max_age_secs;
            }
            if let Some(bulk_concurrency) = warehouse.bulk_concurrency {
                self.warehouse.bulk_concurrency = bulk_concurrency;
            }
        }
    }

    fn apply_env_overrides(&mut self) -> Result<(), ConfigError> {
        if let Some(value) = read_env("OFFERFLOW_DATABASE_URL") {
            self.database.url = value;
        }
        if let Some(value) = read_env("OFFERFLOW_DATABASE_MAX_CONNECTIONS") {
            self.database.max_connections =
                parse_u32("OFFERFLOW_DATABASE_MAX_CONNECTIONS", &value)?;
        }
        if let Some(value) = read_env("OFFERFLOW_DATABASE_TIMEOUT_SECS") {
            self.database.timeout_secs = parse_u64("OFFERFLOW_DATABASE_TIMEOUT_SECS", &value)?;
        }

        let log_level =
            read_env("OFFERFLOW_LOGGING_LEVEL").or_else(|| read_env("OFFERFLOW_LOG_LEVEL"));
        if let Some(value) = log_level {
            self.logging.level = value;
        }
        let log_format =
            read_env("OFFERFLOW_LOGGING_FORMAT").or_else(|| read_env("OFFERFLOW_LOG_FORMAT"));
        if let Some(value) = log_format {
            self.logging.format = value.parse()?;
        }

        if let Some(value) = read_env("OFFERFLOW_NUMBERING_DEFAULT_PREFIX") {
            self.numbering.default_prefix = value;
        }
        if let Some(value) = read_env("OFFERFLOW_LIFECYCLE_DEFAULT_EXPIRATION_DAYS") {
            self.lifecycle.default_expiration_days =
                parse_i64("OFFERFLOW_LIFECYCLE_DEFAULT_EXPIRATION_DAYS", &value)?;
        }

        if let Some(value) = read_env("OFFERFLOW_WAREHOUSE_ENABLED") {
            self.warehouse.enabled = parse_bool("OFFERFLOW_WAREHOUSE_ENABLED", &value)?;
        }
        if let Some(value) = read_env("OFFERFLOW_WAREHOUSE_BASE_URL") {
            self.warehouse.base_url = Some(value);
        }
        if let Some(value) = read_env("OFFERFLOW_WAREHOUSE_API_TOKEN") {
            self.warehouse.api_token = Some(value.into());
        }
        if let Some(value) = read_env("OFFERFLOW_WAREHOUSE_TIMEOUT_SECS") {
            self.warehouse.timeout_secs = parse_u64("OFFERFLOW_WAREHOUSE_TIMEOUT_SECS", &value)?;
        }
        if let Some(value) = read_env("OFFERFLOW_WAREHOUSE_MAX_RETRIES") {
            self.warehouse.max_retries = parse_u32("OFFERFLOW_WAREHOUSE_MAX_RETRIES", &value)?;
        }
        if let Some(value) = read_env("OFFERFLOW_WAREHOUSE_SYNC_INTERVAL_SECS") {
            self.warehouse.sync_interval_secs =
                parse_u64("OFFERFLOW_WAREHOUSE_SYNC_INTERVAL_SECS", &value)?;
        }
        if let Some(value) = read_env("OFFERFLOW_WAREHOUSE_STALE_MAX_AGE_SECS") {
            self.warehouse.stale_max_age_secs =
                parse_u64("OFFERFLOW_WAREHOUSE_STALE_MAX_AGE_SECS", &value)?;
        }
        if let Some(value) = read_env("OFFERFLOW_WAREHOUSE_BULK_CONCURRENCY") {
            self.warehouse.bulk_concurrency =
                parse_u32("OFFERFLOW_WAREHOUSE_BULK_CONCURRENCY", &value)? as usize;
        }

        Ok(())
    }

    fn apply_overrides(&mut self, overrides: ConfigOverrides) {
        if let Some(database_url) = overrides.database_url {
            self.database.url = database_url;
        }
        if let Some(log_level) = overrides.log_level {
            self.logging.level = log_level;
        }
        if let Some(log_format) = overrides.log_format {
            self.logging.format = log_format;
        }
        if let Some(enabled) = overrides.warehouse_enabled {
            self.warehouse.enabled = enabled;
        }
        if let Some(base_url) = overrides.warehouse_base_url {
            self.warehouse.base_url = Some(base_url);
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        validate_database(&self.database)?;
        validate_logging(&self.logging)?;
        validate_numbering(&self.numbering)?;
        validate_lifecycle(&self.lifecycle)?;
        validate_warehouse(&self.warehouse)?;
        Ok(())
    }
}

/// Explicit path when it exists, otherwise the first default location present.
pub fn resolve_config_path(explicit_path: Option<&Path>) -> Option<PathBuf> {
    if let Some(path) = explicit_path {
        return path.exists().then_some(path.to_path_buf());
    }

    [PathBuf::from("offerflow.toml"), PathBuf::from("config/offerflow.toml")]
        .into_iter()
        .find(|path| path.exists())
}

fn read_patch(path: &Path) -> Result<ConfigPatch, ConfigError> {
    let raw = fs::read_to_string(path)
        .map_err(|source| ConfigError::ReadFile { path: path.to_path_buf(), source })?;

    let interpolated = interpolate_env_vars(&raw)?;
    toml::from_str::<ConfigPatch>(&interpolated)
        .map_err(|source| ConfigError::ParseFile { path: path.to_path_buf(), source })
}

/// Expands `${VAR}` from the process environment.
fn interpolate_env_vars(input: &str) -> Result<String, ConfigError> {
    let mut output = String::with_capacity(input.len());
    let mut chars = input.chars().peekable();

    while let Some(ch) = chars.next() {
        if ch == '$' && matches!(chars.peek(), Some('{')) {
            chars.next();
            let mut key = String::new();

            loop {
                match chars.next() {
                    Some('}') => break,
                    Some(next) => key.push(next),
                    None => return Err(ConfigError::UnterminatedInterpolation),
                }
            }

            let value = env::var(&key)
                .map_err(|_| ConfigError::MissingEnvInterpolation { var: key.clone() })?;
            output.push_str(&value);
            continue;
        }

        output.push(ch);
    }

    Ok(output)
}

fn validate_database(database: &DatabaseConfig) -> Result<(), ConfigError> {
    let url = database.url.trim();
    let sqlite_url =
        url.starts_with("sqlite://") || url.starts_with("sqlite::") || url == ":memory:";
    if !sqlite_url {
        return Err(ConfigError::Validation(
            "database.url must be a sqlite URL (`sqlite://...`, `sqlite::...`, or `:memory:`)"
                .to_string(),
        ));
    }

    if database.max_connections == 0 {
        return Err(ConfigError::Validation(
            "database.max_connections must be greater than zero".to_string(),
        ));
    }

    if database.timeout_secs == 0 || database.timeout_secs > 300 {
        return Err(ConfigError::Validation(
            "database.timeout_secs must be in range 1..=300".to_string(),
        ));
    }

    Ok(())
}

fn validate_logging(logging: &LoggingConfig) -> Result<(), ConfigError> {
    let level = logging.level.trim().to_ascii_lowercase();
    match level.as_str() {
        "trace" | "debug" | "info" | "warn" | "error" => Ok(()),
        _ => Err(ConfigError::Validation(
            "logging.level must be one of trace|debug|info|warn|error".to_string(),
        )),
    }
}

fn validate_numbering(numbering: &NumberingConfig) -> Result<(), ConfigError> {
    let prefix = numbering.default_prefix.trim();
    if prefix.is_empty() || !prefix.chars().all(|ch| ch.is_ascii_alphanumeric()) {
        return Err(ConfigError::Validation(
            "numbering.default_prefix must be non-empty and alphanumeric".to_string(),
        ));
    }
    Ok(())
}

fn validate_lifecycle(lifecycle: &LifecycleConfig) -> Result<(), ConfigError> {
    if lifecycle.default_expiration_days <= 0 {
        return Err(ConfigError::Validation(
            "lifecycle.default_expiration_days must be greater than zero".to_string(),
        ));
    }
    Ok(())
}

fn validate_warehouse(warehouse: &WarehouseConfig) -> Result<(), ConfigError> {
    if let Some(base_url) = &warehouse.base_url {
        if !base_url.starts_with("http://") && !base_url.starts_with("https://") {
            return Err(ConfigError::Validation(
                "warehouse.base_url must start with http:// or https://".to_string(),
            ));
        }
    }

    if !warehouse.enabled {
        return Ok(());
    }

    let missing_url =
        warehouse.base_url.as_ref().map(|value| value.trim().is_empty()).unwrap_or(true);
    if missing_url {
        return Err(ConfigError::Validation(
            "warehouse.base_url is required when warehouse.enabled is true".to_string(),
        ));
    }
    if let Some(token) = &warehouse.api_token {
        if token.expose_secret().trim().is_empty() {
            return Err(ConfigError::Validation(
                "warehouse.api_token must not be blank when set".to_string(),
            ));
        }
    }
    if warehouse.timeout_secs == 0 || warehouse.timeout_secs > 300 {
        return Err(ConfigError::Validation(
            "warehouse.timeout_secs must be in range 1..=300".to_string(),
        ));
    }
    if warehouse.initial_backoff_ms == 0 || warehouse.max_backoff_ms < warehouse.initial_backoff_ms
    {
        return Err(ConfigError::Validation(
            "warehouse backoff must satisfy 0 < initial_backoff_ms <= max_backoff_ms".to_string(),
        ));
    }
    if warehouse.sync_interval_secs == 0 {
        return Err(ConfigError::Validation(
            "warehouse.sync_interval_secs must be greater than zero".to_string(),
        ));
    }
    if warehouse.bulk_concurrency == 0 {
        return Err(ConfigError::Validation(
            "warehouse.bulk_concurrency must be greater than zero".to_string(),
        ));
    }

    Ok(())
}

fn read_env(key: &str) -> Option<String> {
    env::var(key).ok().filter(|value| !value.trim().is_empty())
}

fn parse_u32(key: &str, value: &str) -> Result<u32, ConfigError> {
    value.parse::<u32>().map_err(|_| ConfigError::InvalidEnvOverride {
        key: key.to_string(),
        value: value.to_string(),
    })
}

fn parse_u64(key: &str, value: &str) -> Result<u64, ConfigError> {
    value.parse::<u64>().map_err(|_| ConfigError::InvalidEnvOverride {
        key: key.to_string(),
        value: value.to_string(),
    })
}

fn parse_i64(key: &str, value: &str) -> Result<i64, ConfigError> {
    value.parse::<i64>().map_err(|_| ConfigError::InvalidEnvOverride {
        key: key.to_string(),
        value: value.to_string(),
    })
}

fn parse_bool(key: &str, value: &str) -> Result<bool, ConfigError> {
    value.parse::<bool>().map_err(|_| ConfigError::InvalidEnvOverride {
        key: key.to_string(),
        value: value.to_string(),
    })
}

#[derive(Debug, Default, Deserialize)]
struct ConfigPatch {
    database: Option<DatabasePatch>,
    logging: Option<LoggingPatch>,
    numbering: Option<NumberingPatch>,
    lifecycle: Option<LifecyclePatch>,
    warehouse: Option<WarehousePatch>,
}

#[derive(Debug, Default, Deserialize)]
struct DatabasePatch {
    url: Option<String>,
    max_connections: Option<u32>,
    timeout_secs: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
struct LoggingPatch {
    level: Option<String>,
    format: Option<LogFormat>,
}

#[derive(Debug, Default, Deserialize)]
struct NumberingPatch {
    default_prefix: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct LifecyclePatch {
    default_expiration_days: Option<i64>,
}

#[derive(Debug, Default, Deserialize)]
struct WarehousePatch {
    enabled: Option<bool>,
    base_url: Option<String>,
    api_token: Option<String>,
    timeout_secs: Option<u64>,
    max_retries: Option<u32>,
    initial_backoff_ms: Option<u64>,
    max_backoff_ms: Option<u64>,
    sync_interval_secs: Option<u64>,
    stale_max_age_secs: Option<u64>,
    bulk_concurrency: Option<usize>,
}
