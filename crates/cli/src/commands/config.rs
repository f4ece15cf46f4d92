use std::env;
use std::fs;
use std::path::Path;

use offerflow_core::config::{resolve_config_path, AppConfig};
use toml::{Table, Value};

use super::CommandResult;

/// Config keys shown by `offerflow config`, with the env var that overrides each.
const FIELDS: &[(&str, &str)] = &[
    ("database.url", "OFFERFLOW_DATABASE_URL"),
    ("database.max_connections", "OFFERFLOW_DATABASE_MAX_CONNECTIONS"),
    ("database.timeout_secs", "OFFERFLOW_DATABASE_TIMEOUT_SECS"),
    ("logging.level", "OFFERFLOW_LOGGING_LEVEL"),
    ("logging.format", "OFFERFLOW_LOGGING_FORMAT"),
    ("numbering.default_prefix", "OFFERFLOW_NUMBERING_DEFAULT_PREFIX"),
    ("lifecycle.default_expiration_days", "OFFERFLOW_LIFECYCLE_DEFAULT_EXPIRATION_DAYS"),
    ("warehouse.enabled", "OFFERFLOW_WAREHOUSE_ENABLED"),
    ("warehouse.base_url", "OFFERFLOW_WAREHOUSE_BASE_URL"),
    ("warehouse.api_token", "OFFERFLOW_WAREHOUSE_API_TOKEN"),
    ("warehouse.timeout_secs", "OFFERFLOW_WAREHOUSE_TIMEOUT_SECS"),
    ("warehouse.max_retries", "OFFERFLOW_WAREHOUSE_MAX_RETRIES"),
    ("warehouse.sync_interval_secs", "OFFERFLOW_WAREHOUSE_SYNC_INTERVAL_SECS"),
    ("warehouse.stale_max_age_secs", "OFFERFLOW_WAREHOUSE_STALE_MAX_AGE_SECS"),
    ("warehouse.bulk_concurrency", "OFFERFLOW_WAREHOUSE_BULK_CONCURRENCY"),
];

/// Config has already been loaded and validated; this renders what is in effect.
pub fn run(config: &AppConfig, explicit_path: Option<&Path>) -> CommandResult {
    let config_file_path = resolve_config_path(explicit_path);
    let config_file_doc = load_config_file_doc(config_file_path.as_deref());

    let mut lines =
        vec!["effective config (source precedence: flag > env > file > default):".to_string()];
    for (key, env_key) in FIELDS {
        lines.push(render_line(
            key,
            &field_value(config, key),
            field_source(key, env_key, config_file_doc.as_ref(), config_file_path.as_deref()),
        ));
    }

    CommandResult { exit_code: 0, output: lines.join("\n") }
}

fn field_value(config: &AppConfig, key: &str) -> String {
    let warehouse = &config.warehouse;
    match key {
        "database.url" => config.database.url.clone(),
        "database.max_connections" => config.database.max_connections.to_string(),
        "database.timeout_secs" => config.database.timeout_secs.to_string(),
        "logging.level" => config.logging.level.clone(),
        "logging.format" => format!("{:?}", config.logging.format),
        "numbering.default_prefix" => config.numbering.default_prefix.clone(),
        "lifecycle.default_expiration_days" => {
            config.lifecycle.default_expiration_days.to_string()
        }
        "warehouse.enabled" => warehouse.enabled.to_string(),
        "warehouse.base_url" => warehouse.base_url.clone().unwrap_or_else(|| "<unset>".into()),
        "warehouse.api_token" => {
            if warehouse.api_token.is_some() { "<redacted>" } else { "<unset>" }.to_string()
        }
        "warehouse.timeout_secs" => warehouse.timeout_secs.to_string(),
        "warehouse.max_retries" => warehouse.max_retries.to_string(),
        "warehouse.sync_interval_secs" => warehouse.sync_interval_secs.to_string(),
        "warehouse.stale_max_age_secs" => warehouse.stale_max_age_secs.to_string(),
        "warehouse.bulk_concurrency" => warehouse.bulk_concurrency.to_string(),
        _ => "<unknown>".to_string(),
    }
}

fn load_config_file_doc(path: Option<&Path>) -> Option<Value> {
    let path = path?;
    let raw = fs::read_to_string(path).ok()?;
    raw.parse::<Table>().ok().map(Value::Table)
}

fn field_source(
    key_path: &str,
    env_key: &str,
    config_file_doc: Option<&Value>,
    config_file_path: Option<&Path>,
) -> String {
    if env::var_os(env_key).is_some() {
        return format!("env ({env_key})");
    }

    if let Some(doc) = config_file_doc {
        if contains_path(doc, key_path) {
            let file_path = config_file_path
                .map(|path| path.display().to_string())
                .unwrap_or_else(|| "config file".to_string());
            return format!("file ({file_path})");
        }
    }

    "default".to_string()
}

fn contains_path(root: &Value, key_path: &str) -> bool {
    let mut current = root;
    for key in key_path.split('.') {
        let Some(next) = current.get(key) else {
            return false;
        };
        current = next;
    }
    true
}

fn render_line(key: &str, value: &str, source: String) -> String {
    format!("- {key} = {value} (source: {source})")
}
