//! TOML configuration loader with environment variable expansion
//!
//! - `${ENV_VAR}` and `${ENV_VAR:default}` are expanded in every string value
//! - The file location comes from an explicit path, `CALENDAR_PIPELINE_CONFIG`,
//!   or `config/calendar-pipeline.toml`, in that order

use super::{ConfigError, PipelineConfig};
use regex::Regex;
use std::env;
use std::path::{Path, PathBuf};
use std::sync::OnceLock;
use toml::Value;
use tracing::debug;

/// Environment variable naming the config file
pub const CONFIG_ENV_VAR: &str = "CALENDAR_PIPELINE_CONFIG";

pub const DEFAULT_CONFIG_PATH: &str = "config/calendar-pipeline.toml";

/// Pick the config file to load.
pub fn resolve_config_path(explicit: Option<&Path>) -> PathBuf {
    if let Some(path) = explicit {
        return path.to_path_buf();
    }
    match env::var(CONFIG_ENV_VAR) {
        Ok(path) if !path.trim().is_empty() => PathBuf::from(path),
        _ => PathBuf::from(DEFAULT_CONFIG_PATH),
    }
}

/// Read, expand, deserialize and validate a config file.
pub fn load_config<P: AsRef<Path>>(path: P) -> Result<PipelineConfig, ConfigError> {
    let path = path.as_ref();
    let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
        path: path.to_path_buf(),
        source,
    })?;
    debug!(path = %path.display(), "Loading pipeline configuration");
    parse_config(&content)
}

/// Expand, deserialize and validate config text.
pub fn parse_config(content: &str) -> Result<PipelineConfig, ConfigError> {
    let mut value: Value = toml::from_str(content)?;
    expand_variables(&mut value);

    let config: PipelineConfig = value.try_into()?;
    config.validate()?;
    Ok(config)
}

fn expand_variables(value: &mut Value) {
    match value {
        Value::String(s) => {
            if let Some(expanded) = expand_env_in_string(s) {
                *s = expanded;
            }
        }
        Value::Table(table) => {
            for (_, v) in table.iter_mut() {
                expand_variables(v);
            }
        }
        Value::Array(items) => {
            for item in items.iter_mut() {
                expand_variables(item);
            }
        }
        _ => {}
    }
}

fn env_pattern() -> Option<&'static Regex> {
    static PATTERN: OnceLock<Option<Regex>> = OnceLock::new();
    PATTERN
        .get_or_init(|| Regex::new(r"\$\{([^:}]+)(?::([^}]*))?\}").ok())
        .as_ref()
}

/// Expand `${VAR:default}` references; `None` when there is nothing to expand.
fn expand_env_in_string(s: &str) -> Option<String> {
    if !s.contains("${") {
        return None;
    }

    let expanded = env_pattern()?.replace_all(s, |caps: &regex::Captures<'_>| {
        let default_value = caps.get(2).map(|m| m.as_str()).unwrap_or("");
        env::var(&caps[1]).unwrap_or_else(|_| default_value.to_string())
    });
    Some(expanded.into_owned())
}
