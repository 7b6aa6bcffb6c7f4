//! Runtime configuration.
//!
//! Sources, lowest priority first: built-in defaults, one YAML file, `CHATGATE__*`
//! environment variables. Environment keys map onto the YAML tree by splitting on `__`, so
//! `CHATGATE__THROTTLE__WINDOW=15m` sets `throttle.window`.

use std::env;
use std::path::{Path, PathBuf};
use std::time::Duration;

use chatgate_scheduler::ThrottleConfig;
use permissions_broker::OverwritePolicy;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;
use tokio::fs;
use tracing::{debug, info};

pub const ENV_PREFIX: &str = "CHATGATE__";
const LOCAL_CONFIG: &str = "config/chatgate.yaml";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse configuration: {0}")]
    Parse(String),
    #[error("invalid configuration: {0}")]
    Invalid(String),
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub log_level: String,
    pub throttle: ThrottleSettings,
    /// Capacity of the broker's audit broadcast channel.
    pub audit_buffer: usize,
    /// Treatment of overwrite lists with no entry for the acting principal.
    pub overwrite_policy: OverwritePolicy,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            throttle: ThrottleSettings::default(),
            audit_buffer: 128,
            overwrite_policy: OverwritePolicy::Strict,
        }
    }
}

/// Hot-field limit as written in configuration files.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ThrottleSettings {
    pub burst: u32,
    #[serde(with = "duration_str")]
    pub window: Duration,
    #[serde(with = "duration_str")]
    pub drain_interval: Duration,
}

impl Default for ThrottleSettings {
    fn default() -> Self {
        let defaults = ThrottleConfig::default();
        Self {
            burst: defaults.burst,
            window: defaults.window,
            drain_interval: defaults.drain_interval,
        }
    }
}

impl Config {
    pub fn from_yaml_str(raw: &str) -> Result<Self, ConfigError> {
        let tree = yaml_tree(raw)?;
        Self::from_tree(tree)
    }

    fn from_tree(tree: Value) -> Result<Self, ConfigError> {
        let config: Config =
            serde_json::from_value(tree).map_err(|err| ConfigError::Parse(err.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.throttle.burst == 0 {
            return Err(ConfigError::Invalid("throttle.burst must be at least 1".into()));
        }
        if self.throttle.window.is_zero() {
            return Err(ConfigError::Invalid("throttle.window must be non-zero".into()));
        }
        if self.throttle.drain_interval.is_zero() {
            return Err(ConfigError::Invalid(
                "throttle.drain_interval must be non-zero".into(),
            ));
        }
        Ok(())
    }

    pub fn throttle_config(&self) -> ThrottleConfig {
        ThrottleConfig {
            burst: self.throttle.burst,
            window: self.throttle.window,
            drain_interval: self.throttle.drain_interval,
        }
    }
}

pub struct LoadedConfig {
    pub config: Config,
    /// File the configuration came from; `None` when only defaults and environment applied.
    pub path: Option<PathBuf>,
}

/// Loads configuration from `path`, or from the first existing default location.
///
/// An explicit path must exist. Without one, `./config/chatgate.yaml` is tried, then
/// `chatgate/config.yaml` under the platform config directory.
pub async fn load_config(path: Option<&Path>) -> Result<LoadedConfig, ConfigError> {
    let source = match path {
        Some(path) => Some(path.to_path_buf()),
        None => default_locations().into_iter().find(|candidate| candidate.exists()),
    };

    let mut tree = match &source {
        Some(path) => {
            let content = fs::read_to_string(path)
                .await
                .map_err(|source| ConfigError::Io {
                    path: path.clone(),
                    source,
                })?;
            info!("Loaded configuration from: {}", path.display());
            yaml_tree(&content)?
        }
        None => {
            debug!("no configuration file found, using defaults");
            Value::Object(Map::new())
        }
    };

    apply_env_overrides(&mut tree, env::vars());
    let config = Config::from_tree(tree)?;
    Ok(LoadedConfig {
        config,
        path: source,
    })
}

fn default_locations() -> Vec<PathBuf> {
    let mut locations = vec![PathBuf::from(LOCAL_CONFIG)];
    if let Some(mut dir) = dirs::config_dir() {
        dir.push("chatgate");
        dir.push("config.yaml");
        locations.push(dir);
    }
    locations
}

fn yaml_tree(raw: &str) -> Result<Value, ConfigError> {
    if raw.trim().is_empty() {
        return Ok(Value::Object(Map::new()));
    }
    let yaml: serde_yaml::Value =
        serde_yaml::from_str(raw).map_err(|err| ConfigError::Parse(err.to_string()))?;
    let tree = serde_json::to_value(yaml).map_err(|err| ConfigError::Parse(err.to_string()))?;
    match tree {
        Value::Object(_) => Ok(tree),
        Value::Null => Ok(Value::Object(Map::new())),
        other => Err(ConfigError::Parse(format!(
            "expected a mapping at the top level, got {other}"
        ))),
    }
}

/// Overlays `CHATGATE__A__B=value` pairs onto `tree` as `a.b = value`.
pub fn apply_env_overrides<I>(tree: &mut Value, vars: I)
where
    I: IntoIterator<Item = (String, String)>,
{
    for (key, raw) in vars {
        let Some(stripped) = key.strip_prefix(ENV_PREFIX) else {
            continue;
        };
        let path: Vec<String> = stripped
            .split("__")
            .filter(|segment| !segment.is_empty())
            .map(|segment| segment.to_ascii_lowercase())
            .collect();
        if path.is_empty() {
            continue;
        }
        debug!(key = %key, "applying environment override");
        set_path(tree, &path, parse_env_value(&raw));
    }
}

fn set_path(tree: &mut Value, path: &[String], value: Value) {
    let mut cursor = tree;
    for segment in &path[..path.len() - 1] {
        if !cursor.is_object() {
            *cursor = Value::Object(Map::new());
        }
        let Value::Object(map) = cursor else {
            return;
        };
        cursor = map
            .entry(segment.clone())
            .or_insert_with(|| Value::Object(Map::new()));
    }
    if !cursor.is_object() {
        *cursor = Value::Object(Map::new());
    }
    if let (Value::Object(map), Some(last)) = (cursor, path.last()) {
        map.insert(last.clone(), value);
    }
}

fn parse_env_value(raw: &str) -> Value {
    if let Ok(boolean) = raw.parse::<bool>() {
        return Value::Bool(boolean);
    }
    if let Ok(number) = raw.parse::<u64>() {
        return Value::Number(number.into());
    }
    Value::String(raw.to_string())
}

mod duration_str {
    use std::time::Duration;

    use serde::{de, Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&humantime::format_duration(*value).to_string())
    }

    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Raw {
        Text(String),
        Seconds(u64),
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        match Raw::deserialize(deserializer)? {
            Raw::Text(text) => humantime::parse_duration(text.trim()).map_err(de::Error::custom),
            Raw::Seconds(seconds) => Ok(Duration::from_secs(seconds)),
        }
    }
}
