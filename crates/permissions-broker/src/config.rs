//! Loading overwrite lists and permission-name lists from JSON or YAML.

use std::fs::File;
use std::io::Read;
use std::path::Path;

use chatgate_core_types::{Overwrite, Permissions};
use serde::de::DeserializeOwned;
use thiserror::Error;

/// Errors surfaced while loading overwrite or permission-name files.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("failed to deserialize: {0}")]
    Deserialize(String),
    #[error(transparent)]
    UnknownPermission(#[from] chatgate_core_types::UnknownPermission),
}

pub fn parse_overwrites_str(raw: &str) -> Result<Vec<Overwrite>, ConfigError> {
    parse_json_or_yaml(raw)
}

pub fn load_overwrites_from_reader<R: Read>(mut reader: R) -> Result<Vec<Overwrite>, ConfigError> {
    let mut buf = String::new();
    reader.read_to_string(&mut buf)?;
    parse_overwrites_str(&buf)
}

pub fn load_overwrites_from_path(path: impl AsRef<Path>) -> Result<Vec<Overwrite>, ConfigError> {
    let file = File::open(path.as_ref())?;
    load_overwrites_from_reader(file)
}

/// Parses a list of permission names (`["MANAGE_CHANNELS", ...]`) into one mask.
pub fn parse_permission_names(raw: &str) -> Result<Permissions, ConfigError> {
    let names: Vec<String> = parse_json_or_yaml(raw)?;
    Ok(Permissions::from_names(&names)?)
}

/// Every named permission with its bit value, lowest bit first.
pub fn permission_table() -> Vec<(&'static str, u64)> {
    Permissions::all()
        .iter_names()
        .map(|(name, bit)| (name, bit.bits()))
        .collect()
}

fn parse_json_or_yaml<T: DeserializeOwned>(raw: &str) -> Result<T, ConfigError> {
    match serde_json::from_str(raw) {
        Ok(value) => Ok(value),
        Err(json_err) => serde_yaml::from_str(raw).map_err(|yaml_err| {
            ConfigError::Deserialize(format!(
                "json error: {}; yaml error: {}",
                json_err, yaml_err
            ))
        }),
    }
}
