use anyhow::Result;
use clap::ValueEnum;
use serde::Serialize;

#[derive(Clone, Copy, Debug, ValueEnum)]
pub enum OutputFormat {
    Human,
    Json,
    Yaml,
}

/// Prints `payload` for the machine-readable formats. Returns `false` for `Human`, leaving
/// the rendering to the caller.
pub fn emit_structured<T: Serialize>(output: OutputFormat, payload: &T) -> Result<bool> {
    match output {
        OutputFormat::Human => Ok(false),
        OutputFormat::Json => {
            println!("{}", serde_json::to_string_pretty(payload)?);
            Ok(true)
        }
        OutputFormat::Yaml => {
            println!("{}", serde_yaml::to_string(payload)?);
            Ok(true)
        }
    }
}
