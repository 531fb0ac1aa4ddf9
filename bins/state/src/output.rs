//! Document output.

use anyhow::{Context, Result};
use clap::ValueEnum;
use serde::Serialize;

#[derive(Clone, Copy, ValueEnum)]
pub enum OutputFormat {
    Yaml,
    Json,
}

/// Print a document to stdout.
pub fn print<T: Serialize>(value: &T, format: OutputFormat) -> Result<()> {
    let text = match format {
        OutputFormat::Yaml => serde_yaml::to_string(value).context("YAML serialization failed")?,
        OutputFormat::Json => {
            serde_json::to_string_pretty(value).context("JSON serialization failed")?
        }
    };
    println!("{}", text.trim_end());
    Ok(())
}
