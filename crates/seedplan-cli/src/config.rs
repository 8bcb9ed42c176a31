use std::path::{Path, PathBuf};

use clap::ValueEnum;
use serde::{Deserialize, Serialize};

use seedplan_resolve::ResolverOptions;

use crate::CliError;

pub const DEFAULT_CONFIG_FILE: &str = "seedplan.toml";

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "snake_case")]
pub enum LogFormat {
    #[default]
    Text,
    Json,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingSettings {
    /// Filter directive used when `RUST_LOG` is unset.
    pub level: String,
    pub format: LogFormat,
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: LogFormat::Text,
        }
    }
}

/// Contents of `seedplan.toml`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub resolver: ResolverOptions,
    pub logging: LoggingSettings,
}

pub fn parse_settings(content: &str) -> Result<Settings, CliError> {
    Ok(toml::from_str(content)?)
}

/// Load settings from `path`, or from `seedplan.toml` in the working
/// directory when no path is given. Only the implicit file may be missing.
pub fn load_settings(path: Option<&Path>) -> Result<Settings, CliError> {
    let (path, explicit) = match path {
        Some(path) => (path.to_path_buf(), true),
        None => (PathBuf::from(DEFAULT_CONFIG_FILE), false),
    };
    if !path.exists() {
        if explicit {
            return Err(CliError::InvalidInput(format!(
                "config file {} not found",
                path.display()
            )));
        }
        return Ok(Settings::default());
    }

    let content = std::fs::read_to_string(&path)?;
    parse_settings(&content)
}
