// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Configuration loading from files.
//!
//! Handles loading instrumentation settings from JSON and YAML files. The
//! loader does no validation; a loaded settings value is handed as a whole
//! to the resolver.

use std::path::Path;

use crate::error::ConfigError;

use super::types::InstrumentationSettings;

/// Supported settings file formats.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SettingsFormat {
    Json,
    Yaml,
}

impl SettingsFormat {
    /// Pick the format from a file extension (JSON unless yaml/yml).
    pub fn from_path(path: &Path) -> Self {
        let extension = path
            .extension()
            .and_then(|e| e.to_str())
            .unwrap_or("");

        match extension.to_lowercase().as_str() {
            "yaml" | "yml" => Self::Yaml,
            _ => Self::Json,
        }
    }
}

/// Load a settings file (JSON or YAML).
pub fn load_settings_file(path: &Path) -> Result<InstrumentationSettings, ConfigError> {
    let content = std::fs::read_to_string(path)?;
    parse_settings(&content, SettingsFormat::from_path(path))
}

/// Parse settings from a string in the given format.
pub fn parse_settings(
    content: &str,
    format: SettingsFormat,
) -> Result<InstrumentationSettings, ConfigError> {
    if content.trim().is_empty() {
        return Ok(InstrumentationSettings::default());
    }
    match format {
        SettingsFormat::Yaml => serde_yaml::from_str(content).map_err(ConfigError::from),
        SettingsFormat::Json => serde_json::from_str(content).map_err(ConfigError::from),
    }
}

/// Save settings as pretty JSON.
pub fn save_settings_file(path: &Path, settings: &InstrumentationSettings) -> Result<(), ConfigError> {
    let content = serde_json::to_string_pretty(settings)?;
    std::fs::write(path, content)?;
    Ok(())
}
