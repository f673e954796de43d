// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Error types for the instrumentation engine.
//!
//! This module provides strongly-typed errors for the different parts of the engine,
//! using `thiserror` for ergonomic error definitions and `anyhow` for error propagation.
//! Configuration problems are not errors in the usual sense: they are collected as
//! [`Violation`](crate::instrumentation::Violation)s and only wrapped into a
//! [`ConfigError::Invalid`] when a whole configuration is rejected.

use thiserror::Error;

use crate::instrumentation::Violation;

/// Errors that can occur while loading or applying configuration.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Config file not found: {0}")]
    NotFound(String),

    #[error("Invalid config format: {0}")]
    InvalidFormat(String),

    #[error("Configuration rejected with {} violation(s)", violations.len())]
    Invalid { violations: Vec<Violation> },

    #[error("IO error reading config: {0}")]
    IoError(String),

    #[error("YAML parsing error: {0}")]
    YamlError(String),

    #[error("JSON parsing error: {0}")]
    JsonError(String),
}

impl ConfigError {
    /// The violations of a rejected configuration, if any.
    pub fn violations(&self) -> &[Violation] {
        match self {
            Self::Invalid { violations } => violations,
            _ => &[],
        }
    }
}

impl From<std::io::Error> for ConfigError {
    fn from(err: std::io::Error) -> Self {
        match err.kind() {
            std::io::ErrorKind::NotFound => Self::NotFound(err.to_string()),
            _ => Self::IoError(err.to_string()),
        }
    }
}

impl From<serde_json::Error> for ConfigError {
    fn from(err: serde_json::Error) -> Self {
        Self::JsonError(err.to_string())
    }
}

impl From<serde_yaml::Error> for ConfigError {
    fn from(err: serde_yaml::Error) -> Self {
        Self::YamlError(err.to_string())
    }
}

/// Errors reported by the instrumentation backend.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum BackendError {
    #[error("Type not modifiable: {0}")]
    Unmodifiable(String),

    #[error("Rebuilding hooks for {type_name} failed: {message}")]
    RebuildFailed { type_name: String, message: String },

    #[error("Backend unavailable: {0}")]
    Unavailable(String),
}

impl BackendError {
    /// Create a rebuild failure for the given type.
    pub fn rebuild(type_name: impl Into<String>, message: impl Into<String>) -> Self {
        Self::RebuildFailed {
            type_name: type_name.into(),
            message: message.into(),
        }
    }
}

/// Errors that can occur while generating the hook of a single method.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum HookError {
    #[error("Cyclic data dependency in {phase} between: {}", keys.join(", "))]
    CyclicDataDependency { phase: String, keys: Vec<String> },

    #[error("Action '{action}' of call '{call}' is not defined")]
    UnknownAction { call: String, action: String },
}

/// Errors raised by action implementations at call time.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ActionError {
    #[error("No implementation registered for action '{0}'")]
    NotRegistered(String),

    #[error("Action '{action}' failed: {message}")]
    Failed { action: String, message: String },

    #[error("Action '{0}' panicked")]
    Panicked(String),
}

impl ActionError {
    /// Create a generic action failure.
    pub fn failed(action: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Failed {
            action: action.into(),
            message: message.into(),
        }
    }
}

/// Errors raised by session data storages.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum SessionError {
    #[error("Write rejected: {requested} keys would exceed the limit of {limit}")]
    TagLimitExceeded { limit: usize, requested: usize },
}

/// Result type alias using anyhow for flexible error handling.
pub type Result<T> = anyhow::Result<T>;
