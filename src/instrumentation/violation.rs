// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Configuration validation violations.
//!
//! Violations are collected, never thrown: one validation pass reports every
//! problem it finds, each with structured parameters for message interpolation.

use serde::Serialize;
use std::collections::BTreeMap;
use std::fmt;

/// A single configuration problem.
///
/// The message is a template; `{name}` placeholders are replaced by the
/// parameter of the same name when rendered.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Violation {
    pub message: String,
    pub parameters: BTreeMap<String, String>,
}

impl Violation {
    /// Create a violation with a message template.
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            parameters: BTreeMap::new(),
        }
    }

    /// Add an interpolation parameter.
    pub fn with(mut self, name: impl Into<String>, value: impl fmt::Display) -> Self {
        self.parameters.insert(name.into(), value.to_string());
        self
    }

    /// Get a parameter value.
    pub fn parameter(&self, name: &str) -> Option<&str> {
        self.parameters.get(name).map(String::as_str)
    }

    /// Render the message with all parameters substituted.
    pub fn render(&self) -> String {
        let mut rendered = self.message.clone();
        for (name, value) in &self.parameters {
            rendered = rendered.replace(&format!("{{{}}}", name), value);
        }
        rendered
    }
}

impl fmt::Display for Violation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.render())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_render_parameters() {
        let v = Violation::new("Scope '{scope}' excludes unknown scope '{excluded}'")
            .with("scope", "a")
            .with("excluded", "b");
        assert_eq!(v.render(), "Scope 'a' excludes unknown scope 'b'");
        assert_eq!(v.parameter("scope"), Some("a"));
        assert_eq!(v.to_string(), v.render());
    }

    #[test]
    fn test_render_without_parameters() {
        let v = Violation::new("plain {unbound}");
        assert_eq!(v.render(), "plain {unbound}");
    }
}
