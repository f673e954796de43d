// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Per-key propagation directives.

use std::collections::HashMap;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::config::{DataSettings, InstrumentationSettings};

/// How far a data value travels.
///
/// Ordered: `None < ProcessLocal < Global`.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize,
)]
#[serde(rename_all = "snake_case")]
pub enum PropagationMode {
    #[default]
    None,
    /// Within the current process's call stack.
    #[serde(alias = "jvm_local", alias = "JVM_LOCAL", alias = "PROCESS_LOCAL")]
    ProcessLocal,
    /// Across remote calls, through headers.
    #[serde(alias = "GLOBAL")]
    Global,
}

impl PropagationMode {
    /// Whether values travel at least within the process.
    pub fn is_propagated(&self) -> bool {
        *self >= Self::ProcessLocal
    }

    pub fn is_global(&self) -> bool {
        *self == Self::Global
    }
}

impl fmt::Display for PropagationMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::None => "none",
            Self::ProcessLocal => "process_local",
            Self::Global => "global",
        };
        f.write_str(name)
    }
}

/// Propagation directive of one data key.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PropagationDirective {
    pub down: PropagationMode,
    pub up: PropagationMode,
    pub is_tag: bool,
    pub session_storage: bool,
}

impl Default for PropagationDirective {
    fn default() -> Self {
        Self::from(&DataSettings::default())
    }
}

impl From<&DataSettings> for PropagationDirective {
    fn from(settings: &DataSettings) -> Self {
        Self {
            down: settings.down_propagation,
            up: settings.up_propagation,
            is_tag: settings.is_tag,
            session_storage: settings.session_storage,
        }
    }
}

/// Directives for all data keys; absent keys get the default directive.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DataDirectives {
    directives: HashMap<String, PropagationDirective>,
    default: PropagationDirective,
}

impl DataDirectives {
    pub fn from_settings(settings: &InstrumentationSettings) -> Self {
        Self {
            directives: settings
                .data
                .iter()
                .map(|(key, data)| (key.clone(), PropagationDirective::from(data)))
                .collect(),
            default: PropagationDirective::default(),
        }
    }

    /// Add or replace the directive of a key.
    pub fn with(mut self, key: impl Into<String>, directive: PropagationDirective) -> Self {
        self.directives.insert(key.into(), directive);
        self
    }

    pub fn directive(&self, key: &str) -> &PropagationDirective {
        self.directives.get(key).unwrap_or(&self.default)
    }

    pub fn down(&self, key: &str) -> PropagationMode {
        self.directive(key).down
    }

    pub fn up(&self, key: &str) -> PropagationMode {
        self.directive(key).up
    }

    pub fn is_tag(&self, key: &str) -> bool {
        self.directive(key).is_tag
    }

    /// Whether the key may be stored in, and read back from, a browser session storage.
    pub fn is_propagated_with_browser(&self, key: &str) -> bool {
        self.directive(key).session_storage
    }

    /// Keys with global down-propagation.
    pub fn global_down_keys(&self) -> impl Iterator<Item = &str> {
        self.directives
            .iter()
            .filter(|(_, d)| d.down.is_global())
            .map(|(k, _)| k.as_str())
    }
}
