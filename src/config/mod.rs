// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Configuration module.
//!
//! Holds the raw instrumentation settings (scopes, rules, actions, data
//! directives, special sensors, internal tuning and propagation limits) and
//! loads them from JSON or YAML files.
//!
//! Settings are treated as immutable deliveries: every reload replaces the
//! previous settings as a whole and goes through resolution again.

mod loader;
mod types;

pub use loader::{load_settings_file, parse_settings, save_settings_file, SettingsFormat};

pub use types::{
    ActionCallSettings, ActionSettings, AdvancedScopeSettings, ConditionSettings, DataSettings,
    ElementMatcherSettings, InstrumentationSettings, InternalSettings, MatcherMode,
    MethodMatcherSettings, MetricRecordingSettings, PropagationSettings, RuleSettings,
    RuleTracingSettings, ScopeSettings, SpecialSensorSettings, TypeScopeSettings,
};
