// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Configuration type definitions.
//!
//! Defines the raw, unresolved instrumentation settings as delivered by the
//! configuration source, supporting JSON and YAML formats. Nothing here is
//! validated; resolution and validation happen in [`crate::instrumentation`].

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::time::Duration;

use crate::context::PropagationMode;
use crate::types::Visibility;

/// Complete instrumentation settings.
///
/// Every delivery from the configuration source is a full replacement.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case", default)]
pub struct InstrumentationSettings {
    /// Named scopes selecting (type, method) pairs.
    pub scopes: BTreeMap<String, ScopeSettings>,

    /// Named rules bundling action calls, activated by scopes.
    pub rules: BTreeMap<String, RuleSettings>,

    /// Named action definitions.
    pub actions: BTreeMap<String, ActionSettings>,

    /// Propagation directives per context data key.
    pub data: BTreeMap<String, DataSettings>,

    /// Built-in special sensors.
    pub special: SpecialSensorSettings,

    /// Package prefixes whose types are never instrumented.
    pub ignored_packages: BTreeMap<String, bool>,

    /// Whether synthetic lambda types are excluded from instrumentation.
    pub exclude_lambdas: Option<bool>,

    /// Reconciliation tuning.
    pub internal: InternalSettings,

    /// Context propagation and session storage settings.
    pub propagation: PropagationSettings,
}

impl InstrumentationSettings {
    /// Whether lambda types are excluded (defaults to true).
    pub fn excludes_lambdas(&self) -> bool {
        self.exclude_lambdas.unwrap_or(true)
    }

    /// Active ignored package prefixes.
    pub fn active_ignored_packages(&self) -> impl Iterator<Item = &str> {
        self.ignored_packages
            .iter()
            .filter(|(_, enabled)| **enabled)
            .map(|(prefix, _)| prefix.as_str())
    }
}

// ============================================================================
// Scopes
// ============================================================================

/// How a name matcher compares its pattern.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum MatcherMode {
    #[default]
    #[serde(alias = "EQUALS_FULLY")]
    Equals,
    StartsWith,
    EndsWith,
    Contains,
    Matches,
}

/// A name predicate: pattern, mode and case sensitivity.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case", default)]
pub struct ElementMatcherSettings {
    pub name: String,
    pub matcher_mode: MatcherMode,
    pub ignore_case: bool,
}

impl ElementMatcherSettings {
    /// Exact, case sensitive name predicate.
    pub fn equals(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Default::default()
        }
    }

    /// Predicate with an explicit mode.
    pub fn with_mode(name: impl Into<String>, matcher_mode: MatcherMode) -> Self {
        Self {
            name: name.into(),
            matcher_mode,
            ignore_case: false,
        }
    }
}

/// Type-level predicates of a scope. All declared predicates must hold.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case", default)]
pub struct TypeScopeSettings {
    /// Matcher on the type's own name.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<ElementMatcherSettings>,

    /// Each matcher must match at least one implemented interface.
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub interfaces: Vec<ElementMatcherSettings>,

    /// Matcher on any superclass in the chain.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub superclass: Option<ElementMatcherSettings>,
}

impl TypeScopeSettings {
    /// Whether no type predicate is declared at all.
    pub fn is_empty(&self) -> bool {
        self.name.is_none() && self.interfaces.is_empty() && self.superclass.is_none()
    }
}

/// A single method predicate of a scope.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case", default)]
pub struct MethodMatcherSettings {
    /// Method name pattern. Ignored for constructors.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,

    pub matcher_mode: MatcherMode,

    pub ignore_case: bool,

    /// Match constructors instead of methods.
    pub is_constructor: bool,

    /// Required synchronized flag; any when unset.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub is_synchronized: Option<bool>,

    /// Exact argument type list; any when unset.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub arguments: Option<Vec<String>>,

    /// Accepted visibilities; all when empty.
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub visibility: Vec<Visibility>,
}

impl MethodMatcherSettings {
    /// Method predicate matching the exact method name.
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: Some(name.into()),
            ..Default::default()
        }
    }
}

/// Advanced scope flags.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case", default)]
pub struct AdvancedScopeSettings {
    /// Allow scopes whose type predicate matches (nearly) everything.
    pub disable_safety_mechanism: bool,

    /// Only select methods overriding a supertype method.
    pub instrument_only_inherited_methods: bool,
}

/// A named scope.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case", default)]
pub struct ScopeSettings {
    #[serde(rename = "type")]
    pub type_scope: TypeScopeSettings,

    pub methods: Vec<MethodMatcherSettings>,

    /// Scopes whose selection is removed from this scope.
    pub exclude: BTreeMap<String, bool>,

    pub advanced: AdvancedScopeSettings,
}

// ============================================================================
// Rules and Actions
// ============================================================================

/// Conditions under which an action call or span start is executed.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case", default)]
pub struct ConditionSettings {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub only_if_true: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub only_if_false: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub only_if_null: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub only_if_not_null: Option<String>,
}

/// A single action invocation inside a rule.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case", default)]
pub struct ActionCallSettings {
    /// Name of the invoked action.
    pub action: String,

    /// Literal inputs by parameter name.
    pub constant_input: BTreeMap<String, serde_json::Value>,

    /// Context data keys by parameter name.
    pub data_input: BTreeMap<String, String>,

    #[serde(flatten)]
    pub conditions: ConditionSettings,
}

impl ActionCallSettings {
    /// A call of the given action without inputs.
    pub fn of(action: impl Into<String>) -> Self {
        Self {
            action: action.into(),
            ..Default::default()
        }
    }
}

/// Metric recorded when a hooked method exits.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case", default)]
pub struct MetricRecordingSettings {
    /// Data key holding the value, or a numeric literal.
    pub value: String,

    pub constant_tags: BTreeMap<String, String>,

    /// Tag name to data key.
    pub data_tags: BTreeMap<String, String>,
}

/// Span creation settings of a rule.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case", default)]
pub struct RuleTracingSettings {
    pub start_span: bool,

    /// Data key holding the span name; the method name is used when unset.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub kind: Option<String>,

    pub start_span_conditions: ConditionSettings,

    /// Attribute name to data key.
    pub attributes: BTreeMap<String, String>,

    /// Data key whose non-null value marks the span as failed.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_status: Option<String>,
}

/// A named rule.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case", default)]
pub struct RuleSettings {
    pub enabled: bool,

    /// Scopes activating this rule.
    pub scopes: BTreeMap<String, bool>,

    /// Rules whose action calls are inherited.
    pub include: BTreeMap<String, bool>,

    pub pre_entry: BTreeMap<String, ActionCallSettings>,
    pub entry: BTreeMap<String, ActionCallSettings>,
    pub post_entry: BTreeMap<String, ActionCallSettings>,
    pub pre_exit: BTreeMap<String, ActionCallSettings>,
    pub exit: BTreeMap<String, ActionCallSettings>,
    pub post_exit: BTreeMap<String, ActionCallSettings>,

    pub metrics: BTreeMap<String, MetricRecordingSettings>,

    pub tracing: RuleTracingSettings,
}

impl Default for RuleSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            scopes: BTreeMap::new(),
            include: BTreeMap::new(),
            pre_entry: BTreeMap::new(),
            entry: BTreeMap::new(),
            post_entry: BTreeMap::new(),
            pre_exit: BTreeMap::new(),
            exit: BTreeMap::new(),
            post_exit: BTreeMap::new(),
            metrics: BTreeMap::new(),
            tracing: RuleTracingSettings::default(),
        }
    }
}

/// A named action definition.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case", default)]
pub struct ActionSettings {
    /// Declared inputs: parameter name to type name.
    pub input: BTreeMap<String, String>,

    pub imports: Vec<String>,

    /// Multi-statement body.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub value_body: Option<String>,

    /// Single-expression body.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub value: Option<String>,

    pub is_void: bool,
}

// ============================================================================
// Data, Sensors, Internals
// ============================================================================

/// Propagation directive of one data key.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case", default)]
pub struct DataSettings {
    pub down_propagation: PropagationMode,
    pub up_propagation: PropagationMode,
    pub is_tag: bool,
    /// Whether the key may be stored in a browser session storage.
    pub session_storage: bool,
}

impl Default for DataSettings {
    fn default() -> Self {
        Self {
            down_propagation: PropagationMode::ProcessLocal,
            up_propagation: PropagationMode::None,
            is_tag: true,
            session_storage: false,
        }
    }
}

/// Built-in special sensors.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case", default)]
pub struct SpecialSensorSettings {
    pub executor_context_propagation: bool,
    pub scheduled_executor_context_propagation: bool,
    pub thread_start_context_propagation: bool,
}

impl Default for SpecialSensorSettings {
    fn default() -> Self {
        Self {
            executor_context_propagation: true,
            scheduled_executor_context_propagation: true,
            thread_start_context_propagation: true,
        }
    }
}

/// Reconciliation tuning. Durations are in milliseconds.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case", default)]
pub struct InternalSettings {
    pub inter_batch_delay: u64,
    pub class_configuration_check_batch_size: usize,
    pub max_class_retransform_batch_size: usize,
}

impl InternalSettings {
    /// Delay between two reconciliation batches.
    pub fn inter_batch_delay(&self) -> Duration {
        Duration::from_millis(self.inter_batch_delay)
    }
}

impl Default for InternalSettings {
    fn default() -> Self {
        Self {
            inter_batch_delay: 50,
            class_configuration_check_batch_size: 1000,
            max_class_retransform_batch_size: 100,
        }
    }
}

/// Context propagation and session storage settings. Durations are in milliseconds.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case", default)]
pub struct PropagationSettings {
    /// Header carrying the browser session id.
    pub session_id_header: String,
    pub max_sessions: usize,
    pub session_ttl: u64,
    pub max_tags: usize,
    pub max_key_size: usize,
    pub max_value_size: usize,
    pub sweep_interval: u64,
    pub min_session_id_length: usize,
    pub max_session_id_length: usize,
}

impl PropagationSettings {
    pub fn session_ttl(&self) -> Duration {
        Duration::from_millis(self.session_ttl)
    }

    pub fn sweep_interval(&self) -> Duration {
        Duration::from_millis(self.sweep_interval)
    }
}

impl Default for PropagationSettings {
    fn default() -> Self {
        Self {
            session_id_header: "Session-Id".to_string(),
            max_sessions: 10_000,
            session_ttl: 5 * 60 * 1000,
            max_tags: 128,
            max_key_size: 128,
            max_value_size: 2048,
            sweep_interval: 30 * 1000,
            min_session_id_length: 16,
            max_session_id_length: 512,
        }
    }
}
