// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Rule resolution.
//!
//! Rules are flattened: the action calls of every transitively included rule
//! are merged in unless the rule, or a rule nearer in the inclusion chain,
//! already defines a call for the same phase and data key. The inclusion
//! graph is checked for cycles before any merge happens.

use std::collections::{BTreeMap, HashSet};
use std::fmt;
use std::sync::Arc;

use crate::config::{ActionCallSettings, InstrumentationSettings, RuleSettings};
use crate::types::{MethodDescription, TypeDescription};

use super::action::{ResolvedAction, SpecialParameter};
use super::binder::{bind_action_call, ActionCall, Conditions};
use super::cycles::{find_cycles, format_cycle};
use super::scope::ResolvedScope;
use super::violation::Violation;

/// Lifecycle phase of a hooked method, in execution order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Phase {
    PreEntry,
    Entry,
    PostEntry,
    PreExit,
    Exit,
    PostExit,
}

impl Phase {
    pub const ALL: [Phase; 6] = [
        Self::PreEntry,
        Self::Entry,
        Self::PostEntry,
        Self::PreExit,
        Self::Exit,
        Self::PostExit,
    ];

    pub fn is_exit(&self) -> bool {
        *self >= Self::PreExit
    }

    pub fn name(&self) -> &'static str {
        match self {
            Self::PreEntry => "pre-entry",
            Self::Entry => "entry",
            Self::PostEntry => "post-entry",
            Self::PreExit => "pre-exit",
            Self::Exit => "exit",
            Self::PostExit => "post-exit",
        }
    }

    fn calls<'a>(&self, rule: &'a RuleSettings) -> &'a BTreeMap<String, ActionCallSettings> {
        match self {
            Self::PreEntry => &rule.pre_entry,
            Self::Entry => &rule.entry,
            Self::PostEntry => &rule.post_entry,
            Self::PreExit => &rule.pre_exit,
            Self::Exit => &rule.exit,
            Self::PostExit => &rule.post_exit,
        }
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Source of a recorded metric value.
#[derive(Debug, Clone, PartialEq)]
pub enum MetricValue {
    Constant(f64),
    Data(String),
}

/// A metric recorded on method exit.
#[derive(Debug, Clone, PartialEq)]
pub struct MetricRecording {
    pub name: String,
    pub value: MetricValue,
    pub constant_tags: BTreeMap<String, String>,
    /// Tag name to data key.
    pub data_tags: BTreeMap<String, String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SpanKind {
    #[default]
    Internal,
    Server,
    Client,
    Producer,
    Consumer,
}

impl SpanKind {
    pub fn parse(text: &str) -> Option<Self> {
        match text.to_ascii_uppercase().as_str() {
            "INTERNAL" => Some(Self::Internal),
            "SERVER" => Some(Self::Server),
            "CLIENT" => Some(Self::Client),
            "PRODUCER" => Some(Self::Producer),
            "CONSUMER" => Some(Self::Consumer),
            _ => None,
        }
    }
}

/// Span settings of a resolved rule.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RuleTracing {
    pub start_span: bool,
    /// Data key holding the span name.
    pub name_key: Option<String>,
    pub kind: SpanKind,
    pub conditions: Conditions,
    /// Attribute name to data key.
    pub attributes: BTreeMap<String, String>,
    pub error_status: Option<String>,
}

/// A resolved, flattened rule.
#[derive(Debug, Clone, PartialEq)]
pub struct InstrumentationRule {
    pub name: String,
    pub scopes: Vec<Arc<ResolvedScope>>,
    pub actions: BTreeMap<Phase, BTreeMap<String, ActionCall>>,
    pub metrics: Vec<MetricRecording>,
    pub tracing: RuleTracing,
    /// Rules merged in through `include`, nearest first.
    pub included: Vec<String>,
}

impl InstrumentationRule {
    /// Whether any of the rule's scopes selects the method.
    pub fn matches(&self, ty: &TypeDescription, method: &MethodDescription) -> bool {
        self.scopes.iter().any(|scope| scope.matches(ty, method))
    }

    /// Whether the rule selects any method of the type.
    pub fn applies_to(&self, ty: &TypeDescription) -> bool {
        self.scopes.iter().any(|scope| scope.selects_any(ty))
    }

    pub fn calls(&self, phase: Phase) -> impl Iterator<Item = &ActionCall> {
        self.actions.get(&phase).into_iter().flat_map(|calls| calls.values())
    }

    /// Whether the rule does anything when applied.
    pub fn has_effect(&self) -> bool {
        self.actions.values().any(|calls| !calls.is_empty())
            || !self.metrics.is_empty()
            || self.tracing.start_span
    }
}

/// Action call settings after include flattening, with provenance.
type FlattenedCalls<'a> = BTreeMap<Phase, BTreeMap<&'a str, (&'a ActionCallSettings, Option<&'a str>)>>;

/// Merge included action calls into a rule, nearest inclusion first.
///
/// Each included rule is visited at most once, so this terminates even on
/// a cyclic inclusion graph; cycles are rejected separately.
fn flatten_calls<'a>(
    name: &'a str,
    rules: &'a BTreeMap<String, RuleSettings>,
) -> (FlattenedCalls<'a>, Vec<String>) {
    let mut calls: FlattenedCalls<'a> = BTreeMap::new();
    let mut included = Vec::new();
    let Some(own) = rules.get(name) else {
        return (calls, included);
    };
    for phase in Phase::ALL {
        let slot = calls.entry(phase).or_default();
        for (key, call) in phase.calls(own) {
            slot.insert(key.as_str(), (call, None));
        }
    }

    let mut visited: HashSet<&str> = HashSet::from([name]);
    let mut frontier = vec![name];
    while !frontier.is_empty() {
        let mut next = Vec::new();
        for parent in &frontier {
            let Some(settings) = rules.get(*parent) else { continue };
            for (include, enabled) in &settings.include {
                if *enabled && rules.contains_key(include) && visited.insert(include.as_str()) {
                    next.push(include.as_str());
                }
            }
        }
        for include in &next {
            let Some(settings) = rules.get(*include) else { continue };
            included.push(include.to_string());
            for phase in Phase::ALL {
                let slot = calls.entry(phase).or_default();
                for (key, call) in phase.calls(settings) {
                    slot.entry(key.as_str()).or_insert((call, Some(*include)));
                }
            }
        }
        frontier = next;
    }
    (calls, included)
}

fn check_includes(rules: &BTreeMap<String, RuleSettings>, violations: &mut Vec<Violation>) -> bool {
    let mut graph: BTreeMap<String, Vec<String>> = BTreeMap::new();
    for (name, rule) in rules {
        let mut edges = Vec::new();
        for (include, enabled) in &rule.include {
            if !*enabled {
                continue;
            }
            if rules.contains_key(include) {
                edges.push(include.clone());
            } else {
                violations.push(
                    Violation::new("Rule '{rule}' includes the unknown rule '{included}'")
                        .with("rule", name)
                        .with("included", include),
                );
            }
        }
        graph.insert(name.clone(), edges);
    }

    let cycles = find_cycles(&graph);
    for cycle in &cycles {
        violations.push(
            Violation::new("Rule inclusions form a cycle: {cycle}").with("cycle", format_cycle(cycle)),
        );
    }
    cycles.is_empty()
}

fn resolve_metrics(name: &str, rule: &RuleSettings, violations: &mut Vec<Violation>) -> Vec<MetricRecording> {
    let mut metrics = Vec::new();
    for (metric, settings) in &rule.metrics {
        let raw = settings.value.trim();
        if raw.is_empty() {
            violations.push(
                Violation::new("Metric '{metric}' of rule '{rule}' has no value")
                    .with("metric", metric)
                    .with("rule", name),
            );
            continue;
        }
        let value = match raw.parse::<f64>() {
            Ok(v) => MetricValue::Constant(v),
            Err(_) => MetricValue::Data(raw.to_string()),
        };
        metrics.push(MetricRecording {
            name: metric.clone(),
            value,
            constant_tags: settings.constant_tags.clone(),
            data_tags: settings.data_tags.clone(),
        });
    }
    metrics
}

fn resolve_tracing(name: &str, rule: &RuleSettings, violations: &mut Vec<Violation>) -> RuleTracing {
    let settings = &rule.tracing;
    let kind = match &settings.kind {
        None => SpanKind::default(),
        Some(text) => SpanKind::parse(text).unwrap_or_else(|| {
            violations.push(
                Violation::new("Rule '{rule}' uses the unknown span kind '{kind}'")
                    .with("rule", name)
                    .with("kind", text),
            );
            SpanKind::default()
        }),
    };
    RuleTracing {
        start_span: settings.start_span,
        name_key: settings.name.clone(),
        kind,
        conditions: Conditions::from_settings(&settings.start_span_conditions),
        attributes: settings.attributes.clone(),
        error_status: settings.error_status.clone(),
    }
}

fn resolve_rule(
    name: &str,
    settings: &InstrumentationSettings,
    scopes: &BTreeMap<String, Arc<ResolvedScope>>,
    actions: &BTreeMap<String, Arc<ResolvedAction>>,
    violations: &mut Vec<Violation>,
) -> Option<InstrumentationRule> {
    let rule = settings.rules.get(name)?;
    let before = violations.len();

    let mut rule_scopes = Vec::new();
    for (scope, enabled) in &rule.scopes {
        if !*enabled {
            continue;
        }
        match scopes.get(scope) {
            Some(resolved) => rule_scopes.push(Arc::clone(resolved)),
            // Defined but invalid scopes were already reported.
            None if settings.scopes.contains_key(scope) => {}
            None => violations.push(
                Violation::new("Rule '{rule}' uses the unknown scope '{scope}'")
                    .with("rule", name)
                    .with("scope", scope),
            ),
        }
    }

    let (flattened, included) = flatten_calls(name, &settings.rules);
    let mut bound: BTreeMap<Phase, BTreeMap<String, ActionCall>> = BTreeMap::new();
    for (phase, calls) in flattened {
        let slot = bound.entry(phase).or_default();
        for (key, (call, inherited_from)) in calls {
            if SpecialParameter::is_reserved(key) {
                if inherited_from.is_none() {
                    violations.push(
                        Violation::new("Rule '{rule}' writes the reserved data key '{key}'")
                            .with("rule", name)
                            .with("key", key),
                    );
                }
                continue;
            }
            match bind_action_call(key, call, inherited_from, actions) {
                Ok(bound_call) => {
                    if !phase.is_exit() && bound_call.action.requires_exit() && inherited_from.is_none() {
                        violations.push(
                            Violation::new(
                                "Call '{call}' of rule '{rule}' uses exit-only inputs in phase {phase}",
                            )
                            .with("call", key)
                            .with("rule", name)
                            .with("phase", phase),
                        );
                        continue;
                    }
                    slot.insert(key.to_string(), bound_call);
                }
                // Inherited calls are reported by the rule defining them.
                Err(_) if inherited_from.is_some() => {}
                Err(found) => violations.extend(
                    found.into_iter().map(|v| v.with("rule", name).with("phase", phase)),
                ),
            }
        }
    }
    bound.retain(|_, calls| !calls.is_empty());

    let metrics = resolve_metrics(name, rule, violations);
    let tracing = resolve_tracing(name, rule, violations);

    if violations.len() > before {
        return None;
    }
    Some(InstrumentationRule {
        name: name.to_string(),
        scopes: rule_scopes,
        actions: bound,
        metrics,
        tracing,
        included,
    })
}

/// Resolve all rules, reporting every problem found.
///
/// Disabled rules are validated and may still be included by other rules,
/// but are not part of the result.
pub fn resolve_rules(
    settings: &InstrumentationSettings,
    scopes: &BTreeMap<String, Arc<ResolvedScope>>,
    actions: &BTreeMap<String, Arc<ResolvedAction>>,
    violations: &mut Vec<Violation>,
) -> BTreeMap<String, Arc<InstrumentationRule>> {
    if !check_includes(&settings.rules, violations) {
        return BTreeMap::new();
    }

    let mut resolved = BTreeMap::new();
    for (name, rule) in &settings.rules {
        if let Some(resolved_rule) = resolve_rule(name, settings, scopes, actions, violations) {
            if rule.enabled {
                resolved.insert(name.clone(), Arc::new(resolved_rule));
            }
        }
    }
    resolved
}
