// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Method hooks.
//!
//! A [`MethodHookConfiguration`] is the union of every active rule matching
//! one method, with the action calls of each phase in execution order.
//! A [`MethodHook`] executes it around a method invocation.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;

use tracing::{debug, warn};

use crate::context::{self, ContextGuard, PropagationConfig};
use crate::error::{ActionError, HookError};
use crate::instrumentation::{
    ActionCall, InstrumentationRule, MetricRecording, MetricValue, Phase, RuleTracing,
};
use crate::telemetry::{ActionSpan, HealthSignal, GLOBAL_METRICS};
use crate::types::{MethodDescription, TypeDescription, Value};

use super::class_config::ClassInstrumentationConfiguration;
use super::registry::{ActionInvocation, ActionRegistry, InvocationContext};
use super::sink::TelemetrySink;

// ============================================================================
// Generation
// ============================================================================

/// Everything woven into one method.
#[derive(Debug, Clone, PartialEq)]
pub struct MethodHookConfiguration {
    pub signature: String,
    /// Action calls per phase, in execution order.
    pub phases: BTreeMap<Phase, Vec<ActionCall>>,
    pub metrics: Vec<MetricRecording>,
    /// Span settings and the rule they come from.
    pub tracing: Option<(String, RuleTracing)>,
    /// Names of the contributing rules, sorted.
    pub rules: Vec<String>,
}

impl MethodHookConfiguration {
    /// Merge the rules matching a method. `rules` must be sorted by name.
    pub fn build(
        signature: impl Into<String>,
        rules: &[Arc<InstrumentationRule>],
    ) -> Result<Self, HookError> {
        let signature = signature.into();
        let mut phases = BTreeMap::new();

        for phase in Phase::ALL {
            let mut calls: BTreeMap<String, ActionCall> = BTreeMap::new();
            let mut owners: HashMap<String, &str> = HashMap::new();
            for rule in rules {
                for call in rule.calls(phase) {
                    if let Some(owner) = owners.get(&call.data_key) {
                        warn!(
                            method = %signature,
                            phase = %phase,
                            key = %call.data_key,
                            kept = %owner,
                            ignored = %rule.name,
                            "Data key written by several rules"
                        );
                        continue;
                    }
                    owners.insert(call.data_key.clone(), &rule.name);
                    calls.insert(call.data_key.clone(), call.clone());
                }
            }
            if !calls.is_empty() {
                phases.insert(phase, order_calls(phase, calls)?);
            }
        }

        let tracing = rules
            .iter()
            .find(|rule| rule.tracing.start_span)
            .map(|rule| (rule.name.clone(), rule.tracing.clone()));

        Ok(Self {
            signature,
            phases,
            metrics: rules.iter().flat_map(|r| r.metrics.iter().cloned()).collect(),
            tracing,
            rules: rules.iter().map(|r| r.name.clone()).collect(),
        })
    }

    pub fn calls(&self, phase: Phase) -> &[ActionCall] {
        self.phases.get(&phase).map(Vec::as_slice).unwrap_or(&[])
    }
}

/// Topologically order the calls of one phase by their data dependencies.
///
/// Ties are broken by data key. Dependencies on keys written outside the
/// phase, and on the call's own key, are ignored.
fn order_calls(phase: Phase, mut calls: BTreeMap<String, ActionCall>) -> Result<Vec<ActionCall>, HookError> {
    let mut dependents: BTreeMap<&str, Vec<&str>> = BTreeMap::new();
    let mut pending: BTreeMap<&str, usize> = BTreeMap::new();
    for (key, call) in &calls {
        let deps: BTreeSet<&str> = call
            .data_dependencies()
            .filter(|dep| *dep != key.as_str() && calls.contains_key(*dep))
            .collect();
        pending.insert(key.as_str(), deps.len());
        for dep in deps {
            dependents.entry(dep).or_default().push(key.as_str());
        }
    }

    let mut ready: BTreeSet<&str> = pending
        .iter()
        .filter(|(_, count)| **count == 0)
        .map(|(key, _)| *key)
        .collect();
    let mut order: Vec<&str> = Vec::with_capacity(calls.len());
    while let Some(key) = ready.pop_first() {
        order.push(key);
        for &dependent in dependents.get(key).into_iter().flatten() {
            if let Some(count) = pending.get_mut(dependent) {
                *count -= 1;
                if *count == 0 {
                    ready.insert(dependent);
                }
            }
        }
    }

    if order.len() < calls.len() {
        let keys = pending
            .into_iter()
            .filter(|(_, count)| *count > 0)
            .map(|(key, _)| key.to_string())
            .collect();
        return Err(HookError::CyclicDataDependency {
            phase: phase.to_string(),
            keys,
        });
    }

    let order: Vec<String> = order.into_iter().map(str::to_string).collect();
    Ok(order.iter().filter_map(|key| calls.remove(key)).collect())
}

/// The hooks of one type.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct HookSet {
    pub type_name: String,
    /// Method hooks by signature.
    pub methods: BTreeMap<String, Arc<MethodHookConfiguration>>,
    /// Active special sensors and the signatures they hook.
    pub sensors: BTreeMap<String, Vec<String>>,
}

impl HookSet {
    pub fn empty(type_name: impl Into<String>) -> Self {
        Self {
            type_name: type_name.into(),
            ..Default::default()
        }
    }

    /// Generate the hooks of a type.
    ///
    /// Methods whose hook cannot be generated are logged and left unhooked.
    pub fn build(ty: &TypeDescription, class: &ClassInstrumentationConfiguration) -> Self {
        let mut set = Self::empty(&ty.name);

        for sensor in class.active_sensors() {
            set.sensors.insert(sensor.name().to_string(), sensor.hooked_methods(ty));
        }

        for method in &ty.methods {
            let matching: Vec<Arc<InstrumentationRule>> = class
                .active_rules()
                .iter()
                .filter(|rule| rule.matches(ty, method))
                .cloned()
                .collect();
            if matching.is_empty() {
                continue;
            }
            let signature = method.signature();
            match MethodHookConfiguration::build(&signature, &matching) {
                Ok(hook) => {
                    set.methods.insert(signature, Arc::new(hook));
                }
                Err(err) => {
                    warn!(type_name = %ty.name, method = %signature, error = %err, "Method left unhooked");
                }
            }
        }
        set
    }

    pub fn hook(&self, signature: &str) -> Option<&Arc<MethodHookConfiguration>> {
        self.methods.get(signature)
    }

    pub fn hook_for(&self, method: &MethodDescription) -> Option<&Arc<MethodHookConfiguration>> {
        self.hook(&method.signature())
    }

    pub fn is_empty(&self) -> bool {
        self.methods.is_empty() && self.sensors.is_empty()
    }
}

// ============================================================================
// Execution
// ============================================================================

/// State carried from entry to exit of one invocation.
#[must_use = "pass the invocation to MethodHook::on_exit"]
pub struct HookInvocation {
    guard: ContextGuard,
    attachments: HashMap<String, Value>,
    span: Option<u64>,
}

impl HookInvocation {
    /// The context frame opened for the invocation.
    pub fn context(&self) -> &ContextGuard {
        &self.guard
    }

    pub fn attachments(&self) -> &HashMap<String, Value> {
        &self.attachments
    }
}

/// Executes a method hook configuration.
pub struct MethodHook {
    config: Arc<MethodHookConfiguration>,
    propagation: Arc<PropagationConfig>,
    actions: Arc<ActionRegistry>,
    sink: Arc<dyn TelemetrySink>,
}

impl MethodHook {
    pub fn new(
        config: Arc<MethodHookConfiguration>,
        propagation: Arc<PropagationConfig>,
        actions: Arc<ActionRegistry>,
        sink: Arc<dyn TelemetrySink>,
    ) -> Self {
        Self {
            config,
            propagation,
            actions,
            sink,
        }
    }

    pub fn configuration(&self) -> &Arc<MethodHookConfiguration> {
        &self.config
    }

    /// Open a context frame and run the entry phases.
    pub fn on_enter(&self, call: &InvocationContext) -> HookInvocation {
        let guard = context::enter(&self.propagation);
        let mut attachments = HashMap::new();
        self.run_phase(Phase::PreEntry, call, &guard, &mut attachments);
        self.run_phase(Phase::Entry, call, &guard, &mut attachments);
        let span = self.start_span(call, &guard);
        self.run_phase(Phase::PostEntry, call, &guard, &mut attachments);
        HookInvocation {
            guard,
            attachments,
            span,
        }
    }

    /// Run the exit phases, report metrics and spans, then close the frame.
    pub fn on_exit(&self, invocation: HookInvocation, call: &InvocationContext) {
        let HookInvocation {
            guard,
            mut attachments,
            span,
        } = invocation;
        self.run_phase(Phase::PreExit, call, &guard, &mut attachments);
        self.run_phase(Phase::Exit, call, &guard, &mut attachments);

        if let Some(id) = span {
            let failed = call.thrown.is_some()
                || self
                    .config
                    .tracing
                    .as_ref()
                    .and_then(|(_, tracing)| tracing.error_status.as_deref())
                    .and_then(|key| guard.get_data(key))
                    .is_some_and(|value| value != Value::Bool(false));
            self.sink.end_span(id, failed);
        }
        self.record_metrics(&guard);

        self.run_phase(Phase::PostExit, call, &guard, &mut attachments);
        guard.close();
    }

    fn run_phase(
        &self,
        phase: Phase,
        call: &InvocationContext,
        guard: &ContextGuard,
        attachments: &mut HashMap<String, Value>,
    ) {
        for action_call in self.config.calls(phase) {
            if !action_call.conditions.evaluate(|key| guard.get_data(key)) {
                continue;
            }
            match self.execute(action_call, call, guard, attachments) {
                Ok(value) if !action_call.action.is_void => guard.set_data(&action_call.data_key, value),
                Ok(_) => {}
                Err(err) => {
                    GLOBAL_METRICS.raise(HealthSignal::ActionFailed);
                    warn!(
                        method = %self.config.signature,
                        phase = %phase,
                        key = %action_call.data_key,
                        error = %err,
                        "Action failed"
                    );
                }
            }
        }
    }

    fn execute(
        &self,
        action_call: &ActionCall,
        call: &InvocationContext,
        guard: &ContextGuard,
        attachments: &mut HashMap<String, Value>,
    ) -> Result<Value, ActionError> {
        let name = action_call.action.name.as_str();
        let action = self
            .actions
            .get(name)
            .ok_or_else(|| ActionError::NotRegistered(name.to_string()))?;

        let mut inputs = action_call.constant_inputs.clone();
        for (param, key) in &action_call.data_inputs {
            inputs.insert(param.clone(), guard.get_data(key).unwrap_or(Value::Null));
        }
        for (param, special) in &action_call.action.special_inputs {
            inputs.insert(param.clone(), call.special(*special));
        }

        let span = ActionSpan::start(name, &action_call.data_key);
        let mut invocation = ActionInvocation::new(name, inputs, call, guard, attachments);
        let result = catch_unwind(AssertUnwindSafe(|| action.execute(&mut invocation)))
            .unwrap_or_else(|_| Err(ActionError::Panicked(name.to_string())));
        span.finish_with_result(&result);
        result
    }

    fn start_span(&self, call: &InvocationContext, guard: &ContextGuard) -> Option<u64> {
        let (rule, tracing) = self.config.tracing.as_ref()?;
        if !tracing.conditions.evaluate(|key| guard.get_data(key)) {
            return None;
        }
        let name = tracing
            .name_key
            .as_deref()
            .and_then(|key| guard.get_data(key))
            .map(|value| value.to_string())
            .unwrap_or_else(|| format!("{}.{}", call.class_name, call.method_name));
        let attributes = data_tags(&tracing.attributes, guard);
        debug!(rule = %rule, span = %name, "Starting span");
        Some(self.sink.start_span(&name, tracing.kind, &attributes))
    }

    fn record_metrics(&self, guard: &ContextGuard) {
        for metric in &self.config.metrics {
            let value = match &metric.value {
                MetricValue::Constant(v) => Some(*v),
                MetricValue::Data(key) => guard.get_data(key).and_then(|v| v.as_f64()),
            };
            let Some(value) = value else {
                debug!(metric = %metric.name, "No value to record");
                continue;
            };
            let mut tags = metric.constant_tags.clone();
            tags.extend(data_tags(&metric.data_tags, guard));
            self.sink.record_metric(&metric.name, value, &tags);
        }
    }
}

/// Render name-to-data-key mappings, skipping missing data.
fn data_tags(mapping: &BTreeMap<String, String>, guard: &ContextGuard) -> BTreeMap<String, String> {
    mapping
        .iter()
        .filter_map(|(name, key)| guard.get_data(key).map(|value| (name.clone(), value.to_string())))
        .collect()
}
