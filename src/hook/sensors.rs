// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Special sensors.
//!
//! Built-in instrumentation that is not driven by rules: carrying the
//! current context across executor submissions and thread starts.

use std::fmt;
use std::sync::Arc;

use crate::instrumentation::InstrumentationConfiguration;
use crate::types::TypeDescription;

/// A built-in sensor woven independently of rules.
pub trait SpecialSensor: Send + Sync + fmt::Debug {
    /// Stable sensor name, used for configuration comparison.
    fn name(&self) -> &'static str;

    /// Whether the sensor applies to the type under the configuration.
    fn should_instrument(&self, ty: &TypeDescription, config: &InstrumentationConfiguration) -> bool;

    /// Whether the sensor's hooks must be rebuilt although it stays active.
    fn requires_instrumentation_change(
        &self,
        _ty: &TypeDescription,
        _old: &InstrumentationConfiguration,
        _new: &InstrumentationConfiguration,
    ) -> bool {
        false
    }

    /// Signatures of the methods the sensor hooks in the type.
    fn hooked_methods(&self, ty: &TypeDescription) -> Vec<String>;
}

/// Sensor matching concrete subtypes of one supertype by method names.
#[derive(Debug)]
struct ContextPropagationSensor {
    name: &'static str,
    supertype: &'static str,
    methods: &'static [&'static str],
    enabled: fn(&InstrumentationConfiguration) -> bool,
}

impl SpecialSensor for ContextPropagationSensor {
    fn name(&self) -> &'static str {
        self.name
    }

    fn should_instrument(&self, ty: &TypeDescription, config: &InstrumentationConfiguration) -> bool {
        (self.enabled)(config) && !ty.is_interface && ty.is_assignable_to(self.supertype)
    }

    fn hooked_methods(&self, ty: &TypeDescription) -> Vec<String> {
        ty.methods
            .iter()
            .filter(|m| !m.is_constructor && self.methods.contains(&m.name.as_str()))
            .map(|m| m.signature())
            .collect()
    }
}

/// Propagates context into tasks submitted to an executor.
pub fn executor_sensor() -> Arc<dyn SpecialSensor> {
    Arc::new(ContextPropagationSensor {
        name: "executor-context-propagation",
        supertype: "java.util.concurrent.Executor",
        methods: &["execute"],
        enabled: |config| config.settings().special.executor_context_propagation,
    })
}

/// Propagates context into tasks scheduled on a scheduled executor.
pub fn scheduled_executor_sensor() -> Arc<dyn SpecialSensor> {
    Arc::new(ContextPropagationSensor {
        name: "scheduled-executor-context-propagation",
        supertype: "java.util.concurrent.ScheduledExecutorService",
        methods: &["schedule", "scheduleAtFixedRate", "scheduleWithFixedDelay"],
        enabled: |config| config.settings().special.scheduled_executor_context_propagation,
    })
}

/// Propagates context into started threads.
pub fn thread_start_sensor() -> Arc<dyn SpecialSensor> {
    Arc::new(ContextPropagationSensor {
        name: "thread-start-context-propagation",
        supertype: "java.lang.Thread",
        methods: &["start"],
        enabled: |config| config.settings().special.thread_start_context_propagation,
    })
}

/// All built-in sensors.
pub fn default_sensors() -> Vec<Arc<dyn SpecialSensor>> {
    vec![executor_sensor(), scheduled_executor_sensor(), thread_start_sensor()]
}
