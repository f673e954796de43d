// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Per-type instrumentation decision.

use std::sync::Arc;

use crate::instrumentation::{InstrumentationConfiguration, InstrumentationRule};
use crate::types::TypeDescription;

use super::sensors::SpecialSensor;

/// What should be woven into one type under one configuration.
#[derive(Debug, Clone, Default)]
pub struct ClassInstrumentationConfiguration {
    active_sensors: Vec<Arc<dyn SpecialSensor>>,
    /// Sorted by rule name.
    active_rules: Vec<Arc<InstrumentationRule>>,
    source: Option<Arc<InstrumentationConfiguration>>,
}

impl ClassInstrumentationConfiguration {
    /// The configuration of a type that receives no hooks.
    pub fn no_instrumentation() -> Self {
        Self::default()
    }

    /// Compute the decision for a type.
    ///
    /// Ignored packages, interfaces and, when lambdas are excluded,
    /// synthetic types are never instrumented.
    pub fn compute(
        ty: &TypeDescription,
        config: &Arc<InstrumentationConfiguration>,
        sensors: &[Arc<dyn SpecialSensor>],
    ) -> Self {
        if config.is_ignored(ty)
            || ty.is_interface
            || (ty.is_synthetic && config.settings().excludes_lambdas())
        {
            return Self::no_instrumentation();
        }

        let active_sensors: Vec<_> = sensors
            .iter()
            .filter(|sensor| sensor.should_instrument(ty, config))
            .cloned()
            .collect();
        // rules_for iterates a BTreeMap, so the result is sorted by name
        let active_rules = config.rules_for(ty);

        if active_sensors.is_empty() && active_rules.is_empty() {
            return Self::no_instrumentation();
        }
        Self {
            active_sensors,
            active_rules,
            source: Some(Arc::clone(config)),
        }
    }

    pub fn is_no_instrumentation(&self) -> bool {
        self.active_sensors.is_empty() && self.active_rules.is_empty()
    }

    pub fn active_sensors(&self) -> &[Arc<dyn SpecialSensor>] {
        &self.active_sensors
    }

    pub fn active_rules(&self) -> &[Arc<InstrumentationRule>] {
        &self.active_rules
    }

    /// The configuration snapshot this decision was computed from.
    pub fn source(&self) -> Option<&Arc<InstrumentationConfiguration>> {
        self.source.as_ref()
    }

    /// Whether switching from `self` to `other` needs no rebuild.
    ///
    /// Rules compare by content, so re-resolving identical settings yields
    /// equal configurations even though every snapshot is a new object.
    pub fn is_same_as(&self, ty: &TypeDescription, other: &Self) -> bool {
        if self.active_rules != other.active_rules {
            return false;
        }
        let names = |c: &Self| c.active_sensors.iter().map(|s| s.name()).collect::<Vec<_>>();
        if names(self) != names(other) {
            return false;
        }
        match (&self.source, &other.source) {
            (Some(old), Some(new)) => !self
                .active_sensors
                .iter()
                .any(|sensor| sensor.requires_instrumentation_change(ty, old, new)),
            _ => true,
        }
    }
}
