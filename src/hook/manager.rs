// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Hook reconciliation.
//!
//! The [`HookManager`] keeps the hooks woven into every known type in line
//! with the current configuration snapshot:
//!
//! ```text
//! unseen -> pending -> hooked(c) -> pending -> hooked(c') -> ...
//!                          \-> no-instrumentation
//! ```
//!
//! Types are queued when discovered and whenever the configuration changes.
//! Pending types are processed in batches; the backend is only called for a
//! type whose decision actually changed. A failed rebuild keeps the type in
//! its previous state and does not affect the rest of the batch.

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::{Arc, Mutex, RwLock};
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, error, info};

use crate::instrumentation::InstrumentationConfiguration;
use crate::telemetry::{HealthSignal, GLOBAL_METRICS};
use crate::timed;
use crate::types::TypeDescription;

use super::backend::InstrumentationBackend;
use super::class_config::ClassInstrumentationConfiguration;
use super::method_hook::{HookSet, MethodHookConfiguration};
use super::sensors::SpecialSensor;

/// Reconciliation state of a known type.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TypeState {
    /// Queued for a configuration check.
    Pending,
    /// Hooks are woven.
    Hooked,
    NoInstrumentation,
}

/// Outcome of one or more reconciliation batches.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BatchReport {
    pub checked: usize,
    pub unchanged: usize,
    pub instrumented: usize,
    pub deinstrumented: usize,
    pub failed: usize,
}

impl BatchReport {
    /// Number of backend calls made.
    pub fn retransformed(&self) -> usize {
        self.instrumented + self.deinstrumented + self.failed
    }

    fn merge(&mut self, other: BatchReport) {
        self.checked += other.checked;
        self.unchanged += other.unchanged;
        self.instrumented += other.instrumented;
        self.deinstrumented += other.deinstrumented;
        self.failed += other.failed;
    }
}

#[derive(Debug)]
struct TypeEntry {
    description: TypeDescription,
    applied: ClassInstrumentationConfiguration,
    hooks: Arc<HookSet>,
    /// The description changed since the hooks were built.
    stale: bool,
}

#[derive(Debug, Default)]
struct State {
    types: HashMap<String, TypeEntry>,
    pending: VecDeque<String>,
    queued: HashSet<String>,
}

impl State {
    fn enqueue(&mut self, name: &str) {
        if self.queued.insert(name.to_string()) {
            self.pending.push_back(name.to_string());
        }
    }

    /// Pop the next pending type that is still known.
    fn next(&mut self) -> Option<(TypeDescription, ClassInstrumentationConfiguration, bool)> {
        while let Some(name) = self.pending.pop_front() {
            self.queued.remove(&name);
            if let Some(entry) = self.types.get(&name) {
                return Some((entry.description.clone(), entry.applied.clone(), entry.stale));
            }
        }
        None
    }
}

/// Reconciles applied hooks against the current configuration.
pub struct HookManager {
    backend: Arc<dyn InstrumentationBackend>,
    sensors: Vec<Arc<dyn SpecialSensor>>,
    config: RwLock<Arc<InstrumentationConfiguration>>,
    state: Mutex<State>,
    /// Serializes batches so a type is never reconciled twice at once.
    processing: tokio::sync::Mutex<()>,
}

impl HookManager {
    pub fn new(
        backend: Arc<dyn InstrumentationBackend>,
        sensors: Vec<Arc<dyn SpecialSensor>>,
        config: Arc<InstrumentationConfiguration>,
    ) -> Self {
        Self {
            backend,
            sensors,
            config: RwLock::new(config),
            state: Mutex::new(State::default()),
            processing: tokio::sync::Mutex::new(()),
        }
    }

    fn state(&self) -> std::sync::MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn configuration(&self) -> Arc<InstrumentationConfiguration> {
        Arc::clone(&self.config.read().unwrap_or_else(|e| e.into_inner()))
    }

    /// Register a loaded type, or refresh its description, and queue it.
    pub fn discover(&self, ty: TypeDescription) {
        let mut state = self.state();
        let name = ty.name.clone();
        match state.types.get_mut(&name) {
            Some(entry) => {
                if entry.description != ty {
                    entry.description = ty;
                    entry.stale = true;
                }
            }
            None => {
                let hooks = Arc::new(HookSet::empty(&name));
                state.types.insert(
                    name.clone(),
                    TypeEntry {
                        description: ty,
                        applied: ClassInstrumentationConfiguration::no_instrumentation(),
                        hooks,
                        stale: false,
                    },
                );
            }
        }
        state.enqueue(&name);
        debug!(type_name = %name, "Type queued");
    }

    /// Stop tracking an unloaded type.
    pub fn forget(&self, name: &str) -> bool {
        self.state().types.remove(name).is_some()
    }

    /// Publish a new snapshot and queue every known type.
    pub fn update_configuration(&self, config: Arc<InstrumentationConfiguration>) {
        let version = config.version();
        *self.config.write().unwrap_or_else(|e| e.into_inner()) = config;

        let mut state = self.state();
        let mut names: Vec<String> = state.types.keys().cloned().collect();
        names.sort();
        for name in &names {
            state.enqueue(name);
        }
        info!(version, queued = names.len(), "Configuration updated");
    }

    pub fn pending_len(&self) -> usize {
        self.state().pending.len()
    }

    /// Names of all known types, sorted.
    pub fn known_types(&self) -> Vec<String> {
        let mut names: Vec<String> = self.state().types.keys().cloned().collect();
        names.sort();
        names
    }

    /// `None` for a type that was never discovered.
    pub fn state_of(&self, name: &str) -> Option<TypeState> {
        let state = self.state();
        let entry = state.types.get(name)?;
        Some(if state.queued.contains(name) {
            TypeState::Pending
        } else if entry.applied.is_no_instrumentation() {
            TypeState::NoInstrumentation
        } else {
            TypeState::Hooked
        })
    }

    /// The configuration last applied to a type.
    pub fn applied(&self, name: &str) -> Option<ClassInstrumentationConfiguration> {
        self.state().types.get(name).map(|entry| entry.applied.clone())
    }

    pub fn hook_set(&self, name: &str) -> Option<Arc<HookSet>> {
        self.state().types.get(name).map(|entry| Arc::clone(&entry.hooks))
    }

    /// The applied hook of a method, if it has one.
    pub fn method_hook_configuration(&self, owner: &str, signature: &str) -> Option<Arc<MethodHookConfiguration>> {
        self.hook_set(owner)?.hook(signature).cloned()
    }

    /// Check pending types against the current configuration.
    ///
    /// Stops after the configured number of checks, or once the configured
    /// number of types have been retransformed.
    pub async fn process_batch(&self) -> BatchReport {
        let _processing = self.processing.lock().await;
        let _timer = timed!("hook.reconcile_batch");

        let config = self.configuration();
        let internal = &config.settings().internal;
        let max_checks = internal.class_configuration_check_batch_size.max(1);
        let max_changes = internal.max_class_retransform_batch_size.max(1);

        let mut report = BatchReport::default();
        while report.checked < max_checks && report.retransformed() < max_changes {
            let Some((ty, applied, stale)) = self.state().next() else {
                break;
            };
            report.checked += 1;

            let desired = ClassInstrumentationConfiguration::compute(&ty, &config, &self.sensors);
            if !stale && desired.is_same_as(&ty, &applied) {
                report.unchanged += 1;
                continue;
            }
            if desired.is_no_instrumentation() && applied.is_no_instrumentation() {
                // never woven, only the description needs refreshing
                report.unchanged += 1;
                if let Some(entry) = self.state().types.get_mut(&ty.name) {
                    entry.applied = desired;
                    entry.stale = entry.description != ty;
                }
                continue;
            }

            let hooks = HookSet::build(&ty, &desired);
            let result = if desired.is_no_instrumentation() {
                self.backend.deinstrument(&ty).await
            } else {
                self.backend.instrument(&ty, &hooks).await
            };

            match result {
                Ok(()) => {
                    if desired.is_no_instrumentation() {
                        report.deinstrumented += 1;
                    } else {
                        report.instrumented += 1;
                    }
                    debug!(type_name = %ty.name, methods = hooks.methods.len(), "Hooks applied");
                    if let Some(entry) = self.state().types.get_mut(&ty.name) {
                        entry.applied = desired;
                        entry.hooks = Arc::new(hooks);
                        // rediscovered while the backend was busy, already re-queued
                        entry.stale = entry.description != ty;
                    }
                }
                Err(err) => {
                    report.failed += 1;
                    GLOBAL_METRICS.raise(HealthSignal::ReconciliationFailed);
                    error!(type_name = %ty.name, error = %err, "Reconciliation failed, keeping previous hooks");
                }
            }
        }

        if report.checked > 0 {
            info!(
                checked = report.checked,
                unchanged = report.unchanged,
                instrumented = report.instrumented,
                deinstrumented = report.deinstrumented,
                failed = report.failed,
                "Reconciliation batch finished"
            );
        }
        report
    }

    /// Process batches until nothing is pending, pausing between batches.
    pub async fn reconcile_all(&self) -> BatchReport {
        let mut total = BatchReport::default();
        loop {
            let report = self.process_batch().await;
            total.merge(report);
            if report.checked == 0 || self.pending_len() == 0 {
                break;
            }
            tokio::time::sleep(self.inter_batch_delay()).await;
        }
        total
    }

    fn inter_batch_delay(&self) -> Duration {
        self.configuration().settings().internal.inter_batch_delay()
    }

    /// Run reconciliation in the background until shutdown is signalled.
    pub fn spawn(self: Arc<Self>, mut shutdown: watch::Receiver<bool>) -> JoinHandle<()> {
        tokio::spawn(async move {
            loop {
                // read per round so delay changes apply to a running loop
                let delay = self.inter_batch_delay().max(Duration::from_millis(1));
                tokio::select! {
                    _ = tokio::time::sleep(delay) => {
                        if self.pending_len() > 0 {
                            self.process_batch().await;
                        }
                    }
                    changed = shutdown.changed() => {
                        if changed.is_err() || *shutdown.borrow() {
                            break;
                        }
                    }
                }
            }
            info!("Hook reconciliation stopped");
        })
    }
}

impl std::fmt::Debug for HookManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HookManager")
            .field("sensors", &self.sensors)
            .field("version", &self.configuration().version())
            .field("pending", &self.pending_len())
            .finish()
    }
}
