// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Engine facade.
//!
//! Owns the configuration resolver, the published configuration snapshot,
//! the hook manager, the session store and the propagation settings, and
//! drives the background tasks.

use std::sync::{Arc, Mutex, RwLock};

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{info, warn};

use crate::config::{InstrumentationSettings, PropagationSettings};
use crate::context::{self, ContextGuard, PropagationConfig};
use crate::error::ConfigError;
use crate::hook::{
    default_sensors, ActionRegistry, BatchReport, HookManager, InstrumentationBackend, MemberCache,
    MemberKey, MethodHook, SpecialSensor, TelemetrySink, TracingSink,
};
use crate::instrumentation::{ConfigurationResolver, InstrumentationConfiguration};
use crate::session::PropagationSessionStore;
use crate::types::{MethodDescription, TypeDescription};

/// Builder for [`Engine`].
pub struct EngineBuilder {
    backend: Arc<dyn InstrumentationBackend>,
    sensors: Vec<Arc<dyn SpecialSensor>>,
    actions: ActionRegistry,
    sink: Arc<dyn TelemetrySink>,
    session_settings: PropagationSettings,
}

impl EngineBuilder {
    /// Replace the built-in special sensors.
    pub fn sensors(mut self, sensors: Vec<Arc<dyn SpecialSensor>>) -> Self {
        self.sensors = sensors;
        self
    }

    pub fn actions(mut self, actions: ActionRegistry) -> Self {
        self.actions = actions;
        self
    }

    pub fn sink(mut self, sink: Arc<dyn TelemetrySink>) -> Self {
        self.sink = sink;
        self
    }

    /// Session store limits. They are fixed for the lifetime of the engine.
    pub fn session_settings(mut self, settings: PropagationSettings) -> Self {
        self.session_settings = settings;
        self
    }

    pub fn build(self) -> Engine {
        let current = Arc::new(InstrumentationConfiguration::empty());
        let sessions = Arc::new(PropagationSessionStore::new(self.session_settings));
        let propagation = Arc::new(propagation_config(&current, &sessions));
        let manager = Arc::new(HookManager::new(self.backend, self.sensors, Arc::clone(&current)));
        let (shutdown, _) = watch::channel(false);

        Engine {
            resolver: ConfigurationResolver::new(),
            current: RwLock::new(current),
            manager,
            sessions,
            propagation: RwLock::new(propagation),
            actions: Arc::new(self.actions),
            sink: self.sink,
            hooks: MemberCache::new(),
            shutdown,
            tasks: Mutex::new(Vec::new()),
        }
    }
}

fn propagation_config(
    config: &InstrumentationConfiguration,
    sessions: &Arc<PropagationSessionStore>,
) -> PropagationConfig {
    PropagationConfig::new(Arc::clone(config.directives()))
        .with_session_id_header(&config.settings().propagation.session_id_header)
        .with_sessions(Arc::clone(sessions))
}

/// The instrumentation engine.
pub struct Engine {
    resolver: ConfigurationResolver,
    current: RwLock<Arc<InstrumentationConfiguration>>,
    manager: Arc<HookManager>,
    sessions: Arc<PropagationSessionStore>,
    propagation: RwLock<Arc<PropagationConfig>>,
    actions: Arc<ActionRegistry>,
    sink: Arc<dyn TelemetrySink>,
    hooks: MemberCache<MemberKey, Arc<MethodHook>>,
    shutdown: watch::Sender<bool>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl Engine {
    pub fn builder(backend: Arc<dyn InstrumentationBackend>) -> EngineBuilder {
        EngineBuilder {
            backend,
            sensors: default_sensors(),
            actions: ActionRegistry::new(),
            sink: Arc::new(TracingSink::new()),
            session_settings: PropagationSettings::default(),
        }
    }

    pub fn new(backend: Arc<dyn InstrumentationBackend>) -> Self {
        Self::builder(backend).build()
    }

    /// Validate and publish new settings.
    ///
    /// On rejection the previous configuration stays in effect and all
    /// violations are returned.
    pub fn apply_settings(
        &self,
        settings: InstrumentationSettings,
    ) -> Result<Arc<InstrumentationConfiguration>, ConfigError> {
        let config = match self.resolver.resolve(settings) {
            Ok(config) => Arc::new(config),
            Err(violations) => {
                warn!(
                    violations = violations.len(),
                    version = self.configuration().version(),
                    "Keeping last good configuration"
                );
                return Err(ConfigError::Invalid { violations });
            }
        };

        let propagation = Arc::new(propagation_config(&config, &self.sessions));
        *self.current.write().unwrap_or_else(|e| e.into_inner()) = Arc::clone(&config);
        *self.propagation.write().unwrap_or_else(|e| e.into_inner()) = propagation;
        self.hooks.clear();
        self.manager.update_configuration(Arc::clone(&config));
        info!(version = config.version(), rules = config.rules().len(), "Configuration applied");
        Ok(config)
    }

    /// The configuration currently in effect.
    pub fn configuration(&self) -> Arc<InstrumentationConfiguration> {
        Arc::clone(&self.current.read().unwrap_or_else(|e| e.into_inner()))
    }

    pub fn propagation(&self) -> Arc<PropagationConfig> {
        Arc::clone(&self.propagation.read().unwrap_or_else(|e| e.into_inner()))
    }

    pub fn manager(&self) -> &Arc<HookManager> {
        &self.manager
    }

    pub fn sessions(&self) -> &Arc<PropagationSessionStore> {
        &self.sessions
    }

    /// Register a newly loaded type.
    pub fn discover_type(&self, ty: TypeDescription) {
        self.manager.discover(ty);
    }

    /// Drop an unloaded type and its cached hooks.
    pub fn forget_type(&self, name: &str) {
        self.manager.forget(name);
        self.hooks.invalidate_owner(name);
    }

    /// Reconcile every pending type now.
    pub async fn reconcile(&self) -> BatchReport {
        self.manager.reconcile_all().await
    }

    /// Open a context frame with the current propagation settings.
    pub fn enter_context(&self) -> ContextGuard {
        context::enter(&self.propagation())
    }

    /// The executable hook of a method, if one is applied.
    ///
    /// Hooks are cached per member and rebuilt when the applied hook
    /// configuration changes.
    pub fn method_hook(&self, owner: &str, method: &MethodDescription) -> Option<Arc<MethodHook>> {
        let key = MemberKey::method(owner, method);
        let Some(config) = self.manager.method_hook_configuration(owner, &method.signature()) else {
            self.hooks.invalidate(|k| *k == key);
            return None;
        };
        if let Some(hook) = self.hooks.get(&key) {
            if Arc::ptr_eq(hook.configuration(), &config) {
                return Some(hook);
            }
        }
        let hook = Arc::new(MethodHook::new(
            config,
            self.propagation(),
            Arc::clone(&self.actions),
            Arc::clone(&self.sink),
        ));
        self.hooks.insert(key, Arc::clone(&hook));
        Some(hook)
    }

    /// Start hook reconciliation and the session expiry sweep.
    ///
    /// Must be called from within a tokio runtime.
    pub fn start(&self) {
        let mut tasks = self.tasks.lock().unwrap_or_else(|e| e.into_inner());
        if !tasks.is_empty() {
            return;
        }
        tasks.push(Arc::clone(&self.manager).spawn(self.shutdown.subscribe()));
        tasks.push(Arc::clone(&self.sessions).spawn_expiry_sweep(self.shutdown.subscribe()));
        info!("Engine started");
    }

    /// Stop background tasks and wait for them to finish.
    pub async fn shutdown(&self) {
        self.shutdown.send_replace(true);
        let tasks: Vec<_> = std::mem::take(&mut *self.tasks.lock().unwrap_or_else(|e| e.into_inner()));
        for task in tasks {
            if let Err(err) = task.await {
                warn!(error = %err, "Background task ended abnormally");
            }
        }
        info!("Engine stopped");
    }
}
