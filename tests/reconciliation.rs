// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! End-to-end tests for configuration changes flowing into applied hooks.

use std::sync::Arc;

use async_trait::async_trait;
use mockall::mock;

use hookwise::config::{
    ActionCallSettings, ActionSettings, ElementMatcherSettings, InstrumentationSettings, MatcherMode,
    MetricRecordingSettings, MethodMatcherSettings, RuleSettings, ScopeSettings,
};
use hookwise::hook::{
    ActionRegistry, ClassInstrumentationConfiguration, HookManager, HookSet, InMemorySink,
    InstrumentationBackend, InvocationContext, RecordingBackend, SinkEvent, TypeState,
};
use hookwise::instrumentation::{ConfigurationResolver, Phase};
use hookwise::{BackendError, Engine, MethodDescription, TypeDescription, Value};

mock! {
    pub Backend {}

    #[async_trait]
    impl InstrumentationBackend for Backend {
        async fn instrument(&self, ty: &TypeDescription, hooks: &HookSet) -> Result<(), BackendError>;
        async fn deinstrument(&self, ty: &TypeDescription) -> Result<(), BackendError>;
    }
}

// ============================================================================
// Fixtures
// ============================================================================

fn scoped_settings(rule_active_on_scope: bool) -> InstrumentationSettings {
    let mut settings = InstrumentationSettings::default();

    let mut scope = ScopeSettings::default();
    scope.type_scope.name = Some(ElementMatcherSettings::equals("Dummy"));
    scope.methods.push(MethodMatcherSettings::named("methodA"));
    settings.scopes.insert("scA".to_string(), scope);

    let mut timestamp = ActionSettings::default();
    timestamp.value = Some("System.nanoTime()".to_string());
    settings.actions.insert("timestamp".to_string(), timestamp);

    let mut elapsed = ActionSettings::default();
    elapsed.input.insert("since".to_string(), "long".to_string());
    settings.actions.insert("elapsed".to_string(), elapsed);

    let mut rule = RuleSettings::default();
    rule.scopes.insert("scA".to_string(), rule_active_on_scope);
    rule.entry.insert("start".to_string(), ActionCallSettings::of("timestamp"));
    let mut exit = ActionCallSettings::of("elapsed");
    exit.data_input.insert("since".to_string(), "start".to_string());
    rule.exit.insert("duration".to_string(), exit);
    rule.metrics.insert(
        "method_duration".to_string(),
        MetricRecordingSettings {
            value: "duration".to_string(),
            ..Default::default()
        },
    );
    rule.tracing.start_span = true;
    settings.rules.insert("r1".to_string(), rule);

    settings.internal.inter_batch_delay = 1;
    settings
}

fn dummy() -> TypeDescription {
    TypeDescription::new("Dummy")
        .with_method(MethodDescription::new("methodA"))
        .with_method(MethodDescription::new("methodB"))
}

// ============================================================================
// Reconciliation scenarios
// ============================================================================

#[tokio::test]
async fn test_scope_activation_drives_hooks() {
    let backend = Arc::new(RecordingBackend::new());
    let engine = Engine::new(backend.clone());
    engine.apply_settings(scoped_settings(true)).unwrap();
    engine.discover_type(dummy());
    engine.reconcile().await;

    let hooks = backend.applied("Dummy").expect("Dummy should be instrumented");
    let method_a = hooks.hook("methodA()").expect("methodA should be hooked");
    assert_eq!(method_a.rules, vec!["r1".to_string()]);
    assert_eq!(method_a.calls(Phase::Entry).len(), 1);
    assert_eq!(method_a.calls(Phase::Exit).len(), 1);
    assert!(hooks.hook("methodB()").is_none());

    engine.apply_settings(scoped_settings(false)).unwrap();
    engine.reconcile().await;

    assert!(backend.applied("Dummy").is_none());
    assert_eq!(engine.manager().state_of("Dummy"), Some(TypeState::NoInstrumentation));
    assert!(engine
        .manager()
        .method_hook_configuration("Dummy", "methodA()")
        .is_none());
}

#[tokio::test]
async fn test_reapplying_same_settings_causes_no_rebuild() {
    let backend = Arc::new(RecordingBackend::new());
    let engine = Engine::new(backend.clone());
    engine.apply_settings(scoped_settings(true)).unwrap();
    engine.discover_type(dummy());
    engine.reconcile().await;
    assert_eq!(backend.instrument_calls(), 1);

    for _ in 0..3 {
        engine.apply_settings(scoped_settings(true)).unwrap();
        let report = engine.reconcile().await;
        assert_eq!(report.unchanged, 1);
    }
    assert_eq!(backend.instrument_calls(), 1);
}

#[test]
fn test_class_configuration_equality_is_idempotent() {
    let resolver = ConfigurationResolver::new();
    let first = Arc::new(resolver.resolve(scoped_settings(true)).unwrap());
    let second = Arc::new(resolver.resolve(scoped_settings(true)).unwrap());
    assert_ne!(first.version(), second.version());

    let a = ClassInstrumentationConfiguration::compute(&dummy(), &first, &[]);
    let b = ClassInstrumentationConfiguration::compute(&dummy(), &second, &[]);
    assert!(a.is_same_as(&dummy(), &b));
    assert!(b.is_same_as(&dummy(), &a));
}

#[tokio::test]
async fn test_backend_failure_is_isolated() {
    let mut backend = MockBackend::new();
    backend
        .expect_instrument()
        .returning(|ty, _| {
            if ty.name == "Dummy" {
                Err(BackendError::rebuild("Dummy", "class format error"))
            } else {
                Ok(())
            }
        });
    backend.expect_deinstrument().never();

    let resolver = ConfigurationResolver::new();
    let mut settings = scoped_settings(true);
    settings
        .scopes
        .get_mut("scA")
        .unwrap()
        .type_scope
        .name = Some(ElementMatcherSettings::with_mode("Dummy", MatcherMode::StartsWith));
    let manager = HookManager::new(
        Arc::new(backend),
        Vec::new(),
        Arc::new(resolver.resolve(settings).unwrap()),
    );

    let mut other = dummy();
    other.name = "DummyTwo".to_string();
    manager.discover(dummy());
    manager.discover(other);

    let report = manager.reconcile_all().await;
    assert_eq!(report.failed, 1);
    assert_eq!(report.instrumented, 1);
    assert_eq!(manager.state_of("Dummy"), Some(TypeState::NoInstrumentation));
    assert_eq!(manager.state_of("DummyTwo"), Some(TypeState::Hooked));
    assert!(manager.hook_set("Dummy").unwrap().is_empty());
}

#[tokio::test]
async fn test_rejected_settings_leave_hooks_untouched() {
    let backend = Arc::new(RecordingBackend::new());
    let engine = Engine::new(backend.clone());
    engine.apply_settings(scoped_settings(true)).unwrap();
    engine.discover_type(dummy());
    engine.reconcile().await;

    let mut broken = scoped_settings(false);
    broken
        .rules
        .get_mut("r1")
        .unwrap()
        .entry
        .insert("bad".to_string(), ActionCallSettings::of("missing"));
    assert!(engine.apply_settings(broken).is_err());
    assert_eq!(engine.manager().pending_len(), 0);
    assert!(backend.applied("Dummy").is_some());
}

// ============================================================================
// Hook execution
// ============================================================================

#[tokio::test]
async fn test_applied_hook_executes_actions() {
    let mut actions = ActionRegistry::new();
    actions
        .register_fn("timestamp", |_| Ok(Value::Long(100)))
        .register_fn("elapsed", |inv| {
            let since = inv
                .input("since")
                .and_then(Value::as_f64)
                .ok_or_else(|| inv.fail("missing start"))?;
            Ok(Value::Double(250.0 - since))
        });
    let sink = Arc::new(InMemorySink::new());
    let engine = Engine::builder(Arc::new(RecordingBackend::new()))
        .actions(actions)
        .sink(sink.clone())
        .build();
    engine.apply_settings(scoped_settings(true)).unwrap();
    engine.discover_type(dummy());
    engine.reconcile().await;

    assert!(engine.method_hook("Dummy", &MethodDescription::new("methodB")).is_none());
    let hook = engine
        .method_hook("Dummy", &MethodDescription::new("methodA"))
        .expect("methodA hook");

    let mut call = InvocationContext::new("Dummy", "methodA");
    let invocation = hook.on_enter(&call);
    assert_eq!(invocation.context().get_data("start"), Some(Value::Long(100)));
    call.returned(Value::Null);
    hook.on_exit(invocation, &call);

    assert_eq!(sink.metric_values("method_duration"), vec![150.0]);
    assert!(sink
        .events()
        .iter()
        .any(|e| matches!(e, SinkEvent::SpanEnded { error: false, .. })));
}

#[tokio::test]
async fn test_thrown_error_fails_span() {
    let sink = Arc::new(InMemorySink::new());
    let engine = Engine::builder(Arc::new(RecordingBackend::new()))
        .sink(sink.clone())
        .build();
    engine.apply_settings(scoped_settings(true)).unwrap();
    engine.discover_type(dummy());
    engine.reconcile().await;

    let hook = engine
        .method_hook("Dummy", &MethodDescription::new("methodA"))
        .unwrap();
    let mut call = InvocationContext::new("Dummy", "methodA");
    let invocation = hook.on_enter(&call);
    call.threw("IllegalStateException");
    hook.on_exit(invocation, &call);

    // no implementations registered: actions fail, the span still ends
    assert!(sink.metric_values("method_duration").is_empty());
    assert!(sink
        .events()
        .iter()
        .any(|e| matches!(e, SinkEvent::SpanEnded { error: true, .. })));
}
