// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Benchmarks for name matching, configuration resolution and per-type
//! instrumentation decisions.
//!
//! Run with: `cargo bench --bench scope_matching`

use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use std::hint::black_box;
use std::sync::Arc;

use hookwise::config::{
    ActionCallSettings, ActionSettings, ElementMatcherSettings, InstrumentationSettings,
    MatcherMode, MethodMatcherSettings, RuleSettings, ScopeSettings,
};
use hookwise::hook::{default_sensors, ClassInstrumentationConfiguration, HookSet};
use hookwise::instrumentation::{ConfigurationResolver, NameMatcher};
use hookwise::{MethodDescription, TypeDescription};

fn settings(scope_count: usize) -> InstrumentationSettings {
    let mut settings = InstrumentationSettings::default();
    let mut action = ActionSettings::default();
    action.value = Some("System.nanoTime()".to_string());
    settings.actions.insert("timestamp".to_string(), action);

    for i in 0..scope_count {
        let mut scope = ScopeSettings::default();
        scope.type_scope.name = Some(ElementMatcherSettings::with_mode(
            format!("com.acme.module{}.", i),
            MatcherMode::StartsWith,
        ));
        scope.methods.push(MethodMatcherSettings::named("handle"));
        settings.scopes.insert(format!("scope{}", i), scope);

        let mut rule = RuleSettings::default();
        rule.scopes.insert(format!("scope{}", i), true);
        rule.entry.insert("start".to_string(), ActionCallSettings::of("timestamp"));
        settings.rules.insert(format!("rule{}", i), rule);
    }
    settings
}

fn service_type(module: usize) -> TypeDescription {
    let mut ty = TypeDescription::new(format!("com.acme.module{}.Service", module));
    for i in 0..20 {
        ty = ty.with_method(MethodDescription::new(format!("helper{}", i)));
    }
    ty.with_method(MethodDescription::new("handle").with_arguments(["Request"]))
}

/// Benchmark the matcher modes against a typical type name.
fn bench_name_matcher(c: &mut Criterion) {
    let mut group = c.benchmark_group("scope/name_matcher");
    let name = "com.acme.orders.OrderServiceImpl";

    let modes = [
        ("equals", "com.acme.orders.OrderServiceImpl", MatcherMode::Equals),
        ("starts_with", "com.acme.", MatcherMode::StartsWith),
        ("ends_with", "ServiceImpl", MatcherMode::EndsWith),
        ("contains", "Order", MatcherMode::Contains),
        ("matches", r"com\.acme\..*Impl", MatcherMode::Matches),
    ];
    for (label, pattern, mode) in modes {
        let matcher = NameMatcher::new(pattern, mode, false).unwrap();
        group.bench_function(label, |b| b.iter(|| matcher.matches(black_box(name))));
    }

    let ignore_case = NameMatcher::new("COM.ACME.", MatcherMode::StartsWith, true).unwrap();
    group.bench_function("starts_with_ignore_case", |b| {
        b.iter(|| ignore_case.matches(black_box(name)))
    });

    group.finish();
}

/// Benchmark resolving settings into a configuration snapshot.
fn bench_resolve(c: &mut Criterion) {
    let mut group = c.benchmark_group("scope/resolve");
    let resolver = ConfigurationResolver::new();

    for count in [1, 10, 100] {
        let settings = settings(count);
        group.throughput(Throughput::Elements(count as u64));
        group.bench_with_input(BenchmarkId::new("scopes", count), &settings, |b, settings| {
            b.iter(|| resolver.resolve(black_box(settings.clone())))
        });
    }

    group.finish();
}

/// Benchmark computing and comparing per-type decisions.
fn bench_class_configuration(c: &mut Criterion) {
    let mut group = c.benchmark_group("scope/class_configuration");
    let sensors = default_sensors();

    for count in [10, 100] {
        let config = Arc::new(ConfigurationResolver::new().resolve(settings(count)).unwrap());
        let hit = service_type(count / 2);
        let miss = TypeDescription::new("org.other.Thing").with_method(MethodDescription::new("handle"));

        group.bench_function(BenchmarkId::new("compute_hit", count), |b| {
            b.iter(|| ClassInstrumentationConfiguration::compute(black_box(&hit), &config, &sensors))
        });
        group.bench_function(BenchmarkId::new("compute_miss", count), |b| {
            b.iter(|| ClassInstrumentationConfiguration::compute(black_box(&miss), &config, &sensors))
        });

        let applied = ClassInstrumentationConfiguration::compute(&hit, &config, &sensors);
        let desired = ClassInstrumentationConfiguration::compute(&hit, &config, &sensors);
        group.bench_function(BenchmarkId::new("is_same_as", count), |b| {
            b.iter(|| desired.is_same_as(black_box(&hit), black_box(&applied)))
        });
        group.bench_function(BenchmarkId::new("hook_set", count), |b| {
            b.iter(|| HookSet::build(black_box(&hit), black_box(&desired)))
        });
    }

    group.finish();
}

criterion_group!(benches, bench_name_matcher, bench_resolve, bench_class_configuration);
criterion_main!(benches);
