// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Scope resolution and matching.
//!
//! A scope selects (type, method) pairs: all declared type predicates must
//! hold, and at least one method predicate must match. A scope without
//! method predicates selects nothing. Exclusions remove the selection of
//! other scopes; the exclusion graph must be acyclic.

use std::collections::BTreeMap;
use std::sync::Arc;

use crate::config::{MethodMatcherSettings, ScopeSettings};
use crate::types::{MethodDescription, TypeDescription, Visibility};

use super::cycles::{find_cycles, format_cycle};
use super::matcher::NameMatcher;
use super::violation::Violation;

/// A compiled method predicate.
#[derive(Debug, Clone, PartialEq)]
pub struct MethodMatcher {
    name: Option<NameMatcher>,
    is_constructor: bool,
    is_synchronized: Option<bool>,
    arguments: Option<Vec<String>>,
    visibility: Vec<Visibility>,
}

impl MethodMatcher {
    fn compile(settings: &MethodMatcherSettings) -> Result<Self, regex::Error> {
        let name = match (&settings.name, settings.is_constructor) {
            (Some(name), false) => Some(NameMatcher::new(
                name,
                settings.matcher_mode,
                settings.ignore_case,
            )?),
            _ => None,
        };
        Ok(Self {
            name,
            is_constructor: settings.is_constructor,
            is_synchronized: settings.is_synchronized,
            arguments: settings.arguments.clone(),
            visibility: settings.visibility.clone(),
        })
    }

    /// Test a method against this predicate.
    pub fn matches(&self, method: &MethodDescription) -> bool {
        if self.is_constructor != method.is_constructor {
            return false;
        }
        if let Some(name) = &self.name {
            if !name.matches(&method.name) {
                return false;
            }
        }
        if let Some(sync) = self.is_synchronized {
            if sync != method.is_synchronized {
                return false;
            }
        }
        if let Some(arguments) = &self.arguments {
            if arguments != &method.arguments {
                return false;
            }
        }
        self.visibility.is_empty() || self.visibility.contains(&method.visibility)
    }
}

/// A resolved, immutable scope.
#[derive(Debug)]
pub struct ResolvedScope {
    name: String,
    settings: ScopeSettings,
    type_name: Option<NameMatcher>,
    interfaces: Vec<NameMatcher>,
    superclass: Option<NameMatcher>,
    methods: Vec<MethodMatcher>,
    excludes: Vec<Arc<ResolvedScope>>,
}

impl PartialEq for ResolvedScope {
    fn eq(&self, other: &Self) -> bool {
        self.name == other.name && self.settings == other.settings && self.excludes == other.excludes
    }
}

impl ResolvedScope {
    /// Compile a scope whose excluded scopes are already resolved.
    pub fn compile(
        name: &str,
        settings: &ScopeSettings,
        excludes: Vec<Arc<ResolvedScope>>,
    ) -> Result<Self, regex::Error> {
        let type_scope = &settings.type_scope;
        Ok(Self {
            name: name.to_string(),
            settings: settings.clone(),
            type_name: type_scope.name.as_ref().map(NameMatcher::from_settings).transpose()?,
            interfaces: type_scope
                .interfaces
                .iter()
                .map(NameMatcher::from_settings)
                .collect::<Result<_, _>>()?,
            superclass: type_scope
                .superclass
                .as_ref()
                .map(NameMatcher::from_settings)
                .transpose()?,
            methods: settings
                .methods
                .iter()
                .map(MethodMatcher::compile)
                .collect::<Result<_, _>>()?,
            excludes,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn settings(&self) -> &ScopeSettings {
        &self.settings
    }

    /// Conjunction of all declared type predicates (none declared = true).
    pub fn matches_type(&self, ty: &TypeDescription) -> bool {
        if let Some(name) = &self.type_name {
            if !name.matches(&ty.name) {
                return false;
            }
        }
        if !self
            .interfaces
            .iter()
            .all(|m| ty.interfaces.iter().any(|i| m.matches(i)))
        {
            return false;
        }
        if let Some(superclass) = &self.superclass {
            if !ty.superclasses.iter().any(|s| superclass.matches(s)) {
                return false;
            }
        }
        true
    }

    /// Whether the scope selects the given method of the given type.
    pub fn matches(&self, ty: &TypeDescription, method: &MethodDescription) -> bool {
        self.matches_type(ty)
            && self.matches_method(method)
            && !self.excludes.iter().any(|ex| ex.matches(ty, method))
    }

    /// Whether the scope selects at least one method of the type.
    pub fn selects_any(&self, ty: &TypeDescription) -> bool {
        self.matches_type(ty) && ty.methods.iter().any(|m| self.matches(ty, m))
    }

    fn matches_method(&self, method: &MethodDescription) -> bool {
        if self.settings.advanced.instrument_only_inherited_methods && !method.inherited {
            return false;
        }
        self.methods.iter().any(|m| m.matches(method))
    }

    /// Whether the type predicate effectively selects every type.
    pub fn is_too_broad(&self) -> bool {
        let declared: Vec<&NameMatcher> = self
            .type_name
            .iter()
            .chain(self.interfaces.iter())
            .chain(self.superclass.iter())
            .collect();
        declared.iter().all(|m| m.is_match_all())
    }
}

/// Resolve all scopes, reporting every problem found.
///
/// Scopes with invalid patterns, unknown exclusions, exclusion cycles or a
/// too-broad type predicate are reported; scopes that can still be compiled
/// are returned so later stages can keep validating.
pub fn resolve_scopes(
    scopes: &BTreeMap<String, ScopeSettings>,
    violations: &mut Vec<Violation>,
) -> BTreeMap<String, Arc<ResolvedScope>> {
    let mut graph: BTreeMap<String, Vec<String>> = BTreeMap::new();
    for (name, settings) in scopes {
        let mut edges = Vec::new();
        for (excluded, enabled) in &settings.exclude {
            if !*enabled {
                continue;
            }
            if scopes.contains_key(excluded) {
                edges.push(excluded.clone());
            } else {
                violations.push(
                    Violation::new("Scope '{scope}' excludes the unknown scope '{excluded}'")
                        .with("scope", name)
                        .with("excluded", excluded),
                );
            }
        }
        graph.insert(name.clone(), edges);
    }

    let cycles = find_cycles(&graph);
    let mut cyclic = std::collections::HashSet::new();
    for cycle in &cycles {
        violations.push(
            Violation::new("Scope exclusions form a cycle: {cycle}")
                .with("cycle", format_cycle(cycle)),
        );
        cyclic.extend(cycle.iter().cloned());
    }

    let mut resolved: BTreeMap<String, Arc<ResolvedScope>> = BTreeMap::new();
    let mut failed = std::collections::HashSet::new();
    for name in scopes.keys() {
        resolve_one(name, scopes, &graph, &cyclic, &mut resolved, &mut failed, violations);
    }

    for (name, scope) in &resolved {
        if !scope.settings.advanced.disable_safety_mechanism && scope.is_too_broad() {
            violations.push(
                Violation::new(
                    "Scope '{scope}' matches every type; narrow its type predicate or set disable-safety-mechanism",
                )
                .with("scope", name),
            );
        }
    }
    resolved
}

fn resolve_one(
    name: &str,
    scopes: &BTreeMap<String, ScopeSettings>,
    graph: &BTreeMap<String, Vec<String>>,
    cyclic: &std::collections::HashSet<String>,
    resolved: &mut BTreeMap<String, Arc<ResolvedScope>>,
    failed: &mut std::collections::HashSet<String>,
    violations: &mut Vec<Violation>,
) -> Option<Arc<ResolvedScope>> {
    if let Some(scope) = resolved.get(name) {
        return Some(Arc::clone(scope));
    }
    if failed.contains(name) || cyclic.contains(name) {
        return None;
    }

    let mut excludes = Vec::new();
    for excluded in graph.get(name).map(Vec::as_slice).unwrap_or(&[]) {
        match resolve_one(excluded, scopes, graph, cyclic, resolved, failed, violations) {
            Some(scope) => excludes.push(scope),
            None => {
                failed.insert(name.to_string());
                return None;
            }
        }
    }

    let settings = scopes.get(name)?;
    match ResolvedScope::compile(name, settings, excludes) {
        Ok(scope) => {
            let scope = Arc::new(scope);
            resolved.insert(name.to_string(), Arc::clone(&scope));
            Some(scope)
        }
        Err(e) => {
            violations.push(
                Violation::new("Scope '{scope}' has an invalid pattern: {error}")
                    .with("scope", name)
                    .with("error", e),
            );
            failed.insert(name.to_string());
            None
        }
    }
}
