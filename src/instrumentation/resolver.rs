// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Configuration snapshots.
//!
//! [`ConfigurationResolver::resolve`] turns raw settings into one immutable
//! [`InstrumentationConfiguration`], or into the complete list of
//! violations if any part of the settings is invalid.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use tracing::{debug, warn};

use crate::config::InstrumentationSettings;
use crate::context::{DataDirectives, PropagationMode};
use crate::telemetry::{HealthSignal, GLOBAL_METRICS};
use crate::timed;
use crate::types::TypeDescription;

use super::action::{ResolvedAction, SpecialParameter};
use super::rule::{resolve_rules, InstrumentationRule};
use super::scope::{resolve_scopes, ResolvedScope};
use super::violation::Violation;

/// An immutable, fully validated configuration.
///
/// Replaced wholesale on every accepted reload and shared by reference.
#[derive(Debug)]
pub struct InstrumentationConfiguration {
    version: u64,
    settings: Arc<InstrumentationSettings>,
    scopes: BTreeMap<String, Arc<ResolvedScope>>,
    rules: BTreeMap<String, Arc<InstrumentationRule>>,
    actions: BTreeMap<String, Arc<ResolvedAction>>,
    directives: Arc<DataDirectives>,
}

impl InstrumentationConfiguration {
    /// The configuration in effect before any settings are applied.
    pub fn empty() -> Self {
        let settings = InstrumentationSettings::default();
        let directives = Arc::new(DataDirectives::from_settings(&settings));
        Self {
            version: 0,
            settings: Arc::new(settings),
            scopes: BTreeMap::new(),
            rules: BTreeMap::new(),
            actions: BTreeMap::new(),
            directives,
        }
    }

    pub fn version(&self) -> u64 {
        self.version
    }

    pub fn settings(&self) -> &InstrumentationSettings {
        &self.settings
    }

    pub fn scopes(&self) -> &BTreeMap<String, Arc<ResolvedScope>> {
        &self.scopes
    }

    /// Enabled rules by name.
    pub fn rules(&self) -> &BTreeMap<String, Arc<InstrumentationRule>> {
        &self.rules
    }

    pub fn rule(&self, name: &str) -> Option<&Arc<InstrumentationRule>> {
        self.rules.get(name)
    }

    pub fn actions(&self) -> &BTreeMap<String, Arc<ResolvedAction>> {
        &self.actions
    }

    pub fn directives(&self) -> &Arc<DataDirectives> {
        &self.directives
    }

    /// Whether the type lives in an ignored package.
    pub fn is_ignored(&self, ty: &TypeDescription) -> bool {
        self.settings
            .active_ignored_packages()
            .any(|prefix| ty.name.starts_with(prefix))
    }

    /// Enabled rules selecting at least one method of the type, by name.
    pub fn rules_for(&self, ty: &TypeDescription) -> Vec<Arc<InstrumentationRule>> {
        self.rules
            .values()
            .filter(|rule| rule.applies_to(ty))
            .cloned()
            .collect()
    }
}

/// Resolves settings into numbered configuration snapshots.
#[derive(Debug, Default)]
pub struct ConfigurationResolver {
    last_version: AtomicU64,
}

impl ConfigurationResolver {
    pub fn new() -> Self {
        Self::default()
    }

    /// Validate and resolve settings.
    ///
    /// All violations are collected; a rejected configuration raises the
    /// `configuration_rejected` health signal.
    pub fn resolve(
        &self,
        settings: InstrumentationSettings,
    ) -> Result<InstrumentationConfiguration, Vec<Violation>> {
        let _timer = timed!("config.resolve");

        let mut violations = Vec::new();
        let scopes = resolve_scopes(&settings.scopes, &mut violations);

        let mut actions = BTreeMap::new();
        for (name, action) in &settings.actions {
            actions.insert(
                name.clone(),
                Arc::new(ResolvedAction::resolve(name, action, &mut violations)),
            );
        }

        let rules = resolve_rules(&settings, &scopes, &actions, &mut violations);
        validate_data(&settings, &mut violations);

        if !violations.is_empty() {
            GLOBAL_METRICS.raise(HealthSignal::ConfigurationRejected);
            warn!(violations = violations.len(), "Configuration rejected");
            for violation in &violations {
                debug!(%violation, "Configuration violation");
            }
            return Err(violations);
        }

        let version = self.last_version.fetch_add(1, Ordering::SeqCst) + 1;
        let directives = Arc::new(DataDirectives::from_settings(&settings));
        debug!(version, rules = rules.len(), scopes = scopes.len(), "Configuration resolved");

        Ok(InstrumentationConfiguration {
            version,
            settings: Arc::new(settings),
            scopes,
            rules,
            actions,
            directives,
        })
    }
}

/// Validate settings without producing a snapshot.
pub fn validate(settings: &InstrumentationSettings) -> Vec<Violation> {
    match ConfigurationResolver::new().resolve(settings.clone()) {
        Ok(_) => Vec::new(),
        Err(violations) => violations,
    }
}

fn validate_data(settings: &InstrumentationSettings, violations: &mut Vec<Violation>) {
    for (key, data) in &settings.data {
        if SpecialParameter::is_reserved(key) {
            violations.push(Violation::new("Data key '{key}' is reserved").with("key", key));
        }
        if data.session_storage && data.down_propagation != PropagationMode::Global {
            violations.push(
                Violation::new("Data key '{key}' uses session storage but is not propagated globally")
                    .with("key", key),
            );
        }
    }

    let propagation = &settings.propagation;
    if propagation.min_session_id_length > propagation.max_session_id_length {
        violations.push(
            Violation::new("Session id length bounds are inverted: {min} > {max}")
                .with("min", propagation.min_session_id_length)
                .with("max", propagation.max_session_id_length),
        );
    }
    if http::HeaderName::from_bytes(propagation.session_id_header.as_bytes()).is_err() {
        violations.push(
            Violation::new("'{header}' is not a valid header name")
                .with("header", &propagation.session_id_header),
        );
    }
}
