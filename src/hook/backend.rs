// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Instrumentation backend.
//!
//! The backend performs the actual weaving of a [`HookSet`] into a loaded
//! type. The hook manager calls it only when a type's configuration changed.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use tracing::debug;

use crate::error::BackendError;
use crate::types::TypeDescription;

use super::method_hook::HookSet;

/// Weaves hook sets into types.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait InstrumentationBackend: Send + Sync {
    /// Replace the hooks of a type with the given set.
    async fn instrument(&self, ty: &TypeDescription, hooks: &HookSet) -> Result<(), BackendError>;

    /// Remove all hooks from a type.
    async fn deinstrument(&self, ty: &TypeDescription) -> Result<(), BackendError>;
}

/// Backend that records what would be woven instead of weaving it.
///
/// Used by the `plan` command and by tests.
#[derive(Debug, Default)]
pub struct RecordingBackend {
    applied: Mutex<HashMap<String, Arc<HookSet>>>,
    failing: Mutex<HashSet<String>>,
    instrument_calls: AtomicUsize,
    deinstrument_calls: AtomicUsize,
}

impl RecordingBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every call for the named type fail.
    pub fn fail_type(&self, type_name: impl Into<String>) {
        self.failing
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert(type_name.into());
    }

    pub fn recover_type(&self, type_name: &str) {
        self.failing
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .remove(type_name);
    }

    /// The hook set currently woven into a type.
    pub fn applied(&self, type_name: &str) -> Option<Arc<HookSet>> {
        self.applied
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .get(type_name)
            .cloned()
    }

    /// Names of all instrumented types, sorted.
    pub fn instrumented_types(&self) -> Vec<String> {
        let mut names: Vec<String> = self
            .applied
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .keys()
            .cloned()
            .collect();
        names.sort();
        names
    }

    pub fn instrument_calls(&self) -> usize {
        self.instrument_calls.load(Ordering::Relaxed)
    }

    pub fn deinstrument_calls(&self) -> usize {
        self.deinstrument_calls.load(Ordering::Relaxed)
    }

    fn check(&self, ty: &TypeDescription) -> Result<(), BackendError> {
        let failing = self.failing.lock().unwrap_or_else(|e| e.into_inner());
        if failing.contains(&ty.name) {
            return Err(BackendError::rebuild(&ty.name, "rejected by recording backend"));
        }
        Ok(())
    }
}

#[async_trait]
impl InstrumentationBackend for RecordingBackend {
    async fn instrument(&self, ty: &TypeDescription, hooks: &HookSet) -> Result<(), BackendError> {
        self.instrument_calls.fetch_add(1, Ordering::Relaxed);
        self.check(ty)?;
        debug!(type_name = %ty.name, methods = hooks.methods.len(), "Recorded hook set");
        self.applied
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert(ty.name.clone(), Arc::new(hooks.clone()));
        Ok(())
    }

    async fn deinstrument(&self, ty: &TypeDescription) -> Result<(), BackendError> {
        self.deinstrument_calls.fetch_add(1, Ordering::Relaxed);
        self.check(ty)?;
        self.applied
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .remove(&ty.name);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_recording_backend_tracks_hooks() {
        let backend = RecordingBackend::new();
        let ty = TypeDescription::new("Dummy");
        let hooks = HookSet::empty("Dummy");

        backend.instrument(&ty, &hooks).await.unwrap();
        assert_eq!(backend.instrumented_types(), vec!["Dummy".to_string()]);
        assert!(backend.applied("Dummy").is_some());

        backend.deinstrument(&ty).await.unwrap();
        assert!(backend.applied("Dummy").is_none());
        assert_eq!(backend.instrument_calls(), 1);
        assert_eq!(backend.deinstrument_calls(), 1);
    }

    #[tokio::test]
    async fn test_recording_backend_failure() {
        let backend = RecordingBackend::new();
        backend.fail_type("Broken");
        let ty = TypeDescription::new("Broken");

        let err = backend.instrument(&ty, &HookSet::empty("Broken")).await.unwrap_err();
        assert!(matches!(err, BackendError::RebuildFailed { .. }));
        assert!(backend.applied("Broken").is_none());

        backend.recover_type("Broken");
        assert!(backend.instrument(&ty, &HookSet::empty("Broken")).await.is_ok());
    }

    #[tokio::test]
    async fn test_mock_backend() {
        let mut mock = MockInstrumentationBackend::new();
        mock.expect_deinstrument()
            .times(1)
            .returning(|ty| Err(BackendError::Unmodifiable(ty.name.clone())));

        let err = mock.deinstrument(&TypeDescription::new("Fixed")).await.unwrap_err();
        assert_eq!(err.to_string(), "Type not modifiable: Fixed");
    }
}
