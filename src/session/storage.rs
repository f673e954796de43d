// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Session-scoped data storage.

use std::collections::{BTreeMap, HashMap};
use std::sync::Mutex;
use std::time::{Duration, Instant};

use tracing::debug;

use crate::config::PropagationSettings;
use crate::context::DataDirectives;
use crate::error::SessionError;
use crate::telemetry::{HealthSignal, GLOBAL_METRICS};
use crate::types::Value;

/// Size limits of one storage.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StorageLimits {
    pub max_tags: usize,
    pub max_key_size: usize,
    pub max_value_size: usize,
}

impl Default for StorageLimits {
    fn default() -> Self {
        Self::from(&PropagationSettings::default())
    }
}

impl From<&PropagationSettings> for StorageLimits {
    fn from(settings: &PropagationSettings) -> Self {
        Self {
            max_tags: settings.max_tags,
            max_key_size: settings.max_key_size,
            max_value_size: settings.max_value_size,
        }
    }
}

/// Result of an accepted write.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct WriteOutcome {
    /// Entries stored or removed.
    pub written: usize,
    /// Entries dropped by size or eligibility checks.
    pub dropped: usize,
}

#[derive(Debug)]
struct Inner {
    data: HashMap<String, Value>,
    last_touched: Instant,
}

/// A bounded bag of propagated values for one session.
///
/// All access goes through one lock, so the tag limit check and the insert
/// of a batch happen atomically.
#[derive(Debug)]
pub struct PropagationDataStorage {
    inner: Mutex<Inner>,
    limits: StorageLimits,
}

impl PropagationDataStorage {
    pub fn new(limits: StorageLimits) -> Self {
        Self {
            inner: Mutex::new(Inner {
                data: HashMap::new(),
                last_touched: Instant::now(),
            }),
            limits,
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Write a batch of values.
    ///
    /// Entries with an oversized key or value, or whose key is not eligible
    /// for browser propagation, are dropped individually. A null value
    /// removes the key. The whole batch is rejected if the remaining entries
    /// would push the storage over the tag limit.
    pub fn write_data(
        &self,
        data: &BTreeMap<String, Value>,
        directives: &DataDirectives,
    ) -> Result<WriteOutcome, SessionError> {
        let mut dropped = 0;
        let mut accepted = Vec::with_capacity(data.len());
        for (key, value) in data {
            match self.check_entry(key, value, directives) {
                Ok(()) => accepted.push((key, value)),
                Err(reason) => {
                    debug!(key = %key, reason, "Dropping session entry");
                    GLOBAL_METRICS.raise(HealthSignal::PropagationRejected);
                    dropped += 1;
                }
            }
        }

        let mut inner = self.lock();
        inner.last_touched = Instant::now();

        let mut size = inner.data.len();
        for (key, value) in &accepted {
            let present = inner.data.contains_key(key.as_str());
            match (value.is_null(), present) {
                (true, true) => size -= 1,
                (false, false) => size += 1,
                _ => {}
            }
        }
        if size > self.limits.max_tags {
            GLOBAL_METRICS.raise(HealthSignal::TagLimitReached);
            debug!(size, limit = self.limits.max_tags, "Rejecting session write batch");
            return Err(SessionError::TagLimitExceeded {
                limit: self.limits.max_tags,
                requested: size,
            });
        }

        for (key, value) in &accepted {
            if value.is_null() {
                inner.data.remove(key.as_str());
            } else {
                inner.data.insert((*key).clone(), (*value).clone());
            }
        }

        Ok(WriteOutcome {
            written: accepted.len(),
            dropped,
        })
    }

    fn check_entry(
        &self,
        key: &str,
        value: &Value,
        directives: &DataDirectives,
    ) -> Result<(), &'static str> {
        if key.is_empty() || key.chars().count() > self.limits.max_key_size {
            return Err("key size");
        }
        if !value.is_null() && value.rendered_len() > self.limits.max_value_size {
            return Err("value size");
        }
        if !directives.is_propagated_with_browser(key) {
            return Err("not eligible for session storage");
        }
        Ok(())
    }

    /// Snapshot of the stored values.
    pub fn read_data(&self) -> HashMap<String, Value> {
        let mut inner = self.lock();
        inner.last_touched = Instant::now();
        inner.data.clone()
    }

    pub fn get(&self, key: &str) -> Option<Value> {
        let mut inner = self.lock();
        inner.last_touched = Instant::now();
        inner.data.get(key).cloned()
    }

    pub fn clear(&self) {
        let mut inner = self.lock();
        inner.last_touched = Instant::now();
        inner.data.clear();
    }

    pub fn len(&self) -> usize {
        self.lock().data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Mark the storage as used now.
    pub fn touch(&self) {
        self.lock().last_touched = Instant::now();
    }

    pub fn last_touched(&self) -> Instant {
        self.lock().last_touched
    }

    /// Whether more than `ttl` has elapsed between the last touch and `now`.
    pub fn is_expired(&self, now: Instant, ttl: Duration) -> bool {
        now.saturating_duration_since(self.last_touched()) > ttl
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::{PropagationDirective, PropagationMode};
    use std::sync::Arc;

    fn browser_directives(keys: &[&str]) -> DataDirectives {
        keys.iter().fold(DataDirectives::default(), |d, k| {
            d.with(
                *k,
                PropagationDirective {
                    down: PropagationMode::Global,
                    up: PropagationMode::None,
                    is_tag: true,
                    session_storage: true,
                },
            )
        })
    }

    fn batch(entries: &[(&str, &str)]) -> BTreeMap<String, Value> {
        entries
            .iter()
            .map(|(k, v)| (k.to_string(), Value::from(*v)))
            .collect()
    }

    #[test]
    fn test_write_and_read() {
        let storage = PropagationDataStorage::new(StorageLimits::default());
        let directives = browser_directives(&["keyA"]);
        let outcome = storage.write_data(&batch(&[("keyA", "valueA")]), &directives).unwrap();
        assert_eq!(outcome, WriteOutcome { written: 1, dropped: 0 });
        assert_eq!(storage.get("keyA"), Some(Value::from("valueA")));
    }

    #[test]
    fn test_ineligible_keys_dropped() {
        let storage = PropagationDataStorage::new(StorageLimits::default());
        let outcome = storage
            .write_data(&batch(&[("keyA", "valueA")]), &DataDirectives::default())
            .unwrap();
        assert_eq!(outcome.dropped, 1);
        assert!(storage.is_empty());
    }

    #[test]
    fn test_size_limits_are_entry_level() {
        let storage = PropagationDataStorage::new(StorageLimits {
            max_tags: 10,
            max_key_size: 4,
            max_value_size: 3,
        });
        let directives = browser_directives(&["ok", "toolong", "big"]);
        let outcome = storage
            .write_data(&batch(&[("ok", "v"), ("toolong", "v"), ("big", "vvvv")]), &directives)
            .unwrap();
        assert_eq!(outcome, WriteOutcome { written: 1, dropped: 2 });
        assert_eq!(storage.len(), 1);
    }

    #[test]
    fn test_tag_limit_rejects_whole_batch() {
        let keys: Vec<String> = (0..5).map(|i| format!("k{i}")).collect();
        let key_refs: Vec<&str> = keys.iter().map(String::as_str).collect();
        let directives = browser_directives(&key_refs);
        let storage = PropagationDataStorage::new(StorageLimits {
            max_tags: 3,
            ..Default::default()
        });

        storage.write_data(&batch(&[("k0", "a"), ("k1", "b")]), &directives).unwrap();
        let err = storage
            .write_data(&batch(&[("k2", "c"), ("k3", "d")]), &directives)
            .unwrap_err();
        assert_eq!(err, SessionError::TagLimitExceeded { limit: 3, requested: 4 });
        assert_eq!(storage.len(), 2);

        // Overwriting existing keys does not grow the storage.
        storage.write_data(&batch(&[("k0", "x"), ("k1", "y"), ("k2", "z")]), &directives).unwrap();
        assert_eq!(storage.len(), 3);
    }

    #[test]
    fn test_null_removes() {
        let directives = browser_directives(&["a"]);
        let storage = PropagationDataStorage::new(StorageLimits::default());
        storage.write_data(&batch(&[("a", "1")]), &directives).unwrap();
        let mut removal = BTreeMap::new();
        removal.insert("a".to_string(), Value::Null);
        storage.write_data(&removal, &directives).unwrap();
        assert!(storage.is_empty());
    }

    #[test]
    fn test_concurrent_writers_respect_limit() {
        let keys: Vec<String> = (0..400).map(|i| format!("key{i}")).collect();
        let key_refs: Vec<&str> = keys.iter().map(String::as_str).collect();
        let directives = Arc::new(browser_directives(&key_refs));
        let storage = Arc::new(PropagationDataStorage::new(StorageLimits::default()));

        let handles: Vec<_> = (0..8)
            .map(|t| {
                let storage = Arc::clone(&storage);
                let directives = Arc::clone(&directives);
                std::thread::spawn(move || {
                    for chunk in 0..10 {
                        let batch: BTreeMap<String, Value> = (0..5)
                            .map(|i| (format!("key{}", t * 50 + chunk * 5 + i), Value::from("v")))
                            .collect();
                        let _ = storage.write_data(&batch, &directives);
                        assert!(storage.len() <= 128);
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }
        assert!(storage.len() <= 128);
    }

    #[test]
    fn test_expiry() {
        let storage = PropagationDataStorage::new(StorageLimits::default());
        let now = storage.last_touched();
        assert!(!storage.is_expired(now + Duration::from_secs(1), Duration::from_secs(5)));
        assert!(storage.is_expired(now + Duration::from_secs(6), Duration::from_secs(5)));
    }
}
