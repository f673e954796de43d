// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Session store keyed by browser session id.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use std::time::{Duration, Instant};

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info};

use crate::config::PropagationSettings;
use crate::telemetry::{HealthSignal, GLOBAL_METRICS};

use super::storage::{PropagationDataStorage, StorageLimits};

/// Maps session ids to their data storage.
///
/// Storages are created lazily and evicted by [`sweep`](Self::sweep) once
/// their time since last touch exceeds the TTL.
#[derive(Debug)]
pub struct PropagationSessionStore {
    sessions: RwLock<HashMap<String, Arc<PropagationDataStorage>>>,
    settings: PropagationSettings,
}

impl PropagationSessionStore {
    pub fn new(settings: PropagationSettings) -> Self {
        Self {
            sessions: RwLock::new(HashMap::new()),
            settings,
        }
    }

    pub fn settings(&self) -> &PropagationSettings {
        &self.settings
    }

    /// Whether a session id has an acceptable length.
    pub fn is_valid_session_id(&self, session_id: &str) -> bool {
        let len = session_id.chars().count();
        len >= self.settings.min_session_id_length && len <= self.settings.max_session_id_length
    }

    /// Get the storage of a session, creating it if needed.
    ///
    /// Returns `None` when the id is invalid or the session limit is reached;
    /// callers treat that as "do not persist".
    pub fn get_or_create_data_storage(&self, session_id: &str) -> Option<Arc<PropagationDataStorage>> {
        if !self.is_valid_session_id(session_id) {
            GLOBAL_METRICS.raise(HealthSignal::InvalidSession);
            debug!(len = session_id.len(), "Rejecting session id with invalid length");
            return None;
        }

        if let Some(storage) = self.get_data_storage(session_id) {
            return Some(storage);
        }

        let mut sessions = self.sessions.write().unwrap_or_else(|e| e.into_inner());
        if let Some(storage) = sessions.get(session_id) {
            storage.touch();
            return Some(Arc::clone(storage));
        }
        if sessions.len() >= self.settings.max_sessions {
            GLOBAL_METRICS.raise(HealthSignal::SessionLimitReached);
            debug!(limit = self.settings.max_sessions, "Session limit reached");
            return None;
        }

        let storage = Arc::new(PropagationDataStorage::new(StorageLimits::from(&self.settings)));
        sessions.insert(session_id.to_string(), Arc::clone(&storage));
        Some(storage)
    }

    /// Get an existing storage without creating one.
    pub fn get_data_storage(&self, session_id: &str) -> Option<Arc<PropagationDataStorage>> {
        let sessions = self.sessions.read().unwrap_or_else(|e| e.into_inner());
        sessions.get(session_id).map(|storage| {
            storage.touch();
            Arc::clone(storage)
        })
    }

    /// Drop the storage of a session.
    pub fn clear_data_storage(&self, session_id: &str) -> bool {
        self.sessions
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .remove(session_id)
            .is_some()
    }

    pub fn clear(&self) {
        self.sessions.write().unwrap_or_else(|e| e.into_inner()).clear();
    }

    pub fn len(&self) -> usize {
        self.sessions.read().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Evict storages idle for longer than the TTL. Returns the number evicted.
    pub fn sweep(&self) -> usize {
        self.sweep_at(Instant::now())
    }

    /// Evict storages idle for longer than the TTL as of `now`.
    pub fn sweep_at(&self, now: Instant) -> usize {
        let ttl = self.settings.session_ttl();
        let mut sessions = self.sessions.write().unwrap_or_else(|e| e.into_inner());
        let before = sessions.len();
        sessions.retain(|_, storage| !storage.is_expired(now, ttl));
        let evicted = before - sessions.len();
        if evicted > 0 {
            debug!(evicted, remaining = sessions.len(), "Evicted expired sessions");
        }
        evicted
    }

    /// Run [`sweep`](Self::sweep) on a fixed delay until `shutdown` turns true.
    pub fn spawn_expiry_sweep(self: Arc<Self>, mut shutdown: watch::Receiver<bool>) -> JoinHandle<()> {
        let period = self.settings.sweep_interval().max(Duration::from_millis(1));
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            ticker.tick().await;

            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        self.sweep();
                    }
                    changed = shutdown.changed() => {
                        if changed.is_err() || *shutdown.borrow() {
                            break;
                        }
                    }
                }
            }
            info!("Session expiry sweep stopped");
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store() -> PropagationSessionStore {
        PropagationSessionStore::new(PropagationSettings::default())
    }

    #[test]
    fn test_session_id_length() {
        let store = store();
        assert!(store.get_or_create_data_storage(&"a".repeat(8)).is_none());
        assert!(store.get_or_create_data_storage(&"a".repeat(64)).is_some());
        assert!(store.get_or_create_data_storage(&"a".repeat(513)).is_none());
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn test_same_storage_returned() {
        let store = store();
        let id = "0123456789abcdef";
        let a = store.get_or_create_data_storage(id).unwrap();
        let b = store.get_or_create_data_storage(id).unwrap();
        assert!(Arc::ptr_eq(&a, &b));
    }

    #[test]
    fn test_session_limit() {
        let store = PropagationSessionStore::new(PropagationSettings {
            max_sessions: 2,
            ..Default::default()
        });
        assert!(store.get_or_create_data_storage("session-0000000001").is_some());
        assert!(store.get_or_create_data_storage("session-0000000002").is_some());
        assert!(store.get_or_create_data_storage("session-0000000003").is_none());
        // Existing sessions stay reachable at the limit.
        assert!(store.get_or_create_data_storage("session-0000000001").is_some());
    }

    #[test]
    fn test_sweep_evicts_expired() {
        let store = PropagationSessionStore::new(PropagationSettings {
            session_ttl: 1_000,
            ..Default::default()
        });
        let id = "0123456789abcdef";
        let storage = store.get_or_create_data_storage(id).unwrap();
        let touched = storage.last_touched();

        assert_eq!(store.sweep_at(touched + Duration::from_millis(500)), 0);
        assert!(store.get_data_storage(id).is_some());

        let later = store.get_data_storage(id).unwrap().last_touched();
        assert_eq!(store.sweep_at(later + Duration::from_millis(1_001)), 1);
        assert!(store.get_data_storage(id).is_none());
    }

    #[tokio::test]
    async fn test_background_sweep() {
        let store = Arc::new(PropagationSessionStore::new(PropagationSettings {
            session_ttl: 10,
            sweep_interval: 5,
            ..Default::default()
        }));
        store.get_or_create_data_storage("0123456789abcdef").unwrap();

        let (tx, rx) = watch::channel(false);
        let handle = Arc::clone(&store).spawn_expiry_sweep(rx);

        tokio::time::sleep(Duration::from_millis(100)).await;
        assert!(store.is_empty());

        tx.send(true).unwrap();
        handle.await.unwrap();
    }
}
