// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Context propagation across frames, threads, remote calls and browser sessions.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use http::{HeaderMap, HeaderValue};

use hookwise::config::{DataSettings, InstrumentationSettings, PropagationSettings};
use hookwise::context::{self, PropagationMode, CORRELATION_CONTEXT_HEADER};
use hookwise::error::SessionError;
use hookwise::session::PropagationSessionStore;
use hookwise::{Engine, RecordingBackend, Value};

fn global_down(session_storage: bool) -> DataSettings {
    DataSettings {
        down_propagation: PropagationMode::Global,
        session_storage,
        ..Default::default()
    }
}

fn browser_settings() -> InstrumentationSettings {
    let mut settings = InstrumentationSettings::default();
    settings.data.insert("keyA".to_string(), global_down(true));
    settings.data.insert("keyB".to_string(), global_down(false));
    settings
}

fn engine() -> Engine {
    let engine = Engine::new(Arc::new(RecordingBackend::new()));
    engine.apply_settings(browser_settings()).unwrap();
    engine
}

fn session_headers(session_id: &str) -> HeaderMap {
    let mut headers = HeaderMap::new();
    headers.insert("session-id", HeaderValue::from_str(session_id).unwrap());
    headers
}

// ============================================================================
// Browser sessions
// ============================================================================

#[test]
fn test_session_storage_values_reach_inbound_context() {
    let engine = engine();
    let session_id = "a".repeat(64);

    let storage = engine
        .sessions()
        .get_or_create_data_storage(&session_id)
        .expect("64 char session id is accepted");
    let mut data = BTreeMap::new();
    data.insert("keyA".to_string(), Value::from("valueA"));
    storage
        .write_data(&data, engine.configuration().directives())
        .unwrap();

    let guard = engine.enter_context();
    guard.read_down_propagation_headers(&session_headers(&session_id));
    assert_eq!(guard.get_data("keyA"), Some(Value::from("valueA")));
    assert_eq!(guard.session_id(), Some(session_id));
}

#[test]
fn test_keys_without_session_storage_are_not_stored() {
    let engine = engine();
    let session_id = "b".repeat(64);
    let storage = engine.sessions().get_or_create_data_storage(&session_id).unwrap();

    let mut data = BTreeMap::new();
    data.insert("keyB".to_string(), Value::from("valueB"));
    let outcome = storage
        .write_data(&data, engine.configuration().directives())
        .unwrap();
    assert_eq!(outcome.written, 0);
    assert_eq!(outcome.dropped, 1);

    let guard = engine.enter_context();
    guard.read_down_propagation_headers(&session_headers(&session_id));
    assert_eq!(guard.get_data("keyB"), None);
}

#[test]
fn test_header_values_override_session_values() {
    let engine = engine();
    let session_id = "c".repeat(32);
    let storage = engine.sessions().get_or_create_data_storage(&session_id).unwrap();
    let mut data = BTreeMap::new();
    data.insert("keyA".to_string(), Value::from("stored"));
    storage
        .write_data(&data, engine.configuration().directives())
        .unwrap();

    let mut headers = session_headers(&session_id);
    headers.insert(CORRELATION_CONTEXT_HEADER, HeaderValue::from_static("keyA=fresh"));
    let guard = engine.enter_context();
    guard.read_down_propagation_headers(&headers);
    assert_eq!(guard.get_data("keyA"), Some(Value::from("fresh")));
}

#[test]
fn test_closing_inbound_frame_writes_session_data() {
    let engine = engine();
    let session_id = "d".repeat(20);
    {
        let guard = engine.enter_context();
        guard.read_down_propagation_headers(&session_headers(&session_id));
        guard.set_data("keyA", "written");
        guard.set_data("keyB", "not eligible");
    }

    let storage = engine.sessions().get_data_storage(&session_id).unwrap();
    assert_eq!(storage.get("keyA"), Some(Value::from("written")));
    assert_eq!(storage.get("keyB"), None);
}

#[test]
fn test_session_id_length_bounds() {
    let store = PropagationSessionStore::new(PropagationSettings::default());
    assert!(store.get_or_create_data_storage(&"x".repeat(8)).is_none());
    assert!(store.get_or_create_data_storage(&"x".repeat(64)).is_some());
    assert!(store.get_or_create_data_storage(&"x".repeat(513)).is_none());
    assert_eq!(store.len(), 1);
}

#[test]
fn test_idle_sessions_expire() {
    let store = PropagationSessionStore::new(PropagationSettings {
        session_ttl: 1_000,
        ..Default::default()
    });
    store.get_or_create_data_storage(&"e".repeat(16)).unwrap();

    assert_eq!(store.sweep_at(Instant::now()), 0);
    assert_eq!(store.sweep_at(Instant::now() + Duration::from_secs(2)), 1);
    assert!(store.get_data_storage(&"e".repeat(16)).is_none());
}

#[test]
fn test_concurrent_writers_respect_tag_limit() {
    let mut settings = InstrumentationSettings::default();
    for i in 0..200 {
        settings.data.insert(format!("key{i}"), global_down(true));
    }
    let engine = Engine::new(Arc::new(RecordingBackend::new()));
    let config = engine.apply_settings(settings).unwrap();
    let storage = engine
        .sessions()
        .get_or_create_data_storage(&"f".repeat(16))
        .unwrap();

    // 20 batches of 10 distinct keys; only 12 fit under the limit of 128.
    let handles: Vec<_> = (0..8)
        .map(|t| {
            let storage = Arc::clone(&storage);
            let config = Arc::clone(&config);
            thread::spawn(move || {
                let mut rejected = 0;
                for batch in (t..20).step_by(8) {
                    let data: BTreeMap<String, Value> = (0..10usize)
                        .map(|i| (format!("key{}", batch * 10 + i), Value::Long(i as i64)))
                        .collect();
                    if let Err(SessionError::TagLimitExceeded { limit, .. }) =
                        storage.write_data(&data, config.directives())
                    {
                        assert_eq!(limit, 128);
                        rejected += 1;
                    }
                }
                rejected
            })
        })
        .collect();
    let rejected: usize = handles.into_iter().map(|h| h.join().unwrap()).sum();

    assert_eq!(storage.len(), 120);
    assert_eq!(rejected, 8);
}

// ============================================================================
// Frames and remote calls
// ============================================================================

#[test]
fn test_remote_round_trip() {
    let mut settings = InstrumentationSettings::default();
    settings.data.insert(
        "tenant".to_string(),
        DataSettings {
            down_propagation: PropagationMode::Global,
            ..Default::default()
        },
    );
    settings.data.insert(
        "status".to_string(),
        DataSettings {
            up_propagation: PropagationMode::Global,
            ..Default::default()
        },
    );
    let client = Engine::new(Arc::new(RecordingBackend::new()));
    client.apply_settings(settings.clone()).unwrap();

    let outbound = client.enter_context();
    outbound.set_data("tenant", "acme");
    outbound.set_data("local_only", "hidden");
    let request = outbound.down_propagation_headers();

    // the server runs its own frames on another thread
    let response = thread::spawn(move || {
        let server = Engine::new(Arc::new(RecordingBackend::new()));
        server.apply_settings(settings).unwrap();
        let inbound = server.enter_context();
        inbound.read_down_propagation_headers(&request);
        assert_eq!(inbound.get_data("tenant"), Some(Value::from("acme")));
        assert_eq!(inbound.get_data("local_only"), None);
        inbound.set_data("status", 204i64);
        inbound.up_propagation_headers()
    })
    .join()
    .unwrap();

    outbound.read_up_propagation_headers(&response);
    assert_eq!(outbound.get_data("status"), Some(Value::Long(204)));
}

#[test]
fn test_context_follows_work_to_another_thread() {
    let engine = engine();
    let guard = engine.enter_context();
    guard.set_data("keyA", "parent");
    let snapshot = context::capture().expect("a frame is open");

    let seen = thread::spawn(move || {
        let child = snapshot.enter();
        let value = child.get_data("keyA");
        child.close();
        (value, context::depth())
    })
    .join()
    .unwrap();

    assert_eq!(seen, (Some(Value::from("parent")), 0));
    assert_eq!(context::depth(), 1);
}
