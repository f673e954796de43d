// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Thread-confined context frames.
//!
//! Each thread keeps a stack of frames. A frame sees the data of its parent
//! whose keys propagate down, overlaid with its own writes. On close, writes
//! whose keys propagate up are handed to the parent, and keys with global
//! up-propagation are collected for outbound response headers.
//!
//! Frames are opened with [`enter`] and closed when the returned
//! [`ContextGuard`] is dropped, on every exit path.

use std::cell::RefCell;
use std::collections::{BTreeMap, HashMap};
use std::marker::PhantomData;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use http::HeaderMap;
use tracing::{debug, trace};

use crate::session::PropagationSessionStore;
use crate::types::Value;

use super::directives::DataDirectives;
use super::headers::{
    decode_correlation_context, encode_correlation_context, read_joined, CORRELATION_CONTEXT_HEADER,
};

static NEXT_FRAME_ID: AtomicU64 = AtomicU64::new(1);

thread_local! {
    static FRAMES: RefCell<Vec<Frame>> = const { RefCell::new(Vec::new()) };
}

/// Propagation settings shared by all frames of one configuration.
#[derive(Debug, Clone)]
pub struct PropagationConfig {
    directives: Arc<DataDirectives>,
    session_id_header: String,
    sessions: Option<Arc<PropagationSessionStore>>,
}

impl PropagationConfig {
    pub fn new(directives: Arc<DataDirectives>) -> Self {
        Self {
            directives,
            session_id_header: "session-id".to_string(),
            sessions: None,
        }
    }

    /// Header name carrying the browser session id.
    pub fn with_session_id_header(mut self, name: &str) -> Self {
        self.session_id_header = name.to_ascii_lowercase();
        self
    }

    /// Session store used for browser propagation.
    pub fn with_sessions(mut self, sessions: Arc<PropagationSessionStore>) -> Self {
        self.sessions = Some(sessions);
        self
    }

    pub fn directives(&self) -> &DataDirectives {
        &self.directives
    }

    pub fn session_id_header(&self) -> &str {
        &self.session_id_header
    }
}

struct Frame {
    id: u64,
    config: Arc<PropagationConfig>,
    /// Parent data visible to this frame. Shared until a parent writes.
    inherited: Arc<HashMap<String, Value>>,
    /// Values set in this frame or handed up by children.
    local: HashMap<String, Value>,
    /// Cached view handed to children; reset on every local write.
    down_view: Option<Arc<HashMap<String, Value>>>,
    /// Values with global up-propagation collected from this frame and its children.
    up_global: BTreeMap<String, Value>,
    session_id: Option<String>,
    /// Whether this frame read the session id and writes session data back on close.
    owns_session: bool,
}

impl Frame {
    fn new(config: Arc<PropagationConfig>, inherited: Arc<HashMap<String, Value>>, session_id: Option<String>) -> Self {
        Self {
            id: NEXT_FRAME_ID.fetch_add(1, Ordering::Relaxed),
            config,
            inherited,
            local: HashMap::new(),
            down_view: None,
            up_global: BTreeMap::new(),
            session_id,
            owns_session: false,
        }
    }

    fn get(&self, key: &str) -> Option<&Value> {
        self.local
            .get(key)
            .or_else(|| self.inherited.get(key))
            .filter(|v| !v.is_null())
    }

    fn set(&mut self, key: String, value: Value) {
        self.local.insert(key, value);
        self.down_view = None;
    }

    fn down_view(&mut self) -> Arc<HashMap<String, Value>> {
        if self.local.is_empty() {
            return Arc::clone(&self.inherited);
        }
        if let Some(view) = &self.down_view {
            return Arc::clone(view);
        }
        let directives = self.config.directives();
        let mut view = (*self.inherited).clone();
        for (key, value) in &self.local {
            if directives.down(key).is_propagated() {
                view.insert(key.clone(), value.clone());
            } else {
                view.remove(key);
            }
        }
        let view = Arc::new(view);
        self.down_view = Some(Arc::clone(&view));
        view
    }

    fn visible(&self) -> BTreeMap<String, Value> {
        let mut data: BTreeMap<String, Value> = self
            .inherited
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();
        for (key, value) in &self.local {
            data.insert(key.clone(), value.clone());
        }
        data.retain(|_, v| !v.is_null());
        data
    }

    fn own_global_up(&self) -> BTreeMap<String, Value> {
        let directives = self.config.directives();
        let mut data = self.up_global.clone();
        for (key, value) in &self.local {
            if directives.up(key).is_global() {
                data.insert(key.clone(), value.clone());
            }
        }
        data
    }

    fn finish(self, parent: Option<&mut Frame>) {
        let directives = self.config.directives();

        let mut up_global = self.up_global.clone();
        let mut handed_up = Vec::new();
        for (key, value) in &self.local {
            let up = directives.up(key);
            if up.is_propagated() {
                handed_up.push((key.clone(), value.clone()));
            }
            if up.is_global() {
                up_global.insert(key.clone(), value.clone());
            }
        }

        if self.owns_session {
            self.write_session_data();
        }

        if let Some(parent) = parent {
            for (key, value) in handed_up {
                parent.set(key, value);
            }
            parent.up_global.extend(up_global);
        }
        trace!(frame = self.id, "Closed context frame");
    }

    fn write_session_data(&self) {
        let (Some(store), Some(session_id)) = (&self.config.sessions, &self.session_id) else {
            return;
        };
        let directives = self.config.directives();
        let data: BTreeMap<String, Value> = self
            .local
            .iter()
            .filter(|(k, _)| directives.is_propagated_with_browser(k))
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();
        if data.is_empty() {
            return;
        }
        if let Some(storage) = store.get_or_create_data_storage(session_id) {
            if let Err(e) = storage.write_data(&data, directives) {
                debug!(error = %e, "Session data not written");
            }
        }
    }
}

/// Open a frame on the current thread.
///
/// The frame inherits the data of the innermost open frame, if any.
pub fn enter(config: &Arc<PropagationConfig>) -> ContextGuard {
    let id = FRAMES.with(|frames| {
        let mut frames = frames.borrow_mut();
        let (inherited, session_id) = match frames.last_mut() {
            Some(parent) => (parent.down_view(), parent.session_id.clone()),
            None => (Arc::new(HashMap::new()), None),
        };
        let frame = Frame::new(Arc::clone(config), inherited, session_id);
        let id = frame.id;
        frames.push(frame);
        id
    });
    trace!(frame = id, "Entered context frame");
    ContextGuard::new(id)
}

/// Number of open frames on the current thread.
pub fn depth() -> usize {
    FRAMES.with(|frames| frames.borrow().len())
}

/// Capture the innermost frame's down-propagated data for another thread.
pub fn capture() -> Option<ContextSnapshot> {
    FRAMES.with(|frames| {
        let mut frames = frames.borrow_mut();
        let frame = frames.last_mut()?;
        Some(ContextSnapshot {
            config: Arc::clone(&frame.config),
            data: frame.down_view(),
            session_id: frame.session_id.clone(),
        })
    })
}

fn close(id: u64) {
    let _ = FRAMES.try_with(|frames| {
        let mut frames = frames.borrow_mut();
        let Some(pos) = frames.iter().position(|f| f.id == id) else {
            return;
        };
        while frames.len() > pos {
            let Some(frame) = frames.pop() else { break };
            frame.finish(frames.last_mut());
        }
    });
}

/// Data of a frame, carried to another thread.
#[derive(Debug, Clone)]
pub struct ContextSnapshot {
    config: Arc<PropagationConfig>,
    data: Arc<HashMap<String, Value>>,
    session_id: Option<String>,
}

impl ContextSnapshot {
    /// Open a frame on the current thread that inherits the captured data.
    pub fn enter(&self) -> ContextGuard {
        let id = FRAMES.with(|frames| {
            let frame = Frame::new(
                Arc::clone(&self.config),
                Arc::clone(&self.data),
                self.session_id.clone(),
            );
            let id = frame.id;
            frames.borrow_mut().push(frame);
            id
        });
        ContextGuard::new(id)
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.data.get(key)
    }
}

/// Handle of an open frame. Dropping it closes the frame.
///
/// Closing a frame that is not the innermost one closes every frame opened
/// above it first. Operations on an already closed frame are no-ops.
#[must_use = "the frame closes when the guard is dropped"]
#[derive(Debug)]
pub struct ContextGuard {
    id: u64,
    _not_send: PhantomData<*const ()>,
}

impl ContextGuard {
    fn new(id: u64) -> Self {
        Self {
            id,
            _not_send: PhantomData,
        }
    }

    fn with_frame<R>(&self, f: impl FnOnce(&mut Frame) -> R) -> Option<R> {
        FRAMES.with(|frames| {
            frames
                .borrow_mut()
                .iter_mut()
                .rev()
                .find(|frame| frame.id == self.id)
                .map(f)
        })
    }

    pub fn is_open(&self) -> bool {
        self.with_frame(|_| ()).is_some()
    }

    /// Set a value in this frame. A null value hides inherited data.
    pub fn set_data(&self, key: impl Into<String>, value: impl Into<Value>) {
        let key = key.into();
        let value = value.into();
        self.with_frame(|frame| frame.set(key, value));
    }

    pub fn get_data(&self, key: &str) -> Option<Value> {
        self.with_frame(|frame| frame.get(key).cloned()).flatten()
    }

    /// All data visible in this frame.
    pub fn data(&self) -> BTreeMap<String, Value> {
        self.with_frame(|frame| frame.visible()).unwrap_or_default()
    }

    /// Visible data whose keys are tags.
    pub fn tags(&self) -> BTreeMap<String, Value> {
        self.with_frame(|frame| {
            let directives = Arc::clone(&frame.config.directives);
            let mut data = frame.visible();
            data.retain(|k, _| directives.is_tag(k));
            data
        })
        .unwrap_or_default()
    }

    /// Browser session id read from inbound headers, here or in a parent frame.
    pub fn session_id(&self) -> Option<String> {
        self.with_frame(|frame| frame.session_id.clone()).flatten()
    }

    /// Read data and the session id from inbound request headers.
    ///
    /// Only keys with global down-propagation are accepted. If the session
    /// id addresses an existing storage, its browser-eligible values are
    /// pulled in without overriding header values.
    pub fn read_down_propagation_headers(&self, headers: &HeaderMap) {
        self.with_frame(|frame| {
            let config = Arc::clone(&frame.config);
            let directives = config.directives();

            if let Some(text) = read_joined(headers, CORRELATION_CONTEXT_HEADER) {
                for (key, value) in decode_correlation_context(&text) {
                    if directives.down(&key).is_global() {
                        frame.set(key, value);
                    } else {
                        debug!(key = %key, "Ignoring inbound key without global down-propagation");
                    }
                }
            }

            let session_id = headers
                .get(config.session_id_header())
                .and_then(|v| v.to_str().ok())
                .map(str::to_string);
            if let Some(session_id) = session_id {
                if let Some(storage) = config.sessions.as_ref().and_then(|s| s.get_data_storage(&session_id)) {
                    for (key, value) in storage.read_data() {
                        if directives.is_propagated_with_browser(&key) && !frame.local.contains_key(&key) {
                            frame.set(key, value);
                        }
                    }
                }
                frame.session_id = Some(session_id);
                frame.owns_session = true;
            }
        });
    }

    /// Read data from the response headers of an outbound remote call.
    ///
    /// Only keys with global up-propagation are accepted.
    pub fn read_up_propagation_headers(&self, headers: &HeaderMap) {
        self.with_frame(|frame| {
            let Some(text) = read_joined(headers, CORRELATION_CONTEXT_HEADER) else {
                return;
            };
            let config = Arc::clone(&frame.config);
            for (key, value) in decode_correlation_context(&text) {
                if config.directives().up(&key).is_global() {
                    frame.set(key, value);
                }
            }
        });
    }

    /// Headers to attach to an outbound remote call.
    pub fn down_propagation_headers(&self) -> HeaderMap {
        let data = self
            .with_frame(|frame| {
                let directives = Arc::clone(&frame.config.directives);
                let mut data = frame.visible();
                data.retain(|k, _| directives.down(k).is_global());
                data
            })
            .unwrap_or_default();
        correlation_headers(&data)
    }

    /// Headers to attach to the response of the current inbound call.
    pub fn up_propagation_headers(&self) -> HeaderMap {
        let data = self.with_frame(|frame| frame.own_global_up()).unwrap_or_default();
        correlation_headers(&data)
    }

    /// Close the frame now.
    pub fn close(self) {}
}

impl Drop for ContextGuard {
    fn drop(&mut self) {
        close(self.id);
    }
}

fn correlation_headers(data: &BTreeMap<String, Value>) -> HeaderMap {
    let mut headers = HeaderMap::new();
    if let Some(value) = encode_correlation_context(data.iter().map(|(k, v)| (k.as_str(), v))) {
        headers.insert(CORRELATION_CONTEXT_HEADER, value);
    }
    headers
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::PropagationSettings;
    use crate::context::{PropagationDirective, PropagationMode};
    use http::HeaderValue;

    fn directive(down: PropagationMode, up: PropagationMode) -> PropagationDirective {
        PropagationDirective {
            down,
            up,
            is_tag: true,
            session_storage: false,
        }
    }

    fn config(directives: DataDirectives) -> Arc<PropagationConfig> {
        Arc::new(PropagationConfig::new(Arc::new(directives)))
    }

    #[test]
    fn test_down_propagation() {
        let config = config(
            DataDirectives::default()
                .with("local", directive(PropagationMode::None, PropagationMode::None)),
        );
        let root = enter(&config);
        root.set_data("visible", "a");
        root.set_data("local", "b");
        {
            let child = enter(&config);
            assert_eq!(child.get_data("visible"), Some(Value::from("a")));
            assert_eq!(child.get_data("local"), None);
        }
        assert_eq!(root.get_data("local"), Some(Value::from("b")));
    }

    #[test]
    fn test_up_propagation() {
        let config = config(
            DataDirectives::default()
                .with("up", directive(PropagationMode::ProcessLocal, PropagationMode::ProcessLocal)),
        );
        let root = enter(&config);
        {
            let child = enter(&config);
            child.set_data("up", 1i64);
            child.set_data("down_only", 2i64);
        }
        assert_eq!(root.get_data("up"), Some(Value::Long(1)));
        assert_eq!(root.get_data("down_only"), None);
    }

    #[test]
    fn test_child_writes_do_not_leak_into_siblings() {
        let config = config(DataDirectives::default());
        let root = enter(&config);
        root.set_data("k", "root");
        {
            let child = enter(&config);
            child.set_data("k", "child");
            assert_eq!(child.get_data("k"), Some(Value::from("child")));
        }
        let sibling = enter(&config);
        assert_eq!(sibling.get_data("k"), Some(Value::from("root")));
    }

    #[test]
    fn test_closing_outer_frame_closes_inner() {
        let config = config(DataDirectives::default());
        let base = depth();
        let outer = enter(&config);
        let inner = enter(&config);
        assert_eq!(depth(), base + 2);
        drop(outer);
        assert_eq!(depth(), base);
        assert!(!inner.is_open());
        inner.set_data("ignored", "x");
        drop(inner);
        assert_eq!(depth(), base);
    }

    #[test]
    fn test_headers_round_trip_global_only() {
        let config = config(
            DataDirectives::default()
                .with("trace", directive(PropagationMode::Global, PropagationMode::None))
                .with("back", directive(PropagationMode::None, PropagationMode::Global)),
        );
        let mut inbound = HeaderMap::new();
        inbound.insert(
            CORRELATION_CONTEXT_HEADER,
            HeaderValue::from_static("trace=abc,other=x,back=y"),
        );

        let root = enter(&config);
        root.read_down_propagation_headers(&inbound);
        assert_eq!(root.get_data("trace"), Some(Value::from("abc")));
        assert_eq!(root.get_data("other"), None);
        assert_eq!(root.get_data("back"), None);

        let outbound = root.down_propagation_headers();
        assert_eq!(outbound.get(CORRELATION_CONTEXT_HEADER).unwrap(), "trace=abc");

        {
            let child = enter(&config);
            child.set_data("back", "result");
        }
        let response = root.up_propagation_headers();
        assert_eq!(response.get(CORRELATION_CONTEXT_HEADER).unwrap(), "back=result");
    }

    #[test]
    fn test_session_round_trip() {
        let directives = DataDirectives::default().with(
            "keyA",
            PropagationDirective {
                session_storage: true,
                ..directive(PropagationMode::ProcessLocal, PropagationMode::None)
            },
        );
        let store = Arc::new(PropagationSessionStore::new(PropagationSettings::default()));
        let config = Arc::new(
            PropagationConfig::new(Arc::new(directives))
                .with_session_id_header("Session-Id")
                .with_sessions(Arc::clone(&store)),
        );
        let mut headers = HeaderMap::new();
        headers.insert("session-id", HeaderValue::from_static("0123456789abcdef"));

        {
            let frame = enter(&config);
            frame.read_down_propagation_headers(&headers);
            assert_eq!(frame.session_id().as_deref(), Some("0123456789abcdef"));
            frame.set_data("keyA", "valueA");
            frame.set_data("other", "ignored");
        }

        let storage = store.get_data_storage("0123456789abcdef").unwrap();
        assert_eq!(storage.len(), 1);

        let frame = enter(&config);
        frame.read_down_propagation_headers(&headers);
        assert_eq!(frame.get_data("keyA"), Some(Value::from("valueA")));
    }

    #[test]
    fn test_snapshot_crosses_threads() {
        let config = config(DataDirectives::default());
        let root = enter(&config);
        root.set_data("user", "alice");
        let snapshot = capture().unwrap();

        let seen = std::thread::spawn(move || {
            let frame = snapshot.enter();
            frame.get_data("user")
        })
        .join()
        .unwrap();
        assert_eq!(seen, Some(Value::from("alice")));
    }
}
