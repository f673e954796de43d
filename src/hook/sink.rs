// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Destinations for metrics and spans produced by hooks.

use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;

use tracing::{info, info_span, Span};

use crate::instrumentation::SpanKind;

/// Receives rule metrics and spans.
pub trait TelemetrySink: Send + Sync {
    fn record_metric(&self, name: &str, value: f64, tags: &BTreeMap<String, String>);

    /// Start a span and return its id.
    fn start_span(&self, name: &str, kind: SpanKind, attributes: &BTreeMap<String, String>) -> u64;

    fn end_span(&self, id: u64, error: bool);
}

/// Sink that reports through `tracing`.
#[derive(Debug, Default)]
pub struct TracingSink {
    next_id: AtomicU64,
    open: Mutex<HashMap<u64, Span>>,
}

impl TracingSink {
    pub fn new() -> Self {
        Self::default()
    }
}

impl TelemetrySink for TracingSink {
    fn record_metric(&self, name: &str, value: f64, tags: &BTreeMap<String, String>) {
        info!(target: "hookwise::metrics", metric = %name, value, tags = ?tags, "Metric recorded");
    }

    fn start_span(&self, name: &str, kind: SpanKind, attributes: &BTreeMap<String, String>) -> u64 {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed) + 1;
        let span = info_span!(
            "hook_span",
            name = %name,
            kind = ?kind,
            attributes = ?attributes,
            error = tracing::field::Empty,
        );
        self.open.lock().unwrap_or_else(|e| e.into_inner()).insert(id, span);
        id
    }

    fn end_span(&self, id: u64, error: bool) {
        let span = self.open.lock().unwrap_or_else(|e| e.into_inner()).remove(&id);
        if let Some(span) = span {
            span.record("error", error);
        }
    }
}

/// Something a hook reported.
#[derive(Debug, Clone, PartialEq)]
pub enum SinkEvent {
    Metric {
        name: String,
        value: f64,
        tags: BTreeMap<String, String>,
    },
    SpanStarted {
        id: u64,
        name: String,
        kind: SpanKind,
        attributes: BTreeMap<String, String>,
    },
    SpanEnded {
        id: u64,
        error: bool,
    },
}

/// Sink that keeps every event in memory.
#[derive(Debug, Default)]
pub struct InMemorySink {
    next_id: AtomicU64,
    events: Mutex<Vec<SinkEvent>>,
}

impl InMemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<SinkEvent> {
        self.events.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    /// Recorded values of one metric.
    pub fn metric_values(&self, name: &str) -> Vec<f64> {
        self.events()
            .into_iter()
            .filter_map(|event| match event {
                SinkEvent::Metric { name: n, value, .. } if n == name => Some(value),
                _ => None,
            })
            .collect()
    }

    pub fn clear(&self) {
        self.events.lock().unwrap_or_else(|e| e.into_inner()).clear();
    }

    fn push(&self, event: SinkEvent) {
        self.events.lock().unwrap_or_else(|e| e.into_inner()).push(event);
    }
}

impl TelemetrySink for InMemorySink {
    fn record_metric(&self, name: &str, value: f64, tags: &BTreeMap<String, String>) {
        self.push(SinkEvent::Metric {
            name: name.to_string(),
            value,
            tags: tags.clone(),
        });
    }

    fn start_span(&self, name: &str, kind: SpanKind, attributes: &BTreeMap<String, String>) -> u64 {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed) + 1;
        self.push(SinkEvent::SpanStarted {
            id,
            name: name.to_string(),
            kind,
            attributes: attributes.clone(),
        });
        id
    }

    fn end_span(&self, id: u64, error: bool) {
        self.push(SinkEvent::SpanEnded { id, error });
    }
}
