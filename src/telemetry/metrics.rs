// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Metrics collection for health and performance monitoring.
//!
//! Counts process-health signals and keeps coarse latency distributions
//! for named operations and for action executions inside hooks.

use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::RwLock;
use std::time::{Duration, Instant};

use once_cell::sync::Lazy;

/// Global metrics instance.
pub static GLOBAL_METRICS: Lazy<Metrics> = Lazy::new(Metrics::new);

/// Process-health signals.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HealthSignal {
    /// A session id failed length validation.
    InvalidSession,
    /// A session could not be created because the session limit was reached.
    SessionLimitReached,
    /// A write batch was rejected because it would exceed the tag limit.
    TagLimitReached,
    /// A single propagation entry was dropped.
    PropagationRejected,
    /// The backend failed to rebuild hooks for a type.
    ReconciliationFailed,
    /// A configuration delivery was rejected.
    ConfigurationRejected,
    /// An action call failed or panicked inside a hook.
    ActionFailed,
}

impl HealthSignal {
    pub const ALL: [HealthSignal; 7] = [
        Self::InvalidSession,
        Self::SessionLimitReached,
        Self::TagLimitReached,
        Self::PropagationRejected,
        Self::ReconciliationFailed,
        Self::ConfigurationRejected,
        Self::ActionFailed,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            Self::InvalidSession => "invalid_session",
            Self::SessionLimitReached => "session_limit_reached",
            Self::TagLimitReached => "tag_limit_reached",
            Self::PropagationRejected => "propagation_rejected",
            Self::ReconciliationFailed => "reconciliation_failed",
            Self::ConfigurationRejected => "configuration_rejected",
            Self::ActionFailed => "action_failed",
        }
    }

    fn index(&self) -> usize {
        *self as usize
    }
}

/// Central metrics collection.
#[derive(Debug)]
pub struct Metrics {
    /// Timings of action executions inside hooks, by action name.
    actions: RwLock<HashMap<String, Timings>>,

    /// Timings of named engine operations.
    operations: RwLock<HashMap<String, Timings>>,

    /// Health signal counters, indexed by [`HealthSignal`].
    health: [AtomicU64; 7],

    start_time: Instant,
}

impl Metrics {
    pub fn new() -> Self {
        Self {
            actions: RwLock::new(HashMap::new()),
            operations: RwLock::new(HashMap::new()),
            health: Default::default(),
            start_time: Instant::now(),
        }
    }

    /// Count a health signal.
    pub fn raise(&self, signal: HealthSignal) {
        self.health[signal.index()].fetch_add(1, Ordering::Relaxed);
    }

    pub fn health_count(&self, signal: HealthSignal) -> u64 {
        self.health[signal.index()].load(Ordering::Relaxed)
    }

    /// Record one action execution.
    pub fn record_action(&self, name: &str, duration: Duration, success: bool) {
        record(&self.actions, name, duration, success);
    }

    /// Record one engine operation.
    pub fn record_operation(&self, name: &str, duration: Duration) {
        record(&self.operations, name, duration, true);
    }

    pub fn action_timings(&self, name: &str) -> Option<Timings> {
        self.actions.read().unwrap_or_else(|e| e.into_inner()).get(name).cloned()
    }

    pub fn operation_timings(&self, name: &str) -> Option<Timings> {
        self.operations.read().unwrap_or_else(|e| e.into_inner()).get(name).cloned()
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            actions: sorted(&self.actions),
            operations: sorted(&self.operations),
            health: HealthSignal::ALL
                .iter()
                .map(|s| (*s, self.health_count(*s)))
                .collect(),
            uptime: self.start_time.elapsed(),
        }
    }

    /// Clear every timing and counter.
    pub fn reset(&self) {
        self.actions.write().unwrap_or_else(|e| e.into_inner()).clear();
        self.operations.write().unwrap_or_else(|e| e.into_inner()).clear();
        for counter in &self.health {
            counter.store(0, Ordering::Relaxed);
        }
    }
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}

fn record(map: &RwLock<HashMap<String, Timings>>, name: &str, duration: Duration, success: bool) {
    let mut map = map.write().unwrap_or_else(|e| e.into_inner());
    match map.get_mut(name) {
        Some(timings) => timings.record(duration, success),
        None => {
            let mut timings = Timings::default();
            timings.record(duration, success);
            map.insert(name.to_string(), timings);
        }
    }
}

fn sorted(map: &RwLock<HashMap<String, Timings>>) -> BTreeMap<String, Timings> {
    map.read()
        .unwrap_or_else(|e| e.into_inner())
        .iter()
        .map(|(k, v)| (k.clone(), v.clone()))
        .collect()
}

/// Upper bounds of the latency buckets, in microseconds. Hooks run in
/// microseconds, reconciliation batches in milliseconds.
const BUCKET_BOUNDS_US: [u64; 6] = [10, 100, 1_000, 10_000, 100_000, 1_000_000];

/// Count, failures and latency distribution of one named thing.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Timings {
    pub count: u64,
    pub failures: u64,
    pub total: Duration,
    pub max: Duration,
    /// One count per bucket bound, plus an overflow bucket.
    buckets: [u64; BUCKET_BOUNDS_US.len() + 1],
}

impl Timings {
    pub fn record(&mut self, duration: Duration, success: bool) {
        self.count += 1;
        if !success {
            self.failures += 1;
        }
        self.total += duration;
        self.max = self.max.max(duration);

        let micros = u64::try_from(duration.as_micros()).unwrap_or(u64::MAX);
        let bucket = BUCKET_BOUNDS_US
            .iter()
            .position(|&bound| micros <= bound)
            .unwrap_or(BUCKET_BOUNDS_US.len());
        self.buckets[bucket] += 1;
    }

    pub fn mean(&self) -> Duration {
        match u32::try_from(self.count) {
            Ok(0) => Duration::ZERO,
            Ok(count) => self.total / count,
            Err(_) => Duration::from_secs_f64(self.total.as_secs_f64() / self.count as f64),
        }
    }

    /// Share of successful records, 1.0 when nothing was recorded.
    pub fn success_rate(&self) -> f64 {
        if self.count == 0 {
            return 1.0;
        }
        (self.count - self.failures) as f64 / self.count as f64
    }

    pub fn buckets(&self) -> &[u64] {
        &self.buckets
    }

    /// Upper bound of the bucket holding the given quantile (0.0 to 1.0).
    ///
    /// The overflow bucket reports the observed maximum.
    pub fn quantile(&self, q: f64) -> Duration {
        if self.count == 0 {
            return Duration::ZERO;
        }
        let target = ((self.count as f64) * q.clamp(0.0, 1.0)).ceil().max(1.0) as u64;
        let mut seen = 0;
        for (i, count) in self.buckets.iter().enumerate() {
            seen += count;
            if seen >= target {
                return BUCKET_BOUNDS_US
                    .get(i)
                    .map(|&us| Duration::from_micros(us))
                    .unwrap_or(self.max);
            }
        }
        self.max
    }
}

/// Metrics at a point in time.
#[derive(Debug, Clone)]
pub struct MetricsSnapshot {
    pub actions: BTreeMap<String, Timings>,
    pub operations: BTreeMap<String, Timings>,
    pub health: Vec<(HealthSignal, u64)>,
    pub uptime: Duration,
}

impl MetricsSnapshot {
    pub fn health_count(&self, signal: HealthSignal) -> u64 {
        self.health
            .iter()
            .find(|(s, _)| *s == signal)
            .map_or(0, |(_, c)| *c)
    }

    /// Human-readable report, as printed by `hookwise plan --metrics`.
    pub fn format_report(&self) -> String {
        let mut report = format!("=== Metrics Report ===\n\nUptime: {:.2?}\n\nHealth:\n", self.uptime);
        for (signal, count) in &self.health {
            report.push_str(&format!("  {}: {}\n", signal.name(), count));
        }

        if !self.actions.is_empty() {
            report.push_str("\nActions:\n");
            for (name, t) in &self.actions {
                report.push_str(&format!(
                    "  {}: {} calls, {:.1}% success, mean {:.2?}\n",
                    name,
                    t.count,
                    t.success_rate() * 100.0,
                    t.mean()
                ));
            }
        }

        if !self.operations.is_empty() {
            report.push_str("\nOperations:\n");
            for (name, t) in &self.operations {
                report.push_str(&format!(
                    "  {}: {} runs, mean {:.2?}, p99 <= {:.2?}\n",
                    name,
                    t.count,
                    t.mean(),
                    t.quantile(0.99)
                ));
            }
        }
        report
    }
}
