// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Span helpers for consistent instrumentation.

use std::time::Instant;
use tracing::{debug_span, Span};

/// RAII guard timing one action execution inside a hook.
///
/// Records the action name, duration and success to metrics.
pub struct ActionSpan {
    action: String,
    start: Instant,
    span: Span,
}

impl ActionSpan {
    pub fn start(action: &str, data_key: &str) -> Self {
        let span = debug_span!(
            "action",
            action = %action,
            key = %data_key,
            duration_us = tracing::field::Empty,
            success = tracing::field::Empty,
        );

        Self {
            action: action.to_string(),
            start: Instant::now(),
            span,
        }
    }

    pub fn span(&self) -> &Span {
        &self.span
    }

    /// Finish the span, recording duration and success.
    pub fn finish(self, success: bool) {
        let duration = self.start.elapsed();
        self.span.record("duration_us", duration.as_micros() as u64);
        self.span.record("success", success);

        #[cfg(feature = "telemetry")]
        super::metrics::GLOBAL_METRICS.record_action(&self.action, duration, success);
    }

    pub fn finish_with_result<T, E>(self, result: &Result<T, E>) {
        self.finish(result.is_ok());
    }
}

/// RAII guard timing a named operation.
///
/// The duration is recorded when the guard is dropped.
pub struct TimedOperation {
    name: &'static str,
    start: Instant,
    span: Span,
}

impl TimedOperation {
    pub fn start(name: &'static str) -> Self {
        let span = debug_span!(
            "operation",
            op = %name,
            duration_ms = tracing::field::Empty,
        );

        Self {
            name,
            start: Instant::now(),
            span,
        }
    }

    pub fn elapsed(&self) -> std::time::Duration {
        self.start.elapsed()
    }

    pub fn span(&self) -> &Span {
        &self.span
    }
}

impl Drop for TimedOperation {
    fn drop(&mut self) {
        let duration = self.start.elapsed();
        self.span.record("duration_ms", duration.as_secs_f64() * 1000.0);

        #[cfg(feature = "telemetry")]
        super::metrics::GLOBAL_METRICS.record_operation(self.name, duration);
        #[cfg(not(feature = "telemetry"))]
        let _ = self.name;
    }
}

/// Time the rest of the enclosing block.
///
/// ```rust,ignore
/// fn reconcile() {
///     let _timer = timed!("hook.reconcile_batch");
///     // ...
/// }
/// ```
#[macro_export]
macro_rules! timed {
    ($name:expr) => {
        $crate::telemetry::TimedOperation::start($name)
    };
}
