// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Logging and health metrics.
//!
//! - **Logging**: `tracing` events and spans, installed by [`init_telemetry`]
//! - **Health**: counters for the signals operators watch (invalid sessions,
//!   reconciliation failures, propagation rejections, rejected configurations)
//! - **Timing**: latency histograms for reconciliation batches, configuration
//!   resolution and action executions
//!
//! ```rust,ignore
//! use hookwise::telemetry::{init_telemetry, TelemetryConfig, GLOBAL_METRICS};
//!
//! let _guard = init_telemetry(&TelemetryConfig::default())?;
//! println!("{}", GLOBAL_METRICS.snapshot().format_report());
//! ```

mod init;
pub mod metrics;
mod spans;

pub use init::{init_telemetry, TelemetryConfig, TelemetryGuard};
pub use metrics::{HealthSignal, Metrics, MetricsSnapshot, Timings, GLOBAL_METRICS};
pub use spans::{ActionSpan, TimedOperation};
