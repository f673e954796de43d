// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Instrumentation configuration resolution.
//!
//! Turns declarative scopes, rules and actions into one immutable
//! [`InstrumentationConfiguration`] per accepted configuration:
//!
//! - [`scope`]: type/method predicates, narrow-scope check, exclusion cycles
//! - [`action`] and [`binder`]: action definitions and validated action calls
//! - [`rule`]: include flattening, metrics and tracing settings
//! - [`resolver`]: the snapshot and its version counter
//!
//! Problems are never thrown: every check contributes [`Violation`]s and a
//! configuration with any violation is rejected as a whole.

pub mod action;
pub mod binder;
mod cycles;
mod matcher;
pub mod resolver;
pub mod rule;
pub mod scope;
mod violation;

pub use action::{ResolvedAction, SpecialParameter};
pub use binder::{convert_constant, validate_action_call, ActionCall, Conditions, DeclaredType};
pub use cycles::{find_cycles, format_cycle};
pub use matcher::NameMatcher;
pub use resolver::{validate, ConfigurationResolver, InstrumentationConfiguration};
pub use rule::{InstrumentationRule, MetricRecording, MetricValue, Phase, RuleTracing, SpanKind};
pub use scope::{resolve_scopes, ResolvedScope};
pub use violation::Violation;
