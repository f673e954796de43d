// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Hook lifecycle.
//!
//! - [`class_config`]: which rules and sensors apply to a type
//! - [`method_hook`]: per-method hook generation and execution
//! - [`manager`]: reconciliation of applied hooks against the configuration
//! - [`backend`]: the weaving collaborator

pub mod backend;
pub mod cache;
pub mod class_config;
pub mod manager;
pub mod method_hook;
mod registry;
pub mod sensors;
mod sink;

pub use backend::{InstrumentationBackend, RecordingBackend};
pub use cache::{MemberCache, MemberKey};
pub use class_config::ClassInstrumentationConfiguration;
pub use manager::{BatchReport, HookManager, TypeState};
pub use method_hook::{HookInvocation, HookSet, MethodHook, MethodHookConfiguration};
pub use registry::{Action, ActionInvocation, ActionRegistry, InvocationContext};
pub use sensors::{default_sensors, SpecialSensor};
pub use sink::{InMemorySink, SinkEvent, TelemetrySink, TracingSink};
