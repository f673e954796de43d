// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Hookwise - in-process instrumentation engine.
//!
//! Decides which cross-cutting behavior (metrics, spans, context
//! propagation) is woven into which methods of every loaded type, keeps that
//! decision in line with a hot-reloadable configuration, and propagates
//! context data within a process and across remote calls.
//!
//! # Architecture
//!
//! - [`types`] - Type and method descriptions, dynamic values
//! - [`error`] - Error types and result aliases
//! - [`config`] - Raw settings and file loading
//! - [`instrumentation`] - Scope, action and rule resolution into snapshots
//! - [`hook`] - Per-type decisions, method hooks and reconciliation
//! - [`context`] - Thread-confined context frames and header codec
//! - [`session`] - Browser session storage
//! - [`telemetry`] - Logging setup and health metrics
//! - [`engine`] - Facade tying everything together
//!
//! # Example
//!
//! ```rust,ignore
//! use hookwise::{config, Engine, RecordingBackend};
//!
//! let engine = Engine::new(Arc::new(RecordingBackend::new()));
//! engine.apply_settings(config::load_settings_file(path)?)?;
//! engine.discover_type(ty);
//! engine.start();
//! ```

pub mod config;
pub mod context;
pub mod engine;
pub mod error;
pub mod hook;
pub mod instrumentation;
pub mod session;
pub mod telemetry;
pub mod types;

// Re-export commonly used types at crate root
pub use engine::{Engine, EngineBuilder};
pub use error::{ActionError, BackendError, ConfigError, HookError, Result, SessionError};
pub use hook::{
    ActionRegistry, HookManager, InstrumentationBackend, InvocationContext, MethodHook,
    RecordingBackend,
};
pub use instrumentation::{ConfigurationResolver, InstrumentationConfiguration, Violation};
pub use types::{MethodDescription, TypeDescription, Value};

/// Hookwise version.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
