// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Server-side session storage for browser propagation.
//!
//! A stateless remote client (typically a browser) sends an opaque session
//! id header with each call. Values eligible for session storage are kept
//! here between calls so later calls can be correlated with earlier ones.
//!
//! # Example
//!
//! ```rust,ignore
//! use hookwise::session::PropagationSessionStore;
//!
//! let store = PropagationSessionStore::new(settings.propagation.clone());
//! if let Some(storage) = store.get_or_create_data_storage(session_id) {
//!     storage.write_data(&values, &directives)?;
//! }
//! ```

mod storage;
mod store;

pub use storage::{PropagationDataStorage, StorageLimits, WriteOutcome};
pub use store::PropagationSessionStore;
