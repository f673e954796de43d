// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Context propagation.
//!
//! A stack of thread-confined frames holding key/value data. Each key has a
//! [`PropagationDirective`] deciding whether its values flow down into
//! callees, up into callers, and whether they cross remote boundaries
//! through the `Correlation-Context` header.
//!
//! ```rust,ignore
//! let frame = context::enter(&config);
//! frame.read_down_propagation_headers(&request.headers());
//! frame.set_data("http_path", "/orders");
//! let outbound = frame.down_propagation_headers();
//! // frame closes when dropped
//! ```

mod directives;
mod frame;
mod headers;

pub use directives::{DataDirectives, PropagationDirective, PropagationMode};
pub use frame::{capture, depth, enter, ContextGuard, ContextSnapshot, PropagationConfig};
pub use headers::{
    decode_correlation_context, encode_correlation_context, read_joined, CORRELATION_CONTEXT_HEADER,
};
