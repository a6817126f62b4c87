//! Wire types for the devcss tool bridge.
//!
//! Both directions of the bridge speak the same envelope: a flat JSON object
//! with a `tool` name (requests only), an optional correlation `id`, and
//! tool-specific fields alongside. Responses echo the `id` and carry either the
//! tool's result fields or an `error` string with a machine-readable `code`.
//!
//! # Main Types
//!
//! - [`ToolRequest`] - Request envelope as received from a caller
//! - [`ToolResponse`] - Response envelope as returned by the browser peer
//! - [`ToolCall`] - Typed view of a request, produced by [`ToolRequest::call`]
//! - [`ErrorCode`] - Error classification carried next to `error`

use std::time::Duration;

mod envelope;
mod tools;

pub use envelope::{ErrorCode, RequestError, ToolRequest, ToolResponse};
pub use tools::{
	ComputedStyleParams, ComputedStyleResult, GetNodesParams, MatchedStylesParams, NodeSummary,
	NodesResult, OuterHtmlParams, OuterHtmlResult, SelectTabParams, SelectTabResult,
	StyleSheetResult, TabId, TabInfo, TabsResult, ToolCall,
};

/// Default listening host for the bridge socket.
pub const DEFAULT_HOST: &str = "127.0.0.1";

/// Default listening port for the bridge socket.
pub const DEFAULT_PORT: u16 = 9333;

/// Deadline for a single request to be answered by the browser peer.
pub const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Uid that always resolves to the inspected tab's document root.
pub const DOCUMENT_UID: &str = "document";

/// Uid that always resolves to the element currently selected in DevTools.
pub const SELECTED_UID: &str = "$0";
