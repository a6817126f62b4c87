//! Error types for tool dispatch.

use devcss_protocol::{ErrorCode, RequestError, TabId};
use thiserror::Error;

use crate::dom::DomError;

/// Result type alias for devcss operations.
pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Error)]
pub enum Error {
	/// No live, tracked node behind the uid.
	#[error("Node not found for uid: {uid}")]
	InvalidNode { uid: String },

	#[error("Cannot record untracked node")]
	NodeNotTracked,

	#[error("Non-element nodes do not support styles for uid: {uid}")]
	UnsupportedNodeKind { uid: String },

	#[error("Unknown tool: {0}")]
	UnknownTool(String),

	#[error("{0}")]
	InvalidArgument(String),

	#[error("Failed to attach debugger to tab {tab}: {message}")]
	Attach { tab: TabId, message: String },

	/// The tab's session was torn down while the request was using it.
	#[error("Inspector session for tab {0} was closed")]
	SessionClosed(TabId),

	/// Failure reported by the inspector or debugger collaborator.
	#[error("{0}")]
	Inspector(String),

	#[error("No tab selected and no active tab found")]
	NoTab,

	#[error(transparent)]
	Dom(#[from] DomError),

	/// Socket-level failure talking to the bridge.
	#[error("Protocol error: {0}")]
	Protocol(String),

	#[error("JSON error: {0}")]
	Json(#[from] serde_json::Error),
}

impl Error {
	/// Error classification reported to the caller in the response envelope.
	pub fn code(&self) -> ErrorCode {
		match self {
			Error::InvalidNode { .. } | Error::NodeNotTracked | Error::Dom(_) => ErrorCode::InvalidNode,
			Error::UnsupportedNodeKind { .. } => ErrorCode::UnsupportedNodeKind,
			Error::UnknownTool(_) => ErrorCode::UnknownTool,
			Error::InvalidArgument(_) | Error::NoTab => ErrorCode::InvalidArgument,
			Error::Attach { .. } => ErrorCode::AttachFailed,
			Error::SessionClosed(_) => ErrorCode::ConnectionClosed,
			Error::Protocol(_) => ErrorCode::TransportError,
			Error::Inspector(_) | Error::Json(_) => ErrorCode::InternalError,
		}
	}
}

impl From<RequestError> for Error {
	fn from(err: RequestError) -> Self {
		match err {
			RequestError::UnknownTool(tool) => Error::UnknownTool(tool),
			err @ RequestError::InvalidParams { .. } => Error::InvalidArgument(err.to_string()),
		}
	}
}

impl From<tokio_tungstenite::tungstenite::Error> for Error {
	fn from(err: tokio_tungstenite::tungstenite::Error) -> Self {
		Error::Protocol(err.to_string())
	}
}
