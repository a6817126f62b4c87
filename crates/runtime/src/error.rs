//! Error types for request correlation.

use std::time::Duration;

use devcss_protocol::ErrorCode;
use thiserror::Error;

/// Result type alias for correlator operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Terminal failures of a request sent to the browser peer.
#[derive(Debug, Error)]
pub enum Error {
	/// No peer is attached to the bridge.
	#[error("Extension not connected. Please ensure the browser extension is installed and running.")]
	NotConnected,

	/// No matching response arrived before the deadline.
	#[error("Request timeout after {}ms", .0.as_millis())]
	Timeout(Duration),

	/// The peer connection closed while the request was pending.
	#[error("Extension connection closed")]
	ConnectionClosed,

	/// Handing the frame to the socket writer failed.
	#[error("Transport error: {0}")]
	Transport(String),

	/// The peer answered with an error; surfaced verbatim.
	#[error("{message}")]
	Remote {
		message: String,
		code: Option<ErrorCode>,
	},

	/// A request with the same correlation id is still pending.
	#[error("Request id already pending: {0}")]
	DuplicateRequestId(String),

	/// The payload is not a request envelope.
	#[error("Invalid request payload: {0}")]
	InvalidPayload(String),

	#[error("JSON error: {0}")]
	Json(#[from] serde_json::Error),
}

impl Error {
	/// Error classification reported to the caller in the response envelope.
	pub fn code(&self) -> ErrorCode {
		match self {
			Error::NotConnected => ErrorCode::NotConnected,
			Error::Timeout(_) => ErrorCode::Timeout,
			Error::ConnectionClosed => ErrorCode::ConnectionClosed,
			Error::Transport(_) => ErrorCode::TransportError,
			Error::Remote { code, .. } => code.unwrap_or(ErrorCode::InternalError),
			Error::DuplicateRequestId(_) | Error::InvalidPayload(_) => ErrorCode::InvalidArgument,
			Error::Json(_) => ErrorCode::InternalError,
		}
	}

	pub fn is_timeout(&self) -> bool {
		matches!(self, Error::Timeout(_))
	}
}
