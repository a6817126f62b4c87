use std::fmt;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Map, Value};

use crate::tools::{TabId, ToolCall};

/// Machine-readable classification of a failed request.
///
/// Serialized in `SCREAMING_SNAKE_CASE` next to the human-readable `error`.
/// Codes this build does not know deserialize as [`ErrorCode::InternalError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
	/// No live, tracked node for the given uid.
	InvalidNode,
	/// The node exists but is not an element.
	UnsupportedNodeKind,
	/// No browser peer is attached to the bridge.
	NotConnected,
	/// The peer did not answer within the request deadline.
	Timeout,
	/// The peer disconnected while the request was pending.
	ConnectionClosed,
	/// Writing the request to the peer socket failed.
	TransportError,
	/// The `tool` name is not recognized.
	UnknownTool,
	/// Malformed or missing tool parameters.
	InvalidArgument,
	/// Attaching the debugger to the tab failed.
	AttachFailed,
	#[serde(other)]
	InternalError,
}

impl ErrorCode {
	pub fn as_str(&self) -> &'static str {
		match self {
			ErrorCode::InvalidNode => "INVALID_NODE",
			ErrorCode::UnsupportedNodeKind => "UNSUPPORTED_NODE_KIND",
			ErrorCode::NotConnected => "NOT_CONNECTED",
			ErrorCode::Timeout => "TIMEOUT",
			ErrorCode::ConnectionClosed => "CONNECTION_CLOSED",
			ErrorCode::TransportError => "TRANSPORT_ERROR",
			ErrorCode::UnknownTool => "UNKNOWN_TOOL",
			ErrorCode::InvalidArgument => "INVALID_ARGUMENT",
			ErrorCode::AttachFailed => "ATTACH_FAILED",
			ErrorCode::InternalError => "INTERNAL_ERROR",
		}
	}
}

impl fmt::Display for ErrorCode {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.write_str(self.as_str())
	}
}

/// Request envelope: `{ tool, id?, tabId?, ...params }`.
///
/// Tool-specific fields are kept untyped in [`params`](Self::params) so the
/// bridge can forward requests it does not understand; the browser peer turns
/// them into a [`ToolCall`] with [`call`](Self::call).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolRequest {
	/// Correlation id. Numeric ids are accepted and normalized to strings.
	#[serde(
		default,
		deserialize_with = "deserialize_correlation_id",
		skip_serializing_if = "Option::is_none"
	)]
	pub id: Option<String>,
	/// Tool name, e.g. `"getOuterHTML"`.
	pub tool: String,
	/// Explicit tab to run against; falls back to the selected tab.
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub tab_id: Option<TabId>,
	/// Remaining tool-specific fields.
	#[serde(flatten)]
	pub params: Map<String, Value>,
}

impl ToolRequest {
	pub fn new(tool: impl Into<String>) -> Self {
		Self {
			id: None,
			tool: tool.into(),
			tab_id: None,
			params: Map::new(),
		}
	}

	pub fn with_id(mut self, id: impl Into<String>) -> Self {
		self.id = Some(id.into());
		self
	}

	pub fn with_tab(mut self, tab_id: TabId) -> Self {
		self.tab_id = Some(tab_id);
		self
	}

	pub fn with_param(mut self, key: &str, value: impl Into<Value>) -> Self {
		self.params.insert(key.to_string(), value.into());
		self
	}

	/// Parses the tool name and parameters into a typed [`ToolCall`].
	///
	/// `tabId` is lifted into [`tab_id`](Self::tab_id) during decoding, so it is
	/// handed back to the parameters here for tools that take it as input.
	pub fn call(&self) -> Result<ToolCall, RequestError> {
		match self.tab_id {
			Some(tab_id) if !self.params.contains_key("tabId") => {
				let mut params = self.params.clone();
				params.insert("tabId".to_string(), Value::from(tab_id));
				ToolCall::parse(&self.tool, &params)
			}
			_ => ToolCall::parse(&self.tool, &self.params),
		}
	}
}

/// Response envelope: `{ id?, error?, code?, ...result }`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolResponse {
	#[serde(
		default,
		deserialize_with = "deserialize_correlation_id",
		skip_serializing_if = "Option::is_none"
	)]
	pub id: Option<String>,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub error: Option<String>,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub code: Option<ErrorCode>,
	/// Tool-specific result fields.
	#[serde(flatten)]
	pub body: Map<String, Value>,
}

impl ToolResponse {
	/// Builds a success envelope from a result that serializes to a JSON object.
	pub fn success<T: Serialize>(id: Option<String>, result: &T) -> serde_json::Result<Self> {
		let body = match serde_json::to_value(result)? {
			Value::Object(map) => map,
			Value::Null => Map::new(),
			other => {
				let mut map = Map::new();
				map.insert("result".to_string(), other);
				map
			}
		};
		Ok(Self {
			id,
			error: None,
			code: None,
			body,
		})
	}

	pub fn failure(id: Option<String>, code: ErrorCode, message: impl Into<String>) -> Self {
		Self {
			id,
			error: Some(message.into()),
			code: Some(code),
			body: Map::new(),
		}
	}

	pub fn is_error(&self) -> bool {
		self.error.is_some()
	}

	/// Decodes the result fields into a typed payload.
	pub fn result<T: DeserializeOwned>(&self) -> serde_json::Result<T> {
		serde_json::from_value(Value::Object(self.body.clone()))
	}
}

/// Reasons a [`ToolRequest`] cannot be turned into a [`ToolCall`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RequestError {
	UnknownTool(String),
	InvalidParams { tool: &'static str, message: String },
}

impl RequestError {
	pub fn code(&self) -> ErrorCode {
		match self {
			RequestError::UnknownTool(_) => ErrorCode::UnknownTool,
			RequestError::InvalidParams { .. } => ErrorCode::InvalidArgument,
		}
	}
}

impl fmt::Display for RequestError {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		match self {
			RequestError::UnknownTool(tool) => write!(f, "Unknown tool: {tool}"),
			RequestError::InvalidParams { tool, message } => {
				write!(f, "Invalid parameters for {tool}: {message}")
			}
		}
	}
}

impl std::error::Error for RequestError {}

fn deserialize_correlation_id<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
	D: Deserializer<'de>,
{
	match Option::<Value>::deserialize(deserializer)? {
		None | Some(Value::Null) => Ok(None),
		Some(Value::String(s)) => Ok(Some(s)),
		Some(Value::Number(n)) => Ok(Some(n.to_string())),
		Some(other) => Err(serde::de::Error::custom(format!(
			"correlation id must be a string or number, got {other}"
		))),
	}
}

#[cfg(test)]
mod tests {
	use serde_json::json;

	use super::*;

	#[test]
	fn request_keeps_tool_fields_flat() {
		let request: ToolRequest = serde_json::from_value(json!({
			"tool": "getOuterHTML",
			"id": "abc",
			"uid": "div_0",
			"maxDepth": 2
		}))
		.unwrap();

		assert_eq!(request.id.as_deref(), Some("abc"));
		assert_eq!(request.tool, "getOuterHTML");
		assert_eq!(request.tab_id, None);
		assert_eq!(request.params["uid"], "div_0");
		assert_eq!(request.params["maxDepth"], 2);
		assert!(!request.params.contains_key("tool"));
	}

	#[test]
	fn numeric_ids_are_normalized_to_strings() {
		let request: ToolRequest =
			serde_json::from_value(json!({"tool": "getTabs", "id": 17, "tabId": 4})).unwrap();
		assert_eq!(request.id.as_deref(), Some("17"));
		assert_eq!(request.tab_id, Some(4));
	}

	#[test]
	fn request_serializes_without_absent_fields() {
		let request = ToolRequest::new("getNodes").with_param("expression", "document");
		let value = serde_json::to_value(&request).unwrap();
		assert_eq!(value, json!({"tool": "getNodes", "expression": "document"}));
	}

	#[test]
	fn failure_response_carries_code() {
		let response = ToolResponse::failure(Some("1".into()), ErrorCode::InvalidNode, "Node not found for uid: x");
		let value = serde_json::to_value(&response).unwrap();
		assert_eq!(
			value,
			json!({"id": "1", "error": "Node not found for uid: x", "code": "INVALID_NODE"})
		);
	}

	#[test]
	fn success_response_flattens_result() {
		#[derive(Serialize)]
		struct Html {
			#[serde(rename = "outerHTML")]
			outer_html: String,
		}

		let response = ToolResponse::success(
			Some("7".into()),
			&Html {
				outer_html: "<p></p>".into(),
			},
		)
		.unwrap();
		let value = serde_json::to_value(&response).unwrap();
		assert_eq!(value, json!({"id": "7", "outerHTML": "<p></p>"}));
		assert!(!response.is_error());
	}

	#[test]
	fn unknown_error_codes_fall_back_to_internal() {
		let response: ToolResponse =
			serde_json::from_value(json!({"id": "1", "error": "boom", "code": "SOMETHING_NEW"})).unwrap();
		assert_eq!(response.code, Some(ErrorCode::InternalError));
		assert!(response.is_error());
	}
}
