use std::collections::BTreeMap;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::envelope::RequestError;

/// Browser tab identifier as reported by the debugger.
pub type TabId = i32;

/// Typed view of a tool request.
#[derive(Debug, Clone, PartialEq)]
pub enum ToolCall {
	GetTabs,
	SelectTab(SelectTabParams),
	GetNodes(GetNodesParams),
	GetMatchedStyles(MatchedStylesParams),
	GetComputedStyle(ComputedStyleParams),
	GetOuterHtml(OuterHtmlParams),
}

impl ToolCall {
	/// Tool names understood by the browser peer.
	pub const NAMES: [&'static str; 6] = [
		"getTabs",
		"selectTab",
		"getNodes",
		"getMatchedStyles",
		"getComputedStyle",
		"getOuterHTML",
	];

	pub fn parse(tool: &str, params: &Map<String, Value>) -> Result<Self, RequestError> {
		match tool {
			"getTabs" => Ok(ToolCall::GetTabs),
			"selectTab" => parse_params("selectTab", params).map(ToolCall::SelectTab),
			"getNodes" => parse_params("getNodes", params).map(ToolCall::GetNodes),
			"getMatchedStyles" => {
				parse_params("getMatchedStyles", params).map(ToolCall::GetMatchedStyles)
			}
			"getComputedStyle" => {
				parse_params("getComputedStyle", params).map(ToolCall::GetComputedStyle)
			}
			"getOuterHTML" => parse_params("getOuterHTML", params).map(ToolCall::GetOuterHtml),
			other => Err(RequestError::UnknownTool(other.to_string())),
		}
	}

	pub fn name(&self) -> &'static str {
		match self {
			ToolCall::GetTabs => "getTabs",
			ToolCall::SelectTab(_) => "selectTab",
			ToolCall::GetNodes(_) => "getNodes",
			ToolCall::GetMatchedStyles(_) => "getMatchedStyles",
			ToolCall::GetComputedStyle(_) => "getComputedStyle",
			ToolCall::GetOuterHtml(_) => "getOuterHTML",
		}
	}
}

fn parse_params<T: DeserializeOwned>(
	tool: &'static str,
	params: &Map<String, Value>,
) -> Result<T, RequestError> {
	serde_json::from_value(Value::Object(params.clone())).map_err(|err| RequestError::InvalidParams {
		tool,
		message: err.to_string(),
	})
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SelectTabParams {
	pub tab_id: TabId,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GetNodesParams {
	/// DOM expression rooted at `document`, `$0`, or a previously issued uid.
	pub expression: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MatchedStylesParams {
	#[serde(alias = "node")]
	pub uid: String,
	/// Regex patterns matched against each rule's matched selectors.
	#[serde(default)]
	pub selectors: Option<Vec<String>>,
	/// Substrings matched against declaration names.
	#[serde(default)]
	pub properties: Option<Vec<String>>,
	#[serde(default)]
	pub applied_only: bool,
	#[serde(default = "default_true")]
	pub remove_unused_var: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ComputedStyleParams {
	#[serde(alias = "node")]
	pub uid: String,
	/// Properties to return; every computed property when absent.
	#[serde(default)]
	pub properties: Option<Vec<String>>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OuterHtmlParams {
	#[serde(alias = "node")]
	pub uid: String,
	#[serde(default)]
	pub max_depth: Option<usize>,
	#[serde(default)]
	pub max_line_length: Option<usize>,
	#[serde(default)]
	pub max_chars: Option<usize>,
}

impl OuterHtmlParams {
	pub const DEFAULT_MAX_DEPTH: usize = 3;
	pub const DEFAULT_MAX_LINE_LENGTH: usize = 200;
	pub const DEFAULT_MAX_CHARS: usize = 100_000;
}

fn default_true() -> bool {
	true
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TabInfo {
	pub id: TabId,
	#[serde(default)]
	pub title: String,
	#[serde(default)]
	pub url: String,
	#[serde(default)]
	pub active: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TabsResult {
	pub tabs: Vec<TabInfo>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SelectTabResult {
	pub tab_id: TabId,
}

/// Short description of a node returned by `getNodes`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NodeSummary {
	pub uid: String,
	pub node_name: String,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub id: Option<String>,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub class_name: Option<String>,
	pub child_element_count: usize,
	/// Leading text content for text and comment nodes.
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub text: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodesResult {
	pub nodes: Vec<NodeSummary>,
}

/// `getMatchedStyles` result: the matched rules rendered as stylesheet text.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StyleSheetResult {
	pub styles: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ComputedStyleResult {
	pub styles: BTreeMap<String, String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OuterHtmlResult {
	#[serde(rename = "outerHTML")]
	pub outer_html: String,
}

#[cfg(test)]
mod tests {
	use serde_json::json;

	use super::*;
	use crate::{ErrorCode, ToolRequest};

	fn request(value: Value) -> ToolRequest {
		serde_json::from_value(value).unwrap()
	}

	#[test]
	fn unknown_tool_is_reported_verbatim() {
		let err = request(json!({"tool": "getCookies"})).call().unwrap_err();
		assert_eq!(err, RequestError::UnknownTool("getCookies".into()));
		assert_eq!(err.to_string(), "Unknown tool: getCookies");
		assert_eq!(err.code(), ErrorCode::UnknownTool);
	}

	#[test]
	fn matched_styles_defaults() {
		let call = request(json!({"tool": "getMatchedStyles", "uid": "div_3"}))
			.call()
			.unwrap();
		let ToolCall::GetMatchedStyles(params) = call else {
			panic!("expected getMatchedStyles");
		};
		assert_eq!(params.uid, "div_3");
		assert!(!params.applied_only);
		assert!(params.remove_unused_var);
		assert!(params.selectors.is_none());
	}

	#[test]
	fn node_is_accepted_as_uid_alias() {
		let call = request(json!({"tool": "getComputedStyle", "node": "$0", "properties": ["color"]}))
			.call()
			.unwrap();
		assert_eq!(
			call,
			ToolCall::GetComputedStyle(ComputedStyleParams {
				uid: "$0".into(),
				properties: Some(vec!["color".into()]),
			})
		);
	}

	#[test]
	fn outer_html_limits_accept_null() {
		let call = request(json!({"tool": "getOuterHTML", "uid": "document", "maxDepth": null, "maxChars": 500}))
			.call()
			.unwrap();
		let ToolCall::GetOuterHtml(params) = call else {
			panic!("expected getOuterHTML");
		};
		assert_eq!(params.max_depth, None);
		assert_eq!(params.max_chars, Some(500));
	}

	#[test]
	fn missing_expression_is_invalid_params() {
		let err = request(json!({"tool": "getNodes"})).call().unwrap_err();
		assert!(matches!(err, RequestError::InvalidParams { tool: "getNodes", .. }));
		assert_eq!(err.code(), ErrorCode::InvalidArgument);
	}

	#[test]
	fn every_name_round_trips_through_parse() {
		let params: Map<String, Value> = serde_json::from_value(json!({
			"tabId": 1,
			"expression": "document",
			"uid": "document"
		}))
		.unwrap();
		for name in ToolCall::NAMES {
			assert_eq!(ToolCall::parse(name, &params).unwrap().name(), name);
		}
	}

	#[test]
	fn select_tab_reads_lifted_tab_id() {
		let req = request(json!({"tool": "selectTab", "tabId": 12}));
		assert_eq!(req.tab_id, Some(12));
		assert_eq!(
			req.call().unwrap(),
			ToolCall::SelectTab(SelectTabParams { tab_id: 12 })
		);
	}

	#[test]
	fn outer_html_result_uses_dom_casing() {
		let value = serde_json::to_value(OuterHtmlResult {
			outer_html: "<br>".into(),
		})
		.unwrap();
		assert_eq!(value, json!({"outerHTML": "<br>"}));
	}
}
