//! Routes tool requests to tab sessions.
//!
//! [`ToolHost`] is what the browser side runs for every request it receives:
//! pick the tab (explicit `tabId`, then the selected tab, then the active
//! one), get or create that tab's session, resolve uids through the
//! [`NodeRegistry`] and answer with a [`ToolResponse`] that echoes the
//! request `id`. Failures never escape as panics or transport errors; they
//! become `{ id, error, code }` envelopes.

use std::collections::BTreeMap;
use std::sync::Arc;

use devcss_protocol::{
	ComputedStyleParams, ComputedStyleResult, MatchedStylesParams, NodeSummary, NodesResult,
	OuterHtmlParams, OuterHtmlResult, SelectTabResult, StyleSheetResult, TabId, TabsResult, ToolCall,
	ToolRequest, ToolResponse,
};
use parking_lot::Mutex;
use serde::Serialize;
use serde_json::{Map, Value};
use tracing::{debug, warn};

use crate::dom::{DomTree, NodeData, NodeId};
use crate::error::{Error, Result};
use crate::expression::{DomEvaluator, PathEvaluator, split_root};
use crate::html::{SerializeOptions, serialize};
use crate::inspector::MatchedStylesOptions;
use crate::registry::NodeRegistry;
use crate::session::{InspectorSession, SessionManager};
use crate::styles::{CommentConfig, StyleFilter, filter_matched_styles, to_stylesheet_text};

const SUMMARY_TEXT_LIMIT: usize = 100;

pub struct ToolHost {
	sessions: Arc<SessionManager>,
	registry: Arc<NodeRegistry>,
	evaluator: Arc<dyn DomEvaluator>,
	selected_tab: Mutex<Option<TabId>>,
}

impl ToolHost {
	pub fn new(sessions: Arc<SessionManager>, registry: Arc<NodeRegistry>) -> Self {
		Self {
			sessions,
			registry,
			evaluator: Arc::new(PathEvaluator),
			selected_tab: Mutex::new(None),
		}
	}

	/// Replaces the default [`PathEvaluator`] used by `getNodes`.
	pub fn with_evaluator(mut self, evaluator: Arc<dyn DomEvaluator>) -> Self {
		self.evaluator = evaluator;
		self
	}

	pub fn sessions(&self) -> &Arc<SessionManager> {
		&self.sessions
	}

	pub fn registry(&self) -> &Arc<NodeRegistry> {
		&self.registry
	}

	pub fn selected_tab(&self) -> Option<TabId> {
		*self.selected_tab.lock()
	}

	/// Handles one raw text frame. Frames that are not request envelopes are
	/// answered with an `INVALID_ARGUMENT` failure carrying whatever id could
	/// be recovered.
	pub async fn handle_frame(&self, frame: &str) -> ToolResponse {
		let value: Value = match serde_json::from_str(frame) {
			Ok(value) => value,
			Err(err) => {
				let err = Error::InvalidArgument(format!("Invalid request JSON: {err}"));
				return ToolResponse::failure(None, err.code(), err.to_string());
			}
		};
		let id = value.get("id").and_then(|id| match id {
			Value::String(s) => Some(s.clone()),
			Value::Number(n) => Some(n.to_string()),
			_ => None,
		});
		match serde_json::from_value::<ToolRequest>(value) {
			Ok(request) => self.handle(request).await,
			Err(err) => {
				let err = Error::InvalidArgument(format!("Invalid request envelope: {err}"));
				ToolResponse::failure(id, err.code(), err.to_string())
			}
		}
	}

	pub async fn handle(&self, request: ToolRequest) -> ToolResponse {
		let id = request.id.clone();
		debug!(target = "devcss", id = ?id, tool = %request.tool, tab = ?request.tab_id, "handling request");
		match self.execute(&request).await {
			Ok(body) => ToolResponse {
				id,
				error: None,
				code: None,
				body,
			},
			Err(err) => {
				warn!(target = "devcss", id = ?id, tool = %request.tool, error = %err, "request failed");
				ToolResponse::failure(id, err.code(), err.to_string())
			}
		}
	}

	async fn execute(&self, request: &ToolRequest) -> Result<Map<String, Value>> {
		match request.call()? {
			ToolCall::GetTabs => {
				let tabs = self.sessions.debugger().tabs().await?;
				to_body(&TabsResult { tabs })
			}
			ToolCall::SelectTab(params) => {
				let tabs = self.sessions.debugger().tabs().await?;
				if !tabs.iter().any(|tab| tab.id == params.tab_id) {
					return Err(Error::InvalidArgument(format!("No tab with id {}", params.tab_id)));
				}
				*self.selected_tab.lock() = Some(params.tab_id);
				to_body(&SelectTabResult {
					tab_id: params.tab_id,
				})
			}
			call => {
				let tab = self.target_tab(request.tab_id).await?;
				let session = self.sessions.get_or_create(tab).await?;
				self.run(&session, call).await
			}
		}
	}

	async fn target_tab(&self, explicit: Option<TabId>) -> Result<TabId> {
		if let Some(tab) = explicit.or_else(|| self.selected_tab()) {
			return Ok(tab);
		}
		let tabs = self.sessions.debugger().tabs().await?;
		tabs.iter()
			.find(|tab| tab.active)
			.map(|tab| tab.id)
			.ok_or(Error::NoTab)
	}

	async fn run(&self, session: &InspectorSession, call: ToolCall) -> Result<Map<String, Value>> {
		if session.is_closed() {
			return Err(Error::SessionClosed(session.tab()));
		}
		match call {
			ToolCall::GetNodes(params) => self.get_nodes(session, &params.expression),
			ToolCall::GetMatchedStyles(params) => self.matched_styles(session, params).await,
			ToolCall::GetComputedStyle(params) => self.computed_style(session, params).await,
			ToolCall::GetOuterHtml(params) => self.outer_html(session, &params),
			ToolCall::GetTabs | ToolCall::SelectTab(_) => {
				Err(Error::InvalidArgument("Tab tools do not run against a session".into()))
			}
		}
	}

	fn resolve(&self, session: &InspectorSession, uid: &str) -> Result<NodeId> {
		let inspector = session.inspector();
		self.registry
			.resolve(uid, &inspector.document(), inspector.selected())
			.ok_or_else(|| Error::InvalidNode { uid: uid.to_string() })
	}

	fn resolve_element(&self, session: &InspectorSession, uid: &str) -> Result<NodeId> {
		let node = self.resolve(session, uid)?;
		if session.document().read().is_element(node) {
			Ok(node)
		} else {
			Err(Error::UnsupportedNodeKind { uid: uid.to_string() })
		}
	}

	fn get_nodes(&self, session: &InspectorSession, expression: &str) -> Result<Map<String, Value>> {
		let (root, path) = split_root(expression)?;
		let context = self.resolve(session, root)?;
		let dom = session.document();
		let found = {
			let tree = dom.read();
			self.evaluator.evaluate(&tree, context, path)?
		};

		let uids = found
			.iter()
			.map(|node| self.registry.register(&dom, *node))
			.collect::<Result<Vec<_>>>()?;

		let tree = dom.read();
		let nodes = found
			.iter()
			.zip(uids)
			.map(|(node, uid)| summarize_node(&tree, *node, uid))
			.collect();
		to_body(&NodesResult { nodes })
	}

	async fn matched_styles(&self, session: &InspectorSession, params: MatchedStylesParams) -> Result<Map<String, Value>> {
		let node = self.resolve_element(session, &params.uid)?;
		let options = MatchedStylesOptions {
			remove_unused_var: params.remove_unused_var,
		};
		let styles = session.inspector().matched_styles(node, options).await?;
		let filter = StyleFilter {
			selectors: params.selectors,
			properties: params.properties,
			applied_only: params.applied_only,
		};
		let styles = filter_matched_styles(styles, &filter)?;
		let config = CommentConfig {
			matched_selectors: true,
			applied: !params.applied_only,
		};

		let dom = session.document();
		let tree = dom.read();
		if !tree.is_tracked(node) {
			return Err(Error::InvalidNode { uid: params.uid });
		}
		let styles = to_stylesheet_text(&styles, &tree, node, config)?;
		to_body(&StyleSheetResult { styles })
	}

	async fn computed_style(&self, session: &InspectorSession, params: ComputedStyleParams) -> Result<Map<String, Value>> {
		let node = self.resolve_element(session, &params.uid)?;
		let computed = session.inspector().computed_style(node).await?;
		let styles: BTreeMap<String, String> = match params.properties {
			None => computed,
			Some(properties) => properties
				.into_iter()
				.filter_map(|name| computed.get(&name).map(|value| (name, value.clone())))
				.collect(),
		};
		to_body(&ComputedStyleResult { styles })
	}

	fn outer_html(&self, session: &InspectorSession, params: &OuterHtmlParams) -> Result<Map<String, Value>> {
		let node = self.resolve(session, &params.uid)?;
		let dom = session.document();
		let tree = dom.read();
		if !tree.is_tracked(node) {
			return Err(Error::InvalidNode {
				uid: params.uid.clone(),
			});
		}
		let outer_html = serialize(&tree, node, &SerializeOptions::from_params(params));
		to_body(&OuterHtmlResult { outer_html })
	}
}

fn summarize_node(tree: &DomTree, node: NodeId, uid: String) -> NodeSummary {
	let text = match tree.data(node) {
		Some(NodeData::Text(text) | NodeData::Comment(text)) => {
			let text = text.trim();
			Some(match text.char_indices().nth(SUMMARY_TEXT_LIMIT) {
				Some((cut, _)) => format!("{}...", &text[..cut]),
				None => text.to_string(),
			})
		}
		_ => None,
	};
	NodeSummary {
		uid,
		node_name: tree.node_name(node).unwrap_or_default(),
		id: tree.attribute(node, "id").map(str::to_owned),
		class_name: tree.attribute(node, "class").map(str::to_owned),
		child_element_count: tree.element_children(node).count(),
		text,
	}
}

fn to_body<T: Serialize>(result: &T) -> Result<Map<String, Value>> {
	Ok(ToolResponse::success(None, result)?.body)
}
