//! Seams to the browser-side collaborators.
//!
//! The bridge does not compute styles or speak the debugger protocol itself.
//! A [`Debugger`] attaches to tabs and opens an [`Inspector`] per tab; the
//! inspector keeps a [`DomTree`](crate::dom::DomTree) mirror of the page and
//! answers style queries for nodes in it.

use std::collections::BTreeMap;

use async_trait::async_trait;
use devcss_protocol::{TabId, TabInfo};

use crate::dom::{NodeId, SharedDom};
use crate::error::Result;
use crate::styles::MatchedStyles;

/// Options an inspector is opened with.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct InspectorOptions {
	/// Path of the element selected in DevTools before the session existed,
	/// used to seed `$0`.
	pub selected_xpath: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MatchedStylesOptions {
	/// Drop custom properties that no declaration references.
	pub remove_unused_var: bool,
}

impl Default for MatchedStylesOptions {
	fn default() -> Self {
		Self {
			remove_unused_var: true,
		}
	}
}

/// Low-level debugger access to browser tabs.
#[async_trait]
pub trait Debugger: Send + Sync {
	async fn tabs(&self) -> Result<Vec<TabInfo>>;

	/// Attaches the debugger to `tab`. Must succeed before [`inspect`](Self::inspect).
	async fn attach(&self, tab: TabId) -> Result<()>;

	async fn detach(&self, tab: TabId) -> Result<()>;

	/// Opens an inspector on an attached tab.
	async fn inspect(&self, tab: TabId, options: InspectorOptions) -> Result<Box<dyn Inspector>>;
}

/// Style and DOM access for one attached tab.
#[async_trait]
pub trait Inspector: Send + Sync {
	/// The live DOM mirror of the tab.
	fn document(&self) -> SharedDom;

	/// The element currently selected in DevTools (`$0`).
	fn selected(&self) -> Option<NodeId>;

	async fn matched_styles(&self, node: NodeId, options: MatchedStylesOptions) -> Result<MatchedStyles>;

	async fn computed_style(&self, node: NodeId) -> Result<BTreeMap<String, String>>;

	/// Called once when the owning session is torn down.
	fn release(&self) {}
}
