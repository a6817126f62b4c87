//! In-memory stand-ins for the debugger and inspector collaborators.
//!
//! A [`FakeDebugger`] serves a fixed set of tabs. Each tab has a [`FakePage`]
//! that builds a fresh DOM every time an inspector is opened, so a re-created
//! session gets a new document just like a real re-attach. Styles come from a
//! small list of [`FakeRule`]s plus `style` attributes, with a simplified
//! cascade: later rules beat earlier ones and inline beats everything.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use devcss_protocol::{TabId, TabInfo};
use parking_lot::Mutex;

use crate::dom::{DomError, DomTree, NodeId, SharedDom};
use crate::error::{Error, Result};
use crate::expression::SelectorList;
use crate::inspector::{Debugger, Inspector, InspectorOptions, MatchedStylesOptions};
use crate::styles::{Declaration, InheritedStyles, MatchedStyles, StyleRule};

const INHERITED_PROPERTIES: &[&str] = &[
	"color",
	"cursor",
	"font-family",
	"font-size",
	"font-style",
	"font-weight",
	"letter-spacing",
	"line-height",
	"text-align",
	"visibility",
	"white-space",
];

fn is_inherited(name: &str) -> bool {
	name.starts_with("--") || INHERITED_PROPERTIES.contains(&name)
}

type Builder = Arc<dyn Fn(&mut DomTree) -> std::result::Result<(), DomError> + Send + Sync>;

/// A stylesheet rule; `selectors` may be a comma-separated list.
#[derive(Debug, Clone)]
pub struct FakeRule {
	selectors: Vec<String>,
	declarations: Vec<(String, String)>,
}

#[derive(Clone)]
pub struct FakePage {
	build: Builder,
	rules: Vec<FakeRule>,
}

impl FakePage {
	pub fn new(build: impl Fn(&mut DomTree) -> std::result::Result<(), DomError> + Send + Sync + 'static) -> Self {
		Self {
			build: Arc::new(build),
			rules: Vec::new(),
		}
	}

	pub fn rule(mut self, selectors: &str, declarations: &[(&str, &str)]) -> Self {
		self.rules.push(FakeRule {
			selectors: selectors.split(',').map(|s| s.trim().to_string()).collect(),
			declarations: declarations
				.iter()
				.map(|(name, value)| (name.to_string(), value.to_string()))
				.collect(),
		});
		self
	}

	/// A small page:
	///
	/// ```text
	/// <html>
	///   <head><title>Fixture</title></head>
	///   <body class="page">
	///     <div id="main" class="card primary" style="margin-top: 4px">
	///       <h1>Title</h1>
	///       <p class="lead">Hello <b>world</b></p>
	///     </div>
	///     <div class="card">Second</div>
	///     <!-- footer -->
	///   </body>
	/// </html>
	/// ```
	pub fn simple() -> Self {
		Self::new(|tree| {
			let html = tree.append_element(tree.root(), "html", &[])?;
			let head = tree.append_element(html, "head", &[])?;
			let title = tree.append_element(head, "title", &[])?;
			tree.append_text(title, "Fixture")?;
			let body = tree.append_element(html, "body", &[("class", "page")])?;
			let main = tree.append_element(
				body,
				"div",
				&[("id", "main"), ("class", "card primary"), ("style", "margin-top: 4px")],
			)?;
			let h1 = tree.append_element(main, "h1", &[])?;
			tree.append_text(h1, "Title")?;
			let lead = tree.append_element(main, "p", &[("class", "lead")])?;
			tree.append_text(lead, "Hello ")?;
			let bold = tree.append_element(lead, "b", &[])?;
			tree.append_text(bold, "world")?;
			let second = tree.append_element(body, "div", &[("class", "card")])?;
			tree.append_text(second, "Second")?;
			tree.append_comment(body, " footer ")?;
			Ok(())
		})
		.rule("body", &[("color", "#333"), ("font-size", "14px")])
		.rule(".card, .panel", &[("padding", "8px"), ("color", "red")])
		.rule("#main", &[("color", "blue"), ("--accent", "teal"), ("--unused", "1px")])
		.rule("p", &[("margin", "0"), ("border-color", "var(--accent)")])
	}
}

/// Inspector over a page built by [`FakePage`].
pub struct FakeInspector {
	dom: SharedDom,
	selected: Option<NodeId>,
	rules: Vec<FakeRule>,
	released: Arc<AtomicUsize>,
}

impl FakeInspector {
	pub fn new(page: &FakePage, options: &InspectorOptions) -> Result<Self> {
		let mut tree = DomTree::new();
		(page.build)(&mut tree)?;
		let selected = options
			.selected_xpath
			.as_deref()
			.and_then(|xpath| tree.find_by_xpath(xpath));
		Ok(Self {
			dom: tree.into_shared(),
			selected,
			rules: page.rules.clone(),
			released: Arc::new(AtomicUsize::new(0)),
		})
	}

	fn own_styles(&self, tree: &DomTree, node: NodeId) -> (Vec<Declaration>, Vec<StyleRule>) {
		let inline = tree
			.attribute(node, "style")
			.map(parse_style_attribute)
			.unwrap_or_default();

		let mut matched = Vec::new();
		for rule in &self.rules {
			let matched_selectors: Vec<String> = rule
				.selectors
				.iter()
				.filter(|selector| {
					SelectorList::parse(selector).is_ok_and(|parsed| parsed.matches(tree, node))
				})
				.cloned()
				.collect();
			if matched_selectors.is_empty() {
				continue;
			}
			matched.push(StyleRule {
				all_selectors: rule.selectors.clone(),
				matched_selectors,
				properties: rule
					.declarations
					.iter()
					.map(|(name, value)| Declaration::new(name.as_str(), value.as_str(), false))
					.collect(),
				origin: Some("regular".to_string()),
			});
		}
		(inline, matched)
	}
}

/// Marks the winning declaration of each property, scanning sources from the
/// highest priority down. `seen` carries names already won by nearer sources.
fn mark_applied(inline: &mut [Declaration], matched: &mut [StyleRule], seen: &mut HashSet<String>) {
	let rules = matched.iter_mut().rev().flat_map(|rule| rule.properties.iter_mut().rev());
	for decl in inline.iter_mut().rev().chain(rules) {
		decl.applied = seen.insert(decl.name.clone());
	}
}

fn parse_style_attribute(style: &str) -> Vec<Declaration> {
	style
		.split(';')
		.filter_map(|decl| decl.split_once(':'))
		.map(|(name, value)| Declaration::new(name.trim(), value.trim(), false))
		.filter(|decl| !decl.name.is_empty())
		.collect()
}

fn drop_unused_variables(styles: &mut MatchedStyles) {
	let mut values = Vec::new();
	let mut collect = |decls: &[Declaration]| values.extend(decls.iter().map(|d| d.value.clone()));
	collect(&styles.inline);
	for rule in &styles.matched {
		collect(&rule.properties);
	}
	for parent in &styles.inherited {
		collect(&parent.inline);
		for rule in &parent.matched {
			collect(&rule.properties);
		}
	}
	let used = |decl: &Declaration| {
		!decl.name.starts_with("--")
			|| values.iter().any(|value| value.contains(&format!("var({})", decl.name)))
	};
	styles.inline.retain(used);
	for rule in &mut styles.matched {
		rule.properties.retain(used);
	}
	for parent in &mut styles.inherited {
		parent.inline.retain(used);
		for rule in &mut parent.matched {
			rule.properties.retain(used);
		}
	}
}

#[async_trait]
impl Inspector for FakeInspector {
	fn document(&self) -> SharedDom {
		Arc::clone(&self.dom)
	}

	fn selected(&self) -> Option<NodeId> {
		self.selected
	}

	async fn matched_styles(&self, node: NodeId, options: MatchedStylesOptions) -> Result<MatchedStyles> {
		let tree = self.dom.read();
		if !tree.is_element(node) {
			return Err(Error::Inspector(format!("Node {node} is not an element")));
		}

		let mut seen = HashSet::new();
		let (mut inline, mut matched) = self.own_styles(&tree, node);
		mark_applied(&mut inline, &mut matched, &mut seen);

		let mut inherited = Vec::new();
		let ancestors = tree.ancestors(node).filter(|ancestor| tree.is_element(*ancestor));
		for (distance, ancestor) in ancestors.enumerate() {
			let (mut parent_inline, mut parent_matched) = self.own_styles(&tree, ancestor);
			parent_inline.retain(|decl| is_inherited(&decl.name));
			for rule in &mut parent_matched {
				rule.properties.retain(|decl| is_inherited(&decl.name));
			}
			parent_matched.retain(|rule| !rule.properties.is_empty());
			if parent_inline.is_empty() && parent_matched.is_empty() {
				continue;
			}
			mark_applied(&mut parent_inline, &mut parent_matched, &mut seen);
			inherited.push(InheritedStyles {
				distance: distance + 1,
				inline: parent_inline,
				matched: parent_matched,
			});
		}

		let mut styles = MatchedStyles {
			inline,
			attributes: Vec::new(),
			matched,
			pseudo_elements: Vec::new(),
			inherited,
		};
		if options.remove_unused_var {
			drop_unused_variables(&mut styles);
		}
		Ok(styles)
	}

	async fn computed_style(&self, node: NodeId) -> Result<BTreeMap<String, String>> {
		let styles = self
			.matched_styles(node, MatchedStylesOptions { remove_unused_var: false })
			.await?;
		let display = {
			let tree = self.dom.read();
			match tree.tag_name(node) {
				Some("span" | "b" | "a" | "em" | "strong" | "i") => "inline",
				Some("head" | "title") => "none",
				_ => "block",
			}
		};

		let mut computed = BTreeMap::from([("display".to_string(), display.to_string())]);
		let parents = styles
			.inherited
			.iter()
			.rev()
			.flat_map(|parent| parent.matched.iter().flat_map(|rule| &rule.properties).chain(&parent.inline));
		let own = styles
			.matched
			.iter()
			.flat_map(|rule| &rule.properties)
			.chain(&styles.inline);
		for decl in parents.chain(own).filter(|decl| decl.applied) {
			computed.insert(decl.name.clone(), decl.value.clone());
		}
		Ok(computed)
	}

	fn release(&self) {
		self.released.fetch_add(1, Ordering::SeqCst);
	}
}

struct FakeTab {
	info: TabInfo,
	page: FakePage,
}

#[derive(Default)]
struct DebuggerState {
	attach_delay: Duration,
	failing: HashSet<TabId>,
	attached: HashSet<TabId>,
	attach_counts: HashMap<TabId, usize>,
	detached: Vec<TabId>,
}

/// Debugger over a fixed set of fake tabs. The first tab added is active.
#[derive(Default)]
pub struct FakeDebugger {
	tabs: Vec<FakeTab>,
	state: Mutex<DebuggerState>,
	released: Arc<AtomicUsize>,
}

impl FakeDebugger {
	pub fn new() -> Self {
		Self::default()
	}

	pub fn with_tab(mut self, id: TabId, url: &str, page: FakePage) -> Self {
		let active = self.tabs.is_empty();
		self.tabs.push(FakeTab {
			info: TabInfo {
				id,
				title: format!("Tab {id}"),
				url: url.to_string(),
				active,
			},
			page,
		});
		self
	}

	pub fn with_attach_delay(self, delay: Duration) -> Self {
		self.set_attach_delay(delay);
		self
	}

	pub fn set_attach_delay(&self, delay: Duration) {
		self.state.lock().attach_delay = delay;
	}

	pub fn fail_attach(&self, tab: TabId) {
		self.state.lock().failing.insert(tab);
	}

	pub fn allow_attach(&self, tab: TabId) {
		self.state.lock().failing.remove(&tab);
	}

	/// Attach attempts for `tab`, failed ones included.
	pub fn attach_count(&self, tab: TabId) -> usize {
		self.state.lock().attach_counts.get(&tab).copied().unwrap_or(0)
	}

	pub fn is_attached(&self, tab: TabId) -> bool {
		self.state.lock().attached.contains(&tab)
	}

		pub fn detached_tabs(&self) -> Vec<TabId> {
		self.state.lock().detached.clone()
	}

	/// How many inspectors opened by this debugger have been released.
	pub fn released_count(&self) -> usize {
		self.released.load(Ordering::SeqCst)
	}

	fn page(&self, tab: TabId) -> Option<&FakePage> {
		self.tabs.iter().find(|t| t.info.id == tab).map(|t| &t.page)
	}
}

#[async_trait]
impl Debugger for FakeDebugger {
	async fn tabs(&self) -> Result<Vec<TabInfo>> {
		Ok(self.tabs.iter().map(|tab| tab.info.clone()).collect())
	}

	async fn attach(&self, tab: TabId) -> Result<()> {
		let delay = self.state.lock().attach_delay;
		if !delay.is_zero() {
			tokio::time::sleep(delay).await;
		}

		let mut state = self.state.lock();
		*state.attach_counts.entry(tab).or_default() += 1;
		if state.failing.contains(&tab) {
			return Err(Error::Attach {
				tab,
				message: "Cannot access a chrome:// URL".to_string(),
			});
		}
		if self.page(tab).is_none() {
			return Err(Error::Attach {
				tab,
				message: format!("No tab with given id {tab}"),
			});
		}
		state.attached.insert(tab);
		Ok(())
	}

	async fn detach(&self, tab: TabId) -> Result<()> {
		let mut state = self.state.lock();
		state.attached.remove(&tab);
		state.detached.push(tab);
		Ok(())
	}

	async fn inspect(&self, tab: TabId, options: InspectorOptions) -> Result<Box<dyn Inspector>> {
		if !self.state.lock().attached.contains(&tab) {
			return Err(Error::Inspector(format!("Debugger is not attached to tab {tab}")));
		}
		let page = self
			.page(tab)
			.ok_or_else(|| Error::Inspector(format!("No tab with given id {tab}")))?;
		let mut inspector = FakeInspector::new(page, &options)?;
		inspector.released = Arc::clone(&self.released);
		Ok(Box::new(inspector))
	}
}
