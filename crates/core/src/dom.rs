//! Generation-tagged arena mirroring a tab's DOM.
//!
//! Nodes are addressed by [`NodeId`], an index plus the generation of the slot
//! it was allocated in. Releasing a node bumps its slot's generation, so an id
//! held by anyone else (the node registry, a stale `$0` pointer) stops
//! resolving instead of silently aliasing whatever reuses the slot.
//!
//! A node can be alive but not *tracked*: [`DomTree::detach`] removes it from
//! the document without reclaiming it, mirroring an element that was removed
//! from the page but may be inserted again.

use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::RwLock;
use thiserror::Error;

/// A DOM mirror shared between an inspector and the node registry.
pub type SharedDom = Arc<RwLock<DomTree>>;

static NEXT_DOCUMENT_ID: AtomicU64 = AtomicU64::new(1);

/// Process-unique identity of one [`DomTree`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct DocumentId(u64);

impl DocumentId {
	fn next() -> Self {
		Self(NEXT_DOCUMENT_ID.fetch_add(1, Ordering::Relaxed))
	}
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId {
	index: u32,
	generation: u32,
}

impl fmt::Display for NodeId {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		write!(f, "{}v{}", self.index, self.generation)
	}
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NodeData {
	Document,
	Doctype { name: String },
	Element { tag: String, attributes: Vec<(String, String)> },
	Text(String),
	Comment(String),
}

impl NodeData {
	pub fn is_element(&self) -> bool {
		matches!(self, NodeData::Element { .. })
	}

	/// DOM `nodeName`, lowercased.
	pub fn node_name(&self) -> String {
		match self {
			NodeData::Document => "#document".to_string(),
			NodeData::Doctype { name } => name.to_ascii_lowercase(),
			NodeData::Element { tag, .. } => tag.clone(),
			NodeData::Text(_) => "#text".to_string(),
			NodeData::Comment(_) => "#comment".to_string(),
		}
	}
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum DomError {
	#[error("node {0} has been released")]
	Released(NodeId),
	#[error("cannot insert node {child} under {parent}: it would create a cycle")]
	Cycle { parent: NodeId, child: NodeId },
	#[error("node {0} cannot have children")]
	NotAContainer(NodeId),
	#[error("the document node cannot be moved")]
	DocumentRoot,
}

#[derive(Debug)]
struct Node {
	data: NodeData,
	parent: Option<NodeId>,
	children: Vec<NodeId>,
}

#[derive(Debug)]
struct Slot {
	generation: u32,
	node: Option<Node>,
}

#[derive(Debug)]
pub struct DomTree {
	id: DocumentId,
	slots: Vec<Slot>,
	free: Vec<u32>,
	root: NodeId,
}

impl Default for DomTree {
	fn default() -> Self {
		Self::new()
	}
}

impl DomTree {
	pub fn new() -> Self {
		let mut tree = Self {
			id: DocumentId::next(),
			slots: Vec::new(),
			free: Vec::new(),
			root: NodeId {
				index: 0,
				generation: 0,
			},
		};
		tree.root = tree.alloc(NodeData::Document);
		tree
	}

	pub fn into_shared(self) -> SharedDom {
		Arc::new(RwLock::new(self))
	}

	pub fn id(&self) -> DocumentId {
		self.id
	}

	/// The document node.
	pub fn root(&self) -> NodeId {
		self.root
	}

	fn alloc(&mut self, data: NodeData) -> NodeId {
		let node = Node {
			data,
			parent: None,
			children: Vec::new(),
		};
		if let Some(index) = self.free.pop() {
			let slot = &mut self.slots[index as usize];
			slot.node = Some(node);
			NodeId {
				index,
				generation: slot.generation,
			}
		} else {
			let index = self.slots.len() as u32;
			self.slots.push(Slot {
				generation: 0,
				node: Some(node),
			});
			NodeId {
				index,
				generation: 0,
			}
		}
	}

	fn get(&self, id: NodeId) -> Option<&Node> {
		self.slots
			.get(id.index as usize)
			.filter(|slot| slot.generation == id.generation)
			.and_then(|slot| slot.node.as_ref())
	}

	fn get_mut(&mut self, id: NodeId) -> Result<&mut Node, DomError> {
		self.slots
			.get_mut(id.index as usize)
			.filter(|slot| slot.generation == id.generation)
			.and_then(|slot| slot.node.as_mut())
			.ok_or(DomError::Released(id))
	}

	/// Creates a detached element; `tag` is stored lowercased.
	pub fn create_element(&mut self, tag: &str) -> NodeId {
		self.alloc(NodeData::Element {
			tag: tag.to_ascii_lowercase(),
			attributes: Vec::new(),
		})
	}

	pub fn create_text(&mut self, text: impl Into<String>) -> NodeId {
		self.alloc(NodeData::Text(text.into()))
	}

	pub fn create_comment(&mut self, text: impl Into<String>) -> NodeId {
		self.alloc(NodeData::Comment(text.into()))
	}

	pub fn create_doctype(&mut self, name: impl Into<String>) -> NodeId {
		self.alloc(NodeData::Doctype { name: name.into() })
	}

	/// Sets or replaces an attribute, keeping first-set order.
	pub fn set_attribute(&mut self, id: NodeId, name: &str, value: &str) -> Result<(), DomError> {
		match &mut self.get_mut(id)?.data {
			NodeData::Element { attributes, .. } => {
				match attributes.iter_mut().find(|(key, _)| key == name) {
					Some((_, existing)) => *existing = value.to_string(),
					None => attributes.push((name.to_string(), value.to_string())),
				}
				Ok(())
			}
			_ => Err(DomError::NotAContainer(id)),
		}
	}

	/// Moves `child` to the end of `parent`'s children.
	pub fn append_child(&mut self, parent: NodeId, child: NodeId) -> Result<(), DomError> {
		if child == self.root {
			return Err(DomError::DocumentRoot);
		}
		let container = self.get(parent).ok_or(DomError::Released(parent))?;
		if !matches!(container.data, NodeData::Document | NodeData::Element { .. }) {
			return Err(DomError::NotAContainer(parent));
		}
		let has_children = !self.get(child).ok_or(DomError::Released(child))?.children.is_empty();
		// A childless node can only be its own ancestor.
		let cycles = if has_children {
			self.ancestors_inclusive(parent).any(|ancestor| ancestor == child)
		} else {
			child == parent
		};
		if cycles {
			return Err(DomError::Cycle { parent, child });
		}

		self.detach(child)?;
		self.get_mut(child)?.parent = Some(parent);
		self.get_mut(parent)?.children.push(child);
		Ok(())
	}

	/// Creates an element with attributes and appends it to `parent`.
	pub fn append_element(
		&mut self,
		parent: NodeId,
		tag: &str,
		attributes: &[(&str, &str)],
	) -> Result<NodeId, DomError> {
		let id = self.create_element(tag);
		for (name, value) in attributes {
			self.set_attribute(id, name, value)?;
		}
		self.append_child(parent, id)?;
		Ok(id)
	}

	pub fn append_text(&mut self, parent: NodeId, text: &str) -> Result<NodeId, DomError> {
		let id = self.create_text(text);
		self.append_child(parent, id)?;
		Ok(id)
	}

	pub fn append_comment(&mut self, parent: NodeId, text: &str) -> Result<NodeId, DomError> {
		let id = self.create_comment(text);
		self.append_child(parent, id)?;
		Ok(id)
	}

	/// Removes `id` from its parent. The node and its subtree stay alive.
	pub fn detach(&mut self, id: NodeId) -> Result<(), DomError> {
		let Some(parent) = self.get_mut(id)?.parent.take() else {
			return Ok(());
		};
		if let Ok(parent) = self.get_mut(parent) {
			parent.children.retain(|child| *child != id);
		}
		Ok(())
	}

	/// Detaches `id` and reclaims its whole subtree.
	pub fn release(&mut self, id: NodeId) -> Result<(), DomError> {
		if id == self.root {
			return Err(DomError::DocumentRoot);
		}
		self.detach(id)?;
		let mut stack = vec![id];
		while let Some(current) = stack.pop() {
			let slot = &mut self.slots[current.index as usize];
			if let Some(node) = slot.node.take() {
				slot.generation = slot.generation.wrapping_add(1);
				self.free.push(current.index);
				stack.extend(node.children);
			}
		}
		Ok(())
	}

	pub fn is_alive(&self, id: NodeId) -> bool {
		self.get(id).is_some()
	}

	/// Alive and connected to the document node.
	pub fn is_tracked(&self, id: NodeId) -> bool {
		self.is_alive(id) && self.ancestors_inclusive(id).last() == Some(self.root)
	}

	pub fn data(&self, id: NodeId) -> Option<&NodeData> {
		self.get(id).map(|node| &node.data)
	}

	pub fn is_element(&self, id: NodeId) -> bool {
		self.data(id).is_some_and(NodeData::is_element)
	}

	pub fn node_name(&self, id: NodeId) -> Option<String> {
		self.data(id).map(NodeData::node_name)
	}

	pub fn tag_name(&self, id: NodeId) -> Option<&str> {
		match self.data(id)? {
			NodeData::Element { tag, .. } => Some(tag),
			_ => None,
		}
	}

	pub fn attributes(&self, id: NodeId) -> &[(String, String)] {
		match self.data(id) {
			Some(NodeData::Element { attributes, .. }) => attributes,
			_ => &[],
		}
	}

	pub fn attribute(&self, id: NodeId, name: &str) -> Option<&str> {
		self.attributes(id)
			.iter()
			.find(|(key, _)| key == name)
			.map(|(_, value)| value.as_str())
	}

	pub fn class_list(&self, id: NodeId) -> impl Iterator<Item = &str> {
		self.attribute(id, "class").unwrap_or_default().split_whitespace()
	}

	pub fn parent(&self, id: NodeId) -> Option<NodeId> {
		self.get(id)?.parent
	}

	pub fn children(&self, id: NodeId) -> &[NodeId] {
		self.get(id).map_or(&[], |node| node.children.as_slice())
	}

	pub fn element_children(&self, id: NodeId) -> impl Iterator<Item = NodeId> + '_ {
		self.children(id)
			.iter()
			.copied()
			.filter(|child| self.is_element(*child))
	}

	/// Parent chain of `id`, nearest first, excluding `id` itself.
	pub fn ancestors(&self, id: NodeId) -> impl Iterator<Item = NodeId> + '_ {
		std::iter::successors(self.parent(id), move |current| self.parent(*current))
	}

	fn ancestors_inclusive(&self, id: NodeId) -> impl Iterator<Item = NodeId> + '_ {
		std::iter::successors(Some(id), move |current| self.parent(*current))
	}

	/// Descendants of `id` in document order, excluding `id`.
	pub fn descendants(&self, id: NodeId) -> Vec<NodeId> {
		let mut out = Vec::new();
		let mut stack: Vec<NodeId> = self.children(id).iter().rev().copied().collect();
		while let Some(current) = stack.pop() {
			out.push(current);
			stack.extend(self.children(current).iter().rev().copied());
		}
		out
	}

	/// Concatenated text of all text descendants.
	pub fn text_content(&self, id: NodeId) -> String {
		match self.data(id) {
			Some(NodeData::Text(text) | NodeData::Comment(text)) => text.clone(),
			Some(_) => self
				.descendants(id)
				.into_iter()
				.filter_map(|node| match self.data(node) {
					Some(NodeData::Text(text)) => Some(text.as_str()),
					_ => None,
				})
				.collect(),
			None => String::new(),
		}
	}

	/// Absolute element path such as `/html/body/div[2]`.
	///
	/// A positional index is added only when siblings share the tag name.
	/// Returns `None` for untracked nodes and non-elements.
	pub fn xpath_of(&self, id: NodeId) -> Option<String> {
		if !self.is_tracked(id) || !self.is_element(id) {
			return None;
		}
		let mut steps = Vec::new();
		for node in self.ancestors_inclusive(id).filter(|node| self.is_element(*node)) {
			let tag = self.tag_name(node)?;
			let parent = self.parent(node)?;
			let same_tag: Vec<NodeId> = self
				.element_children(parent)
				.filter(|sibling| self.tag_name(*sibling) == Some(tag))
				.collect();
			if same_tag.len() > 1 {
				let position = same_tag.iter().position(|sibling| *sibling == node)? + 1;
				steps.push(format!("{tag}[{position}]"));
			} else {
				steps.push(tag.to_string());
			}
		}
		steps.reverse();
		Some(format!("/{}", steps.join("/")))
	}

	/// Resolves an absolute element path produced by [`xpath_of`](Self::xpath_of).
	pub fn find_by_xpath(&self, xpath: &str) -> Option<NodeId> {
		let path = xpath.strip_prefix('/')?;
		let mut current = self.root;
		for step in path.split('/') {
			let (tag, position) = match step.split_once('[') {
				Some((tag, rest)) => (tag, rest.strip_suffix(']')?.parse::<usize>().ok()?),
				None => (step, 1),
			};
			let tag = tag.to_ascii_lowercase();
			current = self
				.element_children(current)
				.filter(|child| self.tag_name(*child) == Some(tag.as_str()))
				.nth(position.checked_sub(1)?)?;
		}
		(current != self.root).then_some(current)
	}
}
