//! DOM expressions for `getNodes`.
//!
//! An expression starts at a root (`document`, `$0`, or a uid issued
//! earlier) followed by DOM-style navigation:
//!
//! ```text
//! document.body.children[1]
//! $0.parentElement.querySelectorAll("li.active")
//! div_3.childNodes
//! ```
//!
//! Every step maps the current node list to a new one. Selectors support
//! compound selectors (`tag#id.class[attr=value]`), `*`, descendant
//! combinators and comma-separated lists.

use std::collections::HashSet;

use crate::dom::{DomTree, NodeData, NodeId};
use crate::error::{Error, Result};

/// Turns the navigation part of an expression into nodes.
pub trait DomEvaluator: Send + Sync {
	/// Evaluates `path` starting at `context`. An empty path yields `context`.
	fn evaluate(&self, tree: &DomTree, context: NodeId, path: &str) -> Result<Vec<NodeId>>;
}

/// Splits an expression into its root token and the navigation after it.
pub fn split_root(expression: &str) -> Result<(&str, &str)> {
	let expression = expression.trim();
	let end = expression
		.find(|c: char| c == '.' || c == '[' || c.is_whitespace())
		.unwrap_or(expression.len());
	if end == 0 {
		return Err(Error::InvalidArgument(format!(
			"DOM expression must start with document, $0 or a uid: {expression:?}"
		)));
	}
	Ok((&expression[..end], &expression[end..]))
}

/// Evaluator for the DOM-property navigation language described in the
/// module docs.
#[derive(Debug, Clone, Copy, Default)]
pub struct PathEvaluator;

impl DomEvaluator for PathEvaluator {
	fn evaluate(&self, tree: &DomTree, context: NodeId, path: &str) -> Result<Vec<NodeId>> {
		let mut cursor = Cursor::new(path);
		let mut current = vec![context];

		loop {
			cursor.skip_whitespace();
			match cursor.peek() {
				None => break,
				Some('.') => {
					cursor.bump();
					let name = cursor.ident();
					let argument = if cursor.eat('(') {
						let argument = cursor.string()?;
						cursor.expect(')')?;
						Some(argument)
					} else {
						None
					};
					current = apply_property(tree, &current, name, argument.as_deref())?;
				}
				Some('[') => {
					cursor.bump();
					let index = cursor.number()?;
					cursor.expect(']')?;
					let len = current.len();
					let node = current.get(index).copied().ok_or_else(|| {
						Error::InvalidArgument(format!("Index {index} out of range for {len} node(s)"))
					})?;
					current = vec![node];
				}
				Some(other) => {
					return Err(Error::InvalidArgument(format!(
						"Unexpected {other:?} at offset {} in DOM expression",
						cursor.offset()
					)));
				}
			}
		}
		Ok(current)
	}
}

fn apply_property(tree: &DomTree, nodes: &[NodeId], name: &str, argument: Option<&str>) -> Result<Vec<NodeId>> {
	let out = match (name, argument) {
		("children", None) => dedup(nodes.iter().flat_map(move |node| tree.element_children(*node))),
		("childNodes", None) => dedup(nodes.iter().flat_map(move |node| tree.children(*node).iter().copied())),
		("parentNode", None) => map_each(nodes, |node| tree.parent(node)),
		("parentElement", None) => map_each(nodes, |node| tree.parent(node).filter(|parent| tree.is_element(*parent))),
		("firstElementChild", None) => map_each(nodes, |node| tree.element_children(node).next()),
		("lastElementChild", None) => map_each(nodes, |node| tree.element_children(node).last()),
		("nextElementSibling", None) => map_each(nodes, |node| sibling(tree, node, 1)),
		("previousElementSibling", None) => map_each(nodes, |node| sibling(tree, node, -1)),
		("documentElement", None) => map_each(nodes, |node| document_child(tree, node, None)),
		("head", None) => map_each(nodes, |node| document_child(tree, node, Some("head"))),
		("body", None) => map_each(nodes, |node| document_child(tree, node, Some("body"))),
		("querySelector", Some(selector)) => {
			let selector = SelectorList::parse(selector)?;
			map_each(nodes, |node| {
				tree.descendants(node)
					.into_iter()
					.find(|descendant| selector.matches(tree, *descendant))
			})
		}
		("querySelectorAll", Some(selector)) => {
			let selector = SelectorList::parse(selector)?;
			let selector = &selector;
			dedup(nodes.iter().flat_map(move |node| {
				tree.descendants(*node)
					.into_iter()
					.filter(move |descendant| selector.matches(tree, *descendant))
			}))
		}
		(name, _) => {
			return Err(Error::InvalidArgument(format!(
				"Unsupported DOM expression step: {name}"
			)));
		}
	};
	Ok(out)
}

fn map_each(nodes: &[NodeId], f: impl Fn(NodeId) -> Option<NodeId>) -> Vec<NodeId> {
	dedup(nodes.iter().filter_map(|node| f(*node)))
}

fn dedup(nodes: impl Iterator<Item = NodeId>) -> Vec<NodeId> {
	let mut seen = HashSet::new();
	nodes.filter(|node| seen.insert(*node)).collect()
}

fn sibling(tree: &DomTree, node: NodeId, offset: isize) -> Option<NodeId> {
	let siblings: Vec<NodeId> = tree.element_children(tree.parent(node)?).collect();
	let position = siblings.iter().position(|s| *s == node)?;
	siblings.get(position.checked_add_signed(offset)?).copied()
}

/// `documentElement`, `head` and `body`, reachable from the document node.
fn document_child(tree: &DomTree, node: NodeId, tag: Option<&str>) -> Option<NodeId> {
	if !matches!(tree.data(node), Some(NodeData::Document)) {
		return None;
	}
	let html = tree.element_children(node).next()?;
	match tag {
		None => Some(html),
		Some(tag) => tree
			.element_children(html)
			.find(|child| tree.tag_name(*child) == Some(tag)),
	}
}

struct Cursor<'a> {
	src: &'a str,
	pos: usize,
}

impl<'a> Cursor<'a> {
	fn new(src: &'a str) -> Self {
		Self { src, pos: 0 }
	}

	fn offset(&self) -> usize {
		self.pos
	}

	fn rest(&self) -> &'a str {
		&self.src[self.pos..]
	}

	fn peek(&self) -> Option<char> {
		self.rest().chars().next()
	}

	fn bump(&mut self) {
		if let Some(c) = self.peek() {
			self.pos += c.len_utf8();
		}
	}

	fn eat(&mut self, expected: char) -> bool {
		if self.peek() == Some(expected) {
			self.bump();
			true
		} else {
			false
		}
	}

	fn expect(&mut self, expected: char) -> Result<()> {
		self.skip_whitespace();
		if self.eat(expected) {
			Ok(())
		} else {
			Err(Error::InvalidArgument(format!(
				"Expected {expected:?} at offset {} in DOM expression",
				self.pos
			)))
		}
	}

	fn skip_whitespace(&mut self) {
		while self.peek().is_some_and(char::is_whitespace) {
			self.bump();
		}
	}

	fn take_while(&mut self, pred: impl Fn(char) -> bool) -> &'a str {
		let start = self.pos;
		while self.peek().is_some_and(&pred) {
			self.bump();
		}
		&self.src[start..self.pos]
	}

	fn ident(&mut self) -> &'a str {
		self.take_while(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
	}

	fn number(&mut self) -> Result<usize> {
		self.skip_whitespace();
		let digits = self.take_while(|c| c.is_ascii_digit());
		self.skip_whitespace();
		digits
			.parse()
			.map_err(|_| Error::InvalidArgument(format!("Expected an index at offset {}", self.pos)))
	}

	/// A single- or double-quoted string without escapes.
	fn string(&mut self) -> Result<String> {
		self.skip_whitespace();
		let quote = match self.peek() {
			Some(q @ ('"' | '\'')) => q,
			_ => {
				return Err(Error::InvalidArgument(format!(
					"Expected a quoted string at offset {}",
					self.pos
				)));
			}
		};
		self.bump();
		let value = self.take_while(|c| c != quote);
		if !self.eat(quote) {
			return Err(Error::InvalidArgument("Unterminated string in DOM expression".into()));
		}
		self.skip_whitespace();
		Ok(value.to_string())
	}
}

/// Comma-separated CSS selectors limited to compound selectors joined by
/// descendant combinators.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SelectorList {
	selectors: Vec<ComplexSelector>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct ComplexSelector {
	/// Outermost ancestor first; the last compound matches the element itself.
	compounds: Vec<Compound>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
struct Compound {
	tag: Option<String>,
	id: Option<String>,
	classes: Vec<String>,
	attributes: Vec<(String, Option<String>)>,
}

impl SelectorList {
	pub fn parse(source: &str) -> Result<Self> {
		let invalid = || Error::InvalidArgument(format!("Unsupported selector: {source:?}"));
		let selectors = source
			.split(',')
			.map(|part| {
				let compounds = part
					.split_whitespace()
					.map(Compound::parse)
					.collect::<Option<Vec<_>>>()
					.filter(|compounds| !compounds.is_empty())
					.ok_or_else(invalid)?;
				Ok(ComplexSelector { compounds })
			})
			.collect::<Result<Vec<_>>>()?;
		Ok(Self { selectors })
	}

	pub fn matches(&self, tree: &DomTree, node: NodeId) -> bool {
		self.selectors.iter().any(|selector| selector.matches(tree, node))
	}
}

impl ComplexSelector {
	fn matches(&self, tree: &DomTree, node: NodeId) -> bool {
		let Some((last, outer)) = self.compounds.split_last() else {
			return false;
		};
		if !last.matches(tree, node) {
			return false;
		}
		let mut ancestors = tree.ancestors(node);
		outer
			.iter()
			.rev()
			.all(|compound| ancestors.any(|ancestor| compound.matches(tree, ancestor)))
	}
}

impl Compound {
	fn parse(source: &str) -> Option<Self> {
		let mut cursor = Cursor::new(source);
		let mut compound = Compound::default();

		if !cursor.eat('*') {
			let tag = cursor.ident();
			if !tag.is_empty() {
				compound.tag = Some(tag.to_ascii_lowercase());
			}
		}
		while let Some(c) = cursor.peek() {
			cursor.bump();
			match c {
				'#' => compound.id = Some(non_empty(cursor.ident())?.to_string()),
				'.' => compound.classes.push(non_empty(cursor.ident())?.to_string()),
				'[' => {
					let name = non_empty(cursor.ident())?.to_ascii_lowercase();
					let value = if cursor.eat('=') {
						let value = match cursor.peek() {
							Some('"' | '\'') => cursor.string().ok()?,
							_ => cursor.take_while(|c| c != ']').trim().to_string(),
						};
						Some(value)
					} else {
						None
					};
					if !cursor.eat(']') {
						return None;
					}
					compound.attributes.push((name, value));
				}
				_ => return None,
			}
		}
		Some(compound)
	}

	fn matches(&self, tree: &DomTree, node: NodeId) -> bool {
		let Some(tag) = tree.tag_name(node) else {
			return false;
		};
		self.tag.as_deref().is_none_or(|expected| expected == tag)
			&& self
				.id
				.as_deref()
				.is_none_or(|id| tree.attribute(node, "id") == Some(id))
			&& self
				.classes
				.iter()
				.all(|class| tree.class_list(node).any(|c| c == class))
			&& self.attributes.iter().all(|(name, value)| {
				match (tree.attribute(node, name), value) {
					(Some(actual), Some(expected)) => actual == expected,
					(Some(_), None) => true,
					(None, _) => false,
				}
			})
	}
}

fn non_empty(s: &str) -> Option<&str> {
	(!s.is_empty()).then_some(s)
}
