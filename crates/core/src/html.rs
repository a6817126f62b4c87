//! Bounded HTML snapshots of a subtree.
//!
//! Output is indented two spaces per level. Element descent can be cut at a
//! depth: a cut element keeps its direct text and comment children and gets a
//! single placeholder comment summarizing everything pruned below it. The
//! depth is chosen by searching downward for the deepest rendering that fits a
//! character budget, then overlong lines are clipped.

use devcss_protocol::OuterHtmlParams;

use crate::dom::{DomTree, NodeData, NodeId};

const VOID_ELEMENTS: &[&str] = &[
	"area", "base", "br", "col", "embed", "hr", "img", "input", "link", "meta", "param", "source",
	"track", "wbr",
];

const ELLIPSIS: &str = "...";

/// Limits applied by [`serialize`]. `None` disables a limit.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SerializeOptions {
	pub max_depth: Option<usize>,
	pub max_line_length: Option<usize>,
	pub max_chars: Option<usize>,
}

impl SerializeOptions {
	/// Options for a `getOuterHTML` request, filling in the tool defaults.
	pub fn from_params(params: &OuterHtmlParams) -> Self {
		Self {
			max_depth: Some(params.max_depth.unwrap_or(OuterHtmlParams::DEFAULT_MAX_DEPTH)),
			max_line_length: Some(
				params
					.max_line_length
					.unwrap_or(OuterHtmlParams::DEFAULT_MAX_LINE_LENGTH),
			),
			max_chars: Some(params.max_chars.unwrap_or(OuterHtmlParams::DEFAULT_MAX_CHARS)),
		}
	}
}

/// What a depth cut removed, counted on the untruncated subtree.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Summary {
	pub elements: usize,
	/// Non-blank text nodes.
	pub text_nodes: usize,
	/// Deepest element nesting below the cut element.
	pub depth: usize,
}

impl Summary {
	fn comment(&self) -> String {
		format!(
			"<!--... {} more element(s), {} text node(s), max depth +{}-->",
			self.elements, self.text_nodes, self.depth
		)
	}
}

pub fn summarize(tree: &DomTree, node: NodeId) -> Summary {
	let mut summary = Summary::default();
	let mut stack = vec![(node, 0)];
	while let Some((current, depth)) = stack.pop() {
		summary.depth = summary.depth.max(depth);
		for &child in tree.children(current) {
			match tree.data(child) {
				Some(NodeData::Element { .. }) => {
					summary.elements += 1;
					stack.push((child, depth + 1));
				}
				Some(NodeData::Text(text)) if !text.trim().is_empty() => summary.text_nodes += 1,
				_ => {}
			}
		}
	}
	summary
}

/// Renders `node` under `options`.
///
/// With `max_depth` set and a `max_chars` budget, depths `max_depth..=1` are
/// tried deepest first and the first rendering of at most `max_chars`
/// characters wins; if none fits, the depth-0 rendering is used. Depths past
/// the subtree's own nesting render identically and are never tried, nor are
/// depths whose tags alone exceed the budget.
pub fn serialize(tree: &DomTree, node: NodeId, options: &SerializeOptions) -> String {
	let floors = tag_floors(tree, node);
	let max_depth = options
		.max_depth
		.map(|depth| depth.min(floors.len().saturating_sub(1)));
	let html = match (max_depth, options.max_chars) {
		(None, _) => render(tree, node, None),
		(Some(max_depth), None) => render(tree, node, Some(max_depth)),
		(Some(max_depth), Some(budget)) => (1..=max_depth)
			.rev()
			.filter(|depth| floors[*depth] <= budget)
			.map(|depth| render(tree, node, Some(depth)))
			.find(|html| html.chars().count() <= budget)
			.unwrap_or_else(|| render(tree, node, Some(0))),
	};

	match options.max_line_length {
		Some(limit) if limit > 0 => truncate_lines(&html, limit),
		_ => html,
	}
}

/// Lower bound on the rendered size at each cut depth: every element shown
/// costs at least its indentation and tags. The length is one past the
/// deepest level that still shows an element.
fn tag_floors(tree: &DomTree, node: NodeId) -> Vec<usize> {
	let mut per_level: Vec<usize> = Vec::new();
	let mut stack = vec![(node, 0)];
	while let Some((id, level)) = stack.pop() {
		match tree.data(id) {
			Some(NodeData::Element { tag, .. }) => {
				if per_level.len() <= level {
					per_level.resize(level + 1, 0);
				}
				let open = tag.chars().count() + 2;
				if VOID_ELEMENTS.contains(&tag.as_str()) {
					per_level[level] += 2 * level + open;
					continue;
				}
				per_level[level] += 2 * level + 2 * open + 1;
				stack.extend(tree.children(id).iter().map(|child| (*child, level + 1)));
			}
			Some(NodeData::Document) => {
				stack.extend(tree.children(id).iter().map(|child| (*child, level)));
			}
			_ => {}
		}
	}

	let mut total = 0;
	per_level
		.into_iter()
		.map(|chars| {
			total += chars;
			total
		})
		.collect()
}

/// Renders `node` with element descent cut after `depth` levels.
pub fn render(tree: &DomTree, node: NodeId, depth: Option<usize>) -> String {
	let mut renderer = Renderer {
		tree,
		lines: Vec::new(),
		tasks: Vec::new(),
	};
	renderer.run(node, depth);
	renderer.lines.join("\n")
}

/// Clips every line longer than `limit` characters to exactly `limit`
/// characters, the last of which are `...`.
pub fn truncate_lines(text: &str, limit: usize) -> String {
	text.split('\n')
		.map(|line| {
			if line.chars().count() <= limit {
				return line.to_string();
			}
			if limit <= ELLIPSIS.len() {
				return ELLIPSIS[..limit].to_string();
			}
			let mut clipped: String = line.chars().take(limit - ELLIPSIS.len()).collect();
			clipped.push_str(ELLIPSIS);
			clipped
		})
		.collect::<Vec<_>>()
		.join("\n")
}

enum Piece {
	Node(NodeId),
	Placeholder(Summary),
}

/// Pending work of the renderer; kept on an explicit stack so nesting depth
/// never turns into call depth.
enum Task {
	Visit {
		id: NodeId,
		level: usize,
		remaining: Option<usize>,
	},
	Line {
		level: usize,
		content: String,
	},
}

struct Renderer<'a> {
	tree: &'a DomTree,
	lines: Vec<String>,
	tasks: Vec<Task>,
}

impl<'a> Renderer<'a> {
	fn push(&mut self, level: usize, content: String) {
		self.lines.push(format!("{}{content}", "  ".repeat(level)));
	}

	fn run(&mut self, id: NodeId, remaining: Option<usize>) {
		self.tasks.push(Task::Visit {
			id,
			level: 0,
			remaining,
		});
		while let Some(task) = self.tasks.pop() {
			match task {
				Task::Visit {
					id,
					level,
					remaining,
				} => self.node(id, level, remaining),
				Task::Line { level, content } => self.push(level, content),
			}
		}
	}

	fn node(&mut self, id: NodeId, level: usize, remaining: Option<usize>) {
		let tree = self.tree;
		match tree.data(id) {
			None => {}
			Some(NodeData::Document) => {
				for &child in tree.children(id).iter().rev() {
					self.tasks.push(Task::Visit {
						id: child,
						level,
						remaining,
					});
				}
			}
			Some(NodeData::Element { tag, attributes }) => {
				self.element(id, tag, attributes, level, remaining)
			}
			Some(_) => {
				if let Some(line) = self.inline(id) {
					self.push(level, line);
				}
			}
		}
	}

	fn element(
		&mut self,
		id: NodeId,
		tag: &str,
		attributes: &[(String, String)],
		level: usize,
		remaining: Option<usize>,
	) {
		let mut open = format!("<{tag}");
		for (name, value) in attributes {
			open.push_str(&format!(" {name}=\"{}\"", escape_attribute(value)));
		}
		open.push('>');

		if VOID_ELEMENTS.contains(&tag) {
			self.push(level, open);
			return;
		}

		let close = format!("</{tag}>");
		let pieces = self.pieces(id, remaining);
		if pieces.is_empty() {
			self.push(level, format!("{open}{close}"));
			return;
		}
		if let [single] = pieces.as_slice() {
			if let Some(content) = self.inline_piece(single) {
				self.push(level, format!("{open}{content}{close}"));
				return;
			}
		}

		self.push(level, open);
		self.tasks.push(Task::Line {
			level,
			content: close,
		});
		let child_remaining = remaining.map(|depth| depth.saturating_sub(1));
		for piece in pieces.into_iter().rev() {
			self.tasks.push(match piece {
				Piece::Node(child) => Task::Visit {
					id: child,
					level: level + 1,
					remaining: child_remaining,
				},
				Piece::Placeholder(summary) => Task::Line {
					level: level + 1,
					content: summary.comment(),
				},
			});
		}
	}

	/// Children to render, with pruned elements folded into one placeholder.
	fn pieces(&self, id: NodeId, remaining: Option<usize>) -> Vec<Piece> {
		let tree = self.tree;
		let cut = remaining == Some(0);
		let mut pieces = Vec::new();
		let mut placed = false;

		for &child in tree.children(id) {
			match tree.data(child) {
				Some(NodeData::Element { .. }) if cut => {
					if !placed {
						pieces.push(Piece::Placeholder(summarize(tree, id)));
						placed = true;
					}
				}
				Some(NodeData::Text(text)) if text.trim().is_empty() => {}
				Some(_) => pieces.push(Piece::Node(child)),
				None => {}
			}
		}
		pieces
	}

	fn inline_piece(&self, piece: &Piece) -> Option<String> {
		match piece {
			Piece::Node(id) => self.inline(*id),
			Piece::Placeholder(summary) => Some(summary.comment()),
		}
	}

	/// Single-line rendering of leaf nodes; `None` for elements and blanks.
	fn inline(&self, id: NodeId) -> Option<String> {
		match self.tree.data(id)? {
			NodeData::Text(text) => {
				let text = text.split_whitespace().collect::<Vec<_>>().join(" ");
				(!text.is_empty()).then(|| escape_text(&text))
			}
			NodeData::Comment(text) => Some(format!("<!--{text}-->")),
			NodeData::Doctype { name } => Some(format!("<!DOCTYPE {name}>")),
			NodeData::Element { .. } | NodeData::Document => None,
		}
	}
}

fn escape_text(text: &str) -> String {
	text.replace('&', "&amp;")
		.replace('<', "&lt;")
		.replace('>', "&gt;")
}

fn escape_attribute(value: &str) -> String {
	value.replace('&', "&amp;").replace('"', "&quot;")
}
