//! Matched-style filtering and stylesheet rendering.

use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::dom::{DomTree, NodeId};
use crate::error::{Error, Result};

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Declaration {
	pub name: String,
	pub value: String,
	/// Whether this declaration wins the cascade for the element.
	#[serde(default)]
	pub applied: bool,
}

impl Declaration {
	pub fn new(name: impl Into<String>, value: impl Into<String>, applied: bool) -> Self {
		Self {
			name: name.into(),
			value: value.into(),
			applied,
		}
	}
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StyleRule {
	pub all_selectors: Vec<String>,
	/// Subset of `all_selectors` that matched the element.
	pub matched_selectors: Vec<String>,
	pub properties: Vec<Declaration>,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub origin: Option<String>,
}

impl StyleRule {
	fn synthetic(selector: String, properties: Vec<Declaration>) -> Self {
		Self {
			all_selectors: vec![selector.clone()],
			matched_selectors: vec![selector],
			properties,
			origin: None,
		}
	}
}

/// Styles an ancestor `distance` levels up passes down to the element.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InheritedStyles {
	pub distance: usize,
	#[serde(default)]
	pub inline: Vec<Declaration>,
	#[serde(default)]
	pub matched: Vec<StyleRule>,
}

/// Every style source that applies to one element, lowest priority first.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MatchedStyles {
	#[serde(default)]
	pub inline: Vec<Declaration>,
	/// Presentational attributes such as `width` on `img`.
	#[serde(default)]
	pub attributes: Vec<Declaration>,
	#[serde(default)]
	pub matched: Vec<StyleRule>,
	#[serde(default)]
	pub pseudo_elements: Vec<StyleRule>,
	#[serde(default)]
	pub inherited: Vec<InheritedStyles>,
}

impl MatchedStyles {
	fn retain_declarations(&mut self, keep: impl Fn(&Declaration) -> bool) {
		self.inline.retain(&keep);
		self.attributes.retain(&keep);
		for rule in self.matched.iter_mut().chain(self.pseudo_elements.iter_mut()) {
			rule.properties.retain(&keep);
		}
		for parent in &mut self.inherited {
			parent.inline.retain(&keep);
			for rule in &mut parent.matched {
				rule.properties.retain(&keep);
			}
		}
	}
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StyleFilter {
	/// Regex patterns; a rule survives if its joined matched selectors match any.
	pub selectors: Option<Vec<String>>,
	/// Substrings; a declaration survives if its name contains any.
	pub properties: Option<Vec<String>>,
	pub applied_only: bool,
}

/// Narrows `styles` down to what `filter` asks for.
pub fn filter_matched_styles(mut styles: MatchedStyles, filter: &StyleFilter) -> Result<MatchedStyles> {
	if let Some(patterns) = &filter.selectors {
		let regexes = patterns
			.iter()
			.map(|pattern| {
				Regex::new(pattern).map_err(|err| {
					Error::InvalidArgument(format!("Invalid selector pattern {pattern:?}: {err}"))
				})
			})
			.collect::<Result<Vec<_>>>()?;
		let keep = |rule: &StyleRule| {
			let joined = rule.matched_selectors.join(", ");
			regexes.iter().any(|regex| regex.is_match(&joined))
		};
		styles.matched.retain(keep);
		styles.pseudo_elements.retain(keep);
	}

	if let Some(properties) = &filter.properties {
		styles.retain_declarations(|decl| properties.iter().any(|prop| decl.name.contains(prop.as_str())));
	}

	if filter.applied_only {
		styles.retain_declarations(|decl| decl.applied);
	}

	Ok(styles)
}

/// Which annotations [`to_stylesheet_text`] writes as comments.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CommentConfig {
	/// `/* Matched: ... */` above rules where only some selectors matched.
	pub matched_selectors: bool,
	/// `/* applied */` after declarations that win the cascade.
	pub applied: bool,
}

/// Renders matched styles for `element` as stylesheet text, highest priority
/// first: inline style, matched and pseudo-element rules, presentational
/// attributes, then inherited styles grouped by ancestor.
pub fn to_stylesheet_text(
	styles: &MatchedStyles,
	tree: &DomTree,
	element: NodeId,
	config: CommentConfig,
) -> Result<String> {
	let mut css = String::new();

	if !styles.inline.is_empty() {
		write_rule(
			&mut css,
			&StyleRule::synthetic("element.style".to_string(), styles.inline.clone()),
			config,
		);
	}

	for rule in styles
		.matched
		.iter()
		.chain(&styles.pseudo_elements)
		.rev()
		.filter(|rule| !rule.properties.is_empty())
	{
		write_rule(&mut css, rule, config);
	}

	if !styles.attributes.is_empty() {
		let tag = tree.node_name(element).unwrap_or_default();
		write_rule(
			&mut css,
			&StyleRule::synthetic(format!("{tag}[Attributes Style]"), styles.attributes.clone()),
			config,
		);
	}

	for parent in &styles.inherited {
		if parent.inline.is_empty() && parent.matched.iter().all(|rule| rule.properties.is_empty()) {
			continue;
		}
		css.push_str(&format!(
			"/* Inherited from {} */\n",
			ancestor_selector(tree, element, parent.distance)?
		));
		if !parent.inline.is_empty() {
			write_rule(
				&mut css,
				&StyleRule::synthetic("style attribute".to_string(), parent.inline.clone()),
				config,
			);
		}
		for rule in parent.matched.iter().filter(|rule| !rule.properties.is_empty()) {
			write_rule(&mut css, rule, config);
		}
	}

	Ok(css)
}

fn write_rule(css: &mut String, rule: &StyleRule, config: CommentConfig) {
	let all = rule.all_selectors.join(", ");
	let matched = rule.matched_selectors.join(", ");
	if config.matched_selectors && matched != all {
		css.push_str(&format!("/* Matched: {matched} */\n"));
	}
	css.push_str(&format!("{all} {{\n"));
	for decl in &rule.properties {
		css.push_str(&format!("  {}: {};", decl.name, decl.value));
		if config.applied && decl.applied {
			css.push_str(" /* applied */");
		}
		css.push('\n');
	}
	css.push_str("}\n\n");
}

/// `tag#id`, or `tag.c1.c2.c3` with at most three classes, for the ancestor
/// `distance` levels above `element`.
fn ancestor_selector(tree: &DomTree, element: NodeId, distance: usize) -> Result<String> {
	let mut node = element;
	for _ in 0..distance {
		node = tree.parent(node).ok_or_else(|| {
			Error::Inspector(format!("Inherited style distance {distance} exceeds the element's ancestors"))
		})?;
	}

	let mut selector = tree.node_name(node).unwrap_or_default();
	match tree.attribute(node, "id").filter(|id| !id.is_empty()) {
		Some(id) => {
			selector.push('#');
			selector.push_str(id);
		}
		None => {
			let classes: Vec<&str> = tree.class_list(node).take(3).collect();
			if !classes.is_empty() {
				selector.push('.');
				selector.push_str(&classes.join("."));
			}
		}
	}
	Ok(selector)
}
