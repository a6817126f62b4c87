//! Stable, opaque node identifiers ("uids").
//!
//! A uid is `<lowercased node name>_<n>` where `n` counts per node name from
//! zero. Bindings are weak: the registry holds a [`Weak`] to the tree that owns
//! the node plus its generation-tagged [`NodeId`], so it never keeps a session's
//! DOM mirror alive and a reclaimed node simply stops resolving.
//!
//! `"document"` and `"$0"` are never stored; they resolve against the pointers
//! of the session passed to [`NodeRegistry::resolve`].
//!
//! The internal mutex and a tree's lock are never held at the same time.

use std::collections::HashMap;
use std::sync::{Arc, Weak};

use devcss_protocol::{DOCUMENT_UID, SELECTED_UID};
use parking_lot::{Mutex, RwLock};
use tracing::debug;

use crate::dom::{DocumentId, DomTree, NodeId, SharedDom};
use crate::error::{Error, Result};

#[derive(Clone)]
struct Binding {
	tree: Weak<RwLock<DomTree>>,
	document: DocumentId,
	node: NodeId,
}

impl Binding {
	fn key(&self) -> (DocumentId, NodeId) {
		(self.document, self.node)
	}

	fn is_reclaimed(&self) -> bool {
		match self.tree.upgrade() {
			Some(tree) => !tree.read().is_alive(self.node),
			None => true,
		}
	}
}

#[derive(Default)]
struct Inner {
	counters: HashMap<String, u64>,
	by_uid: HashMap<String, Binding>,
	by_node: HashMap<(DocumentId, NodeId), String>,
}

impl Inner {
	/// Drops `uid` if it still refers to `key`.
	fn forget(&mut self, uid: &str, key: (DocumentId, NodeId)) -> bool {
		if self.by_uid.get(uid).is_some_and(|binding| binding.key() == key) {
			self.by_uid.remove(uid);
			self.by_node.remove(&key);
			true
		} else {
			false
		}
	}
}

/// Maps uids to weakly-held DOM nodes.
#[derive(Default)]
pub struct NodeRegistry {
	inner: Mutex<Inner>,
}

impl NodeRegistry {
	pub fn new() -> Self {
		Self::default()
	}

	/// Returns the uid of `node`, allocating one on first registration.
	///
	/// Fails with [`Error::NodeNotTracked`] when the node is not connected to
	/// the document.
	pub fn register(&self, dom: &SharedDom, node: NodeId) -> Result<String> {
		let (document, name) = {
			let tree = dom.read();
			if !tree.is_tracked(node) {
				return Err(Error::NodeNotTracked);
			}
			let name = tree.node_name(node).ok_or(Error::NodeNotTracked)?;
			(tree.id(), name)
		};

		let mut inner = self.inner.lock();
		if let Some(uid) = inner.by_node.get(&(document, node)) {
			return Ok(uid.clone());
		}

		let counter = inner.counters.entry(name.clone()).or_insert(0);
		let uid = format!("{name}_{counter}");
		*counter += 1;

		inner.by_uid.insert(
			uid.clone(),
			Binding {
				tree: Arc::downgrade(dom),
				document,
				node,
			},
		);
		inner.by_node.insert((document, node), uid.clone());
		debug!(target = "devcss", uid = %uid, "registered node");
		Ok(uid)
	}

	/// Resolves `uid` within the session whose mirror is `dom`.
	///
	/// `selected` is the session's current `$0`. Stale bindings (node or tree
	/// reclaimed) are dropped on the way; a node that is alive but detached is
	/// reported missing while its binding is kept, since it may be reinserted.
	pub fn resolve(&self, uid: &str, dom: &SharedDom, selected: Option<NodeId>) -> Option<NodeId> {
		match uid {
			DOCUMENT_UID => return Some(dom.read().root()),
			SELECTED_UID => return selected.filter(|node| dom.read().is_tracked(*node)),
			_ => {}
		}

		let binding = self.inner.lock().by_uid.get(uid).cloned()?;

		let Some(tree) = binding.tree.upgrade() else {
			self.inner.lock().forget(uid, binding.key());
			return None;
		};
		if !Arc::ptr_eq(&tree, dom) {
			return None;
		}

		let (alive, tracked) = {
			let tree = tree.read();
			(tree.is_alive(binding.node), tree.is_tracked(binding.node))
		};
		if !alive {
			self.inner.lock().forget(uid, binding.key());
			return None;
		}
		tracked.then_some(binding.node)
	}

	/// Removes every binding whose node or tree has been reclaimed and returns
	/// how many were removed.
	pub fn sweep(&self) -> usize {
		let snapshot: Vec<(String, Binding)> = self
			.inner
			.lock()
			.by_uid
			.iter()
			.map(|(uid, binding)| (uid.clone(), binding.clone()))
			.collect();

		let stale: Vec<(String, (DocumentId, NodeId))> = snapshot
			.into_iter()
			.filter(|(_, binding)| binding.is_reclaimed())
			.map(|(uid, binding)| (uid, binding.key()))
			.collect();

		if stale.is_empty() {
			return 0;
		}
		let mut inner = self.inner.lock();
		let removed = stale
			.iter()
			.filter(|(uid, key)| inner.forget(uid, *key))
			.count();
		debug!(target = "devcss", removed, remaining = inner.by_uid.len(), "swept node registry");
		removed
	}

	pub fn len(&self) -> usize {
		self.inner.lock().by_uid.len()
	}

	pub fn is_empty(&self) -> bool {
		self.len() == 0
	}

	/// Whether a binding for `uid` is currently stored, resolvable or not.
	pub fn contains(&self, uid: &str) -> bool {
		self.inner.lock().by_uid.contains_key(uid)
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	struct Page {
		dom: SharedDom,
		body: NodeId,
		divs: Vec<NodeId>,
		text: NodeId,
	}

	fn page() -> Page {
		let mut tree = DomTree::new();
		let html = tree.append_element(tree.root(), "html", &[]).unwrap();
		let body = tree.append_element(html, "body", &[]).unwrap();
		let divs: Vec<NodeId> = (0..3)
			.map(|_| tree.append_element(body, "div", &[]).unwrap())
			.collect();
		let text = tree.append_text(divs[0], "hi").unwrap();
		Page {
			dom: tree.into_shared(),
			body,
			divs,
			text,
		}
	}

	#[test]
	fn registration_is_idempotent() {
		let page = page();
		let registry = NodeRegistry::new();
		let first = registry.register(&page.dom, page.divs[0]).unwrap();
		let again = registry.register(&page.dom, page.divs[0]).unwrap();
		assert_eq!(first, "div_0");
		assert_eq!(first, again);
		assert_eq!(registry.len(), 1);
	}

	#[test]
	fn sequence_is_per_node_name() {
		let page = page();
		let registry = NodeRegistry::new();
		let uids: Vec<String> = page
			.divs
			.iter()
			.map(|div| registry.register(&page.dom, *div).unwrap())
			.collect();
		assert_eq!(uids, ["div_0", "div_1", "div_2"]);
		assert_eq!(registry.register(&page.dom, page.body).unwrap(), "body_0");
		assert_eq!(registry.register(&page.dom, page.text).unwrap(), "#text_0");
	}

	#[test]
	fn untracked_nodes_cannot_be_registered() {
		let page = page();
		let registry = NodeRegistry::new();
		page.dom.write().detach(page.divs[1]).unwrap();
		let err = registry.register(&page.dom, page.divs[1]).unwrap_err();
		assert!(matches!(err, Error::NodeNotTracked));
		assert!(registry.is_empty());
	}

	#[test]
	fn reserved_uids_follow_live_pointers() {
		let page = page();
		let registry = NodeRegistry::new();
		let root = page.dom.read().root();
		assert_eq!(registry.resolve("document", &page.dom, None), Some(root));
		assert_eq!(registry.resolve("$0", &page.dom, None), None);
		assert_eq!(
			registry.resolve("$0", &page.dom, Some(page.divs[2])),
			Some(page.divs[2])
		);

		page.dom.write().release(page.divs[2]).unwrap();
		assert_eq!(registry.resolve("$0", &page.dom, Some(page.divs[2])), None);
	}

	#[test]
	fn detached_node_is_hidden_but_kept() {
		let page = page();
		let registry = NodeRegistry::new();
		let uid = registry.register(&page.dom, page.divs[1]).unwrap();

		page.dom.write().detach(page.divs[1]).unwrap();
		assert_eq!(registry.resolve(&uid, &page.dom, None), None);
		assert!(registry.contains(&uid));

		page.dom.write().append_child(page.body, page.divs[1]).unwrap();
		assert_eq!(registry.resolve(&uid, &page.dom, None), Some(page.divs[1]));
	}

	#[test]
	fn released_node_is_dropped_on_resolve() {
		let page = page();
		let registry = NodeRegistry::new();
		let uid = registry.register(&page.dom, page.divs[0]).unwrap();

		page.dom.write().release(page.divs[0]).unwrap();
		assert_eq!(registry.resolve(&uid, &page.dom, None), None);
		assert!(!registry.contains(&uid));
	}

	#[test]
	fn uid_is_never_reissued() {
		let page = page();
		let registry = NodeRegistry::new();
		let uid = registry.register(&page.dom, page.divs[0]).unwrap();
		page.dom.write().release(page.divs[0]).unwrap();
		registry.sweep();

		let replacement = page.dom.write().append_element(page.body, "div", &[]).unwrap();
		let fresh = registry.register(&page.dom, replacement).unwrap();
		assert_ne!(fresh, uid);
		assert_eq!(fresh, "div_1");
		assert_eq!(registry.resolve(&uid, &page.dom, None), None);
	}

	#[test]
	fn sweep_removes_reclaimed_bindings() {
		let page = page();
		let registry = NodeRegistry::new();
		for div in &page.divs {
			registry.register(&page.dom, *div).unwrap();
		}
		page.dom.write().release(page.divs[0]).unwrap();
		page.dom.write().detach(page.divs[1]).unwrap();

		assert_eq!(registry.sweep(), 1);
		assert_eq!(registry.len(), 2);
		assert_eq!(registry.sweep(), 0);
	}

	#[test]
	fn dropped_tree_makes_bindings_sweepable() {
		let page = page();
		let registry = NodeRegistry::new();
		registry.register(&page.dom, page.divs[0]).unwrap();
		registry.register(&page.dom, page.body).unwrap();

		drop(page);
		assert_eq!(registry.sweep(), 2);
		assert!(registry.is_empty());
	}

	#[test]
	fn uids_are_scoped_to_their_session() {
		let first = page();
		let second = page();
		let registry = NodeRegistry::new();
		let uid = registry.register(&first.dom, first.divs[0]).unwrap();

		assert_eq!(registry.resolve(&uid, &second.dom, None), None);
		assert_eq!(registry.resolve(&uid, &first.dom, None), Some(first.divs[0]));
	}
}
