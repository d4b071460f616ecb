//! Id-addressed document tree with binding-label anchoring.

use indexmap::IndexMap;
use ripple_protocol::{Anchor, Fragment};
use thiserror::Error;

/// Errors from document mutations.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum DomError {
	/// The node was removed from the document or never existed.
	#[error("node {0:?} is not attached to the document")]
	Detached(NodeId),

	/// The document root cannot be removed.
	#[error("cannot remove the document root")]
	RootRemoval,
}

/// Handle to one node in a [`Document`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct NodeId(u32);

/// One element node: tag, optional binding label, attributes, text, children.
#[derive(Debug, Clone)]
pub struct Node {
	/// Element tag name.
	pub tag: String,
	/// Binding label used for anchoring, if any.
	pub binding: Option<String>,
	/// Attribute name/value pairs in render order.
	pub attrs: IndexMap<String, String>,
	/// Direct text content, if any.
	pub text: Option<String>,
	children: Vec<NodeId>,
	parent: Option<NodeId>,
}

/// A live document tree.
///
/// Nodes live in a slot arena addressed by [`NodeId`]; removal vacates the
/// slot, so ids held across a removal fail with [`DomError::Detached`]
/// instead of aliasing a reused node.
#[derive(Debug, Clone)]
pub struct Document {
	nodes: Vec<Option<Node>>,
	root: NodeId,
}

impl Document {
	/// Creates a document with an empty root element.
	pub fn new(root_tag: impl Into<String>) -> Self {
		let root = Node {
			tag: root_tag.into(),
			binding: None,
			attrs: IndexMap::new(),
			text: None,
			children: Vec::new(),
			parent: None,
		};
		Self {
			nodes: vec![Some(root)],
			root: NodeId(0),
		}
	}

	/// Creates a document by instantiating a fragment as the root.
	#[must_use]
	pub fn from_fragment(fragment: &Fragment) -> Self {
		let root = Node {
			tag: fragment.tag.clone(),
			binding: fragment.binding.clone(),
			attrs: fragment.attrs.clone(),
			text: fragment.text.clone(),
			children: Vec::new(),
			parent: None,
		};
		let mut doc = Self {
			nodes: vec![Some(root)],
			root: NodeId(0),
		};
		for child in &fragment.children {
			doc.instantiate(doc.root, child);
		}
		doc
	}

	/// Returns the root node id.
	#[must_use]
	pub fn root(&self) -> NodeId {
		self.root
	}

	/// Returns the node behind an id, if still attached.
	#[must_use]
	pub fn node(&self, id: NodeId) -> Option<&Node> {
		self.nodes.get(id.0 as usize).and_then(Option::as_ref)
	}

	fn node_mut(&mut self, id: NodeId) -> Option<&mut Node> {
		self.nodes.get_mut(id.0 as usize).and_then(Option::as_mut)
	}

	/// Child ids of a node in document order.
	#[must_use]
	pub fn children(&self, id: NodeId) -> &[NodeId] {
		self.node(id).map_or(&[], |node| node.children.as_slice())
	}

	/// Replaces a node's content with a fragment's rendering.
	///
	/// Existing children and text are dropped; the fragment becomes the
	/// node's single child.
	pub fn set_content(&mut self, id: NodeId, fragment: &Fragment) -> Result<(), DomError> {
		let node = self.node_mut(id).ok_or(DomError::Detached(id))?;
		node.text = None;
		let old = std::mem::take(&mut node.children);
		for child in old {
			self.free(child);
		}
		self.instantiate(id, fragment);
		Ok(())
	}

	/// Appends a fragment's rendering after a node's existing content.
	pub fn append_content(&mut self, id: NodeId, fragment: &Fragment) -> Result<(), DomError> {
		self.node(id).ok_or(DomError::Detached(id))?;
		self.instantiate(id, fragment);
		Ok(())
	}

	/// Detaches a node and its subtree from the document.
	pub fn remove(&mut self, id: NodeId) -> Result<(), DomError> {
		if id == self.root {
			return Err(DomError::RootRemoval);
		}
		let parent = self
			.node(id)
			.and_then(|node| node.parent)
			.ok_or(DomError::Detached(id))?;
		if let Some(parent) = self.node_mut(parent) {
			parent.children.retain(|child| *child != id);
		}
		self.free(id);
		Ok(())
	}

	/// Sets an attribute on a node.
	pub fn set_attr(
		&mut self,
		id: NodeId,
		name: impl Into<String>,
		value: impl Into<String>,
	) -> Result<(), DomError> {
		let node = self.node_mut(id).ok_or(DomError::Detached(id))?;
		node.attrs.insert(name.into(), value.into());
		Ok(())
	}

	/// Removes an attribute from a node. Missing attributes are a no-op.
	pub fn clear_attr(&mut self, id: NodeId, name: &str) -> Result<(), DomError> {
		let node = self.node_mut(id).ok_or(DomError::Detached(id))?;
		node.attrs.shift_remove(name);
		Ok(())
	}

	/// Reads an attribute value.
	#[must_use]
	pub fn attr(&self, id: NodeId, name: &str) -> Option<&str> {
		self.node(id)
			.and_then(|node| node.attrs.get(name))
			.map(String::as_str)
	}

	/// Reads a node's direct text content.
	#[must_use]
	pub fn text(&self, id: NodeId) -> Option<&str> {
		self.node(id).and_then(|node| node.text.as_deref())
	}

	/// First descendant of `scope` carrying the binding label, in document
	/// order. The scope node itself is not considered.
	#[must_use]
	pub fn find_binding(&self, scope: NodeId, binding: &str) -> Option<NodeId> {
		let mut stack: Vec<NodeId> = self.children(scope).iter().rev().copied().collect();
		while let Some(id) = stack.pop() {
			let node = self.node(id)?;
			if node.binding.as_deref() == Some(binding) {
				return Some(id);
			}
			stack.extend(node.children.iter().rev());
		}
		None
	}

	/// Resolves an anchor: the `index`-th node carrying the binding label,
	/// counted in document order from the root (root included).
	#[must_use]
	pub fn resolve_anchor(&self, anchor: &Anchor) -> Option<NodeId> {
		let mut remaining = anchor.index;
		let mut stack = vec![self.root];
		while let Some(id) = stack.pop() {
			let node = self.node(id)?;
			if node.binding.as_deref() == Some(anchor.binding.as_str()) {
				if remaining == 0 {
					return Some(id);
				}
				remaining -= 1;
			}
			stack.extend(node.children.iter().rev());
		}
		None
	}

	/// The anchor that addresses `id` in the current document, if the node
	/// carries a binding label.
	#[must_use]
	pub fn anchor_of(&self, id: NodeId) -> Option<Anchor> {
		let binding = self.node(id)?.binding.clone()?;
		let mut index = 0;
		let mut stack = vec![self.root];
		while let Some(current) = stack.pop() {
			let node = self.node(current)?;
			if node.binding.as_deref() == Some(binding.as_str()) {
				if current == id {
					return Some(Anchor::new(binding, index));
				}
				index += 1;
			}
			stack.extend(node.children.iter().rev());
		}
		None
	}

	/// Exports a node's subtree as a fragment literal.
	///
	/// Structural equality of documents is fragment equality of their roots.
	#[must_use]
	pub fn to_fragment(&self, id: NodeId) -> Option<Fragment> {
		let node = self.node(id)?;
		let mut fragment = Fragment::new(node.tag.clone());
		fragment.binding = node.binding.clone();
		fragment.attrs = node.attrs.clone();
		fragment.text = node.text.clone();
		for child in &node.children {
			fragment.children.push(self.to_fragment(*child)?);
		}
		Some(fragment)
	}

	fn instantiate(&mut self, parent: NodeId, fragment: &Fragment) -> NodeId {
		let id = NodeId(self.nodes.len() as u32);
		self.nodes.push(Some(Node {
			tag: fragment.tag.clone(),
			binding: fragment.binding.clone(),
			attrs: fragment.attrs.clone(),
			text: fragment.text.clone(),
			children: Vec::new(),
			parent: Some(parent),
		}));
		if let Some(parent) = self.node_mut(parent) {
			parent.children.push(id);
		}
		for child in &fragment.children {
			self.instantiate(id, child);
		}
		id
	}

	fn free(&mut self, id: NodeId) {
		let Some(node) = self.nodes.get_mut(id.0 as usize).and_then(Option::take) else {
			return;
		};
		for child in node.children {
			self.free(child);
		}
	}
}

#[cfg(test)]
mod tests {
	use pretty_assertions::assert_eq;

	use super::*;

	fn list_fragment() -> Fragment {
		Fragment::new("ul")
			.with_binding("posts-list")
			.with_child(
				Fragment::new("li")
					.with_binding("post")
					.with_attr("data-id", "1")
					.with_text("first"),
			)
			.with_child(
				Fragment::new("li")
					.with_binding("post")
					.with_attr("data-id", "2")
					.with_text("second"),
			)
	}

	fn page() -> Document {
		Document::from_fragment(&Fragment::new("main").with_child(list_fragment()))
	}

	#[test]
	fn test_from_fragment_roundtrips() {
		let fragment = Fragment::new("main").with_child(list_fragment());
		let doc = Document::from_fragment(&fragment);
		assert_eq!(doc.to_fragment(doc.root()).unwrap(), fragment);
	}

	#[test]
	fn test_resolve_anchor_counts_in_document_order() {
		let doc = page();
		let first = doc.resolve_anchor(&Anchor::new("post", 0)).unwrap();
		let second = doc.resolve_anchor(&Anchor::new("post", 1)).unwrap();
		assert_eq!(doc.attr(first, "data-id"), Some("1"));
		assert_eq!(doc.attr(second, "data-id"), Some("2"));
		assert!(doc.resolve_anchor(&Anchor::new("post", 2)).is_none());
		assert!(doc.resolve_anchor(&Anchor::new("comments", 0)).is_none());
	}

	#[test]
	fn test_anchor_of_inverts_resolve() {
		let doc = page();
		let second = doc.resolve_anchor(&Anchor::new("post", 1)).unwrap();
		assert_eq!(doc.anchor_of(second), Some(Anchor::new("post", 1)));
	}

	#[test]
	fn test_remove_detaches_subtree_and_invalidates_ids() {
		let mut doc = page();
		let first = doc.resolve_anchor(&Anchor::new("post", 0)).unwrap();
		doc.remove(first).unwrap();

		assert!(doc.node(first).is_none());
		assert_eq!(doc.remove(first), Err(DomError::Detached(first)));
		// The second item shifts into index 0.
		let remaining = doc.resolve_anchor(&Anchor::new("post", 0)).unwrap();
		assert_eq!(doc.attr(remaining, "data-id"), Some("2"));
		assert!(doc.resolve_anchor(&Anchor::new("post", 1)).is_none());
	}

	#[test]
	fn test_root_cannot_be_removed() {
		let mut doc = page();
		assert_eq!(doc.remove(doc.root()), Err(DomError::RootRemoval));
	}

	#[test]
	fn test_set_content_replaces_children_and_text() {
		let mut doc = page();
		let list = doc.resolve_anchor(&Anchor::new("posts-list", 0)).unwrap();
		let old_child = doc.children(list)[0];

		doc.set_content(list, &Fragment::new("li").with_text("only"))
			.unwrap();

		assert!(doc.node(old_child).is_none());
		assert_eq!(doc.children(list).len(), 1);
		assert_eq!(doc.text(doc.children(list)[0]), Some("only"));
	}

	#[test]
	fn test_append_content_preserves_order() {
		let mut doc = page();
		let list = doc.resolve_anchor(&Anchor::new("posts-list", 0)).unwrap();
		doc.append_content(list, &Fragment::new("li").with_text("third"))
			.unwrap();

		let texts: Vec<_> = doc
			.children(list)
			.iter()
			.map(|id| doc.text(*id).unwrap().to_string())
			.collect();
		assert_eq!(texts, ["first", "second", "third"]);
	}

	#[test]
	fn test_find_binding_skips_scope_node() {
		let doc = page();
		let list = doc.resolve_anchor(&Anchor::new("posts-list", 0)).unwrap();
		assert!(doc.find_binding(list, "posts-list").is_none());
		let hit = doc.find_binding(doc.root(), "post").unwrap();
		assert_eq!(doc.attr(hit, "data-id"), Some("1"));
	}

	#[test]
	fn test_attr_mutation() {
		let mut doc = page();
		let first = doc.resolve_anchor(&Anchor::new("post", 0)).unwrap();
		doc.set_attr(first, "class", "read").unwrap();
		assert_eq!(doc.attr(first, "class"), Some("read"));
		doc.clear_attr(first, "class").unwrap();
		assert_eq!(doc.attr(first, "class"), None);
		// Clearing an absent attribute is a no-op.
		doc.clear_attr(first, "class").unwrap();
	}
}
