//! HTML document backed by scraper's tree
//!
//! The parsed [`Html`] is kept as is. Nodes are addressed through ego_tree
//! [`NodeId`] handles, so detaching or relocating a subtree only rewrites a
//! handful of links. Detached nodes stay in the tree's storage; they are
//! simply unreachable from the root and never serialized.

use ego_tree::NodeRef;
use scraper::node::Element;
use scraper::{Html, Node};

pub use ego_tree::NodeId;

/// A mutable HTML document.
#[derive(Debug, Clone)]
pub struct Document {
    html: Html,
}

impl Document {
    /// Parse raw upstream bytes as an HTML document.
    ///
    /// Invalid UTF-8 sequences are replaced rather than rejected; the HTML5
    /// tree builder never fails, so neither does this.
    pub fn parse(bytes: &[u8]) -> Self {
        Self::parse_str(&String::from_utf8_lossy(bytes))
    }

    pub fn parse_str(html: &str) -> Self {
        Self {
            html: Html::parse_document(html),
        }
    }

    pub fn root(&self) -> NodeId {
        self.html.tree.root().id()
    }

    fn get(&self, id: NodeId) -> Option<NodeRef<'_, Node>> {
        self.html.tree.get(id)
    }

    pub fn node(&self, id: NodeId) -> Option<&Node> {
        self.get(id).map(|node| node.value())
    }

    pub fn element(&self, id: NodeId) -> Option<&Element> {
        self.node(id).and_then(Node::as_element)
    }

    /// Number of attributes on an element, zero for other nodes.
    pub fn attribute_count(&self, id: NodeId) -> usize {
        self.element(id).map_or(0, |element| element.attrs.len())
    }

    /// Qualified name (`prefix:local`) and value of the attribute at `index`.
    pub fn attribute(&self, id: NodeId, index: usize) -> Option<(String, &str)> {
        let (name, value) = self.element(id)?.attrs.get_index(index)?;
        let qualified = match &name.prefix {
            Some(prefix) => format!("{}:{}", &**prefix, &*name.local),
            None => name.local.to_string(),
        };
        Some((qualified, &**value))
    }

    /// Remove the attribute at `index`, keeping the others in order.
    pub fn remove_attribute(&mut self, id: NodeId, index: usize) -> bool {
        let Some(mut node) = self.html.tree.get_mut(id) else {
            return false;
        };
        match node.value() {
            Node::Element(element) => element.attrs.shift_remove_index(index).is_some(),
            _ => false,
        }
    }

    pub fn parent(&self, id: NodeId) -> Option<NodeId> {
        self.get(id)?.parent().map(|n| n.id())
    }

    pub fn first_child(&self, id: NodeId) -> Option<NodeId> {
        self.get(id)?.first_child().map(|n| n.id())
    }

    pub fn last_child(&self, id: NodeId) -> Option<NodeId> {
        self.get(id)?.last_child().map(|n| n.id())
    }

    pub fn next_sibling(&self, id: NodeId) -> Option<NodeId> {
        self.get(id)?.next_sibling().map(|n| n.id())
    }

    pub fn prev_sibling(&self, id: NodeId) -> Option<NodeId> {
        self.get(id)?.prev_sibling().map(|n| n.id())
    }

    pub fn children(&self, id: NodeId) -> impl Iterator<Item = NodeId> + '_ {
        self.get(id)
            .into_iter()
            .flat_map(|node| node.children())
            .map(|n| n.id())
    }

    /// Strict descendants of `id` in document order.
    pub fn descendants(&self, id: NodeId) -> impl Iterator<Item = NodeId> + '_ {
        self.get(id)
            .into_iter()
            .flat_map(|node| node.descendants().skip(1))
            .map(|n| n.id())
    }

    /// Strict ancestors of `id`, nearest first.
    pub fn ancestors(&self, id: NodeId) -> impl Iterator<Item = NodeId> + '_ {
        self.get(id)
            .into_iter()
            .flat_map(|node| node.ancestors())
            .map(|n| n.id())
    }

    /// True when `ancestor` is a strict ancestor of `node`.
    pub fn is_ancestor_of(&self, ancestor: NodeId, node: NodeId) -> bool {
        self.ancestors(node).any(|a| a == ancestor)
    }

    /// True when the node is reachable from the document root.
    pub fn is_attached(&self, id: NodeId) -> bool {
        id == self.root() || self.is_ancestor_of(self.root(), id)
    }

    /// Unlink a node (and with it its whole subtree) from its parent.
    pub fn detach(&mut self, id: NodeId) {
        if let Some(mut node) = self.html.tree.get_mut(id) {
            node.detach();
        }
    }

    /// Append `child` as the last child of `parent`.
    ///
    /// Returns `false` (and leaves the tree untouched) when the insertion
    /// would make a node its own ancestor.
    pub fn append(&mut self, parent: NodeId, child: NodeId) -> bool {
        if child == parent || child == self.root() || self.is_ancestor_of(child, parent) {
            return false;
        }
        self.detach(child);
        match self.html.tree.get_mut(parent) {
            Some(mut parent) => {
                parent.append_id(child);
                true
            }
            None => false,
        }
    }

    /// Insert `node` as the sibling immediately before `reference`.
    ///
    /// Returns `false` when `reference` has no parent or when the insertion
    /// would create a cycle.
    pub fn insert_before(&mut self, reference: NodeId, node: NodeId) -> bool {
        if self.insertion_parent(reference, node).is_none() {
            return false;
        }
        // Unlink first so `reference` sees its final neighbours.
        self.detach(node);
        match self.html.tree.get_mut(reference) {
            Some(mut reference) => {
                reference.insert_id_before(node);
                true
            }
            None => false,
        }
    }

    /// Insert `node` as the sibling immediately after `reference`.
    pub fn insert_after(&mut self, reference: NodeId, node: NodeId) -> bool {
        if self.insertion_parent(reference, node).is_none() {
            return false;
        }
        self.detach(node);
        match self.html.tree.get_mut(reference) {
            Some(mut reference) => {
                reference.insert_id_after(node);
                true
            }
            None => false,
        }
    }

    fn insertion_parent(&self, reference: NodeId, node: NodeId) -> Option<NodeId> {
        if node == reference || node == self.root() {
            return None;
        }
        let parent = self.parent(reference)?;
        if node == parent || self.is_ancestor_of(node, parent) {
            return None;
        }
        Some(parent)
    }

    /// Concatenated text of the node and its descendants.
    pub fn text_content(&self, id: NodeId) -> String {
        match self.node(id) {
            Some(Node::Text(text)) => text.to_string(),
            Some(Node::Comment(comment)) => comment.to_string(),
            Some(Node::ProcessingInstruction(pi)) => pi.data.to_string(),
            Some(Node::Document | Node::Fragment | Node::Element(_)) => self
                .descendants(id)
                .filter_map(|d| match self.node(d) {
                    Some(Node::Text(text)) => Some(&**text),
                    _ => None,
                })
                .collect(),
            Some(Node::Doctype(_)) | None => String::new(),
        }
    }

    /// Serialize the whole document.
    pub fn serialize(&self) -> String {
        self.html.html()
    }
}
