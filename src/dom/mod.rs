//! Mutable HTML fragment tree.
//!
//! Markup is parsed with `scraper` (html5ever) and copied into an
//! [`ego_tree::Tree`] of owned [`DomNode`]s so the sanitizer stages can edit it
//! in place and the result can be cached and moved across tasks.

mod serialize;

pub use serialize::{SerializeOptions, VOID_ELEMENTS};

use ego_tree::{NodeId, NodeRef, Tree};
use scraper::{Html, node::Node};
use url::Url;

use crate::site::Locator;

/// A node in a [`Fragment`].
#[derive(Clone, Debug, PartialEq)]
pub enum DomNode {
    /// Synthetic root; its children are the fragment's top-level nodes.
    Root,
    Element(ElementData),
    Text(String),
    Comment(String),
}

/// Tag name and attributes of an element, in source order.
#[derive(Clone, Debug, PartialEq)]
pub struct ElementData {
    pub name: String,
    pub attrs: Vec<(String, String)>,
}

impl ElementData {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            attrs: Vec::new(),
        }
    }

    pub fn attr(&self, name: &str) -> Option<&str> {
        self.attrs
            .iter()
            .find(|(k, _)| k == name)
            .map(|(_, v)| v.as_str())
    }

    pub fn has_attr(&self, name: &str) -> bool {
        self.attr(name).is_some()
    }

    /// Set an attribute, replacing an existing value in place.
    pub fn set_attr(&mut self, name: &str, value: impl Into<String>) {
        let value = value.into();
        match self.attrs.iter_mut().find(|(k, _)| k == name) {
            Some((_, v)) => *v = value,
            None => self.attrs.push((name.to_string(), value)),
        }
    }

    pub fn remove_attr(&mut self, name: &str) -> Option<String> {
        let index = self.attrs.iter().position(|(k, _)| k == name)?;
        Some(self.attrs.remove(index).1)
    }

    /// Whitespace-separated entries of the `class` attribute.
    pub fn classes(&self) -> impl Iterator<Item = &str> {
        self.attr("class").unwrap_or_default().split_whitespace()
    }
}

/// An owned, editable HTML fragment.
#[derive(Clone, Debug)]
pub struct Fragment {
    tree: Tree<DomNode>,
    base_url: Option<Url>,
}

impl Fragment {
    /// A fragment with no nodes.
    pub fn empty() -> Self {
        Self {
            tree: Tree::new(DomNode::Root),
            base_url: None,
        }
    }

    /// Parse an HTML snippet. Top-level nodes become children of the root.
    pub fn parse(html: &str) -> Self {
        let parsed = Html::parse_fragment(html);
        let mut tree = Tree::new(DomNode::Root);
        let root_id = tree.root().id();
        // parse_fragment wraps the content in a synthetic <html> element
        for child in parsed.root_element().children() {
            copy_scraper_node(child, &mut tree, root_id);
        }
        Self { tree, base_url: None }
    }

    /// Parse a full document. The root holds the `<html>` element.
    pub fn parse_document(html: &str) -> Self {
        let parsed = Html::parse_document(html);
        let mut tree = Tree::new(DomNode::Root);
        let root_id = tree.root().id();
        for child in parsed.tree.root().children() {
            copy_scraper_node(child, &mut tree, root_id);
        }
        Self { tree, base_url: None }
    }

    /// Attach the URL the markup was loaded from; relative references are
    /// resolved against it.
    pub fn with_base_url(mut self, base_url: Option<Url>) -> Self {
        self.base_url = base_url;
        self
    }

    pub fn base_url(&self) -> Option<&Url> {
        self.base_url.as_ref()
    }

    pub fn root_id(&self) -> NodeId {
        self.tree.root().id()
    }

    pub fn node(&self, id: NodeId) -> Option<NodeRef<'_, DomNode>> {
        self.tree.get(id)
    }

    pub fn element(&self, id: NodeId) -> Option<&ElementData> {
        match self.tree.get(id)?.value() {
            DomNode::Element(el) => Some(el),
            _ => None,
        }
    }

    /// Run `f` against the element `id`. Returns `None` if `id` is not an
    /// element.
    pub fn update_element<R>(&mut self, id: NodeId, f: impl FnOnce(&mut ElementData) -> R) -> Option<R> {
        let mut node = self.tree.get_mut(id)?;
        match node.value() {
            DomNode::Element(el) => Some(f(el)),
            _ => None,
        }
    }

    /// Ids of every element (excluding the root) in document order.
    pub fn element_ids(&self) -> Vec<NodeId> {
        self.tree
            .root()
            .descendants()
            .filter(|n| matches!(n.value(), DomNode::Element(_)))
            .map(|n| n.id())
            .collect()
    }

    /// Ids of elements with the given (lower-case) tag name, in document order.
    pub fn elements_named(&self, name: &str) -> Vec<NodeId> {
        self.tree
            .root()
            .descendants()
            .filter(|n| matches!(n.value(), DomNode::Element(el) if el.name == name))
            .map(|n| n.id())
            .collect()
    }

    /// Ids of the element children of `id`.
    pub fn child_elements(&self, id: NodeId) -> Vec<NodeId> {
        self.tree
            .get(id)
            .map(|node| {
                node.children()
                    .filter(|n| matches!(n.value(), DomNode::Element(_)))
                    .map(|n| n.id())
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Top-level element ids (direct children of the root).
    pub fn top_level_elements(&self) -> Vec<NodeId> {
        self.child_elements(self.root_id())
    }

    /// First element matching `locator` in document order.
    pub fn find(&self, locator: Locator) -> Option<NodeId> {
        self.tree
            .root()
            .descendants()
            .find(|n| match (n.value(), locator) {
                (DomNode::Element(el), Locator::Id(id)) => el.attr("id") == Some(id),
                (DomNode::Element(el), Locator::Class(class)) => el.classes().any(|c| c == class),
                _ => false,
            })
            .map(|n| n.id())
    }

    /// Copy the subtree rooted at `id` into a new fragment whose single
    /// top-level node is that element. The base URL is carried over.
    pub fn subtree(&self, id: NodeId) -> Option<Fragment> {
        let node = self.tree.get(id)?;
        let mut tree = Tree::new(DomNode::Root);
        let root_id = tree.root().id();
        copy_node(node, &mut tree, root_id);
        Some(Fragment {
            tree,
            base_url: self.base_url.clone(),
        })
    }

    /// Concatenated text of the node and all its descendants.
    pub fn text_content(&self, id: NodeId) -> String {
        let Some(node) = self.tree.get(id) else {
            return String::new();
        };
        node.descendants()
            .filter_map(|n| match n.value() {
                DomNode::Text(text) => Some(text.as_str()),
                _ => None,
            })
            .collect()
    }

    /// Detach a node (and its subtree) from the tree.
    pub fn remove(&mut self, id: NodeId) {
        if id == self.root_id() {
            return;
        }
        if let Some(mut node) = self.tree.get_mut(id) {
            node.detach();
        }
    }

    /// Append a new node as the last child of `parent`, returning its id.
    pub fn append(&mut self, parent: NodeId, value: DomNode) -> Option<NodeId> {
        let mut parent = self.tree.get_mut(parent)?;
        Some(parent.append(value).id())
    }

    /// Copy every top-level node of `other` under `parent`, in order.
    pub fn append_fragment(&mut self, parent: NodeId, other: &Fragment) {
        if self.tree.get(parent).is_none() {
            return;
        }
        for child in other.tree.root().children() {
            copy_node(child, &mut self.tree, parent);
        }
    }

    /// Replace all children of `id` with a single text node.
    pub fn set_text(&mut self, id: NodeId, text: impl Into<String>) {
        let children: Vec<NodeId> = match self.tree.get(id) {
            Some(node) => node.children().map(|c| c.id()).collect(),
            None => return,
        };
        for child in children {
            self.remove(child);
        }
        self.append(id, DomNode::Text(text.into()));
    }

    /// Ids of every comment node.
    pub fn comment_ids(&self) -> Vec<NodeId> {
        self.tree
            .root()
            .descendants()
            .filter(|n| matches!(n.value(), DomNode::Comment(_)))
            .map(|n| n.id())
            .collect()
    }

    /// Serialize the children of `id` (inner HTML).
    pub fn inner_html(&self, id: NodeId) -> String {
        let mut out = String::new();
        if let Some(node) = self.tree.get(id) {
            for child in node.children() {
                serialize::serialize_node(child, &SerializeOptions::default(), &mut out);
            }
        }
        out
    }

    /// Serialize the whole fragment.
    pub fn to_html(&self) -> String {
        self.render(&SerializeOptions::default())
    }

    pub fn render(&self, options: &SerializeOptions) -> String {
        let mut out = String::new();
        serialize::serialize_node(self.tree.root(), options, &mut out);
        out
    }
}

fn copy_scraper_node(node: NodeRef<'_, Node>, tree: &mut Tree<DomNode>, parent: NodeId) {
    let value = match node.value() {
        Node::Element(el) => DomNode::Element(ElementData {
            name: el.name().to_ascii_lowercase(),
            attrs: el
                .attrs()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect(),
        }),
        Node::Text(text) => DomNode::Text((**text).to_string()),
        Node::Comment(comment) => DomNode::Comment((**comment).to_string()),
        Node::Document | Node::Fragment => {
            for child in node.children() {
                copy_scraper_node(child, tree, parent);
            }
            return;
        }
        _ => return,
    };

    let Some(mut parent_node) = tree.get_mut(parent) else {
        return;
    };
    let id = parent_node.append(value).id();
    for child in node.children() {
        copy_scraper_node(child, tree, id);
    }
}

fn copy_node(node: NodeRef<'_, DomNode>, tree: &mut Tree<DomNode>, parent: NodeId) {
    let Some(mut parent_node) = tree.get_mut(parent) else {
        return;
    };
    let id = parent_node.append(node.value().clone()).id();
    for child in node.children() {
        copy_node(child, tree, id);
    }
}
