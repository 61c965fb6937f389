//! Document tree model
//!
//! An arena-backed mirror of the page being automated. Hosts keep their live
//! document in a [`Dom`]; the locator, the outcome classifier and the
//! recorder only ever read from it.
//!
//! Node ids are indices into the arena and stay valid for the lifetime of the
//! tree. Removing a node detaches it from its parent instead of freeing the
//! slot, so a stale handle simply stops being "attached".

pub mod selector;
pub mod text;

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

pub use selector::{Selector, SelectorError};

/// Handle to a node in a [`Dom`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct NodeId(pub usize);

/// Computed `display` value
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Display {
    #[default]
    Block,
    Inline,
    Flex,
    None,
}

/// Computed `visibility` value
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Visibility {
    #[default]
    Visible,
    Hidden,
}

/// Computed style subset the visibility checks care about
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Style {
    pub display: Display,
    pub visibility: Visibility,
    pub opacity: f32,
}

impl Default for Style {
    fn default() -> Self {
        Self {
            display: Display::Block,
            visibility: Visibility::Visible,
            opacity: 1.0,
        }
    }
}

/// Bounding client rectangle in CSS pixels
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Rect {
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
}

impl Rect {
    pub fn sized(width: f32, height: f32) -> Self {
        Self {
            x: 0.0,
            y: 0.0,
            width,
            height,
        }
    }
}

/// An element node
#[derive(Debug, Clone, PartialEq)]
pub struct Element {
    /// Lower-case tag name
    pub tag: String,
    /// Attributes, including `id` and `class`
    pub attrs: BTreeMap<String, String>,
    /// Whether the control is disabled
    pub disabled: bool,
    /// Computed style
    pub style: Style,
    /// Bounding box
    pub rect: Rect,
}

impl Element {
    pub fn attr(&self, name: &str) -> Option<&str> {
        self.attrs.get(name).map(String::as_str)
    }

    pub fn id(&self) -> Option<&str> {
        self.attr("id").filter(|id| !id.is_empty())
    }

    /// Class list, in source order
    pub fn classes(&self) -> impl Iterator<Item = &str> {
        self.attr("class").unwrap_or_default().split_whitespace()
    }

    pub fn has_class(&self, class: &str) -> bool {
        self.classes().any(|c| c == class)
    }
}

/// Node payload
#[derive(Debug, Clone, PartialEq)]
pub enum NodeKind {
    Element(Element),
    Text(String),
}

#[derive(Debug, Clone, PartialEq)]
pub struct Node {
    pub kind: NodeKind,
    parent: Option<NodeId>,
    children: Vec<NodeId>,
}

impl Node {
    pub fn as_element(&self) -> Option<&Element> {
        match &self.kind {
            NodeKind::Element(el) => Some(el),
            NodeKind::Text(_) => None,
        }
    }
}

/// Arena-backed document tree rooted at a `body` element
#[derive(Debug, Clone, PartialEq)]
pub struct Dom {
    nodes: Vec<Node>,
    root: NodeId,
}

impl Default for Dom {
    fn default() -> Self {
        Self::new()
    }
}

impl Dom {
    /// Create an empty document containing only `body`
    pub fn new() -> Self {
        let body = Node {
            kind: NodeKind::Element(Element {
                tag: "body".to_string(),
                attrs: BTreeMap::new(),
                disabled: false,
                style: Style::default(),
                rect: Rect::sized(1280.0, 720.0),
            }),
            parent: None,
            children: Vec::new(),
        };
        Self {
            nodes: vec![body],
            root: NodeId(0),
        }
    }

    pub fn root(&self) -> NodeId {
        self.root
    }

    pub fn node(&self, id: NodeId) -> Option<&Node> {
        self.nodes.get(id.0)
    }

    pub fn element(&self, id: NodeId) -> Option<&Element> {
        self.node(id).and_then(Node::as_element)
    }

    pub fn element_mut(&mut self, id: NodeId) -> Option<&mut Element> {
        match self.nodes.get_mut(id.0).map(|n| &mut n.kind) {
            Some(NodeKind::Element(el)) => Some(el),
            _ => None,
        }
    }

    pub fn parent(&self, id: NodeId) -> Option<NodeId> {
        self.node(id).and_then(|n| n.parent)
    }

    pub fn children(&self, id: NodeId) -> &[NodeId] {
        self.node(id).map(|n| n.children.as_slice()).unwrap_or_default()
    }

    /// Append a subtree under `parent` and return the id of its top element
    pub fn append(&mut self, parent: NodeId, builder: ElementBuilder) -> NodeId {
        let ElementBuilder {
            tag,
            attrs,
            disabled,
            style,
            rect,
            children,
        } = builder;

        let id = self.push(
            parent,
            NodeKind::Element(Element {
                tag,
                attrs,
                disabled,
                style,
                rect,
            }),
        );

        for child in children {
            match child {
                Child::Element(b) => {
                    self.append(id, b);
                }
                Child::Text(t) => {
                    self.push(id, NodeKind::Text(t));
                }
            }
        }

        id
    }

    /// Append a text node under `parent`
    pub fn append_text(&mut self, parent: NodeId, text: impl Into<String>) -> NodeId {
        self.push(parent, NodeKind::Text(text.into()))
    }

    fn push(&mut self, parent: NodeId, kind: NodeKind) -> NodeId {
        let id = NodeId(self.nodes.len());
        self.nodes.push(Node {
            kind,
            parent: Some(parent),
            children: Vec::new(),
        });
        if let Some(p) = self.nodes.get_mut(parent.0) {
            p.children.push(id);
        }
        id
    }

    /// Remove a node (and its subtree) from the document
    pub fn detach(&mut self, id: NodeId) {
        let Some(parent) = self.parent(id) else {
            return;
        };
        if let Some(p) = self.nodes.get_mut(parent.0) {
            p.children.retain(|&c| c != id);
        }
        if let Some(n) = self.nodes.get_mut(id.0) {
            n.parent = None;
        }
    }

    /// Replace the children of `id` with a single text node
    pub fn set_text(&mut self, id: NodeId, text: impl Into<String>) {
        let children: Vec<NodeId> = self.children(id).to_vec();
        for child in children {
            self.detach(child);
        }
        self.append_text(id, text);
    }

    /// Whether the node is reachable from the root
    pub fn is_attached(&self, id: NodeId) -> bool {
        let mut current = id;
        loop {
            if current == self.root {
                return true;
            }
            match self.parent(current) {
                Some(p) => current = p,
                None => return false,
            }
        }
    }

    /// Proper ancestors, nearest first
    pub fn ancestors(&self, id: NodeId) -> impl Iterator<Item = NodeId> + '_ {
        std::iter::successors(self.parent(id), move |&n| self.parent(n))
    }

    /// Descendants of `id` in document order, excluding `id` itself
    pub fn descendants(&self, id: NodeId) -> Descendants<'_> {
        let mut stack: Vec<NodeId> = self.children(id).to_vec();
        stack.reverse();
        Descendants { dom: self, stack }
    }

    /// Attached elements matching `selector`, in document order
    pub fn select(&self, selector: &Selector) -> Vec<NodeId> {
        self.select_within(self.root, selector)
    }

    /// Elements under `scope` matching `selector`, in document order
    pub fn select_within(&self, scope: NodeId, selector: &Selector) -> Vec<NodeId> {
        self.descendants(scope)
            .filter(|&n| selector.matches(self, n))
            .collect()
    }

    /// Nearest inclusive ancestor matching `selector`
    pub fn closest(&self, id: NodeId, selector: &Selector) -> Option<NodeId> {
        std::iter::once(id)
            .chain(self.ancestors(id))
            .find(|&n| selector.matches(self, n))
    }

    /// First attached element carrying `id`
    pub fn find_by_id(&self, id: &str) -> Option<NodeId> {
        self.find_by_attr("id", id)
    }

    /// First attached element whose attribute `name` equals `value`
    pub fn find_by_attr(&self, name: &str, value: &str) -> Option<NodeId> {
        self.descendants(self.root)
            .find(|&n| self.element(n).and_then(|el| el.attr(name)) == Some(value))
    }

    /// Raw concatenated text of the subtree
    pub fn text_content(&self, id: NodeId) -> String {
        let mut out = String::new();
        self.collect_text(id, &mut |_| false, &mut out);
        out
    }

    /// Concatenated text, skipping subtrees for which `skip` returns true
    pub(crate) fn collect_text(
        &self,
        id: NodeId,
        skip: &mut dyn FnMut(NodeId) -> bool,
        out: &mut String,
    ) {
        let Some(node) = self.node(id) else {
            return;
        };
        match &node.kind {
            NodeKind::Text(t) => out.push_str(t),
            NodeKind::Element(_) => {
                for &child in &node.children {
                    if self.element(child).is_some() && skip(child) {
                        continue;
                    }
                    self.collect_text(child, skip, out);
                }
            }
        }
    }

    /// Serialize a subtree as HTML
    pub fn outer_html(&self, id: NodeId) -> String {
        let mut out = String::new();
        self.write_html(id, &mut out);
        out
    }

    fn write_html(&self, id: NodeId, out: &mut String) {
        let Some(node) = self.node(id) else {
            return;
        };
        match &node.kind {
            NodeKind::Text(t) => out.push_str(t),
            NodeKind::Element(el) => {
                out.push('<');
                out.push_str(&el.tag);
                for (name, value) in &el.attrs {
                    out.push_str(&format!(" {name}=\"{value}\""));
                }
                if el.disabled {
                    out.push_str(" disabled");
                }
                out.push('>');
                for &child in &node.children {
                    self.write_html(child, out);
                }
                out.push_str(&format!("</{}>", el.tag));
            }
        }
    }
}

/// Pre-order iterator over a subtree
pub struct Descendants<'a> {
    dom: &'a Dom,
    stack: Vec<NodeId>,
}

impl Iterator for Descendants<'_> {
    type Item = NodeId;

    fn next(&mut self) -> Option<NodeId> {
        let id = self.stack.pop()?;
        self.stack
            .extend(self.dom.children(id).iter().rev().copied());
        Some(id)
    }
}

enum Child {
    Element(ElementBuilder),
    Text(String),
}

/// Fluent constructor for element subtrees
pub struct ElementBuilder {
    tag: String,
    attrs: BTreeMap<String, String>,
    disabled: bool,
    style: Style,
    rect: Rect,
    children: Vec<Child>,
}

impl ElementBuilder {
    /// New visible element with a 100x24 box
    pub fn new(tag: &str) -> Self {
        Self {
            tag: tag.to_ascii_lowercase(),
            attrs: BTreeMap::new(),
            disabled: false,
            style: Style::default(),
            rect: Rect::sized(100.0, 24.0),
            children: Vec::new(),
        }
    }

    pub fn id(self, id: &str) -> Self {
        self.attr("id", id)
    }

    pub fn class(mut self, class: &str) -> Self {
        let merged = match self.attrs.remove("class") {
            Some(existing) if !existing.is_empty() => format!("{existing} {class}"),
            _ => class.to_string(),
        };
        self.attrs.insert("class".to_string(), merged);
        self
    }

    pub fn attr(mut self, name: &str, value: &str) -> Self {
        self.attrs.insert(name.to_string(), value.to_string());
        self
    }

    pub fn text(mut self, text: &str) -> Self {
        self.children.push(Child::Text(text.to_string()));
        self
    }

    pub fn child(mut self, child: ElementBuilder) -> Self {
        self.children.push(Child::Element(child));
        self
    }

    pub fn disabled(mut self) -> Self {
        self.disabled = true;
        self
    }

    /// `display: none` with an empty box
    pub fn hidden(mut self) -> Self {
        self.style.display = Display::None;
        self.rect = Rect::default();
        self
    }

    pub fn style(mut self, style: Style) -> Self {
        self.style = style;
        self
    }

    pub fn rect(mut self, width: f32, height: f32) -> Self {
        self.rect = Rect::sized(width, height);
        self
    }
}
