//! Host content model the tracker runs against.
//!
//! This module provides:
//! - `Dom`, a cloneable handle over an arena of documents, elements, text nodes
//!   and shadow roots
//! - `Tree`, the read view used by traversal and offset code
//! - channel-backed subscriptions for mutations, input, focus and navigation

mod events;
mod range;

pub use events::{
    FocusEvent, InputEvent, Mutation, MutationBatch, NavigationEvent, Subscription,
};
pub use range::{Boundary, DomRange};

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use parking_lot::{Mutex, RwLock, RwLockReadGuard};

use events::Hub;

/// Elements that start a new line in the flattened text stream.
const BLOCK_TAGS: &[&str] = &[
    "address",
    "article",
    "aside",
    "blockquote",
    "dd",
    "details",
    "div",
    "dl",
    "dt",
    "fieldset",
    "figcaption",
    "figure",
    "footer",
    "form",
    "h1",
    "h2",
    "h3",
    "h4",
    "h5",
    "h6",
    "header",
    "hr",
    "li",
    "main",
    "nav",
    "ol",
    "p",
    "pre",
    "section",
    "summary",
    "table",
    "tbody",
    "td",
    "tfoot",
    "th",
    "thead",
    "tr",
    "ul",
];

/// Elements whose content is never rendered as text.
const UNRENDERED_TAGS: &[&str] = &["noscript", "script", "style", "template"];

/// Identifier of a node in the arena. Ids are never reused.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId(usize);

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShadowMode {
    Open,
    Closed,
}

/// Rendered box size of an element.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Size {
    pub width: f32,
    pub height: f32,
}

impl Size {
    pub const ZERO: Size = Size::new(0.0, 0.0);

    pub const fn new(width: f32, height: f32) -> Self {
        Self { width, height }
    }

    pub fn is_empty(&self) -> bool {
        self.width <= 0.0 || self.height <= 0.0
    }
}

/// Size given to freshly created elements until the host lays them out.
const DEFAULT_SIZE: Size = Size::new(100.0, 20.0);

/// Element state.
#[derive(Debug, Clone)]
pub struct Element {
    /// Lowercase tag name.
    pub tag: String,
    pub attributes: BTreeMap<String, String>,
    /// Form control value (`input`, `textarea`).
    pub value: String,
    /// Native selection inside `value`, in chars.
    pub value_selection: (usize, usize),
    pub size: Size,
    pub shadow_root: Option<NodeId>,
    /// Content document of a frame element.
    pub frame_document: Option<NodeId>,
}

impl Element {
    fn new(tag: &str) -> Self {
        Self {
            tag: tag.to_ascii_lowercase(),
            attributes: BTreeMap::new(),
            value: String::new(),
            value_selection: (0, 0),
            size: DEFAULT_SIZE,
            shadow_root: None,
            frame_document: None,
        }
    }

    pub fn attribute(&self, name: &str) -> Option<&str> {
        self.attributes.get(name).map(String::as_str)
    }

    pub fn has_attribute(&self, name: &str) -> bool {
        self.attributes.contains_key(name)
    }

    pub fn is_block(&self) -> bool {
        BLOCK_TAGS.contains(&self.tag.as_str())
    }

    pub fn is_unrendered(&self) -> bool {
        UNRENDERED_TAGS.contains(&self.tag.as_str())
    }

    pub fn is_frame(&self) -> bool {
        self.tag == "iframe" || self.tag == "frame"
    }

    /// Hidden through the `hidden` attribute or an inline style.
    pub fn is_hidden(&self) -> bool {
        if self.has_attribute("hidden") {
            return true;
        }
        let Some(style) = self.attribute("style") else {
            return false;
        };
        style.split(';').any(|declaration| {
            let Some((property, value)) = declaration.split_once(':') else {
                return false;
            };
            let property = property.trim().to_ascii_lowercase();
            let value = value.trim().to_ascii_lowercase();
            (property == "display" && value == "none")
                || (property == "visibility" && value == "hidden")
        })
    }
}

#[derive(Debug, Clone)]
pub enum NodeData {
    Document {
        origin: String,
        frame_owner: Option<NodeId>,
    },
    Element(Element),
    Text(String),
    ShadowRoot {
        mode: ShadowMode,
        host: NodeId,
    },
}

#[derive(Debug, Clone)]
struct Node {
    data: NodeData,
    parent: Option<NodeId>,
    children: Vec<NodeId>,
}

/// Read view of the content model.
#[derive(Debug)]
pub struct Tree {
    nodes: Vec<Node>,
    top: NodeId,
    active: Option<NodeId>,
    selection: Option<DomRange>,
}

impl Tree {
    fn new(origin: String) -> Self {
        let mut tree = Self {
            nodes: Vec::new(),
            top: NodeId(0),
            active: None,
            selection: None,
        };
        tree.top = tree.push(NodeData::Document {
            origin,
            frame_owner: None,
        });
        tree
    }

    fn push(&mut self, data: NodeData) -> NodeId {
        let id = NodeId(self.nodes.len());
        self.nodes.push(Node {
            data,
            parent: None,
            children: Vec::new(),
        });
        id
    }

    fn node(&self, id: NodeId) -> Option<&Node> {
        self.nodes.get(id.0)
    }

    fn node_mut(&mut self, id: NodeId) -> Option<&mut Node> {
        self.nodes.get_mut(id.0)
    }

    /// The top-level document.
    pub fn document(&self) -> NodeId {
        self.top
    }

    pub fn data(&self, id: NodeId) -> Option<&NodeData> {
        self.node(id).map(|n| &n.data)
    }

    pub fn parent(&self, id: NodeId) -> Option<NodeId> {
        self.node(id).and_then(|n| n.parent)
    }

    pub fn children(&self, id: NodeId) -> &[NodeId] {
        self.node(id).map(|n| n.children.as_slice()).unwrap_or(&[])
    }

    pub fn element(&self, id: NodeId) -> Option<&Element> {
        match self.data(id)? {
            NodeData::Element(element) => Some(element),
            _ => None,
        }
    }

    fn element_mut(&mut self, id: NodeId) -> Option<&mut Element> {
        match &mut self.node_mut(id)?.data {
            NodeData::Element(element) => Some(element),
            _ => None,
        }
    }

    pub fn tag(&self, id: NodeId) -> Option<&str> {
        self.element(id).map(|e| e.tag.as_str())
    }

    pub fn attribute(&self, id: NodeId, name: &str) -> Option<&str> {
        self.element(id)?.attribute(name)
    }

    /// Content of a text node.
    pub fn text(&self, id: NodeId) -> Option<&str> {
        match self.data(id)? {
            NodeData::Text(text) => Some(text),
            _ => None,
        }
    }

    pub fn is_text(&self, id: NodeId) -> bool {
        self.text(id).is_some()
    }

    /// Length of a boundary container: chars for text, children otherwise.
    pub fn node_length(&self, id: NodeId) -> usize {
        match self.text(id) {
            Some(text) => text.chars().count(),
            None => self.children(id).len(),
        }
    }

    /// Shadow root of `id`, only when it is open.
    pub fn open_shadow_root(&self, id: NodeId) -> Option<NodeId> {
        let root = self.element(id)?.shadow_root?;
        match self.data(root)? {
            NodeData::ShadowRoot {
                mode: ShadowMode::Open,
                ..
            } => Some(root),
            _ => None,
        }
    }

    pub fn frame_document(&self, id: NodeId) -> Option<NodeId> {
        self.element(id)?.frame_document
    }

    pub fn origin(&self, document: NodeId) -> Option<&str> {
        match self.data(document)? {
            NodeData::Document { origin, .. } => Some(origin),
            _ => None,
        }
    }

    /// Parent across shadow and frame boundaries.
    pub fn composed_parent(&self, id: NodeId) -> Option<NodeId> {
        let node = self.node(id)?;
        if let Some(parent) = node.parent {
            return Some(parent);
        }
        match &node.data {
            NodeData::ShadowRoot { host, .. } => Some(*host),
            NodeData::Document { frame_owner, .. } => *frame_owner,
            _ => None,
        }
    }

    /// `id` followed by its composed ancestors. Bounded by the arena size so a
    /// cyclic frame or shadow reference cannot loop forever.
    pub fn composed_ancestors(&self, id: NodeId) -> ComposedAncestors<'_> {
        ComposedAncestors {
            tree: self,
            next: self.node(id).map(|_| id),
            remaining: self.nodes.len(),
        }
    }

    pub fn composed_contains(&self, ancestor: NodeId, node: NodeId) -> bool {
        self.composed_ancestors(node).any(|n| n == ancestor)
    }

    /// Whether `id` is reachable from the top-level document.
    pub fn is_connected(&self, id: NodeId) -> bool {
        self.composed_ancestors(id).any(|n| n == self.top)
    }

    /// Document that owns `id`, crossing shadow boundaries but not frames.
    pub fn owner_document(&self, id: NodeId) -> Option<NodeId> {
        self.composed_ancestors(id)
            .find(|&n| matches!(self.data(n), Some(NodeData::Document { .. })))
    }

    /// Light-tree descendants of `root` in document order, excluding `root`.
    pub fn descendants(&self, root: NodeId) -> Vec<NodeId> {
        let mut out = Vec::new();
        let mut stack: Vec<NodeId> = self.children(root).iter().rev().copied().collect();
        while let Some(id) = stack.pop() {
            out.push(id);
            stack.extend(self.children(id).iter().rev().copied());
        }
        out
    }

    /// Connected, laid out with a non-empty box, and not hidden on the way up.
    pub fn is_rendered(&self, id: NodeId) -> bool {
        if !self.is_connected(id) {
            return false;
        }
        if self.element(id).is_some_and(|e| e.size.is_empty()) {
            return false;
        }
        !self
            .composed_ancestors(id)
            .any(|n| self.element(n).is_some_and(Element::is_hidden))
    }

    /// Inherited `contenteditable` state of `id`.
    pub fn is_editable(&self, id: NodeId) -> bool {
        let mut current = if self.is_text(id) {
            self.parent(id)
        } else {
            Some(id)
        };
        while let Some(node) = current {
            let Some(element) = self.element(node) else {
                return false;
            };
            if let Some(value) = element.attribute("contenteditable") {
                match value.to_ascii_lowercase().as_str() {
                    "" | "true" | "plaintext-only" => return true,
                    "false" => return false,
                    // invalid values inherit
                    _ => {}
                }
            }
            current = self.parent(node);
        }
        false
    }

    /// Editable element whose parent is not editable.
    pub fn is_editing_host(&self, id: NodeId) -> bool {
        self.element(id).is_some()
            && self.is_editable(id)
            && !self.parent(id).is_some_and(|p| self.is_editable(p))
    }

    pub fn active_element(&self) -> Option<NodeId> {
        self.active
    }

    pub fn selection(&self) -> Option<DomRange> {
        self.selection
    }

    fn detach(&mut self, id: NodeId) -> Option<NodeId> {
        let parent = self.node_mut(id)?.parent.take()?;
        if let Some(node) = self.node_mut(parent) {
            node.children.retain(|&c| c != id);
        }
        Some(parent)
    }

    fn insert_child(&mut self, parent: NodeId, child: NodeId, index: usize) {
        if let Some(node) = self.node_mut(child) {
            node.parent = Some(parent);
        }
        if let Some(node) = self.node_mut(parent) {
            let index = index.min(node.children.len());
            node.children.insert(index, child);
        }
    }

    fn index_in_parent(&self, id: NodeId) -> Option<usize> {
        let parent = self.parent(id)?;
        self.children(parent).iter().position(|&c| c == id)
    }

    /// Focus-out needed when the active element left the tree.
    fn drop_disconnected_focus(&mut self) -> Option<FocusEvent> {
        let active = self.active?;
        if self.is_connected(active) {
            return None;
        }
        self.active = None;
        Some(FocusEvent::Out {
            target: active,
            related: None,
        })
    }
}

/// Iterator returned by [`Tree::composed_ancestors`].
pub struct ComposedAncestors<'a> {
    tree: &'a Tree,
    next: Option<NodeId>,
    remaining: usize,
}

impl Iterator for ComposedAncestors<'_> {
    type Item = NodeId;

    fn next(&mut self) -> Option<NodeId> {
        let current = self.next?;
        if self.remaining == 0 {
            return None;
        }
        self.remaining -= 1;
        self.next = self.tree.composed_parent(current);
        Some(current)
    }
}

struct DomInner {
    tree: RwLock<Tree>,
    hub: Arc<Mutex<Hub>>,
}

/// Shared handle to the content model.
///
/// Cloning is cheap; all clones see the same tree. Mutations are applied
/// synchronously and the resulting records are delivered to subscribers after
/// the write lock is released.
#[derive(Clone)]
pub struct Dom {
    inner: Arc<DomInner>,
}

impl fmt::Debug for Dom {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let tree = self.inner.tree.read();
        f.debug_struct("Dom")
            .field("nodes", &tree.nodes.len())
            .field("active", &tree.active)
            .finish()
    }
}

impl Dom {
    /// Create a content model with an empty top-level document.
    pub fn new(origin: impl Into<String>) -> Self {
        Self {
            inner: Arc::new(DomInner {
                tree: RwLock::new(Tree::new(origin.into())),
                hub: Arc::new(Mutex::new(Hub::default())),
            }),
        }
    }

    /// Lock the tree for reading. Do not call other `Dom` methods while the
    /// guard is alive.
    pub fn read(&self) -> RwLockReadGuard<'_, Tree> {
        self.inner.tree.read()
    }

    pub fn document(&self) -> NodeId {
        self.read().document()
    }

    /// Apply `f` under the write lock, then deliver the records it produced.
    fn mutate<R>(&self, f: impl FnOnce(&mut Tree) -> (R, Vec<Mutation>)) -> R {
        let (result, records, focus_out) = {
            let mut tree = self.inner.tree.write();
            let (result, records) = f(&mut tree);
            let focus_out = if records.is_empty() {
                None
            } else {
                tree.drop_disconnected_focus()
            };
            (result, records, focus_out)
        };
        if !records.is_empty() {
            let tree = self.inner.tree.read();
            self.inner.hub.lock().notify_mutations(&tree, records);
        }
        if let Some(event) = focus_out {
            self.inner.hub.lock().notify_focus(event);
        }
        result
    }

    /// Create a detached document, typically loaded into a frame.
    pub fn create_document(&self, origin: impl Into<String>) -> NodeId {
        self.inner.tree.write().push(NodeData::Document {
            origin: origin.into(),
            frame_owner: None,
        })
    }

    pub fn create_element(&self, tag: &str) -> NodeId {
        self.inner
            .tree
            .write()
            .push(NodeData::Element(Element::new(tag)))
    }

    pub fn create_text(&self, text: &str) -> NodeId {
        self.inner
            .tree
            .write()
            .push(NodeData::Text(text.to_string()))
    }

    /// Insert `child` into `parent` before `reference` (or last).
    ///
    /// Insertions that would create a cycle are ignored.
    pub fn insert_before(&self, parent: NodeId, child: NodeId, reference: Option<NodeId>) {
        self.mutate(|tree| {
            if tree.node(parent).is_none() || tree.composed_contains(child, parent) {
                tracing::warn!(%parent, %child, "Rejected insertion");
                return ((), Vec::new());
            }
            let mut records = Vec::new();
            if let Some(old_parent) = tree.detach(child) {
                records.push(Mutation::ChildList {
                    target: old_parent,
                    added: Vec::new(),
                    removed: vec![child],
                });
            }
            let index = reference
                .and_then(|r| tree.children(parent).iter().position(|&c| c == r))
                .unwrap_or(tree.children(parent).len());
            tree.insert_child(parent, child, index);
            records.push(Mutation::ChildList {
                target: parent,
                added: vec![child],
                removed: Vec::new(),
            });
            ((), records)
        })
    }

    pub fn append_child(&self, parent: NodeId, child: NodeId) {
        self.insert_before(parent, child, None);
    }

    /// Create an element and append it to `parent`.
    pub fn append_element(&self, parent: NodeId, tag: &str) -> NodeId {
        let id = self.create_element(tag);
        self.append_child(parent, id);
        id
    }

    /// Create a text node and append it to `parent`.
    pub fn append_text(&self, parent: NodeId, text: &str) -> NodeId {
        let id = self.create_text(text);
        self.append_child(parent, id);
        id
    }

    /// Detach `node` from its parent.
    pub fn remove(&self, node: NodeId) {
        self.mutate(|tree| {
            let records = tree
                .detach(node)
                .map(|parent| Mutation::ChildList {
                    target: parent,
                    added: Vec::new(),
                    removed: vec![node],
                })
                .into_iter()
                .collect();
            ((), records)
        })
    }

    pub fn set_attribute(&self, node: NodeId, name: &str, value: &str) {
        self.mutate(|tree| {
            let Some(element) = tree.element_mut(node) else {
                return ((), Vec::new());
            };
            element
                .attributes
                .insert(name.to_ascii_lowercase(), value.to_string());
            let record = Mutation::Attribute {
                target: node,
                name: name.to_ascii_lowercase(),
            };
            ((), vec![record])
        })
    }

    pub fn remove_attribute(&self, node: NodeId, name: &str) {
        self.mutate(|tree| {
            let name = name.to_ascii_lowercase();
            let removed = tree
                .element_mut(node)
                .and_then(|element| element.attributes.remove(&name));
            match removed {
                Some(_) => ((), vec![Mutation::Attribute { target: node, name }]),
                None => ((), Vec::new()),
            }
        })
    }

    /// Replace the content of a text node.
    pub fn set_text(&self, node: NodeId, text: &str) {
        self.mutate(|tree| match tree.node_mut(node).map(|n| &mut n.data) {
            Some(NodeData::Text(content)) => {
                *content = text.to_string();
                ((), vec![Mutation::CharacterData { target: node }])
            }
            _ => ((), Vec::new()),
        })
    }

    /// Attach a shadow root to `host`. Announced as a child-list change on the
    /// host so observers can descend into it.
    pub fn attach_shadow(&self, host: NodeId, mode: ShadowMode) -> Option<NodeId> {
        self.mutate(|tree| {
            if tree.element(host).map_or(true, |e| e.shadow_root.is_some()) {
                return (None, Vec::new());
            }
            let root = tree.push(NodeData::ShadowRoot { mode, host });
            if let Some(element) = tree.element_mut(host) {
                element.shadow_root = Some(root);
            }
            let record = Mutation::ChildList {
                target: host,
                added: vec![root],
                removed: Vec::new(),
            };
            (Some(root), vec![record])
        })
    }

    /// Load `document` into a frame element, replacing any previous one.
    pub fn load_frame(&self, frame: NodeId, document: NodeId) {
        self.mutate(|tree| {
            let is_document = matches!(tree.data(document), Some(NodeData::Document { .. }));
            if !is_document || tree.composed_contains(document, frame) {
                tracing::warn!(%frame, %document, "Rejected frame load");
                return ((), Vec::new());
            }
            let Some(element) = tree.element_mut(frame) else {
                return ((), Vec::new());
            };
            let previous = element.frame_document.replace(document);
            let mut removed = Vec::new();
            if let Some(old) = previous {
                if let Some(Node {
                    data: NodeData::Document { frame_owner, .. },
                    ..
                }) = tree.node_mut(old)
                {
                    *frame_owner = None;
                }
                removed.push(old);
            }
            if let Some(Node {
                data: NodeData::Document { frame_owner, .. },
                ..
            }) = tree.node_mut(document)
            {
                *frame_owner = Some(frame);
            }
            let record = Mutation::ChildList {
                target: frame,
                added: vec![document],
                removed,
            };
            ((), vec![record])
        })
    }

    /// Update layout size. Layout changes are not observable as mutations.
    pub fn set_rendered_size(&self, node: NodeId, width: f32, height: f32) {
        if let Some(element) = self.inner.tree.write().element_mut(node) {
            element.size = Size::new(width, height);
        }
    }

    pub fn value(&self, node: NodeId) -> Option<String> {
        self.read().element(node).map(|e| e.value.clone())
    }

    /// Set a form control value. Like a property write, this is not observed
    /// as a mutation; the caret moves to the end.
    pub fn set_value(&self, node: NodeId, value: &str) {
        if let Some(element) = self.inner.tree.write().element_mut(node) {
            element.value = value.to_string();
            let len = value.chars().count();
            element.value_selection = (len, len);
        }
    }

    pub fn value_selection(&self, node: NodeId) -> Option<(usize, usize)> {
        self.read().element(node).map(|e| e.value_selection)
    }

    /// Set the native selection of a form control, clamped to its value.
    pub fn set_value_selection(&self, node: NodeId, start: usize, end: usize) {
        if let Some(element) = self.inner.tree.write().element_mut(node) {
            let len = element.value.chars().count();
            let end = end.min(len);
            element.value_selection = (start.min(end), end);
        }
    }

    pub fn selection(&self) -> Option<DomRange> {
        self.read().selection()
    }

    pub fn set_selection(&self, range: Option<DomRange>) {
        self.inner.tree.write().selection = range;
    }

    pub fn active_element(&self) -> Option<NodeId> {
        self.read().active_element()
    }

    /// Move focus to `node`, emitting focus-out then focus-in.
    pub fn focus(&self, node: NodeId) {
        let previous = {
            let mut tree = self.inner.tree.write();
            if tree.element(node).is_none() || tree.active == Some(node) {
                return;
            }
            tree.active.replace(node)
        };
        let mut hub = self.inner.hub.lock();
        if let Some(previous) = previous {
            hub.notify_focus(FocusEvent::Out {
                target: previous,
                related: Some(node),
            });
        }
        hub.notify_focus(FocusEvent::In {
            target: node,
            related: previous,
        });
    }

    /// Drop focus without a successor.
    pub fn blur(&self) {
        let previous = self.inner.tree.write().active.take();
        if let Some(previous) = previous {
            self.inner.hub.lock().notify_focus(FocusEvent::Out {
                target: previous,
                related: None,
            });
        }
    }

    /// Delete the content of `range` and insert `text` at its start.
    ///
    /// Returns the caret position after the inserted text, or `None` when the
    /// range does not describe two points in the same tree.
    pub fn replace_range(&self, range: DomRange, text: &str) -> Option<Boundary> {
        self.mutate(|tree| match tree.replace_range(range, text) {
            Some((caret, records)) => (Some(caret), records),
            None => (None, Vec::new()),
        })
    }

    /// Fire an input signal at `target`.
    pub fn dispatch_input(&self, target: NodeId) {
        let tree = self.inner.tree.read();
        self.inner
            .hub
            .lock()
            .notify_input(&tree, InputEvent { target });
    }

    /// Signal an in-page navigation.
    pub fn navigate(&self, url: &str) {
        self.inner.hub.lock().notify_navigation(NavigationEvent {
            url: url.to_string(),
        });
    }

    /// Observe mutations inside `root`, including shadow roots and frames.
    pub fn observe(&self, root: NodeId) -> Subscription<MutationBatch> {
        let rx = self.inner.hub.lock().observe(root);
        Subscription::new(rx, &self.inner.hub)
    }

    /// Input signals targeting `scope` or anything inside it.
    pub fn on_input(&self, scope: NodeId) -> Subscription<InputEvent> {
        let rx = self.inner.hub.lock().listen_input(scope);
        Subscription::new(rx, &self.inner.hub)
    }

    pub fn on_focus(&self) -> Subscription<FocusEvent> {
        let rx = self.inner.hub.lock().listen_focus();
        Subscription::new(rx, &self.inner.hub)
    }

    pub fn on_navigation(&self) -> Subscription<NavigationEvent> {
        let rx = self.inner.hub.lock().listen_navigation();
        Subscription::new(rx, &self.inner.hub)
    }
}
