use std::collections::{BTreeMap, BTreeSet};

use blake3::Hash;
use serde_json::Value;

use super::engine::{NaiveEngine, SelectorEngine};

/// Identity of one element in the arena. Ids are never reused, so a stale
/// id held across a destroy resolves to nothing instead of a new element.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ElementId(pub u64);

#[derive(Debug, Clone, Default)]
pub struct Element {
    pub tag: String,
    pub text: String,
    attributes: BTreeMap<String, String>,
    classes: BTreeSet<String>,
    parent: Option<ElementId>,
    children: Vec<ElementId>,
}

impl Element {
    fn new(tag: impl Into<String>) -> Self {
        Self {
            tag: tag.into(),
            ..Self::default()
        }
    }
}

/// In-memory element tree backing the render pipeline.
///
/// The document always has a top-level element (created as `html` with a
/// `body` child), but that element can be swapped wholesale by a fragment
/// update, so callers resolve it through [`Document::root`] instead of
/// caching it.
pub struct Document {
    nodes: BTreeMap<u64, Element>,
    next_id: u64,
    root: ElementId,
    matcher: Box<dyn SelectorEngine>,
    focused: Option<ElementId>,
    focus_prevented_scroll: bool,
}

impl Document {
    pub fn new() -> Self {
        Self::with_matcher(Box::new(NaiveEngine))
    }

    pub fn with_matcher(matcher: Box<dyn SelectorEngine>) -> Self {
        let mut doc = Self {
            nodes: BTreeMap::new(),
            next_id: 0,
            root: ElementId(0),
            matcher,
            focused: None,
            focus_prevented_scroll: false,
        };
        let root = doc.create_element("html");
        let body = doc.create_element("body");
        doc.root = root;
        doc.append_child(root, body);
        doc
    }

    pub fn create_element(&mut self, tag: impl Into<String>) -> ElementId {
        let id = ElementId(self.next_id);
        self.next_id += 1;
        self.nodes.insert(id.0, Element::new(tag));
        id
    }

    /// The document's current top-level element, resolved fresh on every
    /// call.
    pub fn root(&self) -> ElementId {
        self.root
    }

    /// The body surrogate: the first `body` child of the root, or the root
    /// itself while no body exists yet.
    pub fn body(&self) -> ElementId {
        self.children(self.root)
            .iter()
            .copied()
            .find(|&child| self.tag(child) == Some("body"))
            .unwrap_or(self.root)
    }

    /// Replaces the top-level element. The old tree stays in the arena as a
    /// detached subtree until destroyed.
    pub fn swap_root(&mut self, new_root: ElementId) {
        debug_assert!(self.alive(new_root));
        self.root = new_root;
    }

    pub fn alive(&self, element: ElementId) -> bool {
        self.nodes.contains_key(&element.0)
    }

    pub fn tag(&self, element: ElementId) -> Option<&str> {
        self.nodes.get(&element.0).map(|node| node.tag.as_str())
    }

    pub fn set_text(&mut self, element: ElementId, text: impl Into<String>) {
        if let Some(node) = self.nodes.get_mut(&element.0) {
            node.text = text.into();
        }
    }

    pub fn text(&self, element: ElementId) -> Option<&str> {
        self.nodes.get(&element.0).map(|node| node.text.as_str())
    }

    pub fn set_attr(&mut self, element: ElementId, name: &str, value: impl Into<String>) {
        if let Some(node) = self.nodes.get_mut(&element.0) {
            node.attributes.insert(name.to_string(), value.into());
        }
    }

    pub fn attr(&self, element: ElementId, name: &str) -> Option<&str> {
        self.nodes
            .get(&element.0)
            .and_then(|node| node.attributes.get(name))
            .map(String::as_str)
    }

    pub fn has_attr(&self, element: ElementId, name: &str) -> bool {
        self.attr(element, name).is_some()
    }

    /// Writes an attribute only if the element does not already declare it.
    pub fn set_missing_attr(&mut self, element: ElementId, name: &str, value: impl Into<String>) {
        if !self.has_attr(element, name) {
            self.set_attr(element, name, value);
        }
    }

    /// Parses a structured attribute. Valid JSON is returned as-is; any
    /// other non-empty value is treated as a plain string.
    pub fn json_attr(&self, element: ElementId, name: &str) -> Option<Value> {
        let raw = self.attr(element, name)?;
        match serde_json::from_str(raw) {
            Ok(value) => Some(value),
            Err(_) => Some(Value::String(raw.to_string())),
        }
    }

    pub fn add_class(&mut self, element: ElementId, class: &str) {
        if let Some(node) = self.nodes.get_mut(&element.0) {
            node.classes.insert(class.to_string());
        }
    }

    pub fn remove_class(&mut self, element: ElementId, class: &str) {
        if let Some(node) = self.nodes.get_mut(&element.0) {
            node.classes.remove(class);
        }
    }

    pub fn has_class(&self, element: ElementId, class: &str) -> bool {
        self.nodes
            .get(&element.0)
            .is_some_and(|node| node.classes.contains(class))
    }

    pub fn parent(&self, element: ElementId) -> Option<ElementId> {
        self.nodes.get(&element.0).and_then(|node| node.parent)
    }

    pub fn children(&self, element: ElementId) -> &[ElementId] {
        self.nodes
            .get(&element.0)
            .map(|node| node.children.as_slice())
            .unwrap_or(&[])
    }

    pub fn append_child(&mut self, parent: ElementId, child: ElementId) {
        self.detach(child);
        if let Some(node) = self.nodes.get_mut(&child.0) {
            node.parent = Some(parent);
        }
        if let Some(node) = self.nodes.get_mut(&parent.0) {
            node.children.push(child);
        }
    }

    /// Removes the element from its parent. The subtree stays alive but
    /// detached.
    pub fn detach(&mut self, element: ElementId) {
        let Some(parent) = self.parent(element) else {
            return;
        };
        if let Some(node) = self.nodes.get_mut(&parent.0) {
            node.children.retain(|&child| child != element);
        }
        if let Some(node) = self.nodes.get_mut(&element.0) {
            node.parent = None;
        }
    }

    /// Detaches and deletes the whole subtree, returning the removed ids in
    /// document order so the caller can run destructors for them.
    pub fn destroy(&mut self, element: ElementId) -> Vec<ElementId> {
        let removed = self.subtree_ids(element);
        self.detach(element);
        for id in &removed {
            self.nodes.remove(&id.0);
        }
        removed
    }

    /// True while the element can reach the current top-level element by
    /// walking parents.
    pub fn is_attached(&self, element: ElementId) -> bool {
        let mut cursor = Some(element);
        while let Some(current) = cursor {
            if current == self.root {
                return true;
            }
            cursor = self.parent(current);
        }
        false
    }

    pub fn contains(&self, ancestor: ElementId, element: ElementId) -> bool {
        let mut cursor = Some(element);
        while let Some(current) = cursor {
            if current == ancestor {
                return true;
            }
            cursor = self.parent(current);
        }
        false
    }

    /// Depth-first descendants of `element`, excluding the element itself.
    /// A dead id has no descendants.
    pub fn descendants(&self, element: ElementId) -> Vec<ElementId> {
        let mut result = self.subtree_ids(element);
        if !result.is_empty() {
            result.remove(0);
        }
        result
    }

    fn subtree_ids(&self, element: ElementId) -> Vec<ElementId> {
        let mut result = Vec::new();
        let mut pending = vec![element];
        while let Some(current) = pending.pop() {
            if !self.alive(current) {
                continue;
            }
            result.push(current);
            for &child in self.children(current).iter().rev() {
                pending.push(child);
            }
        }
        result
    }

    pub fn matches(&self, element: ElementId, selector: &str) -> bool {
        self.alive(element) && self.matcher.matches(self, element, selector)
    }

    /// All descendants of `root` matching `selector`, in document order.
    pub fn query_all(&self, root: ElementId, selector: &str) -> Vec<ElementId> {
        self.descendants(root)
            .into_iter()
            .filter(|&element| self.matches(element, selector))
            .collect()
    }

    pub fn focus(&mut self, element: ElementId, prevent_scroll: bool) {
        if self.alive(element) {
            self.focused = Some(element);
            self.focus_prevented_scroll = prevent_scroll;
        }
    }

    pub fn focused(&self) -> Option<ElementId> {
        self.focused.filter(|&element| self.alive(element))
    }

    pub fn focus_prevented_scroll(&self) -> bool {
        self.focus_prevented_scroll
    }

    /// Content hash of the subtree, covering tags, attributes, classes and
    /// text. Two structurally equal subtrees hash equal.
    pub fn subtree_hash(&self, element: ElementId) -> Hash {
        let mut hasher = blake3::Hasher::new();
        for id in self.subtree_ids(element) {
            if let Some(node) = self.nodes.get(&id.0) {
                hasher.update(node.tag.as_bytes());
                hasher.update(b"\x1f");
                for (name, value) in &node.attributes {
                    hasher.update(name.as_bytes());
                    hasher.update(b"=");
                    hasher.update(value.as_bytes());
                    hasher.update(b"\x1f");
                }
                for class in &node.classes {
                    hasher.update(class.as_bytes());
                    hasher.update(b"\x1f");
                }
                hasher.update(node.text.as_bytes());
                hasher.update(b"\x1e");
            }
        }
        hasher.finalize()
    }
}

impl Default for Document {
    fn default() -> Self {
        Self::new()
    }
}
