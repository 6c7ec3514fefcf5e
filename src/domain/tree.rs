//! Arena-backed document tree used for rendered output.
//!
//! Nodes are addressed by [`NodeId`] and never deallocated while the tree is
//! alive; detaching a node only unlinks it from its parent. This keeps ids
//! stable across the in-place reorderings performed by the render pipeline.

use std::fmt::Write as _;

/// Identifier of a node inside a [`Tree`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId(usize);

impl NodeId {
    pub fn index(self) -> usize {
        self.0
    }
}

/// Interactive state carried by live elements that static markup cannot express.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum LiveState {
    #[default]
    None,
    /// Current value of a form control, which may differ from its `value` attribute.
    FormValue(String),
    /// Encoded raster snapshot of a drawing surface (`<canvas>`).
    Bitmap(Vec<u8>),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Element {
    tag: String,
    attributes: Vec<(String, String)>,
    pub live: LiveState,
}

impl Element {
    pub fn new(tag: impl Into<String>) -> Self {
        Self {
            tag: tag.into().to_ascii_lowercase(),
            attributes: Vec::new(),
            live: LiveState::None,
        }
    }

    pub fn tag(&self) -> &str {
        &self.tag
    }

    pub fn with_attr(mut self, name: &str, value: impl Into<String>) -> Self {
        self.set_attr(name, value);
        self
    }

    pub fn with_class(mut self, class: &str) -> Self {
        self.add_class(class);
        self
    }

    pub fn attr(&self, name: &str) -> Option<&str> {
        self.attributes
            .iter()
            .find(|(key, _)| key == name)
            .map(|(_, value)| value.as_str())
    }

    pub fn attributes(&self) -> impl Iterator<Item = (&str, &str)> {
        self.attributes
            .iter()
            .map(|(key, value)| (key.as_str(), value.as_str()))
    }

    pub fn set_attr(&mut self, name: &str, value: impl Into<String>) {
        let value = value.into();
        match self.attributes.iter_mut().find(|(key, _)| key == name) {
            Some((_, existing)) => *existing = value,
            None => self.attributes.push((name.to_string(), value)),
        }
    }

    pub fn remove_attr(&mut self, name: &str) -> Option<String> {
        let index = self.attributes.iter().position(|(key, _)| key == name)?;
        Some(self.attributes.remove(index).1)
    }

    pub fn classes(&self) -> impl Iterator<Item = &str> {
        self.attr("class").unwrap_or_default().split_whitespace()
    }

    pub fn has_class(&self, class: &str) -> bool {
        self.classes().any(|candidate| candidate == class)
    }

    pub fn has_class_prefix(&self, prefix: &str) -> bool {
        self.classes().any(|candidate| candidate.starts_with(prefix))
    }

    pub fn add_class(&mut self, class: &str) {
        if self.has_class(class) {
            return;
        }
        let merged = match self.attr("class") {
            Some(existing) if !existing.trim().is_empty() => format!("{} {class}", existing.trim()),
            _ => class.to_string(),
        };
        self.set_attr("class", merged);
    }

    pub fn remove_class(&mut self, class: &str) {
        if !self.has_class(class) {
            return;
        }
        let remaining = self
            .classes()
            .filter(|candidate| *candidate != class)
            .collect::<Vec<_>>()
            .join(" ");
        if remaining.is_empty() {
            self.remove_attr("class");
        } else {
            self.set_attr("class", remaining);
        }
    }

    /// Returns the value of a single declaration inside the `style` attribute.
    pub fn style_property(&self, property: &str) -> Option<String> {
        self.attr("style")?.split(';').find_map(|declaration| {
            let (name, value) = declaration.split_once(':')?;
            (name.trim().eq_ignore_ascii_case(property)).then(|| value.trim().to_string())
        })
    }

    /// Sets (or with `None` removes) a single declaration inside the `style` attribute.
    pub fn set_style_property(&mut self, property: &str, value: Option<&str>) {
        let mut declarations: Vec<String> = self
            .attr("style")
            .unwrap_or_default()
            .split(';')
            .map(str::trim)
            .filter(|declaration| !declaration.is_empty())
            .filter(|declaration| {
                declaration
                    .split_once(':')
                    .is_none_or(|(name, _)| !name.trim().eq_ignore_ascii_case(property))
            })
            .map(str::to_string)
            .collect();
        if let Some(value) = value {
            declarations.push(format!("{property}: {value}"));
        }
        if declarations.is_empty() {
            self.remove_attr("style");
        } else {
            self.set_attr("style", format!("{};", declarations.join("; ")));
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NodeData {
    Element(Element),
    Text(String),
    /// Pre-serialized markup emitted verbatim.
    Raw(String),
}

#[derive(Debug, Clone)]
struct Slot {
    data: NodeData,
    parent: Option<NodeId>,
    children: Vec<NodeId>,
}

#[derive(Debug, Clone, Default)]
pub struct Tree {
    slots: Vec<Slot>,
}

const VOID_ELEMENTS: &[&str] = &[
    "area", "base", "br", "col", "embed", "hr", "img", "input", "link", "meta", "param", "source",
    "track", "wbr",
];

pub const HEADING_TAGS: &[&str] = &["h1", "h2", "h3", "h4", "h5", "h6"];

/// Returns the rank (1-6) of a heading tag name.
pub fn heading_rank(tag: &str) -> Option<u8> {
    match tag {
        "h1" => Some(1),
        "h2" => Some(2),
        "h3" => Some(3),
        "h4" => Some(4),
        "h5" => Some(5),
        "h6" => Some(6),
        _ => None,
    }
}

impl Tree {
    pub fn new() -> Self {
        Self::default()
    }

    fn push(&mut self, data: NodeData) -> NodeId {
        let id = NodeId(self.slots.len());
        self.slots.push(Slot {
            data,
            parent: None,
            children: Vec::new(),
        });
        id
    }

    pub fn create(&mut self, element: Element) -> NodeId {
        self.push(NodeData::Element(element))
    }

    pub fn create_element(&mut self, tag: &str) -> NodeId {
        self.create(Element::new(tag))
    }

    pub fn create_text(&mut self, text: impl Into<String>) -> NodeId {
        self.push(NodeData::Text(text.into()))
    }

    pub fn create_raw(&mut self, html: impl Into<String>) -> NodeId {
        self.push(NodeData::Raw(html.into()))
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    pub fn contains(&self, id: NodeId) -> bool {
        id.0 < self.slots.len()
    }

    pub fn data(&self, id: NodeId) -> Option<&NodeData> {
        self.slots.get(id.0).map(|slot| &slot.data)
    }

    pub fn data_mut(&mut self, id: NodeId) -> Option<&mut NodeData> {
        self.slots.get_mut(id.0).map(|slot| &mut slot.data)
    }

    pub fn element(&self, id: NodeId) -> Option<&Element> {
        match self.data(id)? {
            NodeData::Element(element) => Some(element),
            _ => None,
        }
    }

    pub fn element_mut(&mut self, id: NodeId) -> Option<&mut Element> {
        match self.data_mut(id)? {
            NodeData::Element(element) => Some(element),
            _ => None,
        }
    }

    pub fn tag(&self, id: NodeId) -> Option<&str> {
        self.element(id).map(Element::tag)
    }

    pub fn is_tag(&self, id: NodeId, tag: &str) -> bool {
        self.tag(id) == Some(tag)
    }

    pub fn attr(&self, id: NodeId, name: &str) -> Option<&str> {
        self.element(id)?.attr(name)
    }

    pub fn set_attr(&mut self, id: NodeId, name: &str, value: impl Into<String>) {
        if let Some(element) = self.element_mut(id) {
            element.set_attr(name, value);
        }
    }

    pub fn remove_attr(&mut self, id: NodeId, name: &str) -> Option<String> {
        self.element_mut(id)?.remove_attr(name)
    }

    pub fn has_class(&self, id: NodeId, class: &str) -> bool {
        self.element(id).is_some_and(|element| element.has_class(class))
    }

    pub fn add_class(&mut self, id: NodeId, class: &str) {
        if let Some(element) = self.element_mut(id) {
            element.add_class(class);
        }
    }

    pub fn remove_class(&mut self, id: NodeId, class: &str) {
        if let Some(element) = self.element_mut(id) {
            element.remove_class(class);
        }
    }

    pub fn parent(&self, id: NodeId) -> Option<NodeId> {
        self.slots.get(id.0).and_then(|slot| slot.parent)
    }

    pub fn children(&self, id: NodeId) -> &[NodeId] {
        self.slots
            .get(id.0)
            .map(|slot| slot.children.as_slice())
            .unwrap_or_default()
    }

    /// Child nodes that are elements, skipping text and raw markup.
    pub fn element_children(&self, id: NodeId) -> Vec<NodeId> {
        self.children(id)
            .iter()
            .copied()
            .filter(|child| self.element(*child).is_some())
            .collect()
    }

    fn position_in_parent(&self, id: NodeId) -> Option<(NodeId, usize)> {
        let parent = self.parent(id)?;
        let index = self.children(parent).iter().position(|child| *child == id)?;
        Some((parent, index))
    }

    pub fn next_sibling(&self, id: NodeId) -> Option<NodeId> {
        let (parent, index) = self.position_in_parent(id)?;
        self.children(parent).get(index + 1).copied()
    }

    pub fn previous_sibling(&self, id: NodeId) -> Option<NodeId> {
        let (parent, index) = self.position_in_parent(id)?;
        index
            .checked_sub(1)
            .and_then(|prev| self.children(parent).get(prev).copied())
    }

    /// Next sibling that is an element, skipping text and raw nodes.
    pub fn next_element_sibling(&self, id: NodeId) -> Option<NodeId> {
        let mut cursor = self.next_sibling(id);
        while let Some(candidate) = cursor {
            if self.element(candidate).is_some() {
                return Some(candidate);
            }
            cursor = self.next_sibling(candidate);
        }
        None
    }

    pub fn previous_element_sibling(&self, id: NodeId) -> Option<NodeId> {
        let mut cursor = self.previous_sibling(id);
        while let Some(candidate) = cursor {
            if self.element(candidate).is_some() {
                return Some(candidate);
            }
            cursor = self.previous_sibling(candidate);
        }
        None
    }

    /// Unlinks the node from its parent. The node and its subtree stay in the arena.
    pub fn detach(&mut self, id: NodeId) {
        if let Some((parent, index)) = self.position_in_parent(id) {
            self.slots[parent.0].children.remove(index);
        }
        if let Some(slot) = self.slots.get_mut(id.0) {
            slot.parent = None;
        }
    }

    pub fn append(&mut self, parent: NodeId, child: NodeId) {
        if parent == child || self.is_ancestor(child, parent) {
            return;
        }
        self.detach(child);
        self.slots[child.0].parent = Some(parent);
        self.slots[parent.0].children.push(child);
    }

    pub fn prepend(&mut self, parent: NodeId, child: NodeId) {
        if parent == child || self.is_ancestor(child, parent) {
            return;
        }
        self.detach(child);
        self.slots[child.0].parent = Some(parent);
        self.slots[parent.0].children.insert(0, child);
    }

    /// Inserts `node` immediately before `reference`. No-op when `reference` is detached.
    pub fn insert_before(&mut self, reference: NodeId, node: NodeId) {
        if reference == node || self.is_ancestor(node, reference) {
            return;
        }
        if self.parent(reference).is_none() {
            return;
        }
        self.detach(node);
        if let Some((parent, index)) = self.position_in_parent(reference) {
            self.slots[node.0].parent = Some(parent);
            self.slots[parent.0].children.insert(index, node);
        }
    }

    /// Puts `replacement` where `target` was and detaches `target`.
    pub fn replace(&mut self, target: NodeId, replacement: NodeId) {
        if target == replacement {
            return;
        }
        self.insert_before(target, replacement);
        self.detach(target);
    }

    pub fn clear_children(&mut self, id: NodeId) {
        for child in self.children(id).to_vec() {
            self.detach(child);
        }
    }

    /// Replaces all children with a single text node.
    pub fn set_text(&mut self, id: NodeId, text: impl Into<String>) {
        self.clear_children(id);
        let node = self.create_text(text);
        self.append(id, node);
    }

    pub fn rename(&mut self, id: NodeId, tag: &str) {
        if let Some(element) = self.element_mut(id) {
            element.tag = tag.to_ascii_lowercase();
        }
    }

    /// True when `ancestor` is a strict ancestor of `id`.
    pub fn is_ancestor(&self, ancestor: NodeId, id: NodeId) -> bool {
        let mut cursor = self.parent(id);
        while let Some(current) = cursor {
            if current == ancestor {
                return true;
            }
            cursor = self.parent(current);
        }
        false
    }

    /// Pre-order descendants of `root`, excluding `root` itself.
    pub fn descendants(&self, root: NodeId) -> Vec<NodeId> {
        let mut out = Vec::new();
        let mut stack: Vec<NodeId> = self.children(root).iter().rev().copied().collect();
        while let Some(id) = stack.pop() {
            out.push(id);
            stack.extend(self.children(id).iter().rev().copied());
        }
        out
    }

    /// Pre-order elements of the subtree (including `root`) matching the predicate.
    pub fn select(&self, root: NodeId, predicate: impl Fn(&Element) -> bool) -> Vec<NodeId> {
        std::iter::once(root)
            .chain(self.descendants(root))
            .filter(|id| self.element(*id).is_some_and(&predicate))
            .collect()
    }

    pub fn select_first(&self, root: NodeId, predicate: impl Fn(&Element) -> bool) -> Option<NodeId> {
        self.select(root, predicate).into_iter().next()
    }

    pub fn select_class(&self, root: NodeId, class: &str) -> Vec<NodeId> {
        self.select(root, |element| element.has_class(class))
    }

    pub fn select_tag(&self, root: NodeId, tag: &str) -> Vec<NodeId> {
        self.select(root, |element| element.tag() == tag)
    }

    /// Nearest element, starting at `id` itself, that matches the predicate.
    pub fn closest(&self, id: NodeId, predicate: impl Fn(&Element) -> bool) -> Option<NodeId> {
        let mut cursor = Some(id);
        while let Some(current) = cursor {
            if self.element(current).is_some_and(&predicate) {
                return Some(current);
            }
            cursor = self.parent(current);
        }
        None
    }

    pub fn text_content(&self, id: NodeId) -> String {
        let mut out = String::new();
        if let Some(NodeData::Text(text)) = self.data(id) {
            out.push_str(text);
        }
        for node in self.descendants(id) {
            if let Some(NodeData::Text(text)) = self.data(node) {
                out.push_str(text);
            }
        }
        out
    }

    /// Copies the subtree rooted at `id` inside this tree. The copy is detached.
    pub fn deep_clone(&mut self, id: NodeId) -> NodeId {
        let data = self.slots[id.0].data.clone();
        let copy = self.push(data);
        for child in self.children(id).to_vec() {
            let child_copy = self.deep_clone(child);
            self.append(copy, child_copy);
        }
        copy
    }

    /// Copies a subtree from another tree into this one. The copy is detached.
    pub fn import(&mut self, source: &Tree, id: NodeId) -> NodeId {
        let Some(data) = source.data(id) else {
            return self.create_text("");
        };
        let copy = self.push(data.clone());
        for child in source.children(id) {
            let child_copy = self.import(source, *child);
            self.append(copy, child_copy);
        }
        copy
    }

    /// Copies the subtree into a fresh, compact [`Fragment`].
    pub fn extract(&self, id: NodeId) -> Fragment {
        let mut tree = Tree::new();
        let root = tree.import(self, id);
        Fragment { tree, root }
    }

    pub fn outer_html(&self, id: NodeId) -> String {
        let mut out = String::new();
        self.write_node(id, &mut out);
        out
    }

    pub fn inner_html(&self, id: NodeId) -> String {
        let mut out = String::new();
        for child in self.children(id) {
            self.write_node(*child, &mut out);
        }
        out
    }

    fn write_node(&self, id: NodeId, out: &mut String) {
        match self.data(id) {
            Some(NodeData::Text(text)) => out.push_str(&escape_text(text)),
            Some(NodeData::Raw(html)) => out.push_str(html),
            Some(NodeData::Element(element)) => {
                out.push('<');
                out.push_str(element.tag());
                for (name, value) in element.attributes() {
                    let _ = write!(out, " {name}=\"{}\"", escape_attribute(value));
                }
                out.push('>');
                if VOID_ELEMENTS.contains(&element.tag()) {
                    return;
                }
                for child in self.children(id) {
                    self.write_node(*child, out);
                }
                let _ = write!(out, "</{}>", element.tag());
            }
            None => {}
        }
    }
}

fn escape_text(value: &str) -> String {
    value
        .replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
}

fn escape_attribute(value: &str) -> String {
    value
        .replace('&', "&amp;")
        .replace('"', "&quot;")
        .replace('<', "&lt;")
}

/// An owned subtree handed to callers as the result of a render.
#[derive(Debug, Clone)]
pub struct Fragment {
    tree: Tree,
    root: NodeId,
}

impl Fragment {
    pub fn new(tree: Tree, root: NodeId) -> Self {
        Self { tree, root }
    }

    pub fn root(&self) -> NodeId {
        self.root
    }

    pub fn tree(&self) -> &Tree {
        &self.tree
    }

    pub fn tree_mut(&mut self) -> &mut Tree {
        &mut self.tree
    }

    pub fn into_parts(self) -> (Tree, NodeId) {
        (self.tree, self.root)
    }

    pub fn to_html(&self) -> String {
        self.tree.outer_html(self.root)
    }

    /// Wraps the fragment's root inside a copy of `container`.
    pub fn wrap_in(self, container: &Element) -> Fragment {
        let (mut tree, root) = self.into_parts();
        let wrapper = tree.create(container.clone());
        tree.append(wrapper, root);
        Fragment::new(tree, wrapper)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> (Tree, NodeId, NodeId, NodeId) {
        let mut tree = Tree::new();
        let root = tree.create(Element::new("div").with_class("root"));
        let para = tree.create_element("p");
        let text = tree.create_text("a < b & c");
        tree.append(para, text);
        tree.append(root, para);
        let img = tree.create(Element::new("img").with_attr("src", "x\"y.png"));
        tree.append(root, img);
        (tree, root, para, img)
    }

    #[test]
    fn serializes_with_escaping_and_void_elements() {
        let (tree, root, _, _) = sample();
        assert_eq!(
            tree.outer_html(root),
            "<div class=\"root\"><p>a &lt; b &amp; c</p><img src=\"x&quot;y.png\"></div>"
        );
    }

    #[test]
    fn class_helpers_are_idempotent() {
        let mut element = Element::new("div");
        element.add_class("a");
        element.add_class("b");
        element.add_class("a");
        assert_eq!(element.attr("class"), Some("a b"));
        element.remove_class("a");
        element.remove_class("b");
        assert_eq!(element.attr("class"), None);
    }

    #[test]
    fn style_properties_replace_existing_declarations() {
        let mut element = Element::new("img").with_attr("style", "border: 0; max-width: 10px");
        element.set_style_property("max-width", Some("20px"));
        assert_eq!(element.style_property("max-width").as_deref(), Some("20px"));
        assert_eq!(element.style_property("border").as_deref(), Some("0"));
        element.set_style_property("border", None);
        element.set_style_property("max-width", None);
        assert_eq!(element.attr("style"), None);
    }

    #[test]
    fn insert_before_and_replace_keep_order() {
        let (mut tree, root, para, img) = sample();
        let hr = tree.create_element("hr");
        tree.insert_before(img, hr);
        assert_eq!(tree.children(root), &[para, hr, img]);

        let span = tree.create_element("span");
        tree.replace(hr, span);
        assert_eq!(tree.children(root), &[para, span, img]);
        assert_eq!(tree.parent(hr), None);
    }

    #[test]
    fn append_refuses_to_create_cycles() {
        let (mut tree, root, para, _) = sample();
        tree.append(para, root);
        assert_eq!(tree.parent(root), None);
        assert_eq!(tree.parent(para), Some(root));
    }

    #[test]
    fn deep_clone_and_extract_copy_subtrees() {
        let (mut tree, root, para, _) = sample();
        let copy = tree.deep_clone(para);
        assert_ne!(copy, para);
        assert_eq!(tree.outer_html(copy), tree.outer_html(para));
        assert_eq!(tree.parent(copy), None);

        let fragment = tree.extract(root);
        assert_eq!(fragment.to_html(), tree.outer_html(root));
        assert!(fragment.tree().len() < tree.len());
    }

    #[test]
    fn closest_and_select_walk_the_tree() {
        let (tree, root, para, _) = sample();
        let text = tree.children(para)[0];
        assert_eq!(tree.closest(text, |el| el.has_class("root")), Some(root));
        assert_eq!(tree.select_tag(root, "p"), vec![para]);
        assert_eq!(tree.text_content(root), "a < b & c");
    }
}
