//! Nests flat heading runs into collapsible heading trees.

use crate::domain::tree::{Element, NodeData, NodeId, Tree, heading_rank};

pub const HEADING_WRAPPER_CLASS: &str = "heading-wrapper";
pub const HEADING_CHILDREN_CLASS: &str = "heading-children";
pub const HEADING_INDICATOR_CLASS: &str = "heading-collapse-indicator";
pub const COLLAPSE_INDICATOR_CLASS: &str = "collapse-indicator";

const INLINE_TITLE_CLASS: &str = "inline-title";
const BOUNDARY_CLASSES: &[&str] = &["footnotes", "mod-footer"];

/// Wraps every heading under `root` together with the content it owns.
///
/// Content owned by a heading is every following sibling up to the next
/// heading of equal or shallower rank, or a footnote/footer boundary.
/// Already wrapped headings are left alone, so running twice is a no-op.
pub fn build_heading_trees(tree: &mut Tree, root: NodeId) {
    let headings: Vec<NodeId> = tree
        .select(root, |element| heading_rank(element.tag()).is_some())
        .into_iter()
        .filter(|heading| *heading != root)
        .filter(|heading| {
            !tree
                .parent(*heading)
                .is_some_and(|parent| tree.has_class(parent, HEADING_WRAPPER_CLASS))
        })
        .collect();

    for heading in headings {
        let Some(rank) = tree.tag(heading).and_then(heading_rank) else {
            continue;
        };
        strip_newlines(tree, heading);

        let wrapper = wrapper_for(tree, root, heading);
        tree.add_class(wrapper, HEADING_WRAPPER_CLASS);

        let collapsible = rank > 1 && !tree.has_class(heading, INLINE_TITLE_CLASS);
        ensure_indicator(tree, heading, collapsible);

        let children = tree.create(Element::new("div").with_class(HEADING_CHILDREN_CLASS));
        tree.append(wrapper, children);

        let mut cursor = tree.next_element_sibling(wrapper);
        while let Some(sibling) = cursor {
            if is_boundary(tree, sibling)
                || sibling_rank(tree, sibling).is_some_and(|other| other <= rank)
            {
                break;
            }
            cursor = tree.next_element_sibling(sibling);
            tree.append(children, sibling);
        }
    }
}

fn wrapper_for(tree: &mut Tree, root: NodeId, heading: NodeId) -> NodeId {
    let reusable = tree.parent(heading).filter(|parent| {
        *parent != root
            && tree.is_tag(*parent, "div")
            && !tree.has_class(*parent, HEADING_CHILDREN_CLASS)
            && tree.element_children(*parent) == [heading]
    });
    if let Some(parent) = reusable {
        return parent;
    }

    let wrapper = tree.create_element("div");
    tree.insert_before(heading, wrapper);
    tree.append(wrapper, heading);
    wrapper
}

fn ensure_indicator(tree: &mut Tree, heading: NodeId, collapsible: bool) {
    let existing: Vec<NodeId> = tree
        .element_children(heading)
        .into_iter()
        .filter(|child| tree.has_class(*child, HEADING_INDICATOR_CLASS))
        .collect();

    let keep = usize::from(collapsible);
    for extra in existing.iter().skip(keep) {
        tree.detach(*extra);
    }
    if collapsible && existing.is_empty() {
        let indicator = tree.create(
            Element::new("div")
                .with_class(HEADING_INDICATOR_CLASS)
                .with_class(COLLAPSE_INDICATOR_CLASS),
        );
        tree.prepend(heading, indicator);
    }
}

/// Rank of a sibling that is, or will become, a heading wrapper.
fn sibling_rank(tree: &Tree, sibling: NodeId) -> Option<u8> {
    if let Some(rank) = tree.tag(sibling).and_then(heading_rank) {
        return Some(rank);
    }
    match tree.element_children(sibling).as_slice() {
        [first, ..] if tree.has_class(sibling, HEADING_WRAPPER_CLASS) => {
            tree.tag(*first).and_then(heading_rank)
        }
        [only] if tree.is_tag(sibling, "div") => tree.tag(*only).and_then(heading_rank),
        _ => None,
    }
}

fn is_boundary(tree: &Tree, sibling: NodeId) -> bool {
    if tree.is_tag(sibling, "footer") {
        return true;
    }
    tree.select_first(sibling, |element| {
        BOUNDARY_CLASSES
            .iter()
            .any(|class| element.has_class(class))
    })
    .is_some()
}

fn strip_newlines(tree: &mut Tree, heading: NodeId) {
    for node in tree.descendants(heading) {
        if let Some(NodeData::Text(text)) = tree.data_mut(node) {
            text.retain(|c| c != '\n' && c != '\r');
        }
    }
}
