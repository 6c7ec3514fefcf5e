//! Converts a live-rendered tree into portable static markup.
//!
//! Every step is idempotent: running the pipeline on its own output changes
//! nothing.

use thiserror::Error;

use crate::domain::tree::{Element, LiveState, NodeId, Tree};

use super::{
    headings::COLLAPSE_INDICATOR_CLASS, inline::render_inline_markdown, types::RenderOptions,
};

pub const DOCUMENT_ROOT_CLASS: &str = "obsidian-document";
pub const SIZER_CLASS: &str = "markdown-preview-sizer";
pub const LIST_INDICATOR_CLASS: &str = "list-collapse-indicator";

/// Containers that can carry the document root marker, outermost first.
const CONTENT_VIEW_CLASSES: &[&str] = &[
    "markdown-preview-view",
    "canvas-wrapper",
    "view-content",
    "markdown-preview-section",
    SIZER_CLASS,
];
const DECORATION_CLASSES: &[&str] = &["mod-header", "mod-footer"];
const INLINE_CONTAINERS: &[&str] = &["p", "span", "a", "em", "strong", "label"];
const MEDIA_TAGS: &[&str] = &["img", "video", "embed", "iframe"];
const TEXT_INPUT_TYPES: &[&str] = &["text", "search", "email", "url", "tel", "number", "password"];
const FOREIGN_DECORATION_PREFIX: &str = "no-export";
const FRONT_MATTER_CLASSES: &[&str] = &["frontmatter-container", "metadata-container"];
const TOC_CLASS: &str = "block-language-toc";
const INLINE_RENDERED_ATTR: &str = "data-inline-rendered";

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum PostProcessError {
    #[error("no content view container found to mark as the document root")]
    MissingDocumentRoot,
}

/// Runs every static conversion over the subtree at `root`.
///
/// When no content view can be marked as the document root the tree is left
/// untouched and an error is returned for the caller to log.
pub fn post_process(
    tree: &mut Tree,
    root: NodeId,
    options: &RenderOptions,
) -> Result<(), PostProcessError> {
    ensure_document_root(tree, root)?;

    if !options.create_document_container {
        strip_decorations(tree, root);
    }
    repair_block_in_inline(tree, root);
    freeze_form_values(tree, root);
    rewrite_tag_links(tree, root);
    responsive_media_widths(tree, root);
    replace_pdf_viewers(tree, root);
    remove_foreign_decorations(tree, root);
    relocate_front_matter(tree, root);
    lazy_load_frames(tree, root);
    add_list_indicators(tree, root);
    render_toc_labels(tree, root);
    Ok(())
}

fn ensure_document_root(tree: &mut Tree, root: NodeId) -> Result<(), PostProcessError> {
    let marked = tree.select_class(root, DOCUMENT_ROOT_CLASS);
    if let Some((outermost, rest)) = marked.split_first() {
        for nested in rest {
            if tree.is_ancestor(*outermost, *nested) {
                tree.remove_class(*nested, DOCUMENT_ROOT_CLASS);
            }
        }
        return Ok(());
    }

    let container = CONTENT_VIEW_CLASSES
        .iter()
        .find_map(|class| tree.select_class(root, class).into_iter().next())
        .ok_or(PostProcessError::MissingDocumentRoot)?;
    tree.add_class(container, DOCUMENT_ROOT_CLASS);
    Ok(())
}

fn strip_decorations(tree: &mut Tree, root: NodeId) {
    let decorations = tree.select(root, |element| {
        DECORATION_CLASSES.iter().any(|class| element.has_class(class))
    });
    for node in decorations {
        if node != root {
            tree.detach(node);
        }
    }
}

fn repair_block_in_inline(tree: &mut Tree, root: NodeId) {
    for node in tree.select_tag(root, "div") {
        let inside_inline = tree.parent(node).is_some_and(|parent| {
            tree.closest(parent, |element| INLINE_CONTAINERS.contains(&element.tag()))
                .is_some_and(|inline| inline == root || tree.is_ancestor(root, inline))
        });
        if inside_inline {
            tree.rename(node, "span");
            if let Some(element) = tree.element_mut(node) {
                element.set_style_property("display", Some("block"));
            }
        }
    }
}

fn freeze_form_values(tree: &mut Tree, root: NodeId) {
    let controls = tree.select(root, |element| {
        matches!(element.live, LiveState::FormValue(_))
            && matches!(element.tag(), "input" | "textarea")
    });
    for node in controls {
        let Some(element) = tree.element(node) else {
            continue;
        };
        let LiveState::FormValue(value) = element.live.clone() else {
            continue;
        };
        if element.tag() == "textarea" {
            if tree.text_content(node) != value {
                tree.set_text(node, value);
            }
            continue;
        }
        let input_type = element.attr("type").unwrap_or("text").to_ascii_lowercase();
        if TEXT_INPUT_TYPES.contains(&input_type.as_str()) {
            tree.set_attr(node, "value", value);
        }
    }
}

fn rewrite_tag_links(tree: &mut Tree, root: NodeId) {
    let links = tree.select(root, |element| {
        element.tag() == "a"
            && element.has_class("tag")
            && element.attr("href").is_some_and(|href| href.starts_with('#'))
    });
    for link in links {
        let Some(href) = tree.attr(link, "href").map(str::to_string) else {
            continue;
        };
        let tag = href.trim_start_matches('#');
        tree.set_attr(link, "href", format!("?query=tag:{tag}"));
        tree.set_attr(link, "data-href", href.as_str());
    }
}

fn responsive_media_widths(tree: &mut Tree, root: NodeId) {
    let media = tree.select(root, |element| {
        MEDIA_TAGS.contains(&element.tag()) && element.attr("width").is_some()
    });
    for node in media {
        let Some(width) = tree.remove_attr(node, "width") else {
            continue;
        };
        let width = width.trim();
        if width.is_empty() {
            continue;
        }
        let value = css_length(width);
        if let Some(element) = tree.element_mut(node) {
            element.set_style_property("max-width", Some(&value));
        }
    }
}

/// Bare numbers are pixel lengths.
fn css_length(value: &str) -> String {
    let value = value.trim();
    if value.parse::<f64>().is_ok() {
        format!("{value}px")
    } else {
        value.to_string()
    }
}

fn replace_pdf_viewers(tree: &mut Tree, root: NodeId) {
    let viewers = tree.select(root, |element| {
        element.has_class("pdf-embed") && element.tag() != "embed"
    });
    for viewer in viewers {
        if viewer == root || !tree.select_tag(viewer, "embed").is_empty() {
            continue;
        }
        let Some(element) = tree.element(viewer) else {
            continue;
        };
        let Some(src) = element.attr("src").or_else(|| element.attr("data-src")) else {
            continue;
        };
        let mut embed = Element::new("embed")
            .with_attr("src", src)
            .with_attr("type", "application/pdf");
        let width = element
            .style_property("width")
            .or_else(|| element.attr("width").map(css_length));
        let height = element
            .style_property("height")
            .or_else(|| element.attr("height").map(css_length));
        embed.set_style_property("width", Some(width.as_deref().unwrap_or("100%")));
        embed.set_style_property("height", Some(height.as_deref().unwrap_or("800px")));

        let replacement = tree.create(embed);
        tree.replace(viewer, replacement);
    }
}

fn remove_foreign_decorations(tree: &mut Tree, root: NodeId) {
    let foreign = tree.select(root, |element| {
        element.has_class_prefix(FOREIGN_DECORATION_PREFIX)
    });
    for node in foreign {
        if node != root {
            tree.detach(node);
        }
    }
}

fn relocate_front_matter(tree: &mut Tree, root: NodeId) {
    let Some(front_matter) = tree.select_first(root, |element| {
        FRONT_MATTER_CLASSES.iter().any(|class| element.has_class(class))
    }) else {
        return;
    };
    let Some(sizer) = tree.select_class(root, SIZER_CLASS).into_iter().next() else {
        return;
    };
    if sizer == root || tree.previous_element_sibling(sizer) == Some(front_matter) {
        return;
    }

    let old_parent = tree.parent(front_matter);
    tree.insert_before(sizer, front_matter);

    let emptied = old_parent.filter(|parent| {
        *parent != root
            && *parent != sizer
            && Some(*parent) != tree.parent(sizer)
            && tree.children(*parent).is_empty()
    });
    if let Some(parent) = emptied {
        tree.detach(parent);
    }
}

fn lazy_load_frames(tree: &mut Tree, root: NodeId) {
    for frame in tree.select_tag(root, "iframe") {
        if tree.attr(frame, "loading") != Some("lazy") {
            tree.set_attr(frame, "loading", "lazy");
        }
    }
}

fn add_list_indicators(tree: &mut Tree, root: NodeId) {
    for item in tree.select_tag(root, "li") {
        let children = tree.element_children(item);
        let has_nested_list = children
            .iter()
            .any(|child| tree.is_tag(*child, "ul") || tree.is_tag(*child, "ol"));
        let has_indicator = children
            .iter()
            .any(|child| tree.has_class(*child, LIST_INDICATOR_CLASS));
        if has_nested_list && !has_indicator {
            let indicator = tree.create(
                Element::new("div")
                    .with_class(LIST_INDICATOR_CLASS)
                    .with_class(COLLAPSE_INDICATOR_CLASS),
            );
            tree.prepend(item, indicator);
        }
    }
}

fn render_toc_labels(tree: &mut Tree, root: NodeId) {
    for toc in tree.select_class(root, TOC_CLASS) {
        let labels = tree.select(toc, |element| {
            element.tag() == "a" && element.attr(INLINE_RENDERED_ATTR).is_none()
        });
        for label in labels {
            if !tree.parent(label).is_some_and(|parent| tree.is_tag(parent, "li")) {
                continue;
            }
            let html = render_inline_markdown(&tree.text_content(label));
            tree.clear_children(label);
            let rendered = tree.create_raw(html);
            tree.append(label, rendered);
            tree.set_attr(label, INLINE_RENDERED_ATTR, "true");
        }
    }
}
