//! Section-driven markdown rendering.
//!
//! Sections render strictly in order inside one container, because later
//! sections lay out against the final position of earlier ones.

use base64::{Engine as _, engine::general_purpose::STANDARD};
use futures::future::join_all;

use crate::domain::tree::{Element, LiveState, NodeId, Tree};

use super::{
    postprocess::SIZER_CLASS,
    renderer::RenderContext,
    surface::{PendingTask, ViewId},
    types::{EmbedPolicy, RenderError, Stage},
};

pub const VIEW_CLASS: &str = "markdown-preview-view";
pub const PUSHER_CLASS: &str = "markdown-preview-pusher";
pub const EMBED_PLACEHOLDER_CLASS: &str = "document-embed-placeholder";

const BANNER_CLASS: &str = "obsidian-banner-wrapper";
const QUERY_BLOCK_CLASSES: &[&str] = &["block-language-dataview", "block-language-dataviewjs"];
const EMBED_CLASSES: &[&str] = &["markdown-embed", "internal-embed"];
const BLOCK_LANGUAGE_PREFIX: &str = "block-language-";
const EMBED_DECIDED_ATTR: &str = "data-embed";
/// Encoded snapshots shorter than this are blank canvases.
const MIN_SNAPSHOT_LEN: usize = 100;

struct FoldedCallout {
    content: NodeId,
    callout: Option<NodeId>,
}

/// Renders every section of `view` and returns the root of the assembled output.
pub(crate) async fn render_markdown_view(
    ctx: &RenderContext<'_>,
    view: ViewId,
) -> Result<NodeId, RenderError> {
    let sections = ctx.surface.sections(view);
    let (container, sizer) = {
        let mut tree = ctx.lock_tree("create_container");
        let container = tree.create(
            Element::new("div")
                .with_class(VIEW_CLASS)
                .with_class("markdown-rendered"),
        );
        let sizer = tree.create(
            Element::new("div")
                .with_class(SIZER_CLASS)
                .with_class("markdown-preview-section"),
        );
        tree.append(container, sizer);
        (container, sizer)
    };

    let mut pending: Vec<PendingTask> = Vec::new();
    let mut folded: Vec<FoldedCallout> = Vec::new();
    let timings = ctx.timings;

    for (index, section) in sections.iter().enumerate() {
        ctx.ensure_not_cancelled()?;
        let content = section.content;

        ctx.surface.reset_section(view, index);
        ctx.lock_tree("place_section").append(sizer, content);

        ctx.surface.render_section(view, index);
        ctx.wait_for(Stage::SectionRender, timings.section_timeout, || {
            ctx.surface
                .section(view, index)
                .is_some_and(|section| section.rendered)
        })
        .await?;

        ctx.surface.measure_section(view, index);
        ctx.wait_for(Stage::SectionMeasure, timings.section_timeout, || {
            ctx.surface
                .section(view, index)
                .is_some_and(|section| section.computed)
        })
        .await?;

        render_query_blocks(ctx, view, content);
        pending.extend(ctx.surface.post_process_section(view, content));
        folded.extend(unfold_callouts(&mut ctx.lock_tree("unfold_callouts"), content));

        ctx.wait_for(Stage::TransclusionSettle, timings.settle_timeout, || {
            is_settled(&ctx.lock_tree("settle"), content)
        })
        .await?;

        apply_embed_policy(ctx, content);
        snapshot_canvases(ctx, content);
    }

    join_all(pending).await;
    ctx.ensure_not_cancelled()?;

    let mut tree = ctx.lock_tree("assemble");
    refold_callouts(&mut tree, &folded);
    tree.clear_children(sizer);
    if ctx.options.create_pusher_element {
        let pusher = tree.create(
            Element::new("div")
                .with_class(PUSHER_CLASS)
                .with_attr("style", "width: 1px; height: 0.1px; margin-bottom: 0px;"),
        );
        tree.append(sizer, pusher);
    }
    for section in &sections {
        let copy = tree.deep_clone(section.content);
        tree.append(sizer, copy);
    }
    if let Some(banner) = tree.select_class(sizer, BANNER_CLASS).into_iter().next() {
        tree.insert_before(sizer, banner);
    }

    if ctx.options.create_document_container {
        Ok(container)
    } else {
        let banner = tree
            .previous_element_sibling(sizer)
            .filter(|banner| tree.has_class(*banner, BANNER_CLASS));
        if let Some(banner) = banner {
            tree.prepend(sizer, banner);
        }
        Ok(sizer)
    }
}

fn render_query_blocks(ctx: &RenderContext<'_>, view: ViewId, content: NodeId) {
    let placeholders = ctx.lock_tree("find_query_blocks").select(content, |element| {
        QUERY_BLOCK_CLASSES
            .iter()
            .any(|class| element.has_class(class))
    });
    for placeholder in placeholders {
        let Some(rendered) = ctx.surface.render_query_block(view, placeholder) else {
            continue;
        };
        ctx.lock_tree("replace_query_block")
            .replace(placeholder, rendered);
    }
}

fn unfold_callouts(tree: &mut Tree, content: NodeId) -> Vec<FoldedCallout> {
    let hidden = tree.select(content, |element| {
        element.has_class("callout-content")
            && element.style_property("display").as_deref() == Some("none")
    });
    hidden
        .into_iter()
        .map(|node| {
            if let Some(element) = tree.element_mut(node) {
                element.set_style_property("display", None);
            }
            let callout = tree
                .closest(node, |element| element.has_class("callout"))
                .filter(|callout| tree.has_class(*callout, "is-collapsed"));
            if let Some(callout) = callout {
                tree.remove_class(callout, "is-collapsed");
            }
            FoldedCallout {
                content: node,
                callout,
            }
        })
        .collect()
}

fn refold_callouts(tree: &mut Tree, folded: &[FoldedCallout]) {
    for entry in folded {
        if let Some(element) = tree.element_mut(entry.content) {
            element.set_style_property("display", Some("none"));
        }
        if let Some(callout) = entry.callout {
            tree.add_class(callout, "is-collapsed");
        }
    }
}

/// Transclusions report `is-loaded`; plugin blocks are done once they have content.
fn is_settled(tree: &Tree, content: NodeId) -> bool {
    tree.select(content, |element| {
        EMBED_CLASSES.iter().any(|class| element.has_class(class))
    })
    .into_iter()
    .all(|embed| tree.has_class(embed, "is-loaded"))
        && tree
            .select(content, |element| {
                element.has_class_prefix(BLOCK_LANGUAGE_PREFIX)
            })
            .into_iter()
            .all(|block| !tree.children(block).is_empty())
}

/// Keeps inlined transclusions and swaps the rest for cross-reference placeholders.
fn apply_embed_policy(ctx: &RenderContext<'_>, content: NodeId) {
    let mut tree = ctx.lock_tree("embed_policy");
    let embeds = tree.select(content, |element| {
        element.has_class("markdown-embed")
            && element.attr("src").is_some()
            && element.attr(EMBED_DECIDED_ATTR).is_none()
    });
    for embed in embeds {
        let Some(link) = tree.attr(embed, "src").map(str::to_string) else {
            continue;
        };
        match EmbedPolicy::decide(&link, ctx.options, ctx.session.store()) {
            EmbedPolicy::Inline { .. } => tree.set_attr(embed, EMBED_DECIDED_ATTR, "inline"),
            EmbedPolicy::Reference { path } => {
                let placeholder = reference_placeholder(&mut tree, &path);
                tree.replace(embed, placeholder);
            }
        }
    }
}

pub(crate) fn reference_placeholder(tree: &mut Tree, path: &str) -> NodeId {
    tree.create(
        Element::new("div")
            .with_class(EMBED_PLACEHOLDER_CLASS)
            .with_attr("data-src", path),
    )
}

/// Replaces drawing surfaces with static images of their pixels. Blank
/// snapshots are dropped.
pub(crate) fn snapshot_canvases(ctx: &RenderContext<'_>, root: NodeId) {
    let mut dropped = 0usize;
    {
        let mut tree = ctx.lock_tree("snapshot_canvases");
        for canvas in tree.select_tag(root, "canvas") {
            let Some(element) = tree.element(canvas) else {
                continue;
            };
            let data_url = match &element.live {
                LiveState::Bitmap(bytes) if !bytes.is_empty() => {
                    format!("data:image/png;base64,{}", STANDARD.encode(bytes))
                }
                _ => String::new(),
            };
            if data_url.len() < MIN_SNAPSHOT_LEN {
                tree.detach(canvas);
                dropped += 1;
                continue;
            }

            let mut image = Element::new("img").with_attr("src", data_url);
            for name in ["class", "width", "height", "style"] {
                if let Some(value) = element.attr(name) {
                    image.set_attr(name, value);
                }
            }
            let image = tree.create(image);
            tree.replace(canvas, image);
        }
    }
    if dropped > 0 {
        ctx.session.warning(
            "Dropped blank canvas",
            &format!("{dropped} canvas element(s) rendered no pixels"),
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn settled_requires_loaded_embeds_and_populated_blocks() {
        let mut tree = Tree::new();
        let root = tree.create_element("div");
        let embed = tree.create(Element::new("div").with_class("internal-embed"));
        tree.append(root, embed);
        let block = tree.create(Element::new("div").with_class("block-language-mermaid"));
        tree.append(root, block);

        assert!(!is_settled(&tree, root));
        tree.add_class(embed, "is-loaded");
        assert!(!is_settled(&tree, root));
        let svg = tree.create_element("svg");
        tree.append(block, svg);
        assert!(is_settled(&tree, root));
    }

    #[test]
    fn callouts_refold_to_their_original_state() {
        let mut tree = Tree::new();
        let root = tree.create_element("div");
        let callout = tree.create(
            Element::new("div")
                .with_class("callout")
                .with_class("is-collapsed"),
        );
        tree.append(root, callout);
        let body = tree.create(
            Element::new("div")
                .with_class("callout-content")
                .with_attr("style", "display: none;"),
        );
        tree.append(callout, body);
        let before = tree.outer_html(root);

        let folded = unfold_callouts(&mut tree, root);
        assert_eq!(folded.len(), 1);
        assert!(tree.attr(body, "style").is_none());
        assert!(!tree.has_class(callout, "is-collapsed"));

        refold_callouts(&mut tree, &folded);
        assert_eq!(tree.outer_html(root), before);
    }
}
