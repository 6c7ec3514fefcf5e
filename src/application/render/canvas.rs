//! Canvas rendering: fit, force-render, resolve embeds and flatten edges.

use tracing::debug;

use crate::domain::tree::{Element, NodeId, Tree};

use super::{
    markdown::{reference_placeholder, render_markdown_view, snapshot_canvases},
    renderer::RenderContext,
    surface::{CanvasEdge, CanvasNodeKind, ViewId},
    types::{EmbedPolicy, RenderError},
};

const EDGE_LAYER_CLASS: &str = "canvas-edges";
const EDGE_BODY_LAYER_CLASS: &str = "canvas-edge-bodies";
const EDGE_ARROW_LAYER_CLASS: &str = "canvas-edge-arrowheads";
const EDGE_LABELS_CLASS: &str = "canvas-edge-labels";
const LINK_FRAME_CLASS: &str = "canvas-link-frame";

pub(crate) async fn render_canvas_view(
    ctx: &RenderContext<'_>,
) -> Result<Option<NodeId>, RenderError> {
    ctx.surface.zoom_to_fit();
    ctx.settle().await?;
    ctx.surface.render_canvas_items();
    ctx.surface.zoom_to_fit();
    ctx.settle().await?;

    let Some(root) = ctx.surface.content_root(ViewId::MAIN) else {
        return Ok(None);
    };

    for node in ctx.surface.canvas_nodes() {
        ctx.ensure_not_cancelled()?;
        match node.kind {
            CanvasNodeKind::File { path, view } => {
                let policy = EmbedPolicy::decide(&path, ctx.options, ctx.session.store());
                debug!(
                    target = "application::render::canvas",
                    op = "embed",
                    node = node.id.as_str(),
                    path = path.as_str(),
                    inline = matches!(policy, EmbedPolicy::Inline { .. }),
                    "resolving canvas file node"
                );
                match (policy, view) {
                    (EmbedPolicy::Inline { .. }, Some(view)) => {
                        let rendered = render_markdown_view(ctx, view).await?;
                        let mut tree = ctx.lock_tree("inline_canvas_embed");
                        tree.clear_children(node.content);
                        tree.append(node.content, rendered);
                    }
                    (EmbedPolicy::Inline { .. }, None) => {}
                    (EmbedPolicy::Reference { path }, _) => {
                        let mut tree = ctx.lock_tree("reference_canvas_embed");
                        let placeholder = reference_placeholder(&mut tree, &path);
                        tree.clear_children(node.content);
                        tree.append(node.content, placeholder);
                    }
                }
            }
            CanvasNodeKind::Link { url } => {
                let mut tree = ctx.lock_tree("link_frame");
                let frame = tree.create(
                    Element::new("iframe")
                        .with_class(LINK_FRAME_CLASS)
                        .with_attr("src", url)
                        .with_attr("loading", "lazy"),
                );
                tree.clear_children(node.content);
                tree.append(node.content, frame);
            }
            CanvasNodeKind::Text | CanvasNodeKind::Group => {}
        }
    }

    let edges = ctx.surface.canvas_edges();
    flatten_edges(&mut ctx.lock_tree("flatten_edges"), root, &edges);
    snapshot_canvases(ctx, root);
    Ok(Some(root))
}

/// Moves every edge into two shared line layers (bodies, arrowheads) plus a
/// label container, dropping the per-edge wrappers left empty.
fn flatten_edges(tree: &mut Tree, root: NodeId, edges: &[CanvasEdge]) {
    if edges.is_empty() {
        return;
    }

    let bodies = edge_layer(tree, EDGE_BODY_LAYER_CLASS);
    let arrows = edge_layer(tree, EDGE_ARROW_LAYER_CLASS);
    let labels = tree.create(Element::new("div").with_class(EDGE_LABELS_CLASS));

    for edge in edges {
        move_into_layer(tree, root, edge.body, bodies.group);
        if let Some(arrow) = edge.arrow {
            move_into_layer(tree, root, arrow, arrows.group);
        }
        if let Some(label) = edge.label {
            move_into_layer(tree, root, label, labels);
        }
    }

    tree.append(root, bodies.svg);
    tree.append(root, arrows.svg);
    if !tree.children(labels).is_empty() {
        tree.append(root, labels);
    }
}

struct EdgeLayer {
    svg: NodeId,
    group: NodeId,
}

fn edge_layer(tree: &mut Tree, class: &str) -> EdgeLayer {
    let svg = tree.create(
        Element::new("svg")
            .with_class(EDGE_LAYER_CLASS)
            .with_class(class),
    );
    let group = tree.create_element("g");
    tree.append(svg, group);
    EdgeLayer { svg, group }
}

fn move_into_layer(tree: &mut Tree, root: NodeId, node: NodeId, layer: NodeId) {
    let old_parent = tree.parent(node);
    tree.append(layer, node);
    let mut cursor = old_parent;
    while let Some(parent) = cursor {
        if parent == root || !tree.children(parent).is_empty() {
            break;
        }
        cursor = tree.parent(parent);
        tree.detach(parent);
    }
}
