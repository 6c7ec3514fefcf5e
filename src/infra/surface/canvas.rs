//! JSON canvas files laid out as positioned nodes and edge drawings.

use serde::Deserialize;

use crate::{
    application::render::{CanvasEdge, CanvasNode, CanvasNodeKind, ViewId},
    domain::{
        document::DocumentKind,
        media::media_wrapper,
        tree::{Element, NodeId, Tree},
    },
    infra::error::InfraError,
};

use super::markdown::{BuiltBlock, EmbedIndex, SectionBuilder};

const ARROW_LENGTH: f64 = 10.0;
const ARROW_HALF_WIDTH: f64 = 5.0;

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub(crate) struct CanvasFile {
    pub nodes: Vec<RawNode>,
    pub edges: Vec<RawEdge>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub(crate) struct RawNode {
    pub id: String,
    #[serde(rename = "type")]
    pub kind: String,
    pub x: f64,
    pub y: f64,
    pub width: f64,
    pub height: f64,
    pub text: Option<String>,
    pub file: Option<String>,
    pub url: Option<String>,
    pub label: Option<String>,
    pub color: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub(crate) struct RawEdge {
    pub id: String,
    pub from_node: String,
    pub to_node: String,
    pub from_side: Option<String>,
    pub to_side: Option<String>,
    pub to_end: Option<String>,
    pub label: Option<String>,
    pub color: Option<String>,
}

pub(crate) fn parse_canvas(path: &str, text: &str) -> Result<CanvasFile, InfraError> {
    if text.trim().is_empty() {
        return Ok(CanvasFile::default());
    }
    serde_json::from_str(text).map_err(|err| InfraError::canvas_parse(path, err.to_string()))
}

impl CanvasFile {
    /// Paths referenced by file nodes.
    pub(crate) fn file_links(&self) -> impl Iterator<Item = &str> {
        self.nodes.iter().filter_map(|node| node.file.as_deref())
    }

    /// Text bodies of text nodes.
    pub(crate) fn texts(&self) -> impl Iterator<Item = &str> {
        self.nodes.iter().filter_map(|node| node.text.as_deref())
    }

    fn bounds(&self) -> Option<(f64, f64, f64, f64)> {
        let first = self.nodes.first()?;
        let init = (first.x, first.y, first.x + first.width, first.y + first.height);
        Some(self.nodes.iter().fold(init, |(left, top, right, bottom), node| {
            (
                left.min(node.x),
                top.min(node.y),
                right.max(node.x + node.width),
                bottom.max(node.y + node.height),
            )
        }))
    }
}

/// A laid-out canvas: root element, nodes, edges and the sectioned views of
/// embedded markdown files (view `i` is `ViewId(i + 1)`).
#[derive(Debug, Clone, Default)]
pub(crate) struct CanvasLayout {
    pub root: Option<NodeId>,
    pub nodes: Vec<CanvasNode>,
    pub edges: Vec<CanvasEdge>,
    pub views: Vec<Vec<BuiltBlock>>,
    bounds: Option<(f64, f64, f64, f64)>,
}

impl CanvasLayout {
    pub(crate) fn build(
        tree: &mut Tree,
        file: &CanvasFile,
        builder: &SectionBuilder<'_>,
        embeds: &EmbedIndex,
    ) -> Self {
        let root = tree.create(
            Element::new("div")
                .with_class("canvas-wrapper")
                .with_class("canvas"),
        );
        let mut layout = CanvasLayout {
            root: Some(root),
            bounds: file.bounds(),
            ..CanvasLayout::default()
        };

        for raw in &file.nodes {
            let node = layout.node(tree, raw, builder, embeds);
            tree.append(root, node.element);
            layout.nodes.push(node);
        }
        for raw in &file.edges {
            let Some(edge) = edge(tree, root, file, raw) else {
                continue;
            };
            layout.edges.push(edge);
        }
        layout
    }

    fn node(
        &mut self,
        tree: &mut Tree,
        raw: &RawNode,
        builder: &SectionBuilder<'_>,
        embeds: &EmbedIndex,
    ) -> CanvasNode {
        let mut element = Element::new("div")
            .with_class("canvas-node")
            .with_attr("data-node-id", raw.id.as_str())
            .with_attr(
                "style",
                format!(
                    "left: {}px; top: {}px; width: {}px; height: {}px;",
                    raw.x, raw.y, raw.width, raw.height
                ),
            );
        if let Some(color) = raw.color.as_deref() {
            element.add_class(&format!("mod-canvas-color-{color}"));
        }
        if raw.kind == "group" {
            element.add_class("canvas-node-group");
        }
        let element = tree.create(element);
        let container = tree.create(Element::new("div").with_class("canvas-node-container"));
        let content = tree.create(Element::new("div").with_class("canvas-node-content"));
        tree.append(element, container);
        tree.append(container, content);

        let kind = match raw.kind.as_str() {
            "text" => {
                let rendered = tree.create(Element::new("div").with_class("markdown-rendered"));
                for block in builder.build(tree, raw.text.as_deref().unwrap_or_default(), 0) {
                    tree.append(rendered, block.content);
                }
                tree.append(content, rendered);
                CanvasNodeKind::Text
            }
            "file" => self.file_node(tree, raw, content, builder, embeds),
            "link" => CanvasNodeKind::Link {
                url: raw.url.clone().unwrap_or_default(),
            },
            _ => {
                if let Some(label) = raw.label.as_deref() {
                    let title = tree.create(Element::new("div").with_class("canvas-group-label"));
                    let text = tree.create_text(label);
                    tree.append(title, text);
                    tree.insert_before(container, title);
                }
                CanvasNodeKind::Group
            }
        };

        CanvasNode {
            id: raw.id.clone(),
            element,
            content,
            kind,
        }
    }

    fn file_node(
        &mut self,
        tree: &mut Tree,
        raw: &RawNode,
        content: NodeId,
        builder: &SectionBuilder<'_>,
        embeds: &EmbedIndex,
    ) -> CanvasNodeKind {
        let path = raw.file.clone().unwrap_or_default();
        let Some(target) = embeds.get(&path) else {
            return CanvasNodeKind::File { path, view: None };
        };

        match (target.handle.kind(), target.text.as_deref()) {
            (DocumentKind::Markdown, Some(text)) => {
                self.views.push(builder.build(tree, text, 1));
                CanvasNodeKind::File {
                    path,
                    view: Some(ViewId(self.views.len())),
                }
            }
            (DocumentKind::Media, _) => {
                let wrapper = media_wrapper(tree, &target.handle);
                tree.append(content, wrapper);
                CanvasNodeKind::File { path, view: None }
            }
            _ => {
                let link = tree.create(
                    Element::new("a")
                        .with_class("internal-link")
                        .with_attr("href", target.handle.path()),
                );
                let text = tree.create_text(target.handle.file_name());
                tree.append(link, text);
                tree.append(content, link);
                CanvasNodeKind::File { path, view: None }
            }
        }
    }

    /// Sizes the canvas root to the bounding box of its nodes.
    pub(crate) fn fit(&self, tree: &mut Tree) {
        let (Some(root), Some((left, top, right, bottom))) = (self.root, self.bounds) else {
            return;
        };
        if let Some(element) = tree.element_mut(root) {
            element.set_style_property("width", Some(&format!("{}px", right - left)));
            element.set_style_property("height", Some(&format!("{}px", bottom - top)));
            element.set_style_property(
                "transform",
                Some(&format!("translate({}px, {}px)", -left, -top)),
            );
        }
    }
}

fn edge(tree: &mut Tree, root: NodeId, file: &CanvasFile, raw: &RawEdge) -> Option<CanvasEdge> {
    let from = file.nodes.iter().find(|node| node.id == raw.from_node)?;
    let to = file.nodes.iter().find(|node| node.id == raw.to_node)?;
    let (x1, y1) = anchor(from, raw.from_side.as_deref().unwrap_or("right"));
    let (x2, y2) = anchor(to, raw.to_side.as_deref().unwrap_or("left"));

    let mut wrapper = Element::new("svg")
        .with_class("canvas-edge")
        .with_attr("data-edge-id", raw.id.as_str());
    if let Some(color) = raw.color.as_deref() {
        wrapper.add_class(&format!("mod-canvas-color-{color}"));
    }
    let wrapper = tree.create(wrapper);
    tree.append(root, wrapper);

    let body = tree.create(
        Element::new("path")
            .with_class("canvas-display-path")
            .with_attr("d", format!("M{x1:.1},{y1:.1} L{x2:.1},{y2:.1}")),
    );
    tree.append(wrapper, body);

    let arrow = (raw.to_end.as_deref().unwrap_or("arrow") == "arrow").then(|| {
        let arrow = tree.create(
            Element::new("polygon")
                .with_class("canvas-path-end")
                .with_attr("points", arrow_points((x1, y1), (x2, y2))),
        );
        tree.append(wrapper, arrow);
        arrow
    });

    let label = raw.label.as_deref().map(|text| {
        let label = tree.create(
            Element::new("div")
                .with_class("canvas-path-label")
                .with_attr(
                    "style",
                    format!(
                        "left: {:.1}px; top: {:.1}px;",
                        (x1 + x2) / 2.0,
                        (y1 + y2) / 2.0
                    ),
                ),
        );
        let content = tree.create_text(text);
        tree.append(label, content);
        tree.append(root, label);
        label
    });

    Some(CanvasEdge {
        id: raw.id.clone(),
        body,
        arrow,
        label,
    })
}

fn anchor(node: &RawNode, side: &str) -> (f64, f64) {
    match side {
        "top" => (node.x + node.width / 2.0, node.y),
        "bottom" => (node.x + node.width / 2.0, node.y + node.height),
        "left" => (node.x, node.y + node.height / 2.0),
        _ => (node.x + node.width, node.y + node.height / 2.0),
    }
}

fn arrow_points(from: (f64, f64), to: (f64, f64)) -> String {
    let (dx, dy) = (to.0 - from.0, to.1 - from.1);
    let length = (dx * dx + dy * dy).sqrt().max(f64::EPSILON);
    let (ux, uy) = (dx / length, dy / length);
    let (bx, by) = (to.0 - ux * ARROW_LENGTH, to.1 - uy * ARROW_LENGTH);
    let (px, py) = (-uy * ARROW_HALF_WIDTH, ux * ARROW_HALF_WIDTH);
    format!(
        "{:.1},{:.1} {:.1},{:.1} {:.1},{:.1}",
        to.0,
        to.1,
        bx + px,
        by + py,
        bx - px,
        by - py
    )
}
