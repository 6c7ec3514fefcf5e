//! Builds live-view sections from markdown with comrak.

use std::collections::HashMap;

use comrak::{
    Arena, format_html,
    nodes::{AstNode, ListType, NodeValue},
    options::Options,
    parse_document,
};

use crate::domain::{
    document::{DocumentHandle, DocumentKind},
    media::media_wrapper,
    tree::{Element, NodeId, Tree},
};

/// Nested documents never inline deeper than this.
pub(crate) const MAX_EMBED_DEPTH: usize = 3;

/// A transclusion target fetched ahead of the (synchronous) build.
#[derive(Debug, Clone)]
pub(crate) struct EmbeddedDocument {
    pub handle: DocumentHandle,
    /// Source text for markdown documents.
    pub text: Option<String>,
}

pub(crate) type EmbedIndex = HashMap<String, EmbeddedDocument>;

/// One top-level block wrapped in its section element.
#[derive(Debug, Clone, Copy)]
pub(crate) struct BuiltBlock {
    pub content: NodeId,
    pub level: u8,
}

/// Returns the link of a line that consists of a single `![[…]]` transclusion.
pub(crate) fn embed_link(line: &str) -> Option<&str> {
    let inner = line.trim().strip_prefix("![[")?.strip_suffix("]]")?;
    if inner.contains("]]") || inner.contains("[[") {
        return None;
    }
    let link = inner.split('|').next().unwrap_or(inner).trim();
    (!link.is_empty()).then_some(link)
}

/// Every transclusion link in a document, in order of appearance.
pub(crate) fn embed_links(text: &str) -> Vec<String> {
    text.lines()
        .filter_map(embed_link)
        .map(str::to_string)
        .collect()
}

pub(crate) struct SectionBuilder<'a> {
    options: &'a Options<'static>,
    embeds: &'a EmbedIndex,
}

impl<'a> SectionBuilder<'a> {
    pub(crate) fn new(options: &'a Options<'static>, embeds: &'a EmbedIndex) -> Self {
        Self { options, embeds }
    }

    /// Parses `text` and returns one detached section element per top-level block.
    pub(crate) fn build(&self, tree: &mut Tree, text: &str, depth: usize) -> Vec<BuiltBlock> {
        let arena = Arena::new();
        let root = parse_document(&arena, text, self.options);
        let lines: Vec<&str> = text.lines().collect();

        root.children()
            .map(|block| {
                let level = heading_level(block).unwrap_or(0);
                let node = match self.transclusion(tree, block, &lines, depth) {
                    Some(embed) => embed,
                    None => self.convert(tree, block),
                };
                let tag = tree.tag(node).unwrap_or("raw").to_string();
                let content = tree.create(Element::new("div").with_class(&format!("el-{tag}")));
                tree.append(content, node);
                BuiltBlock { content, level }
            })
            .collect()
    }

    fn transclusion<'n>(
        &self,
        tree: &mut Tree,
        block: &'n AstNode<'n>,
        lines: &[&str],
        depth: usize,
    ) -> Option<NodeId> {
        let (start, end) = {
            let data = block.data.borrow();
            if !matches!(data.value, NodeValue::Paragraph) {
                return None;
            }
            (data.sourcepos.start.line, data.sourcepos.end.line)
        };
        if start == 0 || start != end {
            return None;
        }
        let link = embed_link(lines.get(start - 1)?)?;
        Some(self.embed(tree, link, depth))
    }

    fn embed(&self, tree: &mut Tree, link: &str, depth: usize) -> NodeId {
        let Some(target) = self.embeds.get(link) else {
            return tree.create(
                Element::new("div")
                    .with_class("internal-embed")
                    .with_class("markdown-embed")
                    .with_class("is-unresolved")
                    .with_attr("src", link),
            );
        };

        if target.handle.kind() == DocumentKind::Media {
            let wrapper = media_wrapper(tree, &target.handle);
            tree.add_class(wrapper, "internal-embed");
            tree.set_attr(wrapper, "src", link);
            return wrapper;
        }

        let embed = tree.create(
            Element::new("div")
                .with_class("internal-embed")
                .with_class("markdown-embed")
                .with_class("inline-embed")
                .with_attr("src", link),
        );
        let content = tree.create(Element::new("div").with_class("markdown-embed-content"));
        tree.append(embed, content);
        if let Some(text) = target.text.as_deref().filter(|_| depth < MAX_EMBED_DEPTH) {
            for block in self.build(tree, text, depth + 1) {
                tree.append(content, block.content);
            }
        }
        embed
    }

    fn convert<'n>(&self, tree: &mut Tree, node: &'n AstNode<'n>) -> NodeId {
        let element = {
            let data = node.data.borrow();
            match &data.value {
                NodeValue::Document => Element::new("div"),
                NodeValue::Paragraph => Element::new("p"),
                NodeValue::Heading(heading) => {
                    let text = collect_inline_text(node);
                    let mut element = Element::new(format!("h{}", heading.level));
                    let id = slug::slugify(&text);
                    if !id.is_empty() {
                        element.set_attr("id", id);
                    }
                    element.set_attr("data-heading", text.trim());
                    element
                }
                NodeValue::BlockQuote | NodeValue::MultilineBlockQuote(_) => {
                    Element::new("blockquote")
                }
                NodeValue::List(list) => {
                    if list.list_type == ListType::Ordered {
                        let mut element = Element::new("ol");
                        if list.start != 1 {
                            element.set_attr("start", list.start.to_string());
                        }
                        element
                    } else {
                        Element::new("ul")
                    }
                }
                NodeValue::Item(_) => Element::new("li"),
                NodeValue::CodeBlock(block) => {
                    return code_block(tree, block.info.trim(), &block.literal);
                }
                NodeValue::FrontMatter(raw) => return front_matter(tree, raw),
                NodeValue::ThematicBreak => Element::new("hr"),
                NodeValue::Text(text) => return tree.create_text(text.to_string()),
                NodeValue::SoftBreak => return tree.create_text("\n"),
                NodeValue::LineBreak => return tree.create_element("br"),
                NodeValue::Code(code) => {
                    let element = tree.create_element("code");
                    let text = tree.create_text(code.literal.to_string());
                    tree.append(element, text);
                    return element;
                }
                NodeValue::Emph => Element::new("em"),
                NodeValue::Strong => Element::new("strong"),
                NodeValue::Strikethrough => Element::new("del"),
                NodeValue::Underline => Element::new("u"),
                NodeValue::Superscript => Element::new("sup"),
                NodeValue::Subscript => Element::new("sub"),
                NodeValue::SpoileredText => Element::new("span").with_class("spoiler"),
                NodeValue::Link(link) => {
                    let mut element = Element::new("a").with_attr("href", link.url.as_str());
                    if !link.title.is_empty() {
                        element.set_attr("title", link.title.as_str());
                    }
                    if link.url.contains("://") {
                        element.add_class("external-link");
                    }
                    element
                }
                NodeValue::Image(link) => {
                    let element = Element::new("img")
                        .with_attr("src", link.url.as_str())
                        .with_attr("alt", collect_inline_text(node));
                    return tree.create(element);
                }
                NodeValue::WikiLink(link) => Element::new("a")
                    .with_class("internal-link")
                    .with_attr("href", link.url.as_str())
                    .with_attr("data-href", link.url.as_str()),
                NodeValue::HtmlBlock(block) => return tree.create_raw(block.literal.to_string()),
                NodeValue::HtmlInline(html) => return tree.create_raw(html.to_string()),
                _ => return self.fallback(tree, node),
            }
        };

        let parent = tree.create(element);
        for child in node.children() {
            let converted = self.convert(tree, child);
            tree.append(parent, converted);
        }
        parent
    }

    /// Serializes node kinds without a structural mapping as raw markup.
    fn fallback<'n>(&self, tree: &mut Tree, node: &'n AstNode<'n>) -> NodeId {
        let mut html = String::new();
        match format_html(node, self.options, &mut html) {
            Ok(()) => tree.create_raw(html),
            Err(_) => tree.create_text(collect_inline_text(node)),
        }
    }
}

fn code_block(tree: &mut Tree, info: &str, literal: &str) -> NodeId {
    let language = info.split_whitespace().next().unwrap_or_default();
    let pre = tree.create_element("pre");
    let mut code = Element::new("code");
    if !language.is_empty() {
        code.add_class(&format!("language-{language}"));
    }
    let code = tree.create(code);
    let text = tree.create_text(literal.to_string());
    tree.append(code, text);
    tree.append(pre, code);
    pre
}

fn front_matter(tree: &mut Tree, raw: &str) -> NodeId {
    let body: Vec<&str> = raw
        .lines()
        .filter(|line| line.trim() != "---")
        .collect();
    let container = tree.create(Element::new("div").with_class("frontmatter-container"));
    let pre = tree.create(
        Element::new("pre")
            .with_class("frontmatter")
            .with_class("language-yaml"),
    );
    let code = tree.create(Element::new("code").with_class("language-yaml"));
    let text = tree.create_text(body.join("\n").trim_end().to_string());
    tree.append(code, text);
    tree.append(pre, code);
    tree.append(container, pre);
    container
}

fn heading_level(node: &AstNode<'_>) -> Option<u8> {
    let data = node.data.borrow();
    if let NodeValue::Heading(heading) = &data.value {
        Some(heading.level)
    } else {
        None
    }
}

fn collect_inline_text<'a>(node: &'a AstNode<'a>) -> String {
    fn walk<'a>(node: &'a AstNode<'a>, buffer: &mut String) {
        {
            let data = node.data.borrow();
            match &data.value {
                NodeValue::Text(text) => buffer.push_str(text),
                NodeValue::Code(code) => buffer.push_str(&code.literal),
                NodeValue::LineBreak | NodeValue::SoftBreak => buffer.push(' '),
                _ => {}
            }
        }
        for child in node.children() {
            walk(child, buffer);
        }
    }

    let mut text = String::new();
    for child in node.children() {
        walk(child, &mut text);
    }
    text
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::application::render::inline::markdown_options;

    fn build(text: &str, embeds: &EmbedIndex) -> (Tree, Vec<BuiltBlock>) {
        let options = markdown_options();
        let builder = SectionBuilder::new(&options, embeds);
        let mut tree = Tree::new();
        let blocks = builder.build(&mut tree, text, 0);
        (tree, blocks)
    }

    #[test]
    fn detects_whole_line_transclusions() {
        assert_eq!(embed_link("![[notes/child]]"), Some("notes/child"));
        assert_eq!(embed_link("  ![[child|Shown]]  "), Some("child"));
        assert_eq!(embed_link("see ![[child]]"), None);
        assert_eq!(embed_link("![[]]"), None);
        assert_eq!(
            embed_links("# T\n![[a]]\ntext\n![[b.png]]\n"),
            vec!["a", "b.png"]
        );
    }

    #[test]
    fn splits_top_level_blocks_into_sections() {
        let (tree, blocks) = build("# Title\n\nSome *text*.\n\n## Next\n", &EmbedIndex::new());

        assert_eq!(blocks.len(), 3);
        assert_eq!(blocks[0].level, 1);
        assert_eq!(blocks[1].level, 0);
        assert_eq!(blocks[2].level, 2);
        assert_eq!(
            tree.outer_html(blocks[0].content),
            "<div class=\"el-h1\"><h1 id=\"title\" data-heading=\"Title\">Title</h1></div>"
        );
        assert_eq!(
            tree.outer_html(blocks[1].content),
            "<div class=\"el-p\"><p>Some <em>text</em>.</p></div>"
        );
    }

    #[test]
    fn heading_and_alt_text_flatten_nested_inlines() {
        let (tree, blocks) = build(
            "## Use `cargo` **now**\n\n![A *small* chart](chart.png)\n",
            &EmbedIndex::new(),
        );

        let heading = tree.select_tag(blocks[0].content, "h2")[0];
        assert_eq!(tree.attr(heading, "data-heading"), Some("Use cargo now"));
        assert_eq!(tree.attr(heading, "id"), Some("use-cargo-now"));
        let image = tree.select_tag(blocks[1].content, "img")[0];
        assert_eq!(tree.attr(image, "alt"), Some("A small chart"));
    }

    #[test]
    fn resolved_transclusions_carry_nested_sections() {
        let handle = DocumentHandle::new("child.md").expect("handle");
        let embeds = EmbedIndex::from([(
            "child".to_string(),
            EmbeddedDocument {
                handle,
                text: Some("Nested body".to_string()),
            },
        )]);
        let (tree, blocks) = build("Intro\n\n![[child]]\n\n![[missing]]\n", &embeds);

        assert_eq!(blocks.len(), 3);
        let embed = tree.select_class(blocks[1].content, "markdown-embed")[0];
        assert_eq!(tree.attr(embed, "src"), Some("child"));
        assert_eq!(tree.text_content(embed), "Nested body");

        let missing = tree.select_class(blocks[2].content, "markdown-embed")[0];
        assert!(tree.has_class(missing, "is-unresolved"));
        assert_eq!(tree.attr(missing, "src"), Some("missing"));
    }

    #[test]
    fn front_matter_becomes_a_metadata_block() {
        let (tree, blocks) = build("---\ntitle: Hello\n---\n\nBody\n", &EmbedIndex::new());

        let container = tree.select_class(blocks[0].content, "frontmatter-container");
        assert_eq!(container.len(), 1);
        assert_eq!(tree.text_content(container[0]), "title: Hello");
    }
}
