//! Minimal inline markdown rendering and the shared comrak extension set.

use std::collections::HashSet;

use ammonia::Builder as AmmoniaBuilder;
use comrak::{markdown_to_html, options::Options};
use once_cell::sync::Lazy;

static INLINE_OPTIONS: Lazy<Options<'static>> = Lazy::new(markdown_options);
static INLINE_SANITIZER: Lazy<AmmoniaBuilder<'static>> = Lazy::new(inline_sanitizer);

/// Extension set used for vault markdown.
pub fn markdown_options() -> Options<'static> {
    let mut options = Options::default();

    let ext = &mut options.extension;
    ext.strikethrough = true;
    ext.tagfilter = false;
    ext.table = true;
    ext.autolink = true;
    ext.tasklist = true;
    ext.superscript = true;
    ext.footnotes = true;
    ext.description_lists = true;
    ext.front_matter_delimiter = Some("---".to_string());
    ext.multiline_block_quotes = true;
    ext.alerts = true;
    ext.math_dollars = true;
    ext.math_code = true;
    ext.wikilinks_title_after_pipe = true;
    ext.underline = true;
    ext.subscript = true;
    ext.spoiler = true;

    let render = &mut options.render;
    render.github_pre_lang = true;
    render.tasklist_classes = true;
    render.r#unsafe = true;
    render.escaped_char_spans = true;

    options
}

fn inline_sanitizer() -> AmmoniaBuilder<'static> {
    let mut builder = AmmoniaBuilder::default();
    let tags: HashSet<&'static str> = HashSet::from([
        "a", "b", "code", "del", "em", "i", "kbd", "mark", "s", "span", "strong", "sub", "sup",
        "u",
    ]);
    builder.tags(tags);
    builder.generic_attributes(HashSet::from(["class"]));
    builder.add_url_schemes(["http", "https", "mailto"].iter().copied());
    builder
}

/// Renders a single line of markdown to inline HTML, without the block wrapper.
pub fn render_inline_markdown(text: &str) -> String {
    let line: String = text
        .chars()
        .map(|c| if c == '\n' || c == '\r' { ' ' } else { c })
        .collect();
    let html = markdown_to_html(line.trim(), &INLINE_OPTIONS);
    let trimmed = html.trim();
    let inner = trimmed
        .strip_prefix("<p>")
        .and_then(|rest| rest.strip_suffix("</p>"))
        .unwrap_or(trimmed);
    INLINE_SANITIZER.clean(inner).to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn renders_inline_emphasis_without_paragraph() {
        assert_eq!(
            render_inline_markdown("Use **bold** and `code`"),
            "Use <strong>bold</strong> and <code>code</code>"
        );
    }

    #[test]
    fn strips_block_markup_and_scripts() {
        let html = render_inline_markdown("plain <script>alert(1)</script>");
        assert!(!html.contains("<script"));
        assert!(!html.starts_with("<p>"));
    }
}
