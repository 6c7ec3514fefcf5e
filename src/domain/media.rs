//! Media documents are exported as a minimal static wrapper without touching a render surface.

use super::{
    document::DocumentHandle,
    tree::{Element, NodeId, Tree},
};

const PDF_MIME: &str = "application/pdf";

/// Element family used to embed a media document.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MediaTag {
    Image,
    Video,
    Audio,
    Pdf,
    Embed,
}

impl MediaTag {
    pub fn for_path(path: &str) -> Self {
        let Some(mime) = mime_guess::from_path(path).first() else {
            return MediaTag::Embed;
        };
        match mime.type_().as_str() {
            "image" => MediaTag::Image,
            "video" => MediaTag::Video,
            "audio" => MediaTag::Audio,
            _ if mime.essence_str() == PDF_MIME => MediaTag::Pdf,
            _ => MediaTag::Embed,
        }
    }

    pub fn is_media_path(path: &str) -> bool {
        !matches!(Self::for_path(path), MediaTag::Embed)
    }

    pub fn class_name(self) -> &'static str {
        match self {
            MediaTag::Image => "image-embed",
            MediaTag::Video => "video-embed",
            MediaTag::Audio => "audio-embed",
            MediaTag::Pdf => "pdf-embed",
            MediaTag::Embed => "file-embed",
        }
    }

    fn element(self, src: &str, alt: &str) -> Element {
        match self {
            MediaTag::Image => Element::new("img")
                .with_attr("src", src)
                .with_attr("alt", alt),
            MediaTag::Video => Element::new("video")
                .with_attr("src", src)
                .with_attr("controls", ""),
            MediaTag::Audio => Element::new("audio")
                .with_attr("src", src)
                .with_attr("controls", ""),
            MediaTag::Pdf => Element::new("embed")
                .with_attr("src", src)
                .with_attr("type", PDF_MIME)
                .with_attr("style", "width: 100%; height: 800px;"),
            MediaTag::Embed => Element::new("embed").with_attr("src", src),
        }
    }
}

/// Builds `<div class="media-embed {family}-embed"><tag src=…></div>` for a media document.
pub fn media_wrapper(tree: &mut Tree, handle: &DocumentHandle) -> NodeId {
    let tag = MediaTag::for_path(handle.path());
    let wrapper = tree.create(
        Element::new("div")
            .with_class("media-embed")
            .with_class(tag.class_name()),
    );
    let media = tree.create(tag.element(handle.path(), handle.stem()));
    tree.append(wrapper, media);
    wrapper
}
