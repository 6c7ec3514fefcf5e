//! Document handles and the closed set of kinds the render pipeline dispatches on.

use std::fmt;

use serde::{Deserialize, Serialize};

use super::{error::DomainError, media::MediaTag, tree::NodeId};

/// Closed set of document/view kinds. Unknown view types fall back to [`DocumentKind::Generic`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DocumentKind {
    Markdown,
    Canvas,
    Drawing,
    Generic,
    Media,
}

impl DocumentKind {
    /// Classifies a logical path by its extension.
    pub fn from_path(path: &str) -> Self {
        let lower = path.to_ascii_lowercase();
        if lower.ends_with(".excalidraw.md") || lower.ends_with(".excalidraw") {
            return DocumentKind::Drawing;
        }
        if lower.ends_with(".md") {
            return DocumentKind::Markdown;
        }
        if lower.ends_with(".canvas") {
            return DocumentKind::Canvas;
        }
        if MediaTag::is_media_path(&lower) {
            return DocumentKind::Media;
        }
        DocumentKind::Generic
    }

    /// Maps the view type string reported by a render surface.
    pub fn from_view_type(view_type: &str) -> Self {
        match view_type.trim().to_ascii_lowercase().as_str() {
            "markdown" => DocumentKind::Markdown,
            "canvas" => DocumentKind::Canvas,
            "excalidraw" | "drawing" => DocumentKind::Drawing,
            "image" | "video" | "audio" | "pdf" | "media" => DocumentKind::Media,
            _ => DocumentKind::Generic,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            DocumentKind::Markdown => "markdown",
            DocumentKind::Canvas => "canvas",
            DocumentKind::Drawing => "drawing",
            DocumentKind::Generic => "generic",
            DocumentKind::Media => "media",
        }
    }
}

impl fmt::Display for DocumentKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A document addressed by its logical (vault-relative, `/`-separated) path.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DocumentHandle {
    path: String,
    kind: DocumentKind,
}

impl DocumentHandle {
    pub fn new(path: &str) -> Result<Self, DomainError> {
        let path = normalize_logical_path(path)?;
        let kind = DocumentKind::from_path(&path);
        Ok(Self { path, kind })
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn kind(&self) -> DocumentKind {
        self.kind
    }

    pub fn file_name(&self) -> &str {
        self.path.rsplit('/').next().unwrap_or(&self.path)
    }

    /// File name without its final extension.
    pub fn stem(&self) -> &str {
        let name = self.file_name();
        match name.rfind('.') {
            Some(index) if index > 0 => &name[..index],
            _ => name,
        }
    }
}

/// Normalises a logical path: `/` separators, no leading `./` or `/`, no `..` segments.
pub fn normalize_logical_path(path: &str) -> Result<String, DomainError> {
    let unified = path.trim().replace('\\', "/");
    let mut segments = Vec::new();
    for segment in unified.split('/') {
        match segment {
            "" | "." => {}
            ".." => return Err(DomainError::escaping(path)),
            other => segments.push(other),
        }
    }
    if segments.is_empty() {
        return Err(DomainError::EmptyPath);
    }
    Ok(segments.join("/"))
}

/// What a render call was asked to materialise.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DocumentSource {
    File(DocumentHandle),
    /// Free-standing markdown text, optionally associated with a path for link resolution.
    Markdown { text: String, path: Option<String> },
}

impl DocumentSource {
    pub fn markdown(text: impl Into<String>) -> Self {
        DocumentSource::Markdown {
            text: text.into(),
            path: None,
        }
    }

    pub fn label(&self) -> &str {
        match self {
            DocumentSource::File(handle) => handle.path(),
            DocumentSource::Markdown { path, .. } => path.as_deref().unwrap_or("<markdown>"),
        }
    }

    pub fn handle(&self) -> Option<&DocumentHandle> {
        match self {
            DocumentSource::File(handle) => Some(handle),
            DocumentSource::Markdown { .. } => None,
        }
    }
}

/// Incrementally rendered unit of a markdown view, as reported by the render surface.
///
/// Only the surface flips `rendered`/`computed`; the pipeline resets them before a pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Section {
    pub content: NodeId,
    pub rendered: bool,
    pub computed: bool,
    pub level: u8,
    pub collapsed: bool,
    pub shown: bool,
}

impl Section {
    pub fn new(content: NodeId, level: u8) -> Self {
        Self {
            content,
            rendered: false,
            computed: false,
            level,
            collapsed: false,
            shown: false,
        }
    }

    /// A measured section must also have been rendered.
    pub fn is_consistent(&self) -> bool {
        !self.computed || self.rendered
    }
}
