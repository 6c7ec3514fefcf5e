use std::{collections::BTreeSet, fmt};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::domain::{
    document::DocumentKind,
    tree::{Element, Fragment},
};

use super::surface::DocumentStore;

/// Per-call render configuration. Built once by merging overrides over defaults
/// and never mutated afterwards.
#[derive(Debug, Clone, PartialEq)]
pub struct RenderOptions {
    /// Destination element the rendered content is placed into.
    pub container: Option<Element>,
    pub post_process: bool,
    pub make_headers_trees: bool,
    pub create_document_container: bool,
    pub create_pusher_element: bool,
    pub display_progress: bool,
    pub inline_html: bool,
    /// Logical paths selected for the current export, used for inline-vs-reference embedding.
    pub files_to_export: BTreeSet<String>,
}

impl Default for RenderOptions {
    fn default() -> Self {
        Self {
            container: None,
            post_process: true,
            make_headers_trees: true,
            create_document_container: true,
            create_pusher_element: true,
            display_progress: true,
            inline_html: false,
            files_to_export: BTreeSet::new(),
        }
    }
}

/// Caller-supplied option values; every unset field falls back to the defaults.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RenderOverrides {
    pub container: Option<Element>,
    pub post_process: Option<bool>,
    pub make_headers_trees: Option<bool>,
    pub create_document_container: Option<bool>,
    pub create_pusher_element: Option<bool>,
    pub display_progress: Option<bool>,
    pub inline_html: Option<bool>,
    pub files_to_export: Option<BTreeSet<String>>,
}

impl RenderOptions {
    pub fn merged(defaults: &RenderOptions, overrides: RenderOverrides) -> Self {
        let RenderOverrides {
            container,
            post_process,
            make_headers_trees,
            create_document_container,
            create_pusher_element,
            display_progress,
            inline_html,
            files_to_export,
        } = overrides;

        Self {
            container: container.or_else(|| defaults.container.clone()),
            post_process: post_process.unwrap_or(defaults.post_process),
            make_headers_trees: make_headers_trees.unwrap_or(defaults.make_headers_trees),
            create_document_container: create_document_container
                .unwrap_or(defaults.create_document_container),
            create_pusher_element: create_pusher_element.unwrap_or(defaults.create_pusher_element),
            display_progress: display_progress.unwrap_or(defaults.display_progress),
            inline_html: inline_html.unwrap_or(defaults.inline_html),
            files_to_export: files_to_export.unwrap_or_else(|| defaults.files_to_export.clone()),
        }
    }

    pub fn from_overrides(overrides: RenderOverrides) -> Self {
        Self::merged(&RenderOptions::default(), overrides)
    }

    pub fn exports(&self, path: &str) -> bool {
        self.files_to_export.contains(path)
    }
}

/// Terminal artifact of a successful document render. Ownership moves to the caller.
#[derive(Debug, Clone)]
pub struct RenderResult {
    pub content: Fragment,
    pub view_kind: DocumentKind,
}

impl RenderResult {
    pub fn to_html(&self) -> String {
        self.content.to_html()
    }
}

/// Whether an embedded document is inlined or replaced by a cross-reference.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EmbedPolicy {
    Inline { path: String },
    Reference { path: String },
}

impl EmbedPolicy {
    pub fn decide(link: &str, options: &RenderOptions, store: &dyn DocumentStore) -> Self {
        let Some(handle) = store.resolve(link) else {
            return EmbedPolicy::Reference {
                path: link.to_string(),
            };
        };
        let path = handle.path().to_string();
        if options.inline_html || options.exports(&path) {
            EmbedPolicy::Inline { path }
        } else {
            EmbedPolicy::Reference { path }
        }
    }
}

/// Named suspension points of the pipeline, used for timeout reporting.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    SurfaceAttach,
    SurfaceReady,
    SectionRender,
    SectionMeasure,
    TransclusionSettle,
    DrawingSettle,
}

impl Stage {
    pub fn as_str(self) -> &'static str {
        match self {
            Stage::SurfaceAttach => "surface_attach",
            Stage::SurfaceReady => "surface_ready",
            Stage::SectionRender => "section_render",
            Stage::SectionMeasure => "section_measure",
            Stage::TransclusionSettle => "transclusion_settle",
            Stage::DrawingSettle => "drawing_settle",
        }
    }

    /// Critical stages fail the document (or session); the rest only warn.
    pub fn is_critical(self) -> bool {
        !matches!(self, Stage::TransclusionSettle)
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("failed to load `{path}`: {message}")]
pub struct LoadError {
    pub path: String,
    pub message: String,
}

impl LoadError {
    pub fn new(path: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            message: message.into(),
        }
    }
}

#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("render surface unavailable: {message}")]
pub struct SurfaceError {
    pub message: String,
}

impl SurfaceError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

/// Structured failures of the render pipeline. Everything except
/// [`RenderError::FatalSession`] is scoped to a single document.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum RenderError {
    #[error(transparent)]
    Load(#[from] LoadError),
    #[error("stage `{stage}` did not complete within {timeout_ms}ms")]
    StageTimeout {
        stage: Stage,
        timeout_ms: u64,
        critical: bool,
    },
    #[error("no render surface is available")]
    SurfaceUnavailable,
    #[error("render cancelled")]
    Cancelled,
    #[error("render session failed: {message}")]
    FatalSession { message: String },
    #[error("renderer produced no content for `{path}`")]
    EmptyContent { path: String },
}

impl RenderError {
    pub fn timeout(stage: Stage, timeout_ms: u64) -> Self {
        Self::StageTimeout {
            stage,
            timeout_ms,
            critical: stage.is_critical(),
        }
    }

    pub fn fatal(message: impl Into<String>) -> Self {
        Self::FatalSession {
            message: message.into(),
        }
    }

    pub fn empty(path: impl Into<String>) -> Self {
        Self::EmptyContent { path: path.into() }
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, RenderError::Cancelled)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unset_overrides_resolve_to_defaults() {
        let options = RenderOptions::from_overrides(RenderOverrides::default());
        assert_eq!(options, RenderOptions::default());
        assert!(options.post_process);
        assert!(options.create_document_container);
        assert!(!options.inline_html);
    }

    #[test]
    fn explicit_overrides_win_over_defaults() {
        let defaults = RenderOptions {
            inline_html: true,
            files_to_export: BTreeSet::from(["a.md".to_string()]),
            ..RenderOptions::default()
        };
        let overrides = RenderOverrides {
            post_process: Some(false),
            inline_html: Some(false),
            files_to_export: Some(BTreeSet::new()),
            ..RenderOverrides::default()
        };

        let options = RenderOptions::merged(&defaults, overrides);
        assert!(!options.post_process);
        assert!(!options.inline_html);
        assert!(options.files_to_export.is_empty());
        assert!(options.make_headers_trees);
    }

    #[test]
    fn merging_leaves_defaults_untouched() {
        let defaults = RenderOptions::default();
        let snapshot = defaults.clone();
        let _ = RenderOptions::merged(
            &defaults,
            RenderOverrides {
                display_progress: Some(false),
                ..RenderOverrides::default()
            },
        );
        assert_eq!(defaults, snapshot);
    }

    #[test]
    fn only_settle_stages_are_best_effort() {
        assert!(Stage::SectionRender.is_critical());
        assert!(Stage::SurfaceAttach.is_critical());
        assert!(!Stage::TransclusionSettle.is_critical());
        let err = RenderError::timeout(Stage::TransclusionSettle, 500);
        assert_eq!(
            err.to_string(),
            "stage `transclusion_settle` did not complete within 500ms"
        );
    }
}
