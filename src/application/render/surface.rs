//! Collaborator contracts consumed by the render pipeline.
//!
//! The render surface is opaque: the pipeline only triggers work and observes
//! flags. Every completion signal is discovered by polling (see
//! [`super::waiter`]), never by callback.

use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use futures::future::BoxFuture;
use tokio::sync::watch;

use crate::domain::{
    document::{DocumentHandle, DocumentSource, Section},
    tree::{NodeId, Tree},
};

use super::{
    progress::LogEntry,
    types::{LoadError, SurfaceError},
};

/// Live document tree owned by a surface and shared with the pipeline.
/// Never hold the lock across an `.await`.
pub type SharedTree = Arc<Mutex<Tree>>;

/// Work a surface-side post-processing hook asks the pipeline to await.
pub type PendingTask = BoxFuture<'static, ()>;

/// Addresses one rendered view inside a surface. The loaded document is
/// [`ViewId::MAIN`]; embedded documents (canvas file nodes) get their own views.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ViewId(pub usize);

impl ViewId {
    pub const MAIN: ViewId = ViewId(0);
}

/// Where the surface window sits while a batch runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SurfacePlacement {
    /// Visible next to the progress UI.
    Visible,
    /// Off-screen; progress is not displayed.
    Hidden,
}

impl SurfacePlacement {
    pub fn for_progress(display_progress: bool) -> Self {
        if display_progress {
            SurfacePlacement::Visible
        } else {
            SurfacePlacement::Hidden
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CanvasNodeKind {
    Text,
    /// Embeds another document; `view` is set when the surface loaded it as a sectioned view.
    File { path: String, view: Option<ViewId> },
    Link { url: String },
    Group,
}

/// A positioned canvas node. `content` is the element receiving the node body.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CanvasNode {
    pub id: String,
    pub element: NodeId,
    pub content: NodeId,
    pub kind: CanvasNodeKind,
}

/// One rendered canvas edge: its line body, optional arrowhead and optional label.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CanvasEdge {
    pub id: String,
    pub body: NodeId,
    pub arrow: Option<NodeId>,
    pub label: Option<NodeId>,
}

#[async_trait]
pub trait RenderSurface: Send + Sync {
    fn tree(&self) -> SharedTree;

    /// True once the hidden window is attached to a visible parent.
    fn is_attached(&self) -> bool;

    /// True when the surface can accept a document load.
    fn is_ready(&self) -> bool;

    fn place(&self, placement: SurfacePlacement);

    /// Flips to `true` when the hosting window closes unexpectedly.
    fn closed(&self) -> watch::Receiver<bool>;

    /// Closes the surface window.
    fn release(&self);

    /// Leaves the surface window open for inspection after a failed batch.
    fn reveal(&self);

    async fn load(&self, source: &DocumentSource) -> Result<(), LoadError>;

    /// View type string reported for the loaded document.
    fn view_type(&self) -> String;

    /// Root element of a view's rendered content.
    fn content_root(&self, view: ViewId) -> Option<NodeId>;

    fn sections(&self, view: ViewId) -> Vec<Section>;

    fn section(&self, view: ViewId, index: usize) -> Option<Section>;

    /// Marks a section shown and clears its `rendered`/`computed` flags.
    fn reset_section(&self, view: ViewId, index: usize);

    /// Starts rendering a section; `rendered` flips asynchronously.
    fn render_section(&self, view: ViewId, index: usize);

    /// Starts measuring a section; `computed` flips asynchronously.
    fn measure_section(&self, view: ViewId, index: usize);

    /// Renders the result of a dynamic query block and returns the new element.
    fn render_query_block(&self, view: ViewId, placeholder: NodeId) -> Option<NodeId>;

    /// View-type specific post-processing for a rendered section.
    fn post_process_section(&self, view: ViewId, content: NodeId) -> Vec<PendingTask>;

    fn zoom_to_fit(&self);

    /// Forces every canvas node and edge to render regardless of viewport.
    fn render_canvas_items(&self);

    fn canvas_nodes(&self) -> Vec<CanvasNode>;

    fn canvas_edges(&self) -> Vec<CanvasEdge>;
}

#[async_trait]
pub trait SurfaceProvider: Send + Sync {
    async fn open_surface(&self) -> Result<Arc<dyn RenderSurface>, SurfaceError>;
}

/// Resolves logical links to documents for embed decisions.
pub trait DocumentStore: Send + Sync {
    fn resolve(&self, link: &str) -> Option<DocumentHandle>;
}

/// Terminal state reported to the progress UI when a batch closes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BatchOutcome {
    Completed,
    CompletedWithErrors,
    Cancelled,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FileListOptions {
    pub title: Option<String>,
    /// Index of the item currently being processed.
    pub active: Option<usize>,
}

/// Host-side progress UI and taskbar hint.
pub trait ProgressDisplay: Send + Sync {
    fn open(&self);

    fn update(&self, fraction: f64, message: &str, sub_message: &str);

    fn set_taskbar_progress(&self, fraction: Option<f64>);

    fn append(&self, entry: &LogEntry);

    fn set_file_list(&self, items: &[String], options: &FileListOptions);

    fn finish(&self, outcome: BatchOutcome);
}
