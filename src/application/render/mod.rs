//! Batch rendering of live documents into static, portable markup.
//!
//! A [`BatchSession`] owns the single render surface; [`api`] is the entry
//! point callers use. Completion of surface-side work is observed by polling
//! (see [`waiter`]), and every document is isolated from the failures of the
//! others in its batch.

pub mod api;
mod canvas;
pub mod headings;
pub mod inline;
mod markdown;
pub mod postprocess;
pub mod progress;
mod renderer;
pub mod session;
pub mod surface;
pub mod types;
pub mod waiter;

pub const METRIC_BATCHES_TOTAL: &str = "vaultpress_batches_total";
pub const METRIC_STAGE_TIMEOUTS_TOTAL: &str = "vaultpress_render_stage_timeouts_total";
pub const METRIC_DOCUMENTS_TOTAL: &str = "vaultpress_render_documents_total";
pub const METRIC_DOCUMENT_MS: &str = "vaultpress_render_document_ms";

pub use headings::build_heading_trees;
pub use markdown::{EMBED_PLACEHOLDER_CLASS, PUSHER_CLASS, VIEW_CLASS};
pub use postprocess::{PostProcessError, post_process};
pub use progress::{LogEntry, LogLevel, ProgressLog, Verbosity};
pub use renderer::render_file;
pub use session::{BatchSession, RenderTimings, SessionHost};
pub use surface::{
    BatchOutcome, CanvasEdge, CanvasNode, CanvasNodeKind, DocumentStore, FileListOptions,
    PendingTask, ProgressDisplay, RenderSurface, SharedTree, SurfacePlacement, SurfaceProvider,
    ViewId,
};
pub use types::{
    EmbedPolicy, LoadError, RenderError, RenderOptions, RenderOverrides, RenderResult, Stage,
    SurfaceError,
};
