//! Drives one document through the render surface and dispatches by view kind.

use std::{sync::Arc, time::Duration};

use metrics::{counter, histogram};
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::{
    domain::{
        document::{DocumentKind, DocumentSource},
        media::media_wrapper,
        tree::{Fragment, NodeId, Tree},
    },
    util::lock::mutex_lock,
};

use super::{
    METRIC_DOCUMENT_MS, METRIC_DOCUMENTS_TOTAL, METRIC_STAGE_TIMEOUTS_TOTAL, canvas,
    headings::build_heading_trees,
    markdown,
    postprocess::post_process,
    session::{BatchSession, LoneBatch, RenderTimings},
    surface::{RenderSurface, SharedTree, ViewId},
    types::{RenderError, RenderOptions, RenderResult, Stage},
    waiter::{delay, wait_until},
};

const LOCK_OWNER: &str = "application::render::renderer";

/// Everything a kind-specific strategy needs while a document occupies the surface.
pub(crate) struct RenderContext<'a> {
    pub session: &'a BatchSession,
    pub surface: Arc<dyn RenderSurface>,
    pub tree: SharedTree,
    pub options: &'a RenderOptions,
    pub timings: RenderTimings,
}

impl RenderContext<'_> {
    pub(crate) fn lock_tree(&self, op: &'static str) -> std::sync::MutexGuard<'_, Tree> {
        mutex_lock(self.tree.as_ref(), LOCK_OWNER, op)
    }

    /// Returns `Err(Cancelled)` once the batch is cancelled or lost its surface.
    pub(crate) fn ensure_not_cancelled(&self) -> Result<(), RenderError> {
        if self.session.check_cancelled() {
            Err(RenderError::Cancelled)
        } else {
            Ok(())
        }
    }

    /// Polls a stage to completion. Critical stages fail on timeout; the others
    /// log a warning and let rendering continue.
    pub(crate) async fn wait_for<F>(
        &self,
        stage: Stage,
        timeout: Duration,
        mut predicate: F,
    ) -> Result<(), RenderError>
    where
        F: FnMut() -> bool,
    {
        let session = self.session;
        let satisfied = wait_until(
            || session.is_cancelled() || predicate(),
            timeout,
            self.timings.poll_interval,
        )
        .await;
        self.ensure_not_cancelled()?;
        if satisfied {
            return Ok(());
        }

        let critical = stage.is_critical();
        counter!(
            METRIC_STAGE_TIMEOUTS_TOTAL,
            "stage" => stage.as_str(),
            "critical" => if critical { "true" } else { "false" }
        )
        .increment(1);
        let err = RenderError::timeout(stage, timeout.as_millis() as u64);
        if critical {
            return Err(err);
        }
        self.session.warning("Render stage timed out", &err.to_string());
        Ok(())
    }

    pub(crate) async fn settle(&self) -> Result<(), RenderError> {
        delay(self.timings.settle_delay).await;
        self.ensure_not_cancelled()
    }
}

/// Renders one document, isolating every failure to that document.
///
/// Returns `None` on failure or cancellation; failures are logged, cancellation
/// is reported once by the session.
pub async fn render_file(
    session: &BatchSession,
    source: &DocumentSource,
    options: &RenderOptions,
) -> Option<RenderResult> {
    let started = Instant::now();
    let result = render_document(session, source, options).await;
    let elapsed_ms = started.elapsed().as_secs_f64() * 1000.0;
    histogram!(METRIC_DOCUMENT_MS).record(elapsed_ms);

    match result {
        Ok(rendered) => {
            counter!(METRIC_DOCUMENTS_TOTAL, "result" => "ok").increment(1);
            info!(
                target = "application::render::renderer",
                op = "render_file",
                path = source.label(),
                kind = rendered.view_kind.as_str(),
                result = "ok",
                elapsed_ms,
                "document rendered"
            );
            Some(rendered)
        }
        Err(RenderError::Cancelled) => {
            counter!(METRIC_DOCUMENTS_TOTAL, "result" => "cancelled").increment(1);
            debug!(
                target = "application::render::renderer",
                op = "render_file",
                path = source.label(),
                result = "cancelled",
                "document render cancelled"
            );
            None
        }
        Err(err) => {
            counter!(METRIC_DOCUMENTS_TOTAL, "result" => "failed").increment(1);
            warn!(
                target = "application::render::renderer",
                op = "render_file",
                path = source.label(),
                result = "failed",
                error = %err,
                elapsed_ms,
                "document render failed"
            );
            if !matches!(err, RenderError::FatalSession { .. }) {
                session.error(
                    &format!("Failed to render {}", source.label()),
                    &err.to_string(),
                    false,
                );
            }
            None
        }
    }
}

async fn render_document(
    session: &BatchSession,
    source: &DocumentSource,
    options: &RenderOptions,
) -> Result<RenderResult, RenderError> {
    if let Some(handle) = source.handle().filter(|h| h.kind() == DocumentKind::Media) {
        let mut tree = Tree::new();
        let root = media_wrapper(&mut tree, handle);
        return Ok(finish(Fragment::new(tree, root), DocumentKind::Media, options));
    }

    let _gate = session.occupy().await;
    let lone = LoneBatch::ensure(session, options).await?;
    let timings = session.timings();

    let ready = wait_until(
        || session.is_cancelled() || session.surface().is_some_and(|s| s.is_ready()),
        timings.attach_timeout,
        timings.poll_interval,
    )
    .await;
    if session.check_cancelled() {
        return Err(RenderError::Cancelled);
    }
    if !ready {
        counter!(
            METRIC_STAGE_TIMEOUTS_TOTAL,
            "stage" => Stage::SurfaceReady.as_str(),
            "critical" => "true"
        )
        .increment(1);
        return Err(RenderError::timeout(
            Stage::SurfaceReady,
            timings.attach_timeout.as_millis() as u64,
        ));
    }
    let surface = session.surface().ok_or(RenderError::SurfaceUnavailable)?;

    surface.load(source).await?;
    if session.check_cancelled() {
        return Err(RenderError::Cancelled);
    }

    let kind = DocumentKind::from_view_type(&surface.view_type());
    let ctx = RenderContext {
        session,
        tree: surface.tree(),
        surface: Arc::clone(&surface),
        options,
        timings,
    };
    debug!(
        target = "application::render::renderer",
        op = "dispatch",
        path = source.label(),
        kind = kind.as_str(),
        lone_batch = lone.is_lone(),
        "dispatching document render"
    );

    let root = match kind {
        DocumentKind::Markdown => Some(markdown::render_markdown_view(&ctx, ViewId::MAIN).await?),
        DocumentKind::Canvas => canvas::render_canvas_view(&ctx).await?,
        DocumentKind::Drawing => render_drawing(&ctx).await?,
        DocumentKind::Generic | DocumentKind::Media => render_generic(&ctx).await?,
    };
    ctx.ensure_not_cancelled()?;

    let root = root.ok_or_else(|| RenderError::empty(source.label()))?;
    let mut fragment = ctx.lock_tree("extract").extract(root);
    if fragment.tree().children(fragment.root()).is_empty() {
        return Err(RenderError::empty(source.label()));
    }

    if options.post_process {
        let root = fragment.root();
        if let Err(err) = post_process(fragment.tree_mut(), root, options) {
            session.error(
                &format!("Post-processing skipped for {}", source.label()),
                &err.to_string(),
                false,
            );
        }
        if options.make_headers_trees && kind == DocumentKind::Markdown {
            build_heading_trees(fragment.tree_mut(), root);
        }
    }

    Ok(finish(fragment, kind, options))
}

fn finish(content: Fragment, view_kind: DocumentKind, options: &RenderOptions) -> RenderResult {
    let content = match &options.container {
        Some(container) => content.wrap_in(container),
        None => content,
    };
    RenderResult { content, view_kind }
}

/// Fallback for plugin views: let the view settle, then take it wholesale.
async fn render_generic(ctx: &RenderContext<'_>) -> Result<Option<NodeId>, RenderError> {
    ctx.settle().await?;
    Ok(ctx.surface.content_root(ViewId::MAIN))
}

/// Drawings are ready once their vector output exists.
async fn render_drawing(ctx: &RenderContext<'_>) -> Result<Option<NodeId>, RenderError> {
    let Some(root) = ctx.surface.content_root(ViewId::MAIN) else {
        return Ok(None);
    };
    ctx.wait_for(Stage::DrawingSettle, ctx.timings.section_timeout, || {
        !ctx.lock_tree("drawing_ready").select_tag(root, "svg").is_empty()
    })
    .await?;
    markdown::snapshot_canvases(ctx, root);
    Ok(Some(root))
}
