//! Batch lifecycle and exclusive ownership of the render surface.
//!
//! A [`BatchSession`] is a cheap handle; clones share one session. Exactly one
//! batch is active at a time and it owns the only render surface.

use std::{
    fmt,
    sync::{Arc, Mutex, Weak},
    time::Duration,
};

use metrics::counter;
use tokio::{sync::MutexGuard as AsyncMutexGuard, task::JoinHandle};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::util::lock::mutex_lock;

use super::{
    METRIC_BATCHES_TOTAL, METRIC_STAGE_TIMEOUTS_TOTAL,
    progress::{LogLevel, ProgressLog, Verbosity},
    surface::{
        BatchOutcome, DocumentStore, FileListOptions, ProgressDisplay, RenderSurface,
        SurfacePlacement, SurfaceProvider,
    },
    types::{RenderError, RenderOptions, Stage},
    waiter::wait_until,
};

const LOCK_OWNER: &str = "application::render::session";

/// Budgets for every suspension point of the pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RenderTimings {
    pub attach_timeout: Duration,
    pub section_timeout: Duration,
    pub settle_timeout: Duration,
    pub settle_delay: Duration,
    pub poll_interval: Duration,
}

impl Default for RenderTimings {
    fn default() -> Self {
        Self {
            attach_timeout: Duration::from_millis(2000),
            section_timeout: Duration::from_millis(2000),
            settle_timeout: Duration::from_millis(500),
            settle_delay: Duration::from_millis(500),
            poll_interval: Duration::from_millis(1),
        }
    }
}

/// Host collaborators a session renders with.
#[derive(Clone)]
pub struct SessionHost {
    pub provider: Arc<dyn SurfaceProvider>,
    pub store: Arc<dyn DocumentStore>,
    pub display: Arc<dyn ProgressDisplay>,
}

#[derive(Default)]
struct SessionState {
    active: bool,
    cancelled: bool,
    error_occurred: bool,
    cancel_reported: bool,
    surface: Option<Arc<dyn RenderSurface>>,
    /// Surface invalidated by a fatal error, kept for diagnostics until `end`.
    retained: Option<Arc<dyn RenderSurface>>,
    batch_id: Option<Uuid>,
    closure_watch: Option<JoinHandle<()>>,
}

struct SessionInner {
    host: SessionHost,
    defaults: RenderOptions,
    timings: RenderTimings,
    log: ProgressLog,
    state: Mutex<SessionState>,
    lifecycle: tokio::sync::Mutex<()>,
    occupancy: tokio::sync::Mutex<()>,
}

#[derive(Clone)]
pub struct BatchSession {
    inner: Arc<SessionInner>,
}

impl fmt::Debug for BatchSession {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BatchSession")
            .field("active", &self.is_active())
            .field("timings", &self.inner.timings)
            .finish_non_exhaustive()
    }
}

impl BatchSession {
    pub fn new(
        host: SessionHost,
        defaults: RenderOptions,
        timings: RenderTimings,
        verbosity: Verbosity,
    ) -> Self {
        Self {
            inner: Arc::new(SessionInner {
                host,
                defaults,
                timings,
                log: ProgressLog::new(verbosity),
                state: Mutex::new(SessionState::default()),
                lifecycle: tokio::sync::Mutex::new(()),
                occupancy: tokio::sync::Mutex::new(()),
            }),
        }
    }

    pub fn defaults(&self) -> &RenderOptions {
        &self.inner.defaults
    }

    pub fn timings(&self) -> RenderTimings {
        self.inner.timings
    }

    pub fn store(&self) -> &dyn DocumentStore {
        self.inner.host.store.as_ref()
    }

    pub fn progress_log(&self) -> &ProgressLog {
        &self.inner.log
    }

    pub fn is_active(&self) -> bool {
        mutex_lock(&self.inner.state, LOCK_OWNER, "is_active").active
    }

    /// Raw cancellation flag, without the batch teardown of [`Self::check_cancelled`].
    pub fn is_cancelled(&self) -> bool {
        mutex_lock(&self.inner.state, LOCK_OWNER, "is_cancelled").cancelled
    }

    pub fn error_occurred(&self) -> bool {
        mutex_lock(&self.inner.state, LOCK_OWNER, "error_occurred").error_occurred
    }

    pub fn surface(&self) -> Option<Arc<dyn RenderSurface>> {
        mutex_lock(&self.inner.state, LOCK_OWNER, "surface").surface.clone()
    }

    /// Opens a batch. No-op when one is already active.
    pub async fn begin(&self, options: &RenderOptions) -> Result<(), RenderError> {
        let _lifecycle = self.inner.lifecycle.lock().await;
        {
            let mut state = mutex_lock(&self.inner.state, LOCK_OWNER, "begin");
            if state.active {
                return Ok(());
            }
            state.cancelled = false;
            state.error_occurred = false;
            state.cancel_reported = false;
            state.retained = None;
        }

        let surface = match self.inner.host.provider.open_surface().await {
            Ok(surface) => surface,
            Err(err) => {
                let message = err.to_string();
                self.error("Failed to open render surface", &message, true);
                return Err(RenderError::fatal(message));
            }
        };

        let timings = self.inner.timings;
        let attached = wait_until(
            || surface.is_attached(),
            timings.attach_timeout,
            timings.poll_interval,
        )
        .await;
        if !attached {
            surface.release();
            counter!(
                METRIC_STAGE_TIMEOUTS_TOTAL,
                "stage" => Stage::SurfaceAttach.as_str(),
                "critical" => "true"
            )
            .increment(1);
            let message = RenderError::timeout(
                Stage::SurfaceAttach,
                timings.attach_timeout.as_millis() as u64,
            )
            .to_string();
            self.error("Render surface never attached", &message, true);
            return Err(RenderError::fatal(message));
        }

        surface.place(SurfacePlacement::for_progress(options.display_progress));
        if options.display_progress {
            self.inner.host.display.open();
            self.inner.log.attach_display(Arc::clone(&self.inner.host.display));
        }

        let batch_id = Uuid::new_v4();
        let closure_watch = self.watch_closure(Arc::clone(&surface), batch_id);
        {
            let mut state = mutex_lock(&self.inner.state, LOCK_OWNER, "begin");
            state.active = true;
            state.surface = Some(surface);
            state.batch_id = Some(batch_id);
            state.closure_watch = Some(closure_watch);
        }

        counter!(METRIC_BATCHES_TOTAL).increment(1);
        info!(
            target = "application::render::session",
            op = "begin",
            batch_id = %batch_id,
            display_progress = options.display_progress,
            "render batch started"
        );
        Ok(())
    }

    fn watch_closure(&self, surface: Arc<dyn RenderSurface>, batch_id: Uuid) -> JoinHandle<()> {
        let mut closed = surface.closed();
        drop(surface);
        let session: Weak<SessionInner> = Arc::downgrade(&self.inner);
        tokio::spawn(async move {
            loop {
                let is_closed = *closed.borrow_and_update();
                if is_closed {
                    break;
                }
                if closed.changed().await.is_err() {
                    return;
                }
            }
            if let Some(inner) = session.upgrade() {
                BatchSession { inner }.surface_closed(batch_id);
            }
        })
    }

    fn surface_closed(&self, batch_id: Uuid) {
        {
            let mut state = mutex_lock(&self.inner.state, LOCK_OWNER, "surface_closed");
            if !state.active || state.batch_id != Some(batch_id) {
                return;
            }
            state.cancelled = true;
            state.closure_watch = None;
        }
        warn!(
            target = "application::render::session",
            op = "surface_closed",
            batch_id = %batch_id,
            "render surface closed unexpectedly; cancelling batch"
        );
        self.end();
    }

    /// Closes the active batch. No-op when inactive.
    ///
    /// The surface is released unless an error occurred, in which case it stays
    /// open for inspection and the progress UI reports completion with errors.
    pub fn end(&self) {
        let (surface, error_occurred, cancelled, batch_id, closure_watch) = {
            let mut state = mutex_lock(&self.inner.state, LOCK_OWNER, "end");
            if !state.active {
                return;
            }
            state.active = false;
            let surface = state.surface.take().or_else(|| state.retained.take());
            (
                surface,
                state.error_occurred,
                state.cancelled,
                state.batch_id.take(),
                state.closure_watch.take(),
            )
        };

        if let Some(watch) = closure_watch {
            watch.abort();
        }

        let display = self.inner.log.detach_display();
        let outcome = if error_occurred {
            if let Some(surface) = &surface {
                surface.reveal();
            }
            BatchOutcome::CompletedWithErrors
        } else {
            if let Some(surface) = &surface {
                surface.release();
            }
            if cancelled {
                BatchOutcome::Cancelled
            } else {
                BatchOutcome::Completed
            }
        };
        if let Some(display) = display {
            display.finish(outcome);
            display.set_taskbar_progress(None);
        }

        info!(
            target = "application::render::session",
            op = "end",
            batch_id = %batch_id.map(|id| id.to_string()).unwrap_or_default(),
            outcome = ?outcome,
            "render batch ended"
        );
    }

    /// Requests cooperative cancellation; observed at the next stage boundary.
    pub fn cancel(&self) {
        let mut state = mutex_lock(&self.inner.state, LOCK_OWNER, "cancel");
        if state.active {
            state.cancelled = true;
        }
    }

    /// True when the batch was cancelled or lost its surface. A `true` result
    /// ends the batch; repeated calls release the surface at most once.
    pub fn check_cancelled(&self) -> bool {
        let report = {
            let mut state = mutex_lock(&self.inner.state, LOCK_OWNER, "check_cancelled");
            if !state.cancelled && state.surface.is_some() {
                return false;
            }
            let report = state.cancelled && !state.cancel_reported;
            if report {
                state.cancel_reported = true;
            }
            report
        };

        if report {
            self.log("Render cancelled", "");
        }
        self.end();
        true
    }

    pub fn log(&self, title: &str, message: &str) {
        self.inner.log.log(LogLevel::Info, title, message);
    }

    pub fn warning(&self, title: &str, message: &str) {
        self.inner.log.log(LogLevel::Warning, title, message);
    }

    /// Records an error. A fatal error marks the batch errored and invalidates
    /// its surface so later stages treat the batch as unusable.
    pub fn error(&self, title: &str, message: &str, fatal: bool) {
        if !fatal {
            self.inner.log.log(LogLevel::Error, title, message);
            return;
        }

        self.inner.log.log(LogLevel::Fatal, title, message);
        let mut state = mutex_lock(&self.inner.state, LOCK_OWNER, "fatal");
        state.error_occurred = true;
        if let Some(surface) = state.surface.take() {
            state.retained = Some(surface);
        }
    }

    pub fn progress(&self, fraction: f64, message: &str, sub_message: &str) {
        self.inner.log.progress(fraction, message, sub_message);
    }

    pub fn set_file_list(&self, items: &[String], options: &FileListOptions) {
        self.inner.log.set_file_list(items, options);
    }

    /// Waits for exclusive use of the render surface. Requests are served FIFO.
    pub(crate) async fn occupy(&self) -> AsyncMutexGuard<'_, ()> {
        let guard = self.inner.occupancy.lock().await;
        debug!(target = "application::render::session", op = "occupy", "render surface occupied");
        guard
    }
}

/// Scoped implicit batch. Opens a batch when none is active and ends it on
/// drop, on every exit path.
pub(crate) struct LoneBatch {
    session: Option<BatchSession>,
}

impl LoneBatch {
    pub(crate) async fn ensure(
        session: &BatchSession,
        options: &RenderOptions,
    ) -> Result<Self, RenderError> {
        if session.is_active() {
            return Ok(Self { session: None });
        }
        session.begin(options).await?;
        Ok(Self {
            session: Some(session.clone()),
        })
    }

    pub(crate) fn is_lone(&self) -> bool {
        self.session.is_some()
    }
}

impl Drop for LoneBatch {
    fn drop(&mut self) {
        if let Some(session) = self.session.take() {
            session.end();
        }
    }
}
