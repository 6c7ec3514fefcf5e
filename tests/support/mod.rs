//! Scripted render surface: documents are built by closures and section
//! flags flip from spawned tasks, the way a live host reports them.

#![allow(dead_code)]

use std::{
    collections::{HashMap, HashSet},
    sync::{
        Arc, Mutex,
        atomic::{AtomicBool, AtomicUsize, Ordering},
    },
    time::Duration,
};

use async_trait::async_trait;
use tokio::sync::watch;
use vaultpress::{
    application::render::{
        BatchOutcome, BatchSession, CanvasEdge, CanvasNode, DocumentStore, FileListOptions,
        LoadError, LogEntry, PendingTask, ProgressDisplay, RenderOptions, RenderSurface,
        RenderTimings, SessionHost, SharedTree, SurfaceError, SurfacePlacement, SurfaceProvider,
        Verbosity, ViewId,
    },
    domain::{
        document::{DocumentHandle, DocumentSource, Section},
        tree::{Element, NodeId, Tree},
    },
};

pub type Script = Box<dyn Fn(&mut Tree) -> Layout + Send + Sync>;

/// What a scripted document looks like once loaded.
pub struct Layout {
    pub view_type: &'static str,
    pub root: Option<NodeId>,
    /// Sections of the main view.
    pub sections: Vec<(NodeId, u8)>,
    /// Sections of embedded views, addressed as `ViewId(i + 1)`.
    pub views: Vec<Vec<(NodeId, u8)>>,
    pub nodes: Vec<CanvasNode>,
    pub edges: Vec<CanvasEdge>,
}

impl Layout {
    pub fn markdown(sections: Vec<(NodeId, u8)>) -> Self {
        Self {
            view_type: "markdown",
            root: None,
            sections,
            views: Vec::new(),
            nodes: Vec::new(),
            edges: Vec::new(),
        }
    }

    /// A non-sectioned view rendered wholesale from `root`.
    pub fn view(view_type: &'static str, root: NodeId) -> Self {
        Self {
            view_type,
            root: Some(root),
            ..Self::markdown(Vec::new())
        }
    }
}

#[derive(Default)]
struct Loaded {
    label: String,
    view_type: String,
    root: Option<NodeId>,
    views: Vec<Vec<Section>>,
    nodes: Vec<CanvasNode>,
    edges: Vec<CanvasEdge>,
}

impl Loaded {
    fn section_mut(&mut self, view: ViewId, index: usize) -> Option<&mut Section> {
        self.views.get_mut(view.0)?.get_mut(index)
    }
}

fn to_sections(entries: Vec<(NodeId, u8)>) -> Vec<Section> {
    entries
        .into_iter()
        .map(|(content, level)| Section::new(content, level))
        .collect()
}

pub struct ScriptedSurface {
    tree: SharedTree,
    scripts: HashMap<String, Script>,
    stalled: HashSet<String>,
    query_result: Option<&'static str>,
    post_process_delay: Option<Duration>,
    loaded: Arc<Mutex<Loaded>>,
    attached: Arc<AtomicBool>,
    released: AtomicUsize,
    closed_tx: watch::Sender<bool>,
}

impl ScriptedSurface {
    pub fn releases(&self) -> usize {
        self.released.load(Ordering::SeqCst)
    }

    fn is_stalled(&self) -> bool {
        let loaded = self.loaded.lock().unwrap();
        self.stalled.contains(&loaded.label)
    }
}

#[derive(Default)]
pub struct SurfaceBuilder {
    scripts: HashMap<String, Script>,
    stalled: HashSet<String>,
    query_result: Option<&'static str>,
    post_process_delay: Option<Duration>,
}

impl SurfaceBuilder {
    /// A markdown document made of the returned sections.
    pub fn document(
        self,
        label: &str,
        script: impl Fn(&mut Tree) -> Vec<(NodeId, u8)> + Send + Sync + 'static,
    ) -> Self {
        self.layout(label, move |tree| Layout::markdown(script(tree)))
    }

    pub fn layout(
        mut self,
        label: &str,
        script: impl Fn(&mut Tree) -> Layout + Send + Sync + 'static,
    ) -> Self {
        self.scripts.insert(label.to_string(), Box::new(script));
        self
    }

    /// Query blocks render to a result element holding `text`.
    pub fn query_result(mut self, text: &'static str) -> Self {
        self.query_result = Some(text);
        self
    }

    /// Every section's post-processing hook hands back a task that finishes
    /// after `delay` and marks the section `is-post-processed`.
    pub fn post_process_delay(mut self, delay: Duration) -> Self {
        self.post_process_delay = Some(delay);
        self
    }

    /// Sections of this document never report `rendered`.
    pub fn stalled(mut self, label: &str) -> Self {
        self.stalled.insert(label.to_string());
        self
    }

    pub fn build(self) -> Arc<ScriptedSurface> {
        let (closed_tx, _) = watch::channel(false);
        Arc::new(ScriptedSurface {
            tree: SharedTree::default(),
            scripts: self.scripts,
            stalled: self.stalled,
            query_result: self.query_result,
            post_process_delay: self.post_process_delay,
            loaded: Arc::new(Mutex::new(Loaded::default())),
            attached: Arc::new(AtomicBool::new(false)),
            released: AtomicUsize::new(0),
            closed_tx,
        })
    }
}

#[async_trait]
impl RenderSurface for ScriptedSurface {
    fn tree(&self) -> SharedTree {
        Arc::clone(&self.tree)
    }

    fn is_attached(&self) -> bool {
        self.attached.load(Ordering::SeqCst)
    }

    fn is_ready(&self) -> bool {
        self.is_attached()
    }

    fn place(&self, _placement: SurfacePlacement) {}

    fn closed(&self) -> watch::Receiver<bool> {
        self.closed_tx.subscribe()
    }

    fn release(&self) {
        self.released.fetch_add(1, Ordering::SeqCst);
    }

    fn reveal(&self) {}

    async fn load(&self, source: &DocumentSource) -> Result<(), LoadError> {
        let label = source.label().to_string();
        let script = self
            .scripts
            .get(&label)
            .ok_or_else(|| LoadError::new(&label, "no such document"))?;
        let layout = {
            let mut tree = self.tree.lock().unwrap();
            *tree = Tree::new();
            script(&mut tree)
        };
        let mut views = vec![to_sections(layout.sections)];
        views.extend(layout.views.into_iter().map(to_sections));
        *self.loaded.lock().unwrap() = Loaded {
            label,
            view_type: layout.view_type.to_string(),
            root: layout.root,
            views,
            nodes: layout.nodes,
            edges: layout.edges,
        };
        Ok(())
    }

    fn view_type(&self) -> String {
        self.loaded.lock().unwrap().view_type.clone()
    }

    fn content_root(&self, _view: ViewId) -> Option<NodeId> {
        self.loaded.lock().unwrap().root
    }

    fn sections(&self, view: ViewId) -> Vec<Section> {
        let loaded = self.loaded.lock().unwrap();
        loaded.views.get(view.0).cloned().unwrap_or_default()
    }

    fn section(&self, view: ViewId, index: usize) -> Option<Section> {
        let loaded = self.loaded.lock().unwrap();
        loaded.views.get(view.0)?.get(index).copied()
    }

    fn reset_section(&self, view: ViewId, index: usize) {
        if let Some(section) = self.loaded.lock().unwrap().section_mut(view, index) {
            section.shown = true;
            section.rendered = false;
            section.computed = false;
        }
    }

    fn render_section(&self, view: ViewId, index: usize) {
        if self.is_stalled() {
            return;
        }
        let loaded = Arc::clone(&self.loaded);
        let tree = Arc::clone(&self.tree);
        tokio::spawn(async move {
            tokio::task::yield_now().await;
            let Some(content) = loaded
                .lock()
                .unwrap()
                .section_mut(view, index)
                .map(|section| section.content)
            else {
                return;
            };
            {
                let mut tree = tree.lock().unwrap();
                for embed in tree.select_class(content, "markdown-embed") {
                    tree.add_class(embed, "is-loaded");
                }
            }
            if let Some(section) = loaded.lock().unwrap().section_mut(view, index) {
                section.rendered = true;
            }
        });
    }

    fn measure_section(&self, view: ViewId, index: usize) {
        let loaded = Arc::clone(&self.loaded);
        tokio::spawn(async move {
            tokio::task::yield_now().await;
            if let Some(section) = loaded.lock().unwrap().section_mut(view, index) {
                section.computed = section.rendered;
            }
        });
    }

    fn render_query_block(&self, _view: ViewId, _placeholder: NodeId) -> Option<NodeId> {
        let text = self.query_result?;
        let mut tree = self.tree.lock().unwrap();
        let result = tree.create(Element::new("div").with_class("dataview-result"));
        let body = tree.create_text(text);
        tree.append(result, body);
        Some(result)
    }

    fn post_process_section(&self, _view: ViewId, content: NodeId) -> Vec<PendingTask> {
        let Some(delay) = self.post_process_delay else {
            return Vec::new();
        };
        let tree = Arc::clone(&self.tree);
        let task: PendingTask = Box::pin(async move {
            tokio::time::sleep(delay).await;
            tree.lock().unwrap().add_class(content, "is-post-processed");
        });
        vec![task]
    }

    fn zoom_to_fit(&self) {}

    fn render_canvas_items(&self) {}

    fn canvas_nodes(&self) -> Vec<CanvasNode> {
        self.loaded.lock().unwrap().nodes.clone()
    }

    fn canvas_edges(&self) -> Vec<CanvasEdge> {
        self.loaded.lock().unwrap().edges.clone()
    }
}

pub struct ScriptedProvider {
    surface: Arc<ScriptedSurface>,
}

#[async_trait]
impl SurfaceProvider for ScriptedProvider {
    async fn open_surface(&self) -> Result<Arc<dyn RenderSurface>, SurfaceError> {
        let attached = Arc::clone(&self.surface.attached);
        tokio::spawn(async move {
            tokio::task::yield_now().await;
            attached.store(true, Ordering::SeqCst);
        });
        Ok(self.surface.clone())
    }
}

/// Resolves a fixed set of vault paths, with or without the `.md` suffix.
pub struct StaticStore(pub Vec<&'static str>);

impl DocumentStore for StaticStore {
    fn resolve(&self, link: &str) -> Option<DocumentHandle> {
        self.0
            .iter()
            .find(|path| **path == link || path.strip_suffix(".md") == Some(link))
            .and_then(|path| DocumentHandle::new(path).ok())
    }
}

#[derive(Default)]
pub struct RecordingDisplay {
    pub outcomes: Mutex<Vec<BatchOutcome>>,
    pub entries: Mutex<Vec<LogEntry>>,
}

impl ProgressDisplay for RecordingDisplay {
    fn open(&self) {}
    fn update(&self, _fraction: f64, _message: &str, _sub_message: &str) {}
    fn set_taskbar_progress(&self, _fraction: Option<f64>) {}
    fn append(&self, entry: &LogEntry) {
        self.entries.lock().unwrap().push(entry.clone());
    }
    fn set_file_list(&self, _items: &[String], _options: &FileListOptions) {}
    fn finish(&self, outcome: BatchOutcome) {
        self.outcomes.lock().unwrap().push(outcome);
    }
}

pub struct Harness {
    pub session: BatchSession,
    pub surface: Arc<ScriptedSurface>,
    pub display: Arc<RecordingDisplay>,
}

pub fn harness(surface: Arc<ScriptedSurface>, store: StaticStore, defaults: RenderOptions) -> Harness {
    let display = Arc::new(RecordingDisplay::default());
    let session = BatchSession::new(
        SessionHost {
            provider: Arc::new(ScriptedProvider {
                surface: surface.clone(),
            }),
            store: Arc::new(store),
            display: display.clone(),
        },
        defaults,
        RenderTimings::default(),
        Verbosity::All,
    );
    Harness {
        session,
        surface,
        display,
    }
}
