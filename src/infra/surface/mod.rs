//! In-process render surface backed by comrak.
//!
//! Emulates the host's live view: documents are laid out into a shared tree,
//! and section render/measure requests complete asynchronously on spawned
//! tasks so the pipeline observes them only by polling.

mod canvas;
mod markdown;

use std::sync::{
    Arc, Mutex,
    atomic::{AtomicBool, Ordering},
};

use async_trait::async_trait;
use comrak::options::Options;
use tokio::sync::watch;
use tracing::{debug, info, warn};

use crate::{
    application::render::{
        CanvasEdge, CanvasNode, DocumentStore, LoadError, PendingTask, RenderSurface, SharedTree,
        SurfaceError, SurfacePlacement, SurfaceProvider, ViewId, inline::markdown_options,
    },
    domain::{
        document::{DocumentHandle, DocumentKind, DocumentSource, Section},
        media::media_wrapper,
        tree::{Element, NodeId, Tree},
    },
    util::lock::mutex_lock,
};

use self::{
    canvas::{CanvasFile, CanvasLayout, parse_canvas},
    markdown::{BuiltBlock, EmbedIndex, EmbeddedDocument, MAX_EMBED_DEPTH, SectionBuilder, embed_links},
};
use super::store::FsDocumentStore;

const LOCK_OWNER: &str = "infra::surface";
const VIEW_MARKDOWN: &str = "markdown";
const VIEW_CANVAS: &str = "canvas";
const VIEW_GENERIC: &str = "generic";
const VIEW_MEDIA: &str = "media";

/// Opens [`ComrakSurface`]s over a filesystem vault.
#[derive(Clone)]
pub struct ComrakSurfaceProvider {
    store: Arc<FsDocumentStore>,
    options: Arc<Options<'static>>,
}

impl ComrakSurfaceProvider {
    pub fn new(store: Arc<FsDocumentStore>) -> Self {
        Self {
            store,
            options: Arc::new(markdown_options()),
        }
    }
}

#[async_trait]
impl SurfaceProvider for ComrakSurfaceProvider {
    async fn open_surface(&self) -> Result<Arc<dyn RenderSurface>, SurfaceError> {
        let surface: Arc<dyn RenderSurface> =
            ComrakSurface::open(Arc::clone(&self.store), Arc::clone(&self.options));
        Ok(surface)
    }
}

#[derive(Default)]
struct ViewState {
    root: Option<NodeId>,
    sections: Vec<Section>,
}

#[derive(Default)]
struct SurfaceState {
    view_type: String,
    views: Vec<ViewState>,
    canvas: Option<CanvasLayout>,
    placement: Option<SurfacePlacement>,
    released: bool,
    revealed: bool,
}

enum Loaded {
    Markdown {
        text: String,
        embeds: EmbedIndex,
    },
    Canvas {
        file: CanvasFile,
        embeds: EmbedIndex,
    },
    Generic {
        handle: DocumentHandle,
        text: Option<String>,
    },
}

pub struct ComrakSurface {
    store: Arc<FsDocumentStore>,
    options: Arc<Options<'static>>,
    tree: SharedTree,
    state: Arc<Mutex<SurfaceState>>,
    attached: Arc<AtomicBool>,
    closed_tx: watch::Sender<bool>,
}

impl ComrakSurface {
    /// Opens a surface whose window attaches on the next scheduler turn.
    pub fn open(store: Arc<FsDocumentStore>, options: Arc<Options<'static>>) -> Arc<Self> {
        let (closed_tx, _) = watch::channel(false);
        let surface = Arc::new(Self {
            store,
            options,
            tree: SharedTree::default(),
            state: Arc::new(Mutex::new(SurfaceState::default())),
            attached: Arc::new(AtomicBool::new(false)),
            closed_tx,
        });

        let attached = Arc::clone(&surface.attached);
        tokio::spawn(async move {
            tokio::task::yield_now().await;
            attached.store(true, Ordering::SeqCst);
        });
        surface
    }

    /// Simulates the user closing the surface window.
    pub fn close(&self) {
        self.closed_tx.send_replace(true);
    }

    pub fn is_released(&self) -> bool {
        mutex_lock(&self.state, LOCK_OWNER, "is_released").released
    }

    pub fn is_revealed(&self) -> bool {
        mutex_lock(&self.state, LOCK_OWNER, "is_revealed").revealed
    }

    async fn read(&self, handle: &DocumentHandle) -> Result<String, LoadError> {
        self.store
            .read_to_string(handle)
            .await
            .map_err(|err| LoadError::new(handle.path(), err.to_string()))
    }

    /// Fetches every transclusion target reachable from `texts`, breadth-limited
    /// by the nesting depth.
    async fn prefetch(&self, texts: Vec<String>, links: Vec<String>) -> EmbedIndex {
        let mut index = EmbedIndex::new();
        let mut pending: Vec<(Vec<String>, usize)> = texts
            .iter()
            .map(|text| (embed_links(text), 0))
            .collect();
        pending.push((links, 0));

        while let Some((links, depth)) = pending.pop() {
            for link in links {
                if index.contains_key(&link) {
                    continue;
                }
                let Some(handle) = self.store.resolve(&link) else {
                    debug!(
                        target = "infra::surface",
                        op = "prefetch",
                        link = link.as_str(),
                        "unresolved embed"
                    );
                    continue;
                };
                let text = if handle.kind() == DocumentKind::Markdown && depth < MAX_EMBED_DEPTH {
                    match self.read(&handle).await {
                        Ok(text) => Some(text),
                        Err(err) => {
                            warn!(
                                target = "infra::surface",
                                op = "prefetch",
                                link = link.as_str(),
                                error = %err,
                                "failed to read embedded document"
                            );
                            None
                        }
                    }
                } else {
                    None
                };
                if let Some(text) = text.as_deref() {
                    pending.push((embed_links(text), depth + 1));
                }
                index.insert(link, EmbeddedDocument { handle, text });
            }
        }
        index
    }

    async fn fetch(&self, source: &DocumentSource) -> Result<Loaded, LoadError> {
        let handle = match source {
            DocumentSource::Markdown { text, .. } => {
                let embeds = self.prefetch(vec![text.clone()], Vec::new()).await;
                return Ok(Loaded::Markdown {
                    text: text.clone(),
                    embeds,
                });
            }
            DocumentSource::File(handle) => handle,
        };

        match handle.kind() {
            DocumentKind::Markdown => {
                let text = self.read(handle).await?;
                let embeds = self.prefetch(vec![text.clone()], Vec::new()).await;
                Ok(Loaded::Markdown { text, embeds })
            }
            DocumentKind::Canvas => {
                let text = self.read(handle).await?;
                let file = parse_canvas(handle.path(), &text)
                    .map_err(|err| LoadError::new(handle.path(), err.to_string()))?;
                let texts = file.texts().map(str::to_string).collect();
                let links = file.file_links().map(str::to_string).collect();
                let embeds = self.prefetch(texts, links).await;
                Ok(Loaded::Canvas { file, embeds })
            }
            DocumentKind::Media => Ok(Loaded::Generic {
                handle: handle.clone(),
                text: None,
            }),
            _ => {
                let bytes = tokio::fs::read(self.store.absolute_path(handle))
                    .await
                    .map_err(|err| LoadError::new(handle.path(), err.to_string()))?;
                Ok(Loaded::Generic {
                    handle: handle.clone(),
                    text: String::from_utf8(bytes).ok(),
                })
            }
        }
    }

    fn install(&self, loaded: Loaded) {
        let mut tree = mutex_lock(self.tree.as_ref(), LOCK_OWNER, "install");
        *tree = Tree::new();

        let (view_type, views, canvas) = match loaded {
            Loaded::Markdown { text, embeds } => {
                let builder = SectionBuilder::new(&self.options, &embeds);
                let root = tree.create(Element::new("div").with_class("markdown-reading-view"));
                let blocks = builder.build(&mut tree, &text, 0);
                for block in &blocks {
                    tree.append(root, block.content);
                }
                (VIEW_MARKDOWN, vec![view(Some(root), &blocks)], None)
            }
            Loaded::Canvas { file, embeds } => {
                let builder = SectionBuilder::new(&self.options, &embeds);
                let layout = CanvasLayout::build(&mut tree, &file, &builder, &embeds);
                let mut views = vec![ViewState {
                    root: layout.root,
                    sections: Vec::new(),
                }];
                views.extend(layout.views.iter().map(|blocks| view(None, blocks)));
                (VIEW_CANVAS, views, Some(layout))
            }
            Loaded::Generic { handle, text } => {
                let root = generic_view(&mut tree, &handle, text.as_deref());
                let view_type = if handle.kind() == DocumentKind::Media {
                    VIEW_MEDIA
                } else {
                    VIEW_GENERIC
                };
                (view_type, vec![view(Some(root), &[])], None)
            }
        };
        drop(tree);

        let mut state = mutex_lock(&self.state, LOCK_OWNER, "install");
        state.view_type = view_type.to_string();
        state.views = views;
        state.canvas = canvas;
    }

    fn section_content(&self, view: ViewId, index: usize) -> Option<NodeId> {
        let state = mutex_lock(&self.state, LOCK_OWNER, "section_content");
        state
            .views
            .get(view.0)?
            .sections
            .get(index)
            .map(|section| section.content)
    }

    fn update_section(&self, view: ViewId, index: usize, update: impl FnOnce(&mut Section)) {
        update_section(&self.state, view, index, update);
    }
}

fn update_section(
    state: &Mutex<SurfaceState>,
    view: ViewId,
    index: usize,
    update: impl FnOnce(&mut Section),
) {
    let mut state = mutex_lock(state, LOCK_OWNER, "update_section");
    if let Some(section) = state
        .views
        .get_mut(view.0)
        .and_then(|view| view.sections.get_mut(index))
    {
        update(section);
    }
}

fn view(root: Option<NodeId>, blocks: &[BuiltBlock]) -> ViewState {
    ViewState {
        root,
        sections: blocks
            .iter()
            .map(|block| Section::new(block.content, block.level))
            .collect(),
    }
}

fn generic_view(tree: &mut Tree, handle: &DocumentHandle, text: Option<&str>) -> NodeId {
    let root = tree.create(
        Element::new("div")
            .with_class("view-content")
            .with_class("file-view"),
    );
    if handle.kind() == DocumentKind::Media {
        let wrapper = media_wrapper(tree, handle);
        tree.append(root, wrapper);
        return root;
    }
    match text {
        Some(text) => {
            let pre = tree.create_element("pre");
            let code = tree.create_element("code");
            let body = tree.create_text(text);
            tree.append(code, body);
            tree.append(pre, code);
            tree.append(root, pre);
        }
        None => {
            let link = tree.create(
                Element::new("a")
                    .with_class("internal-link")
                    .with_attr("href", handle.path()),
            );
            let label = tree.create_text(handle.file_name());
            tree.append(link, label);
            tree.append(root, link);
        }
    }
    root
}

#[async_trait]
impl RenderSurface for ComrakSurface {
    fn tree(&self) -> SharedTree {
        Arc::clone(&self.tree)
    }

    fn is_attached(&self) -> bool {
        self.attached.load(Ordering::SeqCst)
    }

    fn is_ready(&self) -> bool {
        self.is_attached() && !self.is_released()
    }

    fn place(&self, placement: SurfacePlacement) {
        mutex_lock(&self.state, LOCK_OWNER, "place").placement = Some(placement);
        debug!(target = "infra::surface", op = "place", placement = ?placement, "surface placed");
    }

    fn closed(&self) -> watch::Receiver<bool> {
        self.closed_tx.subscribe()
    }

    fn release(&self) {
        mutex_lock(&self.state, LOCK_OWNER, "release").released = true;
        debug!(target = "infra::surface", op = "release", "surface released");
    }

    fn reveal(&self) {
        let placement = {
            let mut state = mutex_lock(&self.state, LOCK_OWNER, "reveal");
            state.revealed = true;
            state.placement
        };
        info!(
            target = "infra::surface",
            op = "reveal",
            placement = ?placement,
            "surface left open for inspection"
        );
    }

    async fn load(&self, source: &DocumentSource) -> Result<(), LoadError> {
        if self.is_released() {
            return Err(LoadError::new(source.label(), "surface was released"));
        }
        let loaded = self.fetch(source).await?;
        self.install(loaded);
        debug!(
            target = "infra::surface",
            op = "load",
            path = source.label(),
            view_type = self.view_type().as_str(),
            "document loaded"
        );
        Ok(())
    }

    fn view_type(&self) -> String {
        mutex_lock(&self.state, LOCK_OWNER, "view_type").view_type.clone()
    }

    fn content_root(&self, view: ViewId) -> Option<NodeId> {
        mutex_lock(&self.state, LOCK_OWNER, "content_root")
            .views
            .get(view.0)
            .and_then(|view| view.root)
    }

    fn sections(&self, view: ViewId) -> Vec<Section> {
        mutex_lock(&self.state, LOCK_OWNER, "sections")
            .views
            .get(view.0)
            .map(|view| view.sections.clone())
            .unwrap_or_default()
    }

    fn section(&self, view: ViewId, index: usize) -> Option<Section> {
        mutex_lock(&self.state, LOCK_OWNER, "section")
            .views
            .get(view.0)?
            .sections
            .get(index)
            .copied()
    }

    fn reset_section(&self, view: ViewId, index: usize) {
        self.update_section(view, index, |section| {
            section.shown = true;
            section.rendered = false;
            section.computed = false;
        });
    }

    fn render_section(&self, view: ViewId, index: usize) {
        let Some(content) = self.section_content(view, index) else {
            return;
        };
        let state = Arc::clone(&self.state);
        let tree = Arc::clone(&self.tree);
        tokio::spawn(async move {
            tokio::task::yield_now().await;
            {
                let mut tree = mutex_lock(tree.as_ref(), LOCK_OWNER, "render_section");
                let embeds = tree.select(content, |element| {
                    element.has_class("internal-embed") || element.has_class("markdown-embed")
                });
                for embed in embeds {
                    tree.add_class(embed, "is-loaded");
                }
            }
            update_section(&state, view, index, |section| section.rendered = true);
        });
    }

    fn measure_section(&self, view: ViewId, index: usize) {
        let state = Arc::clone(&self.state);
        tokio::spawn(async move {
            tokio::task::yield_now().await;
            update_section(&state, view, index, |section| {
                section.computed = section.rendered;
            });
        });
    }

    fn render_query_block(&self, _view: ViewId, _placeholder: NodeId) -> Option<NodeId> {
        None
    }

    fn post_process_section(&self, _view: ViewId, _content: NodeId) -> Vec<PendingTask> {
        Vec::new()
    }

    fn zoom_to_fit(&self) {
        let state = mutex_lock(&self.state, LOCK_OWNER, "zoom_to_fit");
        if let Some(layout) = state.canvas.as_ref() {
            layout.fit(&mut mutex_lock(self.tree.as_ref(), LOCK_OWNER, "zoom_to_fit"));
        }
    }

    fn render_canvas_items(&self) {
        let state = mutex_lock(&self.state, LOCK_OWNER, "render_canvas_items");
        let Some(layout) = state.canvas.as_ref() else {
            return;
        };
        let mut tree = mutex_lock(self.tree.as_ref(), LOCK_OWNER, "render_canvas_items");
        for node in &layout.nodes {
            tree.add_class(node.element, "is-rendered");
        }
    }

    fn canvas_nodes(&self) -> Vec<CanvasNode> {
        mutex_lock(&self.state, LOCK_OWNER, "canvas_nodes")
            .canvas
            .as_ref()
            .map(|layout| layout.nodes.clone())
            .unwrap_or_default()
    }

    fn canvas_edges(&self) -> Vec<CanvasEdge> {
        mutex_lock(&self.state, LOCK_OWNER, "canvas_edges")
            .canvas
            .as_ref()
            .map(|layout| layout.edges.clone())
            .unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::application::render::waiter::wait_until;

    async fn surface_over(files: &[(&str, &str)]) -> (tempfile::TempDir, Arc<ComrakSurface>) {
        let dir = tempfile::tempdir().expect("tempdir");
        for (path, body) in files {
            let target = dir.path().join(path);
            if let Some(parent) = target.parent() {
                std::fs::create_dir_all(parent).expect("dirs");
            }
            std::fs::write(target, body).expect("write");
        }
        let store = Arc::new(FsDocumentStore::open(dir.path()).await.expect("store"));
        let surface = ComrakSurface::open(store, Arc::new(markdown_options()));
        (dir, surface)
    }

    #[tokio::test]
    async fn attaches_asynchronously_and_flips_section_flags() {
        let (_dir, surface) = surface_over(&[
            ("main.md", "# Main\n\n![[child]]\n"),
            ("child.md", "Child body"),
        ])
        .await;
        assert!(
            wait_until(
                || surface.is_attached(),
                Duration::from_secs(1),
                Duration::from_millis(1)
            )
            .await
        );

        let handle = DocumentHandle::new("main.md").expect("handle");
        surface
            .load(&DocumentSource::File(handle))
            .await
            .expect("load");
        assert_eq!(surface.view_type(), "markdown");

        let sections = surface.sections(ViewId::MAIN);
        assert_eq!(sections.len(), 2);
        assert_eq!(sections[0].level, 1);

        surface.reset_section(ViewId::MAIN, 1);
        surface.render_section(ViewId::MAIN, 1);
        let rendered = wait_until(
            || {
                surface
                    .section(ViewId::MAIN, 1)
                    .is_some_and(|section| section.rendered)
            },
            Duration::from_secs(1),
            Duration::from_millis(1),
        )
        .await;
        assert!(rendered);

        let tree = surface.tree();
        let tree = tree.lock().unwrap();
        let embed = tree.select_class(sections[1].content, "markdown-embed")[0];
        assert!(tree.has_class(embed, "is-loaded"));
        assert_eq!(tree.text_content(embed), "Child body");
    }

    #[tokio::test]
    async fn missing_documents_fail_to_load() {
        let (_dir, surface) = surface_over(&[("main.md", "x")]).await;
        let handle = DocumentHandle::new("gone.md").expect("handle");
        let err = surface
            .load(&DocumentSource::File(handle))
            .await
            .expect_err("missing file");
        assert_eq!(err.path, "gone.md");
    }

    #[tokio::test]
    async fn canvas_file_nodes_get_their_own_views() {
        let (_dir, surface) = surface_over(&[
            (
                "board.canvas",
                r#"{"nodes":[{"id":"n","type":"file","x":0,"y":0,"width":10,"height":10,"file":"note.md"}],"edges":[]}"#,
            ),
            ("note.md", "# Note\n\nText"),
        ])
        .await;
        let handle = DocumentHandle::new("board.canvas").expect("handle");
        surface
            .load(&DocumentSource::File(handle))
            .await
            .expect("load");

        assert_eq!(surface.view_type(), "canvas");
        assert!(surface.content_root(ViewId::MAIN).is_some());
        assert_eq!(surface.sections(ViewId(1)).len(), 2);
        assert_eq!(surface.canvas_nodes().len(), 1);
    }
}
