use std::{sync::Arc, time::Duration};

use vaultpress::{
    application::render::{
        BatchSession, RenderOptions, RenderOverrides, RenderTimings, SessionHost, Verbosity,
        api::{begin_batch, end_batch, render_document_to_string, render_markdown_to_string},
    },
    infra::{console::ConsoleHost, store::FsDocumentStore, surface::ComrakSurfaceProvider},
};

async fn vault_session(
    files: &[(&str, &str)],
) -> (tempfile::TempDir, Arc<FsDocumentStore>, BatchSession) {
    let dir = tempfile::tempdir().expect("tempdir");
    for (path, body) in files {
        let target = dir.path().join(path);
        if let Some(parent) = target.parent() {
            std::fs::create_dir_all(parent).expect("dirs");
        }
        std::fs::write(target, body).expect("write");
    }
    let store = Arc::new(FsDocumentStore::open(dir.path()).await.expect("store"));
    let session = BatchSession::new(
        SessionHost {
            provider: Arc::new(ComrakSurfaceProvider::new(Arc::clone(&store))),
            store: store.clone(),
            display: Arc::new(ConsoleHost::new()),
        },
        RenderOptions::default(),
        RenderTimings {
            settle_delay: Duration::from_millis(5),
            ..RenderTimings::default()
        },
        Verbosity::All,
    );
    (dir, store, session)
}

#[tokio::test]
async fn note_with_transclusion_renders_to_static_html() {
    let (_dir, store, session) = vault_session(&[
        (
            "notes/main.md",
            "# Main\n\nIntro paragraph.\n\n![[child]]\n\n## Later\n\nClosing words.\n",
        ),
        ("notes/child.md", "Child **content**."),
    ])
    .await;
    let main = store.get("notes/main.md").cloned().expect("main note");

    let inlined = render_document_to_string(
        &session,
        &main,
        RenderOverrides {
            inline_html: Some(true),
            ..Default::default()
        },
    )
    .await
    .expect("inlined render");
    assert!(inlined.contains("Intro paragraph."));
    assert!(inlined.contains("<strong>content</strong>"));
    assert!(inlined.contains("heading-wrapper"));
    assert!(!inlined.contains("document-embed-placeholder"));

    let referenced = render_document_to_string(&session, &main, RenderOverrides::default())
        .await
        .expect("referenced render");
    assert!(referenced.contains(r#"data-src="notes/child.md""#));
    assert!(!referenced.contains("<strong>content</strong>"));
}

#[tokio::test]
async fn canvas_file_nodes_follow_the_export_selection() {
    let canvas = r#"{
        "nodes": [
            {"id": "t", "type": "text", "x": 0, "y": 0, "width": 200, "height": 80, "text": "Plain *text*"},
            {"id": "f", "type": "file", "x": 300, "y": 0, "width": 200, "height": 80, "file": "idea.md"}
        ],
        "edges": [
            {"id": "e", "fromNode": "t", "fromSide": "right", "toNode": "f", "toSide": "left"}
        ]
    }"#;
    let (_dir, store, session) =
        vault_session(&[("board.canvas", canvas), ("idea.md", "# Idea\n\nDetails here.")]).await;
    let board = store.get("board.canvas").cloned().expect("canvas");

    begin_batch(&session, RenderOverrides::default())
        .await
        .expect("begin");
    let html = render_document_to_string(
        &session,
        &board,
        RenderOverrides {
            files_to_export: Some(["idea.md".to_string()].into()),
            ..Default::default()
        },
    )
    .await
    .expect("canvas render");
    end_batch(&session);

    assert!(html.contains("<em>text</em>"));
    assert!(html.contains("Details here."));
    assert!(html.contains("canvas-edge-bodies"));
    assert!(!html.contains("document-embed-placeholder"));
    assert!(!session.error_occurred());
}

#[tokio::test]
async fn free_standing_markdown_uses_the_same_pipeline() {
    let (_dir, _store, session) = vault_session(&[]).await;
    let html = render_markdown_to_string(
        &session,
        "Some `code` and a [[missing]] link.",
        RenderOverrides {
            create_document_container: Some(false),
            ..Default::default()
        },
    )
    .await
    .expect("markdown render");

    assert!(html.starts_with("<div class=\"markdown-preview-sizer"));
    assert!(!html.contains("markdown-preview-view"));
    assert!(html.contains("<code>code</code>"));
    assert!(html.contains("internal-link"));
}
